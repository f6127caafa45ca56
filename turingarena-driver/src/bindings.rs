//! Storage of the values exchanged during a run.

use std::collections::HashSet;
use std::fmt::{Display, Formatter};
use std::rc::Rc;

use itertools::Itertools;

use turingarena_interface::{Expression, Scope, Variable, VariableReference};

use crate::{EngineError, Value};

/// The storage of a declared variable, or of a cell of an array.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Slot {
    Unset,
    Scalar(i64),
    Array(Vec<Slot>),
}

impl Slot {
    fn from_value(value: Value) -> Slot {
        match value {
            Value::Scalar(value) => Slot::Scalar(value),
            Value::Array(items) => Slot::Array(items.into_iter().map(Slot::from_value).collect()),
        }
    }

    fn to_value(&self) -> Option<Value> {
        match self {
            Slot::Unset => None,
            Slot::Scalar(value) => Some(Value::Scalar(*value)),
            Slot::Array(items) => items
                .iter()
                .map(|i| i.to_value())
                .collect::<Option<Vec<_>>>()
                .map(Value::Array),
        }
    }
}

pub(crate) type SlotId = usize;

/// A cell of the storage: a declared variable and the values of the indices applied to it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct Location {
    pub slot: SlotId,
    pub indices: Vec<i64>,
}

impl Display for Location {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.slot)?;
        for index in &self.indices {
            write!(f, "[{}]", index)?;
        }
        Ok(())
    }
}

/// The number of array cells a run may create, unless configured otherwise.
pub const DEFAULT_MAX_ARRAY_CELLS: usize = 1 << 24;

/// Who provided a value: the sandboxed program, or the driver (values written in the interface
/// count as the driver's).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Origin {
    Driver,
    Program,
}

impl Origin {
    /// The error blaming whoever provided the offending value.
    fn error(self, message: String) -> EngineError {
        match self {
            Origin::Driver => EngineError::Interface(message),
            Origin::Program => EngineError::Communication(message),
        }
    }
}

/// The number of array cells still available to a run.
#[derive(Debug)]
struct CellBudget {
    limit: usize,
    used: usize,
}

impl CellBudget {
    fn take(&mut self, cells: usize, origin: Origin) -> Result<(), EngineError> {
        match self.used.checked_add(cells) {
            Some(used) if used <= self.limit => {
                self.used = used;
                Ok(())
            }
            _ => Err(origin.error(format!(
                "the arrays would need more than {} cells",
                self.limit
            ))),
        }
    }
}

/// All the storage of a run. Every declaration gets a new slot, so values of different loop
/// iterations never alias.
#[derive(Debug)]
pub(crate) struct Bindings {
    slots: Vec<Slot>,
    budget: CellBudget,
    /// The cells holding a value written by the program.
    from_program: HashSet<Location>,
}

impl Default for Bindings {
    fn default() -> Self {
        Bindings::new(DEFAULT_MAX_ARRAY_CELLS)
    }
}

impl Bindings {
    /// Empty storage where at most `max_array_cells` array cells can be created.
    pub fn new(max_array_cells: usize) -> Self {
        Bindings {
            slots: vec![],
            budget: CellBudget {
                limit: max_array_cells,
                used: 0,
            },
            from_program: HashSet::new(),
        }
    }

    pub fn new_slot(&mut self) -> SlotId {
        self.slots.push(Slot::Unset);
        self.slots.len() - 1
    }

    fn cell(&self, location: &Location) -> Option<&Slot> {
        let mut slot = self.slots.get(location.slot)?;
        for &index in &location.indices {
            match slot {
                Slot::Array(items) => slot = items.get(usize::try_from(index).ok()?)?,
                _ => return None,
            }
        }
        Some(slot)
    }

    /// The cell at `location`, creating or growing the arrays on the way. `origin` is blamed
    /// when the arrays cannot grow.
    fn cell_mut(&mut self, location: &Location, origin: Origin) -> Result<&mut Slot, EngineError> {
        let mut slot = self
            .slots
            .get_mut(location.slot)
            .ok_or_else(|| EngineError::interface(format!("unknown storage {}", location)))?;
        for &index in &location.indices {
            let index = usize::try_from(index)
                .map_err(|_| origin.error(format!("negative index in {}", location)))?;
            if !matches!(slot, Slot::Array(_)) {
                *slot = Slot::Array(vec![]);
            }
            let Slot::Array(items) = slot else {
                unreachable!("the slot was just made an array");
            };
            if items.len() <= index {
                self.budget.take(index - items.len() + 1, origin)?;
                items.resize(index + 1, Slot::Unset);
            }
            slot = &mut items[index];
        }
        Ok(slot)
    }

    pub fn get(&self, location: &Location) -> Option<i64> {
        match self.cell(location)? {
            Slot::Scalar(value) => Some(*value),
            _ => None,
        }
    }

    /// The whole value stored at `location`, if every cell of it is set.
    pub fn value(&self, location: &Location) -> Option<Value> {
        self.cell(location)?.to_value()
    }

    pub fn is_set(&self, location: &Location) -> bool {
        !matches!(self.cell(location), None | Some(Slot::Unset))
    }

    /// Whether the value at `location` was written by the program.
    pub fn is_from_program(&self, location: &Location) -> bool {
        self.from_program.contains(location)
    }

    pub fn assign(
        &mut self,
        location: &Location,
        value: Value,
        origin: Origin,
    ) -> Result<(), EngineError> {
        trace!("Assigning {:?} to {} from the {:?}", value, location, origin);
        *self.cell_mut(location, origin)? = Slot::from_value(value);
        match origin {
            Origin::Program => self.from_program.insert(location.clone()),
            Origin::Driver => self.from_program.remove(location),
        };
        Ok(())
    }

    /// Make the array at `location` hold at least `size` cells, keeping the values already there.
    /// `origin` is who provided the size.
    pub fn allocate(
        &mut self,
        location: &Location,
        size: i64,
        origin: Origin,
    ) -> Result<(), EngineError> {
        let size = usize::try_from(size)
            .map_err(|_| origin.error(format!("negative array size {}", size)))?;
        let slot = self.cell_mut(location, origin)?;
        let current = match slot {
            Slot::Array(items) => items.len(),
            _ => 0,
        };
        if size > current {
            self.budget.take(size - current, origin)?;
        }
        let slot = self.cell_mut(location, origin)?;
        match slot {
            Slot::Array(items) if items.len() < size => items.resize(size, Slot::Unset),
            Slot::Array(_) => {}
            _ => *slot = Slot::Array(vec![Slot::Unset; size]),
        }
        Ok(())
    }
}

/// What a name refers to in a scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Binding {
    /// The value of a loop index.
    Index(i64),
    /// The storage of a declared variable.
    Slot(SlotId),
}

#[derive(Debug)]
struct ScopeEntry {
    name: String,
    binding: Binding,
    parent: Option<Rc<ScopeEntry>>,
}

/// An immutable chain of names visible at some point of the program. Extending a chain does not
/// change the chains it was built from.
#[derive(Debug, Clone, Default)]
pub(crate) struct ScopeChain {
    head: Option<Rc<ScopeEntry>>,
}

impl ScopeChain {
    pub fn with(&self, name: &str, binding: Binding) -> ScopeChain {
        ScopeChain {
            head: Some(Rc::new(ScopeEntry {
                name: name.to_string(),
                binding,
                parent: self.head.clone(),
            })),
        }
    }

    pub fn find(&self, name: &str) -> Option<Binding> {
        let mut entry = self.head.as_ref();
        while let Some(e) = entry {
            if e.name == name {
                return Some(e.binding);
            }
            entry = e.parent.as_ref();
        }
        None
    }

    /// The values of the `count` innermost loop indices, outermost first.
    pub fn innermost_indices(&self, count: usize) -> Option<Vec<i64>> {
        let mut indices = Vec::with_capacity(count);
        let mut entry = self.head.as_ref();
        while indices.len() < count {
            let e = entry?;
            if let Binding::Index(value) = e.binding {
                indices.push(value);
            }
            entry = e.parent.as_ref();
        }
        indices.reverse();
        Some(indices)
    }

    /// The names visible in this scope, innermost first, for debugging.
    pub fn names(&self) -> String {
        let mut names = vec![];
        let mut entry = self.head.as_ref();
        while let Some(e) = entry {
            names.push(e.name.as_str());
            entry = e.parent.as_ref();
        }
        names.iter().join(", ")
    }
}

/// The view of the storage from a point of the program, used to evaluate expressions.
pub(crate) struct Frame<'a> {
    pub chain: &'a ScopeChain,
    pub bindings: &'a Bindings,
}

impl<'a> Frame<'a> {
    pub fn new(chain: &'a ScopeChain, bindings: &'a Bindings) -> Self {
        Frame { chain, bindings }
    }

    /// The cell addressed by the reference.
    pub fn locate(&self, reference: &VariableReference) -> Result<Location, EngineError> {
        let slot = match self.chain.find(&reference.variable.name) {
            Some(Binding::Slot(slot)) => slot,
            Some(Binding::Index(_)) => {
                return Err(EngineError::interface(format!(
                    "cannot assign to loop index `{}`",
                    reference.variable
                )))
            }
            None => {
                return Err(EngineError::interface(format!(
                    "`{}` is not declared (visible: {})",
                    reference.variable,
                    self.chain.names()
                )))
            }
        };
        let indices = reference
            .evaluate_indices(self)
            .ok_or_else(|| EngineError::not_available(reference))?;
        Ok(Location { slot, indices })
    }

    /// Who provided the value of the expression.
    pub fn origin(&self, expression: &Expression) -> Origin {
        let Some(reference) = expression.as_variable_reference() else {
            return Origin::Driver;
        };
        match (
            self.chain.find(&reference.variable.name),
            reference.evaluate_indices(self),
        ) {
            (Some(Binding::Slot(slot)), Some(indices))
                if self.bindings.is_from_program(&Location { slot, indices: indices.clone() }) =>
            {
                Origin::Program
            }
            _ => Origin::Driver,
        }
    }
}

impl<'a> Scope for Frame<'a> {
    fn lookup(&self, variable: &Variable, indices: &[i64]) -> Option<i64> {
        match self.chain.find(&variable.name)? {
            Binding::Index(value) if indices.is_empty() => Some(value),
            Binding::Index(_) => None,
            Binding::Slot(slot) => self.bindings.get(&Location {
                slot,
                indices: indices.to_vec(),
            }),
        }
    }
}
