use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

use crate::Expression;

/// A named storage area of the interface. A variable with zero dimensions is a scalar, otherwise
/// it is an array with that many dimensions.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Variable {
    pub name: String,
    pub dimensions: usize,
}

impl Variable {
    pub fn scalar<S: Into<String>>(name: S) -> Variable {
        Variable {
            name: name.into(),
            dimensions: 0,
        }
    }

    pub fn array<S: Into<String>>(name: S, dimensions: usize) -> Variable {
        Variable {
            name: name.into(),
            dimensions,
        }
    }

    /// The reference to the whole variable, without any index applied.
    pub fn as_reference(&self) -> Reference {
        Reference::new(self.clone(), 0)
    }
}

impl Display for Variable {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// A variable with some of its indices already applied.
///
/// `A[i][j]` for a 3-dimensional `A` is a reference with `index_count = 2`, and it still has one
/// dimension left to be addressed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Reference {
    pub variable: Variable,
    pub index_count: usize,
}

impl Reference {
    pub fn new(variable: Variable, index_count: usize) -> Reference {
        debug_assert!(
            index_count <= variable.dimensions,
            "too many indices for {}",
            variable
        );
        Reference {
            variable,
            index_count,
        }
    }

    /// The number of dimensions still to be addressed.
    pub fn dimensions(&self) -> usize {
        self.variable.dimensions - self.index_count
    }

    /// Whether this reference addresses a single integer.
    pub fn is_scalar(&self) -> bool {
        self.dimensions() == 0
    }

    /// The reference with the last index removed, `None` for the whole variable.
    pub fn parent(&self) -> Option<Reference> {
        if self.index_count == 0 {
            None
        } else {
            Some(Reference::new(self.variable.clone(), self.index_count - 1))
        }
    }
}

impl Display for Reference {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.variable.name)?;
        for _ in 0..self.index_count {
            write!(f, "[_]")?;
        }
        Ok(())
    }
}

/// How a node uses a reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReferenceStatus {
    /// The node introduces the storage for the reference, as `read` targets and call return
    /// targets do.
    Declared,
    /// The node consumes an existing value.
    Resolved,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReferenceAction {
    pub reference: Reference,
    pub status: ReferenceStatus,
}

impl ReferenceAction {
    pub fn declared(reference: Reference) -> ReferenceAction {
        ReferenceAction {
            reference,
            status: ReferenceStatus::Declared,
        }
    }

    pub fn resolved(reference: Reference) -> ReferenceAction {
        ReferenceAction {
            reference,
            status: ReferenceStatus::Resolved,
        }
    }
}

/// Storage for a whole variable is introduced at this point of the program.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VariableDeclaration {
    pub variable: Variable,
}

/// The array addressed by `reference` has to be sized with `size` elements.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceAllocation {
    pub reference: Reference,
    pub size: Expression,
}
