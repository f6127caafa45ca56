//! Flattening of the lowered program into the sequence of instructions both cursors walk.

use turingarena_interface::{Block, Expression, IntermediateNode};

use crate::bindings::{Binding, Bindings, Frame, ScopeChain};
use crate::EngineError;

/// A node reached by the unroller, with the names visible at that point.
#[derive(Debug, Clone)]
pub(crate) struct Instruction<'a> {
    pub node: &'a IntermediateNode,
    pub scope: ScopeChain,
}

/// The outcome of asking the unroller for the next instruction.
#[derive(Debug)]
pub(crate) enum Unrolled<'a> {
    Instruction(Instruction<'a>),
    /// The value of the expression is needed to continue, but it's not known yet. Nothing was
    /// consumed, the same call can be retried later.
    Blocked(String),
    Done,
}

/// Whether the driver has to answer something inside the node.
pub(crate) fn contains_request(node: &IntermediateNode) -> bool {
    node.is_request() || node.blocks().iter().any(|b| b.children.iter().any(contains_request))
}

/// Whether a `break` inside the node exits a loop enclosing the node.
fn breaks_out(node: &IntermediateNode) -> bool {
    match node {
        IntermediateNode::Break => true,
        IntermediateNode::Loop(_) | IntermediateNode::Call(_) | IntermediateNode::Callback(_) => {
            false
        }
        _ => node
            .blocks()
            .iter()
            .any(|b| b.children.iter().any(breaks_out)),
    }
}

/// Whether the unroller expands the control structure instead of producing it as a single
/// instruction. The structures the driver does not have to look into are left whole and
/// executed recursively by the sandbox cursor, when their control values are known.
pub(crate) fn is_unrolled(node: &IntermediateNode) -> bool {
    matches!(
        node,
        IntermediateNode::Block(_)
            | IntermediateNode::For(_)
            | IntermediateNode::If(_)
            | IntermediateNode::Switch(_)
            | IntermediateNode::Loop(_)
    ) && (contains_request(node) || breaks_out(node))
}

#[derive(Debug)]
enum Task<'a> {
    Block {
        children: &'a [IntermediateNode],
        next: usize,
        scope: ScopeChain,
        /// The declarations of a branch stay visible after it, the ones of a loop iteration don't.
        is_branch: bool,
    },
    For {
        index: &'a str,
        body: &'a Block,
        next: i64,
        range: i64,
        scope: ScopeChain,
    },
    Loop {
        body: &'a Block,
        scope: ScopeChain,
    },
}

/// What to do after looking at the top of the stack.
enum Action<'a> {
    Pop,
    Push(Task<'a>),
    Emit(Instruction<'a>),
    Declare(&'a str),
    Break,
    Enter(&'a IntermediateNode, ScopeChain),
}

/// Explicit stack-based walk of the program producing its leaves in execution order.
#[derive(Debug)]
pub(crate) struct Unroller<'a> {
    stack: Vec<Task<'a>>,
}

fn evaluate(expression: &Expression, scope: &ScopeChain, bindings: &Bindings) -> Option<i64> {
    expression.evaluate(&Frame::new(scope, bindings))
}

impl<'a> Unroller<'a> {
    pub fn new(program: &'a Block) -> Unroller<'a> {
        Unroller {
            stack: vec![Task::Block {
                children: &program.children,
                next: 0,
                scope: ScopeChain::default(),
                is_branch: false,
            }],
        }
    }

    /// Produce the next instruction. Declarations get their storage in `bindings`.
    pub fn next(&mut self, bindings: &mut Bindings) -> Result<Unrolled<'a>, EngineError> {
        loop {
            let action = match self.stack.last_mut() {
                None => return Ok(Unrolled::Done),
                Some(Task::Block {
                    children,
                    next,
                    scope,
                    ..
                }) => match (*children).get(*next) {
                    None => Action::Pop,
                    Some(node) => {
                        *next += 1;
                        match node {
                            IntermediateNode::Declare(declaration) => {
                                Action::Declare(&declaration.variable.name)
                            }
                            IntermediateNode::Break => Action::Break,
                            node if is_unrolled(node) => {
                                // step back, entering may block on an unknown value
                                *next -= 1;
                                Action::Enter(node, scope.clone())
                            }
                            node => Action::Emit(Instruction {
                                node,
                                scope: scope.clone(),
                            }),
                        }
                    }
                },
                Some(Task::For {
                    index,
                    body,
                    next,
                    range,
                    scope,
                }) => {
                    if *next >= *range {
                        Action::Pop
                    } else {
                        let body: &'a Block = *body;
                        let iteration = scope.with(index, Binding::Index(*next));
                        *next += 1;
                        Action::Push(Task::Block {
                            children: &body.children,
                            next: 0,
                            scope: iteration,
                            is_branch: false,
                        })
                    }
                }
                Some(Task::Loop { body, scope }) => Action::Push(Task::Block {
                    children: &(*body).children,
                    next: 0,
                    scope: scope.clone(),
                    is_branch: false,
                }),
            };
            match action {
                Action::Pop => self.pop(),
                Action::Push(task) => self.stack.push(task),
                Action::Emit(instruction) => return Ok(Unrolled::Instruction(instruction)),
                Action::Declare(name) => {
                    let slot = bindings.new_slot();
                    if let Some(Task::Block { scope, .. }) = self.stack.last_mut() {
                        *scope = scope.with(name, Binding::Slot(slot));
                    }
                }
                Action::Break => self.break_loop()?,
                Action::Enter(node, scope) => {
                    let task = match Unroller::enter(node, scope, bindings) {
                        Ok(task) => task,
                        Err(blocked) => return Ok(Unrolled::Blocked(blocked)),
                    };
                    if let Some(Task::Block { next, .. }) = self.stack.last_mut() {
                        *next += 1;
                    }
                    if let Some(task) = task {
                        self.stack.push(task);
                    }
                }
            }
        }
    }

    /// The task executing a control structure, `None` if nothing has to be executed. If a control
    /// value is not known, the expression is returned.
    fn enter(
        node: &'a IntermediateNode,
        scope: ScopeChain,
        bindings: &Bindings,
    ) -> Result<Option<Task<'a>>, String> {
        let value = |expression: &Expression| {
            evaluate(expression, &scope, bindings).ok_or_else(|| expression.to_string())
        };
        let branch = |block: &'a Block| Task::Block {
            children: &block.children,
            next: 0,
            scope: scope.clone(),
            is_branch: true,
        };
        let task = match node {
            IntermediateNode::Block(block) => Some(branch(block)),
            IntermediateNode::For(node) => Some(Task::For {
                index: &node.index.name,
                body: &node.body,
                next: 0,
                range: value(&node.range)?,
                scope: scope.clone(),
            }),
            IntermediateNode::If(node) => {
                if value(&node.condition)? != 0 {
                    Some(branch(&node.then_body))
                } else {
                    node.else_body.as_ref().map(branch)
                }
            }
            IntermediateNode::Switch(node) => {
                let value = value(&node.value)?;
                node.cases
                    .iter()
                    .find(|c| c.labels.contains(&value))
                    .map(|c| branch(&c.body))
            }
            IntermediateNode::Loop(node) => Some(Task::Loop {
                body: &node.body,
                scope: scope.clone(),
            }),
            _ => unreachable!("{:?} is not a control structure", node),
        };
        Ok(task)
    }

    fn pop(&mut self) {
        if let Some(Task::Block {
            scope,
            is_branch: true,
            ..
        }) = self.stack.pop()
        {
            if let Some(Task::Block { scope: parent, .. }) = self.stack.last_mut() {
                *parent = scope;
            }
        }
    }

    fn break_loop(&mut self) -> Result<(), EngineError> {
        while let Some(task) = self.stack.pop() {
            if let Task::Loop { .. } = task {
                return Ok(());
            }
        }
        Err(EngineError::interface("break outside of a loop"))
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use turingarena_interface::InterfaceDefinition;

    use super::*;

    fn unroll_all(source: &str, bindings: &mut Bindings) -> Vec<String> {
        let interface = InterfaceDefinition::compile(source).unwrap();
        let program = interface.lower();
        let mut unroller = Unroller::new(&program);
        let mut out = vec![];
        loop {
            match unroller.next(bindings).unwrap() {
                Unrolled::Instruction(i) => out.push(i.node.to_string().trim().to_string()),
                Unrolled::Blocked(expression) => {
                    out.push(format!("blocked on {}", expression));
                    break;
                }
                Unrolled::Done => break,
            }
        }
        out
    }

    #[test]
    fn test_unroll_loop_without_requests_is_kept_whole() {
        let mut bindings = Bindings::default();
        let out = unroll_all(
            "function f(int n, int[] a); \
             main { read n; for i to n { read a[i]; } call f(n, a); }",
            &mut bindings,
        );
        assert_eq!(out[0], "print 0; // checkpoint");
        assert!(out.iter().any(|i| i.starts_with("for i to n")));
        assert_eq!(out.last().map(String::as_str), Some("exit;"));
    }

    #[test]
    fn test_unroll_loop_with_requests() {
        let mut bindings = Bindings::default();
        let out = unroll_all(
            "function f(int i); main { for i to 3 { call f(i); } }",
            &mut bindings,
        );
        let calls = out.iter().filter(|i| i.starts_with("call f(i)")).count();
        assert_eq!(calls, 3);
    }

    #[test]
    fn test_unroll_blocks_on_unknown_range() {
        let mut bindings = Bindings::default();
        let out = unroll_all(
            "function f(int i); main { read n; for i to n { call f(i); } }",
            &mut bindings,
        );
        assert_eq!(out.last().map(String::as_str), Some("blocked on n"));
    }

    #[test]
    fn test_fresh_storage_per_iteration() {
        let mut bindings = Bindings::default();
        let interface = InterfaceDefinition::compile(
            "function f() -> int; main { for i to 2 { call f() -> r; write r; } }",
        )
        .unwrap();
        let program = interface.lower();
        let mut unroller = Unroller::new(&program);
        let mut slots = vec![];
        while let Unrolled::Instruction(instruction) = unroller.next(&mut bindings).unwrap() {
            if let IntermediateNode::Call(_) = instruction.node {
                slots.push(instruction.scope.find("r"));
            }
        }
        assert_eq!(slots.len(), 2);
        assert_ne!(slots[0], slots[1]);
    }

    #[test]
    fn test_break_leaves_loop() {
        let mut bindings = Bindings::default();
        let out = unroll_all(
            "function f(); main { loop { call f(); break; } checkpoint; }",
            &mut bindings,
        );
        let calls = out.iter().filter(|i| i.starts_with("call f()")).count();
        assert_eq!(calls, 1);
        assert_eq!(
            out.iter().filter(|i| *i == "print 0; // checkpoint").count(),
            2
        );
    }
}
