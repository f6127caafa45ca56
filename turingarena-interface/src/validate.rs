use crate::{Block, Diagnostic, IntermediateNode, VariableReference};

pub(crate) const MISSING_FLUSH: &str = "missing flush between output and input instructions";

fn scalar_arguments<'a>(
    kind: &'static str,
    arguments: &'a [VariableReference],
) -> impl Iterator<Item = Diagnostic> + 'a {
    arguments
        .iter()
        .filter(|a| !a.reference().is_scalar())
        .map(move |a| {
            Diagnostic::error(format!("{} arguments must be scalars", kind)).with_note(format!(
                "`{}` still has {} dimension(s)",
                a,
                a.reference().dimensions()
            ))
        })
}

impl Block {
    pub fn validate(&self) -> Box<dyn Iterator<Item = Diagnostic> + '_> {
        Box::new(self.children.iter().flat_map(|c| c.validate()))
    }
}

impl IntermediateNode {
    /// The problems of this node and of all its descendants, computed lazily.
    pub fn validate(&self) -> Box<dyn Iterator<Item = Diagnostic> + '_> {
        match self {
            IntermediateNode::Read(read) => Box::new(scalar_arguments("read", &read.arguments)),
            IntermediateNode::Write(write) => {
                Box::new(scalar_arguments("write", &write.arguments))
            }
            IntermediateNode::Call(call) => {
                let method = &call.method;
                let count = if method.parameters.len() != call.arguments.len() {
                    Some(Diagnostic::error(format!(
                        "wrong number of arguments in call to `{}`: expected {}, got {}",
                        method.name,
                        method.parameters.len(),
                        call.arguments.len()
                    )))
                } else {
                    None
                };
                let dimensions = method
                    .parameters
                    .iter()
                    .zip(call.arguments.iter())
                    .filter(|(p, a)| p.dimensions != a.reference().dimensions())
                    .map(move |(p, a)| {
                        Diagnostic::error(format!(
                            "argument `{}` of `{}` has the wrong number of dimensions",
                            a, method.name
                        ))
                        .with_note(format!(
                            "parameter `{}` has {} dimension(s), `{}` has {}",
                            p.name,
                            p.dimensions,
                            a,
                            a.reference().dimensions()
                        ))
                    });
                let return_value = match (&call.return_value, method.return_dimensions) {
                    (Some(r), None) => Some(Diagnostic::error(format!(
                        "`{}` does not return a value, but it is assigned to `{}`",
                        method.name, r
                    ))),
                    (Some(r), Some(d)) if r.reference().dimensions() != d => {
                        Some(Diagnostic::error(format!(
                            "return value of `{}` cannot be assigned to `{}`",
                            method.name, r
                        )))
                    }
                    _ => None,
                };
                Box::new(
                    count
                        .into_iter()
                        .chain(dimensions)
                        .chain(return_value)
                        .chain(call.callbacks.iter().flat_map(|c| c.body.validate())),
                )
            }
            _ => Box::new(self.blocks().into_iter().flat_map(|b| b.validate())),
        }
    }
}

/// The set of possible states of the output of the program at some point: whether something may
/// have been written and not flushed yet.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct FlushState {
    clean: bool,
    dirty: bool,
}

impl FlushState {
    const CLEAN: FlushState = FlushState {
        clean: true,
        dirty: false,
    };
    const DIRTY: FlushState = FlushState {
        clean: false,
        dirty: true,
    };
    const UNREACHABLE: FlushState = FlushState {
        clean: false,
        dirty: false,
    };

    fn union(self, other: FlushState) -> FlushState {
        FlushState {
            clean: self.clean || other.clean,
            dirty: self.dirty || other.dirty,
        }
    }

    fn is_reachable(self) -> bool {
        self.clean || self.dirty
    }

    fn written(self) -> FlushState {
        if self.is_reachable() {
            FlushState::DIRTY
        } else {
            self
        }
    }

    fn flushed(self) -> FlushState {
        if self.is_reachable() {
            FlushState::CLEAN
        } else {
            self
        }
    }
}

/// Path-sensitive check that every input instruction is preceded by a flush after any output
/// instruction, along every control flow path (loop back-edges included). It also reports the
/// `break`s outside of a loop.
#[derive(Default)]
pub(crate) struct FlushAnalysis {
    diagnostics: Vec<Diagnostic>,
    silent: usize,
    breaks: Vec<FlushState>,
}

impl FlushAnalysis {
    pub(crate) fn analyze(main: &Block) -> Vec<Diagnostic> {
        let mut analysis = FlushAnalysis::default();
        analysis.block(main, FlushState::CLEAN);
        analysis.diagnostics
    }

    fn report(&mut self, diagnostic: Diagnostic) {
        if self.silent == 0 {
            self.diagnostics.push(diagnostic);
        }
    }

    fn block(&mut self, block: &Block, state: FlushState) -> FlushState {
        block
            .children
            .iter()
            .fold(state, |state, child| self.node(child, state))
    }

    /// The state at the head of a loop, i.e. the least fixpoint of `head = entry ∪ body(head)`.
    fn loop_head(&mut self, body: &Block, entry: FlushState) -> FlushState {
        self.silent += 1;
        let mut head = entry;
        loop {
            let next = entry.union(self.block(body, head));
            if next == head {
                break;
            }
            head = next;
        }
        self.silent -= 1;
        head
    }

    fn node(&mut self, node: &IntermediateNode, state: FlushState) -> FlushState {
        match node {
            IntermediateNode::Write(_)
            | IntermediateNode::Checkpoint
            | IntermediateNode::Print(_) => state.written(),
            IntermediateNode::Flush => state.flushed(),
            IntermediateNode::Exit => FlushState::UNREACHABLE,
            IntermediateNode::Read(_) => {
                if state.dirty {
                    self.report(
                        Diagnostic::error(MISSING_FLUSH).with_note(node.to_string().trim().to_string()),
                    );
                }
                state
            }
            IntermediateNode::Call(call) => {
                for callback in &call.callbacks {
                    self.block(&callback.body, FlushState::DIRTY);
                }
                if call.callbacks.is_empty() {
                    state
                } else {
                    state.written()
                }
            }
            IntermediateNode::Break => {
                match self.breaks.last_mut() {
                    Some(exit) => *exit = exit.union(state),
                    None => self.report(Diagnostic::error("break outside of a loop")),
                }
                FlushState::UNREACHABLE
            }
            IntermediateNode::If(node) => {
                let then_state = self.block(&node.then_body, state);
                let else_state = match &node.else_body {
                    Some(body) => self.block(body, state),
                    None => state,
                };
                then_state.union(else_state)
            }
            IntermediateNode::Switch(node) => node
                .cases
                .iter()
                .fold(state, |out, case| out.union(self.block(&case.body, state))),
            IntermediateNode::For(node) => {
                // the body may run zero or more times, the loop ends at its head
                let head = self.loop_head(&node.body, state);
                self.block(&node.body, head);
                head
            }
            IntermediateNode::Loop(node) => {
                self.breaks.push(FlushState::UNREACHABLE);
                let head = self.loop_head(&node.body, state);
                // forget the breaks seen while looking for the fixpoint
                if let Some(exit) = self.breaks.last_mut() {
                    *exit = FlushState::UNREACHABLE;
                }
                self.block(&node.body, head);
                self.breaks.pop().unwrap_or(FlushState::UNREACHABLE)
            }
            IntermediateNode::Block(block) => self.block(block, state),
            IntermediateNode::Callback(callback) => {
                self.block(&callback.body, FlushState::DIRTY);
                state
            }
            IntermediateNode::Comment(_)
            | IntermediateNode::Declare(_)
            | IntermediateNode::Alloc(_) => state,
        }
    }
}
