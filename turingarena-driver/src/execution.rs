use crate::bindings::Location;
use crate::{RequestSignature, Value};

/// The three legs of the execution of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionPhase {
    /// Send data to the program, size the storage.
    Downward,
    /// Receive data from the program.
    Upward,
    /// Answer a request of the driver.
    Request,
}

pub(crate) type Assignment = (Location, Value);

/// The effects of the execution of a node, applied by the engine.
#[derive(Debug, Clone, Default)]
pub(crate) struct ExecutionResult {
    pub assignments: Vec<Assignment>,
    /// The request already read from the driver and not answered yet.
    pub request_lookahead: Option<RequestSignature>,
    pub does_break: bool,
}

impl ExecutionResult {
    pub fn with_lookahead(request_lookahead: Option<RequestSignature>) -> ExecutionResult {
        ExecutionResult {
            request_lookahead,
            ..Default::default()
        }
    }

    pub fn assign(mut self, location: Location, value: Value) -> ExecutionResult {
        self.assignments.push((location, value));
        self
    }

    pub fn breaking() -> ExecutionResult {
        ExecutionResult {
            does_break: true,
            ..Default::default()
        }
    }

    /// The result of executing `self` and then `other`.
    pub fn merge(mut self, other: ExecutionResult) -> ExecutionResult {
        self.assignments.extend(other.assignments);
        ExecutionResult {
            assignments: self.assignments,
            request_lookahead: other.request_lookahead,
            does_break: other.does_break,
        }
    }

    pub fn with_request_processed(mut self) -> ExecutionResult {
        self.request_lookahead = None;
        self
    }
}
