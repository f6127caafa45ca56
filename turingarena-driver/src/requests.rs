use std::fmt::{Display, Formatter};

/// The states the engine reports to the driver, each one sent as a single integer line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverState {
    /// The request has been served.
    Ready,
    /// The program is invoking a callback; the index and the arguments follow.
    Callback,
    /// The run failed.
    Error,
    /// A resource report follows: time in microseconds, peak and current memory in bytes.
    ResourceUsage,
}

impl DriverState {
    pub fn code(self) -> i64 {
        match self {
            DriverState::Ready => 0,
            DriverState::Callback => 1,
            DriverState::Error => 2,
            DriverState::ResourceUsage => 3,
        }
    }

    pub fn from_code(code: i64) -> Option<DriverState> {
        match code {
            0 => Some(DriverState::Ready),
            1 => Some(DriverState::Callback),
            2 => Some(DriverState::Error),
            3 => Some(DriverState::ResourceUsage),
            _ => None,
        }
    }
}

/// What the driver is asking for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestSignature {
    /// A bare command, like `checkpoint`, `exit` or `return`.
    Command(String),
    /// `call <method>`; the arguments follow the request.
    Call(String),
}

impl RequestSignature {
    pub fn command(&self) -> &str {
        match self {
            RequestSignature::Command(command) => command,
            RequestSignature::Call(_) => "call",
        }
    }

    pub fn is_command(&self, command: &str) -> bool {
        matches!(self, RequestSignature::Command(c) if c == command)
    }
}

impl Display for RequestSignature {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            RequestSignature::Command(command) => write!(f, "{}", command),
            RequestSignature::Call(method) => write!(f, "call {}", method),
        }
    }
}
