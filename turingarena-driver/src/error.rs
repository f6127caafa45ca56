use thiserror::Error;

use turingarena_sandbox::{MonitorError, SandboxError};

/// The ways a run of the protocol engine can end before the program exits.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The program did not follow the protocol on its pipes.
    #[error("Communication error: {0}")]
    Communication(String),
    /// The driver sent a request the interface does not allow at this point.
    #[error("Interface error: {0}")]
    Interface(String),
    /// The driver asked to stop the run.
    #[error("Stopped by the driver")]
    DriverStop,
    /// The program failed: it crashed, exited early or was killed by the monitor.
    #[error("The algorithm {message}")]
    AlgorithmRuntime {
        message: String,
        #[source]
        source: Box<EngineError>,
    },
    #[error("Cannot measure the process")]
    Monitor(#[from] MonitorError),
    #[error("Cannot talk to the driver")]
    DriverChannel(#[source] std::io::Error),
    #[error("Cannot start the program")]
    Sandbox(#[from] SandboxError),
}

impl EngineError {
    pub fn communication<S: Into<String>>(message: S) -> EngineError {
        EngineError::Communication(message.into())
    }

    pub fn interface<S: Into<String>>(message: S) -> EngineError {
        EngineError::Interface(message.into())
    }

    /// The error raised when a value that is needed has not been provided by anyone.
    pub(crate) fn not_available<D: std::fmt::Display>(what: D) -> EngineError {
        EngineError::Interface(format!("value of `{}` is not available", what))
    }
}
