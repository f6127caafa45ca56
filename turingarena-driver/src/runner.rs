use std::fmt::{Display, Formatter};
use std::process::Command;
use std::time::Duration;

use itertools::Itertools;
use serde::{Deserialize, Serialize};

use turingarena_interface::InterfaceDefinition;
use turingarena_sandbox::{ProcessInfo, ProcessMonitor, SandboxProcess};

use crate::bindings::DEFAULT_MAX_ARRAY_CELLS;
use crate::{DriverConnection, DriverState, Engine, EngineError, SandboxConnection};

/// Tunables of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// How long to wait for a line from the program before killing it.
    pub upward_timeout: Duration,
    /// How long to wait for the program to terminate by itself at the end of the run.
    pub stop_grace: Duration,
    /// How many array cells the run can create, in all the arrays.
    pub max_array_cells: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            upward_timeout: Duration::from_secs(3),
            stop_grace: Duration::from_secs(1),
            max_array_cells: DEFAULT_MAX_ARRAY_CELLS,
        }
    }
}

/// How a run ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "message", rename_all = "snake_case")]
pub enum RunOutcome {
    /// The program reached the exit.
    Completed,
    /// The driver stopped the run.
    Stopped,
    CommunicationError(String),
    InterfaceError(String),
    /// The program crashed, exited early or was killed.
    AlgorithmError(String),
    InternalError(String),
}

impl RunOutcome {
    pub fn from_result(result: &Result<(), EngineError>) -> RunOutcome {
        match result {
            Ok(()) => RunOutcome::Completed,
            Err(EngineError::DriverStop) => RunOutcome::Stopped,
            Err(EngineError::Communication(message)) => {
                RunOutcome::CommunicationError(message.clone())
            }
            Err(EngineError::Interface(message)) => RunOutcome::InterfaceError(message.clone()),
            Err(EngineError::AlgorithmRuntime { message, .. }) => {
                RunOutcome::AlgorithmError(message.clone())
            }
            Err(error) => RunOutcome::InternalError(anyhow::Chain::new(error).join(": ")),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, RunOutcome::Completed)
    }
}

impl Display for RunOutcome {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            RunOutcome::Completed => write!(f, "completed"),
            RunOutcome::Stopped => write!(f, "stopped by the driver"),
            RunOutcome::CommunicationError(message) => write!(f, "communication error: {}", message),
            RunOutcome::InterfaceError(message) => write!(f, "interface error: {}", message),
            RunOutcome::AlgorithmError(message) => write!(f, "the algorithm {}", message),
            RunOutcome::InternalError(message) => write!(f, "internal error: {}", message),
        }
    }
}

/// The result of a run of a program: how it ended and the final state of the process.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunSummary {
    #[serde(flatten)]
    pub outcome: RunOutcome,
    pub process: ProcessInfo,
}

/// Turn a communication failure caused by the program dying or being killed into an
/// [`EngineError::AlgorithmRuntime`].
pub fn diagnose(error: EngineError, monitor: &dyn ProcessMonitor) -> EngineError {
    if !matches!(error, EngineError::Communication(_)) {
        return error;
    }
    match monitor.get_status(None) {
        Ok(info) if !info.is_running_normally() => EngineError::AlgorithmRuntime {
            message: info.message,
            source: Box::new(error),
        },
        Ok(_) => error,
        Err(e) => {
            warn!("Cannot diagnose the failure of the program: {:?}", e);
            error
        }
    }
}

/// Run the engine to completion. On failure the error is diagnosed and, unless the driver itself
/// asked to stop, ERROR is reported to the driver.
pub fn drive(engine: &mut Engine) -> Result<(), EngineError> {
    let result = engine.run().map_err(|e| diagnose(e, engine.monitor().as_ref()));
    if let Err(error) = &result {
        if !matches!(error, EngineError::DriverStop) {
            warn!("The run failed: {}", error);
            let driver = engine.driver();
            let reported = driver
                .send_state(DriverState::Error)
                .and_then(|_| driver.flush());
            if let Err(e) = reported {
                debug!("Cannot report the error to the driver: {:?}", e);
            }
        }
    }
    result
}

/// Start `command` in a monitored process and run the interface between it and the driver.
///
/// Only the failures to start or to measure the program are returned as errors, every other
/// failure is described by the outcome of the summary.
pub fn run_interface(
    interface: &InterfaceDefinition,
    command: &mut Command,
    driver: DriverConnection,
    config: &EngineConfig,
) -> Result<RunSummary, EngineError> {
    let program = interface.lower();
    trace!("Lowered interface:\n{}", program);
    let (process, pipes) = SandboxProcess::start(command)?;
    info!("Started the program with pid {}", process.pid());
    let sandbox = SandboxConnection::new(
        Box::new(pipes.downward),
        Box::new(pipes.upward),
        process.monitor(),
        config.upward_timeout,
    );
    let result = {
        let mut engine =
            Engine::new(&program, driver, sandbox).with_max_array_cells(config.max_array_cells);
        drive(&mut engine)
    };
    // the pipes are closed at this point, a well-behaving program terminates by itself
    let process_info = process.stop(config.stop_grace)?;
    let outcome = RunOutcome::from_result(&result);
    info!("Run outcome: {:?}, the program {}", outcome, process_info.message);
    Ok(RunSummary {
        outcome,
        process: process_info,
    })
}
