//! The protocol engine: runs the lowered main block of an interface between a driver, that sends
//! requests (`checkpoint`, `call`, `exit`, ...), and a sandboxed program, that talks with lines of
//! integers on its standard input and output.
//!
//! ```no_run
//! use std::io::{stdin, stdout, BufReader};
//! use std::process::Command;
//!
//! use turingarena_driver::{run_interface, DriverConnection, EngineConfig};
//! use turingarena_interface::InterfaceDefinition;
//!
//! # fn main() -> Result<(), anyhow::Error> {
//! let interface = InterfaceDefinition::from_file("interface.txt")?;
//! let driver = DriverConnection::new(Box::new(BufReader::new(stdin())), Box::new(stdout()));
//! let summary = run_interface(
//!     &interface,
//!     &mut Command::new("./solution"),
//!     driver,
//!     &EngineConfig::default(),
//! )?;
//! println!("{:?}", summary.outcome);
//! # Ok(())
//! # }
//! ```

#[macro_use]
extern crate log;

mod bindings;
mod client;
mod connection;
mod engine;
mod error;
mod execution;
mod requests;
mod runner;
mod unroller;
mod value;
mod watchdog;

pub use client::{CallResult, CallbackHandler, ClientError, DriverClient, ResourceUsage};
pub use connection::{DriverConnection, SandboxConnection};
pub use engine::Engine;
pub use error::EngineError;
pub use execution::ExecutionPhase;
pub use requests::{DriverState, RequestSignature};
pub use runner::{diagnose, drive, run_interface, EngineConfig, RunOutcome, RunSummary};
pub use value::{DecodeError, Decoded, Value, ValueDecoder};
pub use watchdog::{Watchdog, TIMEOUT_KILL_REASON};
