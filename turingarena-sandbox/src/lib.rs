//! Execution and measurement of the program under evaluation.
//!
//! The program is started as a child process with its standard input and output connected to
//! pipes. A [`ProcessMonitor`](trait.ProcessMonitor.html) can be asked at any time for the
//! resource usage of the process, and to kill it.
//!
//! ```no_run
//! use std::process::Command;
//! use std::time::Duration;
//! use turingarena_sandbox::SandboxProcess;
//!
//! let (process, pipes) = SandboxProcess::start(&mut Command::new("./solution")).unwrap();
//! drop(pipes);
//! let info = process.stop(Duration::from_secs(1)).unwrap();
//! println!("{}", info.message);
//! ```

#[macro_use]
extern crate log;

pub use error::{MonitorError, SandboxError};
pub use info::{ProcessInfo, ProcessState};
pub use monitor::{FakeProcessMonitor, LinuxProcessMonitor, ProcessMonitor};
pub use process::{ProcessPipes, SandboxProcess};

mod error;
mod info;
mod monitor;
mod proc_stat;
mod process;
mod signals;
