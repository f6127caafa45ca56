use std::path::PathBuf;

use nix::sys::signal::Signal;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("Process {pid} disappeared: cannot read {path:?}")]
    ProcessDisappeared {
        pid: i32,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Malformed stat file of process {pid}: {stat:?}")]
    MalformedStat { pid: i32, stat: String },
    #[error("Cannot send {signal:?} to process {pid}")]
    Signal {
        pid: i32,
        signal: Signal,
        #[source]
        source: nix::Error,
    },
    #[error("Cannot wait for process {pid}")]
    Wait {
        pid: i32,
        #[source]
        source: std::io::Error,
    },
    #[error("Cannot reset the memory peak of process {pid}")]
    ClearRefs {
        pid: i32,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("Cannot start {command}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("The pipes of process {0} are not available")]
    MissingPipes(u32),
    #[error(transparent)]
    Monitor(#[from] MonitorError),
}
