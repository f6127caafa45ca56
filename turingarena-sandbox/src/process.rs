use std::io::BufReader;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use nix::unistd::Pid;

use crate::{LinuxProcessMonitor, MonitorError, ProcessInfo, ProcessMonitor, SandboxError};

const STOP_POLL_INTERVAL: Duration = Duration::from_millis(10);
const STOP_KILL_REASON: &str = "process did not terminate after exit";
const DROP_KILL_REASON: &str = "process abandoned";

/// The two pipes connected to the standard input and output of the process.
#[derive(Debug)]
pub struct ProcessPipes {
    /// Data sent to the process.
    pub downward: ChildStdin,
    /// Data produced by the process.
    pub upward: BufReader<ChildStdout>,
}

/// A program running under the control of the engine.
///
/// The child is never waited by the standard library, its termination is collected by the
/// monitor. Dropping the process kills it if it's still alive.
#[derive(Debug)]
pub struct SandboxProcess {
    child: Child,
    monitor: Arc<LinuxProcessMonitor>,
}

impl SandboxProcess {
    /// Spawn the command with piped standard input and output. The standard error is inherited.
    pub fn start(command: &mut Command) -> Result<(SandboxProcess, ProcessPipes), SandboxError> {
        command.stdin(Stdio::piped()).stdout(Stdio::piped());
        let mut child = command.spawn().map_err(|source| SandboxError::Spawn {
            command: format!("{:?}", command),
            source,
        })?;
        let pid = child.id();
        let downward = child.stdin.take();
        let upward = child.stdout.take();
        let monitor = Arc::new(LinuxProcessMonitor::new(Pid::from_raw(pid as i32)));
        let process = SandboxProcess { child, monitor };
        let (downward, upward) = match (downward, upward) {
            (Some(downward), Some(upward)) => (downward, upward),
            _ => return Err(SandboxError::MissingPipes(pid)),
        };
        info!("Started process {} running {:?}", pid, command);
        let pipes = ProcessPipes {
            downward,
            upward: BufReader::new(upward),
        };
        Ok((process, pipes))
    }

    pub fn pid(&self) -> u32 {
        self.child.id()
    }

    /// A handle to the monitor of this process, usable from other threads.
    pub fn monitor(&self) -> Arc<dyn ProcessMonitor> {
        self.monitor.clone()
    }

    /// Measure the process, killing it if `kill_reason` is given.
    pub fn get_status(&self, kill_reason: Option<&str>) -> Result<ProcessInfo, MonitorError> {
        self.monitor.get_status(kill_reason)
    }

    /// Wait at most `grace` for the process to terminate by itself, then kill it.
    pub fn stop(&self, grace: Duration) -> Result<ProcessInfo, MonitorError> {
        let deadline = Instant::now() + grace;
        loop {
            if self.monitor.has_terminated()? {
                return self.monitor.get_status(None);
            }
            if Instant::now() >= deadline {
                return self.monitor.get_status(Some(STOP_KILL_REASON));
            }
            thread::sleep(STOP_POLL_INTERVAL);
        }
    }
}

impl Drop for SandboxProcess {
    fn drop(&mut self) {
        if let Err(e) = self.monitor.get_status(Some(DROP_KILL_REASON)) {
            debug!("Cannot kill process {}: {}", self.child.id(), e);
        }
    }
}
