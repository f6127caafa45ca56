use serde::{Deserialize, Serialize};

use crate::signals::describe_signal;

/// The state of a monitored process at the moment of the measurement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProcessState {
    /// The process is still alive.
    Running,
    /// The process exited by itself with the given status.
    Exited(i32),
    /// The process was terminated by the given signal.
    Signaled(i32),
}

/// A measurement of the resource usage and state of a process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessInfo {
    /// User CPU time, in seconds.
    pub time_usage: f64,
    /// Peak resident set size, in bytes.
    pub peak_memory_usage: u64,
    /// Current resident set size, in bytes. Zero if the process is not running.
    pub current_memory_usage: u64,
    pub state: ProcessState,
    /// The reason the monitor killed the process for, if it did.
    pub kill_reason: Option<String>,
    /// Human readable description of the state.
    pub message: String,
}

impl ProcessInfo {
    pub fn new(
        time_usage: f64,
        peak_memory_usage: u64,
        current_memory_usage: u64,
        state: ProcessState,
        kill_reason: Option<String>,
    ) -> ProcessInfo {
        let message = state_message(state, kill_reason.as_deref());
        ProcessInfo {
            time_usage,
            peak_memory_usage,
            current_memory_usage,
            state,
            kill_reason,
            message,
        }
    }

    /// Whether the process is alive and was not killed by the monitor.
    pub fn is_running_normally(&self) -> bool {
        self.state == ProcessState::Running && self.kill_reason.is_none()
    }

    /// The CPU time in integer microseconds.
    pub fn time_usage_micros(&self) -> i64 {
        (self.time_usage * 1_000_000.0).round() as i64
    }
}

fn state_message(state: ProcessState, kill_reason: Option<&str>) -> String {
    match state {
        ProcessState::Running => match kill_reason {
            Some(reason) => format!("running normally, killed because: {}", reason),
            None => "running normally".into(),
        },
        ProcessState::Exited(0) => "exited normally".into(),
        ProcessState::Exited(status) => format!("exited with status {}", status),
        ProcessState::Signaled(signal) => describe_signal(signal),
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_messages() {
        let info = |state, reason: Option<&str>| {
            ProcessInfo::new(0.0, 0, 0, state, reason.map(String::from)).message
        };
        assert_eq!(info(ProcessState::Running, None), "running normally");
        assert_eq!(
            info(ProcessState::Running, Some("timeout expired")),
            "running normally, killed because: timeout expired"
        );
        assert_eq!(info(ProcessState::Exited(0), None), "exited normally");
        assert_eq!(info(ProcessState::Exited(3), None), "exited with status 3");
        assert_eq!(
            info(ProcessState::Signaled(11), None),
            "interrupted by signal 11 - SIGSEGV - Segmentation fault"
        );
    }

    #[test]
    fn test_running_normally() {
        let running = ProcessInfo::new(0.5, 10, 10, ProcessState::Running, None);
        assert!(running.is_running_normally());
        assert_eq!(running.time_usage_micros(), 500_000);
        let killed = ProcessInfo::new(0.5, 10, 10, ProcessState::Running, Some("x".into()));
        assert!(!killed.is_running_normally());
        let exited = ProcessInfo::new(0.5, 10, 0, ProcessState::Exited(0), None);
        assert!(!exited.is_running_normally());
    }
}
