use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use nix::sys::signal::{kill, Signal};
use nix::unistd::{sysconf, Pid, SysconfVar};

use crate::proc_stat::{clear_refs, read_stat};
use crate::{MonitorError, ProcessInfo, ProcessState};

/// How many times the state of the process is polled waiting for it to block.
const INTERRUPTIBLE_TRIALS: u32 = 10;
/// How long in total to wait for the process to block before measuring it anyway.
const INTERRUPTIBLE_WAIT: Duration = Duration::from_millis(500);
const DEFAULT_PAGE_SIZE: u64 = 4096;

/// Something able to measure a running process and, if asked, kill it.
///
/// Once the process has terminated every following call returns the same result.
pub trait ProcessMonitor: Send + Sync {
    /// Measure the process. If `kill_reason` is given and the process is still running, the
    /// process is killed and the reason is recorded in the result.
    fn get_status(&self, kill_reason: Option<&str>) -> Result<ProcessInfo, MonitorError>;
}

impl<M: ProcessMonitor + ?Sized> ProcessMonitor for Arc<M> {
    fn get_status(&self, kill_reason: Option<&str>) -> Result<ProcessInfo, MonitorError> {
        self.as_ref().get_status(kill_reason)
    }
}

/// Monitor of a child of this process, based on `/proc` and on `wait4`.
///
/// The process is stopped with `SIGSTOP` during the measurement, so that the resource usage can be
/// collected with `wait4(WUNTRACED)` without reaping it.
#[derive(Debug)]
pub struct LinuxProcessMonitor {
    pid: Pid,
    page_size: u64,
    termination: Mutex<Option<ProcessInfo>>,
}

/// A process stopped with `SIGSTOP` for a measurement. Unless it is resumed, killed or found
/// terminated, dropping this sends `SIGCONT` so that a failed measurement does not leave the
/// process frozen.
struct StoppedProcess<'m> {
    monitor: &'m LinuxProcessMonitor,
    stopped: bool,
}

impl<'m> StoppedProcess<'m> {
    fn stop(monitor: &'m LinuxProcessMonitor) -> Result<Self, MonitorError> {
        monitor.signal(Signal::SIGSTOP)?;
        Ok(StoppedProcess {
            monitor,
            stopped: true,
        })
    }

    fn resume(mut self) -> Result<(), MonitorError> {
        self.stopped = false;
        self.monitor.signal(Signal::SIGCONT)
    }

    fn kill(mut self) -> Result<(), MonitorError> {
        self.monitor.signal(Signal::SIGKILL)?;
        self.stopped = false;
        Ok(())
    }

    /// The process terminated instead of stopping, its pid must not be signaled anymore.
    fn terminated(mut self) {
        self.stopped = false;
    }
}

impl Drop for StoppedProcess<'_> {
    fn drop(&mut self) {
        if self.stopped {
            warn!("Measurement of process {} failed, resuming it", self.monitor.pid);
            if let Err(e) = self.monitor.signal(Signal::SIGCONT) {
                error!("Cannot resume process {}: {:?}", self.monitor.pid, e);
            }
        }
    }
}

/// The result of a `wait4` call.
struct WaitResult {
    status: i32,
    time_usage: f64,
    peak_memory_usage: u64,
}

impl LinuxProcessMonitor {
    /// Monitor the process with the given pid, which must be a child of this process.
    pub fn new(pid: Pid) -> LinuxProcessMonitor {
        let page_size = match sysconf(SysconfVar::PAGE_SIZE) {
            Ok(Some(size)) if size > 0 => size as u64,
            _ => DEFAULT_PAGE_SIZE,
        };
        LinuxProcessMonitor {
            pid,
            page_size,
            termination: Mutex::new(None),
        }
    }

    pub fn pid(&self) -> Pid {
        self.pid
    }

    /// Whether the process has already terminated, without reaping it.
    pub fn has_terminated(&self) -> Result<bool, MonitorError> {
        if self.cached().is_some() {
            return Ok(true);
        }
        let state = read_stat(self.pid)?.state;
        Ok(state == 'Z' || state == 'X')
    }

    fn cached(&self) -> Option<ProcessInfo> {
        match self.termination.lock() {
            Ok(termination) => termination.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Give the process the chance to block on a read or to terminate, so that the measurement
    /// does not interrupt it in the middle of a computation.
    fn wait_for_interruptible(&self) -> Result<(), MonitorError> {
        for _ in 0..INTERRUPTIBLE_TRIALS {
            let state = read_stat(self.pid)?.state;
            if state == 'S' || state == 'Z' {
                return Ok(());
            }
            thread::sleep(INTERRUPTIBLE_WAIT / INTERRUPTIBLE_TRIALS);
        }
        debug!("Process {} did not block, measuring it anyway", self.pid);
        Ok(())
    }

    fn signal(&self, signal: Signal) -> Result<(), MonitorError> {
        trace!("Sending {} to process {}", signal.as_str(), self.pid);
        kill(self.pid, signal).map_err(|source| MonitorError::Signal {
            pid: self.pid.as_raw(),
            signal,
            source,
        })
    }

    fn wait(&self, options: i32) -> Result<WaitResult, MonitorError> {
        let mut status = 0;
        // SAFETY: rusage is plain old data
        let mut usage: libc::rusage = unsafe { std::mem::zeroed() };
        loop {
            let res = unsafe { libc::wait4(self.pid.as_raw(), &mut status, options, &mut usage) };
            if res >= 0 {
                break;
            }
            let error = std::io::Error::last_os_error();
            if error.kind() != std::io::ErrorKind::Interrupted {
                return Err(MonitorError::Wait {
                    pid: self.pid.as_raw(),
                    source: error,
                });
            }
        }
        let time_usage =
            usage.ru_utime.tv_sec as f64 + usage.ru_utime.tv_usec as f64 / 1_000_000.0;
        Ok(WaitResult {
            status,
            time_usage,
            peak_memory_usage: usage.ru_maxrss as u64 * 1024,
        })
    }

    fn current_memory_usage(&self) -> Result<u64, MonitorError> {
        Ok(read_stat(self.pid)?.rss_pages * self.page_size)
    }

    fn measure(&self, kill_reason: Option<&str>) -> Result<ProcessInfo, MonitorError> {
        self.wait_for_interruptible()?;
        let stopped = StoppedProcess::stop(self)?;
        let result = self.wait(libc::WUNTRACED)?;
        let status = result.status;
        let state = if libc::WIFSTOPPED(status) {
            ProcessState::Running
        } else if libc::WIFEXITED(status) {
            ProcessState::Exited(libc::WEXITSTATUS(status))
        } else if libc::WIFSIGNALED(status) {
            ProcessState::Signaled(libc::WTERMSIG(status))
        } else {
            unreachable!("wait4 returned an unknown status {}", status);
        };

        if state != ProcessState::Running {
            stopped.terminated();
            let info = ProcessInfo::new(
                result.time_usage,
                result.peak_memory_usage,
                0,
                state,
                None,
            );
            debug!("Process {} terminated: {}", self.pid, info.message);
            return Ok(info);
        }

        // the peak is reset so that the next measurement reports the peak since this one
        let current_memory_usage = self.current_memory_usage()?;
        clear_refs(self.pid)?;
        match kill_reason {
            Some(reason) => {
                warn!("Killing process {}: {}", self.pid, reason);
                stopped.kill()?;
                self.wait(0)?;
            }
            None => stopped.resume()?,
        }
        Ok(ProcessInfo::new(
            result.time_usage,
            result.peak_memory_usage,
            current_memory_usage,
            state,
            kill_reason.map(String::from),
        ))
    }
}

impl ProcessMonitor for LinuxProcessMonitor {
    fn get_status(&self, kill_reason: Option<&str>) -> Result<ProcessInfo, MonitorError> {
        let mut termination = match self.termination.lock() {
            Ok(termination) => termination,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(info) = termination.as_ref() {
            return Ok(info.clone());
        }
        let info = self.measure(kill_reason)?;
        if !info.is_running_normally() {
            *termination = Some(info.clone());
        }
        Ok(info)
    }
}

/// A monitor of a process that runs forever and uses no resources, recording only the kills.
#[derive(Debug, Default)]
pub struct FakeProcessMonitor {
    termination: Mutex<Option<ProcessInfo>>,
}

impl ProcessMonitor for FakeProcessMonitor {
    fn get_status(&self, kill_reason: Option<&str>) -> Result<ProcessInfo, MonitorError> {
        let mut termination = match self.termination.lock() {
            Ok(termination) => termination,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(info) = termination.as_ref() {
            return Ok(info.clone());
        }
        let info = ProcessInfo::new(
            0.0,
            0,
            0,
            ProcessState::Running,
            kill_reason.map(String::from),
        );
        if kill_reason.is_some() {
            *termination = Some(info.clone());
        }
        Ok(info)
    }
}

#[cfg(test)]
mod tests {
    use std::process::Command;

    use pretty_assertions::assert_eq;

    use super::*;

    fn wait_for_state(pid: Pid, expected: impl Fn(char) -> bool) -> char {
        let mut state = read_stat(pid).unwrap().state;
        for _ in 0..100 {
            if expected(state) {
                break;
            }
            thread::sleep(Duration::from_millis(10));
            state = read_stat(pid).unwrap().state;
        }
        state
    }

    #[test]
    fn test_failed_measurement_resumes_process() {
        let sleep = which::which("sleep").unwrap();
        let child = Command::new(sleep).arg("10").spawn().unwrap();
        let pid = Pid::from_raw(child.id() as i32);
        let monitor = LinuxProcessMonitor::new(pid);

        let measurement = || -> Result<u64, MonitorError> {
            let _stopped = StoppedProcess::stop(&monitor)?;
            monitor.wait(libc::WUNTRACED)?;
            assert_eq!(wait_for_state(pid, |s| s == 'T'), 'T');
            // a process that does not exist cannot be inspected
            Ok(read_stat(Pid::from_raw(i32::MAX))?.rss_pages)
        };
        assert!(matches!(
            measurement(),
            Err(MonitorError::ProcessDisappeared { .. })
        ));
        assert_ne!(wait_for_state(pid, |s| s != 'T'), 'T');

        // the monitor reaps the killed child
        let info = monitor.get_status(Some("test over")).unwrap();
        assert_eq!(info.message, "running normally, killed because: test over");
    }

    #[test]
    fn test_fake_monitor_kill_is_sticky() {
        let monitor = Arc::new(FakeProcessMonitor::default());
        assert!(monitor.get_status(None).unwrap().is_running_normally());
        let killed = monitor.get_status(Some("timeout expired")).unwrap();
        assert_eq!(killed.message, "running normally, killed because: timeout expired");
        assert_eq!(monitor.get_status(None).unwrap(), killed);
        assert_eq!(monitor.get_status(Some("other")).unwrap(), killed);
    }
}
