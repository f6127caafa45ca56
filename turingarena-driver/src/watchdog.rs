use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{bounded, RecvTimeoutError, Sender};

use turingarena_sandbox::ProcessMonitor;

/// The reason recorded when the program takes too long to produce its output.
pub const TIMEOUT_KILL_REASON: &str = "timeout expired";

/// Guard of a blocking read from the program. If the guard is still alive after the timeout, the
/// monitor is asked to kill the process. Dropping the guard cancels the watchdog.
pub struct Watchdog {
    cancel: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl Watchdog {
    pub fn start(monitor: Arc<dyn ProcessMonitor>, timeout: Duration) -> Watchdog {
        let (cancel, cancelled) = bounded::<()>(1);
        let handle = std::thread::Builder::new()
            .name("Upward watchdog".into())
            .spawn(move || {
                if let Err(RecvTimeoutError::Timeout) = cancelled.recv_timeout(timeout) {
                    info!("Process communication timeout expired");
                    if let Err(e) = monitor.get_status(Some(TIMEOUT_KILL_REASON)) {
                        warn!("Cannot kill the process after the timeout: {:?}", e);
                    }
                }
            });
        let handle = match handle {
            Ok(handle) => Some(handle),
            Err(e) => {
                warn!("Cannot start the watchdog thread: {:?}", e);
                None
            }
        };
        Watchdog {
            cancel: Some(cancel),
            handle,
        }
    }
}

impl Drop for Watchdog {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            // the receiver is gone if the timeout already expired
            let _ = cancel.send(());
        }
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("The watchdog thread panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use turingarena_sandbox::FakeProcessMonitor;

    use super::*;

    #[test]
    fn test_cancelled_watchdog_does_not_kill() {
        let monitor = Arc::new(FakeProcessMonitor::default());
        let watchdog = Watchdog::start(monitor.clone(), Duration::from_secs(10));
        drop(watchdog);
        assert!(monitor.get_status(None).unwrap().is_running_normally());
    }

    #[test]
    fn test_expired_watchdog_kills() {
        let monitor = Arc::new(FakeProcessMonitor::default());
        let watchdog = Watchdog::start(monitor.clone(), Duration::from_millis(10));
        std::thread::sleep(Duration::from_millis(200));
        drop(watchdog);
        let info = monitor.get_status(None).unwrap();
        assert_eq!(info.kill_reason.as_deref(), Some(TIMEOUT_KILL_REASON));
    }
}
