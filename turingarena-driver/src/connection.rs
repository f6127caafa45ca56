use std::io::{BufRead, ErrorKind, Write};
use std::sync::Arc;
use std::time::Duration;

use itertools::Itertools;

use turingarena_sandbox::{ProcessInfo, ProcessMonitor};

use crate::watchdog::Watchdog;
use crate::{Decoded, DriverState, EngineError, RequestSignature, Value, ValueDecoder};

/// The channel with the driver: requests come down as lines, responses go up as integer lines.
pub struct DriverConnection {
    downward: Box<dyn BufRead + Send>,
    upward: Box<dyn Write + Send>,
}

impl DriverConnection {
    pub fn new(downward: Box<dyn BufRead + Send>, upward: Box<dyn Write + Send>) -> Self {
        DriverConnection { downward, upward }
    }

    pub fn send(&mut self, item: i64) -> Result<(), EngineError> {
        trace!("Sending to the driver: {}", item);
        writeln!(self.upward, "{}", item).map_err(EngineError::DriverChannel)
    }

    pub fn send_state(&mut self, state: DriverState) -> Result<(), EngineError> {
        self.send(state.code())
    }

    pub fn send_value(&mut self, value: &Value) -> Result<(), EngineError> {
        for line in value.serialize() {
            self.send(line)?;
        }
        Ok(())
    }

    /// Report the resource usage of the process, followed by READY.
    pub fn report_ready(&mut self, info: &ProcessInfo) -> Result<(), EngineError> {
        self.send_state(DriverState::ResourceUsage)?;
        self.send(info.time_usage_micros())?;
        self.send(info.peak_memory_usage as i64)?;
        self.send(info.current_memory_usage as i64)?;
        self.send_state(DriverState::Ready)
    }

    pub fn flush(&mut self) -> Result<(), EngineError> {
        self.upward.flush().map_err(EngineError::DriverChannel)
    }

    /// Receive the next line from the driver, without the line terminator. `None` at the end of
    /// the stream. The pending responses are flushed first.
    pub fn receive_line(&mut self) -> Result<Option<String>, EngineError> {
        self.flush()?;
        let mut line = String::new();
        let read = self
            .downward
            .read_line(&mut line)
            .map_err(EngineError::DriverChannel)?;
        if read == 0 {
            return Ok(None);
        }
        let line = line.trim().to_string();
        trace!("Received from the driver: {:?}", line);
        Ok(Some(line))
    }

    /// Read the next request. A `stop` command, or the end of the stream, stop the run.
    pub fn next_request(&mut self) -> Result<RequestSignature, EngineError> {
        let command = self.receive_line()?.ok_or(EngineError::DriverStop)?;
        match command.as_str() {
            "stop" => Err(EngineError::DriverStop),
            "call" => {
                let method = self.receive_line()?.ok_or(EngineError::DriverStop)?;
                Ok(RequestSignature::Call(method))
            }
            _ => Ok(RequestSignature::Command(command)),
        }
    }

    /// Read a serialized value sent by the driver.
    pub fn receive_value(&mut self) -> Result<Value, EngineError> {
        let mut decoder = ValueDecoder::new();
        loop {
            let line = self
                .receive_line()?
                .ok_or_else(|| EngineError::interface("too few lines"))?;
            let line = line
                .parse()
                .map_err(|_| EngineError::interface(format!("invalid data line '{}'", line)))?;
            match decoder.feed(line) {
                Ok(Decoded::Done(value)) => return Ok(value),
                Ok(Decoded::NeedMore) => {}
                Err(e) => return Err(EngineError::interface(e.to_string())),
            }
        }
    }
}

/// The pipes connected to the program, with the watchdog that guards the reads.
pub struct SandboxConnection {
    downward: Box<dyn Write + Send>,
    upward: Box<dyn BufRead + Send>,
    monitor: Arc<dyn ProcessMonitor>,
    timeout: Duration,
}

fn downward_error(e: std::io::Error) -> EngineError {
    if e.kind() == ErrorKind::BrokenPipe {
        EngineError::communication("downward pipe broken")
    } else {
        EngineError::communication(format!("cannot write to the process: {}", e))
    }
}

impl SandboxConnection {
    pub fn new(
        downward: Box<dyn Write + Send>,
        upward: Box<dyn BufRead + Send>,
        monitor: Arc<dyn ProcessMonitor>,
        timeout: Duration,
    ) -> Self {
        SandboxConnection {
            downward,
            upward,
            monitor,
            timeout,
        }
    }

    pub fn monitor(&self) -> &Arc<dyn ProcessMonitor> {
        &self.monitor
    }

    /// Send a line of space-separated values to the program.
    pub fn send_downward(&mut self, values: &[i64]) -> Result<(), EngineError> {
        debug!("Sending downward: {:?}", values);
        writeln!(self.downward, "{}", values.iter().join(" ")).map_err(downward_error)
    }

    pub fn flush_downward(&mut self) -> Result<(), EngineError> {
        self.downward.flush().map_err(downward_error)
    }

    /// Receive a line of space-separated integers from the program.
    pub fn receive_upward(&mut self) -> Result<Vec<i64>, EngineError> {
        self.flush_downward()?;
        let mut line = String::new();
        let read = {
            let _watchdog = Watchdog::start(self.monitor.clone(), self.timeout);
            trace!("Receiving upward from the process...");
            self.upward.read_line(&mut line)
        };
        // a failed read is the same as a closed pipe
        if let Err(e) = read {
            debug!("Read from the process failed: {:?}", e);
            line.clear();
        }
        let line = line.trim();
        debug!("Received upward: {:?}", line);
        if line.is_empty() {
            return Err(EngineError::communication("stopped sending data"));
        }
        line.split_whitespace()
            .map(|token| token.parse())
            .collect::<Result<Vec<i64>, _>>()
            .map_err(|_| EngineError::communication("process sent invalid data"))
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use pretty_assertions::assert_eq;

    use turingarena_sandbox::FakeProcessMonitor;

    use super::*;

    fn driver(input: &str) -> DriverConnection {
        DriverConnection::new(
            Box::new(Cursor::new(input.to_string().into_bytes())),
            Box::new(std::io::sink()),
        )
    }

    fn sandbox(upward: &str) -> SandboxConnection {
        SandboxConnection::new(
            Box::new(std::io::sink()),
            Box::new(Cursor::new(upward.to_string().into_bytes())),
            Arc::new(FakeProcessMonitor::default()),
            Duration::from_secs(3),
        )
    }

    #[test]
    fn test_next_request() {
        let mut driver = driver("checkpoint\ncall\nf\n0\n5\nstop\n");
        assert_eq!(
            driver.next_request().unwrap(),
            RequestSignature::Command("checkpoint".into())
        );
        assert_eq!(
            driver.next_request().unwrap(),
            RequestSignature::Call("f".into())
        );
        assert_eq!(driver.receive_value().unwrap(), Value::Scalar(5));
        assert!(matches!(driver.next_request(), Err(EngineError::DriverStop)));
        assert!(matches!(driver.next_request(), Err(EngineError::DriverStop)));
    }

    #[test]
    fn test_receive_value_too_few_lines() {
        let mut driver = driver("1\n2\n0\n1\n");
        match driver.receive_value() {
            Err(EngineError::Interface(message)) => assert_eq!(message, "too few lines"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_receive_upward() {
        let mut sandbox = sandbox("1 2 -3\n\nx\n");
        assert_eq!(sandbox.receive_upward().unwrap(), vec![1, 2, -3]);
        match sandbox.receive_upward() {
            Err(EngineError::Communication(message)) => assert_eq!(message, "stopped sending data"),
            other => panic!("unexpected {:?}", other),
        }
        match sandbox.receive_upward() {
            Err(EngineError::Communication(message)) => {
                assert_eq!(message, "process sent invalid data")
            }
            other => panic!("unexpected {:?}", other),
        }
        match sandbox.receive_upward() {
            Err(EngineError::Communication(message)) => assert_eq!(message, "stopped sending data"),
            other => panic!("unexpected {:?}", other),
        }
    }
}
