use std::io::{BufRead, Write};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use turingarena_interface::{InterfaceDefinition, MethodPrototype};

use crate::{Decoded, DriverState, Value, ValueDecoder};

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Cannot talk to the engine")]
    Io(#[from] std::io::Error),
    #[error("Unexpected response from the engine: {0}")]
    Protocol(String),
    #[error("Unknown method `{0}`")]
    UnknownMethod(String),
    /// The engine reported ERROR: the run is over.
    #[error("The engine reported an error")]
    EngineFailed,
}

/// The resources used by the program, as reported by the engine before READY.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ResourceUsage {
    pub time_usage_micros: i64,
    pub peak_memory_usage: i64,
    pub current_memory_usage: i64,
}

/// The outcome of a call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallResult {
    pub usage: ResourceUsage,
    pub return_value: Option<Value>,
}

/// Handler of the callbacks invoked by the program during a call: receives the index of the
/// callback and its arguments, returns its return value.
pub type CallbackHandler<'h> = dyn FnMut(usize, &[i64]) -> Option<i64> + 'h;

/// The driver side of the request protocol, used by the evaluators to talk with the engine.
pub struct DriverClient<'i, R, W> {
    interface: &'i InterfaceDefinition,
    responses: R,
    requests: W,
}

impl<'i, R: BufRead, W: Write> DriverClient<'i, R, W> {
    pub fn new(interface: &'i InterfaceDefinition, responses: R, requests: W) -> Self {
        DriverClient {
            interface,
            responses,
            requests,
        }
    }

    pub fn checkpoint(&mut self) -> Result<ResourceUsage, ClientError> {
        self.send_line("checkpoint")?;
        self.wait_ready(None, &mut |_, _| None)
    }

    /// Call a method of the program, serving the callbacks it invokes with `on_callback`.
    pub fn call(
        &mut self,
        name: &str,
        arguments: &[Value],
        on_callback: &mut CallbackHandler,
    ) -> Result<CallResult, ClientError> {
        let interface = self.interface;
        let method = interface
            .method(name)
            .ok_or_else(|| ClientError::UnknownMethod(name.to_string()))?;
        self.send_line("call")?;
        self.send_line(name)?;
        for argument in arguments {
            self.send_value(argument)?;
        }
        let usage = self.wait_ready(Some(method), on_callback)?;
        let return_value = match method.has_return_value() {
            true => Some(self.receive_value()?),
            false => None,
        };
        Ok(CallResult {
            usage,
            return_value,
        })
    }

    pub fn exit(&mut self) -> Result<ResourceUsage, ClientError> {
        self.send_line("exit")?;
        self.wait_ready(None, &mut |_, _| None)
    }

    /// Ask the engine to stop the run.
    pub fn stop(&mut self) -> Result<(), ClientError> {
        self.send_line("stop")
    }

    fn send_line<D: std::fmt::Display>(&mut self, line: D) -> Result<(), ClientError> {
        writeln!(self.requests, "{}", line)?;
        Ok(())
    }

    fn send_value(&mut self, value: &Value) -> Result<(), ClientError> {
        for line in value.serialize() {
            self.send_line(line)?;
        }
        Ok(())
    }

    fn receive_int(&mut self) -> Result<i64, ClientError> {
        self.requests.flush()?;
        let mut line = String::new();
        if self.responses.read_line(&mut line)? == 0 {
            return Err(ClientError::Protocol("the engine closed the connection".into()));
        }
        let line = line.trim();
        line.parse()
            .map_err(|_| ClientError::Protocol(format!("invalid line '{}'", line)))
    }

    fn receive_value(&mut self) -> Result<Value, ClientError> {
        let mut decoder = ValueDecoder::new();
        loop {
            let line = self.receive_int()?;
            match decoder.feed(line) {
                Ok(Decoded::Done(value)) => return Ok(value),
                Ok(Decoded::NeedMore) => {}
                Err(e) => return Err(ClientError::Protocol(e.to_string())),
            }
        }
    }

    /// Read the responses until READY, serving the callbacks of `method`.
    fn wait_ready(
        &mut self,
        method: Option<&MethodPrototype>,
        on_callback: &mut CallbackHandler,
    ) -> Result<ResourceUsage, ClientError> {
        let mut usage = None;
        loop {
            let code = self.receive_int()?;
            match DriverState::from_code(code) {
                Some(DriverState::Ready) => {
                    return usage.ok_or_else(|| {
                        ClientError::Protocol("READY without the resource usage".into())
                    })
                }
                Some(DriverState::ResourceUsage) => {
                    usage = Some(ResourceUsage {
                        time_usage_micros: self.receive_int()?,
                        peak_memory_usage: self.receive_int()?,
                        current_memory_usage: self.receive_int()?,
                    });
                }
                Some(DriverState::Callback) => {
                    let index = self.receive_int()?;
                    let prototype = usize::try_from(index)
                        .ok()
                        .and_then(|i| method.and_then(|m| m.callbacks.get(i)))
                        .ok_or_else(|| {
                            ClientError::Protocol(format!("unexpected callback {}", index))
                        })?;
                    let mut arguments = Vec::with_capacity(prototype.parameters.len());
                    for parameter in &prototype.parameters {
                        let value = self.receive_value()?;
                        let value = value.as_scalar().ok_or_else(|| {
                            ClientError::Protocol(format!(
                                "parameter `{}` of callback `{}` is not a scalar",
                                parameter.name, prototype.name
                            ))
                        })?;
                        arguments.push(value);
                    }
                    let returned = on_callback(index as usize, &arguments);
                    self.send_line("return")?;
                    if prototype.has_return_value() {
                        let value = returned.ok_or_else(|| {
                            ClientError::Protocol(format!(
                                "callback `{}` must return a value",
                                prototype.name
                            ))
                        })?;
                        self.send_value(&Value::Scalar(value))?;
                    }
                }
                Some(DriverState::Error) => return Err(ClientError::EngineFailed),
                None => return Err(ClientError::Protocol(format!("unknown state {}", code))),
            }
        }
    }
}
