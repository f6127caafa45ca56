use std::io::{Cursor, Write};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use pretty_assertions::assert_eq;

use turingarena_driver::{drive, DriverConnection, Engine, EngineError, SandboxConnection};
use turingarena_interface::transform::{postprocess, Lowering};
use turingarena_interface::{
    Block, Call, Callback, CallbackPrototype, InterfaceDefinition, IntermediateNode,
    MethodPrototype, Read, VariableReference,
};
use turingarena_sandbox::FakeProcessMonitor;

/// A writer whose content can be inspected after being moved into a connection.
#[derive(Clone, Default)]
struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl SharedBuffer {
    fn text(&self) -> String {
        String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
    }
}

/// The outcome of a scripted run: what was sent to the driver and to the program.
struct Transcript {
    result: Result<(), EngineError>,
    to_driver: String,
    to_program: String,
}

/// Run the interface with scripted requests of the driver and scripted output of the program.
fn run(interface: &str, requests: &str, program_output: &str) -> Transcript {
    let interface = InterfaceDefinition::compile(interface).unwrap();
    run_program(&interface.lower(), requests, program_output)
}

/// Run an already lowered program.
fn run_program(program: &Block, requests: &str, program_output: &str) -> Transcript {
    let _ = env_logger::builder().is_test(true).try_init();
    let to_driver = SharedBuffer::default();
    let to_program = SharedBuffer::default();
    let driver = DriverConnection::new(
        Box::new(Cursor::new(requests.to_string())),
        Box::new(to_driver.clone()),
    );
    let sandbox = SandboxConnection::new(
        Box::new(to_program.clone()),
        Box::new(Cursor::new(program_output.to_string())),
        Arc::new(FakeProcessMonitor::default()),
        Duration::from_secs(1),
    );
    let mut engine = Engine::new(program, driver, sandbox);
    let result = drive(&mut engine);
    drop(engine);
    Transcript {
        result,
        to_driver: to_driver.text(),
        to_program: to_program.text(),
    }
}

const READY: &str = "3\n0\n0\n0\n0\n";

#[test]
fn test_checkpoints() {
    let transcript = run(
        "main { checkpoint; }",
        "checkpoint\ncheckpoint\nexit\n",
        "0\n0\n",
    );
    transcript.result.unwrap();
    assert_eq!(transcript.to_driver, READY.repeat(3));
    assert_eq!(transcript.to_program, "");
}

#[test]
fn test_call_with_return_value() {
    let transcript = run(
        "function f(int a) -> int; main { read a; call f(a) -> b; write b; }",
        "checkpoint\ncall\nf\n0\n21\nexit\n",
        "0\n42\n",
    );
    transcript.result.unwrap();
    assert_eq!(
        transcript.to_driver,
        format!("{READY}{READY}0\n42\n{READY}")
    );
    assert_eq!(transcript.to_program, "21\n");
}

#[test]
fn test_callbacks() {
    let transcript = run(
        "function f() callbacks { \
             callback a(); \
             callback b(int x) -> int; \
             callback c(int y, int z); \
         }; \
         main { call f(); }",
        "checkpoint\ncall\nf\nreturn\nreturn\nreturn\n0\n10\nexit\n",
        "0\n1 0\n1 2\n3 4\n1 1\n5\n0 0\n",
    );
    transcript.result.unwrap();
    let expected = [
        READY,
        "1\n0\n",
        "1\n2\n0\n3\n0\n4\n",
        "1\n1\n0\n5\n",
        READY,
        READY,
    ]
    .concat();
    assert_eq!(transcript.to_driver, expected);
    assert_eq!(transcript.to_program, "10\n");
}

#[test]
fn test_array_read_in_loop() {
    let transcript = run(
        "function f(int n, int[] A); main { read n; for i to n { read A[i]; } call f(n, A); }",
        "checkpoint\ncall\nf\n0\n3\n1\n3\n0\n1\n0\n2\n0\n3\nexit\n",
        "0\n",
    );
    transcript.result.unwrap();
    assert_eq!(transcript.to_driver, READY.repeat(3));
    assert_eq!(transcript.to_program, "3\n1\n2\n3\n");
}

#[test]
fn test_request_mismatch() {
    let transcript = run("main { checkpoint; }", "checkpoint\nexit\n", "0\n0\n");
    let error = transcript.result.unwrap_err();
    assert_eq!(
        error.to_string(),
        "Interface error: expecting 'checkpoint', got 'exit'"
    );
    assert_eq!(transcript.to_driver, format!("{READY}2\n"));
}

#[test]
fn test_call_wrong_method() {
    let transcript = run(
        "function f(); function g(); main { call f(); }",
        "checkpoint\ncall\ng\n",
        "0\n",
    );
    let error = transcript.result.unwrap_err();
    assert_eq!(
        error.to_string(),
        "Interface error: expecting 'call f', got 'call g'"
    );
}

#[test]
fn test_stop() {
    let transcript = run("main { checkpoint; }", "stop\n", "0\n");
    assert!(matches!(transcript.result, Err(EngineError::DriverStop)));
    assert_eq!(transcript.to_driver, "");
}

#[test]
fn test_end_of_requests_stops() {
    let transcript = run("main { checkpoint; }", "checkpoint\n", "0\n0\n");
    assert!(matches!(transcript.result, Err(EngineError::DriverStop)));
    assert_eq!(transcript.to_driver, READY);
}

#[test]
fn test_program_sends_garbage() {
    let transcript = run("main { checkpoint; }", "checkpoint\n", "hello\n");
    let error = transcript.result.unwrap_err();
    assert_eq!(
        error.to_string(),
        "Communication error: process sent invalid data"
    );
    assert_eq!(transcript.to_driver, "2\n");
}

#[test]
fn test_program_stops_sending() {
    let transcript = run(
        "function f(int a) -> int; main { read a; call f(a) -> b; write b; }",
        "checkpoint\ncall\nf\n0\n1\n",
        "0\n",
    );
    let error = transcript.result.unwrap_err();
    assert_eq!(error.to_string(), "Communication error: stopped sending data");
    assert_eq!(transcript.to_driver, format!("{READY}2\n"));
}

#[test]
fn test_wrong_argument_dimensions() {
    let transcript = run(
        "function f(int a); main { read a; call f(a); }",
        "checkpoint\ncall\nf\n1\n1\n0\n5\n",
        "0\n",
    );
    let error = transcript.result.unwrap_err();
    assert_eq!(
        error.to_string(),
        "Interface error: argument `a` of `f` must have 0 dimension(s)"
    );
}

#[test]
fn test_checkpoint_mismatch() {
    let transcript = run("main { }", "checkpoint\n", "1\n");
    let error = transcript.result.unwrap_err();
    assert_eq!(
        error.to_string(),
        "Communication error: expecting checkpoint, got [1]"
    );
}

#[test]
fn test_loop_with_break() {
    let transcript = run(
        "function more() -> int; \
         main { loop { call more() -> m; write m; flush; if m { checkpoint; } else { break; } } }",
        "checkpoint\ncall\nmore\ncheckpoint\ncall\nmore\nexit\n",
        "0\n1\n0\n0\n",
    );
    transcript.result.unwrap();
    assert_eq!(
        transcript.to_driver,
        format!("{READY}{READY}0\n1\n{READY}{READY}0\n0\n{READY}")
    );
}

#[test]
fn test_huge_array_size_from_program() {
    let transcript = run(
        "function f() -> int; main { call f() -> n; write n; flush; for i to n { read A[i]; } }",
        "checkpoint\ncall\nf\nexit\n",
        "0\n1000000000000000000\n",
    );
    let error = transcript.result.unwrap_err();
    assert!(matches!(error, EngineError::Communication(_)), "{:?}", error);
    assert_eq!(
        transcript.to_driver,
        format!("{READY}{READY}0\n1000000000000000000\n2\n")
    );
}

#[test]
fn test_huge_array_size_from_driver() {
    let transcript = run(
        "function f(int n, int[] A); main { read n; for i to n { read A[i]; } call f(n, A); }",
        "checkpoint\ncall\nf\n0\n1000000000000000000\n1\n0\nexit\n",
        "0\n",
    );
    let error = transcript.result.unwrap_err();
    assert!(matches!(error, EngineError::Interface(_)), "{:?}", error);
    assert!(transcript.to_driver.ends_with("2\n"));
}

#[test]
fn test_callback_reading_without_return_value() {
    let prototype = CallbackPrototype {
        name: "cb".into(),
        parameters: vec![],
        return_dimensions: None,
    };
    let method = MethodPrototype {
        name: "f".into(),
        parameters: vec![],
        return_dimensions: None,
        callbacks: vec![prototype.clone()],
    };
    let main = Block::new(vec![IntermediateNode::Call(Call {
        method,
        arguments: vec![],
        return_value: None,
        callbacks: vec![Callback {
            index: 0,
            prototype,
            body: Block::new(vec![IntermediateNode::Read(Read {
                arguments: vec![VariableReference::scalar("x")],
            })]),
        }],
    })]);
    let program = Lowering::lower(&postprocess(&main));
    let transcript = run_program(&program, "checkpoint\ncall\nf\nreturn\n", "0\n1 0\n");
    let error = transcript.result.unwrap_err();
    assert_eq!(
        error.to_string(),
        "Interface error: callback `cb` reads a value but returns none"
    );
    assert_eq!(transcript.to_driver, format!("{READY}1\n0\n2\n"));
}
