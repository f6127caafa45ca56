use std::io::Write;
use std::process::{Command, Output, Stdio};

use pretty_assertions::assert_eq;
use tempfile::NamedTempFile;

fn interface_file(source: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(source.as_bytes()).unwrap();
    file
}

fn turingarena(args: &[&str], stdin: &str) -> Output {
    let mut child = Command::new(env!("CARGO_BIN_EXE_turingarena"))
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .unwrap();
    child
        .stdin
        .take()
        .unwrap()
        .write_all(stdin.as_bytes())
        .unwrap();
    child.wait_with_output().unwrap()
}

#[test]
fn test_validate_valid() {
    let file = interface_file("function f(int a); main { read a; call f(a); }");
    let output = turingarena(&["validate", file.path().to_str().unwrap()], "");
    assert!(output.status.success());
}

#[test]
fn test_validate_invalid_json() {
    let file = interface_file("main { read a; write a; read b; }");
    let output = turingarena(&["validate", "--json", file.path().to_str().unwrap()], "");
    assert!(!output.status.success());
    let json: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(
        json["diagnostics"][0]["message"],
        "missing flush between output and input instructions"
    );
}

#[test]
fn test_lower() {
    let file = interface_file("main { checkpoint; }");
    let output = turingarena(&["lower", file.path().to_str().unwrap()], "");
    assert!(output.status.success());
    assert_eq!(
        String::from_utf8(output.stdout).unwrap(),
        "print 0; // checkpoint\nprint 0; // checkpoint\nexit;\n"
    );
}

#[test]
fn test_run() {
    let file = interface_file(
        "function f(int a) -> int; main { read a; call f(a) -> b; write b; }",
    );
    let sh = which::which("sh").unwrap();
    let output = turingarena(
        &[
            "run",
            "--json",
            file.path().to_str().unwrap(),
            "--",
            sh.to_str().unwrap(),
            "-c",
            "echo 0; read a; echo $((a + 1))",
        ],
        "checkpoint\ncall\nf\n0\n41\nexit\n",
    );
    assert!(output.status.success());
    let responses: Vec<i64> = String::from_utf8(output.stdout)
        .unwrap()
        .lines()
        .map(|l| l.parse().unwrap())
        .collect();
    // resource report, READY, then the return value of the call
    assert_eq!(responses.len(), 5 + 5 + 2 + 5);
    assert_eq!(responses[0], 3);
    assert_eq!(responses[4], 0);
    assert_eq!(responses[9], 0);
    assert_eq!(&responses[10..12], &[0, 42]);
    assert_eq!(responses[16], 0);

    let summary: serde_json::Value = serde_json::from_slice(&output.stderr).unwrap();
    assert_eq!(summary["outcome"], "completed");
    assert_eq!(summary["process"]["message"], "exited normally");
}

#[test]
fn test_run_failing_program() {
    let file = interface_file("main { checkpoint; }");
    let sh = which::which("sh").unwrap();
    let output = turingarena(
        &[
            "run",
            "--json",
            file.path().to_str().unwrap(),
            "--",
            sh.to_str().unwrap(),
            "-c",
            "echo 0; exit 2",
        ],
        "checkpoint\ncheckpoint\n",
    );
    assert!(!output.status.success());
    let stdout = String::from_utf8(output.stdout).unwrap();
    assert!(stdout.ends_with("2\n"), "{}", stdout);
    let stderr = String::from_utf8(output.stderr).unwrap();
    let summary: serde_json::Value =
        serde_json::from_str(stderr.lines().next().unwrap()).unwrap();
    assert_eq!(summary["outcome"], "algorithm_error");
    assert_eq!(summary["message"], "exited with status 2");
}
