use std::io::Write;

use pretty_assertions::assert_eq;
use tempfile::NamedTempFile;

use turingarena_interface::{CompileError, InterfaceDefinition, IntermediateNode};

const INTERFACE: &str = r#"
// sum of an array, with a progress callback
function sum(int n, int[] a) -> int callbacks {
    callback progress(int done);
};

main {
    read n;
    for i to n {
        read a[i];
    }
    call sum(n, a) -> s;
    write s;
}
"#;

fn interface_file(source: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(source.as_bytes()).unwrap();
    file
}

#[test]
fn test_from_file() {
    let file = interface_file(INTERFACE);
    let interface = InterfaceDefinition::from_file(file.path()).unwrap();
    let sum = interface.method("sum").unwrap();
    assert_eq!(sum.parameters.len(), 2);
    assert_eq!(sum.parameters[1].dimensions, 1);
    assert_eq!(sum.return_dimensions, Some(0));
    assert_eq!(sum.callbacks[0].name, "progress");
    assert!(interface.method("progress").is_none());
}

#[test]
fn test_missing_file() {
    let dir = tempfile::tempdir().unwrap();
    let result = InterfaceDefinition::from_file(dir.path().join("missing.txt"));
    assert!(matches!(result, Err(CompileError::Io { .. })));
}

#[test]
fn test_invalid_file() {
    let file = interface_file("main { read a; write a; read b; write c; }");
    let Err(CompileError::Invalid(diagnostics)) = InterfaceDefinition::from_file(file.path())
    else {
        panic!("expecting the interface to be invalid");
    };
    let messages: Vec<_> = diagnostics
        .diagnostics()
        .iter()
        .map(|d| d.message().to_string())
        .collect();
    assert!(
        messages.contains(&"missing flush between output and input instructions".to_string()),
        "{:?}",
        messages
    );
    assert!(
        messages.contains(&"unresolved reference `c`".to_string()),
        "{:?}",
        messages
    );
}

#[test]
fn test_lowered_program() {
    let file = interface_file(INTERFACE);
    let interface = InterfaceDefinition::from_file(file.path()).unwrap();
    let lowered = interface.lower();
    assert!(matches!(lowered.children.first(), Some(IntermediateNode::Print(_))));
    assert!(matches!(lowered.children.last(), Some(IntermediateNode::Exit)));

    let text = lowered.to_string();
    assert!(text.contains("flush;\nread n;\n"), "{}", text);
    assert!(text.contains("alloc a to n;\n"), "{}", text);
    assert!(text.contains("call sum(n, a) -> s callbacks {\n"), "{}", text);
    assert!(text.contains("print 0 0; // no more callbacks\n"), "{}", text);
    assert!(text.ends_with("print s;\nexit;\n"), "{}", text);
}
