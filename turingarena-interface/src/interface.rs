use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::parser::parse_interface;
use crate::transform::{postprocess, Lowering};
use crate::validate::FlushAnalysis;
use crate::{Block, Diagnostic, Diagnostics, MethodPrototype};

#[derive(Debug, Error)]
pub enum CompileError {
    #[error("Invalid syntax of the interface:\n{0}")]
    Syntax(String),
    #[error("Corrupted parser")]
    CorruptedParser,
    #[error("The interface is not valid:\n{0}")]
    Invalid(Diagnostics),
    #[error("Cannot read interface file {path:?}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// A compiled interface: the prototypes of the methods the program implements and the main block
/// describing the communication with it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterfaceDefinition {
    pub methods: Vec<MethodPrototype>,
    pub main: Block,
}

impl InterfaceDefinition {
    /// Parse the interface, returning it together with all the diagnostics found, without failing
    /// on them. Only syntax errors are fatal.
    pub fn parse(source: &str) -> Result<(InterfaceDefinition, Diagnostics), CompileError> {
        let parsed = parse_interface(source)?;
        let interface = InterfaceDefinition {
            methods: parsed.methods,
            main: parsed.main,
        };
        let mut diagnostics = Diagnostics::new();
        diagnostics.extend(parsed.diagnostics);
        diagnostics.extend(interface.validate());
        Ok((interface, diagnostics))
    }

    /// Parse and validate the interface, failing if any error is found.
    pub fn compile(source: &str) -> Result<InterfaceDefinition, CompileError> {
        let (interface, diagnostics) = InterfaceDefinition::parse(source)?;
        if diagnostics.has_errors() {
            return Err(CompileError::Invalid(diagnostics));
        }
        for warning in diagnostics.diagnostics() {
            warn!("{}", warning.message());
        }
        Ok(interface)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<InterfaceDefinition, CompileError> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|source| CompileError::Io {
            path: path.to_owned(),
            source,
        })?;
        debug!("Compiling interface {}", path.display());
        InterfaceDefinition::compile(&source)
    }

    pub fn method(&self, name: &str) -> Option<&MethodPrototype> {
        self.methods.iter().find(|m| m.name == name)
    }

    /// All the structural problems of the interface. Every problem is reported, the validation
    /// does not stop at the first one.
    pub fn validate(&self) -> Vec<Diagnostic> {
        let mut diagnostics = vec![];
        for method in &self.methods {
            if method.return_dimensions.unwrap_or(0) > 0 {
                diagnostics.push(
                    Diagnostic::error("return type must be scalar")
                        .with_note(format!("in function `{}`", method.name)),
                );
            }
            for callback in &method.callbacks {
                if callback.parameters.iter().any(|p| p.dimensions > 0) {
                    diagnostics.push(
                        Diagnostic::error("callback parameters must be scalars")
                            .with_note(format!("in callback `{}`", callback.name)),
                    );
                }
                if callback.return_dimensions.unwrap_or(0) > 0 {
                    diagnostics.push(
                        Diagnostic::error("return type must be scalar")
                            .with_note(format!("in callback `{}`", callback.name)),
                    );
                }
            }
        }
        diagnostics.extend(self.main.validate());
        diagnostics.extend(FlushAnalysis::analyze(&self.main));
        diagnostics
    }

    /// The main block as executed by the protocol engine: wrapped between the initial checkpoint
    /// and the exit, and lowered to wire-level primitives.
    pub fn lower(&self) -> Block {
        Lowering::lower(&postprocess(&self.main))
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use crate::{IntermediateNode, Marker, Print};

    use super::*;

    fn messages(source: &str) -> Vec<String> {
        let (_, diagnostics) = InterfaceDefinition::parse(source).unwrap();
        diagnostics
            .diagnostics()
            .iter()
            .map(|d| d.message().to_string())
            .collect()
    }

    fn assert_error(source: &str, message: &str) {
        let messages = messages(source);
        assert!(
            messages.iter().any(|m| m == message),
            "{:?} does not contain {:?}",
            messages,
            message
        );
    }

    fn assert_no_error(source: &str) {
        assert_eq!(messages(source), Vec::<String>::new());
    }

    #[test]
    fn test_missing_local_flush() {
        assert_error(
            "main { read a; write a; read b; }",
            "missing flush between output and input instructions",
        );
    }

    #[test]
    fn test_missing_flush_for() {
        assert_error(
            "main { read a; for i to 5 { write a; } read b; }",
            "missing flush between output and input instructions",
        );
    }

    #[test]
    fn test_missing_flush_for_back_edge() {
        assert_error(
            "main { for i to 5 { read a; write a; } }",
            "missing flush between output and input instructions",
        );
    }

    #[test]
    fn test_missing_flush_after_for() {
        assert_error(
            "main { for i to 5 { flush; read a; write a; } read b; }",
            "missing flush between output and input instructions",
        );
    }

    #[test]
    fn test_flush_in_for() {
        assert_no_error("main { read a; for i to 5 { read b; write a; flush; } write a; }");
    }

    #[test]
    fn test_missing_flush_if() {
        assert_error(
            "main { read a; if a { flush; } else { write a; } read b; }",
            "missing flush between output and input instructions",
        );
    }

    #[test]
    fn test_flush_if() {
        assert_no_error(
            "main { read a; if a { flush; } else { write a; flush; } read b; }",
        );
    }

    #[test]
    fn test_missing_flush_init() {
        assert_error(
            "init { checkpoint; } main { read a; }",
            "missing flush between output and input instructions",
        );
    }

    #[test]
    fn test_missing_flush_switch() {
        assert_error(
            "main { read a; switch a { case 1 { write a; } case 2 { flush; } } read b; }",
            "missing flush between output and input instructions",
        );
    }

    #[test]
    fn test_missing_flush_loop_break() {
        assert_error(
            "main { loop { read a; if a { write a; break; } flush; } read b; }",
            "missing flush between output and input instructions",
        );
        assert_no_error("main { loop { read a; if a { write a; flush; break; } } read b; }");
    }

    #[test]
    fn test_break_outside_loop() {
        assert_error("main { break; }", "break outside of a loop");
    }

    #[test]
    fn test_return_type_must_be_scalar() {
        assert_error(
            "function f(int a) -> int[]; main { read a; call f(a) -> b; }",
            "return type must be scalar",
        );
    }

    #[test]
    fn test_callback_parameters_must_be_scalars() {
        assert_error(
            "function f() callbacks { callback cb(int[] x); }; main { call f(); }",
            "callback parameters must be scalars",
        );
    }

    #[test]
    fn test_unresolved_reference() {
        assert_error("main { write x; }", "unresolved reference `x`");
    }

    #[test]
    fn test_unknown_function() {
        assert_error("main { call g(); }", "unknown function `g`");
    }

    #[test]
    fn test_wrong_argument_dimensions() {
        assert_error(
            "function f(int[] a); main { read n; call f(n); }",
            "argument `n` of `f` has the wrong number of dimensions",
        );
    }

    #[test]
    fn test_array_indexed_by_loop() {
        assert_no_error(
            "function f(int n, int[][] m); \
             main { read n; for i to n { for j to n { read m[i][j]; } } call f(n, m); }",
        );
        assert_error(
            "main { read n; for i to n { for j to n { read m[j][i]; } } }",
            "`m` must be indexed by the indices of the enclosing for loops",
        );
    }

    #[test]
    fn test_all_diagnostics_reported() {
        let messages = messages("main { write x; flush; read a; write a; read b; call g(); }");
        assert_eq!(messages.len(), 3, "{:?}", messages);
    }

    #[test]
    fn test_syntax_error() {
        assert!(matches!(
            InterfaceDefinition::parse("main { read a }"),
            Err(CompileError::Syntax(_))
        ));
    }

    #[test]
    fn test_lower_wraps_main() {
        let interface = InterfaceDefinition::compile("main { }").unwrap();
        assert_eq!(
            interface.lower(),
            Block::new(vec![
                IntermediateNode::Print(Print::marker(Marker::Checkpoint)),
                IntermediateNode::Exit,
            ])
        );
    }
}
