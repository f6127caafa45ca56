//! Interface definition language of the interactive tasks.
//!
//! An interface is parsed into a tree of [`IntermediateNode`]s, validated statically and then
//! lowered to the primitives actually exchanged with the sandboxed program (lines of integers,
//! flushes and markers), ready to be executed by the protocol engine.

#[macro_use]
extern crate log;
#[macro_use]
extern crate pest_derive;

mod analysis;
mod diagnostics;
mod expr;
mod interface;
mod nodes;
mod parser;
pub mod transform;
mod validate;
mod variables;

pub use diagnostics::{Diagnostic, DiagnosticLevel, Diagnostics, SourcePosition};
pub use expr::{Expression, Scope, VariableReference};
pub use interface::{CompileError, InterfaceDefinition};
pub use nodes::*;
pub use variables::*;
