use std::fmt::{Display, Formatter};

use itertools::Itertools;
use serde::{Deserialize, Serialize};

use crate::{Expression, ReferenceAllocation, Variable, VariableDeclaration, VariableReference};

/// A parameter of a method or of a callback.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Parameter {
    pub name: String,
    pub dimensions: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallbackPrototype {
    pub name: String,
    pub parameters: Vec<Parameter>,
    /// Number of dimensions of the returned value, `None` if nothing is returned.
    pub return_dimensions: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethodPrototype {
    pub name: String,
    pub parameters: Vec<Parameter>,
    /// Number of dimensions of the returned value, `None` if nothing is returned.
    pub return_dimensions: Option<usize>,
    pub callbacks: Vec<CallbackPrototype>,
}

impl CallbackPrototype {
    pub fn has_return_value(&self) -> bool {
        self.return_dimensions.is_some()
    }
}

impl MethodPrototype {
    pub fn has_return_value(&self) -> bool {
        self.return_dimensions.is_some()
    }

    pub fn has_callbacks(&self) -> bool {
        !self.callbacks.is_empty()
    }
}

/// What a lowered `Print` stands for, when it was produced by the lowering of a high-level
/// construct instead of a `write`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Marker {
    /// `0`: the program reached a checkpoint.
    Checkpoint,
    /// `1 index`: the callback with the given index is being invoked.
    CallbackEntry(usize),
    /// `0 0`: the current call will not invoke other callbacks.
    NoMoreCallbacks,
}

/// A node of the intermediate representation of an interface.
///
/// The tree is built by the parser, rewritten by the passes in [`crate::transform`] and finally
/// executed by the protocol engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum IntermediateNode {
    /// The program reads some values, they are sent down to it.
    Read(Read),
    /// The program writes some values, they are received from it.
    Write(Write),
    Checkpoint,
    Flush,
    /// A lowered output line of the program.
    Print(Print),
    Comment(String),
    Exit,
    Break,
    Declare(VariableDeclaration),
    Alloc(ReferenceAllocation),
    Block(Block),
    For(For),
    If(If),
    Switch(Switch),
    Loop(Loop),
    Call(Call),
    Callback(Callback),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub children: Vec<IntermediateNode>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Read {
    pub arguments: Vec<VariableReference>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Write {
    pub arguments: Vec<VariableReference>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Print {
    pub arguments: Vec<Expression>,
    pub marker: Option<Marker>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct For {
    pub index: Variable,
    pub range: Expression,
    pub body: Block,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct If {
    pub condition: Expression,
    pub then_body: Block,
    pub else_body: Option<Block>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Switch {
    pub value: Expression,
    pub cases: Vec<Case>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Case {
    pub labels: Vec<i64>,
    pub body: Block,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Loop {
    pub body: Block,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Call {
    pub method: MethodPrototype,
    pub arguments: Vec<VariableReference>,
    pub return_value: Option<VariableReference>,
    pub callbacks: Vec<Callback>,
}

/// The implementation, on the program side, of a callback of a method.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Callback {
    pub index: usize,
    pub prototype: CallbackPrototype,
    pub body: Block,
}

impl Block {
    pub fn new(children: Vec<IntermediateNode>) -> Block {
        Block { children }
    }
}

impl Print {
    pub fn marker(marker: Marker) -> Print {
        let arguments = match marker {
            Marker::Checkpoint => vec![Expression::int(0)],
            Marker::CallbackEntry(index) => vec![Expression::int(1), Expression::int(index as i64)],
            Marker::NoMoreCallbacks => vec![Expression::int(0), Expression::int(0)],
        };
        Print {
            arguments,
            marker: Some(marker),
        }
    }
}

impl IntermediateNode {
    /// The children blocks of this node, in program order.
    pub fn blocks(&self) -> Vec<&Block> {
        match self {
            IntermediateNode::Block(b) => vec![b],
            IntermediateNode::For(f) => vec![&f.body],
            IntermediateNode::If(i) => {
                let mut blocks = vec![&i.then_body];
                blocks.extend(i.else_body.iter());
                blocks
            }
            IntermediateNode::Switch(s) => s.cases.iter().map(|c| &c.body).collect(),
            IntermediateNode::Loop(l) => vec![&l.body],
            IntermediateNode::Callback(c) => vec![&c.body],
            _ => vec![],
        }
    }

    /// Whether the driver has to send a request to go past this node.
    pub fn is_request(&self) -> bool {
        matches!(
            self,
            IntermediateNode::Call(_)
                | IntermediateNode::Exit
                | IntermediateNode::Print(Print {
                    marker: Some(Marker::Checkpoint),
                    ..
                })
        )
    }

    fn fmt_indented(&self, f: &mut Formatter<'_>, indent: usize) -> std::fmt::Result {
        let pad = "    ".repeat(indent);
        match self {
            IntermediateNode::Read(r) => {
                writeln!(f, "{}read {};", pad, r.arguments.iter().join(", "))
            }
            IntermediateNode::Write(w) => {
                writeln!(f, "{}write {};", pad, w.arguments.iter().join(", "))
            }
            IntermediateNode::Checkpoint => writeln!(f, "{}checkpoint;", pad),
            IntermediateNode::Flush => writeln!(f, "{}flush;", pad),
            IntermediateNode::Print(p) => {
                write!(f, "{}print {};", pad, p.arguments.iter().join(" "))?;
                match p.marker {
                    Some(Marker::Checkpoint) => writeln!(f, " // checkpoint"),
                    Some(Marker::CallbackEntry(index)) => writeln!(f, " // callback {}", index),
                    Some(Marker::NoMoreCallbacks) => writeln!(f, " // no more callbacks"),
                    None => writeln!(f),
                }
            }
            IntermediateNode::Comment(text) => writeln!(f, "{}// {}", pad, text),
            IntermediateNode::Exit => writeln!(f, "{}exit;", pad),
            IntermediateNode::Break => writeln!(f, "{}break;", pad),
            IntermediateNode::Declare(d) => writeln!(
                f,
                "{}declare {}{};",
                pad,
                d.variable.name,
                "[]".repeat(d.variable.dimensions)
            ),
            IntermediateNode::Alloc(a) => {
                writeln!(f, "{}alloc {} to {};", pad, a.reference, a.size)
            }
            IntermediateNode::Block(b) => {
                writeln!(f, "{}{{", pad)?;
                b.fmt_indented(f, indent + 1)?;
                writeln!(f, "{}}}", pad)
            }
            IntermediateNode::For(node) => {
                writeln!(f, "{}for {} to {} {{", pad, node.index, node.range)?;
                node.body.fmt_indented(f, indent + 1)?;
                writeln!(f, "{}}}", pad)
            }
            IntermediateNode::If(node) => {
                writeln!(f, "{}if {} {{", pad, node.condition)?;
                node.then_body.fmt_indented(f, indent + 1)?;
                if let Some(else_body) = &node.else_body {
                    writeln!(f, "{}}} else {{", pad)?;
                    else_body.fmt_indented(f, indent + 1)?;
                }
                writeln!(f, "{}}}", pad)
            }
            IntermediateNode::Switch(node) => {
                writeln!(f, "{}switch {} {{", pad, node.value)?;
                for case in &node.cases {
                    writeln!(f, "{}    case {} {{", pad, case.labels.iter().join(", "))?;
                    case.body.fmt_indented(f, indent + 2)?;
                    writeln!(f, "{}    }}", pad)?;
                }
                writeln!(f, "{}}}", pad)
            }
            IntermediateNode::Loop(node) => {
                writeln!(f, "{}loop {{", pad)?;
                node.body.fmt_indented(f, indent + 1)?;
                writeln!(f, "{}}}", pad)
            }
            IntermediateNode::Call(call) => {
                write!(
                    f,
                    "{}call {}({})",
                    pad,
                    call.method.name,
                    call.arguments.iter().join(", ")
                )?;
                if let Some(ret) = &call.return_value {
                    write!(f, " -> {}", ret)?;
                }
                if call.callbacks.is_empty() {
                    writeln!(f, ";")
                } else {
                    writeln!(f, " callbacks {{")?;
                    for callback in &call.callbacks {
                        IntermediateNode::Callback(callback.clone()).fmt_indented(f, indent + 1)?;
                    }
                    writeln!(f, "{}}}", pad)
                }
            }
            IntermediateNode::Callback(callback) => {
                writeln!(
                    f,
                    "{}callback {} {} {{",
                    pad, callback.index, callback.prototype.name
                )?;
                callback.body.fmt_indented(f, indent + 1)?;
                writeln!(f, "{}}}", pad)
            }
        }
    }
}

impl Block {
    fn fmt_indented(&self, f: &mut Formatter<'_>, indent: usize) -> std::fmt::Result {
        for child in &self.children {
            child.fmt_indented(f, indent)?;
        }
        Ok(())
    }
}

impl Display for IntermediateNode {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        self.fmt_indented(f, 0)
    }
}

impl Display for Block {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        self.fmt_indented(f, 0)
    }
}
