//! Passes that rewrite the node tree, returning a new tree.

use crate::{
    Block, Call, Callback, Case, Expression, For, If, IntermediateNode, Loop, Marker, Print,
    Switch,
};

/// A recursive rewrite of the node tree, dispatched by node variant.
///
/// The default implementation of every method rebuilds the node with its children transformed,
/// so a pass only has to override the methods of the variants it changes.
pub trait TreeTransformer {
    fn transform(&mut self, node: &IntermediateNode) -> IntermediateNode {
        walk_node(self, node)
    }

    fn transform_block(&mut self, block: &Block) -> Block {
        Block::new(block.children.iter().map(|c| self.transform(c)).collect())
    }

    fn transform_callback(&mut self, callback: &Callback) -> Callback {
        Callback {
            index: callback.index,
            prototype: callback.prototype.clone(),
            body: self.transform_block(&callback.body),
        }
    }
}

/// Rebuild `node` transforming its children with `transformer`.
pub fn walk_node<T: TreeTransformer + ?Sized>(
    transformer: &mut T,
    node: &IntermediateNode,
) -> IntermediateNode {
    match node {
        IntermediateNode::Block(block) => IntermediateNode::Block(transformer.transform_block(block)),
        IntermediateNode::For(node) => IntermediateNode::For(For {
            index: node.index.clone(),
            range: node.range.clone(),
            body: transformer.transform_block(&node.body),
        }),
        IntermediateNode::If(node) => IntermediateNode::If(If {
            condition: node.condition.clone(),
            then_body: transformer.transform_block(&node.then_body),
            else_body: node
                .else_body
                .as_ref()
                .map(|b| transformer.transform_block(b)),
        }),
        IntermediateNode::Switch(node) => IntermediateNode::Switch(Switch {
            value: node.value.clone(),
            cases: node
                .cases
                .iter()
                .map(|c| Case {
                    labels: c.labels.clone(),
                    body: transformer.transform_block(&c.body),
                })
                .collect(),
        }),
        IntermediateNode::Loop(node) => IntermediateNode::Loop(Loop {
            body: transformer.transform_block(&node.body),
        }),
        IntermediateNode::Call(call) => IntermediateNode::Call(Call {
            method: call.method.clone(),
            arguments: call.arguments.clone(),
            return_value: call.return_value.clone(),
            callbacks: call
                .callbacks
                .iter()
                .map(|c| transformer.transform_callback(c))
                .collect(),
        }),
        IntermediateNode::Callback(callback) => {
            IntermediateNode::Callback(transformer.transform_callback(callback))
        }
        leaf => leaf.clone(),
    }
}

/// Wrap the main block between the initial checkpoint and the final exit.
pub fn postprocess(main: &Block) -> Block {
    let mut children = Vec::with_capacity(main.children.len() + 2);
    children.push(IntermediateNode::Checkpoint);
    children.extend(main.children.iter().cloned());
    children.push(IntermediateNode::Exit);
    Block::new(children)
}

/// Lower the tree to the primitives actually exchanged with the program.
///
/// - `write` becomes a `Print` of its arguments, `checkpoint` a `Print` of `0`;
/// - a `Flush` is inserted before every `read`;
/// - callback bodies start with the `1 index` marker, calls with callbacks end with `0 0`;
/// - variable declarations and array allocations are emitted before the statement needing them.
#[derive(Debug, Default)]
pub struct Lowering;

impl Lowering {
    pub fn lower(main: &Block) -> Block {
        Lowering.transform_block(main)
    }

    fn statement_nodes(&mut self, node: &IntermediateNode, out: &mut Vec<IntermediateNode>) {
        out.extend(
            node.variable_declarations()
                .into_iter()
                .map(IntermediateNode::Declare),
        );
        out.extend(
            node.reference_allocations()
                .into_iter()
                .map(IntermediateNode::Alloc),
        );
        match node {
            IntermediateNode::Read(_) => {
                out.push(IntermediateNode::Flush);
                out.push(self.transform(node));
            }
            IntermediateNode::Call(call) => {
                out.push(self.transform(node));
                if call.method.has_callbacks() {
                    out.push(IntermediateNode::Comment("no more callbacks".into()));
                    out.push(IntermediateNode::Print(Print::marker(
                        Marker::NoMoreCallbacks,
                    )));
                }
            }
            IntermediateNode::Comment(_)
            | IntermediateNode::Declare(_)
            | IntermediateNode::Alloc(_) => out.push(node.clone()),
            _ => out.push(self.transform(node)),
        }
    }
}

impl TreeTransformer for Lowering {
    fn transform(&mut self, node: &IntermediateNode) -> IntermediateNode {
        match node {
            IntermediateNode::Write(write) => IntermediateNode::Print(Print {
                arguments: write
                    .arguments
                    .iter()
                    .cloned()
                    .map(Expression::Reference)
                    .collect(),
                marker: None,
            }),
            IntermediateNode::Checkpoint => {
                IntermediateNode::Print(Print::marker(Marker::Checkpoint))
            }
            _ => walk_node(self, node),
        }
    }

    fn transform_block(&mut self, block: &Block) -> Block {
        let mut children = vec![];
        for child in &block.children {
            self.statement_nodes(child, &mut children);
        }
        Block::new(children)
    }

    fn transform_callback(&mut self, callback: &Callback) -> Callback {
        let body = self.transform_block(&callback.body);
        let mut children = vec![
            IntermediateNode::Comment(format!("callback {}", callback.prototype.name)),
            IntermediateNode::Print(Print::marker(Marker::CallbackEntry(callback.index))),
        ];
        children.extend(body.children);
        Callback {
            index: callback.index,
            prototype: callback.prototype.clone(),
            body: Block::new(children),
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use crate::{
        Parameter, Read, ReferenceAllocation, Variable, VariableDeclaration, VariableReference,
        Write,
    };
    use crate::{CallbackPrototype, MethodPrototype};

    use super::*;

    fn read(name: &str) -> IntermediateNode {
        IntermediateNode::Read(Read {
            arguments: vec![VariableReference::scalar(name)],
        })
    }

    fn declare(name: &str) -> IntermediateNode {
        IntermediateNode::Declare(VariableDeclaration {
            variable: Variable::scalar(name),
        })
    }

    #[test]
    fn test_postprocess() {
        let main = Block::new(vec![IntermediateNode::Flush]);
        assert_eq!(
            postprocess(&main),
            Block::new(vec![
                IntermediateNode::Checkpoint,
                IntermediateNode::Flush,
                IntermediateNode::Exit
            ])
        );
    }

    #[test]
    fn test_lower_write_and_checkpoint() {
        let main = Block::new(vec![
            IntermediateNode::Checkpoint,
            read("a"),
            IntermediateNode::Write(Write {
                arguments: vec![VariableReference::scalar("a")],
            }),
        ]);
        assert_eq!(
            Lowering::lower(&main),
            Block::new(vec![
                IntermediateNode::Print(Print::marker(Marker::Checkpoint)),
                declare("a"),
                IntermediateNode::Flush,
                read("a"),
                IntermediateNode::Print(Print {
                    arguments: vec![Expression::variable(&Variable::scalar("a"))],
                    marker: None,
                }),
            ])
        );
    }

    #[test]
    fn test_lower_consecutive_reads_flush_each() {
        let main = Block::new(vec![read("a"), read("b")]);
        assert_eq!(
            Lowering::lower(&main),
            Block::new(vec![
                declare("a"),
                IntermediateNode::Flush,
                read("a"),
                declare("b"),
                IntermediateNode::Flush,
                read("b"),
            ])
        );
    }

    #[test]
    fn test_lower_explicit_flush() {
        let main = Block::new(vec![IntermediateNode::Flush, read("a")]);
        assert_eq!(
            Lowering::lower(&main),
            Block::new(vec![
                IntermediateNode::Flush,
                declare("a"),
                IntermediateNode::Flush,
                read("a"),
            ])
        );
    }

    #[test]
    fn test_lower_for_allocates_once() {
        let a = Variable::array("A", 1);
        let i = Variable::scalar("i");
        let main = Block::new(vec![IntermediateNode::For(For {
            index: i.clone(),
            range: Expression::int(5),
            body: Block::new(vec![IntermediateNode::Read(Read {
                arguments: vec![VariableReference::new(
                    a.clone(),
                    vec![Expression::variable(&i)],
                )],
            })]),
        })]);
        let lowered = Lowering::lower(&main);
        let allocations: Vec<_> = lowered
            .children
            .iter()
            .filter(|c| matches!(c, IntermediateNode::Alloc(_)))
            .collect();
        assert_eq!(
            allocations,
            vec![&IntermediateNode::Alloc(ReferenceAllocation {
                reference: a.as_reference(),
                size: Expression::int(5),
            })]
        );
        assert_eq!(
            lowered.children[0],
            IntermediateNode::Declare(VariableDeclaration { variable: a })
        );
        assert!(matches!(lowered.children[2], IntermediateNode::For(_)));
    }

    #[test]
    fn test_lower_call_with_callbacks() {
        let callback = CallbackPrototype {
            name: "cb".into(),
            parameters: vec![Parameter {
                name: "x".into(),
                dimensions: 0,
            }],
            return_dimensions: None,
        };
        let method = MethodPrototype {
            name: "f".into(),
            parameters: vec![],
            return_dimensions: None,
            callbacks: vec![callback.clone()],
        };
        let call = IntermediateNode::Call(Call {
            method,
            arguments: vec![],
            return_value: None,
            callbacks: vec![Callback {
                index: 0,
                prototype: callback,
                body: Block::new(vec![IntermediateNode::Write(Write {
                    arguments: vec![VariableReference::scalar("x")],
                })]),
            }],
        });
        let lowered = Lowering::lower(&Block::new(vec![call]));
        assert_eq!(lowered.children.len(), 3);
        assert_eq!(
            lowered.children[1],
            IntermediateNode::Comment("no more callbacks".into())
        );
        assert_eq!(
            lowered.children[2],
            IntermediateNode::Print(Print::marker(Marker::NoMoreCallbacks))
        );
        let IntermediateNode::Call(call) = &lowered.children[0] else {
            panic!("expecting a call");
        };
        let body = &call.callbacks[0].body.children;
        assert_eq!(body[0], IntermediateNode::Comment("callback cb".into()));
        assert_eq!(
            body[1],
            IntermediateNode::Print(Print::marker(Marker::CallbackEntry(0)))
        );
        assert!(matches!(body[2], IntermediateNode::Print(Print { marker: None, .. })));
    }
}
