use itertools::Itertools;

use crate::{
    Block, Expression, IntermediateNode, ReferenceAction, ReferenceAllocation, ReferenceStatus,
    VariableDeclaration,
};

fn resolved_expression(expression: &Expression) -> Option<ReferenceAction> {
    expression.reference().map(ReferenceAction::resolved)
}

impl Block {
    pub fn reference_actions(&self) -> Vec<ReferenceAction> {
        self.children
            .iter()
            .flat_map(|c| c.reference_actions())
            .collect()
    }
}

impl IntermediateNode {
    /// How this node, and all its descendants, use the references.
    ///
    /// A `For` consumes one index of the references declared in its body: the body declares
    /// `A[i]`, the loop as a whole declares `A`.
    pub fn reference_actions(&self) -> Vec<ReferenceAction> {
        match self {
            IntermediateNode::Read(read) => read
                .arguments
                .iter()
                .map(|a| ReferenceAction::declared(a.reference()))
                .collect(),
            IntermediateNode::Write(write) => write
                .arguments
                .iter()
                .map(|a| ReferenceAction::resolved(a.reference()))
                .collect(),
            IntermediateNode::Print(print) => print
                .arguments
                .iter()
                .filter_map(resolved_expression)
                .collect(),
            IntermediateNode::Call(call) => call
                .arguments
                .iter()
                .map(|a| ReferenceAction::resolved(a.reference()))
                .chain(
                    call.return_value
                        .iter()
                        .map(|r| ReferenceAction::declared(r.reference())),
                )
                .collect(),
            IntermediateNode::For(node) => resolved_expression(&node.range)
                .into_iter()
                .chain(
                    node.body
                        .reference_actions()
                        .into_iter()
                        .filter(|a| a.reference.index_count > 0)
                        .filter_map(|a| {
                            Some(ReferenceAction {
                                reference: a.reference.parent()?,
                                status: a.status,
                            })
                        }),
                )
                .collect(),
            IntermediateNode::If(node) => resolved_expression(&node.condition)
                .into_iter()
                .chain(node.then_body.reference_actions())
                .chain(node.else_body.iter().flat_map(|b| b.reference_actions()))
                .collect(),
            IntermediateNode::Switch(node) => resolved_expression(&node.value)
                .into_iter()
                .chain(node.cases.iter().flat_map(|c| c.body.reference_actions()))
                .collect(),
            // scalars declared in the body of a loop live only for one iteration
            IntermediateNode::Loop(node) => node
                .body
                .reference_actions()
                .into_iter()
                .filter(|a| a.status == ReferenceStatus::Resolved || a.reference.index_count > 0)
                .collect(),
            IntermediateNode::Block(block) => block.reference_actions(),
            IntermediateNode::Checkpoint
            | IntermediateNode::Flush
            | IntermediateNode::Comment(_)
            | IntermediateNode::Exit
            | IntermediateNode::Break
            | IntermediateNode::Declare(_)
            | IntermediateNode::Alloc(_)
            | IntermediateNode::Callback(_) => vec![],
        }
    }

    /// The whole variables that start to exist with this node.
    pub fn variable_declarations(&self) -> Vec<VariableDeclaration> {
        self.reference_actions()
            .into_iter()
            .filter(|a| a.status == ReferenceStatus::Declared && a.reference.index_count == 0)
            .map(|a| VariableDeclaration {
                variable: a.reference.variable,
            })
            .unique()
            .collect()
    }

    /// The arrays this node has to size before it is executed.
    ///
    /// Only a `For` sizes arrays: every reference declared in the body with the index of the loop
    /// applied is an array with as many elements as the range of the loop.
    pub fn reference_allocations(&self) -> Vec<ReferenceAllocation> {
        match self {
            IntermediateNode::For(node) => node
                .body
                .reference_actions()
                .into_iter()
                .filter(|a| a.status == ReferenceStatus::Declared)
                .filter_map(|a| a.reference.parent())
                .unique()
                .map(|reference| ReferenceAllocation {
                    reference,
                    size: node.range.clone(),
                })
                .collect(),
            _ => vec![],
        }
    }
}
