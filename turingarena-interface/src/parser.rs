use std::collections::HashMap;

use pest::Parser;

use crate::{
    Block, Call, Callback, CallbackPrototype, Case, CompileError, Diagnostic, Expression, For, If,
    IntermediateNode, Loop, MethodPrototype, Parameter, Read, Switch, Variable, VariableReference,
    Write,
};

/// This module exists because of a `pest`'s bug: <https://github.com/pest-parser/pest/issues/326>
#[allow(missing_docs)]
mod parser {
    /// The interface file parser.
    #[derive(Parser)]
    #[grammar = "interface.pest"]
    pub struct InterfaceParser;
}

use parser::Rule;

/// Helper type for lightening the types.
type Pair<'a> = pest::iterators::Pair<'a, Rule>;

/// The result of the parsing of an interface file, together with the problems found while
/// resolving the names.
pub(crate) struct ParsedInterface {
    pub methods: Vec<MethodPrototype>,
    pub main: Block,
    pub diagnostics: Vec<Diagnostic>,
}

fn next<'a>(pairs: &mut pest::iterators::Pairs<'a, Rule>) -> Result<Pair<'a>, CompileError> {
    pairs.next().ok_or(CompileError::CorruptedParser)
}

/// Parse the source of an interface into its methods and its main block.
pub(crate) fn parse_interface(source: &str) -> Result<ParsedInterface, CompileError> {
    let mut file = parser::InterfaceParser::parse(Rule::file, source)
        .map_err(|e| CompileError::Syntax(e.to_string()))?;
    let file = next(&mut file)?;

    let mut functions = vec![];
    let mut init = None;
    let mut mains = vec![];
    for item in file.into_inner() {
        match item.as_rule() {
            Rule::function => functions.push(item),
            Rule::init_block => init = Some(item),
            Rule::main_block => mains.push(item),
            Rule::EOI => {}
            _ => unreachable!(),
        }
    }

    let mut compiler = Compiler::default();
    for function in functions {
        compiler.function(function)?;
    }
    compiler.scopes.push(CompilerScope::default());
    let mut children = vec![];
    // init and main share the same scope, init runs first
    if let Some(init) = init {
        children.extend(compiler.block(next(&mut init.into_inner())?)?.children);
    }
    let mut mains = mains.into_iter();
    match mains.next() {
        Some(main) => children.extend(compiler.block(next(&mut main.into_inner())?)?.children),
        None => compiler
            .diagnostics
            .push(Diagnostic::error("missing main block")),
    }
    for duplicate in mains {
        compiler.error(&duplicate, Diagnostic::error("main block defined more than once"));
    }

    Ok(ParsedInterface {
        methods: compiler.methods,
        main: Block::new(children),
        diagnostics: compiler.diagnostics,
    })
}

/// The variables visible in a loop body, or at top level.
#[derive(Debug, Default)]
struct CompilerScope {
    /// The index of the `for` loop owning this scope.
    index: Option<Variable>,
    variables: HashMap<String, Variable>,
}

#[derive(Debug, Default)]
struct Compiler {
    methods: Vec<MethodPrototype>,
    scopes: Vec<CompilerScope>,
    diagnostics: Vec<Diagnostic>,
}

fn dimensions(pair: Pair) -> usize {
    pair.into_inner().count()
}

fn callback_body(prototype: &CallbackPrototype) -> Block {
    let mut children = vec![];
    if !prototype.parameters.is_empty() {
        children.push(IntermediateNode::Write(Write {
            arguments: prototype
                .parameters
                .iter()
                .map(|p| VariableReference::scalar(p.name.as_str()))
                .collect(),
        }));
    }
    if prototype.has_return_value() {
        children.push(IntermediateNode::Flush);
        children.push(IntermediateNode::Read(Read {
            arguments: vec![VariableReference::scalar("result")],
        }));
    }
    Block::new(children)
}

impl Compiler {
    fn error(&mut self, pair: &Pair, diagnostic: Diagnostic) {
        let (line, column) = pair.as_span().start_pos().line_col();
        self.diagnostics
            .push(diagnostic.with_position(line, column));
    }

    /// Find a name in the scopes, returning the variable and whether it is a loop index.
    fn lookup(&self, name: &str) -> Option<(Variable, bool)> {
        for scope in self.scopes.iter().rev() {
            if let Some(index) = &scope.index {
                if index.name == name {
                    return Some((index.clone(), true));
                }
            }
            if let Some(var) = scope.variables.get(name) {
                return Some((var.clone(), false));
            }
        }
        None
    }

    fn parameters(&mut self, pair: Pair) -> Result<Vec<Parameter>, CompileError> {
        let mut parameters: Vec<Parameter> = vec![];
        for parameter in pair.into_inner() {
            let mut inner = parameter.into_inner();
            let dims = dimensions(next(&mut inner)?);
            let name = next(&mut inner)?;
            if parameters.iter().any(|p| p.name == name.as_str()) {
                self.error(
                    &name,
                    Diagnostic::error(format!("parameter `{}` defined twice", name.as_str())),
                );
            }
            parameters.push(Parameter {
                name: name.as_str().to_string(),
                dimensions: dims,
            });
        }
        Ok(parameters)
    }

    fn return_type(&mut self, pair: Pair) -> Result<usize, CompileError> {
        Ok(dimensions(next(&mut pair.into_inner())?))
    }

    fn callback_prototype(&mut self, pair: Pair) -> Result<CallbackPrototype, CompileError> {
        let mut inner = pair.into_inner();
        let name = next(&mut inner)?.as_str().to_string();
        let parameters = self.parameters(next(&mut inner)?)?;
        let return_dimensions = match inner.next() {
            Some(ret) => Some(self.return_type(ret)?),
            None => None,
        };
        Ok(CallbackPrototype {
            name,
            parameters,
            return_dimensions,
        })
    }

    fn function(&mut self, pair: Pair) -> Result<(), CompileError> {
        let mut inner = pair.into_inner();
        let name = next(&mut inner)?;
        let parameters = self.parameters(next(&mut inner)?)?;
        let mut return_dimensions = None;
        let mut callbacks: Vec<CallbackPrototype> = vec![];
        for part in inner {
            match part.as_rule() {
                Rule::return_type => return_dimensions = Some(self.return_type(part)?),
                Rule::callbacks => {
                    for callback in part.into_inner() {
                        let span = callback.clone();
                        let callback = self.callback_prototype(callback)?;
                        if callbacks.iter().any(|c| c.name == callback.name) {
                            self.error(
                                &span,
                                Diagnostic::error(format!(
                                    "callback `{}` defined twice",
                                    callback.name
                                )),
                            );
                        }
                        callbacks.push(callback);
                    }
                }
                _ => unreachable!(),
            }
        }
        if self.methods.iter().any(|m| m.name == name.as_str()) {
            self.error(
                &name,
                Diagnostic::error(format!("function `{}` defined twice", name.as_str())),
            );
            return Ok(());
        }
        self.methods.push(MethodPrototype {
            name: name.as_str().to_string(),
            parameters,
            return_dimensions,
            callbacks,
        });
        Ok(())
    }

    fn block(&mut self, pair: Pair) -> Result<Block, CompileError> {
        let mut children = vec![];
        for statement in pair.into_inner() {
            if let Some(node) = self.statement(statement)? {
                children.push(node);
            }
        }
        Ok(Block::new(children))
    }

    fn loop_body(&mut self, index: Option<Variable>, pair: Pair) -> Result<Block, CompileError> {
        self.scopes.push(CompilerScope {
            index,
            variables: HashMap::new(),
        });
        let body = self.block(pair);
        self.scopes.pop();
        body
    }

    fn statement(&mut self, pair: Pair) -> Result<Option<IntermediateNode>, CompileError> {
        let node = match pair.as_rule() {
            Rule::read => {
                let mut arguments = vec![];
                for reference in pair.into_inner() {
                    arguments.push(self.declaring_reference(reference)?);
                }
                IntermediateNode::Read(Read { arguments })
            }
            Rule::write => {
                let mut arguments = vec![];
                for reference in pair.into_inner() {
                    arguments.push(self.reference(reference)?);
                }
                IntermediateNode::Write(Write { arguments })
            }
            Rule::call => return self.call(pair),
            Rule::checkpoint => IntermediateNode::Checkpoint,
            Rule::flush => IntermediateNode::Flush,
            Rule::exit => IntermediateNode::Exit,
            Rule::break_statement => IntermediateNode::Break,
            Rule::for_loop => {
                let mut inner = pair.into_inner();
                let index = next(&mut inner)?;
                let range = self.expression(next(&mut inner)?)?;
                if self.lookup(index.as_str()).is_some() {
                    self.error(
                        &index,
                        Diagnostic::error(format!("`{}` is already defined", index.as_str())),
                    );
                }
                let index = Variable::scalar(index.as_str());
                let body = self.loop_body(Some(index.clone()), next(&mut inner)?)?;
                IntermediateNode::For(For { index, range, body })
            }
            Rule::if_statement => {
                let mut inner = pair.into_inner();
                let condition = self.expression(next(&mut inner)?)?;
                let then_body = self.block(next(&mut inner)?)?;
                let else_body = match inner.next() {
                    Some(else_block) => Some(self.block(next(&mut else_block.into_inner())?)?),
                    None => None,
                };
                IntermediateNode::If(If {
                    condition,
                    then_body,
                    else_body,
                })
            }
            Rule::switch => {
                let mut inner = pair.into_inner();
                let value = self.expression(next(&mut inner)?)?;
                let mut cases: Vec<Case> = vec![];
                for case in inner {
                    let mut labels = vec![];
                    let mut body = None;
                    for part in case.into_inner() {
                        match part.as_rule() {
                            Rule::int_literal => {
                                let label = self.int_literal(&part);
                                if cases.iter().flat_map(|c| &c.labels).any(|l| *l == label)
                                    || labels.contains(&label)
                                {
                                    self.error(
                                        &part,
                                        Diagnostic::error(format!(
                                            "case `{}` appears more than once",
                                            label
                                        )),
                                    );
                                }
                                labels.push(label);
                            }
                            Rule::block => body = Some(self.block(part)?),
                            _ => unreachable!(),
                        }
                    }
                    cases.push(Case {
                        labels,
                        body: body.ok_or(CompileError::CorruptedParser)?,
                    });
                }
                IntermediateNode::Switch(Switch { value, cases })
            }
            Rule::loop_statement => {
                let body = self.loop_body(None, next(&mut pair.into_inner())?)?;
                IntermediateNode::Loop(Loop { body })
            }
            _ => unreachable!(),
        };
        Ok(Some(node))
    }

    fn call(&mut self, pair: Pair) -> Result<Option<IntermediateNode>, CompileError> {
        let mut inner = pair.into_inner();
        let name = next(&mut inner)?;
        let mut arguments = vec![];
        for argument in next(&mut inner)?.into_inner() {
            arguments.push(self.reference(argument)?);
        }
        let return_value = match inner.next() {
            Some(ret) => Some(self.declaring_reference(next(&mut ret.into_inner())?)?),
            None => None,
        };
        let method = match self.methods.iter().find(|m| m.name == name.as_str()) {
            Some(method) => method.clone(),
            None => {
                self.error(
                    &name,
                    Diagnostic::error(format!("unknown function `{}`", name.as_str())),
                );
                return Ok(None);
            }
        };
        let callbacks = method
            .callbacks
            .iter()
            .enumerate()
            .map(|(index, prototype)| Callback {
                index,
                prototype: prototype.clone(),
                body: callback_body(prototype),
            })
            .collect();
        Ok(Some(IntermediateNode::Call(Call {
            method,
            arguments,
            return_value,
            callbacks,
        })))
    }

    fn int_literal(&mut self, pair: &Pair) -> i64 {
        match pair.as_str().parse() {
            Ok(value) => value,
            Err(_) => {
                self.error(
                    pair,
                    Diagnostic::error(format!("integer `{}` out of range", pair.as_str())),
                );
                0
            }
        }
    }

    fn expression(&mut self, pair: Pair) -> Result<Expression, CompileError> {
        let inner = next(&mut pair.into_inner())?;
        match inner.as_rule() {
            Rule::int_literal => Ok(Expression::IntLiteral(self.int_literal(&inner))),
            Rule::reference => Ok(Expression::Reference(self.reference(inner)?)),
            _ => unreachable!(),
        }
    }

    fn indices(&mut self, pairs: pest::iterators::Pairs<Rule>) -> Result<Vec<Expression>, CompileError> {
        let mut indices = vec![];
        for index in pairs {
            indices.push(self.expression(index)?);
        }
        Ok(indices)
    }

    /// A reference to a value that has to exist already.
    fn reference(&mut self, pair: Pair) -> Result<VariableReference, CompileError> {
        let mut inner = pair.into_inner();
        let name = next(&mut inner)?;
        let mut indices = self.indices(inner)?;
        let variable = match self.lookup(name.as_str()) {
            Some((variable, _)) => variable,
            None => {
                self.error(
                    &name,
                    Diagnostic::error(format!("unresolved reference `{}`", name.as_str())),
                );
                Variable::array(name.as_str(), indices.len())
            }
        };
        if indices.len() > variable.dimensions {
            self.error(
                &name,
                Diagnostic::error(format!("too many indices for `{}`", variable.name)),
            );
            indices.truncate(variable.dimensions);
        }
        Ok(VariableReference::new(variable, indices))
    }

    /// A reference whose value is provided at this point, introducing the variable if it is its
    /// first occurrence. An array is declared by its first occurrence in a cell of the form
    /// `A[i][j]`, where `i` and `j` are the indices of the innermost `for` loops.
    fn declaring_reference(&mut self, pair: Pair) -> Result<VariableReference, CompileError> {
        let mut inner = pair.into_inner();
        let name = next(&mut inner)?;
        let mut indices = self.indices(inner)?;
        match self.lookup(name.as_str()) {
            Some((index, true)) => {
                self.error(
                    &name,
                    Diagnostic::error(format!("cannot assign to loop index `{}`", index.name)),
                );
                Ok(VariableReference::new(index, vec![]))
            }
            Some((variable, false)) => {
                if indices.len() > variable.dimensions {
                    self.error(
                        &name,
                        Diagnostic::error(format!("too many indices for `{}`", variable.name)),
                    );
                    indices.truncate(variable.dimensions);
                }
                Ok(VariableReference::new(variable, indices))
            }
            None => {
                let variable = Variable::array(name.as_str(), indices.len());
                let loops: Vec<usize> = self
                    .scopes
                    .iter()
                    .enumerate()
                    .filter(|(_, s)| s.index.is_some())
                    .map(|(i, _)| i)
                    .collect();
                let owner = if indices.is_empty() {
                    self.scopes.len() - 1
                } else if indices.len() > loops.len() {
                    self.error(
                        &name,
                        Diagnostic::error(format!(
                            "`{}` has more indices than the enclosing for loops",
                            variable.name
                        )),
                    );
                    0
                } else {
                    let expected = &loops[loops.len() - indices.len()..];
                    let matching = indices.iter().zip(expected.iter()).all(|(index, scope)| {
                        match index {
                            Expression::Reference(r) => {
                                r.indices.is_empty()
                                    && self.scopes[*scope].index.as_ref() == Some(&r.variable)
                            }
                            Expression::IntLiteral(_) => false,
                        }
                    });
                    if !matching {
                        let expected_indices: String = expected
                            .iter()
                            .filter_map(|s| self.scopes[*s].index.as_ref())
                            .map(|i| format!("[{}]", i.name))
                            .collect();
                        self.error(
                            &name,
                            Diagnostic::error(format!(
                                "`{}` must be indexed by the indices of the enclosing for loops",
                                variable.name
                            ))
                            .with_note(format!("expected `{}{}`", variable.name, expected_indices)),
                        );
                    }
                    expected[0] - 1
                };
                self.scopes[owner]
                    .variables
                    .insert(variable.name.clone(), variable.clone());
                Ok(VariableReference::new(variable, indices))
            }
        }
    }
}
