//! The step machine running a lowered program against the driver and the sandboxed program.
//!
//! The program is unrolled once, and two cursors walk the unrolled instructions: the driver
//! cursor answers the requests of the driver, the sandbox cursor talks with the program. The
//! driver cursor leads; the sandbox cursor is advanced only when the driver needs something that
//! only the program can provide (a checkpoint, the return value of a call, the end of the
//! callbacks of a call, the end of the program).

use std::collections::VecDeque;
use std::sync::Arc;

use turingarena_interface::{
    Block, Call, Callback, Expression, IntermediateNode, Marker, Print, Scope, Variable,
    VariableReference,
};

use turingarena_sandbox::ProcessMonitor;

use crate::bindings::{Binding, Bindings, Frame, Location, Origin, ScopeChain};
use crate::execution::{ExecutionPhase, ExecutionResult};
use crate::unroller::{Instruction, Unrolled, Unroller};
use crate::{DriverConnection, DriverState, EngineError, RequestSignature, SandboxConnection, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Cursor {
    Driver,
    Sandbox,
}

/// The call whose callbacks the program is going to invoke.
struct PendingDispatch<'a> {
    position: usize,
    call: &'a Call,
}

fn evaluate_reference(frame: &Frame, reference: &VariableReference) -> Option<i64> {
    let indices = reference.evaluate_indices(frame)?;
    frame.lookup(&reference.variable, &indices)
}

pub struct Engine<'a> {
    unroller: Unroller<'a>,
    /// The unrolled instructions not yet executed by both cursors.
    buffer: VecDeque<Instruction<'a>>,
    /// The position of the first instruction of the buffer.
    buffer_start: usize,
    driver_position: usize,
    sandbox_position: usize,
    bindings: Bindings,
    driver: DriverConnection,
    sandbox: SandboxConnection,
    request_lookahead: Option<RequestSignature>,
    /// Calls with callbacks requested by the driver.
    calls_accepted: usize,
    /// Calls with callbacks reached by the program.
    calls_started: usize,
    pending_dispatch: Option<PendingDispatch<'a>>,
    /// The position of the last call whose callbacks are over.
    dispatched_up_to: Option<usize>,
    sandbox_exited: bool,
}

impl<'a> Engine<'a> {
    /// Prepare the run of a lowered program.
    pub fn new(program: &'a Block, driver: DriverConnection, sandbox: SandboxConnection) -> Self {
        Engine {
            unroller: Unroller::new(program),
            buffer: VecDeque::new(),
            buffer_start: 0,
            driver_position: 0,
            sandbox_position: 0,
            bindings: Bindings::default(),
            driver,
            sandbox,
            request_lookahead: None,
            calls_accepted: 0,
            calls_started: 0,
            pending_dispatch: None,
            dispatched_up_to: None,
            sandbox_exited: false,
        }
    }

    /// Limit the number of array cells the run can create, counting every array.
    pub fn with_max_array_cells(mut self, max_array_cells: usize) -> Self {
        self.bindings = Bindings::new(max_array_cells);
        self
    }

    pub fn driver(&mut self) -> &mut DriverConnection {
        &mut self.driver
    }

    pub fn monitor(&self) -> Arc<dyn ProcessMonitor> {
        self.sandbox.monitor().clone()
    }

    /// Serve the requests of the driver until the program exits.
    pub fn run(&mut self) -> Result<(), EngineError> {
        loop {
            let position = self.driver_position;
            let Some(instruction) = self.fetch(position, Cursor::Driver)? else {
                break;
            };
            let result = self.run_phase(
                ExecutionPhase::Request,
                instruction.node,
                &instruction.scope,
                position,
            )?;
            self.request_lookahead = result.request_lookahead.clone();
            self.commit(result, Origin::Driver)?;
            self.driver_position += 1;
            self.trim();
            if let IntermediateNode::Exit = instruction.node {
                break;
            }
        }
        self.driver.flush()
    }

    fn unrolled(&self) -> usize {
        self.buffer_start + self.buffer.len()
    }

    /// The instruction at `position`, unrolling the program as needed. `None` past the end of
    /// the program.
    fn fetch(
        &mut self,
        position: usize,
        cursor: Cursor,
    ) -> Result<Option<Instruction<'a>>, EngineError> {
        while self.unrolled() <= position {
            match self.unroller.next(&mut self.bindings)? {
                Unrolled::Instruction(instruction) => self.buffer.push_back(instruction),
                Unrolled::Done => return Ok(None),
                Unrolled::Blocked(expression) => {
                    let target = self.unrolled();
                    if cursor == Cursor::Sandbox || self.sandbox_position >= target {
                        return Err(EngineError::not_available(expression));
                    }
                    debug!(
                        "The value of `{}` is needed, advancing the sandbox to {}",
                        expression, target
                    );
                    self.advance_sandbox(|engine| engine.sandbox_position >= target)?;
                }
            }
        }
        Ok(self.buffer.get(position - self.buffer_start).cloned())
    }

    /// Forget the instructions executed by both cursors.
    fn trim(&mut self) {
        let executed = self.driver_position.min(self.sandbox_position);
        while self.buffer_start < executed && self.buffer.pop_front().is_some() {
            self.buffer_start += 1;
        }
    }

    /// Apply the assignments of the result to the storage.
    fn commit(
        &mut self,
        result: ExecutionResult,
        origin: Origin,
    ) -> Result<ExecutionResult, EngineError> {
        for (location, value) in &result.assignments {
            self.bindings.assign(location, value.clone(), origin)?;
        }
        Ok(result)
    }

    /// Execute instructions with the sandbox cursor until `done` holds.
    fn advance_sandbox<F: Fn(&Engine<'a>) -> bool>(&mut self, done: F) -> Result<(), EngineError> {
        while !done(self) {
            let position = self.sandbox_position;
            let instruction = self
                .fetch(position, Cursor::Sandbox)?
                .ok_or_else(|| EngineError::interface("the program is already over"))?;
            trace!(
                "Sandbox cursor at {}: {}",
                position,
                instruction.node.to_string().trim_end()
            );
            let mut scope = instruction.scope.clone();
            self.execute(instruction.node, &mut scope, position)?;
            self.sandbox_position += 1;
            self.trim();
        }
        Ok(())
    }

    /// Execute a node with the sandbox cursor, recursively for the control structures that were
    /// not unrolled. The declarations extend `scope`.
    fn execute(
        &mut self,
        node: &'a IntermediateNode,
        scope: &mut ScopeChain,
        position: usize,
    ) -> Result<ExecutionResult, EngineError> {
        match node {
            IntermediateNode::Declare(declaration) => {
                let slot = self.bindings.new_slot();
                *scope = scope.with(&declaration.variable.name, Binding::Slot(slot));
                Ok(ExecutionResult::default())
            }
            IntermediateNode::Break => Ok(ExecutionResult::breaking()),
            IntermediateNode::Block(block) => self.execute_block(block, scope, position),
            IntermediateNode::For(node) => {
                let range = self.evaluate(&node.range, scope)?;
                let mut result = ExecutionResult::default();
                for i in 0..range {
                    let mut iteration = scope.with(&node.index.name, Binding::Index(i));
                    result = result.merge(self.execute_block(&node.body, &mut iteration, position)?);
                    if result.does_break {
                        break;
                    }
                }
                Ok(result)
            }
            IntermediateNode::If(node) => {
                if self.evaluate(&node.condition, scope)? != 0 {
                    self.execute_block(&node.then_body, scope, position)
                } else if let Some(body) = &node.else_body {
                    self.execute_block(body, scope, position)
                } else {
                    Ok(ExecutionResult::default())
                }
            }
            IntermediateNode::Switch(node) => {
                let value = self.evaluate(&node.value, scope)?;
                match node.cases.iter().find(|c| c.labels.contains(&value)) {
                    Some(case) => self.execute_block(&case.body, scope, position),
                    None => Ok(ExecutionResult::default()),
                }
            }
            IntermediateNode::Loop(node) => loop {
                let mut iteration = scope.clone();
                let result = self.execute_block(&node.body, &mut iteration, position)?;
                if result.does_break {
                    return Ok(ExecutionResult {
                        does_break: false,
                        ..result
                    });
                }
            },
            leaf => {
                let downward = self.run_phase(ExecutionPhase::Downward, leaf, scope, position)?;
                let downward = self.commit(downward, Origin::Driver)?;
                let upward = self.run_phase(ExecutionPhase::Upward, leaf, scope, position)?;
                let upward = self.commit(upward, Origin::Program)?;
                Ok(downward.merge(upward))
            }
        }
    }

    fn execute_block(
        &mut self,
        block: &'a Block,
        scope: &mut ScopeChain,
        position: usize,
    ) -> Result<ExecutionResult, EngineError> {
        let mut result = ExecutionResult::default();
        for child in &block.children {
            result = result.merge(self.execute(child, scope, position)?);
            if result.does_break {
                break;
            }
        }
        Ok(result)
    }

    fn evaluate(&self, expression: &Expression, scope: &ScopeChain) -> Result<i64, EngineError> {
        expression
            .evaluate(&Frame::new(scope, &self.bindings))
            .ok_or_else(|| EngineError::not_available(expression))
    }

    /// One leg of the execution of a leaf.
    fn run_phase(
        &mut self,
        phase: ExecutionPhase,
        node: &'a IntermediateNode,
        scope: &ScopeChain,
        position: usize,
    ) -> Result<ExecutionResult, EngineError> {
        match (phase, node) {
            (ExecutionPhase::Downward, IntermediateNode::Read(read)) => {
                let frame = Frame::new(scope, &self.bindings);
                let values = read
                    .arguments
                    .iter()
                    .map(|a| evaluate_reference(&frame, a).ok_or_else(|| EngineError::not_available(a)))
                    .collect::<Result<Vec<_>, _>>()?;
                self.sandbox.send_downward(&values)?;
            }
            (ExecutionPhase::Downward, IntermediateNode::Flush) => self.sandbox.flush_downward()?,
            (ExecutionPhase::Downward, IntermediateNode::Alloc(allocation)) => {
                let size = self.evaluate(&allocation.size, scope)?;
                let origin = Frame::new(scope, &self.bindings).origin(&allocation.size);
                let reference = &allocation.reference;
                let slot = match scope.find(&reference.variable.name) {
                    Some(Binding::Slot(slot)) => slot,
                    _ => {
                        return Err(EngineError::interface(format!(
                            "`{}` is not declared",
                            reference.variable
                        )))
                    }
                };
                let indices = scope
                    .innermost_indices(reference.index_count)
                    .ok_or_else(|| EngineError::not_available(reference))?;
                self.bindings
                    .allocate(&Location { slot, indices }, size, origin)?;
            }
            (ExecutionPhase::Downward, IntermediateNode::Call(call)) if call.method.has_callbacks() => {
                self.calls_started += 1;
                if self.calls_started > self.calls_accepted {
                    return Err(EngineError::interface(format!(
                        "the program invokes the callbacks of `{}` before the call is requested",
                        call.method.name
                    )));
                }
                self.pending_dispatch = Some(PendingDispatch { position, call });
            }
            (ExecutionPhase::Downward, IntermediateNode::Exit) => {
                debug!("The program reached the exit");
                self.sandbox_exited = true;
            }
            (ExecutionPhase::Upward, IntermediateNode::Print(print)) => {
                return self.receive_print(print, scope);
            }
            (ExecutionPhase::Request, node) if node.is_request() => {
                let request = match self.request_lookahead.take() {
                    Some(request) => request,
                    None => self.driver.next_request()?,
                };
                debug!("Driver request: {}", request);
                return self.answer_request(node, scope, position, request);
            }
            (ExecutionPhase::Request, _) => {
                return Ok(ExecutionResult::with_lookahead(self.request_lookahead.clone()))
            }
            _ => {}
        }
        Ok(ExecutionResult::default())
    }

    /// Receive a line from the program and check it against the print.
    fn receive_print(
        &mut self,
        print: &Print,
        scope: &ScopeChain,
    ) -> Result<ExecutionResult, EngineError> {
        match print.marker {
            Some(Marker::NoMoreCallbacks) => return self.dispatch_callbacks(),
            Some(Marker::CallbackEntry(index)) => {
                return Err(EngineError::interface(format!(
                    "callback {} entered outside of a call",
                    index
                )))
            }
            Some(Marker::Checkpoint) => {
                let values = self.sandbox.receive_upward()?;
                if values != [0i64] {
                    return Err(EngineError::communication(format!(
                        "expecting checkpoint, got {:?}",
                        values
                    )));
                }
                return Ok(ExecutionResult::default());
            }
            None => {}
        }
        let values = self.sandbox.receive_upward()?;
        if values.len() != print.arguments.len() {
            return Err(EngineError::communication(format!(
                "expecting {} values, got {:?}",
                print.arguments.len(),
                values
            )));
        }
        let frame = Frame::new(scope, &self.bindings);
        let mut result = ExecutionResult::default();
        for (argument, &value) in print.arguments.iter().zip(values.iter()) {
            let reference = match argument {
                Expression::Reference(reference) => reference,
                Expression::IntLiteral(expected) if *expected == value => continue,
                Expression::IntLiteral(expected) => {
                    return Err(EngineError::communication(format!(
                        "expecting {}, got {}",
                        expected, value
                    )))
                }
            };
            if let Some(Binding::Index(expected)) = scope.find(&reference.variable.name) {
                if expected != value {
                    return Err(EngineError::communication(format!(
                        "expecting {} for `{}`, got {}",
                        expected, reference, value
                    )));
                }
                continue;
            }
            result = result.assign(frame.locate(reference)?, Value::Scalar(value));
        }
        Ok(result)
    }

    /// Serve the callbacks the program invokes during the pending call, until it signals the end
    /// of the callbacks.
    fn dispatch_callbacks(&mut self) -> Result<ExecutionResult, EngineError> {
        let PendingDispatch { position, call } = self
            .pending_dispatch
            .take()
            .ok_or_else(|| EngineError::interface("no call is waiting for callbacks"))?;
        loop {
            let values = self.sandbox.receive_upward()?;
            match values.as_slice() {
                [0, 0] => break,
                [1, index] => {
                    let callback = usize::try_from(*index)
                        .ok()
                        .and_then(|i| call.callbacks.get(i))
                        .ok_or_else(|| {
                            EngineError::communication(format!(
                                "invalid callback index {} for `{}`",
                                index, call.method.name
                            ))
                        })?;
                    debug!("The program invokes callback {}", callback.prototype.name);
                    self.run_callback(callback)?;
                }
                _ => {
                    return Err(EngineError::communication(format!(
                        "expecting a callback or the end of the callbacks, got {:?}",
                        values
                    )))
                }
            }
        }
        debug!("Callbacks of `{}` are over", call.method.name);
        self.dispatched_up_to = Some(position);
        Ok(ExecutionResult::default())
    }

    /// Execute the body of a callback whose entry marker was already received. The driver is
    /// involved once, before the first read or at the end of the body.
    fn run_callback(&mut self, callback: &'a Callback) -> Result<(), EngineError> {
        let mut scope = ScopeChain::default();
        for parameter in &callback.prototype.parameters {
            let slot = self.bindings.new_slot();
            scope = scope.with(&parameter.name, Binding::Slot(slot));
        }
        let mut answered = false;
        for node in &callback.body.children {
            match node {
                IntermediateNode::Print(Print {
                    marker: Some(Marker::CallbackEntry(_)),
                    ..
                }) => {}
                IntermediateNode::Read(read) if !answered => {
                    answered = true;
                    let value = self.callback_round_trip(callback, &scope)?.ok_or_else(|| {
                        EngineError::interface(format!(
                            "callback `{}` reads a value but returns none",
                            callback.prototype.name
                        ))
                    })?;
                    let [argument] = read.arguments.as_slice() else {
                        return Err(EngineError::interface(format!(
                            "callback `{}` must read exactly its return value",
                            callback.prototype.name
                        )));
                    };
                    let location = Frame::new(&scope, &self.bindings).locate(argument)?;
                    self.commit(
                        ExecutionResult::default().assign(location, value),
                        Origin::Driver,
                    )?;
                    self.execute(node, &mut scope, self.sandbox_position)?;
                }
                node => {
                    self.execute(node, &mut scope, self.sandbox_position)?;
                }
            }
        }
        if !answered {
            self.callback_round_trip(callback, &scope)?;
        }
        Ok(())
    }

    /// Tell the driver about the callback invocation and wait for it to return.
    fn callback_round_trip(
        &mut self,
        callback: &Callback,
        scope: &ScopeChain,
    ) -> Result<Option<Value>, EngineError> {
        let frame = Frame::new(scope, &self.bindings);
        let arguments = callback
            .prototype
            .parameters
            .iter()
            .map(|p| {
                frame
                    .lookup(&Variable::scalar(p.name.as_str()), &[])
                    .ok_or_else(|| EngineError::not_available(&p.name))
            })
            .collect::<Result<Vec<_>, _>>()?;
        self.driver.send_state(DriverState::Callback)?;
        self.driver.send(callback.index as i64)?;
        for argument in arguments {
            self.driver.send_value(&Value::Scalar(argument))?;
        }
        let request = self.driver.next_request()?;
        if !request.is_command("return") {
            return Err(EngineError::interface(format!(
                "expecting 'return', got '{}'",
                request
            )));
        }
        if !callback.prototype.has_return_value() {
            return Ok(None);
        }
        let value = self.driver.receive_value()?;
        if !value.has_dimensions(0) {
            return Err(EngineError::interface(format!(
                "the return value of callback `{}` must be a scalar",
                callback.prototype.name
            )));
        }
        Ok(Some(value))
    }

    /// The request leg of a node answering a request of the driver.
    fn answer_request(
        &mut self,
        node: &'a IntermediateNode,
        scope: &ScopeChain,
        position: usize,
        request: RequestSignature,
    ) -> Result<ExecutionResult, EngineError> {
        match node {
            IntermediateNode::Call(call) => return self.answer_call(call, scope, position, request),
            IntermediateNode::Exit => {
                if !request.is_command("exit") {
                    return Err(EngineError::interface(format!(
                        "expecting 'exit', got '{}'",
                        request
                    )));
                }
                self.advance_sandbox(|engine| engine.sandbox_exited)?;
            }
            _ => {
                if !request.is_command("checkpoint") {
                    return Err(EngineError::interface(format!(
                        "expecting 'checkpoint', got '{}'",
                        request
                    )));
                }
                self.advance_sandbox(|engine| engine.sandbox_position > position)?;
            }
        }
        self.report_ready()?;
        Ok(ExecutionResult::default().with_request_processed())
    }

    fn answer_call(
        &mut self,
        call: &'a Call,
        scope: &ScopeChain,
        position: usize,
        request: RequestSignature,
    ) -> Result<ExecutionResult, EngineError> {
        let method = &call.method;
        match &request {
            RequestSignature::Call(name) if *name == method.name => {}
            _ => {
                return Err(EngineError::interface(format!(
                    "expecting 'call {}', got '{}'",
                    method.name, request
                )))
            }
        }
        let mut arguments = ExecutionResult::default();
        for (parameter, argument) in method.parameters.iter().zip(call.arguments.iter()) {
            let value = self.driver.receive_value()?;
            if !value.has_dimensions(parameter.dimensions) {
                return Err(EngineError::interface(format!(
                    "argument `{}` of `{}` must have {} dimension(s)",
                    parameter.name, method.name, parameter.dimensions
                )));
            }
            if let Some(Binding::Index(expected)) = scope.find(&argument.variable.name) {
                if value.as_scalar() != Some(expected) {
                    return Err(EngineError::interface(format!(
                        "argument `{}` of `{}` must be {}",
                        parameter.name, method.name, expected
                    )));
                }
                continue;
            }
            let location = Frame::new(scope, &self.bindings).locate(argument)?;
            arguments = arguments.assign(location, value);
        }
        let arguments = self.commit(arguments, Origin::Driver)?;
        if method.has_callbacks() {
            self.calls_accepted += 1;
        }
        let return_location = match &call.return_value {
            Some(reference) => Some(Frame::new(scope, &self.bindings).locate(reference)?),
            None => None,
        };
        let has_callbacks = method.has_callbacks();
        self.advance_sandbox(|engine| {
            let callbacks_over = !has_callbacks
                || matches!(engine.dispatched_up_to, Some(done) if done >= position);
            let returned = match &return_location {
                Some(location) => engine.bindings.get(location).is_some(),
                None => true,
            };
            callbacks_over && returned
        })?;
        self.report_ready()?;
        if let Some(location) = &return_location {
            let value = self
                .bindings
                .value(location)
                .ok_or_else(|| EngineError::not_available(&method.name))?;
            self.driver.send_value(&value)?;
        }
        Ok(ExecutionResult {
            assignments: vec![],
            ..arguments.with_request_processed()
        })
    }

    /// Take a fresh snapshot of the resources used by the program, and report READY.
    fn report_ready(&mut self) -> Result<(), EngineError> {
        let info = self.sandbox.monitor().get_status(None)?;
        self.driver.report_ready(&info)
    }
}
