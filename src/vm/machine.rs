//! The resumable interpreter.
//!
//! A robot's execution is an explicit stack of [`Frame`]s, so suspending it
//! is just returning from [`Machine::resume`] and resuming it is calling in
//! again. Suspension happens only at a `charge` that exhausts the budget,
//! at `bc/Clock.yield`, and when the per-turn entry routine returns.
//!
//! Faults unwind frame by frame, taking the first handler in table order
//! whose range covers the faulting op and whose filter matches.

use std::rc::Rc;
use std::sync::Arc;

use crate::context::{Callee, ExecutionContext, InitState, UnitId};
use crate::control::{GameApi, RobotDescriptor};
use crate::cost::{array_cost, multi_array_cost};
use crate::error::EngineError;
use crate::isa::{MethodRef, Op, STATIC_INIT};
use crate::monitor::{ChargeOutcome, Monitor};
use crate::output::TeamOutput;
use crate::profiler::Profiler;
use crate::rewriter::RewrittenImage;

use super::fault::{Fault, FaultClass};
use super::natives::{NativeCx, NativeError, Signal};
use super::value::{HeapMeter, Object, ObjectKind, Value};

/// Everything outside the robot that a turn can touch.
pub struct TurnEnv<'a> {
    /// The running robot.
    pub robot: &'a RobotDescriptor,
    /// Current round, for output headers.
    pub round: u32,
    /// Game surface for `bc/RobotController`.
    pub game: &'a mut dyn GameApi,
    /// The robot's team output.
    pub output: &'a mut TeamOutput,
    /// Frame profiler, when profiling.
    pub profiler: Option<&'a mut Profiler>,
}

impl std::fmt::Debug for TurnEnv<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TurnEnv")
            .field("robot", &self.robot.id)
            .field("round", &self.round)
            .finish_non_exhaustive()
    }
}

/// Why [`Machine::resume`] returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Exit {
    /// The budget ran out mid-turn; frames are kept for the next turn.
    Paused,
    /// The robot yielded; frames are kept for the next turn.
    Yielded,
    /// The entry routine returned; the next turn starts it afresh.
    TurnComplete,
    /// The program has ended.
    Terminated(Termination),
}

/// How a program ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Termination {
    /// The termination signal reached the top. Not an error.
    Killed,
    /// A fault nothing caught.
    Fault(Fault),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FrameKind {
    /// The per-turn entry routine.
    Entry,
    /// An ordinary call; the result goes to the caller.
    Call,
    /// A static initializer. With `retry`, the caller re-executes the op
    /// that triggered it.
    Init { retry: bool },
}

#[derive(Debug)]
struct Frame {
    unit: UnitId,
    image: Arc<RewrittenImage>,
    routine: usize,
    pc: usize,
    locals: Vec<Value>,
    stack: Vec<Value>,
    kind: FrameKind,
    profiled: bool,
}

enum Flow {
    /// Frames changed; re-enter the top frame.
    Continue,
    /// Leave the interpreter.
    Exit(Exit),
}

enum Trap {
    Fault(Fault),
    Throw(Rc<Object>),
    Engine(EngineError),
}

impl From<Fault> for Trap {
    fn from(f: Fault) -> Self {
        Trap::Fault(f)
    }
}

impl From<EngineError> for Trap {
    fn from(e: EngineError) -> Self {
        Trap::Engine(e)
    }
}

impl From<NativeError> for Trap {
    fn from(e: NativeError) -> Self {
        match e {
            NativeError::Fault(f) => Trap::Fault(f),
            NativeError::Engine(e) => Trap::Engine(e),
        }
    }
}

fn underflow() -> Fault {
    Fault::type_error("operand stack underflow")
}

fn pop(stack: &mut Vec<Value>) -> Result<Value, Fault> {
    stack.pop().ok_or_else(underflow)
}

fn pop_int(stack: &mut Vec<Value>) -> Result<i32, Fault> {
    pop(stack)?.as_int()
}

fn pop_args(stack: &mut Vec<Value>, argc: u8) -> Result<Vec<Value>, Fault> {
    let at = stack
        .len()
        .checked_sub(usize::from(argc))
        .ok_or_else(underflow)?;
    Ok(stack.split_off(at))
}

fn index(i: i32, len: usize) -> Result<usize, Fault> {
    usize::try_from(i).ok().filter(|&i| i < len).ok_or_else(|| {
        Fault::new(
            FaultClass::Index,
            format!("index {i} out of bounds for length {len}"),
        )
    })
}

fn shift(b: i32) -> u32 {
    u32::from_ne_bytes(b.to_ne_bytes())
}

fn binary(op: &Op, a: i32, b: i32) -> Result<Value, Fault> {
    let divide_by_zero = || Fault::new(FaultClass::Arithmetic, "/ by zero");
    Ok(match op {
        Op::Add => a.wrapping_add(b).into(),
        Op::Sub => a.wrapping_sub(b).into(),
        Op::Mul => a.wrapping_mul(b).into(),
        Op::Div if b == 0 => return Err(divide_by_zero()),
        Op::Div => a.wrapping_div(b).into(),
        Op::Rem if b == 0 => return Err(divide_by_zero()),
        Op::Rem => a.wrapping_rem(b).into(),
        Op::And => (a & b).into(),
        Op::Or => (a | b).into(),
        Op::Xor => (a ^ b).into(),
        Op::Shl => a.wrapping_shl(shift(b)).into(),
        Op::Shr => a.wrapping_shr(shift(b)).into(),
        Op::Lt => (a < b).into(),
        Op::Le => (a <= b).into(),
        Op::Gt => (a > b).into(),
        Op::Ge => (a >= b).into(),
        _ => return Err(Fault::type_error("not a binary operation")),
    })
}

fn new_array(heap: &HeapMeter, len: i32) -> Result<Value, Fault> {
    let len = usize::try_from(len).map_err(|_| {
        Fault::new(FaultClass::Index, format!("negative array size {len}"))
    })?;
    let charge = heap.reserve(len)?;
    let items = vec![Value::Int(0); len];
    Ok(Value::Obj(Object::metered(
        ObjectKind::Array(std::cell::RefCell::new(items)),
        charge,
    )))
}

fn new_multi_array(heap: &HeapMeter, dims: &[i32]) -> Result<Value, Fault> {
    match dims {
        [] => Ok(Value::Null),
        [len] => new_array(heap, *len),
        [len, rest @ ..] => {
            let outer = new_array(heap, *len)?;
            let items = outer.as_obj()?.as_array()?;
            for slot in items.borrow_mut().iter_mut() {
                *slot = new_multi_array(heap, rest)?;
            }
            Ok(outer)
        }
    }
}

/// Interpreter state of one robot.
#[derive(Debug)]
pub struct Machine {
    frames: Vec<Frame>,
    heap: HeapMeter,
    max_depth: usize,
}

impl Machine {
    /// An idle machine with the given call-depth and heap caps.
    #[must_use]
    pub fn new(max_depth: usize, max_heap_cells: usize) -> Self {
        Self {
            frames: Vec::new(),
            heap: HeapMeter::new(max_heap_cells),
            max_depth,
        }
    }

    /// Whether no turn is in progress.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.frames.is_empty()
    }

    /// Live frames.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    /// Heap cells in use.
    #[must_use]
    pub fn heap_used(&self) -> usize {
        self.heap.used()
    }

    /// Begin a turn by invoking the entry routine, running the entry
    /// unit's static initializer first if it has not run.
    ///
    /// # Errors
    ///
    /// Returns an [`EngineError`] on an engine invariant violation.
    pub fn start_turn(
        &mut self,
        ctx: &mut ExecutionContext,
        monitor: &mut Monitor,
        env: &mut TurnEnv<'_>,
    ) -> Result<Exit, EngineError> {
        let entry = ctx.entry();
        let routine = ctx.entry_routine();
        if let Err(trap) =
            self.push_frame(ctx, monitor, env, entry, routine, Vec::new(), FrameKind::Entry)
        {
            return self.trap(ctx, monitor, env, trap);
        }
        if let Err(trap) = self.init_if_needed(ctx, monitor, env, entry, false) {
            return self.trap(ctx, monitor, env, trap);
        }
        self.resume(ctx, monitor, env)
    }

    /// Continue the paused turn.
    ///
    /// # Errors
    ///
    /// Returns an [`EngineError`] on an engine invariant violation.
    pub fn resume(
        &mut self,
        ctx: &mut ExecutionContext,
        monitor: &mut Monitor,
        env: &mut TurnEnv<'_>,
    ) -> Result<Exit, EngineError> {
        loop {
            match self.run_frame(ctx, monitor, env) {
                Ok(Flow::Continue) => {}
                Ok(Flow::Exit(exit)) => return Ok(exit),
                Err(trap) => {
                    if let Some(exit) = self.handle(ctx, monitor, env, trap)? {
                        return Ok(exit);
                    }
                }
            }
        }
    }

    /// Raise the termination signal wherever the robot is and run until it
    /// reaches the top.
    ///
    /// # Errors
    ///
    /// Returns an [`EngineError`] on an engine invariant violation.
    pub fn kill(
        &mut self,
        ctx: &mut ExecutionContext,
        monitor: &mut Monitor,
        env: &mut TurnEnv<'_>,
    ) -> Result<Exit, EngineError> {
        self.trap(ctx, monitor, env, Trap::Fault(Fault::death()))
    }

    /// Drop every frame without running anything, closing profiled frames.
    pub fn abandon(&mut self, at: i64, mut profiler: Option<&mut Profiler>) {
        while let Some(frame) = self.frames.pop() {
            if frame.profiled {
                if let Some(p) = profiler.as_deref_mut() {
                    p.close(at);
                }
            }
        }
    }

    fn trap(
        &mut self,
        ctx: &mut ExecutionContext,
        monitor: &mut Monitor,
        env: &mut TurnEnv<'_>,
        trap: Trap,
    ) -> Result<Exit, EngineError> {
        match self.handle(ctx, monitor, env, trap)? {
            Some(exit) => Ok(exit),
            None => self.resume(ctx, monitor, env),
        }
    }

    /// Unwind for a trap. `Some` when the program ended.
    fn handle(
        &mut self,
        ctx: &mut ExecutionContext,
        monitor: &Monitor,
        env: &mut TurnEnv<'_>,
        trap: Trap,
    ) -> Result<Option<Exit>, EngineError> {
        let thrown = match trap {
            Trap::Engine(e) => return Err(e),
            Trap::Throw(obj) => obj,
            Trap::Fault(mut fault) => {
                if fault.origin.is_none() {
                    fault.origin = self.origin(ctx);
                }
                Object::unmetered(ObjectKind::Fault(fault))
            }
        };
        Ok(self.unwind(ctx, monitor, env, thrown))
    }

    fn origin(&self, ctx: &ExecutionContext) -> Option<String> {
        let frame = self.frames.last()?;
        let routine = &frame.image.unit().routines[frame.routine];
        Some(format!(
            "{}.{}+{}",
            ctx.unit_name(frame.unit),
            routine.name,
            frame.pc.saturating_sub(1)
        ))
    }

    fn unwind(
        &mut self,
        ctx: &mut ExecutionContext,
        monitor: &Monitor,
        env: &mut TurnEnv<'_>,
        mut thrown: Rc<Object>,
    ) -> Option<Exit> {
        loop {
            let class = match &thrown.kind {
                ObjectKind::Fault(f) => f.class,
                _ => FaultClass::Type,
            };
            let Some(frame) = self.frames.last_mut() else {
                return Some(Exit::Terminated(match &thrown.kind {
                    ObjectKind::Fault(f) if f.class == FaultClass::Death => Termination::Killed,
                    ObjectKind::Fault(f) => Termination::Fault(f.clone()),
                    _ => Termination::Fault(Fault::type_error("non-error value thrown")),
                }));
            };
            let site = frame.pc.saturating_sub(1);
            let handler = frame.image.unit().routines[frame.routine]
                .handlers
                .iter()
                .find(|h| h.covers(site) && class.matches(h.class.as_deref()))
                .map(|h| h.target);
            if let Some(target) = handler {
                frame.stack.clear();
                frame.stack.push(Value::Obj(thrown));
                frame.pc = target;
                return None;
            }

            let Some(frame) = self.frames.pop() else {
                continue;
            };
            if frame.profiled {
                if let Some(p) = env.profiler.as_deref_mut() {
                    p.close(monitor.logical_time());
                }
            }
            if let FrameKind::Init { .. } = frame.kind {
                ctx.set_init_state(frame.unit, InitState::Failed);
                if !class.is_vm_error() {
                    let cause = match &thrown.kind {
                        ObjectKind::Fault(f) => f.to_string(),
                        _ => class.to_string(),
                    };
                    let mut fault = Fault::new(
                        FaultClass::Init,
                        format!("{} failed to initialize: {cause}", ctx.unit_name(frame.unit)),
                    );
                    fault.origin = self.origin(ctx);
                    thrown = Object::unmetered(ObjectKind::Fault(fault));
                }
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn push_frame(
        &mut self,
        ctx: &ExecutionContext,
        monitor: &Monitor,
        env: &mut TurnEnv<'_>,
        unit: UnitId,
        routine: usize,
        args: Vec<Value>,
        kind: FrameKind,
    ) -> Result<(), Trap> {
        if self.frames.len() >= self.max_depth {
            return Err(Fault::new(
                FaultClass::StackOverflow,
                format!("call depth exceeds {}", self.max_depth),
            )
            .into());
        }
        let image = ctx
            .image(unit)
            .cloned()
            .ok_or_else(|| Fault::type_error("call into a native unit as IR"))?;
        let body = &image.unit().routines[routine];
        let mut locals = args;
        locals.resize(usize::from(body.locals), Value::Null);
        let profiled = ctx.is_player_unit(unit) && env.profiler.is_some();
        if profiled {
            if let Some(p) = env.profiler.as_deref_mut() {
                p.open(
                    &format!("{}.{}", ctx.unit_name(unit), body.name),
                    monitor.logical_time(),
                );
            }
        }
        self.frames.push(Frame {
            unit,
            image,
            routine,
            pc: 0,
            locals,
            stack: Vec::new(),
            kind,
            profiled,
        });
        Ok(())
    }

    /// Push the unit's static initializer if it has not run. Returns
    /// whether a frame was pushed.
    fn init_if_needed(
        &mut self,
        ctx: &mut ExecutionContext,
        monitor: &Monitor,
        env: &mut TurnEnv<'_>,
        unit: UnitId,
        retry: bool,
    ) -> Result<bool, Trap> {
        match ctx.init_state(unit) {
            InitState::Running | InitState::Done => Ok(false),
            InitState::Failed => Err(Fault::new(
                FaultClass::Init,
                format!("{} failed to initialize", ctx.unit_name(unit)),
            )
            .into()),
            InitState::Pending => {
                let init = ctx
                    .image(unit)
                    .and_then(|image| image.unit().routine_index(STATIC_INIT));
                let Some(init) = init else {
                    ctx.set_init_state(unit, InitState::Done);
                    return Ok(false);
                };
                ctx.set_init_state(unit, InitState::Running);
                self.push_frame(ctx, monitor, env, unit, init, Vec::new(), FrameKind::Init { retry })?;
                Ok(true)
            }
        }
    }

    fn call(
        &mut self,
        ctx: &mut ExecutionContext,
        monitor: &mut Monitor,
        env: &mut TurnEnv<'_>,
        target: &MethodRef,
    ) -> Result<Flow, Trap> {
        match ctx.resolve(target)? {
            Callee::Routine { unit, index } => {
                if self.init_if_needed(ctx, monitor, env, unit, true)? {
                    return Ok(Flow::Continue);
                }
                let frame = self.frames.last_mut().ok_or_else(underflow)?;
                let args = pop_args(&mut frame.stack, target.argc)?;
                self.push_frame(ctx, monitor, env, unit, index, args, FrameKind::Call)?;
                Ok(Flow::Continue)
            }
            Callee::Native(native) => {
                let frame = self.frames.last_mut().ok_or_else(underflow)?;
                let args = pop_args(&mut frame.stack, target.argc)?;
                let mut cx = NativeCx {
                    routine: native.name,
                    monitor: &mut *monitor,
                    heap: &self.heap,
                    support: ctx.support_mut(),
                    env: &mut *env,
                    signal: None,
                };
                let result = (native.call)(&mut cx, &args);
                let signal = cx.signal;
                if signal == Some(Signal::Die) {
                    monitor.kill();
                    return Err(Fault::death().into());
                }
                let value = result?;
                let frame = self.frames.last_mut().ok_or_else(underflow)?;
                frame.stack.push(value);
                if signal == Some(Signal::Yield) {
                    monitor.yield_turn();
                    return Ok(Flow::Exit(Exit::Yielded));
                }
                Ok(Flow::Continue)
            }
        }
    }

    fn ret(
        &mut self,
        ctx: &mut ExecutionContext,
        monitor: &mut Monitor,
        env: &mut TurnEnv<'_>,
        value: Value,
    ) -> Result<Flow, Trap> {
        let frame = self.frames.pop().ok_or_else(underflow)?;
        if frame.profiled {
            if let Some(p) = env.profiler.as_deref_mut() {
                p.close(monitor.logical_time());
            }
        }
        match frame.kind {
            FrameKind::Entry => {
                monitor.end_turn();
                Ok(Flow::Exit(Exit::TurnComplete))
            }
            FrameKind::Call => {
                let caller = self.frames.last_mut().ok_or_else(underflow)?;
                caller.stack.push(value);
                Ok(Flow::Continue)
            }
            FrameKind::Init { retry } => {
                ctx.set_init_state(frame.unit, InitState::Done);
                if retry {
                    let caller = self.frames.last_mut().ok_or_else(underflow)?;
                    caller.pc = caller.pc.saturating_sub(1);
                }
                Ok(Flow::Continue)
            }
        }
    }

    /// Run the top frame until the frame stack changes or the interpreter
    /// must leave.
    #[allow(clippy::too_many_lines)]
    fn run_frame(
        &mut self,
        ctx: &mut ExecutionContext,
        monitor: &mut Monitor,
        env: &mut TurnEnv<'_>,
    ) -> Result<Flow, Trap> {
        let Some(top) = self.frames.last() else {
            return Ok(Flow::Exit(Exit::TurnComplete));
        };
        let image = Arc::clone(&top.image);
        let code = &image.unit().routines[top.routine].code;

        loop {
            let frame = self.frames.last_mut().ok_or_else(underflow)?;
            let op = code
                .get(frame.pc)
                .ok_or_else(|| Fault::type_error("control ran past the end of the routine"))?;
            frame.pc += 1;
            let stack = &mut frame.stack;
            match op {
                Op::Nop => {}
                Op::Push(v) => stack.push(Value::Int(*v)),
                Op::PushStr(s) => stack.push(Value::str(s)),
                Op::PushNull => stack.push(Value::Null),
                Op::Pop | Op::MonitorEnter | Op::MonitorExit => {
                    pop(stack)?;
                }
                Op::Dup => {
                    let top = stack.last().cloned().ok_or_else(underflow)?;
                    stack.push(top);
                }
                Op::Swap => {
                    let b = pop(stack)?;
                    let a = pop(stack)?;
                    stack.push(b);
                    stack.push(a);
                }
                Op::Load(slot) => {
                    let v = frame.locals[usize::from(*slot)].clone();
                    frame.stack.push(v);
                }
                Op::Store(slot) => {
                    let v = pop(stack)?;
                    frame.locals[usize::from(*slot)] = v;
                }
                Op::Add
                | Op::Sub
                | Op::Mul
                | Op::Div
                | Op::Rem
                | Op::And
                | Op::Or
                | Op::Xor
                | Op::Shl
                | Op::Shr
                | Op::Lt
                | Op::Le
                | Op::Gt
                | Op::Ge => {
                    let b = pop_int(stack)?;
                    let a = pop_int(stack)?;
                    stack.push(binary(op, a, b)?);
                }
                Op::Neg => {
                    let a = pop_int(stack)?;
                    stack.push(Value::Int(a.wrapping_neg()));
                }
                Op::Eq | Op::Ne => {
                    let b = pop(stack)?;
                    let a = pop(stack)?;
                    stack.push(Value::from(a.same(&b) == matches!(op, Op::Eq)));
                }
                Op::GetStatic(field) => {
                    let (unit, slot) = ctx.static_slot(field)?;
                    if self.init_if_needed(ctx, monitor, env, unit, true)? {
                        return Ok(Flow::Continue);
                    }
                    let v = ctx.statics_mut(unit)[slot].clone();
                    self.frames.last_mut().ok_or_else(underflow)?.stack.push(v);
                }
                Op::PutStatic(field) => {
                    let (unit, slot) = ctx.static_slot(field)?;
                    if self.init_if_needed(ctx, monitor, env, unit, true)? {
                        return Ok(Flow::Continue);
                    }
                    let v = pop(&mut self.frames.last_mut().ok_or_else(underflow)?.stack)?;
                    ctx.statics_mut(unit)[slot] = v;
                }
                Op::NewArray => {
                    let len = pop_int(stack)?;
                    stack.push(new_array(&self.heap, len)?);
                }
                Op::NewMultiArray(d) => {
                    let dims = pop_args(stack, *d)?
                        .iter()
                        .map(Value::as_int)
                        .collect::<Result<Vec<_>, _>>()?;
                    stack.push(new_multi_array(&self.heap, &dims)?);
                }
                Op::ArrayLoad => {
                    let i = pop_int(stack)?;
                    let array = pop(stack)?;
                    let items = array.as_obj()?.as_array()?.borrow();
                    let v = items[index(i, items.len())?].clone();
                    drop(items);
                    stack.push(v);
                }
                Op::ArrayStore => {
                    let v = pop(stack)?;
                    let i = pop_int(stack)?;
                    let array = pop(stack)?;
                    let mut items = array.as_obj()?.as_array()?.borrow_mut();
                    let at = index(i, items.len())?;
                    items[at] = v;
                }
                Op::ArrayLen => {
                    let array = pop(stack)?;
                    let len = array.as_obj()?.as_array()?.borrow().len();
                    stack.push(Value::Int(i32::try_from(len).unwrap_or(i32::MAX)));
                }
                Op::Jump(t) => frame.pc = *t,
                Op::JumpIf(t) => {
                    if pop(stack)?.is_truthy() {
                        frame.pc = *t;
                    }
                }
                Op::JumpIfNot(t) => {
                    if !pop(stack)?.is_truthy() {
                        frame.pc = *t;
                    }
                }
                Op::Call(target) => return self.call(ctx, monitor, env, target),
                Op::Return => return self.ret(ctx, monitor, env, Value::Null),
                Op::ReturnValue => {
                    let v = pop(stack)?;
                    return self.ret(ctx, monitor, env, v);
                }
                Op::Throw => {
                    return Err(match pop(stack)? {
                        Value::Obj(obj) if matches!(obj.kind, ObjectKind::Fault(_)) => {
                            Trap::Throw(obj)
                        }
                        Value::Null => Fault::new(FaultClass::Null, "throw of null").into(),
                        other => {
                            Fault::type_error(format!("cannot throw {}", other.kind())).into()
                        }
                    });
                }
                Op::Charge(n) => match monitor.charge(*n) {
                    ChargeOutcome::Continue => {}
                    ChargeOutcome::Pause => return Ok(Flow::Exit(Exit::Paused)),
                    ChargeOutcome::Die => return Err(Fault::death().into()),
                },
                Op::ChargeArray => {
                    if let Some(Value::Int(len)) = stack.last() {
                        monitor.defer(array_cost(*len));
                    }
                }
                Op::ChargeMultiArray(d) => {
                    let at = stack.len().saturating_sub(usize::from(*d));
                    let dims: Vec<i32> = stack[at..]
                        .iter()
                        .map(|v| v.as_int().unwrap_or(0))
                        .collect();
                    monitor.defer(multi_array_cost(&dims));
                }
                Op::EnterDebug => monitor.enter_debug(),
                Op::ExitDebug => monitor.exit_debug()?,
            }
        }
    }
}
