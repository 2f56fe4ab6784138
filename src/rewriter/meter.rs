//! Per-routine instrumentation: basic-block metering, call redirection,
//! lock stripping, and the injected debug and death handlers.

use std::collections::BTreeSet;

use crate::cost::{CostTable, OpClass};
use crate::isa::{Handler, MethodRef, Op, Routine};
use crate::vm::VM_ERROR;

use super::policy::{self, CallKind, Redirect, Rejection};

/// Inputs shared by every routine of one unit.
pub(super) struct Meter<'a> {
    pub(super) costs: &'a CostTable,
    pub(super) check: bool,
    pub(super) debug_methods: bool,
    pub(super) is_program: &'a dyn Fn(&str) -> bool,
}

/// How one original call is emitted.
enum CallPlan {
    /// Drop the call: pop its arguments and push null, at no cost.
    Elide(u8),
    /// Emit `ops`, charging `cost`, flushing first when `flush` is set.
    /// Calls into sandboxed code always charge at least one unit.
    Emit {
        ops: Vec<Op>,
        cost: u32,
        flush: bool,
        sandboxed: bool,
    },
}

/// Op indices that begin a basic block.
fn leaders(routine: &Routine) -> Vec<bool> {
    let len = routine.code.len();
    let mut lead = vec![false; len + 1];
    lead[0] = true;
    for (pc, op) in routine.code.iter().enumerate() {
        if let Some(t) = op.target() {
            lead[t] = true;
        }
        if op.is_terminator() || op.target().is_some() {
            lead[pc + 1] = true;
        }
    }
    for h in &routine.handlers {
        lead[h.start] = true;
        lead[h.end] = true;
        lead[h.target] = true;
    }
    lead
}

impl Meter<'_> {
    fn plan_call(&self, target: &MethodRef) -> Result<CallPlan, Rejection> {
        let kind = policy::classify_call(target, self.check, self.costs, self.is_program)?;
        let call_cost = self.costs.op(OpClass::Call);
        match kind {
            CallKind::Program if target.is_debug() && !self.debug_methods => {
                Ok(CallPlan::Elide(target.argc))
            }
            CallKind::Program | CallKind::Library | CallKind::Unresolved => Ok(CallPlan::Emit {
                ops: vec![Op::Call(target.clone())],
                cost: call_cost,
                flush: true,
                sandboxed: true,
            }),
            CallKind::Native => {
                let listed = self.costs.routine(&target.unit, &target.name);
                let (cost, mut flush) = listed.map_or((call_cost, true), |c| (c.cost, c.ends_block));
                let ops = match policy::redirect(target) {
                    Some(Redirect::To(to)) => {
                        flush = true;
                        vec![Op::Call(to)]
                    }
                    Some(Redirect::SeededRandom) => {
                        flush = true;
                        vec![
                            Op::Call(MethodRef::new("sys/Monitor", "randomSeed", 0)),
                            Op::Call(MethodRef::new("std/Random", "withSeed", 1)),
                        ]
                    }
                    None => vec![Op::Call(target.clone())],
                };
                Ok(CallPlan::Emit {
                    ops,
                    cost,
                    flush,
                    sandboxed: false,
                })
            }
        }
    }

    /// Instrument one routine.
    pub(super) fn instrument(&self, routine: &Routine) -> Result<Routine, Rejection> {
        let len = routine.code.len();
        let lead = leaders(routine);
        let handler_targets: BTreeSet<usize> = routine.handlers.iter().map(|h| h.target).collect();
        let wrap_debug = routine.is_debug() && self.debug_methods && self.check;

        let mut out: Vec<Op> = Vec::with_capacity(len + len / 2);
        let mut map = vec![0usize; len + 1];
        let mut pending: u32 = 0;

        for (pc, op) in routine.code.iter().enumerate() {
            if pc != 0 && lead[pc] {
                flush(&mut out, &mut pending, false);
            }
            map[pc] = out.len();
            if handler_targets.contains(&pc) {
                pending = pending.saturating_add(self.costs.op(OpClass::HandlerEntry));
            }
            let class_cost = self.costs.op(OpClass::of(op));
            match op {
                Op::Jump(_) | Op::JumpIf(_) | Op::JumpIfNot(_) | Op::Throw => {
                    pending = pending.saturating_add(class_cost);
                    flush(&mut out, &mut pending, true);
                    out.push(op.clone());
                }
                Op::Return | Op::ReturnValue => {
                    pending = pending.saturating_add(class_cost);
                    flush(&mut out, &mut pending, true);
                    if wrap_debug {
                        out.push(Op::ExitDebug);
                    }
                    out.push(op.clone());
                }
                Op::MonitorEnter | Op::MonitorExit => {
                    pending = pending.saturating_add(class_cost);
                    out.push(Op::Pop);
                }
                Op::NewArray => {
                    out.push(Op::ChargeArray);
                    out.push(Op::NewArray);
                }
                Op::NewMultiArray(dims) => {
                    out.push(Op::ChargeMultiArray(*dims));
                    out.push(op.clone());
                }
                Op::Call(target) => match self.plan_call(target)? {
                    CallPlan::Elide(argc) => {
                        out.extend(std::iter::repeat_n(Op::Pop, usize::from(argc)));
                        out.push(Op::PushNull);
                    }
                    CallPlan::Emit {
                        ops,
                        cost,
                        flush: must_flush,
                        sandboxed,
                    } => {
                        pending = pending.saturating_add(cost);
                        if must_flush {
                            flush(&mut out, &mut pending, sandboxed);
                        }
                        out.extend(ops);
                    }
                },
                other if other.is_instrumentation() && self.check => {
                    return Err(Rejection(format!(
                        "reserved instruction {} at op {pc}",
                        crate::isa::mnemonic(other)
                    )));
                }
                other => {
                    pending = pending.saturating_add(class_cost);
                    out.push(other.clone());
                }
            }
        }
        map[len] = out.len();

        for op in &mut out {
            if let Some(t) = op.target_mut() {
                *t = map[*t];
            }
        }
        let mut handlers: Vec<Handler> = routine
            .handlers
            .iter()
            .map(|h| Handler {
                start: map[h.start],
                end: map[h.end],
                target: map[h.target],
                class: h.class.clone(),
            })
            .collect();

        if wrap_debug {
            wrap_in_debug(&mut out, &mut handlers);
        }
        if !routine.handlers.is_empty() {
            add_death_handler(&mut out, &mut handlers);
        }

        Ok(Routine {
            name: routine.name.clone(),
            params: routine.params,
            locals: routine.locals,
            code: out,
            handlers,
        })
    }
}

/// Emit the accumulated block cost. Terminators and sandboxed calls always
/// charge at least one unit so every loop back-edge and recursion step is a
/// suspension point.
fn flush(out: &mut Vec<Op>, pending: &mut u32, at_least_one: bool) {
    let amount = if at_least_one { (*pending).max(1) } else { *pending };
    if amount > 0 {
        out.push(Op::Charge(amount));
    }
    *pending = 0;
}

/// Prepend a debug-mode entry and append a catch-all that leaves debug mode
/// before re-raising.
fn wrap_in_debug(code: &mut Vec<Op>, handlers: &mut Vec<Handler>) {
    code.insert(0, Op::EnterDebug);
    for op in code.iter_mut() {
        if let Some(t) = op.target_mut() {
            *t += 1;
        }
    }
    for h in handlers.iter_mut() {
        h.start += 1;
        h.end += 1;
        h.target += 1;
    }
    let body_end = code.len();
    code.push(Op::ExitDebug);
    code.push(Op::Throw);
    handlers.push(Handler {
        start: 0,
        end: body_end,
        target: body_end,
        class: None,
    });
}

/// Put a handler at the front of the table that re-raises every VM fault,
/// covering the whole body, so player handlers never observe them.
fn add_death_handler(code: &mut Vec<Op>, handlers: &mut Vec<Handler>) {
    let body_end = code.len();
    code.push(Op::Throw);
    handlers.insert(0, Handler {
        start: 0,
        end: body_end,
        target: body_end,
        class: Some(VM_ERROR.to_string()),
    });
}
