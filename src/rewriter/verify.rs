//! Structural verification of a code unit before it is instrumented.
//!
//! Everything here is checked for trusted and untrusted units alike: the
//! interpreter relies on these properties and never re-checks them.

use std::collections::HashSet;

use crate::isa::{CodeUnit, Op, Routine};

/// Verify a whole unit, returning a description of the first problem.
pub(crate) fn verify_unit(unit: &CodeUnit) -> Result<(), String> {
    let mut seen = HashSet::new();
    for field in &unit.statics {
        if !seen.insert(field.as_str()) {
            return Err(format!("static {field} declared twice"));
        }
    }
    let mut names = HashSet::new();
    for routine in &unit.routines {
        if !names.insert(routine.name.as_str()) {
            return Err(format!("routine {} declared twice", routine.name));
        }
        verify_routine(unit, routine).map_err(|e| format!("{}: {e}", routine.name))?;
    }
    Ok(())
}

fn verify_routine(unit: &CodeUnit, routine: &Routine) -> Result<(), String> {
    let len = routine.code.len();
    if routine.params > routine.locals {
        return Err(format!(
            "{} params but only {} locals",
            routine.params, routine.locals
        ));
    }
    match routine.code.last() {
        None => return Err("empty body".into()),
        Some(op) if !op.is_terminator() => {
            return Err("control falls off the end of the routine".into());
        }
        Some(_) => {}
    }

    for (pc, op) in routine.code.iter().enumerate() {
        if let Some(target) = op.target() {
            if target >= len {
                return Err(format!("op {pc} jumps to {target}, past the end"));
            }
        }
        match op {
            Op::Load(slot) | Op::Store(slot) if *slot >= routine.locals => {
                return Err(format!("op {pc} uses local {slot} of {}", routine.locals));
            }
            Op::GetStatic(field) | Op::PutStatic(field)
                if field.unit == unit.name && unit.static_slot(&field.name).is_none() =>
            {
                return Err(format!("op {pc} names undeclared static {field}"));
            }
            Op::Call(target) if target.unit == unit.name => {
                let callee = unit
                    .routine(&target.name)
                    .ok_or_else(|| format!("op {pc} calls undefined routine {target}"))?;
                if callee.params != u16::from(target.argc) {
                    return Err(format!(
                        "op {pc} calls {target} with {} args, expected {}",
                        target.argc, callee.params
                    ));
                }
            }
            Op::NewMultiArray(0) | Op::ChargeMultiArray(0) => {
                return Err(format!("op {pc} allocates zero dimensions"));
            }
            _ => {}
        }
    }

    for (i, h) in routine.handlers.iter().enumerate() {
        if h.start > h.end || h.end > len || h.target >= len {
            return Err(format!(
                "handler {i} range {}..{} -> {} is out of bounds",
                h.start, h.end, h.target
            ));
        }
    }
    Ok(())
}
