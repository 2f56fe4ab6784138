//! The program rewriter.
//!
//! Turns one untrusted [`CodeUnit`] into an equivalent unit that:
//!
//! - charges the monitor at the end of every basic block,
//! - reaches deterministic replacements instead of nondeterministic library
//!   primitives,
//! - cannot intercept the termination signal,
//! - references only the allowed library surface.
//!
//! Rewriting never changes what a well-formed, allowed program computes.

mod meter;
mod policy;
mod verify;

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::cost::CostTable;
use crate::error::InstrumentationError;
use crate::isa::{CodeUnit, Op};
use crate::vm::FaultClass;

pub(crate) use policy::is_reserved;

/// Options for one rewrite.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RewriteOptions {
    /// Reject forbidden constructs. Off only for engine-supplied units.
    pub check: bool,
    /// Keep `debug_*` routines live instead of eliding calls to them.
    pub debug_methods: bool,
}

impl RewriteOptions {
    /// Options for untrusted player code.
    #[must_use]
    pub fn player(debug_methods: bool) -> Self {
        Self {
            check: true,
            debug_methods,
        }
    }

    /// Options for trusted library code.
    #[must_use]
    pub fn trusted() -> Self {
        Self {
            check: false,
            debug_methods: false,
        }
    }
}

/// An instrumented unit, immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewrittenImage {
    unit: CodeUnit,
    references: BTreeSet<String>,
}

impl RewrittenImage {
    /// The instrumented unit.
    #[must_use]
    pub fn unit(&self) -> &CodeUnit {
        &self.unit
    }

    /// Unit name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.unit.name
    }

    /// Other units this one calls or whose statics it touches.
    #[must_use]
    pub fn references(&self) -> &BTreeSet<String> {
        &self.references
    }

    /// Serialize the image.
    ///
    /// # Errors
    ///
    /// Returns the serializer's error; this does not happen for images the
    /// rewriter produced.
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Deserialize an image produced by [`RewrittenImage::to_bytes`].
    ///
    /// # Errors
    ///
    /// Returns an error for bytes that are not a serialized image.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

/// Rewrite a unit with the built-in cost table.
///
/// `is_program` reports whether a unit name belongs to the program that
/// `unit` is part of.
///
/// # Errors
///
/// Returns an ILLEGAL [`InstrumentationError`] for malformed units and, when
/// checking, for any forbidden construct.
pub fn rewrite(
    unit: &CodeUnit,
    options: RewriteOptions,
    is_program: &dyn Fn(&str) -> bool,
) -> Result<RewrittenImage, InstrumentationError> {
    rewrite_with(unit, options, is_program, CostTable::builtin())
}

/// Rewrite a unit with an explicit cost table.
///
/// # Errors
///
/// See [`rewrite`].
pub fn rewrite_with(
    unit: &CodeUnit,
    options: RewriteOptions,
    is_program: &dyn Fn(&str) -> bool,
    costs: &CostTable,
) -> Result<RewrittenImage, InstrumentationError> {
    let illegal = |message: String| InstrumentationError::illegal(&unit.name, message);

    if options.check && is_reserved(&unit.name) {
        return Err(illegal(format!(
            "unit name {} lies in a reserved namespace",
            unit.name
        )));
    }
    verify::verify_unit(unit).map_err(|e| illegal(format!("malformed unit: {e}")))?;
    if options.check {
        check_statics_and_filters(unit).map_err(illegal)?;
    }

    let own = unit.name.as_str();
    let is_program_or_self = |name: &str| name == own || is_program(name);
    let meter = meter::Meter {
        costs,
        check: options.check,
        debug_methods: options.debug_methods,
        is_program: &is_program_or_self,
    };
    let mut routines = Vec::with_capacity(unit.routines.len());
    for routine in &unit.routines {
        let rewritten = meter
            .instrument(routine)
            .map_err(|rejection| illegal(format!("{}: {}", routine.name, rejection.0)))?;
        routines.push(rewritten);
    }

    let rewritten = CodeUnit {
        name: unit.name.clone(),
        statics: unit.statics.clone(),
        routines,
    };
    let references = collect_references(&rewritten);
    Ok(RewrittenImage {
        unit: rewritten,
        references,
    })
}

/// Player code may only touch statics of non-reserved units, and may only
/// catch ordinary fault classes.
fn check_statics_and_filters(unit: &CodeUnit) -> Result<(), String> {
    for routine in &unit.routines {
        for op in &routine.code {
            if let Op::GetStatic(field) | Op::PutStatic(field) = op {
                if is_reserved(&field.unit) {
                    return Err(format!("{}: static {field} is not accessible", routine.name));
                }
            }
        }
        for handler in &routine.handlers {
            if let Some(class) = &handler.class {
                if !FaultClass::is_player_filter(class) {
                    return Err(format!(
                        "{}: handler catches {class}, which player code may not name",
                        routine.name
                    ));
                }
            }
        }
    }
    Ok(())
}

fn collect_references(unit: &CodeUnit) -> BTreeSet<String> {
    let mut refs = BTreeSet::new();
    for op in unit.routines.iter().flat_map(|r| &r.code) {
        let owner = match op {
            Op::Call(m) => &m.unit,
            Op::GetStatic(f) | Op::PutStatic(f) => &f.unit,
            _ => continue,
        };
        if *owner != unit.name {
            refs.insert(owner.clone());
        }
    }
    refs
}
