//! The cost model: what each operation is charged, and which operations
//! force accumulated cost to be flushed to the monitor.
//!
//! The built-in table is embedded at compile time and parsed once. It is
//! shared read-only by every rewrite in the process.

use std::collections::HashMap;
use std::sync::LazyLock;

use thiserror::Error;

use crate::isa::Op;

/// Embedded cost table source.
const BUILTIN_TABLE: &str = include_str!("resources/costs.txt");

/// Default cost for ops and table-less calls.
pub const DEFAULT_COST: u32 = 1;

/// Extra cost charged on entry to a fault handler.
pub const DEFAULT_HANDLER_PENALTY: u32 = 500;

/// Coarse operation classes used for static block costs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpClass {
    /// Straight-line ops: stack, locals, arithmetic, statics, arrays.
    Simple,
    /// Conditional and unconditional jumps.
    Branch,
    /// Calls into sandboxed routines.
    Call,
    /// Returns.
    Return,
    /// Raising a fault.
    Throw,
    /// Entering a fault handler.
    HandlerEntry,
}

impl OpClass {
    const ALL: [OpClass; 6] = [
        OpClass::Simple,
        OpClass::Branch,
        OpClass::Call,
        OpClass::Return,
        OpClass::Throw,
        OpClass::HandlerEntry,
    ];

    fn key(self) -> &'static str {
        match self {
            OpClass::Simple => "op/simple",
            OpClass::Branch => "op/branch",
            OpClass::Call => "op/call",
            OpClass::Return => "op/return",
            OpClass::Throw => "op/throw",
            OpClass::HandlerEntry => "op/handler",
        }
    }

    fn index(self) -> usize {
        self as usize
    }

    /// Classify an op. Instrumentation ops are never classified by the
    /// rewriter since they never appear in its input.
    #[must_use]
    pub fn of(op: &Op) -> OpClass {
        match op {
            Op::Jump(_) | Op::JumpIf(_) | Op::JumpIfNot(_) => OpClass::Branch,
            Op::Call(_) => OpClass::Call,
            Op::Return | Op::ReturnValue => OpClass::Return,
            Op::Throw => OpClass::Throw,
            _ => OpClass::Simple,
        }
    }
}

/// Cost of one library routine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoutineCost {
    /// Units charged per call.
    pub cost: u32,
    /// Whether accumulated cost must be flushed before the call.
    pub ends_block: bool,
}

/// Error parsing a cost table.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("cost table line {line}: {message}")]
pub struct CostTableError {
    /// 1-based line number.
    pub line: usize,
    /// What went wrong.
    pub message: String,
}

/// Immutable cost table.
#[derive(Debug, Clone)]
pub struct CostTable {
    routines: HashMap<String, RoutineCost>,
    ops: [u32; 6],
}

impl Default for CostTable {
    fn default() -> Self {
        let mut ops = [DEFAULT_COST; 6];
        ops[OpClass::HandlerEntry.index()] = DEFAULT_HANDLER_PENALTY;
        Self {
            routines: HashMap::new(),
            ops,
        }
    }
}

static BUILTIN: LazyLock<CostTable> = LazyLock::new(|| {
    CostTable::parse(BUILTIN_TABLE).unwrap_or_else(|err| {
        tracing::error!(%err, "embedded cost table is malformed, using defaults");
        CostTable::default()
    })
});

impl CostTable {
    /// The process-wide built-in table.
    #[must_use]
    pub fn builtin() -> &'static CostTable {
        &BUILTIN
    }

    /// Parse a table from `<key> <cost> <ends_block>` lines.
    ///
    /// # Errors
    ///
    /// Returns a [`CostTableError`] for malformed lines, unknown op classes
    /// or duplicate keys.
    pub fn parse(text: &str) -> Result<Self, CostTableError> {
        let mut table = CostTable::default();
        for (idx, raw) in text.lines().enumerate() {
            let line = idx + 1;
            let content = raw.split('#').next().unwrap_or_default().trim();
            if content.is_empty() {
                continue;
            }
            let err = |message: String| CostTableError { line, message };
            let fields: Vec<&str> = content.split_whitespace().collect();
            let &[key, cost, ends] = fields.as_slice() else {
                return Err(err(format!("expected 3 fields, got {content:?}")));
            };
            let cost = cost
                .parse::<u32>()
                .map_err(|_| err(format!("bad cost {cost}")))?;
            let ends_block = ends
                .parse::<bool>()
                .map_err(|_| err(format!("bad flag {ends}")))?;

            if key.starts_with("op/") {
                let class = OpClass::ALL
                    .into_iter()
                    .find(|c| c.key() == key)
                    .ok_or_else(|| err(format!("unknown op class {key}")))?;
                table.ops[class.index()] = cost;
                continue;
            }
            if !key.contains('.') {
                return Err(err(format!("key {key} is not <unit>.<routine>")));
            }
            if table
                .routines
                .insert(key.to_string(), RoutineCost { cost, ends_block })
                .is_some()
            {
                return Err(err(format!("duplicate key {key}")));
            }
        }
        Ok(table)
    }

    /// Cost of a library routine, if it is on the table.
    #[must_use]
    pub fn routine(&self, unit: &str, name: &str) -> Option<RoutineCost> {
        self.routines.get(&format!("{unit}.{name}")).copied()
    }

    /// Whether a library routine is part of the allowed surface.
    #[must_use]
    pub fn allows(&self, unit: &str, name: &str) -> bool {
        self.routine(unit, name).is_some()
    }

    /// Static cost of an op class.
    #[inline]
    #[must_use]
    pub fn op(&self, class: OpClass) -> u32 {
        self.ops[class.index()]
    }

    /// Number of library routines in the table.
    #[must_use]
    pub fn len(&self) -> usize {
        self.routines.len()
    }

    /// Whether the table lists no library routines.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.routines.is_empty()
    }
}

/// Dynamic cost of allocating a one-dimensional array of `len` elements.
#[inline]
#[must_use]
pub fn array_cost(len: i32) -> i32 {
    len.max(1)
}

/// Dynamic cost of a multi-dimensional allocation: the product of every
/// dimension, each floored at 1, saturating at `i32::MAX`.
#[must_use]
pub fn multi_array_cost(dims: &[i32]) -> i32 {
    let mut product: i64 = 1;
    for &d in dims {
        product = product.saturating_mul(i64::from(d.max(1)));
        if product >= i64::from(i32::MAX) {
            return i32::MAX;
        }
    }
    i32::try_from(product).unwrap_or(i32::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_table_parses() {
        let table = CostTable::parse(BUILTIN_TABLE).unwrap();
        assert!(!table.is_empty());
        assert_eq!(table.op(OpClass::HandlerEntry), 500);
        assert_eq!(table.op(OpClass::Simple), 1);
    }

    #[test]
    fn test_routine_lookup() {
        let table = CostTable::builtin();
        let sense = table.routine("bc/RobotController", "senseNearbyRobots").unwrap();
        assert_eq!(sense.cost, 100);
        assert!(sense.ends_block);
        assert!(table.allows("std/Math", "abs"));
        assert!(!table.allows("std/Thread", "start"));
    }

    #[test]
    fn test_parse_rejects_duplicates_and_bad_lines() {
        let err = CostTable::parse("a/B.c 1 true\na/B.c 2 false").unwrap_err();
        assert_eq!(err.line, 2);
        assert!(CostTable::parse("a/B.c one true").is_err());
        assert!(CostTable::parse("op/teleport 3 false").is_err());
        assert!(CostTable::parse("nodot 3 false").is_err());
    }

    #[test]
    fn test_array_cost_floors_at_one() {
        assert_eq!(array_cost(0), 1);
        assert_eq!(array_cost(-100), 1);
        assert_eq!(array_cost(16), 16);
    }

    #[test]
    fn test_multi_array_cost() {
        assert_eq!(multi_array_cost(&[2, 3, 4]), 24);
        assert_eq!(multi_array_cost(&[0, -5, 7]), 7);
        assert_eq!(multi_array_cost(&[i32::MAX, 2]), i32::MAX);
        assert_eq!(multi_array_cost(&[65536, 65536]), i32::MAX);
    }
}
