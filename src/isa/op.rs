//! Stack-machine operations and the code-unit container.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A reference to a routine in some unit, with its argument count.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MethodRef {
    /// Fully-qualified unit name, e.g. `team/nav/Pathing`.
    pub unit: String,
    /// Routine name within the unit.
    pub name: String,
    /// Number of stack values consumed as arguments.
    pub argc: u8,
}

impl MethodRef {
    /// Build a method reference.
    #[must_use]
    pub fn new(unit: impl Into<String>, name: impl Into<String>, argc: u8) -> Self {
        Self {
            unit: unit.into(),
            name: name.into(),
            argc,
        }
    }

    /// Whether this names a debug-only routine.
    #[must_use]
    pub fn is_debug(&self) -> bool {
        is_debug_name(&self.name)
    }
}

impl fmt::Display for MethodRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.unit, self.name)
    }
}

/// A reference to a static field of a unit.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FieldRef {
    /// Owning unit.
    pub unit: String,
    /// Field name.
    pub name: String,
}

impl fmt::Display for FieldRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.unit, self.name)
    }
}

/// One stack-machine operation.
///
/// Jump targets are absolute op indices within the routine. Every call
/// pushes exactly one result; routines without a meaningful result return
/// null.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Op {
    /// Do nothing.
    Nop,
    /// Push an integer constant.
    Push(i32),
    /// Push a string constant.
    PushStr(String),
    /// Push null.
    PushNull,
    /// Discard the top value.
    Pop,
    /// Duplicate the top value.
    Dup,
    /// Swap the top two values.
    Swap,
    /// Push local slot.
    Load(u16),
    /// Pop into local slot.
    Store(u16),

    /// Wrapping integer add.
    Add,
    /// Wrapping integer subtract.
    Sub,
    /// Wrapping integer multiply.
    Mul,
    /// Integer divide; faults on zero divisor.
    Div,
    /// Integer remainder; faults on zero divisor.
    Rem,
    /// Wrapping negate.
    Neg,
    /// Bitwise and.
    And,
    /// Bitwise or.
    Or,
    /// Bitwise xor.
    Xor,
    /// Shift left by the low five bits.
    Shl,
    /// Arithmetic shift right by the low five bits.
    Shr,
    /// Push 1 if equal, else 0.
    Eq,
    /// Push 1 if not equal, else 0.
    Ne,
    /// Signed less-than.
    Lt,
    /// Signed less-or-equal.
    Le,
    /// Signed greater-than.
    Gt,
    /// Signed greater-or-equal.
    Ge,

    /// Push a static field.
    GetStatic(FieldRef),
    /// Pop into a static field.
    PutStatic(FieldRef),

    /// Pop a length and push a new zero-filled array.
    NewArray,
    /// Pop `n` dimensions (outermost first) and push a nested array.
    NewMultiArray(u8),
    /// Pop index and array, push element.
    ArrayLoad,
    /// Pop value, index and array, store element.
    ArrayStore,
    /// Pop an array, push its length.
    ArrayLen,

    /// Unconditional jump.
    Jump(usize),
    /// Pop; jump when non-zero.
    JumpIf(usize),
    /// Pop; jump when zero.
    JumpIfNot(usize),
    /// Call a routine.
    Call(MethodRef),
    /// Return null to the caller.
    Return,
    /// Pop and return the value to the caller.
    ReturnValue,
    /// Pop and raise the value as a fault.
    Throw,
    /// Acquire a lock on the popped value.
    MonitorEnter,
    /// Release a lock on the popped value.
    MonitorExit,

    /// Flush `n` units of accumulated block cost to the monitor.
    Charge(u32),
    /// Defer `max(1, top)` units of cost without popping.
    ChargeArray,
    /// Defer the product of the top `n` dimensions without popping.
    ChargeMultiArray(u8),
    /// Enter debug mode: charges are suspended until the matching exit.
    EnterDebug,
    /// Leave debug mode.
    ExitDebug,
}

impl Op {
    /// Whether control never falls through to the next op.
    #[must_use]
    pub fn is_terminator(&self) -> bool {
        matches!(self, Op::Jump(_) | Op::Return | Op::ReturnValue | Op::Throw)
    }

    /// The jump target, if this op branches.
    #[must_use]
    pub fn target(&self) -> Option<usize> {
        match self {
            Op::Jump(t) | Op::JumpIf(t) | Op::JumpIfNot(t) => Some(*t),
            _ => None,
        }
    }

    /// Mutable access to the jump target, if this op branches.
    pub fn target_mut(&mut self) -> Option<&mut usize> {
        match self {
            Op::Jump(t) | Op::JumpIf(t) | Op::JumpIfNot(t) => Some(t),
            _ => None,
        }
    }

    /// Whether only the rewriter may emit this op.
    #[must_use]
    pub fn is_instrumentation(&self) -> bool {
        matches!(
            self,
            Op::Charge(_) | Op::ChargeArray | Op::ChargeMultiArray(_) | Op::EnterDebug | Op::ExitDebug
        )
    }
}

/// A fault handler entry. Handlers are searched in table order and the
/// first one whose range covers the faulting op and whose class matches wins.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Handler {
    /// First covered op index.
    pub start: usize,
    /// One past the last covered op index.
    pub end: usize,
    /// Op index of the handler code.
    pub target: usize,
    /// Fault class filter; `None` catches everything.
    pub class: Option<String>,
}

impl Handler {
    /// Whether the op at `pc` is inside this handler's range.
    #[inline]
    #[must_use]
    pub fn covers(&self, pc: usize) -> bool {
        self.start <= pc && pc < self.end
    }
}

/// One routine of a code unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Routine {
    /// Routine name.
    pub name: String,
    /// Number of parameters, copied into the first local slots.
    pub params: u16,
    /// Total local slots including parameters.
    pub locals: u16,
    /// Operations.
    pub code: Vec<Op>,
    /// Fault handler table.
    pub handlers: Vec<Handler>,
}

impl Routine {
    /// Whether this is a debug-only routine.
    #[must_use]
    pub fn is_debug(&self) -> bool {
        is_debug_name(&self.name)
    }
}

/// One named, independently loadable module of a program.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeUnit {
    /// Fully-qualified unit name.
    pub name: String,
    /// Declared static fields, in slot order.
    pub statics: Vec<String>,
    /// Routines.
    pub routines: Vec<Routine>,
}

/// Name of the static initializer routine.
pub const STATIC_INIT: &str = "<clinit>";

/// Routine-name prefix that marks debug-only routines.
pub const DEBUG_PREFIX: &str = "debug_";

impl CodeUnit {
    /// Find a routine by name.
    #[must_use]
    pub fn routine(&self, name: &str) -> Option<&Routine> {
        self.routines.iter().find(|r| r.name == name)
    }

    /// Index of a routine by name.
    #[must_use]
    pub fn routine_index(&self, name: &str) -> Option<usize> {
        self.routines.iter().position(|r| r.name == name)
    }

    /// Slot of a static field by name.
    #[must_use]
    pub fn static_slot(&self, name: &str) -> Option<usize> {
        self.statics.iter().position(|s| s == name)
    }

    /// Whether the unit has a static initializer.
    #[must_use]
    pub fn has_static_init(&self) -> bool {
        self.routine(STATIC_INIT).is_some()
    }
}

fn is_debug_name(name: &str) -> bool {
    name.starts_with(DEBUG_PREFIX)
}
