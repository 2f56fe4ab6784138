//! Faults raised inside sandboxed code.
//!
//! Ordinary faults (`std/*`) can be caught by player handlers. VM faults
//! (`sys/*`) belong to the `sys/VmError` family: the rewriter makes sure
//! every player handler re-raises them, so they always reach the top of the
//! robot's frame stack.

use std::fmt;

/// Filter name matching every ordinary fault.
pub const ANY_ERROR: &str = "std/Error";

/// Filter name matching every VM fault.
pub const VM_ERROR: &str = "sys/VmError";

/// Class of a raised fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FaultClass {
    /// Raised explicitly by player code.
    Error,
    /// Division by zero.
    Arithmetic,
    /// Array index out of bounds, or a negative array size.
    Index,
    /// Null dereference.
    Null,
    /// Operand of the wrong kind, or a stack underflow.
    Type,
    /// A game action was rejected by the game layer.
    GameAction,
    /// An invalid regular expression.
    Regex,
    /// Touching a unit whose static initializer failed.
    Init,
    /// The robot has been killed. Never reported.
    Death,
    /// The robot exhausted its heap allowance.
    OutOfMemory,
    /// The robot exceeded the call depth limit.
    StackOverflow,
}

impl FaultClass {
    /// Every class, in a stable order.
    pub const ALL: [FaultClass; 11] = [
        FaultClass::Error,
        FaultClass::Arithmetic,
        FaultClass::Index,
        FaultClass::Null,
        FaultClass::Type,
        FaultClass::GameAction,
        FaultClass::Regex,
        FaultClass::Init,
        FaultClass::Death,
        FaultClass::OutOfMemory,
        FaultClass::StackOverflow,
    ];

    /// Qualified class name as seen by player code.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            FaultClass::Error => "std/Error",
            FaultClass::Arithmetic => "std/ArithmeticError",
            FaultClass::Index => "std/IndexError",
            FaultClass::Null => "std/NullError",
            FaultClass::Type => "std/TypeError",
            FaultClass::GameAction => "std/GameActionError",
            FaultClass::Regex => "std/RegexError",
            FaultClass::Init => "std/InitError",
            FaultClass::Death => "sys/Death",
            FaultClass::OutOfMemory => "sys/OutOfMemory",
            FaultClass::StackOverflow => "sys/StackOverflow",
        }
    }

    /// Whether this fault belongs to the uncatchable VM family.
    #[must_use]
    pub fn is_vm_error(self) -> bool {
        matches!(
            self,
            FaultClass::Death | FaultClass::OutOfMemory | FaultClass::StackOverflow
        )
    }

    /// Whether a handler with this filter catches this class.
    #[must_use]
    pub fn matches(self, filter: Option<&str>) -> bool {
        match filter {
            None => true,
            Some(VM_ERROR) => self.is_vm_error(),
            Some(ANY_ERROR) => !self.is_vm_error(),
            Some(name) => name == self.name(),
        }
    }

    /// Whether player code may name `filter` in a handler.
    #[must_use]
    pub fn is_player_filter(filter: &str) -> bool {
        filter == ANY_ERROR
            || FaultClass::ALL
                .iter()
                .any(|c| !c.is_vm_error() && c.name() == filter)
    }
}

impl fmt::Display for FaultClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A raised fault value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fault {
    /// Fault class.
    pub class: FaultClass,
    /// Message, possibly empty.
    pub message: String,
    /// Where the fault was first raised, as `unit.routine+pc`.
    pub origin: Option<String>,
}

impl Fault {
    /// Build a fault without an origin.
    #[must_use]
    pub fn new(class: FaultClass, message: impl Into<String>) -> Self {
        Self {
            class,
            message: message.into(),
            origin: None,
        }
    }

    /// The termination signal.
    #[must_use]
    pub fn death() -> Self {
        Self::new(FaultClass::Death, "")
    }

    /// Operand type mismatch.
    #[must_use]
    pub fn type_error(message: impl Into<String>) -> Self {
        Self::new(FaultClass::Type, message)
    }
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.class)?;
        if !self.message.is_empty() {
            write!(f, ": {}", self.message)?;
        }
        if let Some(origin) = &self.origin {
            write!(f, " (at {origin})")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vm_errors_only_match_vm_filter_or_catch_all() {
        assert!(FaultClass::Death.matches(None));
        assert!(FaultClass::Death.matches(Some(VM_ERROR)));
        assert!(!FaultClass::Death.matches(Some(ANY_ERROR)));
        assert!(!FaultClass::StackOverflow.matches(Some("std/ArithmeticError")));
    }

    #[test]
    fn test_ordinary_filters() {
        assert!(FaultClass::Arithmetic.matches(Some(ANY_ERROR)));
        assert!(FaultClass::Arithmetic.matches(Some("std/ArithmeticError")));
        assert!(!FaultClass::Arithmetic.matches(Some("std/IndexError")));
        assert!(!FaultClass::Index.matches(Some(VM_ERROR)));
    }

    #[test]
    fn test_player_filters_exclude_sys() {
        assert!(FaultClass::is_player_filter("std/Error"));
        assert!(FaultClass::is_player_filter("std/IndexError"));
        assert!(!FaultClass::is_player_filter("sys/Death"));
        assert!(!FaultClass::is_player_filter(VM_ERROR));
        assert!(!FaultClass::is_player_filter("std/Bogus"));
    }

    #[test]
    fn test_display_includes_origin() {
        let mut fault = Fault::new(FaultClass::Arithmetic, "/ by zero");
        fault.origin = Some("team/RobotPlayer.run+4".into());
        assert_eq!(
            fault.to_string(),
            "std/ArithmeticError: / by zero (at team/RobotPlayer.run+4)"
        );
    }
}
