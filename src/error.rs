//! Error types shared across the engine.
//!
//! Two families matter to callers. [`InstrumentationError`] is player-caused
//! and fails exactly one robot at spawn time. [`EngineError`] is an engine
//! invariant violation and aborts the whole match.

use std::fmt;

use serde::Serialize;
use thiserror::Error;

use crate::control::{RobotId, Team};

/// Why a code unit could not be prepared for execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum InstrumentationKind {
    /// A referenced unit or routine could not be located.
    Missing,
    /// The unit uses a construct the sandbox forbids.
    Illegal,
}

impl fmt::Display for InstrumentationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InstrumentationKind::Missing => write!(f, "MISSING"),
            InstrumentationKind::Illegal => write!(f, "ILLEGAL"),
        }
    }
}

/// A program failed to load or instrument.
///
/// Errors are latched on the owning program: once one unit fails, every
/// later load for that program returns the same error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind} in {unit}: {message}")]
pub struct InstrumentationError {
    /// Missing or illegal.
    pub kind: InstrumentationKind,
    /// The unit being loaded when the problem was found.
    pub unit: String,
    /// Human-readable description naming the offending construct.
    pub message: String,
}

impl InstrumentationError {
    /// A referenced name could not be located.
    #[must_use]
    pub fn missing(unit: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: InstrumentationKind::Missing,
            unit: unit.into(),
            message: message.into(),
        }
    }

    /// The unit references a forbidden construct.
    #[must_use]
    pub fn illegal(unit: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: InstrumentationKind::Illegal,
            unit: unit.into(),
            message: message.into(),
        }
    }

    /// Whether this is a [`InstrumentationKind::Illegal`] error.
    #[must_use]
    pub fn is_illegal(&self) -> bool {
        self.kind == InstrumentationKind::Illegal
    }
}

/// An engine invariant was violated. Always fatal to the match.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    /// A debug-mode exit ran without a matching entry.
    #[error("debug depth dropped below zero")]
    DebugDepthUnderflow,
    /// An always-private support unit was requested but is not provided.
    #[error("support unit {0} is not available")]
    SupportUnitMissing(String),
    /// The driver stepped a robot whose program already ended.
    #[error("robot {0} was stepped after it terminated")]
    SteppedAfterTermination(RobotId),
    /// The driver referenced a robot it never spawned.
    #[error("robot {0} is not known to this provider")]
    UnknownRobot(RobotId),
    /// The driver spawned the same robot id twice.
    #[error("robot {0} was spawned twice")]
    DuplicateRobot(RobotId),
    /// No provider is registered for the robot's team.
    #[error("no control provider for team {0}")]
    NoProviderForTeam(Team),
    /// Writing robot output failed.
    #[error("output sink failed: {0}")]
    Output(String),
}

impl From<std::io::Error> for EngineError {
    fn from(err: std::io::Error) -> Self {
        EngineError::Output(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instrumentation_error_display_names_kind_and_unit() {
        let err = InstrumentationError::illegal("team/RobotPlayer", "std/Thread.start is forbidden");
        let text = err.to_string();
        assert!(text.starts_with("ILLEGAL in team/RobotPlayer"));
        assert!(text.contains("std/Thread.start"));
        assert!(err.is_illegal());
    }

    #[test]
    fn test_missing_is_not_illegal() {
        let err = InstrumentationError::missing("team/Helper", "unit not found");
        assert_eq!(err.kind, InstrumentationKind::Missing);
        assert!(!err.is_illegal());
    }
}
