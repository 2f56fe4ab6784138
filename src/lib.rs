// Allow unwrap and unreadable literals in tests (test code is not production)
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::unreadable_literal))]
//! Bytecage: a deterministic, bytecode-metered sandbox for robot
//! programming games.
//!
//! Robots run untrusted programs one at a time, in strict turn order, each
//! under a per-round budget counted in abstract bytecodes rather than wall
//! time, so a match replays bit for bit.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────┐
//! │   Game layer (arena) / CLI          │
//! ├─────────────────────────────────────┤
//! │   Control providers + team output   │
//! ├─────────────────────────────────────┤
//! │   Sandboxed player: monitor + VM    │
//! ├─────────────────────────────────────┤
//! │   Execution context (private units) │
//! ├─────────────────────────────────────┤
//! │   Program + rewriter + cost table   │
//! └─────────────────────────────────────┘
//! ```
//!
//! A [`Program`] is a set of code units in `.bca` assembly. Each unit is
//! rewritten once per program: forbidden references are rejected, shared
//! library references are redirected to private copies, and every basic
//! block ends with a `charge` of its cost. Every robot then gets its own
//! [`ExecutionContext`] holding private statics for every unit it touches,
//! and a [`Monitor`] that pauses it when its budget runs out.

pub mod arena;
pub mod config;
pub mod context;
pub mod control;
pub mod cost;
pub mod error;
pub mod isa;
pub mod library;
pub mod monitor;
pub mod output;
pub mod player;
pub mod profiler;
pub mod program;
pub mod rewriter;
pub mod vm;

pub use arena::{Arena, ArenaConfig, MatchReport};
pub use config::EngineConfig;
pub use context::ExecutionContext;
pub use control::{
    PlayerControlProvider, RobotControlProvider, RobotDescriptor, RobotId, SpawnOutcome, Team,
    TeamControlProvider,
};
pub use error::{EngineError, InstrumentationError, InstrumentationKind};
pub use monitor::Monitor;
pub use player::SandboxedPlayer;
pub use program::Program;
