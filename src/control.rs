//! The boundary between the engine core and the game-rules layer.
//!
//! The game layer drives robots through a [`RobotControlProvider`]; robots
//! reach back into the game through a [`GameApi`]. Providers run robots one
//! at a time and in a stable order, so the game sees a single total order of
//! effects.

mod null;
mod sandboxed;
mod scripted;
mod team;

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::{EngineError, InstrumentationError};
use crate::profiler::ProfilerCollection;

pub use null::NullControlProvider;
pub use sandboxed::PlayerControlProvider;
pub use scripted::{ScriptFn, ScriptedControlProvider};
pub use team::TeamControlProvider;

/// Identity of a robot, unique within a match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RobotId(u32);

impl RobotId {
    /// Wrap a raw id.
    #[must_use]
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    /// The raw id.
    #[must_use]
    pub const fn get(self) -> u32 {
        self.0
    }
}

impl fmt::Display for RobotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Team a robot belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Team {
    /// First team.
    A,
    /// Second team.
    B,
    /// Robots controlled by neither player.
    Neutral,
}

impl Team {
    /// The two player teams, in turn order.
    pub const PLAYERS: [Team; 2] = [Team::A, Team::B];
}

impl fmt::Display for Team {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Team::A => write!(f, "A"),
            Team::B => write!(f, "B"),
            Team::Neutral => write!(f, "N"),
        }
    }
}

/// What the game layer knows about a robot when it spawns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RobotDescriptor {
    /// Robot identity.
    pub id: RobotId,
    /// Owning team.
    pub team: Team,
    /// Robot type name, e.g. `SOLDIER`.
    pub kind: String,
    /// Per-round bytecode ceiling for this robot's type.
    pub ceiling: i32,
}

/// Result of spawning a robot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpawnOutcome {
    /// The robot is loaded and will run on its first turn.
    Ready,
    /// The program could not be loaded. The robot is already terminated and
    /// the game layer should destroy it.
    FailedToLoad(InstrumentationError),
}

/// A value crossing the game API boundary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum HostValue {
    /// No value.
    Null,
    /// An integer.
    Int(i32),
    /// A string.
    Str(String),
    /// An integer array.
    Ints(Vec<i32>),
}

/// A rejected game action. Raised in the robot as `std/GameActionError`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct GameActionError {
    /// Why the action was rejected.
    pub message: String,
}

impl GameActionError {
    /// A rejection with the given reason.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// One call from robot code into the game.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostCall {
    robot: RobotId,
    method: String,
    args: Vec<HostValue>,
    kill_caller: bool,
}

impl HostCall {
    /// A call made by `robot`.
    #[must_use]
    pub fn new(robot: RobotId, method: impl Into<String>, args: Vec<HostValue>) -> Self {
        Self {
            robot,
            method: method.into(),
            args,
            kill_caller: false,
        }
    }

    /// The calling robot.
    #[must_use]
    pub fn robot(&self) -> RobotId {
        self.robot
    }

    /// Method name within `bc/RobotController`.
    #[must_use]
    pub fn method(&self) -> &str {
        &self.method
    }

    /// Call arguments.
    #[must_use]
    pub fn args(&self) -> &[HostValue] {
        &self.args
    }

    /// Integer argument `i`.
    ///
    /// # Errors
    ///
    /// Rejects the action if the argument is absent or not an integer.
    pub fn int_arg(&self, i: usize) -> Result<i32, GameActionError> {
        match self.args.get(i) {
            Some(HostValue::Int(v)) => Ok(*v),
            _ => Err(GameActionError::new(format!(
                "{}: argument {i} must be an integer",
                self.method
            ))),
        }
    }

    /// String argument `i`.
    ///
    /// # Errors
    ///
    /// Rejects the action if the argument is absent or not a string.
    pub fn str_arg(&self, i: usize) -> Result<&str, GameActionError> {
        match self.args.get(i) {
            Some(HostValue::Str(s)) => Ok(s),
            _ => Err(GameActionError::new(format!(
                "{}: argument {i} must be a string",
                self.method
            ))),
        }
    }

    /// The caller dies as soon as this call returns. No further code of the
    /// caller runs.
    pub fn kill_caller(&mut self) {
        self.kill_caller = true;
    }

    /// Whether [`HostCall::kill_caller`] was requested.
    #[must_use]
    pub fn kills_caller(&self) -> bool {
        self.kill_caller
    }
}

/// The game surface robots can reach.
pub trait GameApi {
    /// Perform one host call.
    ///
    /// # Errors
    ///
    /// A [`GameActionError`] is raised in the calling robot as a catchable
    /// fault.
    fn invoke(&mut self, call: &mut HostCall) -> Result<HostValue, GameActionError>;
}

/// A game API that rejects everything. Used when no game is attached.
#[derive(Debug, Clone, Copy, Default)]
pub struct DetachedGame;

impl GameApi for DetachedGame {
    fn invoke(&mut self, call: &mut HostCall) -> Result<HostValue, GameActionError> {
        Err(GameActionError::new(format!(
            "{} called with no game attached",
            call.method()
        )))
    }
}

/// Drives robots on behalf of the game-rules layer.
///
/// Robots are run one at a time, in the order the game layer asks. A
/// provider never runs two robots concurrently.
pub trait RobotControlProvider {
    /// The match is about to begin.
    fn match_started(&mut self) {}

    /// The match is over. Remaining robots are terminated.
    fn match_ended(&mut self) {}

    /// A new round begins.
    fn round_started(&mut self, _round: u32) {}

    /// The round is over.
    fn round_ended(&mut self) {}

    /// A robot was created.
    ///
    /// # Errors
    ///
    /// Returns an [`EngineError`] only for engine faults. A program that
    /// fails to load is reported as [`SpawnOutcome::FailedToLoad`].
    fn robot_spawned(&mut self, robot: &RobotDescriptor) -> Result<SpawnOutcome, EngineError>;

    /// A robot died. Does not wait for the robot to unwind.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::UnknownRobot`] for ids never spawned here.
    fn robot_killed(&mut self, id: RobotId) -> Result<(), EngineError>;

    /// Give a robot its turn.
    ///
    /// # Errors
    ///
    /// Returns an [`EngineError`] on an engine invariant violation; the match
    /// must be abandoned.
    fn run_robot(&mut self, id: RobotId, game: &mut dyn GameApi) -> Result<(), EngineError>;

    /// Bytecodes the robot used in its most recent turn.
    fn bytecodes_used(&self, id: RobotId) -> i32;

    /// Whether the robot's program has ended or has been told to.
    fn has_terminated(&self, id: RobotId) -> bool;

    /// Profiles recorded so far, drained from the provider.
    fn take_profiles(&mut self) -> Vec<ProfilerCollection> {
        Vec::new()
    }
}
