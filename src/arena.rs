//! A minimal reference game layer.
//!
//! The arena spawns two teams of robots, drives them round by round through
//! a [`RobotControlProvider`], and answers their `bc/RobotController` calls.
//! It records what robots do as an event log with a content digest so two
//! runs of the same match can be compared. It does not decide a winner.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::Serialize;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, info};

use crate::control::{
    GameActionError, GameApi, HostCall, HostValue, RobotControlProvider, RobotDescriptor, RobotId,
    SpawnOutcome, Team,
};
use crate::error::EngineError;
use crate::profiler::ProfilerCollection;

/// Broadcast channels per team.
pub const CHANNELS: usize = 64;

/// Starting hit points of every robot.
pub const START_HP: i32 = 100;

/// Damage dealt by one attack.
pub const ATTACK_DAMAGE: i32 = 10;

/// Distance within which robots are sensed.
pub const SENSE_RANGE: i32 = 10;

const ARENA_WIDTH: i32 = 64;

/// Match parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArenaConfig {
    /// Rounds to play unless a team resigns.
    pub rounds: u32,
    /// Robots spawned per team.
    pub robots_per_team: u32,
    /// Per-round bytecode ceiling of each robot.
    pub ceiling: i32,
    /// Robot type name.
    pub kind: String,
    /// Seed for robot placement.
    pub seed: u64,
}

impl Default for ArenaConfig {
    fn default() -> Self {
        Self {
            rounds: 200,
            robots_per_team: 3,
            ceiling: 10_000,
            kind: "SOLDIER".into(),
            seed: 0,
        }
    }
}

/// Something a robot did, or that happened to it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type")]
pub enum ArenaEvent {
    /// A robot's program failed to load.
    LoadFailed {
        /// Round of the event.
        round: u32,
        /// The robot.
        robot: RobotId,
        /// Load error.
        error: String,
    },
    /// One robot hit another.
    Attack {
        /// Round of the event.
        round: u32,
        /// Attacker.
        robot: RobotId,
        /// Target.
        target: RobotId,
    },
    /// A robot was destroyed.
    Destroyed {
        /// Round of the event.
        round: u32,
        /// The robot.
        robot: RobotId,
    },
    /// A robot destroyed itself.
    Disintegrated {
        /// Round of the event.
        round: u32,
        /// The robot.
        robot: RobotId,
    },
    /// A robot wrote a team broadcast channel.
    Broadcast {
        /// Round of the event.
        round: u32,
        /// The robot.
        robot: RobotId,
        /// Channel written.
        channel: i32,
        /// Value written.
        value: i32,
    },
    /// A robot set its indicator string.
    Indicator {
        /// Round of the event.
        round: u32,
        /// The robot.
        robot: RobotId,
        /// Indicator text.
        text: String,
    },
    /// A team resigned.
    Resigned {
        /// Round of the event.
        round: u32,
        /// The resigning team.
        team: Team,
    },
}

/// End-of-match figures for one robot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RobotReport {
    /// Robot id.
    pub id: RobotId,
    /// Robot team.
    pub team: Team,
    /// Remaining hit points.
    pub hp: i32,
    /// Whether it was still alive at the end.
    pub alive: bool,
    /// Bytecodes used over the whole match.
    pub bytecodes: i64,
}

/// Outcome of a match.
#[derive(Debug, Clone, Serialize)]
pub struct MatchReport {
    /// Placement seed.
    pub seed: u64,
    /// Rounds actually played.
    pub rounds_played: u32,
    /// Per-robot figures, by id.
    pub robots: Vec<RobotReport>,
    /// Event log in the order effects happened.
    pub events: Vec<ArenaEvent>,
    /// Team that resigned, if any.
    pub resigned: Option<Team>,
    /// SHA-256 over the event log, hex.
    pub digest: String,
    /// Frame profiles, when profiling was on.
    #[serde(skip)]
    pub profiles: Vec<ProfilerCollection>,
}

/// A match could not be played.
#[derive(Debug, Error)]
pub enum ArenaError {
    /// An engine invariant was violated.
    #[error("engine fault: {0}")]
    Engine(#[from] EngineError),
    /// Nothing to play.
    #[error("a match needs at least one robot per team")]
    NoRobots,
}

#[derive(Debug)]
struct Body {
    descriptor: RobotDescriptor,
    position: i32,
    hp: i32,
    alive: bool,
    bytecodes: i64,
}

/// Match state and the game surface robots call into.
#[derive(Debug)]
pub struct Arena {
    config: ArenaConfig,
    round: u32,
    bodies: BTreeMap<RobotId, Body>,
    order: Vec<RobotId>,
    channels: BTreeMap<Team, [i32; CHANNELS]>,
    pending_kills: Vec<RobotId>,
    events: Vec<ArenaEvent>,
    resigned: Option<Team>,
}

impl Arena {
    /// An empty arena for `config`.
    #[must_use]
    pub fn new(config: ArenaConfig) -> Self {
        Self {
            config,
            round: 0,
            bodies: BTreeMap::new(),
            order: Vec::new(),
            channels: BTreeMap::new(),
            pending_kills: Vec::new(),
            events: Vec::new(),
            resigned: None,
        }
    }

    /// Play a full match through `provider`.
    ///
    /// # Errors
    ///
    /// Returns [`ArenaError::Engine`] if the provider reports an engine
    /// fault; the match is abandoned.
    pub fn run(
        mut self,
        provider: &mut dyn RobotControlProvider,
    ) -> Result<MatchReport, ArenaError> {
        if self.config.robots_per_team == 0 {
            return Err(ArenaError::NoRobots);
        }
        info!(seed = self.config.seed, rounds = self.config.rounds, "match started");
        provider.match_started();
        self.spawn_all(provider)?;

        for round in 1..=self.config.rounds {
            if self.resigned.is_some() || self.living().next().is_none() {
                break;
            }
            self.round = round;
            provider.round_started(round);
            for id in self.order.clone() {
                self.run_one(provider, id)?;
            }
            provider.round_ended();
        }

        provider.match_ended();
        let profiles = provider.take_profiles();
        info!(rounds = self.round, events = self.events.len(), "match ended");
        Ok(self.report(profiles))
    }

    fn spawn_all(&mut self, provider: &mut dyn RobotControlProvider) -> Result<(), ArenaError> {
        let mut rng = ChaCha8Rng::seed_from_u64(self.config.seed);
        let mut next_id = 1;
        for _ in 0..self.config.robots_per_team {
            for team in Team::PLAYERS {
                let descriptor = RobotDescriptor {
                    id: RobotId::new(next_id),
                    team,
                    kind: self.config.kind.clone(),
                    ceiling: self.config.ceiling,
                };
                next_id += 1;
                let outcome = provider.robot_spawned(&descriptor)?;
                let alive = match outcome {
                    SpawnOutcome::Ready => true,
                    SpawnOutcome::FailedToLoad(err) => {
                        self.events.push(ArenaEvent::LoadFailed {
                            round: 0,
                            robot: descriptor.id,
                            error: err.to_string(),
                        });
                        false
                    }
                };
                self.order.push(descriptor.id);
                self.bodies.insert(
                    descriptor.id,
                    Body {
                        position: rng.gen_range(0..ARENA_WIDTH),
                        descriptor,
                        hp: START_HP,
                        alive,
                        bytecodes: 0,
                    },
                );
            }
        }
        Ok(())
    }

    fn run_one(
        &mut self,
        provider: &mut dyn RobotControlProvider,
        id: RobotId,
    ) -> Result<(), ArenaError> {
        if !self.bodies.get(&id).is_some_and(|b| b.alive) {
            return Ok(());
        }
        if provider.has_terminated(id) {
            self.destroy(id);
            return Ok(());
        }
        provider.run_robot(id, self)?;
        let used = i64::from(provider.bytecodes_used(id));
        if let Some(body) = self.bodies.get_mut(&id) {
            body.bytecodes += used;
        }
        if provider.has_terminated(id) {
            self.destroy(id);
        }
        for target in std::mem::take(&mut self.pending_kills) {
            provider.robot_killed(target)?;
            self.destroy(target);
        }
        Ok(())
    }

    fn destroy(&mut self, id: RobotId) {
        if let Some(body) = self.bodies.get_mut(&id) {
            if body.alive {
                body.alive = false;
                debug!(robot = %id, round = self.round, "robot destroyed");
                self.events.push(ArenaEvent::Destroyed {
                    round: self.round,
                    robot: id,
                });
            }
        }
    }

    fn living(&self) -> impl Iterator<Item = &Body> {
        self.bodies.values().filter(|b| b.alive)
    }

    fn caller(&self, call: &HostCall) -> Result<&Body, GameActionError> {
        self.bodies
            .get(&call.robot())
            .filter(|b| b.alive)
            .ok_or_else(|| GameActionError::new(format!("robot {} is not in play", call.robot())))
    }

    fn channel(call: &HostCall) -> Result<usize, GameActionError> {
        let channel = call.int_arg(0)?;
        usize::try_from(channel)
            .ok()
            .filter(|&c| c < CHANNELS)
            .ok_or_else(|| GameActionError::new(format!("no broadcast channel {channel}")))
    }

    fn report(self, profiles: Vec<ProfilerCollection>) -> MatchReport {
        let digest = digest(&self.events);
        MatchReport {
            seed: self.config.seed,
            rounds_played: self.round,
            robots: self
                .bodies
                .values()
                .map(|b| RobotReport {
                    id: b.descriptor.id,
                    team: b.descriptor.team,
                    hp: b.hp,
                    alive: b.alive,
                    bytecodes: b.bytecodes,
                })
                .collect(),
            events: self.events,
            resigned: self.resigned,
            digest,
            profiles,
        }
    }
}

fn count(n: usize) -> HostValue {
    HostValue::Int(i32::try_from(n).unwrap_or(i32::MAX))
}

impl GameApi for Arena {
    fn invoke(&mut self, call: &mut HostCall) -> Result<HostValue, GameActionError> {
        let me = self.caller(call)?;
        let (id, team, position) = (me.descriptor.id, me.descriptor.team, me.position);
        let round = self.round;
        let method = call.method().to_string();
        match method.as_str() {
            "getID" => Ok(HostValue::Int(i32::try_from(id.get()).unwrap_or(i32::MAX))),
            "getTeam" => Ok(HostValue::Str(team.to_string())),
            "getType" => Ok(HostValue::Str(me.descriptor.kind.clone())),
            "getRoundNum" => Ok(HostValue::Int(i32::try_from(round).unwrap_or(i32::MAX))),
            "getRobotCount" => Ok(count(
                self.living().filter(|b| b.descriptor.team == team).count(),
            )),
            "senseNearbyRobots" => Ok(HostValue::Ints(
                self.living()
                    .filter(|b| b.descriptor.id != id)
                    .filter(|b| (b.position - position).abs() <= SENSE_RANGE)
                    .map(|b| i32::try_from(b.descriptor.id.get()).unwrap_or(i32::MAX))
                    .collect(),
            )),
            "attack" => {
                let raw = call.int_arg(0)?;
                let target = u32::try_from(raw)
                    .ok()
                    .map(RobotId::new)
                    .filter(|t| self.bodies.get(t).is_some_and(|b| b.alive))
                    .ok_or_else(|| GameActionError::new(format!("no living robot {raw}")))?;
                let body = self
                    .bodies
                    .get_mut(&target)
                    .ok_or_else(|| GameActionError::new(format!("no living robot {raw}")))?;
                body.hp -= ATTACK_DAMAGE;
                if body.hp <= 0 && !self.pending_kills.contains(&target) {
                    self.pending_kills.push(target);
                }
                self.events.push(ArenaEvent::Attack {
                    round,
                    robot: id,
                    target,
                });
                Ok(HostValue::Null)
            }
            "broadcast" => {
                let channel = Self::channel(call)?;
                let value = call.int_arg(1)?;
                self.channels.entry(team).or_insert([0; CHANNELS])[channel] = value;
                self.events.push(ArenaEvent::Broadcast {
                    round,
                    robot: id,
                    channel: i32::try_from(channel).unwrap_or(i32::MAX),
                    value,
                });
                Ok(HostValue::Null)
            }
            "readBroadcast" => {
                let channel = Self::channel(call)?;
                Ok(HostValue::Int(
                    self.channels.get(&team).map_or(0, |c| c[channel]),
                ))
            }
            "setIndicatorString" => {
                let text = call.str_arg(0)?.to_string();
                self.events.push(ArenaEvent::Indicator {
                    round,
                    robot: id,
                    text,
                });
                Ok(HostValue::Null)
            }
            "disintegrate" => {
                call.kill_caller();
                self.events.push(ArenaEvent::Disintegrated { round, robot: id });
                Ok(HostValue::Null)
            }
            "resign" => {
                if self.resigned.is_none() {
                    self.resigned = Some(team);
                    self.events.push(ArenaEvent::Resigned { round, team });
                }
                Ok(HostValue::Null)
            }
            other => Err(GameActionError::new(format!("unknown game method {other}"))),
        }
    }
}

/// SHA-256 of the serialized event log, as lowercase hex.
#[must_use]
pub fn digest(events: &[ArenaEvent]) -> String {
    let mut hasher = Sha256::new();
    for event in events {
        hasher.update(serde_json::to_vec(event).unwrap_or_default());
        hasher.update(b"\n");
    }
    hasher.finalize().iter().fold(String::with_capacity(64), |mut s, b| {
        let _ = write!(s, "{b:02x}");
        s
    })
}
