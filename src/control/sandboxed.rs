use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::output::TeamOutput;
use crate::player::SandboxedPlayer;
use crate::profiler::ProfilerCollection;
use crate::program::Program;

use super::{GameApi, RobotControlProvider, RobotDescriptor, RobotId, SpawnOutcome, Team};

#[derive(Debug)]
enum Slot {
    Loaded(Box<SandboxedPlayer>),
    /// The program failed to load; the robot never runs.
    Failed(RobotDescriptor),
}

impl Slot {
    fn descriptor(&self) -> &RobotDescriptor {
        match self {
            Slot::Loaded(p) => p.descriptor(),
            Slot::Failed(d) => d,
        }
    }
}

/// Runs every robot of one team on the team's sandboxed program.
#[derive(Debug)]
pub struct PlayerControlProvider {
    program: Arc<Program>,
    config: EngineConfig,
    output: TeamOutput,
    robots: BTreeMap<RobotId, Slot>,
    order: Vec<RobotId>,
    round: u32,
    profiles: Option<ProfilerCollection>,
}

impl PlayerControlProvider {
    /// A provider writing robot output to `output`.
    #[must_use]
    pub fn new(program: Arc<Program>, config: EngineConfig, output: TeamOutput) -> Self {
        let profiles = config
            .profiling
            .then(|| ProfilerCollection::new(output.team()));
        Self {
            program,
            config,
            output,
            robots: BTreeMap::new(),
            order: Vec::new(),
            round: 0,
            profiles,
        }
    }

    /// A provider for `team` printing to stdout, silenced and capped as the
    /// config says.
    #[must_use]
    pub fn for_team(program: Arc<Program>, team: Team, config: EngineConfig) -> Self {
        let output = TeamOutput::stdout(team)
            .silenced(config.is_silenced(team))
            .with_limit(config.output_limit);
        Self::new(program, config, output)
    }

    /// The program robots run.
    #[must_use]
    pub fn program(&self) -> &Arc<Program> {
        &self.program
    }

    /// A loaded robot, if it loaded.
    #[must_use]
    pub fn player(&self, id: RobotId) -> Option<&SandboxedPlayer> {
        match self.robots.get(&id)? {
            Slot::Loaded(p) => Some(p),
            Slot::Failed(_) => None,
        }
    }

    /// Robots in spawn order.
    pub fn robots(&self) -> impl Iterator<Item = &RobotDescriptor> {
        self.order
            .iter()
            .filter_map(|id| self.robots.get(id))
            .map(Slot::descriptor)
    }

    fn slot_mut(&mut self, id: RobotId) -> Result<&mut Slot, EngineError> {
        self.robots.get_mut(&id).ok_or(EngineError::UnknownRobot(id))
    }
}

impl RobotControlProvider for PlayerControlProvider {
    fn match_started(&mut self) {
        info!(program = %self.program.name(), id = %self.program.id(), team = %self.output.team(), "match started");
    }

    fn match_ended(&mut self) {
        for id in &self.order {
            if let Some(Slot::Loaded(player)) = self.robots.get_mut(id) {
                let profile = player.terminate();
                if let (Some(collection), Some(profile)) = (self.profiles.as_mut(), profile) {
                    collection.push(profile);
                }
            }
        }
        if let Err(err) = self.output.flush() {
            error!(%err, "failed to flush team output");
        }
        info!(team = %self.output.team(), robots = self.order.len(), "match ended");
    }

    fn round_started(&mut self, round: u32) {
        self.round = round;
    }

    fn robot_spawned(&mut self, robot: &RobotDescriptor) -> Result<SpawnOutcome, EngineError> {
        if self.robots.contains_key(&robot.id) {
            return Err(EngineError::DuplicateRobot(robot.id));
        }
        let profiler = self.profiles.as_ref().map(|c| c.profiler_for(robot));
        let spawned =
            SandboxedPlayer::spawn(Arc::clone(&self.program), robot.clone(), &self.config, profiler);
        self.order.push(robot.id);
        match spawned {
            Ok(player) => {
                self.robots.insert(robot.id, Slot::Loaded(Box::new(player)));
                Ok(SpawnOutcome::Ready)
            }
            Err(err) => {
                warn!(robot = %robot.id, %err, "robot failed to load");
                self.robots.insert(robot.id, Slot::Failed(robot.clone()));
                self.output
                    .diagnostic(robot, self.round, &format!("failed to load: {err}"))?;
                Ok(SpawnOutcome::FailedToLoad(err))
            }
        }
    }

    fn robot_killed(&mut self, id: RobotId) -> Result<(), EngineError> {
        if let Slot::Loaded(player) = self.slot_mut(id)? {
            if !player.has_terminated() {
                player.kill();
            }
        }
        Ok(())
    }

    fn run_robot(&mut self, id: RobotId, game: &mut dyn GameApi) -> Result<(), EngineError> {
        let round = self.round;
        let player = match self.robots.get_mut(&id) {
            None => return Err(EngineError::UnknownRobot(id)),
            Some(Slot::Failed(_)) => {
                debug!(robot = %id, "skipping robot whose program failed to load");
                return Ok(());
            }
            Some(Slot::Loaded(player)) => player,
        };
        player.step(round, game, &mut self.output).inspect_err(|err| {
            error!(robot = %id, %err, "engine fault while running robot");
        })
    }

    fn bytecodes_used(&self, id: RobotId) -> i32 {
        self.player(id).map_or(0, SandboxedPlayer::bytecodes_used)
    }

    fn has_terminated(&self, id: RobotId) -> bool {
        match self.robots.get(&id) {
            Some(Slot::Loaded(player)) => player.has_terminated(),
            Some(Slot::Failed(_)) | None => true,
        }
    }

    fn take_profiles(&mut self) -> Vec<ProfilerCollection> {
        let team = self.output.team();
        self.profiles
            .replace(ProfilerCollection::new(team))
            .into_iter()
            .collect()
    }
}
