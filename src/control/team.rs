use std::collections::HashMap;
use std::fmt;

use crate::error::EngineError;
use crate::profiler::ProfilerCollection;

use super::{GameApi, RobotControlProvider, RobotDescriptor, RobotId, SpawnOutcome, Team};

/// Routes each robot to the provider registered for its team. Lifecycle
/// events reach every provider in registration order.
#[derive(Default)]
pub struct TeamControlProvider {
    providers: Vec<(Team, Box<dyn RobotControlProvider>)>,
    owners: HashMap<RobotId, usize>,
}

impl fmt::Debug for TeamControlProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let teams: Vec<Team> = self.providers.iter().map(|(t, _)| *t).collect();
        f.debug_struct("TeamControlProvider")
            .field("teams", &teams)
            .field("robots", &self.owners.len())
            .finish()
    }
}

impl TeamControlProvider {
    /// No teams registered.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `provider` for `team`, replacing any earlier one.
    #[must_use]
    pub fn with_team(mut self, team: Team, provider: Box<dyn RobotControlProvider>) -> Self {
        match self.providers.iter_mut().find(|(t, _)| *t == team) {
            Some(slot) => slot.1 = provider,
            None => self.providers.push((team, provider)),
        }
        self
    }

    fn owner(&self, id: RobotId) -> Result<usize, EngineError> {
        self.owners.get(&id).copied().ok_or(EngineError::UnknownRobot(id))
    }
}

impl RobotControlProvider for TeamControlProvider {
    fn match_started(&mut self) {
        for (_, p) in &mut self.providers {
            p.match_started();
        }
    }

    fn match_ended(&mut self) {
        for (_, p) in &mut self.providers {
            p.match_ended();
        }
    }

    fn round_started(&mut self, round: u32) {
        for (_, p) in &mut self.providers {
            p.round_started(round);
        }
    }

    fn round_ended(&mut self) {
        for (_, p) in &mut self.providers {
            p.round_ended();
        }
    }

    fn robot_spawned(&mut self, robot: &RobotDescriptor) -> Result<SpawnOutcome, EngineError> {
        let index = self
            .providers
            .iter()
            .position(|(t, _)| *t == robot.team)
            .ok_or(EngineError::NoProviderForTeam(robot.team))?;
        if self.owners.contains_key(&robot.id) {
            return Err(EngineError::DuplicateRobot(robot.id));
        }
        let outcome = self.providers[index].1.robot_spawned(robot)?;
        self.owners.insert(robot.id, index);
        Ok(outcome)
    }

    fn robot_killed(&mut self, id: RobotId) -> Result<(), EngineError> {
        let index = self.owner(id)?;
        self.providers[index].1.robot_killed(id)
    }

    fn run_robot(&mut self, id: RobotId, game: &mut dyn GameApi) -> Result<(), EngineError> {
        let index = self.owner(id)?;
        self.providers[index].1.run_robot(id, game)
    }

    fn bytecodes_used(&self, id: RobotId) -> i32 {
        self.owner(id)
            .map_or(0, |index| self.providers[index].1.bytecodes_used(id))
    }

    fn has_terminated(&self, id: RobotId) -> bool {
        self.owners
            .get(&id)
            .is_none_or(|&index| self.providers[index].1.has_terminated(id))
    }

    fn take_profiles(&mut self) -> Vec<ProfilerCollection> {
        self.providers
            .iter_mut()
            .flat_map(|(_, p)| p.take_profiles())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::{DetachedGame, NullControlProvider};

    fn robot(id: u32, team: Team) -> RobotDescriptor {
        RobotDescriptor {
            id: RobotId::new(id),
            team,
            kind: "SOLDIER".into(),
            ceiling: 100,
        }
    }

    #[test]
    fn test_routes_by_team() {
        let mut p = TeamControlProvider::new()
            .with_team(Team::A, Box::new(NullControlProvider::new()))
            .with_team(Team::B, Box::new(NullControlProvider::new()));
        p.robot_spawned(&robot(1, Team::A)).unwrap();
        p.robot_spawned(&robot(2, Team::B)).unwrap();
        p.robot_killed(RobotId::new(2)).unwrap();
        p.run_robot(RobotId::new(1), &mut DetachedGame).unwrap();
        assert!(!p.has_terminated(RobotId::new(1)));
        assert!(p.has_terminated(RobotId::new(2)));
        assert!(p.has_terminated(RobotId::new(3)));
    }

    #[test]
    fn test_unregistered_team_is_an_engine_error() {
        let mut p = TeamControlProvider::new().with_team(Team::A, Box::new(NullControlProvider::new()));
        assert_eq!(
            p.robot_spawned(&robot(1, Team::Neutral)),
            Err(EngineError::NoProviderForTeam(Team::Neutral))
        );
    }
}
