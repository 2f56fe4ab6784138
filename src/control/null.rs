use std::collections::BTreeMap;

use crate::error::EngineError;

use super::{GameApi, RobotControlProvider, RobotDescriptor, RobotId, SpawnOutcome};

/// Robots that never do anything and cost nothing.
#[derive(Debug, Default)]
pub struct NullControlProvider {
    killed: BTreeMap<RobotId, bool>,
}

impl NullControlProvider {
    /// An empty provider.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl RobotControlProvider for NullControlProvider {
    fn robot_spawned(&mut self, robot: &RobotDescriptor) -> Result<SpawnOutcome, EngineError> {
        if self.killed.insert(robot.id, false).is_some() {
            return Err(EngineError::DuplicateRobot(robot.id));
        }
        Ok(SpawnOutcome::Ready)
    }

    fn robot_killed(&mut self, id: RobotId) -> Result<(), EngineError> {
        let killed = self.killed.get_mut(&id).ok_or(EngineError::UnknownRobot(id))?;
        *killed = true;
        Ok(())
    }

    fn run_robot(&mut self, id: RobotId, _game: &mut dyn GameApi) -> Result<(), EngineError> {
        match self.killed.get(&id) {
            None => Err(EngineError::UnknownRobot(id)),
            Some(true) => Err(EngineError::SteppedAfterTermination(id)),
            Some(false) => Ok(()),
        }
    }

    fn bytecodes_used(&self, _id: RobotId) -> i32 {
        0
    }

    fn has_terminated(&self, id: RobotId) -> bool {
        self.killed.get(&id).copied().unwrap_or(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::{DetachedGame, Team};

    #[test]
    fn test_null_robots_idle_until_killed() {
        let mut p = NullControlProvider::new();
        let robot = RobotDescriptor {
            id: RobotId::new(1),
            team: Team::Neutral,
            kind: "TOWER".into(),
            ceiling: 0,
        };
        p.robot_spawned(&robot).unwrap();
        p.run_robot(robot.id, &mut DetachedGame).unwrap();
        assert!(!p.has_terminated(robot.id));
        p.robot_killed(robot.id).unwrap();
        assert!(p.has_terminated(robot.id));
        assert!(p.run_robot(robot.id, &mut DetachedGame).is_err());
    }
}
