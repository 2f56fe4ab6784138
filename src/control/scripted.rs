use std::collections::BTreeMap;
use std::fmt;

use tracing::debug;

use crate::error::EngineError;

use super::{GameApi, RobotControlProvider, RobotDescriptor, RobotId, SpawnOutcome};

/// Host-side robot logic, run once per turn. Returning `false` ends the
/// robot's program.
pub type ScriptFn = Box<dyn FnMut(&RobotDescriptor, u32, &mut dyn GameApi) -> bool>;

#[derive(Debug)]
struct Scripted {
    descriptor: RobotDescriptor,
    killed: bool,
    done: bool,
    used: i32,
}

/// Robots driven by a host closure instead of a sandboxed program, each
/// turn charged a fixed cost. Used for neutral units.
pub struct ScriptedControlProvider {
    script: ScriptFn,
    turn_cost: i32,
    round: u32,
    robots: BTreeMap<RobotId, Scripted>,
}

impl fmt::Debug for ScriptedControlProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScriptedControlProvider")
            .field("turn_cost", &self.turn_cost)
            .field("robots", &self.robots)
            .finish_non_exhaustive()
    }
}

impl ScriptedControlProvider {
    /// Run `script` for every robot, charging `turn_cost` per turn capped
    /// at the robot's ceiling.
    #[must_use]
    pub fn new(turn_cost: i32, script: ScriptFn) -> Self {
        Self {
            script,
            turn_cost,
            round: 0,
            robots: BTreeMap::new(),
        }
    }
}

impl RobotControlProvider for ScriptedControlProvider {
    fn round_started(&mut self, round: u32) {
        self.round = round;
    }

    fn robot_spawned(&mut self, robot: &RobotDescriptor) -> Result<SpawnOutcome, EngineError> {
        if self.robots.contains_key(&robot.id) {
            return Err(EngineError::DuplicateRobot(robot.id));
        }
        self.robots.insert(
            robot.id,
            Scripted {
                descriptor: robot.clone(),
                killed: false,
                done: false,
                used: 0,
            },
        );
        Ok(SpawnOutcome::Ready)
    }

    fn robot_killed(&mut self, id: RobotId) -> Result<(), EngineError> {
        let robot = self.robots.get_mut(&id).ok_or(EngineError::UnknownRobot(id))?;
        robot.killed = true;
        Ok(())
    }

    fn run_robot(&mut self, id: RobotId, game: &mut dyn GameApi) -> Result<(), EngineError> {
        let robot = self.robots.get_mut(&id).ok_or(EngineError::UnknownRobot(id))?;
        if robot.done {
            return Err(EngineError::SteppedAfterTermination(id));
        }
        if robot.killed {
            robot.done = true;
            return Ok(());
        }
        robot.used = self.turn_cost.min(robot.descriptor.ceiling);
        if !(self.script)(&robot.descriptor, self.round, game) {
            debug!(robot = %id, "scripted robot finished");
            robot.done = true;
        }
        Ok(())
    }

    fn bytecodes_used(&self, id: RobotId) -> i32 {
        self.robots.get(&id).map_or(0, |r| r.used)
    }

    fn has_terminated(&self, id: RobotId) -> bool {
        self.robots.get(&id).is_none_or(|r| r.killed || r.done)
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::rc::Rc;

    use super::*;
    use crate::control::{DetachedGame, Team};

    #[test]
    fn test_script_runs_until_it_stops() {
        let turns = Rc::new(Cell::new(0));
        let counter = Rc::clone(&turns);
        let mut p = ScriptedControlProvider::new(
            50,
            Box::new(move |_, _, _| {
                counter.set(counter.get() + 1);
                counter.get() < 2
            }),
        );
        let robot = RobotDescriptor {
            id: RobotId::new(5),
            team: Team::Neutral,
            kind: "TOWER".into(),
            ceiling: 20,
        };
        p.robot_spawned(&robot).unwrap();
        p.run_robot(robot.id, &mut DetachedGame).unwrap();
        assert_eq!(p.bytecodes_used(robot.id), 20);
        assert!(!p.has_terminated(robot.id));
        p.run_robot(robot.id, &mut DetachedGame).unwrap();
        assert!(p.has_terminated(robot.id));
        assert_eq!(turns.get(), 2);
    }
}
