//! One sandboxed robot: its execution context, monitor and interpreter.
//!
//! [`SandboxedPlayer::step`] gives the robot one turn. The robot runs until
//! its budget is spent, it yields, its entry routine returns, or its
//! program ends; then control comes back to the caller.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::config::EngineConfig;
use crate::context::ExecutionContext;
use crate::control::{GameApi, RobotDescriptor};
use crate::error::{EngineError, InstrumentationError};
use crate::monitor::{Monitor, MonitorState, Resume};
use crate::output::TeamOutput;
use crate::profiler::Profiler;
use crate::program::Program;
use crate::vm::{Exit, Machine, Termination, TurnEnv};

/// A robot running a sandboxed program.
#[derive(Debug)]
pub struct SandboxedPlayer {
    descriptor: RobotDescriptor,
    context: ExecutionContext,
    monitor: Monitor,
    machine: Machine,
    profiler: Option<Profiler>,
}

impl SandboxedPlayer {
    /// Load `program` for a new robot. No robot code runs until the first
    /// [`step`](Self::step).
    ///
    /// # Errors
    ///
    /// Returns the program's MISSING or ILLEGAL error if it cannot load.
    pub fn spawn(
        program: Arc<Program>,
        descriptor: RobotDescriptor,
        config: &EngineConfig,
        profiler: Option<Profiler>,
    ) -> Result<Self, InstrumentationError> {
        let seed = config.robot_seed(descriptor.id);
        let context = ExecutionContext::new(program, seed)?;
        let mut monitor = Monitor::new(descriptor.ceiling, seed);
        monitor.initialize();
        debug!(robot = %descriptor.id, team = %descriptor.team, "robot spawned");
        Ok(Self {
            descriptor,
            context,
            monitor,
            machine: Machine::new(config.max_call_depth, config.max_heap_cells),
            profiler,
        })
    }

    /// The robot this player runs.
    #[must_use]
    pub fn descriptor(&self) -> &RobotDescriptor {
        &self.descriptor
    }

    /// The robot's budget state.
    #[must_use]
    pub fn monitor(&self) -> &Monitor {
        &self.monitor
    }

    /// The robot's loaded units and statics.
    #[must_use]
    pub fn context(&self) -> &ExecutionContext {
        &self.context
    }

    /// Units used in the robot's last turn.
    #[must_use]
    pub fn bytecodes_used(&self) -> i32 {
        self.monitor.bytecode_num()
    }

    /// Whether the program has ended or is marked to die.
    #[must_use]
    pub fn has_terminated(&self) -> bool {
        self.monitor.should_die() || self.monitor.state() == MonitorState::Terminated
    }

    /// Mark the robot to die. It unwinds at its next step.
    pub fn kill(&mut self) {
        debug!(robot = %self.descriptor.id, "robot killed");
        self.monitor.kill();
    }

    /// Run one turn.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::SteppedAfterTermination`] if the program has
    /// already ended, or any engine error raised while running.
    pub fn step(
        &mut self,
        round: u32,
        game: &mut dyn GameApi,
        output: &mut TeamOutput,
    ) -> Result<(), EngineError> {
        if self.monitor.state() == MonitorState::Terminated {
            return Err(EngineError::SteppedAfterTermination(self.descriptor.id));
        }
        let resume = self.monitor.begin_turn();
        let mut env = TurnEnv {
            robot: &self.descriptor,
            round,
            game,
            output: &mut *output,
            profiler: self.profiler.as_mut(),
        };
        let exit = match resume {
            Resume::StayPaused => return Ok(()),
            Resume::Die => self.machine.kill(&mut self.context, &mut self.monitor, &mut env)?,
            Resume::Run if self.machine.is_idle() => {
                self.machine
                    .start_turn(&mut self.context, &mut self.monitor, &mut env)?
            }
            Resume::Run => self
                .machine
                .resume(&mut self.context, &mut self.monitor, &mut env)?,
        };
        if let Exit::Terminated(termination) = exit {
            self.finish(round, output, termination)?;
        }
        Ok(())
    }

    fn finish(
        &mut self,
        round: u32,
        output: &mut TeamOutput,
        termination: Termination,
    ) -> Result<(), EngineError> {
        self.monitor.terminate();
        if let Some(p) = self.profiler.as_mut() {
            p.close_all(self.monitor.logical_time());
        }
        match termination {
            Termination::Killed => {
                debug!(robot = %self.descriptor.id, "robot unwound");
                Ok(())
            }
            Termination::Fault(fault) => {
                warn!(robot = %self.descriptor.id, %fault, "robot terminated by uncaught fault");
                output.diagnostic(&self.descriptor, round, &format!("terminated: {fault}"))
            }
        }
    }

    /// End the robot's program without running any more of its code, and
    /// hand back its profile.
    pub fn terminate(&mut self) -> Option<Profiler> {
        let at = self.monitor.logical_time();
        self.machine.abandon(at, self.profiler.as_mut());
        self.monitor.terminate();
        let mut profiler = self.profiler.take();
        if let Some(p) = profiler.as_mut() {
            p.close_all(at);
        }
        profiler
    }
}
