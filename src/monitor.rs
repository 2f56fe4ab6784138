//! Per-robot budget accounting and the pause/step state machine.
//!
//! The monitor never runs code itself. The interpreter calls
//! [`Monitor::charge`] at the end of every basic block and obeys the
//! returned [`ChargeOutcome`]; the player calls [`Monitor::begin_turn`]
//! before handing control back to the robot.
//!
//! All budget arithmetic is checked. Overflow clamps to `i32::MIN` so a
//! robot can never manufacture budget by wrapping.

use crate::error::EngineError;

/// Lifecycle of a robot's program.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorState {
    /// Constructed, not yet attached to a program.
    Uninitialized,
    /// Waiting for the driver to step it.
    Paused,
    /// Executing robot code.
    Running,
    /// The program has ended. Absorbing.
    Terminated,
}

/// What the interpreter must do after a charge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChargeOutcome {
    /// Budget remains; keep executing.
    Continue,
    /// Budget exhausted; suspend until the next step.
    Pause,
    /// The robot has been killed; raise the termination signal.
    Die,
}

/// What the player must do when a turn begins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resume {
    /// Run robot code.
    Run,
    /// Still over budget after the reset; stay paused this turn.
    StayPaused,
    /// The robot has been killed; unwind it.
    Die,
}

/// Budget state for one robot.
#[derive(Debug, Clone, Copy)]
pub struct Monitor {
    state: MonitorState,
    ceiling: i32,
    remaining: i32,
    deferred: i32,
    should_die: bool,
    debug_depth: u32,
    seed: u64,
    paused_by_charge: bool,
    charged_total: i64,
    final_used: i32,
}

impl Monitor {
    /// A monitor for a robot type with the given per-round ceiling.
    #[must_use]
    pub fn new(ceiling: i32, seed: u64) -> Self {
        Self {
            state: MonitorState::Uninitialized,
            ceiling,
            remaining: ceiling,
            deferred: 0,
            should_die: false,
            debug_depth: 0,
            seed,
            paused_by_charge: false,
            charged_total: 0,
            final_used: 0,
        }
    }

    /// Attach to a freshly loaded program. No robot code has run yet.
    pub fn initialize(&mut self) {
        if self.state == MonitorState::Uninitialized {
            self.state = MonitorState::Paused;
        }
    }

    /// Start a turn: reset the budget to the ceiling, carrying any overspend.
    ///
    /// `remaining = ceiling + min(remaining, 0)`.
    pub fn begin_turn(&mut self) -> Resume {
        if self.should_die {
            self.state = MonitorState::Running;
            return Resume::Die;
        }
        self.remaining = if self.remaining < 0 {
            self.ceiling.checked_add(self.remaining).unwrap_or(i32::MIN)
        } else {
            self.ceiling
        };
        if self.paused_by_charge && self.remaining <= 0 {
            return Resume::StayPaused;
        }
        self.paused_by_charge = false;
        self.state = MonitorState::Running;
        Resume::Run
    }

    /// Flush `amount` units of block cost plus any deferred dynamic cost.
    ///
    /// Cost is not deducted while in debug mode, but deferred cost is still
    /// cleared.
    pub fn charge(&mut self, amount: u32) -> ChargeOutcome {
        if self.should_die {
            return ChargeOutcome::Die;
        }
        let deferred = std::mem::take(&mut self.deferred);
        if self.debug_depth > 0 {
            return ChargeOutcome::Continue;
        }
        let amount = i32::try_from(amount).unwrap_or(i32::MAX);
        self.remaining = self
            .remaining
            .checked_sub(amount)
            .and_then(|r| r.checked_sub(deferred))
            .unwrap_or(i32::MIN);
        self.charged_total = self
            .charged_total
            .saturating_add(i64::from(amount))
            .saturating_add(i64::from(deferred));
        if self.remaining <= 0 {
            self.paused_by_charge = true;
            self.state = MonitorState::Paused;
            return ChargeOutcome::Pause;
        }
        ChargeOutcome::Continue
    }

    /// Add dynamic cost to be deducted at the next charge. Non-positive
    /// amounts are ignored; the accumulator saturates.
    pub fn defer(&mut self, amount: i32) {
        if amount > 0 {
            self.deferred = self.deferred.saturating_add(amount);
        }
    }

    /// The robot gave up the rest of its turn.
    pub fn yield_turn(&mut self) {
        self.paused_by_charge = false;
        self.state = MonitorState::Paused;
    }

    /// The robot's per-turn entry routine returned.
    pub fn end_turn(&mut self) {
        self.yield_turn();
    }

    /// Record the death signal. Never cleared.
    pub fn kill(&mut self) {
        self.should_die = true;
    }

    /// Whether the death signal has been recorded.
    #[must_use]
    pub fn should_die(&self) -> bool {
        self.should_die
    }

    /// Mark the program as ended, caching the final cost figure.
    pub fn terminate(&mut self) {
        if self.state != MonitorState::Terminated {
            self.final_used = self.bytecode_num();
            self.state = MonitorState::Terminated;
        }
    }

    /// Enter a debug-only routine.
    pub fn enter_debug(&mut self) {
        self.debug_depth = self.debug_depth.saturating_add(1);
    }

    /// Leave a debug-only routine.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::DebugDepthUnderflow`] if no debug routine is
    /// active. The robot is marked for death as well.
    pub fn exit_debug(&mut self) -> Result<(), EngineError> {
        match self.debug_depth.checked_sub(1) {
            Some(depth) => {
                self.debug_depth = depth;
                Ok(())
            }
            None => {
                self.should_die = true;
                Err(EngineError::DebugDepthUnderflow)
            }
        }
    }

    /// Units used so far this turn: `ceiling - remaining`, saturating.
    /// After termination this is the figure at the moment of death.
    #[must_use]
    pub fn bytecode_num(&self) -> i32 {
        if self.state == MonitorState::Terminated {
            return self.final_used;
        }
        self.ceiling.saturating_sub(self.remaining)
    }

    /// Units remaining this turn.
    #[must_use]
    pub fn bytecodes_left(&self) -> i32 {
        self.remaining
    }

    /// Per-round ceiling.
    #[must_use]
    pub fn ceiling(&self) -> i32 {
        self.ceiling
    }

    /// Change the ceiling; takes effect at the next turn.
    pub fn set_ceiling(&mut self, ceiling: i32) {
        self.ceiling = ceiling;
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> MonitorState {
        self.state
    }

    /// The robot's deterministic seed.
    #[must_use]
    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Seed truncated to the low 32 bits, as handed to player code.
    #[must_use]
    pub fn random_seed(&self) -> i32 {
        #[allow(clippy::cast_possible_truncation)]
        let low = self.seed as u32;
        low.cast_signed()
    }

    /// Total units charged over the robot's life, used as its clock.
    #[must_use]
    pub fn logical_time(&self) -> i64 {
        self.charged_total
    }

    /// Current debug nesting depth.
    #[must_use]
    pub fn debug_depth(&self) -> u32 {
        self.debug_depth
    }
}
