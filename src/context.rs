//! Per-robot isolated execution contexts.
//!
//! Every robot gets its own [`ExecutionContext`]: its own static storage for
//! every program and library unit it touches, its own support-unit state,
//! and its own initialization state. Rewritten images are shared through
//! the [`Program`], but nothing mutable is.
//!
//! A unit name is resolved in this order:
//!
//! 1. the program's latched load error, if any, fails the load;
//! 2. units already loaded here;
//! 3. images already cached on the program;
//! 4. support units (`sys/*` and `bc/Clock`), fresh and never rewritten;
//! 5. the program's own units, rewritten with checking on;
//! 6. `std/util/*` library units, rewritten with checking off;
//! 7. shared natives (`std/Math`, `std/String`, `std/Random`, `std/Error`,
//!    `bc/RobotController`);
//! 8. anything else is missing.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use tracing::debug;

use crate::error::InstrumentationError;
use crate::isa::{FieldRef, MethodRef, Op, STATIC_INIT};
use crate::program::{ENTRY_ROUTINE, Program};
use crate::rewriter::RewrittenImage;
use crate::vm::natives::{self, Native, SupportState};
use crate::vm::{Fault, FaultClass, Value};

/// Index of a loaded unit within one context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UnitId(usize);

/// Progress of a unit's static initializer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitState {
    /// Not run yet.
    Pending,
    /// Running now; touches from inside the initializer proceed.
    Running,
    /// Finished, or the unit has no initializer.
    Done,
    /// The initializer raised; the unit is unusable.
    Failed,
}

/// Where a call lands.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Callee {
    /// An IR routine.
    Routine { unit: UnitId, index: usize },
    /// A native routine.
    Native(&'static Native),
}

#[derive(Debug)]
enum Binding {
    /// A rewritten unit with private statics. `player` is set for the
    /// program's own units, as opposed to library units.
    Image {
        image: Arc<RewrittenImage>,
        statics: Vec<Value>,
        init: InitState,
        player: bool,
    },
    Support(&'static [Native]),
    Shared(&'static [Native]),
}

#[derive(Debug)]
struct LoadedUnit {
    name: String,
    binding: Binding,
}

/// One robot's loaded units and private state.
#[derive(Debug)]
pub struct ExecutionContext {
    program: Arc<Program>,
    units: Vec<LoadedUnit>,
    by_name: HashMap<String, UnitId>,
    support: SupportState,
    entry: UnitId,
    entry_routine: usize,
}

impl ExecutionContext {
    /// Load a program's entry unit and everything it references, and check
    /// that every reference resolves.
    ///
    /// # Errors
    ///
    /// Returns the MISSING or ILLEGAL error of the first unit that fails.
    /// The error is latched on the program.
    pub fn new(program: Arc<Program>, seed: u64) -> Result<Self, InstrumentationError> {
        if let Some(err) = program.latched() {
            return Err(err.clone());
        }
        let entry_name = program
            .entry_unit()
            .map(str::to_string)
            .ok_or_else(|| {
                program.latch(InstrumentationError::missing(
                    program.name(),
                    "no RobotPlayer entry unit",
                ))
            })?;

        let mut ctx = Self {
            program,
            units: Vec::new(),
            by_name: HashMap::new(),
            support: SupportState::new(seed),
            entry: UnitId(0),
            entry_routine: 0,
        };
        ctx.entry = ctx.load(&entry_name)?;

        let mut queue = VecDeque::from([ctx.entry]);
        while let Some(id) = queue.pop_front() {
            let Binding::Image { image, .. } = &ctx.units[id.0].binding else {
                continue;
            };
            let references: Vec<String> = image.references().iter().cloned().collect();
            for name in references {
                if !ctx.by_name.contains_key(&name) {
                    queue.push_back(ctx.load(&name)?);
                }
            }
        }
        ctx.link()?;

        let entry_image = ctx.image(ctx.entry).ok_or_else(|| {
            ctx.program.latch(InstrumentationError::illegal(
                &entry_name,
                "entry unit is not a program unit",
            ))
        })?;
        ctx.entry_routine = entry_image
            .unit()
            .routines
            .iter()
            .position(|r| r.name == ENTRY_ROUTINE && r.params == 0)
            .ok_or_else(|| {
                ctx.program.latch(InstrumentationError::illegal(
                    &entry_name,
                    "entry unit must define routine run with 0 params",
                ))
            })?;
        debug!(program = %ctx.program.name(), units = ctx.units.len(), "context loaded");
        Ok(ctx)
    }

    /// Load one unit by name into this context. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns the program's latched error, the unit's rewrite error, or a
    /// MISSING error if the name resolves nowhere.
    pub fn load(&mut self, name: &str) -> Result<UnitId, InstrumentationError> {
        if let Some(err) = self.program.latched() {
            return Err(err.clone());
        }
        if let Some(&id) = self.by_name.get(name) {
            return Ok(id);
        }
        let binding = if let Some(table) = natives::support_unit(name) {
            Binding::Support(table)
        } else if let Some(image) = self.program.image(name)? {
            let statics = vec![Value::Null; image.unit().statics.len()];
            let init = if image.unit().has_static_init() {
                InitState::Pending
            } else {
                InitState::Done
            };
            Binding::Image {
                player: self.program.has_unit(name),
                image,
                statics,
                init,
            }
        } else if let Some(table) = natives::shared_unit(name) {
            Binding::Shared(table)
        } else {
            return Err(self
                .program
                .latch(InstrumentationError::missing(name, format!("unit {name} not found"))));
        };
        let id = UnitId(self.units.len());
        self.units.push(LoadedUnit {
            name: name.to_string(),
            binding,
        });
        self.by_name.insert(name.to_string(), id);
        Ok(id)
    }

    /// Check every call and static reference of every loaded image.
    fn link(&self) -> Result<(), InstrumentationError> {
        for unit in &self.units {
            let Binding::Image { image, .. } = &unit.binding else {
                continue;
            };
            for routine in &image.unit().routines {
                for op in &routine.code {
                    let problem = match op {
                        Op::Call(m) if m.name == STATIC_INIT => {
                            return Err(self.program.latch(InstrumentationError::illegal(
                                &unit.name,
                                format!("{}: static initializer {m} called directly", routine.name),
                            )));
                        }
                        Op::Call(m) if !self.can_call(m) => {
                            format!("no routine {m} taking {} arguments", m.argc)
                        }
                        Op::GetStatic(f) | Op::PutStatic(f) if !self.has_static(f) => {
                            format!("no static {f}")
                        }
                        _ => continue,
                    };
                    return Err(self.program.latch(InstrumentationError::missing(
                        &unit.name,
                        format!("{}: {problem}", routine.name),
                    )));
                }
            }
        }
        Ok(())
    }

    fn can_call(&self, m: &MethodRef) -> bool {
        let Some(id) = self.by_name.get(&m.unit) else {
            return false;
        };
        match &self.units[id.0].binding {
            Binding::Image { image, .. } => image
                .unit()
                .routine(&m.name)
                .is_some_and(|r| r.params == u16::from(m.argc)),
            Binding::Support(table) | Binding::Shared(table) => {
                natives::find(*table, &m.name).is_some_and(|n| n.arity == m.argc)
            }
        }
    }

    fn has_static(&self, f: &FieldRef) -> bool {
        self.by_name
            .get(&f.unit)
            .and_then(|id| self.image(*id))
            .is_some_and(|image| image.unit().static_slot(&f.name).is_some())
    }

    /// The program this context runs.
    #[must_use]
    pub fn program(&self) -> &Arc<Program> {
        &self.program
    }

    /// The entry unit.
    #[must_use]
    pub fn entry(&self) -> UnitId {
        self.entry
    }

    /// Index of the entry routine within the entry unit.
    #[must_use]
    pub fn entry_routine(&self) -> usize {
        self.entry_routine
    }

    /// Names of loaded units, in load order.
    pub fn loaded_units(&self) -> impl Iterator<Item = &str> {
        self.units.iter().map(|u| u.name.as_str())
    }

    /// Id of a loaded unit.
    #[must_use]
    pub fn unit_id(&self, name: &str) -> Option<UnitId> {
        self.by_name.get(name).copied()
    }

    /// Name of a loaded unit.
    #[must_use]
    pub fn unit_name(&self, id: UnitId) -> &str {
        &self.units[id.0].name
    }

    /// The rewritten image of a loaded IR unit.
    #[must_use]
    pub fn image(&self, id: UnitId) -> Option<&Arc<RewrittenImage>> {
        match &self.units[id.0].binding {
            Binding::Image { image, .. } => Some(image),
            _ => None,
        }
    }

    /// Whether `id` is one of the program's own units.
    #[must_use]
    pub fn is_player_unit(&self, id: UnitId) -> bool {
        matches!(&self.units[id.0].binding, Binding::Image { player: true, .. })
    }

    /// Initialization state of an IR unit. Native units are always done.
    #[must_use]
    pub fn init_state(&self, id: UnitId) -> InitState {
        match &self.units[id.0].binding {
            Binding::Image { init, .. } => *init,
            _ => InitState::Done,
        }
    }

    pub(crate) fn set_init_state(&mut self, id: UnitId, state: InitState) {
        if let Binding::Image { init, .. } = &mut self.units[id.0].binding {
            *init = state;
        }
    }

    /// Current value of a static, by unit and field name.
    #[must_use]
    pub fn static_value(&self, unit: &str, field: &str) -> Option<&Value> {
        let id = self.unit_id(unit)?;
        let Binding::Image { image, statics, .. } = &self.units[id.0].binding else {
            return None;
        };
        statics.get(image.unit().static_slot(field)?)
    }

    /// Resolve a static field to its unit and slot.
    pub(crate) fn static_slot(&self, field: &FieldRef) -> Result<(UnitId, usize), Fault> {
        self.by_name
            .get(&field.unit)
            .and_then(|&id| Some((id, self.image(id)?.unit().static_slot(&field.name)?)))
            .ok_or_else(|| Fault::new(FaultClass::Error, format!("unresolved static {field}")))
    }

    pub(crate) fn statics_mut(&mut self, id: UnitId) -> &mut [Value] {
        match &mut self.units[id.0].binding {
            Binding::Image { statics, .. } => statics,
            _ => &mut [],
        }
    }

    /// Resolve a call target. Linking has already checked every target, so
    /// failure here is an engine fault surfaced to the robot.
    pub(crate) fn resolve(&self, m: &MethodRef) -> Result<Callee, Fault> {
        let unresolved = || Fault::new(FaultClass::Error, format!("unresolved call {m}"));
        let id = *self.by_name.get(&m.unit).ok_or_else(unresolved)?;
        match &self.units[id.0].binding {
            Binding::Image { image, .. } => image
                .unit()
                .routine_index(&m.name)
                .map(|index| Callee::Routine { unit: id, index })
                .ok_or_else(unresolved),
            Binding::Support(table) | Binding::Shared(table) => natives::find(*table, &m.name)
                .map(Callee::Native)
                .ok_or_else(unresolved),
        }
    }

    pub(crate) fn support_mut(&mut self) -> &mut SupportState {
        &mut self.support
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::error::InstrumentationKind;

    fn program(units: &[(&str, &str)]) -> Arc<Program> {
        let units: BTreeMap<String, String> = units
            .iter()
            .map(|(n, s)| ((*n).to_string(), (*s).to_string()))
            .collect();
        Arc::new(Program::from_units("test", units, false))
    }

    #[test]
    fn test_loads_transitively() {
        let p = program(&[
            (
                "t/RobotPlayer",
                ".routine run 0\n call t/Helper.go 0\n pop\n return\n.end",
            ),
            (
                "t/Helper",
                ".routine go 0\n call std/util/IntList.new 0\n pop\n return\n.end",
            ),
        ]);
        let ctx = ExecutionContext::new(p, 1).unwrap();
        let loaded: Vec<_> = ctx.loaded_units().collect();
        assert_eq!(loaded[0], "t/RobotPlayer");
        assert!(loaded.contains(&"t/Helper"));
        assert!(loaded.contains(&"std/util/IntList"));
        assert!(loaded.contains(&"sys/System"));
        assert!(ctx.is_player_unit(ctx.entry()));
        let list = ctx.unit_id("std/util/IntList").unwrap();
        assert!(!ctx.is_player_unit(list));
    }

    #[test]
    fn test_missing_unit() {
        let p = program(&[(
            "t/RobotPlayer",
            ".routine run 0\n call t/Gone.go 0\n pop\n return\n.end",
        )]);
        let err = ExecutionContext::new(Arc::clone(&p), 1).unwrap_err();
        assert_eq!(err.kind, InstrumentationKind::Missing);
        assert!(err.message.contains("t/Gone"));
        assert_eq!(p.latched(), Some(&err));
    }

    #[test]
    fn test_wrong_arity_is_missing() {
        let p = program(&[
            (
                "t/RobotPlayer",
                ".routine run 0\n push 1\n call t/Helper.go 1\n pop\n return\n.end",
            ),
            ("t/Helper", ".routine go 0\n return\n.end"),
        ]);
        let err = ExecutionContext::new(p, 1).unwrap_err();
        assert_eq!(err.kind, InstrumentationKind::Missing);
        assert_eq!(err.unit, "t/RobotPlayer");
    }

    #[test]
    fn test_missing_native_routine() {
        let p = program(&[(
            "t/RobotPlayer",
            ".routine run 0\n push 1\n call std/Math.abs 2\n pop\n return\n.end",
        )]);
        assert!(ExecutionContext::new(p, 1).is_err());
    }

    #[test]
    fn test_entry_must_have_run() {
        let p = program(&[("t/RobotPlayer", ".routine go 0\n return\n.end")]);
        let err = ExecutionContext::new(p, 1).unwrap_err();
        assert!(err.is_illegal());
    }

    #[test]
    fn test_statics_are_private_per_context() {
        let p = program(&[(
            "t/RobotPlayer",
            ".static n\n.routine run 0\n getstatic n\n pop\n return\n.end",
        )]);
        let mut a = ExecutionContext::new(Arc::clone(&p), 1).unwrap();
        let b = ExecutionContext::new(p, 2).unwrap();
        let (unit, slot) = a
            .static_slot(&FieldRef {
                unit: "t/RobotPlayer".into(),
                name: "n".into(),
            })
            .unwrap();
        a.statics_mut(unit)[slot] = Value::Int(5);
        assert!(matches!(a.static_value("t/RobotPlayer", "n"), Some(Value::Int(5))));
        assert!(matches!(b.static_value("t/RobotPlayer", "n"), Some(Value::Null)));
    }

    #[test]
    fn test_latched_program_fails_fast() {
        let p = program(&[
            ("t/RobotPlayer", ".routine run 0\n return\n.end"),
            ("t/Bad", ".routine run 0\n call std/Net.open 0\n pop\n return\n.end"),
        ]);
        assert!(p.image("t/Bad").is_err());
        let err = ExecutionContext::new(p, 1).unwrap_err();
        assert!(err.is_illegal());
        assert_eq!(err.unit, "t/Bad");
    }
}
