//! Frame profiles in bytecode time.
//!
//! A [`Profiler`] records when program routines are entered and left,
//! measured in the robot's cumulative charged bytecodes. Profiles of one team
//! are gathered into a [`ProfilerCollection`]. Recording is observational
//! only and never changes what a robot computes or pays.

use std::cell::Cell;
use std::collections::HashMap;
use std::rc::Rc;

use serde::Serialize;

use crate::control::{RobotDescriptor, Team};

/// Events recorded per team before recording stops.
pub const MAX_EVENTS: usize = 10_000_000;

/// Whether a frame was entered or left.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EventKind {
    /// Frame entered.
    Open,
    /// Frame left, normally or by unwinding.
    Close,
}

/// One profiler event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Event {
    /// Open or close.
    #[serde(rename = "type")]
    pub kind: EventKind,
    /// Index into the profile's frame names.
    pub frame: usize,
    /// Cumulative charged bytecodes at the event.
    pub at: i64,
}

/// Events of one robot.
#[derive(Debug, Clone, Serialize)]
pub struct Profiler {
    name: String,
    frames: Vec<String>,
    events: Vec<Event>,
    #[serde(skip)]
    index: HashMap<String, usize>,
    #[serde(skip)]
    open: Vec<usize>,
    #[serde(skip)]
    budget: Rc<Cell<usize>>,
}

impl Profiler {
    /// Profile of one robot, drawing on a shared event budget.
    #[must_use]
    pub fn new(robot: &RobotDescriptor, budget: Rc<Cell<usize>>) -> Self {
        Self {
            name: format!("#{} ({})", robot.id, robot.kind),
            frames: Vec::new(),
            events: Vec::new(),
            index: HashMap::new(),
            open: Vec::new(),
            budget,
        }
    }

    /// Display name, `#id (kind)`.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Recorded events.
    #[must_use]
    pub fn events(&self) -> &[Event] {
        &self.events
    }

    /// Interned frame names.
    #[must_use]
    pub fn frames(&self) -> &[String] {
        &self.frames
    }

    /// A frame named `frame` was entered.
    pub fn open(&mut self, frame: &str, at: i64) {
        let idx = match self.index.get(frame) {
            Some(&idx) => idx,
            None => {
                let idx = self.frames.len();
                self.frames.push(frame.to_string());
                self.index.insert(frame.to_string(), idx);
                idx
            }
        };
        self.open.push(idx);
        self.record(EventKind::Open, idx, at);
    }

    /// The innermost open frame was left.
    pub fn close(&mut self, at: i64) {
        if let Some(idx) = self.open.pop() {
            self.record(EventKind::Close, idx, at);
        }
    }

    /// Close every open frame, innermost first.
    pub fn close_all(&mut self, at: i64) {
        while !self.open.is_empty() {
            self.close(at);
        }
    }

    fn record(&mut self, kind: EventKind, frame: usize, at: i64) {
        let left = self.budget.get();
        if left == 0 {
            return;
        }
        self.budget.set(left - 1);
        self.events.push(Event { kind, frame, at });
    }
}

/// Profiles of every robot of one team.
#[derive(Debug, Clone, Serialize)]
pub struct ProfilerCollection {
    team: Team,
    profiles: Vec<Profiler>,
    #[serde(skip)]
    budget: Rc<Cell<usize>>,
}

impl ProfilerCollection {
    /// An empty collection for `team`.
    #[must_use]
    pub fn new(team: Team) -> Self {
        Self {
            team,
            profiles: Vec::new(),
            budget: Rc::new(Cell::new(MAX_EVENTS)),
        }
    }

    /// The team profiled.
    #[must_use]
    pub fn team(&self) -> Team {
        self.team
    }

    /// A new profiler for `robot` sharing this collection's event budget.
    #[must_use]
    pub fn profiler_for(&self, robot: &RobotDescriptor) -> Profiler {
        Profiler::new(robot, Rc::clone(&self.budget))
    }

    /// Add a finished profile.
    pub fn push(&mut self, profiler: Profiler) {
        self.profiles.push(profiler);
    }

    /// Profiles collected so far.
    #[must_use]
    pub fn profiles(&self) -> &[Profiler] {
        &self.profiles
    }

    /// Serialize to JSON.
    ///
    /// # Errors
    ///
    /// Returns the serializer's error.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::RobotId;

    fn robot() -> RobotDescriptor {
        RobotDescriptor {
            id: RobotId::new(4),
            team: Team::B,
            kind: "SCOUT".into(),
            ceiling: 100,
        }
    }

    #[test]
    fn test_frames_are_interned() {
        let collection = ProfilerCollection::new(Team::B);
        let mut p = collection.profiler_for(&robot());
        p.open("b/RobotPlayer.run", 0);
        p.open("b/Nav.step", 3);
        p.close(9);
        p.open("b/Nav.step", 10);
        p.close_all(12);
        assert_eq!(p.name(), "#4 (SCOUT)");
        assert_eq!(p.frames().len(), 2);
        let kinds: Vec<_> = p.events().iter().map(|e| (e.kind, e.frame, e.at)).collect();
        assert_eq!(
            kinds,
            vec![
                (EventKind::Open, 0, 0),
                (EventKind::Open, 1, 3),
                (EventKind::Close, 1, 9),
                (EventKind::Open, 1, 10),
                (EventKind::Close, 1, 12),
                (EventKind::Close, 0, 12),
            ]
        );
    }

    #[test]
    fn test_budget_caps_events() {
        let budget = Rc::new(Cell::new(2));
        let mut p = Profiler::new(&robot(), budget);
        p.open("x", 0);
        p.open("y", 1);
        p.open("z", 2);
        assert_eq!(p.events().len(), 2);
    }

    #[test]
    fn test_collection_serializes() {
        let mut collection = ProfilerCollection::new(Team::B);
        let mut p = collection.profiler_for(&robot());
        p.open("b/RobotPlayer.run", 0);
        p.close(1);
        collection.push(p);
        let json = collection.to_json().unwrap();
        assert!(json.contains("\"#4 (SCOUT)\""));
        assert!(json.contains("\"type\":\"Open\""));
    }
}
