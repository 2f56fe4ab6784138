//! Per-team robot output.
//!
//! Each line a robot prints is prefixed with `[TEAM:KIND#ID@ROUND] `. A team
//! may be silenced entirely, or capped at a byte limit after which a single
//! truncation notice is written and further output dropped.

use std::cell::RefCell;
use std::collections::HashSet;
use std::fmt;
use std::io::{self, Write};
use std::rc::Rc;

use crate::control::{RobotDescriptor, RobotId, Team};
use crate::error::EngineError;

/// Notice written once when a team exceeds its output limit.
pub const TRUNCATION_NOTICE: &str = "[output truncated due to team output limit]\n";

/// Output sink shared by every robot of one team.
pub struct TeamOutput {
    team: Team,
    sink: Box<dyn Write>,
    silenced: bool,
    limit: Option<usize>,
    written: usize,
    truncated: bool,
    mid_line: HashSet<RobotId>,
}

impl fmt::Debug for TeamOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TeamOutput")
            .field("team", &self.team)
            .field("silenced", &self.silenced)
            .field("limit", &self.limit)
            .field("written", &self.written)
            .finish_non_exhaustive()
    }
}

impl TeamOutput {
    /// Output for `team` written to `sink`.
    #[must_use]
    pub fn new(team: Team, sink: Box<dyn Write>) -> Self {
        Self {
            team,
            sink,
            silenced: false,
            limit: None,
            written: 0,
            truncated: false,
            mid_line: HashSet::new(),
        }
    }

    /// Output for `team` written to stdout.
    #[must_use]
    pub fn stdout(team: Team) -> Self {
        Self::new(team, Box::new(io::stdout()))
    }

    /// Output that is discarded.
    #[must_use]
    pub fn sink(team: Team) -> Self {
        Self::new(team, Box::new(io::sink())).silenced(true)
    }

    /// Output captured in memory, with a handle to read it back.
    #[must_use]
    pub fn capture(team: Team) -> (Self, CapturedOutput) {
        let captured = CapturedOutput::default();
        (Self::new(team, Box::new(captured.clone())), captured)
    }

    /// Discard everything written.
    #[must_use]
    pub fn silenced(mut self, silenced: bool) -> Self {
        self.silenced = silenced;
        self
    }

    /// Cap total bytes written.
    #[must_use]
    pub fn with_limit(mut self, limit: Option<usize>) -> Self {
        self.limit = limit;
        self
    }

    /// The team this output belongs to.
    #[must_use]
    pub fn team(&self) -> Team {
        self.team
    }

    /// Bytes written so far, headers included.
    #[must_use]
    pub fn written(&self) -> usize {
        self.written
    }

    /// Write text printed by a robot. A header starts every new line.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Output`] if the sink fails.
    pub fn print(
        &mut self,
        robot: &RobotDescriptor,
        round: u32,
        text: &str,
    ) -> Result<(), EngineError> {
        if self.silenced {
            return Ok(());
        }
        let mut buf = String::with_capacity(text.len() + 24);
        for piece in text.split_inclusive('\n') {
            if !self.mid_line.contains(&robot.id) {
                buf.push_str(&header(robot, round));
            }
            buf.push_str(piece);
            if piece.ends_with('\n') {
                self.mid_line.remove(&robot.id);
            } else {
                self.mid_line.insert(robot.id);
            }
        }
        self.emit(&buf)
    }

    /// Write a full line printed by a robot.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Output`] if the sink fails.
    pub fn println(
        &mut self,
        robot: &RobotDescriptor,
        round: u32,
        text: &str,
    ) -> Result<(), EngineError> {
        let mut line = String::with_capacity(text.len() + 1);
        line.push_str(text);
        line.push('\n');
        self.print(robot, round, &line)
    }

    /// Write an engine diagnostic about a robot, on its own line.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Output`] if the sink fails.
    pub fn diagnostic(
        &mut self,
        robot: &RobotDescriptor,
        round: u32,
        message: &str,
    ) -> Result<(), EngineError> {
        if self.mid_line.contains(&robot.id) {
            self.print(robot, round, "\n")?;
        }
        self.println(robot, round, message)
    }

    fn emit(&mut self, text: &str) -> Result<(), EngineError> {
        if self.truncated || text.is_empty() {
            return Ok(());
        }
        let next = self.written.saturating_add(text.len());
        if self.limit.is_some_and(|limit| next > limit) {
            self.truncated = true;
            self.sink.write_all(TRUNCATION_NOTICE.as_bytes())?;
            return Ok(());
        }
        self.sink.write_all(text.as_bytes())?;
        self.written = next;
        Ok(())
    }

    /// Flush the sink.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Output`] if the sink fails.
    pub fn flush(&mut self) -> Result<(), EngineError> {
        self.sink.flush()?;
        Ok(())
    }
}

/// `[TEAM:KIND#ID@ROUND] `
#[must_use]
pub fn header(robot: &RobotDescriptor, round: u32) -> String {
    format!("[{}:{}#{}@{}] ", robot.team, robot.kind, robot.id, round)
}

/// In-memory sink readable after the fact.
#[derive(Debug, Clone, Default)]
pub struct CapturedOutput(Rc<RefCell<Vec<u8>>>);

impl CapturedOutput {
    /// Everything written so far.
    #[must_use]
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.borrow()).into_owned()
    }
}

impl Write for CapturedOutput {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.borrow_mut().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn robot(id: u32) -> RobotDescriptor {
        RobotDescriptor {
            id: RobotId::new(id),
            team: Team::A,
            kind: "SOLDIER".into(),
            ceiling: 100,
        }
    }

    #[test]
    fn test_lines_get_headers() {
        let (mut out, captured) = TeamOutput::capture(Team::A);
        out.println(&robot(7), 3, "hello").unwrap();
        out.print(&robot(7), 3, "a").unwrap();
        out.print(&robot(7), 3, "b\nc\n").unwrap();
        assert_eq!(
            captured.contents(),
            "[A:SOLDIER#7@3] hello\n[A:SOLDIER#7@3] ab\n[A:SOLDIER#7@3] c\n"
        );
    }

    #[test]
    fn test_limit_truncates_once() {
        let (out, captured) = TeamOutput::capture(Team::A);
        let mut out = out.with_limit(Some(30));
        out.println(&robot(1), 1, "first").unwrap();
        out.println(&robot(1), 1, "second").unwrap();
        out.println(&robot(1), 1, "third").unwrap();
        assert_eq!(
            captured.contents(),
            format!("[A:SOLDIER#1@1] first\n{TRUNCATION_NOTICE}")
        );
    }

    #[test]
    fn test_silenced_team_writes_nothing() {
        let (out, captured) = TeamOutput::capture(Team::A);
        let mut out = out.silenced(true);
        out.println(&robot(1), 1, "hidden").unwrap();
        out.diagnostic(&robot(1), 1, "also hidden").unwrap();
        assert!(captured.contents().is_empty());
    }

    #[test]
    fn test_diagnostic_breaks_partial_line() {
        let (mut out, captured) = TeamOutput::capture(Team::A);
        out.print(&robot(2), 5, "partial").unwrap();
        out.diagnostic(&robot(2), 5, "died").unwrap();
        assert_eq!(
            captured.contents(),
            "[A:SOLDIER#2@5] partial\n[A:SOLDIER#2@5] died\n"
        );
    }
}
