//! Output formatting utilities for CLI.

use std::fmt::Write as _;

use bytecage::arena::MatchReport;
use bytecage::Team;
use serde::Serialize;

/// Format a match report as human-readable text.
pub(super) fn format_text(report: &MatchReport, names: [&str; 2]) -> String {
    let mut output = String::new();

    let _ = writeln!(output, "Match Result (seed: {})", report.seed);
    let _ = writeln!(output, "  Rounds played: {}", report.rounds_played);
    if let Some(team) = report.resigned {
        let _ = writeln!(output, "  Resigned: team {team} ({})", name_of(team, names));
    }
    let _ = writeln!(output, "  Event digest: {}", report.digest);
    output.push('\n');

    for team in Team::PLAYERS {
        let robots: Vec<_> = report.robots.iter().filter(|r| r.team == team).collect();
        let alive = robots.iter().filter(|r| r.alive).count();
        let bytecodes: i64 = robots.iter().map(|r| r.bytecodes).sum();
        let _ = writeln!(
            output,
            "Team {team} ({}): {alive}/{} alive, {bytecodes} bytecodes",
            name_of(team, names),
            robots.len()
        );
        for r in robots {
            let _ = writeln!(
                output,
                "  #{:<4} hp {:>3}  {:<9} {:>10} bytecodes",
                r.id,
                r.hp,
                if r.alive { "alive" } else { "destroyed" },
                r.bytecodes
            );
        }
    }
    output
}

fn name_of(team: Team, names: [&str; 2]) -> &str {
    match team {
        Team::A => names[0],
        Team::B => names[1],
        Team::Neutral => "neutral",
    }
}

/// Aggregate figures over many matches.
#[derive(Debug, Clone, Default, Serialize)]
pub(super) struct BatchStats {
    /// Matches completed.
    pub(super) matches: u64,
    /// Matches abandoned on an engine fault.
    pub(super) engine_faults: u64,
    /// Robots alive at match end, per team.
    pub(super) survivors: [u64; 2],
    /// Bytecodes used, per team.
    pub(super) bytecodes: [i64; 2],
    /// Resignations, per team.
    pub(super) resignations: [u64; 2],
    /// Total rounds played.
    pub(super) rounds: u64,
}

impl BatchStats {
    /// Fold one match in.
    pub(super) fn add(&mut self, report: &MatchReport) {
        self.matches += 1;
        self.rounds += u64::from(report.rounds_played);
        for r in &report.robots {
            let Some(slot) = team_slot(r.team) else {
                continue;
            };
            self.bytecodes[slot] += r.bytecodes;
            if r.alive {
                self.survivors[slot] += 1;
            }
        }
        if let Some(slot) = report.resigned.and_then(team_slot) {
            self.resignations[slot] += 1;
        }
    }

    /// Merge another accumulator in.
    pub(super) fn merge(&mut self, other: &Self) {
        self.matches += other.matches;
        self.engine_faults += other.engine_faults;
        self.rounds += other.rounds;
        for slot in 0..2 {
            self.survivors[slot] += other.survivors[slot];
            self.bytecodes[slot] += other.bytecodes[slot];
            self.resignations[slot] += other.resignations[slot];
        }
    }
}

fn team_slot(team: Team) -> Option<usize> {
    match team {
        Team::A => Some(0),
        Team::B => Some(1),
        Team::Neutral => None,
    }
}

/// Format batch statistics as human-readable text.
pub(super) fn format_batch_text(stats: &BatchStats, names: [&str; 2]) -> String {
    let mut output = String::new();
    let _ = writeln!(output, "Batch Results ({} matches)", stats.matches);
    if stats.engine_faults > 0 {
        let _ = writeln!(output, "  Engine faults: {}", stats.engine_faults);
    }
    let _ = writeln!(output, "  Rounds played: {}", stats.rounds);
    for (slot, team) in Team::PLAYERS.into_iter().enumerate() {
        let _ = writeln!(
            output,
            "  Team {team} ({}): {} survivors, {} bytecodes, {} resignations",
            names[slot], stats.survivors[slot], stats.bytecodes[slot], stats.resignations[slot]
        );
    }
    output
}
