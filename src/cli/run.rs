//! Run command implementation.

use super::output::format_text;
use super::{CliError, MatchArgs, OutputFormat, load_program};
use bytecage::arena::Arena;
use bytecage::control::{PlayerControlProvider, TeamControlProvider};
use bytecage::Team;
use std::fs;
use std::path::{Path, PathBuf};

/// Execute the run command.
///
/// # Errors
///
/// Returns an error if a program or the config cannot be read, or the
/// match hits an engine fault.
pub(crate) fn execute(
    programs: [PathBuf; 2],
    args: &MatchArgs,
    silence: &[Team],
    format: OutputFormat,
    profile: Option<PathBuf>,
) -> Result<(), CliError> {
    let mut config = args.engine_config()?;
    config.silenced_teams.extend_from_slice(silence);
    if profile.is_some() {
        config.profiling = true;
    }

    let [a, b] = &programs;
    let program_a = load_program(a, config.debug_methods)?;
    let program_b = load_program(b, config.debug_methods)?;

    let mut provider = TeamControlProvider::new()
        .with_team(
            Team::A,
            Box::new(PlayerControlProvider::for_team(program_a, Team::A, config.clone())),
        )
        .with_team(
            Team::B,
            Box::new(PlayerControlProvider::for_team(program_b, Team::B, config.clone())),
        );

    let report = Arena::new(args.arena_config(config.seed)).run(&mut provider)?;

    if let Some(path) = profile {
        let json = serde_json::to_string(&report.profiles)?;
        fs::write(&path, json)
            .map_err(|e| CliError::new(format!("Failed to write {}: {e}", path.display())))?;
    }

    match format {
        OutputFormat::Text => {
            let names = [display_name(a), display_name(b)];
            print!("{}", format_text(&report, [&names[0], &names[1]]));
        }
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }
    Ok(())
}

/// Last path component, for display.
pub(crate) fn display_name(path: &Path) -> String {
    path.file_name()
        .map_or_else(|| "unknown".to_string(), |n| n.to_string_lossy().to_string())
}
