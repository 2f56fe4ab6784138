//! Batch command implementation.

use super::output::{BatchStats, format_batch_text};
use super::run::display_name;
use super::{CliError, MatchArgs, OutputFormat, load_program};
use bytecage::arena::Arena;
use bytecage::config::EngineConfig;
use bytecage::control::{PlayerControlProvider, TeamControlProvider};
use bytecage::output::TeamOutput;
use bytecage::{Program, Team};
use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

/// Execute the batch command.
///
/// # Errors
///
/// Returns an error if a program or the config cannot be read.
pub(crate) fn execute(
    programs: [PathBuf; 2],
    args: &MatchArgs,
    matches: u64,
    threads: Option<usize>,
    format: OutputFormat,
) -> Result<(), CliError> {
    let config = args.engine_config()?;
    let [a, b] = &programs;
    let program_a = load_program(a, config.debug_methods)?;
    let program_b = load_program(b, config.debug_methods)?;

    if let Some(num_threads) = threads {
        rayon::ThreadPoolBuilder::new()
            .num_threads(num_threads)
            .build_global()
            .ok(); // Ignore error if already initialized
    }

    let pb = ProgressBar::new(matches);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} matches ({per_sec})")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=>-"),
    );

    let start = Instant::now();
    let stats = (0..matches)
        .into_par_iter()
        .fold(BatchStats::default, |mut local, i| {
            let seed = config.seed.wrapping_add(i);
            play(&program_a, &program_b, &config, args, seed, &mut local);
            pb.inc(1);
            local
        })
        .reduce(BatchStats::default, |mut x, y| {
            x.merge(&y);
            x
        });
    pb.finish_with_message("done");
    let duration = start.elapsed();

    match format {
        OutputFormat::Text => {
            let names = [display_name(a), display_name(b)];
            println!();
            print!("{}", format_batch_text(&stats, [&names[0], &names[1]]));
            println!();
            println!("Duration: {:.2}s", duration.as_secs_f64());
        }
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
    }
    Ok(())
}

fn play(
    a: &Arc<Program>,
    b: &Arc<Program>,
    base: &EngineConfig,
    args: &MatchArgs,
    seed: u64,
    stats: &mut BatchStats,
) {
    let config = EngineConfig {
        seed,
        ..base.clone()
    };
    let provider = |program: &Arc<Program>, team| {
        Box::new(PlayerControlProvider::new(
            Arc::clone(program),
            config.clone(),
            TeamOutput::sink(team),
        ))
    };
    let mut teams = TeamControlProvider::new()
        .with_team(Team::A, provider(a, Team::A))
        .with_team(Team::B, provider(b, Team::B));
    match Arena::new(args.arena_config(seed)).run(&mut teams) {
        Ok(report) => stats.add(&report),
        Err(e) => {
            tracing::error!(seed, error = %e, "match abandoned");
            stats.engine_faults += 1;
        }
    }
}
