//! Bytecage CLI - run, validate and inspect sandboxed robot programs.

// Allow print in the CLI binary
#![allow(clippy::print_stdout, clippy::print_stderr)]

mod cli;

use bytecage::Team;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

/// Bytecage - a deterministic, bytecode-metered robot sandbox
#[derive(Parser, Debug)]
#[command(name = "bytecage")]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

/// Available commands
#[derive(Subcommand, Debug)]
enum Commands {
    /// Play one match between two programs
    Run {
        /// Team A program (directory or .zip)
        program_a: PathBuf,

        /// Team B program (directory or .zip)
        program_b: PathBuf,

        #[command(flatten)]
        args: cli::MatchArgs,

        /// Discard output of these teams
        #[arg(long, value_parser = parse_team)]
        silence: Vec<Team>,

        /// Output format: text or json
        #[arg(short, long, default_value = "text")]
        format: cli::OutputFormat,

        /// Write frame profiles as JSON to this file
        #[arg(long)]
        profile: Option<PathBuf>,
    },

    /// Load every unit of a program and report MISSING/ILLEGAL constructs
    Validate {
        /// Program directory or .zip
        program: PathBuf,

        /// Check with debug_* routines enabled
        #[arg(long)]
        debug_methods: bool,
    },

    /// Print the rewritten disassembly of one unit
    Instrument {
        /// Program directory or .zip
        program: PathBuf,

        /// Unit name, e.g. team/RobotPlayer
        unit: String,

        /// Rewrite with debug_* routines enabled
        #[arg(long)]
        debug_methods: bool,
    },

    /// Play many seeded matches in parallel and aggregate results
    Batch {
        /// Team A program (directory or .zip)
        program_a: PathBuf,

        /// Team B program (directory or .zip)
        program_b: PathBuf,

        #[command(flatten)]
        args: cli::MatchArgs,

        /// Number of matches (seeds increment from --seed)
        #[arg(short, long, default_value = "100")]
        matches: u64,

        /// Parallel threads (default: CPU count)
        #[arg(short = 'j', long)]
        threads: Option<usize>,

        /// Output format: text or json
        #[arg(short, long, default_value = "text")]
        format: cli::OutputFormat,
    },
}

fn parse_team(s: &str) -> Result<Team, String> {
    match s {
        "A" | "a" => Ok(Team::A),
        "B" | "b" => Ok(Team::B),
        other => Err(format!("unknown team {other} (expected A or B)")),
    }
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let result = match args.command {
        Commands::Run {
            program_a,
            program_b,
            args,
            silence,
            format,
            profile,
        } => cli::run::execute([program_a, program_b], &args, &silence, format, profile),

        Commands::Validate {
            program,
            debug_methods,
        } => cli::validate::execute(&program, debug_methods),

        Commands::Instrument {
            program,
            unit,
            debug_methods,
        } => cli::instrument::execute(&program, &unit, debug_methods),

        Commands::Batch {
            program_a,
            program_b,
            args,
            matches,
            threads,
            format,
        } => cli::batch::execute([program_a, program_b], &args, matches, threads, format),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}
