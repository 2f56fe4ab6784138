//! CLI command implementations for Bytecage.

pub(crate) mod batch;
pub(crate) mod instrument;
pub(crate) mod run;
pub(crate) mod validate;

mod output;

use bytecage::arena::{ArenaConfig, ArenaError};
use bytecage::config::{ConfigError, EngineConfig};
use bytecage::program::{ArchiveSource, DirectorySource, ProgramSource, SourceError};
use bytecage::Program;
use clap::{Args, ValueEnum};
use std::error::Error;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Output format for match and batch results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub(crate) enum OutputFormat {
    /// Human-readable text output.
    Text,
    /// Machine-readable JSON output.
    Json,
}

/// Match parameters shared by `run` and `batch`.
#[derive(Debug, Clone, Args)]
pub(crate) struct MatchArgs {
    /// Rounds per match
    #[arg(short, long, default_value = "200")]
    pub(crate) rounds: u32,

    /// Robots per team
    #[arg(long, default_value = "3")]
    pub(crate) robots: u32,

    /// Per-round bytecode ceiling of each robot
    #[arg(long, default_value = "10000")]
    pub(crate) ceiling: i32,

    /// Seed (default: from config, else 0)
    #[arg(short, long)]
    pub(crate) seed: Option<u64>,

    /// Engine config file (JSON)
    #[arg(short, long)]
    pub(crate) config: Option<PathBuf>,

    /// Run debug_* routines
    #[arg(long)]
    pub(crate) debug_methods: bool,
}

impl MatchArgs {
    /// Engine config from the file, with command-line overrides applied.
    pub(crate) fn engine_config(&self) -> Result<EngineConfig, CliError> {
        let mut config = match &self.config {
            Some(path) => EngineConfig::from_path(path)?,
            None => EngineConfig::default(),
        };
        if self.debug_methods {
            config.debug_methods = true;
        }
        if let Some(seed) = self.seed {
            config.seed = seed;
        }
        Ok(config)
    }

    /// Arena parameters for a match with placement seed `seed`.
    pub(crate) fn arena_config(&self, seed: u64) -> ArenaConfig {
        ArenaConfig {
            rounds: self.rounds,
            robots_per_team: self.robots,
            ceiling: self.ceiling,
            seed,
            ..ArenaConfig::default()
        }
    }
}

/// CLI error type.
#[derive(Debug)]
pub(crate) struct CliError {
    message: String,
}

impl CliError {
    /// Create a new CLI error.
    pub(crate) fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl Error for CliError {}

impl From<std::io::Error> for CliError {
    fn from(e: std::io::Error) -> Self {
        Self::new(e.to_string())
    }
}

impl From<SourceError> for CliError {
    fn from(e: SourceError) -> Self {
        Self::new(e.to_string())
    }
}

impl From<ConfigError> for CliError {
    fn from(e: ConfigError) -> Self {
        Self::new(e.to_string())
    }
}

impl From<ArenaError> for CliError {
    fn from(e: ArenaError) -> Self {
        Self::new(e.to_string())
    }
}

impl From<serde_json::Error> for CliError {
    fn from(e: serde_json::Error) -> Self {
        Self::new(format!("JSON serialization failed: {e}"))
    }
}

/// Open a program from a directory of `.bca` files or a zip archive.
pub(crate) fn load_program(path: &Path, debug_methods: bool) -> Result<Arc<Program>, CliError> {
    let is_archive = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("zip"));
    let source: Box<dyn ProgramSource> = if is_archive {
        Box::new(ArchiveSource::new(path))
    } else {
        Box::new(DirectorySource::new(path))
    };
    Ok(Arc::new(Program::open(source.as_ref(), debug_methods)?))
}
