//! Engine configuration.

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::control::{RobotId, Team};

/// Default maximum interpreter call depth.
pub const DEFAULT_MAX_CALL_DEPTH: usize = 1024;

/// Default live heap cap, in cells.
pub const DEFAULT_MAX_HEAP_CELLS: usize = 4_000_000;

/// Options recognised by the engine core.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Run `debug_*` routines instead of eliding calls to them.
    pub debug_methods: bool,
    /// Teams whose robot output is discarded.
    pub silenced_teams: Vec<Team>,
    /// Seed basis; each robot derives its own seed from this and its id.
    pub seed: u64,
    /// Bytes of output each team may write before truncation.
    pub output_limit: Option<usize>,
    /// Frames a robot may have live before `sys/StackOverflow`.
    pub max_call_depth: usize,
    /// Live heap cells a robot may hold before `sys/OutOfMemory`.
    pub max_heap_cells: usize,
    /// Record profiler events for program routines.
    pub profiling: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            debug_methods: false,
            silenced_teams: Vec::new(),
            seed: 0,
            output_limit: None,
            max_call_depth: DEFAULT_MAX_CALL_DEPTH,
            max_heap_cells: DEFAULT_MAX_HEAP_CELLS,
            profiling: false,
        }
    }
}

/// Error loading a configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("failed to read config {path}: {source}")]
    Io {
        /// Path of the config file.
        path: String,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
    /// The file is not valid configuration JSON.
    #[error("invalid config: {0}")]
    Parse(#[from] serde_json::Error),
}

impl EngineConfig {
    /// Parse configuration from JSON. Missing fields take their defaults.
    ///
    /// # Errors
    ///
    /// Returns a parse error for malformed JSON or mistyped fields.
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(text)?)
    }

    /// Load configuration from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&text)
    }

    /// Whether output from `team` is discarded.
    #[must_use]
    pub fn is_silenced(&self, team: Team) -> bool {
        self.silenced_teams.contains(&team)
    }

    /// The deterministic seed of one robot.
    #[must_use]
    pub fn robot_seed(&self, id: RobotId) -> u64 {
        splitmix64(self.seed ^ u64::from(id.get()))
    }
}

/// One step of the splitmix64 generator.
#[must_use]
pub fn splitmix64(mut state: u64) -> u64 {
    state = state.wrapping_add(0x9E37_79B9_7F4A_7C15);
    let mut z = state;
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_fields_take_defaults() {
        let config = EngineConfig::from_json(r#"{"debug_methods": true, "silenced_teams": ["B"]}"#)
            .unwrap();
        assert!(config.debug_methods);
        assert!(config.is_silenced(Team::B));
        assert!(!config.is_silenced(Team::A));
        assert_eq!(config.max_call_depth, DEFAULT_MAX_CALL_DEPTH);
        assert_eq!(config.output_limit, None);
    }

    #[test]
    fn test_robot_seeds_differ_and_repeat() {
        let config = EngineConfig {
            seed: 42,
            ..EngineConfig::default()
        };
        let a = config.robot_seed(RobotId::new(1));
        let b = config.robot_seed(RobotId::new(2));
        assert_ne!(a, b);
        assert_eq!(a, config.robot_seed(RobotId::new(1)));
    }

    #[test]
    fn test_bad_json_is_parse_error() {
        assert!(matches!(
            EngineConfig::from_json("{\"seed\": \"x\"}"),
            Err(ConfigError::Parse(_))
        ));
    }
}
