//! Configuration file for sprint-sync.
//!
//! Loaded from a TOML file (default: `sprint-sync.toml` in the platform
//! config directory). Every field has a default, so a partial file works.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use sprintsync_client::{ChannelConfig, ControllerConfig};
use sprintsync_core::{BackoffPolicy, ReconcilerConfig};
use sprintsync_types::{DeviceRole, Phase, RepBlock, SessionConfig, SprintBlock};

/// Root configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// The workout itself.
    #[serde(default)]
    pub session: SessionSection,
    /// Link and replication tuning.
    #[serde(default)]
    pub sync: SyncSection,
    /// `simulate` settings.
    #[serde(default)]
    pub simulation: SimulationSection,
}

/// Workout plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSection {
    /// Phases to run, in order.
    #[serde(default = "default_plan")]
    pub plan: Vec<Phase>,
    /// Warm-up length in seconds (default: 300).
    #[serde(default = "default_block_secs")]
    pub warmup_secs: u32,
    /// Stretch length in seconds (default: 300).
    #[serde(default = "default_block_secs")]
    pub stretch_secs: u32,
    /// Cooldown length in seconds (default: 300).
    #[serde(default = "default_block_secs")]
    pub cooldown_secs: u32,
    /// Drill reps (default: 2).
    #[serde(default = "default_drill_reps")]
    pub drill_reps: u32,
    /// Drill rep distance in meters (default: 20).
    #[serde(default = "default_short_distance")]
    pub drill_distance_m: f64,
    /// Stride reps (default: 3).
    #[serde(default = "default_strides_reps")]
    pub strides_reps: u32,
    /// Stride distance in meters (default: 20).
    #[serde(default = "default_short_distance")]
    pub strides_distance_m: f64,
    /// Sprint reps (default: 4).
    #[serde(default = "default_sprint_reps")]
    pub sprint_reps: u32,
    /// Sprint distance in meters (default: 40).
    #[serde(default = "default_sprint_distance")]
    pub sprint_distance_m: f64,
    /// Rest between sprints in seconds (default: 120).
    #[serde(default = "default_rest_secs")]
    pub rest_secs: u32,
}

/// Link and replication tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncSection {
    /// Outbound queue bound (default: 64).
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// First reconnect delay unit in milliseconds (default: 1000).
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    /// Reconnect delay cap in milliseconds (default: 30000).
    #[serde(default = "default_backoff_cap_ms")]
    pub backoff_cap_ms: u64,
    /// Reconnect jitter bound in milliseconds (default: 5000).
    #[serde(default = "default_max_jitter_ms")]
    pub max_jitter_ms: u64,
    /// Timestamps closer than this are treated as concurrent (default: 2000).
    #[serde(default = "default_skew_tolerance_ms")]
    pub skew_tolerance_ms: u64,
    /// Corrective re-broadcasts before giving up on a peer (default: 3).
    #[serde(default = "default_max_corrections")]
    pub max_corrections: u32,
    /// Phase clock tick period in milliseconds (default: 1000).
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
}

/// `simulate` settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationSection {
    /// Runner speed during reps in meters per second (default: 7.0).
    #[serde(default = "default_runner_speed")]
    pub runner_speed_mps: f64,
    /// Simulated seconds per real second (default: 60).
    #[serde(default = "default_time_scale")]
    pub time_scale: f64,
    /// Take the companion out of range this many simulated seconds in.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link_drop_at_secs: Option<u64>,
    /// How long the companion stays out of range (default: 30).
    #[serde(default = "default_link_drop_secs")]
    pub link_drop_secs: u64,
}

// Default value functions
fn default_plan() -> Vec<Phase> {
    vec![
        Phase::Warmup,
        Phase::Stretch,
        Phase::Drill,
        Phase::Strides,
        Phase::Sprint,
        Phase::Cooldown,
    ]
}

fn default_block_secs() -> u32 {
    300 // 5 minutes
}

fn default_drill_reps() -> u32 {
    2
}

fn default_strides_reps() -> u32 {
    3
}

fn default_short_distance() -> f64 {
    20.0
}

fn default_sprint_reps() -> u32 {
    4
}

fn default_sprint_distance() -> f64 {
    40.0
}

fn default_rest_secs() -> u32 {
    120
}

fn default_queue_capacity() -> usize {
    64
}

fn default_backoff_base_ms() -> u64 {
    1000
}

fn default_backoff_cap_ms() -> u64 {
    30_000
}

fn default_max_jitter_ms() -> u64 {
    5000
}

fn default_skew_tolerance_ms() -> u64 {
    2000
}

fn default_max_corrections() -> u32 {
    3
}

fn default_tick_interval_ms() -> u64 {
    1000
}

fn default_runner_speed() -> f64 {
    7.0
}

fn default_time_scale() -> f64 {
    60.0
}

fn default_link_drop_secs() -> u64 {
    30
}

impl Default for SessionSection {
    fn default() -> Self {
        Self {
            plan: default_plan(),
            warmup_secs: default_block_secs(),
            stretch_secs: default_block_secs(),
            cooldown_secs: default_block_secs(),
            drill_reps: default_drill_reps(),
            drill_distance_m: default_short_distance(),
            strides_reps: default_strides_reps(),
            strides_distance_m: default_short_distance(),
            sprint_reps: default_sprint_reps(),
            sprint_distance_m: default_sprint_distance(),
            rest_secs: default_rest_secs(),
        }
    }
}

impl Default for SyncSection {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_cap_ms: default_backoff_cap_ms(),
            max_jitter_ms: default_max_jitter_ms(),
            skew_tolerance_ms: default_skew_tolerance_ms(),
            max_corrections: default_max_corrections(),
            tick_interval_ms: default_tick_interval_ms(),
        }
    }
}

impl Default for SimulationSection {
    fn default() -> Self {
        Self {
            runner_speed_mps: default_runner_speed(),
            time_scale: default_time_scale(),
            link_drop_at_secs: None,
            link_drop_secs: default_link_drop_secs(),
        }
    }
}

impl SessionSection {
    /// The validated session this section describes.
    pub fn to_session_config(&self) -> Result<SessionConfig, sprintsync_types::ConfigError> {
        let config = SessionConfig {
            plan: self.plan.clone(),
            warmup_secs: self.warmup_secs,
            stretch_secs: self.stretch_secs,
            cooldown_secs: self.cooldown_secs,
            drill: RepBlock {
                reps: self.drill_reps,
                distance_m: self.drill_distance_m,
            },
            strides: RepBlock {
                reps: self.strides_reps,
                distance_m: self.strides_distance_m,
            },
            sprint: SprintBlock {
                reps: self.sprint_reps,
                distance_m: self.sprint_distance_m,
                rest_secs: self.rest_secs,
            },
        };
        config.validate()?;
        Ok(config)
    }
}

impl SyncSection {
    /// Controller settings for `role`, with every real-time interval divided
    /// by `time_scale`.
    pub fn controller_config(&self, role: DeviceRole, time_scale: f64) -> ControllerConfig {
        let scale = if time_scale.is_finite() && time_scale > 0.0 {
            time_scale
        } else {
            1.0
        };
        let scaled = |ms: u64| Duration::from_millis(ms).div_f64(scale);
        let backoff = BackoffPolicy {
            base: scaled(self.backoff_base_ms),
            cap: scaled(self.backoff_cap_ms),
            max_jitter: scaled(self.max_jitter_ms),
        };
        let reconciler = ReconcilerConfig {
            skew_tolerance_ms: self.skew_tolerance_ms,
            max_corrections: self.max_corrections,
        };
        let channel = ChannelConfig::default()
            .with_address(match role {
                DeviceRole::Host => "companion",
                DeviceRole::Companion => "host",
            })
            .with_queue_capacity(self.queue_capacity)
            .with_backoff(backoff);

        ControllerConfig::new(role)
            .with_tick_interval(scaled(self.tick_interval_ms).max(Duration::from_millis(5)))
            .with_reconciler(reconciler)
            .with_channel(channel)
    }
}

impl Config {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// Load `path` if given, else the default file if it exists, else defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::from_file(path),
            None => match default_config_path() {
                Some(path) if path.exists() => Self::from_file(&path),
                _ => Ok(Self::default()),
            },
        }
    }

    /// Write the configuration as TOML, creating parent directories.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self).map_err(ConfigError::SerializeError)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::WriteError {
                path: path.to_path_buf(),
                source: e,
            })?;
        }
        std::fs::write(path, content).map_err(|e| ConfigError::WriteError {
            path: path.to_path_buf(),
            source: e,
        })
    }
}

/// Default location of the configuration file.
pub fn default_config_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("io", "ydun", "sprint-sync")
        .map(|dirs| dirs.config_dir().join("sprint-sync.toml"))
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// Failed to parse configuration file.
    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying TOML parse error.
        source: toml::de::Error,
    },
    /// Failed to write configuration file.
    #[error("failed to write config file {path}: {source}")]
    WriteError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// Failed to render configuration.
    #[error("failed to serialize config: {0}")]
    SerializeError(toml::ser::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = Config::default();
        let session = config.session.to_session_config().unwrap();
        assert_eq!(session.total_reps(), 9);
        assert_eq!(config.sync.queue_capacity, 64);
        assert_eq!(config.simulation.time_scale, 60.0);
    }

    #[test]
    fn config_from_toml_string() {
        let toml = r#"
[session]
plan = ["warmup", "sprint", "cooldown"]
warmup_secs = 120
sprint_reps = 3
rest_secs = 60

[sync]
skew_tolerance_ms = 500

[simulation]
time_scale = 120.0
link_drop_at_secs = 200
"#;

        let config: Config = toml::from_str(toml).unwrap();
        let session = config.session.to_session_config().unwrap();
        assert_eq!(session.plan, vec![Phase::Warmup, Phase::Sprint, Phase::Cooldown]);
        assert_eq!(session.warmup_secs, 120);
        assert_eq!(session.total_reps(), 3);
        assert_eq!(session.sprint.rest_secs, 60);
        assert_eq!(config.sync.skew_tolerance_ms, 500);
        assert_eq!(config.sync.max_corrections, 3);
        assert_eq!(config.simulation.link_drop_at_secs, Some(200));
        assert_eq!(config.simulation.link_drop_secs, 30);
    }

    #[test]
    fn config_missing_sections_use_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn invalid_session_is_reported() {
        let toml = r#"
[session]
sprint_reps = 0
"#;
        let config: Config = toml::from_str(toml).unwrap();
        assert!(config.session.to_session_config().is_err());
    }

    #[test]
    fn controller_intervals_follow_time_scale() {
        let sync = SyncSection::default();
        let controller = sync.controller_config(DeviceRole::Companion, 10.0);

        assert_eq!(controller.role, DeviceRole::Companion);
        assert_eq!(controller.tick_interval, Duration::from_millis(100));
        assert_eq!(controller.channel.backoff.base, Duration::from_millis(100));
        assert_eq!(controller.channel.address, "host");
        assert_eq!(controller.reconciler.max_corrections, 3);
    }

    #[test]
    fn save_then_load_keeps_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("sprint-sync.toml");
        let mut config = Config::default();
        config.session.sprint_reps = 6;
        config.simulation.link_drop_at_secs = Some(90);

        config.save(&path).unwrap();

        assert_eq!(Config::from_file(&path).unwrap(), config);
    }

    #[test]
    fn missing_file_is_read_error() {
        let err = Config::from_file(Path::new("/nonexistent/sprint-sync.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::ReadError { .. }));
    }
}
