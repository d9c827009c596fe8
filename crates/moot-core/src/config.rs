//! Configuration parsing and management.
//!
//! The engine takes an explicit [`EngineConfig`] in every component
//! constructor; there are no process-wide flags. The hosting daemon reads a
//! TOML file with an `[engine]` and a `[daemon]` section into [`MootConfig`].

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur while loading configuration.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigError {
    /// The file could not be read.
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    /// The TOML could not be parsed.
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// The configuration could not be serialized.
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// A value is out of range.
    #[error("invalid config: {0}")]
    Validation(String),
}

/// Top-level configuration file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct MootConfig {
    /// Engine behaviour.
    #[serde(default)]
    pub engine: EngineConfig,

    /// Hosting-process settings.
    #[serde(default)]
    pub daemon: DaemonConfig,
}

impl MootConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse and validate configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is invalid or a value is out of range.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize configuration to TOML.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Checks every section.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] naming the first bad value.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.engine.validate()?;
        self.daemon.validate()
    }
}

/// Engine behaviour shared by all state machines.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// How long a mutation waits for the database write lock before failing
    /// with a retryable error.
    pub lock_timeout_ms: u64,

    /// Upper bound for a speaker turn's allocation.
    pub max_allocated_seconds: u32,

    /// Arm the match timer for the new turn inside `advance_turn`.
    pub arm_timer_on_advance: bool,

    /// Reject `start_match` unless the owning round is LIVE.
    pub require_live_round: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            lock_timeout_ms: 5_000,
            max_allocated_seconds: 3_600,
            arm_timer_on_advance: true,
            require_live_round: false,
        }
    }
}

impl EngineConfig {
    /// Lock timeout as a [`Duration`].
    #[must_use]
    pub const fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] for zero timeouts or allocations.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.lock_timeout_ms == 0 {
            return Err(ConfigError::Validation(
                "engine.lock_timeout_ms must be greater than zero".to_string(),
            ));
        }
        if self.max_allocated_seconds == 0 {
            return Err(ConfigError::Validation(
                "engine.max_allocated_seconds must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Shortest accepted tick interval.
pub const MIN_TICK_INTERVAL_MS: u64 = 100;

/// Longest accepted tick interval.
pub const MAX_TICK_INTERVAL_MS: u64 = 5_000;

/// Hosting-process settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// `SQLite` database file.
    pub database_path: PathBuf,

    /// Interval between timer ticks for every live match.
    pub tick_interval_ms: u64,

    /// Run crash recovery before the tick loop starts.
    pub run_recovery_on_start: bool,

    /// Default log filter when none is given on the command line.
    pub log_level: String,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("moot.db"),
            tick_interval_ms: 1_000,
            run_recovery_on_start: true,
            log_level: "info".to_string(),
        }
    }
}

impl DaemonConfig {
    /// Tick interval as a [`Duration`].
    #[must_use]
    pub const fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] if the tick interval is out of
    /// range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(MIN_TICK_INTERVAL_MS..=MAX_TICK_INTERVAL_MS).contains(&self.tick_interval_ms) {
            return Err(ConfigError::Validation(format!(
                "daemon.tick_interval_ms must be within {MIN_TICK_INTERVAL_MS}..={MAX_TICK_INTERVAL_MS}, got {}",
                self.tick_interval_ms
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_yields_defaults() {
        let config = MootConfig::from_toml("").unwrap();
        assert_eq!(config, MootConfig::default());
        assert_eq!(config.engine.lock_timeout(), Duration::from_secs(5));
        assert!(config.engine.arm_timer_on_advance);
        assert_eq!(config.daemon.database_path, PathBuf::from("moot.db"));
    }

    #[test]
    fn partial_sections_keep_remaining_defaults() {
        let config = MootConfig::from_toml(
            r#"
            [engine]
            require_live_round = true
            max_allocated_seconds = 900

            [daemon]
            database_path = "/var/lib/moot/event.db"
            tick_interval_ms = 2500
            "#,
        )
        .unwrap();

        assert!(config.engine.require_live_round);
        assert_eq!(config.engine.max_allocated_seconds, 900);
        assert_eq!(config.engine.lock_timeout_ms, 5_000);
        assert_eq!(config.daemon.tick_interval(), Duration::from_millis(2_500));
        assert!(config.daemon.run_recovery_on_start);
    }

    #[test]
    fn out_of_range_values_are_rejected() {
        let err = MootConfig::from_toml("[daemon]\ntick_interval_ms = 10\n").unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));

        let err = MootConfig::from_toml("[engine]\nlock_timeout_ms = 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));
    }

    #[test]
    fn unknown_value_types_fail_to_parse() {
        let err = MootConfig::from_toml("[engine]\nlock_timeout_ms = \"soon\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn serialized_config_parses_back() {
        let mut config = MootConfig::default();
        config.engine.arm_timer_on_advance = false;
        let text = config.to_toml().unwrap();
        assert_eq!(MootConfig::from_toml(&text).unwrap(), config);
    }
}
