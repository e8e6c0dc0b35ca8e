//! Configuration System
//!
//! Hierarchical configuration loading from:
//! - `config.toml` (default configuration)
//! - `config.local.toml` (git-ignored local overrides)
//! - Environment variables (`CRATEFLOW_*` prefix)
//!
//! ## Example
//!
//! ```toml
//! # config.toml
//! [engine]
//! num_slots = 0  # 0 = use all available CPU cores
//!
//! [engine.limits]
//! max_buffer_elements = 5000000
//! ```
//!
//! Environment variable overrides:
//! ```bash
//! CRATEFLOW_ENGINE__NUM_SLOTS=8
//! CRATEFLOW_LOGGING__LEVEL=debug
//! ```

use figment::providers::{Env, Format, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};

/// Main configuration struct.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub engine: EngineConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Engine-level configuration: concurrency and resource limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Number of slots (parallel workers) for `run()`.
    /// 0 = use all available CPU cores (`num_cpus::get()`).
    #[serde(default)]
    pub num_slots: usize,

    /// Run timeout in seconds (0 = no timeout).
    #[serde(default)]
    pub timeout_secs: u64,

    /// Resource limits applied to per-slot buffers during a run.
    #[serde(default)]
    pub limits: LimitsConfig,
}

/// Resource limit configuration (mirrors [`crate::execution::ResourceLimits`]).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct LimitsConfig {
    /// Maximum elements in any single per-slot buffer (`Take`, deferred
    /// histogram). `None`/absent = unlimited.
    #[serde(default)]
    pub max_buffer_elements: Option<usize>,

    /// Maximum estimated memory usage in bytes across all per-slot
    /// buffers. `None`/absent = unlimited.
    #[serde(default)]
    pub max_memory_bytes: Option<usize>,
}

impl From<&LimitsConfig> for crate::execution::ResourceLimits {
    fn from(cfg: &LimitsConfig) -> Self {
        let mut limits = crate::execution::ResourceLimits::unlimited();
        if let Some(n) = cfg.max_buffer_elements {
            limits = limits.with_max_buffer_elements(n);
        }
        if let Some(n) = cfg.max_memory_bytes {
            limits = limits.with_max_memory_bytes(n);
        }
        limits
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format (text, json).
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}
fn default_log_format() -> String {
    "text".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            num_slots: 0,
            timeout_secs: 0,
            limits: LimitsConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from default locations.
    ///
    /// Merges in order:
    /// 1. `config.toml` (base configuration)
    /// 2. `config.local.toml` (local overrides, git-ignored)
    /// 3. Environment variables (`CRATEFLOW_*` prefix)
    pub fn load() -> Result<Self, figment::Error> {
        Figment::new()
            .merge(Toml::file("config.toml"))
            .merge(Toml::file("config.local.toml"))
            .merge(Env::prefixed("CRATEFLOW_").split("__"))
            .extract()
    }

    /// Load configuration from a specific file path.
    pub fn from_file(path: &str) -> Result<Self, figment::Error> {
        Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed("CRATEFLOW_").split("__"))
            .extract()
    }

    /// Resolve the number of slots, applying the "0 = all cores" rule.
    pub fn resolved_num_slots(&self) -> usize {
        if self.engine.num_slots == 0 {
            num_cpus::get()
        } else {
            self.engine.num_slots
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            engine: EngineConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_zero_slots_meaning_all_cores() {
        let config = Config::default();
        assert_eq!(config.engine.num_slots, 0);
        assert!(config.resolved_num_slots() >= 1);
    }

    #[test]
    fn config_serialization_round_trips_sections() {
        let config = Config::default();
        let toml_str = toml::to_string(&config).unwrap();

        assert!(toml_str.contains("[engine]"));
        assert!(toml_str.contains("[logging]"));
    }

    #[test]
    fn explicit_num_slots_is_not_overridden() {
        let mut config = Config::default();
        config.engine.num_slots = 4;
        assert_eq!(config.resolved_num_slots(), 4);
    }
}
