//! Configuration loading from TOML with environment variable resolution.
//!
//! Reads `config.toml` and deserializes into strongly-typed structs.
//! Every section has defaults, so a partial file (or an empty one) is valid.
//! Secrets (API keys) are referenced by env-var name in the config and
//! resolved at runtime via `std::env::var`.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::fs;
use std::time::Duration;

use crate::types::TrackerError;

/// Top-level application configuration.
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct AppConfig {
    pub tracker: TrackerConfig,
    pub trends: TrendConfig,
    pub source: SourceConfig,
    pub storage: StorageConfig,
    pub stacks: Vec<StackDefinition>,
    pub contests: Vec<ContestEntry>,
}

/// Orchestrator scheduling, pooling and timeout settings.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct TrackerConfig {
    /// Scheduler tick. Acts as a lower bound on any contest's refresh cadence.
    pub tick_interval_secs: u64,
    pub default_update_interval_secs: u64,
    /// Bounded in-memory snapshot history per contest.
    pub history_capacity: usize,
    /// Maximum per-contest update tasks running at once.
    pub max_concurrent_updates: usize,
    /// Applied to every source fetch, cache call and durable write.
    pub external_call_timeout_ms: u64,
    pub shutdown_grace_secs: u64,
    pub current_cache_ttl_secs: u64,
    pub trends_cache_ttl_secs: u64,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            tick_interval_secs: 5,
            default_update_interval_secs: 30,
            history_capacity: 100,
            max_concurrent_updates: 64,
            external_call_timeout_ms: 5_000,
            shutdown_grace_secs: 10,
            current_cache_ttl_secs: 60,
            trends_cache_ttl_secs: 300,
        }
    }
}

impl TrackerConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_interval_secs)
    }

    pub fn default_update_interval(&self) -> Duration {
        Duration::from_secs(self.default_update_interval_secs)
    }

    pub fn external_call_timeout(&self) -> Duration {
        Duration::from_millis(self.external_call_timeout_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }

    pub fn current_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.current_cache_ttl_secs)
    }

    pub fn trends_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.trends_cache_ttl_secs)
    }
}

/// Trend and prediction heuristics.
///
/// The confidence and strength normalisations are rules of thumb, not the
/// output of a fitted statistical model. Consumers should treat
/// `confidence` as a relative ranking signal only.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct TrendConfig {
    /// Hard cap on samples kept per (contest, player) series.
    pub max_data_points: usize,
    /// Samples older than this (relative to now) are dropped.
    pub trend_window_hours: f64,
    /// Minimum samples before trends or predictions are produced.
    pub min_data_points: usize,
    /// Changes within ±deadband percentage points are "stable".
    pub direction_deadband: f64,
    /// confidence = exp(-variance / velocity_variance_scale) × ...
    pub velocity_variance_scale: f64,
    /// ... × min(1, points / confidence_saturation_points)
    pub confidence_saturation_points: f64,
    /// strength = min(1, |velocity| / strength_velocity_scale)
    pub strength_velocity_scale: f64,
    pub prediction_cache_ttl_secs: u64,
}

impl Default for TrendConfig {
    fn default() -> Self {
        Self {
            max_data_points: 100,
            trend_window_hours: 6.0,
            min_data_points: 3,
            direction_deadband: 0.5,
            velocity_variance_scale: 10.0,
            confidence_saturation_points: 10.0,
            strength_velocity_scale: 10.0,
            prediction_cache_ttl_secs: 120,
        }
    }
}

/// One year. Keeps `now - window` well inside chrono's range.
const MAX_TREND_WINDOW_HOURS: f64 = 24.0 * 365.0;
/// One day.
const MAX_PREDICTION_CACHE_TTL_SECS: u64 = 86_400;

impl TrendConfig {
    pub fn trend_window(&self) -> chrono::Duration {
        chrono::Duration::milliseconds((self.trend_window_hours * 3_600_000.0) as i64)
    }

    pub fn prediction_cache_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.prediction_cache_ttl_secs as i64)
    }

    /// Reject settings that would break the series invariants.
    pub fn validate(&self) -> Result<(), TrackerError> {
        if self.min_data_points < 2 {
            return Err(TrackerError::Config(
                "trends.min_data_points must be at least 2".into(),
            ));
        }
        if self.max_data_points < self.min_data_points {
            return Err(TrackerError::Config(format!(
                "trends.max_data_points ({}) must be >= min_data_points ({})",
                self.max_data_points, self.min_data_points
            )));
        }
        if !(self.trend_window_hours > 0.0) {
            return Err(TrackerError::Config(
                "trends.trend_window_hours must be positive".into(),
            ));
        }
        if self.trend_window_hours > MAX_TREND_WINDOW_HOURS {
            return Err(TrackerError::Config(format!(
                "trends.trend_window_hours must be at most {MAX_TREND_WINDOW_HOURS}"
            )));
        }
        if self.prediction_cache_ttl_secs > MAX_PREDICTION_CACHE_TTL_SECS {
            return Err(TrackerError::Config(format!(
                "trends.prediction_cache_ttl_secs must be at most {MAX_PREDICTION_CACHE_TTL_SECS}"
            )));
        }
        if self.direction_deadband < 0.0 {
            return Err(TrackerError::Config(
                "trends.direction_deadband must not be negative".into(),
            ));
        }
        if !(self.velocity_variance_scale > 0.0)
            || !(self.confidence_saturation_points > 0.0)
            || !(self.strength_velocity_scale > 0.0)
        {
            return Err(TrackerError::Config(
                "trends normalisation scales must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// Upstream ownership feed.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SourceConfig {
    pub base_url: String,
    /// Name of the env var holding the feed's API key, if it needs one.
    pub api_key_env: Option<String>,
    pub timeout_secs: u64,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".to_string(),
            api_key_env: None,
            timeout_secs: 10,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StorageConfig {
    /// `sqlite://path.db` or `memory`.
    pub database_url: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite://ownership.db".to_string(),
        }
    }
}

/// A named group of players tracked as one ownership unit.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct StackDefinition {
    pub key: String,
    pub players: Vec<String>,
}

/// A contest to start tracking at boot.
#[derive(Debug, Deserialize, Clone)]
pub struct ContestEntry {
    pub id: String,
    pub lock_time: DateTime<Utc>,
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path}"))?;
        Self::parse(&contents).with_context(|| format!("Invalid config file: {path}"))
    }

    /// Parse and validate configuration from a TOML string.
    pub fn parse(contents: &str) -> Result<Self> {
        let config: AppConfig =
            toml::from_str(contents).context("Failed to parse configuration")?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        self.trends.validate()?;
        let t = &self.tracker;
        if t.tick_interval_secs == 0 || t.default_update_interval_secs == 0 {
            anyhow::bail!("tracker intervals must be positive");
        }
        if t.max_concurrent_updates == 0 || t.history_capacity == 0 {
            anyhow::bail!("tracker.max_concurrent_updates and history_capacity must be positive");
        }
        if t.external_call_timeout_ms == 0 {
            anyhow::bail!("tracker.external_call_timeout_ms must be positive");
        }
        Ok(())
    }

    /// Resolve an environment variable name to its value.
    /// Useful for loading secrets referenced in the config.
    pub fn resolve_env(env_name: &str) -> Result<String> {
        std::env::var(env_name)
            .with_context(|| format!("Environment variable not set: {env_name}"))
    }
}
