//! Safety configuration for the chaos scheduling engine.
//!
//! Everything here is read-only to the scheduler. Config is typically
//! loaded from TOML; every field has a serde default so partial files work.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use chrono::{Datelike, NaiveDateTime, NaiveTime, Timelike};
use serde::{Deserialize, Serialize};

use crate::experiment::Environment;

/// Errors raised while loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),
}

// ── Top-level config ──────────────────────────────────────────

/// Root safety-control configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SafetyConfig {
    #[serde(default)]
    pub global: GlobalConfig,
    /// Per-environment switches. An environment absent from this map is
    /// treated as disabled.
    #[serde(default = "default_environments")]
    pub environments: HashMap<Environment, EnvironmentConfig>,
    #[serde(default)]
    pub rate_limiting: RateLimitConfig,
    /// Consecutive failures before an experiment is unscheduled and an
    /// incident is raised.
    #[serde(default = "default_disable_threshold")]
    pub disable_threshold: u32,
    /// Upper bound on execution-engine and incident-manager round-trips.
    #[serde(default = "default_collaborator_timeout")]
    pub collaborator_timeout_secs: u64,
    /// Dispatcher loop resolution in milliseconds.
    #[serde(default = "default_tick_interval")]
    pub tick_interval_ms: u64,
}

fn default_disable_threshold() -> u32 {
    3
}
fn default_collaborator_timeout() -> u64 {
    30
}
fn default_tick_interval() -> u64 {
    500
}

/// Safe default: chaos only in development until configured otherwise.
fn default_environments() -> HashMap<Environment, EnvironmentConfig> {
    HashMap::from([(
        Environment::Development,
        EnvironmentConfig {
            enabled: true,
            business_hours: None,
        },
    )])
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            global: GlobalConfig::default(),
            environments: default_environments(),
            rate_limiting: RateLimitConfig::default(),
            disable_threshold: default_disable_threshold(),
            collaborator_timeout_secs: default_collaborator_timeout(),
            tick_interval_ms: default_tick_interval(),
        }
    }
}

impl SafetyConfig {
    /// Load config from a TOML file.
    pub fn from_toml_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&raw)?)
    }

    /// Whether the given environment is enabled for experiments.
    pub fn environment_enabled(&self, env: Environment) -> bool {
        self.environments.get(&env).is_some_and(|e| e.enabled)
    }

    /// Business-hours window configured for an environment, if any.
    pub fn business_hours(&self, env: Environment) -> Option<&BusinessHours> {
        self.environments
            .get(&env)
            .and_then(|e| e.business_hours.as_ref())
            .filter(|bh| bh.enabled)
    }

    pub fn collaborator_timeout(&self) -> Duration {
        Duration::from_secs(self.collaborator_timeout_secs)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    /// Log a summary for startup diagnostics.
    pub fn log_summary(&self) {
        tracing::info!("Safety config loaded:");
        tracing::info!("  global:          enabled={}", self.global.enabled);
        for (env, cfg) in &self.environments {
            tracing::info!(
                "  environment:     {}={} (business_hours={})",
                env,
                if cfg.enabled { "enabled" } else { "disabled" },
                cfg.business_hours.as_ref().map(|b| b.enabled).unwrap_or(false),
            );
        }
        tracing::info!(
            "  rate_limiting:   enabled={}, max_per_hour={}, window={}s",
            self.rate_limiting.enabled,
            self.rate_limiting.max_experiments_per_hour,
            self.rate_limiting.window_secs,
        );
        tracing::info!("  disable_threshold={}", self.disable_threshold);
    }
}

// ── Global kill-switch ────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalConfig {
    /// Master kill-switch for all chaos experimentation.
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_true() -> bool {
    true
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

// ── Per-environment config ────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvironmentConfig {
    pub enabled: bool,
    #[serde(default)]
    pub business_hours: Option<BusinessHours>,
}

/// A weekly time window during which production experiments are blocked.
///
/// `days` uses ISO weekday numbers (1 = Monday .. 7 = Sunday); `start` and
/// `end` are "HH:MM" in the experiment's local time, bounds inclusive.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusinessHours {
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub days: Vec<u32>,
    pub start: String,
    pub end: String,
}

impl BusinessHours {
    /// Parse the configured window bounds. `None` if either is malformed.
    fn window(&self) -> Option<(NaiveTime, NaiveTime)> {
        let start = NaiveTime::parse_from_str(&self.start, "%H:%M").ok()?;
        let end = NaiveTime::parse_from_str(&self.end, "%H:%M").ok()?;
        Some((start, end))
    }

    /// Whether the given local civil time falls inside the blocked window.
    ///
    /// A malformed window never blocks.
    pub fn blocks(&self, local: NaiveDateTime) -> bool {
        if !self.enabled {
            return false;
        }
        let Some((start, end)) = self.window() else {
            return false;
        };
        let day = local.weekday().number_from_monday();
        if !self.days.contains(&day) {
            return false;
        }
        // Inclusive on both bounds; compare at minute resolution.
        let t = NaiveTime::from_hms_opt(local.hour(), local.minute(), 0)
            .unwrap_or_else(|| local.time());
        t >= start && t <= end
    }
}

// ── Rate limiting ─────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Ceiling on dispatch attempts per experiment within the window.
    #[serde(default = "default_max_per_hour")]
    pub max_experiments_per_hour: u32,
    /// Trailing window length in seconds.
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,
}

fn default_max_per_hour() -> u32 {
    10
}
fn default_window_secs() -> u64 {
    3600
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            max_experiments_per_hour: default_max_per_hour(),
            window_secs: default_window_secs(),
        }
    }
}
