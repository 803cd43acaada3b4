//! Daemon runtime configuration.
//!
//! Loaded from `~/.locotrack/daemon/config.toml`. Every field has a default,
//! so a missing file (or a partial one) is valid.

use chrono::Duration;
use locotrack_core::{MovementPolicy, DEFAULT_RETENTION_HOURS};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

const DEFAULT_CONFIG_RELATIVE_PATH: &str = ".locotrack/daemon/config.toml";
pub const TELEMETRY_URL_ENV: &str = "LOCOTRACK_TELEMETRY_URL";
pub const ASSET_ID_PLACEHOLDER: &str = "{asset_id}";
/// Upper bound for `history.retention_hours` (one leap year).
pub const MAX_RETENTION_HOURS: i64 = 24 * 366;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    pub telemetry: TelemetryConfig,
    pub history: HistoryConfig,
    pub movement: MovementPolicy,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    /// URL template; `{asset_id}` is replaced with the percent-encoded id.
    pub endpoint: String,
    pub timeout_secs: u64,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://127.0.0.1:8787/telemetry/{asset_id}".to_string(),
            timeout_secs: 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    pub retention_hours: i64,
    pub prune_interval_secs: u64,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            retention_hours: DEFAULT_RETENTION_HOURS,
            prune_interval_secs: 300,
        }
    }
}

impl DaemonConfig {
    pub fn retention(&self) -> Duration {
        Duration::hours(self.history.retention_hours.clamp(1, MAX_RETENTION_HOURS))
    }

    /// Applies environment overrides. `lookup` is `std::env::var` in production.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(endpoint) = lookup(TELEMETRY_URL_ENV)
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
        {
            self.telemetry.endpoint = endpoint;
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if !self.telemetry.endpoint.contains(ASSET_ID_PLACEHOLDER) {
            return Err(format!(
                "telemetry.endpoint must contain {}",
                ASSET_ID_PLACEHOLDER
            ));
        }
        if self.telemetry.timeout_secs == 0 {
            return Err("telemetry.timeout_secs must be positive".to_string());
        }
        if self.history.retention_hours <= 0 {
            return Err("history.retention_hours must be positive".to_string());
        }
        if self.history.retention_hours > MAX_RETENTION_HOURS {
            return Err(format!(
                "history.retention_hours must be at most {}",
                MAX_RETENTION_HOURS
            ));
        }
        if self.history.prune_interval_secs == 0 {
            return Err("history.prune_interval_secs must be positive".to_string());
        }
        let epsilon = self.movement.epsilon_degrees;
        if !epsilon.is_finite() || epsilon < 0.0 {
            return Err("movement.epsilon_degrees must be a non-negative number".to_string());
        }
        Ok(())
    }
}

pub fn default_config_path() -> Result<PathBuf, String> {
    let home = dirs::home_dir().ok_or_else(|| "Home directory not found".to_string())?;
    Ok(home.join(DEFAULT_CONFIG_RELATIVE_PATH))
}

pub fn load_config(path: Option<PathBuf>) -> Result<DaemonConfig, String> {
    let config_path = match path {
        Some(path) => path,
        None => default_config_path()?,
    };

    if !config_path.exists() {
        return Ok(DaemonConfig::default());
    }

    let content = fs_err::read_to_string(&config_path).map_err(|err| {
        format!(
            "Failed to read daemon config {}: {}",
            config_path.display(),
            err
        )
    })?;
    let config = toml::from_str::<DaemonConfig>(&content).map_err(|err| {
        format!(
            "Failed to parse daemon config {}: {}",
            config_path.display(),
            err
        )
    })?;
    config.validate()?;
    Ok(config)
}
