//! Shared configuration for tether.
//!
//! TOML defaults plus per-device overrides, layered with `TETHER_`
//! environment variables and translated to `tether_core::SupervisorConfig`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use tether_core::{SupervisorConfig, TransportClassifier};

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level TOML configuration.
#[derive(Debug, Default, Clone, PartialEq, Deserialize, Serialize)]
pub struct Config {
    /// Global defaults.
    #[serde(default)]
    pub defaults: Defaults,

    /// Per-device overrides, keyed by device id.
    #[serde(default)]
    pub devices: HashMap<String, DeviceProfile>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Defaults {
    #[serde(default = "default_output")]
    pub output: String,

    #[serde(default = "default_color")]
    pub color: String,

    /// Parallel operations per connection.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    #[serde(default = "default_release_timeout")]
    pub release_timeout_secs: u64,

    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,

    /// Extra error kinds that retire a connection.
    #[serde(default)]
    pub retryable_kinds: Vec<String>,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            output: default_output(),
            color: default_color(),
            concurrency: default_concurrency(),
            release_timeout_secs: default_release_timeout(),
            event_capacity: default_event_capacity(),
            retryable_kinds: Vec::new(),
        }
    }
}

fn default_output() -> String {
    "table".into()
}
fn default_color() -> String {
    "auto".into()
}
fn default_concurrency() -> usize {
    4
}
fn default_release_timeout() -> u64 {
    10
}
fn default_event_capacity() -> usize {
    256
}

/// Overrides for one device.
#[derive(Debug, Default, Clone, PartialEq, Deserialize, Serialize)]
pub struct DeviceProfile {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub concurrency: Option<usize>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub release_timeout_secs: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_capacity: Option<usize>,

    /// Appended to `defaults.retryable_kinds`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub retryable_kinds: Vec<String>,
}

impl Config {
    /// Supervisor settings for `device_id`: defaults merged with that
    /// device's overrides, if any.
    pub fn supervisor_config(
        &self,
        device_id: Option<&str>,
    ) -> Result<SupervisorConfig, ConfigError> {
        let profile = device_id.and_then(|id| self.devices.get(id));
        let defaults = &self.defaults;

        let concurrency = profile
            .and_then(|p| p.concurrency)
            .unwrap_or(defaults.concurrency);
        let release_timeout_secs = profile
            .and_then(|p| p.release_timeout_secs)
            .unwrap_or(defaults.release_timeout_secs);
        let event_capacity = profile
            .and_then(|p| p.event_capacity)
            .unwrap_or(defaults.event_capacity);

        if concurrency == 0 {
            return Err(ConfigError::Validation {
                field: "concurrency".into(),
                reason: "must be greater than 0".into(),
            });
        }
        if event_capacity == 0 {
            return Err(ConfigError::Validation {
                field: "event_capacity".into(),
                reason: "must be greater than 0".into(),
            });
        }

        let classifier = TransportClassifier::default()
            .with_kinds(defaults.retryable_kinds.iter().cloned())
            .with_kinds(profile.into_iter().flat_map(|p| p.retryable_kinds.iter().cloned()));

        Ok(SupervisorConfig {
            concurrency,
            release_timeout: Duration::from_secs(release_timeout_secs),
            event_capacity,
            ..SupervisorConfig::default()
        }
        .with_classifier(classifier))
    }
}

// ── File location ───────────────────────────────────────────────────

const CONFIG_FILE: &str = "config.toml";

/// Platform config file, e.g. `~/.config/tether/config.toml` on Linux.
/// Falls back to `./.tether/config.toml` when no home directory is known.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("dev", "tether", "tether").map_or_else(
        || PathBuf::from(".tether").join(CONFIG_FILE),
        |dirs| dirs.config_dir().join(CONFIG_FILE),
    )
}

// ── Load / save ─────────────────────────────────────────────────────

/// Layer built-in defaults, the TOML file at `path` (skipped if missing)
/// and `TETHER_*` variables, where `__` separates nested keys:
/// `TETHER_DEFAULTS__CONCURRENCY=2`.
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    Ok(Figment::from(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed("TETHER_").split("__"))
        .extract()?)
}

/// Write `cfg` as TOML, creating parent directories.
pub fn save_config_to(cfg: &Config, path: &Path) -> Result<(), ConfigError> {
    let rendered = toml::to_string_pretty(cfg)?;
    if let Some(dir) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)?;
    }
    std::fs::write(path, rendered)?;
    Ok(())
}
