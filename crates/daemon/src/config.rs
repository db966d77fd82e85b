// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Process configuration (flags/env) and the declarative device document.
//!
//! The device document is YAML or JSON, auto-detected by extension. The
//! loader validates structure up front; per-device driver problems are not
//! fatal here — they downgrade the device to the `disabled` driver at
//! registration so operators can see it.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::device::DeviceDescriptor;
use crate::driver::KNOWN_DRIVERS;

/// Minimum allowed probe interval; lower values clamp with a warning.
pub const MIN_INTERVAL_SECS: u64 = 5;

// -- Process config ------------------------------------------------------------

/// Flags and environment for the daemon process itself.
#[derive(Debug, Clone, clap::Parser)]
#[command(name = "hearthd", version, about = "Home device supervision daemon")]
pub struct DaemonConfig {
    /// Path to the declarative device configuration (YAML or JSON).
    #[arg(long, env = "CONFIG_PATH")]
    pub config_path: PathBuf,

    /// host:port for the HTTP + WebSocket surface.
    #[arg(long, env = "HTTP_LISTEN", default_value = "0.0.0.0:7777")]
    pub http_listen: String,

    /// Emission floor for the structured logger. Events below the floor are
    /// stored but not logged.
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Bearer token for mutating API endpoints. If unset, auth is disabled.
    #[arg(long, env = "HEARTH_AUTH_TOKEN")]
    pub auth_token: Option<String>,
}

// -- Declarative document ------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    #[serde(default)]
    pub devices: Vec<DeviceDescriptor>,
    #[serde(default)]
    pub scheduler: SchedulerSection,
    #[serde(default)]
    pub event_store: EventStoreSection,
    #[serde(default)]
    pub logging: LoggingSection,
    #[serde(default)]
    pub secrets: SecretsSection,
    #[serde(default)]
    pub thresholds: ThresholdsSection,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SchedulerSection {
    #[serde(default = "default_interval_seconds")]
    pub default_interval_seconds: u64,
    /// Consecutive failures before a device goes offline.
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
}

impl Default for SchedulerSection {
    fn default() -> Self {
        Self {
            default_interval_seconds: default_interval_seconds(),
            failure_threshold: default_failure_threshold(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EventStoreSection {
    #[serde(default = "default_capacity")]
    pub capacity: usize,
    #[serde(default = "default_subscription_buffer")]
    pub subscription_buffer: usize,
}

impl Default for EventStoreSection {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
            subscription_buffer: default_subscription_buffer(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingSection {
    /// Extra substrings redacted on top of the built-in list.
    #[serde(default)]
    pub redaction_terms: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SecretsSection {
    /// Ordered backend specs: `env`, `file:<path>`, `manager:<url>`.
    #[serde(default = "default_backends")]
    pub backends: Vec<String>,
}

impl Default for SecretsSection {
    fn default() -> Self {
        Self { backends: default_backends() }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ThresholdsSection {
    /// Plug power warning ceiling; per-device `power_ceiling_w` overrides.
    #[serde(default = "default_power_ceiling")]
    pub power_ceiling_watts: f64,
}

impl Default for ThresholdsSection {
    fn default() -> Self {
        Self { power_ceiling_watts: default_power_ceiling() }
    }
}

fn default_interval_seconds() -> u64 {
    30
}
fn default_failure_threshold() -> u32 {
    3
}
fn default_capacity() -> usize {
    10_000
}
fn default_subscription_buffer() -> usize {
    256
}
fn default_backends() -> Vec<String> {
    vec!["env".to_owned()]
}
fn default_power_ceiling() -> f64 {
    1500.0
}

// -- Errors --------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config {path}: {message}")]
    Parse { path: PathBuf, message: String },
    #[error("unsupported config extension (want .yaml, .yml or .json): {0}")]
    UnsupportedExtension(PathBuf),
    #[error("duplicate device id: {0}")]
    DuplicateDevice(String),
    #[error("event_store.capacity must be at least 1")]
    ZeroCapacity,
    #[error("failure_threshold must be at least 1")]
    ZeroThreshold,
}

// -- Loading and validation ----------------------------------------------------

impl FileConfig {
    /// Parse the document at `path`, format detected by extension.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|source| ConfigError::Io { path: path.to_path_buf(), source })?;
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_lowercase)
            .unwrap_or_default();
        let config: FileConfig = match extension.as_str() {
            "yaml" | "yml" => serde_yaml::from_str(&contents).map_err(|e| ConfigError::Parse {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?,
            "json" => serde_json::from_str(&contents).map_err(|e| ConfigError::Parse {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?,
            _ => return Err(ConfigError::UnsupportedExtension(path.to_path_buf())),
        };
        config.validate()?;
        Ok(config)
    }

    /// Structural validation. Driver-level problems are deliberately not
    /// checked here; they become `disabled` devices at registration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.event_store.capacity == 0 {
            return Err(ConfigError::ZeroCapacity);
        }
        if self.scheduler.failure_threshold == 0 {
            return Err(ConfigError::ZeroThreshold);
        }
        let mut seen = std::collections::HashSet::new();
        for device in &self.devices {
            if !seen.insert(device.id.as_str()) {
                return Err(ConfigError::DuplicateDevice(device.id.clone()));
            }
        }
        Ok(())
    }

    /// Startup warnings: clamped intervals and unknown driver tags. These
    /// become warning events once the store is up.
    pub fn startup_warnings(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        if self.scheduler.default_interval_seconds < MIN_INTERVAL_SECS {
            warnings.push(format!(
                "scheduler.default_interval_seconds {} below minimum {MIN_INTERVAL_SECS}; clamped",
                self.scheduler.default_interval_seconds
            ));
        }
        for device in &self.devices {
            if let Some(interval) = device.interval_seconds {
                if interval < MIN_INTERVAL_SECS {
                    warnings.push(format!(
                        "device {} interval {interval}s below minimum {MIN_INTERVAL_SECS}s; clamped",
                        device.id
                    ));
                }
            }
            if !KNOWN_DRIVERS.contains(&device.driver.as_str()) {
                warnings.push(format!(
                    "device {} references unknown driver {}; loading as disabled",
                    device.id, device.driver
                ));
            }
        }
        warnings
    }

    /// Effective base probe interval for one device, clamped to the minimum.
    pub fn effective_interval(&self, descriptor: &DeviceDescriptor) -> Duration {
        let seconds = descriptor
            .interval_seconds
            .unwrap_or(self.scheduler.default_interval_seconds)
            .max(MIN_INTERVAL_SECS);
        Duration::from_secs(seconds)
    }

    /// Plug power ceiling for one device: per-device override or global.
    pub fn power_ceiling_for(&self, descriptor: &DeviceDescriptor) -> f64 {
        descriptor
            .param_f64("power_ceiling_w")
            .unwrap_or(self.thresholds.power_ceiling_watts)
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
