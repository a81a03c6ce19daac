//! Configuration for the Argus collection core
//!
//! Plain serde structs with defaults matching the original deployment
//! profile, loadable from an optional TOML file with `ARGUS_*` environment
//! overrides (e.g. `ARGUS_LOCATION__BATTERY_MINIMUM=0.2`).

use crate::error::Result;
use crate::sampling::SamplingParams;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Top-level agent configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArgusConfig {
    pub logs: LogSettings,
    pub contacts: ContactSettings,
    pub location: LocationSettings,
}

impl ArgusConfig {
    /// Load configuration from an optional TOML file plus environment
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(false));
        }
        let settings = builder
            .add_source(
                config::Environment::with_prefix("ARGUS")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;
        Ok(settings.try_deserialize()?)
    }
}

/// Call/message/unread polling settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogSettings {
    /// Seconds between polling cycles
    pub poll_interval_secs: u64,
    /// Maximum rows per source query
    pub page_limit: usize,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            poll_interval_secs: 24 * 60 * 60,
            page_limit: 1000,
        }
    }
}

/// Contact-list polling settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContactSettings {
    /// Seconds between membership snapshots
    pub poll_interval_secs: u64,
    /// Maximum lookup keys per page
    pub page_limit: usize,
}

impl Default for ContactSettings {
    fn default() -> Self {
        Self {
            poll_interval_secs: 24 * 60 * 60,
            page_limit: 1000,
        }
    }
}

/// Location sampling intervals and battery thresholds
///
/// An interval of zero disables that provider entirely.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocationSettings {
    pub gps_interval_secs: u64,
    pub gps_interval_reduced_secs: u64,
    pub network_interval_secs: u64,
    pub network_interval_reduced_secs: u64,
    pub battery_minimum: f32,
    pub battery_reduced: f32,
}

impl Default for LocationSettings {
    fn default() -> Self {
        Self {
            gps_interval_secs: 15 * 60,
            gps_interval_reduced_secs: 4 * 15 * 60,
            network_interval_secs: 5 * 60,
            network_interval_reduced_secs: 4 * 5 * 60,
            battery_minimum: 0.15,
            battery_reduced: 0.30,
        }
    }
}

impl LocationSettings {
    pub fn sampling_params(&self) -> SamplingParams {
        SamplingParams {
            gps_interval: Duration::from_secs(self.gps_interval_secs),
            gps_interval_reduced: Duration::from_secs(self.gps_interval_reduced_secs),
            network_interval: Duration::from_secs(self.network_interval_secs),
            network_interval_reduced: Duration::from_secs(self.network_interval_reduced_secs),
            battery_minimum: self.battery_minimum,
            battery_reduced: self.battery_reduced,
        }
    }
}
