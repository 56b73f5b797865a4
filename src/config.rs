// Copyright 2026 Daniel Pelikan
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Configuration module.
//!
//! Handles loading and saving stack settings.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::bluetooth::DiscoveryFilter;
use crate::peripheral::IoCapability;

/// Directory name used under the platform config directory.
const APP_DIR: &str = "ble-gatt-host";

/// Stack configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Bluetooth settings.
    pub bluetooth: BluetoothConfig,

    /// Logging settings.
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BluetoothConfig {
    /// Adapter to use (e.g. "hci0"). The first one found when unset.
    pub adapter: Option<String>,

    /// Upper bound for every bus call, in milliseconds.
    pub call_timeout_ms: u64,

    /// Roll CONNECTING back to DISCONNECTED (and BONDING back to NONE)
    /// when Connect (or Pair) fails or times out.
    pub rollback_on_failure: bool,

    /// Discovery filter applied by `Adapter::apply_config`.
    pub discovery: DiscoveryConfig,

    /// Pairing agent settings.
    pub agent: AgentConfig,
}

impl BluetoothConfig {
    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }
}

impl Default for BluetoothConfig {
    fn default() -> Self {
        Self {
            adapter: None,
            // Matches the daemon's own default method call timeout.
            call_timeout_ms: 25_000,
            rollback_on_failure: true,
            discovery: DiscoveryConfig::default(),
            agent: AgentConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// Minimum RSSI for a discovery result, in dBm (-127..=20).
    pub rssi_threshold: Option<i16>,

    /// Only report devices advertising one of these service UUIDs.
    pub uuids: Vec<String>,

    /// Only report devices whose name or address starts with this.
    pub pattern: Option<String>,
}

impl DiscoveryConfig {
    /// Build the filter described by this section, if any.
    pub fn filter(&self) -> crate::Result<Option<DiscoveryFilter>> {
        if self.rssi_threshold.is_none() && self.uuids.is_empty() && self.pattern.is_none() {
            return Ok(None);
        }
        let uuids: Vec<&str> = self.uuids.iter().map(String::as_str).collect();
        let mut filter = match self.rssi_threshold {
            Some(rssi) => DiscoveryFilter::new(rssi, &uuids)?,
            None => DiscoveryFilter::with_uuids(&uuids)?,
        };
        if let Some(pattern) = &self.pattern {
            filter = filter.with_pattern(pattern);
        }
        Ok(Some(filter))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Object path the pairing agent is published on.
    pub path: String,

    /// Input/output capability announced to the daemon.
    pub io_capability: IoCapability,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            path: "/org/bluez/gatthost/agent".to_string(),
            io_capability: IoCapability::KeyboardDisplay,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `tracing` filter directive, used when `RUST_LOG` is unset.
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "ble_gatt_host=info".to_string(),
        }
    }
}

impl Config {
    /// Default location of the configuration file.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(APP_DIR)
            .join("config.toml")
    }

    /// Load configuration from the default location or create it.
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::default_path())
    }

    /// Load configuration from `path`, writing defaults there if missing.
    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            Ok(toml::from_str(&content)?)
        } else {
            let config = Self::default();
            config.save_to(path)?;
            Ok(config)
        }
    }

    /// Save configuration to `path`.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}
