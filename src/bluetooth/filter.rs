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

//! Discovery filter.
//!
//! The daemon applies the filter on a best-effort basis, so every
//! discovery result is checked against it again before delivery.

use uuid::Uuid;

use super::constants::{parse_uuid, RSSI_FILTER_MAX, RSSI_FILTER_MIN, RSSI_UNKNOWN};
use super::device::DeviceInfo;
use crate::bus::{PropMap, Value};
use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryFilter {
    /// Minimum RSSI. [`RSSI_UNKNOWN`] accepts every device.
    pub rssi: i16,
    /// Service UUIDs of interest. Empty accepts every device.
    pub uuids: Vec<Uuid>,
    /// Prefix of the device name or address.
    pub pattern: Option<String>,
}

impl Default for DiscoveryFilter {
    fn default() -> Self {
        Self {
            rssi: RSSI_UNKNOWN,
            uuids: Vec::new(),
            pattern: None,
        }
    }
}

impl DiscoveryFilter {
    /// Filter on RSSI and, optionally, service UUIDs.
    pub fn new(rssi: i16, uuids: &[&str]) -> Result<Self> {
        check_rssi(rssi)?;
        Ok(Self {
            rssi,
            uuids: parse_uuids(uuids)?,
            pattern: None,
        })
    }

    /// Filter on service UUIDs only.
    pub fn with_uuids(uuids: &[&str]) -> Result<Self> {
        Ok(Self {
            uuids: parse_uuids(uuids)?,
            ..Default::default()
        })
    }

    pub fn with_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.pattern = Some(pattern.into());
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.rssi != RSSI_UNKNOWN {
            check_rssi(self.rssi)?;
        }
        Ok(())
    }

    pub fn matches(&self, device: &DeviceInfo) -> bool {
        if device.rssi < self.rssi {
            return false;
        }
        if !self.uuids.is_empty() && !device.uuids.iter().any(|u| self.uuids.contains(u)) {
            return false;
        }
        match &self.pattern {
            Some(pattern) => {
                device.address.starts_with(pattern.as_str())
                    || device
                        .name
                        .as_deref()
                        .is_some_and(|name| name.starts_with(pattern.as_str()))
            }
            None => true,
        }
    }

    /// Argument of `Adapter1.SetDiscoveryFilter`.
    pub(crate) fn to_bus_filter(&self) -> Value {
        let mut filter = PropMap::new();
        filter.insert("Transport".into(), Value::from("le"));
        if self.rssi != RSSI_UNKNOWN {
            filter.insert("RSSI".into(), Value::Int16(self.rssi));
        }
        if !self.uuids.is_empty() {
            filter.insert(
                "UUIDs".into(),
                Value::str_array(self.uuids.iter().map(Uuid::to_string)),
            );
        }
        if let Some(pattern) = &self.pattern {
            filter.insert("Pattern".into(), Value::from(pattern.as_str()));
        }
        Value::from(filter)
    }
}

fn check_rssi(rssi: i16) -> Result<()> {
    if !(RSSI_FILTER_MIN..=RSSI_FILTER_MAX).contains(&rssi) {
        return Err(Error::invalid(format!(
            "RSSI threshold {} outside {}..={}",
            rssi, RSSI_FILTER_MIN, RSSI_FILTER_MAX
        )));
    }
    Ok(())
}

fn parse_uuids(uuids: &[&str]) -> Result<Vec<Uuid>> {
    uuids.iter().map(|u| parse_uuid(u)).collect()
}
