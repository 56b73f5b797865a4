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

//! Peripheral role.
//!
//! Local objects the daemon calls into: a GATT application with its
//! services and characteristics, advertisements and the pairing agent.
//! Each object is published on the bus when created and withdrawn when
//! dropped.

mod advertisement;
mod agent;
mod application;

use thiserror::Error;

use crate::bluetooth::constants::{ERROR_PREFIX, PROPERTIES_INTERFACE};
use crate::bus::{BusError, MethodCall, PropMap, Value};

pub use advertisement::{Advertisement, AdvertisementHandle};
pub use agent::{Agent, AgentHandler, IoCapability};
pub(crate) use agent::PairingProgress;
pub use application::{Application, LocalCharacteristicHandler, ReadRequest, WriteRequest};

/// Error returned to the daemon for a request on a local object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum GattError {
    #[error("Operation failed")]
    Failed,
    #[error("Operation already in progress")]
    InProgress,
    #[error("Operation not permitted")]
    NotPermitted,
    #[error("Invalid value length")]
    InvalidValueLength,
    #[error("Operation not authorized")]
    NotAuthorized,
    #[error("Operation not supported")]
    NotSupported,
    #[error("Invalid offset")]
    InvalidOffset,
}

impl GattError {
    pub fn name(self) -> &'static str {
        match self {
            GattError::Failed => "Failed",
            GattError::InProgress => "InProgress",
            GattError::NotPermitted => "NotPermitted",
            GattError::InvalidValueLength => "InvalidValueLength",
            GattError::NotAuthorized => "NotAuthorized",
            GattError::NotSupported => "NotSupported",
            GattError::InvalidOffset => "InvalidOffset",
        }
    }
}

impl From<GattError> for BusError {
    fn from(err: GattError) -> Self {
        BusError::new(format!("{}{}", ERROR_PREFIX, err.name()), err.to_string())
    }
}

/// Reply used for every declined agent request.
pub(crate) fn rejected(message: &str) -> BusError {
    BusError::new(format!("{}Rejected", ERROR_PREFIX), message)
}

pub(crate) fn canceled() -> BusError {
    BusError::new(format!("{}Canceled", ERROR_PREFIX), "Pairing cancelled")
}

/// Serve `org.freedesktop.DBus.Properties` for an object exposing `props`
/// under `interface`. Properties are read-only.
pub(crate) fn properties_reply(
    call: &MethodCall,
    interface: &str,
    props: PropMap,
) -> Result<Vec<Value>, BusError> {
    let requested = call.args.first().and_then(Value::as_str).unwrap_or_default();
    if requested != interface {
        return Err(BusError::invalid_args(format!(
            "No such interface '{}'",
            requested
        )));
    }

    match call.member.as_str() {
        "GetAll" => Ok(vec![Value::from(props)]),
        "Get" => {
            let name = call
                .args
                .get(1)
                .and_then(Value::as_str)
                .ok_or_else(|| BusError::invalid_args("Missing property name"))?;
            props
                .get(name)
                .cloned()
                .map(|value| vec![value])
                .ok_or_else(|| BusError::invalid_args(format!("No such property '{}'", name)))
        }
        "Set" => Err(BusError::new(
            "org.freedesktop.DBus.Error.PropertyReadOnly",
            "Property is read-only",
        )),
        other => Err(BusError::unknown_method(PROPERTIES_INTERFACE, other)),
    }
}
