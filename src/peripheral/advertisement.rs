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

//! LE advertisement data.

use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

use super::properties_reply;
use crate::bluetooth::constants::{ADVERTISEMENT_INTERFACE, PROPERTIES_INTERFACE};
use crate::bus::{BusError, IpcBus, MethodCall, ObjectHandler, PropMap, RegistrationId, Value};
use crate::error::Result;

/// Advertisement contents. Unset fields are left to the daemon.
#[derive(Debug, Clone, PartialEq)]
pub struct Advertisement {
    /// Object path the advertisement is published on.
    pub path: String,
    pub local_name: Option<String>,
    pub service_uuids: Vec<Uuid>,
    pub manufacturer_data: BTreeMap<u16, Vec<u8>>,
    pub service_data: BTreeMap<Uuid, Vec<u8>>,
    /// Advertising interval bounds in milliseconds.
    pub min_interval: Option<u32>,
    pub max_interval: Option<u32>,
    pub tx_power: Option<i16>,
    pub appearance: Option<u16>,
    pub discoverable: bool,
}

impl Default for Advertisement {
    fn default() -> Self {
        Self {
            path: "/org/bluez/gatthost/advertisement0".to_string(),
            local_name: None,
            service_uuids: Vec::new(),
            manufacturer_data: BTreeMap::new(),
            service_data: BTreeMap::new(),
            min_interval: None,
            max_interval: None,
            tx_power: None,
            appearance: None,
            discoverable: true,
        }
    }
}

impl Advertisement {
    /// `LEAdvertisement1` properties.
    pub fn properties(&self) -> PropMap {
        let mut props = PropMap::new();
        props.insert("Type".into(), Value::from("peripheral"));
        props.insert("Discoverable".into(), Value::Bool(self.discoverable));
        if let Some(name) = &self.local_name {
            props.insert("LocalName".into(), Value::from(name.as_str()));
        }
        if !self.service_uuids.is_empty() {
            props.insert(
                "ServiceUUIDs".into(),
                Value::str_array(self.service_uuids.iter().map(Uuid::to_string)),
            );
        }
        if !self.manufacturer_data.is_empty() {
            props.insert(
                "ManufacturerData".into(),
                Value::Dict(
                    self.manufacturer_data
                        .iter()
                        .map(|(id, data)| (Value::UInt16(*id), Value::Bytes(data.clone())))
                        .collect(),
                ),
            );
        }
        if !self.service_data.is_empty() {
            props.insert(
                "ServiceData".into(),
                Value::Dict(
                    self.service_data
                        .iter()
                        .map(|(uuid, data)| (Value::from(uuid.to_string()), Value::Bytes(data.clone())))
                        .collect(),
                ),
            );
        }
        if let Some(min) = self.min_interval {
            props.insert("MinInterval".into(), Value::UInt32(min));
        }
        if let Some(max) = self.max_interval {
            props.insert("MaxInterval".into(), Value::UInt32(max));
        }
        if let Some(tx_power) = self.tx_power {
            props.insert("TxPower".into(), Value::Int16(tx_power));
        }
        if let Some(appearance) = self.appearance {
            props.insert("Appearance".into(), Value::UInt16(appearance));
        }
        props
    }

    /// Publish the advertisement object on `bus`.
    pub fn register(self, bus: Arc<dyn IpcBus>) -> Result<AdvertisementHandle> {
        let props = self.properties();
        let path = self.path.clone();
        let object: Arc<dyn ObjectHandler> = Arc::new(move |call: &MethodCall| {
            if call.interface == PROPERTIES_INTERFACE {
                return properties_reply(call, ADVERTISEMENT_INTERFACE, props.clone());
            }
            match call.member.as_str() {
                "Release" => {
                    info!("Advertisement {} released by the daemon", call.path);
                    Ok(vec![])
                }
                other => Err(BusError::unknown_method(&call.interface, other)),
            }
        });

        let advertisement = bus.register_object(&path, ADVERTISEMENT_INTERFACE, object.clone())?;
        let properties = match bus.register_object(&path, PROPERTIES_INTERFACE, object) {
            Ok(id) => id,
            Err(e) => {
                bus.unregister_object(advertisement);
                return Err(e.into());
            }
        };
        debug!("Advertisement published at {}", path);

        Ok(AdvertisementHandle {
            bus,
            advertisement: self,
            registrations: [advertisement, properties],
        })
    }
}

/// A published advertisement. Dropping it withdraws the object.
pub struct AdvertisementHandle {
    bus: Arc<dyn IpcBus>,
    advertisement: Advertisement,
    registrations: [RegistrationId; 2],
}

impl AdvertisementHandle {
    pub fn path(&self) -> &str {
        &self.advertisement.path
    }

    pub fn advertisement(&self) -> &Advertisement {
        &self.advertisement
    }
}

impl Drop for AdvertisementHandle {
    fn drop(&mut self) {
        for id in self.registrations {
            self.bus.unregister_object(id);
        }
    }
}
