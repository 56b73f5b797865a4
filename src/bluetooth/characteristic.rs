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

//! Remote GATT characteristic.
//!
//! Owns the value-changed subscription used for notifications. The
//! subscription exists exactly while the characteristic is notifying and
//! is dropped with it.

use bitflags::bitflags;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::constants::{GATT_CHARACTERISTIC_INTERFACE, PROPERTIES_CHANGED, PROPERTIES_INTERFACE};
use super::context::{Context, Route, RouteId};
use super::events::Event;
use crate::bus::{MatchRule, PropMap, Value};
use crate::error::{Error, Result};

bitflags! {
    /// Characteristic properties, as announced in the `Flags` property.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct CharFlags: u16 {
        const BROADCAST = 0x0001;
        const READ = 0x0002;
        const WRITE_WITHOUT_RESPONSE = 0x0004;
        const WRITE = 0x0008;
        const NOTIFY = 0x0010;
        const INDICATE = 0x0020;
        const AUTHENTICATED_SIGNED_WRITES = 0x0040;
        const EXTENDED_PROPERTIES = 0x0080;
        const RELIABLE_WRITE = 0x0100;
        const WRITABLE_AUXILIARIES = 0x0200;
    }
}

impl CharFlags {
    /// Parse BlueZ flag names. Unknown names (security levels and the
    /// like) are ignored.
    pub fn from_names<S: AsRef<str>>(names: &[S]) -> Self {
        names.iter().fold(CharFlags::empty(), |flags, name| {
            flags
                | match name.as_ref() {
                    "broadcast" => CharFlags::BROADCAST,
                    "read" => CharFlags::READ,
                    "write-without-response" => CharFlags::WRITE_WITHOUT_RESPONSE,
                    "write" => CharFlags::WRITE,
                    "notify" => CharFlags::NOTIFY,
                    "indicate" => CharFlags::INDICATE,
                    "authenticated-signed-writes" => CharFlags::AUTHENTICATED_SIGNED_WRITES,
                    "extended-properties" => CharFlags::EXTENDED_PROPERTIES,
                    "reliable-write" => CharFlags::RELIABLE_WRITE,
                    "writable-auxiliaries" => CharFlags::WRITABLE_AUXILIARIES,
                    _ => CharFlags::empty(),
                }
        })
    }

    /// BlueZ flag names for these properties.
    pub fn to_names(self) -> Vec<&'static str> {
        [
            (CharFlags::BROADCAST, "broadcast"),
            (CharFlags::READ, "read"),
            (CharFlags::WRITE_WITHOUT_RESPONSE, "write-without-response"),
            (CharFlags::WRITE, "write"),
            (CharFlags::NOTIFY, "notify"),
            (CharFlags::INDICATE, "indicate"),
            (CharFlags::AUTHENTICATED_SIGNED_WRITES, "authenticated-signed-writes"),
            (CharFlags::EXTENDED_PROPERTIES, "extended-properties"),
            (CharFlags::RELIABLE_WRITE, "reliable-write"),
            (CharFlags::WRITABLE_AUXILIARIES, "writable-auxiliaries"),
        ]
        .into_iter()
        .filter(|(flag, _)| self.contains(*flag))
        .map(|(_, name)| name)
        .collect()
    }
}

/// How a value is written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteType {
    /// Write request, acknowledged by the peer.
    WithResponse,
    /// Write command, not acknowledged.
    WithoutResponse,
}

impl WriteType {
    fn as_bus_str(self) -> &'static str {
        match self {
            WriteType::WithResponse => "request",
            WriteType::WithoutResponse => "command",
        }
    }
}

pub struct Characteristic {
    ctx: Arc<Context>,
    path: String,
    uuid: Uuid,
    service_path: String,
    service_uuid: Uuid,
    device: String,
    flags: CharFlags,
    notifying: bool,
    route: Option<RouteId>,
}

impl Characteristic {
    pub(crate) fn new(
        ctx: Arc<Context>,
        path: String,
        uuid: Uuid,
        service_path: String,
        service_uuid: Uuid,
        device: String,
        flags: CharFlags,
    ) -> Self {
        Self {
            ctx,
            path,
            uuid,
            service_path,
            service_uuid,
            device,
            flags,
            notifying: false,
            route: None,
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    pub fn service_path(&self) -> &str {
        &self.service_path
    }

    pub fn service_uuid(&self) -> Uuid {
        self.service_uuid
    }

    /// Object path of the owning device.
    pub fn device(&self) -> &str {
        &self.device
    }

    pub fn flags(&self) -> CharFlags {
        self.flags
    }

    pub fn is_notifying(&self) -> bool {
        self.notifying
    }

    /// Whether a value-changed subscription is currently held.
    pub fn is_subscribed(&self) -> bool {
        self.route.is_some()
    }

    fn require(&self, flag: CharFlags, operation: &str) -> Result<()> {
        if self.flags.intersects(flag) {
            Ok(())
        } else {
            Err(Error::invalid(format!(
                "characteristic {} does not support {}",
                self.uuid, operation
            )))
        }
    }

    /// Read the current value.
    pub async fn read(&self) -> Result<Vec<u8>> {
        self.require(CharFlags::READ, "read")?;

        let reply = self
            .ctx
            .call(
                &self.path,
                GATT_CHARACTERISTIC_INTERFACE,
                "ReadValue",
                vec![Value::empty_dict()],
            )
            .await?;

        let value = reply
            .first()
            .and_then(Value::as_bytes)
            .ok_or_else(|| Error::malformed(format!("ReadValue reply from {}", self.path)))?;
        debug!("Read {} from {}: {}", value.len(), self.uuid, hex::encode(&value));
        Ok(value)
    }

    /// Write `value` at offset 0.
    pub async fn write(&self, value: &[u8], write_type: WriteType) -> Result<()> {
        match write_type {
            WriteType::WithResponse => self.require(CharFlags::WRITE, "write")?,
            WriteType::WithoutResponse => {
                self.require(CharFlags::WRITE_WITHOUT_RESPONSE, "write without response")?
            }
        }

        let mut options = PropMap::new();
        options.insert("type".into(), Value::from(write_type.as_bus_str()));
        options.insert("offset".into(), Value::UInt16(0));

        debug!("Writing {} to {}: {}", value.len(), self.uuid, hex::encode(value));
        self.ctx
            .call(
                &self.path,
                GATT_CHARACTERISTIC_INTERFACE,
                "WriteValue",
                vec![Value::from(value.to_vec()), Value::from(options)],
            )
            .await?;
        Ok(())
    }

    /// Subscribe to value changes and enable notifications.
    pub async fn start_notify(&mut self) -> Result<()> {
        if self.notifying {
            return Ok(());
        }
        self.require(CharFlags::NOTIFY | CharFlags::INDICATE, "notifications")?;

        // Subscribe before enabling so no early notification is missed.
        let rule = MatchRule::new(PROPERTIES_INTERFACE, PROPERTIES_CHANGED)
            .path(&self.path)
            .arg0(GATT_CHARACTERISTIC_INTERFACE);
        let route = self.ctx.subscribe(
            rule,
            Route::Characteristic {
                device: self.device.clone(),
                characteristic: self.path.clone(),
            },
        )?;
        self.route = Some(route);

        let result = self
            .ctx
            .call(&self.path, GATT_CHARACTERISTIC_INTERFACE, "StartNotify", vec![])
            .await;

        match result {
            Ok(_) => {
                info!("Notifications enabled on {}", self.uuid);
                self.notifying = true;
                self.notify_state_changed(None);
                Ok(())
            }
            Err(e) => {
                self.teardown();
                self.notify_state_changed(Some(e.clone()));
                Err(e)
            }
        }
    }

    /// Disable notifications. The subscription is released even if the
    /// daemon rejects the call.
    pub async fn stop_notify(&mut self) -> Result<()> {
        if !self.notifying && self.route.is_none() {
            return Ok(());
        }

        let result = self
            .ctx
            .call(&self.path, GATT_CHARACTERISTIC_INTERFACE, "StopNotify", vec![])
            .await;

        self.teardown();
        self.notify_state_changed(result.as_ref().err().cloned());
        info!("Notifications disabled on {}", self.uuid);
        result.map(|_| ())
    }

    /// Apply a `PropertiesChanged` for this characteristic.
    pub(crate) fn handle_properties(&mut self, changed: &PropMap) {
        if let Some(value) = changed.get("Value") {
            match value.as_bytes() {
                Some(bytes) if self.notifying => {
                    debug!("Notification from {}: {}", self.uuid, hex::encode(&bytes));
                    self.ctx.emit(Event::Notification {
                        device: self.device.clone(),
                        characteristic: self.path.clone(),
                        service_uuid: self.service_uuid,
                        uuid: self.uuid,
                        value: bytes,
                    });
                }
                Some(_) => {}
                None => warn!("Value of {} is a {}, ignoring", self.path, value.kind()),
            }
        }

        match changed.get("Notifying").map(Value::as_bool) {
            Some(Some(false)) if self.notifying => {
                info!("{} stopped notifying", self.uuid);
                self.teardown();
                self.notify_state_changed(None);
            }
            Some(None) => warn!("Notifying of {} is not a bool", self.path),
            _ => {}
        }
    }

    /// The characteristic is going away: end notifications locally and
    /// tell listeners if they were on.
    pub(crate) fn release(&mut self) {
        let notifying = self.notifying;
        self.teardown();
        if notifying {
            self.notify_state_changed(None);
        }
    }

    fn teardown(&mut self) {
        self.notifying = false;
        if let Some(route) = self.route.take() {
            self.ctx.unsubscribe(route);
        }
    }

    fn notify_state_changed(&self, error: Option<Error>) {
        self.ctx.emit(Event::NotifyStateChanged {
            device: self.device.clone(),
            characteristic: self.path.clone(),
            uuid: self.uuid,
            notifying: self.notifying,
            error,
        });
    }
}

impl Drop for Characteristic {
    fn drop(&mut self) {
        if let Some(route) = self.route.take() {
            self.ctx.unsubscribe(route);
        }
    }
}

impl std::fmt::Debug for Characteristic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Characteristic")
            .field("path", &self.path)
            .field("uuid", &self.uuid)
            .field("service_uuid", &self.service_uuid)
            .field("flags", &self.flags)
            .field("notifying", &self.notifying)
            .finish()
    }
}
