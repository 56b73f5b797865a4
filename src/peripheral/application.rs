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

//! Local GATT application.
//!
//! The application root exposes `GetManagedObjects`; below it every
//! service and characteristic is its own bus object. Remote reads and
//! writes are served from the stored value and offered to an optional
//! [`LocalCharacteristicHandler`] first.

use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::{Arc, Weak};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{properties_reply, GattError};
use crate::bluetooth::constants::{
    parse_uuid, GATT_CHARACTERISTIC_INTERFACE, GATT_SERVICE_INTERFACE, OBJECT_MANAGER_INTERFACE,
    PROPERTIES_CHANGED, PROPERTIES_INTERFACE,
};
use crate::bluetooth::CharFlags;
use crate::bus::{
    encode_managed_objects, BusError, IpcBus, ManagedObjects, MethodCall, ObjectHandler, PropMap,
    PropertiesChanged, RegistrationId, Value,
};
use crate::error::{Error, Result};

/// A remote read of a local characteristic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadRequest {
    pub service_uuid: Uuid,
    pub uuid: Uuid,
    pub offset: u16,
    pub mtu: Option<u16>,
    /// Object path of the remote device, when the daemon provides it.
    pub device: Option<String>,
}

/// A remote write to a local characteristic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteRequest {
    pub service_uuid: Uuid,
    pub uuid: Uuid,
    /// Bytes as sent by the peer, before splicing at `offset`.
    pub value: Vec<u8>,
    pub offset: u16,
    /// `request`, `command` or `reliable`.
    pub write_type: Option<String>,
    pub device: Option<String>,
}

/// Hooks for a local characteristic. All methods have accepting defaults.
///
/// Called from the bus dispatch path without any application lock held.
pub trait LocalCharacteristicHandler: Send + Sync {
    /// Return `Some` to replace the stored value before it is served.
    fn on_read(&self, _request: &ReadRequest) -> std::result::Result<Option<Vec<u8>>, GattError> {
        Ok(None)
    }

    /// Accept or reject a remote write.
    fn on_write(&self, _request: &WriteRequest) -> std::result::Result<(), GattError> {
        Ok(())
    }

    /// A remote write was stored.
    fn on_updated(&self, _uuid: Uuid, _value: &[u8]) {}

    fn on_start_notify(&self, _uuid: Uuid) {}

    fn on_stop_notify(&self, _uuid: Uuid) {}
}

struct LocalService {
    path: String,
    uuid: Uuid,
    primary: bool,
    characteristics: usize,
}

impl LocalService {
    fn properties(&self) -> PropMap {
        let mut props = PropMap::new();
        props.insert("UUID".into(), Value::from(self.uuid.to_string()));
        props.insert("Primary".into(), Value::Bool(self.primary));
        props
    }
}

struct LocalCharacteristic {
    path: String,
    uuid: Uuid,
    service_path: String,
    service_uuid: Uuid,
    flags: CharFlags,
    value: Vec<u8>,
    notifying: bool,
    handler: Option<Arc<dyn LocalCharacteristicHandler>>,
}

impl LocalCharacteristic {
    fn properties(&self) -> PropMap {
        let mut props = PropMap::new();
        props.insert("UUID".into(), Value::from(self.uuid.to_string()));
        props.insert("Service".into(), Value::object_path(self.service_path.as_str()));
        props.insert("Flags".into(), Value::str_array(self.flags.to_names()));
        props.insert("Notifying".into(), Value::Bool(self.notifying));
        props.insert("Value".into(), Value::Bytes(self.value.clone()));
        props
    }
}

#[derive(Default)]
struct Tree {
    registrations: Vec<RegistrationId>,
    services: Vec<LocalService>,
    characteristics: Vec<LocalCharacteristic>,
}

impl Tree {
    fn characteristic(&self, path: &str) -> std::result::Result<&LocalCharacteristic, BusError> {
        self.characteristics
            .iter()
            .find(|c| c.path == path)
            .ok_or_else(|| BusError::unknown_object(path))
    }

    fn characteristic_mut(
        &mut self,
        path: &str,
    ) -> std::result::Result<&mut LocalCharacteristic, BusError> {
        self.characteristics
            .iter_mut()
            .find(|c| c.path == path)
            .ok_or_else(|| BusError::unknown_object(path))
    }

    fn find(&mut self, service_uuid: Uuid, uuid: Uuid) -> Result<&mut LocalCharacteristic> {
        self.characteristics
            .iter_mut()
            .find(|c| c.service_uuid == service_uuid && c.uuid == uuid)
            .ok_or_else(|| {
                Error::invalid(format!(
                    "no local characteristic {} in service {}",
                    uuid, service_uuid
                ))
            })
    }
}

struct Inner {
    bus: Arc<dyn IpcBus>,
    path: String,
    tree: Mutex<Tree>,
}

impl Inner {
    fn managed_objects(&self) -> ManagedObjects {
        let tree = self.tree.lock();
        let mut objects = ManagedObjects::new();
        for service in &tree.services {
            let mut interfaces = BTreeMap::new();
            interfaces.insert(GATT_SERVICE_INTERFACE.to_string(), service.properties());
            objects.insert(service.path.clone(), interfaces);
        }
        for characteristic in &tree.characteristics {
            let mut interfaces = BTreeMap::new();
            interfaces.insert(
                GATT_CHARACTERISTIC_INTERFACE.to_string(),
                characteristic.properties(),
            );
            objects.insert(characteristic.path.clone(), interfaces);
        }
        objects
    }

    fn emit_value(&self, path: &str, value: &[u8]) -> std::result::Result<(), BusError> {
        let mut changed = PropMap::new();
        changed.insert("Value".into(), Value::Bytes(value.to_vec()));
        let signal = PropertiesChanged {
            interface: GATT_CHARACTERISTIC_INTERFACE.to_string(),
            changed,
            invalidated: Vec::new(),
        };
        self.bus
            .emit_signal(path, PROPERTIES_INTERFACE, PROPERTIES_CHANGED, signal.to_args())
    }

    fn read_value(&self, path: &str, call: &MethodCall) -> std::result::Result<Vec<Value>, BusError> {
        let options = call
            .args
            .first()
            .and_then(Value::to_prop_map)
            .unwrap_or_default();

        let (request, handler) = {
            let tree = self.tree.lock();
            let c = tree.characteristic(path)?;
            if !c.flags.contains(CharFlags::READ) {
                return Err(GattError::NotPermitted.into());
            }
            let request = ReadRequest {
                service_uuid: c.service_uuid,
                uuid: c.uuid,
                offset: options.get("offset").and_then(Value::as_u16).unwrap_or(0),
                mtu: options.get("mtu").and_then(Value::as_u16),
                device: options
                    .get("device")
                    .and_then(Value::as_str)
                    .map(str::to_string),
            };
            (request, c.handler.clone())
        };

        if let Some(handler) = handler {
            if let Some(value) = handler.on_read(&request)? {
                self.tree.lock().characteristic_mut(path)?.value = value;
            }
        }

        let value = self.tree.lock().characteristic(path)?.value.clone();
        let offset = request.offset as usize;
        if offset > value.len() {
            return Err(GattError::InvalidOffset.into());
        }
        debug!("Remote read of {} at offset {}", request.uuid, offset);
        Ok(vec![Value::Bytes(value[offset..].to_vec())])
    }

    fn write_value(&self, path: &str, call: &MethodCall) -> std::result::Result<Vec<Value>, BusError> {
        let bytes = call
            .args
            .first()
            .and_then(Value::as_bytes)
            .ok_or_else(|| BusError::invalid_args("WriteValue expects a byte array"))?;
        let options = call
            .args
            .get(1)
            .and_then(Value::to_prop_map)
            .unwrap_or_default();

        let (request, handler, current) = {
            let tree = self.tree.lock();
            let c = tree.characteristic(path)?;
            if !c
                .flags
                .intersects(CharFlags::WRITE | CharFlags::WRITE_WITHOUT_RESPONSE)
            {
                return Err(GattError::NotPermitted.into());
            }
            let request = WriteRequest {
                service_uuid: c.service_uuid,
                uuid: c.uuid,
                value: bytes,
                offset: options.get("offset").and_then(Value::as_u16).unwrap_or(0),
                write_type: options
                    .get("type")
                    .and_then(Value::as_str)
                    .map(str::to_string),
                device: options
                    .get("device")
                    .and_then(Value::as_str)
                    .map(str::to_string),
            };
            (request, c.handler.clone(), c.value.clone())
        };

        let offset = request.offset as usize;
        if offset > current.len() {
            return Err(GattError::InvalidOffset.into());
        }
        if let Some(handler) = &handler {
            handler.on_write(&request)?;
        }

        let mut value = current[..offset].to_vec();
        value.extend_from_slice(&request.value);
        self.tree.lock().characteristic_mut(path)?.value = value.clone();
        debug!(
            "Remote write of {} at offset {}: {}",
            request.uuid,
            offset,
            hex::encode(&request.value)
        );

        if let Some(handler) = &handler {
            handler.on_updated(request.uuid, &value);
        }
        self.emit_value(path, &value)?;
        Ok(vec![])
    }

    fn set_notifying(&self, path: &str, notifying: bool) -> std::result::Result<Vec<Value>, BusError> {
        let (uuid, handler) = {
            let mut tree = self.tree.lock();
            let c = tree.characteristic_mut(path)?;
            if !c.flags.intersects(CharFlags::NOTIFY | CharFlags::INDICATE) {
                return Err(GattError::NotSupported.into());
            }
            if c.notifying == notifying {
                return Ok(vec![]);
            }
            c.notifying = notifying;
            (c.uuid, c.handler.clone())
        };

        info!(
            "Remote {} notifications on {}",
            if notifying { "enabled" } else { "disabled" },
            uuid
        );
        if let Some(handler) = handler {
            if notifying {
                handler.on_start_notify(uuid);
            } else {
                handler.on_stop_notify(uuid);
            }
        }
        Ok(vec![])
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        for id in self.tree.get_mut().registrations.drain(..) {
            self.bus.unregister_object(id);
        }
        debug!("Application {} withdrawn", self.path);
    }
}

/// Bus object for the application root.
struct RootObject(Weak<Inner>);

impl ObjectHandler for RootObject {
    fn handle_call(&self, call: &MethodCall) -> std::result::Result<Vec<Value>, BusError> {
        let inner = self
            .0
            .upgrade()
            .ok_or_else(|| BusError::unknown_object(&call.path))?;
        match call.member.as_str() {
            "GetManagedObjects" => Ok(vec![encode_managed_objects(inner.managed_objects())]),
            other => Err(BusError::unknown_method(&call.interface, other)),
        }
    }
}

/// Bus object for one service.
struct ServiceObject {
    app: Weak<Inner>,
    path: String,
}

impl ObjectHandler for ServiceObject {
    fn handle_call(&self, call: &MethodCall) -> std::result::Result<Vec<Value>, BusError> {
        let inner = self
            .app
            .upgrade()
            .ok_or_else(|| BusError::unknown_object(&self.path))?;
        if call.interface != PROPERTIES_INTERFACE {
            return Err(BusError::unknown_method(&call.interface, &call.member));
        }
        let props = inner
            .tree
            .lock()
            .services
            .iter()
            .find(|s| s.path == self.path)
            .map(LocalService::properties)
            .ok_or_else(|| BusError::unknown_object(&self.path))?;
        properties_reply(call, GATT_SERVICE_INTERFACE, props)
    }
}

/// Bus object for one characteristic.
struct CharacteristicObject {
    app: Weak<Inner>,
    path: String,
}

impl ObjectHandler for CharacteristicObject {
    fn handle_call(&self, call: &MethodCall) -> std::result::Result<Vec<Value>, BusError> {
        let inner = self
            .app
            .upgrade()
            .ok_or_else(|| BusError::unknown_object(&self.path))?;

        if call.interface == PROPERTIES_INTERFACE {
            let props = inner.tree.lock().characteristic(&self.path)?.properties();
            return properties_reply(call, GATT_CHARACTERISTIC_INTERFACE, props);
        }

        match call.member.as_str() {
            "ReadValue" => inner.read_value(&self.path, call),
            "WriteValue" => inner.write_value(&self.path, call),
            "StartNotify" => inner.set_notifying(&self.path, true),
            "StopNotify" => inner.set_notifying(&self.path, false),
            other => Err(BusError::unknown_method(&call.interface, other)),
        }
    }
}

/// A GATT application published on the bus.
pub struct Application {
    inner: Arc<Inner>,
}

impl Application {
    /// Publish an empty application rooted at `path`.
    pub fn new(bus: Arc<dyn IpcBus>, path: &str) -> Result<Self> {
        let inner = Arc::new(Inner {
            bus: bus.clone(),
            path: path.to_string(),
            tree: Mutex::new(Tree::default()),
        });
        let root = bus.register_object(
            path,
            OBJECT_MANAGER_INTERFACE,
            Arc::new(RootObject(Arc::downgrade(&inner))),
        )?;
        inner.tree.lock().registrations.push(root);
        info!("Application published at {}", path);
        Ok(Self { inner })
    }

    pub fn path(&self) -> &str {
        &self.inner.path
    }

    /// Add a service. Returns its object path.
    pub fn add_service(&self, uuid: &str, primary: bool) -> Result<String> {
        let uuid = parse_uuid(uuid)?;
        let path = {
            let tree = self.inner.tree.lock();
            format!("{}/service{:02}", self.inner.path, tree.services.len())
        };

        let object: Arc<dyn ObjectHandler> = Arc::new(ServiceObject {
            app: Arc::downgrade(&self.inner),
            path: path.clone(),
        });
        let ids = self.register(&path, &[GATT_SERVICE_INTERFACE, PROPERTIES_INTERFACE], object)?;

        let mut tree = self.inner.tree.lock();
        tree.registrations.extend(ids);
        tree.services.push(LocalService {
            path: path.clone(),
            uuid,
            primary,
            characteristics: 0,
        });
        debug!("Local service {} at {}", uuid, path);
        Ok(path)
    }

    /// Add a characteristic to the first service with `service_uuid`.
    /// Returns its object path.
    pub fn add_characteristic(
        &self,
        service_uuid: &str,
        uuid: &str,
        flags: CharFlags,
        handler: Option<Arc<dyn LocalCharacteristicHandler>>,
    ) -> Result<String> {
        let service_uuid = parse_uuid(service_uuid)?;
        let uuid = parse_uuid(uuid)?;

        let (service_path, path) = {
            let mut tree = self.inner.tree.lock();
            let service = tree
                .services
                .iter_mut()
                .find(|s| s.uuid == service_uuid)
                .ok_or_else(|| Error::invalid(format!("no local service {}", service_uuid)))?;
            let path = format!("{}/char{:02}", service.path, service.characteristics);
            service.characteristics += 1;
            (service.path.clone(), path)
        };

        let object: Arc<dyn ObjectHandler> = Arc::new(CharacteristicObject {
            app: Arc::downgrade(&self.inner),
            path: path.clone(),
        });
        let ids = self.register(
            &path,
            &[GATT_CHARACTERISTIC_INTERFACE, PROPERTIES_INTERFACE],
            object,
        )?;

        let mut tree = self.inner.tree.lock();
        tree.registrations.extend(ids);
        tree.characteristics.push(LocalCharacteristic {
            path: path.clone(),
            uuid,
            service_path,
            service_uuid,
            flags,
            value: Vec::new(),
            notifying: false,
            handler,
        });
        debug!("Local characteristic {} at {}", uuid, path);
        Ok(path)
    }

    /// Register `object` under each of `interfaces`, all or nothing.
    fn register(
        &self,
        path: &str,
        interfaces: &[&str],
        object: Arc<dyn ObjectHandler>,
    ) -> Result<Vec<RegistrationId>> {
        let mut ids = Vec::with_capacity(interfaces.len());
        for interface in interfaces {
            match self.inner.bus.register_object(path, interface, object.clone()) {
                Ok(id) => ids.push(id),
                Err(e) => {
                    warn!("Failed to publish {} on {}: {}", interface, path, e);
                    for id in ids {
                        self.inner.bus.unregister_object(id);
                    }
                    return Err(e.into());
                }
            }
        }
        Ok(ids)
    }

    /// Object path of a characteristic, if present.
    pub fn characteristic_path(&self, service_uuid: &str, uuid: &str) -> Result<String> {
        let (service_uuid, uuid) = (parse_uuid(service_uuid)?, parse_uuid(uuid)?);
        Ok(self.inner.tree.lock().find(service_uuid, uuid)?.path.clone())
    }

    /// Store a value without notifying subscribers.
    pub fn set_char_value(&self, service_uuid: &str, uuid: &str, value: &[u8]) -> Result<()> {
        let (service_uuid, uuid) = (parse_uuid(service_uuid)?, parse_uuid(uuid)?);
        self.inner.tree.lock().find(service_uuid, uuid)?.value = value.to_vec();
        Ok(())
    }

    pub fn get_char_value(&self, service_uuid: &str, uuid: &str) -> Result<Vec<u8>> {
        let (service_uuid, uuid) = (parse_uuid(service_uuid)?, parse_uuid(uuid)?);
        Ok(self.inner.tree.lock().find(service_uuid, uuid)?.value.clone())
    }

    /// Store a value and push it to the subscribed central.
    ///
    /// Fails with `InvalidArgument` unless notifications were enabled.
    pub fn notify_char_value(&self, service_uuid: &str, uuid: &str, value: &[u8]) -> Result<()> {
        let (service_uuid, uuid) = (parse_uuid(service_uuid)?, parse_uuid(uuid)?);
        let path = {
            let mut tree = self.inner.tree.lock();
            let c = tree.find(service_uuid, uuid)?;
            if !c.notifying {
                return Err(Error::invalid(format!("{} is not notifying", uuid)));
            }
            c.value = value.to_vec();
            c.path.clone()
        };
        self.inner.emit_value(&path, value)?;
        Ok(())
    }

    pub fn is_notifying(&self, service_uuid: &str, uuid: &str) -> Result<bool> {
        let (service_uuid, uuid) = (parse_uuid(service_uuid)?, parse_uuid(uuid)?);
        Ok(self.inner.tree.lock().find(service_uuid, uuid)?.notifying)
    }
}
