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

//! A scripted BlueZ daemon living on a [`MemoryBus`].

#![allow(dead_code)]

use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Weak};
use tokio::sync::mpsc;

use ble_gatt_host::bluetooth::constants::{
    ADAPTER_INTERFACE, ADVERTISING_MANAGER_INTERFACE, AGENT_MANAGER_INTERFACE, BLUEZ_PATH,
    BLUEZ_SERVICE, DEVICE_INTERFACE, GATT_CHARACTERISTIC_INTERFACE, GATT_MANAGER_INTERFACE,
    GATT_SERVICE_INTERFACE, INTERFACES_ADDED, INTERFACES_REMOVED, OBJECT_MANAGER_INTERFACE,
    PROPERTIES_CHANGED, PROPERTIES_INTERFACE, ROOT_PATH,
};
use ble_gatt_host::bluetooth::{Adapter, Event};
use ble_gatt_host::bus::{
    encode_managed_objects, BusError, IpcBus, ManagedObjects, MemoryBus, MethodCall,
    ObjectHandler, PropMap, PropertiesChanged, RegistrationId, Signal, Value,
};
use ble_gatt_host::config::BluetoothConfig;

pub const ADAPTER: &str = "/org/bluez/hci0";
pub const ADAPTER_ADDRESS: &str = "00:1A:7D:DA:71:13";

pub const BATTERY_SERVICE: &str = "0000180f-0000-1000-8000-00805f9b34fb";
pub const BATTERY_LEVEL: &str = "00002a19-0000-1000-8000-00805f9b34fb";

pub fn device_path(address: &str) -> String {
    format!("{}/dev_{}", ADAPTER, address.replace(':', "_"))
}

/// Properties of a device seen advertising at `rssi`.
pub fn advertising(address: &str, rssi: i16) -> PropMap {
    let mut props = PropMap::new();
    props.insert("Address".into(), Value::from(address));
    props.insert("AddressType".into(), Value::from("public"));
    props.insert("RSSI".into(), Value::Int16(rssi));
    props
}

pub fn props<const N: usize>(entries: [(&str, Value); N]) -> PropMap {
    entries
        .into_iter()
        .map(|(name, value)| (name.to_string(), value))
        .collect()
}

pub fn config() -> BluetoothConfig {
    BluetoothConfig {
        call_timeout_ms: 200,
        ..Default::default()
    }
}

#[derive(Default)]
struct State {
    objects: ManagedObjects,
    registrations: HashMap<String, Vec<RegistrationId>>,
    failures: HashMap<String, BusError>,
    silent: HashSet<String>,
}

struct Daemon {
    bus: Weak<MemoryBus>,
    state: Mutex<State>,
}

impl Daemon {
    fn handle(&self, call: &MethodCall) -> Result<Vec<Value>, BusError> {
        if let Some(err) = self.state.lock().failures.get(&call.member).cloned() {
            return Err(err);
        }
        if self.state.lock().silent.contains(&call.member) {
            return Ok(vec![]);
        }

        let path = call.path.as_str();
        match (call.interface.as_str(), call.member.as_str()) {
            (OBJECT_MANAGER_INTERFACE, "GetManagedObjects") => {
                let objects = self.state.lock().objects.clone();
                Ok(vec![encode_managed_objects(objects)])
            }
            (PROPERTIES_INTERFACE, "GetAll") => {
                let interface = str_arg(call, 0)?;
                let props = self
                    .properties(path, interface)
                    .ok_or_else(|| BusError::unknown_object(path))?;
                Ok(vec![Value::from(props)])
            }
            (PROPERTIES_INTERFACE, "Set") => {
                let interface = str_arg(call, 0)?;
                let name = str_arg(call, 1)?;
                let value = call
                    .args
                    .get(2)
                    .cloned()
                    .ok_or_else(|| BusError::invalid_args("Set expects a value"))?;
                self.update(path, interface, [(name, value)]);
                Ok(vec![])
            }
            (ADAPTER_INTERFACE, "StartDiscovery") => {
                self.update(path, ADAPTER_INTERFACE, [("Discovering", Value::Bool(true))]);
                Ok(vec![])
            }
            (ADAPTER_INTERFACE, "StopDiscovery") => {
                self.update(path, ADAPTER_INTERFACE, [("Discovering", Value::Bool(false))]);
                Ok(vec![])
            }
            (ADAPTER_INTERFACE, "SetDiscoveryFilter") => Ok(vec![]),
            (ADAPTER_INTERFACE, "RemoveDevice") => {
                let device = str_arg(call, 0)?.to_string();
                if self.properties(&device, DEVICE_INTERFACE).is_none() {
                    return Err(BusError::new(
                        "org.bluez.Error.DoesNotExist",
                        "Does Not Exist",
                    ));
                }
                self.remove(&device);
                Ok(vec![])
            }
            (DEVICE_INTERFACE, "Connect") => {
                self.update(path, DEVICE_INTERFACE, [("Connected", Value::Bool(true))]);
                if self.has_children(path) {
                    self.update(
                        path,
                        DEVICE_INTERFACE,
                        [("ServicesResolved", Value::Bool(true))],
                    );
                }
                Ok(vec![])
            }
            (DEVICE_INTERFACE, "Disconnect") => {
                self.update(
                    path,
                    DEVICE_INTERFACE,
                    [
                        ("Connected", Value::Bool(false)),
                        ("ServicesResolved", Value::Bool(false)),
                    ],
                );
                Ok(vec![])
            }
            (DEVICE_INTERFACE, "Pair") => {
                self.update(path, DEVICE_INTERFACE, [("Paired", Value::Bool(true))]);
                Ok(vec![])
            }
            (GATT_CHARACTERISTIC_INTERFACE, "ReadValue") => {
                let value = self
                    .properties(path, GATT_CHARACTERISTIC_INTERFACE)
                    .and_then(|p| p.get("Value").cloned())
                    .unwrap_or(Value::Bytes(vec![]));
                Ok(vec![value])
            }
            (GATT_CHARACTERISTIC_INTERFACE, "WriteValue") => {
                let value = call
                    .args
                    .first()
                    .and_then(Value::as_bytes)
                    .ok_or_else(|| BusError::invalid_args("WriteValue expects bytes"))?;
                let mut state = self.state.lock();
                if let Some(props) = state
                    .objects
                    .get_mut(path)
                    .and_then(|i| i.get_mut(GATT_CHARACTERISTIC_INTERFACE))
                {
                    props.insert("Value".into(), Value::Bytes(value));
                }
                Ok(vec![])
            }
            (GATT_CHARACTERISTIC_INTERFACE, "StartNotify") => {
                self.update(
                    path,
                    GATT_CHARACTERISTIC_INTERFACE,
                    [("Notifying", Value::Bool(true))],
                );
                Ok(vec![])
            }
            (GATT_CHARACTERISTIC_INTERFACE, "StopNotify") => {
                self.update(
                    path,
                    GATT_CHARACTERISTIC_INTERFACE,
                    [("Notifying", Value::Bool(false))],
                );
                Ok(vec![])
            }
            (ADVERTISING_MANAGER_INTERFACE, "RegisterAdvertisement")
            | (ADVERTISING_MANAGER_INTERFACE, "UnregisterAdvertisement")
            | (GATT_MANAGER_INTERFACE, "RegisterApplication")
            | (GATT_MANAGER_INTERFACE, "UnregisterApplication")
            | (AGENT_MANAGER_INTERFACE, "RegisterAgent")
            | (AGENT_MANAGER_INTERFACE, "RequestDefaultAgent")
            | (AGENT_MANAGER_INTERFACE, "UnregisterAgent") => Ok(vec![]),
            (interface, member) => Err(BusError::unknown_method(interface, member)),
        }
    }

    fn properties(&self, path: &str, interface: &str) -> Option<PropMap> {
        self.state
            .lock()
            .objects
            .get(path)
            .and_then(|interfaces| interfaces.get(interface))
            .cloned()
    }

    fn has_children(&self, path: &str) -> bool {
        let prefix = format!("{}/", path);
        self.state
            .lock()
            .objects
            .keys()
            .any(|p| p.starts_with(&prefix))
    }

    /// Store the changes and announce them with `PropertiesChanged`.
    fn update<'a, I>(&self, path: &str, interface: &str, changes: I)
    where
        I: IntoIterator<Item = (&'a str, Value)>,
    {
        let changed: PropMap = changes
            .into_iter()
            .map(|(name, value)| (name.to_string(), value))
            .collect();
        {
            let mut state = self.state.lock();
            if let Some(props) = state
                .objects
                .get_mut(path)
                .and_then(|i| i.get_mut(interface))
            {
                props.extend(changed.clone());
            }
        }
        self.signal(
            path,
            PROPERTIES_INTERFACE,
            PROPERTIES_CHANGED,
            PropertiesChanged {
                interface: interface.to_string(),
                changed,
                invalidated: vec![],
            }
            .to_args(),
        );
    }

    /// Drop `path` and everything below it, then announce the removal.
    fn remove(&self, path: &str) {
        let prefix = format!("{}/", path);
        let registrations: Vec<RegistrationId> = {
            let mut state = self.state.lock();
            state
                .objects
                .retain(|p, _| p != path && !p.starts_with(&prefix));
            let gone: Vec<String> = state
                .registrations
                .keys()
                .filter(|p| *p == path || p.starts_with(&prefix))
                .cloned()
                .collect();
            gone.iter()
                .filter_map(|p| state.registrations.remove(p))
                .flatten()
                .collect()
        };
        if let Some(bus) = self.bus.upgrade() {
            for id in registrations {
                bus.unregister_object(id);
            }
        }
        self.signal(
            ROOT_PATH,
            OBJECT_MANAGER_INTERFACE,
            INTERFACES_REMOVED,
            vec![
                Value::object_path(path),
                Value::str_array([DEVICE_INTERFACE, PROPERTIES_INTERFACE]),
            ],
        );
    }

    fn signal(&self, path: &str, interface: &str, member: &str, args: Vec<Value>) {
        if let Some(bus) = self.bus.upgrade() {
            bus.inject_signal(Signal {
                sender: Some(BLUEZ_SERVICE.to_string()),
                path: path.to_string(),
                interface: interface.to_string(),
                member: member.to_string(),
                args,
            });
        }
    }
}

fn str_arg(call: &MethodCall, index: usize) -> Result<&str, BusError> {
    call.args
        .get(index)
        .and_then(Value::as_str)
        .ok_or_else(|| BusError::invalid_args(format!("{} expects a string", call.member)))
}

/// The simulated daemon, with one powered-off adapter `hci0`.
pub struct FakeBluez {
    pub bus: Arc<MemoryBus>,
    daemon: Arc<Daemon>,
}

impl FakeBluez {
    pub fn new() -> Self {
        let bus = Arc::new(MemoryBus::new());
        let daemon = Arc::new(Daemon {
            bus: Arc::downgrade(&bus),
            state: Mutex::new(State::default()),
        });
        let fake = Self { bus, daemon };

        fake.publish(ROOT_PATH, &[OBJECT_MANAGER_INTERFACE]);
        fake.publish(BLUEZ_PATH, &[AGENT_MANAGER_INTERFACE]);
        fake.insert(
            ADAPTER,
            ADAPTER_INTERFACE,
            props([
                ("Address", Value::from(ADAPTER_ADDRESS)),
                ("Alias", Value::from("host")),
                ("Powered", Value::Bool(false)),
                ("Discoverable", Value::Bool(false)),
                ("Discovering", Value::Bool(false)),
            ]),
        );
        fake.publish(
            ADAPTER,
            &[
                ADAPTER_INTERFACE,
                PROPERTIES_INTERFACE,
                ADVERTISING_MANAGER_INTERFACE,
                GATT_MANAGER_INTERFACE,
            ],
        );
        fake
    }

    /// The default adapter, built on this daemon.
    pub async fn adapter(&self) -> Adapter {
        Adapter::get_default(self.bus.clone(), &config())
            .await
            .unwrap()
            .expect("fake daemon has an adapter")
    }

    fn publish(&self, path: &str, interfaces: &[&str]) {
        let daemon = self.daemon.clone();
        let object: Arc<dyn ObjectHandler> =
            Arc::new(move |call: &MethodCall| daemon.handle(call));
        let ids: Vec<RegistrationId> = interfaces
            .iter()
            .map(|interface| {
                self.bus
                    .register_object(path, interface, object.clone())
                    .unwrap()
            })
            .collect();
        self.daemon
            .state
            .lock()
            .registrations
            .entry(path.to_string())
            .or_default()
            .extend(ids);
    }

    fn insert(&self, path: &str, interface: &str, props: PropMap) {
        self.daemon
            .state
            .lock()
            .objects
            .entry(path.to_string())
            .or_default()
            .insert(interface.to_string(), props);
    }

    /// Make the daemon know a device without telling anyone.
    pub fn add_device(&self, address: &str, mut props: PropMap) -> String {
        let path = device_path(address);
        props.insert("Address".into(), Value::from(address));
        props
            .entry("Adapter".into())
            .or_insert_with(|| Value::object_path(ADAPTER));
        self.insert(&path, DEVICE_INTERFACE, props);
        self.publish(&path, &[DEVICE_INTERFACE, PROPERTIES_INTERFACE]);
        path
    }

    /// Add a device and announce it with `InterfacesAdded`.
    pub fn announce_device(&self, address: &str, props: PropMap) -> String {
        let path = self.add_device(address, props);
        let props = self
            .daemon
            .properties(&path, DEVICE_INTERFACE)
            .unwrap_or_default();
        self.daemon.signal(
            ROOT_PATH,
            OBJECT_MANAGER_INTERFACE,
            INTERFACES_ADDED,
            vec![
                Value::object_path(path.as_str()),
                Value::Dict(vec![(Value::from(DEVICE_INTERFACE), Value::from(props))]),
            ],
        );
        path
    }

    pub fn add_service(&self, device: &str, index: u16, uuid: &str) -> String {
        let path = format!("{}/service{:04x}", device, index);
        self.insert(
            &path,
            GATT_SERVICE_INTERFACE,
            props([
                ("UUID", Value::from(uuid)),
                ("Primary", Value::Bool(true)),
                ("Device", Value::object_path(device)),
            ]),
        );
        path
    }

    pub fn add_characteristic(
        &self,
        service: &str,
        index: u16,
        uuid: &str,
        flags: &[&str],
        value: &[u8],
    ) -> String {
        let path = format!("{}/char{:04x}", service, index);
        self.insert(
            &path,
            GATT_CHARACTERISTIC_INTERFACE,
            props([
                ("UUID", Value::from(uuid)),
                ("Service", Value::object_path(service)),
                ("Flags", Value::str_array(flags.iter().copied())),
                ("Notifying", Value::Bool(false)),
                ("Value", Value::Bytes(value.to_vec())),
            ]),
        );
        self.publish(&path, &[GATT_CHARACTERISTIC_INTERFACE, PROPERTIES_INTERFACE]);
        path
    }

    /// A device with one battery service holding a readable, writable,
    /// notifying battery level. Returns the device and characteristic
    /// paths.
    pub fn add_battery_device(&self, address: &str, rssi: i16) -> (String, String) {
        let device = self.add_device(address, advertising(address, rssi));
        let service = self.add_service(&device, 0x0010, BATTERY_SERVICE);
        let characteristic = self.add_characteristic(
            &service,
            0x0011,
            BATTERY_LEVEL,
            &["read", "write", "notify"],
            &[87],
        );
        (device, characteristic)
    }

    /// Change properties as the daemon would, with the matching signal.
    pub fn set_properties(&self, path: &str, interface: &str, changed: PropMap) {
        self.daemon.update(
            path,
            interface,
            changed.iter().map(|(k, v)| (k.as_str(), v.clone())),
        );
    }

    pub fn set_property(&self, path: &str, interface: &str, name: &str, value: Value) {
        self.daemon.update(path, interface, [(name, value)]);
    }

    pub fn property(&self, path: &str, interface: &str, name: &str) -> Option<Value> {
        self.daemon
            .properties(path, interface)
            .and_then(|p| p.get(name).cloned())
    }

    /// Forget a device and announce `InterfacesRemoved`.
    pub fn remove_device(&self, path: &str) {
        self.daemon.remove(path);
    }

    /// Emit a raw signal from the daemon.
    pub fn signal(&self, path: &str, interface: &str, member: &str, args: Vec<Value>) {
        self.daemon.signal(path, interface, member, args);
    }

    /// Fail every call to `member` with `name`.
    pub fn fail(&self, member: &str, name: &str) {
        self.daemon
            .state
            .lock()
            .failures
            .insert(member.to_string(), BusError::new(name, "Operation failed"));
    }

    pub fn recover(&self, member: &str) {
        self.daemon.state.lock().failures.remove(member);
    }

    /// Accept calls to `member` without acting on them.
    pub fn silence(&self, member: &str) {
        self.daemon.state.lock().silent.insert(member.to_string());
    }
}

/// Every event received so far.
pub fn drain(events: &mut mpsc::UnboundedReceiver<Event>) -> Vec<Event> {
    let mut received = Vec::new();
    while let Ok(event) = events.try_recv() {
        received.push(event);
    }
    received
}
