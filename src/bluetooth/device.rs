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

//! Remote device.
//!
//! Connection, bonding and service resolution are driven by the daemon's
//! `Connected`, `Paired` and `ServicesResolved` properties. Method calls
//! only start transitions; the property signals complete them.

use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::characteristic::{CharFlags, Characteristic, WriteType};
use super::constants::{
    parse_uuid, DEVICE_INTERFACE, GATT_CHARACTERISTIC_INTERFACE, GATT_SERVICE_INTERFACE,
    OBJECT_MANAGER_INTERFACE, PROPERTIES_CHANGED, PROPERTIES_INTERFACE, ROOT_PATH, RSSI_UNKNOWN,
};
use super::context::{Context, Route, RouteId};
use super::events::Event;
use super::service::Service;
use crate::bus::{parse_managed_objects, MatchRule, PropMap, Value};
use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BondingState {
    #[default]
    None,
    Bonding,
    Bonded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AddressType {
    #[default]
    Public,
    Random,
}

/// Snapshot of everything known about a device.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceInfo {
    pub path: String,
    pub address: String,
    pub address_type: AddressType,
    pub name: Option<String>,
    pub alias: Option<String>,
    /// [`RSSI_UNKNOWN`] until an advertisement was received.
    pub rssi: i16,
    pub tx_power: Option<i16>,
    pub trusted: bool,
    pub paired: bool,
    pub uuids: Vec<Uuid>,
    pub manufacturer_data: HashMap<u16, Vec<u8>>,
    pub service_data: HashMap<Uuid, Vec<u8>>,
    pub connection_state: ConnectionState,
    pub bonding_state: BondingState,
}

impl Default for DeviceInfo {
    fn default() -> Self {
        Self {
            path: String::new(),
            address: String::new(),
            address_type: AddressType::default(),
            name: None,
            alias: None,
            rssi: RSSI_UNKNOWN,
            tx_power: None,
            trusted: false,
            paired: false,
            uuids: Vec::new(),
            manufacturer_data: HashMap::new(),
            service_data: HashMap::new(),
            connection_state: ConnectionState::default(),
            bonding_state: BondingState::default(),
        }
    }
}

/// State-bearing properties found in one batch of changes. The caller
/// applies them in a fixed order after the plain fields are updated.
#[derive(Debug, Default)]
struct Transitions {
    advertisement: bool,
    connected: Option<bool>,
    paired: Option<bool>,
    services_resolved: Option<bool>,
}

impl DeviceInfo {
    /// Update plain fields from `changed`. Last write wins for every
    /// property; maps and lists are replaced, never merged.
    fn apply(&mut self, changed: &PropMap, invalidated: &[String]) -> Transitions {
        let mut transitions = Transitions::default();

        for (name, value) in changed {
            match name.as_str() {
                "Address" => {
                    if let Some(address) = value.as_str() {
                        self.address = address.to_string();
                    }
                }
                "AddressType" => {
                    self.address_type = match value.as_str() {
                        Some("random") => AddressType::Random,
                        _ => AddressType::Public,
                    };
                }
                "Name" => self.name = value.as_str().map(str::to_string),
                "Alias" => self.alias = value.as_str().map(str::to_string),
                "RSSI" => {
                    if let Some(rssi) = value.as_i16() {
                        self.rssi = rssi;
                        transitions.advertisement = true;
                    }
                }
                "TxPower" => self.tx_power = value.as_i16(),
                "Trusted" => self.trusted = value.as_bool().unwrap_or(false),
                "UUIDs" => {
                    self.uuids = value
                        .as_str_array()
                        .unwrap_or_default()
                        .iter()
                        .filter_map(|u| parse_uuid(u).ok())
                        .collect();
                }
                "ManufacturerData" => {
                    self.manufacturer_data = parse_manufacturer_data(value);
                    transitions.advertisement = true;
                }
                "ServiceData" => {
                    self.service_data = parse_service_data(value);
                    transitions.advertisement = true;
                }
                "Paired" => {
                    transitions.paired = value.as_bool();
                }
                "Connected" => transitions.connected = value.as_bool(),
                "ServicesResolved" => transitions.services_resolved = value.as_bool(),
                _ => {}
            }
        }

        for name in invalidated {
            match name.as_str() {
                "RSSI" => self.rssi = RSSI_UNKNOWN,
                "TxPower" => self.tx_power = None,
                "ManufacturerData" => self.manufacturer_data.clear(),
                "ServiceData" => self.service_data.clear(),
                _ => {}
            }
        }

        transitions
    }
}

fn parse_manufacturer_data(value: &Value) -> HashMap<u16, Vec<u8>> {
    let Some(entries) = value.as_dict() else {
        warn!("ManufacturerData is a {}", value.kind());
        return HashMap::new();
    };
    entries
        .iter()
        .filter_map(|(id, data)| Some((id.as_u16()?, data.as_bytes()?)))
        .collect()
}

fn parse_service_data(value: &Value) -> HashMap<Uuid, Vec<u8>> {
    let Some(entries) = value.as_dict() else {
        warn!("ServiceData is a {}", value.kind());
        return HashMap::new();
    };
    entries
        .iter()
        .filter_map(|(uuid, data)| Some((parse_uuid(uuid.as_str()?).ok()?, data.as_bytes()?)))
        .collect()
}

pub struct Device {
    ctx: Arc<Context>,
    adapter: String,
    info: DeviceInfo,
    services_resolved: bool,
    central: bool,
    /// Own subscription and the last signal sequence queued before it.
    route: Option<(RouteId, u64)>,
    services: HashMap<String, Service>,
    characteristics: HashMap<String, Characteristic>,
}

impl Device {
    /// Build a device from its `Device1` property snapshot.
    pub(crate) fn new(ctx: Arc<Context>, adapter: &str, path: &str, props: &PropMap) -> Self {
        let mut info = DeviceInfo {
            path: path.to_string(),
            ..Default::default()
        };
        let transitions = info.apply(props, &[]);
        if transitions.connected == Some(true) {
            info.connection_state = ConnectionState::Connected;
        }
        if transitions.paired == Some(true) {
            info.paired = true;
            info.bonding_state = BondingState::Bonded;
        }

        Self {
            ctx,
            adapter: adapter.to_string(),
            info,
            services_resolved: transitions.services_resolved.unwrap_or(false),
            central: false,
            route: None,
            services: HashMap::new(),
            characteristics: HashMap::new(),
        }
    }

    pub fn path(&self) -> &str {
        &self.info.path
    }

    /// Object path of the owning adapter.
    pub fn adapter(&self) -> &str {
        &self.adapter
    }

    pub fn info(&self) -> &DeviceInfo {
        &self.info
    }

    pub fn address(&self) -> &str {
        &self.info.address
    }

    pub fn address_type(&self) -> AddressType {
        self.info.address_type
    }

    pub fn name(&self) -> Option<&str> {
        self.info.name.as_deref()
    }

    pub fn alias(&self) -> Option<&str> {
        self.info.alias.as_deref()
    }

    pub fn rssi(&self) -> i16 {
        self.info.rssi
    }

    pub fn tx_power(&self) -> Option<i16> {
        self.info.tx_power
    }

    pub fn is_trusted(&self) -> bool {
        self.info.trusted
    }

    pub fn is_paired(&self) -> bool {
        self.info.paired
    }

    pub fn uuids(&self) -> &[Uuid] {
        &self.info.uuids
    }

    pub fn manufacturer_data(&self) -> &HashMap<u16, Vec<u8>> {
        &self.info.manufacturer_data
    }

    pub fn service_data(&self) -> &HashMap<Uuid, Vec<u8>> {
        &self.info.service_data
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.info.connection_state
    }

    pub fn bonding_state(&self) -> BondingState {
        self.info.bonding_state
    }

    pub fn services_resolved(&self) -> bool {
        self.services_resolved
    }

    /// Whether this device was inferred to be a central connected to us.
    pub fn is_central(&self) -> bool {
        self.central
    }

    pub fn services(&self) -> impl Iterator<Item = &Service> {
        self.services.values()
    }

    pub fn characteristics(&self) -> impl Iterator<Item = &Characteristic> {
        self.characteristics.values()
    }

    pub(crate) fn has_own_subscription(&self) -> bool {
        self.route.is_some()
    }

    /// Whether a signal queued as `seq` also reached the own subscription.
    pub(crate) fn covers(&self, seq: u64) -> bool {
        matches!(self.route, Some((_, since)) if seq > since)
    }

    /// Find a characteristic by service and characteristic UUID.
    ///
    /// Characteristic UUIDs are only unique within a service, hence both.
    pub fn characteristic(&self, service: Uuid, uuid: Uuid) -> Option<&Characteristic> {
        self.characteristics
            .values()
            .find(|c| c.service_uuid() == service && c.uuid() == uuid)
    }

    pub fn characteristic_mut(&mut self, service: Uuid, uuid: Uuid) -> Option<&mut Characteristic> {
        self.characteristics
            .values_mut()
            .find(|c| c.service_uuid() == service && c.uuid() == uuid)
    }

    pub fn characteristic_by_path(&self, path: &str) -> Option<&Characteristic> {
        self.characteristics.get(path)
    }

    pub(crate) fn characteristic_by_path_mut(&mut self, path: &str) -> Option<&mut Characteristic> {
        self.characteristics.get_mut(path)
    }

    fn lookup(&self, service: Uuid, uuid: Uuid) -> Result<&Characteristic> {
        self.characteristic(service, uuid).ok_or_else(|| {
            Error::invalid(format!(
                "{} has no characteristic {} in service {}",
                self.info.path, uuid, service
            ))
        })
    }

    fn lookup_mut(&mut self, service: Uuid, uuid: Uuid) -> Result<&mut Characteristic> {
        let path = self.info.path.clone();
        self.characteristic_mut(service, uuid).ok_or_else(|| {
            Error::invalid(format!(
                "{} has no characteristic {} in service {}",
                path, uuid, service
            ))
        })
    }

    pub async fn read_char(&self, service: Uuid, uuid: Uuid) -> Result<Vec<u8>> {
        self.lookup(service, uuid)?.read().await
    }

    pub async fn write_char(
        &self,
        service: Uuid,
        uuid: Uuid,
        value: &[u8],
        write_type: WriteType,
    ) -> Result<()> {
        self.lookup(service, uuid)?.write(value, write_type).await
    }

    pub async fn start_notify(&mut self, service: Uuid, uuid: Uuid) -> Result<()> {
        self.lookup_mut(service, uuid)?.start_notify().await
    }

    pub async fn stop_notify(&mut self, service: Uuid, uuid: Uuid) -> Result<()> {
        self.lookup_mut(service, uuid)?.stop_notify().await
    }

    /// Connect to the device.
    ///
    /// Does nothing unless disconnected. Completion is reported by the
    /// `Connected` property; a failed call rolls back to DISCONNECTED when
    /// `rollback_on_failure` is set.
    pub async fn connect(&mut self) -> Result<()> {
        if self.info.connection_state != ConnectionState::Disconnected {
            debug!(
                "Connect on {} ignored in state {:?}",
                self.info.address, self.info.connection_state
            );
            return Ok(());
        }

        info!("Connecting to {}", self.info.address);
        self.set_connection_state(ConnectionState::Connecting, None);

        let result = match self.ensure_subscription() {
            Ok(()) => self
                .ctx
                .call(&self.info.path, DEVICE_INTERFACE, "Connect", vec![])
                .await
                .map(|_| ()),
            Err(e) => Err(e),
        };

        if let Err(e) = &result {
            error!("Connect to {} failed: {}", self.info.address, e);
            if self.ctx.config().rollback_on_failure
                && self.info.connection_state == ConnectionState::Connecting
            {
                self.set_connection_state(ConnectionState::Disconnected, Some(e.clone()));
            }
        }
        result
    }

    /// Disconnect from the device.
    pub async fn disconnect(&mut self) -> Result<()> {
        let previous = self.info.connection_state;
        if !matches!(
            previous,
            ConnectionState::Connected | ConnectionState::Connecting
        ) {
            debug!(
                "Disconnect on {} ignored in state {:?}",
                self.info.address, previous
            );
            return Ok(());
        }

        info!("Disconnecting from {}", self.info.address);
        self.set_connection_state(ConnectionState::Disconnecting, None);

        let result = self
            .ctx
            .call(&self.info.path, DEVICE_INTERFACE, "Disconnect", vec![])
            .await
            .map(|_| ());

        if let Err(e) = &result {
            error!("Disconnect from {} failed: {}", self.info.address, e);
            if self.ctx.config().rollback_on_failure
                && self.info.connection_state == ConnectionState::Disconnecting
            {
                self.set_connection_state(previous, Some(e.clone()));
            }
        }
        result
    }

    /// Pair with the device. Does nothing unless unbonded.
    pub async fn pair(&mut self) -> Result<()> {
        if self.info.bonding_state != BondingState::None {
            debug!(
                "Pair with {} ignored in state {:?}",
                self.info.address, self.info.bonding_state
            );
            return Ok(());
        }

        info!("Pairing with {}", self.info.address);
        self.set_bonding_state(BondingState::Bonding, None);

        let result = match self.ensure_subscription() {
            Ok(()) => self
                .ctx
                .call(&self.info.path, DEVICE_INTERFACE, "Pair", vec![])
                .await
                .map(|_| ()),
            Err(e) => Err(e),
        };

        if let Err(e) = &result {
            error!("Pairing with {} failed: {}", self.info.address, e);
            if self.ctx.config().rollback_on_failure
                && self.info.bonding_state == BondingState::Bonding
            {
                self.set_bonding_state(BondingState::None, Some(e.clone()));
            }
        }
        result
    }

    /// Mark the device as trusted (or not) by the daemon.
    pub async fn set_trusted(&self, trusted: bool) -> Result<()> {
        self.ctx
            .set_property(&self.info.path, DEVICE_INTERFACE, "Trusted", Value::Bool(trusted))
            .await
    }

    /// Subscribe to this device's own property changes.
    fn ensure_subscription(&mut self) -> Result<()> {
        if self.route.is_some() {
            return Ok(());
        }
        let rule = MatchRule::new(PROPERTIES_INTERFACE, PROPERTIES_CHANGED)
            .path(&self.info.path)
            .arg0(DEVICE_INTERFACE);
        let route = self.ctx.subscribe(
            rule,
            Route::DeviceOwnProperties {
                device: self.info.path.clone(),
            },
        )?;
        // Signals queued up to now only went through the adapter's route.
        self.route = Some((route, self.ctx.last_seq()));
        Ok(())
    }

    /// The pairing agent saw a request for this device.
    pub(crate) fn bonding_started(&mut self) {
        if self.info.bonding_state == BondingState::None {
            self.set_bonding_state(BondingState::Bonding, None);
        }
    }

    /// The agent declined the request or the daemon cancelled it.
    pub(crate) async fn bonding_failed(&mut self, error: Error) {
        if self.info.bonding_state != BondingState::Bonding {
            return;
        }
        warn!("Pairing with {} failed: {}", self.info.address, error);
        self.set_bonding_state(BondingState::None, Some(error));
        self.collect_if_pending().await;
    }

    /// Resolved services whose tree was never collected, e.g. because
    /// bonding was in progress or the device was already connected when
    /// the adapter was enumerated.
    pub(crate) fn collection_pending(&self) -> bool {
        self.services_resolved
            && self.info.connection_state == ConnectionState::Connected
            && self.info.bonding_state != BondingState::Bonding
            && self.characteristics.is_empty()
    }

    pub(crate) async fn collect_if_pending(&mut self) {
        if self.collection_pending() {
            self.collect_or_log().await;
        }
    }

    /// Apply a batch of property changes.
    ///
    /// Returns whether advertisement data changed, in which case the
    /// adapter re-evaluates the device as a discovery result.
    pub(crate) async fn handle_properties(
        &mut self,
        changed: &PropMap,
        invalidated: &[String],
    ) -> bool {
        let transitions = self.info.apply(changed, invalidated);

        if let Some(connected) = transitions.connected {
            self.on_connected(connected);
        }
        if let Some(paired) = transitions.paired {
            self.on_paired(paired).await;
        }
        if let Some(resolved) = transitions.services_resolved {
            self.on_services_resolved(resolved).await;
        }

        transitions.advertisement
    }

    fn on_connected(&mut self, connected: bool) {
        let previous = self.info.connection_state;
        let state = if connected {
            ConnectionState::Connected
        } else {
            ConnectionState::Disconnected
        };
        if state == previous {
            return;
        }

        // Connected without a local connect and never seen advertising:
        // most likely a central that connected to our advertisement
        // rather than a device we scanned for.
        if connected
            && previous == ConnectionState::Disconnected
            && self.info.rssi == RSSI_UNKNOWN
            && self.info.uuids.is_empty()
        {
            self.central = true;
        }

        self.set_connection_state(state, None);
        if self.central {
            info!(
                "Central {} {}",
                self.info.address,
                if connected { "connected" } else { "disconnected" }
            );
            self.ctx
                .emit(Event::CentralConnectionStateChanged(self.info.clone()));
        }

        if !connected {
            self.central = false;
            self.clear_gatt_tree();
            if self.info.bonding_state == BondingState::Bonding {
                info!("{} disconnected while bonding", self.info.address);
                self.set_bonding_state(BondingState::None, None);
            }
        }
    }

    async fn on_paired(&mut self, paired: bool) {
        self.info.paired = paired;
        let state = if paired {
            BondingState::Bonded
        } else {
            BondingState::None
        };
        if state == self.info.bonding_state {
            return;
        }
        self.set_bonding_state(state, None);

        // Service collection was held back while bonding.
        if paired && self.services_resolved && self.characteristics.is_empty() {
            self.collect_or_log().await;
        }
    }

    async fn on_services_resolved(&mut self, resolved: bool) {
        self.services_resolved = resolved;
        if !resolved {
            self.clear_gatt_tree();
            return;
        }
        if self.info.bonding_state == BondingState::Bonding {
            info!(
                "Services of {} resolved while bonding, deferring collection",
                self.info.address
            );
            return;
        }
        self.collect_or_log().await;
    }

    async fn collect_or_log(&mut self) {
        if let Err(e) = self.collect_gatt_tree().await {
            error!("Failed to collect GATT tree of {}: {}", self.info.address, e);
        }
    }

    /// Fetch the service and characteristic objects below this device and
    /// rebuild both maps from them.
    pub async fn collect_gatt_tree(&mut self) -> Result<()> {
        if !self.services_resolved {
            return Err(Error::invalid(format!(
                "services of {} are not resolved",
                self.info.path
            )));
        }

        let reply = self
            .ctx
            .call(ROOT_PATH, OBJECT_MANAGER_INTERFACE, "GetManagedObjects", vec![])
            .await?;
        let objects = parse_managed_objects(
            reply
                .first()
                .ok_or_else(|| Error::malformed("empty GetManagedObjects reply"))?,
        )?;

        let prefix = format!("{}/", self.info.path);
        // Characteristics still present keep their notification state.
        let mut previous = std::mem::take(&mut self.characteristics);
        self.services.clear();

        for (path, interfaces) in objects.range(prefix.clone()..) {
            if !path.starts_with(&prefix) {
                break;
            }
            let Some(props) = interfaces.get(GATT_SERVICE_INTERFACE) else {
                continue;
            };
            let Some(uuid) = uuid_property(props) else {
                warn!("Service {} has no usable UUID", path);
                continue;
            };
            let primary = props.get("Primary").and_then(Value::as_bool).unwrap_or(true);
            self.services.insert(
                path.clone(),
                Service::new(path.clone(), uuid, primary, self.info.path.clone()),
            );
        }

        for (path, interfaces) in objects.range(prefix.clone()..) {
            if !path.starts_with(&prefix) {
                break;
            }
            let Some(props) = interfaces.get(GATT_CHARACTERISTIC_INTERFACE) else {
                continue;
            };
            let Some(uuid) = uuid_property(props) else {
                warn!("Characteristic {} has no usable UUID", path);
                continue;
            };
            let Some(service) = self.services.values_mut().find(|s| s.contains(path)) else {
                warn!("Characteristic {} has no parent service", path);
                continue;
            };
            let flags = props
                .get("Flags")
                .and_then(Value::as_str_array)
                .map(|names| CharFlags::from_names(names.as_slice()))
                .unwrap_or_default();

            service.add_characteristic(path.clone());
            let characteristic = match previous.remove(path) {
                Some(existing) => existing,
                None => Characteristic::new(
                    self.ctx.clone(),
                    path.clone(),
                    uuid,
                    service.path().to_string(),
                    service.uuid(),
                    self.info.path.clone(),
                    flags,
                ),
            };
            self.characteristics.insert(path.clone(), characteristic);
        }
        for stale in previous.values_mut() {
            stale.release();
        }

        info!(
            "Collected {} services and {} characteristics on {}",
            self.services.len(),
            self.characteristics.len(),
            self.info.address
        );
        self.ctx.emit(Event::ServicesResolved {
            device: self.info.path.clone(),
        });
        Ok(())
    }

    fn clear_gatt_tree(&mut self) {
        for characteristic in self.characteristics.values_mut() {
            characteristic.release();
        }
        self.characteristics.clear();
        self.services.clear();
    }

    fn set_connection_state(&mut self, state: ConnectionState, error: Option<Error>) {
        if state == self.info.connection_state && error.is_none() {
            return;
        }
        debug!(
            "{}: {:?} -> {:?}",
            self.info.address, self.info.connection_state, state
        );
        self.info.connection_state = state;
        self.ctx.emit(Event::ConnectionStateChanged {
            device: self.info.path.clone(),
            state,
            error,
        });
    }

    fn set_bonding_state(&mut self, state: BondingState, error: Option<Error>) {
        let old_state = self.info.bonding_state;
        if state == old_state && error.is_none() {
            return;
        }
        debug!("{}: {:?} -> {:?}", self.info.address, old_state, state);
        self.info.bonding_state = state;
        self.ctx.emit(Event::BondingStateChanged {
            device: self.info.path.clone(),
            new_state: state,
            old_state,
            error,
        });
    }
}

fn uuid_property(props: &PropMap) -> Option<Uuid> {
    props
        .get("UUID")
        .and_then(Value::as_str)
        .and_then(|u| parse_uuid(u).ok())
}

impl Drop for Device {
    fn drop(&mut self) {
        // Characteristics first, then our own subscription.
        self.characteristics.clear();
        if let Some((route, _)) = self.route.take() {
            self.ctx.unsubscribe(route);
        }
    }
}

impl std::fmt::Debug for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Device")
            .field("info", &self.info)
            .field("services_resolved", &self.services_resolved)
            .field("services", &self.services.len())
            .field("characteristics", &self.characteristics.len())
            .finish()
    }
}
