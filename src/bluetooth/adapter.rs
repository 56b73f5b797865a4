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

//! Local Bluetooth adapter.
//!
//! The adapter owns the device cache and every subscription of its object
//! graph. Bus signals are queued and applied one at a time by
//! [`Adapter::dispatch_next`] / [`Adapter::dispatch_pending`], so they never
//! interleave with an operation in progress on the same adapter.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

use super::constants::{
    ADAPTER_INTERFACE, ADVERTISING_MANAGER_INTERFACE, AGENT_MANAGER_INTERFACE, BLUEZ_PATH,
    BLUEZ_SERVICE, DEVICE_INTERFACE, GATT_MANAGER_INTERFACE, INTERFACES_ADDED,
    INTERFACES_REMOVED, OBJECT_MANAGER_INTERFACE, PROPERTIES_CHANGED, PROPERTIES_INTERFACE,
    ROOT_PATH,
};
use super::context::{call_with_timeout, Context, Inbound, Route, RouteId};
use super::device::{ConnectionState, Device};
use super::events::Event;
use super::filter::DiscoveryFilter;
use crate::bus::{
    parse_interfaces, parse_managed_objects, IpcBus, MatchRule, MethodCall, PropMap,
    PropertiesChanged, Signal, Value,
};
use crate::config::BluetoothConfig;
use crate::error::{Error, Result};
use crate::peripheral::{
    Advertisement, AdvertisementHandle, Agent, AgentHandler, Application, IoCapability,
    PairingProgress,
};

/// Discovery state machine.
///
/// ```text
/// STOPPED --start--> STARTING --ok--> STARTED --stop--> STOPPING --ok--> STOPPED
/// STARTING --failed--> STOPPED
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DiscoveryState {
    #[default]
    Stopped,
    Starting,
    Started,
    Stopping,
}

pub struct Adapter {
    ctx: Arc<Context>,
    inbound: mpsc::UnboundedReceiver<Inbound>,
    path: String,
    name: String,
    address: String,
    alias: Option<String>,
    powered: bool,
    discoverable: bool,
    discovery_state: DiscoveryState,
    discovery_filter: DiscoveryFilter,
    devices: HashMap<String, Device>,
    routes: Vec<RouteId>,
    advertisement: Option<AdvertisementHandle>,
    agent: Option<Agent>,
}

impl Adapter {
    /// Enumerate every adapter on the bus, each with the devices the
    /// daemon already knows about.
    pub async fn find_all(bus: Arc<dyn IpcBus>, config: &BluetoothConfig) -> Result<Vec<Adapter>> {
        let call = MethodCall::new(
            BLUEZ_SERVICE,
            ROOT_PATH,
            OBJECT_MANAGER_INTERFACE,
            "GetManagedObjects",
            vec![],
        );
        let reply = call_with_timeout(bus.as_ref(), config.call_timeout(), call).await?;
        let objects = parse_managed_objects(
            reply
                .first()
                .ok_or_else(|| Error::malformed("empty GetManagedObjects reply"))?,
        )?;

        let mut adapters = Vec::new();
        for (path, interfaces) in &objects {
            let Some(props) = interfaces.get(ADAPTER_INTERFACE) else {
                continue;
            };
            let mut adapter = Adapter::new(bus.clone(), config.clone(), path, props)?;

            let prefix = format!("{}/", path);
            for (device_path, device_interfaces) in objects
                .range(prefix.clone()..)
                .take_while(|(p, _)| p.starts_with(&prefix))
            {
                if let Some(device_props) = device_interfaces.get(DEVICE_INTERFACE) {
                    let device = Device::new(adapter.ctx.clone(), path, device_path, device_props);
                    if device.collection_pending() {
                        let _ = adapter.ctx.inbound_sender().send(Inbound::CollectServices {
                            device: device_path.clone(),
                        });
                    }
                    adapter.devices.insert(device_path.clone(), device);
                }
            }

            info!(
                "Found adapter {} ({}) with {} known devices",
                adapter.name,
                adapter.address,
                adapter.devices.len()
            );
            adapters.push(adapter);
        }
        Ok(adapters)
    }

    /// The configured adapter, or the first one found. Every other adapter
    /// is torn down.
    pub async fn get_default(
        bus: Arc<dyn IpcBus>,
        config: &BluetoothConfig,
    ) -> Result<Option<Adapter>> {
        if let Some(name) = &config.adapter {
            return Self::get(bus, config, name).await;
        }
        Ok(Self::find_all(bus, config).await?.into_iter().next())
    }

    /// The adapter called `name` (e.g. `hci0`). Every other adapter is
    /// torn down.
    pub async fn get(
        bus: Arc<dyn IpcBus>,
        config: &BluetoothConfig,
        name: &str,
    ) -> Result<Option<Adapter>> {
        Ok(Self::find_all(bus, config)
            .await?
            .into_iter()
            .find(|adapter| adapter.name == name))
    }

    fn new(
        bus: Arc<dyn IpcBus>,
        config: BluetoothConfig,
        path: &str,
        props: &PropMap,
    ) -> Result<Self> {
        let (ctx, inbound) = Context::new(bus, config);
        let flag = |name: &str| props.get(name).and_then(Value::as_bool).unwrap_or(false);

        let mut adapter = Self {
            ctx,
            inbound,
            path: path.to_string(),
            name: path.rsplit('/').next().unwrap_or(path).to_string(),
            address: props
                .get("Address")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            alias: props.get("Alias").and_then(Value::as_str).map(str::to_string),
            powered: flag("Powered"),
            discoverable: flag("Discoverable"),
            discovery_state: if flag("Discovering") {
                DiscoveryState::Started
            } else {
                DiscoveryState::Stopped
            },
            discovery_filter: DiscoveryFilter::default(),
            devices: HashMap::new(),
            routes: Vec::new(),
            advertisement: None,
            agent: None,
        };

        let subscriptions = [
            (
                MatchRule::new(PROPERTIES_INTERFACE, PROPERTIES_CHANGED)
                    .path(path)
                    .arg0(ADAPTER_INTERFACE),
                Route::AdapterProperties,
            ),
            (
                MatchRule::new(OBJECT_MANAGER_INTERFACE, INTERFACES_ADDED).path(ROOT_PATH),
                Route::InterfacesAdded,
            ),
            (
                MatchRule::new(OBJECT_MANAGER_INTERFACE, INTERFACES_REMOVED).path(ROOT_PATH),
                Route::InterfacesRemoved,
            ),
            (
                MatchRule::new(PROPERTIES_INTERFACE, PROPERTIES_CHANGED)
                    .path_namespace(path)
                    .arg0(DEVICE_INTERFACE),
                Route::DeviceProperties,
            ),
        ];
        for (rule, route) in subscriptions {
            // On failure, dropping the adapter releases what was subscribed.
            let id = adapter.ctx.subscribe(rule, route)?;
            adapter.routes.push(id);
        }
        Ok(adapter)
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn alias(&self) -> Option<&str> {
        self.alias.as_deref()
    }

    pub fn is_powered(&self) -> bool {
        self.powered
    }

    pub fn is_discoverable(&self) -> bool {
        self.discoverable
    }

    pub fn discovery_state(&self) -> DiscoveryState {
        self.discovery_state
    }

    pub fn discovery_filter(&self) -> &DiscoveryFilter {
        &self.discovery_filter
    }

    pub fn config(&self) -> &BluetoothConfig {
        self.ctx.config()
    }

    /// A new listener for events of this adapter and everything it owns.
    pub fn events(&self) -> mpsc::UnboundedReceiver<Event> {
        self.ctx.listen()
    }

    pub fn devices(&self) -> impl Iterator<Item = &Device> {
        self.devices.values()
    }

    pub fn device(&self, path: &str) -> Option<&Device> {
        self.devices.get(path)
    }

    pub fn device_mut(&mut self, path: &str) -> Option<&mut Device> {
        self.devices.get_mut(path)
    }

    pub fn device_by_address(&self, address: &str) -> Option<&Device> {
        self.devices
            .values()
            .find(|d| d.address().eq_ignore_ascii_case(address))
    }

    pub fn connected_devices(&self) -> impl Iterator<Item = &Device> {
        self.devices
            .values()
            .filter(|d| d.connection_state() == ConnectionState::Connected)
    }

    /// Apply the configured discovery filter, if any.
    pub async fn apply_config(&mut self) -> Result<()> {
        let filter = self.ctx.config().discovery.filter()?;
        if let Some(filter) = filter {
            self.set_discovery_filter(filter).await?;
        }
        Ok(())
    }

    pub async fn power_on(&self) -> Result<()> {
        self.set_powered(true).await
    }

    pub async fn power_off(&self) -> Result<()> {
        self.set_powered(false).await
    }

    /// Request a power change. The local flag follows the `Powered`
    /// property signal.
    async fn set_powered(&self, powered: bool) -> Result<()> {
        info!("Powering {} {}", if powered { "on" } else { "off" }, self.name);
        self.ctx
            .set_property(&self.path, ADAPTER_INTERFACE, "Powered", Value::Bool(powered))
            .await
    }

    pub async fn set_discoverable(&self, discoverable: bool) -> Result<()> {
        self.ctx
            .set_property(
                &self.path,
                ADAPTER_INTERFACE,
                "Discoverable",
                Value::Bool(discoverable),
            )
            .await
    }

    pub async fn set_alias(&self, alias: &str) -> Result<()> {
        self.ctx
            .set_property(&self.path, ADAPTER_INTERFACE, "Alias", Value::from(alias))
            .await
    }

    /// Ask the daemon to forget a device. It leaves the cache when the
    /// daemon reports its interface removed.
    pub async fn remove_device(&self, path: &str) -> Result<()> {
        info!("Removing device {}", path);
        self.ctx
            .call(
                &self.path,
                ADAPTER_INTERFACE,
                "RemoveDevice",
                vec![Value::object_path(path)],
            )
            .await?;
        Ok(())
    }

    /// Send `filter` to the daemon and keep it for local re-validation of
    /// discovery results.
    pub async fn set_discovery_filter(&mut self, filter: DiscoveryFilter) -> Result<()> {
        filter.validate()?;
        self.ctx
            .call(
                &self.path,
                ADAPTER_INTERFACE,
                "SetDiscoveryFilter",
                vec![filter.to_bus_filter()],
            )
            .await?;
        debug!("Discovery filter set: {:?}", filter);
        self.discovery_filter = filter;
        Ok(())
    }

    /// Start discovery. Does nothing unless STOPPED.
    pub async fn start_discovery(&mut self) -> Result<()> {
        if self.discovery_state != DiscoveryState::Stopped {
            debug!("Start discovery ignored in state {:?}", self.discovery_state);
            return Ok(());
        }

        self.set_discovery_state(DiscoveryState::Starting, None);
        match self
            .ctx
            .call(&self.path, ADAPTER_INTERFACE, "StartDiscovery", vec![])
            .await
        {
            Ok(_) => {
                info!("Discovery started on {}", self.name);
                self.set_discovery_state(DiscoveryState::Started, None);
                Ok(())
            }
            Err(e) => {
                self.set_discovery_state(DiscoveryState::Stopped, Some(e.clone()));
                Err(e)
            }
        }
    }

    /// Stop discovery. Does nothing unless STARTED.
    pub async fn stop_discovery(&mut self) -> Result<()> {
        if self.discovery_state != DiscoveryState::Started {
            debug!("Stop discovery ignored in state {:?}", self.discovery_state);
            return Ok(());
        }

        self.set_discovery_state(DiscoveryState::Stopping, None);
        match self
            .ctx
            .call(&self.path, ADAPTER_INTERFACE, "StopDiscovery", vec![])
            .await
        {
            Ok(_) => {
                info!("Discovery stopped on {}", self.name);
                self.set_discovery_state(DiscoveryState::Stopped, None);
                Ok(())
            }
            Err(e) => {
                if self.ctx.config().rollback_on_failure {
                    self.set_discovery_state(DiscoveryState::Started, Some(e.clone()));
                }
                Err(e)
            }
        }
    }

    fn set_discovery_state(&mut self, state: DiscoveryState, error: Option<Error>) {
        if state == self.discovery_state && error.is_none() {
            return;
        }
        debug!("Discovery {:?} -> {:?}", self.discovery_state, state);
        self.discovery_state = state;
        self.ctx.emit(Event::DiscoveryStateChanged {
            adapter: self.path.clone(),
            state,
            error,
        });
    }

    /// Publish `advertisement` and register it with the daemon.
    pub async fn start_advertising(&mut self, advertisement: Advertisement) -> Result<()> {
        if self.advertisement.is_some() {
            return Err(Error::invalid(format!("{} is already advertising", self.name)));
        }

        // Withdrawn again on drop if registration fails.
        let handle = advertisement.register(self.ctx.bus().clone())?;
        self.ctx
            .call(
                &self.path,
                ADVERTISING_MANAGER_INTERFACE,
                "RegisterAdvertisement",
                vec![Value::object_path(handle.path()), Value::empty_dict()],
            )
            .await?;

        info!("Advertising {} on {}", handle.path(), self.name);
        self.advertisement = Some(handle);
        Ok(())
    }

    /// Unregister and withdraw the current advertisement.
    pub async fn stop_advertising(&mut self) -> Result<()> {
        let Some(handle) = self.advertisement.take() else {
            return Ok(());
        };
        let result = self
            .ctx
            .call(
                &self.path,
                ADVERTISING_MANAGER_INTERFACE,
                "UnregisterAdvertisement",
                vec![Value::object_path(handle.path())],
            )
            .await;
        info!("Stopped advertising on {}", self.name);
        result.map(|_| ())
    }

    pub fn is_advertising(&self) -> bool {
        self.advertisement.is_some()
    }

    pub async fn register_application(&self, application: &Application) -> Result<()> {
        self.ctx
            .call(
                &self.path,
                GATT_MANAGER_INTERFACE,
                "RegisterApplication",
                vec![Value::object_path(application.path()), Value::empty_dict()],
            )
            .await?;
        info!("Application {} registered on {}", application.path(), self.name);
        Ok(())
    }

    pub async fn unregister_application(&self, application: &Application) -> Result<()> {
        self.ctx
            .call(
                &self.path,
                GATT_MANAGER_INTERFACE,
                "UnregisterApplication",
                vec![Value::object_path(application.path())],
            )
            .await?;
        info!("Application {} unregistered", application.path());
        Ok(())
    }

    /// Publish a pairing agent on the configured path and make it the
    /// default agent. Pairing requests it receives move the device to
    /// BONDING.
    pub async fn register_agent(
        &mut self,
        capability: IoCapability,
        handler: Arc<dyn AgentHandler>,
    ) -> Result<()> {
        self.unregister_agent().await?;

        let path = self.ctx.config().agent.path.clone();
        let agent = Agent::new(self.ctx.bus().clone(), &path, capability, handler)?;
        let tx = self.ctx.inbound_sender();
        agent.on_pairing(move |progress| {
            let _ = tx.send(match progress {
                PairingProgress::Started { device } => Inbound::BondingStarted { device },
                PairingProgress::Failed { device, error } => Inbound::BondingFailed {
                    device,
                    error: error.into(),
                },
            });
        });

        self.ctx
            .call(
                BLUEZ_PATH,
                AGENT_MANAGER_INTERFACE,
                "RegisterAgent",
                vec![Value::object_path(path.as_str()), Value::from(capability.as_str())],
            )
            .await?;
        let default = self
            .ctx
            .call(
                BLUEZ_PATH,
                AGENT_MANAGER_INTERFACE,
                "RequestDefaultAgent",
                vec![Value::object_path(path.as_str())],
            )
            .await;
        if let Err(e) = default {
            warn!("Agent {} could not become the default agent: {}", path, e);
            // Registered but about to be withdrawn.
            if let Err(undo) = self
                .ctx
                .call(
                    BLUEZ_PATH,
                    AGENT_MANAGER_INTERFACE,
                    "UnregisterAgent",
                    vec![Value::object_path(path.as_str())],
                )
                .await
            {
                warn!("Failed to unregister agent {}: {}", path, undo);
            }
            return Err(e);
        }

        info!("Agent {} registered ({})", path, capability.as_str());
        self.agent = Some(agent);
        Ok(())
    }

    /// [`register_agent`](Self::register_agent) with the configured
    /// capability.
    pub async fn register_configured_agent(&mut self, handler: Arc<dyn AgentHandler>) -> Result<()> {
        let capability = self.ctx.config().agent.io_capability;
        self.register_agent(capability, handler).await
    }

    pub async fn unregister_agent(&mut self) -> Result<()> {
        let Some(agent) = self.agent.take() else {
            return Ok(());
        };
        self.ctx
            .call(
                BLUEZ_PATH,
                AGENT_MANAGER_INTERFACE,
                "UnregisterAgent",
                vec![Value::object_path(agent.path())],
            )
            .await?;
        Ok(())
    }

    /// Wait for the next queued signal and apply it.
    pub async fn dispatch_next(&mut self) {
        if let Some(inbound) = self.inbound.recv().await {
            self.handle_inbound(inbound).await;
        }
    }

    /// Apply every signal queued so far. Returns how many were handled.
    pub async fn dispatch_pending(&mut self) -> usize {
        let mut handled = 0;
        while let Ok(inbound) = self.inbound.try_recv() {
            self.handle_inbound(inbound).await;
            handled += 1;
        }
        handled
    }

    async fn handle_inbound(&mut self, inbound: Inbound) {
        match inbound {
            Inbound::BondingStarted { device } => match self.devices.get_mut(&device) {
                Some(device) => device.bonding_started(),
                None => debug!("Pairing request for unknown device {}", device),
            },
            Inbound::CollectServices { device } => {
                if let Some(device) = self.devices.get_mut(&device) {
                    device.collect_if_pending().await;
                }
            }
            Inbound::BondingFailed { device, error } => match self.devices.get_mut(&device) {
                Some(device) => device.bonding_failed(error).await,
                None => debug!("Pairing of unknown device {} failed: {}", device, error),
            },
            Inbound::Signal { route, seq, signal } => {
                let Some(target) = self.ctx.route(route) else {
                    trace!("Dropping {} on {}, route is gone", signal.member, signal.path);
                    return;
                };
                if let Err(e) = self.handle_signal(target, seq, &signal).await {
                    warn!(
                        "Discarding {}.{} on {}: {}",
                        signal.interface, signal.member, signal.path, e
                    );
                }
            }
        }
    }

    async fn handle_signal(&mut self, route: Route, seq: u64, signal: &Signal) -> Result<()> {
        match route {
            Route::AdapterProperties => {
                let changes = PropertiesChanged::parse(&signal.args)?;
                self.on_adapter_properties(&changes.changed);
            }
            Route::InterfacesAdded => self.on_interfaces_added(&signal.args).await?,
            Route::InterfacesRemoved => self.on_interfaces_removed(&signal.args)?,
            Route::DeviceProperties => {
                let changes = PropertiesChanged::parse(&signal.args)?;
                let covered = self
                    .devices
                    .get(&signal.path)
                    .is_some_and(|d| d.covers(seq));
                if covered {
                    trace!("{} handled by its own subscription", signal.path);
                } else {
                    self.on_device_properties(&signal.path, &changes).await;
                }
            }
            Route::DeviceOwnProperties { device } => {
                let changes = PropertiesChanged::parse(&signal.args)?;
                if self.devices.contains_key(&device) {
                    self.on_device_properties(&device, &changes).await;
                }
            }
            Route::Characteristic {
                device,
                characteristic,
            } => {
                let changes = PropertiesChanged::parse(&signal.args)?;
                if let Some(c) = self
                    .devices
                    .get_mut(&device)
                    .and_then(|d| d.characteristic_by_path_mut(&characteristic))
                {
                    c.handle_properties(&changes.changed);
                }
            }
        }
        Ok(())
    }

    fn on_adapter_properties(&mut self, changed: &PropMap) {
        for (name, value) in changed {
            match (name.as_str(), value) {
                ("Powered", Value::Bool(powered)) => {
                    if *powered != self.powered {
                        info!("{} powered {}", self.name, if *powered { "on" } else { "off" });
                        self.powered = *powered;
                        self.ctx.emit(Event::PoweredStateChanged {
                            adapter: self.path.clone(),
                            powered: *powered,
                        });
                    }
                }
                ("Discovering", Value::Bool(discovering)) => {
                    let state = if *discovering {
                        DiscoveryState::Started
                    } else {
                        DiscoveryState::Stopped
                    };
                    self.set_discovery_state(state, None);
                }
                ("Discoverable", Value::Bool(discoverable)) => self.discoverable = *discoverable,
                ("Address", Value::Str(address)) => self.address = address.clone(),
                ("Alias", Value::Str(alias)) => self.alias = Some(alias.clone()),
                _ => trace!("Ignoring adapter property {}", name),
            }
        }
    }

    /// Whether `path` is an object of this adapter.
    fn owns(&self, path: &str) -> bool {
        path.strip_prefix(self.path.as_str())
            .is_some_and(|rest| rest.starts_with('/'))
    }

    async fn on_interfaces_added(&mut self, args: &[Value]) -> Result<()> {
        let (Some(path), Some(interfaces)) = (args.first().and_then(Value::as_str), args.get(1))
        else {
            return Err(Error::malformed("InterfacesAdded expects (oa{sa{sv}})"));
        };
        let interfaces = parse_interfaces(interfaces)?;
        let Some(props) = interfaces.get(DEVICE_INTERFACE) else {
            return Ok(());
        };
        if !self.owns(path) {
            return Ok(());
        }

        match self.devices.get_mut(path) {
            Some(device) => {
                device.handle_properties(props, &[]).await;
            }
            None => {
                let device = Device::new(self.ctx.clone(), &self.path, path, props);
                debug!("New device {} ({})", device.address(), path);
                self.devices.insert(path.to_string(), device);
            }
        }
        self.deliver_discovery_result(path);
        Ok(())
    }

    fn on_interfaces_removed(&mut self, args: &[Value]) -> Result<()> {
        let (Some(path), Some(interfaces)) = (
            args.first().and_then(Value::as_str),
            args.get(1).and_then(Value::as_str_array),
        ) else {
            return Err(Error::malformed("InterfacesRemoved expects (oas)"));
        };
        if !interfaces.iter().any(|i| i == DEVICE_INTERFACE) {
            return Ok(());
        }

        // Dropping the device releases its subscriptions.
        if let Some(device) = self.devices.remove(path) {
            info!("Device {} ({}) removed", device.address(), path);
            drop(device);
            self.ctx.emit(Event::DeviceRemoved {
                device: path.to_string(),
            });
        }
        Ok(())
    }

    async fn on_device_properties(&mut self, path: &str, changes: &PropertiesChanged) {
        if !self.owns(path) {
            return;
        }

        let advertisement = match self.devices.get_mut(path) {
            Some(device) => {
                device
                    .handle_properties(&changes.changed, &changes.invalidated)
                    .await
            }
            None => {
                // Missed (or reordered) InterfacesAdded: fetch the whole
                // property set. A device already gone stays gone.
                let props = match self.ctx.get_all(path, DEVICE_INTERFACE).await {
                    Ok(props) => props,
                    Err(e) => {
                        debug!("Not creating {}: {}", path, e);
                        return;
                    }
                };
                let device = Device::new(self.ctx.clone(), &self.path, path, &props);
                debug!("Late device {} ({})", device.address(), path);
                self.devices.insert(path.to_string(), device);
                true
            }
        };

        if advertisement {
            self.deliver_discovery_result(path);
        }
    }

    /// Report `path` as a discovery result if it is disconnected and
    /// matches the filter.
    fn deliver_discovery_result(&self, path: &str) {
        let Some(device) = self.devices.get(path) else {
            return;
        };
        if device.connection_state() != ConnectionState::Disconnected {
            return;
        }
        if !self.discovery_filter.matches(device.info()) {
            trace!("{} filtered out", device.address());
            return;
        }
        self.ctx.emit(Event::DiscoveryResult(device.info().clone()));
    }
}

impl Drop for Adapter {
    fn drop(&mut self) {
        // Devices (and their characteristics) go before the adapter's own
        // subscriptions.
        self.devices.clear();
        for route in self.routes.drain(..) {
            self.ctx.unsubscribe(route);
        }
        debug!("Adapter {} released", self.name);
    }
}

impl std::fmt::Debug for Adapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Adapter")
            .field("path", &self.path)
            .field("address", &self.address)
            .field("powered", &self.powered)
            .field("discovery_state", &self.discovery_state)
            .field("devices", &self.devices.len())
            .finish()
    }
}
