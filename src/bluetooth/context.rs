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

//! Shared plumbing for one adapter's object graph.
//!
//! Every subscription made by an adapter, its devices or their
//! characteristics is registered here under a [`RouteId`]. Bus handlers
//! only push `(route, signal)` onto the adapter's inbound queue; the
//! adapter later resolves the route to the owning object. A route removed
//! before its queued signals are processed simply no longer resolves, so a
//! late signal can never reach an object that was already dropped.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::constants::{BLUEZ_SERVICE, PROPERTIES_INTERFACE};
use super::events::Event;
use crate::bus::{IpcBus, MatchRule, MethodCall, PropMap, Signal, SubscriptionId, Value};
use crate::config::BluetoothConfig;
use crate::error::{Error, Result};

/// Identifies one subscription owned by an object of the graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct RouteId(u64);

/// Which object a subscription feeds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Route {
    AdapterProperties,
    InterfacesAdded,
    InterfacesRemoved,
    /// Device1 property changes anywhere below the adapter.
    DeviceProperties,
    /// Property changes of one device, subscribed while it is in use.
    DeviceOwnProperties { device: String },
    Characteristic {
        device: String,
        characteristic: String,
    },
}

/// Work queued for the adapter's dispatch loop.
#[derive(Debug)]
pub(crate) enum Inbound {
    /// `seq` increases with every signal queued on this context.
    Signal {
        route: RouteId,
        seq: u64,
        signal: Signal,
    },
    /// The pairing agent received a request concerning `device`.
    BondingStarted { device: String },
    /// The agent declined that request or the daemon cancelled it.
    BondingFailed { device: String, error: Error },
    /// `device` was found with resolved services but no collected tree.
    CollectServices { device: String },
}

pub(crate) struct Context {
    bus: Arc<dyn IpcBus>,
    config: BluetoothConfig,
    inbound_tx: mpsc::UnboundedSender<Inbound>,
    routes: Mutex<HashMap<RouteId, (SubscriptionId, Route)>>,
    next_route: AtomicU64,
    signal_seq: Arc<AtomicU64>,
    listeners: Mutex<Vec<mpsc::UnboundedSender<Event>>>,
}

impl Context {
    pub fn new(
        bus: Arc<dyn IpcBus>,
        config: BluetoothConfig,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<Inbound>) {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let ctx = Arc::new(Self {
            bus,
            config,
            inbound_tx,
            routes: Mutex::new(HashMap::new()),
            next_route: AtomicU64::new(1),
            signal_seq: Arc::new(AtomicU64::new(0)),
            listeners: Mutex::new(Vec::new()),
        });
        (ctx, inbound_rx)
    }

    pub fn bus(&self) -> &Arc<dyn IpcBus> {
        &self.bus
    }

    pub fn config(&self) -> &BluetoothConfig {
        &self.config
    }

    pub fn inbound_sender(&self) -> mpsc::UnboundedSender<Inbound> {
        self.inbound_tx.clone()
    }

    /// Call a method on the daemon, bounded by the configured timeout.
    pub async fn call(
        &self,
        path: &str,
        interface: &str,
        member: &str,
        args: Vec<Value>,
    ) -> Result<Vec<Value>> {
        let call = MethodCall::new(BLUEZ_SERVICE, path, interface, member, args);
        call_with_timeout(self.bus.as_ref(), self.config.call_timeout(), call).await
    }

    /// `Properties.GetAll` on `path`.
    pub async fn get_all(&self, path: &str, interface: &str) -> Result<PropMap> {
        let reply = self
            .call(path, PROPERTIES_INTERFACE, "GetAll", vec![Value::from(interface)])
            .await?;
        reply
            .first()
            .and_then(Value::to_prop_map)
            .ok_or_else(|| Error::malformed(format!("GetAll reply for {} is not a dict", path)))
    }

    /// `Properties.Set` on `path`.
    pub async fn set_property(
        &self,
        path: &str,
        interface: &str,
        name: &str,
        value: Value,
    ) -> Result<()> {
        self.call(
            path,
            PROPERTIES_INTERFACE,
            "Set",
            vec![Value::from(interface), Value::from(name), value],
        )
        .await?;
        Ok(())
    }

    /// Subscribe to signals matching `rule` on behalf of `route`.
    pub fn subscribe(&self, rule: MatchRule, route: Route) -> Result<RouteId> {
        let id = RouteId(self.next_route.fetch_add(1, Ordering::Relaxed));
        let tx = self.inbound_tx.clone();
        let counter = self.signal_seq.clone();
        let subscription = self.bus.subscribe(
            rule.sender(BLUEZ_SERVICE),
            Box::new(move |signal| {
                let seq = counter.fetch_add(1, Ordering::SeqCst) + 1;
                // The adapter is gone once the receiver is dropped.
                let _ = tx.send(Inbound::Signal {
                    route: id,
                    seq,
                    signal,
                });
            }),
        )?;
        debug!("Route {:?} -> {:?} ({})", id, route, subscription);
        self.routes.lock().insert(id, (subscription, route));
        Ok(id)
    }

    pub fn unsubscribe(&self, id: RouteId) {
        if let Some((subscription, route)) = self.routes.lock().remove(&id) {
            debug!("Dropping route {:?} ({:?})", id, route);
            self.bus.unsubscribe(subscription);
        }
    }

    /// Sequence number of the last signal queued so far.
    pub fn last_seq(&self) -> u64 {
        self.signal_seq.load(Ordering::SeqCst)
    }

    /// Resolve a route, `None` once it was unsubscribed.
    pub fn route(&self, id: RouteId) -> Option<Route> {
        self.routes.lock().get(&id).map(|(_, route)| route.clone())
    }

    /// Broadcast an event to every live listener.
    pub fn emit(&self, event: Event) {
        debug!("Event: {:?}", event);
        self.listeners
            .lock()
            .retain(|listener| listener.send(event.clone()).is_ok());
    }

    pub fn listen(&self) -> mpsc::UnboundedReceiver<Event> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.listeners.lock().push(tx);
        rx
    }
}

/// Issue `call` and give up after `timeout`.
pub(crate) async fn call_with_timeout(
    bus: &dyn IpcBus,
    timeout: Duration,
    call: MethodCall,
) -> Result<Vec<Value>> {
    let operation = format!("{}.{} on {}", call.interface, call.member, call.path);
    match tokio::time::timeout(timeout, bus.call(call)).await {
        Ok(Ok(reply)) => Ok(reply),
        Ok(Err(e)) => {
            warn!("{} failed: {} ({})", operation, e.message, e.name);
            Err(e.into())
        }
        Err(_) => {
            warn!("{} timed out after {:?}", operation, timeout);
            Err(Error::Timeout { operation, timeout })
        }
    }
}
