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

//! In-process bus.
//!
//! Calls are routed to objects registered on the same bus, signals are
//! delivered synchronously to matching subscribers. Every call and every
//! emitted signal is recorded so tests can assert on traffic.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, trace};

use super::{
    BusError, IpcBus, MatchRule, MethodCall, ObjectHandler, RegistrationId, Signal, SignalHandler,
    SubscriptionId, Value,
};

struct Subscription {
    rule: MatchRule,
    handler: Arc<SignalHandler>,
}

#[derive(Default)]
struct BusState {
    next_id: u64,
    subscriptions: BTreeMap<SubscriptionId, Subscription>,
    objects: HashMap<(String, String), (RegistrationId, Arc<dyn ObjectHandler>)>,
    calls: Vec<MethodCall>,
    emitted: Vec<Signal>,
    stalled: HashSet<(String, String)>,
}

impl BusState {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }
}

/// A bus living entirely inside the current process.
pub struct MemoryBus {
    unique_name: String,
    state: Mutex<BusState>,
}

impl MemoryBus {
    pub fn new() -> Self {
        Self::with_name(":1.0")
    }

    /// Create a bus whose own signals carry `unique_name` as sender.
    pub fn with_name(unique_name: &str) -> Self {
        Self {
            unique_name: unique_name.to_string(),
            state: Mutex::new(BusState::default()),
        }
    }

    /// Deliver a signal as if it had been sent by another peer.
    pub fn inject_signal(&self, signal: Signal) {
        self.dispatch(signal);
    }

    /// Make calls to `member` on `path` hang forever.
    pub fn stall(&self, path: &str, member: &str) {
        self.state
            .lock()
            .stalled
            .insert((path.to_string(), member.to_string()));
    }

    /// Every call issued so far, in order.
    pub fn calls(&self) -> Vec<MethodCall> {
        self.state.lock().calls.clone()
    }

    /// Calls issued so far to a given member.
    pub fn calls_to(&self, member: &str) -> Vec<MethodCall> {
        self.state
            .lock()
            .calls
            .iter()
            .filter(|c| c.member == member)
            .cloned()
            .collect()
    }

    pub fn clear_calls(&self) {
        self.state.lock().calls.clear();
    }

    /// Signals emitted through [`IpcBus::emit_signal`].
    pub fn emitted_signals(&self) -> Vec<Signal> {
        self.state.lock().emitted.clone()
    }

    pub fn subscription_count(&self) -> usize {
        self.state.lock().subscriptions.len()
    }

    /// Number of active subscriptions whose rule targets exactly `path`.
    pub fn subscriptions_on(&self, path: &str) -> usize {
        self.state
            .lock()
            .subscriptions
            .values()
            .filter(|s| s.rule.path.as_deref() == Some(path))
            .count()
    }

    pub fn has_object(&self, path: &str, interface: &str) -> bool {
        self.state
            .lock()
            .objects
            .contains_key(&(path.to_string(), interface.to_string()))
    }

    /// Call a published object directly, bypassing recording. Used to play
    /// the role of a remote peer invoking our objects.
    pub fn invoke(&self, call: &MethodCall) -> Result<Vec<Value>, BusError> {
        let handler = self.lookup(&call.path, &call.interface);
        match handler {
            Some(handler) => handler.handle_call(call),
            None => Err(BusError::unknown_object(&call.path)),
        }
    }

    fn lookup(&self, path: &str, interface: &str) -> Option<Arc<dyn ObjectHandler>> {
        self.state
            .lock()
            .objects
            .get(&(path.to_string(), interface.to_string()))
            .map(|(_, handler)| handler.clone())
    }

    fn dispatch(&self, signal: Signal) {
        // Handlers run without the lock held so they may call back into the bus.
        let handlers: Vec<Arc<SignalHandler>> = self
            .state
            .lock()
            .subscriptions
            .values()
            .filter(|s| s.rule.matches(&signal))
            .map(|s| s.handler.clone())
            .collect();

        trace!(
            "Signal {}.{} on {} -> {} subscriber(s)",
            signal.interface,
            signal.member,
            signal.path,
            handlers.len()
        );

        for handler in handlers {
            (*handler)(signal.clone());
        }
    }
}

impl Default for MemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl IpcBus for MemoryBus {
    async fn call(&self, call: MethodCall) -> Result<Vec<Value>, BusError> {
        let stalled = {
            let mut state = self.state.lock();
            state.calls.push(call.clone());
            state
                .stalled
                .contains(&(call.path.clone(), call.member.clone()))
        };

        if stalled {
            debug!("Call {} on {} stalled", call.member, call.path);
            futures::future::pending::<()>().await;
        }

        self.invoke(&call)
    }

    fn subscribe(
        &self,
        rule: MatchRule,
        handler: SignalHandler,
    ) -> Result<SubscriptionId, BusError> {
        let mut state = self.state.lock();
        let id = SubscriptionId(state.next_id());
        state.subscriptions.insert(
            id,
            Subscription {
                rule,
                handler: Arc::new(handler),
            },
        );
        Ok(id)
    }

    fn unsubscribe(&self, id: SubscriptionId) {
        self.state.lock().subscriptions.remove(&id);
    }

    fn emit_signal(
        &self,
        path: &str,
        interface: &str,
        member: &str,
        args: Vec<Value>,
    ) -> Result<(), BusError> {
        let signal = Signal {
            sender: Some(self.unique_name.clone()),
            path: path.to_string(),
            interface: interface.to_string(),
            member: member.to_string(),
            args,
        };
        self.state.lock().emitted.push(signal.clone());
        self.dispatch(signal);
        Ok(())
    }

    fn register_object(
        &self,
        path: &str,
        interface: &str,
        handler: Arc<dyn ObjectHandler>,
    ) -> Result<RegistrationId, BusError> {
        let mut state = self.state.lock();
        let key = (path.to_string(), interface.to_string());
        if state.objects.contains_key(&key) {
            return Err(BusError::new(
                "org.freedesktop.DBus.Error.ObjectPathInUse",
                format!("{} already exported on {}", interface, path),
            ));
        }
        let id = RegistrationId(state.next_id());
        state.objects.insert(key, (id, handler));
        Ok(id)
    }

    fn unregister_object(&self, id: RegistrationId) {
        self.state.lock().objects.retain(|_, (rid, _)| *rid != id);
    }
}
