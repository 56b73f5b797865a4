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

//! IPC bus contract consumed by the stack.
//!
//! The stack never talks to a transport directly. Everything goes through
//! [`IpcBus`]: method calls, signal subscriptions, signal emission and
//! publication of local objects.

mod memory;
mod value;

use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

pub use memory::MemoryBus;
pub use value::{
    encode_managed_objects, parse_interfaces, parse_managed_objects, ManagedObjects, PropMap,
    PropertiesChanged, Value,
};

/// Error reported by the bus or by the remote end of a call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{name}: {message}")]
pub struct BusError {
    /// Machine-readable error name, e.g. `org.bluez.Error.Failed`.
    pub name: String,
    /// Human-readable description.
    pub message: String,
}

impl BusError {
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
        }
    }

    pub fn unknown_object(path: &str) -> Self {
        Self::new(
            "org.freedesktop.DBus.Error.UnknownObject",
            format!("No such object path '{}'", path),
        )
    }

    pub fn unknown_method(interface: &str, member: &str) -> Self {
        Self::new(
            "org.freedesktop.DBus.Error.UnknownMethod",
            format!("No such method '{}' on interface '{}'", member, interface),
        )
    }

    pub fn invalid_args(message: impl Into<String>) -> Self {
        Self::new("org.freedesktop.DBus.Error.InvalidArgs", message)
    }
}

/// An outgoing (or, for published objects, incoming) method call.
#[derive(Debug, Clone, PartialEq)]
pub struct MethodCall {
    pub destination: String,
    pub path: String,
    pub interface: String,
    pub member: String,
    pub args: Vec<Value>,
}

impl MethodCall {
    pub fn new(
        destination: impl Into<String>,
        path: impl Into<String>,
        interface: impl Into<String>,
        member: impl Into<String>,
        args: Vec<Value>,
    ) -> Self {
        Self {
            destination: destination.into(),
            path: path.into(),
            interface: interface.into(),
            member: member.into(),
            args,
        }
    }
}

/// A broadcast signal.
#[derive(Debug, Clone, PartialEq)]
pub struct Signal {
    pub sender: Option<String>,
    pub path: String,
    pub interface: String,
    pub member: String,
    pub args: Vec<Value>,
}

/// Signal filter used when subscribing. `None` fields match anything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MatchRule {
    pub sender: Option<String>,
    pub interface: Option<String>,
    pub member: Option<String>,
    /// Exact object path.
    pub path: Option<String>,
    /// The path itself or anything below it.
    pub path_namespace: Option<String>,
    /// First argument, when it is a string (the interface name for
    /// `PropertiesChanged`).
    pub arg0: Option<String>,
}

impl MatchRule {
    pub fn new(interface: &str, member: &str) -> Self {
        Self {
            interface: Some(interface.to_string()),
            member: Some(member.to_string()),
            ..Default::default()
        }
    }

    pub fn sender(mut self, sender: &str) -> Self {
        self.sender = Some(sender.to_string());
        self
    }

    pub fn path(mut self, path: &str) -> Self {
        self.path = Some(path.to_string());
        self
    }

    pub fn path_namespace(mut self, namespace: &str) -> Self {
        self.path_namespace = Some(namespace.to_string());
        self
    }

    pub fn arg0(mut self, arg0: &str) -> Self {
        self.arg0 = Some(arg0.to_string());
        self
    }

    pub fn matches(&self, signal: &Signal) -> bool {
        if let (Some(want), Some(got)) = (&self.sender, &signal.sender) {
            if want != got {
                return false;
            }
        }
        if self.interface.as_deref().is_some_and(|i| i != signal.interface) {
            return false;
        }
        if self.member.as_deref().is_some_and(|m| m != signal.member) {
            return false;
        }
        if self.path.as_deref().is_some_and(|p| p != signal.path) {
            return false;
        }
        if let Some(ns) = &self.path_namespace {
            let inside = signal.path == *ns
                || ns == "/"
                || signal
                    .path
                    .strip_prefix(ns.as_str())
                    .is_some_and(|rest| rest.starts_with('/'));
            if !inside {
                return false;
            }
        }
        if let Some(arg0) = &self.arg0 {
            match signal.args.first() {
                Some(Value::Str(s)) if s == arg0 => {}
                _ => return false,
            }
        }
        true
    }
}

/// Handle for an active signal subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(pub u64);

/// Handle for a published object interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RegistrationId(pub u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub#{}", self.0)
    }
}

/// Receives signals matching a subscription.
pub type SignalHandler = Box<dyn Fn(Signal) + Send + Sync>;

/// Services inbound method calls for a published object.
pub trait ObjectHandler: Send + Sync {
    fn handle_call(&self, call: &MethodCall) -> Result<Vec<Value>, BusError>;
}

impl<F> ObjectHandler for F
where
    F: Fn(&MethodCall) -> Result<Vec<Value>, BusError> + Send + Sync,
{
    fn handle_call(&self, call: &MethodCall) -> Result<Vec<Value>, BusError> {
        self(call)
    }
}

/// The message bus the stack runs on.
#[async_trait]
pub trait IpcBus: Send + Sync {
    /// Invoke a remote method and wait for its reply.
    async fn call(&self, call: MethodCall) -> Result<Vec<Value>, BusError>;

    /// Start delivering signals matching `rule` to `handler`.
    fn subscribe(&self, rule: MatchRule, handler: SignalHandler)
        -> Result<SubscriptionId, BusError>;

    /// Stop a subscription. Unknown ids are ignored.
    fn unsubscribe(&self, id: SubscriptionId);

    /// Broadcast a signal from one of our own objects.
    fn emit_signal(
        &self,
        path: &str,
        interface: &str,
        member: &str,
        args: Vec<Value>,
    ) -> Result<(), BusError>;

    /// Publish `interface` on `path`, routing inbound calls to `handler`.
    fn register_object(
        &self,
        path: &str,
        interface: &str,
        handler: Arc<dyn ObjectHandler>,
    ) -> Result<RegistrationId, BusError>;

    /// Withdraw a published interface. Unknown ids are ignored.
    fn unregister_object(&self, id: RegistrationId);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signal(path: &str, args: Vec<Value>) -> Signal {
        Signal {
            sender: Some("org.bluez".into()),
            path: path.into(),
            interface: "org.freedesktop.DBus.Properties".into(),
            member: "PropertiesChanged".into(),
            args,
        }
    }

    #[test]
    fn test_path_namespace_matching() {
        let rule = MatchRule::new("org.freedesktop.DBus.Properties", "PropertiesChanged")
            .path_namespace("/org/bluez/hci0");

        assert!(rule.matches(&signal("/org/bluez/hci0", vec![])));
        assert!(rule.matches(&signal("/org/bluez/hci0/dev_AA", vec![])));
        assert!(!rule.matches(&signal("/org/bluez/hci01/dev_AA", vec![])));
        assert!(!rule.matches(&signal("/org/bluez/hci1/dev_AA", vec![])));
    }

    #[test]
    fn test_arg0_and_sender_matching() {
        let rule = MatchRule::new("org.freedesktop.DBus.Properties", "PropertiesChanged")
            .sender("org.bluez")
            .arg0("org.bluez.Device1");

        assert!(rule.matches(&signal("/x", vec![Value::from("org.bluez.Device1")])));
        assert!(!rule.matches(&signal("/x", vec![Value::from("org.bluez.Adapter1")])));
        assert!(!rule.matches(&signal("/x", vec![])));

        let mut foreign = signal("/x", vec![Value::from("org.bluez.Device1")]);
        foreign.sender = Some(":1.42".into());
        assert!(!rule.matches(&foreign));
    }

    #[test]
    fn test_closure_object_handler() {
        let handler = |call: &MethodCall| -> Result<Vec<Value>, BusError> {
            Ok(vec![Value::from(call.member.clone())])
        };
        let call = MethodCall::new("org.bluez", "/", "org.test", "Ping", vec![]);
        assert_eq!(handler.handle_call(&call).unwrap(), vec![Value::from("Ping")]);
    }
}
