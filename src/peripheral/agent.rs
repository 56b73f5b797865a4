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

//! Pairing agent.
//!
//! The daemon calls the agent when a pairing needs user interaction.
//! Requests are forwarded to an [`AgentHandler`]; anything it declines is
//! answered with `org.bluez.Error.Rejected`.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{canceled, rejected};
use crate::bluetooth::constants::{parse_uuid, AGENT_INTERFACE};
use crate::bus::{BusError, IpcBus, MethodCall, ObjectHandler, RegistrationId, Value};
use crate::error::Result;

/// Input/output capability announced when registering the agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IoCapability {
    DisplayOnly,
    DisplayYesNo,
    KeyboardOnly,
    NoInputNoOutput,
    KeyboardDisplay,
}

impl IoCapability {
    pub fn as_str(self) -> &'static str {
        match self {
            IoCapability::DisplayOnly => "DisplayOnly",
            IoCapability::DisplayYesNo => "DisplayYesNo",
            IoCapability::KeyboardOnly => "KeyboardOnly",
            IoCapability::NoInputNoOutput => "NoInputNoOutput",
            IoCapability::KeyboardDisplay => "KeyboardDisplay",
        }
    }
}

/// Answers pairing requests. `device` is the device object path.
///
/// The defaults decline every request that needs an answer.
pub trait AgentHandler: Send + Sync {
    fn request_pin_code(&self, _device: &str) -> Option<String> {
        None
    }

    fn display_pin_code(&self, _device: &str, _pin_code: &str) -> bool {
        true
    }

    fn request_passkey(&self, _device: &str) -> Option<u32> {
        None
    }

    fn display_passkey(&self, _device: &str, _passkey: u32, _entered: u16) {}

    fn request_confirmation(&self, _device: &str, _passkey: u32) -> bool {
        false
    }

    fn request_authorization(&self, _device: &str) -> bool {
        false
    }

    fn authorize_service(&self, _device: &str, _uuid: Uuid) -> bool {
        false
    }

    fn cancel(&self) {}

    fn release(&self) {}
}

/// Pairing progress observed through agent requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum PairingProgress {
    /// A request for `device` started a pairing.
    Started { device: String },
    /// The request was declined, or the daemon cancelled it.
    Failed { device: String, error: BusError },
}

type PairingNotifier = Box<dyn Fn(PairingProgress) + Send + Sync>;

struct Shared {
    handler: Arc<dyn AgentHandler>,
    on_pairing: Mutex<Option<PairingNotifier>>,
    /// Device of the last request that started a pairing, until it is
    /// declined or cancelled.
    pending: Mutex<Option<String>>,
}

impl Shared {
    fn notify(&self, progress: PairingProgress) {
        if let Some(notify) = self.on_pairing.lock().as_ref() {
            notify(progress);
        }
    }

    fn bonding(&self, device: &str) {
        *self.pending.lock() = Some(device.to_string());
        self.notify(PairingProgress::Started {
            device: device.to_string(),
        });
    }

    fn declined(&self, device: &str, error: BusError) -> BusError {
        self.pending.lock().take();
        self.notify(PairingProgress::Failed {
            device: device.to_string(),
            error: error.clone(),
        });
        error
    }

    fn handle(&self, call: &MethodCall) -> std::result::Result<Vec<Value>, BusError> {
        let device = move || {
            call.args
                .first()
                .and_then(Value::as_str)
                .ok_or_else(|| BusError::invalid_args(format!("{} expects a device path", call.member)))
        };
        let u32_arg = move |index: usize| {
            call.args
                .get(index)
                .and_then(Value::as_u32)
                .ok_or_else(|| BusError::invalid_args(format!("{} expects a passkey", call.member)))
        };

        debug!("Agent request {}", call.member);
        match call.member.as_str() {
            "Release" => {
                info!("Agent released by the daemon");
                self.handler.release();
                Ok(vec![])
            }
            "RequestPinCode" => {
                let device = device()?;
                self.bonding(device);
                match self.handler.request_pin_code(device) {
                    Some(pin) => Ok(vec![Value::from(pin)]),
                    None => Err(self.declined(device, rejected("PIN code request declined"))),
                }
            }
            "DisplayPinCode" => {
                let device = device()?;
                let pin = call
                    .args
                    .get(1)
                    .and_then(Value::as_str)
                    .ok_or_else(|| BusError::invalid_args("DisplayPinCode expects a PIN code"))?;
                if self.handler.display_pin_code(device, pin) {
                    Ok(vec![])
                } else {
                    Err(rejected("PIN code display declined"))
                }
            }
            "RequestPasskey" => {
                let device = device()?;
                self.bonding(device);
                match self.handler.request_passkey(device) {
                    Some(passkey) => Ok(vec![Value::UInt32(passkey)]),
                    None => Err(self.declined(device, rejected("Passkey request declined"))),
                }
            }
            "DisplayPasskey" => {
                let device = device()?;
                let passkey = u32_arg(1)?;
                let entered = call.args.get(2).and_then(Value::as_u16).unwrap_or(0);
                self.handler.display_passkey(device, passkey, entered);
                Ok(vec![])
            }
            "RequestConfirmation" => {
                let device = device()?;
                let passkey = u32_arg(1)?;
                self.bonding(device);
                if self.handler.request_confirmation(device, passkey) {
                    Ok(vec![])
                } else {
                    Err(self.declined(device, rejected("Passkey confirmation declined")))
                }
            }
            "RequestAuthorization" => {
                let device = device()?;
                self.bonding(device);
                if self.handler.request_authorization(device) {
                    Ok(vec![])
                } else {
                    Err(self.declined(device, rejected("Pairing not authorized")))
                }
            }
            "AuthorizeService" => {
                let device = device()?;
                let uuid = call
                    .args
                    .get(1)
                    .and_then(Value::as_str)
                    .and_then(|u| parse_uuid(u).ok())
                    .ok_or_else(|| BusError::invalid_args("AuthorizeService expects a UUID"))?;
                if self.handler.authorize_service(device, uuid) {
                    Ok(vec![])
                } else {
                    Err(rejected("Service not authorized"))
                }
            }
            "Cancel" => {
                warn!("Pairing request cancelled by the daemon");
                self.handler.cancel();
                let device = self.pending.lock().take();
                if let Some(device) = device {
                    self.notify(PairingProgress::Failed {
                        device,
                        error: canceled(),
                    });
                }
                Ok(vec![])
            }
            other => Err(BusError::unknown_method(AGENT_INTERFACE, other)),
        }
    }
}

/// A published pairing agent. Dropping it withdraws the object.
pub struct Agent {
    bus: Arc<dyn IpcBus>,
    path: String,
    capability: IoCapability,
    registration: RegistrationId,
    shared: Arc<Shared>,
}

impl Agent {
    /// Publish an agent on `path`. Registering it with the daemon is done
    /// by [`Adapter::register_agent`](crate::bluetooth::Adapter::register_agent).
    pub fn new(
        bus: Arc<dyn IpcBus>,
        path: &str,
        capability: IoCapability,
        handler: Arc<dyn AgentHandler>,
    ) -> Result<Self> {
        let shared = Arc::new(Shared {
            handler,
            on_pairing: Mutex::new(None),
            pending: Mutex::new(None),
        });
        let object = shared.clone();
        let object: Arc<dyn ObjectHandler> =
            Arc::new(move |call: &MethodCall| object.handle(call));
        let registration = bus.register_object(path, AGENT_INTERFACE, object)?;
        debug!("Agent published at {} ({})", path, capability.as_str());

        Ok(Self {
            bus,
            path: path.to_string(),
            capability,
            registration,
            shared,
        })
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn capability(&self) -> IoCapability {
        self.capability
    }

    /// Called whenever a request starts a pairing and when that pairing is
    /// declined or cancelled.
    pub(crate) fn on_pairing(&self, notify: impl Fn(PairingProgress) + Send + Sync + 'static) {
        *self.shared.on_pairing.lock() = Some(Box::new(notify));
    }
}

impl Drop for Agent {
    fn drop(&mut self) {
        self.bus.unregister_object(self.registration);
        debug!("Agent {} withdrawn", self.path);
    }
}
