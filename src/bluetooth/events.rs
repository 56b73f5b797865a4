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

//! Events emitted by an adapter and the objects it owns.

use uuid::Uuid;

use super::adapter::DiscoveryState;
use super::device::{BondingState, ConnectionState, DeviceInfo};
use crate::error::Error;

/// Events delivered to listeners obtained from [`Adapter::events`].
///
/// [`Adapter::events`]: super::Adapter::events
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// A device matching the discovery filter was seen or its
    /// advertisement data changed.
    DiscoveryResult(DeviceInfo),
    /// Discovery state changed. `error` is set when a start or stop failed.
    DiscoveryStateChanged {
        adapter: String,
        state: DiscoveryState,
        error: Option<Error>,
    },
    /// Adapter power changed.
    PoweredStateChanged { adapter: String, powered: bool },
    /// A remote central connected to (or disconnected from) us.
    ///
    /// Best-effort: inferred from a device that connected without a local
    /// `connect` and was never seen advertising (unknown RSSI, no service
    /// UUIDs). Follows the matching [`Event::ConnectionStateChanged`].
    CentralConnectionStateChanged(DeviceInfo),
    /// Connection state of a device changed.
    ConnectionStateChanged {
        device: String,
        state: ConnectionState,
        error: Option<Error>,
    },
    /// Bonding state of a device changed.
    BondingStateChanged {
        device: String,
        new_state: BondingState,
        old_state: BondingState,
        error: Option<Error>,
    },
    /// The GATT tree of a device was collected; its characteristics can
    /// now be looked up.
    ServicesResolved { device: String },
    /// Notifications on a characteristic were enabled or disabled.
    NotifyStateChanged {
        device: String,
        characteristic: String,
        uuid: Uuid,
        notifying: bool,
        error: Option<Error>,
    },
    /// A notification or indication carrying a new value.
    Notification {
        device: String,
        characteristic: String,
        service_uuid: Uuid,
        uuid: Uuid,
        value: Vec<u8>,
    },
    /// A device left the adapter's cache.
    DeviceRemoved { device: String },
}
