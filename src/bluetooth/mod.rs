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

//! Central role.
//!
//! Mirrors the daemon's adapter, device, service and characteristic objects
//! and keeps them in sync through property and object-manager signals.

pub mod constants;

mod adapter;
mod characteristic;
mod context;
mod device;
mod events;
mod filter;
mod service;

pub use adapter::{Adapter, DiscoveryState};
pub use characteristic::{CharFlags, Characteristic, WriteType};
pub use device::{AddressType, BondingState, ConnectionState, Device, DeviceInfo};
pub use events::Event;
pub use filter::DiscoveryFilter;
pub use service::Service;
