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

//! Host-side BLE GATT stack on top of the BlueZ object model.
//!
//! [`bluetooth::Adapter`] is the entry point for the central role:
//! discovery, connections, pairing and remote GATT access. The
//! [`peripheral`] module publishes local GATT applications, advertisements
//! and pairing agents. Everything talks to the daemon through an
//! [`bus::IpcBus`].

pub mod bluetooth;
pub mod bus;
pub mod codec;
pub mod config;
mod error;
pub mod logging;
pub mod peripheral;

pub use error::{Error, Result};
