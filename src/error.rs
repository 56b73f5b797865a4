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

//! Error types shared by the whole stack.

use std::time::Duration;
use thiserror::Error;

use crate::bus::BusError;

/// Errors surfaced by adapter, device, characteristic and peripheral operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// The bus call reached the daemon and failed there.
    #[error("bus call failed: {0}")]
    Bus(#[from] BusError),

    /// The bus call did not complete within the configured timeout.
    #[error("{operation} timed out after {timeout:?}")]
    Timeout {
        operation: String,
        timeout: Duration,
    },

    /// The caller passed something unusable (bad UUID, unknown
    /// characteristic, unsupported operation for the current state).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A reply, signal or payload did not have the expected shape.
    #[error("malformed data: {0}")]
    Malformed(String),
}

impl Error {
    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        Error::InvalidArgument(msg.into())
    }

    pub(crate) fn malformed(msg: impl Into<String>) -> Self {
        Error::Malformed(msg.into())
    }

    /// The machine-readable error name, when the failure came from the bus.
    pub fn bus_name(&self) -> Option<&str> {
        match self {
            Error::Bus(e) => Some(&e.name),
            _ => None,
        }
    }
}

/// Result alias used across the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;
