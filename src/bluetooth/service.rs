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

//! Remote GATT service.

use uuid::Uuid;

/// A service of a remote device. Its characteristics are owned by the
/// device and referenced here by object path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Service {
    path: String,
    uuid: Uuid,
    primary: bool,
    device: String,
    characteristics: Vec<String>,
}

impl Service {
    pub(crate) fn new(path: String, uuid: Uuid, primary: bool, device: String) -> Self {
        Self {
            path,
            uuid,
            primary,
            device,
            characteristics: Vec::new(),
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    pub fn is_primary(&self) -> bool {
        self.primary
    }

    /// Object path of the owning device.
    pub fn device(&self) -> &str {
        &self.device
    }

    /// Object paths of the characteristics of this service.
    pub fn characteristics(&self) -> &[String] {
        &self.characteristics
    }

    /// Whether `path` names an object below this service.
    pub(crate) fn contains(&self, path: &str) -> bool {
        path.strip_prefix(self.path.as_str())
            .is_some_and(|rest| rest.starts_with('/'))
    }

    pub(crate) fn add_characteristic(&mut self, path: String) {
        self.characteristics.push(path);
    }
}
