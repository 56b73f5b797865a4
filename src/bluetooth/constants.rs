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

//! BlueZ bus names, interfaces and well-known values.

use uuid::Uuid;

use crate::error::{Error, Result};

/// Well-known bus name of the Bluetooth daemon.
pub const BLUEZ_SERVICE: &str = "org.bluez";

/// Path of the daemon's object manager and of its manager interfaces.
pub const ROOT_PATH: &str = "/";
pub const BLUEZ_PATH: &str = "/org/bluez";

pub const ADAPTER_INTERFACE: &str = "org.bluez.Adapter1";
pub const DEVICE_INTERFACE: &str = "org.bluez.Device1";
pub const GATT_SERVICE_INTERFACE: &str = "org.bluez.GattService1";
pub const GATT_CHARACTERISTIC_INTERFACE: &str = "org.bluez.GattCharacteristic1";
pub const GATT_MANAGER_INTERFACE: &str = "org.bluez.GattManager1";
pub const ADVERTISING_MANAGER_INTERFACE: &str = "org.bluez.LEAdvertisingManager1";
pub const ADVERTISEMENT_INTERFACE: &str = "org.bluez.LEAdvertisement1";
pub const AGENT_MANAGER_INTERFACE: &str = "org.bluez.AgentManager1";
pub const AGENT_INTERFACE: &str = "org.bluez.Agent1";

pub const PROPERTIES_INTERFACE: &str = "org.freedesktop.DBus.Properties";
pub const OBJECT_MANAGER_INTERFACE: &str = "org.freedesktop.DBus.ObjectManager";

pub const PROPERTIES_CHANGED: &str = "PropertiesChanged";
pub const INTERFACES_ADDED: &str = "InterfacesAdded";
pub const INTERFACES_REMOVED: &str = "InterfacesRemoved";

/// Error name prefix for replies from our own objects.
pub const ERROR_PREFIX: &str = "org.bluez.Error.";

/// RSSI value BlueZ reports (and we keep) when no advertisement was seen.
pub const RSSI_UNKNOWN: i16 = -255;

/// Valid range for a discovery filter RSSI threshold.
pub const RSSI_FILTER_MIN: i16 = -127;
pub const RSSI_FILTER_MAX: i16 = 20;

/// Bluetooth base UUID, used to expand 16-bit assigned numbers.
const BASE_UUID: u128 = 0x00000000_0000_1000_8000_00805f9b34fb;

/// Expand a 16-bit SIG assigned number into a full UUID.
pub const fn uuid_from_u16(short: u16) -> Uuid {
    Uuid::from_u128(BASE_UUID | ((short as u128) << 96))
}

/// Parse a UUID in the canonical 36-character hyphenated form.
///
/// Other forms accepted by [`Uuid::parse_str`] (simple, braced, urn) are
/// rejected since the daemon only ever uses the hyphenated form.
pub fn parse_uuid(s: &str) -> Result<Uuid> {
    if s.len() != 36 {
        return Err(Error::invalid(format!("'{}' is not a valid UUID", s)));
    }
    Uuid::parse_str(s).map_err(|_| Error::invalid(format!("'{}' is not a valid UUID", s)))
}

/// Object path of the adapter called `name` (e.g. `hci0`).
pub fn adapter_path(name: &str) -> String {
    format!("{}/{}", BLUEZ_PATH, name)
}

/// Well-known GATT assigned numbers.
pub mod gatt {
    use super::uuid_from_u16;
    use uuid::Uuid;

    pub const GENERIC_ACCESS_SERVICE: Uuid = uuid_from_u16(0x1800);
    pub const DEVICE_INFORMATION_SERVICE: Uuid = uuid_from_u16(0x180a);
    pub const BATTERY_SERVICE: Uuid = uuid_from_u16(0x180f);
    pub const CURRENT_TIME_SERVICE: Uuid = uuid_from_u16(0x1805);

    pub const DEVICE_NAME: Uuid = uuid_from_u16(0x2a00);
    pub const BATTERY_LEVEL: Uuid = uuid_from_u16(0x2a19);
    pub const CURRENT_TIME: Uuid = uuid_from_u16(0x2a2b);
    pub const MANUFACTURER_NAME: Uuid = uuid_from_u16(0x2a29);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uuid_expansion() {
        assert_eq!(
            gatt::BATTERY_SERVICE.to_string(),
            "0000180f-0000-1000-8000-00805f9b34fb"
        );
        assert_eq!(
            uuid_from_u16(0x2a19).to_string(),
            "00002a19-0000-1000-8000-00805f9b34fb"
        );
    }

    #[test]
    fn test_parse_uuid_requires_hyphenated_form() {
        assert!(parse_uuid("0000180f-0000-1000-8000-00805f9b34fb").is_ok());
        assert!(parse_uuid("0000180F-0000-1000-8000-00805F9B34FB").is_ok());
        assert!(parse_uuid("0000180f000010008000800805f9b34fb").is_err());
        assert!(parse_uuid("not-a-uuid").is_err());
        assert!(parse_uuid("0000180g-0000-1000-8000-00805f9b34fb").is_err());
        assert!(matches!(parse_uuid(""), Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn test_adapter_path() {
        assert_eq!(adapter_path("hci0"), "/org/bluez/hci0");
    }
}
