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

//! Dynamically typed bus values and property-map helpers.

use std::collections::BTreeMap;

use crate::error::{Error, Result};

/// Property name to value, ordered so that a batch of changes is always
/// applied in the same order.
pub type PropMap = BTreeMap<String, Value>;

/// Object path to interface name to properties.
pub type ManagedObjects = BTreeMap<String, BTreeMap<String, PropMap>>;

/// A value carried in a method call, reply or signal.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Bool(bool),
    Byte(u8),
    Int16(i16),
    UInt16(u16),
    Int32(i32),
    UInt32(u32),
    Int64(i64),
    UInt64(u64),
    Double(f64),
    Str(String),
    ObjectPath(String),
    Bytes(Vec<u8>),
    Array(Vec<Value>),
    Dict(Vec<(Value, Value)>),
}

impl Value {
    pub fn object_path(path: impl Into<String>) -> Self {
        Value::ObjectPath(path.into())
    }

    /// Build an array of strings (`as`).
    pub fn str_array<I, S>(items: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Value::Array(items.into_iter().map(|s| Value::Str(s.into())).collect())
    }

    /// An empty string-keyed dictionary (`a{sv}`).
    pub fn empty_dict() -> Self {
        Value::Dict(Vec::new())
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i16(&self) -> Option<i16> {
        match self {
            Value::Int16(v) => Some(*v),
            Value::Byte(v) => Some(*v as i16),
            _ => None,
        }
    }

    pub fn as_u16(&self) -> Option<u16> {
        match self {
            Value::UInt16(v) => Some(*v),
            Value::Byte(v) => Some(*v as u16),
            _ => None,
        }
    }

    pub fn as_u32(&self) -> Option<u32> {
        match self {
            Value::UInt32(v) => Some(*v),
            Value::UInt16(v) => Some(*v as u32),
            Value::Byte(v) => Some(*v as u32),
            _ => None,
        }
    }

    /// String or object path contents.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) | Value::ObjectPath(s) => Some(s),
            _ => None,
        }
    }

    /// Byte array contents, accepting both the packed and the generic form.
    pub fn as_bytes(&self) -> Option<Vec<u8>> {
        match self {
            Value::Bytes(b) => Some(b.clone()),
            Value::Array(items) => items
                .iter()
                .map(|v| match v {
                    Value::Byte(b) => Some(*b),
                    _ => None,
                })
                .collect(),
            _ => None,
        }
    }

    pub fn as_str_array(&self) -> Option<Vec<String>> {
        match self {
            Value::Array(items) => items
                .iter()
                .map(|v| v.as_str().map(str::to_string))
                .collect(),
            _ => None,
        }
    }

    pub fn as_dict(&self) -> Option<&[(Value, Value)]> {
        match self {
            Value::Dict(entries) => Some(entries),
            _ => None,
        }
    }

    /// Interpret a string-keyed dictionary as a property map.
    pub fn to_prop_map(&self) -> Option<PropMap> {
        let entries = self.as_dict()?;
        let mut props = PropMap::new();
        for (key, value) in entries {
            props.insert(key.as_str()?.to_string(), value.clone());
        }
        Some(props)
    }

    /// Short type name, for log messages about unexpected shapes.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Bool(_) => "bool",
            Value::Byte(_) => "byte",
            Value::Int16(_) => "int16",
            Value::UInt16(_) => "uint16",
            Value::Int32(_) => "int32",
            Value::UInt32(_) => "uint32",
            Value::Int64(_) => "int64",
            Value::UInt64(_) => "uint64",
            Value::Double(_) => "double",
            Value::Str(_) => "string",
            Value::ObjectPath(_) => "object path",
            Value::Bytes(_) => "byte array",
            Value::Array(_) => "array",
            Value::Dict(_) => "dict",
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<u8> for Value {
    fn from(v: u8) -> Self {
        Value::Byte(v)
    }
}

impl From<i16> for Value {
    fn from(v: i16) -> Self {
        Value::Int16(v)
    }
}

impl From<u16> for Value {
    fn from(v: u16) -> Self {
        Value::UInt16(v)
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Value::UInt32(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Bytes(v)
    }
}

impl From<PropMap> for Value {
    fn from(props: PropMap) -> Self {
        Value::Dict(
            props
                .into_iter()
                .map(|(k, v)| (Value::Str(k), v))
                .collect(),
        )
    }
}

/// Decode the reply of `ObjectManager.GetManagedObjects`.
pub fn parse_managed_objects(value: &Value) -> Result<ManagedObjects> {
    let entries = value
        .as_dict()
        .ok_or_else(|| Error::malformed(format!("managed objects is a {}", value.kind())))?;

    let mut objects = ManagedObjects::new();
    for (path, interfaces) in entries {
        let path = path
            .as_str()
            .ok_or_else(|| Error::malformed("managed object key is not a path"))?;
        let interfaces = parse_interfaces(interfaces)?;
        objects.insert(path.to_string(), interfaces);
    }
    Ok(objects)
}

/// Decode an `a{sa{sv}}` interface map (as in `InterfacesAdded`).
pub fn parse_interfaces(value: &Value) -> Result<BTreeMap<String, PropMap>> {
    let entries = value
        .as_dict()
        .ok_or_else(|| Error::malformed(format!("interface map is a {}", value.kind())))?;

    let mut interfaces = BTreeMap::new();
    for (name, props) in entries {
        let name = name
            .as_str()
            .ok_or_else(|| Error::malformed("interface name is not a string"))?;
        let props = props
            .to_prop_map()
            .ok_or_else(|| Error::malformed(format!("properties of {} are not a dict", name)))?;
        interfaces.insert(name.to_string(), props);
    }
    Ok(interfaces)
}

/// Encode a managed-object tree as a `GetManagedObjects` reply value.
pub fn encode_managed_objects(objects: ManagedObjects) -> Value {
    Value::Dict(
        objects
            .into_iter()
            .map(|(path, interfaces)| {
                let interfaces = Value::Dict(
                    interfaces
                        .into_iter()
                        .map(|(name, props)| (Value::Str(name), Value::from(props)))
                        .collect(),
                );
                (Value::ObjectPath(path), interfaces)
            })
            .collect(),
    )
}

/// Arguments of an `org.freedesktop.DBus.Properties.PropertiesChanged` signal.
#[derive(Debug, Clone, PartialEq)]
pub struct PropertiesChanged {
    pub interface: String,
    pub changed: PropMap,
    pub invalidated: Vec<String>,
}

impl PropertiesChanged {
    /// Parse `(s a{sv} as)`. Anything else is rejected.
    pub fn parse(args: &[Value]) -> Result<Self> {
        match args {
            [Value::Str(interface), changed, invalidated] => {
                let changed = changed
                    .to_prop_map()
                    .ok_or_else(|| Error::malformed("changed properties are not a dict"))?;
                let invalidated = invalidated
                    .as_str_array()
                    .ok_or_else(|| Error::malformed("invalidated properties are not strings"))?;
                Ok(Self {
                    interface: interface.clone(),
                    changed,
                    invalidated,
                })
            }
            _ => Err(Error::malformed(format!(
                "PropertiesChanged carries {} arguments of unexpected types",
                args.len()
            ))),
        }
    }

    pub fn to_args(&self) -> Vec<Value> {
        vec![
            Value::Str(self.interface.clone()),
            Value::from(self.changed.clone()),
            Value::str_array(self.invalidated.iter().cloned()),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bytes_from_generic_array() {
        let v = Value::Array(vec![Value::Byte(1), Value::Byte(2)]);
        assert_eq!(v.as_bytes(), Some(vec![1, 2]));

        let mixed = Value::Array(vec![Value::Byte(1), Value::Str("x".into())]);
        assert_eq!(mixed.as_bytes(), None);
    }

    #[test]
    fn test_prop_map_requires_string_keys() {
        let good = Value::Dict(vec![(Value::from("RSSI"), Value::Int16(-60))]);
        assert_eq!(
            good.to_prop_map().unwrap().get("RSSI"),
            Some(&Value::Int16(-60))
        );

        let bad = Value::Dict(vec![(Value::UInt16(76), Value::Bytes(vec![1]))]);
        assert!(bad.to_prop_map().is_none());
    }

    #[test]
    fn test_managed_objects_roundtrip_shape() {
        let mut props = PropMap::new();
        props.insert("Address".into(), Value::from("00:11:22:33:44:55"));
        let mut interfaces = BTreeMap::new();
        interfaces.insert("org.bluez.Device1".to_string(), props);
        let mut objects = ManagedObjects::new();
        objects.insert("/org/bluez/hci0/dev_00_11_22_33_44_55".into(), interfaces);

        let parsed = parse_managed_objects(&encode_managed_objects(objects.clone())).unwrap();
        assert_eq!(parsed, objects);
    }

    #[test]
    fn test_properties_changed_rejects_wrong_shape() {
        assert!(PropertiesChanged::parse(&[Value::from("org.bluez.Device1")]).is_err());
        assert!(PropertiesChanged::parse(&[
            Value::Bool(true),
            Value::empty_dict(),
            Value::Array(vec![])
        ])
        .is_err());

        let ok = PropertiesChanged::parse(&[
            Value::from("org.bluez.Device1"),
            Value::Dict(vec![(Value::from("Connected"), Value::Bool(true))]),
            Value::Array(vec![]),
        ])
        .unwrap();
        assert_eq!(ok.interface, "org.bluez.Device1");
        assert_eq!(ok.changed.get("Connected"), Some(&Value::Bool(true)));
    }
}
