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

//! Peripheral role: local GATT application, advertising and pairing agent.

mod common;

use parking_lot::Mutex;
use std::sync::Arc;
use uuid::Uuid;

use ble_gatt_host::bluetooth::constants::{
    ADVERTISEMENT_INTERFACE, AGENT_INTERFACE, BLUEZ_SERVICE, DEVICE_INTERFACE,
    GATT_CHARACTERISTIC_INTERFACE, OBJECT_MANAGER_INTERFACE, PROPERTIES_CHANGED,
};
use ble_gatt_host::bluetooth::{BondingState, CharFlags, Event};
use ble_gatt_host::bus::{parse_managed_objects, MethodCall, PropMap, PropertiesChanged, Value};
use ble_gatt_host::peripheral::{
    Advertisement, AgentHandler, Application, GattError, IoCapability,
    LocalCharacteristicHandler, WriteRequest,
};
use ble_gatt_host::Error;

use common::{advertising, drain, props, FakeBluez, BATTERY_LEVEL, BATTERY_SERVICE};

const APP: &str = "/org/bluez/gatthost/app";

/// Accepts single-byte writes and records what was stored.
#[derive(Default)]
struct Recorder {
    updates: Mutex<Vec<Vec<u8>>>,
}

impl LocalCharacteristicHandler for Recorder {
    fn on_write(&self, request: &WriteRequest) -> Result<(), GattError> {
        if request.value.len() != 1 {
            return Err(GattError::InvalidValueLength);
        }
        Ok(())
    }

    fn on_updated(&self, _uuid: Uuid, value: &[u8]) {
        self.updates.lock().push(value.to_vec());
    }
}

fn write_call(path: &str, value: &[u8]) -> MethodCall {
    let mut options = PropMap::new();
    options.insert("offset".into(), Value::UInt16(0));
    options.insert("type".into(), Value::from("request"));
    MethodCall::new(
        BLUEZ_SERVICE,
        path,
        GATT_CHARACTERISTIC_INTERFACE,
        "WriteValue",
        vec![Value::Bytes(value.to_vec()), Value::from(options)],
    )
}

fn battery_application(fake: &FakeBluez, handler: Arc<Recorder>) -> (Application, String) {
    let app = Application::new(fake.bus.clone(), APP).unwrap();
    app.add_service(BATTERY_SERVICE, true).unwrap();
    let path = app
        .add_characteristic(
            BATTERY_SERVICE,
            BATTERY_LEVEL,
            CharFlags::READ | CharFlags::WRITE | CharFlags::NOTIFY,
            Some(handler),
        )
        .unwrap();
    app.set_char_value(BATTERY_SERVICE, BATTERY_LEVEL, &[100]).unwrap();
    (app, path)
}

#[tokio::test]
async fn test_application_registration() {
    let fake = FakeBluez::new();
    let adapter = fake.adapter().await;
    let (app, _) = battery_application(&fake, Arc::default());

    adapter.register_application(&app).await.unwrap();
    let calls = fake.bus.calls_to("RegisterApplication");
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].args[0], Value::object_path(APP));

    // What the daemon sees when it walks the application.
    let reply = fake
        .bus
        .invoke(&MethodCall::new(
            BLUEZ_SERVICE,
            APP,
            OBJECT_MANAGER_INTERFACE,
            "GetManagedObjects",
            vec![],
        ))
        .unwrap();
    let objects = parse_managed_objects(&reply[0]).unwrap();
    assert_eq!(objects.len(), 2);
    let characteristic = objects
        .values()
        .find_map(|i| i.get(GATT_CHARACTERISTIC_INTERFACE))
        .unwrap();
    assert_eq!(
        characteristic.get("Flags"),
        Some(&Value::str_array(["read", "write", "notify"]))
    );

    adapter.unregister_application(&app).await.unwrap();
    assert_eq!(fake.bus.calls_to("UnregisterApplication").len(), 1);
}

#[tokio::test]
async fn test_remote_write_updates_value_once() {
    let fake = FakeBluez::new();
    let recorder = Arc::new(Recorder::default());
    let (app, path) = battery_application(&fake, recorder.clone());

    fake.bus.invoke(&write_call(&path, &[42])).unwrap();

    assert_eq!(app.get_char_value(BATTERY_SERVICE, BATTERY_LEVEL).unwrap(), vec![42]);
    assert_eq!(*recorder.updates.lock(), vec![vec![42]]);

    let signals: Vec<_> = fake
        .bus
        .emitted_signals()
        .into_iter()
        .filter(|s| s.path == path && s.member == PROPERTIES_CHANGED)
        .collect();
    assert_eq!(signals.len(), 1);
    let changes = PropertiesChanged::parse(&signals[0].args).unwrap();
    assert_eq!(changes.changed.get("Value"), Some(&Value::Bytes(vec![42])));
}

#[tokio::test]
async fn test_rejected_write_keeps_value() {
    let fake = FakeBluez::new();
    let recorder = Arc::new(Recorder::default());
    let (app, path) = battery_application(&fake, recorder.clone());

    let err = fake.bus.invoke(&write_call(&path, &[1, 2])).unwrap_err();

    assert_eq!(err.name, "org.bluez.Error.InvalidValueLength");
    assert_eq!(app.get_char_value(BATTERY_SERVICE, BATTERY_LEVEL).unwrap(), vec![100]);
    assert!(recorder.updates.lock().is_empty());
    assert!(fake.bus.emitted_signals().is_empty());
}

#[tokio::test]
async fn test_local_notifications_need_subscriber() {
    let fake = FakeBluez::new();
    let (app, path) = battery_application(&fake, Arc::default());

    let err = app
        .notify_char_value(BATTERY_SERVICE, BATTERY_LEVEL, &[99])
        .unwrap_err();
    assert!(matches!(err, Error::InvalidArgument(_)));

    fake.bus
        .invoke(&MethodCall::new(
            BLUEZ_SERVICE,
            path.as_str(),
            GATT_CHARACTERISTIC_INTERFACE,
            "StartNotify",
            vec![],
        ))
        .unwrap();
    assert!(app.is_notifying(BATTERY_SERVICE, BATTERY_LEVEL).unwrap());

    app.notify_char_value(BATTERY_SERVICE, BATTERY_LEVEL, &[99])
        .unwrap();
    let signals = fake.bus.emitted_signals();
    assert_eq!(signals.len(), 1);
    assert_eq!(signals[0].path, path);
}

#[tokio::test]
async fn test_application_uuids_are_validated() {
    let fake = FakeBluez::new();
    let app = Application::new(fake.bus.clone(), APP).unwrap();

    assert!(matches!(
        app.add_service("180f", true),
        Err(Error::InvalidArgument(_))
    ));
    assert!(matches!(
        app.add_characteristic(BATTERY_SERVICE, BATTERY_LEVEL, CharFlags::READ, None),
        Err(Error::InvalidArgument(_))
    ));
    assert!(matches!(
        app.get_char_value(BATTERY_SERVICE, "not-a-uuid"),
        Err(Error::InvalidArgument(_))
    ));
}

#[tokio::test]
async fn test_dropping_application_withdraws_objects() {
    let fake = FakeBluez::new();
    let (app, path) = battery_application(&fake, Arc::default());
    assert!(fake.bus.has_object(&path, GATT_CHARACTERISTIC_INTERFACE));

    drop(app);
    assert!(!fake.bus.has_object(&path, GATT_CHARACTERISTIC_INTERFACE));
    assert!(!fake.bus.has_object(APP, OBJECT_MANAGER_INTERFACE));
}

#[tokio::test]
async fn test_advertising_start_and_stop() {
    let fake = FakeBluez::new();
    let mut adapter = fake.adapter().await;
    let advertisement = Advertisement {
        local_name: Some("thermo".into()),
        ..Default::default()
    };
    let path = advertisement.path.clone();

    adapter.start_advertising(advertisement.clone()).await.unwrap();
    assert!(adapter.is_advertising());
    assert!(fake.bus.has_object(&path, ADVERTISEMENT_INTERFACE));
    let calls = fake.bus.calls_to("RegisterAdvertisement");
    assert_eq!(calls[0].args[0], Value::object_path(path.as_str()));

    let err = adapter.start_advertising(advertisement).await.unwrap_err();
    assert!(matches!(err, Error::InvalidArgument(_)));

    adapter.stop_advertising().await.unwrap();
    assert!(!adapter.is_advertising());
    assert!(!fake.bus.has_object(&path, ADVERTISEMENT_INTERFACE));
    assert_eq!(fake.bus.calls_to("UnregisterAdvertisement").len(), 1);

    // Already stopped.
    adapter.stop_advertising().await.unwrap();
    assert_eq!(fake.bus.calls_to("UnregisterAdvertisement").len(), 1);
}

#[tokio::test]
async fn test_rejected_advertisement_is_withdrawn() {
    let fake = FakeBluez::new();
    fake.fail("RegisterAdvertisement", "org.bluez.Error.NotPermitted");
    let mut adapter = fake.adapter().await;
    let advertisement = Advertisement::default();
    let path = advertisement.path.clone();

    let err = adapter.start_advertising(advertisement).await.unwrap_err();

    assert_eq!(err.bus_name(), Some("org.bluez.Error.NotPermitted"));
    assert!(!adapter.is_advertising());
    assert!(!fake.bus.has_object(&path, ADVERTISEMENT_INTERFACE));
}

struct FixedPasskey(u32);

impl AgentHandler for FixedPasskey {
    fn request_passkey(&self, _device: &str) -> Option<u32> {
        Some(self.0)
    }
}

#[tokio::test]
async fn test_agent_request_starts_bonding() {
    let fake = FakeBluez::new();
    let device = fake.add_device("AA:BB:CC:00:00:20", advertising("AA:BB:CC:00:00:20", -50));
    let mut adapter = fake.adapter().await;
    let mut events = adapter.events();

    adapter
        .register_agent(IoCapability::KeyboardDisplay, Arc::new(FixedPasskey(123456)))
        .await
        .unwrap();
    let agent_path = adapter.config().agent.path.clone();
    assert_eq!(
        fake.bus.calls_to("RegisterAgent")[0].args,
        vec![
            Value::object_path(agent_path.as_str()),
            Value::from("KeyboardDisplay")
        ]
    );
    assert_eq!(fake.bus.calls_to("RequestDefaultAgent").len(), 1);

    let reply = fake
        .bus
        .invoke(&MethodCall::new(
            BLUEZ_SERVICE,
            agent_path.as_str(),
            AGENT_INTERFACE,
            "RequestPasskey",
            vec![Value::object_path(device.as_str())],
        ))
        .unwrap();
    assert_eq!(reply, vec![Value::UInt32(123456)]);

    adapter.dispatch_pending().await;
    assert_eq!(
        adapter.device(&device).unwrap().bonding_state(),
        BondingState::Bonding
    );
    assert_eq!(
        drain(&mut events),
        vec![Event::BondingStateChanged {
            device: device.clone(),
            new_state: BondingState::Bonding,
            old_state: BondingState::None,
            error: None,
        }]
    );

    adapter.unregister_agent().await.unwrap();
    assert!(!fake.bus.has_object(&agent_path, AGENT_INTERFACE));
    assert_eq!(fake.bus.calls_to("UnregisterAgent").len(), 1);
}

#[tokio::test]
async fn test_agent_declines_by_default() {
    struct Declining;
    impl AgentHandler for Declining {}

    let fake = FakeBluez::new();
    let mut adapter = fake.adapter().await;
    adapter
        .register_configured_agent(Arc::new(Declining))
        .await
        .unwrap();
    let agent_path = adapter.config().agent.path.clone();
    assert_eq!(
        fake.bus.calls_to("RegisterAgent")[0].args[1],
        Value::from("KeyboardDisplay")
    );

    let err = fake
        .bus
        .invoke(&MethodCall::new(
            BLUEZ_SERVICE,
            agent_path.as_str(),
            AGENT_INTERFACE,
            "RequestConfirmation",
            vec![Value::object_path("/org/bluez/hci0/dev_00"), Value::UInt32(1234)],
        ))
        .unwrap_err();
    assert_eq!(err.name, "org.bluez.Error.Rejected");

    // Started and failed, both for a device nobody knows.
    assert_eq!(adapter.dispatch_pending().await, 2);
}

fn agent_call(agent: &str, member: &str, args: Vec<Value>) -> MethodCall {
    MethodCall::new(BLUEZ_SERVICE, agent, AGENT_INTERFACE, member, args)
}

type Transition = (String, BondingState, BondingState);

fn bonding(device: &str, old_state: BondingState, new_state: BondingState) -> Transition {
    (device.to_string(), old_state, new_state)
}

/// Bonding transitions with the bus error name they carried.
fn bonding_updates(events: Vec<Event>) -> Vec<(Transition, Option<String>)> {
    events
        .into_iter()
        .filter_map(|e| match e {
            Event::BondingStateChanged {
                device,
                new_state,
                old_state,
                error,
            } => Some((
                (device, old_state, new_state),
                error.and_then(|e| e.bus_name().map(str::to_string)),
            )),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn test_declined_pairing_does_not_block_collection() {
    struct Declining;
    impl AgentHandler for Declining {}

    let fake = FakeBluez::new();
    let (device, _) = fake.add_battery_device("AA:BB:CC:00:00:21", -50);
    let mut adapter = fake.adapter().await;
    adapter
        .register_agent(IoCapability::DisplayYesNo, Arc::new(Declining))
        .await
        .unwrap();
    let agent_path = adapter.config().agent.path.clone();
    let mut events = adapter.events();

    let err = fake
        .bus
        .invoke(&agent_call(
            &agent_path,
            "RequestAuthorization",
            vec![Value::object_path(device.as_str())],
        ))
        .unwrap_err();
    assert_eq!(err.name, "org.bluez.Error.Rejected");
    adapter.dispatch_pending().await;

    assert_eq!(
        adapter.device(&device).unwrap().bonding_state(),
        BondingState::None
    );
    assert_eq!(
        bonding_updates(drain(&mut events)),
        vec![
            (bonding(&device, BondingState::None, BondingState::Bonding), None),
            (
                bonding(&device, BondingState::Bonding, BondingState::None),
                Some("org.bluez.Error.Rejected".to_string())
            ),
        ]
    );

    fake.set_properties(
        &device,
        DEVICE_INTERFACE,
        props([
            ("Connected", Value::Bool(true)),
            ("ServicesResolved", Value::Bool(true)),
        ]),
    );
    adapter.dispatch_pending().await;
    assert_eq!(adapter.device(&device).unwrap().characteristics().count(), 1);
}

#[tokio::test]
async fn test_cancelled_pairing_resumes_collection() {
    let fake = FakeBluez::new();
    let (device, _) = fake.add_battery_device("AA:BB:CC:00:00:22", -50);
    let mut adapter = fake.adapter().await;
    adapter
        .register_agent(IoCapability::KeyboardDisplay, Arc::new(FixedPasskey(4321)))
        .await
        .unwrap();
    let agent_path = adapter.config().agent.path.clone();

    fake.bus
        .invoke(&agent_call(
            &agent_path,
            "RequestPasskey",
            vec![Value::object_path(device.as_str())],
        ))
        .unwrap();
    fake.set_properties(
        &device,
        DEVICE_INTERFACE,
        props([
            ("Connected", Value::Bool(true)),
            ("ServicesResolved", Value::Bool(true)),
        ]),
    );
    adapter.dispatch_pending().await;
    // Held back while bonding.
    assert_eq!(adapter.device(&device).unwrap().characteristics().count(), 0);
    let mut events = adapter.events();

    fake.bus
        .invoke(&agent_call(&agent_path, "Cancel", vec![]))
        .unwrap();
    adapter.dispatch_pending().await;

    let d = adapter.device(&device).unwrap();
    assert_eq!(d.bonding_state(), BondingState::None);
    assert_eq!(d.characteristics().count(), 1);
    let received = drain(&mut events);
    assert!(received.contains(&Event::ServicesResolved {
        device: device.clone()
    }));
    assert_eq!(
        bonding_updates(received),
        vec![(
            bonding(&device, BondingState::Bonding, BondingState::None),
            Some("org.bluez.Error.Canceled".to_string())
        )]
    );
}

#[tokio::test]
async fn test_agent_unregistered_when_not_made_default() {
    let fake = FakeBluez::new();
    fake.fail("RequestDefaultAgent", "org.bluez.Error.AlreadyExists");
    let mut adapter = fake.adapter().await;

    let err = adapter
        .register_agent(IoCapability::NoInputNoOutput, Arc::new(FixedPasskey(1)))
        .await
        .unwrap_err();
    assert_eq!(err.bus_name(), Some("org.bluez.Error.AlreadyExists"));

    let agent_path = adapter.config().agent.path.clone();
    assert_eq!(
        fake.bus.calls_to("UnregisterAgent")[0].args,
        vec![Value::object_path(agent_path.as_str())]
    );
    assert!(!fake.bus.has_object(&agent_path, AGENT_INTERFACE));

    // Nothing left to unregister.
    adapter.unregister_agent().await.unwrap();
    assert_eq!(fake.bus.calls_to("UnregisterAgent").len(), 1);
}
