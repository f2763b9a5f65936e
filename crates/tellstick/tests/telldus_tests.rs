//! Integration tests for the high-level API, driven by the in-process fake
//! of the native library.

use tellstick::ffi::*;
use tellstick::{ErrorCode, TellStick, TelldusError};
use tellstick_core::mock::{MockController, MockCore, MockDevice, MockSensor};

fn hub(mock: &MockCore) -> TellStick {
    TellStick::from_library(mock.open().expect("open mock library"))
}

#[test]
fn test_devices_are_enumerated_in_registry_order() {
    let mock = MockCore::activate();
    mock.add_device(MockDevice::new(1, "hallway"));
    mock.add_device(MockDevice::new(3, "porch"));
    mock.add_device(MockDevice::new(7, "garage"));

    let tellstick = hub(&mock);
    let devices = tellstick.devices().unwrap();

    let ids: Vec<i32> = devices.iter().map(|d| d.id()).collect();
    assert_eq!(ids, vec![1, 3, 7]);
    assert_eq!(devices[1].name().unwrap(), "porch");
}

#[test]
fn test_device_accessors_roundtrip() {
    let mock = MockCore::activate();
    mock.add_device(
        MockDevice::new(1, "lamp")
            .with_protocol("arctech")
            .with_model("codeswitch")
            .with_type(TELLSTICK_TYPE_DEVICE),
    );

    let tellstick = hub(&mock);
    let device = tellstick.devices().unwrap().remove(0);

    assert_eq!(device.name().unwrap(), "lamp");
    assert_eq!(device.protocol().unwrap(), "arctech");
    assert_eq!(device.model().unwrap(), "codeswitch");
    assert_eq!(device.device_type().unwrap(), TELLSTICK_TYPE_DEVICE);

    device.set_name("floor lamp").unwrap();
    device.set_model("selflearning-switch").unwrap();
    assert_eq!(device.name().unwrap(), "floor lamp");
    assert_eq!(device.model().unwrap(), "selflearning-switch");
}

#[test]
fn test_device_parameters_distinguish_unset() {
    let mock = MockCore::activate();
    mock.add_device(
        MockDevice::new(1, "lamp")
            .with_parameter("house", "A")
            .with_parameter("unit", "2"),
    );

    let tellstick = hub(&mock);
    let device = tellstick.devices().unwrap().remove(0);

    assert_eq!(device.parameter("house").unwrap(), Some("A".to_string()));
    assert_eq!(device.parameter("fade").unwrap(), None);

    device.set_parameter("code", "1101").unwrap();
    let parameters = device.parameters().unwrap();
    assert_eq!(parameters.len(), 3);
    assert_eq!(parameters["house"], "A");
    assert_eq!(parameters["unit"], "2");
    assert_eq!(parameters["code"], "1101");
}

#[test]
fn test_device_commands_and_state_queries() {
    let mock = MockCore::activate();
    mock.add_device(MockDevice::new(5, "dimmer").with_methods(
        TELLSTICK_TURNON | TELLSTICK_TURNOFF | TELLSTICK_DIM,
    ));

    let tellstick = hub(&mock);
    let device = tellstick.devices().unwrap().remove(0);

    device.turn_on().unwrap();
    device.dim(128).unwrap();

    assert_eq!(
        mock.actions(),
        vec![(5, "tdTurnOn"), (5, "tdDim")]
    );
    assert_eq!(
        device.methods(TELLSTICK_TURNON | TELLSTICK_BELL).unwrap(),
        TELLSTICK_TURNON
    );
    assert_eq!(
        device.last_sent_command(TELLSTICK_TURNON | TELLSTICK_DIM).unwrap(),
        TELLSTICK_DIM
    );
    assert_eq!(device.last_sent_value().unwrap(), "128");
}

#[test]
fn test_remove_device() {
    let mock = MockCore::activate();
    let tellstick = hub(&mock);

    let device = tellstick.add_device("ghost", "arctech", None, &[]).unwrap();
    let id = device.id();
    assert_eq!(mock.device_count(), 1);

    device.remove().unwrap();
    assert_eq!(mock.device_count(), 0);
    assert!(tellstick.devices().unwrap().is_empty());

    // Updating the removed device now reports device-not-found.
    let err = tellstick.library().set_device_name(id, "zombie").unwrap_err();
    assert_eq!(err.error_code(), Some(ErrorCode::DeviceNotFound));
}

#[test]
fn test_add_device_configures_everything() {
    let mock = MockCore::activate();
    let tellstick = hub(&mock);

    let device = tellstick
        .add_device(
            "new lamp",
            "arctech",
            Some("selflearning-dimmer"),
            &[("house", "A"), ("unit", "2")],
        )
        .unwrap();

    let stored = mock.device(device.id()).unwrap();
    assert_eq!(stored.name, "new lamp");
    assert_eq!(stored.protocol, "arctech");
    assert_eq!(stored.model, "selflearning-dimmer");
    assert_eq!(stored.parameters["house"], "A");
    assert_eq!(stored.parameters["unit"], "2");
}

#[test]
fn test_add_device_rolls_back_on_failure() {
    let mock = MockCore::activate();
    mock.force_error("tdSetProtocol", ErrorCode::DeviceNotFound.as_raw());
    let tellstick = hub(&mock);

    let err = tellstick
        .add_device("doomed", "arctech", None, &[])
        .unwrap_err();
    assert_eq!(err.error_code(), Some(ErrorCode::DeviceNotFound));

    // The half-configured device was removed again.
    assert_eq!(mock.device_count(), 0);
}

#[test]
fn test_sensors_expose_typed_readings() {
    let mock = MockCore::activate();
    mock.add_sensor(
        MockSensor::new("fineoffset", "temperaturehumidity", 11)
            .with_value(TELLSTICK_TEMPERATURE, "21.5", 1_400_000_000)
            .with_value(TELLSTICK_HUMIDITY, "45", 1_400_000_000),
    );
    mock.add_sensor(
        MockSensor::new("oregon", "wind", 12).with_value(TELLSTICK_WINDGUST, "7.3", 1_400_000_100),
    );

    let tellstick = hub(&mock);
    let sensors = tellstick.sensors().unwrap();
    assert_eq!(sensors.len(), 2);

    let climate = &sensors[0];
    assert_eq!(climate.protocol(), "fineoffset");
    assert!(climate.has_value(TELLSTICK_TEMPERATURE));
    assert!(climate.has_value(TELLSTICK_HUMIDITY));
    assert!(!climate.has_value(TELLSTICK_WINDGUST));

    let temperature = climate.temperature().unwrap();
    assert_eq!(temperature.value, "21.5");
    assert_eq!(temperature.timestamp, 1_400_000_000);
    assert_eq!(climate.humidity().unwrap().value, "45");

    let wind = &sensors[1];
    assert_eq!(wind.wind_gust().unwrap().value, "7.3");
    // Asking for a reading the sensor never produced is an error.
    assert!(wind.temperature().is_err());
}

#[test]
fn test_sensor_enumeration_propagates_real_failures() {
    let mock = MockCore::activate();
    mock.force_error("tdSensor", ErrorCode::ConnectingService.as_raw());
    let tellstick = hub(&mock);

    let err = tellstick.sensors().unwrap_err();
    assert_eq!(err.error_code(), Some(ErrorCode::ConnectingService));
}

#[test]
fn test_controllers_expose_typed_properties() {
    let mock = MockCore::activate();
    mock.add_controller(
        MockController::new(2, TELLSTICK_CONTROLLER_TELLSTICK_DUO, "duo")
            .with_value("firmware", "11")
            .with_value("serial", "A600FEDC"),
    );
    mock.add_controller(
        MockController::new(3, TELLSTICK_CONTROLLER_TELLSTICK, "basic").with_available(false),
    );

    let tellstick = hub(&mock);
    let mut controllers = tellstick.controllers().unwrap();
    assert_eq!(controllers.len(), 2);

    let duo = &mut controllers[0];
    assert_eq!(duo.name(), "duo");
    assert_eq!(duo.controller_type(), TELLSTICK_CONTROLLER_TELLSTICK_DUO);
    assert!(duo.is_available());
    assert_eq!(duo.firmware().unwrap(), Some("11".to_string()));
    assert_eq!(duo.serial().unwrap(), Some("A600FEDC".to_string()));
    assert_eq!(duo.value("name").unwrap(), Some("duo".to_string()));
    // Properties the controller does not know read as absent.
    assert_eq!(duo.value("uptime").unwrap(), None);
    // Only the name is writable.
    assert!(!duo.set_value("firmware", "12").unwrap());
    duo.set_name("front door stick").unwrap();
    assert_eq!(duo.name(), "front door stick");

    assert!(!controllers[1].is_available());
}

#[test]
fn test_remove_controller() {
    let mock = MockCore::activate();
    mock.add_controller(MockController::new(4, TELLSTICK_CONTROLLER_TELLSTICK, "old"));
    let tellstick = hub(&mock);

    let controller = tellstick.controllers().unwrap().remove(0);
    controller.remove().unwrap();
    assert!(tellstick.controllers().unwrap().is_empty());
}

#[test]
fn test_raw_command_and_controller_links() {
    let mock = MockCore::activate();
    let tellstick = hub(&mock);

    tellstick.send_raw_command("S$k$k$kk$$kk$$kk$$k+").unwrap();
    tellstick.connect_controller(0x1781, 0x0c30, "A600FEDC").unwrap();
    tellstick.disconnect_controller(0x1781, 0x0c30, "A600FEDC").unwrap();

    assert_eq!(mock.last_raw_command().unwrap(), "S$k$k$kk$$kk$$kk$$k+");
    assert_eq!(mock.connected_controllers().len(), 1);
    assert_eq!(mock.disconnected_controllers().len(), 1);
}

#[test]
fn test_missing_entry_point_is_reported_not_fatal() {
    let mock = MockCore::activate();
    mock.omit_symbol("tdSendRawCommand");
    let tellstick = hub(&mock);

    let err = tellstick.send_raw_command("anything").unwrap_err();
    assert!(matches!(err, TelldusError::NotSupported("tdSendRawCommand")));
}
