//! Event payloads delivered to registered callbacks
//!
//! Each payload carries the positional arguments of the native callback in
//! order, including the registration id; the trailing context pointer
//! (always NULL) is dropped before delivery.

/// Native-assigned registration id returned by the register calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallbackId(pub i32);

/// A device event (command sent to or observed for a device).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceEvent {
    pub device_id: i32,
    /// TELLSTICK_* method constant.
    pub method: i32,
    /// Method payload, e.g. the dim level as text.
    pub data: String,
    pub callback_id: CallbackId,
}

/// A change to the device registry (added/changed/removed).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceChangeEvent {
    pub device_id: i32,
    /// TELLSTICK_DEVICE_* change event constant.
    pub event: i32,
    /// TELLSTICK_CHANGE_* detail constant.
    pub change_type: i32,
    pub callback_id: CallbackId,
}

/// Raw data received by a controller, before protocol decoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawDeviceEvent {
    pub data: String,
    pub controller_id: i32,
    pub callback_id: CallbackId,
}

/// A sensor reading reported by the native library.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SensorEvent {
    pub protocol: String,
    pub model: String,
    pub sensor_id: i32,
    /// TELLSTICK_* sensor value type constant.
    pub datatype: i32,
    pub value: String,
    /// Unix timestamp of the reading.
    pub timestamp: i32,
    pub callback_id: CallbackId,
}

/// A controller state change (connected, disconnected, value changed).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerEvent {
    pub controller_id: i32,
    /// TELLSTICK_DEVICE_* change event constant.
    pub event: i32,
    /// TELLSTICK_CHANGE_* detail constant.
    pub change_type: i32,
    pub new_value: String,
    pub callback_id: CallbackId,
}
