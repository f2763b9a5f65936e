//! Raw ABI surface of telldus-core
//!
//! Constants, buffer sizes and function-pointer types matching the native
//! C API exactly. Everything here mirrors the documented entry points; the
//! typed wrappers live in [`crate::library`].

use std::os::raw::{c_char, c_int, c_uchar, c_void};

// Device methods (bit flags)
pub const TELLSTICK_TURNON: i32 = 1;
pub const TELLSTICK_TURNOFF: i32 = 2;
pub const TELLSTICK_BELL: i32 = 4;
pub const TELLSTICK_TOGGLE: i32 = 8;
pub const TELLSTICK_DIM: i32 = 16;
pub const TELLSTICK_LEARN: i32 = 32;
pub const TELLSTICK_EXECUTE: i32 = 64;
pub const TELLSTICK_UP: i32 = 128;
pub const TELLSTICK_DOWN: i32 = 256;
pub const TELLSTICK_STOP: i32 = 512;

// Sensor value types (bit flags)
pub const TELLSTICK_TEMPERATURE: i32 = 1;
pub const TELLSTICK_HUMIDITY: i32 = 2;
pub const TELLSTICK_RAINRATE: i32 = 4;
pub const TELLSTICK_RAINTOTAL: i32 = 8;
pub const TELLSTICK_WINDDIRECTION: i32 = 16;
pub const TELLSTICK_WINDAVERAGE: i32 = 32;
pub const TELLSTICK_WINDGUST: i32 = 64;

// Device types
pub const TELLSTICK_TYPE_DEVICE: i32 = 1;
pub const TELLSTICK_TYPE_GROUP: i32 = 2;
pub const TELLSTICK_TYPE_SCENE: i32 = 3;

// Controller types
pub const TELLSTICK_CONTROLLER_TELLSTICK: i32 = 1;
pub const TELLSTICK_CONTROLLER_TELLSTICK_DUO: i32 = 2;
pub const TELLSTICK_CONTROLLER_TELLSTICK_NET: i32 = 3;

// Device change events
pub const TELLSTICK_DEVICE_ADDED: i32 = 1;
pub const TELLSTICK_DEVICE_CHANGED: i32 = 2;
pub const TELLSTICK_DEVICE_REMOVED: i32 = 3;
pub const TELLSTICK_DEVICE_STATE_CHANGED: i32 = 4;

// Device change types
pub const TELLSTICK_CHANGE_NAME: i32 = 1;
pub const TELLSTICK_CHANGE_PROTOCOL: i32 = 2;
pub const TELLSTICK_CHANGE_MODEL: i32 = 3;
pub const TELLSTICK_CHANGE_METHOD: i32 = 4;
pub const TELLSTICK_CHANGE_AVAILABLE: i32 = 5;
pub const TELLSTICK_CHANGE_FIRMWARE: i32 = 6;

/// Out-parameter buffer size for sensor protocol, model and value text.
pub const SENSOR_BUFFER_SIZE: usize = 20;
/// Out-parameter buffer size for controller name and value text.
pub const CONTROLLER_BUFFER_SIZE: usize = 255;

// ---- Entry point signatures ----

/// tdInit / tdClose
pub type SessionFn = unsafe extern "C" fn();
/// tdReleaseString
pub type ReleaseStringFn = unsafe extern "C" fn(*mut c_void);
/// tdGetErrorString
pub type GetErrorStringFn = unsafe extern "C" fn(c_int) -> *mut c_char;

/// tdTurnOn, tdTurnOff, tdBell, tdExecute, tdUp, tdDown, tdStop, tdLearn,
/// tdGetDeviceId, tdGetDeviceType
pub type DeviceIntFn = unsafe extern "C" fn(c_int) -> c_int;
/// tdDim
pub type DimFn = unsafe extern "C" fn(c_int, c_uchar) -> c_int;
/// tdMethods, tdLastSentCommand
pub type MethodQueryFn = unsafe extern "C" fn(c_int, c_int) -> c_int;
/// tdGetName, tdGetProtocol, tdGetModel, tdLastSentValue
pub type DeviceStringFn = unsafe extern "C" fn(c_int) -> *mut c_char;
/// tdSetName, tdSetProtocol, tdSetModel
pub type SetDeviceStringFn = unsafe extern "C" fn(c_int, *const c_char) -> bool;
/// tdGetDeviceParameter
pub type GetDeviceParameterFn =
    unsafe extern "C" fn(c_int, *const c_char, *const c_char) -> *mut c_char;
/// tdSetDeviceParameter
pub type SetDeviceParameterFn =
    unsafe extern "C" fn(c_int, *const c_char, *const c_char) -> bool;
/// tdGetNumberOfDevices, tdAddDevice
pub type PlainIntFn = unsafe extern "C" fn() -> c_int;
/// tdRemoveDevice
pub type RemoveDeviceFn = unsafe extern "C" fn(c_int) -> bool;
/// tdSendRawCommand
pub type SendRawCommandFn = unsafe extern "C" fn(*const c_char, c_int) -> c_int;
/// tdConnectTellStickController / tdDisconnectTellStickController
pub type ControllerLinkFn = unsafe extern "C" fn(c_int, c_int, *const c_char);

/// tdSensor
pub type SensorIterFn = unsafe extern "C" fn(
    *mut c_char,
    c_int,
    *mut c_char,
    c_int,
    *mut c_int,
    *mut c_int,
) -> c_int;
/// tdSensorValue
pub type SensorValueFn = unsafe extern "C" fn(
    *const c_char,
    *const c_char,
    c_int,
    c_int,
    *mut c_char,
    c_int,
    *mut c_int,
) -> c_int;
/// tdController
pub type ControllerIterFn =
    unsafe extern "C" fn(*mut c_int, *mut c_int, *mut c_char, c_int, *mut c_int) -> c_int;
/// tdControllerValue
pub type ControllerValueFn =
    unsafe extern "C" fn(c_int, *const c_char, *mut c_char, c_int) -> c_int;
/// tdSetControllerValue
pub type SetControllerValueFn =
    unsafe extern "C" fn(c_int, *const c_char, *const c_char) -> c_int;
/// tdRemoveController
pub type RemoveControllerFn = unsafe extern "C" fn(c_int) -> c_int;

// ---- Callback signatures ----
//
// Every callback ends in (int callbackId, void* context); telldus-core is
// handed a NULL context at registration time, so the trailing pointer is
// always NULL on delivery.

/// (deviceId, method, data, callbackId, context)
pub type DeviceEventFn =
    unsafe extern "C" fn(c_int, c_int, *const c_char, c_int, *mut c_void);
/// (deviceId, event, changeType, callbackId, context)
pub type DeviceChangeEventFn =
    unsafe extern "C" fn(c_int, c_int, c_int, c_int, *mut c_void);
/// (data, controllerId, callbackId, context)
pub type RawDeviceEventFn = unsafe extern "C" fn(*const c_char, c_int, c_int, *mut c_void);
/// (protocol, model, id, dataType, value, timestamp, callbackId, context)
pub type SensorEventFn = unsafe extern "C" fn(
    *const c_char,
    *const c_char,
    c_int,
    c_int,
    *const c_char,
    c_int,
    c_int,
    *mut c_void,
);
/// (controllerId, event, changeType, newValue, callbackId, context)
pub type ControllerEventFn =
    unsafe extern "C" fn(c_int, c_int, c_int, *const c_char, c_int, *mut c_void);

/// tdRegisterDeviceEvent
pub type RegisterDeviceEventFn = unsafe extern "C" fn(DeviceEventFn, *mut c_void) -> c_int;
/// tdRegisterDeviceChangeEvent
pub type RegisterDeviceChangeEventFn =
    unsafe extern "C" fn(DeviceChangeEventFn, *mut c_void) -> c_int;
/// tdRegisterRawDeviceEvent
pub type RegisterRawDeviceEventFn =
    unsafe extern "C" fn(RawDeviceEventFn, *mut c_void) -> c_int;
/// tdRegisterSensorEvent
pub type RegisterSensorEventFn = unsafe extern "C" fn(SensorEventFn, *mut c_void) -> c_int;
/// tdRegisterControllerEvent
pub type RegisterControllerEventFn =
    unsafe extern "C" fn(ControllerEventFn, *mut c_void) -> c_int;
/// tdUnregisterCallback
pub type UnregisterCallbackFn = unsafe extern "C" fn(c_int) -> c_int;
