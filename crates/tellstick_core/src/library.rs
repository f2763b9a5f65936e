//! Native library lifecycle and call marshaling
//!
//! Loads telldus-core, resolves its entry points into a [`FunctionTable`]
//! and exposes a typed wrapper per native call. The loaded module is a
//! process-wide resource: every [`CoreLibrary`] handle shares one native
//! session, reference counted so the session is initialized exactly once
//! and closed when the last handle is released.

use crate::callback;
use crate::dispatch::EventDispatcher;
use crate::error::{ErrorCode, Result, TelldusError};
use crate::events::{
    CallbackId, ControllerEvent, DeviceChangeEvent, DeviceEvent, RawDeviceEvent, SensorEvent,
};
use crate::ffi::*;
use crate::marshal;
use parking_lot::Mutex;
use std::ffi::CStr;
use std::os::raw::{c_char, c_int};
use std::sync::Arc;

/// Resolved entry points of the loaded module.
///
/// Every known entry point gets a slot; symbols missing from older
/// telldus-core builds stay unresolved and surface as `NotSupported` when
/// called, never as a bind-time failure.
pub(crate) struct FunctionTable {
    pub(crate) init: Option<SessionFn>,
    pub(crate) close: Option<SessionFn>,
    pub(crate) release_string: Option<ReleaseStringFn>,
    pub(crate) get_error_string: Option<GetErrorStringFn>,

    pub(crate) register_device_event: Option<RegisterDeviceEventFn>,
    pub(crate) register_device_change_event: Option<RegisterDeviceChangeEventFn>,
    pub(crate) register_raw_device_event: Option<RegisterRawDeviceEventFn>,
    pub(crate) register_sensor_event: Option<RegisterSensorEventFn>,
    pub(crate) register_controller_event: Option<RegisterControllerEventFn>,
    pub(crate) unregister_callback: Option<UnregisterCallbackFn>,

    pub(crate) turn_on: Option<DeviceIntFn>,
    pub(crate) turn_off: Option<DeviceIntFn>,
    pub(crate) bell: Option<DeviceIntFn>,
    pub(crate) dim: Option<DimFn>,
    pub(crate) execute: Option<DeviceIntFn>,
    pub(crate) up: Option<DeviceIntFn>,
    pub(crate) down: Option<DeviceIntFn>,
    pub(crate) stop: Option<DeviceIntFn>,
    pub(crate) learn: Option<DeviceIntFn>,
    pub(crate) methods: Option<MethodQueryFn>,
    pub(crate) last_sent_command: Option<MethodQueryFn>,
    pub(crate) last_sent_value: Option<DeviceStringFn>,

    pub(crate) get_number_of_devices: Option<PlainIntFn>,
    pub(crate) get_device_id: Option<DeviceIntFn>,
    pub(crate) get_device_type: Option<DeviceIntFn>,

    pub(crate) get_name: Option<DeviceStringFn>,
    pub(crate) set_name: Option<SetDeviceStringFn>,
    pub(crate) get_protocol: Option<DeviceStringFn>,
    pub(crate) set_protocol: Option<SetDeviceStringFn>,
    pub(crate) get_model: Option<DeviceStringFn>,
    pub(crate) set_model: Option<SetDeviceStringFn>,

    pub(crate) get_device_parameter: Option<GetDeviceParameterFn>,
    pub(crate) set_device_parameter: Option<SetDeviceParameterFn>,

    pub(crate) add_device: Option<PlainIntFn>,
    pub(crate) remove_device: Option<RemoveDeviceFn>,

    pub(crate) send_raw_command: Option<SendRawCommandFn>,

    pub(crate) connect_controller: Option<ControllerLinkFn>,
    pub(crate) disconnect_controller: Option<ControllerLinkFn>,

    pub(crate) sensor: Option<SensorIterFn>,
    pub(crate) sensor_value: Option<SensorValueFn>,

    pub(crate) controller: Option<ControllerIterFn>,
    pub(crate) controller_value: Option<ControllerValueFn>,
    pub(crate) set_controller_value: Option<SetControllerValueFn>,
    pub(crate) remove_controller: Option<RemoveControllerFn>,
}

/// Copy a typed fn pointer out of the module, or None if the symbol is
/// absent.
unsafe fn lookup<T: Copy>(module: &libloading::Library, name: &[u8]) -> Option<T> {
    module.get::<T>(name).ok().map(|symbol| *symbol)
}

impl FunctionTable {
    /// Resolve all entry points against a loaded module, once per load.
    pub(crate) unsafe fn bind(module: &libloading::Library) -> Self {
        Self {
            init: lookup(module, b"tdInit\0"),
            close: lookup(module, b"tdClose\0"),
            release_string: lookup(module, b"tdReleaseString\0"),
            get_error_string: lookup(module, b"tdGetErrorString\0"),

            register_device_event: lookup(module, b"tdRegisterDeviceEvent\0"),
            register_device_change_event: lookup(module, b"tdRegisterDeviceChangeEvent\0"),
            register_raw_device_event: lookup(module, b"tdRegisterRawDeviceEvent\0"),
            register_sensor_event: lookup(module, b"tdRegisterSensorEvent\0"),
            register_controller_event: lookup(module, b"tdRegisterControllerEvent\0"),
            unregister_callback: lookup(module, b"tdUnregisterCallback\0"),

            turn_on: lookup(module, b"tdTurnOn\0"),
            turn_off: lookup(module, b"tdTurnOff\0"),
            bell: lookup(module, b"tdBell\0"),
            dim: lookup(module, b"tdDim\0"),
            execute: lookup(module, b"tdExecute\0"),
            up: lookup(module, b"tdUp\0"),
            down: lookup(module, b"tdDown\0"),
            stop: lookup(module, b"tdStop\0"),
            learn: lookup(module, b"tdLearn\0"),
            methods: lookup(module, b"tdMethods\0"),
            last_sent_command: lookup(module, b"tdLastSentCommand\0"),
            last_sent_value: lookup(module, b"tdLastSentValue\0"),

            get_number_of_devices: lookup(module, b"tdGetNumberOfDevices\0"),
            get_device_id: lookup(module, b"tdGetDeviceId\0"),
            get_device_type: lookup(module, b"tdGetDeviceType\0"),

            get_name: lookup(module, b"tdGetName\0"),
            set_name: lookup(module, b"tdSetName\0"),
            get_protocol: lookup(module, b"tdGetProtocol\0"),
            set_protocol: lookup(module, b"tdSetProtocol\0"),
            get_model: lookup(module, b"tdGetModel\0"),
            set_model: lookup(module, b"tdSetModel\0"),

            get_device_parameter: lookup(module, b"tdGetDeviceParameter\0"),
            set_device_parameter: lookup(module, b"tdSetDeviceParameter\0"),

            add_device: lookup(module, b"tdAddDevice\0"),
            remove_device: lookup(module, b"tdRemoveDevice\0"),

            send_raw_command: lookup(module, b"tdSendRawCommand\0"),

            connect_controller: lookup(module, b"tdConnectTellStickController\0"),
            disconnect_controller: lookup(module, b"tdDisconnectTellStickController\0"),

            sensor: lookup(module, b"tdSensor\0"),
            sensor_value: lookup(module, b"tdSensorValue\0"),

            controller: lookup(module, b"tdController\0"),
            controller_value: lookup(module, b"tdControllerValue\0"),
            set_controller_value: lookup(module, b"tdSetControllerValue\0"),
            remove_controller: lookup(module, b"tdRemoveController\0"),
        }
    }

    /// telldus-core builds that predate tdController (v2.1.2) cannot be
    /// re-initialized after tdClose, so teardown skips the close call for
    /// them.
    pub(crate) fn supports_reinit(&self) -> bool {
        self.controller.is_some()
    }
}

/// The loaded native session shared by all handles.
pub(crate) struct NativeCore {
    /// Keeps the module mapped for as long as any fn pointer may run.
    _module: Option<libloading::Library>,
    pub(crate) fns: FunctionTable,
}

struct SharedCore {
    core: Option<Arc<NativeCore>>,
    refcount: usize,
}

// Invariant: core is Some iff refcount > 0.
static SHARED: Mutex<SharedCore> = Mutex::new(SharedCore {
    core: None,
    refcount: 0,
});

#[cfg(any(test, feature = "mock"))]
pub(crate) fn shared_refcount() -> usize {
    SHARED.lock().refcount
}

/// Where to obtain the native module from.
pub(crate) enum ModuleSource {
    /// Load through the dynamic linker, by explicit name/path or the
    /// platform default.
    Native(Option<String>),
    /// Use a pre-built function table (the in-process mock).
    #[cfg(any(test, feature = "mock"))]
    Table(fn() -> FunctionTable),
}

/// Default module names tried in order on the current platform.
fn default_library_candidates() -> Vec<String> {
    if cfg!(target_os = "windows") {
        vec!["TelldusCore.dll".to_string()]
    } else if cfg!(target_os = "macos") {
        vec![
            "libtelldus-core.dylib".to_string(),
            "/Library/Frameworks/TelldusCore.framework/TelldusCore".to_string(),
        ]
    } else {
        vec!["libtelldus-core.so.2".to_string()]
    }
}

fn load_native(name: Option<&str>) -> Result<(libloading::Library, String)> {
    let candidates = match name {
        Some(name) => vec![name.to_string()],
        None => default_library_candidates(),
    };

    let mut last_error = String::new();
    for candidate in &candidates {
        match unsafe { libloading::Library::new(candidate) } {
            Ok(module) => return Ok((module, candidate.clone())),
            Err(e) => last_error = e.to_string(),
        }
    }
    Err(TelldusError::load(candidates.join(", "), last_error))
}

/// Options for [`CoreLibrary::open_with`].
#[derive(Default)]
pub struct OpenOptions {
    /// Explicit module name or path; platform default when unset.
    pub library_name: Option<String>,
    /// Dispatch strategy to install for this library session. Rejected if
    /// another strategy is already active.
    pub dispatcher: Option<Arc<dyn EventDispatcher>>,
}

/// A discovered sensor (one step of the native sensor iteration).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SensorInfo {
    pub protocol: String,
    pub model: String,
    pub id: i32,
    /// Bit mask of TELLSTICK_* sensor value types the sensor reports.
    pub datatypes: i32,
}

/// A single sensor reading.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SensorValue {
    pub value: String,
    /// Unix timestamp of the reading, as reported by the native library.
    pub timestamp: i32,
}

/// A discovered controller (one step of the native controller iteration).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerInfo {
    pub id: i32,
    pub controller_type: i32,
    pub name: String,
    pub available: bool,
}

/// Handle to the shared telldus-core session.
///
/// The underlying library is loaded and initialized when the first handle
/// opens it; further handles share the same session. Dropping the last
/// handle unregisters any remaining callbacks, closes the native session
/// and unloads it, after which a fresh `open` starts over.
pub struct CoreLibrary {
    core: Arc<NativeCore>,
}

impl std::fmt::Debug for CoreLibrary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoreLibrary").finish_non_exhaustive()
    }
}

impl CoreLibrary {
    /// Open the platform-default telldus-core module.
    pub fn open() -> Result<Self> {
        Self::open_with(OpenOptions::default())
    }

    /// Open with an explicit module name/path and/or a dispatch strategy.
    pub fn open_with(options: OpenOptions) -> Result<Self> {
        Self::open_internal(
            ModuleSource::Native(options.library_name),
            options.dispatcher,
        )
    }

    pub(crate) fn open_internal(
        source: ModuleSource,
        dispatcher: Option<Arc<dyn EventDispatcher>>,
    ) -> Result<Self> {
        let mut shared = SHARED.lock();

        // Validate before touching any state so a rejected open has no
        // side effects.
        if dispatcher.is_some() && callback::dispatcher_active() {
            return Err(TelldusError::DispatcherAlreadyInstalled);
        }

        let core = match shared.core.clone() {
            Some(core) => core,
            None => {
                debug_assert_eq!(shared.refcount, 0);
                let (module, fns) = match source {
                    ModuleSource::Native(name) => {
                        let (module, loaded_from) = load_native(name.as_deref())?;
                        let fns = unsafe { FunctionTable::bind(&module) };
                        log::info!("loaded telldus-core from '{}'", loaded_from);
                        (Some(module), fns)
                    }
                    #[cfg(any(test, feature = "mock"))]
                    ModuleSource::Table(build) => (None, build()),
                };

                let init = fns
                    .init
                    .ok_or(TelldusError::NotSupported("tdInit"))?;
                // Exactly once per generation, between load and close.
                unsafe { init() };

                let core = Arc::new(NativeCore { _module: module, fns });
                shared.core = Some(core.clone());
                core
            }
        };

        if let Some(dispatcher) = dispatcher {
            callback::install_dispatcher(dispatcher)?;
        }
        shared.refcount += 1;
        Ok(Self { core })
    }

    pub(crate) fn fns(&self) -> &FunctionTable {
        &self.core.fns
    }

    // ---- Error checking policies ----

    /// Integer-returning calls: any negative result is an error carrying
    /// that exact code.
    pub(crate) fn check_int(&self, result: c_int) -> Result<c_int> {
        if result < 0 {
            Err(self.call_error(result))
        } else {
            Ok(result)
        }
    }

    /// Boolean-returning calls: the native API reports no distinct code, so
    /// a false result maps to the canonical device-not-found error.
    fn check_bool(&self, result: bool) -> Result<()> {
        if result {
            Ok(())
        } else {
            Err(self.call_error(ErrorCode::DeviceNotFound.as_raw()))
        }
    }

    pub(crate) fn call_error(&self, code: c_int) -> TelldusError {
        TelldusError::call(code, self.error_string(code))
    }

    /// Human-readable description of a native error code.
    pub fn error_string(&self, code: i32) -> String {
        let Some(f) = self.core.fns.get_error_string else {
            return "Unknown error".to_string();
        };
        let text = unsafe { self.take_string(f(code)) };
        if text.is_empty() {
            "Unknown error".to_string()
        } else {
            text
        }
    }

    /// Copy a native-owned string and return the allocation through
    /// tdReleaseString. Every non-null result is released exactly once; a
    /// NULL result decodes to an empty string with no release call.
    unsafe fn take_string(&self, ptr: *mut c_char) -> String {
        if ptr.is_null() {
            return String::new();
        }
        let text = marshal::decode_bytes(CStr::from_ptr(ptr).to_bytes());
        if let Some(release) = self.core.fns.release_string {
            release(ptr.cast());
        }
        text
    }

    // ---- Device commands ----

    /// tdTurnOn
    pub fn turn_on(&self, device_id: i32) -> Result<()> {
        let f = require(self.core.fns.turn_on, "tdTurnOn")?;
        self.check_int(unsafe { f(device_id) }).map(drop)
    }

    /// tdTurnOff
    pub fn turn_off(&self, device_id: i32) -> Result<()> {
        let f = require(self.core.fns.turn_off, "tdTurnOff")?;
        self.check_int(unsafe { f(device_id) }).map(drop)
    }

    /// tdBell
    pub fn bell(&self, device_id: i32) -> Result<()> {
        let f = require(self.core.fns.bell, "tdBell")?;
        self.check_int(unsafe { f(device_id) }).map(drop)
    }

    /// tdDim
    pub fn dim(&self, device_id: i32, level: u8) -> Result<()> {
        let f = require(self.core.fns.dim, "tdDim")?;
        self.check_int(unsafe { f(device_id, level) }).map(drop)
    }

    /// tdExecute
    pub fn execute(&self, device_id: i32) -> Result<()> {
        let f = require(self.core.fns.execute, "tdExecute")?;
        self.check_int(unsafe { f(device_id) }).map(drop)
    }

    /// tdUp
    pub fn up(&self, device_id: i32) -> Result<()> {
        let f = require(self.core.fns.up, "tdUp")?;
        self.check_int(unsafe { f(device_id) }).map(drop)
    }

    /// tdDown
    pub fn down(&self, device_id: i32) -> Result<()> {
        let f = require(self.core.fns.down, "tdDown")?;
        self.check_int(unsafe { f(device_id) }).map(drop)
    }

    /// tdStop
    pub fn stop(&self, device_id: i32) -> Result<()> {
        let f = require(self.core.fns.stop, "tdStop")?;
        self.check_int(unsafe { f(device_id) }).map(drop)
    }

    /// tdLearn
    pub fn learn(&self, device_id: i32) -> Result<()> {
        let f = require(self.core.fns.learn, "tdLearn")?;
        self.check_int(unsafe { f(device_id) }).map(drop)
    }

    /// tdMethods: the subset of `methods_supported` the device implements.
    pub fn methods(&self, device_id: i32, methods_supported: i32) -> Result<i32> {
        let f = require(self.core.fns.methods, "tdMethods")?;
        self.check_int(unsafe { f(device_id, methods_supported) })
    }

    /// tdLastSentCommand
    pub fn last_sent_command(&self, device_id: i32, methods_supported: i32) -> Result<i32> {
        let f = require(self.core.fns.last_sent_command, "tdLastSentCommand")?;
        self.check_int(unsafe { f(device_id, methods_supported) })
    }

    /// tdLastSentValue
    pub fn last_sent_value(&self, device_id: i32) -> Result<String> {
        let f = require(self.core.fns.last_sent_value, "tdLastSentValue")?;
        Ok(unsafe { self.take_string(f(device_id)) })
    }

    // ---- Device registry ----

    /// tdGetNumberOfDevices
    pub fn number_of_devices(&self) -> Result<i32> {
        let f = require(self.core.fns.get_number_of_devices, "tdGetNumberOfDevices")?;
        self.check_int(unsafe { f() })
    }

    /// tdGetDeviceId: device id at `index` in the native device list.
    pub fn device_id(&self, index: i32) -> Result<i32> {
        let f = require(self.core.fns.get_device_id, "tdGetDeviceId")?;
        self.check_int(unsafe { f(index) })
    }

    /// tdGetDeviceType
    pub fn device_type(&self, device_id: i32) -> Result<i32> {
        let f = require(self.core.fns.get_device_type, "tdGetDeviceType")?;
        self.check_int(unsafe { f(device_id) })
    }

    /// tdGetName
    pub fn device_name(&self, device_id: i32) -> Result<String> {
        let f = require(self.core.fns.get_name, "tdGetName")?;
        Ok(unsafe { self.take_string(f(device_id)) })
    }

    /// tdSetName
    pub fn set_device_name(&self, device_id: i32, name: &str) -> Result<()> {
        let f = require(self.core.fns.set_name, "tdSetName")?;
        let name = marshal::encode_str(name)?;
        self.check_bool(unsafe { f(device_id, name.as_ptr()) })
    }

    /// tdGetProtocol
    pub fn device_protocol(&self, device_id: i32) -> Result<String> {
        let f = require(self.core.fns.get_protocol, "tdGetProtocol")?;
        Ok(unsafe { self.take_string(f(device_id)) })
    }

    /// tdSetProtocol
    pub fn set_device_protocol(&self, device_id: i32, protocol: &str) -> Result<()> {
        let f = require(self.core.fns.set_protocol, "tdSetProtocol")?;
        let protocol = marshal::encode_str(protocol)?;
        self.check_bool(unsafe { f(device_id, protocol.as_ptr()) })
    }

    /// tdGetModel
    pub fn device_model(&self, device_id: i32) -> Result<String> {
        let f = require(self.core.fns.get_model, "tdGetModel")?;
        Ok(unsafe { self.take_string(f(device_id)) })
    }

    /// tdSetModel
    pub fn set_device_model(&self, device_id: i32, model: &str) -> Result<()> {
        let f = require(self.core.fns.set_model, "tdSetModel")?;
        let model = marshal::encode_str(model)?;
        self.check_bool(unsafe { f(device_id, model.as_ptr()) })
    }

    /// tdGetDeviceParameter: returns `default_value` when the parameter is
    /// unset.
    pub fn device_parameter(
        &self,
        device_id: i32,
        name: &str,
        default_value: &str,
    ) -> Result<String> {
        let f = require(self.core.fns.get_device_parameter, "tdGetDeviceParameter")?;
        let name = marshal::encode_str(name)?;
        let default_value = marshal::encode_str(default_value)?;
        Ok(unsafe { self.take_string(f(device_id, name.as_ptr(), default_value.as_ptr())) })
    }

    /// tdSetDeviceParameter
    pub fn set_device_parameter(&self, device_id: i32, name: &str, value: &str) -> Result<()> {
        let f = require(self.core.fns.set_device_parameter, "tdSetDeviceParameter")?;
        let name = marshal::encode_str(name)?;
        let value = marshal::encode_str(value)?;
        self.check_bool(unsafe { f(device_id, name.as_ptr(), value.as_ptr()) })
    }

    /// tdAddDevice: returns the new device id.
    pub fn add_device(&self) -> Result<i32> {
        let f = require(self.core.fns.add_device, "tdAddDevice")?;
        self.check_int(unsafe { f() })
    }

    /// tdRemoveDevice
    pub fn remove_device(&self, device_id: i32) -> Result<()> {
        let f = require(self.core.fns.remove_device, "tdRemoveDevice")?;
        self.check_bool(unsafe { f(device_id) })
    }

    /// tdSendRawCommand
    pub fn send_raw_command(&self, command: &str, reserved: i32) -> Result<()> {
        let f = require(self.core.fns.send_raw_command, "tdSendRawCommand")?;
        let command = marshal::encode_str(command)?;
        self.check_int(unsafe { f(command.as_ptr(), reserved) }).map(drop)
    }

    /// tdConnectTellStickController
    pub fn connect_controller(&self, vid: i32, pid: i32, serial: &str) -> Result<()> {
        let f = require(self.core.fns.connect_controller, "tdConnectTellStickController")?;
        let serial = marshal::encode_str(serial)?;
        unsafe { f(vid, pid, serial.as_ptr()) };
        Ok(())
    }

    /// tdDisconnectTellStickController
    pub fn disconnect_controller(&self, vid: i32, pid: i32, serial: &str) -> Result<()> {
        let f = require(
            self.core.fns.disconnect_controller,
            "tdDisconnectTellStickController",
        )?;
        let serial = marshal::encode_str(serial)?;
        unsafe { f(vid, pid, serial.as_ptr()) };
        Ok(())
    }

    // ---- Sensor / controller enumeration ----

    /// tdSensor: next sensor in the native iteration.
    ///
    /// The end of the sequence is reported as a `Call` error with the
    /// device-not-found code; any other negative code is a real failure.
    pub fn next_sensor(&self) -> Result<SensorInfo> {
        let f = require(self.core.fns.sensor, "tdSensor")?;
        let mut protocol = [0u8; SENSOR_BUFFER_SIZE];
        let mut model = [0u8; SENSOR_BUFFER_SIZE];
        let mut id: c_int = 0;
        let mut datatypes: c_int = 0;

        let result = unsafe {
            f(
                protocol.as_mut_ptr().cast(),
                protocol.len() as c_int,
                model.as_mut_ptr().cast(),
                model.len() as c_int,
                &mut id,
                &mut datatypes,
            )
        };
        self.check_int(result)?;

        Ok(SensorInfo {
            protocol: marshal::decode_buffer(&protocol),
            model: marshal::decode_buffer(&model),
            id,
            datatypes,
        })
    }

    /// tdSensorValue
    pub fn sensor_value(
        &self,
        protocol: &str,
        model: &str,
        sensor_id: i32,
        datatype: i32,
    ) -> Result<SensorValue> {
        let f = require(self.core.fns.sensor_value, "tdSensorValue")?;
        let protocol = marshal::encode_str(protocol)?;
        let model = marshal::encode_str(model)?;
        let mut value = [0u8; SENSOR_BUFFER_SIZE];
        let mut timestamp: c_int = 0;

        let result = unsafe {
            f(
                protocol.as_ptr(),
                model.as_ptr(),
                sensor_id,
                datatype,
                value.as_mut_ptr().cast(),
                value.len() as c_int,
                &mut timestamp,
            )
        };
        self.check_int(result)?;

        Ok(SensorValue {
            value: marshal::decode_buffer(&value),
            timestamp,
        })
    }

    /// tdController: next controller in the native iteration.
    ///
    /// End of sequence is the not-found code; other negative codes are real
    /// failures.
    pub fn next_controller(&self) -> Result<ControllerInfo> {
        let f = require(self.core.fns.controller, "tdController")?;
        let mut id: c_int = 0;
        let mut controller_type: c_int = 0;
        let mut name = [0u8; CONTROLLER_BUFFER_SIZE];
        let mut available: c_int = 0;

        let result = unsafe {
            f(
                &mut id,
                &mut controller_type,
                name.as_mut_ptr().cast(),
                name.len() as c_int,
                &mut available,
            )
        };
        self.check_int(result)?;

        Ok(ControllerInfo {
            id,
            controller_type,
            name: marshal::decode_buffer(&name),
            available: available != 0,
        })
    }

    /// tdControllerValue
    pub fn controller_value(&self, controller_id: i32, name: &str) -> Result<String> {
        let f = require(self.core.fns.controller_value, "tdControllerValue")?;
        let name = marshal::encode_str(name)?;
        let mut value = [0u8; CONTROLLER_BUFFER_SIZE];

        let result = unsafe {
            f(
                controller_id,
                name.as_ptr(),
                value.as_mut_ptr().cast(),
                value.len() as c_int,
            )
        };
        self.check_int(result)?;

        Ok(marshal::decode_buffer(&value))
    }

    /// tdSetControllerValue
    pub fn set_controller_value(&self, controller_id: i32, name: &str, value: &str) -> Result<()> {
        let f = require(self.core.fns.set_controller_value, "tdSetControllerValue")?;
        let name = marshal::encode_str(name)?;
        let value = marshal::encode_str(value)?;
        self.check_int(unsafe { f(controller_id, name.as_ptr(), value.as_ptr()) })
            .map(drop)
    }

    /// tdRemoveController
    pub fn remove_controller(&self, controller_id: i32) -> Result<()> {
        let f = require(self.core.fns.remove_controller, "tdRemoveController")?;
        self.check_int(unsafe { f(controller_id) }).map(drop)
    }

    // ---- Event callbacks ----

    /// Register a device event callback; requires an installed dispatcher.
    pub fn register_device_event<F>(&self, callback: F) -> Result<CallbackId>
    where
        F: Fn(DeviceEvent) + Send + Sync + 'static,
    {
        callback::register_device(self, callback)
    }

    /// Register a device change event callback.
    pub fn register_device_change_event<F>(&self, callback: F) -> Result<CallbackId>
    where
        F: Fn(DeviceChangeEvent) + Send + Sync + 'static,
    {
        callback::register_device_change(self, callback)
    }

    /// Register a raw device event callback.
    pub fn register_raw_device_event<F>(&self, callback: F) -> Result<CallbackId>
    where
        F: Fn(RawDeviceEvent) + Send + Sync + 'static,
    {
        callback::register_raw_device(self, callback)
    }

    /// Register a sensor event callback.
    pub fn register_sensor_event<F>(&self, callback: F) -> Result<CallbackId>
    where
        F: Fn(SensorEvent) + Send + Sync + 'static,
    {
        callback::register_sensor(self, callback)
    }

    /// Register a controller event callback.
    pub fn register_controller_event<F>(&self, callback: F) -> Result<CallbackId>
    where
        F: Fn(ControllerEvent) + Send + Sync + 'static,
    {
        callback::register_controller(self, callback)
    }

    /// Unregister a callback; no further events are delivered for its id.
    pub fn unregister_callback(&self, id: CallbackId) -> Result<()> {
        callback::unregister(self, id)
    }
}

/// Another handle to the same shared session.
impl Clone for CoreLibrary {
    fn clone(&self) -> Self {
        SHARED.lock().refcount += 1;
        Self {
            core: self.core.clone(),
        }
    }
}

impl Drop for CoreLibrary {
    fn drop(&mut self) {
        let mut shared = SHARED.lock();
        assert!(
            shared.refcount >= 1,
            "telldus-core released more times than opened"
        );
        shared.refcount -= 1;
        if shared.refcount != 0 {
            return;
        }

        // Last handle: tear the callback bridge down before closing. Local
        // bookkeeping goes first so cleanup stays idempotent; native
        // failures here are logged, never propagated.
        let ids = callback::drain_registrations();
        if let Some(unregister) = self.core.fns.unregister_callback {
            for id in ids {
                let result = unsafe { unregister(id) };
                if result < 0 {
                    log::warn!("tdUnregisterCallback({}) failed during teardown: {}", id, result);
                }
            }
        }
        callback::clear_dispatcher();

        if self.core.fns.supports_reinit() {
            if let Some(close) = self.core.fns.close {
                unsafe { close() };
            }
        } else {
            // Closing would leave old telldus-core unable to re-init.
            log::debug!("skipping tdClose: loaded telldus-core predates tdController");
        }

        shared.core = None;
        log::debug!("telldus-core session closed");
    }
}

pub(crate) fn require<T: Copy>(slot: Option<T>, name: &'static str) -> Result<T> {
    slot.ok_or(TelldusError::NotSupported(name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockController, MockCore, MockDevice, MockSensor};

    #[test]
    fn test_shared_session_loads_once() {
        let mock = MockCore::activate();
        assert_eq!(mock.load_count(), 0);

        let first = mock.open().unwrap();
        let second = mock.open().unwrap();
        assert_eq!(mock.load_count(), 1);
        assert_eq!(mock.init_count(), 1);
        assert!(mock.initialized());

        drop(first);
        assert!(mock.initialized());
        drop(second);
        assert!(!mock.initialized());
        assert_eq!(mock.close_count(), 1);

        // A fresh generation is loaded and initialized from scratch.
        let reopened = mock.open().unwrap();
        assert_eq!(mock.load_count(), 2);
        assert_eq!(mock.init_count(), 2);
        drop(reopened);
        assert_eq!(mock.close_count(), 2);
    }

    #[test]
    fn test_clone_shares_session() {
        let mock = MockCore::activate();
        let lib = mock.open().unwrap();
        let copy = lib.clone();
        drop(lib);
        assert!(mock.initialized());
        drop(copy);
        assert!(!mock.initialized());
        assert_eq!(mock.load_count(), 1);
    }

    #[test]
    fn test_string_results_are_released_exactly_once() {
        let mock = MockCore::activate();
        let lib = mock.open().unwrap();

        for code in -5..0 {
            let text = lib.error_string(code);
            assert!(text.contains(&code.to_string()));
        }

        assert_eq!(mock.returned_strings().len(), 5);
        assert_eq!(mock.returned_strings(), mock.released_strings());
    }

    #[test]
    fn test_null_string_decodes_empty_without_release() {
        let mock = MockCore::activate();
        mock.force_null_string("tdGetName");
        mock.add_device(MockDevice::new(1, "door"));
        let lib = mock.open().unwrap();

        assert_eq!(lib.device_name(1).unwrap(), "");
        assert!(mock.returned_strings().is_empty());
        assert!(mock.released_strings().is_empty());
    }

    #[test]
    fn test_strings_released_on_error_paths() {
        let mock = MockCore::activate();
        mock.force_error("tdGetNumberOfDevices", ErrorCode::Communication.as_raw());
        let lib = mock.open().unwrap();

        // The failed call fetches its description string; that string must
        // be released too.
        let err = lib.number_of_devices().unwrap_err();
        assert_eq!(err.code(), Some(-5));
        assert_eq!(mock.returned_strings(), mock.released_strings());
        assert!(!mock.returned_strings().is_empty());
    }

    #[test]
    fn test_negative_result_carries_exact_code() {
        let mock = MockCore::activate();
        mock.force_error(
            "tdGetNumberOfDevices",
            ErrorCode::ConnectingService.as_raw(),
        );
        let lib = mock.open().unwrap();

        let err = lib.number_of_devices().unwrap_err();
        assert_eq!(err.code(), Some(-6));
        assert_eq!(err.error_code(), Some(ErrorCode::ConnectingService));
    }

    #[test]
    fn test_non_negative_result_is_ok() {
        let mock = MockCore::activate();
        mock.add_device(MockDevice::new(1, "a"));
        mock.add_device(MockDevice::new(2, "b"));
        let lib = mock.open().unwrap();
        assert_eq!(lib.number_of_devices().unwrap(), 2);
    }

    #[test]
    fn test_false_bool_maps_to_device_not_found() {
        let mock = MockCore::activate();
        let lib = mock.open().unwrap();

        let err = lib.set_device_name(42, "ghost").unwrap_err();
        assert_eq!(err.error_code(), Some(ErrorCode::DeviceNotFound));
    }

    #[test]
    fn test_missing_symbol_is_not_supported() {
        let mock = MockCore::activate();
        mock.omit_symbol("tdSendRawCommand");
        let lib = mock.open().unwrap();

        let err = lib.send_raw_command("code", 0).unwrap_err();
        assert!(matches!(err, TelldusError::NotSupported("tdSendRawCommand")));
    }

    #[test]
    fn test_close_skipped_for_legacy_module() {
        let mock = MockCore::activate();
        mock.omit_symbol("tdController");
        let lib = mock.open().unwrap();
        drop(lib);

        // Pre-tdController builds cannot re-init after tdClose, so the
        // close entry point is never invoked for them.
        assert_eq!(mock.close_count(), 0);
        assert_eq!(mock.init_count(), 1);
    }

    #[test]
    fn test_sensor_enumeration_stops_on_device_not_found() {
        let mock = MockCore::activate();
        mock.add_sensor(MockSensor::new("fineoffset", "temperaturehumidity", 11));
        mock.add_sensor(MockSensor::new("mandolyn", "temperature", 12));
        let lib = mock.open().unwrap();

        let mut seen = Vec::new();
        loop {
            match lib.next_sensor() {
                Ok(sensor) => seen.push(sensor),
                Err(e) if e.error_code() == Some(ErrorCode::DeviceNotFound) => break,
                Err(e) => panic!("unexpected enumeration error: {e}"),
            }
        }

        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].protocol, "fineoffset");
        assert_eq!(seen[1].id, 12);
    }

    #[test]
    fn test_controller_enumeration_stops_on_not_found() {
        let mock = MockCore::activate();
        mock.add_controller(MockController::new(1, TELLSTICK_CONTROLLER_TELLSTICK_DUO, "duo"));
        let lib = mock.open().unwrap();

        let first = lib.next_controller().unwrap();
        assert_eq!(first.name, "duo");
        assert_eq!(first.controller_type, TELLSTICK_CONTROLLER_TELLSTICK_DUO);

        let err = lib.next_controller().unwrap_err();
        assert_eq!(err.error_code(), Some(ErrorCode::NotFound));
    }

    #[test]
    fn test_enumeration_propagates_real_errors() {
        let mock = MockCore::activate();
        mock.force_error("tdSensor", ErrorCode::ConnectingService.as_raw());
        let lib = mock.open().unwrap();

        let err = lib.next_sensor().unwrap_err();
        assert_eq!(err.error_code(), Some(ErrorCode::ConnectingService));
    }

    #[test]
    fn test_sensor_value_marshals_out_parameters() {
        let mock = MockCore::activate();
        mock.add_sensor(
            MockSensor::new("fineoffset", "temperaturehumidity", 11)
                .with_value(TELLSTICK_TEMPERATURE, "21.5", 1_400_000_000),
        );
        let lib = mock.open().unwrap();

        let value = lib
            .sensor_value("fineoffset", "temperaturehumidity", 11, TELLSTICK_TEMPERATURE)
            .unwrap();
        assert_eq!(value.value, "21.5");
        assert_eq!(value.timestamp, 1_400_000_000);
    }

    #[test]
    fn test_device_parameter_default_passthrough() {
        let mock = MockCore::activate();
        mock.add_device(MockDevice::new(3, "lamp").with_parameter("house", "A"));
        let lib = mock.open().unwrap();

        assert_eq!(lib.device_parameter(3, "house", "-").unwrap(), "A");
        assert_eq!(lib.device_parameter(3, "unit", "fallback").unwrap(), "fallback");
    }

    #[test]
    fn test_commands_reach_the_native_library() {
        let mock = MockCore::activate();
        mock.add_device(MockDevice::new(7, "lamp"));
        let lib = mock.open().unwrap();

        lib.turn_on(7).unwrap();
        lib.dim(7, 128).unwrap();
        lib.turn_off(7).unwrap();

        assert_eq!(
            mock.actions(),
            vec![(7, "tdTurnOn"), (7, "tdDim"), (7, "tdTurnOff")]
        );
        assert_eq!(lib.last_sent_value(7).unwrap(), "128");
    }

    #[test]
    fn test_raw_command_and_controller_link() {
        let mock = MockCore::activate();
        let lib = mock.open().unwrap();

        lib.send_raw_command("S$k$k$kk$$kk$$kk$$k+", 0).unwrap();
        lib.connect_controller(0x1781, 0x0c30, "A600FEDC").unwrap();
        lib.disconnect_controller(0x1781, 0x0c30, "A600FEDC").unwrap();

        assert_eq!(mock.last_raw_command().unwrap(), "S$k$k$kk$$kk$$kk$$k+");
        assert_eq!(mock.connected_controllers(), vec![(0x1781, 0x0c30, "A600FEDC".to_string())]);
        assert_eq!(mock.disconnected_controllers(), vec![(0x1781, 0x0c30, "A600FEDC".to_string())]);
    }
}
