//! In-process fake of the native telldus-core library
//!
//! Stands in for the real module behind the same [`FunctionTable`] seam:
//! static `extern "C"` functions backed by a process-wide state block with
//! an in-memory device/sensor/controller registry, error injection, and
//! omittable symbols to simulate older native builds. String results are
//! handed out as owned C allocations and a ledger records every pointer
//! returned and released, so tests can verify the release discipline.
//!
//! Event delivery is simulated by [`MockCore`]'s trigger methods, which
//! invoke the registered callback thunks on a dedicated thread (standing in
//! for the native callback thread) and wait for the thread to drain before
//! returning.
//!
//! The native session is process-wide state, so tests take an exclusive
//! guard via [`MockCore::activate`]; it also resets the fake to a blank
//! slate.

use crate::dispatch::EventDispatcher;
use crate::error::{ErrorCode, Result};
use crate::ffi::*;
use crate::library::{self, CoreLibrary, FunctionTable, ModuleSource};
use crossbeam_channel::{bounded, unbounded, Sender};
use parking_lot::{Mutex, MutexGuard};
use std::collections::{BTreeMap, BTreeSet};
use std::ffi::{CStr, CString};
use std::os::raw::{c_char, c_int, c_uchar, c_void};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// A device in the fake registry.
#[derive(Debug, Clone)]
pub struct MockDevice {
    pub id: i32,
    pub name: String,
    pub protocol: String,
    pub model: String,
    pub device_type: i32,
    /// Bit mask of methods the device supports.
    pub methods: i32,
    pub parameters: BTreeMap<String, String>,
    pub last_sent_command: i32,
    pub last_sent_value: String,
}

impl MockDevice {
    pub fn new(id: i32, name: &str) -> Self {
        Self {
            id,
            name: name.to_string(),
            protocol: "arctech".to_string(),
            model: "selflearning-switch".to_string(),
            device_type: TELLSTICK_TYPE_DEVICE,
            methods: TELLSTICK_TURNON | TELLSTICK_TURNOFF,
            parameters: BTreeMap::new(),
            last_sent_command: 0,
            last_sent_value: String::new(),
        }
    }

    pub fn with_protocol(mut self, protocol: &str) -> Self {
        self.protocol = protocol.to_string();
        self
    }

    pub fn with_model(mut self, model: &str) -> Self {
        self.model = model.to_string();
        self
    }

    pub fn with_type(mut self, device_type: i32) -> Self {
        self.device_type = device_type;
        self
    }

    pub fn with_methods(mut self, methods: i32) -> Self {
        self.methods = methods;
        self
    }

    pub fn with_parameter(mut self, name: &str, value: &str) -> Self {
        self.parameters.insert(name.to_string(), value.to_string());
        self
    }
}

/// A sensor in the fake registry.
#[derive(Debug, Clone)]
pub struct MockSensor {
    pub protocol: String,
    pub model: String,
    pub id: i32,
    pub datatypes: i32,
    /// datatype -> (value text, timestamp)
    pub values: BTreeMap<i32, (String, i32)>,
}

impl MockSensor {
    pub fn new(protocol: &str, model: &str, id: i32) -> Self {
        Self {
            protocol: protocol.to_string(),
            model: model.to_string(),
            id,
            datatypes: 0,
            values: BTreeMap::new(),
        }
    }

    pub fn with_value(mut self, datatype: i32, value: &str, timestamp: i32) -> Self {
        self.datatypes |= datatype;
        self.values.insert(datatype, (value.to_string(), timestamp));
        self
    }
}

/// A controller in the fake registry.
#[derive(Debug, Clone)]
pub struct MockController {
    pub id: i32,
    pub controller_type: i32,
    pub name: String,
    pub available: bool,
    /// Extra values readable through tdControllerValue (e.g. firmware).
    pub values: BTreeMap<String, String>,
}

impl MockController {
    pub fn new(id: i32, controller_type: i32, name: &str) -> Self {
        Self {
            id,
            controller_type,
            name: name.to_string(),
            available: true,
            values: BTreeMap::new(),
        }
    }

    pub fn with_available(mut self, available: bool) -> Self {
        self.available = available;
        self
    }

    pub fn with_value(mut self, name: &str, value: &str) -> Self {
        self.values.insert(name.to_string(), value.to_string());
        self
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum MockEventKind {
    Device,
    DeviceChange,
    RawDevice,
    Sensor,
    Controller,
}

#[derive(Clone, Copy)]
struct MockRegistration {
    kind: MockEventKind,
    thunk: usize,
    context: usize,
}

struct MockState {
    load_count: usize,
    init_count: usize,
    close_count: usize,
    initialized: bool,
    omitted: BTreeSet<&'static str>,
    forced_errors: BTreeMap<&'static str, i32>,
    null_strings: BTreeSet<&'static str>,
    devices: Vec<MockDevice>,
    sensors: Vec<MockSensor>,
    controllers: Vec<MockController>,
    sensor_cursor: usize,
    controller_cursor: usize,
    returned_strings: Vec<usize>,
    released_strings: Vec<usize>,
    next_callback_id: c_int,
    registrations: BTreeMap<c_int, MockRegistration>,
    unregistered: Vec<c_int>,
    actions: Vec<(i32, &'static str)>,
    last_raw_command: Option<String>,
    connected: Vec<(i32, i32, String)>,
    disconnected: Vec<(i32, i32, String)>,
}

impl MockState {
    const EMPTY: MockState = MockState {
        load_count: 0,
        init_count: 0,
        close_count: 0,
        initialized: false,
        omitted: BTreeSet::new(),
        forced_errors: BTreeMap::new(),
        null_strings: BTreeSet::new(),
        devices: Vec::new(),
        sensors: Vec::new(),
        controllers: Vec::new(),
        sensor_cursor: 0,
        controller_cursor: 0,
        returned_strings: Vec::new(),
        released_strings: Vec::new(),
        next_callback_id: 1,
        registrations: BTreeMap::new(),
        unregistered: Vec::new(),
        actions: Vec::new(),
        last_raw_command: None,
        connected: Vec::new(),
        disconnected: Vec::new(),
    };
}

static STATE: Mutex<MockState> = Mutex::new(MockState::EMPTY);
static TEST_LOCK: Mutex<()> = Mutex::new(());

/// Serialize access to process-wide state shared with the mock (used by
/// tests that mutate other process-global configuration).
#[cfg(test)]
pub(crate) fn test_guard() -> MutexGuard<'static, ()> {
    TEST_LOCK.lock()
}

fn with_state<R>(f: impl FnOnce(&mut MockState) -> R) -> R {
    f(&mut STATE.lock())
}

/// Exclusive handle to the fake native library.
///
/// Holding it owns the process-wide mock; tests exercising the shared
/// session serialize on it. Dropping it shuts the event thread down.
pub struct MockCore {
    events: MockEventThread,
    _guard: MutexGuard<'static, ()>,
}

impl MockCore {
    /// Take exclusive ownership of the fake and reset it to a blank slate.
    pub fn activate() -> Self {
        let guard = TEST_LOCK.lock();
        debug_assert_eq!(
            library::shared_refcount(),
            0,
            "a previous test leaked a CoreLibrary handle"
        );
        *STATE.lock() = MockState::EMPTY;
        Self {
            events: MockEventThread::spawn(),
            _guard: guard,
        }
    }

    /// Open a library handle backed by the fake.
    pub fn open(&self) -> Result<CoreLibrary> {
        CoreLibrary::open_internal(ModuleSource::Table(mock_loader), None)
    }

    /// Open a handle and install a dispatch strategy for the session.
    pub fn open_with_dispatcher(
        &self,
        dispatcher: Arc<dyn EventDispatcher>,
    ) -> Result<CoreLibrary> {
        CoreLibrary::open_internal(ModuleSource::Table(mock_loader), Some(dispatcher))
    }

    // ---- Configuration ----

    /// Pretend the native build lacks `name` (bind leaves its slot empty).
    pub fn omit_symbol(&self, name: &'static str) {
        with_state(|s| {
            s.omitted.insert(name);
        });
    }

    /// Make `name` fail: int-returning entries return `code`,
    /// bool-returning ones return false.
    pub fn force_error(&self, name: &'static str, code: i32) {
        with_state(|s| {
            s.forced_errors.insert(name, code);
        });
    }

    /// Make the string-returning entry `name` return NULL.
    pub fn force_null_string(&self, name: &'static str) {
        with_state(|s| {
            s.null_strings.insert(name);
        });
    }

    pub fn add_device(&self, device: MockDevice) {
        with_state(|s| s.devices.push(device));
    }

    pub fn add_sensor(&self, sensor: MockSensor) {
        with_state(|s| s.sensors.push(sensor));
    }

    pub fn add_controller(&self, controller: MockController) {
        with_state(|s| s.controllers.push(controller));
    }

    // ---- Observations ----

    pub fn load_count(&self) -> usize {
        with_state(|s| s.load_count)
    }

    pub fn init_count(&self) -> usize {
        with_state(|s| s.init_count)
    }

    pub fn close_count(&self) -> usize {
        with_state(|s| s.close_count)
    }

    pub fn initialized(&self) -> bool {
        with_state(|s| s.initialized)
    }

    /// Pointers handed out by string-returning entries, in order.
    pub fn returned_strings(&self) -> Vec<usize> {
        with_state(|s| s.returned_strings.clone())
    }

    /// Pointers passed back to tdReleaseString, in order.
    pub fn released_strings(&self) -> Vec<usize> {
        with_state(|s| s.released_strings.clone())
    }

    /// Currently live registration ids, ascending.
    pub fn registered_ids(&self) -> Vec<i32> {
        with_state(|s| s.registrations.keys().copied().collect())
    }

    /// Ids passed to tdUnregisterCallback, in call order.
    pub fn unregistered_ids(&self) -> Vec<i32> {
        with_state(|s| s.unregistered.clone())
    }

    /// Device commands observed, as (device id, entry point name).
    pub fn actions(&self) -> Vec<(i32, &'static str)> {
        with_state(|s| s.actions.clone())
    }

    pub fn last_raw_command(&self) -> Option<String> {
        with_state(|s| s.last_raw_command.clone())
    }

    pub fn connected_controllers(&self) -> Vec<(i32, i32, String)> {
        with_state(|s| s.connected.clone())
    }

    pub fn disconnected_controllers(&self) -> Vec<(i32, i32, String)> {
        with_state(|s| s.disconnected.clone())
    }

    pub fn device(&self, id: i32) -> Option<MockDevice> {
        with_state(|s| s.devices.iter().find(|d| d.id == id).cloned())
    }

    pub fn device_count(&self) -> usize {
        with_state(|s| s.devices.len())
    }

    // ---- Event triggering (simulated native callback thread) ----

    fn registrations_of(&self, kind: MockEventKind) -> Vec<(c_int, MockRegistration)> {
        with_state(|s| {
            s.registrations
                .iter()
                .filter(|(_, reg)| reg.kind == kind)
                .map(|(id, reg)| (*id, *reg))
                .collect()
        })
    }

    /// Deliver a device event to every registered device callback and wait
    /// for the callback thread to drain.
    pub fn trigger_device_event(&self, device_id: i32, method: i32, data: &str) {
        for (cid, reg) in self.registrations_of(MockEventKind::Device) {
            self.invoke_device_thunk(reg, device_id, method, data, cid);
        }
        self.events.drain();
    }

    /// Deliver a device event carrying a registration id the bridge never
    /// handed out, simulating an event racing an unregistration.
    pub fn trigger_stale_device_event(
        &self,
        device_id: i32,
        method: i32,
        data: &str,
        stale_id: i32,
    ) {
        for (_, reg) in self.registrations_of(MockEventKind::Device) {
            self.invoke_device_thunk(reg, device_id, method, data, stale_id);
        }
        self.events.drain();
    }

    fn invoke_device_thunk(
        &self,
        reg: MockRegistration,
        device_id: i32,
        method: i32,
        data: &str,
        cid: i32,
    ) {
        let data = data.to_string();
        self.events.invoke(move || unsafe {
            let thunk: DeviceEventFn = std::mem::transmute(reg.thunk);
            let data = CString::new(data).unwrap();
            thunk(device_id, method, data.as_ptr(), cid, reg.context as *mut c_void);
        });
    }

    pub fn trigger_device_change_event(&self, device_id: i32, event: i32, change_type: i32) {
        for (cid, reg) in self.registrations_of(MockEventKind::DeviceChange) {
            self.events.invoke(move || unsafe {
                let thunk: DeviceChangeEventFn = std::mem::transmute(reg.thunk);
                thunk(device_id, event, change_type, cid, reg.context as *mut c_void);
            });
        }
        self.events.drain();
    }

    pub fn trigger_raw_device_event(&self, data: &str, controller_id: i32) {
        for (cid, reg) in self.registrations_of(MockEventKind::RawDevice) {
            let data = data.to_string();
            self.events.invoke(move || unsafe {
                let thunk: RawDeviceEventFn = std::mem::transmute(reg.thunk);
                let data = CString::new(data).unwrap();
                thunk(data.as_ptr(), controller_id, cid, reg.context as *mut c_void);
            });
        }
        self.events.drain();
    }

    pub fn trigger_sensor_event(
        &self,
        protocol: &str,
        model: &str,
        sensor_id: i32,
        datatype: i32,
        value: &str,
        timestamp: i32,
    ) {
        for (cid, reg) in self.registrations_of(MockEventKind::Sensor) {
            let protocol = protocol.to_string();
            let model = model.to_string();
            let value = value.to_string();
            self.events.invoke(move || unsafe {
                let thunk: SensorEventFn = std::mem::transmute(reg.thunk);
                let protocol = CString::new(protocol).unwrap();
                let model = CString::new(model).unwrap();
                let value = CString::new(value).unwrap();
                thunk(
                    protocol.as_ptr(),
                    model.as_ptr(),
                    sensor_id,
                    datatype,
                    value.as_ptr(),
                    timestamp,
                    cid,
                    reg.context as *mut c_void,
                );
            });
        }
        self.events.drain();
    }

    pub fn trigger_controller_event(
        &self,
        controller_id: i32,
        event: i32,
        change_type: i32,
        new_value: &str,
    ) {
        for (cid, reg) in self.registrations_of(MockEventKind::Controller) {
            let new_value = new_value.to_string();
            self.events.invoke(move || unsafe {
                let thunk: ControllerEventFn = std::mem::transmute(reg.thunk);
                let new_value = CString::new(new_value).unwrap();
                thunk(
                    controller_id,
                    event,
                    change_type,
                    new_value.as_ptr(),
                    cid,
                    reg.context as *mut c_void,
                );
            });
        }
        self.events.drain();
    }
}

/// Dedicated thread standing in for the native callback thread.
///
/// Callbacks always arrive on this thread, never on the thread that
/// triggered the event; `drain` gives triggers their join-based
/// deliver-and-wait semantics.
struct MockEventThread {
    tx: Option<Sender<EventJob>>,
    handle: Option<JoinHandle<()>>,
}

enum EventJob {
    Invoke(Box<dyn FnOnce() + Send>),
    Drain(Sender<()>),
}

impl MockEventThread {
    fn spawn() -> Self {
        let (tx, rx) = unbounded::<EventJob>();
        let handle = thread::Builder::new()
            .name("mock-event-dispatcher".to_string())
            .spawn(move || {
                for job in rx {
                    match job {
                        EventJob::Invoke(f) => f(),
                        EventJob::Drain(ack) => {
                            let _ = ack.send(());
                        }
                    }
                }
            })
            .expect("failed to spawn mock event thread");
        Self {
            tx: Some(tx),
            handle: Some(handle),
        }
    }

    fn invoke(&self, f: impl FnOnce() + Send + 'static) {
        self.tx
            .as_ref()
            .expect("event thread stopped")
            .send(EventJob::Invoke(Box::new(f)))
            .expect("event thread stopped");
    }

    /// Block until everything queued so far has been delivered.
    fn drain(&self) {
        let (ack_tx, ack_rx) = bounded(1);
        self.tx
            .as_ref()
            .expect("event thread stopped")
            .send(EventJob::Drain(ack_tx))
            .expect("event thread stopped");
        ack_rx.recv().expect("event thread stopped");
    }
}

impl Drop for MockEventThread {
    fn drop(&mut self) {
        self.tx.take();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

// ---- Function table construction ----

fn keep<T>(omitted: &BTreeSet<&'static str>, name: &str, f: T) -> Option<T> {
    if omitted.contains(name) {
        None
    } else {
        Some(f)
    }
}

/// Build the fake's function table, honoring omitted symbols. Counts as one
/// library load.
fn mock_loader() -> FunctionTable {
    let omitted = with_state(|s| {
        s.load_count += 1;
        s.omitted.clone()
    });
    let o = &omitted;

    FunctionTable {
        init: keep(o, "tdInit", mock_td_init as SessionFn),
        close: keep(o, "tdClose", mock_td_close as SessionFn),
        release_string: keep(o, "tdReleaseString", mock_td_release_string as ReleaseStringFn),
        get_error_string: keep(o, "tdGetErrorString", mock_td_get_error_string as GetErrorStringFn),

        register_device_event: keep(
            o,
            "tdRegisterDeviceEvent",
            mock_td_register_device_event as RegisterDeviceEventFn,
        ),
        register_device_change_event: keep(
            o,
            "tdRegisterDeviceChangeEvent",
            mock_td_register_device_change_event as RegisterDeviceChangeEventFn,
        ),
        register_raw_device_event: keep(
            o,
            "tdRegisterRawDeviceEvent",
            mock_td_register_raw_device_event as RegisterRawDeviceEventFn,
        ),
        register_sensor_event: keep(
            o,
            "tdRegisterSensorEvent",
            mock_td_register_sensor_event as RegisterSensorEventFn,
        ),
        register_controller_event: keep(
            o,
            "tdRegisterControllerEvent",
            mock_td_register_controller_event as RegisterControllerEventFn,
        ),
        unregister_callback: keep(
            o,
            "tdUnregisterCallback",
            mock_td_unregister_callback as UnregisterCallbackFn,
        ),

        turn_on: keep(o, "tdTurnOn", mock_td_turn_on as DeviceIntFn),
        turn_off: keep(o, "tdTurnOff", mock_td_turn_off as DeviceIntFn),
        bell: keep(o, "tdBell", mock_td_bell as DeviceIntFn),
        dim: keep(o, "tdDim", mock_td_dim as DimFn),
        execute: keep(o, "tdExecute", mock_td_execute as DeviceIntFn),
        up: keep(o, "tdUp", mock_td_up as DeviceIntFn),
        down: keep(o, "tdDown", mock_td_down as DeviceIntFn),
        stop: keep(o, "tdStop", mock_td_stop as DeviceIntFn),
        learn: keep(o, "tdLearn", mock_td_learn as DeviceIntFn),
        methods: keep(o, "tdMethods", mock_td_methods as MethodQueryFn),
        last_sent_command: keep(o, "tdLastSentCommand", mock_td_last_sent_command as MethodQueryFn),
        last_sent_value: keep(o, "tdLastSentValue", mock_td_last_sent_value as DeviceStringFn),

        get_number_of_devices: keep(
            o,
            "tdGetNumberOfDevices",
            mock_td_get_number_of_devices as PlainIntFn,
        ),
        get_device_id: keep(o, "tdGetDeviceId", mock_td_get_device_id as DeviceIntFn),
        get_device_type: keep(o, "tdGetDeviceType", mock_td_get_device_type as DeviceIntFn),

        get_name: keep(o, "tdGetName", mock_td_get_name as DeviceStringFn),
        set_name: keep(o, "tdSetName", mock_td_set_name as SetDeviceStringFn),
        get_protocol: keep(o, "tdGetProtocol", mock_td_get_protocol as DeviceStringFn),
        set_protocol: keep(o, "tdSetProtocol", mock_td_set_protocol as SetDeviceStringFn),
        get_model: keep(o, "tdGetModel", mock_td_get_model as DeviceStringFn),
        set_model: keep(o, "tdSetModel", mock_td_set_model as SetDeviceStringFn),

        get_device_parameter: keep(
            o,
            "tdGetDeviceParameter",
            mock_td_get_device_parameter as GetDeviceParameterFn,
        ),
        set_device_parameter: keep(
            o,
            "tdSetDeviceParameter",
            mock_td_set_device_parameter as SetDeviceParameterFn,
        ),

        add_device: keep(o, "tdAddDevice", mock_td_add_device as PlainIntFn),
        remove_device: keep(o, "tdRemoveDevice", mock_td_remove_device as RemoveDeviceFn),

        send_raw_command: keep(o, "tdSendRawCommand", mock_td_send_raw_command as SendRawCommandFn),

        connect_controller: keep(
            o,
            "tdConnectTellStickController",
            mock_td_connect_controller as ControllerLinkFn,
        ),
        disconnect_controller: keep(
            o,
            "tdDisconnectTellStickController",
            mock_td_disconnect_controller as ControllerLinkFn,
        ),

        sensor: keep(o, "tdSensor", mock_td_sensor as SensorIterFn),
        sensor_value: keep(o, "tdSensorValue", mock_td_sensor_value as SensorValueFn),

        controller: keep(o, "tdController", mock_td_controller as ControllerIterFn),
        controller_value: keep(o, "tdControllerValue", mock_td_controller_value as ControllerValueFn),
        set_controller_value: keep(
            o,
            "tdSetControllerValue",
            mock_td_set_controller_value as SetControllerValueFn,
        ),
        remove_controller: keep(o, "tdRemoveController", mock_td_remove_controller as RemoveControllerFn),
    }
}

// ---- Helpers shared by the extern "C" implementations ----

/// Hand out an owned C string and record the pointer in the ledger.
fn give_string(text: &str) -> *mut c_char {
    let ptr = CString::new(text).expect("mock string with interior nul").into_raw();
    with_state(|s| s.returned_strings.push(ptr as usize));
    ptr
}

unsafe fn read_cstr(ptr: *const c_char) -> String {
    if ptr.is_null() {
        String::new()
    } else {
        CStr::from_ptr(ptr).to_string_lossy().into_owned()
    }
}

/// Write `text` into a fixed-size native out buffer, NUL terminated.
unsafe fn fill_buffer(dst: *mut c_char, len: c_int, text: &str) {
    let bytes = text.as_bytes();
    let n = bytes.len().min(len.max(1) as usize - 1);
    std::ptr::copy_nonoverlapping(bytes.as_ptr(), dst.cast::<u8>(), n);
    *dst.cast::<u8>().add(n) = 0;
}

fn forced(name: &'static str) -> Option<i32> {
    with_state(|s| s.forced_errors.get(name).copied())
}

fn record_action(state: &mut MockState, device_id: i32, name: &'static str, command: i32) {
    state.actions.push((device_id, name));
    if let Some(device) = state.devices.iter_mut().find(|d| d.id == device_id) {
        device.last_sent_command = command;
    }
}

// ---- extern "C" implementations ----

unsafe extern "C" fn mock_td_init() {
    with_state(|s| {
        s.init_count += 1;
        s.initialized = true;
    });
}

unsafe extern "C" fn mock_td_close() {
    with_state(|s| {
        s.close_count += 1;
        s.initialized = false;
    });
}

unsafe extern "C" fn mock_td_release_string(ptr: *mut c_void) {
    if ptr.is_null() {
        return;
    }
    with_state(|s| s.released_strings.push(ptr as usize));
    drop(CString::from_raw(ptr.cast::<c_char>()));
}

unsafe extern "C" fn mock_td_get_error_string(code: c_int) -> *mut c_char {
    if with_state(|s| s.null_strings.contains("tdGetErrorString")) {
        return std::ptr::null_mut();
    }
    give_string(&format!("mock error {code}"))
}

unsafe extern "C" fn mock_td_get_number_of_devices() -> c_int {
    if let Some(code) = forced("tdGetNumberOfDevices") {
        return code;
    }
    with_state(|s| s.devices.len() as c_int)
}

unsafe extern "C" fn mock_td_get_device_id(index: c_int) -> c_int {
    if let Some(code) = forced("tdGetDeviceId") {
        return code;
    }
    with_state(|s| {
        s.devices
            .get(index as usize)
            .map(|d| d.id)
            .unwrap_or_else(|| ErrorCode::DeviceNotFound.as_raw())
    })
}

unsafe extern "C" fn mock_td_get_device_type(device_id: c_int) -> c_int {
    with_state(|s| {
        s.devices
            .iter()
            .find(|d| d.id == device_id)
            .map(|d| d.device_type)
            .unwrap_or_else(|| ErrorCode::DeviceNotFound.as_raw())
    })
}

fn string_getter(
    name: &'static str,
    device_id: c_int,
    get: impl Fn(&MockDevice) -> String,
) -> *mut c_char {
    if with_state(|s| s.null_strings.contains(name)) {
        return std::ptr::null_mut();
    }
    let text = with_state(|s| s.devices.iter().find(|d| d.id == device_id).map(|d| get(d)));
    match text {
        Some(text) => give_string(&text),
        None => std::ptr::null_mut(),
    }
}

unsafe extern "C" fn mock_td_get_name(device_id: c_int) -> *mut c_char {
    string_getter("tdGetName", device_id, |d| d.name.clone())
}

unsafe extern "C" fn mock_td_get_protocol(device_id: c_int) -> *mut c_char {
    string_getter("tdGetProtocol", device_id, |d| d.protocol.clone())
}

unsafe extern "C" fn mock_td_get_model(device_id: c_int) -> *mut c_char {
    string_getter("tdGetModel", device_id, |d| d.model.clone())
}

unsafe fn string_setter(
    name: &'static str,
    device_id: c_int,
    value: *const c_char,
    set: impl Fn(&mut MockDevice, String),
) -> bool {
    if with_state(|s| s.forced_errors.contains_key(name)) {
        return false;
    }
    let value = read_cstr(value);
    with_state(|s| {
        match s.devices.iter_mut().find(|d| d.id == device_id) {
            Some(device) => {
                set(device, value);
                true
            }
            None => false,
        }
    })
}

unsafe extern "C" fn mock_td_set_name(device_id: c_int, name: *const c_char) -> bool {
    string_setter("tdSetName", device_id, name, |d, v| d.name = v)
}

unsafe extern "C" fn mock_td_set_protocol(device_id: c_int, protocol: *const c_char) -> bool {
    string_setter("tdSetProtocol", device_id, protocol, |d, v| d.protocol = v)
}

unsafe extern "C" fn mock_td_set_model(device_id: c_int, model: *const c_char) -> bool {
    string_setter("tdSetModel", device_id, model, |d, v| d.model = v)
}

unsafe extern "C" fn mock_td_get_device_parameter(
    device_id: c_int,
    name: *const c_char,
    default_value: *const c_char,
) -> *mut c_char {
    let name = read_cstr(name);
    let default_value = read_cstr(default_value);
    let value = with_state(|s| {
        s.devices
            .iter()
            .find(|d| d.id == device_id)
            .and_then(|d| d.parameters.get(&name).cloned())
    });
    give_string(&value.unwrap_or(default_value))
}

unsafe extern "C" fn mock_td_set_device_parameter(
    device_id: c_int,
    name: *const c_char,
    value: *const c_char,
) -> bool {
    if with_state(|s| s.forced_errors.contains_key("tdSetDeviceParameter")) {
        return false;
    }
    let name = read_cstr(name);
    let value = read_cstr(value);
    with_state(|s| {
        match s.devices.iter_mut().find(|d| d.id == device_id) {
            Some(device) => {
                device.parameters.insert(name, value);
                true
            }
            None => false,
        }
    })
}

unsafe extern "C" fn mock_td_add_device() -> c_int {
    if let Some(code) = forced("tdAddDevice") {
        return code;
    }
    with_state(|s| {
        let id = s.devices.iter().map(|d| d.id).max().unwrap_or(0) + 1;
        s.devices.push(MockDevice::new(id, ""));
        id
    })
}

unsafe extern "C" fn mock_td_remove_device(device_id: c_int) -> bool {
    with_state(|s| {
        let before = s.devices.len();
        s.devices.retain(|d| d.id != device_id);
        s.devices.len() != before
    })
}

macro_rules! mock_device_action {
    ($fn_name:ident, $entry:literal, $command:expr) => {
        unsafe extern "C" fn $fn_name(device_id: c_int) -> c_int {
            if let Some(code) = forced($entry) {
                return code;
            }
            with_state(|s| record_action(s, device_id, $entry, $command));
            ErrorCode::Success.as_raw()
        }
    };
}

mock_device_action!(mock_td_turn_on, "tdTurnOn", TELLSTICK_TURNON);
mock_device_action!(mock_td_turn_off, "tdTurnOff", TELLSTICK_TURNOFF);
mock_device_action!(mock_td_bell, "tdBell", TELLSTICK_BELL);
mock_device_action!(mock_td_execute, "tdExecute", TELLSTICK_EXECUTE);
mock_device_action!(mock_td_up, "tdUp", TELLSTICK_UP);
mock_device_action!(mock_td_down, "tdDown", TELLSTICK_DOWN);
mock_device_action!(mock_td_stop, "tdStop", TELLSTICK_STOP);
mock_device_action!(mock_td_learn, "tdLearn", TELLSTICK_LEARN);

unsafe extern "C" fn mock_td_dim(device_id: c_int, level: c_uchar) -> c_int {
    if let Some(code) = forced("tdDim") {
        return code;
    }
    with_state(|s| {
        record_action(s, device_id, "tdDim", TELLSTICK_DIM);
        if let Some(device) = s.devices.iter_mut().find(|d| d.id == device_id) {
            device.last_sent_value = level.to_string();
        }
    });
    ErrorCode::Success.as_raw()
}

unsafe extern "C" fn mock_td_methods(device_id: c_int, methods_supported: c_int) -> c_int {
    with_state(|s| {
        s.devices
            .iter()
            .find(|d| d.id == device_id)
            .map(|d| d.methods & methods_supported)
            .unwrap_or_else(|| ErrorCode::DeviceNotFound.as_raw())
    })
}

unsafe extern "C" fn mock_td_last_sent_command(
    device_id: c_int,
    methods_supported: c_int,
) -> c_int {
    with_state(|s| {
        s.devices
            .iter()
            .find(|d| d.id == device_id)
            .map(|d| d.last_sent_command & methods_supported)
            .unwrap_or_else(|| ErrorCode::DeviceNotFound.as_raw())
    })
}

unsafe extern "C" fn mock_td_last_sent_value(device_id: c_int) -> *mut c_char {
    string_getter("tdLastSentValue", device_id, |d| d.last_sent_value.clone())
}

unsafe extern "C" fn mock_td_send_raw_command(command: *const c_char, _reserved: c_int) -> c_int {
    if let Some(code) = forced("tdSendRawCommand") {
        return code;
    }
    let command = read_cstr(command);
    with_state(|s| s.last_raw_command = Some(command));
    ErrorCode::Success.as_raw()
}

unsafe extern "C" fn mock_td_connect_controller(vid: c_int, pid: c_int, serial: *const c_char) {
    let serial = read_cstr(serial);
    with_state(|s| s.connected.push((vid, pid, serial)));
}

unsafe extern "C" fn mock_td_disconnect_controller(vid: c_int, pid: c_int, serial: *const c_char) {
    let serial = read_cstr(serial);
    with_state(|s| s.disconnected.push((vid, pid, serial)));
}

unsafe extern "C" fn mock_td_sensor(
    protocol: *mut c_char,
    protocol_len: c_int,
    model: *mut c_char,
    model_len: c_int,
    id: *mut c_int,
    datatypes: *mut c_int,
) -> c_int {
    if let Some(code) = forced("tdSensor") {
        return code;
    }
    let next = with_state(|s| {
        match s.sensors.get(s.sensor_cursor).cloned() {
            Some(sensor) => {
                s.sensor_cursor += 1;
                Some(sensor)
            }
            None => {
                // Exhausted: restart the iteration on the next call, like
                // the real library does.
                s.sensor_cursor = 0;
                None
            }
        }
    });

    match next {
        Some(sensor) => {
            fill_buffer(protocol, protocol_len, &sensor.protocol);
            fill_buffer(model, model_len, &sensor.model);
            *id = sensor.id;
            *datatypes = sensor.datatypes;
            ErrorCode::Success.as_raw()
        }
        None => ErrorCode::DeviceNotFound.as_raw(),
    }
}

unsafe extern "C" fn mock_td_sensor_value(
    protocol: *const c_char,
    model: *const c_char,
    sensor_id: c_int,
    datatype: c_int,
    value: *mut c_char,
    value_len: c_int,
    timestamp: *mut c_int,
) -> c_int {
    if let Some(code) = forced("tdSensorValue") {
        return code;
    }
    let protocol = read_cstr(protocol);
    let model = read_cstr(model);
    let reading = with_state(|s| {
        s.sensors
            .iter()
            .find(|sensor| {
                sensor.protocol == protocol && sensor.model == model && sensor.id == sensor_id
            })
            .and_then(|sensor| sensor.values.get(&datatype).cloned())
    });

    match reading {
        Some((text, ts)) => {
            fill_buffer(value, value_len, &text);
            *timestamp = ts;
            ErrorCode::Success.as_raw()
        }
        None => ErrorCode::DeviceNotFound.as_raw(),
    }
}

unsafe extern "C" fn mock_td_controller(
    controller_id: *mut c_int,
    controller_type: *mut c_int,
    name: *mut c_char,
    name_len: c_int,
    available: *mut c_int,
) -> c_int {
    if let Some(code) = forced("tdController") {
        return code;
    }
    let next = with_state(|s| {
        match s.controllers.get(s.controller_cursor).cloned() {
            Some(controller) => {
                s.controller_cursor += 1;
                Some(controller)
            }
            None => {
                s.controller_cursor = 0;
                None
            }
        }
    });

    match next {
        Some(controller) => {
            *controller_id = controller.id;
            *controller_type = controller.controller_type;
            fill_buffer(name, name_len, &controller.name);
            *available = controller.available as c_int;
            ErrorCode::Success.as_raw()
        }
        None => ErrorCode::NotFound.as_raw(),
    }
}

unsafe extern "C" fn mock_td_controller_value(
    controller_id: c_int,
    name: *const c_char,
    value: *mut c_char,
    value_len: c_int,
) -> c_int {
    if let Some(code) = forced("tdControllerValue") {
        return code;
    }
    let name = read_cstr(name);
    let text = with_state(|s| {
        let controller = s.controllers.iter().find(|c| c.id == controller_id)?;
        match name.as_str() {
            "name" => Some(controller.name.clone()),
            "available" => Some(if controller.available { "1" } else { "0" }.to_string()),
            other => controller.values.get(other).cloned(),
        }
    });

    match text {
        Some(text) => {
            fill_buffer(value, value_len, &text);
            ErrorCode::Success.as_raw()
        }
        None => ErrorCode::MethodNotSupported.as_raw(),
    }
}

unsafe extern "C" fn mock_td_set_controller_value(
    controller_id: c_int,
    name: *const c_char,
    value: *const c_char,
) -> c_int {
    if let Some(code) = forced("tdSetControllerValue") {
        return code;
    }
    let name = read_cstr(name);
    let value = read_cstr(value);
    with_state(|s| {
        let Some(controller) = s.controllers.iter_mut().find(|c| c.id == controller_id) else {
            return ErrorCode::NotFound.as_raw();
        };
        // Only the name is writable through the native API.
        if name == "name" {
            controller.name = value;
            ErrorCode::Success.as_raw()
        } else {
            ErrorCode::Syntax.as_raw()
        }
    })
}

unsafe extern "C" fn mock_td_remove_controller(controller_id: c_int) -> c_int {
    with_state(|s| {
        let before = s.controllers.len();
        s.controllers.retain(|c| c.id != controller_id);
        if s.controllers.len() != before {
            ErrorCode::Success.as_raw()
        } else {
            ErrorCode::NotFound.as_raw()
        }
    })
}

fn register_thunk(kind: MockEventKind, thunk: usize, context: *mut c_void) -> c_int {
    with_state(|s| {
        let id = s.next_callback_id;
        s.next_callback_id += 1;
        s.registrations.insert(
            id,
            MockRegistration {
                kind,
                thunk,
                context: context as usize,
            },
        );
        id
    })
}

unsafe extern "C" fn mock_td_register_device_event(
    thunk: DeviceEventFn,
    context: *mut c_void,
) -> c_int {
    register_thunk(MockEventKind::Device, thunk as usize, context)
}

unsafe extern "C" fn mock_td_register_device_change_event(
    thunk: DeviceChangeEventFn,
    context: *mut c_void,
) -> c_int {
    register_thunk(MockEventKind::DeviceChange, thunk as usize, context)
}

unsafe extern "C" fn mock_td_register_raw_device_event(
    thunk: RawDeviceEventFn,
    context: *mut c_void,
) -> c_int {
    register_thunk(MockEventKind::RawDevice, thunk as usize, context)
}

unsafe extern "C" fn mock_td_register_sensor_event(
    thunk: SensorEventFn,
    context: *mut c_void,
) -> c_int {
    register_thunk(MockEventKind::Sensor, thunk as usize, context)
}

unsafe extern "C" fn mock_td_register_controller_event(
    thunk: ControllerEventFn,
    context: *mut c_void,
) -> c_int {
    register_thunk(MockEventKind::Controller, thunk as usize, context)
}

unsafe extern "C" fn mock_td_unregister_callback(callback_id: c_int) -> c_int {
    if let Some(code) = forced("tdUnregisterCallback") {
        return code;
    }
    with_state(|s| {
        if s.registrations.remove(&callback_id).is_some() {
            s.unregistered.push(callback_id);
            ErrorCode::Success.as_raw()
        } else {
            ErrorCode::NotFound.as_raw()
        }
    })
}
