//! Bridge between the native callback thread and consumer code
//!
//! telldus-core invokes registered callbacks on a thread it owns. The bridge
//! keeps a process-wide map from registration id to consumer callback, gives
//! the native library one stable `extern "C"` trampoline per event kind, and
//! redelivers each invocation through the active dispatch strategy.
//!
//! Correlation uses the id argument the native library appends to every
//! callback (second-to-last position); the trailing context pointer is
//! always NULL and is dropped. An id that no longer resolves means the event
//! raced with an unregistration and is discarded silently.

use crate::dispatch::EventDispatcher;
use crate::error::{Result, TelldusError};
use crate::events::{
    CallbackId, ControllerEvent, DeviceChangeEvent, DeviceEvent, RawDeviceEvent, SensorEvent,
};
use crate::library::{require, CoreLibrary};
use crate::marshal;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::os::raw::{c_char, c_int, c_void};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::ptr;
use std::sync::Arc;

/// A registered consumer callback, typed by event kind.
#[derive(Clone)]
enum RegisteredCallback {
    Device(Arc<dyn Fn(DeviceEvent) + Send + Sync>),
    DeviceChange(Arc<dyn Fn(DeviceChangeEvent) + Send + Sync>),
    RawDevice(Arc<dyn Fn(RawDeviceEvent) + Send + Sync>),
    Sensor(Arc<dyn Fn(SensorEvent) + Send + Sync>),
    Controller(Arc<dyn Fn(ControllerEvent) + Send + Sync>),
}

// Shared across every CoreLibrary handle of the current session. Lock order
// when both are needed: CALLBACKS before DISPATCHER.
static CALLBACKS: Mutex<BTreeMap<c_int, RegisteredCallback>> = Mutex::new(BTreeMap::new());
static DISPATCHER: Mutex<Option<Arc<dyn EventDispatcher>>> = Mutex::new(None);

pub(crate) fn dispatcher_active() -> bool {
    DISPATCHER.lock().is_some()
}

/// Install the dispatch strategy for the current session. Exactly one may
/// be active at a time.
pub(crate) fn install_dispatcher(dispatcher: Arc<dyn EventDispatcher>) -> Result<()> {
    let mut slot = DISPATCHER.lock();
    if slot.is_some() {
        return Err(TelldusError::DispatcherAlreadyInstalled);
    }
    *slot = Some(dispatcher);
    Ok(())
}

/// Clear the dispatcher at the end of a session so the next generation can
/// install its own.
pub(crate) fn clear_dispatcher() {
    *DISPATCHER.lock() = None;
}

/// Remove every registration, returning the ids for native-side cleanup.
pub(crate) fn drain_registrations() -> Vec<c_int> {
    let mut callbacks = CALLBACKS.lock();
    let ids = callbacks.keys().copied().collect();
    callbacks.clear();
    ids
}

#[cfg(test)]
pub(crate) fn registered_count() -> usize {
    CALLBACKS.lock().len()
}

fn ensure_dispatcher() -> Result<()> {
    if dispatcher_active() {
        Ok(())
    } else {
        Err(TelldusError::NoDispatcher)
    }
}

// ---- Registration ----
//
// The map lock is held across the native register call so the trampoline
// (which takes the same lock) cannot observe an id that is assigned but not
// yet mapped.

pub(crate) fn register_device<F>(lib: &CoreLibrary, callback: F) -> Result<CallbackId>
where
    F: Fn(DeviceEvent) + Send + Sync + 'static,
{
    ensure_dispatcher()?;
    let f = require(lib.fns().register_device_event, "tdRegisterDeviceEvent")?;
    let mut callbacks = CALLBACKS.lock();
    let id = lib.check_int(unsafe { f(device_event_trampoline, ptr::null_mut()) })?;
    callbacks.insert(id, RegisteredCallback::Device(Arc::new(callback)));
    Ok(CallbackId(id))
}

pub(crate) fn register_device_change<F>(lib: &CoreLibrary, callback: F) -> Result<CallbackId>
where
    F: Fn(DeviceChangeEvent) + Send + Sync + 'static,
{
    ensure_dispatcher()?;
    let f = require(
        lib.fns().register_device_change_event,
        "tdRegisterDeviceChangeEvent",
    )?;
    let mut callbacks = CALLBACKS.lock();
    let id = lib.check_int(unsafe { f(device_change_event_trampoline, ptr::null_mut()) })?;
    callbacks.insert(id, RegisteredCallback::DeviceChange(Arc::new(callback)));
    Ok(CallbackId(id))
}

pub(crate) fn register_raw_device<F>(lib: &CoreLibrary, callback: F) -> Result<CallbackId>
where
    F: Fn(RawDeviceEvent) + Send + Sync + 'static,
{
    ensure_dispatcher()?;
    let f = require(
        lib.fns().register_raw_device_event,
        "tdRegisterRawDeviceEvent",
    )?;
    let mut callbacks = CALLBACKS.lock();
    let id = lib.check_int(unsafe { f(raw_device_event_trampoline, ptr::null_mut()) })?;
    callbacks.insert(id, RegisteredCallback::RawDevice(Arc::new(callback)));
    Ok(CallbackId(id))
}

pub(crate) fn register_sensor<F>(lib: &CoreLibrary, callback: F) -> Result<CallbackId>
where
    F: Fn(SensorEvent) + Send + Sync + 'static,
{
    ensure_dispatcher()?;
    let f = require(lib.fns().register_sensor_event, "tdRegisterSensorEvent")?;
    let mut callbacks = CALLBACKS.lock();
    let id = lib.check_int(unsafe { f(sensor_event_trampoline, ptr::null_mut()) })?;
    callbacks.insert(id, RegisteredCallback::Sensor(Arc::new(callback)));
    Ok(CallbackId(id))
}

pub(crate) fn register_controller<F>(lib: &CoreLibrary, callback: F) -> Result<CallbackId>
where
    F: Fn(ControllerEvent) + Send + Sync + 'static,
{
    ensure_dispatcher()?;
    let f = require(
        lib.fns().register_controller_event,
        "tdRegisterControllerEvent",
    )?;
    let mut callbacks = CALLBACKS.lock();
    let id = lib.check_int(unsafe { f(controller_event_trampoline, ptr::null_mut()) })?;
    callbacks.insert(id, RegisteredCallback::Controller(Arc::new(callback)));
    Ok(CallbackId(id))
}

/// Unregister a callback. Local removal happens first so repeated cleanup
/// attempts stay idempotent even when the native call fails.
pub(crate) fn unregister(lib: &CoreLibrary, id: CallbackId) -> Result<()> {
    CALLBACKS.lock().remove(&id.0);
    let f = require(lib.fns().unregister_callback, "tdUnregisterCallback")?;
    lib.check_int(unsafe { f(id.0) }).map(drop)
}

// ---- Delivery (native callback thread) ----

/// Resolve a delivery's registration and the active dispatcher. None means
/// the event raced with unregistration or session teardown: drop it.
fn resolve(id: c_int) -> Option<(RegisteredCallback, Arc<dyn EventDispatcher>)> {
    let callback = CALLBACKS.lock().get(&id).cloned()?;
    let dispatcher = DISPATCHER.lock().clone()?;
    Some((callback, dispatcher))
}

unsafe extern "C" fn device_event_trampoline(
    device_id: c_int,
    method: c_int,
    data: *const c_char,
    callback_id: c_int,
    _context: *mut c_void,
) {
    let _ = catch_unwind(AssertUnwindSafe(|| {
        let data = marshal::decode_ptr(data);
        let Some((callback, dispatcher)) = resolve(callback_id) else {
            return;
        };
        let RegisteredCallback::Device(callback) = callback else {
            return;
        };
        let event = DeviceEvent {
            device_id,
            method,
            data,
            callback_id: CallbackId(callback_id),
        };
        dispatcher.dispatch(Box::new(move || callback(event)));
    }));
}

unsafe extern "C" fn device_change_event_trampoline(
    device_id: c_int,
    event: c_int,
    change_type: c_int,
    callback_id: c_int,
    _context: *mut c_void,
) {
    let _ = catch_unwind(AssertUnwindSafe(|| {
        let Some((callback, dispatcher)) = resolve(callback_id) else {
            return;
        };
        let RegisteredCallback::DeviceChange(callback) = callback else {
            return;
        };
        let event = DeviceChangeEvent {
            device_id,
            event,
            change_type,
            callback_id: CallbackId(callback_id),
        };
        dispatcher.dispatch(Box::new(move || callback(event)));
    }));
}

unsafe extern "C" fn raw_device_event_trampoline(
    data: *const c_char,
    controller_id: c_int,
    callback_id: c_int,
    _context: *mut c_void,
) {
    let _ = catch_unwind(AssertUnwindSafe(|| {
        let data = marshal::decode_ptr(data);
        let Some((callback, dispatcher)) = resolve(callback_id) else {
            return;
        };
        let RegisteredCallback::RawDevice(callback) = callback else {
            return;
        };
        let event = RawDeviceEvent {
            data,
            controller_id,
            callback_id: CallbackId(callback_id),
        };
        dispatcher.dispatch(Box::new(move || callback(event)));
    }));
}

unsafe extern "C" fn sensor_event_trampoline(
    protocol: *const c_char,
    model: *const c_char,
    sensor_id: c_int,
    datatype: c_int,
    value: *const c_char,
    timestamp: c_int,
    callback_id: c_int,
    _context: *mut c_void,
) {
    let _ = catch_unwind(AssertUnwindSafe(|| {
        let protocol = marshal::decode_ptr(protocol);
        let model = marshal::decode_ptr(model);
        let value = marshal::decode_ptr(value);
        let Some((callback, dispatcher)) = resolve(callback_id) else {
            return;
        };
        let RegisteredCallback::Sensor(callback) = callback else {
            return;
        };
        let event = SensorEvent {
            protocol,
            model,
            sensor_id,
            datatype,
            value,
            timestamp,
            callback_id: CallbackId(callback_id),
        };
        dispatcher.dispatch(Box::new(move || callback(event)));
    }));
}

unsafe extern "C" fn controller_event_trampoline(
    controller_id: c_int,
    event: c_int,
    change_type: c_int,
    new_value: *const c_char,
    callback_id: c_int,
    _context: *mut c_void,
) {
    let _ = catch_unwind(AssertUnwindSafe(|| {
        let new_value = marshal::decode_ptr(new_value);
        let Some((callback, dispatcher)) = resolve(callback_id) else {
            return;
        };
        let RegisteredCallback::Controller(callback) = callback else {
            return;
        };
        let event = ControllerEvent {
            controller_id,
            event,
            change_type,
            new_value,
            callback_id: CallbackId(callback_id),
        };
        dispatcher.dispatch(Box::new(move || callback(event)));
    }));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::{DirectDispatcher, EventLoopDispatcher, QueuedDispatcher};
    use crate::ffi::{TELLSTICK_DEVICE_ADDED, TELLSTICK_TURNON};
    use crate::mock::MockCore;
    use crossbeam_channel::unbounded;
    use std::sync::Arc;

    fn collector<E: Send + 'static>() -> (Arc<parking_lot::Mutex<Vec<E>>>, impl Fn(E) + Send + Sync)
    {
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let sink = seen.clone();
        (seen, move |event| sink.lock().push(event))
    }

    #[test]
    fn test_direct_dispatch_delivers_on_callback_thread() {
        let mock = MockCore::activate();
        let lib = mock.open_with_dispatcher(Arc::new(DirectDispatcher::new())).unwrap();

        let (seen, sink) = collector::<DeviceEvent>();
        let id = lib.register_device_event(sink).unwrap();

        mock.trigger_device_event(1, TELLSTICK_TURNON, "foo");

        let events = seen.lock();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].device_id, 1);
        assert_eq!(events[0].method, TELLSTICK_TURNON);
        assert_eq!(events[0].data, "foo");
        assert_eq!(events[0].callback_id, id);
    }

    #[test]
    fn test_two_handles_share_session_and_both_receive() {
        let mock = MockCore::activate();
        let first = mock.open_with_dispatcher(Arc::new(DirectDispatcher::new())).unwrap();
        let second = mock.open().unwrap();
        assert_eq!(mock.load_count(), 1);

        let (seen_a, sink_a) = collector::<DeviceEvent>();
        let (seen_b, sink_b) = collector::<DeviceEvent>();
        first.register_device_event(sink_a).unwrap();
        second.register_device_event(sink_b).unwrap();

        mock.trigger_device_event(1, 2, "foo");

        for seen in [&seen_a, &seen_b] {
            let events = seen.lock();
            assert_eq!(events.len(), 1);
            assert_eq!(
                (events[0].device_id, events[0].method, events[0].data.as_str()),
                (1, 2, "foo")
            );
        }

        drop(first);
        drop(second);
        assert_eq!(mock.close_count(), 1);

        let _reopened = mock.open().unwrap();
        assert_eq!(mock.load_count(), 2);
    }

    #[test]
    fn test_unregistered_subset_no_longer_delivered() {
        let mock = MockCore::activate();
        let lib = mock.open_with_dispatcher(Arc::new(DirectDispatcher::new())).unwrap();

        let (seen_a, sink_a) = collector::<DeviceEvent>();
        let (seen_b, sink_b) = collector::<DeviceEvent>();
        let (seen_c, sink_c) = collector::<DeviceEvent>();
        let _keep_a = lib.register_device_event(sink_a).unwrap();
        let dropped = lib.register_device_event(sink_b).unwrap();
        let _keep_c = lib.register_device_event(sink_c).unwrap();

        lib.unregister_callback(dropped).unwrap();
        mock.trigger_device_event(9, TELLSTICK_TURNON, "");

        assert_eq!(seen_a.lock().len(), 1);
        assert_eq!(seen_b.lock().len(), 0);
        assert_eq!(seen_c.lock().len(), 1);
        assert_eq!(mock.unregistered_ids(), vec![dropped.0]);
    }

    #[test]
    fn test_queued_dispatch_preserves_emission_order() {
        let mock = MockCore::activate();
        let queue = Arc::new(QueuedDispatcher::new());
        let lib = mock.open_with_dispatcher(queue.clone()).unwrap();

        let (seen, sink) = collector::<DeviceEvent>();
        lib.register_device_event(sink).unwrap();

        for (i, data) in ["first", "second", "third"].iter().enumerate() {
            mock.trigger_device_event(i as i32, TELLSTICK_TURNON, data);
        }

        // Nothing runs until the consumer drains the queue.
        assert!(seen.lock().is_empty());
        assert_eq!(queue.pending(), 3);
        assert_eq!(queue.process_all_pending(), 3);

        let events = seen.lock();
        let order: Vec<&str> = events.iter().map(|e| e.data.as_str()).collect();
        assert_eq!(order, vec!["first", "second", "third"]);
        assert!(!queue.process_one(false));
    }

    #[test]
    fn test_queued_events_survive_unregistration_once_enqueued() {
        let mock = MockCore::activate();
        let queue = Arc::new(QueuedDispatcher::new());
        let lib = mock.open_with_dispatcher(queue.clone()).unwrap();

        let (seen, sink) = collector::<DeviceEvent>();
        let id = lib.register_device_event(sink).unwrap();

        mock.trigger_device_event(1, TELLSTICK_TURNON, "queued");
        lib.unregister_callback(id).unwrap();

        // The bridge check already passed when the event was enqueued, so
        // draining still delivers it.
        assert_eq!(queue.process_all_pending(), 1);
        assert_eq!(seen.lock().len(), 1);
    }

    #[test]
    fn test_stale_id_is_dropped_silently() {
        let mock = MockCore::activate();
        let lib = mock.open_with_dispatcher(Arc::new(DirectDispatcher::new())).unwrap();

        let (seen, sink) = collector::<DeviceEvent>();
        let id = lib.register_device_event(sink).unwrap();

        mock.trigger_stale_device_event(1, TELLSTICK_TURNON, "late", id.0 + 1000);
        assert!(seen.lock().is_empty());

        // The bridge is still healthy afterwards.
        mock.trigger_device_event(1, TELLSTICK_TURNON, "fresh");
        assert_eq!(seen.lock().len(), 1);
    }

    #[test]
    fn test_all_event_kinds_deliver_typed_payloads() {
        let mock = MockCore::activate();
        let lib = mock.open_with_dispatcher(Arc::new(DirectDispatcher::new())).unwrap();

        let (devices, device_sink) = collector::<DeviceEvent>();
        let (changes, change_sink) = collector::<DeviceChangeEvent>();
        let (raws, raw_sink) = collector::<RawDeviceEvent>();
        let (sensors, sensor_sink) = collector::<SensorEvent>();
        let (controllers, controller_sink) = collector::<ControllerEvent>();

        lib.register_device_event(device_sink).unwrap();
        lib.register_device_change_event(change_sink).unwrap();
        lib.register_raw_device_event(raw_sink).unwrap();
        lib.register_sensor_event(sensor_sink).unwrap();
        lib.register_controller_event(controller_sink).unwrap();

        mock.trigger_device_event(1, TELLSTICK_TURNON, "255");
        mock.trigger_device_change_event(2, TELLSTICK_DEVICE_ADDED, 0);
        mock.trigger_raw_device_event("class:command;protocol:arctech;", 3);
        mock.trigger_sensor_event("fineoffset", "temperaturehumidity", 11, 1, "21.5", 1_400_000_000);
        mock.trigger_controller_event(4, 1, 2, "newvalue");

        assert_eq!(devices.lock().len(), 1);
        assert_eq!(changes.lock()[0].event, TELLSTICK_DEVICE_ADDED);
        assert_eq!(raws.lock()[0].data, "class:command;protocol:arctech;");
        assert_eq!(raws.lock()[0].controller_id, 3);

        let sensor = &sensors.lock()[0];
        assert_eq!(sensor.protocol, "fineoffset");
        assert_eq!(sensor.value, "21.5");
        assert_eq!(sensor.timestamp, 1_400_000_000);

        let controller = &controllers.lock()[0];
        assert_eq!(controller.controller_id, 4);
        assert_eq!(controller.new_value, "newvalue");
    }

    #[test]
    fn test_register_without_dispatcher_fails() {
        let mock = MockCore::activate();
        let lib = mock.open().unwrap();

        let err = lib.register_device_event(|_| {}).unwrap_err();
        assert!(matches!(err, TelldusError::NoDispatcher));
    }

    #[test]
    fn test_second_dispatcher_rejected_within_session() {
        let mock = MockCore::activate();
        let first = mock.open_with_dispatcher(Arc::new(DirectDispatcher::new())).unwrap();

        let err = mock
            .open_with_dispatcher(Arc::new(QueuedDispatcher::new()))
            .unwrap_err();
        assert!(matches!(err, TelldusError::DispatcherAlreadyInstalled));

        // A new generation starts with a free dispatcher slot.
        drop(first);
        let _second = mock
            .open_with_dispatcher(Arc::new(QueuedDispatcher::new()))
            .unwrap();
    }

    #[test]
    fn test_panicking_callback_does_not_kill_delivery() {
        let mock = MockCore::activate();
        let lib = mock.open_with_dispatcher(Arc::new(DirectDispatcher::new())).unwrap();

        lib.register_device_event(|_| panic!("consumer bug")).unwrap();
        let (seen, sink) = collector::<DeviceEvent>();
        lib.register_device_event(sink).unwrap();

        mock.trigger_device_event(1, TELLSTICK_TURNON, "a");
        mock.trigger_device_event(2, TELLSTICK_TURNON, "b");

        assert_eq!(seen.lock().len(), 2);
    }

    #[test]
    fn test_last_drop_unregisters_everything_before_close() {
        let mock = MockCore::activate();
        let lib = mock.open_with_dispatcher(Arc::new(DirectDispatcher::new())).unwrap();

        lib.register_device_event(|_| {}).unwrap();
        lib.register_device_change_event(|_| {}).unwrap();
        lib.register_raw_device_event(|_| {}).unwrap();
        lib.register_sensor_event(|_| {}).unwrap();
        lib.register_controller_event(|_| {}).unwrap();

        let registered = mock.registered_ids();
        assert_eq!(registered.len(), 5);

        drop(lib);
        let mut unregistered = mock.unregistered_ids();
        unregistered.sort_unstable();
        assert_eq!(unregistered, registered);
        assert_eq!(mock.close_count(), 1);

        // The next generation starts with zero registrations.
        let _reopened = mock.open().unwrap();
        assert_eq!(registered_count(), 0);
    }

    #[test]
    fn test_teardown_swallows_native_unregister_failure() {
        let mock = MockCore::activate();
        let lib = mock.open_with_dispatcher(Arc::new(DirectDispatcher::new())).unwrap();
        lib.register_device_event(|_| {}).unwrap();

        mock.force_error("tdUnregisterCallback", -99);
        drop(lib);

        // Close still happens and the local map is cleared.
        assert_eq!(mock.close_count(), 1);
        assert_eq!(registered_count(), 0);
    }

    #[test]
    fn test_event_loop_dispatcher_runs_on_consumer_loop() {
        let mock = MockCore::activate();
        let (jobs_tx, jobs_rx) = unbounded();
        let dispatcher = Arc::new(EventLoopDispatcher::new(move |job| {
            let _ = jobs_tx.send(job);
        }));
        let lib = mock.open_with_dispatcher(dispatcher).unwrap();

        let (seen, sink) = collector::<DeviceEvent>();
        lib.register_device_event(sink).unwrap();

        mock.trigger_device_event(5, TELLSTICK_TURNON, "loop");
        assert!(seen.lock().is_empty());

        // The consumer's loop picks the scheduled job up at its leisure.
        jobs_rx.recv().unwrap()();
        assert_eq!(seen.lock().len(), 1);
        assert_eq!(seen.lock()[0].device_id, 5);
    }
}
