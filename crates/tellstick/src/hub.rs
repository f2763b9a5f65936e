//! High-level entry point
//!
//! [`TellStick`] wraps a shared [`CoreLibrary`] handle and exposes the
//! device/sensor/controller object model on top of it. Every operation is a
//! thin pass-through; telldus-core owns all actual device logic.

use crate::controller::Controller;
use crate::device::Device;
use crate::sensor::Sensor;
use tellstick_core::{
    CallbackId, ControllerEvent, CoreLibrary, DeviceChangeEvent, DeviceEvent, ErrorCode,
    OpenOptions, RawDeviceEvent, Result, SensorEvent,
};

/// Client for the telldus-core service.
pub struct TellStick {
    lib: CoreLibrary,
}

impl TellStick {
    /// Connect using the platform-default native library.
    pub fn new() -> Result<Self> {
        Ok(Self {
            lib: CoreLibrary::open()?,
        })
    }

    /// Connect with an explicit library path and/or dispatch strategy.
    pub fn with_options(options: OpenOptions) -> Result<Self> {
        Ok(Self {
            lib: CoreLibrary::open_with(options)?,
        })
    }

    /// Wrap an already-open library handle.
    pub fn from_library(lib: CoreLibrary) -> Self {
        Self { lib }
    }

    /// The underlying binding handle.
    pub fn library(&self) -> &CoreLibrary {
        &self.lib
    }

    /// All configured devices.
    pub fn devices(&self) -> Result<Vec<Device>> {
        let count = self.lib.number_of_devices()?;
        let mut devices = Vec::with_capacity(count as usize);
        for index in 0..count {
            let id = self.lib.device_id(index)?;
            devices.push(Device::new(id, self.lib.clone()));
        }
        Ok(devices)
    }

    /// All sensors telldus-core has seen readings from.
    pub fn sensors(&self) -> Result<Vec<Sensor>> {
        let mut sensors = Vec::new();
        loop {
            match self.lib.next_sensor() {
                Ok(info) => sensors.push(Sensor::new(
                    info.protocol,
                    info.model,
                    info.id,
                    info.datatypes,
                    self.lib.clone(),
                )),
                // End of iteration; anything else is a real failure.
                Err(e) if e.error_code() == Some(ErrorCode::DeviceNotFound) => break,
                Err(e) => return Err(e),
            }
        }
        Ok(sensors)
    }

    /// All controllers that are or have been connected.
    pub fn controllers(&self) -> Result<Vec<Controller>> {
        let mut controllers = Vec::new();
        loop {
            match self.lib.next_controller() {
                Ok(info) => controllers.push(Controller::new(
                    info.id,
                    info.controller_type,
                    info.name,
                    info.available,
                    self.lib.clone(),
                )),
                Err(e) if e.error_code() == Some(ErrorCode::NotFound) => break,
                Err(e) => return Err(e),
            }
        }
        Ok(controllers)
    }

    /// Create and configure a new device.
    ///
    /// If any configuration step fails, the half-configured device is
    /// removed again before the error is returned.
    pub fn add_device(
        &self,
        name: &str,
        protocol: &str,
        model: Option<&str>,
        parameters: &[(&str, &str)],
    ) -> Result<Device> {
        let device = Device::new(self.lib.add_device()?, self.lib.clone());

        if let Err(e) = self.configure_device(&device, name, protocol, model, parameters) {
            if let Err(remove_err) = self.lib.remove_device(device.id()) {
                log::warn!(
                    "failed to remove half-configured device {}: {}",
                    device.id(),
                    remove_err
                );
            }
            return Err(e);
        }
        Ok(device)
    }

    fn configure_device(
        &self,
        device: &Device,
        name: &str,
        protocol: &str,
        model: Option<&str>,
        parameters: &[(&str, &str)],
    ) -> Result<()> {
        device.set_name(name)?;
        device.set_protocol(protocol)?;
        if let Some(model) = model {
            device.set_model(model)?;
        }
        for (key, value) in parameters {
            device.set_parameter(key, value)?;
        }
        Ok(())
    }

    /// Transmit a raw protocol command through the connected TellStick.
    pub fn send_raw_command(&self, command: &str) -> Result<()> {
        self.lib.send_raw_command(command, 0)
    }

    /// Tell the service to use a controller it cannot autodetect.
    pub fn connect_controller(&self, vid: i32, pid: i32, serial: &str) -> Result<()> {
        self.lib.connect_controller(vid, pid, serial)
    }

    pub fn disconnect_controller(&self, vid: i32, pid: i32, serial: &str) -> Result<()> {
        self.lib.disconnect_controller(vid, pid, serial)
    }

    // ---- Event callbacks ----

    pub fn register_device_event<F>(&self, callback: F) -> Result<CallbackId>
    where
        F: Fn(DeviceEvent) + Send + Sync + 'static,
    {
        self.lib.register_device_event(callback)
    }

    pub fn register_device_change_event<F>(&self, callback: F) -> Result<CallbackId>
    where
        F: Fn(DeviceChangeEvent) + Send + Sync + 'static,
    {
        self.lib.register_device_change_event(callback)
    }

    pub fn register_raw_device_event<F>(&self, callback: F) -> Result<CallbackId>
    where
        F: Fn(RawDeviceEvent) + Send + Sync + 'static,
    {
        self.lib.register_raw_device_event(callback)
    }

    pub fn register_sensor_event<F>(&self, callback: F) -> Result<CallbackId>
    where
        F: Fn(SensorEvent) + Send + Sync + 'static,
    {
        self.lib.register_sensor_event(callback)
    }

    pub fn register_controller_event<F>(&self, callback: F) -> Result<CallbackId>
    where
        F: Fn(ControllerEvent) + Send + Sync + 'static,
    {
        self.lib.register_controller_event(callback)
    }

    pub fn unregister_callback(&self, id: CallbackId) -> Result<()> {
        self.lib.unregister_callback(id)
    }
}
