//! Device wrapper
//!
//! A [`Device`] addresses one configured device by id and wraps every native
//! device operation in a typed accessor.

use std::collections::BTreeMap;
use tellstick_core::{CoreLibrary, Result};

/// Probe value used to tell an unset parameter apart from a real one, since
/// the native getter cannot signal absence itself.
const PARAMETER_SENTINEL: &str = "$%!)(INVALID)(!%$";

/// A configured device in telldus-core.
#[derive(Debug)]
pub struct Device {
    id: i32,
    lib: CoreLibrary,
}

impl Device {
    /// Parameter names telldus-core stores for the common protocols.
    pub const PARAMETERS: [&'static str; 7] =
        ["devices", "house", "unit", "code", "system", "units", "fade"];

    pub(crate) fn new(id: i32, lib: CoreLibrary) -> Self {
        Self { id, lib }
    }

    pub fn id(&self) -> i32 {
        self.id
    }

    // ---- Configuration ----

    pub fn name(&self) -> Result<String> {
        self.lib.device_name(self.id)
    }

    pub fn set_name(&self, name: &str) -> Result<()> {
        self.lib.set_device_name(self.id, name)
    }

    pub fn protocol(&self) -> Result<String> {
        self.lib.device_protocol(self.id)
    }

    pub fn set_protocol(&self, protocol: &str) -> Result<()> {
        self.lib.set_device_protocol(self.id, protocol)
    }

    pub fn model(&self) -> Result<String> {
        self.lib.device_model(self.id)
    }

    pub fn set_model(&self, model: &str) -> Result<()> {
        self.lib.set_device_model(self.id, model)
    }

    /// TELLSTICK_TYPE_* constant for this device.
    pub fn device_type(&self) -> Result<i32> {
        self.lib.device_type(self.id)
    }

    /// A stored parameter, or None when it has never been set.
    pub fn parameter(&self, name: &str) -> Result<Option<String>> {
        let value = self
            .lib
            .device_parameter(self.id, name, PARAMETER_SENTINEL)?;
        if value == PARAMETER_SENTINEL {
            Ok(None)
        } else {
            Ok(Some(value))
        }
    }

    pub fn set_parameter(&self, name: &str, value: &str) -> Result<()> {
        self.lib.set_device_parameter(self.id, name, value)
    }

    /// All well-known parameters that are set on this device.
    pub fn parameters(&self) -> Result<BTreeMap<String, String>> {
        let mut parameters = BTreeMap::new();
        for name in Self::PARAMETERS {
            if let Some(value) = self.parameter(name)? {
                parameters.insert(name.to_string(), value);
            }
        }
        Ok(parameters)
    }

    // ---- Commands ----

    pub fn turn_on(&self) -> Result<()> {
        self.lib.turn_on(self.id)
    }

    pub fn turn_off(&self) -> Result<()> {
        self.lib.turn_off(self.id)
    }

    pub fn bell(&self) -> Result<()> {
        self.lib.bell(self.id)
    }

    /// Dim to `level`, 0 (off) to 255 (full).
    pub fn dim(&self, level: u8) -> Result<()> {
        self.lib.dim(self.id, level)
    }

    pub fn execute(&self) -> Result<()> {
        self.lib.execute(self.id)
    }

    pub fn up(&self) -> Result<()> {
        self.lib.up(self.id)
    }

    pub fn down(&self) -> Result<()> {
        self.lib.down(self.id)
    }

    pub fn stop(&self) -> Result<()> {
        self.lib.stop(self.id)
    }

    pub fn learn(&self) -> Result<()> {
        self.lib.learn(self.id)
    }

    /// The subset of `methods_supported` this device implements.
    pub fn methods(&self, methods_supported: i32) -> Result<i32> {
        self.lib.methods(self.id, methods_supported)
    }

    pub fn last_sent_command(&self, methods_supported: i32) -> Result<i32> {
        self.lib.last_sent_command(self.id, methods_supported)
    }

    pub fn last_sent_value(&self) -> Result<String> {
        self.lib.last_sent_value(self.id)
    }

    /// Remove the device from telldus-core.
    pub fn remove(self) -> Result<()> {
        self.lib.remove_device(self.id)
    }
}
