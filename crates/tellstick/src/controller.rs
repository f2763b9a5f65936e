//! Controller wrapper

use tellstick_core::{CoreLibrary, ErrorCode, Result};

/// A TellStick controller known to telldus-core.
///
/// Identity and availability come from controller enumeration; the typed
/// accessors read live values through the native API. Properties a
/// controller does not support read as `None` rather than an error.
pub struct Controller {
    id: i32,
    controller_type: i32,
    name: String,
    available: bool,
    lib: CoreLibrary,
}

impl Controller {
    pub(crate) fn new(
        id: i32,
        controller_type: i32,
        name: String,
        available: bool,
        lib: CoreLibrary,
    ) -> Self {
        Self {
            id,
            controller_type,
            name,
            available,
            lib,
        }
    }

    pub fn id(&self) -> i32 {
        self.id
    }

    /// TELLSTICK_CONTROLLER_* constant for this controller.
    pub fn controller_type(&self) -> i32 {
        self.controller_type
    }

    /// Name as reported at enumeration time.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the controller was connected at enumeration time.
    pub fn is_available(&self) -> bool {
        self.available
    }

    /// Read a controller value; None when the controller does not support
    /// the property.
    pub fn value(&self, name: &str) -> Result<Option<String>> {
        match self.lib.controller_value(self.id, name) {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.error_code() == Some(ErrorCode::MethodNotSupported) => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub fn firmware(&self) -> Result<Option<String>> {
        self.value("firmware")
    }

    pub fn serial(&self) -> Result<Option<String>> {
        self.value("serial")
    }

    /// Rename the controller.
    pub fn set_name(&mut self, name: &str) -> Result<()> {
        self.lib.set_controller_value(self.id, "name", name)?;
        self.name = name.to_string();
        Ok(())
    }

    /// Write a controller value. Ok(false) means the property is not
    /// writable on this controller.
    pub fn set_value(&self, name: &str, value: &str) -> Result<bool> {
        match self.lib.set_controller_value(self.id, name, value) {
            Ok(()) => Ok(true),
            Err(e) if e.error_code() == Some(ErrorCode::Syntax) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Forget the controller. Only works while it is disconnected.
    pub fn remove(self) -> Result<()> {
        self.lib.remove_controller(self.id)
    }
}
