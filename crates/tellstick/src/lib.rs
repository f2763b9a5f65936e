//! # tellstick - TellStick home automation
//!
//! High-level API over the telldus-core binding: enumerate and command
//! devices, read sensors, manage controllers and subscribe to events.
//!
//! ```ignore
//! use tellstick::TellStick;
//!
//! let tellstick = TellStick::new()?;
//! for device in tellstick.devices()? {
//!     println!("{}: {}", device.id(), device.name()?);
//!     device.turn_on()?;
//! }
//! ```
//!
//! Event callbacks need a dispatch strategy; see
//! [`tellstick_core::QueuedDispatcher`] for delivering events on a thread
//! you control, or the crate examples for a full event loop.

mod controller;
mod device;
mod hub;
mod sensor;

pub use controller::Controller;
pub use device::Device;
pub use hub::TellStick;
pub use sensor::Sensor;

// The binding layer's vocabulary is part of this crate's API surface.
pub use tellstick_core::ffi;
pub use tellstick_core::{
    CallbackId, ControllerEvent, DeviceChangeEvent, DeviceEvent, DirectDispatcher,
    ErrorCode, EventDispatcher, EventLoopDispatcher, OpenOptions, QueuedDispatcher,
    RawDeviceEvent, Result, SensorEvent, SensorValue, TelldusError,
};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::{Controller, Device, Sensor, TellStick};
    pub use tellstick_core::prelude::*;
}
