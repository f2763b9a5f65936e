//! # tellstick_core - telldus-core runtime binding
//!
//! Loads the native telldus-core library at runtime and exposes its full
//! API as typed Rust calls, including asynchronous event callbacks.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────┐     ┌──────────────────┐
//! │  telldus-core    │────▶│   libloading     │
//! │  (native module) │     │                  │
//! └────────┬─────────┘     └──────────────────┘
//!          │ bind once per load
//!          ▼
//! ┌──────────────────┐     ┌──────────────────┐
//! │  FunctionTable   │◀────│   CoreLibrary    │ ◀── shared, refcounted
//! │  (entry points)  │     │  (typed calls)   │
//! └────────┬─────────┘     └────────┬─────────┘
//!          │ native callback thread │ register / unregister
//!          ▼                        ▼
//! ┌──────────────────┐     ┌──────────────────┐
//! │ callback bridge  │────▶│ EventDispatcher  │ ◀── Direct / Queued /
//! │ (id -> callback) │     │ (delivery site)  │     EventLoop
//! └──────────────────┘     └──────────────────┘
//! ```
//!
//! The native session is process-wide: every [`CoreLibrary`] shares one
//! loaded module, initialized on the first open and closed when the last
//! handle drops. Event callbacks arrive on a thread owned by telldus-core;
//! the bridge redelivers them through the dispatch strategy installed for
//! the session.
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use tellstick_core::{CoreLibrary, OpenOptions, QueuedDispatcher};
//!
//! let queue = Arc::new(QueuedDispatcher::new());
//! let lib = CoreLibrary::open_with(OpenOptions {
//!     dispatcher: Some(queue.clone()),
//!     ..Default::default()
//! })?;
//!
//! lib.register_device_event(|event| {
//!     println!("device {} method {}", event.device_id, event.method);
//! })?;
//!
//! lib.turn_on(1)?;
//! queue.process_one(true); // deliver on this thread
//! ```

mod callback;
mod dispatch;
mod error;
mod events;
pub mod ffi;
mod library;
mod marshal;

#[cfg(any(test, feature = "mock"))]
pub mod mock;

pub use dispatch::{DirectDispatcher, DispatchJob, EventDispatcher, EventLoopDispatcher, QueuedDispatcher};
pub use error::{ErrorCode, Result, TelldusError};
pub use events::{
    CallbackId, ControllerEvent, DeviceChangeEvent, DeviceEvent, RawDeviceEvent, SensorEvent,
};
pub use library::{ControllerInfo, CoreLibrary, OpenOptions, SensorInfo, SensorValue};
pub use marshal::{set_string_encoding, string_encoding, TextEncoding};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::dispatch::{
        DirectDispatcher, EventDispatcher, EventLoopDispatcher, QueuedDispatcher,
    };
    pub use crate::error::{ErrorCode, Result, TelldusError};
    pub use crate::events::{
        CallbackId, ControllerEvent, DeviceChangeEvent, DeviceEvent, RawDeviceEvent, SensorEvent,
    };
    pub use crate::library::{ControllerInfo, CoreLibrary, OpenOptions, SensorInfo, SensorValue};
}
