//! Error types for the telldus-core binding

use thiserror::Error;

/// Result type for binding operations
pub type Result<T> = std::result::Result<T, TelldusError>;

/// The closed set of error codes returned by telldus-core.
///
/// Raw codes outside this set classify as [`ErrorCode::Unknown`]; the exact
/// raw value is still carried by [`TelldusError::Call`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum ErrorCode {
    Success = 0,
    NotFound = -1,
    PermissionDenied = -2,
    DeviceNotFound = -3,
    MethodNotSupported = -4,
    Communication = -5,
    ConnectingService = -6,
    UnknownResponse = -7,
    Syntax = -8,
    BrokenPipe = -9,
    CommunicatingService = -10,
    ConfigSyntax = -11,
    Unknown = -99,
}

impl ErrorCode {
    /// Classify a raw native result code.
    pub fn from_raw(raw: i32) -> Self {
        match raw {
            0 => ErrorCode::Success,
            -1 => ErrorCode::NotFound,
            -2 => ErrorCode::PermissionDenied,
            -3 => ErrorCode::DeviceNotFound,
            -4 => ErrorCode::MethodNotSupported,
            -5 => ErrorCode::Communication,
            -6 => ErrorCode::ConnectingService,
            -7 => ErrorCode::UnknownResponse,
            -8 => ErrorCode::Syntax,
            -9 => ErrorCode::BrokenPipe,
            -10 => ErrorCode::CommunicatingService,
            -11 => ErrorCode::ConfigSyntax,
            _ => ErrorCode::Unknown,
        }
    }

    /// The numeric code as the native API defines it.
    pub fn as_raw(self) -> i32 {
        self as i32
    }
}

/// Errors that can occur in the binding layer
#[derive(Debug, Error)]
pub enum TelldusError {
    /// Failed to locate or load the native module
    #[error("failed to load native library '{name}': {message}")]
    Load { name: String, message: String },

    /// A native call reported an error code
    #[error("{description} ({code})")]
    Call { code: i32, description: String },

    /// Entry point absent in the loaded telldus-core version
    #[error("'{0}' is not available in the loaded telldus-core")]
    NotSupported(&'static str),

    /// A dispatch strategy is already active for this library session
    #[error("a callback dispatcher is already installed for this session")]
    DispatcherAlreadyInstalled,

    /// Callback registration attempted without a dispatch strategy
    #[error("no callback dispatcher has been installed")]
    NoDispatcher,

    /// Text parameter cannot cross the boundary
    #[error("string contains an interior nul byte")]
    InvalidString(#[from] std::ffi::NulError),
}

impl TelldusError {
    /// Create a load error
    pub fn load(name: impl Into<String>, message: impl Into<String>) -> Self {
        TelldusError::Load {
            name: name.into(),
            message: message.into(),
        }
    }

    /// Create a native call error
    pub fn call(code: i32, description: impl Into<String>) -> Self {
        TelldusError::Call {
            code,
            description: description.into(),
        }
    }

    /// The raw native error code, for `Call` errors.
    pub fn code(&self) -> Option<i32> {
        match self {
            TelldusError::Call { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// The typed error code, for `Call` errors.
    pub fn error_code(&self) -> Option<ErrorCode> {
        self.code().map(ErrorCode::from_raw)
    }
}
