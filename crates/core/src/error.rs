//! Error types for hidpp-dpi-core.

use thiserror::Error;

/// Core library error type.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// Host HID layer failure outside of any one device (enumeration, init).
    #[error("HID error: {0}")]
    Hid(String),

    /// The OS refused to open the device for this user.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// Another process holds the device exclusively.
    #[error("device is in use by another application: {0}")]
    ExclusiveAccessDenied(String),

    /// Transport-level failure with the platform error code (-1 when unknown).
    #[error("transport error (code {code}): {message}")]
    Transport { code: i32, message: String },

    /// No report kind/size combination declared by the device can carry the request.
    #[error("device does not accept HID++ requests of this size")]
    Unsupported,

    /// No reply arrived within the request timeout.
    #[error("timed out waiting for reply to request 0x{request_id:04X}")]
    Timeout { request_id: u16 },

    /// The device answered with an HID++ error frame.
    #[error("HID++ error: request 0x{request_id:04X}, code 0x{code:02X}")]
    Device { request_id: u16, code: u8 },

    /// The device does not expose the requested HID++ feature.
    #[error("feature 0x{0:04X} not found")]
    FeatureNotFound(u16),

    /// The device reported no DPI presets.
    #[error("device reported an empty DPI list")]
    EmptyList,

    /// The request was abandoned because the session closed.
    #[error("request cancelled: session closed")]
    Cancelled,

    /// A request was issued on a session that is not open.
    #[error("device session is not open")]
    NotOpen,

    /// Parameters exceed the long report payload.
    #[error("request parameters too long: {0} bytes (max 16)")]
    ParamsTooLong(usize),

    /// Every software identifier is taken by an in-flight request.
    #[error("too many HID++ requests in flight for request 0x{0:04X}")]
    TooManyInFlight(u16),

    /// A reply arrived but was too short to decode.
    #[error("reply too short: got {got} bytes, expected at least {expected}")]
    ShortReply { expected: usize, got: usize },

    /// Value out of the range the protocol can carry.
    #[error("value out of range: {field} = {value} (allowed {min}..={max})")]
    OutOfRange {
        field: &'static str,
        value: u32,
        min: u32,
        max: u32,
    },

    /// Configuration file could not be read or parsed.
    #[error("config error: {0}")]
    Config(String),
}

/// Convenience Result alias.
pub type Result<T> = std::result::Result<T, Error>;
