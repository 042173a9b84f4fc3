//! Error classification, retries, and user-facing status text.

use crate::error::{Error, Result};
use crate::hidpp::features;
use crate::session::DeviceSession;
use tracing::{debug, warn};

/// Retry ceiling callers may pass to `send_with_retry`.
pub const MAX_RETRIES: u32 = 3;

/// Classification of communication errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// May succeed on retry (timeout).
    Transient,
    /// Device went away or the session closed.
    Disconnected,
    /// The OS or another process denied access.
    PermissionDenied,
    /// Device returned an HID++ error code.
    Protocol,
    /// The device cannot carry the request or lacks the feature.
    Unsupported,
    /// Corrupted, short, or unexpected data.
    InvalidResponse,
}

impl ErrorClass {
    /// Classify an error for retry decisions.
    pub fn classify(err: &Error) -> Self {
        match err {
            Error::Timeout { .. } | Error::TooManyInFlight(_) => Self::Transient,
            Error::PermissionDenied(_) | Error::ExclusiveAccessDenied(_) => Self::PermissionDenied,
            Error::NotOpen | Error::Cancelled => Self::Disconnected,
            Error::Device { .. } => Self::Protocol,
            Error::Unsupported | Error::FeatureNotFound(_) => Self::Unsupported,
            Error::Transport { code, message } => {
                // ENODEV / ENOENT
                if matches!(code, 19 | 2) {
                    return Self::Disconnected;
                }
                classify_message(message)
            }
            Error::Hid(message) => classify_message(message),
            Error::EmptyList
            | Error::ParamsTooLong(_)
            | Error::ShortReply { .. }
            | Error::OutOfRange { .. }
            | Error::Config(_) => Self::InvalidResponse,
        }
    }

    /// Whether this error class is worth retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient)
    }
}

fn classify_message(message: &str) -> ErrorClass {
    let lower = message.to_lowercase();
    if lower.contains("disconnect")
        || lower.contains("not found")
        || lower.contains("no such device")
    {
        ErrorClass::Disconnected
    } else if lower.contains("permission")
        || lower.contains("access denied")
        || lower.contains("access is denied")
    {
        ErrorClass::PermissionDenied
    } else if lower.contains("timeout") || lower.contains("timed out") {
        ErrorClass::Transient
    } else {
        ErrorClass::InvalidResponse
    }
}

/// Send a request, retrying transient failures up to `max_retries` times.
///
/// Returns the reply payload, or the last error once retries run out.
pub fn send_with_retry(
    session: &DeviceSession,
    request_id: u16,
    params: &[u8],
    max_retries: u32,
) -> Result<Vec<u8>> {
    let mut attempt = 0;
    loop {
        match session.request(request_id, params) {
            Ok(payload) => {
                if attempt > 0 {
                    debug!("HID++ request succeeded on attempt {}", attempt + 1);
                }
                return Ok(payload);
            }
            Err(e) => {
                let class = ErrorClass::classify(&e);
                if !class.is_retryable() || attempt >= max_retries {
                    warn!(
                        "HID++ request 0x{:04X} failed (class={:?}, attempt={}/{}): {}",
                        request_id,
                        class,
                        attempt + 1,
                        max_retries + 1,
                        e
                    );
                    return Err(e);
                }
                debug!(
                    "HID++ transient error (attempt {}/{}): {}, retrying...",
                    attempt + 1,
                    max_retries + 1,
                    e
                );
                attempt += 1;
            }
        }
    }
}

/// Device connection status for display.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceStatus {
    Connected,
    Disconnected,
    PermissionError,
    Error,
}

impl std::fmt::Display for DeviceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
            Self::PermissionError => "permission denied",
            Self::Error => "not responding",
        })
    }
}

/// Ping the device by asking ROOT for its own index.
///
/// Any reply counts as connected, an HID++ error frame included.
pub fn check_device_status(session: &DeviceSession) -> DeviceStatus {
    match session.request(features::ROOT, &features::ROOT.to_be_bytes()) {
        Ok(_) => DeviceStatus::Connected,
        Err(ref e) => match ErrorClass::classify(e) {
            ErrorClass::Protocol => DeviceStatus::Connected,
            ErrorClass::Disconnected => DeviceStatus::Disconnected,
            ErrorClass::PermissionDenied => DeviceStatus::PermissionError,
            _ => DeviceStatus::Error,
        },
    }
}

/// One-line message for showing an error to a user.
pub fn status_message(err: &Error) -> String {
    match err {
        Error::PermissionDenied(_) => {
            "Permission denied opening the device. On Linux, install a udev rule granting access to Logitech hidraw devices.".into()
        }
        Error::ExclusiveAccessDenied(_) => {
            "The device is in use by another application. Close other mouse software and try again.".into()
        }
        Error::Transport { code, .. } => {
            format!("Communication with the device failed (error {code}).")
        }
        Error::Unsupported => "The device does not accept HID++ requests.".into(),
        Error::Timeout { .. } => "The device did not respond in time.".into(),
        Error::Device { code, .. } => {
            format!("The device rejected the request (HID++ error 0x{code:02X}).")
        }
        Error::FeatureNotFound(_) => "The device does not support DPI control.".into(),
        Error::EmptyList => "The device reported no DPI values.".into(),
        Error::Cancelled | Error::NotOpen => "The device was closed.".into(),
        other => other.to_string(),
    }
}
