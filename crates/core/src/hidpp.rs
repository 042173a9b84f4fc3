//! HID++ 2.0 frame encoding and reply decoding.
//!
//! HID++ uses two report formats:
//! - Short reports: 7 bytes (report ID 0x10), up to 3 parameter bytes
//! - Long reports: 20 bytes (report ID 0x11), up to 16 parameter bytes
//!
//! Either may be addressed to the device as an output report or a feature
//! report, and the device number byte is 0x00 or, for some Bluetooth devices,
//! 0xFF.
//!
//! Protocol reference: libratbag (MIT) and Solaar (GPLv2, protocol knowledge only).

use crate::error::{Error, Result};

/// HID++ report ID for short messages (7 bytes total).
pub const SHORT_REPORT_ID: u8 = 0x10;
/// HID++ report ID for long messages (20 bytes total).
pub const LONG_REPORT_ID: u8 = 0x11;

/// Short report length (including report ID).
pub const SHORT_REPORT_LEN: usize = 7;
/// Long report length (including report ID).
pub const LONG_REPORT_LEN: usize = 20;

/// Device number tried first.
pub const DEVICE_NUMBER_PRIMARY: u8 = 0x00;
/// Device number required by some Bluetooth-connected devices.
pub const DEVICE_NUMBER_FALLBACK: u8 = 0xFF;

/// Marker in byte 1 of an error reply.
pub const ERROR_MARKER: u8 = 0xFF;

/// Lowest software identifier we emit. 0 is reserved for device notifications.
pub const SW_ID_MIN: u8 = 2;
/// Highest software identifier (4 bits).
pub const SW_ID_MAX: u8 = 15;

/// HID++ 2.0 well-known feature IDs.
pub mod features {
    /// Root feature: feature index lookup.
    pub const ROOT: u16 = 0x0000;
    /// Adjustable DPI setting.
    pub const ADJUSTABLE_DPI: u16 = 0x2201;
    /// Extended adjustable DPI (per-axis, lift-off distance).
    pub const EXTENDED_DPI: u16 = 0x2202;
}

/// Build a 16-bit request identifier from a feature index and a function byte.
///
/// `function` is given in its on-wire position (`0x10` is function 1); the low
/// nibble is left clear for the software identifier.
pub fn request_id(feature_index: u8, function: u8) -> u16 {
    (u16::from(feature_index) << 8) | u16::from(function & 0xF0)
}

/// Fold a software identifier into the low nibble of a request identifier.
pub fn with_sw_id(request_id: u16, sw_id: u8) -> u16 {
    (request_id & 0xFFF0) | u16::from(sw_id & 0x0F)
}

/// Physical report size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReportSize {
    Short,
    Long,
}

impl ReportSize {
    pub fn report_id(self) -> u8 {
        match self {
            Self::Short => SHORT_REPORT_ID,
            Self::Long => LONG_REPORT_ID,
        }
    }

    /// Total frame length including the report ID byte.
    pub fn frame_len(self) -> usize {
        match self {
            Self::Short => SHORT_REPORT_LEN,
            Self::Long => LONG_REPORT_LEN,
        }
    }

    /// Parameter bytes that fit after the 4-byte header.
    pub fn max_params(self) -> usize {
        self.frame_len() - 4
    }
}

/// Transport-level report kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReportKind {
    Output,
    Feature,
}

/// Encode a request frame:
/// `[reportId, deviceNumber, reqHi, reqLo, params..., zero padding]`.
///
/// `request_id` must already carry the software identifier.
pub fn encode_request(
    size: ReportSize,
    device_number: u8,
    request_id: u16,
    params: &[u8],
) -> Result<Vec<u8>> {
    if params.len() > size.max_params() {
        return Err(Error::ParamsTooLong(params.len()));
    }

    let mut buf = vec![0u8; size.frame_len()];
    buf[0] = size.report_id();
    buf[1] = device_number;
    buf[2..4].copy_from_slice(&request_id.to_be_bytes());
    buf[4..4 + params.len()].copy_from_slice(params);
    Ok(buf)
}

/// A decoded inbound frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// `[deviceNumber, reqHi, reqLo, payload...]`
    Success { request_id: u16, payload: Vec<u8> },
    /// `[deviceNumber, 0xFF, reqHi, reqLo, errorCode]`
    Error { request_id: u16, code: u8 },
}

impl Reply {
    /// Decode a received report.
    ///
    /// Returns `None` for frames too short to carry a request identifier; those
    /// are background traffic on a shared channel, not errors.
    pub fn parse(data: &[u8]) -> Option<Self> {
        let body = match data.first() {
            Some(&SHORT_REPORT_ID) | Some(&LONG_REPORT_ID) => &data[1..],
            _ => data,
        };

        if body.len() >= 4 && body[1] == ERROR_MARKER {
            return Some(Self::Error {
                request_id: u16::from_be_bytes([body[2], body[3]]),
                code: body.get(4).copied().unwrap_or(0),
            });
        }

        if body.len() >= 3 {
            return Some(Self::Success {
                request_id: u16::from_be_bytes([body[1], body[2]]),
                payload: body[3..].to_vec(),
            });
        }

        None
    }

    pub fn request_id(&self) -> u16 {
        match self {
            Self::Success { request_id, .. } | Self::Error { request_id, .. } => *request_id,
        }
    }
}
