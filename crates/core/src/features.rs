//! Feature index resolution and DPI feature detection.
//!
//! ROOT feature (index 0x00) function 0 = getFeatureID:
//!   params[0..1] = feature ID (big-endian)
//!   response params[0] = feature index (0 = not present)

use serde::Serialize;
use tracing::debug;

use crate::error::{Error, Result};
use crate::hidpp::{self, features};
use crate::session::DeviceSession;

/// ROOT getFeatureID request.
const ROOT_GET_FEATURE: u16 = 0x0000;
/// EXTENDED_DPI getSensorCapabilities.
const EXTENDED_FN_GET_CAPABILITIES: u8 = 0x10;

/// Which DPI feature the device exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "variant", rename_all = "snake_case")]
pub enum DpiVariant {
    /// ADJUSTABLE_DPI (0x2201).
    Adjustable,
    /// EXTENDED_DPI (0x2202) with its sensor capability flags.
    Extended {
        secondary_axis: bool,
        lift_off_distance: bool,
    },
}

impl DpiVariant {
    pub fn feature_id(&self) -> u16 {
        match self {
            Self::Adjustable => features::ADJUSTABLE_DPI,
            Self::Extended { .. } => features::EXTENDED_DPI,
        }
    }
}

/// A resolved DPI feature for one open session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DpiFeature {
    pub index: u8,
    #[serde(flatten)]
    pub variant: DpiVariant,
}

impl DpiFeature {
    /// Request identifier for `function` on this feature.
    pub fn request_id(&self, function: u8) -> u16 {
        hidpp::request_id(self.index, function)
    }
}

/// Look up the feature index for a HID++ 2.0 feature ID.
///
/// Returns `Ok(None)` when the device reports index 0 or an HID++ error for
/// the lookup, meaning the feature is absent.
pub fn resolve_feature_index(session: &DeviceSession, feature_id: u16) -> Result<Option<u8>> {
    let reply = match session.request(ROOT_GET_FEATURE, &feature_id.to_be_bytes()) {
        Ok(reply) => reply,
        Err(Error::Device { code, .. }) => {
            debug!(
                feature_id = format_args!("0x{feature_id:04X}"),
                code,
                "Feature lookup rejected by device"
            );
            return Ok(None);
        }
        Err(e) => return Err(e),
    };

    match reply.first().copied() {
        Some(0) | None => {
            debug!(
                feature_id = format_args!("0x{feature_id:04X}"),
                "Feature not supported by device"
            );
            Ok(None)
        }
        Some(index) => {
            debug!(
                feature_id = format_args!("0x{feature_id:04X}"),
                feature_index = index,
                "Feature lookup success"
            );
            Ok(Some(index))
        }
    }
}

/// Find the DPI feature, preferring EXTENDED_DPI over ADJUSTABLE_DPI.
///
/// `Ok(None)` means the device has no DPI control.
pub fn detect_dpi_feature(session: &DeviceSession) -> Result<Option<DpiFeature>> {
    if let Some(index) = resolve_feature_index(session, features::EXTENDED_DPI)? {
        let (secondary_axis, lift_off_distance) = read_extended_flags(session, index);
        return Ok(Some(DpiFeature {
            index,
            variant: DpiVariant::Extended {
                secondary_axis,
                lift_off_distance,
            },
        }));
    }

    if let Some(index) = resolve_feature_index(session, features::ADJUSTABLE_DPI)? {
        return Ok(Some(DpiFeature {
            index,
            variant: DpiVariant::Adjustable,
        }));
    }

    debug!(device = %session.device().name, "No DPI feature found");
    Ok(None)
}

/// Like `detect_dpi_feature`, but a device without DPI control is
/// `FeatureNotFound(ADJUSTABLE_DPI)`.
pub fn require_dpi_feature(session: &DeviceSession) -> Result<DpiFeature> {
    detect_dpi_feature(session)?.ok_or(Error::FeatureNotFound(features::ADJUSTABLE_DPI))
}

/// Read the sensor capability flags: byte 2 bit 0 = secondary axis,
/// bit 1 = lift-off distance. Both false when the reply is missing or short.
fn read_extended_flags(session: &DeviceSession, index: u8) -> (bool, bool) {
    let request_id = hidpp::request_id(index, EXTENDED_FN_GET_CAPABILITIES);
    match session.request(request_id, &[0x00]) {
        Ok(reply) => match reply.get(2) {
            Some(&flags) => (flags & 0x01 != 0, flags & 0x02 != 0),
            None => (false, false),
        },
        Err(e) => {
            debug!(error = %e, "Extended DPI capabilities unavailable");
            (false, false)
        }
    }
}
