//! DPI list/read/write over ADJUSTABLE_DPI (0x2201) or EXTENDED_DPI (0x2202).
//!
//! | Variant    | List                  | Get                | Set                          |
//! |------------|-----------------------|--------------------|------------------------------|
//! | Adjustable | fn 1, skip 1 byte     | fn 2               | fn 3, `[sensor, hi, lo]`     |
//! | Extended   | fn 2, skip 3 bytes    | fn 5               | fn 6, `[sensor, 0, hi, lo]`  |
//!
//! Get replies carry `[sensor, current_hi, current_lo, default_hi, default_lo]`.
//!
//! Protocol reference: libratbag (MIT), HID++ 2.0 specification.

use tracing::{debug, info};

use crate::comm::send_with_retry;
use crate::dpi_list;
use crate::error::{Error, Result};
use crate::features::{DpiFeature, DpiVariant};
use crate::session::DeviceSession;

/// Upper bound on list pages requested from one device.
pub const MAX_LIST_PAGES: usize = 256;

/// Sensor addressed by every request.
const SENSOR_INDEX: u8 = 0x00;

/// Minimum get-reply length: sensor byte plus two 16-bit values.
const GET_REPLY_LEN: usize = 5;

/// Function bytes and list prefix for one DPI variant.
struct VariantOps {
    list_fn: u8,
    list_prefix: usize,
    get_fn: u8,
    set_fn: u8,
}

fn ops(variant: &DpiVariant) -> VariantOps {
    match variant {
        DpiVariant::Adjustable => VariantOps {
            list_fn: 0x10,
            list_prefix: 1,
            get_fn: 0x20,
            set_fn: 0x30,
        },
        DpiVariant::Extended { .. } => VariantOps {
            list_fn: 0x20,
            list_prefix: 3,
            get_fn: 0x50,
            set_fn: 0x60,
        },
    }
}

fn list_params(variant: &DpiVariant, page: u8) -> Vec<u8> {
    match variant {
        DpiVariant::Adjustable => vec![SENSOR_INDEX, page],
        // sensor, direction (X), range request index
        DpiVariant::Extended { .. } => vec![SENSOR_INDEX, 0x00, page],
    }
}

fn set_params(variant: &DpiVariant, dpi: u16) -> Vec<u8> {
    let [hi, lo] = dpi.to_be_bytes();
    match variant {
        DpiVariant::Adjustable => vec![SENSOR_INDEX, hi, lo],
        DpiVariant::Extended { .. } => vec![SENSOR_INDEX, 0x00, hi, lo],
    }
}

/// Read the supported DPI presets.
///
/// Pages are requested until one goes unanswered, the collected stream ends
/// with the list terminator, or `MAX_LIST_PAGES` have been asked for. A
/// failure on the first page is returned as is.
pub fn fetch_dpi_list(session: &DeviceSession, feature: &DpiFeature) -> Result<Vec<u16>> {
    let ops = ops(&feature.variant);
    let request_id = feature.request_id(ops.list_fn);
    let retries = session.config().max_retries;
    let mut stream = Vec::new();

    for page in 0..MAX_LIST_PAGES {
        // page < 256
        let params = list_params(&feature.variant, page as u8);
        let reply = match send_with_retry(session, request_id, &params, retries) {
            Ok(reply) => reply,
            Err(e) if page == 0 => return Err(e),
            Err(e) => {
                debug!(page, error = %e, "DPI list page missing, stopping");
                break;
            }
        };

        stream.extend_from_slice(reply.get(ops.list_prefix..).unwrap_or_default());
        if dpi_list::is_terminated(&stream) {
            break;
        }
    }

    let presets = dpi_list::decode(&stream);
    debug!(count = presets.len(), presets = ?presets, "DPI list decoded");
    if presets.is_empty() {
        return Err(Error::EmptyList);
    }
    Ok(presets)
}

/// Read the current DPI, or the sensor default when the current value is 0.
pub fn read_dpi(session: &DeviceSession, feature: &DpiFeature) -> Result<u16> {
    let ops = ops(&feature.variant);
    let reply = send_with_retry(
        session,
        feature.request_id(ops.get_fn),
        &[SENSOR_INDEX],
        session.config().max_retries,
    )?;
    if reply.len() < GET_REPLY_LEN {
        return Err(Error::ShortReply {
            expected: GET_REPLY_LEN,
            got: reply.len(),
        });
    }

    let current = u16::from_be_bytes([reply[1], reply[2]]);
    let default = u16::from_be_bytes([reply[3], reply[4]]);
    Ok(if current != 0 { current } else { default })
}

/// Write a DPI value. Any reply from the device counts as success.
pub fn set_dpi(session: &DeviceSession, feature: &DpiFeature, dpi: u16) -> Result<u16> {
    if dpi == 0 {
        return Err(Error::OutOfRange {
            field: "dpi",
            value: 0,
            min: 1,
            max: u32::from(u16::MAX),
        });
    }

    let ops = ops(&feature.variant);
    let params = set_params(&feature.variant, dpi);
    send_with_retry(
        session,
        feature.request_id(ops.set_fn),
        &params,
        session.config().max_retries,
    )?;

    info!(device = %session.device().name, dpi, "DPI set");
    Ok(dpi)
}
