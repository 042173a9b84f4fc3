//! Device model: descriptors for matching HID++ pointing devices.

use serde::Serialize;

use crate::LOGITECH_VID;

/// HID usage page for generic desktop controls.
pub const USAGE_PAGE_GENERIC_DESKTOP: u16 = 0x01;
/// Generic desktop usage: pointer.
pub const USAGE_POINTER: u16 = 0x01;
/// Generic desktop usage: mouse.
pub const USAGE_MOUSE: u16 = 0x02;

/// How the device is attached to the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    Usb,
    Bluetooth,
    Unknown,
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::Usb => "USB",
            Self::Bluetooth => "Bluetooth",
            Self::Unknown => "unknown",
        };
        f.write_str(label)
    }
}

/// A matching device present on the host bus.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceDescriptor {
    /// Bus-assigned identifier, or a synthesized one when the bus has none.
    pub id: String,
    /// False when `id` was synthesized; such ids may change across reconnects.
    pub stable_id: bool,
    /// Product name, suffixed with the serial number when there is one.
    pub name: String,
    pub vendor_id: u16,
    pub product_id: u16,
    pub transport: TransportKind,
    /// Largest input report in bytes. Enumeration leaves this unknown;
    /// `DeviceSession::describe` fills it from the report descriptor.
    pub max_input_report_size: Option<u16>,
    /// Largest output report in bytes, known once a session has opened.
    pub max_output_report_size: Option<u16>,
    /// Platform path used to open the device.
    pub path: String,
}

/// Whether a HID interface belongs to a device we drive.
pub fn is_matching_device(vendor_id: u16, usage_page: u16, usage: u16) -> bool {
    vendor_id == LOGITECH_VID
        && usage_page == USAGE_PAGE_GENERIC_DESKTOP
        && (usage == USAGE_MOUSE || usage == USAGE_POINTER)
}

/// Build the display name from the product string and optional serial.
pub fn display_name(product: Option<&str>, serial: Option<&str>, product_id: u16) -> String {
    let product = product
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(str::to_owned)
        .unwrap_or_else(|| format!("Logitech device {product_id:04X}"));

    match serial.map(str::trim).filter(|s| !s.is_empty()) {
        Some(serial) => format!("{product} ({serial})"),
        None => product,
    }
}

/// Identifier for a device whose platform path is unavailable.
///
/// Derived from properties that are the same on every enumeration of the same
/// physical interface, but not guaranteed stable across reconnects.
pub fn synthetic_id(
    vendor_id: u16,
    product_id: u16,
    interface: i32,
    serial: Option<&str>,
) -> String {
    format!(
        "synthetic:{vendor_id:04x}:{product_id:04x}:{interface}:{}",
        serial.unwrap_or("-")
    )
}
