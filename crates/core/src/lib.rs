//! hidpp-dpi-core: HID++ 2.0 sessions, device discovery, and DPI control for
//! Logitech mice.
//!
//! The library logs through `tracing` and never installs a subscriber.

pub mod backend;
pub mod comm;
pub mod config;
pub mod correlator;
pub mod descriptor;
pub mod device;
pub mod dpi;
pub mod dpi_list;
pub mod error;
pub mod features;
pub mod hidpp;
pub mod registry;
pub mod selection;
pub mod session;
pub mod transport;

pub use config::SessionConfig;
pub use device::DeviceDescriptor;
pub use error::{Error, Result};
pub use features::{DpiFeature, DpiVariant};
pub use registry::Registry;
pub use selection::Selection;
pub use session::DeviceSession;

/// Logitech USB Vendor ID.
pub const LOGITECH_VID: u16 = 0x046D;
