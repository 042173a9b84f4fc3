//! hidapi-backed implementation of the HID bus and device transport.

use std::ffi::CString;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use hidapi::{BusType, HidApi, HidDevice};
use tracing::{debug, info, trace};

use crate::device::{self, DeviceDescriptor, TransportKind};
use crate::error::{Error, Result};
use crate::hidpp::ReportKind;
use crate::transport::{HidBackend, HidTransport};

/// Largest report descriptor hidapi will return.
const MAX_REPORT_DESCRIPTOR_SIZE: usize = 4096;

/// The host HID bus via hidapi.
pub struct HidapiBackend {
    api: Mutex<HidApi>,
}

impl HidapiBackend {
    pub fn new() -> Result<Self> {
        let api = HidApi::new().map_err(|e| Error::Hid(e.to_string()))?;
        Ok(Self {
            api: Mutex::new(api),
        })
    }

    fn lock(&self) -> MutexGuard<'_, HidApi> {
        self.api.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl HidBackend for HidapiBackend {
    fn enumerate(&self) -> Result<Vec<DeviceDescriptor>> {
        debug!("Starting HID device enumeration");
        let mut api = self.lock();
        api.refresh_devices().map_err(|e| Error::Hid(e.to_string()))?;

        let mut devices = Vec::new();
        for info in api.device_list() {
            if !device::is_matching_device(info.vendor_id(), info.usage_page(), info.usage()) {
                continue;
            }

            let path = info.path().to_string_lossy().into_owned();
            let serial = info.serial_number();
            let (id, stable_id) = if path.is_empty() {
                let id = device::synthetic_id(
                    info.vendor_id(),
                    info.product_id(),
                    info.interface_number(),
                    serial,
                );
                (id, false)
            } else {
                (path.clone(), true)
            };

            let transport = match info.bus_type() {
                BusType::Usb => TransportKind::Usb,
                BusType::Bluetooth => TransportKind::Bluetooth,
                _ => TransportKind::Unknown,
            };

            let descriptor = DeviceDescriptor {
                id,
                stable_id,
                name: device::display_name(info.product_string(), serial, info.product_id()),
                vendor_id: info.vendor_id(),
                product_id: info.product_id(),
                transport,
                // sizes come from the report descriptor, read when a session opens
                max_input_report_size: None,
                max_output_report_size: None,
                path,
            };

            info!(
                name = %descriptor.name,
                vid = format_args!("0x{:04X}", descriptor.vendor_id),
                pid = format_args!("0x{:04X}", descriptor.product_id),
                transport = %descriptor.transport,
                path = %descriptor.path,
                "Found Logitech device"
            );
            devices.push(descriptor);
        }

        Ok(devices)
    }

    fn open(&self, device: &DeviceDescriptor) -> Result<Arc<dyn HidTransport>> {
        let api = self.lock();
        let handle = if device.path.is_empty() {
            api.open(device.vendor_id, device.product_id)
        } else {
            let path = CString::new(device.path.as_bytes()).map_err(|e| Error::Transport {
                code: -1,
                message: format!("invalid device path: {e}"),
            })?;
            api.open_path(&path)
        }
        .map_err(|e| classify_open_error(&e.to_string()))?;

        Ok(Arc::new(HidapiTransport {
            device: Mutex::new(handle),
        }))
    }
}

/// One device opened through hidapi.
///
/// hidapi handles are not `Sync`, so reads and writes share a mutex; the
/// reader thread releases it after every short poll.
pub struct HidapiTransport {
    device: Mutex<HidDevice>,
}

impl HidapiTransport {
    fn lock(&self) -> MutexGuard<'_, HidDevice> {
        self.device.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl HidTransport for HidapiTransport {
    fn write_report(&self, kind: ReportKind, data: &[u8]) -> Result<()> {
        let device = self.lock();
        match kind {
            ReportKind::Output => {
                let written = device
                    .write(data)
                    .map_err(|e| transport_error("write", &e.to_string()))?;
                if written < data.len() {
                    return Err(Error::Transport {
                        code: -1,
                        message: format!("short write: {written} of {} bytes", data.len()),
                    });
                }
            }
            ReportKind::Feature => device
                .send_feature_report(data)
                .map_err(|e| transport_error("send_feature_report", &e.to_string()))?,
        }
        trace!(?kind, len = data.len(), "HID report written");
        Ok(())
    }

    fn read_input(&self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        let millis = i32::try_from(timeout.as_millis()).unwrap_or(i32::MAX);
        self.lock()
            .read_timeout(buf, millis)
            .map_err(|e| transport_error("read_timeout", &e.to_string()))
    }

    fn report_descriptor(&self) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; MAX_REPORT_DESCRIPTOR_SIZE];
        let n = self
            .lock()
            .get_report_descriptor(&mut buf)
            .map_err(|e| transport_error("get_report_descriptor", &e.to_string()))?;
        buf.truncate(n);
        Ok(buf)
    }
}

/// Map an open failure to the error kinds callers show to users.
pub fn classify_open_error(message: &str) -> Error {
    let lower = message.to_lowercase();
    let code = os_error_code(message);

    if matches!(code, Some(1) | Some(13))
        || lower.contains("permission")
        || lower.contains("access denied")
        || lower.contains("access is denied")
        || lower.contains("not permitted")
    {
        Error::PermissionDenied(message.to_string())
    } else if code == Some(16)
        || lower.contains("busy")
        || lower.contains("exclusive")
        || lower.contains("in use")
    {
        Error::ExclusiveAccessDenied(message.to_string())
    } else {
        transport_error("open", message)
    }
}

fn transport_error(op: &str, message: &str) -> Error {
    Error::Transport {
        code: os_error_code(message).unwrap_or(-1),
        message: format!("{op}: {message}"),
    }
}

/// Extract `N` from an `(os error N)` suffix.
fn os_error_code(message: &str) -> Option<i32> {
    let start = message.rfind("os error ")? + "os error ".len();
    let digits: String = message[start..]
        .chars()
        .take_while(|c| c.is_ascii_digit() || *c == '-')
        .collect();
    digits.parse().ok()
}
