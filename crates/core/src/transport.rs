//! HID transport abstraction for device communication.
//!
//! Provides a trait-based transport layer so that real HID devices and
//! mock devices share the same interface. Writes are synchronous and report
//! only whether the write went through; replies come back through
//! `read_input`, which a session drains on its own reader thread.

use std::sync::Arc;
use std::time::Duration;

use crate::device::DeviceDescriptor;
use crate::error::Result;
use crate::hidpp::ReportKind;

/// One opened device.
pub trait HidTransport: Send + Sync {
    /// Transmit a complete report (report ID first) as the given kind.
    fn write_report(&self, kind: ReportKind, data: &[u8]) -> Result<()>;

    /// Read one input report, waiting at most `timeout`. Returns 0 on timeout.
    fn read_input(&self, buf: &mut [u8], timeout: Duration) -> Result<usize>;

    /// The device's raw HID report descriptor.
    fn report_descriptor(&self) -> Result<Vec<u8>>;
}

/// The host HID bus.
pub trait HidBackend: Send + Sync {
    /// List the matching devices currently present, in enumeration order.
    fn enumerate(&self) -> Result<Vec<DeviceDescriptor>>;

    /// Open a device for exclusive use.
    fn open(&self, device: &DeviceDescriptor) -> Result<Arc<dyn HidTransport>>;
}

/// A mock HID bus and devices for testing.
///
/// The mock device answers scripted requests by queueing a reply frame that
/// the session's reader thread picks up, just as a real device would.
#[cfg(test)]
pub mod mock {
    use super::*;
    use crate::error::Error;
    use crate::hidpp::{
        DEVICE_NUMBER_FALLBACK, DEVICE_NUMBER_PRIMARY, ERROR_MARKER, LONG_REPORT_ID,
        LONG_REPORT_LEN, SHORT_REPORT_ID,
    };
    use std::collections::{HashMap, HashSet, VecDeque};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::{Condvar, Mutex};

    /// Output reports 0x10 and 0x11.
    pub const OUTPUT_DESCRIPTOR: &[u8] = &[0x85, 0x10, 0x91, 0x02, 0x85, 0x11, 0x91, 0x02];
    /// Feature reports 0x10 and 0x11.
    pub const FEATURE_DESCRIPTOR: &[u8] = &[0x85, 0x10, 0xB1, 0x02, 0x85, 0x11, 0xB1, 0x02];
    /// Short report as feature only.
    pub const SHORT_FEATURE_DESCRIPTOR: &[u8] = &[0x85, 0x10, 0xB1, 0x02];
    /// Long report as output only.
    pub const LONG_OUTPUT_DESCRIPTOR: &[u8] = &[0x85, 0x11, 0x91, 0x02];

    #[derive(Debug, Clone)]
    enum Scripted {
        Payload(Vec<u8>),
        Error(u8),
    }

    /// Scripted request key: request id without software id, and the
    /// parameters with trailing zero padding removed.
    type Key = (u16, Vec<u8>);

    fn key(request_id: u16, params: &[u8]) -> Key {
        let end = params.iter().rposition(|&b| b != 0).map_or(0, |i| i + 1);
        (request_id & 0xFFF0, params[..end].to_vec())
    }

    /// A USB mouse descriptor for tests.
    pub fn mock_device(id: &str, name: &str) -> DeviceDescriptor {
        DeviceDescriptor {
            id: id.to_string(),
            stable_id: true,
            name: name.to_string(),
            vendor_id: crate::LOGITECH_VID,
            product_id: 0xC08B,
            transport: crate::device::TransportKind::Usb,
            max_input_report_size: None,
            max_output_report_size: None,
            path: id.to_string(),
        }
    }

    /// Mock device that returns preconfigured responses.
    pub struct MockTransport {
        descriptor: Vec<u8>,
        responses: Mutex<HashMap<Key, Scripted>>,
        answered_routes: Mutex<HashSet<(ReportKind, u8)>>,
        written: Mutex<Vec<(ReportKind, Vec<u8>)>>,
        inbox: Mutex<VecDeque<Vec<u8>>>,
        inbox_ready: Condvar,
        fail_writes: AtomicBool,
        read_error: Mutex<Option<Error>>,
        descriptor_reads: AtomicUsize,
    }

    impl MockTransport {
        /// A device declaring `descriptor` that answers on every route.
        pub fn new(descriptor: &[u8]) -> Self {
            let routes = [ReportKind::Output, ReportKind::Feature]
                .into_iter()
                .flat_map(|kind| {
                    [DEVICE_NUMBER_PRIMARY, DEVICE_NUMBER_FALLBACK].map(move |dn| (kind, dn))
                })
                .collect();
            Self {
                descriptor: descriptor.to_vec(),
                responses: Mutex::new(HashMap::new()),
                answered_routes: Mutex::new(routes),
                written: Mutex::new(Vec::new()),
                inbox: Mutex::new(VecDeque::new()),
                inbox_ready: Condvar::new(),
                fail_writes: AtomicBool::new(false),
                read_error: Mutex::new(None),
                descriptor_reads: AtomicUsize::new(0),
            }
        }

        /// Only answer requests written as `kind` with `device_number`.
        pub fn answer_only(&self, routes: &[(ReportKind, u8)]) {
            *self.answered_routes.lock().unwrap() = routes.iter().copied().collect();
        }

        /// Reply to `request_id`/`params` with a success payload.
        pub fn on_request(&self, request_id: u16, params: &[u8], payload: &[u8]) {
            self.responses
                .lock()
                .unwrap()
                .insert(key(request_id, params), Scripted::Payload(payload.to_vec()));
        }

        /// Reply to `request_id`/`params` with an error frame.
        pub fn on_request_error(&self, request_id: u16, params: &[u8], code: u8) {
            self.responses
                .lock()
                .unwrap()
                .insert(key(request_id, params), Scripted::Error(code));
        }

        /// Make every write fail.
        pub fn fail_writes(&self, fail: bool) {
            self.fail_writes.store(fail, Ordering::SeqCst);
        }

        /// Make every read fail with `err`, as an unplugged device does.
        pub fn fail_reads(&self, err: Error) {
            *self.read_error.lock().unwrap() = Some(err);
            let _inbox = self.inbox.lock().unwrap();
            self.inbox_ready.notify_all();
        }

        /// Queue a raw inbound frame.
        pub fn inject(&self, frame: Vec<u8>) {
            self.inbox.lock().unwrap().push_back(frame);
            self.inbox_ready.notify_all();
        }

        /// Every frame written so far, with its kind.
        pub fn written(&self) -> Vec<(ReportKind, Vec<u8>)> {
            self.written.lock().unwrap().clone()
        }

        pub fn descriptor_reads(&self) -> usize {
            self.descriptor_reads.load(Ordering::SeqCst)
        }

        fn reply_for(&self, kind: ReportKind, data: &[u8]) -> Option<Vec<u8>> {
            if data.len() < 4 {
                return None;
            }
            let device_number = data[1];
            if !self
                .answered_routes
                .lock()
                .unwrap()
                .contains(&(kind, device_number))
            {
                return None;
            }

            let request_id = u16::from_be_bytes([data[2], data[3]]);
            let scripted = self
                .responses
                .lock()
                .unwrap()
                .get(&key(request_id, &data[4..]))
                .cloned()?;

            let [hi, lo] = request_id.to_be_bytes();
            Some(match scripted {
                Scripted::Payload(payload) => {
                    let mut frame = vec![LONG_REPORT_ID, device_number, hi, lo];
                    frame.extend_from_slice(&payload);
                    frame.resize(frame.len().max(LONG_REPORT_LEN), 0);
                    frame
                }
                Scripted::Error(code) => {
                    vec![SHORT_REPORT_ID, device_number, ERROR_MARKER, hi, lo, code, 0x00]
                }
            })
        }
    }

    impl HidTransport for MockTransport {
        fn write_report(&self, kind: ReportKind, data: &[u8]) -> Result<()> {
            self.written.lock().unwrap().push((kind, data.to_vec()));
            if self.fail_writes.load(Ordering::SeqCst) {
                return Err(Error::Transport {
                    code: 5,
                    message: "mock: write failed".into(),
                });
            }
            if let Some(reply) = self.reply_for(kind, data) {
                self.inject(reply);
            }
            Ok(())
        }

        fn read_input(&self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
            let inbox = self.inbox.lock().unwrap();
            let (mut inbox, _) = self
                .inbox_ready
                .wait_timeout_while(inbox, timeout, |q| {
                    q.is_empty() && self.read_error.lock().unwrap().is_none()
                })
                .unwrap();
            if let Some(err) = self.read_error.lock().unwrap().clone() {
                return Err(err);
            }
            let Some(frame) = inbox.pop_front() else {
                return Ok(0);
            };
            let n = frame.len().min(buf.len());
            buf[..n].copy_from_slice(&frame[..n]);
            Ok(n)
        }

        fn report_descriptor(&self) -> Result<Vec<u8>> {
            self.descriptor_reads.fetch_add(1, Ordering::SeqCst);
            Ok(self.descriptor.clone())
        }
    }

    /// Mock HID bus with a fixed device list.
    pub struct MockBackend {
        devices: Mutex<Vec<DeviceDescriptor>>,
        transports: Mutex<HashMap<String, Arc<MockTransport>>>,
        open_error: Mutex<Option<Error>>,
        enumerate_error: Mutex<Option<Error>>,
        opens: AtomicUsize,
    }

    impl MockBackend {
        pub fn new() -> Self {
            Self {
                devices: Mutex::new(Vec::new()),
                transports: Mutex::new(HashMap::new()),
                open_error: Mutex::new(None),
                enumerate_error: Mutex::new(None),
                opens: AtomicUsize::new(0),
            }
        }

        /// Attach a device and the transport it opens to.
        pub fn attach(&self, device: DeviceDescriptor, transport: Arc<MockTransport>) {
            self.transports
                .lock()
                .unwrap()
                .insert(device.id.clone(), transport);
            self.devices.lock().unwrap().push(device);
        }

        pub fn detach(&self, id: &str) {
            self.devices.lock().unwrap().retain(|d| d.id != id);
            self.transports.lock().unwrap().remove(id);
        }

        /// Make the next opens fail with `err`.
        pub fn fail_open(&self, err: Option<Error>) {
            *self.open_error.lock().unwrap() = err;
        }

        /// Make enumeration fail with `err` until cleared.
        pub fn fail_enumerate(&self, err: Option<Error>) {
            *self.enumerate_error.lock().unwrap() = err;
        }

        pub fn opens(&self) -> usize {
            self.opens.load(Ordering::SeqCst)
        }
    }

    impl HidBackend for MockBackend {
        fn enumerate(&self) -> Result<Vec<DeviceDescriptor>> {
            if let Some(err) = self.enumerate_error.lock().unwrap().clone() {
                return Err(err);
            }
            Ok(self.devices.lock().unwrap().clone())
        }

        fn open(&self, device: &DeviceDescriptor) -> Result<Arc<dyn HidTransport>> {
            if let Some(err) = self.open_error.lock().unwrap().clone() {
                return Err(err);
            }
            let transport = self
                .transports
                .lock()
                .unwrap()
                .get(&device.id)
                .cloned()
                .ok_or_else(|| Error::Transport {
                    code: 2,
                    message: format!("mock: no such device {}", device.id),
                })?;
            self.opens.fetch_add(1, Ordering::SeqCst);
            Ok(transport)
        }
    }
}
