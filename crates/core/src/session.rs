//! Per-device session: exclusive handle, capability probe, reader thread,
//! and the request transmission ladder.
//!
//! A request is tried in short form when its parameters fit and the device
//! declares a short report, otherwise in long form. Within a size, each
//! capability-supported report kind is tried with device number 0x00 and then
//! 0xFF. A timeout or failed write moves on to the next attempt; any reply,
//! including an HID++ error frame, ends the ladder.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, info, trace, warn};

use crate::config::SessionConfig;
use crate::correlator::{Correlator, Outcome, Slot};
use crate::descriptor::{probe_capabilities, CapabilitySet};
use crate::device::DeviceDescriptor;
use crate::error::{Error, Result};
use crate::hidpp::{
    encode_request, with_sw_id, ReportKind, ReportSize, DEVICE_NUMBER_FALLBACK,
    DEVICE_NUMBER_PRIMARY, SW_ID_MAX, SW_ID_MIN,
};
use crate::transport::{HidBackend, HidTransport};

/// Number of distinct software identifiers in the cycle.
const SW_ID_COUNT: u8 = SW_ID_MAX - SW_ID_MIN + 1;

/// Observable session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Closed,
    Open,
}

struct OpenSession {
    transport: Arc<dyn HidTransport>,
    capabilities: CapabilitySet,
    reader: Reader,
}

enum State {
    Closed,
    Open(OpenSession),
}

/// Reader thread that feeds input reports into the correlator.
///
/// A failed read ends the thread. The error is kept for later requests and
/// every pending request is failed with it.
struct Reader {
    stop: Arc<AtomicBool>,
    failure: Arc<Mutex<Option<Error>>>,
    handle: Option<JoinHandle<()>>,
}

impl Reader {
    fn spawn(
        transport: Arc<dyn HidTransport>,
        correlator: Arc<Correlator>,
        config: &SessionConfig,
    ) -> Result<Self> {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = Arc::clone(&stop);
        let failure = Arc::new(Mutex::new(None));
        let failure_slot = Arc::clone(&failure);
        let poll = config.read_poll();
        let buffer_len = config.input_buffer_len.max(crate::hidpp::LONG_REPORT_LEN);

        let handle = thread::Builder::new()
            .name("hidpp-reader".into())
            .spawn(move || {
                let mut buf = vec![0u8; buffer_len];
                while !stop_flag.load(Ordering::Acquire) {
                    match transport.read_input(&mut buf, poll) {
                        Ok(0) => {}
                        Ok(n) => correlator.deliver(&buf[..n]),
                        Err(e) => {
                            warn!(error = %e, "HID input read failed, stopping reader");
                            // stored before failing so a later registration sees it
                            *failure_slot.lock().unwrap_or_else(|p| p.into_inner()) =
                                Some(e.clone());
                            correlator.fail_all(&e);
                            break;
                        }
                    }
                }
            })
            .map_err(|e| Error::Transport {
                code: e.raw_os_error().unwrap_or(-1),
                message: format!("spawn reader thread: {e}"),
            })?;

        Ok(Self {
            stop,
            failure,
            handle: Some(handle),
        })
    }

    /// The read error that stopped the thread, if any.
    fn failure(&self) -> Option<Error> {
        self.failure
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn shutdown(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("HID reader thread panicked");
            }
        }
    }
}

impl Drop for Reader {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// One device's protocol session.
pub struct DeviceSession {
    device: DeviceDescriptor,
    backend: Arc<dyn HidBackend>,
    config: SessionConfig,
    state: Mutex<State>,
    correlator: Arc<Correlator>,
    sw_id: Mutex<u8>,
}

impl DeviceSession {
    /// Create an unopened session for `device`.
    pub fn new(
        device: DeviceDescriptor,
        backend: Arc<dyn HidBackend>,
        config: SessionConfig,
    ) -> Self {
        Self {
            device,
            backend,
            config,
            state: Mutex::new(State::Closed),
            correlator: Arc::new(Correlator::new()),
            // first advance yields SW_ID_MIN
            sw_id: Mutex::new(SW_ID_MAX),
        }
    }

    pub fn device(&self) -> &DeviceDescriptor {
        &self.device
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn state(&self) -> SessionState {
        match *self.lock_state() {
            State::Closed => SessionState::Closed,
            State::Open(_) => SessionState::Open,
        }
    }

    pub fn is_open(&self) -> bool {
        self.state() == SessionState::Open
    }

    /// The device, with report sizes filled in from the probe once open.
    pub fn describe(&self) -> DeviceDescriptor {
        let mut device = self.device.clone();
        if let State::Open(open) = &*self.lock_state() {
            device.max_input_report_size = open.capabilities.max_input_report_size;
            device.max_output_report_size = open.capabilities.max_output_report_size;
        }
        device
    }

    /// Capabilities probed at open, if open.
    pub fn capabilities(&self) -> Option<CapabilitySet> {
        match &*self.lock_state() {
            State::Open(open) => Some(open.capabilities.clone()),
            State::Closed => None,
        }
    }

    /// Open the device and probe its capabilities. No-op when already open.
    pub fn open(&self) -> Result<()> {
        let mut state = self.lock_state();
        if matches!(*state, State::Open(_)) {
            return Ok(());
        }

        debug!(device = %self.device.name, path = %self.device.path, "Opening device");
        let transport = self.backend.open(&self.device)?;
        let mut reader = Reader::spawn(
            Arc::clone(&transport),
            Arc::clone(&self.correlator),
            &self.config,
        )?;

        let descriptor = match transport.report_descriptor() {
            Ok(descriptor) => descriptor,
            Err(e) => {
                reader.shutdown();
                return Err(e);
            }
        };
        let capabilities = probe_capabilities(&descriptor);

        info!(
            device = %self.device.name,
            output = format_args!("{:02X?}", capabilities.output),
            feature = format_args!("{:02X?}", capabilities.feature),
            max_input = ?capabilities.max_input_report_size,
            max_output = ?capabilities.max_output_report_size,
            "Device opened"
        );

        *state = State::Open(OpenSession {
            transport,
            capabilities,
            reader,
        });
        Ok(())
    }

    /// Release the device and cancel in-flight requests. No-op when closed.
    pub fn close(&self) {
        let previous = std::mem::replace(&mut *self.lock_state(), State::Closed);
        if let State::Open(mut open) = previous {
            self.correlator.cancel_all();
            open.reader.shutdown();
            info!(device = %self.device.name, "Device closed");
        }
    }

    /// Send a request with the configured timeout.
    pub fn request(&self, request_id: u16, params: &[u8]) -> Result<Vec<u8>> {
        self.send_request(request_id, params, self.config.request_timeout())
    }

    /// Send a request and wait for its reply payload.
    ///
    /// `request_id` carries the feature index and function; the software id
    /// nibble is filled in per attempt.
    pub fn send_request(
        &self,
        request_id: u16,
        params: &[u8],
        timeout: Duration,
    ) -> Result<Vec<u8>> {
        let (transport, capabilities) = match &*self.lock_state() {
            State::Open(open) => (Arc::clone(&open.transport), open.capabilities.clone()),
            State::Closed => return Err(Error::NotOpen),
        };

        if params.len() > ReportSize::Long.max_params() {
            return Err(Error::ParamsTooLong(params.len()));
        }

        let fits_short = params.len() <= ReportSize::Short.max_params();
        let size = if fits_short && capabilities.supports_size(ReportSize::Short) {
            ReportSize::Short
        } else if capabilities.supports_size(ReportSize::Long) {
            ReportSize::Long
        } else {
            debug!(
                request_id = format_args!("0x{request_id:04X}"),
                params_len = params.len(),
                "No report kind can carry request"
            );
            return Err(Error::Unsupported);
        };

        let plan = attempt_plan(&capabilities, size, size == ReportSize::Short);
        self.run_plan(&transport, size, &plan, request_id, params, timeout)
    }

    fn run_plan(
        &self,
        transport: &Arc<dyn HidTransport>,
        size: ReportSize,
        plan: &[(ReportKind, u8)],
        request_id: u16,
        params: &[u8],
        timeout: Duration,
    ) -> Result<Vec<u8>> {
        let mut last_error = Error::Unsupported;

        for &(kind, device_number) in plan {
            let slot = self.register_next(transport, request_id)?;
            let full_id = slot.request_id();
            let outcome =
                self.attempt(&**transport, size, kind, device_number, slot, params, timeout);

            match outcome {
                Outcome::Timeout | Outcome::TransmitFailure(_) => {
                    debug!(
                        request_id = format_args!("0x{full_id:04X}"),
                        ?size,
                        ?kind,
                        device_number = format_args!("0x{device_number:02X}"),
                        ?outcome,
                        "HID++ attempt failed, trying next route"
                    );
                    last_error = outcome.into_result(full_id).err().unwrap_or(last_error);
                }
                other => return other.into_result(full_id),
            }
        }

        Err(last_error)
    }

    /// Register the next software id whose full request id is free.
    ///
    /// Runs under the state lock so a concurrent `close` either happens first
    /// and is reported as `Cancelled`, or cancels the new registration.
    fn register_next(&self, transport: &Arc<dyn HidTransport>, request_id: u16) -> Result<Slot> {
        let state = self.lock_state();
        let reader = match &*state {
            State::Open(open) if Arc::ptr_eq(&open.transport, transport) => &open.reader,
            _ => return Err(Error::Cancelled),
        };
        if let Some(err) = reader.failure() {
            return Err(err);
        }

        for _ in 0..SW_ID_COUNT {
            let full_id = with_sw_id(request_id, self.next_sw_id());
            let Some(slot) = self.correlator.register(full_id) else {
                continue;
            };
            // the reader may have failed between the check above and here
            if let Some(err) = reader.failure() {
                self.correlator.resolve_transmit_failure(full_id, err.clone());
                return Err(err);
            }
            return Ok(slot);
        }
        Err(Error::TooManyInFlight(request_id))
    }

    #[allow(clippy::too_many_arguments)]
    fn attempt(
        &self,
        transport: &dyn HidTransport,
        size: ReportSize,
        kind: ReportKind,
        device_number: u8,
        slot: Slot,
        params: &[u8],
        timeout: Duration,
    ) -> Outcome {
        let full_id = slot.request_id();
        let frame = match encode_request(size, device_number, full_id, params) {
            Ok(frame) => frame,
            Err(e) => {
                self.correlator.resolve_transmit_failure(full_id, e.clone());
                return Outcome::TransmitFailure(e);
            }
        };

        // cancelled or failed since registration
        if let Some(outcome) = slot.try_outcome() {
            return outcome;
        }

        trace!(
            ?kind,
            report_hex = format_args!("{:02X?}", frame),
            "HID++ TX"
        );

        if let Err(e) = transport.write_report(kind, &frame) {
            self.correlator.resolve_transmit_failure(full_id, e);
        }

        slot.wait(&self.correlator, timeout)
    }

    fn next_sw_id(&self) -> u8 {
        let mut sw_id = self.sw_id.lock().unwrap_or_else(|e| e.into_inner());
        *sw_id = if *sw_id >= SW_ID_MAX || *sw_id < SW_ID_MIN {
            SW_ID_MIN
        } else {
            *sw_id + 1
        };
        *sw_id
    }

    fn lock_state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Drop for DeviceSession {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for DeviceSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceSession")
            .field("device", &self.device.id)
            .field("state", &self.state())
            .finish()
    }
}

/// Ordered (kind, device number) attempts for one report size.
///
/// Short requests cascade from output to feature kind; long requests use the
/// first supported kind only.
fn attempt_plan(
    caps: &CapabilitySet,
    size: ReportSize,
    cascade_kinds: bool,
) -> Vec<(ReportKind, u8)> {
    let mut plan = Vec::with_capacity(4);
    for kind in [ReportKind::Output, ReportKind::Feature] {
        if !caps.supports(kind, size) {
            continue;
        }
        plan.push((kind, DEVICE_NUMBER_PRIMARY));
        if DEVICE_NUMBER_PRIMARY != DEVICE_NUMBER_FALLBACK {
            plan.push((kind, DEVICE_NUMBER_FALLBACK));
        }
        if !cascade_kinds {
            break;
        }
    }
    plan
}
