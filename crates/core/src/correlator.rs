//! Request/response correlation for one device session.
//!
//! Replies arrive on the reader thread, out-of-band from the writes that
//! caused them. Each in-flight request registers a completion slot keyed by
//! its full request identifier (software id included); the first resolution
//! for that identifier removes the slot and wakes the waiter. Every later
//! resolution for the same identifier is a no-op.

use std::collections::HashMap;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender};
use std::sync::Mutex;
use std::time::Duration;

use tracing::{debug, trace};

use crate::error::{Error, Result};
use crate::hidpp::Reply;

/// How a pending request was resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Success(Vec<u8>),
    DeviceError(u8),
    TransmitFailure(Error),
    Timeout,
    Cancelled,
}

impl Outcome {
    /// Convert into the payload or the matching error kind.
    pub fn into_result(self, request_id: u16) -> Result<Vec<u8>> {
        match self {
            Self::Success(payload) => Ok(payload),
            Self::DeviceError(code) => Err(Error::Device { request_id, code }),
            Self::TransmitFailure(err) => Err(err),
            Self::Timeout => Err(Error::Timeout { request_id }),
            Self::Cancelled => Err(Error::Cancelled),
        }
    }
}

/// Waiting side of a registered request.
#[derive(Debug)]
pub struct Slot {
    request_id: u16,
    rx: Receiver<Outcome>,
}

impl Slot {
    pub fn request_id(&self) -> u16 {
        self.request_id
    }

    /// The outcome, if the request already resolved.
    pub fn try_outcome(&self) -> Option<Outcome> {
        self.rx.try_recv().ok()
    }

    /// Block until the request resolves or `timeout` elapses.
    ///
    /// On expiry the entry is resolved as `Timeout`. If a reply won the race
    /// against the timer, that reply is returned instead.
    pub fn wait(self, correlator: &Correlator, timeout: Duration) -> Outcome {
        match self.rx.recv_timeout(timeout) {
            Ok(outcome) => outcome,
            Err(RecvTimeoutError::Timeout) => {
                correlator.resolve_timeout(self.request_id);
                self.rx.try_recv().unwrap_or(Outcome::Timeout)
            }
            Err(RecvTimeoutError::Disconnected) => Outcome::Cancelled,
        }
    }
}

/// The pending request table.
#[derive(Debug, Default)]
pub struct Correlator {
    pending: Mutex<HashMap<u16, SyncSender<Outcome>>>,
}

impl Correlator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a waiter for `request_id`.
    ///
    /// Returns `None` if a request with this identifier is already in flight.
    pub fn register(&self, request_id: u16) -> Option<Slot> {
        let mut pending = self.lock();
        if pending.contains_key(&request_id) {
            return None;
        }
        let (tx, rx) = mpsc::sync_channel(1);
        pending.insert(request_id, tx);
        Some(Slot { request_id, rx })
    }

    /// Whether a request with this identifier is waiting.
    pub fn is_pending(&self, request_id: u16) -> bool {
        self.lock().contains_key(&request_id)
    }

    pub fn pending_count(&self) -> usize {
        self.lock().len()
    }

    pub fn resolve_success(&self, request_id: u16, payload: Vec<u8>) -> bool {
        self.resolve(request_id, Outcome::Success(payload))
    }

    pub fn resolve_device_error(&self, request_id: u16, code: u8) -> bool {
        self.resolve(request_id, Outcome::DeviceError(code))
    }

    pub fn resolve_transmit_failure(&self, request_id: u16, err: Error) -> bool {
        self.resolve(request_id, Outcome::TransmitFailure(err))
    }

    pub fn resolve_timeout(&self, request_id: u16) -> bool {
        self.resolve(request_id, Outcome::Timeout)
    }

    /// Resolve every pending request as cancelled.
    pub fn cancel_all(&self) {
        let count = self.resolve_all(|| Outcome::Cancelled);
        if count > 0 {
            debug!(count, "Cancelled pending HID++ requests");
        }
    }

    /// Resolve every pending request with a copy of `err`.
    pub fn fail_all(&self, err: &Error) {
        let count = self.resolve_all(|| Outcome::TransmitFailure(err.clone()));
        if count > 0 {
            debug!(count, error = %err, "Failed pending HID++ requests");
        }
    }

    /// Feed one received report into the table.
    ///
    /// Frames too short to parse and replies nobody waits for are dropped.
    pub fn deliver(&self, frame: &[u8]) {
        let Some(reply) = Reply::parse(frame) else {
            trace!(frame = format_args!("{:02X?}", frame), "HID++ RX ignored (short)");
            return;
        };

        let request_id = reply.request_id();
        let matched = match reply {
            Reply::Success { payload, .. } => {
                trace!(
                    request_id = format_args!("0x{request_id:04X}"),
                    payload = format_args!("{:02X?}", payload),
                    "HID++ RX"
                );
                self.resolve_success(request_id, payload)
            }
            Reply::Error { code, .. } => {
                debug!(
                    request_id = format_args!("0x{request_id:04X}"),
                    code = format_args!("0x{code:02X}"),
                    "HID++ RX error frame"
                );
                self.resolve_device_error(request_id, code)
            }
        };

        if !matched {
            trace!(
                request_id = format_args!("0x{request_id:04X}"),
                "HID++ RX with no pending request"
            );
        }
    }

    /// Compare-and-remove: resolves only if an entry exists.
    fn resolve(&self, request_id: u16, outcome: Outcome) -> bool {
        let Some(tx) = self.lock().remove(&request_id) else {
            return false;
        };
        // The slot may already be gone if its waiter gave up.
        let _ = tx.try_send(outcome);
        true
    }

    fn resolve_all(&self, outcome: impl Fn() -> Outcome) -> usize {
        let drained: Vec<_> = self.lock().drain().collect();
        for (_, tx) in &drained {
            let _ = tx.try_send(outcome());
        }
        drained.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<u16, SyncSender<Outcome>>> {
        // A poisoned table still holds valid senders.
        self.pending.lock().unwrap_or_else(|e| e.into_inner())
    }
}
