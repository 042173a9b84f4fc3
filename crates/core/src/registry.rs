//! Device discovery: sorted snapshots of matching devices and change
//! notification.

use std::collections::HashSet;
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use tracing::{debug, info, warn};

use crate::config::SessionConfig;
use crate::device::DeviceDescriptor;
use crate::error::{Error, Result};
use crate::session::DeviceSession;
use crate::transport::HidBackend;

/// Enumerates matching devices on one HID backend.
pub struct Registry {
    backend: Arc<dyn HidBackend>,
    config: SessionConfig,
}

impl Registry {
    pub fn new(backend: Arc<dyn HidBackend>, config: SessionConfig) -> Self {
        Self { backend, config }
    }

    /// Currently present devices, sorted by name.
    ///
    /// An empty list means no device was found. Errors come only from the host
    /// HID layer itself.
    pub fn snapshot(&self) -> Result<Vec<DeviceDescriptor>> {
        let devices = sort_snapshot(self.backend.enumerate()?);
        debug!(count = devices.len(), "Device enumeration complete");
        Ok(devices)
    }

    /// An unopened session for `device`.
    pub fn session(&self, device: &DeviceDescriptor) -> DeviceSession {
        DeviceSession::new(device.clone(), Arc::clone(&self.backend), self.config.clone())
    }

    /// Unopened sessions for every present device, in snapshot order.
    pub fn sessions(&self) -> Result<Vec<DeviceSession>> {
        Ok(self
            .snapshot()?
            .iter()
            .map(|device| self.session(device))
            .collect())
    }

    /// Call `on_change` with the full snapshot whenever a device arrives or
    /// leaves. Polls every `watch_interval_ms`; stops when the handle drops.
    pub fn watch<F>(&self, mut on_change: F) -> Result<WatchHandle>
    where
        F: FnMut(Vec<DeviceDescriptor>) + Send + 'static,
    {
        let backend = Arc::clone(&self.backend);
        let interval = self.config.watch_interval();
        let mut known = ids(&self.snapshot()?);
        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let mut failing = false;

        let handle = thread::Builder::new()
            .name("hidpp-registry-watch".into())
            .spawn(move || loop {
                match stop_rx.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => {}
                    _ => break,
                }

                // a failed poll keeps the last known list
                let devices = match backend.enumerate() {
                    Ok(devices) => {
                        if std::mem::take(&mut failing) {
                            info!("Device enumeration recovered");
                        }
                        sort_snapshot(devices)
                    }
                    Err(e) if failing => {
                        debug!(error = %e, "Device enumeration still failing");
                        continue;
                    }
                    Err(e) => {
                        warn!(error = %e, "Device enumeration failed");
                        failing = true;
                        continue;
                    }
                };

                let current = ids(&devices);
                if current != known {
                    info!(count = devices.len(), "Device list changed");
                    known = current;
                    on_change(devices);
                }
            })
            .map_err(|e| Error::Hid(format!("spawn watch thread: {e}")))?;

        Ok(WatchHandle {
            stop: Some(stop_tx),
            handle: Some(handle),
        })
    }
}

/// Stops the registry watcher when dropped.
pub struct WatchHandle {
    stop: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl WatchHandle {
    /// Stop watching and wait for the watcher thread to exit.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        drop(self.stop.take());
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("registry watch thread panicked");
            }
        }
    }
}

impl Drop for WatchHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Drop repeated ids and sort by name, case-insensitively.
///
/// Names compare by their Unicode lowercase form with no locale rules; equal
/// names keep enumeration order.
pub fn sort_snapshot(devices: Vec<DeviceDescriptor>) -> Vec<DeviceDescriptor> {
    let mut seen = HashSet::new();
    let mut unique: Vec<DeviceDescriptor> = devices
        .into_iter()
        .filter(|d| seen.insert(d.id.clone()))
        .collect();
    unique.sort_by(|a, b| a.name.to_lowercase().cmp(&b.name.to_lowercase()));
    unique
}

fn ids(devices: &[DeviceDescriptor]) -> Vec<String> {
    devices.iter().map(|d| d.id.clone()).collect()
}
