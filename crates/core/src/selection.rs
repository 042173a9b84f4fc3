//! The single selected device session and scoped session use.

use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{debug, info};

use crate::error::Result;
use crate::session::DeviceSession;

/// Holds at most one open session. Selecting another device closes the
/// previous one first.
#[derive(Default)]
pub struct Selection {
    current: Mutex<Option<Arc<DeviceSession>>>,
}

impl Selection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `session` the selected one and open it.
    ///
    /// The previous session is closed before `session` opens. On open
    /// failure nothing is selected.
    pub fn select(&self, session: Arc<DeviceSession>) -> Result<Arc<DeviceSession>> {
        let mut current = self.lock();
        if let Some(previous) = current.take() {
            if !Arc::ptr_eq(&previous, &session) {
                debug!(device = %previous.device().name, "Closing previously selected device");
                previous.close();
            }
        }

        session.open()?;
        info!(device = %session.device().name, "Device selected");
        *current = Some(Arc::clone(&session));
        Ok(session)
    }

    pub fn current(&self) -> Option<Arc<DeviceSession>> {
        self.lock().clone()
    }

    /// Close and forget the selected session.
    pub fn clear(&self) {
        if let Some(previous) = self.lock().take() {
            previous.close();
        }
    }

    fn lock(&self) -> MutexGuard<'_, Option<Arc<DeviceSession>>> {
        self.current.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Drop for Selection {
    fn drop(&mut self) {
        self.clear();
    }
}

/// Run `f` on an open `session`, closing it afterwards if this call opened it.
///
/// The close also happens when `f` fails or panics.
pub fn with_session<T>(
    session: &DeviceSession,
    f: impl FnOnce(&DeviceSession) -> Result<T>,
) -> Result<T> {
    let was_open = session.is_open();
    session.open()?;
    let _guard = CloseGuard {
        session,
        close: !was_open,
    };
    f(session)
}

struct CloseGuard<'a> {
    session: &'a DeviceSession,
    close: bool,
}

impl Drop for CloseGuard<'_> {
    fn drop(&mut self) {
        if self.close {
            self.session.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SessionConfig;
    use crate::error::Error;
    use crate::transport::mock::{mock_device, MockBackend, MockTransport, OUTPUT_DESCRIPTOR};

    fn session_on(backend: &Arc<MockBackend>, id: &str, name: &str) -> Arc<DeviceSession> {
        let device = mock_device(id, name);
        backend.attach(device.clone(), Arc::new(MockTransport::new(OUTPUT_DESCRIPTOR)));
        Arc::new(DeviceSession::new(
            device,
            Arc::clone(backend) as Arc<dyn crate::transport::HidBackend>,
            SessionConfig::default(),
        ))
    }

    #[test]
    fn selecting_closes_previous() {
        let backend = Arc::new(MockBackend::new());
        let first = session_on(&backend, "/dev/hidraw1", "G502");
        let second = session_on(&backend, "/dev/hidraw2", "G Pro");
        let selection = Selection::new();

        selection.select(Arc::clone(&first)).unwrap();
        assert!(first.is_open());

        selection.select(Arc::clone(&second)).unwrap();
        assert!(!first.is_open());
        assert!(second.is_open());
        assert_eq!(selection.current().unwrap().device().id, "/dev/hidraw2");
    }

    #[test]
    fn reselecting_same_session_keeps_it_open() {
        let backend = Arc::new(MockBackend::new());
        let session = session_on(&backend, "/dev/hidraw1", "G502");
        let selection = Selection::new();

        selection.select(Arc::clone(&session)).unwrap();
        selection.select(Arc::clone(&session)).unwrap();
        assert!(session.is_open());
        assert_eq!(backend.opens(), 1);
    }

    #[test]
    fn failed_open_leaves_nothing_selected() {
        let backend = Arc::new(MockBackend::new());
        let first = session_on(&backend, "/dev/hidraw1", "G502");
        let second = session_on(&backend, "/dev/hidraw2", "G Pro");
        let selection = Selection::new();

        selection.select(Arc::clone(&first)).unwrap();
        backend.fail_open(Some(Error::PermissionDenied("EACCES".into())));
        assert!(matches!(
            selection.select(second),
            Err(Error::PermissionDenied(_))
        ));
        assert!(!first.is_open());
        assert!(selection.current().is_none());
    }

    #[test]
    fn clear_and_drop_close_the_session() {
        let backend = Arc::new(MockBackend::new());
        let session = session_on(&backend, "/dev/hidraw1", "G502");

        let selection = Selection::new();
        selection.select(Arc::clone(&session)).unwrap();
        selection.clear();
        assert!(!session.is_open());
        assert!(selection.current().is_none());

        let selection = Selection::new();
        selection.select(Arc::clone(&session)).unwrap();
        drop(selection);
        assert!(!session.is_open());
    }

    #[test]
    fn with_session_closes_after_error() {
        let backend = Arc::new(MockBackend::new());
        let session = session_on(&backend, "/dev/hidraw1", "G502");

        let result: Result<()> = with_session(&session, |s| {
            assert!(s.is_open());
            Err(Error::EmptyList)
        });
        assert_eq!(result, Err(Error::EmptyList));
        assert!(!session.is_open());
    }

    #[test]
    fn with_session_leaves_already_open_session_open() {
        let backend = Arc::new(MockBackend::new());
        let session = session_on(&backend, "/dev/hidraw1", "G502");
        session.open().unwrap();

        let value = with_session(&session, |_| Ok(7)).unwrap();
        assert_eq!(value, 7);
        assert!(session.is_open());
    }
}
