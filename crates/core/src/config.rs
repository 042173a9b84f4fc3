//! Session and registry tuning.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::comm::MAX_RETRIES;
use crate::error::{Error, Result};
use crate::hidpp::LONG_REPORT_LEN;

/// Timing and buffer settings shared by sessions and the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Per-request reply timeout.
    pub request_timeout_ms: u64,
    /// How long one reader-thread poll blocks before checking for shutdown.
    pub read_poll_ms: u64,
    /// Size of the reader thread's input buffer.
    pub input_buffer_len: usize,
    /// Registry polling interval used by `Registry::watch`.
    pub watch_interval_ms: u64,
    /// Extra attempts for requests that time out.
    pub max_retries: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: 1000,
            read_poll_ms: 10,
            input_buffer_len: 64,
            watch_interval_ms: 2000,
            max_retries: 0,
        }
    }
}

impl SessionConfig {
    /// Load settings from a JSON file. Missing keys keep their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("read {}: {e}", path.display())))?;
        let config: Self = serde_json::from_str(&text)
            .map_err(|e| Error::Config(format!("parse {}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings no session can run with.
    pub fn validate(&self) -> Result<()> {
        if self.request_timeout_ms == 0 {
            return Err(Error::Config("request_timeout_ms must be positive".into()));
        }
        if self.read_poll_ms == 0 || self.watch_interval_ms == 0 {
            return Err(Error::Config("poll intervals must be positive".into()));
        }
        if self.input_buffer_len < LONG_REPORT_LEN {
            return Err(Error::Config(format!(
                "input_buffer_len must be at least {LONG_REPORT_LEN}"
            )));
        }
        if self.max_retries > MAX_RETRIES {
            return Err(Error::Config(format!(
                "max_retries must be at most {MAX_RETRIES}"
            )));
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn read_poll(&self) -> Duration {
        Duration::from_millis(self.read_poll_ms)
    }

    pub fn watch_interval(&self) -> Duration {
        Duration::from_millis(self.watch_interval_ms)
    }
}
