//! Remembered CLI choices: last selected device and last DPI per device.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

const APP_DIR: &str = "hidpp-dpi";
const PREFS_FILE: &str = "prefs.json";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Prefs {
    /// Id of the device last operated on.
    pub last_device: Option<String>,
    /// Last DPI written, keyed by device id.
    pub last_dpi: BTreeMap<String, u16>,
}

impl Prefs {
    /// Load from `path`. A missing file gives the defaults.
    pub fn load_from(path: &Path) -> Result<Self> {
        match fs::read_to_string(path) {
            Ok(text) => serde_json::from_str(&text)
                .with_context(|| format!("parse preferences {}", path.display())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e).with_context(|| format!("read preferences {}", path.display())),
        }
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create directory {}", parent.display()))?;
        }
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json).with_context(|| format!("write preferences {}", path.display()))
    }

    pub fn remember_device(&mut self, device_id: &str) {
        self.last_device = Some(device_id.to_string());
    }

    pub fn remember_dpi(&mut self, device_id: &str, dpi: u16) {
        self.remember_device(device_id);
        self.last_dpi.insert(device_id.to_string(), dpi);
    }

    /// The device and DPI `restore` should apply.
    pub fn restore_target(&self) -> Option<(&str, u16)> {
        let device = self.last_device.as_deref()?;
        self.last_dpi.get(device).map(|&dpi| (device, dpi))
    }
}

/// Preferences file location under the user config directory.
pub fn prefs_path() -> Result<PathBuf> {
    let dir = config_dir().context("no user config directory (set HOME or XDG_CONFIG_HOME)")?;
    Ok(dir.join(APP_DIR).join(PREFS_FILE))
}

fn config_dir() -> Option<PathBuf> {
    let non_empty = |name: &str| std::env::var_os(name).filter(|v| !v.is_empty());

    #[cfg(target_os = "windows")]
    {
        non_empty("APPDATA").map(PathBuf::from)
    }

    #[cfg(not(target_os = "windows"))]
    {
        non_empty("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .or_else(|| non_empty("HOME").map(|home| PathBuf::from(home).join(".config")))
    }
}
