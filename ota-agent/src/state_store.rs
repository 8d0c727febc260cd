//! Persisted device state.
//!
//! Holds the installed version and the result of the last check. Written
//! atomically (temp file + rename) so a power cut never leaves half a file.

use chrono::{DateTime, Local};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::utils::errors::Result;

pub const INITIAL_VERSION: &str = "1.0.0";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceState {
    pub current_version: String,
    pub update_available: bool,
    pub available_version: Option<String>,
    pub last_check_time: Option<DateTime<Local>>,
}

impl Default for DeviceState {
    fn default() -> Self {
        Self {
            current_version: INITIAL_VERSION.to_string(),
            update_available: false,
            available_version: None,
            last_check_time: None,
        }
    }
}

pub struct StateStore {
    path: PathBuf,
    state: Mutex<DeviceState>,
}

impl StateStore {
    /// Load from `path`; a missing or unreadable file starts from defaults.
    pub fn open(path: &Path) -> Self {
        let state = match fs::read(path) {
            Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_else(|e| {
                warn!("Ignoring unreadable state file {}: {}", path.display(), e);
                DeviceState::default()
            }),
            Err(_) => DeviceState::default(),
        };
        Self {
            path: path.to_path_buf(),
            state: Mutex::new(state),
        }
    }

    pub fn snapshot(&self) -> DeviceState {
        self.state.lock().clone()
    }

    pub fn current_version(&self) -> String {
        self.state.lock().current_version.clone()
    }

    /// Apply `change` and persist the result. The in-memory copy only
    /// moves once the write has landed.
    pub fn update<F>(&self, change: F) -> Result<DeviceState>
    where
        F: FnOnce(&mut DeviceState),
    {
        let mut state = self.state.lock();
        let mut next = state.clone();
        change(&mut next);
        write_atomic(&self.path, &serde_json::to_vec_pretty(&next)?)?;
        *state = next;
        Ok(state.clone())
    }
}

fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(dir)?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}
