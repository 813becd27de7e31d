//! Durable record of the running validator, so a later invocation can
//! recover what is running.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use super::probe;
use crate::error::{Result, ValmonError};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessRecord {
    pub pid: u32,
    pub environment: String,
    pub start_time: DateTime<Utc>,
    pub rpc_port: u16,
}

/// Reads and writes the `.process` sentinel file
#[derive(Debug, Clone)]
pub struct ProcessRecordStore {
    path: PathBuf,
}

impl ProcessRecordStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The stored record, live or not
    pub fn load(&self) -> Result<Option<ProcessRecord>> {
        let data = match fs::read_to_string(&self.path) {
            Ok(data) => data,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(ValmonError::io_at(&self.path, e)),
        };

        serde_json::from_str(&data).map(Some).map_err(|e| {
            ValmonError::parse(format!(
                "Malformed process record {}: {}",
                self.path.display(),
                e
            ))
        })
    }

    /// The stored record, only if its pid is still a live process.
    ///
    /// Stale, unreadable and malformed records are all treated as absent.
    pub fn load_live(&self) -> Option<ProcessRecord> {
        match self.load() {
            Ok(Some(record)) if probe::is_alive(record.pid) => Some(record),
            Ok(Some(record)) => {
                log::debug!("Ignoring stale process record for pid {}", record.pid);
                None
            }
            Ok(None) => None,
            Err(e) => {
                log::warn!("Ignoring process record: {}", e);
                None
            }
        }
    }

    pub fn save(&self, record: &ProcessRecord) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| ValmonError::io_at(parent, e))?;
        }

        let data = serde_json::to_string_pretty(record)?;
        fs::write(&self.path, data).map_err(|e| ValmonError::io_at(&self.path, e))
    }

    pub fn clear(&self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(ValmonError::io_at(&self.path, e)),
        }
    }
}
