//! Size-based rotation of the validator log.
//!
//! Rotated logs are renamed with a timestamp suffix
//! (e.g. `validator.log.20250101-120000`).

use chrono::Utc;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::core::config::MonitoringDefaults;
use crate::error::{Result, ValmonError};

/// Default maximum log file size before rotation (10 MB).
pub const DEFAULT_MAX_LOG_SIZE: u64 = 10 * 1024 * 1024;

/// Default number of rotated log files to keep.
pub const DEFAULT_MAX_LOG_FILES: usize = 5;

#[derive(Debug, Clone)]
pub struct LogRotationConfig {
    /// Maximum log file size in bytes before rotation.
    pub max_size: u64,
    /// Maximum number of rotated log files to keep.
    pub max_files: usize,
}

impl Default for LogRotationConfig {
    fn default() -> Self {
        Self {
            max_size: DEFAULT_MAX_LOG_SIZE,
            max_files: DEFAULT_MAX_LOG_FILES,
        }
    }
}

impl From<&MonitoringDefaults> for LogRotationConfig {
    fn from(monitoring: &MonitoringDefaults) -> Self {
        Self {
            max_size: monitoring.log_max_size_mb * 1024 * 1024,
            max_files: monitoring.log_max_files,
        }
    }
}

/// Rotate `log_path` if it has grown past `max_size`.
///
/// Returns `Ok(true)` if the file was rotated.
pub fn rotate_log_if_needed(log_path: &Path, config: &LogRotationConfig) -> Result<bool> {
    let metadata = match fs::metadata(log_path) {
        Ok(m) => m,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(ValmonError::io_at(log_path, e)),
    };

    if metadata.len() < config.max_size {
        return Ok(false);
    }

    let timestamp = Utc::now().format("%Y%m%d-%H%M%S");
    let rotated_name = format!(
        "{}.{}",
        log_path.file_name().unwrap_or_default().to_string_lossy(),
        timestamp
    );
    let rotated_path = log_path.with_file_name(rotated_name);

    fs::rename(log_path, &rotated_path).map_err(|e| ValmonError::io_at(&rotated_path, e))?;

    log::info!(
        "Rotated {} to {} ({} MB)",
        log_path.display(),
        rotated_path.display(),
        metadata.len() / (1024 * 1024)
    );

    cleanup_old_logs(log_path, config.max_files);

    Ok(true)
}

/// Delete rotated copies beyond the newest `max_files`
pub(crate) fn cleanup_old_logs(log_path: &Path, max_files: usize) {
    let log_dir = log_path.parent().unwrap_or_else(|| Path::new("."));
    let log_name = log_path.file_name().unwrap_or_default().to_string_lossy();
    let prefix = format!("{}.", log_name);

    let mut rotated_files: Vec<(PathBuf, std::time::SystemTime)> = Vec::new();

    if let Ok(entries) = fs::read_dir(log_dir) {
        for entry in entries.flatten() {
            let path = entry.path();
            let filename = entry.file_name().to_string_lossy().to_string();

            if !filename.starts_with(&prefix) || path == log_path {
                continue;
            }
            if let Ok(modified) = entry.metadata().and_then(|m| m.modified()) {
                rotated_files.push((path, modified));
            }
        }
    }

    // Newest first
    rotated_files.sort_by(|a, b| b.1.cmp(&a.1));

    for (path, _) in rotated_files.iter().skip(max_files) {
        match fs::remove_file(path) {
            Ok(()) => log::debug!("Deleted old rotated log {}", path.display()),
            Err(e) => log::warn!("Failed to delete old rotated log {}: {}", path.display(), e),
        }
    }
}
