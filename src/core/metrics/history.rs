//! Day-partitioned sample history: one JSON object per line in
//! `metrics-YYYY-MM-DD.jsonl`.

use chrono::{Days, NaiveDate, Utc};
use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, ErrorKind, Write};
use std::path::{Path, PathBuf};

use super::sample::MetricSample;
use crate::error::{Result, ValmonError};

const FILE_PREFIX: &str = "metrics-";
const FILE_SUFFIX: &str = ".jsonl";

#[derive(Debug, Clone)]
pub struct HistoryStore {
    dir: PathBuf,
}

impl HistoryStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn file_for(&self, date: NaiveDate) -> PathBuf {
        self.dir
            .join(format!("{}{}{}", FILE_PREFIX, date.format("%Y-%m-%d"), FILE_SUFFIX))
    }

    /// Date encoded in a history file name
    fn parse_file_date(file_name: &str) -> Option<NaiveDate> {
        let date = file_name
            .strip_prefix(FILE_PREFIX)?
            .strip_suffix(FILE_SUFFIX)?;
        NaiveDate::parse_from_str(date, "%Y-%m-%d").ok()
    }

    /// Append to the file for the sample's (UTC) day
    pub fn append(&self, sample: &MetricSample) -> Result<()> {
        fs::create_dir_all(&self.dir).map_err(|e| ValmonError::io_at(&self.dir, e))?;

        let path = self.file_for(sample.timestamp.date_naive());
        let mut line = serde_json::to_string(sample)?;
        line.push('\n');

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| ValmonError::io_at(&path, e))?;
        file.write_all(line.as_bytes())
            .map_err(|e| ValmonError::io_at(&path, e))
    }

    /// Samples from every day in `start..=end`, in file order. Missing days
    /// are skipped; malformed lines are skipped with a warning.
    pub fn read_range(&self, start: NaiveDate, end: NaiveDate) -> Result<Vec<MetricSample>> {
        if start > end {
            return Err(ValmonError::invalid_input(format!(
                "History range start {} is after end {}",
                start, end
            )));
        }

        let mut samples = Vec::new();
        for date in start.iter_days().take_while(|d| *d <= end) {
            self.read_day(date, &mut samples)?;
        }
        Ok(samples)
    }

    fn read_day(&self, date: NaiveDate, out: &mut Vec<MetricSample>) -> Result<()> {
        let path = self.file_for(date);
        let file = match fs::File::open(&path) {
            Ok(f) => f,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(ValmonError::io_at(&path, e)),
        };

        for (index, line) in BufReader::new(file).lines().enumerate() {
            let line = line.map_err(|e| ValmonError::io_at(&path, e))?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<MetricSample>(&line) {
                Ok(sample) => out.push(sample),
                Err(e) => log::warn!(
                    "Skipping malformed line {} in {}: {}",
                    index + 1,
                    path.display(),
                    e
                ),
            }
        }
        Ok(())
    }

    /// Delete day files older than `retention_days` before today (UTC)
    pub fn cleanup(&self, retention_days: u32) -> Result<Vec<PathBuf>> {
        self.cleanup_before(retention_days, Utc::now().date_naive())
    }

    pub(crate) fn cleanup_before(&self, retention_days: u32, today: NaiveDate) -> Result<Vec<PathBuf>> {
        let cutoff = today
            .checked_sub_days(Days::new(u64::from(retention_days)))
            .unwrap_or(NaiveDate::MIN);

        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(ValmonError::io_at(&self.dir, e)),
        };

        let mut removed = Vec::new();
        for entry in entries.flatten() {
            let file_name = entry.file_name().to_string_lossy().to_string();
            let Some(date) = Self::parse_file_date(&file_name) else {
                continue;
            };
            if date >= cutoff {
                continue;
            }

            let path = entry.path();
            match fs::remove_file(&path) {
                Ok(()) => {
                    log::info!("Removed metrics history {}", path.display());
                    removed.push(path);
                }
                Err(e) => log::warn!("Failed to remove {}: {}", path.display(), e),
            }
        }

        removed.sort();
        Ok(removed)
    }
}
