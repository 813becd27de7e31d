//! Host-level sources: CPU/memory/load, network throughput and the
//! filesystem holding the ledger.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;
use sysinfo::{CpuRefreshKind, Disks, MemoryRefreshKind, Networks, RefreshKind, System};

use super::sample::{
    CpuMetrics, LoadAverage, MemoryMetrics, NetworkMetrics, StorageMetrics, SystemMetrics,
};
use crate::error::{Result, ValmonError};

const MIB: f64 = 1024.0 * 1024.0;

fn percent(part: u64, total: u64) -> f32 {
    if total > 0 {
        (part as f32 / total as f32) * 100.0
    } else {
        0.0
    }
}

/// CPU, memory and load averages
pub struct SystemProbe {
    system: System,
}

impl SystemProbe {
    pub fn new() -> Self {
        let refresh_kind = RefreshKind::nothing()
            .with_cpu(CpuRefreshKind::nothing().with_cpu_usage())
            .with_memory(MemoryRefreshKind::nothing().with_ram());

        Self {
            system: System::new_with_specifics(refresh_kind),
        }
    }

    /// CPU usage is the delta since the previous call, so the very first
    /// reading after construction may be 0.
    pub fn collect(&mut self) -> SystemMetrics {
        self.system.refresh_cpu_usage();
        self.system.refresh_memory();

        let total = self.system.total_memory();
        let used = self.system.used_memory();
        let load = System::load_average();

        SystemMetrics {
            cpu: CpuMetrics {
                usage_percent: self.system.global_cpu_usage(),
                core_count: self.system.cpus().len(),
            },
            memory: MemoryMetrics {
                total_mb: total as f64 / MIB,
                used_mb: used as f64 / MIB,
                available_mb: self.system.available_memory() as f64 / MIB,
                usage_percent: percent(used, total),
            },
            load: LoadAverage {
                one: load.one,
                five: load.five,
                fifteen: load.fifteen,
            },
        }
    }
}

impl Default for SystemProbe {
    fn default() -> Self {
        Self::new()
    }
}

/// Throughput of one interface, with rates computed between calls
pub struct NetworkProbe {
    networks: Networks,
    preferred: Option<String>,
    last_update: Option<Instant>,
    last_values: HashMap<String, (u64, u64)>,
}

impl NetworkProbe {
    /// Reports `preferred` if given, else the busiest non-loopback interface
    pub fn new(preferred: Option<String>) -> Self {
        Self {
            networks: Networks::new_with_refreshed_list(),
            preferred,
            last_update: None,
            last_values: HashMap::new(),
        }
    }

    pub fn collect(&mut self) -> Result<NetworkMetrics> {
        self.networks.refresh(true);

        let now = Instant::now();
        let elapsed_secs = self
            .last_update
            .map(|t| now.duration_since(t).as_secs_f64())
            .filter(|secs| *secs > 0.0)
            .unwrap_or(1.0);

        let current: HashMap<String, (u64, u64)> = self
            .networks
            .iter()
            .map(|(name, data)| (name.to_string(), (data.total_received(), data.total_transmitted())))
            .collect();

        let interface = self.select_interface(&current)?;
        let (rx_total, tx_total) = current[&interface];
        let (prev_rx, prev_tx) = self
            .last_values
            .get(&interface)
            .copied()
            .unwrap_or((rx_total, tx_total));

        let rx_diff = rx_total.saturating_sub(prev_rx);
        let tx_diff = tx_total.saturating_sub(prev_tx);

        self.last_update = Some(now);
        self.last_values = current;

        Ok(NetworkMetrics {
            link_speed_mbps: link_speed_mbps(&interface),
            interface,
            rx_bytes_total: rx_total,
            tx_bytes_total: tx_total,
            rx_bytes_per_sec: (rx_diff as f64 / elapsed_secs) as u64,
            tx_bytes_per_sec: (tx_diff as f64 / elapsed_secs) as u64,
        })
    }

    fn select_interface(&self, current: &HashMap<String, (u64, u64)>) -> Result<String> {
        if let Some(preferred) = &self.preferred {
            return if current.contains_key(preferred) {
                Ok(preferred.clone())
            } else {
                Err(ValmonError::not_found(format!(
                    "Network interface '{}' not found",
                    preferred
                )))
            };
        }

        current
            .iter()
            .filter(|(name, _)| !is_loopback(name))
            .max_by(|a, b| {
                let a_total = a.1 .0 + a.1 .1;
                let b_total = b.1 .0 + b.1 .1;
                a_total.cmp(&b_total).then_with(|| b.0.cmp(a.0))
            })
            .or_else(|| current.iter().next())
            .map(|(name, _)| name.clone())
            .ok_or_else(|| ValmonError::not_found("No network interfaces found"))
    }
}

fn is_loopback(name: &str) -> bool {
    name == "lo" || name.starts_with("lo0") || name.to_ascii_lowercase().contains("loopback")
}

#[cfg(target_os = "linux")]
fn link_speed_mbps(interface: &str) -> Option<u64> {
    let path = Path::new("/sys/class/net").join(interface).join("speed");
    let speed: i64 = fs::read_to_string(path).ok()?.trim().parse().ok()?;
    u64::try_from(speed).ok().filter(|s| *s > 0)
}

#[cfg(not(target_os = "linux"))]
fn link_speed_mbps(_interface: &str) -> Option<u64> {
    None
}

/// Usage of the filesystem that holds the ledger, plus the ledger's own size
pub struct StorageProbe {
    disks: Disks,
    ledger_dir: PathBuf,
}

impl StorageProbe {
    pub fn new(ledger_dir: impl Into<PathBuf>) -> Self {
        Self {
            disks: Disks::new_with_refreshed_list(),
            ledger_dir: ledger_dir.into(),
        }
    }

    pub fn collect(&mut self) -> Result<StorageMetrics> {
        self.disks.refresh(true);

        let target = existing_ancestor(&self.ledger_dir);
        let disk = self
            .disks
            .iter()
            .filter(|disk| target.starts_with(disk.mount_point()))
            .max_by_key(|disk| disk.mount_point().as_os_str().len())
            .ok_or_else(|| {
                ValmonError::not_found(format!(
                    "No filesystem found for {}",
                    self.ledger_dir.display()
                ))
            })?;

        let total = disk.total_space();
        let available = disk.available_space();
        let used = total.saturating_sub(available);

        Ok(StorageMetrics {
            mount_point: disk.mount_point().to_string_lossy().to_string(),
            total_bytes: total,
            available_bytes: available,
            used_bytes: used,
            usage_percent: percent(used, total),
            ledger_bytes: dir_size(&self.ledger_dir),
        })
    }
}

/// Canonical form of the nearest existing ancestor, so a ledger that has not
/// been created yet still maps to a filesystem
fn existing_ancestor(path: &Path) -> PathBuf {
    path.ancestors()
        .find_map(|p| fs::canonicalize(p).ok())
        .unwrap_or_else(|| path.to_path_buf())
}

/// Total size of regular files below `dir`; symlinks are not followed
pub fn dir_size(dir: &Path) -> u64 {
    let mut total = 0;
    if let Ok(entries) = fs::read_dir(dir) {
        for entry in entries.flatten() {
            if let Ok(metadata) = entry.path().symlink_metadata() {
                if metadata.is_file() {
                    total += metadata.len();
                } else if metadata.is_dir() {
                    total += dir_size(&entry.path());
                }
            }
        }
    }
    total
}
