//! OS-level inspection and signalling of processes by pid.

use serde::{Deserialize, Serialize};
use sysinfo::{Pid, ProcessRefreshKind, ProcessStatus, ProcessesToUpdate, Signal, System};

/// Live resource usage of a single process
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessUsage {
    pub cpu_percent: f32,
    pub memory_mb: f64,
}

/// Keeps a `System` around so CPU usage can be computed between refreshes
pub struct ProcessProbe {
    system: System,
}

impl ProcessProbe {
    pub fn new() -> Self {
        Self {
            system: System::new(),
        }
    }

    fn refresh(&mut self, pid: Pid) {
        self.system.refresh_processes_specifics(
            ProcessesToUpdate::Some(&[pid]),
            true,
            ProcessRefreshKind::nothing().with_cpu().with_memory(),
        );
    }

    /// Exited-but-unreaped processes count as dead
    pub fn is_alive(&mut self, pid: u32) -> bool {
        let pid = Pid::from_u32(pid);
        self.refresh(pid);

        self.system
            .process(pid)
            .is_some_and(|p| !matches!(p.status(), ProcessStatus::Zombie | ProcessStatus::Dead))
    }

    /// CPU usage is relative to the previous refresh of the same pid; the first
    /// call for a pid reports 0%.
    pub fn usage(&mut self, pid: u32) -> Option<ProcessUsage> {
        let pid = Pid::from_u32(pid);
        self.refresh(pid);

        self.system.process(pid).map(|p| ProcessUsage {
            cpu_percent: p.cpu_usage(),
            memory_mb: p.memory() as f64 / (1024.0 * 1024.0),
        })
    }

    /// Send SIGTERM (or the platform's closest equivalent)
    pub fn terminate(&mut self, pid: u32) -> bool {
        let pid = Pid::from_u32(pid);
        self.refresh(pid);

        match self.system.process(pid) {
            Some(process) => process.kill_with(Signal::Term).unwrap_or_else(|| process.kill()),
            None => false,
        }
    }

    /// Send SIGKILL
    pub fn kill(&mut self, pid: u32) -> bool {
        let pid = Pid::from_u32(pid);
        self.refresh(pid);

        self.system.process(pid).is_some_and(|process| process.kill())
    }
}

impl Default for ProcessProbe {
    fn default() -> Self {
        Self::new()
    }
}

/// One-shot liveness check
pub fn is_alive(pid: u32) -> bool {
    ProcessProbe::new().is_alive(pid)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_current_process_is_alive() {
        assert!(is_alive(std::process::id()));
    }

    #[test]
    fn test_usage_for_current_process() {
        let mut probe = ProcessProbe::new();
        let usage = probe.usage(std::process::id()).unwrap();
        assert!(usage.memory_mb > 0.0);
    }

    #[test]
    fn test_unknown_pid_is_not_alive() {
        // pid_max on Linux is at most 2^22
        assert!(!is_alive(u32::MAX - 7));
    }
}
