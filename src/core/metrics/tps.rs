//! Throughput estimate derived from slot progression.

use std::time::Instant;

#[derive(Debug, Clone, Copy)]
struct SlotObservation {
    pid: u32,
    slot: u64,
    at: Instant,
}

/// Keeps the previous (slot, time) pair between samples
#[derive(Debug, Clone)]
pub struct TpsEstimator {
    tx_per_slot: f64,
    previous: Option<SlotObservation>,
}

impl TpsEstimator {
    pub fn new(tx_per_slot: f64) -> Self {
        Self {
            tx_per_slot,
            previous: None,
        }
    }

    /// Record a slot reading and return `Δslot × txPerSlot / Δseconds`.
    ///
    /// Yields 0 for the first reading of a process, after a pid change, when
    /// the slot went backwards (ledger reset) or when no time has passed.
    pub fn observe(&mut self, pid: u32, slot: u64, at: Instant) -> f64 {
        let current = SlotObservation { pid, slot, at };
        let previous = self.previous.replace(current);

        let Some(previous) = previous else {
            return 0.0;
        };
        if previous.pid != pid || slot < previous.slot {
            return 0.0;
        }

        let elapsed = at.saturating_duration_since(previous.at).as_secs_f64();
        if elapsed <= 0.0 {
            return 0.0;
        }

        (slot - previous.slot) as f64 * self.tx_per_slot / elapsed
    }

    /// Forget the previous reading; called while nothing is running
    pub fn reset(&mut self) {
        self.previous = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_first_reading_is_zero() {
        let mut tps = TpsEstimator::new(64.0);
        assert_eq!(tps.observe(1, 100, Instant::now()), 0.0);
    }

    #[test]
    fn test_slot_progression() {
        let mut tps = TpsEstimator::new(64.0);
        let t0 = Instant::now();

        tps.observe(1, 100, t0);
        let estimate = tps.observe(1, 164, t0 + Duration::from_secs(1));

        assert!((estimate - 4096.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_pid_change_restarts_estimate() {
        let mut tps = TpsEstimator::new(64.0);
        let t0 = Instant::now();

        tps.observe(1, 100, t0);
        assert_eq!(tps.observe(2, 5, t0 + Duration::from_secs(1)), 0.0);
        let estimate = tps.observe(2, 7, t0 + Duration::from_secs(2));
        assert!((estimate - 128.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_slot_regression_and_reset() {
        let mut tps = TpsEstimator::new(64.0);
        let t0 = Instant::now();

        tps.observe(1, 500, t0);
        assert_eq!(tps.observe(1, 10, t0 + Duration::from_secs(1)), 0.0);

        tps.reset();
        assert_eq!(tps.observe(1, 20, t0 + Duration::from_secs(2)), 0.0);
    }
}
