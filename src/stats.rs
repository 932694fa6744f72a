use std::time::{Duration, Instant};

/// Counters for one run of the bridge service.
#[derive(Debug, Clone)]
pub struct BridgeStats {
    pub reports_applied: u64,
    pub reports_dropped: u64,
    pub reports_failed: u64,
    pub deltas_sent: u64,
    pub syncs: u64,
    pub connects: u64,
    pub disconnects: u64,
    t0: Instant,
    last: Instant,
}

impl Default for BridgeStats {
    fn default() -> Self {
        Self::new()
    }
}

impl BridgeStats {
    pub fn new() -> Self {
        Self {
            reports_applied: 0,
            reports_dropped: 0,
            reports_failed: 0,
            deltas_sent: 0,
            syncs: 0,
            connects: 0,
            disconnects: 0,
            t0: Instant::now(),
            last: Instant::now(),
        }
    }

    pub fn add_deltas(&mut self, n: usize) {
        self.deltas_sent += n as u64;
    }

    pub fn inc_sync(&mut self) {
        self.syncs += 1;
    }

    /// Log a summary if `interval` has passed since the last one.
    pub fn maybe_log(&mut self, interval: Duration) -> bool {
        if interval.is_zero() || self.last.elapsed() < interval {
            return false;
        }
        self.log();
        self.last = Instant::now();
        true
    }

    pub fn log(&self) {
        tracing::info!(
            applied = self.reports_applied,
            dropped = self.reports_dropped,
            failed = self.reports_failed,
            deltas = self.deltas_sent,
            syncs = self.syncs,
            connects = self.connects,
            disconnects = self.disconnects,
            "bridge up {:.0}s",
            self.t0.elapsed().as_secs_f64()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_interval_never_logs() {
        let mut stats = BridgeStats::new();
        assert!(!stats.maybe_log(Duration::ZERO));
    }

    #[test]
    fn logs_once_per_interval() {
        let mut stats = BridgeStats::new();
        stats.add_deltas(3);
        std::thread::sleep(Duration::from_millis(5));
        assert!(stats.maybe_log(Duration::from_millis(1)));
        assert!(!stats.maybe_log(Duration::from_secs(60)));
        assert_eq!(stats.deltas_sent, 3);
    }
}
