use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

/// Shared progress counter: the last sequence number delivered to the
/// consumer loop, plus one so that zero means "nothing delivered yet".
#[derive(Clone, Default)]
pub struct Heartbeat(Arc<AtomicU64>);

impl Heartbeat {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record delivery of the workload at `seq`.
    pub fn beat(&self, seq: u64) {
        self.0.store(seq + 1, Ordering::Relaxed);
    }

    /// Last delivered sequence number, if any.
    pub fn last(&self) -> Option<u64> {
        self.0.load(Ordering::Relaxed).checked_sub(1)
    }
}

/// Liveness watchdog for debug runs.
///
/// A plain thread, not a runtime task, so it keeps reporting even when
/// the runtime itself is wedged. Every `interval` it compares the
/// heartbeat against its last snapshot and logs a stall dump when no
/// workload has been delivered in between. Diagnostic only; it never
/// alters control flow.
pub struct Watchdog {
    stop: Arc<AtomicBool>,
    stalls: Arc<AtomicU64>,
    handle: Option<thread::JoinHandle<()>>,
}

impl Watchdog {
    pub fn arm(interval: Duration, heartbeat: Heartbeat) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let stalls = Arc::new(AtomicU64::new(0));
        let stop_flag = Arc::clone(&stop);
        let stall_counter = Arc::clone(&stalls);
        let handle = thread::Builder::new()
            .name("broadcast-watchdog".into())
            .spawn(move || run(interval, heartbeat, stop_flag, stall_counter))
            .expect("failed to spawn watchdog thread");
        Self {
            stop,
            stalls,
            handle: Some(handle),
        }
    }

    /// Number of stall dumps emitted so far.
    pub fn stalls(&self) -> u64 {
        self.stalls.load(Ordering::Relaxed)
    }

    pub fn disarm(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            handle.thread().unpark();
            let _ = handle.join();
        }
    }
}

impl Drop for Watchdog {
    fn drop(&mut self) {
        self.disarm();
    }
}

fn run(interval: Duration, heartbeat: Heartbeat, stop: Arc<AtomicBool>, stalls: Arc<AtomicU64>) {
    let started = Instant::now();
    let mut snapshot = heartbeat.last();
    let mut stalled_for = Duration::ZERO;
    loop {
        thread::park_timeout(interval);
        if stop.load(Ordering::Relaxed) {
            debug!("watchdog disarmed");
            return;
        }
        let current = heartbeat.last();
        if current == snapshot {
            stalled_for += interval;
            stalls.fetch_add(1, Ordering::Relaxed);
            warn!(
                last_seq = ?snapshot,
                stalled_secs = stalled_for.as_secs(),
                uptime_secs = started.elapsed().as_secs(),
                "worker appears hung: no workload delivered"
            );
        } else {
            stalled_for = Duration::ZERO;
            snapshot = current;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heartbeat_tracks_last_seq() {
        let hb = Heartbeat::new();
        assert_eq!(hb.last(), None);
        hb.beat(0);
        assert_eq!(hb.last(), Some(0));
        hb.beat(41);
        assert_eq!(hb.last(), Some(41));
    }

    #[test]
    fn disarm_stops_the_thread() {
        let mut dog = Watchdog::arm(Duration::from_secs(3600), Heartbeat::new());
        dog.disarm();
        dog.disarm(); // idempotent
    }

    #[test]
    fn frozen_heartbeat_counts_stalls() {
        let hb = Heartbeat::new();
        hb.beat(0);
        let dog = Watchdog::arm(Duration::from_millis(20), hb);
        thread::sleep(Duration::from_millis(300));
        assert!(dog.stalls() > 0);
    }
}
