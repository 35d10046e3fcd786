use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

use crate::core::Clock;

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> u64 {
        SystemTime::now().duration_since(UNIX_EPOCH).map_or(0, |duration| duration.as_secs())
    }
}

/// Settable clock for tests and simulations.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Arc<AtomicU64>,
}

impl ManualClock {
    pub fn at(now: u64) -> Self { Self { now: Arc::new(AtomicU64::new(now)) } }

    pub fn set(&self, now: u64) { self.now.store(now, Ordering::SeqCst); }

    pub fn advance(&self, secs: u64) { self.now.fetch_add(secs, Ordering::SeqCst); }
}

impl Clock for ManualClock {
    fn now(&self) -> u64 { self.now.load(Ordering::SeqCst) }
}
