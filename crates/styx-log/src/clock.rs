//! Time sources for segment timestamps and age-based limits.
//!
//! Ages only need second resolution, so besides the plain [`SystemClock`]
//! there is a [`CoarseClock`] refreshed once per second by a background
//! task, and a [`ManualClock`] for tests.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Source of Unix time in whole seconds.
pub trait Clock: Send + Sync {
    fn now_unix(&self) -> i64;
}

fn system_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// Reads the system clock on every call.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_unix(&self) -> i64 {
        system_now()
    }
}

/// System time cached in an atomic and refreshed once per second.
#[derive(Debug)]
pub struct CoarseClock {
    now: AtomicI64,
}

impl CoarseClock {
    /// Start a clock and its refresh task. The task stops once the last
    /// `Arc` is dropped.
    pub fn start() -> Arc<Self> {
        let clock = Arc::new(Self {
            now: AtomicI64::new(system_now()),
        });
        let weak: Weak<Self> = Arc::downgrade(&clock);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(1));
            loop {
                ticker.tick().await;
                match weak.upgrade() {
                    Some(clock) => clock.now.store(system_now(), Ordering::Relaxed),
                    None => return,
                }
            }
        });
        clock
    }
}

impl Clock for CoarseClock {
    fn now_unix(&self) -> i64 {
        self.now.load(Ordering::Relaxed)
    }
}

/// Clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicI64,
}

impl ManualClock {
    pub fn new(now: i64) -> Arc<Self> {
        Arc::new(Self {
            now: AtomicI64::new(now),
        })
    }

    pub fn set(&self, now: i64) {
        self.now.store(now, Ordering::SeqCst);
    }

    pub fn advance(&self, secs: i64) {
        self.now.fetch_add(secs, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_unix(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}
