#![allow(dead_code)]
use ktime::time::{Clock, Expiry, Instant, TimerId};
use maitake_sync::blocking::Mutex;
use std::{
    collections::HashMap,
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};

pub fn trace_init() {
    use tracing_subscriber::filter::LevelFilter;
    let _ = tracing_subscriber::fmt()
        .with_max_level(LevelFilter::TRACE)
        .with_test_writer()
        .try_init();
}

pub fn ms(ms: u64) -> Duration {
    Duration::from_millis(ms)
}

/// A [`Clock`] whose time is set by hand, and which only fires timers when
/// explicitly told to. This allows expirations to become due without being
/// delivered.
pub struct StalledClock {
    now: AtomicU64,
    armed: Mutex<HashMap<TimerId, (Instant, Expiry)>>,
}

impl StalledClock {
    pub fn new() -> Self {
        Self {
            now: AtomicU64::new(0),
            armed: Mutex::new(HashMap::new()),
        }
    }

    pub fn set(&self, t: Duration) {
        let nanos = u64::try_from(t.as_nanos()).unwrap();
        self.now.store(nanos, Ordering::SeqCst);
    }

    pub fn armed(&self) -> usize {
        self.armed.with_lock(|armed| armed.len())
    }

    /// Fires every registration that is due, and returns how many of them
    /// notified their timer's listener.
    pub fn fire_due(&self) -> usize {
        let now = self.now();
        let due = self.armed.with_lock(|armed| {
            let ids = armed
                .iter()
                .filter(|(_, (deadline, _))| *deadline <= now)
                .map(|(id, _)| *id)
                .collect::<Vec<_>>();
            ids.into_iter()
                .filter_map(|id| armed.remove(&id))
                .collect::<Vec<_>>()
        });
        due.into_iter()
            .map(|(_, expiry)| expiry.fire())
            .filter(|&notified| notified)
            .count()
    }
}

impl Clock for StalledClock {
    fn now(&self) -> Instant {
        Instant::from_nanos(self.now.load(Ordering::SeqCst))
    }

    fn arm(&self, deadline: Instant, expiry: Expiry) {
        self.armed
            .with_lock(|armed| armed.insert(expiry.id(), (deadline, expiry)));
    }

    fn disarm(&self, timer: TimerId) {
        self.armed.with_lock(|armed| armed.remove(&timer));
    }
}
