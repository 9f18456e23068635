use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

pub trait Clock: Send + Sync {
    fn now(&self) -> i64;
    fn is_simulated(&self) -> bool;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct WallClock;

impl Clock for WallClock {
    fn now(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|duration| duration.as_secs() as i64)
            .unwrap_or(0)
    }

    fn is_simulated(&self) -> bool {
        false
    }
}

#[derive(Clone)]
pub struct VirtualClock {
    now: Arc<AtomicI64>,
    simulated: bool,
}

impl VirtualClock {
    pub fn new(start: i64, simulated: bool) -> Self {
        Self {
            now: Arc::new(AtomicI64::new(start)),
            simulated,
        }
    }

    pub fn set_now(&self, time: i64) {
        self.now.store(time, Ordering::SeqCst);
    }

    pub fn advance(&self, secs: i64) {
        self.now.fetch_add(secs, Ordering::SeqCst);
    }
}

impl Clock for VirtualClock {
    fn now(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }

    fn is_simulated(&self) -> bool {
        self.simulated
    }
}
