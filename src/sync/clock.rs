//! Logical write clock

use std::sync::atomic::{AtomicU64, Ordering};

/// Wall-clock millis, forced strictly increasing for this writer.
///
/// Every stamp is greater than both the previous stamp and the wall clock's
/// last reading, so a backwards clock step never produces an older write.
#[derive(Debug, Default)]
pub struct LogicalClock {
    last: AtomicU64,
}

impl LogicalClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Next stamp, strictly greater than `floor` and every earlier stamp.
    pub fn tick_after(&self, floor: u64) -> u64 {
        let now = now_millis();
        let mut current = self.last.load(Ordering::Relaxed);
        loop {
            let next = now.max(current + 1).max(floor + 1);
            match self
                .last
                .compare_exchange_weak(current, next, Ordering::AcqRel, Ordering::Relaxed)
            {
                Ok(_) => return next,
                Err(observed) => current = observed,
            }
        }
    }

    pub fn tick(&self) -> u64 {
        self.tick_after(0)
    }
}

pub fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
