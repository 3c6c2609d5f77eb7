//! Per-provider sliding window (C5).
//!
//! Tracks request timestamps over the trailing `window_size` and exposes both
//! execution paths named in the design: an atomic check-and-add (§4.4 path 1,
//! safe under concurrent callers because cleanup/count/append happen under one
//! lock acquisition) and a split check/add pair (§4.4 path 2) that reproduces
//! the documented TOCTOU race between the two lock acquisitions. The atomic
//! path is what [`super::combined::CombinedLimiter`] uses; the split path exists
//! so the race is visible and testable rather than merely asserted in prose.

use std::collections::VecDeque;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

pub struct SlidingWindow {
    window_size: Duration,
    timestamps: Mutex<VecDeque<Instant>>,
}

impl SlidingWindow {
    pub fn new(window_size: Duration) -> Self {
        Self {
            window_size,
            timestamps: Mutex::new(VecDeque::new()),
        }
    }

    fn purge(timestamps: &mut VecDeque<Instant>, window_size: Duration, now: Instant) {
        while let Some(&front) = timestamps.front() {
            if now.duration_since(front) > window_size {
                timestamps.pop_front();
            } else {
                break;
            }
        }
    }

    /// Atomic path: cleanup, count, and conditional append all happen while
    /// holding the lock, eliminating the TOCTOU window between check and add.
    pub async fn try_acquire_atomic(&self, rpm: u32) -> bool {
        let now = Instant::now();
        let mut timestamps = self.timestamps.lock().await;
        Self::purge(&mut timestamps, self.window_size, now);
        if (timestamps.len() as u32) < rpm {
            timestamps.push_back(now);
            true
        } else {
            false
        }
    }

    /// Fallback path: `check` and `add` are separate lock acquisitions. Two
    /// concurrent callers can both observe `count < rpm` before either appends,
    /// over-admitting by the number of racing callers. Documented, not fixed,
    /// per §4.4 — single-process callers should prefer `try_acquire_atomic`.
    pub async fn check_limit(&self, rpm: u32) -> bool {
        let now = Instant::now();
        let mut timestamps = self.timestamps.lock().await;
        Self::purge(&mut timestamps, self.window_size, now);
        (timestamps.len() as u32) < rpm
    }

    pub async fn add(&self) {
        let now = Instant::now();
        let mut timestamps = self.timestamps.lock().await;
        Self::purge(&mut timestamps, self.window_size, now);
        timestamps.push_back(now);
    }

    pub async fn count(&self) -> u32 {
        let now = Instant::now();
        let mut timestamps = self.timestamps.lock().await;
        Self::purge(&mut timestamps, self.window_size, now);
        timestamps.len() as u32
    }
}
