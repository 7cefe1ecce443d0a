//! Exponential backoff for idle pool workers.

use std::cell::Cell;
use std::hint::spin_loop;
use std::thread;

/// Spin, then yield, then report completion so the caller can park.
#[derive(Debug, Default)]
pub struct Backoff {
    step: Cell<u32>,
}

impl Backoff {
    const SPIN_LIMIT: u32 = 6;
    const YIELD_LIMIT: u32 = 10;

    pub fn new() -> Self {
        Self { step: Cell::new(0) }
    }

    pub fn reset(&self) {
        self.step.set(0);
    }

    /// Perform one step of backoff
    pub fn spin(&self) {
        let step = self.step.get();

        if step <= Self::SPIN_LIMIT {
            for _ in 0..(1u32 << step) {
                spin_loop();
            }
        } else {
            thread::yield_now();
        }

        if step <= Self::YIELD_LIMIT {
            self.step.set(step + 1);
        }
    }

    /// True once spinning and yielding are exhausted; time to park.
    pub fn is_completed(&self) -> bool {
        self.step.get() > Self::YIELD_LIMIT
    }
}
