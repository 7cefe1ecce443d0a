//! A one-shot steady-clock timer with a completion-callback interface.
//!
//! Each wait sleeps on its own thread and posts the completion onto the
//! execution context: `ErrorCode::SUCCESS` when the deadline passes,
//! `ErrorCode::OPERATION_ABORTED` when the wait is cancelled, the timer is
//! re-armed, or the timer is dropped.

use crate::completion::{Completion, ErrorCode};
use crate::context::Handle;
use crossbeam_channel::{bounded, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Sleeper threads only block on a channel.
const SLEEPER_STACK_SIZE: usize = 128 * 1024;

struct PendingWait {
    /// Set by whichever side decides the wait's outcome first.
    claimed: Arc<AtomicBool>,
    cancel: Sender<()>,
}

pub struct SteadyTimer {
    handle: Handle,
    deadline: Instant,
    pending: Mutex<Vec<PendingWait>>,
    sleeper_stack_size: usize,
}

impl SteadyTimer {
    /// A timer whose deadline is now.
    pub fn new(handle: &Handle) -> Self {
        Self {
            handle: handle.clone(),
            deadline: Instant::now(),
            pending: Mutex::new(Vec::new()),
            sleeper_stack_size: SLEEPER_STACK_SIZE,
        }
    }

    pub fn expiry(&self) -> Instant {
        self.deadline
    }

    /// Set the deadline relative to now, aborting outstanding waits.
    /// Returns how many were aborted.
    pub fn expires_after(&mut self, duration: Duration) -> usize {
        self.expires_at(Instant::now() + duration)
    }

    pub fn expires_at(&mut self, deadline: Instant) -> usize {
        let aborted = self.cancel();
        self.deadline = deadline;
        aborted
    }

    /// Start a wait. `handler` is invoked exactly once, on the execution
    /// context.
    pub fn async_wait<H>(&self, handler: H)
    where
        H: Completion<()>,
    {
        let claimed = Arc::new(AtomicBool::new(false));
        let (cancel_tx, cancel_rx) = bounded::<()>(1);

        {
            let mut pending = self.pending.lock();
            pending.retain(|w| !w.claimed.load(Ordering::Acquire));
            pending.push(PendingWait {
                claimed: claimed.clone(),
                cancel: cancel_tx,
            });
        }

        let deadline = self.deadline;
        let handle = self.handle.clone();
        let sleeper_claim = claimed.clone();
        let spawned = thread::Builder::new()
            .name("steady-timer".to_string())
            .stack_size(self.sleeper_stack_size)
            .spawn(move || {
                let claimed = sleeper_claim;
                let timeout = deadline.saturating_duration_since(Instant::now());
                let ec = match cancel_rx.recv_timeout(timeout) {
                    Err(RecvTimeoutError::Timeout) if !claimed.swap(true, Ordering::AcqRel) => {
                        ErrorCode::SUCCESS
                    }
                    _ => ErrorCode::OPERATION_ABORTED,
                };

                if handle.execute(move || handler.complete(ec, ())).is_err() {
                    tracing::debug!("context stopped before timer completion was delivered");
                }
            });

        if let Err(err) = spawned {
            // The handler was dropped with the closure; nothing is left to abort.
            claimed.store(true, Ordering::Release);
            tracing::warn!(error = %err, "failed to start timer thread");
        }
    }

    /// Abort every outstanding wait. Returns how many were aborted.
    pub fn cancel(&self) -> usize {
        let waits = std::mem::take(&mut *self.pending.lock());

        let mut aborted = 0;
        for wait in waits {
            if !wait.claimed.swap(true, Ordering::AcqRel) {
                aborted += 1;
                let _ = wait.cancel.send(());
            }
        }

        if aborted > 0 {
            tracing::trace!(aborted, "timer waits cancelled");
        }
        aborted
    }
}

impl Drop for SteadyTimer {
    fn drop(&mut self) {
        self.cancel();
    }
}

impl fmt::Debug for SteadyTimer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SteadyTimer")
            .field("deadline", &self.deadline)
            .field("pending", &self.pending.lock().len())
            .finish()
    }
}
