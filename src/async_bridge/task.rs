//! Pool-driven tasks.
//!
//! A [`RawTask`] owns one boxed future and polls it on pool workers. It is
//! never polled inline by whoever wakes it: a wake-up submits a job to the
//! execution context, so every resume runs on a thread the context owns.
//!
//! A pinned task goes further: the worker that runs its first poll becomes
//! its home, every later poll is queued on that worker alone, and an
//! unfinished future is only ever dropped there. Coroutine stacks, which may
//! hold thread-bound values across a suspension, run as pinned tasks.

use super::waker::task_waker;
use super::BoxFuture;
use crate::context::Handle;
use crate::error::Result;
use crate::executor::WorkerId;
use parking_lot::Mutex;
use std::cell::RefCell;
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};

static NEXT_TASK_ID: AtomicU64 = AtomicU64::new(1);

const NO_HOME: usize = usize::MAX;

thread_local! {
    /// Pinned tasks whose home is the current worker.
    static PINNED: RefCell<Vec<Weak<RawTask>>> = const { RefCell::new(Vec::new()) };
}

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    /// A job that will poll the task is queued on the pool.
    Scheduled = 0,
    /// A worker is polling the task.
    Running = 1,
    /// Parked; waiting for its waker.
    Idle = 2,
    /// Woken while running; poll again once the current poll returns.
    Notified = 3,
    Complete = 4,
}

impl TaskState {
    pub(super) fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Scheduled,
            1 => Self::Running,
            2 => Self::Idle,
            3 => Self::Notified,
            _ => Self::Complete,
        }
    }
}

pub(crate) struct RawTask {
    id: u64,
    pub(super) state: AtomicU8,
    future: Mutex<Option<BoxFuture<'static, ()>>>,
    handle: Handle,
    pinned: bool,
    /// Worker id of a pinned task once it first ran, `NO_HOME` before.
    home: AtomicUsize,
}

impl RawTask {
    /// Queue `future` for its first poll.
    ///
    /// On a stopped context the task is dropped unpolled and
    /// `Error::ContextStopped` is returned.
    pub(crate) fn spawn(handle: Handle, future: BoxFuture<'static, ()>) -> Result<()> {
        Self::submit(handle, future, false)
    }

    /// Like [`spawn`](Self::spawn), but the task stays on the worker that
    /// polls it first.
    pub(crate) fn spawn_pinned(handle: Handle, future: BoxFuture<'static, ()>) -> Result<()> {
        Self::submit(handle, future, true)
    }

    fn submit(handle: Handle, future: BoxFuture<'static, ()>, pinned: bool) -> Result<()> {
        let task = Arc::new(Self {
            id: NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed),
            state: AtomicU8::new(TaskState::Scheduled as u8),
            future: Mutex::new(Some(future)),
            handle,
            pinned,
            home: AtomicUsize::new(NO_HOME),
        });
        task.schedule()
    }

    pub(crate) fn state(&self) -> TaskState {
        TaskState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub(crate) fn home(&self) -> Option<WorkerId> {
        match self.home.load(Ordering::Acquire) {
            NO_HOME => None,
            worker => Some(worker),
        }
    }

    /// Submit a job that polls this task. The caller must have moved the
    /// state to `Scheduled`.
    pub(super) fn schedule(self: Arc<Self>) -> Result<()> {
        let handle = self.handle.clone();
        let id = self.id;
        let submitted = match self.home() {
            Some(worker) => handle.execute_on(worker, move || self.run()),
            None => handle.execute(move || self.run()),
        };
        submitted.map_err(|err| {
            tracing::debug!(task = id, "context stopped, dropping task wake-up");
            err
        })
    }

    fn settle_home(self: &Arc<Self>) {
        let Some(worker) = self.handle.current_worker() else {
            return;
        };
        self.home.store(worker, Ordering::Release);
        PINNED.with(|tasks| {
            let mut tasks = tasks.borrow_mut();
            if tasks.len() == tasks.capacity() {
                tasks.retain(|task| task.strong_count() > 0);
            }
            tasks.push(Arc::downgrade(self));
        });
        tracing::trace!(task = self.id, worker, "task pinned");
    }

    fn run(self: Arc<Self>) {
        if self
            .state
            .compare_exchange(
                TaskState::Scheduled as u8,
                TaskState::Running as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_err()
        {
            return;
        }

        if self.pinned && self.home().is_none() {
            self.settle_home();
        }

        let waker = task_waker(self.clone());
        let mut cx = Context::from_waker(&waker);

        let mut slot = self.future.lock();
        let ready = match slot.as_mut() {
            Some(fut) => matches!(fut.as_mut().poll(&mut cx), Poll::Ready(())),
            None => true,
        };

        if ready {
            let finished = slot.take();
            drop(slot);
            self.state.store(TaskState::Complete as u8, Ordering::Release);
            // Destructors may settle promises and wake other tasks.
            drop(finished);
            return;
        }
        drop(slot);

        // A wake that arrived during the poll turned Running into Notified.
        if self
            .state
            .compare_exchange(
                TaskState::Running as u8,
                TaskState::Idle as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_err()
        {
            self.state.store(TaskState::Scheduled as u8, Ordering::Release);
            let _ = self.schedule();
        }
    }
}

impl Drop for RawTask {
    fn drop(&mut self) {
        let Some(future) = self.future.get_mut().take() else {
            return;
        };
        let home = *self.home.get_mut();
        if home == NO_HOME || self.handle.current_worker() == Some(home) {
            drop(future);
            return;
        }

        // An unfinished pinned future is dropped on its home worker, or not at all.
        if let Err((_, job)) = self.handle.try_execute_on(home, move || drop(future)) {
            tracing::warn!(task = self.id, worker = home, "home worker gone, leaking unfinished task");
            std::mem::forget(job);
        }
    }
}

/// Drop the futures of every live task pinned to the calling worker.
///
/// Run by a worker as it exits, once nothing can poll those tasks again.
/// Returns how many unfinished futures were dropped.
pub(crate) fn release_pinned_tasks() -> usize {
    let tasks = PINNED.with(|tasks| std::mem::take(&mut *tasks.borrow_mut()));

    let mut released = 0;
    for task in tasks.iter().filter_map(Weak::upgrade) {
        let future = task.future.lock().take();
        task.state.store(TaskState::Complete as u8, Ordering::Release);
        if let Some(future) = future {
            drop(future);
            released += 1;
        }
    }
    released
}

impl fmt::Debug for RawTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawTask")
            .field("id", &self.id)
            .field("state", &self.state())
            .field("home", &self.home())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::completion::promise;
    use crate::context::ExecutionContext;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_task_completes_on_pool() {
        let ctx = ExecutionContext::with_threads(2).unwrap();
        let (done_tx, done) = promise::<bool>();

        RawTask::spawn(
            ctx.handle(),
            Box::pin(async move {
                done_tx
                    .set_value(crate::executor::on_worker_thread())
                    .unwrap();
            }),
        )
        .unwrap();

        assert!(done.wait().unwrap());
    }

    #[test]
    fn test_task_resumes_after_foreign_wake() {
        let ctx = ExecutionContext::with_threads(1).unwrap();
        let (input_tx, input) = promise::<u32>();
        let (output_tx, output) = promise::<u32>();
        let entered = Arc::new(AtomicUsize::new(0));

        let counter = entered.clone();
        RawTask::spawn(
            ctx.handle(),
            Box::pin(async move {
                counter.fetch_add(1, Ordering::SeqCst);
                let n = input.await.unwrap();
                output_tx.set_value(n + 1).unwrap();
            }),
        )
        .unwrap();

        std::thread::sleep(Duration::from_millis(20));
        input_tx.set_value(41).unwrap();

        assert_eq!(output.wait().unwrap(), 42);
        assert_eq!(entered.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_spawn_on_stopped_context_fails() {
        let ctx = ExecutionContext::with_threads(1).unwrap();
        ctx.shutdown();

        let (tx, rx) = promise::<()>();
        let result = RawTask::spawn(
            ctx.handle(),
            Box::pin(async move {
                let _ = tx.set_value(());
            }),
        );

        assert!(result.is_err());
        assert!(rx.wait().unwrap_err().is_broken_promise());
    }

    #[test]
    fn test_pinned_task_polls_on_one_worker() {
        let ctx = ExecutionContext::with_threads(4).unwrap();
        let handle = ctx.handle();
        let (pairs_tx, pairs): (Vec<_>, Vec<_>) = (0..20).map(|_| promise::<()>()).unzip();
        let (seen_tx, seen) = promise::<Vec<Option<WorkerId>>>();

        let inner = handle.clone();
        RawTask::spawn_pinned(
            handle,
            Box::pin(async move {
                let mut seen = vec![inner.current_worker()];
                for fut in pairs {
                    fut.await.unwrap();
                    seen.push(inner.current_worker());
                }
                seen_tx.set_value(seen).unwrap();
            }),
        )
        .unwrap();

        for tx in pairs_tx {
            thread::sleep(Duration::from_millis(1));
            tx.set_value(()).unwrap();
        }

        let seen = seen.wait().unwrap();
        assert_eq!(seen.len(), 21);
        assert!(seen[0].is_some());
        assert!(seen.iter().all(|w| *w == seen[0]));
    }

    #[test]
    fn test_shutdown_drops_parked_pinned_task_on_its_worker() {
        struct ReportDrop(crossbeam_channel::Sender<bool>);
        impl Drop for ReportDrop {
            fn drop(&mut self) {
                let _ = self.0.send(crate::executor::on_worker_thread());
            }
        }

        let ctx = ExecutionContext::with_threads(2).unwrap();
        let (started_tx, started) = promise::<()>();
        let (_never_tx, never) = promise::<()>();
        let (drop_tx, drop_rx) = crossbeam_channel::bounded(1);

        let guard = ReportDrop(drop_tx);
        RawTask::spawn_pinned(
            ctx.handle(),
            Box::pin(async move {
                let _guard = guard;
                started_tx.set_value(()).unwrap();
                let _ = never.await;
            }),
        )
        .unwrap();

        started.wait().unwrap();
        thread::sleep(Duration::from_millis(20));
        ctx.shutdown();

        assert_eq!(drop_rx.try_recv(), Ok(true));
    }
}
