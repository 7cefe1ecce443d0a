// worker thread stuff
use super::cpu_pool::PoolShared;
use super::task::Task;
use crate::util::Backoff;
use crossbeam_deque::{Steal, Worker as WorkerQueue};
use std::cell::Cell;
use std::sync::atomic::Ordering;
use std::thread;
use std::time::Duration;

pub type WorkerId = usize;

thread_local! {
    /// (pool id, worker id) of the pool this thread works for.
    static ON_WORKER: Cell<Option<(usize, WorkerId)>> = const { Cell::new(None) };
}

/// Whether the calling thread is a pool worker.
///
/// Blocking a worker (for example with `CompletionFuture::wait`) starves
/// every coroutine scheduled behind it.
pub fn on_worker_thread() -> bool {
    ON_WORKER.with(|w| w.get()).is_some()
}

/// The id of the calling worker within pool `pool_id`, if it is one.
pub(crate) fn current_worker(pool_id: usize) -> Option<WorkerId> {
    match ON_WORKER.with(|w| w.get()) {
        Some((pool, worker)) if pool == pool_id => Some(worker),
        _ => None,
    }
}

pub(crate) struct Worker {
    pub id: WorkerId,
    pub local_queue: WorkerQueue<Task>,
    tick: Cell<u32>,
}

impl Worker {
    pub fn new(id: WorkerId) -> Self {
        Self {
            id,
            local_queue: WorkerQueue::new_fifo(),
            tick: Cell::new(0),
        }
    }

    // main loop
    pub fn run(&self, shared: &PoolShared) {
        ON_WORKER.with(|w| w.set(Some((shared.id, self.id))));
        tracing::trace!(worker = self.id, "worker started");

        let backoff = Backoff::new();

        loop {
            if shared.shutdown.load(Ordering::Acquire) {
                break;
            }

            if let Some(task) = self.find_task(shared) {
                backoff.reset();
                self.execute_task(task, shared);
                shared.pending_tasks.fetch_sub(1, Ordering::Relaxed);
            } else if backoff.is_completed() {
                // submitters unpark us; the timeout covers a missed unpark
                thread::park_timeout(Duration::from_millis(1));
            } else {
                backoff.spin();
            }
        }

        // Whatever is still queued here is abandoned, not run.
        let mut abandoned = shared.drain_pinned(self.id);
        while let Some(task) = self.local_queue.pop() {
            drop(task);
            abandoned += 1;
            shared.pending_tasks.fetch_sub(1, Ordering::Relaxed);
        }
        if abandoned > 0 {
            tracing::debug!(worker = self.id, abandoned, "dropped queued jobs on shutdown");
        }

        // Stacks pinned to this thread can only be unwound from it.
        let released = crate::async_bridge::task::release_pinned_tasks();
        if released > 0 {
            tracing::debug!(worker = self.id, released, "unwound parked coroutines on shutdown");
        }

        tracing::trace!(worker = self.id, "worker stopped");
    }

    fn find_task(&self, shared: &PoolShared) -> Option<Task> {
        // Pinned and shared work take turns going first.
        let tick = self.tick.get().wrapping_add(1);
        self.tick.set(tick);

        if tick % 2 == 0 {
            self.pop_pinned(shared)
                .or_else(|| self.find_shared_task(shared))
        } else {
            self.find_shared_task(shared)
                .or_else(|| self.pop_pinned(shared))
        }
    }

    /// Jobs only this worker may run; nobody steals these.
    fn pop_pinned(&self, shared: &PoolShared) -> Option<Task> {
        loop {
            match shared.pinned[self.id].steal() {
                Steal::Success(task) => return Some(task),
                Steal::Empty => return None,
                Steal::Retry => continue,
            }
        }
    }

    // local -> global -> steal
    fn find_shared_task(&self, shared: &PoolShared) -> Option<Task> {
        // 1. Local queue first (best cache locality)
        if let Some(task) = self.local_queue.pop() {
            return Some(task);
        }

        // 2. Global injector
        loop {
            match shared.injector.steal_batch_and_pop(&self.local_queue) {
                Steal::Success(task) => return Some(task),
                Steal::Empty => break,
                Steal::Retry => continue,
            }
        }

        // 3. Steal from other workers
        self.try_steal_from_workers(shared)
    }

    fn try_steal_from_workers(&self, shared: &PoolShared) -> Option<Task> {
        use rand::seq::SliceRandom;
        use rand::thread_rng;

        let stealers = &shared.stealers;
        if stealers.len() < 2 {
            return None;
        }

        let mut indices: Vec<usize> = (0..stealers.len()).collect();
        indices.shuffle(&mut thread_rng());

        for &idx in &indices {
            if idx == self.id {
                continue;
            }

            loop {
                match stealers[idx].steal_batch_and_pop(&self.local_queue) {
                    Steal::Success(task) => {
                        shared.metrics.record_task_stolen();
                        return Some(task);
                    }
                    Steal::Empty => break,
                    Steal::Retry => continue,
                }
            }
        }

        None
    }

    fn execute_task(&self, task: Task, shared: &PoolShared) {
        let tid = task.id;
        let spawn_time = task.spawn_time;

        match shared.panic_handler.execute(move || task.execute()) {
            Ok(()) => {
                shared
                    .metrics
                    .record_task_execution(spawn_time.elapsed().as_nanos() as u64);
            }
            Err(info) => {
                tracing::warn!(task = ?tid, worker = self.id, message = %info.message, "job panicked");
                shared.metrics.record_task_panic();
            }
        }
    }
}
