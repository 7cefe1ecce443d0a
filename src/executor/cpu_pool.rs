use super::panic_handler::PanicHandler;
use super::task::Task;
use super::worker::{current_worker, on_worker_thread, Worker, WorkerId};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::telemetry::Metrics;
use crossbeam_deque::{Injector, Steal, Stealer};
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

static NEXT_POOL_ID: AtomicUsize = AtomicUsize::new(1);

/// State shared by the workers and every [`PoolHandle`].
pub(crate) struct PoolShared {
    pub(crate) id: usize,
    pub(crate) injector: Injector<Task>,
    /// One queue per worker, popped only by that worker.
    pub(crate) pinned: Vec<Injector<Task>>,
    pub(crate) stealers: Vec<Stealer<Task>>,
    /// Guards the push side of every queue; flipped to false exactly once.
    accepting: RwLock<bool>,
    pub(crate) shutdown: AtomicBool,
    pub(crate) pending_tasks: AtomicUsize,
    unparkers: RwLock<Vec<thread::Thread>>,
    next_unpark: AtomicUsize,
    pub(crate) panic_handler: PanicHandler,
    pub(crate) metrics: Arc<Metrics>,
    num_threads: usize,
}

impl PoolShared {
    fn unpark_one(&self) {
        let unparkers = self.unparkers.read();
        if unparkers.is_empty() {
            return;
        }
        let idx = self.next_unpark.fetch_add(1, Ordering::Relaxed) % unparkers.len();
        unparkers[idx].unpark();
    }

    fn unpark_worker(&self, worker: WorkerId) {
        if let Some(thread) = self.unparkers.read().get(worker) {
            thread.unpark();
        }
    }

    fn unpark_all(&self) {
        for thread in self.unparkers.read().iter() {
            thread.unpark();
        }
    }

    /// Drops everything left in the global queue.
    fn drain_injector(&self) -> usize {
        self.drain(&self.injector)
    }

    /// Drops everything left in `worker`'s pinned queue.
    pub(crate) fn drain_pinned(&self, worker: WorkerId) -> usize {
        self.pinned.get(worker).map_or(0, |queue| self.drain(queue))
    }

    fn drain(&self, queue: &Injector<Task>) -> usize {
        let mut drained = 0;
        loop {
            match queue.steal() {
                Steal::Success(task) => {
                    drop(task);
                    drained += 1;
                }
                Steal::Empty => break,
                Steal::Retry => continue,
            }
        }
        if drained > 0 {
            self.pending_tasks.fetch_sub(drained, Ordering::Relaxed);
        }
        drained
    }

    /// Push `f` to `target`'s pinned queue, or to the global queue when
    /// `target` is `None`. Hands `f` back if the pool no longer accepts work.
    fn submit<F>(&self, target: Option<WorkerId>, f: F) -> std::result::Result<(), F>
    where
        F: FnOnce() + Send + 'static,
    {
        {
            let accepting = self.accepting.read();
            if !*accepting {
                return Err(f);
            }
            self.pending_tasks.fetch_add(1, Ordering::Relaxed);
            match target {
                Some(worker) => self.pinned[worker].push(Task::new(f)),
                None => self.injector.push(Task::new(f)),
            }
        }

        match target {
            Some(worker) => self.unpark_worker(worker),
            None => self.unpark_one(),
        }
        Ok(())
    }
}

/// Cloneable submission side of a [`CpuPool`].
#[derive(Clone)]
pub struct PoolHandle {
    shared: Arc<PoolShared>,
}

impl PoolHandle {
    /// Queue `f` to run on a worker thread.
    ///
    /// Fails with [`Error::ContextStopped`] once the pool has shut down; the
    /// closure is then dropped without running.
    pub fn execute<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        // Dropped outside the lock: a job's destructor may submit again.
        self.shared.submit(None, f).map_err(|_| Error::ContextStopped)
    }

    /// Queue `f` to run on worker `worker` and no other thread.
    ///
    /// Fails with [`Error::Executor`] for an id the pool does not have, and
    /// with [`Error::ContextStopped`] once the pool has shut down.
    pub fn execute_on<F>(&self, worker: WorkerId, f: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.try_execute_on(worker, f).map_err(|(err, _)| err)
    }

    /// Like [`execute_on`](Self::execute_on), but a rejected closure is
    /// handed back instead of dropped.
    pub(crate) fn try_execute_on<F>(&self, worker: WorkerId, f: F) -> std::result::Result<(), (Error, F)>
    where
        F: FnOnce() + Send + 'static,
    {
        if worker >= self.shared.pinned.len() {
            return Err((Error::executor(format!("no worker {}", worker)), f));
        }
        self.shared
            .submit(Some(worker), f)
            .map_err(|f| (Error::ContextStopped, f))
    }

    /// The calling thread's worker id, if it is one of this pool's workers.
    pub fn current_worker(&self) -> Option<WorkerId> {
        current_worker(self.shared.id)
    }

    pub fn is_stopped(&self) -> bool {
        self.shared.shutdown.load(Ordering::Acquire)
    }

    pub fn pending_tasks(&self) -> usize {
        self.shared.pending_tasks.load(Ordering::Relaxed)
    }

    pub fn num_threads(&self) -> usize {
        self.shared.num_threads
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.shared.metrics
    }
}

impl std::fmt::Debug for PoolHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolHandle")
            .field("num_threads", &self.shared.num_threads)
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

pub struct CpuPool {
    shared: Arc<PoolShared>,
    workers: Mutex<Vec<WorkerHandle>>,
}

struct WorkerHandle {
    id: WorkerId,
    thread: JoinHandle<()>,
}

impl CpuPool {
    pub fn new(config: &Config) -> Result<Self> {
        let num_threads = config.worker_threads();
        if num_threads == 0 {
            return Err(Error::config("need at least 1 thread"));
        }

        let workers: Vec<Worker> = (0..num_threads).map(Worker::new).collect();
        let stealers = workers.iter().map(|w| w.local_queue.stealer()).collect();

        let shared = Arc::new(PoolShared {
            id: NEXT_POOL_ID.fetch_add(1, Ordering::Relaxed),
            injector: Injector::new(),
            pinned: (0..num_threads).map(|_| Injector::new()).collect(),
            stealers,
            accepting: RwLock::new(true),
            shutdown: AtomicBool::new(false),
            pending_tasks: AtomicUsize::new(0),
            unparkers: RwLock::new(Vec::with_capacity(num_threads)),
            next_unpark: AtomicUsize::new(0),
            panic_handler: PanicHandler::new(config.panic_strategy),
            metrics: Arc::new(Metrics::new()),
            num_threads,
        });

        let pool = CpuPool {
            shared: shared.clone(),
            workers: Mutex::new(Vec::with_capacity(num_threads)),
        };

        for worker in workers {
            let id = worker.id;
            let shared_clone = shared.clone();
            let name = format!("{}-{}", config.thread_name_prefix, id);

            let mut builder = thread::Builder::new().name(name);

            if let Some(stack_size) = config.stack_size {
                builder = builder.stack_size(stack_size);
            }

            // On failure `pool` drops here and stops the workers already running.
            let thread = builder
                .spawn(move || worker.run(&shared_clone))
                .map_err(|e| Error::executor(format!("spawn failed: {}", e)))?;

            shared.unparkers.write().push(thread.thread().clone());
            pool.workers.lock().push(WorkerHandle { id, thread });
        }

        tracing::debug!(num_threads, prefix = %config.thread_name_prefix, "worker pool started");

        Ok(pool)
    }

    pub fn handle(&self) -> PoolHandle {
        PoolHandle {
            shared: self.shared.clone(),
        }
    }

    pub fn execute<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.handle().execute(f)
    }

    pub fn num_threads(&self) -> usize {
        self.shared.num_threads
    }

    pub fn pending_tasks(&self) -> usize {
        self.shared.pending_tasks.load(Ordering::Relaxed)
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.shared.metrics
    }

    pub fn is_stopped(&self) -> bool {
        self.shared.shutdown.load(Ordering::Acquire)
    }

    /// Stop accepting work, join the workers and drop every queued job.
    ///
    /// Idempotent. When called from one of this pool's own workers, that
    /// worker is not joined; it exits once the current job returns.
    pub fn shutdown(&self) {
        {
            let mut accepting = self.shared.accepting.write();
            if !*accepting && self.workers.lock().is_empty() {
                return;
            }
            *accepting = false;
        }

        self.shared.shutdown.store(true, Ordering::Release);
        self.shared.unpark_all();

        let workers: Vec<WorkerHandle> = self.workers.lock().drain(..).collect();
        let current = thread::current().id();
        for worker in workers {
            if worker.thread.thread().id() == current {
                tracing::warn!(worker = worker.id, "pool shut down from its own worker; not joining it");
                continue;
            }
            if worker.thread.join().is_err() {
                tracing::error!(worker = worker.id, "worker thread panicked");
            }
        }

        let mut drained = self.shared.drain_injector();
        for worker in 0..self.shared.num_threads {
            drained += self.shared.drain_pinned(worker);
        }
        tracing::debug!(drained, on_worker = on_worker_thread(), "worker pool stopped");
    }
}

impl Drop for CpuPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for CpuPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CpuPool")
            .field("num_threads", &self.shared.num_threads)
            .field("pending_tasks", &self.pending_tasks())
            .field("stopped", &self.is_stopped())
            .finish()
    }
}
