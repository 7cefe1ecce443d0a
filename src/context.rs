//! The execution context coroutines and completions run on.

use crate::async_bridge::{self, YieldContext};
use crate::completion::CompletionFuture;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::executor::{CpuPool, PoolHandle, WorkerId};
use crate::telemetry::{Metrics, MetricsSnapshot};
use std::future::Future;
use std::sync::Arc;

/// Cheap, cloneable access to an [`ExecutionContext`].
///
/// Wakers, timers and running coroutines hold a `Handle`, never the context
/// itself. Submitting through a handle after the context stopped fails with
/// [`Error::ContextStopped`](crate::Error::ContextStopped).
#[derive(Clone, Debug)]
pub struct Handle {
    pool: PoolHandle,
    coroutine_stack_size: usize,
}

impl Handle {
    /// Run `f` later on one of the context's threads.
    pub fn execute<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.pool.execute(f)
    }

    /// Run `f` later on worker `worker` specifically.
    pub fn execute_on<F>(&self, worker: WorkerId, f: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.pool.execute_on(worker, f)
    }

    pub(crate) fn try_execute_on<F>(&self, worker: WorkerId, f: F) -> std::result::Result<(), (Error, F)>
    where
        F: FnOnce() + Send + 'static,
    {
        self.pool.try_execute_on(worker, f)
    }

    /// The calling thread's worker id, if it belongs to this context.
    pub fn current_worker(&self) -> Option<WorkerId> {
        self.pool.current_worker()
    }

    pub fn spawn<T, F>(&self, f: F) -> CompletionFuture<T>
    where
        F: FnOnce(&YieldContext<'_>) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        async_bridge::spawn(self, f)
    }

    pub fn spawn_future<T, Fut>(&self, fut: Fut) -> CompletionFuture<T>
    where
        Fut: Future<Output = Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        async_bridge::spawn_future(self, fut)
    }

    pub fn is_stopped(&self) -> bool {
        self.pool.is_stopped()
    }

    pub fn num_threads(&self) -> usize {
        self.pool.num_threads()
    }

    pub fn coroutine_stack_size(&self) -> usize {
        self.coroutine_stack_size
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        self.pool.metrics()
    }
}

/// Owns the worker threads. Dropping it shuts them down.
pub struct ExecutionContext {
    pool: CpuPool,
    handle: Handle,
    config: Config,
}

impl ExecutionContext {
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;

        let pool = CpuPool::new(&config)?;
        let handle = Handle {
            pool: pool.handle(),
            coroutine_stack_size: config.coroutine_stack_size,
        };

        tracing::debug!(
            threads = pool.num_threads(),
            coroutine_stack_size = config.coroutine_stack_size,
            "execution context started"
        );

        Ok(Self {
            pool,
            handle,
            config,
        })
    }

    pub fn with_threads(num_threads: usize) -> Result<Self> {
        Self::new(Config::builder().num_threads(num_threads).build()?)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn handle(&self) -> Handle {
        self.handle.clone()
    }

    pub fn post<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.handle.execute(f)
    }

    pub fn spawn<T, F>(&self, f: F) -> CompletionFuture<T>
    where
        F: FnOnce(&YieldContext<'_>) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        self.handle.spawn(f)
    }

    pub fn spawn_future<T, Fut>(&self, fut: Fut) -> CompletionFuture<T>
    where
        Fut: Future<Output = Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        self.handle.spawn_future(fut)
    }

    pub fn num_threads(&self) -> usize {
        self.pool.num_threads()
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.pool.metrics().snapshot()
    }

    /// Stop the workers and drop every queued job.
    ///
    /// Coroutines parked at that point are unwound by their own worker as it
    /// exits, and their outcome futures end in `BrokenPromise`.
    pub fn shutdown(&self) {
        if !self.pool.is_stopped() {
            tracing::debug!("execution context shutting down");
        }
        self.pool.shutdown();
    }

    pub fn is_stopped(&self) -> bool {
        self.pool.is_stopped()
    }
}

impl std::fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("num_threads", &self.num_threads())
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_context_creation() {
        let ctx = ExecutionContext::with_threads(3).unwrap();
        assert_eq!(ctx.num_threads(), 3);
        assert_eq!(ctx.handle().num_threads(), 3);
        assert!(!ctx.is_stopped());
    }

    #[test]
    fn test_invalid_config_rejected() {
        assert!(matches!(
            ExecutionContext::with_threads(0),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_post_runs_on_worker() {
        let ctx = ExecutionContext::with_threads(2).unwrap();
        let (tx, rx) = crossbeam_channel::bounded(1);

        ctx.post(move || {
            tx.send(crate::executor::on_worker_thread()).unwrap();
        })
        .unwrap();

        assert!(rx.recv().unwrap());
    }

    #[test]
    fn test_post_after_shutdown_fails() {
        let ctx = ExecutionContext::with_threads(1).unwrap();
        ctx.shutdown();
        ctx.shutdown();

        assert!(ctx.is_stopped());
        assert!(matches!(ctx.post(|| {}), Err(Error::ContextStopped)));
        assert!(ctx.handle().is_stopped());
    }

    #[test]
    fn test_metrics_count_coroutines() {
        let ctx = ExecutionContext::with_threads(2).unwrap();
        let ran = std::sync::Arc::new(AtomicUsize::new(0));

        let outcomes: Vec<_> = (0..10)
            .map(|i| {
                let ran = ran.clone();
                ctx.spawn(move |_cx| {
                    ran.fetch_add(1, Ordering::SeqCst);
                    Ok(i)
                })
            })
            .collect();

        for (i, outcome) in outcomes.into_iter().enumerate() {
            assert_eq!(outcome.wait().unwrap(), i);
        }
        assert_eq!(ran.load(Ordering::SeqCst), 10);

        let snapshot = ctx.metrics();
        if cfg!(feature = "telemetry") {
            assert_eq!(snapshot.coroutines_spawned, 10);
        }
    }
}
