//! Spawning coroutines and futures onto an execution context.

use super::fiber::{Fiber, YieldContext};
use super::task::RawTask;
use crate::completion::{promise, CompletionFuture};
use crate::context::Handle;
use crate::error::{Error, Result};
use crate::executor::panic_message;
use futures::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

/// A [`Fiber`] that may cross to a worker before its first poll.
struct PinnedFiber<T: 'static>(Fiber<T>);

impl<T: 'static> PinnedFiber<T> {
    /// # Safety
    ///
    /// Once polled, the fiber must only be polled again and dropped on the
    /// thread that polled it first. A fiber that never ran holds nothing but
    /// its `Send` closure and may be dropped anywhere.
    unsafe fn new(fiber: Fiber<T>) -> Self {
        Self(fiber)
    }
}

// SAFETY: `PinnedFiber::new` obliges the owner to keep a started fiber on
// one thread. The only owner is a pinned `RawTask`, which polls it on its
// home worker and drops an unfinished one there or leaks it.
unsafe impl<T: Send + 'static> Send for PinnedFiber<T> {}

impl<T: 'static> Future for PinnedFiber<T> {
    type Output = Result<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.0).poll(cx)
    }
}

/// Run `f` on a new coroutine and return its outcome future immediately.
///
/// `Ok(v)` fulfills the outcome with `v`, `Err(e)` rejects it with `e` and a
/// panic rejects it with [`Error::Panicked`]. Nothing `f` does reaches the
/// worker that runs it. The coroutine stays on the worker that starts it, so
/// it may keep thread-bound values across a wait.
///
/// ```ignore
/// let outcome = spawn(&handle, |cx| {
///     cx.wait(adapt::<(), _>(|h| timer.async_wait(h)))?;
///     Ok(1)
/// });
/// assert_eq!(outcome.wait()?, 1);
/// ```
pub fn spawn<T, F>(handle: &Handle, f: F) -> CompletionFuture<T>
where
    F: FnOnce(&YieldContext<'_>) -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    if handle.is_stopped() {
        return CompletionFuture::failed(Error::ContextStopped);
    }

    let fiber = match Fiber::new(handle.clone(), f) {
        // SAFETY: only ever driven by the pinned task below.
        Ok(fiber) => unsafe { PinnedFiber::new(fiber) },
        Err(err) => {
            tracing::warn!(error = %err, "failed to allocate coroutine stack");
            return CompletionFuture::failed(err);
        }
    };

    let id = fiber.0.id();
    let metrics = handle.metrics().clone();
    let (outcome_tx, outcome) = promise();
    let outcome_tx = Arc::new(outcome_tx);

    metrics.record_coroutine_spawned();
    tracing::debug!(coroutine = %id, "spawning coroutine");

    let settle = outcome_tx.clone();
    let task = async move {
        let result = fiber.await;
        metrics.record_coroutine_finished(result.is_ok());
        match &result {
            Ok(_) => tracing::debug!(coroutine = %id, "coroutine finished"),
            Err(err) => tracing::debug!(coroutine = %id, error = %err, "coroutine failed"),
        }
        let _ = settle.settle(result);
    };

    if let Err(err) = RawTask::spawn_pinned(handle.clone(), Box::pin(task)) {
        tracing::debug!(coroutine = %id, error = %err, "context stopped before the coroutine started");
        let _ = outcome_tx.set_error(err);
    }
    outcome
}

/// Drive an ordinary future on the context and return its outcome future.
pub fn spawn_future<T, Fut>(handle: &Handle, fut: Fut) -> CompletionFuture<T>
where
    Fut: Future<Output = Result<T>> + Send + 'static,
    T: Send + 'static,
{
    let (outcome_tx, outcome) = promise();
    let outcome_tx = Arc::new(outcome_tx);

    let settle = outcome_tx.clone();
    let task = async move {
        let result = match AssertUnwindSafe(fut).catch_unwind().await {
            Ok(result) => result,
            Err(payload) => Err(Error::Panicked(panic_message(&*payload))),
        };
        let _ = settle.settle(result);
    };

    if let Err(err) = RawTask::spawn(handle.clone(), Box::pin(task)) {
        tracing::debug!(error = %err, "context stopped before the future started");
        let _ = outcome_tx.set_error(err);
    }
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::completion::{adapt, Completion, ErrorCode};
    use crate::context::ExecutionContext;

    #[test]
    fn test_spawn_returns_value() {
        let ctx = ExecutionContext::with_threads(2).unwrap();
        let outcome = spawn(&ctx.handle(), |_cx| Ok("hello"));
        assert_eq!(outcome.wait().unwrap(), "hello");
    }

    #[test]
    fn test_spawn_returns_before_running() {
        let ctx = ExecutionContext::with_threads(1).unwrap();
        let (gate_tx, gate) = promise::<()>();

        let outcome = spawn(&ctx.handle(), move |cx| cx.wait(gate));
        assert!(!outcome.is_ready());

        gate_tx.set_value(()).unwrap();
        outcome.wait().unwrap();
    }

    #[test]
    fn test_rejection_reraised_at_await_site() {
        let ctx = ExecutionContext::with_threads(1).unwrap();
        let code = ErrorCode::system(111);

        let outcome = spawn(&ctx.handle(), move |cx| {
            cx.wait(adapt::<(u32,), _>(|h| h.complete(code, (0,))))?;
            Ok("unreachable")
        });

        assert_eq!(outcome.wait().unwrap_err().operation_code(), Some(code));
    }

    #[test]
    fn test_spawn_panic_rejects_outcome() {
        let ctx = ExecutionContext::with_threads(1).unwrap();
        let outcome = spawn::<(), _>(&ctx.handle(), |_cx| panic!("boom"));

        assert!(matches!(outcome.wait(), Err(Error::Panicked(_))));

        // the worker survived
        let again = spawn(&ctx.handle(), |_cx| Ok(7));
        assert_eq!(again.wait().unwrap(), 7);
    }

    #[test]
    fn test_yield_now_lets_others_run() {
        let ctx = ExecutionContext::with_threads(1).unwrap();
        let (flag_tx, flag) = promise::<()>();

        let waiter = spawn(&ctx.handle(), move |cx| {
            let mut flag = flag;
            loop {
                if let Some(result) = flag.try_take() {
                    return result;
                }
                cx.yield_now();
            }
        });
        let setter = spawn(&ctx.handle(), move |_cx| flag_tx.set_value(()));

        setter.wait().unwrap();
        waiter.wait().unwrap();
    }

    #[test]
    fn test_spawn_future() {
        let ctx = ExecutionContext::with_threads(1).unwrap();
        let outcome = spawn_future(&ctx.handle(), async { Ok(3 * 3) });
        assert_eq!(outcome.wait().unwrap(), 9);

        let panicked = spawn_future::<(), _>(&ctx.handle(), async { panic!("async boom") });
        assert!(matches!(panicked.wait(), Err(Error::Panicked(_))));
    }

    #[test]
    fn test_spawn_on_stopped_context() {
        let ctx = ExecutionContext::with_threads(1).unwrap();
        ctx.shutdown();

        let outcome = spawn(&ctx.handle(), |_cx| Ok(()));
        assert!(matches!(outcome.wait(), Err(Error::ContextStopped)));

        // no fast path here: the pool itself rejects the task
        let outcome = spawn_future(&ctx.handle(), async { Ok(()) });
        assert!(matches!(outcome.wait(), Err(Error::ContextStopped)));
    }

    #[test]
    fn test_coroutine_keeps_its_thread_across_waits() {
        let ctx = ExecutionContext::with_threads(4).unwrap();

        let outcomes: Vec<_> = (0..32)
            .map(|_| {
                let (tx, fut) = promise::<()>();
                let outcome = spawn(&ctx.handle(), move |cx| {
                    let before = std::rc::Rc::new(std::thread::current().id());
                    cx.yield_now();
                    cx.wait(fut)?;
                    Ok(*before == std::thread::current().id())
                });
                std::thread::spawn(move || tx.set_value(()).unwrap());
                outcome
            })
            .collect();

        for outcome in outcomes {
            assert!(outcome.wait().unwrap());
        }
    }
}
