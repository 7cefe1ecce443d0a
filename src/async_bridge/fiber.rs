//! Stackful coroutines that suspend on futures.
//!
//! A [`Fiber`] runs a plain closure on its own stack. The closure receives a
//! [`YieldContext`]; calling [`YieldContext::wait`] polls a future with the
//! waker of whatever task is driving the fiber and, while the future is
//! pending, switches back to that task. The task sees `Poll::Pending`, and
//! the next poll (after the waker fired) switches back into the closure.

use crate::completion::CompletionFuture;
use crate::context::Handle;
use crate::error::{Error, Result};
use crate::executor::panic_message;
use corosensei::stack::DefaultStack;
use corosensei::{Coroutine, CoroutineResult, Yielder};
use futures::task::noop_waker;
use std::cell::RefCell;
use std::fmt;
use std::future::{Future, IntoFuture};
use std::panic::{self, AssertUnwindSafe};
use std::pin::{pin, Pin};
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::{Context, Poll, Waker};

static NEXT_COROUTINE_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CoroutineId(u64);

impl CoroutineId {
    fn next() -> Self {
        Self(NEXT_COROUTINE_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for CoroutineId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "coroutine-{}", self.0)
    }
}

/// Resumed with the driving task's waker, yields nothing, returns the
/// closure's result.
type RawCoroutine<T> = Coroutine<Waker, (), Result<T>, DefaultStack>;

/// A stackful coroutine, driven as a future.
///
/// Resolves to the closure's result, or to [`Error::Panicked`] if the
/// closure panicked. Dropping a suspended fiber unwinds its stack, running
/// the destructors of everything live at the suspension point.
///
/// A fiber is not `Send`: its stack may hold thread-bound values across a
/// suspension, so it must be resumed and dropped on the thread that first
/// polled it. [`spawn`](super::spawn) takes care of that on a pool.
pub struct Fiber<T: 'static> {
    id: CoroutineId,
    coroutine: Option<RawCoroutine<T>>,
}

impl<T: 'static> Fiber<T> {
    /// Allocate the fiber stack and wrap `f`. Nothing runs until the first
    /// poll.
    pub fn new<F>(handle: Handle, f: F) -> Result<Self>
    where
        F: FnOnce(&YieldContext<'_>) -> Result<T> + 'static,
    {
        let stack = DefaultStack::new(handle.coroutine_stack_size())?;
        let id = CoroutineId::next();

        let coroutine = Coroutine::with_stack(stack, move |yielder, waker: Waker| {
            let cx = YieldContext {
                yielder,
                waker: RefCell::new(waker),
                id,
                handle,
            };
            f(&cx)
        });

        Ok(Self {
            id,
            coroutine: Some(coroutine),
        })
    }

    pub fn id(&self) -> CoroutineId {
        self.id
    }

    pub fn is_finished(&self) -> bool {
        self.coroutine.is_none()
    }
}

impl<T: 'static> Unpin for Fiber<T> {}

impl<T: 'static> Future for Fiber<T> {
    type Output = Result<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = &mut *self;
        let Some(coroutine) = this.coroutine.as_mut() else {
            return Poll::Ready(Err(Error::AlreadyRetrieved));
        };

        let waker = cx.waker().clone();
        let outcome = match panic::catch_unwind(AssertUnwindSafe(|| coroutine.resume(waker))) {
            Ok(CoroutineResult::Yield(())) => return Poll::Pending,
            Ok(CoroutineResult::Return(result)) => result,
            Err(payload) => {
                let message = panic_message(&*payload);
                tracing::debug!(coroutine = %this.id, %message, "coroutine panicked");
                Err(Error::Panicked(message))
            }
        };

        this.coroutine = None;
        Poll::Ready(outcome)
    }
}

impl<T: 'static> fmt::Debug for Fiber<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Fiber")
            .field("id", &self.id)
            .field("finished", &self.is_finished())
            .finish()
    }
}

/// The resumption capability handed to a fiber's closure.
///
/// Only usable on the fiber it was created for; it is neither `Send` nor
/// `Sync`.
pub struct YieldContext<'a> {
    yielder: &'a Yielder<Waker, ()>,
    waker: RefCell<Waker>,
    id: CoroutineId,
    handle: Handle,
}

impl<'a> YieldContext<'a> {
    /// Park the fiber until `fut` completes and return its output.
    ///
    /// For a [`CompletionFuture`] the output is a `Result`, so a rejection
    /// comes back as an error to propagate with `?`:
    ///
    /// ```ignore
    /// let n = cx.wait(adapt::<(usize,), _>(|h| socket.async_read(buf, h)))?;
    /// ```
    pub fn wait<F: IntoFuture>(&self, fut: F) -> F::Output {
        let mut fut = pin!(fut.into_future());
        loop {
            let waker = self.waker.borrow().clone();
            let mut task_cx = Context::from_waker(&waker);
            if let Poll::Ready(output) = fut.as_mut().poll(&mut task_cx) {
                return output;
            }
            drop(waker);
            self.park();
        }
    }

    /// Park until `fut` is terminal without taking its value.
    pub fn wait_settled<T>(&self, fut: &CompletionFuture<T>) {
        self.wait(std::future::poll_fn(|cx| fut.poll_settled(cx)))
    }

    /// Let every other queued job run before continuing.
    pub fn yield_now(&self) {
        self.waker.borrow().wake_by_ref();
        self.park();
    }

    pub fn id(&self) -> CoroutineId {
        self.id
    }

    /// The context this fiber runs on, for spawning further work.
    pub fn handle(&self) -> &Handle {
        &self.handle
    }

    fn park(&self) {
        // A parked stack must not keep its own task alive.
        drop(self.waker.replace(noop_waker()));

        tracing::trace!(coroutine = %self.id, "parked");
        let waker = self.yielder.suspend(());
        *self.waker.borrow_mut() = waker;
        self.handle.metrics().record_coroutine_resumed();
        tracing::trace!(coroutine = %self.id, "resumed");
    }
}

impl fmt::Debug for YieldContext<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("YieldContext").field("id", &self.id).finish()
    }
}

/// Free-function form of [`YieldContext::wait`].
pub fn wait<F: IntoFuture>(fut: F, cx: &YieldContext<'_>) -> F::Output {
    cx.wait(fut)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::completion::promise;
    use crate::context::ExecutionContext;

    fn poll_once<T: 'static>(fiber: &mut Fiber<T>) -> Poll<Result<T>> {
        let waker = noop_waker();
        let mut cx = Context::from_waker(&waker);
        Pin::new(fiber).poll(&mut cx)
    }

    #[test]
    fn test_fiber_runs_to_completion_without_waits() {
        let ctx = ExecutionContext::with_threads(1).unwrap();
        let mut fiber = Fiber::new(ctx.handle(), |_cx| Ok(40 + 2)).unwrap();

        assert!(!fiber.is_finished());
        assert!(matches!(poll_once(&mut fiber), Poll::Ready(Ok(42))));
        assert!(fiber.is_finished());
        assert!(matches!(poll_once(&mut fiber), Poll::Ready(Err(Error::AlreadyRetrieved))));
    }

    #[test]
    fn test_fiber_suspends_until_promise_settles() {
        let ctx = ExecutionContext::with_threads(1).unwrap();
        let (promise, future) = promise::<u32>();

        let mut fiber = Fiber::new(ctx.handle(), move |cx| {
            let n = cx.wait(future)?;
            Ok(n * 2)
        })
        .unwrap();

        assert!(poll_once(&mut fiber).is_pending());
        assert!(poll_once(&mut fiber).is_pending());

        promise.set_value(21).unwrap();
        assert!(matches!(poll_once(&mut fiber), Poll::Ready(Ok(42))));
    }

    #[test]
    fn test_fiber_panic_becomes_error() {
        let ctx = ExecutionContext::with_threads(1).unwrap();
        let mut fiber = Fiber::<()>::new(ctx.handle(), |_cx| panic!("fiber blew up")).unwrap();

        match poll_once(&mut fiber) {
            Poll::Ready(Err(Error::Panicked(msg))) => assert!(msg.contains("fiber blew up")),
            other => panic!("expected Panicked, got {:?}", other),
        }
    }

    #[test]
    fn test_dropping_suspended_fiber_runs_destructors() {
        struct SetOnDrop(std::sync::Arc<std::sync::atomic::AtomicBool>);
        impl Drop for SetOnDrop {
            fn drop(&mut self) {
                self.0.store(true, Ordering::SeqCst);
            }
        }

        let ctx = ExecutionContext::with_threads(1).unwrap();
        let dropped = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false));
        let guard = SetOnDrop(dropped.clone());
        let (_promise, future) = promise::<()>();

        let mut fiber = Fiber::new(ctx.handle(), move |cx| {
            let _guard = guard;
            cx.wait(future)
        })
        .unwrap();

        assert!(poll_once(&mut fiber).is_pending());
        assert!(!dropped.load(Ordering::SeqCst));

        drop(fiber);
        assert!(dropped.load(Ordering::SeqCst));
    }

    #[test]
    fn test_coroutine_ids_are_unique() {
        let ctx = ExecutionContext::with_threads(1).unwrap();
        let a = Fiber::new(ctx.handle(), |_cx| Ok(())).unwrap();
        let b = Fiber::new(ctx.handle(), |_cx| Ok(())).unwrap();
        assert_ne!(a.id(), b.id());
    }
}
