//! Single-assignment future cell shared by a [`Promise`] and its
//! [`CompletionFuture`].
//!
//! The cell moves from pending to fulfilled or rejected exactly once. The
//! continuation slot sits under the same lock as the state, so a consumer
//! registering interest and a producer settling from another thread cannot
//! miss each other: whichever comes second sees the other's effect. The
//! continuation itself always runs after the lock is released.

use crate::error::{Error, Result};
use crate::executor::on_worker_thread;
use parking_lot::{Condvar, Mutex};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};
use std::time::{Duration, Instant};

enum State<T> {
    Pending,
    Fulfilled(T),
    Rejected(Error),
    /// Terminal value already handed to the consumer.
    Retrieved,
}

impl<T> State<T> {
    fn is_pending(&self) -> bool {
        matches!(self, State::Pending)
    }

    fn name(&self) -> &'static str {
        match self {
            State::Pending => "pending",
            State::Fulfilled(_) => "fulfilled",
            State::Rejected(_) => "rejected",
            State::Retrieved => "retrieved",
        }
    }

    /// Moves a terminal value out, leaving `Retrieved` behind.
    fn take_terminal(&mut self) -> Option<Result<T>> {
        match self {
            State::Pending => None,
            State::Retrieved => Some(Err(Error::AlreadyRetrieved)),
            _ => match std::mem::replace(self, State::Retrieved) {
                State::Fulfilled(value) => Some(Ok(value)),
                State::Rejected(err) => Some(Err(err)),
                State::Pending | State::Retrieved => unreachable!(),
            },
        }
    }
}

/// What to run once the cell becomes terminal. Fires at most once.
enum Continuation {
    Waker(Waker),
    Callback(Box<dyn FnOnce() + Send>),
}

impl Continuation {
    fn fire(self) {
        match self {
            Continuation::Waker(waker) => waker.wake(),
            Continuation::Callback(f) => f(),
        }
    }
}

struct Inner<T> {
    state: State<T>,
    continuation: Option<Continuation>,
}

struct Shared<T> {
    inner: Mutex<Inner<T>>,
    settled: Condvar,
}

impl<T> Shared<T> {
    fn new(state: State<T>) -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(Inner {
                state,
                continuation: None,
            }),
            settled: Condvar::new(),
        })
    }

    fn settle(&self, outcome: Result<T>) -> Result<()> {
        let continuation = {
            let mut inner = self.inner.lock();
            if !inner.state.is_pending() {
                drop(inner);
                drop(outcome);
                return Err(Error::AlreadySettled);
            }
            inner.state = match outcome {
                Ok(value) => State::Fulfilled(value),
                Err(err) => State::Rejected(err),
            };
            inner.continuation.take()
        };

        self.settled.notify_all();
        if let Some(continuation) = continuation {
            continuation.fire();
        }
        Ok(())
    }

    fn is_pending(&self) -> bool {
        self.inner.lock().state.is_pending()
    }

    fn try_take(&self) -> Option<Result<T>> {
        self.inner.lock().state.take_terminal()
    }

    /// Store `waker` unless an equivalent one is already registered.
    fn register(inner: &mut Inner<T>, waker: &Waker) {
        match &inner.continuation {
            Some(Continuation::Waker(existing)) if existing.will_wake(waker) => {}
            _ => inner.continuation = Some(Continuation::Waker(waker.clone())),
        }
    }

    fn poll_take(&self, cx: &mut Context<'_>) -> Poll<Result<T>> {
        let mut inner = self.inner.lock();
        match inner.state.take_terminal() {
            Some(outcome) => Poll::Ready(outcome),
            None => {
                Self::register(&mut inner, cx.waker());
                Poll::Pending
            }
        }
    }

    fn poll_settled(&self, cx: &mut Context<'_>) -> Poll<()> {
        let mut inner = self.inner.lock();
        if inner.state.is_pending() {
            Self::register(&mut inner, cx.waker());
            Poll::Pending
        } else {
            Poll::Ready(())
        }
    }
}

/// Create a connected producer/consumer pair.
pub fn promise<T>() -> (Promise<T>, CompletionFuture<T>) {
    let shared = Shared::new(State::Pending);
    (
        Promise {
            shared: shared.clone(),
        },
        CompletionFuture { shared },
    )
}

/// Producing half. Settles its future at most once.
///
/// Dropping a promise that never settled rejects the future with
/// [`Error::BrokenPromise`], so an abandoned operation never leaves its
/// consumer waiting forever.
pub struct Promise<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Promise<T> {
    pub fn set_value(&self, value: T) -> Result<()> {
        self.shared.settle(Ok(value))
    }

    pub fn set_error(&self, err: Error) -> Result<()> {
        self.shared.settle(Err(err))
    }

    /// Fails with [`Error::AlreadySettled`] if another transition won.
    pub fn settle(&self, outcome: Result<T>) -> Result<()> {
        self.shared.settle(outcome)
    }

    pub fn is_settled(&self) -> bool {
        !self.shared.is_pending()
    }
}

impl<T> Drop for Promise<T> {
    fn drop(&mut self) {
        if self.shared.settle(Err(Error::BrokenPromise)).is_ok() {
            tracing::debug!("promise dropped before it was settled");
        }
    }
}

impl<T> fmt::Debug for Promise<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Promise")
            .field("state", &self.shared.inner.lock().state.name())
            .finish()
    }
}

/// Consuming half: the eventual value or failure of one operation.
///
/// Await it from async code, park on it from a coroutine with
/// `YieldContext::wait`, or block an ordinary thread with [`wait`].
///
/// [`wait`]: CompletionFuture::wait
#[must_use = "a CompletionFuture does nothing unless it is awaited or waited on"]
pub struct CompletionFuture<T> {
    shared: Arc<Shared<T>>,
}

impl<T> CompletionFuture<T> {
    /// An already fulfilled future.
    pub fn ready(value: T) -> Self {
        Self {
            shared: Shared::new(State::Fulfilled(value)),
        }
    }

    /// An already rejected future.
    pub fn failed(err: Error) -> Self {
        Self {
            shared: Shared::new(State::Rejected(err)),
        }
    }

    /// True once the future is terminal.
    pub fn is_ready(&self) -> bool {
        !self.shared.is_pending()
    }

    /// Take the outcome if it is already there.
    pub fn try_take(&mut self) -> Option<Result<T>> {
        self.shared.try_take()
    }

    /// Block the calling OS thread until the future is terminal.
    ///
    /// Inside a coroutine use `YieldContext::wait` instead; blocking a pool
    /// worker stalls every coroutine queued behind it.
    pub fn wait(self) -> Result<T> {
        if on_worker_thread() {
            tracing::warn!("blocking wait on a pool worker thread");
        }

        let mut inner = self.shared.inner.lock();
        loop {
            if let Some(outcome) = inner.state.take_terminal() {
                return outcome;
            }
            self.shared.settled.wait(&mut inner);
        }
    }

    /// Block until the future is terminal or `timeout` elapses.
    /// Returns whether it is terminal.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut inner = self.shared.inner.lock();
        while inner.state.is_pending() {
            if self.shared.settled.wait_until(&mut inner, deadline).timed_out() {
                return !inner.state.is_pending();
            }
        }
        true
    }

    /// Run `f` with the outcome once the future is terminal.
    ///
    /// Runs immediately on the calling thread if it already is, otherwise on
    /// whichever thread settles the promise.
    pub fn on_settled<F>(self, f: F)
    where
        F: FnOnce(Result<T>) + Send + 'static,
        T: Send + 'static,
    {
        let shared = self.shared.clone();
        let run = move || {
            let outcome = shared
                .try_take()
                .unwrap_or(Err(Error::BrokenPromise));
            f(outcome)
        };

        {
            let mut inner = self.shared.inner.lock();
            if inner.state.is_pending() {
                inner.continuation = Some(Continuation::Callback(Box::new(run)));
                return;
            }
        }
        run();
    }

    /// Register the current task for wake-up without taking the value.
    pub(crate) fn poll_settled(&self, cx: &mut Context<'_>) -> Poll<()> {
        self.shared.poll_settled(cx)
    }
}

impl<T> Future for CompletionFuture<T> {
    type Output = Result<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.shared.poll_take(cx)
    }
}

impl<T> fmt::Debug for CompletionFuture<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompletionFuture")
            .field("state", &self.shared.inner.lock().state.name())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Barrier;
    use std::thread;

    #[test]
    fn test_set_value_then_wait() {
        let (promise, future) = promise();
        promise.set_value(5).unwrap();
        assert!(future.is_ready());
        assert_eq!(future.wait().unwrap(), 5);
    }

    #[test]
    fn test_second_settle_is_rejected() {
        let (promise, mut future) = promise();
        promise.set_value(1).unwrap();

        assert!(matches!(promise.set_value(2), Err(Error::AlreadySettled)));
        assert!(matches!(
            promise.set_error(Error::BrokenPromise),
            Err(Error::AlreadySettled)
        ));
        assert_eq!(future.try_take().unwrap().unwrap(), 1);
    }

    #[test]
    fn test_concurrent_settle_only_first_wins() {
        const THREADS: usize = 8;

        for _ in 0..50 {
            let (promise, future) = promise::<usize>();
            let promise = Arc::new(promise);
            let barrier = Arc::new(Barrier::new(THREADS));
            let winners = Arc::new(AtomicUsize::new(0));
            let winner_value = Arc::new(AtomicUsize::new(usize::MAX));

            let handles: Vec<_> = (0..THREADS)
                .map(|i| {
                    let promise = promise.clone();
                    let barrier = barrier.clone();
                    let winners = winners.clone();
                    let winner_value = winner_value.clone();
                    thread::spawn(move || {
                        barrier.wait();
                        if promise.set_value(i).is_ok() {
                            winners.fetch_add(1, Ordering::SeqCst);
                            winner_value.store(i, Ordering::SeqCst);
                        }
                    })
                })
                .collect();

            for h in handles {
                h.join().unwrap();
            }

            assert_eq!(winners.load(Ordering::SeqCst), 1);
            assert_eq!(future.wait().unwrap(), winner_value.load(Ordering::SeqCst));
        }
    }

    #[test]
    fn test_dropped_promise_breaks_future() {
        let (promise, future) = promise::<u32>();
        drop(promise);
        assert!(matches!(future.wait(), Err(Error::BrokenPromise)));
    }

    #[test]
    fn test_drop_after_settle_keeps_value() {
        let (promise, future) = promise();
        promise.set_value("kept").unwrap();
        drop(promise);
        assert_eq!(future.wait().unwrap(), "kept");
    }

    #[test]
    fn test_wait_across_threads() {
        let (promise, future) = promise();

        let producer = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            promise.set_value(vec![1, 2, 3]).unwrap();
        });

        assert_eq!(future.wait().unwrap(), vec![1, 2, 3]);
        producer.join().unwrap();
    }

    #[test]
    fn test_wait_timeout() {
        let (promise, future) = promise::<()>();
        assert!(!future.wait_timeout(Duration::from_millis(10)));

        promise.set_value(()).unwrap();
        assert!(future.wait_timeout(Duration::from_millis(10)));
    }

    #[test]
    fn test_try_take_twice() {
        let mut future = CompletionFuture::ready(3);
        assert_eq!(future.try_take().unwrap().unwrap(), 3);
        assert!(matches!(future.try_take(), Some(Err(Error::AlreadyRetrieved))));
    }

    #[test]
    fn test_on_settled_before_and_after() {
        let seen = Arc::new(AtomicUsize::new(0));

        // already terminal: runs inline
        let s = seen.clone();
        CompletionFuture::ready(10usize).on_settled(move |r| {
            s.fetch_add(r.unwrap(), Ordering::SeqCst);
        });
        assert_eq!(seen.load(Ordering::SeqCst), 10);

        // pending: runs on the settling thread
        let (promise, future) = promise::<usize>();
        let s = seen.clone();
        future.on_settled(move |r| {
            s.fetch_add(r.unwrap(), Ordering::SeqCst);
        });
        assert_eq!(seen.load(Ordering::SeqCst), 10);
        promise.set_value(5).unwrap();
        assert_eq!(seen.load(Ordering::SeqCst), 15);
    }

    #[test]
    fn test_poll_as_std_future() {
        let (promise, future) = promise();
        let consumer = thread::spawn(move || futures::executor::block_on(future));

        thread::sleep(Duration::from_millis(10));
        promise.set_error(Error::adapter("bad bytes")).unwrap();

        match consumer.join().unwrap() {
            Err(Error::Adapter(msg)) => assert_eq!(msg, "bad bytes"),
            other => panic!("expected Adapter error, got {:?}", other.map(|_: ()| ())),
        }
    }
}
