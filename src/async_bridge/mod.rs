//! Coroutine bridge.
//!
//! [`spawn`] runs a closure on a stackful [`Fiber`]. Inside it,
//! [`YieldContext::wait`] parks the fiber on any future and hands back its
//! output, so awaiting reads like a plain call that may fail. Parked fibers
//! are resumed by their task's waker, which only ever submits a job to the
//! execution context, never runs the fiber on the waking thread. The job
//! goes to the worker that started the fiber: a stack never changes threads.
//!
//! If the promise a parked fiber waits on is dropped, the wait returns
//! [`Error::BrokenPromise`](crate::Error::BrokenPromise). If the context
//! stops first, each worker unwinds the stacks parked on it as it exits and
//! the outcome futures also end in `BrokenPromise`.

pub mod fiber;
pub mod spawn;
pub(crate) mod task;
mod waker;

pub use fiber::{wait, CoroutineId, Fiber, YieldContext};
pub use spawn::{spawn, spawn_future};

use futures::Future;
use std::pin::Pin;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;
