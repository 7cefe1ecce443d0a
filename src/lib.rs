//! fiber-await - await callback-style asynchronous operations from
//! stackful coroutines.
//!
//! Operations that report completion by invoking a handler with an
//! [`ErrorCode`] and zero or more result values are turned into
//! [`CompletionFuture`]s. Code running on a coroutine parks on those futures
//! with [`YieldContext::wait`] and reads like ordinary blocking code, while
//! the worker threads underneath keep running other coroutines.
//!
//! # Quick Start
//!
//! ```no_run
//! use fiber_await::prelude::*;
//! use std::time::Duration;
//!
//! let ctx = ExecutionContext::with_threads(2).unwrap();
//! let mut timer = SteadyTimer::new(&ctx.handle());
//! timer.expires_after(Duration::from_millis(100));
//!
//! let outcome = ctx.spawn(move |cx| {
//!     cx.wait(adapt::<(), _>(|h| timer.async_wait(h)))?;
//!     Ok(1)
//! });
//!
//! assert_eq!(outcome.wait().unwrap(), 1);
//! ```
//!
//! # Features
//!
//! - **Completion adapter**: `()`, scalar and tuple results, error codes
//!   and conversion failures collapsed into one rejected state
//! - **Stackful coroutines**: `corosensei` fibers driven as futures on a
//!   work-stealing pool; resumes are always posted back to the pool
//! - **Broken promises**: abandoned operations reject instead of hanging
//! - **Telemetry**: job and coroutine counters, latency histogram (optional)

#![warn(missing_debug_implementations)]

pub mod async_bridge;
pub mod completion;
pub mod config;
pub mod context;
pub mod error;
pub mod executor;
pub mod prelude;
pub mod telemetry;
pub mod timer;
pub mod util;

pub use async_bridge::{spawn, spawn_future, wait, YieldContext};
pub use completion::{
    adapt, adapt_with, promise, use_future, use_future_with, Completion, CompletionFuture,
    CompletionHandler, ErrorCode, Promise,
};
pub use config::{Config, ConfigBuilder};
pub use context::{ExecutionContext, Handle};
pub use error::{Error, Result};
pub use timer::SteadyTimer;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quick_start() {
        let ctx = ExecutionContext::with_threads(2).unwrap();
        let mut timer = SteadyTimer::new(&ctx.handle());
        timer.expires_after(std::time::Duration::from_millis(10));

        let outcome = ctx.spawn(move |cx| {
            cx.wait(adapt::<(), _>(|h| timer.async_wait(h)))?;
            Ok(1)
        });

        assert_eq!(outcome.wait().unwrap(), 1);
    }
}
