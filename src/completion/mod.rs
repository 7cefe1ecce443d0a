//! Turning callback-style asynchronous operations into futures.
//!
//! An operation that takes a handler and later invokes it exactly once with
//! an [`ErrorCode`] and zero or more result values is adapted with
//! [`adapt`] (or [`use_future`] when the handler has to be passed around
//! before the operation is issued). The returned [`CompletionFuture`] ends
//! fulfilled with the collapsed results, or rejected with the error.

pub mod args;
pub mod error_code;
pub mod future;
pub mod handler;

pub use args::CompletionArgs;
pub use error_code::{ErrorCategory, ErrorCode};
pub use future::{promise, CompletionFuture, Promise};
pub use handler::{adapt, adapt_with, use_future, use_future_with, Completion, CompletionHandler};
