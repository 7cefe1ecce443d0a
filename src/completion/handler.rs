//! Completion handlers: the bridge between a callback-style operation and a
//! [`CompletionFuture`].

use super::args::CompletionArgs;
use super::error_code::ErrorCode;
use super::future::{promise, CompletionFuture, Promise};
use crate::error::{BoxError, Error};
use crate::executor::panic_message;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};

/// The handler an asynchronous operation accepts and invokes exactly once
/// with its error indicator and result values.
///
/// Implemented for [`CompletionHandler`] and for any plain closure, so an
/// operation can be written once and driven either way.
pub trait Completion<A>: Send + 'static {
    fn complete(self, ec: ErrorCode, args: A);
}

impl<A, F> Completion<A> for F
where
    F: FnOnce(ErrorCode, A) + Send + 'static,
{
    fn complete(self, ec: ErrorCode, args: A) {
        self(ec, args)
    }
}

type Convert<A, T> = Box<dyn FnOnce(A) -> std::result::Result<T, BoxError> + Send>;

/// Settles a [`CompletionFuture`] from one callback invocation.
///
/// A set error indicator rejects with [`Error::Operation`] and the result
/// values are dropped unread. Otherwise the values are converted; a failed
/// or panicking conversion rejects with [`Error::Adapter`]. Nothing unwinds
/// out of [`complete`](Completion::complete).
///
/// A handler dropped without being invoked rejects with
/// [`Error::BrokenPromise`].
pub struct CompletionHandler<A, T = <A as CompletionArgs>::Output>
where
    A: CompletionArgs,
{
    promise: Promise<T>,
    convert: Convert<A, T>,
}

impl<A, T> CompletionHandler<A, T>
where
    A: CompletionArgs,
    T: Send + 'static,
{
    /// Turn the handler into a plain callback.
    pub fn into_callback(self) -> impl FnOnce(ErrorCode, A) + Send + 'static {
        move |ec, args| self.complete(ec, args)
    }

    fn build(convert: Convert<A, T>, args: A) -> crate::error::Result<T> {
        match panic::catch_unwind(AssertUnwindSafe(move || convert(args))) {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(err)) => Err(Error::Adapter(err.to_string())),
            Err(payload) => Err(Error::Adapter(panic_message(&*payload))),
        }
    }
}

impl<A, T> Completion<A> for CompletionHandler<A, T>
where
    A: CompletionArgs,
    T: Send + 'static,
{
    fn complete(self, ec: ErrorCode, args: A) {
        let Self { promise, convert } = self;

        let outcome = if ec.is_err() {
            drop(args);
            Err(Error::Operation(ec))
        } else {
            Self::build(convert, args)
        };

        if promise.settle(outcome).is_err() {
            tracing::debug!("completion handler invoked on a settled future");
        }
    }
}

impl<A, T> fmt::Debug for CompletionHandler<A, T>
where
    A: CompletionArgs,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompletionHandler")
            .field("arity", &A::ARITY)
            .field("promise", &self.promise)
            .finish()
    }
}

/// A handler placeholder and the future it feeds. The future's value is the
/// collapsed callback arguments.
pub fn use_future<A>() -> (CompletionHandler<A>, CompletionFuture<A::Output>)
where
    A: CompletionArgs,
{
    let (promise, future) = promise();
    let handler = CompletionHandler {
        promise,
        convert: Box::new(|args: A| Ok(args.collapse())),
    };
    (handler, future)
}

/// Like [`use_future`], but builds the value with `convert`.
pub fn use_future_with<A, T, E, F>(convert: F) -> (CompletionHandler<A, T>, CompletionFuture<T>)
where
    A: CompletionArgs,
    T: Send + 'static,
    E: Into<BoxError>,
    F: FnOnce(A::Output) -> std::result::Result<T, E> + Send + 'static,
{
    let (promise, future) = promise();
    let handler = CompletionHandler {
        promise,
        convert: Box::new(move |args: A| convert(args.collapse()).map_err(Into::into)),
    };
    (handler, future)
}

/// Issue `op` with a fresh handler and return the future it settles.
///
/// ```ignore
/// let fut = adapt::<(), _>(|h| timer.async_wait(h));
/// ```
pub fn adapt<A, Op>(op: Op) -> CompletionFuture<A::Output>
where
    A: CompletionArgs,
    Op: FnOnce(CompletionHandler<A>),
{
    let (handler, future) = use_future::<A>();
    op(handler);
    future
}

/// [`adapt`] with a custom value conversion.
pub fn adapt_with<A, T, E, Op, F>(op: Op, convert: F) -> CompletionFuture<T>
where
    A: CompletionArgs,
    T: Send + 'static,
    E: Into<BoxError>,
    Op: FnOnce(CompletionHandler<A, T>),
    F: FnOnce(A::Output) -> std::result::Result<T, E> + Send + 'static,
{
    let (handler, future) = use_future_with::<A, T, E, F>(convert);
    op(handler);
    future
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn fake_read<H: Completion<(usize, Vec<u8>)>>(ec: ErrorCode, handler: H) {
        thread::spawn(move || handler.complete(ec, (3, vec![1, 2, 3])));
    }

    #[test]
    fn test_zero_results_fulfill_unit() {
        let fut = adapt::<(), _>(|h| h.complete(ErrorCode::SUCCESS, ()));
        fut.wait().unwrap();
    }

    #[test]
    fn test_single_result_is_scalar() {
        let fut = adapt::<(u64,), _>(|h| h.complete(ErrorCode::SUCCESS, (7,)));
        assert_eq!(fut.wait().unwrap(), 7);
    }

    #[test]
    fn test_many_results_from_another_thread() {
        let fut = adapt::<(usize, Vec<u8>), _>(|h| fake_read(ErrorCode::SUCCESS, h));
        assert_eq!(fut.wait().unwrap(), (3, vec![1, 2, 3]));
    }

    #[test]
    fn test_error_code_wins_over_results() {
        let code = ErrorCode::system(104);
        let fut = adapt::<(usize, Vec<u8>), _>(|h| fake_read(code, h));

        let err = fut.wait().unwrap_err();
        assert_eq!(err.operation_code(), Some(code));
    }

    #[test]
    fn test_conversion_error_rejects() {
        let fut = adapt_with::<(Vec<u8>,), _, _, _, _>(
            |h| h.complete(ErrorCode::SUCCESS, (vec![0xff, 0xfe],)),
            String::from_utf8,
        );

        assert!(matches!(fut.wait(), Err(Error::Adapter(_))));
    }

    #[test]
    fn test_conversion_panic_is_contained() {
        let (handler, fut) = use_future_with::<(u32,), u32, BoxError, _>(|n| {
            if n == 0 {
                panic!("zero is not allowed");
            }
            Ok(n)
        });

        handler.complete(ErrorCode::SUCCESS, (0,));
        match fut.wait() {
            Err(Error::Adapter(msg)) => assert!(msg.contains("zero is not allowed")),
            other => panic!("expected Adapter error, got {:?}", other),
        }
    }

    #[test]
    fn test_dropped_handler_breaks_promise() {
        let (handler, fut) = use_future::<(i32,)>();
        drop(handler);
        assert!(fut.wait().unwrap_err().is_broken_promise());
    }

    #[test]
    fn test_into_callback() {
        let (handler, fut) = use_future::<(&'static str, bool)>();
        let callback = handler.into_callback();
        callback(ErrorCode::SUCCESS, ("done", true));
        assert_eq!(fut.wait().unwrap(), ("done", true));
    }

    #[test]
    fn test_closure_is_a_completion() {
        let (tx, rx) = crossbeam_channel::bounded(1);
        fake_read(ErrorCode::SUCCESS, move |ec: ErrorCode, (n, _): (usize, Vec<u8>)| {
            tx.send((ec, n)).unwrap();
        });
        assert_eq!(rx.recv().unwrap(), (ErrorCode::SUCCESS, 3));
    }
}
