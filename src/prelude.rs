pub use crate::async_bridge::{wait, YieldContext};
pub use crate::completion::{
    adapt, adapt_with, promise, use_future, use_future_with, Completion, CompletionArgs,
    CompletionFuture, CompletionHandler, ErrorCode, Promise,
};
pub use crate::config::{Config, ConfigBuilder};
pub use crate::context::{ExecutionContext, Handle};
pub use crate::error::{Error, Result};
pub use crate::timer::SteadyTimer;

#[cfg(feature = "telemetry")]
pub use crate::telemetry::{Metrics, MetricsSnapshot};
