use crate::completion::ErrorCode;

pub type Result<T> = std::result::Result<T, Error>;

/// Boxed error payload carried by [`Error::User`].
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The wrapped asynchronous operation reported failure through its
    /// error indicator.
    #[error("operation failed: {0}")]
    Operation(ErrorCode),

    /// Building the completion value from the callback arguments failed.
    #[error("failed to build completion value: {0}")]
    Adapter(String),

    /// A spawned coroutine returned an error.
    #[error("coroutine failed: {0}")]
    User(#[source] BoxError),

    #[error("coroutine panicked: {0}")]
    Panicked(String),

    /// The producing side was dropped before it settled the future.
    #[error("broken promise")]
    BrokenPromise,

    #[error("promise already satisfied")]
    AlreadySettled,

    #[error("future value already retrieved")]
    AlreadyRetrieved,

    #[error("execution context stopped")]
    ContextStopped,

    #[error("executor error: {0}")]
    Executor(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn user<E: Into<BoxError>>(err: E) -> Self {
        Error::User(err.into())
    }

    pub fn executor<S: Into<String>>(msg: S) -> Self {
        Error::Executor(msg.into())
    }

    pub fn config<S: Into<String>>(msg: S) -> Self {
        Error::Config(msg.into())
    }

    pub fn adapter<S: Into<String>>(msg: S) -> Self {
        Error::Adapter(msg.into())
    }

    /// The error indicator, if this is an operation failure.
    pub fn operation_code(&self) -> Option<ErrorCode> {
        match self {
            Error::Operation(code) => Some(*code),
            _ => None,
        }
    }

    pub fn is_broken_promise(&self) -> bool {
        matches!(self, Error::BrokenPromise)
    }
}
