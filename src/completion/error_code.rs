//! The error indicator passed to completion callbacks.

use std::fmt;
use std::io;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// OS error numbers (`errno`).
    System,
    /// Codes defined by this crate, see the constants on [`ErrorCode`].
    Runtime,
    Custom(&'static str),
}

/// Error indicator of a completion callback. A zero value means success.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ErrorCode {
    value: i32,
    category: ErrorCategory,
}

impl ErrorCode {
    pub const SUCCESS: ErrorCode = ErrorCode::new(0, ErrorCategory::System);

    /// The operation was cancelled before it completed.
    pub const OPERATION_ABORTED: ErrorCode = ErrorCode::new(1, ErrorCategory::Runtime);

    pub const fn new(value: i32, category: ErrorCategory) -> Self {
        Self { value, category }
    }

    pub const fn system(errno: i32) -> Self {
        Self::new(errno, ErrorCategory::System)
    }

    pub fn from_io(err: &io::Error) -> Self {
        match err.raw_os_error() {
            Some(errno) => Self::system(errno),
            None => Self::new(-1, ErrorCategory::Custom("io")),
        }
    }

    pub fn value(&self) -> i32 {
        self.value
    }

    pub fn category(&self) -> ErrorCategory {
        self.category
    }

    pub fn is_err(&self) -> bool {
        self.value != 0
    }
}

impl Default for ErrorCode {
    fn default() -> Self {
        Self::SUCCESS
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.category {
            ErrorCategory::System if self.value == 0 => write!(f, "success"),
            ErrorCategory::System => write!(f, "{}", io::Error::from_raw_os_error(self.value)),
            ErrorCategory::Runtime => match self.value {
                0 => write!(f, "success"),
                1 => write!(f, "operation aborted"),
                v => write!(f, "runtime error {}", v),
            },
            ErrorCategory::Custom(name) => write!(f, "{}:{}", name, self.value),
        }
    }
}

impl From<io::Error> for ErrorCode {
    fn from(err: io::Error) -> Self {
        Self::from_io(&err)
    }
}
