//! The unified error handling system for the interceptor.

use std::fmt::Display;

pub use types::InterceptError;

/// A unified `Result` type for the entire crate.
pub type Result<T> = std::result::Result<T, InterceptError>;

pub mod macros;
pub mod types;

/// Context trait for adding context to errors.
pub trait Context<T, E> {
    /// Wrap the error with a static context message.
    #[track_caller]
    fn context<C>(self, context: C) -> Result<T>
    where
        C: std::fmt::Display;

    /// Wrap the error with a lazily built context message.
    #[track_caller]
    fn with_context<C, F>(self, context: F) -> Result<T>
    where
        F: FnOnce() -> C,
        C: std::fmt::Display;
}

impl<T, E> Context<T, E> for std::result::Result<T, E>
where
    E: Into<InterceptError>,
{
    #[track_caller]
    fn context<C>(self, context: C) -> Result<T>
    where
        C: std::fmt::Display,
    {
        self.with_context(|| context)
    }

    #[track_caller]
    fn with_context<C, F>(self, context: F) -> Result<T>
    where
        F: FnOnce() -> C,
        C: std::fmt::Display,
    {
        match self {
            Ok(value) => Ok(value),
            Err(error) => Err(InterceptError::Context {
                context: context().to_string(),
                source: Box::new(error.into()),
            }),
        }
    }
}

/// Helper to attach context to an error without intermediate boilerplate.
#[track_caller]
pub fn context_error<T>(err: impl Into<InterceptError>, context: impl Display) -> Result<T> {
    Err(err.into()).context(context)
}

/// Error category for log aggregation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Bad configuration or pattern table; fixed by the operator.
    Setup,
    /// Malformed request/response bodies or frames.
    Payload,
    /// Transport failures of the underlying fetch.
    Transport,
    /// Failures after capture: stream reconstruction and handler dispatch.
    Processing,
}
