//! The unified error handling system for the crate.

use std::fmt::Display;

// 1. Core Types
pub use key_ring::KeyRingError;
pub use types::RelayError;

/// A unified `Result` type for the entire crate.
pub type Result<T> = std::result::Result<T, RelayError>;

// 2. Module declarations
pub mod key_ring;
pub mod types;

// 3. Context Trait for adding context to errors.
pub trait Context<T, E> {
    #[track_caller]
    fn context<C>(self, context: C) -> Result<T>
    where
        C: std::fmt::Display;

    #[track_caller]
    fn with_context<C, F>(self, context: F) -> Result<T>
    where
        F: FnOnce() -> C,
        C: std::fmt::Display;
}

impl<T, E> Context<T, E> for std::result::Result<T, E>
where
    E: Into<RelayError>,
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
            Err(error) => Err(RelayError::Context {
                context: context().to_string(),
                source: Box::new(error.into()),
            }),
        }
    }
}

/// Helper to attach context to an error without intermediate boilerplate.
#[track_caller]
pub fn context_error<T>(err: impl Into<RelayError>, context: impl Display) -> Result<T> {
    Err(err.into()).context(context)
}

// 4. Error Category for callers deciding between retry, demotion and surfacing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Errors caused by the caller (bad input, unknown ids). Never retried.
    Client,
    /// No channel or key left to serve the request.
    Capacity,
    /// Errors caused by the store, cache or other dependencies.
    Server,
}
