//! Error types for Promissory

use thiserror::Error;

/// Result alias used throughout the crate
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Main error type for Promissory
///
/// Rejection reasons are generic over the promise's `E` parameter, but every
/// reason type must be constructible from this enum so the engine can reject
/// on its own behalf (circular resolution, panicking callbacks).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// A promise was resolved with itself, directly or through a chain of
    /// adopted promises
    #[error("LogicError: Cannot resolve a promise with itself")]
    CircularResolution,

    /// Programmer error detected at a construction site
    #[error("InvalidArgument: {0}")]
    InvalidArgument(String),

    /// Conventional reason for cancellers that reject
    #[error("Cancelled")]
    Cancelled,

    /// A user callback panicked while being invoked
    #[error("Panic: {0}")]
    Panicked(String),

    /// Free-form rejection reason
    #[error("{0}")]
    Message(String),
}

impl Error {
    /// Create a free-form rejection reason
    pub fn message(message: impl Into<String>) -> Self {
        Error::Message(message.into())
    }

    /// Create an invalid argument error
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Error::InvalidArgument(message.into())
    }

    /// Build a reason from a caught panic payload
    pub(crate) fn from_panic(payload: Box<dyn std::any::Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "callback panicked".to_string()
        };
        Error::Panicked(message)
    }

    /// Check whether this is a cancellation reason
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }
}
