//! Behavioral error model.
//!
//! Variants are grouped by how callers react, not by where the failure
//! originated. Cancellation is a first-class signal here rather than a
//! panic or a transport error in disguise.

use thiserror::Error;

/// Result type used across the courier crates.
pub type CourierResult<T> = Result<T, CourierError>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CourierError {
    /// A caller-supplied value was rejected at the call site. Never retried.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The component was already shut down. The caller must stop using it.
    #[error("component is shut down")]
    Disposed,

    /// The supplied cancellation handle fired. Emitters propagate this;
    /// receivers surface it as sequence completion instead.
    #[error("operation cancelled")]
    Cancelled,

    /// A transport-layer failure crossing a public boundary.
    #[error("transport failure: {0}")]
    Transport(String),

    /// Every registered transport rejected the notification.
    #[error("every transport rejected the notification")]
    AllTransportsRejected,

    /// Registration/configuration validation failed. Fatal to startup.
    #[error("configuration error: {0}")]
    Config(String),
}

impl CourierError {
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Whether this error is the cancellation signal.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}
