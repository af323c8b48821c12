//! Error taxonomy for the orchestration engine.
//!
//! Four classes matter operationally:
//! - `ConfigValidation`: fatal at construction, aborts only that agent.
//! - `Transient`: timeout/network/rate-limit, retried with backoff.
//! - `Permanent`: auth failure, invalid ticker, insufficient funds; never retried.
//! - `Isolation`: an agent blew up during parallel execution; captured into its
//!   own result, never propagated to siblings.

use std::time::Duration;

use thiserror::Error;

/// Engine-wide error type.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Agent or matcher configuration failed validation.
    #[error("config validation failed: {0}")]
    ConfigValidation(String),

    /// Retryable failure from an external collaborator.
    #[error("transient error: {message}")]
    Transient {
        message: String,
        /// Server-specified wait (e.g. HTTP 429 Retry-After), honored in
        /// addition to backoff.
        retry_after: Option<Duration>,
    },

    /// Non-retryable failure from an external collaborator.
    #[error("permanent error: {0}")]
    Permanent(String),

    /// An agent task panicked or was otherwise lost during dispatch.
    #[error("agent execution isolated: {0}")]
    Isolation(String),

    /// A manual trigger raced an in-flight scheduled run.
    #[error("execution already in progress: {0}")]
    Conflict(String),

    /// Persistence failure.
    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),
}

impl EngineError {
    /// Shorthand for a transient error without a server-specified wait.
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient {
            message: message.into(),
            retry_after: None,
        }
    }

    /// Transient error carrying a server-specified Retry-After.
    pub fn rate_limited(message: impl Into<String>, retry_after: Duration) -> Self {
        Self::Transient {
            message: message.into(),
            retry_after: Some(retry_after),
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self::Permanent(message.into())
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::ConfigValidation(message.into())
    }

    /// Whether the retry policy may attempt this call again.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }

    /// Server-requested minimum wait before the next attempt, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::Transient { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    /// Short class label surfaced by status endpoints (no stack detail).
    pub fn class(&self) -> &'static str {
        match self {
            Self::ConfigValidation(_) => "config",
            Self::Transient { .. } => "transient",
            Self::Permanent(_) => "permanent",
            Self::Isolation(_) => "isolation",
            Self::Conflict(_) => "conflict",
            Self::Storage(_) => "storage",
        }
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
