//! Unified error handling for the roundsmith crate
//!
//! All fallible operations in the engine return [`Error`]. Each variant maps
//! onto one of the failure classes the scheduling harness reacts to:
//!
//! - transient I/O (store, database, file) is logged and retried on the next tick
//! - malformed input is quarantined and processing continues
//! - insufficient supply aborts the whole job invocation
//! - connection loss triggers a reconnect with fixed backoff
//!
//! # Usage
//!
//! ```rust,ignore
//! use roundsmith::error::{Error, ErrorCategory, RoundsmithErrorTrait};
//!
//! fn handle_error(err: Error) {
//!     if err.is_recoverable() {
//!         tracing::warn!(error = %err, "Will retry on next tick");
//!     } else {
//!         tracing::error!(error = %err, category = ?err.category(), "Giving up");
//!     }
//! }
//! ```

use std::io;
use thiserror::Error;

pub use crate::scheduler::error::SchedulerError;

/// Common trait for all roundsmith error types
pub trait RoundsmithErrorTrait: std::error::Error {
    /// Check if this error is recoverable (a later attempt may succeed)
    fn is_recoverable(&self) -> bool;

    /// Get the error category for handling strategies
    fn category(&self) -> ErrorCategory;
}

/// Classification of errors for handling strategies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Store, database or file temporarily unavailable
    TransientIo,
    /// Bad file name, unparsable payload, incomplete outcome list, bad template
    MalformedInput,
    /// A bin or the staging set holds fewer candidates than required
    InsufficientSupply,
    /// Queue or store connection dropped
    ConnectionLoss,
    /// Configuration and validation errors
    Config,
    /// Scheduler and timing errors
    Scheduler,
    /// Other/unknown errors
    Other,
}

impl ErrorCategory {
    /// Short label used for metrics and log fields
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TransientIo => "transient_io",
            Self::MalformedInput => "malformed_input",
            Self::InsufficientSupply => "insufficient_supply",
            Self::ConnectionLoss => "connection_loss",
            Self::Config => "config",
            Self::Scheduler => "scheduler",
            Self::Other => "other",
        }
    }
}

/// Unified error type for the roundsmith crate
#[derive(Error, Debug)]
pub enum Error {
    /// Category store (Redis) errors
    #[error("Store error: {0}")]
    Store(String),

    /// Connection to the store or the result feed was lost
    #[error("Connection lost to {endpoint}: {reason}")]
    ConnectionLost { endpoint: String, reason: String },

    /// Database errors
    #[error("Database error: {0}")]
    Database(#[source] rusqlite::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A bin holds fewer usable candidates than its quota
    #[error("Not enough data in '{bin}': required {required}, available {available}")]
    InsufficientSupply {
        bin: String,
        required: usize,
        available: usize,
    },

    /// Quotas do not reconcile to the round size
    #[error("Quota total {actual} does not match round size {expected}")]
    QuotaMismatch { expected: usize, actual: usize },

    /// A distribution template could not be decoded
    #[error("Malformed template: {reason}")]
    MalformedTemplate { reason: String },

    /// A candidate's payloads are missing or invalid
    #[error("Malformed candidate '{key}': {reason}")]
    MalformedCandidate { key: String, reason: String },

    /// No template row exists for the requested round slot
    #[error("No distribution template for competition {competition} slot {slot}")]
    TemplateNotFound { competition: u32, slot: u32 },

    /// Result feed errors that are not connection loss
    #[error("Feed error: {0}")]
    Feed(String),

    /// Scheduler and timing errors
    #[error("Scheduler error: {0}")]
    Scheduler(#[from] SchedulerError),

    /// Configuration errors
    #[error("Config error: {0}")]
    Config(String),

    /// Generic error with context
    #[error("{context}")]
    Other {
        context: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl RoundsmithErrorTrait for Error {
    fn is_recoverable(&self) -> bool {
        match self {
            Self::Store(_) | Self::ConnectionLost { .. } | Self::Io(_) => true,
            // Supply is replenished by ingestion and categorization
            Self::InsufficientSupply { .. } => true,
            Self::Scheduler(e) => e.is_recoverable(),
            Self::Database(_)
            | Self::Json(_)
            | Self::QuotaMismatch { .. }
            | Self::MalformedTemplate { .. }
            | Self::MalformedCandidate { .. }
            | Self::TemplateNotFound { .. }
            | Self::Feed(_)
            | Self::Config(_)
            | Self::Other { .. } => false,
        }
    }

    fn category(&self) -> ErrorCategory {
        match self {
            Self::Store(_) | Self::Database(_) | Self::Io(_) => ErrorCategory::TransientIo,
            Self::ConnectionLost { .. } => ErrorCategory::ConnectionLoss,
            Self::Json(_)
            | Self::QuotaMismatch { .. }
            | Self::MalformedTemplate { .. }
            | Self::MalformedCandidate { .. } => ErrorCategory::MalformedInput,
            Self::InsufficientSupply { .. } | Self::TemplateNotFound { .. } => {
                ErrorCategory::InsufficientSupply
            }
            Self::Feed(_) => ErrorCategory::Other,
            Self::Scheduler(_) => ErrorCategory::Scheduler,
            Self::Config(_) => ErrorCategory::Config,
            Self::Other { .. } => ErrorCategory::Other,
        }
    }
}

impl Error {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a generic error with context
    pub fn other(context: impl Into<String>) -> Self {
        Self::Other {
            context: context.into(),
            source: None,
        }
    }

    /// Create a generic error with context and source
    pub fn with_source(
        context: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Other {
            context: context.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a malformed template error
    pub fn malformed_template(reason: impl Into<String>) -> Self {
        Self::MalformedTemplate {
            reason: reason.into(),
        }
    }

    /// Create a malformed candidate error
    pub fn malformed_candidate(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MalformedCandidate {
            key: key.into(),
            reason: reason.into(),
        }
    }

    /// Whether this error means a bin ran dry
    pub fn is_insufficient_supply(&self) -> bool {
        matches!(self, Self::InsufficientSupply { .. })
    }
}

// Conversion from rusqlite::Error
impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Self::Database(err)
    }
}

impl From<redis::RedisError> for Error {
    fn from(err: redis::RedisError) -> Self {
        if err.is_connection_dropped() || err.is_connection_refusal() {
            Self::ConnectionLost {
                endpoint: "redis".to_string(),
                reason: err.to_string(),
            }
        } else {
            Self::Store(err.to_string())
        }
    }
}

impl From<deadpool_redis::PoolError> for Error {
    fn from(err: deadpool_redis::PoolError) -> Self {
        Self::Store(format!("connection pool: {err}"))
    }
}

// Conversion from anyhow::Error
impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Self::Other {
            context: err.to_string(),
            source: None,
        }
    }
}

/// Result type alias using the unified Error type
pub type Result<T> = std::result::Result<T, Error>;
