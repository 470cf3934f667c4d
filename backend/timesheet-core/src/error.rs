// src/error.rs

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Retry classification attached to every remote failure before it leaves
/// the fetcher or the batch executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorClass {
    /// Timeout, rate limit, 5xx, connection reset. Worth retrying.
    Transient,
    /// Auth failure, not found, malformed input. Never retried.
    Permanent,
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorClass::Transient => write!(f, "transient"),
            ErrorClass::Permanent => write!(f, "permanent"),
        }
    }
}

// --- Remote service errors ---
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ServiceError {
    #[error("Request timed out after {timeout_secs}s: {context}")]
    Timeout { context: String, timeout_secs: u64 },

    #[error("Rate limit exceeded (Status 429)")]
    RateLimitExceeded,

    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Authentication rejected by the timesheet service (Status {status})")]
    Unauthorized { status: u16 },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Malformed payload: {0}")]
    Malformed(String),

    // Use this for status codes without a dedicated variant
    #[error("Timesheet API error: Status={status}, Message='{message}'")]
    Api { status: u16, message: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Cancelled: {context}")]
    Cancelled { context: String },
}

impl ServiceError {
    pub fn class(&self) -> ErrorClass {
        match self {
            ServiceError::Timeout { .. }
            | ServiceError::RateLimitExceeded
            | ServiceError::Connection(_) => ErrorClass::Transient,
            ServiceError::Api { status, .. } if *status >= 500 => ErrorClass::Transient,
            ServiceError::Api { .. }
            | ServiceError::Unauthorized { .. }
            | ServiceError::NotFound(_)
            | ServiceError::Malformed(_)
            | ServiceError::Config(_)
            | ServiceError::Cancelled { .. } => ErrorClass::Permanent,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, ServiceError::Cancelled { .. })
    }

    pub fn is_transient(&self) -> bool {
        self.class() == ErrorClass::Transient
    }

    /// Maps an HTTP status + body message onto the taxonomy.
    pub fn from_status(status: u16, message: String) -> Self {
        match status {
            401 | 403 => ServiceError::Unauthorized { status },
            404 => ServiceError::NotFound(message),
            429 => ServiceError::RateLimitExceeded,
            _ => ServiceError::Api { status, message },
        }
    }

    /// Short reason text recorded on failed batch operations.
    pub fn reason(&self) -> String {
        match self {
            ServiceError::NotFound(msg) if !msg.is_empty() => msg.clone(),
            ServiceError::NotFound(_) => "not found".to_string(),
            other => other.to_string(),
        }
    }
}

impl From<reqwest::Error> for ServiceError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ServiceError::Timeout {
                context: e.url().map(|u| u.to_string()).unwrap_or_default(),
                timeout_secs: 0,
            }
        } else if e.is_decode() {
            ServiceError::Malformed(e.to_string())
        } else if let Some(status) = e.status() {
            ServiceError::from_status(status.as_u16(), e.to_string())
        } else if e.is_builder() {
            ServiceError::Config(e.to_string())
        } else {
            ServiceError::Connection(e.to_string())
        }
    }
}

impl From<serde_json::Error> for ServiceError {
    fn from(e: serde_json::Error) -> Self {
        ServiceError::Malformed(e.to_string())
    }
}

impl From<url::ParseError> for ServiceError {
    fn from(e: url::ParseError) -> Self {
        ServiceError::Config(format!("invalid URL: {}", e))
    }
}

// --- Pure evaluation errors (invariant violations, never retried) ---
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EvaluationError {
    #[error("Invalid period: start {start} is after end {end}")]
    InvalidPeriod { start: NaiveDate, end: NaiveDate },

    #[error("Unrecognised period '{0}' (expected YYYY-MM, YYYY-Www or YYYY-MM-DD..YYYY-MM-DD)")]
    UnparseablePeriod(String),

    #[error("Period {period} appears more than once for user {user_id}")]
    DuplicatePeriod { user_id: String, period: String },

    #[error("System Error: Date calculation overflow occurred")]
    DateOverflow,
}

// --- Checkpoint store errors ---
#[derive(Error, Debug)]
pub enum CheckpointError {
    #[error("Checkpoint I/O error: {context}")]
    Io {
        #[source]
        source: std::io::Error,
        context: String,
    },

    #[error("Corrupt checkpoint record in batch {batch_id}: {detail}")]
    Corrupt { batch_id: String, detail: String },

    #[error("Record for operation {operation_id} is not terminal")]
    NotTerminal { operation_id: String },
}

// Helper to create context-aware IO errors
pub(crate) fn io_context<S: Into<String>>(source: std::io::Error, context: S) -> CheckpointError {
    CheckpointError::Io {
        source,
        context: context.into(),
    }
}

// --- Batch infrastructure errors (a single failed item is never one of these) ---
#[derive(Error, Debug)]
pub enum BatchError {
    #[error("Failed to load checkpoint for batch {batch_id}")]
    CheckpointLoad {
        batch_id: String,
        #[source]
        source: CheckpointError,
    },

    #[error("Failed to record operation {operation_id} in checkpoint for batch {batch_id}")]
    CheckpointWrite {
        batch_id: String,
        operation_id: String,
        #[source]
        source: CheckpointError,
    },

    #[error("Concurrency limit must be at least 1")]
    InvalidConcurrency,

    #[error("Batch worker task failed: {0}")]
    Worker(String),
}

// --- Configuration errors ---
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read configuration from environment: {0}")]
    Env(#[from] envy::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

// --- Facade error ---
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Timesheet service error: {0}")]
    Service(#[from] ServiceError),

    #[error("Evaluation error: {0}")]
    Evaluation(#[from] EvaluationError),

    #[error("Batch error: {0}")]
    Batch(#[from] BatchError),

    #[error("Checkpoint error: {0}")]
    Checkpoint(#[from] CheckpointError),
}

impl EngineError {
    /// Classification for callers deciding whether to retry the whole request.
    pub fn class(&self) -> ErrorClass {
        match self {
            EngineError::Service(e) => e.class(),
            EngineError::Evaluation(_) | EngineError::Batch(_) | EngineError::Checkpoint(_) => {
                ErrorClass::Permanent
            }
        }
    }
}
