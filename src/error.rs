//! Error types for the ledger core.
//!
//! Defines the error enum used throughout the pipeline. Every variant maps to
//! the stage it originates from so the conversational layer can decide whether
//! to re-prompt, apologize, or ask the user to retry later.

use chrono::NaiveDate;
use serde::Serialize;
use std::fmt;
use thiserror::Error;

use crate::safety::ValidationRule;

/// Pipeline stage a failure originated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Gateway,
    Resolve,
    Validate,
    Execute,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Gateway => write!(f, "gateway"),
            Self::Resolve => write!(f, "resolve"),
            Self::Validate => write!(f, "validate"),
            Self::Execute => write!(f, "execute"),
        }
    }
}

/// Main error type for ledger operations.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LedgerError {
    /// Date phrase outside the supported vocabulary.
    #[error("Ambiguous date: '{0}' is not a recognized date expression")]
    AmbiguousDate(String),

    /// Explicit date range whose start lies after its end.
    #[error("Invalid date range: start {start} is after end {end}")]
    InvalidRange { start: NaiveDate, end: NaiveDate },

    /// SQL rejected by the validator.
    #[error("Validation error: {0}")]
    Validation(ValidationRule),

    /// Declared operation kind does not match the SQL shape.
    #[error("Schema mismatch: {0}")]
    SchemaMismatch(String),

    /// Store-level failure. `retryable` marks failures that were transient in
    /// nature; once surfaced, the executor has already exhausted its retries.
    #[error("Execution error: {message}")]
    Execution { retryable: bool, message: String },

    /// Caller is not on the gateway allow-list.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Configuration errors (invalid config file, missing required fields, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal errors (unexpected states, bugs, etc.)
    #[error("Internal error: {0}")]
    Internal(String),
}

impl LedgerError {
    /// Creates an ambiguous-date error for the given phrase.
    pub fn ambiguous_date(phrase: impl Into<String>) -> Self {
        Self::AmbiguousDate(phrase.into())
    }

    /// Creates a transient execution error.
    pub fn transient(msg: impl Into<String>) -> Self {
        Self::Execution {
            retryable: true,
            message: msg.into(),
        }
    }

    /// Creates a fatal execution error.
    pub fn fatal(msg: impl Into<String>) -> Self {
        Self::Execution {
            retryable: false,
            message: msg.into(),
        }
    }

    /// Creates an unauthorized error for the given caller.
    pub fn unauthorized(caller: impl Into<String>) -> Self {
        Self::Unauthorized(caller.into())
    }

    /// Creates a configuration error with the given message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Creates an internal error with the given message.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Returns true if the executor may retry the failed operation.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Execution { retryable: true, .. })
    }

    /// Returns the error category as a string for display purposes.
    pub fn category(&self) -> &'static str {
        match self {
            Self::AmbiguousDate(_) => "Ambiguous Date",
            Self::InvalidRange { .. } => "Invalid Range",
            Self::Validation(_) => "Validation Error",
            Self::SchemaMismatch(_) => "Schema Mismatch",
            Self::Execution { .. } => "Execution Error",
            Self::Unauthorized(_) => "Unauthorized",
            Self::Config(_) => "Configuration Error",
            Self::Internal(_) => "Internal Error",
        }
    }

    /// Returns the machine-readable error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::AmbiguousDate(_) => "ambiguous_date",
            Self::InvalidRange { .. } => "invalid_range",
            Self::Validation(_) => "validation",
            Self::SchemaMismatch(_) => "schema_mismatch",
            Self::Execution { .. } => "execution",
            Self::Unauthorized(_) => "unauthorized",
            Self::Config(_) => "config",
            Self::Internal(_) => "internal",
        }
    }

    /// Returns the pipeline stage the error belongs to.
    pub fn stage(&self) -> Stage {
        match self {
            Self::AmbiguousDate(_) | Self::InvalidRange { .. } => Stage::Resolve,
            Self::Validation(_) | Self::SchemaMismatch(_) => Stage::Validate,
            Self::Execution { .. } => Stage::Execute,
            Self::Unauthorized(_) | Self::Config(_) | Self::Internal(_) => Stage::Gateway,
        }
    }

    /// Converts the error into the payload emitted to the reporting layer.
    pub fn to_payload(&self) -> ErrorPayload {
        ErrorPayload {
            kind: self.kind(),
            message: self.to_string(),
            stage: self.stage(),
            rule: match self {
                Self::Validation(rule) => Some(rule.code()),
                _ => None,
            },
            retryable: self.is_retryable(),
        }
    }
}

/// Structured error object returned to the caller on failure.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorPayload {
    pub kind: &'static str,
    pub message: String,
    pub stage: Stage,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rule: Option<&'static str>,
    pub retryable: bool,
}

/// Result type alias using LedgerError.
pub type Result<T> = std::result::Result<T, LedgerError>;
