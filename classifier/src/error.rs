//! Error taxonomy for the classification pipeline.
//!
//! Only [`ClassifyError`] crosses the orchestrator boundary. Everything in
//! [`AttemptError`] is absorbed inside the lock and turned into a fallback.

use std::time::Duration;

use thiserror::Error;

/// Transient-failure markers; matched against the lower-cased message.
const TRANSIENT_MARKERS: &[&str] = &["rate limit", "429", "timeout", "temporarily"];

/// A result value would violate its invariants.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("Confidence must be between 0.0 and 1.0, got {0}")]
    ConfidenceOutOfRange(f64),

    #[error("Invalid category: {0}")]
    UnknownCategory(String),
}

/// Model output could not be decoded.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("Malformed JSON: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("Expected a JSON object, got {0}")]
    NotAnObject(&'static str),

    #[error("Field `{field}` must be {expected}")]
    FieldType {
        field: &'static str,
        expected: &'static str,
    },
}

/// Language-model API failure.
#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("API request failed: {0}")]
    Transport(String),

    #[error("API error ({status}): {body}")]
    Api { status: u16, body: String },

    #[error("API key not configured")]
    MissingApiKey,

    #[error("Response contained no message content")]
    EmptyResponse,

    #[error("Response parse error: {0}")]
    Decode(String),
}

impl UpstreamError {
    /// Whether the failure looks transient and is worth retrying.
    pub fn is_transient(&self) -> bool {
        is_transient_message(&self.to_string())
    }
}

/// Message-based transient classification shared by every upstream error.
pub fn is_transient_message(message: &str) -> bool {
    let lower = message.to_lowercase();
    TRANSIENT_MARKERS.iter().any(|m| lower.contains(m))
}

/// Why a single live classification attempt produced no usable result.
#[derive(Debug, Error)]
pub enum AttemptError {
    #[error(transparent)]
    Upstream(#[from] UpstreamError),

    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// The attempt ran past the part of the lock lease reserved for it.
    #[error("Classification attempt exceeded its {0:?} lease budget")]
    LeaseBudget(Duration),
}

impl AttemptError {
    /// Short label for log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Upstream(_) => "upstream",
            Self::Parse(_) => "parse",
            Self::Validation(_) => "validation",
            Self::LeaseBudget(_) => "lease_budget",
        }
    }
}

/// Failures of the external cache store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Cache backend error: {0}")]
    Backend(String),
}

/// Failures of the distributed lock provider.
#[derive(Debug, Error)]
pub enum LockError {
    #[error("Lock `{key}` not acquired within {waited:?}")]
    Timeout { key: String, waited: Duration },

    #[error("Lock backend error: {0}")]
    Backend(String),
}

/// The only error `classify()` returns.
#[derive(Debug, Error)]
pub enum ClassifyError {
    /// Another caller holds the ticket's lock past the bounded wait.
    #[error("Classification contention: {0}")]
    Contention(#[from] LockError),
}
