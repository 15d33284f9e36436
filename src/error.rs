//! Error types for the lead reactivator.

use std::time::Duration;

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Ingestion error: {0}")]
    Ingestion(#[from] IngestionError),

    #[error("Generation error: {0}")]
    Generation(#[from] GenerationError),

    #[error("Send error: {0}")]
    Send(#[from] SendError),

    #[error("Workflow error: {0}")]
    Workflow(#[from] WorkflowError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Why a single row failed validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RowProblem {
    MissingEmail,
    InvalidEmail,
    MissingWebsite,
}

impl std::fmt::Display for RowProblem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::MissingEmail => "missing email",
            Self::InvalidEmail => "email has no '@'",
            Self::MissingWebsite => "missing website",
        };
        write!(f, "{s}")
    }
}

/// A validation problem on one ingested row.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct RowIssue {
    /// Zero-based row index in the uploaded batch.
    pub row: usize,
    pub problem: RowProblem,
}

/// Malformed or empty uploads.
#[derive(Debug, Clone, thiserror::Error)]
pub enum IngestionError {
    #[error("Batch contains no records")]
    Empty,

    #[error("{} row(s) failed validation{}", .0.len(), first_issue(.0))]
    InvalidRows(Vec<RowIssue>),
}

fn first_issue(issues: &[RowIssue]) -> String {
    issues
        .first()
        .map(|issue| format!(", first at row {}: {}", issue.row, issue.problem))
        .unwrap_or_default()
}

/// Failures from the generation backend.
#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
    #[error("Gateway {gateway} request failed: {reason}")]
    RequestFailed { gateway: String, reason: String },

    #[error("Gateway {gateway} timed out after {timeout:?}")]
    Timeout { gateway: String, timeout: Duration },

    #[error("Gateway {gateway} returned HTTP {status}")]
    BadStatus { gateway: String, status: u16 },

    #[error("Gateway {gateway} returned no content")]
    EmptyContent { gateway: String },

    #[error("Generation cancelled")]
    Cancelled,
}

/// Failures from the outbound delivery sink.
#[derive(Debug, thiserror::Error)]
pub enum SendError {
    #[error("Invalid address {address}: {reason}")]
    InvalidAddress { address: String, reason: String },

    #[error("Sink {sink} failed to deliver: {reason}")]
    DeliveryFailed { sink: String, reason: String },

    #[error("Send cancelled")]
    Cancelled,
}

/// State machine errors. Every variant leaves the workflow recoverable.
#[derive(Debug, thiserror::Error)]
pub enum WorkflowError {
    #[error("A remote call is already in flight")]
    Busy,

    #[error("Operation {operation} not allowed in step {step}")]
    InvalidStep {
        operation: &'static str,
        step: crate::workflow::Step,
    },

    #[error("Edit instructions are empty")]
    EditRejected,

    #[error("Draft is empty, nothing to edit")]
    EmptyDraft,

    #[error("No active record")]
    NoActiveRecord,

    #[error("Nothing in flight to cancel")]
    NothingInFlight,

    #[error(transparent)]
    Ingestion(#[from] IngestionError),

    #[error(transparent)]
    Generation(#[from] GenerationError),

    #[error(transparent)]
    Send(#[from] SendError),
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, Error>;
