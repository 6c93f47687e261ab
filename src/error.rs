use std::path::PathBuf;

use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum ExportError {
    #[error("invalid export request: {0}")]
    InvalidRequest(String),

    #[error("invalid export format: {0}")]
    InvalidFormat(String),

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("search request failed after {attempts} attempts: {message}")]
    FetchFailure { attempts: usize, message: String },

    #[error("malformed search response: {0}")]
    MalformedResponse(String),

    #[error("record enrichment failed: {0}")]
    EnrichmentFailure(String),

    #[error("sequence extraction failed: {0}")]
    ExtractionFailure(String),

    #[error("job cancelled")]
    Cancelled,

    #[error("filesystem error: {0}")]
    Filesystem(String),

    #[error("export worker crashed: {0}")]
    WorkerPanic(String),

    #[error("job not found: {0}")]
    JobNotFound(String),

    #[error("job {0} has no result yet")]
    ResultNotReady(String),
}

/// Failure classification recorded on a FAILED job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureKind {
    InvalidRequest,
    FetchFailure,
    MalformedResponse,
    EnrichmentFailure,
    ExtractionFailure,
    Cancelled,
    Filesystem,
    Internal,
}

impl ExportError {
    pub fn kind(&self) -> FailureKind {
        match self {
            ExportError::InvalidRequest(_)
            | ExportError::InvalidFormat(_)
            | ExportError::ConfigRead(_)
            | ExportError::ConfigParse(_)
            | ExportError::JobNotFound(_)
            | ExportError::ResultNotReady(_) => FailureKind::InvalidRequest,
            ExportError::FetchFailure { .. } => FailureKind::FetchFailure,
            ExportError::MalformedResponse(_) => FailureKind::MalformedResponse,
            ExportError::EnrichmentFailure(_) => FailureKind::EnrichmentFailure,
            ExportError::ExtractionFailure(_) => FailureKind::ExtractionFailure,
            ExportError::Cancelled => FailureKind::Cancelled,
            ExportError::Filesystem(_) => FailureKind::Filesystem,
            ExportError::WorkerPanic(_) => FailureKind::Internal,
        }
    }
}

impl From<std::io::Error> for ExportError {
    fn from(err: std::io::Error) -> Self {
        ExportError::Filesystem(err.to_string())
    }
}
