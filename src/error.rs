//! Error types for the receipt ingestion core

use thiserror::Error;

use crate::models::EngineKind;

/// Result type alias for ingestion operations
pub type Result<T> = std::result::Result<T, IngestError>;

/// Failure class reported by an extraction engine adapter.
///
/// Transient covers network faults and engine-side 5xx responses;
/// permanent covers rejected input (unsupported mime type, 4xx). The
/// fallback policy treats both the same: one attempt per engine, never more.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineErrorKind {
    Transient,
    Permanent,
}

/// Typed failure from a single engine adapter.
#[derive(Error, Debug, Clone)]
#[error("{kind:?} engine error: {message}")]
pub struct EngineError {
    pub kind: EngineErrorKind,
    pub message: String,
}

impl EngineError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            kind: EngineErrorKind::Transient,
            message: message.into(),
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            kind: EngineErrorKind::Permanent,
            message: message.into(),
        }
    }
}

/// Both extraction attempts failed, or the only attempt when the primary
/// was the offline engine and no better fallback exists.
#[derive(Debug, Clone)]
pub struct ExtractionFailure {
    pub primary_engine: EngineKind,
    pub primary: EngineError,
    pub secondary_engine: Option<EngineKind>,
    pub secondary: Option<EngineError>,
}

impl std::fmt::Display for ExtractionFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "extraction failed on {}: {}",
            self.primary_engine, self.primary.message
        )?;
        if let (Some(engine), Some(err)) = (self.secondary_engine, &self.secondary) {
            write!(f, "; fallback {} also failed: {}", engine, err.message)?;
        }
        Ok(())
    }
}

impl std::error::Error for ExtractionFailure {}

#[derive(Error, Debug)]
pub enum IngestError {

    // =============================
    // Domain Errors
    // =============================

    #[error(transparent)]
    Extraction(#[from] ExtractionFailure),

    #[error("Extraction timed out during {stage}")]
    Timeout { stage: &'static str },

    #[error("Category not found: {0}")]
    CategoryNotFound(uuid::Uuid),

    #[error("Category '{category_name}' is a {category_kind} category and cannot be used for a {requested} transaction")]
    CategoryConflict {
        category_name: String,
        category_kind: String,
        requested: String,
    },

    #[error("Receipt file move failed: {0}")]
    FileMove(String),

    #[error("Receipt file already promoted: {0}")]
    AlreadyPromoted(String),

    #[error("No valid records found in import data")]
    NoValidRecords,

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Storage error: {0}")]
    Storage(String),

    // =============================
    // External Library Conversions
    // =============================

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
