//! Error types for the `spacemania-rag` crate.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while building an index or answering a question.
///
/// Every variant maps to a distinct remediation, so none of them is ever
/// converted into an empty or default result on the way to the caller.
#[derive(Debug, Error)]
pub enum RagError {
    /// No text could be extracted from any page of any uploaded document.
    #[error("Extraction failed: {0}")]
    ExtractionFailed(String),

    /// The chunk size / overlap combination is unusable.
    #[error("Invalid chunk parameters: {0}")]
    InvalidChunkParameters(String),

    /// An index build was requested for zero chunks.
    #[error("Cannot build an index from an empty chunk set")]
    EmptyChunkSet,

    /// The embedding provider failed (network, quota, timeout).
    #[error("Embedding unavailable ({provider}): {message}")]
    EmbeddingUnavailable {
        /// The embedding provider that produced the error.
        provider: String,
        /// A description of the failure.
        message: String,
    },

    /// Vectors of different dimensions met (index vs. provider vs. query).
    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// The dimension the index or provider requires.
        expected: usize,
        /// The dimension that was actually supplied.
        actual: usize,
    },

    /// The index was built by another embedding model than the one querying it.
    #[error("Embedding model mismatch: index built with '{actual}', queried with '{expected}'")]
    EmbeddingModelMismatch {
        /// The model of the querying embedder.
        expected: String,
        /// The model recorded in the index.
        actual: String,
    },

    /// No index has been persisted at the requested location yet.
    #[error("No index found at '{}'", location.display())]
    IndexNotFound {
        /// The storage location that was queried.
        location: PathBuf,
    },

    /// An index file exists but could not be understood.
    #[error("Index at '{}' is corrupted: {message}", location.display())]
    IndexCorrupted {
        /// The storage location holding the unreadable index.
        location: PathBuf,
        /// A description of the failure.
        message: String,
    },

    /// The generation model failed (network, quota, timeout).
    #[error("Generation unavailable ({provider}): {message}")]
    GenerationUnavailable {
        /// The generation provider that produced the error.
        provider: String,
        /// A description of the failure.
        message: String,
    },

    /// A configuration validation error.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// The interaction log could not record an answer.
    #[error("Interaction log error: {0}")]
    InteractionLogError(String),

    /// A filesystem operation on index storage failed.
    #[error("I/O error at '{}': {source}", path.display())]
    Io {
        /// The path being read or written.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

impl RagError {
    /// Whether the user can fix the condition themselves (re-upload, build
    /// an index first, retry later) rather than it being a defect.
    pub fn is_user_actionable(&self) -> bool {
        !matches!(self, RagError::Io { .. } | RagError::IndexCorrupted { .. })
    }

    /// A short hint describing what the user should do next.
    pub fn remediation(&self) -> &'static str {
        match self {
            RagError::ExtractionFailed(_) => {
                "upload documents that contain selectable (non-scanned) text"
            }
            RagError::InvalidChunkParameters(_) => {
                "use a positive chunk size with an overlap smaller than the chunk size"
            }
            RagError::EmptyChunkSet => "upload documents that contain some text",
            RagError::EmbeddingUnavailable { .. } => {
                "the embedding service is unavailable; wait and retry"
            }
            RagError::DimensionMismatch { .. } | RagError::EmbeddingModelMismatch { .. } => {
                "the index was built with a different embedding model; rebuild it"
            }
            RagError::IndexNotFound { .. } => {
                "process your documents before asking questions"
            }
            RagError::IndexCorrupted { .. } => "rebuild the index from your documents",
            RagError::GenerationUnavailable { .. } => {
                "the answer model is unavailable; wait and retry"
            }
            RagError::ConfigError(_) => "check the configuration values",
            RagError::InteractionLogError(_) => "check the interaction log destination",
            RagError::Io { .. } => "check that the index location is readable and writable",
        }
    }
}

/// A convenience result type for RAG operations.
pub type Result<T> = std::result::Result<T, RagError>;
