//! Data types for uploaded documents, chunks, and retrieval results.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{RagError, Result};

/// A document as received at the upload boundary: a file name and its bytes.
///
/// Consumed once during extraction and not retained afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedDocument {
    /// The original file name, used to pick an extractor by extension.
    pub file_name: String,
    /// The raw file content.
    pub bytes: Vec<u8>,
}

impl UploadedDocument {
    /// Create a document from a file name and its content.
    pub fn new(file_name: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        Self { file_name: file_name.into(), bytes: bytes.into() }
    }

    /// Read a document from the local filesystem.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::Io`] if the file cannot be read.
    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|source| RagError::Io { path: path.to_path_buf(), source })?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Ok(Self { file_name, bytes })
    }

    /// The lower-cased file extension, if any.
    pub fn extension(&self) -> Option<String> {
        Path::new(&self.file_name)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
    }
}

/// A bounded segment of the raw text of one build.
///
/// `start..end` is the byte range the chunk covers in the raw text; the
/// region shared with the previous chunk is `start..previous.end`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Chunk {
    /// Position of the chunk in the chunk sequence.
    pub index: usize,
    /// The text content of the chunk.
    pub text: String,
    /// Byte offset of the first character in the raw text.
    pub start: usize,
    /// Byte offset one past the last character in the raw text.
    pub end: usize,
}

impl Chunk {
    /// Length of the chunk in characters.
    pub fn char_len(&self) -> usize {
        self.text.chars().count()
    }
}

/// A retrieved chunk paired with its similarity score.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchResult {
    /// Insertion position of the chunk in the index.
    pub position: usize,
    /// The chunk text.
    pub text: String,
    /// Cosine similarity to the query (higher is more relevant).
    pub score: f32,
}

/// The chunks retrieved for one question, most similar first.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RetrievalResult {
    /// Results in non-increasing score order.
    pub results: Vec<SearchResult>,
}

impl RetrievalResult {
    /// Number of retrieved chunks.
    pub fn len(&self) -> usize {
        self.results.len()
    }

    /// Whether nothing was retrieved.
    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    /// The retrieved chunk texts, in ranking order.
    pub fn texts(&self) -> Vec<String> {
        self.results.iter().map(|r| r.text.clone()).collect()
    }

    /// Iterate over the results in ranking order.
    pub fn iter(&self) -> std::slice::Iter<'_, SearchResult> {
        self.results.iter()
    }
}

impl IntoIterator for RetrievalResult {
    type Item = SearchResult;
    type IntoIter = std::vec::IntoIter<SearchResult>;

    fn into_iter(self) -> Self::IntoIter {
        self.results.into_iter()
    }
}
