//! Question-time retrieval over a persisted index.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::document::RetrievalResult;
use crate::embedding::EmbeddingProvider;
use crate::error::{RagError, Result};
use crate::index::{ExpectedEmbedding, IndexStore};
use crate::timeout::with_timeout;

/// Number of chunks retrieved when the caller does not say otherwise.
pub const DEFAULT_TOP_K: usize = 4;

/// Finds the chunks of a persisted index most similar to a question.
pub struct Retriever {
    embedder: Arc<dyn EmbeddingProvider>,
    store: Arc<IndexStore>,
    timeout: Duration,
}

impl Retriever {
    /// Create a retriever embedding questions with `embedder`.
    ///
    /// The embedder must be the one the index was built with.
    pub fn new(embedder: Arc<dyn EmbeddingProvider>, store: Arc<IndexStore>, timeout: Duration) -> Self {
        Self { embedder, store, timeout }
    }

    /// Retrieve the `k` chunks at `location` most similar to `question`.
    ///
    /// The index is loaded before the question is embedded, so a missing
    /// index is reported without spending an embedding call.
    ///
    /// # Errors
    ///
    /// - [`RagError::IndexNotFound`] if no index was built at `location`
    /// - [`RagError::IndexCorrupted`] if the stored index is unreadable
    /// - [`RagError::DimensionMismatch`] / [`RagError::EmbeddingModelMismatch`] if
    ///   the index was built with another embedder
    /// - [`RagError::EmbeddingUnavailable`] if embedding the question fails
    pub async fn retrieve(&self, question: &str, location: &Path, k: usize) -> Result<RetrievalResult> {
        let index =
            self.store.load(location, Some(ExpectedEmbedding::of(self.embedder.as_ref()))).await?;

        let model = self.embedder.model_name();
        let limit = self.timeout;
        let query = with_timeout(limit, self.embedder.embed(question), || {
            RagError::EmbeddingUnavailable {
                provider: model.to_string(),
                message: format!("no response within {}s", limit.as_secs()),
            }
        })
        .await?;

        let result = index.search(&query, k)?;
        debug!(
            location = %location.display(),
            requested = k,
            retrieved = result.len(),
            top_score = result.iter().next().map(|r| r.score),
            "retrieved context"
        );
        Ok(result)
    }
}
