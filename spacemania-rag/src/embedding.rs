//! Embedding provider trait for generating vector embeddings from text.

use async_trait::async_trait;

use crate::error::Result;

/// A provider that generates vector embeddings from text input.
///
/// Implementations wrap specific embedding backends (Gemini, OpenAI, etc.)
/// behind a unified async interface. The default [`embed_batch`](EmbeddingProvider::embed_batch)
/// implementation calls [`embed`](EmbeddingProvider::embed) sequentially;
/// backends that support native batching should override it.
///
/// Chunks and questions must be embedded by the same provider and model for
/// their vectors to be comparable.
///
/// # Example
///
/// ```rust
/// use spacemania_rag::{EmbeddingProvider, MockEmbeddingProvider};
///
/// # tokio_test_block(async {
/// let provider = MockEmbeddingProvider::new(64);
/// let embedding = provider.embed("rocket fuel capacity").await?;
/// assert_eq!(embedding.len(), provider.dimensions());
/// # Ok::<(), spacemania_rag::RagError>(())
/// # });
/// # fn tokio_test_block<F: std::future::Future>(f: F) -> F::Output {
/// #     futures::executor::block_on(f)
/// # }
/// ```
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Generate an embedding vector for a single text input.
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Generate embedding vectors for a batch of text inputs.
    ///
    /// The returned vectors are in input order. The default implementation
    /// calls [`embed`](EmbeddingProvider::embed) sequentially for each input.
    /// Override this method if the backend supports native batch embedding
    /// for better throughput.
    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        let mut results = Vec::with_capacity(texts.len());
        for text in texts {
            results.push(self.embed(text).await?);
        }
        Ok(results)
    }

    /// Return the dimensionality of embeddings produced by this provider.
    fn dimensions(&self) -> usize;

    /// Identifier of the embedding model, recorded in persisted indexes.
    fn model_name(&self) -> &str;
}
