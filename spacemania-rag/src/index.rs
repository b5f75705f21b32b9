//! The persisted vector index.
//!
//! A [`VectorIndex`] is an ordered list of `(text, vector)` entries plus the
//! metadata needed to reject incompatible queries. [`IndexStore`] saves and
//! loads indexes as a single `index.json` file inside a location directory.
//! Saves go through a temporary file in the same directory followed by a
//! rename, so readers see either the previous index or the new one.

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::{StreamExt, TryStreamExt};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::document::{Chunk, RetrievalResult, SearchResult};
use crate::embedding::EmbeddingProvider;
use crate::error::{RagError, Result};
use crate::timeout::with_timeout;

/// Name of the index file inside a location directory.
pub const INDEX_FILE_NAME: &str = "index.json";

/// Version of the on-disk layout written by this crate.
pub const INDEX_FORMAT_VERSION: u32 = 1;

/// One stored chunk and its embedding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexEntry {
    /// The chunk text returned by searches.
    pub text: String,
    /// The embedding of `text`.
    pub vector: Vec<f32>,
}

/// How chunk embedding is batched and bounded during a build.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EmbedOptions {
    /// Chunk texts per embedding request.
    pub batch_size: usize,
    /// Requests in flight at once.
    pub concurrency: usize,
    /// Upper bound on each request.
    pub timeout: Duration,
}

impl Default for EmbedOptions {
    fn default() -> Self {
        Self { batch_size: 32, concurrency: 4, timeout: Duration::from_secs(60) }
    }
}

/// The embedder an index must have been built with to be searchable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExpectedEmbedding<'a> {
    /// Model name recorded in the index.
    pub model: &'a str,
    /// Vector length.
    pub dimension: usize,
}

impl<'a> ExpectedEmbedding<'a> {
    /// The model and dimension of `embedder`.
    pub fn of(embedder: &'a dyn EmbeddingProvider) -> Self {
        Self { model: embedder.model_name(), dimension: embedder.dimensions() }
    }
}

/// An immutable similarity index over chunk embeddings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorIndex {
    /// On-disk layout version.
    pub format_version: u32,
    /// Model that produced every vector in the index.
    pub embedding_model: String,
    /// Length of every vector in the index.
    pub dimension: usize,
    /// When the index was built.
    pub created_at: DateTime<Utc>,
    /// Entries in insertion (chunk) order.
    pub entries: Vec<IndexEntry>,
}

impl VectorIndex {
    /// Embed `chunks` with `embedder` and index them in chunk order.
    ///
    /// Up to `options.concurrency` batches are embedded at once; results are
    /// reassembled in input order.
    ///
    /// # Errors
    ///
    /// - [`RagError::EmptyChunkSet`] if `chunks` is empty (no embedding call is made)
    /// - [`RagError::EmbeddingUnavailable`] if any request fails or times out
    /// - [`RagError::DimensionMismatch`] if a returned vector has the wrong length
    pub async fn build(
        chunks: &[Chunk],
        embedder: &dyn EmbeddingProvider,
        options: EmbedOptions,
    ) -> Result<Self> {
        if chunks.is_empty() {
            return Err(RagError::EmptyChunkSet);
        }

        let dimension = embedder.dimensions();
        let batch_size = options.batch_size.max(1);
        let model = embedder.model_name().to_string();

        let batches: Vec<Vec<f32>> = futures::stream::iter(chunks.chunks(batch_size))
            .map(|batch| embed_batch(embedder, batch, options.timeout, dimension))
            .buffered(options.concurrency.max(1))
            .try_collect::<Vec<Vec<Vec<f32>>>>()
            .await?
            .into_iter()
            .flatten()
            .collect();

        let entries = chunks
            .iter()
            .zip(batches)
            .map(|(chunk, vector)| IndexEntry { text: chunk.text.clone(), vector })
            .collect::<Vec<_>>();

        debug!(entries = entries.len(), dimension, model = %model, "built vector index");

        Ok(Self {
            format_version: INDEX_FORMAT_VERSION,
            embedding_model: model,
            dimension,
            created_at: Utc::now(),
            entries,
        })
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the index has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Return the `k` entries most similar to `query`.
    ///
    /// Results are in non-increasing score order with ties broken by
    /// insertion order. `k` is clamped to the index size.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::DimensionMismatch`] if `query` has the wrong length.
    pub fn search(&self, query: &[f32], k: usize) -> Result<RetrievalResult> {
        if query.len() != self.dimension {
            return Err(RagError::DimensionMismatch {
                expected: self.dimension,
                actual: query.len(),
            });
        }
        if k == 0 {
            return Ok(RetrievalResult::default());
        }

        let mut scored: Vec<(usize, f32)> = self
            .entries
            .iter()
            .enumerate()
            .map(|(position, entry)| {
                let score = cosine_similarity(&entry.vector, query);
                (position, if score.is_nan() { f32::NEG_INFINITY } else { score })
            })
            .collect();

        // Stable sort keeps insertion order among equal scores.
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);

        let results = scored
            .into_iter()
            .map(|(position, score)| SearchResult {
                position,
                text: self.entries[position].text.clone(),
                score,
            })
            .collect();
        Ok(RetrievalResult { results })
    }

    /// Check that every stored vector matches the header dimension.
    fn validate(&self) -> Result<()> {
        match self.entries.iter().find(|e| e.vector.len() != self.dimension) {
            Some(entry) => Err(RagError::DimensionMismatch {
                expected: self.dimension,
                actual: entry.vector.len(),
            }),
            None => Ok(()),
        }
    }
}

async fn embed_batch(
    embedder: &dyn EmbeddingProvider,
    batch: &[Chunk],
    timeout: Duration,
    dimension: usize,
) -> Result<Vec<Vec<f32>>> {
    let texts: Vec<&str> = batch.iter().map(|c| c.text.as_str()).collect();
    let model = embedder.model_name();

    let vectors = with_timeout(timeout, embedder.embed_batch(&texts), || {
        RagError::EmbeddingUnavailable {
            provider: model.to_string(),
            message: format!("no response within {}s", timeout.as_secs()),
        }
    })
    .await?;

    if vectors.len() != texts.len() {
        return Err(RagError::EmbeddingUnavailable {
            provider: model.to_string(),
            message: format!("expected {} vectors, received {}", texts.len(), vectors.len()),
        });
    }
    if let Some(bad) = vectors.iter().find(|v| v.len() != dimension) {
        return Err(RagError::DimensionMismatch { expected: dimension, actual: bad.len() });
    }
    Ok(vectors)
}

/// Compute cosine similarity between two vectors.
///
/// Returns 0.0 if either vector has zero magnitude.
fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

/// Saves and loads [`VectorIndex`] files.
///
/// Writers to the same location are serialised within the process; readers
/// never take a lock.
#[derive(Debug, Default)]
pub struct IndexStore {
    write_locks: Mutex<HashMap<PathBuf, Arc<tokio::sync::Mutex<()>>>>,
}

impl IndexStore {
    /// Create a new store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Path of the index file for `location`.
    pub fn index_path(location: &Path) -> PathBuf {
        location.join(INDEX_FILE_NAME)
    }

    fn write_lock(&self, location: &Path) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.write_locks.lock().unwrap_or_else(|e| e.into_inner());
        locks.entry(location.to_path_buf()).or_default().clone()
    }

    /// Forget the lock for `location` once no other writer holds it.
    fn release_write_lock(&self, location: &Path, lock: Arc<tokio::sync::Mutex<()>>) {
        drop(lock);
        let mut locks = self.write_locks.lock().unwrap_or_else(|e| e.into_inner());
        if locks.get(location).is_some_and(|l| Arc::strong_count(l) == 1) {
            locks.remove(location);
        }
    }

    /// Atomically replace the index at `location` with `index`.
    ///
    /// The directory is created if needed.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::Io`] if the directory or file cannot be written.
    pub async fn persist(&self, index: &VectorIndex, location: &Path) -> Result<PathBuf> {
        let lock = self.write_lock(location);
        let written = {
            let _guard = lock.lock().await;
            Self::write(index, location).await
        };
        self.release_write_lock(location, lock);

        let written = written?;
        info!(path = %written.display(), entries = index.len(), "persisted vector index");
        Ok(written)
    }

    async fn write(index: &VectorIndex, location: &Path) -> Result<PathBuf> {
        let payload = serde_json::to_vec(index).map_err(|e| RagError::Io {
            path: location.to_path_buf(),
            source: std::io::Error::other(e),
        })?;

        let location = location.to_path_buf();
        let target = Self::index_path(&location);
        let written = target.clone();
        tokio::task::spawn_blocking(move || write_atomically(&location, &target, &payload))
            .await
            .map_err(|e| RagError::Io {
                path: written.clone(),
                source: std::io::Error::other(e),
            })??;
        Ok(written)
    }

    /// Load the index saved at `location`.
    ///
    /// When `expected` is given, an index built by another embedding model or
    /// with another dimension is rejected.
    ///
    /// # Errors
    ///
    /// - [`RagError::IndexNotFound`] if nothing was persisted at `location`
    /// - [`RagError::IndexCorrupted`] if the file cannot be parsed, has an
    ///   unknown format version, or holds no entries
    /// - [`RagError::DimensionMismatch`] if vectors disagree with the header
    ///   or with `expected`
    /// - [`RagError::EmbeddingModelMismatch`] if `expected` names another model
    pub async fn load(
        &self,
        location: &Path,
        expected: Option<ExpectedEmbedding<'_>>,
    ) -> Result<VectorIndex> {
        let path = Self::index_path(location);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(RagError::IndexNotFound { location: location.to_path_buf() });
            }
            Err(source) => return Err(RagError::Io { path, source }),
        };

        let corrupted = |message: String| RagError::IndexCorrupted {
            location: location.to_path_buf(),
            message,
        };

        let index: VectorIndex =
            serde_json::from_slice(&bytes).map_err(|e| corrupted(e.to_string()))?;
        if index.format_version != INDEX_FORMAT_VERSION {
            return Err(corrupted(format!(
                "unsupported format version {} (expected {INDEX_FORMAT_VERSION})",
                index.format_version
            )));
        }
        if index.is_empty() {
            return Err(corrupted("index holds no entries".to_string()));
        }
        index.validate()?;

        if let Some(expected) = expected {
            if expected.dimension != index.dimension {
                return Err(RagError::DimensionMismatch {
                    expected: expected.dimension,
                    actual: index.dimension,
                });
            }
            if expected.model != index.embedding_model {
                return Err(RagError::EmbeddingModelMismatch {
                    expected: expected.model.to_string(),
                    actual: index.embedding_model.clone(),
                });
            }
        }

        debug!(path = %path.display(), entries = index.len(), "loaded vector index");
        Ok(index)
    }
}

fn write_atomically(location: &Path, target: &Path, payload: &[u8]) -> Result<()> {
    let io_err = |path: &Path| {
        let path = path.to_path_buf();
        move |source| RagError::Io { path, source }
    };

    std::fs::create_dir_all(location).map_err(io_err(location))?;
    let mut file = tempfile::NamedTempFile::new_in(location).map_err(io_err(location))?;
    file.write_all(payload).map_err(io_err(file.path()))?;
    file.as_file().sync_all().map_err(io_err(file.path()))?;
    file.persist(target).map_err(|e| RagError::Io { path: target.to_path_buf(), source: e.error })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockEmbeddingProvider;

    fn chunk(index: usize, text: &str) -> Chunk {
        Chunk { index, text: text.to_string(), start: 0, end: text.len() }
    }

    fn index_of(vectors: Vec<Vec<f32>>) -> VectorIndex {
        VectorIndex {
            format_version: INDEX_FORMAT_VERSION,
            embedding_model: "test".into(),
            dimension: vectors[0].len(),
            created_at: Utc::now(),
            entries: vectors
                .into_iter()
                .enumerate()
                .map(|(i, vector)| IndexEntry { text: format!("chunk {i}"), vector })
                .collect(),
        }
    }

    #[tokio::test]
    async fn empty_chunk_set_never_calls_the_embedder() {
        let embedder = MockEmbeddingProvider::new(8);
        let err = VectorIndex::build(&[], &embedder, EmbedOptions::default()).await.unwrap_err();
        assert!(matches!(err, RagError::EmptyChunkSet));
        assert_eq!(embedder.calls(), 0);
    }

    #[tokio::test]
    async fn build_preserves_chunk_order_across_batches() {
        let embedder = MockEmbeddingProvider::new(16);
        let chunks: Vec<Chunk> = (0..10).map(|i| chunk(i, &format!("text number {i}"))).collect();
        let options = EmbedOptions { batch_size: 3, concurrency: 4, ..Default::default() };
        let index = VectorIndex::build(&chunks, &embedder, options).await.unwrap();
        assert_eq!(embedder.calls(), 4);
        let texts: Vec<&str> = index.entries.iter().map(|e| e.text.as_str()).collect();
        let expected: Vec<String> = (0..10).map(|i| format!("text number {i}")).collect();
        assert_eq!(texts, expected);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_embedder_times_out() {
        let embedder = MockEmbeddingProvider::new(8).with_latency(Duration::from_secs(120));
        let options = EmbedOptions { timeout: Duration::from_secs(60), ..Default::default() };
        let err = VectorIndex::build(&[chunk(0, "fuel")], &embedder, options).await.unwrap_err();
        assert!(matches!(err, RagError::EmbeddingUnavailable { .. }));
    }

    #[test]
    fn search_orders_by_score_then_position() {
        let index = index_of(vec![vec![0.0, 1.0], vec![1.0, 0.0], vec![1.0, 0.0], vec![0.7, 0.7]]);
        let result = index.search(&[1.0, 0.0], 3).unwrap();
        let positions: Vec<usize> = result.iter().map(|r| r.position).collect();
        assert_eq!(positions, vec![1, 2, 3]);
    }

    #[test]
    fn search_clamps_k_and_handles_zero() {
        let index = index_of(vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
        assert_eq!(index.search(&[1.0, 0.0], 10).unwrap().len(), 2);
        assert!(index.search(&[1.0, 0.0], 0).unwrap().is_empty());
    }

    #[test]
    fn search_rejects_wrong_query_dimension() {
        let index = index_of(vec![vec![1.0, 0.0]]);
        let err = index.search(&[1.0, 0.0, 0.0], 1).unwrap_err();
        assert!(matches!(err, RagError::DimensionMismatch { expected: 2, actual: 3 }));
    }

    #[tokio::test]
    async fn persist_then_load_returns_the_same_index() {
        let dir = tempfile::tempdir().unwrap();
        let store = IndexStore::new();
        let index = index_of(vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
        let path = store.persist(&index, dir.path()).await.unwrap();
        assert_eq!(path, dir.path().join(INDEX_FILE_NAME));
        let expected = ExpectedEmbedding { model: "test", dimension: 2 };
        let loaded = store.load(dir.path(), Some(expected)).await.unwrap();
        assert_eq!(loaded, index);
    }

    #[tokio::test]
    async fn persist_leaves_no_temporary_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = IndexStore::new();
        store.persist(&index_of(vec![vec![1.0]]), dir.path()).await.unwrap();
        store.persist(&index_of(vec![vec![0.5]]), dir.path()).await.unwrap();
        let names: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        assert_eq!(names, vec![INDEX_FILE_NAME.to_string()]);
    }

    #[tokio::test]
    async fn missing_index_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let err = IndexStore::new().load(&dir.path().join("nothing"), None).await.unwrap_err();
        assert!(matches!(err, RagError::IndexNotFound { .. }));
    }

    #[tokio::test]
    async fn garbage_file_is_corrupted() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(INDEX_FILE_NAME), b"{ not json").unwrap();
        let err = IndexStore::new().load(dir.path(), None).await.unwrap_err();
        assert!(matches!(err, RagError::IndexCorrupted { .. }));
    }

    #[tokio::test]
    async fn expected_dimension_is_enforced_on_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = IndexStore::new();
        store.persist(&index_of(vec![vec![1.0, 0.0]]), dir.path()).await.unwrap();
        let expected = ExpectedEmbedding { model: "test", dimension: 768 };
        let err = store.load(dir.path(), Some(expected)).await.unwrap_err();
        assert!(matches!(err, RagError::DimensionMismatch { expected: 768, actual: 2 }));
    }

    #[tokio::test]
    async fn index_from_another_embedding_model_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = IndexStore::new();
        store.persist(&index_of(vec![vec![1.0, 0.0]]), dir.path()).await.unwrap();

        let expected = ExpectedEmbedding { model: "models/embedding-001", dimension: 2 };
        let err = store.load(dir.path(), Some(expected)).await.unwrap_err();
        assert!(matches!(
            err,
            RagError::EmbeddingModelMismatch { ref expected, ref actual }
                if expected == "models/embedding-001" && actual == "test"
        ));
        assert_eq!(err.remediation(), "the index was built with a different embedding model; rebuild it");
    }

    #[tokio::test]
    async fn write_locks_are_released_after_persisting() {
        let store = IndexStore::new();
        let dirs: Vec<_> = (0..3).map(|_| tempfile::tempdir().unwrap()).collect();
        for dir in &dirs {
            store.persist(&index_of(vec![vec![1.0]]), dir.path()).await.unwrap();
        }
        assert!(store.write_locks.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn a_held_write_lock_is_kept() {
        let dir = tempfile::tempdir().unwrap();
        let store = IndexStore::new();
        let held = store.write_lock(dir.path());

        store.persist(&index_of(vec![vec![1.0]]), dir.path()).await.unwrap();
        assert!(store.write_locks.lock().unwrap().contains_key(dir.path()));
        drop(held);
    }
}
