//! RAG pipeline orchestrator.
//!
//! The [`RagPipeline`] coordinates the two workflows of the system:
//!
//! - **build**: extract → chunk → embed → index → persist
//! - **ask**: retrieve → synthesize → record interaction
//!
//! Each stage runs inside its own tracing span, nested under a
//! `pipeline.build` span (field `build.id`) or a `pipeline.ask` span
//! (fields `query.id`, `user.id`). Errors keep their original
//! [`RagError`] kind; the stage that failed is recorded in the log.
//!
//! # Example
//!
//! ```rust,ignore
//! use spacemania_rag::{AskRequest, RagPipeline, UploadedDocument};
//!
//! let pipeline = RagPipeline::builder()
//!     .embedding_provider(Arc::new(embedder))
//!     .generation_model(Arc::new(model))
//!     .build()?;
//!
//! pipeline.build(&[UploadedDocument::from_path("manual.pdf").await?], "faiss_index".as_ref()).await?;
//! let response = pipeline
//!     .ask(AskRequest::new("user-1", "What is the rocket's fuel capacity?", "faiss_index"))
//!     .await?;
//! println!("Reply: {}", response.answer_text);
//! ```

use std::fmt;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio_util::task::TaskTracker;
use tracing::{Instrument, Span, error, info, info_span, warn};
use uuid::Uuid;

use crate::chunking::Chunker;
use crate::config::RagConfig;
use crate::document::UploadedDocument;
use crate::embedding::EmbeddingProvider;
use crate::error::{RagError, Result};
use crate::extract::extract_text_concurrently;
use crate::generation::{GenerationConfig, GenerationModel};
use crate::index::{EmbedOptions, IndexStore, VectorIndex};
use crate::interaction::{InteractionLog, InteractionRecord, NoopInteractionLog};
use crate::retriever::Retriever;
use crate::synthesis::{AnswerSynthesizer, NOT_AVAILABLE_SENTINEL};

/// States of the build workflow.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildStage {
    /// Nothing started yet.
    #[default]
    Idle,
    /// Reading text out of the uploaded documents.
    Extracting,
    /// Splitting the raw text into chunks.
    Chunking,
    /// Embedding chunks, assembling and persisting the index.
    EmbeddingAndIndexing,
    /// The new index is on disk.
    Persisted,
    /// A stage failed; the previous index, if any, is untouched.
    Failed,
}

impl BuildStage {
    /// Stable lower-case name, used in logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            BuildStage::Idle => "idle",
            BuildStage::Extracting => "extracting",
            BuildStage::Chunking => "chunking",
            BuildStage::EmbeddingAndIndexing => "embedding_and_indexing",
            BuildStage::Persisted => "persisted",
            BuildStage::Failed => "failed",
        }
    }

    fn span(&self) -> Span {
        match self {
            BuildStage::Extracting => info_span!("build.extracting"),
            BuildStage::Chunking => info_span!("build.chunking"),
            BuildStage::EmbeddingAndIndexing => info_span!("build.embedding_and_indexing"),
            _ => Span::current(),
        }
    }
}

impl fmt::Display for BuildStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// States of the query workflow.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryStage {
    /// Nothing started yet.
    #[default]
    Idle,
    /// Embedding the question and searching the index.
    Retrieving,
    /// Generating the grounded answer.
    Synthesizing,
    /// An answer was produced.
    Answered,
    /// A stage failed.
    Failed,
}

impl QueryStage {
    /// Stable lower-case name, used in logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryStage::Idle => "idle",
            QueryStage::Retrieving => "retrieving",
            QueryStage::Synthesizing => "synthesizing",
            QueryStage::Answered => "answered",
            QueryStage::Failed => "failed",
        }
    }

    fn span(&self) -> Span {
        match self {
            QueryStage::Retrieving => info_span!("ask.retrieving"),
            QueryStage::Synthesizing => info_span!("ask.synthesizing"),
            _ => Span::current(),
        }
    }
}

impl fmt::Display for QueryStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Summary of a successful build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildReport {
    /// Identifier of this build, also recorded on its tracing span.
    pub build_id: Uuid,
    /// Directory the index was written to.
    pub location: PathBuf,
    /// Number of uploaded documents.
    pub documents: usize,
    /// Pages whose text was read.
    pub pages_read: usize,
    /// Pages skipped as unreadable.
    pub pages_skipped: usize,
    /// Number of chunks indexed.
    pub chunk_count: usize,
    /// Embedding dimension of the index.
    pub dimension: usize,
    /// Embedding model that produced the index.
    pub embedding_model: String,
}

/// A question from one user against one index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AskRequest {
    /// Opaque user identifier, passed through to the interaction log.
    pub user_id: String,
    /// The natural-language question.
    pub question: String,
    /// Directory holding the index to query.
    pub location: PathBuf,
    /// Chunks to retrieve; the configured `top_k` when `None`.
    pub top_k: Option<usize>,
}

impl AskRequest {
    /// Create a request using the configured `top_k`.
    pub fn new(
        user_id: impl Into<String>,
        question: impl Into<String>,
        location: impl Into<PathBuf>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            question: question.into(),
            location: location.into(),
            top_k: None,
        }
    }

    /// Retrieve `k` chunks instead of the configured default.
    pub fn with_top_k(mut self, k: usize) -> Self {
        self.top_k = Some(k);
        self
    }
}

/// The answer to an [`AskRequest`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AskResponse {
    /// Identifier of this query, also recorded on its tracing span.
    pub query_id: Uuid,
    /// The answer, or exactly [`NOT_AVAILABLE_SENTINEL`].
    pub answer_text: String,
    /// Chunk texts the answer was grounded on, most similar first.
    pub grounded_chunks: Vec<String>,
}

impl AskResponse {
    /// Whether the answer is a real reply rather than the sentinel.
    pub fn is_grounded(&self) -> bool {
        self.answer_text != NOT_AVAILABLE_SENTINEL
    }
}

/// The RAG pipeline orchestrator.
///
/// Construct one via [`RagPipeline::builder()`]. A pipeline can serve any
/// number of index locations; builds for the same location are serialised
/// and fully replace the previous index.
pub struct RagPipeline {
    config: RagConfig,
    chunker: Chunker,
    embedding_provider: Arc<dyn EmbeddingProvider>,
    index_store: Arc<IndexStore>,
    retriever: Retriever,
    synthesizer: AnswerSynthesizer,
    interaction_log: Arc<dyn InteractionLog>,
    pending_logs: TaskTracker,
}

impl RagPipeline {
    /// Create a new [`RagPipelineBuilder`].
    pub fn builder() -> RagPipelineBuilder {
        RagPipelineBuilder::default()
    }

    /// Return a reference to the pipeline configuration.
    pub fn config(&self) -> &RagConfig {
        &self.config
    }

    /// Return a reference to the embedding provider.
    pub fn embedding_provider(&self) -> &Arc<dyn EmbeddingProvider> {
        &self.embedding_provider
    }

    /// Return a reference to the index store.
    pub fn index_store(&self) -> &Arc<IndexStore> {
        &self.index_store
    }

    /// Build a fresh index from `documents` and persist it at `location`.
    ///
    /// Nothing is written unless every stage succeeds; on failure the
    /// previous index at `location`, if any, stays in place.
    ///
    /// # Errors
    ///
    /// - [`RagError::ExtractionFailed`] if no page of any document was readable
    /// - [`RagError::EmptyChunkSet`] if the documents hold no text
    /// - [`RagError::EmbeddingUnavailable`] / [`RagError::DimensionMismatch`]
    ///   from the embedding provider
    /// - [`RagError::Io`] if the index cannot be written
    pub async fn build(&self, documents: &[UploadedDocument], location: &Path) -> Result<BuildReport> {
        let build_id = Uuid::new_v4();
        let span = info_span!(
            "pipeline.build",
            build.id = %build_id,
            location = %location.display(),
            documents = documents.len()
        );
        self.run_build(build_id, documents, location).instrument(span).await
    }

    async fn run_build(
        &self,
        build_id: Uuid,
        documents: &[UploadedDocument],
        location: &Path,
    ) -> Result<BuildReport> {
        let extracted =
            build_stage(BuildStage::Extracting, extract_text_concurrently(documents)).await?;

        let chunks = build_stage(BuildStage::Chunking, async {
            if extracted.text.trim().is_empty() {
                return Err(RagError::EmptyChunkSet);
            }
            Ok(self.chunker.split(&extracted.text))
        })
        .await?;

        let options = EmbedOptions {
            batch_size: self.config.embedding_batch_size,
            concurrency: self.config.embedding_concurrency,
            timeout: self.config.request_timeout(),
        };
        let index = build_stage(BuildStage::EmbeddingAndIndexing, async {
            let index = VectorIndex::build(&chunks, self.embedding_provider.as_ref(), options).await?;
            self.index_store.persist(&index, location).await?;
            Ok::<_, RagError>(index)
        })
        .await?;

        let report = BuildReport {
            build_id,
            location: location.to_path_buf(),
            documents: extracted.documents,
            pages_read: extracted.pages_read,
            pages_skipped: extracted.pages_skipped,
            chunk_count: chunks.len(),
            dimension: index.dimension,
            embedding_model: index.embedding_model,
        };
        info!(
            stage = %BuildStage::Persisted,
            chunk_count = report.chunk_count,
            pages_read = report.pages_read,
            pages_skipped = report.pages_skipped,
            "index built"
        );
        Ok(report)
    }

    /// Answer a question from the index at `request.location`.
    ///
    /// On success the interaction is handed to the interaction log on a
    /// spawned task. The write completes even if the pipeline is dropped
    /// first; see [`flush_interactions`](Self::flush_interactions).
    ///
    /// # Errors
    ///
    /// - [`RagError::IndexNotFound`] if no index has been built yet
    /// - [`RagError::IndexCorrupted`] / [`RagError::DimensionMismatch`] for an
    ///   unusable index
    /// - [`RagError::EmbeddingUnavailable`] if the question cannot be embedded
    /// - [`RagError::GenerationUnavailable`] if the model fails
    pub async fn ask(&self, request: AskRequest) -> Result<AskResponse> {
        let query_id = Uuid::new_v4();
        let span = info_span!(
            "pipeline.ask",
            query.id = %query_id,
            user.id = %request.user_id,
            location = %request.location.display()
        );
        self.run_ask(query_id, request).instrument(span).await
    }

    async fn run_ask(&self, query_id: Uuid, request: AskRequest) -> Result<AskResponse> {
        let k = request.top_k.unwrap_or(self.config.top_k);

        let retrieved = query_stage(
            QueryStage::Retrieving,
            self.retriever.retrieve(&request.question, &request.location, k),
        )
        .await?;

        let context = retrieved.texts();
        let answer = query_stage(
            QueryStage::Synthesizing,
            self.synthesizer.synthesize(&request.question, &context),
        )
        .await?;

        info!(
            stage = %QueryStage::Answered,
            grounded = answer.is_grounded(),
            context_chunks = answer.grounded_chunks.len(),
            "question answered"
        );

        self.record_interaction(InteractionRecord::new(
            request.user_id,
            request.question,
            answer.text.clone(),
        ));

        Ok(AskResponse {
            query_id,
            answer_text: answer.text,
            grounded_chunks: answer.grounded_chunks,
        })
    }

    fn record_interaction(&self, record: InteractionRecord) {
        let log = Arc::clone(&self.interaction_log);
        let task = async move {
            if let Err(e) = log.append(&record).await {
                warn!(user.id = %record.user_id, error = %e, "failed to record interaction");
            }
        };

        self.pending_logs.spawn(task.instrument(Span::current()));
    }

    /// Wait until every interaction handed to the log so far has been written.
    pub async fn flush_interactions(&self) {
        self.pending_logs.close();
        self.pending_logs.wait().await;
        self.pending_logs.reopen();
    }
}

async fn build_stage<T>(stage: BuildStage, work: impl Future<Output = Result<T>>) -> Result<T> {
    work.instrument(stage.span()).await.inspect_err(|e| {
        error!(stage = %BuildStage::Failed, failed_stage = %stage, error = %e, "build failed");
    })
}

async fn query_stage<T>(stage: QueryStage, work: impl Future<Output = Result<T>>) -> Result<T> {
    work.instrument(stage.span()).await.inspect_err(|e| {
        error!(stage = %QueryStage::Failed, failed_stage = %stage, error = %e, "question failed");
    })
}

/// Builder for constructing a [`RagPipeline`].
///
/// The embedding provider and generation model are required. The
/// configuration defaults to [`RagConfig::default()`], the index store to a
/// fresh [`IndexStore`], and the interaction log to [`NoopInteractionLog`].
///
/// # Example
///
/// ```rust,ignore
/// let pipeline = RagPipeline::builder()
///     .config(RagConfig::from_env()?)
///     .embedding_provider(Arc::new(embedder))
///     .generation_model(Arc::new(model))
///     .interaction_log(Arc::new(JsonlInteractionLog::new("interactions.jsonl")))  // optional
///     .build()?;
/// ```
#[derive(Default)]
pub struct RagPipelineBuilder {
    config: Option<RagConfig>,
    embedding_provider: Option<Arc<dyn EmbeddingProvider>>,
    generation_model: Option<Arc<dyn GenerationModel>>,
    index_store: Option<Arc<IndexStore>>,
    interaction_log: Option<Arc<dyn InteractionLog>>,
}

impl RagPipelineBuilder {
    /// Set the pipeline configuration.
    pub fn config(mut self, config: RagConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Set the embedding provider.
    pub fn embedding_provider(mut self, provider: Arc<dyn EmbeddingProvider>) -> Self {
        self.embedding_provider = Some(provider);
        self
    }

    /// Set the generation model used to synthesize answers.
    pub fn generation_model(mut self, model: Arc<dyn GenerationModel>) -> Self {
        self.generation_model = Some(model);
        self
    }

    /// Share an index store with other pipelines in the process.
    pub fn index_store(mut self, store: Arc<IndexStore>) -> Self {
        self.index_store = Some(store);
        self
    }

    /// Set where answered questions are recorded.
    pub fn interaction_log(mut self, log: Arc<dyn InteractionLog>) -> Self {
        self.interaction_log = Some(log);
        self
    }

    /// Build the [`RagPipeline`], validating that all required fields are set.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::ConfigError`] if a required field is missing, and
    /// [`RagError::InvalidChunkParameters`] for unusable chunk settings.
    pub fn build(self) -> Result<RagPipeline> {
        let config = self.config.unwrap_or_default();
        let embedding_provider = self
            .embedding_provider
            .ok_or_else(|| RagError::ConfigError("embedding_provider is required".to_string()))?;
        let generation_model = self
            .generation_model
            .ok_or_else(|| RagError::ConfigError("generation_model is required".to_string()))?;
        let chunker = Chunker::from_config(&config)?;
        let index_store = self.index_store.unwrap_or_default();
        let interaction_log = self.interaction_log.unwrap_or_else(|| Arc::new(NoopInteractionLog));

        let retriever =
            Retriever::new(Arc::clone(&embedding_provider), Arc::clone(&index_store), config.request_timeout());
        let synthesizer = AnswerSynthesizer::new(
            generation_model,
            GenerationConfig { temperature: config.temperature, max_output_tokens: None },
            config.request_timeout(),
        );

        Ok(RagPipeline {
            config,
            chunker,
            embedding_provider,
            index_store,
            retriever,
            synthesizer,
            interaction_log,
            pending_logs: TaskTracker::new(),
        })
    }
}
