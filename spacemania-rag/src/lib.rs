//! Document indexing and grounded question answering for Spacemania.
//!
//! This crate turns uploaded documents into a persisted semantic index and
//! answers questions from it:
//!
//! - Text extraction from PDF and plain-text documents
//! - Overlapping, boundary-aware chunking
//! - Batched, concurrent embedding behind the [`EmbeddingProvider`] trait
//! - A JSON-persisted [`VectorIndex`] with cosine-similarity search
//! - Answer synthesis that only uses retrieved context, replying with
//!   [`NOT_AVAILABLE_SENTINEL`] when the context does not hold the answer
//! - An [`InteractionLog`] for answered questions
//!
//! [`RagPipeline`] ties these together into `build` and `ask` workflows.
//!
//! # Features
//!
//! - `gemini` – Gemini embedding and generation over REST
//! - `openai` – OpenAI embedding and chat completions
//! - `full` – both providers
//!
//! [`MockEmbeddingProvider`] and [`MockGenerationModel`] are always available
//! for offline use.

pub mod chunking;
pub mod config;
pub mod document;
pub mod embedding;
pub mod error;
pub mod extract;
pub mod generation;
pub mod index;
pub mod interaction;
pub mod mock;
pub mod pipeline;
pub mod retriever;
pub mod synthesis;
mod timeout;

#[cfg(feature = "gemini")]
pub mod gemini;
#[cfg(feature = "openai")]
pub mod openai;

pub use chunking::{ChunkIter, Chunker};
pub use config::{RagConfig, RagConfigBuilder};
pub use document::{Chunk, RetrievalResult, SearchResult, UploadedDocument};
pub use embedding::EmbeddingProvider;
pub use error::{RagError, Result};
pub use extract::{ExtractedText, extract_text, extract_text_concurrently};
pub use generation::{GenerationConfig, GenerationModel};
pub use index::{EmbedOptions, ExpectedEmbedding, IndexEntry, IndexStore, VectorIndex};
pub use interaction::{
    InMemoryInteractionLog, InteractionLog, InteractionRecord, JsonlInteractionLog,
    NoopInteractionLog,
};
pub use mock::{MockEmbeddingProvider, MockGenerationModel};
pub use pipeline::{
    AskRequest, AskResponse, BuildReport, BuildStage, QueryStage, RagPipeline, RagPipelineBuilder,
};
pub use retriever::{DEFAULT_TOP_K, Retriever};
pub use synthesis::{Answer, AnswerSynthesizer, NOT_AVAILABLE_SENTINEL, build_prompt};

#[cfg(feature = "gemini")]
pub use gemini::{GeminiEmbeddingProvider, GeminiGenerationModel};
#[cfg(feature = "openai")]
pub use openai::{OpenAIEmbeddingProvider, OpenAIGenerationModel};
