//! Gemini embedding and generation providers over the Generative Language REST API.
//!
//! This module is only available when the `gemini` feature is enabled.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, instrument};

use crate::embedding::EmbeddingProvider;
use crate::error::{RagError, Result};
use crate::generation::{GenerationConfig, GenerationModel};

/// The default Generative Language API base URL.
const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta/";

/// The default embedding model.
const DEFAULT_EMBEDDING_MODEL: &str = "models/embedding-001";

/// Dimensionality of `embedding-001`.
const DEFAULT_DIMENSIONS: usize = 768;

/// The default generation model.
const DEFAULT_GENERATION_MODEL: &str = "models/gemini-pro";

const PROVIDER: &str = "Gemini";

/// Shared HTTP plumbing for the Gemini providers.
#[derive(Clone)]
struct GeminiClient {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl GeminiClient {
    fn new(api_key: String) -> Result<Self> {
        if api_key.is_empty() {
            return Err(RagError::ConfigError("Gemini API key must not be empty".into()));
        }
        Ok(Self { http: reqwest::Client::new(), api_key, base_url: GEMINI_BASE_URL.into() })
    }

    fn from_env() -> Result<Self> {
        let api_key = std::env::var("GOOGLE_API_KEY").map_err(|_| {
            RagError::ConfigError("GOOGLE_API_KEY environment variable not set".into())
        })?;
        Self::new(api_key)
    }

    /// POST `body` to `{model}:{method}` and decode the JSON reply.
    ///
    /// Failures are reported through `to_error` so each capability keeps its
    /// own error kind.
    async fn call<B, R>(
        &self,
        model: &str,
        method: &str,
        body: &B,
        to_error: fn(String) -> RagError,
    ) -> Result<R>
    where
        B: Serialize + ?Sized,
        R: for<'de> Deserialize<'de>,
    {
        let url = format!("{}{model}:{method}", self.base_url);
        let response = self
            .http
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| {
                error!(provider = PROVIDER, method, error = %e, "request failed");
                to_error(format!("request failed: {e}"))
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            let detail = serde_json::from_str::<ErrorResponse>(&body)
                .map(|e| e.error.message)
                .unwrap_or(body);

            error!(provider = PROVIDER, method, %status, "API error");
            return Err(to_error(format!("API returned {status}: {detail}")));
        }

        response.json().await.map_err(|e| {
            error!(provider = PROVIDER, method, error = %e, "failed to parse response");
            to_error(format!("failed to parse response: {e}"))
        })
    }
}

fn embedding_error(message: String) -> RagError {
    RagError::EmbeddingUnavailable { provider: PROVIDER.into(), message }
}

fn generation_error(message: String) -> RagError {
    RagError::GenerationUnavailable { provider: PROVIDER.into(), message }
}

/// Ensure a model id carries the `models/` prefix the REST paths expect.
fn qualified(model: impl Into<String>) -> String {
    let model = model.into();
    if model.starts_with("models/") { model } else { format!("models/{model}") }
}

// ── Gemini API request/response types ──────────────────────────────

#[derive(Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Serialize)]
struct Content<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'static str>,
    parts: Vec<Part<'a>>,
}

impl<'a> Content<'a> {
    fn text(role: Option<&'static str>, text: &'a str) -> Self {
        Self { role, parts: vec![Part { text }] }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct EmbedContentRequest<'a> {
    model: &'a str,
    content: Content<'a>,
    task_type: &'static str,
}

#[derive(Serialize)]
struct BatchEmbedContentsRequest<'a> {
    requests: Vec<EmbedContentRequest<'a>>,
}

#[derive(Deserialize)]
struct EmbedContentResponse {
    embedding: ContentEmbedding,
}

#[derive(Deserialize)]
struct BatchEmbedContentsResponse {
    #[serde(default)]
    embeddings: Vec<ContentEmbedding>,
}

#[derive(Deserialize)]
struct ContentEmbedding {
    values: Vec<f32>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest<'a> {
    contents: Vec<Content<'a>>,
    generation_config: GeminiGenerationConfig,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiGenerationConfig {
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<u32>,
}

#[derive(Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<CandidateContent>,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Deserialize)]
struct CandidatePart {
    #[serde(default)]
    text: String,
}

#[derive(Deserialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Deserialize)]
struct ErrorDetail {
    message: String,
}

// ── Embedding ──────────────────────────────────────────────────────

/// An [`EmbeddingProvider`] backed by the Gemini embedding API.
///
/// Batches are embedded as retrieval documents and single texts as
/// retrieval queries, matching how the pipeline uses the two calls.
///
/// # Example
///
/// ```rust,ignore
/// use spacemania_rag::gemini::GeminiEmbeddingProvider;
///
/// let provider = GeminiEmbeddingProvider::from_env()?;
/// let embedding = provider.embed("What is the rocket's fuel capacity?").await?;
/// assert_eq!(embedding.len(), 768);
/// ```
pub struct GeminiEmbeddingProvider {
    client: GeminiClient,
    model: String,
    dimensions: usize,
}

impl GeminiEmbeddingProvider {
    /// Create a provider for `models/embedding-001` with the given API key.
    pub fn new(api_key: impl Into<String>) -> Result<Self> {
        Ok(Self {
            client: GeminiClient::new(api_key.into())?,
            model: DEFAULT_EMBEDDING_MODEL.into(),
            dimensions: DEFAULT_DIMENSIONS,
        })
    }

    /// Create a provider using the `GOOGLE_API_KEY` environment variable.
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            client: GeminiClient::from_env()?,
            model: DEFAULT_EMBEDDING_MODEL.into(),
            dimensions: DEFAULT_DIMENSIONS,
        })
    }

    /// Use another embedding model with the given output dimensionality.
    pub fn with_model(mut self, model: impl Into<String>, dimensions: usize) -> Self {
        self.model = qualified(model);
        self.dimensions = dimensions;
        self
    }

    /// Point the provider at another API base URL (must end with `/`).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.client.base_url = base_url.into();
        self
    }
}

#[async_trait]
impl EmbeddingProvider for GeminiEmbeddingProvider {
    #[instrument(skip_all, fields(provider = PROVIDER, model = %self.model, text_len = text.len()))]
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let request = EmbedContentRequest {
            model: &self.model,
            content: Content::text(None, text),
            task_type: "RETRIEVAL_QUERY",
        };
        let response: EmbedContentResponse =
            self.client.call(&self.model, "embedContent", &request, embedding_error).await?;
        Ok(response.embedding.values)
    }

    #[instrument(skip_all, fields(provider = PROVIDER, model = %self.model, batch_size = texts.len()))]
    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let request = BatchEmbedContentsRequest {
            requests: texts
                .iter()
                .map(|text| EmbedContentRequest {
                    model: &self.model,
                    content: Content::text(None, text),
                    task_type: "RETRIEVAL_DOCUMENT",
                })
                .collect(),
        };
        let response: BatchEmbedContentsResponse =
            self.client.call(&self.model, "batchEmbedContents", &request, embedding_error).await?;

        debug!(embeddings = response.embeddings.len(), "batch embedded");
        Ok(response.embeddings.into_iter().map(|e| e.values).collect())
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

// ── Generation ─────────────────────────────────────────────────────

/// A [`GenerationModel`] backed by the Gemini `generateContent` API.
pub struct GeminiGenerationModel {
    client: GeminiClient,
    model: String,
}

impl GeminiGenerationModel {
    /// Create a model client for `models/gemini-pro` with the given API key.
    pub fn new(api_key: impl Into<String>) -> Result<Self> {
        Ok(Self { client: GeminiClient::new(api_key.into())?, model: DEFAULT_GENERATION_MODEL.into() })
    }

    /// Create a model client using the `GOOGLE_API_KEY` environment variable.
    pub fn from_env() -> Result<Self> {
        Ok(Self { client: GeminiClient::from_env()?, model: DEFAULT_GENERATION_MODEL.into() })
    }

    /// Use another generation model (e.g. `gemini-1.5-flash`).
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = qualified(model);
        self
    }

    /// Point the client at another API base URL (must end with `/`).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.client.base_url = base_url.into();
        self
    }
}

#[async_trait]
impl GenerationModel for GeminiGenerationModel {
    #[instrument(skip_all, fields(provider = PROVIDER, model = %self.model, prompt_len = prompt.len()))]
    async fn generate(&self, prompt: &str, config: &GenerationConfig) -> Result<String> {
        let request = GenerateContentRequest {
            contents: vec![Content::text(Some("user"), prompt)],
            generation_config: GeminiGenerationConfig {
                temperature: config.temperature,
                max_output_tokens: config.max_output_tokens,
            },
        };
        let response: GenerateContentResponse =
            self.client.call(&self.model, "generateContent", &request, generation_error).await?;

        let candidate = response
            .candidates
            .into_iter()
            .next()
            .ok_or_else(|| generation_error("response contained no candidates".into()))?;

        let text: String = candidate
            .content
            .map(|c| c.parts.into_iter().map(|p| p.text).collect())
            .unwrap_or_default();
        if text.is_empty() {
            let reason = candidate.finish_reason.unwrap_or_else(|| "unknown".into());
            return Err(generation_error(format!("empty candidate (finish reason: {reason})")));
        }
        Ok(text)
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
