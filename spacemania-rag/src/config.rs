//! Configuration for the RAG pipeline.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{RagError, Result};

/// Prefix for environment variable overrides read by [`RagConfig::from_env`].
pub const ENV_PREFIX: &str = "SPACEMANIA_";

/// Configuration parameters for the RAG pipeline.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RagConfig {
    /// Maximum chunk size in characters.
    pub chunk_size: usize,
    /// Number of overlapping characters between consecutive chunks.
    pub chunk_overlap: usize,
    /// Number of chunks retrieved as context for each question.
    pub top_k: usize,
    /// Number of chunk texts sent to the embedding provider per request.
    pub embedding_batch_size: usize,
    /// Maximum number of embedding requests in flight during a build.
    pub embedding_concurrency: usize,
    /// Upper bound on a single embedding or generation call, in seconds.
    pub request_timeout_secs: u64,
    /// Sampling temperature for answer generation.
    pub temperature: f32,
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            chunk_size: 10_000,
            chunk_overlap: 1_000,
            top_k: 4,
            embedding_batch_size: 32,
            embedding_concurrency: 4,
            request_timeout_secs: 60,
            temperature: 0.3,
        }
    }
}

impl RagConfig {
    /// Create a new builder for constructing a [`RagConfig`].
    pub fn builder() -> RagConfigBuilder {
        RagConfigBuilder::default()
    }

    /// The per-call timeout applied to external model calls.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Build a configuration from the defaults overridden by
    /// `SPACEMANIA_CHUNK_SIZE`, `SPACEMANIA_CHUNK_OVERLAP`, `SPACEMANIA_TOP_K`,
    /// `SPACEMANIA_EMBEDDING_BATCH_SIZE`, `SPACEMANIA_EMBEDDING_CONCURRENCY`,
    /// `SPACEMANIA_REQUEST_TIMEOUT_SECS` and `SPACEMANIA_TEMPERATURE`.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::ConfigError`] if a variable is set but does not
    /// parse, and any error [`RagConfigBuilder::build`] reports.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) but reading variables through
    /// `lookup`, which receives the full variable name.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = RagConfig::default();
        let mut builder = RagConfig::builder();

        builder = builder.chunk_size(parse_var(&lookup, "CHUNK_SIZE", defaults.chunk_size)?);
        builder =
            builder.chunk_overlap(parse_var(&lookup, "CHUNK_OVERLAP", defaults.chunk_overlap)?);
        builder = builder.top_k(parse_var(&lookup, "TOP_K", defaults.top_k)?);
        builder = builder.embedding_batch_size(parse_var(
            &lookup,
            "EMBEDDING_BATCH_SIZE",
            defaults.embedding_batch_size,
        )?);
        builder = builder.embedding_concurrency(parse_var(
            &lookup,
            "EMBEDDING_CONCURRENCY",
            defaults.embedding_concurrency,
        )?);
        builder = builder.request_timeout(Duration::from_secs(parse_var(
            &lookup,
            "REQUEST_TIMEOUT_SECS",
            defaults.request_timeout_secs,
        )?));
        builder = builder.temperature(parse_var(&lookup, "TEMPERATURE", defaults.temperature)?);

        builder.build()
    }
}

fn parse_var<T>(lookup: &impl Fn(&str) -> Option<String>, suffix: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    let key = format!("{ENV_PREFIX}{suffix}");
    match lookup(&key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| RagError::ConfigError(format!("{key}={raw:?} is invalid: {e}"))),
        None => Ok(default),
    }
}

/// Builder for constructing a validated [`RagConfig`].
#[derive(Debug, Clone, Default)]
pub struct RagConfigBuilder {
    config: RagConfig,
}

impl RagConfigBuilder {
    /// Set the maximum chunk size in characters.
    pub fn chunk_size(mut self, size: usize) -> Self {
        self.config.chunk_size = size;
        self
    }

    /// Set the overlap between consecutive chunks in characters.
    pub fn chunk_overlap(mut self, overlap: usize) -> Self {
        self.config.chunk_overlap = overlap;
        self
    }

    /// Set the number of chunks retrieved per question.
    pub fn top_k(mut self, k: usize) -> Self {
        self.config.top_k = k;
        self
    }

    /// Set how many chunk texts go into one embedding request.
    pub fn embedding_batch_size(mut self, size: usize) -> Self {
        self.config.embedding_batch_size = size;
        self
    }

    /// Set how many embedding requests may run concurrently.
    pub fn embedding_concurrency(mut self, concurrency: usize) -> Self {
        self.config.embedding_concurrency = concurrency;
        self
    }

    /// Set the timeout applied to every external model call.
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.config.request_timeout_secs = timeout.as_secs();
        self
    }

    /// Set the generation temperature.
    pub fn temperature(mut self, temperature: f32) -> Self {
        self.config.temperature = temperature;
        self
    }

    /// Build the [`RagConfig`], validating that parameters are consistent.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::InvalidChunkParameters`] if:
    /// - `chunk_size == 0`
    /// - `chunk_overlap >= chunk_size`
    ///
    /// Returns [`RagError::ConfigError`] if `top_k`, `embedding_batch_size`,
    /// `embedding_concurrency` or the timeout is zero, or if the temperature
    /// is outside `0.0..=2.0`.
    pub fn build(self) -> Result<RagConfig> {
        let config = self.config;
        if config.chunk_size == 0 {
            return Err(RagError::InvalidChunkParameters(
                "chunk_size must be greater than zero".to_string(),
            ));
        }
        if config.chunk_overlap >= config.chunk_size {
            return Err(RagError::InvalidChunkParameters(format!(
                "chunk_overlap ({}) must be less than chunk_size ({})",
                config.chunk_overlap, config.chunk_size
            )));
        }
        if config.top_k == 0 {
            return Err(RagError::ConfigError("top_k must be greater than zero".to_string()));
        }
        if config.embedding_batch_size == 0 {
            return Err(RagError::ConfigError(
                "embedding_batch_size must be greater than zero".to_string(),
            ));
        }
        if config.embedding_concurrency == 0 {
            return Err(RagError::ConfigError(
                "embedding_concurrency must be greater than zero".to_string(),
            ));
        }
        if config.request_timeout_secs == 0 {
            return Err(RagError::ConfigError(
                "request timeout must be at least one second".to_string(),
            ));
        }
        if !(0.0..=2.0).contains(&config.temperature) {
            return Err(RagError::ConfigError(format!(
                "temperature ({}) must be within 0.0..=2.0",
                config.temperature
            )));
        }
        Ok(config)
    }
}
