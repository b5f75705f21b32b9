//! Generation model trait for producing answer text from a prompt.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Sampling settings passed to a [`GenerationModel`] on every call.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GenerationConfig {
    /// Sampling temperature. Low values keep answers close to the context.
    pub temperature: f32,
    /// Optional cap on the length of the reply.
    pub max_output_tokens: Option<u32>,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self { temperature: 0.3, max_output_tokens: None }
    }
}

/// A text generation backend that answers a fully assembled prompt.
///
/// The prompt already contains the retrieved context and the question;
/// implementations return the model's reply verbatim.
#[async_trait]
pub trait GenerationModel: Send + Sync {
    /// Generate a reply for `prompt`.
    async fn generate(&self, prompt: &str, config: &GenerationConfig) -> Result<String>;

    /// Identifier of the underlying model, used in logs and errors.
    fn model_name(&self) -> &str;
}
