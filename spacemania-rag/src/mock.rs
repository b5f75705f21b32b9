//! Deterministic, offline stand-ins for the embedding and generation models.
//!
//! [`MockEmbeddingProvider`] hashes content words into a fixed number of
//! buckets, so texts that share vocabulary get similar vectors.
//! [`MockGenerationModel`] answers extractively: it returns the context
//! sentence sharing the most content words with the question, or the
//! not-available sentinel when nothing in the context matches.
//!
//! Both are used by the test suite and by the CLI's `mock` provider.

use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use crate::embedding::EmbeddingProvider;
use crate::error::{RagError, Result};
use crate::generation::{GenerationConfig, GenerationModel};
use crate::synthesis::NOT_AVAILABLE_SENTINEL;

const STOPWORDS: &[&str] = &[
    "a", "about", "an", "and", "are", "as", "at", "be", "by", "can", "do", "does", "did", "for",
    "from", "how", "in", "is", "it", "its", "me", "of", "on", "or", "tell", "that", "the", "this",
    "to", "was", "were", "what", "when", "where", "which", "who", "why", "with",
];

/// Lower-cased alphanumeric tokens, minus stopwords and single characters.
fn content_words(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.chars().count() >= 2)
        .map(str::to_lowercase)
        .filter(|t| !STOPWORDS.contains(&t.as_str()))
        .collect()
}

fn fnv1a(word: &str) -> u64 {
    word.bytes().fold(0xcbf2_9ce4_8422_2325, |hash, byte| {
        (hash ^ u64::from(byte)).wrapping_mul(0x0100_0000_01b3)
    })
}

/// A bag-of-words embedding provider that never leaves the process.
#[derive(Debug)]
pub struct MockEmbeddingProvider {
    dimensions: usize,
    succeed_calls: Option<usize>,
    latency: Option<Duration>,
    calls: AtomicUsize,
}

impl MockEmbeddingProvider {
    /// Create a provider producing vectors of `dimensions` components.
    pub fn new(dimensions: usize) -> Self {
        Self { dimensions, succeed_calls: None, latency: None, calls: AtomicUsize::new(0) }
    }

    /// A provider whose every call fails with [`RagError::EmbeddingUnavailable`].
    pub fn failing(dimensions: usize) -> Self {
        Self::new(dimensions).failing_after(0)
    }

    /// Let the first `calls` requests succeed and fail all later ones.
    pub fn failing_after(mut self, calls: usize) -> Self {
        self.succeed_calls = Some(calls);
        self
    }

    /// Delay every request by `latency`.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Number of `embed`/`embed_batch` requests received so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    async fn begin_call(&self) -> Result<()> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        match self.succeed_calls {
            Some(limit) if call >= limit => Err(RagError::EmbeddingUnavailable {
                provider: "Mock".into(),
                message: format!("simulated outage on request {}", call + 1),
            }),
            _ => Ok(()),
        }
    }

    fn vectorize(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimensions];
        if self.dimensions == 0 {
            return vector;
        }
        for word in content_words(text) {
            let bucket = (fnv1a(&word) % self.dimensions as u64) as usize;
            vector[bucket] += 1.0;
        }
        let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            vector.iter_mut().for_each(|x| *x /= norm);
        }
        vector
    }
}

#[async_trait]
impl EmbeddingProvider for MockEmbeddingProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.begin_call().await?;
        Ok(self.vectorize(text))
    }

    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        self.begin_call().await?;
        Ok(texts.iter().map(|t| self.vectorize(t)).collect())
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn model_name(&self) -> &str {
        "mock-embedding"
    }
}

/// An extractive generation model for offline use.
#[derive(Debug, Default)]
pub struct MockGenerationModel {
    fixed_reply: Option<String>,
    failing: bool,
    calls: AtomicUsize,
    last_prompt: Mutex<Option<String>>,
}

impl MockGenerationModel {
    /// Create an extractive model.
    pub fn new() -> Self {
        Self::default()
    }

    /// A model whose every call fails with [`RagError::GenerationUnavailable`].
    pub fn failing() -> Self {
        Self { failing: true, ..Self::default() }
    }

    /// A model that always replies with `reply`, whatever the prompt.
    pub fn with_reply(reply: impl Into<String>) -> Self {
        Self { fixed_reply: Some(reply.into()), ..Self::default() }
    }

    /// Number of `generate` calls received so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// The prompt of the most recent call.
    pub fn last_prompt(&self) -> Option<String> {
        self.last_prompt.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn extract_answer(prompt: &str) -> String {
        let (context, question) = split_prompt(prompt);
        let question_words = content_words(question);

        let best = sentences(context)
            .into_iter()
            .map(|sentence| {
                let words = content_words(sentence);
                let overlap = question_words.iter().filter(|q| words.contains(q)).count();
                (overlap, sentence)
            })
            .filter(|(overlap, _)| *overlap > 0)
            // Earliest sentence wins ties.
            .fold(None::<(usize, &str)>, |best, candidate| match best {
                Some(current) if current.0 >= candidate.0 => Some(current),
                _ => Some(candidate),
            });

        match best {
            Some((_, sentence)) => sentence.to_string(),
            None => NOT_AVAILABLE_SENTINEL.to_string(),
        }
    }
}

/// The context and question sections of a grounded prompt.
fn split_prompt(prompt: &str) -> (&str, &str) {
    let context_start = prompt.find("Context:").map(|i| i + "Context:".len()).unwrap_or(0);
    let question_marker = prompt.rfind("Question:").unwrap_or(prompt.len());
    let context = prompt.get(context_start..question_marker.max(context_start)).unwrap_or("");

    let question_start = (question_marker + "Question:".len()).min(prompt.len());
    let answer_marker = prompt.rfind("Answer:").filter(|&i| i >= question_start);
    let question = prompt.get(question_start..answer_marker.unwrap_or(prompt.len())).unwrap_or("");

    (context, question)
}

/// Sentences of `text`, each keeping its terminating punctuation.
fn sentences(text: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut start = 0;
    for (i, c) in text.char_indices() {
        if matches!(c, '.' | '!' | '?' | '\n') {
            let end = i + c.len_utf8();
            let sentence = text[start..end].trim();
            if !sentence.is_empty() {
                out.push(sentence);
            }
            start = end;
        }
    }
    let tail = text[start..].trim();
    if !tail.is_empty() {
        out.push(tail);
    }
    out
}

#[async_trait]
impl GenerationModel for MockGenerationModel {
    async fn generate(&self, prompt: &str, _config: &GenerationConfig) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_prompt.lock().unwrap_or_else(|e| e.into_inner()) = Some(prompt.to_string());

        if self.failing {
            return Err(RagError::GenerationUnavailable {
                provider: "Mock".into(),
                message: "simulated outage".into(),
            });
        }
        Ok(match &self.fixed_reply {
            Some(reply) => reply.clone(),
            None => Self::extract_answer(prompt),
        })
    }

    fn model_name(&self) -> &str {
        "mock-extractive"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::synthesis::build_prompt;

    fn dot(a: &[f32], b: &[f32]) -> f32 {
        a.iter().zip(b).map(|(x, y)| x * y).sum()
    }

    #[tokio::test]
    async fn related_texts_embed_closer_than_unrelated_ones() {
        let provider = MockEmbeddingProvider::new(256);
        let question = provider.embed("What is the rocket's fuel capacity?").await.unwrap();
        let related = provider.embed("The rocket's fuel capacity is 500 liters.").await.unwrap();
        let unrelated = provider.embed("Paris is known for its museums.").await.unwrap();
        assert!(dot(&question, &related) > dot(&question, &unrelated));
    }

    #[tokio::test]
    async fn empty_text_embeds_to_zero_vector() {
        let provider = MockEmbeddingProvider::new(8);
        let vector = provider.embed("").await.unwrap();
        assert_eq!(vector, vec![0.0; 8]);
    }

    #[tokio::test]
    async fn failing_after_counts_requests() {
        let provider = MockEmbeddingProvider::new(8).failing_after(1);
        assert!(provider.embed_batch(&["one", "two"]).await.is_ok());
        assert!(matches!(
            provider.embed("three").await,
            Err(RagError::EmbeddingUnavailable { .. })
        ));
        assert_eq!(provider.calls(), 2);
    }

    #[tokio::test]
    async fn extractive_model_quotes_the_matching_sentence() {
        let model = MockGenerationModel::new();
        let prompt = build_prompt(
            &["Launch is scheduled at dawn. The rocket's fuel capacity is 500 liters.".to_string()],
            "What is the rocket's fuel capacity?",
        );
        let reply = model.generate(&prompt, &GenerationConfig::default()).await.unwrap();
        assert_eq!(reply, "The rocket's fuel capacity is 500 liters.");
        assert_eq!(model.last_prompt().as_deref(), Some(prompt.as_str()));
    }

    #[tokio::test]
    async fn extractive_model_declines_unrelated_questions() {
        let model = MockGenerationModel::new();
        let prompt = build_prompt(
            &["The rocket's fuel capacity is 500 liters.".to_string()],
            "What is the capital of France?",
        );
        let reply = model.generate(&prompt, &GenerationConfig::default()).await.unwrap();
        assert_eq!(reply, NOT_AVAILABLE_SENTINEL);
    }

    #[test]
    fn sentences_keep_terminators() {
        assert_eq!(sentences("One. Two!\nThree"), vec!["One.", "Two!", "Three"]);
    }
}
