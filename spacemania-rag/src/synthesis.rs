//! Grounded answer synthesis.
//!
//! The retrieved chunks are placed into a fixed prompt that instructs the
//! model to answer only from the supplied context and to reply with
//! [`NOT_AVAILABLE_SENTINEL`] otherwise. The model's reply is returned
//! verbatim, except that replies opening with the sentinel phrase are
//! normalised to the exact sentinel so callers can detect refusals reliably.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{RagError, Result};
use crate::generation::{GenerationConfig, GenerationModel};
use crate::timeout::with_timeout;

/// The reply returned when the context does not contain the answer.
pub const NOT_AVAILABLE_SENTINEL: &str = "answer is not available in the context";

/// Separator placed between retrieved chunks in the prompt.
const CONTEXT_SEPARATOR: &str = "\n\n";

/// Assemble the grounded prompt for `question` over `context`.
pub fn build_prompt(context: &[String], question: &str) -> String {
    format!(
        "Answer the question as detailed as possible from the provided context. \
         If the answer is not in the provided context, just say, \
         \"{NOT_AVAILABLE_SENTINEL}\", don't provide a wrong answer.\n\n\
         Context:\n {}\n\n\
         Question: \n{question}\n\n\
         Answer:",
        context.join(CONTEXT_SEPARATOR)
    )
}

/// Whether `reply` is the sentinel, ignoring case and leading whitespace or
/// quotes. Replies that open with the sentinel phrase and go on to explain
/// themselves count as the sentinel too.
pub fn is_not_available(reply: &str) -> bool {
    let trimmed = reply.trim_start().trim_start_matches(['"', '\'']).trim_start();
    let n = NOT_AVAILABLE_SENTINEL.len();
    trimmed.get(..n).is_some_and(|head| head.eq_ignore_ascii_case(NOT_AVAILABLE_SENTINEL))
        && trimmed[n..].chars().next().is_none_or(|c| !c.is_alphanumeric())
}

/// A synthesized answer and the chunks it was grounded on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Answer {
    /// The question that was asked.
    pub question: String,
    /// The model's reply, or exactly [`NOT_AVAILABLE_SENTINEL`].
    pub text: String,
    /// The context chunks handed to the model, in ranking order.
    pub grounded_chunks: Vec<String>,
}

impl Answer {
    /// Whether the answer is a real reply rather than the sentinel.
    pub fn is_grounded(&self) -> bool {
        self.text != NOT_AVAILABLE_SENTINEL
    }
}

/// Produces answers from a question and its retrieved context.
pub struct AnswerSynthesizer {
    model: Arc<dyn GenerationModel>,
    config: GenerationConfig,
    timeout: Duration,
}

impl AnswerSynthesizer {
    /// Create a synthesizer around `model`.
    pub fn new(model: Arc<dyn GenerationModel>, config: GenerationConfig, timeout: Duration) -> Self {
        Self { model, config, timeout }
    }

    /// Answer `question` using only `context`.
    ///
    /// With no context at all the sentinel is returned without calling the
    /// model.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::GenerationUnavailable`] if the model fails or does
    /// not reply within the timeout.
    pub async fn synthesize(&self, question: &str, context: &[String]) -> Result<Answer> {
        if context.is_empty() {
            debug!("no context retrieved; answering with sentinel");
            return Ok(self.answer(question, NOT_AVAILABLE_SENTINEL.to_string(), context));
        }

        let prompt = build_prompt(context, question);
        let model = self.model.model_name().to_string();
        debug!(model = %model, prompt_len = prompt.len(), context_chunks = context.len(), "generating answer");

        let limit = self.timeout;
        let reply = with_timeout(limit, self.model.generate(&prompt, &self.config), || {
            RagError::GenerationUnavailable {
                provider: model.clone(),
                message: format!("no reply within {}s", limit.as_secs()),
            }
        })
        .await
        .map_err(|e| match e {
            RagError::GenerationUnavailable { .. } => e,
            other => RagError::GenerationUnavailable {
                provider: model.clone(),
                message: other.to_string(),
            },
        })?;

        let text = if reply.trim().is_empty() {
            warn!(model = %model, "model returned an empty reply");
            NOT_AVAILABLE_SENTINEL.to_string()
        } else if is_not_available(&reply) {
            NOT_AVAILABLE_SENTINEL.to_string()
        } else {
            reply
        };
        Ok(self.answer(question, text, context))
    }

    fn answer(&self, question: &str, text: String, context: &[String]) -> Answer {
        Answer { question: question.to_string(), text, grounded_chunks: context.to_vec() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockGenerationModel;

    fn synthesizer(model: Arc<MockGenerationModel>) -> AnswerSynthesizer {
        AnswerSynthesizer::new(model, GenerationConfig::default(), Duration::from_secs(5))
    }

    #[test]
    fn prompt_contains_context_and_question() {
        let prompt = build_prompt(&["chunk one".into(), "chunk two".into()], "Why?");
        assert!(prompt.contains("Context:\n chunk one\n\nchunk two\n\nQuestion: \nWhy?\n\nAnswer:"));
        assert!(prompt.contains(NOT_AVAILABLE_SENTINEL));
    }

    #[test]
    fn sentinel_variants_are_recognised() {
        assert!(is_not_available("answer is not available in the context"));
        assert!(is_not_available("  \"Answer is not available in the context.\"\n"));
        assert!(!is_not_available("The answer is 500 liters."));
    }

    #[test]
    fn sentinel_followed_by_an_explanation_is_recognised() {
        assert!(is_not_available(
            "Answer is not available in the context. The context only covers fuel capacity."
        ));
        assert!(is_not_available("answer is not available in the context, sorry"));
        assert!(!is_not_available("answer is not available in the contextual notes"));
        assert!(!is_not_available("The fuel answer is not available in the context"));
    }

    #[tokio::test]
    async fn empty_context_skips_the_model() {
        let model = Arc::new(MockGenerationModel::new());
        let answer = synthesizer(model.clone()).synthesize("Anything?", &[]).await.unwrap();
        assert_eq!(answer.text, NOT_AVAILABLE_SENTINEL);
        assert!(!answer.is_grounded());
        assert_eq!(model.calls(), 0);
    }

    #[tokio::test]
    async fn unrelated_context_yields_the_sentinel() {
        let model = Arc::new(MockGenerationModel::new());
        let answer = synthesizer(model.clone())
            .synthesize("What is the capital of France?", &["Project X launched in 2021.".into()])
            .await
            .unwrap();
        assert_eq!(answer.text, NOT_AVAILABLE_SENTINEL);
        assert_eq!(model.calls(), 1);
    }

    #[tokio::test]
    async fn sentinel_look_alikes_are_normalised() {
        let model = Arc::new(MockGenerationModel::with_reply("Answer is not available in the context."));
        let answer =
            synthesizer(model).synthesize("Capital?", &["Rockets burn fuel.".into()]).await.unwrap();
        assert_eq!(answer.text, NOT_AVAILABLE_SENTINEL);
    }

    #[tokio::test]
    async fn explained_refusals_become_the_exact_sentinel() {
        let model = Arc::new(MockGenerationModel::with_reply(
            "answer is not available in the context. The context only covers crew training.",
        ));
        let answer =
            synthesizer(model).synthesize("Capital?", &["Crew training lasts two years.".into()]).await.unwrap();
        assert_eq!(answer.text, NOT_AVAILABLE_SENTINEL);
        assert!(!answer.is_grounded());
    }

    #[tokio::test]
    async fn replies_are_returned_verbatim() {
        let model = Arc::new(MockGenerationModel::with_reply("  500 liters, per the manual.  "));
        let answer =
            synthesizer(model).synthesize("Fuel?", &["Fuel: 500 liters.".into()]).await.unwrap();
        assert_eq!(answer.text, "  500 liters, per the manual.  ");
        assert_eq!(answer.grounded_chunks, vec!["Fuel: 500 liters.".to_string()]);
    }

    #[tokio::test]
    async fn model_failure_is_generation_unavailable() {
        let model = Arc::new(MockGenerationModel::failing());
        let err = synthesizer(model).synthesize("Fuel?", &["ctx".into()]).await.unwrap_err();
        assert!(matches!(err, RagError::GenerationUnavailable { .. }));
    }
}
