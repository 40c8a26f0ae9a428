use crate::models::{ContextAssessment, SufficiencyVerdict};
use crate::RagError;
use async_trait::async_trait;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseFormat {
    Text,
    Json,
}

/// Single-prompt text generation.
#[async_trait]
pub trait CompletionModel: Send + Sync {
    async fn complete(&self, prompt: &str, format: ResponseFormat) -> Result<String, RagError>;
}

#[async_trait]
impl<T: CompletionModel + ?Sized> CompletionModel for Arc<T> {
    async fn complete(&self, prompt: &str, format: ResponseFormat) -> Result<String, RagError> {
        (**self).complete(prompt, format).await
    }
}

/// Judgement calls the refiners make about queries and retrieved text.
#[async_trait]
pub trait RefinementModel: Send + Sync {
    /// Relevance of `passage` to `query`, normalized to `0.0..=1.0`.
    async fn score_relevance(&self, query: &str, passage: &str) -> Result<f32, RagError>;

    async fn judge_sufficiency(
        &self,
        query: &str,
        context: &str,
    ) -> Result<SufficiencyVerdict, RagError>;

    async fn reformulate(&self, query: &str) -> Result<String, RagError>;

    async fn assess_context(
        &self,
        query: &str,
        passages: &[&str],
    ) -> Result<ContextAssessment, RagError>;

    async fn follow_up_queries(
        &self,
        query: &str,
        assessment: &ContextAssessment,
    ) -> Result<Vec<String>, RagError>;
}
