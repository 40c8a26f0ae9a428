use crate::models::RetrievedChunk;
use crate::traits::{CompletionModel, ResponseFormat};
use crate::RagError;

pub const NO_CONTEXT_ANSWER: &str = "I don't have enough information to answer that question.";

/// Answers a question from a finalized context with one completion call.
#[derive(Debug, Clone)]
pub struct Generator<C> {
    model: C,
}

impl<C> Generator<C>
where
    C: CompletionModel,
{
    pub fn new(model: C) -> Self {
        Self { model }
    }

    pub async fn answer(
        &self,
        query: &str,
        context: &[RetrievedChunk],
    ) -> Result<String, RagError> {
        if context.is_empty() {
            tracing::info!("empty context, skipping generation");
            return Ok(NO_CONTEXT_ANSWER.to_string());
        }

        let answer = self
            .model
            .complete(&answer_prompt(query, context), ResponseFormat::Text)
            .await?;
        let answer = answer.trim();
        if answer.is_empty() {
            return Err(RagError::ModelOutput("model returned an empty answer".to_string()));
        }
        Ok(answer.to_string())
    }
}

fn answer_prompt(query: &str, context: &[RetrievedChunk]) -> String {
    let sources = context
        .iter()
        .enumerate()
        .map(|(position, hit)| match hit.relevance {
            Some(score) => format!(
                "[Source {} | relevance {:.1}]\n{}",
                position + 1,
                score,
                hit.chunk.text
            ),
            None => format!("[Source {}]\n{}", position + 1, hit.chunk.text),
        })
        .collect::<Vec<_>>()
        .join("\n\n");

    format!(
        "You are a helpful AI assistant that answers questions based on the provided context.\n\
         Provide accurate, concise and helpful answers based ONLY on the information in the context.\n\
         If the answer is not in the context, say \"{NO_CONTEXT_ANSWER}\"\n\n\
         CONTEXT:\n{sources}\n\n\
         USER QUESTION:\n{query}\n\n\
         ANSWER:"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Chunk;
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingModel {
        prompts: Mutex<Vec<String>>,
        fail: bool,
    }

    #[async_trait]
    impl CompletionModel for RecordingModel {
        async fn complete(
            &self,
            prompt: &str,
            _format: ResponseFormat,
        ) -> Result<String, RagError> {
            self.prompts.lock().expect("prompts lock").push(prompt.to_string());
            if self.fail {
                return Err(RagError::BackendResponse {
                    backend: "test".to_string(),
                    details: "503".to_string(),
                });
            }
            Ok("  The pump is rated for 250 bar. ".to_string())
        }
    }

    fn context() -> Vec<RetrievedChunk> {
        vec![RetrievedChunk::new(
            Chunk {
                index: 4,
                start: 3_200,
                text: "The pump is rated for 250 bar.".to_string(),
            },
            0.8,
        )]
    }

    #[tokio::test]
    async fn answer_uses_tagged_context() -> Result<(), RagError> {
        let generator = Generator::new(RecordingModel::default());
        let answer = generator.answer("What is the pump rating?", &context()).await?;

        assert_eq!(answer, "The pump is rated for 250 bar.");
        let prompts = generator.model.prompts.lock().expect("prompts lock").clone();
        assert_eq!(prompts.len(), 1);
        assert!(prompts[0].contains("[Source 1]\nThe pump"));
        assert!(prompts[0].contains("What is the pump rating?"));
        Ok(())
    }

    #[tokio::test]
    async fn scored_sources_carry_their_relevance() -> Result<(), RagError> {
        let generator = Generator::new(RecordingModel::default());
        let mut scored = context();
        scored[0].relevance = Some(0.8);
        generator.answer("What is the pump rating?", &scored).await?;

        let prompts = generator.model.prompts.lock().expect("prompts lock").clone();
        assert!(prompts[0].contains("[Source 1 | relevance 0.8]"));
        Ok(())
    }

    #[tokio::test]
    async fn empty_context_skips_the_model() -> Result<(), RagError> {
        let generator = Generator::new(RecordingModel::default());
        let answer = generator.answer("anything", &[]).await?;

        assert_eq!(answer, NO_CONTEXT_ANSWER);
        assert!(generator.model.prompts.lock().expect("prompts lock").is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn model_failure_propagates() {
        let generator = Generator::new(RecordingModel {
            fail: true,
            ..RecordingModel::default()
        });
        assert!(generator.answer("q", &context()).await.is_err());
    }
}
