use crate::models::{ContextAssessment, SufficiencyVerdict};
use crate::traits::{CompletionModel, RefinementModel, ResponseFormat};
use crate::RagError;
use async_trait::async_trait;
use regex::Regex;
use serde::de::DeserializeOwned;

const MAX_FOLLOW_UPS: usize = 3;

/// Implements [`RefinementModel`] by prompting a plain completion model.
#[derive(Debug, Clone)]
pub struct PromptedRefinement<M> {
    model: M,
}

impl<M> PromptedRefinement<M>
where
    M: CompletionModel,
{
    pub fn new(model: M) -> Self {
        Self { model }
    }

    pub fn model(&self) -> &M {
        &self.model
    }
}

#[async_trait]
impl<M> RefinementModel for PromptedRefinement<M>
where
    M: CompletionModel,
{
    async fn score_relevance(&self, query: &str, passage: &str) -> Result<f32, RagError> {
        let reply = self
            .model
            .complete(&relevance_prompt(query, passage), ResponseFormat::Text)
            .await?;
        parse_relevance_score(&reply)
    }

    async fn judge_sufficiency(
        &self,
        query: &str,
        context: &str,
    ) -> Result<SufficiencyVerdict, RagError> {
        let reply = self
            .model
            .complete(&sufficiency_prompt(query, context), ResponseFormat::Json)
            .await?;
        parse_json_reply(&reply)
    }

    async fn reformulate(&self, query: &str) -> Result<String, RagError> {
        let reply = self
            .model
            .complete(&reformulation_prompt(query), ResponseFormat::Text)
            .await?;
        let reformulated = reply.trim().trim_matches('"').trim();
        if reformulated.is_empty() {
            return Err(RagError::ModelOutput(
                "reformulated query was empty".to_string(),
            ));
        }
        Ok(reformulated.to_string())
    }

    async fn assess_context(
        &self,
        query: &str,
        passages: &[&str],
    ) -> Result<ContextAssessment, RagError> {
        let reply = self
            .model
            .complete(&assessment_prompt(query, passages), ResponseFormat::Json)
            .await?;
        let mut assessment: ContextAssessment = parse_json_reply(&reply)?;
        assessment.overall_quality = assessment.overall_quality.clamp(0.0, 10.0);
        Ok(assessment)
    }

    async fn follow_up_queries(
        &self,
        query: &str,
        assessment: &ContextAssessment,
    ) -> Result<Vec<String>, RagError> {
        let reply = self
            .model
            .complete(&follow_up_prompt(query, assessment), ResponseFormat::Text)
            .await?;
        parse_follow_up_lines(&reply)
    }
}

fn relevance_prompt(query: &str, passage: &str) -> String {
    format!(
        "Task: Evaluate the relevance of the provided context to the user question.\n\
         Question: {query}\n\
         Context: {passage}\n\n\
         Rate the relevance on a scale of 0 to 10, where:\n\
         - 0 means completely irrelevant\n\
         - 10 means highly relevant and directly answers the question\n\n\
         Output only the numerical score between 0 and 10."
    )
}

fn sufficiency_prompt(query: &str, context: &str) -> String {
    format!(
        "Task: Analyze if the provided context is sufficient to answer the user's question.\n\n\
         User Question: {query}\n\n\
         Available Context:\n{context}\n\n\
         Output a JSON object with the following fields:\n\
         - \"is_sufficient\": boolean (true if context is sufficient, false if not)\n\
         - \"missing_information\": string describing what information is missing (if any)\n\n\
         JSON:"
    )
}

fn reformulation_prompt(query: &str) -> String {
    format!(
        "Reformulate this user query into a more effective search query for document retrieval.\n\
         Make it more specific and add key terms, entities and concepts worth searching for.\n\n\
         Original query: \"{query}\"\n\n\
         Output only the reformulated search query, nothing else:"
    )
}

fn numbered_passages(passages: &[&str]) -> String {
    passages
        .iter()
        .enumerate()
        .map(|(position, passage)| format!("Chunk {}: {}", position + 1, passage))
        .collect::<Vec<_>>()
        .join("\n\n---\n\n")
}

fn assessment_prompt(query: &str, passages: &[&str]) -> String {
    format!(
        "Analyze the quality and relevance of these retrieved context chunks for answering the user's query.\n\n\
         User Query: {query}\n\n\
         Retrieved Context:\n{}\n\n\
         Provide a JSON object with the following fields:\n\
         1. overall_quality: rating from 0-10 on how well the context addresses the query\n\
         2. missing_information: list of key information that's missing but needed\n\
         3. irrelevant_chunks: list of chunk numbers that are not relevant to the query\n\
         4. most_relevant_chunks: list of chunk numbers most relevant to the query\n\
         5. knowledge_gaps: concepts mentioned but not properly explained\n\n\
         JSON:",
        numbered_passages(passages)
    )
}

fn bullet_list(items: &[String]) -> String {
    items
        .iter()
        .map(|item| format!("- {item}"))
        .collect::<Vec<_>>()
        .join("\n")
}

fn follow_up_prompt(query: &str, assessment: &ContextAssessment) -> String {
    format!(
        "Based on the original query and the identified gaps in information, generate 1-{MAX_FOLLOW_UPS} \
         specific follow-up queries that would help retrieve additional relevant information.\n\n\
         Original query: \"{query}\"\n\n\
         Missing information:\n{}\n\n\
         Knowledge gaps:\n{}\n\n\
         Output only the list of follow-up queries, one per line:",
        bullet_list(&assessment.missing_information),
        bullet_list(&assessment.knowledge_gaps)
    )
}

/// Reads a 0-10 rating and scales it to `0.0..=1.0`.
///
/// Picks, in order: an `n/10` fraction, a line holding only a number, a
/// number ending the reply, then the first number anywhere.
pub fn parse_relevance_score(reply: &str) -> Result<f32, RagError> {
    let fraction = Regex::new(r"(\d+(?:\.\d+)?)\s*/\s*10\b")?;
    let lone_line = Regex::new(r"(?m)^\s*(\d+(?:\.\d+)?)\s*\.?\s*$")?;
    let trailing = Regex::new(r"(\d+(?:\.\d+)?)\s*[.!]?\s*$")?;
    let any = Regex::new(r"(\d+(?:\.\d+)?)")?;

    let found = [&fraction, &lone_line, &trailing, &any]
        .into_iter()
        .find_map(|pattern| pattern.captures(reply).and_then(|capture| capture.get(1)))
        .ok_or_else(|| RagError::ModelOutput(format!("no score in reply: {reply:?}")))?;
    let score: f32 = found
        .as_str()
        .parse()
        .map_err(|_| RagError::ModelOutput(format!("bad score: {}", found.as_str())))?;
    Ok((score / 10.0).clamp(0.0, 1.0))
}

/// Strips a ```json fence, if any, before deserializing.
pub fn parse_json_reply<T: DeserializeOwned>(reply: &str) -> Result<T, RagError> {
    let fenced = Regex::new(r"(?s)```(?:json)?\s*(.*?)```")?;
    let body = fenced
        .captures(reply)
        .and_then(|capture| capture.get(1))
        .map(|inner| inner.as_str())
        .unwrap_or(reply)
        .trim();
    Ok(serde_json::from_str(body)?)
}

pub fn parse_follow_up_lines(reply: &str) -> Result<Vec<String>, RagError> {
    let marker = Regex::new(r"^\s*(?:[-*•]|\d+[.)])\s*")?;
    Ok(reply
        .lines()
        .map(|line| marker.replace(line, "").trim().trim_matches('"').trim().to_string())
        .filter(|line| !line.is_empty())
        .take(MAX_FOLLOW_UPS)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn scores_are_normalized_and_clamped() -> Result<(), RagError> {
        assert_eq!(parse_relevance_score("8")?, 0.8);
        assert_eq!(parse_relevance_score("Score: 7.5/10")?, 0.75);
        assert_eq!(parse_relevance_score("42")?, 1.0);
        assert!(parse_relevance_score("very relevant").is_err());
        Ok(())
    }

    #[test]
    fn score_prefers_the_rating_over_scale_labels() -> Result<(), RagError> {
        assert_eq!(parse_relevance_score("Relevance (0-10): 8")?, 0.8);
        assert_eq!(parse_relevance_score("On a 0 to 10 scale:\n6\n")?, 0.6);
        assert_eq!(parse_relevance_score("I'd rate it 9.")?, 0.9);
        assert_eq!(parse_relevance_score("3 because it names 2 parts only")?, 0.3);
        Ok(())
    }

    #[test]
    fn null_reply_fields_are_empty() -> Result<(), RagError> {
        let verdict: SufficiencyVerdict =
            parse_json_reply(r#"{"is_sufficient": true, "missing_information": null}"#)?;
        assert!(verdict.is_sufficient);
        assert!(verdict.missing_info.is_empty());

        let assessment: ContextAssessment = parse_json_reply(
            "```json\n{\"overall_quality\": 8, \"irrelevant_chunks\": null, \"most_relevant_chunks\": null}\n```",
        )?;
        assert_eq!(assessment.overall_quality, 8.0);
        assert!(assessment.irrelevant_chunks.is_empty());
        assert!(assessment.most_relevant_chunks.is_empty());
        Ok(())
    }

    #[test]
    fn fenced_json_is_unwrapped() -> Result<(), RagError> {
        let verdict: SufficiencyVerdict = parse_json_reply(
            "```json\n{\"is_sufficient\": false, \"missing_information\": \"dates\"}\n```",
        )?;
        assert!(!verdict.is_sufficient);
        assert_eq!(verdict.missing_info, "dates");

        let verdict: SufficiencyVerdict = parse_json_reply("{\"is_sufficient\": true}")?;
        assert!(verdict.is_sufficient);
        assert!(verdict.missing_info.is_empty());
        Ok(())
    }

    #[test]
    fn follow_up_lines_drop_markers_and_cap_at_three() -> Result<(), RagError> {
        let queries = parse_follow_up_lines("1. first\n\n- second\n* \"third\"\nfourth\n")?;
        assert_eq!(queries, vec!["first", "second", "third"]);
        Ok(())
    }

    struct ScriptedCompletion {
        replies: Mutex<Vec<String>>,
        formats: Mutex<Vec<ResponseFormat>>,
    }

    impl ScriptedCompletion {
        fn new(replies: &[&str]) -> Self {
            Self {
                replies: Mutex::new(replies.iter().rev().map(|r| r.to_string()).collect()),
                formats: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl CompletionModel for ScriptedCompletion {
        async fn complete(
            &self,
            _prompt: &str,
            format: ResponseFormat,
        ) -> Result<String, RagError> {
            self.formats.lock().expect("formats lock").push(format);
            self.replies
                .lock()
                .expect("replies lock")
                .pop()
                .ok_or_else(|| RagError::Request("script exhausted".to_string()))
        }
    }

    #[tokio::test]
    async fn assessment_requests_json_and_clamps_quality() -> Result<(), RagError> {
        let refinement = PromptedRefinement::new(ScriptedCompletion::new(&[
            r#"{"overall_quality": 14, "missing_information": [], "irrelevant_chunks": [2]}"#,
        ]));
        let assessment = refinement.assess_context("q", &["a", "b"]).await?;

        assert_eq!(assessment.overall_quality, 10.0);
        assert_eq!(assessment.irrelevant_chunks, vec![2]);
        let formats = refinement.model().formats.lock().expect("formats lock").clone();
        assert_eq!(formats, vec![ResponseFormat::Json]);
        Ok(())
    }

    #[tokio::test]
    async fn sufficient_verdict_with_null_gap_survives_self_rag() {
        use crate::models::{Chunk, RetrievedChunk, SelfRagOptions};
        use crate::self_rag::SelfRagRefiner;

        let refinement = PromptedRefinement::new(ScriptedCompletion::new(&[
            "9",
            r#"{"is_sufficient": true, "missing_information": null}"#,
        ]));
        let hits = vec![RetrievedChunk::new(
            Chunk {
                index: 0,
                start: 0,
                text: "The relief valve opens at 280 bar under load.".to_string(),
            },
            0.7,
        )];

        let outcome = SelfRagRefiner::new(SelfRagOptions::default())
            .refine(&refinement, "When does the valve open?", hits)
            .await;
        assert!(outcome.metrics.is_sufficient);
        assert!(outcome.metrics.missing_info.is_empty());
        assert_eq!(outcome.metrics.filtered_chunks, 1);
    }

    #[tokio::test]
    async fn empty_reformulation_is_an_error() {
        let refinement = PromptedRefinement::new(ScriptedCompletion::new(&["  \"\" "]));
        assert!(refinement.reformulate("what is x").await.is_err());
    }
}
