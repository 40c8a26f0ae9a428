use crate::chunking::ChunkingConfig;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum DocumentKind {
    Pdf,
    Docx,
    Txt,
}

impl DocumentKind {
    pub fn from_extension(extension: &str) -> Option<Self> {
        match extension.to_ascii_lowercase().as_str() {
            "pdf" => Some(Self::Pdf),
            "docx" => Some(Self::Docx),
            "txt" => Some(Self::Txt),
            _ => None,
        }
    }

    pub fn from_file_name(file_name: &str) -> Option<Self> {
        let (_, extension) = file_name.rsplit_once('.')?;
        Self::from_extension(extension)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentInfo {
    pub document_id: String,
    pub file_name: String,
    pub kind: DocumentKind,
    pub characters: usize,
    pub chunk_count: usize,
    pub uploaded_at: DateTime<Utc>,
}

/// A window of the document text. `start` is a character offset.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Chunk {
    pub index: usize,
    pub start: usize,
    pub text: String,
}

impl Chunk {
    pub fn char_len(&self) -> usize {
        self.text.chars().count()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbeddingPurpose {
    Document,
    Query,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RetrievedChunk {
    pub chunk: Chunk,
    pub similarity: f32,
    pub relevance: Option<f32>,
    pub relevant: bool,
}

impl RetrievedChunk {
    pub fn new(chunk: Chunk, similarity: f32) -> Self {
        Self {
            chunk,
            similarity,
            relevance: None,
            relevant: true,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq, Hash, Default)]
pub enum RagMode {
    #[default]
    #[serde(rename = "self")]
    SelfRag,
    #[serde(rename = "agent")]
    Agent,
}

impl RagMode {
    /// `agent` and `agentic` select the agent loop; anything else is Self-RAG.
    pub fn from_name(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "agent" | "agentic" => Self::Agent,
            _ => Self::SelfRag,
        }
    }
}

impl<'de> Deserialize<'de> for RagMode {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let name = Option::<String>::deserialize(deserializer)?;
        Ok(name.as_deref().map(Self::from_name).unwrap_or_default())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryRequest {
    pub query: String,
    #[serde(default)]
    pub rag_mode: RagMode,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Source {
    pub index: usize,
    pub text: String,
    pub relevant: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SelfRagMetrics {
    pub initial_chunks: usize,
    pub filtered_chunks: usize,
    pub filtered_out: usize,
    pub is_sufficient: bool,
    pub missing_info: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentRagMetrics {
    pub initial_chunks: usize,
    pub used_chunks: usize,
    pub filtered_out: usize,
    pub iterations: usize,
    pub context_quality: Option<f32>,
    pub follow_up_queries: Vec<String>,
    pub missing_info: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryResponse {
    pub response: String,
    pub sources: Vec<Source>,
    pub rag_mode: RagMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub self_rag_metrics: Option<SelfRagMetrics>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_rag_metrics: Option<AgentRagMetrics>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadSummary {
    pub message: String,
    pub document_size: usize,
    pub chunks: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SufficiencyVerdict {
    pub is_sufficient: bool,
    #[serde(default, rename = "missing_information", deserialize_with = "null_as_default")]
    pub missing_info: String,
}

/// Model judgement over a whole context set. Chunk positions are 1-based.
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
pub struct ContextAssessment {
    #[serde(default, deserialize_with = "null_as_default")]
    pub overall_quality: f32,
    #[serde(default, deserialize_with = "string_or_list")]
    pub missing_information: Vec<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub irrelevant_chunks: Vec<usize>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub most_relevant_chunks: Vec<usize>,
    #[serde(default, deserialize_with = "string_or_list")]
    pub knowledge_gaps: Vec<String>,
}

/// Model replies send `null` for "nothing"; read it as the empty value.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

fn string_or_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
        Nothing(()),
    }

    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(value) if value.trim().is_empty() => Vec::new(),
        OneOrMany::One(value) => vec![value],
        OneOrMany::Many(values) => values,
        OneOrMany::Nothing(()) => Vec::new(),
    })
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ScoreFailurePolicy {
    /// Treat the chunk as relevant.
    #[default]
    Keep,
    Drop,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SelfRagOptions {
    pub relevance_threshold: f32,
    pub on_score_failure: ScoreFailurePolicy,
    pub keep_best_when_all_filtered: bool,
    pub expand_when_insufficient: bool,
    pub max_expansion_chunks: usize,
}

impl Default for SelfRagOptions {
    fn default() -> Self {
        Self {
            relevance_threshold: 0.6,
            on_score_failure: ScoreFailurePolicy::Keep,
            keep_best_when_all_filtered: false,
            expand_when_insufficient: false,
            max_expansion_chunks: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgenticOptions {
    pub max_iterations: usize,
    pub quality_threshold: f32,
    pub max_follow_up_queries: usize,
    pub max_new_chunks_per_iteration: usize,
}

impl Default for AgenticOptions {
    fn default() -> Self {
        Self {
            max_iterations: 3,
            quality_threshold: 7.0,
            max_follow_up_queries: 3,
            max_new_chunks_per_iteration: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RagOptions {
    pub top_k: usize,
    pub chunking: ChunkingConfig,
    pub source_preview_chars: usize,
    pub self_rag: SelfRagOptions,
    pub agentic: AgenticOptions,
}

impl Default for RagOptions {
    fn default() -> Self {
        Self {
            top_k: 5,
            chunking: ChunkingConfig::default(),
            source_preview_chars: 150,
            self_rag: SelfRagOptions::default(),
            agentic: AgenticOptions::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_kind_is_case_insensitive() {
        assert_eq!(DocumentKind::from_file_name("Report.PDF"), Some(DocumentKind::Pdf));
        assert_eq!(DocumentKind::from_file_name("notes.txt"), Some(DocumentKind::Txt));
        assert_eq!(DocumentKind::from_file_name("memo.docx"), Some(DocumentKind::Docx));
        assert_eq!(DocumentKind::from_file_name("legacy.doc"), None);
        assert_eq!(DocumentKind::from_file_name("README"), None);
    }

    #[test]
    fn query_request_defaults_to_self_rag() -> Result<(), serde_json::Error> {
        let request: QueryRequest = serde_json::from_str(r#"{"query": "What is X?"}"#)?;
        assert_eq!(request.rag_mode, RagMode::SelfRag);

        let request: QueryRequest =
            serde_json::from_str(r#"{"query": "What is X?", "rag_mode": "agentic"}"#)?;
        assert_eq!(request.rag_mode, RagMode::Agent);
        Ok(())
    }

    #[test]
    fn unknown_or_null_rag_mode_falls_back_to_self_rag() -> Result<(), serde_json::Error> {
        for body in [
            r#"{"query": "q", "rag_mode": "foo"}"#,
            r#"{"query": "q", "rag_mode": null}"#,
            r#"{"query": "q", "rag_mode": ""}"#,
        ] {
            let request: QueryRequest = serde_json::from_str(body)?;
            assert_eq!(request.rag_mode, RagMode::SelfRag, "{body}");
        }
        let request: QueryRequest = serde_json::from_str(r#"{"query": "q", "rag_mode": "Agent"}"#)?;
        assert_eq!(request.rag_mode, RagMode::Agent);
        Ok(())
    }

    #[test]
    fn response_omits_absent_metrics() -> Result<(), serde_json::Error> {
        let response = QueryResponse {
            response: "answer".to_string(),
            sources: Vec::new(),
            rag_mode: RagMode::Agent,
            self_rag_metrics: None,
            agent_rag_metrics: None,
        };
        let value = serde_json::to_value(&response)?;
        assert_eq!(value["rag_mode"], "agent");
        assert!(value.get("self_rag_metrics").is_none());
        Ok(())
    }

    #[test]
    fn assessment_accepts_single_string_lists() -> Result<(), serde_json::Error> {
        let assessment: ContextAssessment = serde_json::from_str(
            r#"{"overall_quality": 3, "missing_information": "the release date", "knowledge_gaps": null}"#,
        )?;
        assert_eq!(assessment.overall_quality, 3.0);
        assert_eq!(assessment.missing_information, vec!["the release date".to_string()]);
        assert!(assessment.knowledge_gaps.is_empty());
        assert!(assessment.irrelevant_chunks.is_empty());
        Ok(())
    }

    #[test]
    fn null_fields_read_as_empty() -> Result<(), serde_json::Error> {
        let verdict: SufficiencyVerdict =
            serde_json::from_str(r#"{"is_sufficient": true, "missing_information": null}"#)?;
        assert!(verdict.is_sufficient);
        assert!(verdict.missing_info.is_empty());

        let assessment: ContextAssessment = serde_json::from_str(
            r#"{"overall_quality": null, "irrelevant_chunks": null, "most_relevant_chunks": null}"#,
        )?;
        assert_eq!(assessment.overall_quality, 0.0);
        assert!(assessment.irrelevant_chunks.is_empty());
        assert!(assessment.most_relevant_chunks.is_empty());
        Ok(())
    }
}
