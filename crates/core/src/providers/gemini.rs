use crate::embeddings::Embedder;
use crate::models::EmbeddingPurpose;
use crate::traits::{CompletionModel, ResponseFormat};
use crate::RagError;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;
use url::Url;

const BACKEND: &str = "gemini";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeminiConfig {
    pub api_key: String,
    pub base_url: String,
    pub generation_model: String,
    pub embedding_model: String,
    pub timeout: Duration,
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: "https://generativelanguage.googleapis.com".to_string(),
            generation_model: "gemini-2.0-flash".to_string(),
            embedding_model: "embedding-001".to_string(),
            timeout: Duration::from_secs(60),
        }
    }
}

/// Client for the Generative Language API: `embedContent` and `generateContent`.
#[derive(Debug, Clone)]
pub struct GeminiClient {
    client: Client,
    base: Url,
    api_key: String,
    generation_model: String,
    embedding_model: String,
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embedding: Option<EmbeddingValues>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingValues {
    #[serde(default)]
    values: Vec<f32>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    prompt_feedback: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
struct Part {
    text: Option<String>,
}

impl GeminiClient {
    pub fn new(config: GeminiConfig) -> Result<Self, RagError> {
        if config.api_key.trim().is_empty() {
            return Err(RagError::Request("gemini api key is not configured".to_string()));
        }

        let base = Url::parse(&format!("{}/", config.base_url.trim_end_matches('/')))?;
        let client = Client::builder().timeout(config.timeout).build()?;

        Ok(Self {
            client,
            base,
            api_key: config.api_key,
            generation_model: bare_model_name(&config.generation_model),
            embedding_model: bare_model_name(&config.embedding_model),
        })
    }

    fn endpoint(&self, model: &str, method: &str) -> Result<Url, RagError> {
        Ok(self.base.join(&format!("v1beta/models/{model}:{method}"))?)
    }

    async fn post(&self, url: Url, body: &Value) -> Result<Value, RagError> {
        let response = self
            .client
            .post(url)
            .header("x-goog-api-key", &self.api_key)
            .json(body)
            .send()
            .await
            .map_err(|error| RagError::from_transport(BACKEND, error))?;

        let status = response.status();
        if !status.is_success() {
            let details = response.text().await.unwrap_or_default();
            return Err(RagError::BackendResponse {
                backend: BACKEND.to_string(),
                details: format!("{status}: {}", details.trim()),
            });
        }

        response
            .json()
            .await
            .map_err(|error| RagError::from_transport(BACKEND, error))
    }
}

fn bare_model_name(model: &str) -> String {
    model.trim().trim_start_matches("models/").to_string()
}

fn task_type(purpose: EmbeddingPurpose) -> &'static str {
    match purpose {
        EmbeddingPurpose::Document => "RETRIEVAL_DOCUMENT",
        EmbeddingPurpose::Query => "RETRIEVAL_QUERY",
    }
}

fn embedding_from_payload(payload: Value) -> Result<Vec<f32>, RagError> {
    let parsed: EmbedResponse = serde_json::from_value(payload)?;
    match parsed.embedding {
        Some(embedding) if !embedding.values.is_empty() => Ok(embedding.values),
        _ => Err(RagError::BackendResponse {
            backend: BACKEND.to_string(),
            details: "response carried no embedding values".to_string(),
        }),
    }
}

fn text_from_payload(payload: Value) -> Result<String, RagError> {
    let parsed: GenerateResponse = serde_json::from_value(payload)?;
    let text = parsed
        .candidates
        .into_iter()
        .next()
        .and_then(|candidate| candidate.content)
        .map(|content| {
            content
                .parts
                .into_iter()
                .filter_map(|part| part.text)
                .collect::<String>()
        })
        .unwrap_or_default();

    if text.trim().is_empty() {
        let reason = parsed
            .prompt_feedback
            .as_ref()
            .and_then(|feedback| feedback.pointer("/blockReason"))
            .and_then(Value::as_str)
            .unwrap_or("no candidates");
        return Err(RagError::BackendResponse {
            backend: BACKEND.to_string(),
            details: format!("empty generation ({reason})"),
        });
    }
    Ok(text)
}

#[async_trait]
impl Embedder for GeminiClient {
    async fn embed(&self, text: &str, purpose: EmbeddingPurpose) -> Result<Vec<f32>, RagError> {
        let url = self.endpoint(&self.embedding_model, "embedContent")?;
        let body = json!({
            "model": format!("models/{}", self.embedding_model),
            "content": { "parts": [{ "text": text }] },
            "taskType": task_type(purpose),
        });
        embedding_from_payload(self.post(url, &body).await?)
    }
}

#[async_trait]
impl CompletionModel for GeminiClient {
    async fn complete(&self, prompt: &str, format: ResponseFormat) -> Result<String, RagError> {
        let url = self.endpoint(&self.generation_model, "generateContent")?;
        let mut body = json!({
            "contents": [{ "role": "user", "parts": [{ "text": prompt }] }],
        });
        if format == ResponseFormat::Json {
            body["generationConfig"] = json!({ "responseMimeType": "application/json" });
        }
        text_from_payload(self.post(url, &body).await?)
    }
}
