use crate::agentic::AgenticRefiner;
use crate::chunking::{chunk_text, normalize_whitespace};
use crate::embeddings::Embedder;
use crate::extractor::extract_document;
use crate::generator::Generator;
use crate::models::{
    DocumentInfo, DocumentKind, EmbeddingPurpose, QueryRequest, QueryResponse, RagMode, RagOptions,
    RetrievedChunk, Source, UploadSummary,
};
use crate::retrieval::{retrieve, ChunkIndex};
use crate::self_rag::SelfRagRefiner;
use crate::store::SessionStore;
use crate::traits::{CompletionModel, RefinementModel};
use crate::{IngestError, RagError};
use chrono::Utc;
use sha2::{Digest, Sha256};
use std::time::Duration;
use tracing::info;

/// Per-session document question answering over a single uploaded file.
pub struct DocumentQa<E, R, C> {
    embedder: E,
    refinement: R,
    generator: Generator<C>,
    sessions: SessionStore,
    options: RagOptions,
}

impl<E, R, C> DocumentQa<E, R, C>
where
    E: Embedder,
    R: RefinementModel,
    C: CompletionModel,
{
    pub fn new(embedder: E, refinement: R, completion: C, options: RagOptions) -> Self {
        Self {
            embedder,
            refinement,
            generator: Generator::new(completion),
            sessions: SessionStore::default(),
            options,
        }
    }

    pub fn with_session_ttl(mut self, ttl: Duration) -> Self {
        self.sessions = SessionStore::new(ttl);
        self
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    pub fn options(&self) -> &RagOptions {
        &self.options
    }

    pub async fn ingest(
        &self,
        session_id: &str,
        file_name: &str,
        bytes: &[u8],
    ) -> Result<UploadSummary, IngestError> {
        let (kind, text) = extract_document(file_name, bytes)?;
        self.index_document(session_id, file_name, kind, &text, bytes)
            .await
    }

    /// Indexes text that was extracted elsewhere.
    pub async fn ingest_text(
        &self,
        session_id: &str,
        file_name: &str,
        text: &str,
    ) -> Result<UploadSummary, IngestError> {
        let text = normalize_whitespace(text);
        if text.is_empty() {
            return Err(IngestError::EmptyDocument(file_name.to_string()));
        }
        let kind = DocumentKind::from_file_name(file_name).unwrap_or(DocumentKind::Txt);
        self.index_document(session_id, file_name, kind, &text, text.as_bytes())
            .await
    }

    async fn index_document(
        &self,
        session_id: &str,
        file_name: &str,
        kind: DocumentKind,
        text: &str,
        raw: &[u8],
    ) -> Result<UploadSummary, IngestError> {
        if session_id.trim().is_empty() {
            return Err(IngestError::InvalidArgument("session id is empty".to_string()));
        }

        let chunks = chunk_text(text, self.options.chunking)?;
        let mut vectors = Vec::with_capacity(chunks.len());
        for chunk in &chunks {
            vectors.push(
                self.embedder
                    .embed(&chunk.text, EmbeddingPurpose::Document)
                    .await?,
            );
        }

        let characters = text.chars().count();
        let chunk_count = chunks.len();
        let index = ChunkIndex::new(chunks, vectors)?;
        let document = DocumentInfo {
            document_id: document_id(raw),
            file_name: file_name.to_string(),
            kind,
            characters,
            chunk_count,
            uploaded_at: Utc::now(),
        };

        let replaced = self.sessions.put(session_id, document, index).await;
        info!(
            session_id,
            file_name,
            characters,
            chunks = chunk_count,
            replaced = ?replaced.map(|previous| previous.file_name),
            "document indexed"
        );

        Ok(UploadSummary {
            message: format!("File {file_name} processed successfully"),
            document_size: characters,
            chunks: chunk_count,
        })
    }

    pub async fn answer(
        &self,
        session_id: &str,
        request: &QueryRequest,
    ) -> Result<QueryResponse, RagError> {
        let query = request.query.trim();
        if query.is_empty() {
            return Err(RagError::EmptyQuery);
        }
        let entry = self
            .sessions
            .get(session_id)
            .await
            .ok_or(RagError::NoDocument)?;

        info!(session_id, mode = ?request.rag_mode, query, "answering query");
        match request.rag_mode {
            RagMode::SelfRag => {
                let hits = retrieve(&self.embedder, query, &entry.index, self.options.top_k).await?;
                let outcome = SelfRagRefiner::new(self.options.self_rag.clone())
                    .refine(&self.refinement, query, hits)
                    .await;
                let response = self.generator.answer(query, &outcome.context()).await?;

                Ok(QueryResponse {
                    response,
                    sources: self.sources(&outcome.chunks),
                    rag_mode: RagMode::SelfRag,
                    self_rag_metrics: Some(outcome.metrics),
                    agent_rag_metrics: None,
                })
            }
            RagMode::Agent => {
                let outcome = AgenticRefiner::new(self.options.agentic.clone(), self.options.top_k)
                    .run(&self.embedder, &self.refinement, query, &entry.index)
                    .await?;
                let response = self.generator.answer(query, &outcome.context).await?;

                Ok(QueryResponse {
                    response,
                    sources: self.sources(&outcome.candidates),
                    rag_mode: RagMode::Agent,
                    self_rag_metrics: None,
                    agent_rag_metrics: Some(outcome.metrics),
                })
            }
        }
    }

    fn sources(&self, chunks: &[RetrievedChunk]) -> Vec<Source> {
        chunks
            .iter()
            .enumerate()
            .map(|(position, hit)| Source {
                index: position + 1,
                text: preview(&hit.chunk.text, self.options.source_preview_chars),
                relevant: hit.relevant,
            })
            .collect()
    }
}

fn document_id(raw: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(raw);
    format!("{:x}", hasher.finalize())
}

fn preview(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}
