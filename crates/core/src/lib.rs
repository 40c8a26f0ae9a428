pub mod agentic;
pub mod chunking;
pub mod embeddings;
pub mod error;
pub mod extractor;
pub mod generator;
pub mod models;
pub mod orchestrator;
pub mod prompts;
pub mod providers;
pub mod retrieval;
pub mod self_rag;
pub mod store;
pub mod traits;

pub use agentic::{AgenticOutcome, AgenticRefiner};
pub use chunking::{chunk_text, normalize_whitespace, ChunkingConfig};
pub use embeddings::{CharacterNgramEmbedder, Embedder, DEFAULT_EMBEDDING_DIMENSIONS};
pub use error::{IngestError, RagError};
pub use extractor::{extract_document, extract_file, extract_text};
pub use generator::{Generator, NO_CONTEXT_ANSWER};
pub use models::{
    AgentRagMetrics, AgenticOptions, Chunk, ContextAssessment, DocumentInfo, DocumentKind,
    EmbeddingPurpose, QueryRequest, QueryResponse, RagMode, RagOptions, RetrievedChunk,
    ScoreFailurePolicy, SelfRagMetrics, SelfRagOptions, Source, SufficiencyVerdict, UploadSummary,
};
pub use orchestrator::DocumentQa;
pub use prompts::PromptedRefinement;
pub use providers::{GeminiClient, GeminiConfig};
pub use retrieval::{cosine_similarity, retrieve, top_k, ChunkIndex};
pub use self_rag::{SelfRagOutcome, SelfRagRefiner};
pub use store::{SessionStore, DEFAULT_SESSION_TTL};
pub use traits::{CompletionModel, RefinementModel, ResponseFormat};
