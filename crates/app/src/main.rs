mod server;

use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand, ValueEnum};
use docqa_core::{
    AgenticOptions, CharacterNgramEmbedder, ChunkingConfig, CompletionModel, DocumentQa, Embedder,
    GeminiClient, GeminiConfig, PromptedRefinement, QueryRequest, RagMode, RagOptions,
    ScoreFailurePolicy, SelfRagOptions,
};
use server::{AppState, Service};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "docqa", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Generative Language API key
    #[arg(long, env = "GOOGLE_API_KEY", default_value = "", hide_env_values = true)]
    api_key: String,

    /// Generative Language API base URL
    #[arg(
        long,
        env = "DOCQA_API_BASE_URL",
        default_value = "https://generativelanguage.googleapis.com"
    )]
    api_base_url: String,

    /// Model used for answers and refinement prompts
    #[arg(long, env = "DOCQA_GENERATION_MODEL", default_value = "gemini-2.0-flash")]
    generation_model: String,

    /// Model used for chunk and query embeddings
    #[arg(long, env = "DOCQA_EMBEDDING_MODEL", default_value = "embedding-001")]
    embedding_model: String,

    #[arg(long, env = "DOCQA_EMBEDDER", value_enum, default_value_t = EmbedderBackend::Gemini)]
    embedder: EmbedderBackend,

    /// Timeout for each API call, in seconds
    #[arg(long, env = "DOCQA_TIMEOUT_SECS", default_value = "60")]
    timeout_secs: u64,

    /// Number of chunks retrieved per query
    #[arg(long, env = "DOCQA_TOP_K", default_value = "5")]
    top_k: usize,

    /// Chunk window, in characters
    #[arg(long, env = "DOCQA_CHUNK_SIZE", default_value = "1000")]
    chunk_size: usize,

    /// Characters shared by consecutive chunks
    #[arg(long, env = "DOCQA_CHUNK_OVERLAP", default_value = "200")]
    chunk_overlap: usize,

    /// Minimum normalized relevance score for a chunk to stay in the context
    #[arg(long, env = "DOCQA_RELEVANCE_THRESHOLD", default_value = "0.6")]
    relevance_threshold: f32,

    /// What to do with a chunk whose relevance could not be scored
    #[arg(long, env = "DOCQA_ON_SCORE_FAILURE", value_enum, default_value_t = FailurePolicy::Keep)]
    on_score_failure: FailurePolicy,

    /// Keep the best-scored chunk when none passes the relevance threshold
    #[arg(long, env = "DOCQA_KEEP_BEST_WHEN_ALL_FILTERED", default_value_t = false)]
    keep_best_when_all_filtered: bool,

    /// Re-admit filtered chunks when the context is judged insufficient
    #[arg(long, env = "DOCQA_EXPAND_WHEN_INSUFFICIENT", default_value_t = false)]
    expand_when_insufficient: bool,

    /// How many filtered chunks an insufficient context may re-admit
    #[arg(long, env = "DOCQA_MAX_EXPANSION_CHUNKS", default_value = "3")]
    max_expansion_chunks: usize,

    /// Upper bound on agentic assessment rounds
    #[arg(long, env = "DOCQA_MAX_ITERATIONS", default_value = "3")]
    max_iterations: usize,

    /// Context quality (0-10) at which the agentic loop stops
    #[arg(long, env = "DOCQA_QUALITY_THRESHOLD", default_value = "7.0")]
    quality_threshold: f32,
}

#[derive(Subcommand)]
enum Command {
    /// Serve the upload and query HTTP API.
    Serve {
        #[arg(long, env = "DOCQA_BIND", default_value = "0.0.0.0:5000")]
        bind: String,
        /// Seconds an uploaded document stays available to its session.
        #[arg(long, env = "DOCQA_SESSION_TTL_SECS", default_value = "3600")]
        session_ttl_secs: u64,
    },
    /// Index one file and answer a single question about it.
    Ask {
        #[arg(long)]
        file: PathBuf,
        #[arg(long)]
        query: String,
        #[arg(long, value_enum, default_value_t = ModeArg::SelfRag)]
        mode: ModeArg,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum EmbedderBackend {
    Gemini,
    /// Offline character n-gram hashing.
    Ngram,
}

#[derive(Clone, Copy, ValueEnum)]
enum FailurePolicy {
    Keep,
    Drop,
}

#[derive(Clone, Copy, ValueEnum)]
enum ModeArg {
    #[value(name = "self")]
    SelfRag,
    #[value(name = "agent", alias = "agentic")]
    Agent,
}

impl Cli {
    fn rag_options(&self) -> RagOptions {
        RagOptions {
            top_k: self.top_k,
            chunking: ChunkingConfig {
                chunk_size: self.chunk_size,
                overlap: self.chunk_overlap,
            },
            self_rag: SelfRagOptions {
                relevance_threshold: self.relevance_threshold,
                on_score_failure: match self.on_score_failure {
                    FailurePolicy::Keep => ScoreFailurePolicy::Keep,
                    FailurePolicy::Drop => ScoreFailurePolicy::Drop,
                },
                keep_best_when_all_filtered: self.keep_best_when_all_filtered,
                expand_when_insufficient: self.expand_when_insufficient,
                max_expansion_chunks: self.max_expansion_chunks,
            },
            agentic: AgenticOptions {
                max_iterations: self.max_iterations,
                quality_threshold: self.quality_threshold,
                ..AgenticOptions::default()
            },
            ..RagOptions::default()
        }
    }

    fn build_service(&self) -> anyhow::Result<Service> {
        let options = self.rag_options();
        options
            .chunking
            .validate()
            .context("invalid chunking flags")?;

        let gemini = Arc::new(
            GeminiClient::new(GeminiConfig {
                api_key: self.api_key.clone(),
                base_url: self.api_base_url.clone(),
                generation_model: self.generation_model.clone(),
                embedding_model: self.embedding_model.clone(),
                timeout: Duration::from_secs(self.timeout_secs),
            })
            .context("set GOOGLE_API_KEY or pass --api-key")?,
        );

        let embedder: Arc<dyn Embedder> = match self.embedder {
            EmbedderBackend::Gemini => gemini.clone(),
            EmbedderBackend::Ngram => Arc::new(CharacterNgramEmbedder::default()),
        };
        let completion: Arc<dyn CompletionModel> = gemini;

        Ok(DocumentQa::new(
            embedder,
            PromptedRefinement::new(completion.clone()),
            completion,
            options,
        ))
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer())
        .init();

    let cli = Cli::parse();
    let qa = cli.build_service()?;
    info!(
        version = env!("CARGO_PKG_VERSION"),
        started_at = %Utc::now().to_rfc3339(),
        model = %cli.generation_model,
        "docqa boot"
    );

    match cli.command {
        Command::Serve {
            bind,
            session_ttl_secs,
        } => {
            let state = Arc::new(AppState {
                qa: qa.with_session_ttl(Duration::from_secs(session_ttl_secs)),
            });
            let listener = TcpListener::bind(&bind)
                .await
                .with_context(|| format!("failed to bind {bind}"))?;
            info!(%bind, session_ttl_secs, "listening");

            axum::serve(listener, server::router(state))
                .with_graceful_shutdown(shutdown_signal())
                .await
                .context("server error")?;
        }
        Command::Ask { file, query, mode } => {
            let file_name = file
                .file_name()
                .and_then(|name| name.to_str())
                .with_context(|| format!("not a file path: {}", file.display()))?
                .to_string();
            let bytes = tokio::fs::read(&file)
                .await
                .with_context(|| format!("failed to read {}", file.display()))?;

            let summary = qa.ingest("cli", &file_name, &bytes).await?;
            info!(chunks = summary.chunks, size = summary.document_size, "{}", summary.message);

            let request = QueryRequest {
                query,
                rag_mode: match mode {
                    ModeArg::SelfRag => RagMode::SelfRag,
                    ModeArg::Agent => RagMode::Agent,
                },
            };
            let response = qa.answer("cli", &request).await?;
            println!("{}", serde_json::to_string_pretty(&response)?);
        }
    }

    Ok(())
}

async fn shutdown_signal() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        tracing::warn!(%error, "failed to listen for shutdown signal");
    }
    info!("shutting down");
}
