use thiserror::Error;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("unsupported file type: {0}")]
    UnsupportedFileType(String),

    #[error("pdf parse error: {0}")]
    PdfParse(String),

    #[error("docx parse error: {0}")]
    DocxParse(String),

    #[error("document has no readable text: {0}")]
    EmptyDocument(String),

    #[error("invalid chunking config: {0}")]
    InvalidChunkConfig(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("embedding failed: {0}")]
    Embedding(#[from] RagError),
}

#[derive(Debug, Error)]
pub enum RagError {
    #[error("invalid response from {backend}: {details}")]
    BackendResponse { backend: String, details: String },

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{backend} request timed out")]
    Timeout { backend: String },

    #[error("url parse error: {0}")]
    Url(#[from] url::ParseError),

    #[error("serialize error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("regex error: {0}")]
    Regex(#[from] regex::Error),

    #[error("unparsable model output: {0}")]
    ModelOutput(String),

    #[error("request failed: {0}")]
    Request(String),

    #[error("query is empty")]
    EmptyQuery,

    #[error("no document found, upload a document first")]
    NoDocument,
}

impl RagError {
    /// Maps a transport error, keeping timeouts distinguishable from other failures.
    pub fn from_transport(backend: &str, error: reqwest::Error) -> Self {
        if error.is_timeout() {
            RagError::Timeout {
                backend: backend.to_string(),
            }
        } else {
            RagError::Http(error)
        }
    }
}

pub type Result<T, E = IngestError> = std::result::Result<T, E>;
