use thiserror::Error;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("source unavailable: {source_id}: {reason}")]
    SourceUnavailable { source_id: String, reason: String },

    #[error("unsupported document type: {0}")]
    UnsupportedDocumentType(String),

    #[error("parsing failed for {document_id}: {cause}")]
    ParsingFailed { document_id: String, cause: String },

    #[error("embedding failed: {0}")]
    EmbeddingFailed(String),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("cancelled: {0}")]
    Cancelled(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("regex error: {0}")]
    Regex(#[from] regex::Error),
}

impl IngestError {
    pub fn parsing(document_id: impl Into<String>, cause: impl ToString) -> Self {
        Self::ParsingFailed {
            document_id: document_id.into(),
            cause: cause.to_string(),
        }
    }

    pub fn unavailable(source_id: impl Into<String>, reason: impl ToString) -> Self {
        Self::SourceUnavailable {
            source_id: source_id.into(),
            reason: reason.to_string(),
        }
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{backend} unavailable: {details}")]
    Unavailable { backend: String, details: String },

    #[error("{backend} rejected write: {details}")]
    WriteFailed { backend: String, details: String },

    #[error("vector dimension {actual} does not match store dimension {expected}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("serialize error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    pub fn is_unavailable(&self) -> bool {
        match self {
            Self::Unavailable { .. } => true,
            Self::Http(error) => error.is_connect() || error.is_timeout(),
            _ => false,
        }
    }
}

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("embedding failed: {0}")]
    EmbeddingFailed(String),

    #[error("rephrase failed: {0}")]
    RephraseFailed(String),

    #[error("rerank failed: {0}")]
    RerankFailed(String),

    #[error("completion failed: {0}")]
    Completion(String),

    #[error("not supported: {0}")]
    Unsupported(String),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("serialize error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum SearchError {
    #[error("search request failed: {0}")]
    Request(String),

    #[error("query embedding failed: {0}")]
    EmbeddingFailed(String),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("cancelled: {0}")]
    Cancelled(String),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unknown {role} kind: {kind}")]
    UnknownComponent { role: String, kind: String },

    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialize error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T, E = IngestError> = std::result::Result<T, E>;
