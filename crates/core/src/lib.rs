pub mod cancel;
pub mod chunking;
pub mod config;
pub mod embeddings;
pub mod error;
pub mod ingest;
pub mod llm;
pub mod models;
pub mod parsers;
pub mod rephrasers;
pub mod rerankers;
pub mod router;
pub mod search;
pub mod source;
pub mod store;
pub mod stores;
pub mod traits;

pub use cancel::CancelSignal;
pub use chunking::{chunk_by_paragraph, normalize_whitespace, ChunkingConfig};
pub use config::{ComponentConfig, ComponentRegistry, ParsersConfig, Pipeline, PipelineConfig};
pub use embeddings::{CharacterNgramEmbedder, Embedder, HttpEmbedder, DEFAULT_EMBEDDING_DIMENSIONS};
pub use error::{ConfigError, IngestError, ModelError, SearchError, StoreError};
pub use ingest::{FailedDocument, IngestOptions, IngestOrchestrator, IngestReport};
pub use llm::{ChatCompletionsClient, LlmClient};
pub use models::{
    element_identity, Document, DocumentMeta, DocumentType, Element, ElementContent, ElementKind,
    FetchedContent, SearchResult,
};
pub use parsers::{ImageParser, Parser, PdfParser, TextParser};
pub use rephrasers::{LlmRephraser, MultiQueryRephraser, NoopRephraser};
pub use rerankers::{HttpReranker, NoopReranker};
pub use router::ParserRouter;
pub use search::{merge_max_score, SearchOptions, SearchOrchestrator};
pub use source::{
    source_from_uri, GcsSource, HttpSource, HuggingFaceSource, LocalFileSource, Source, TextSource,
};
pub use store::{StoreHit, VectorEntry};
pub use stores::{InMemoryVectorStore, QdrantStore};
pub use traits::{Rephraser, Reranker, VectorStore};
