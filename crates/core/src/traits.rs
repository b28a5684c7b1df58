use crate::error::{ModelError, StoreError};
use crate::models::SearchResult;
use crate::store::{StoreHit, VectorEntry};
use async_trait::async_trait;

/// Persistence and similarity lookup keyed by element identity.
///
/// `upsert` overwrites entries with the same id. Only per-call atomicity is
/// assumed; concurrent writers resolve by last write wins.
#[async_trait]
pub trait VectorStore: Send + Sync {
    async fn upsert(&self, entries: &[VectorEntry]) -> Result<(), StoreError>;

    /// Nearest neighbours of `vector`, best first.
    async fn query(&self, vector: &[f32], k: usize) -> Result<Vec<StoreHit>, StoreError>;

    async fn remove(&self, ids: &[String]) -> Result<(), StoreError>;

    /// Ids of every stored element that belongs to `document_id`.
    async fn list_document(&self, document_id: &str) -> Result<Vec<String>, StoreError>;
}

#[async_trait]
pub trait Rephraser: Send + Sync {
    /// At least one query string.
    async fn rephrase(&self, query: &str) -> Result<Vec<String>, ModelError>;
}

#[async_trait]
pub trait Reranker: Send + Sync {
    /// Reorders (and may rescore or drop) candidates against `query`.
    async fn rerank(
        &self,
        query: &str,
        candidates: &[SearchResult],
    ) -> Result<Vec<SearchResult>, ModelError>;
}
