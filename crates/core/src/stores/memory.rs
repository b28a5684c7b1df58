use crate::error::StoreError;
use crate::models::Element;
use crate::store::{StoreHit, VectorEntry};
use crate::traits::VectorStore;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{OnceCell, RwLock};
use tracing::debug;

const BACKEND: &str = "memory";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredEntry {
    element: Element,
    vector: Vec<f32>,
}

#[derive(Debug, Clone)]
pub struct InMemoryVectorStore {
    dimension: usize,
    entries: Arc<RwLock<HashMap<String, StoredEntry>>>,
    snapshot: Option<PathBuf>,
    loaded: Arc<OnceCell<()>>,
}

impl InMemoryVectorStore {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            entries: Arc::new(RwLock::new(HashMap::new())),
            snapshot: None,
            loaded: Arc::new(OnceCell::new()),
        }
    }

    pub fn with_snapshot(mut self, path: impl Into<PathBuf>) -> Self {
        self.snapshot = Some(path.into());
        self
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    async fn ensure_loaded(&self) -> Result<(), StoreError> {
        let Some(path) = &self.snapshot else {
            return Ok(());
        };

        self.loaded
            .get_or_try_init(|| async {
                let bytes = match tokio::fs::read(path).await {
                    Ok(bytes) => bytes,
                    Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                        return Ok::<(), StoreError>(());
                    }
                    Err(error) => return Err(unavailable(path, error)),
                };
                let stored: Vec<StoredEntry> = serde_json::from_slice(&bytes)?;
                let mut entries = self.entries.write().await;
                for entry in stored {
                    entries.insert(entry.element.id.clone(), entry);
                }
                debug!(path = %path.display(), count = entries.len(), "loaded snapshot");
                Ok(())
            })
            .await
            .map(|_| ())
    }

    async fn persist(&self, entries: &HashMap<String, StoredEntry>) -> Result<(), StoreError> {
        let Some(path) = &self.snapshot else {
            return Ok(());
        };

        let mut stored: Vec<&StoredEntry> = entries.values().collect();
        stored.sort_by(|a, b| a.element.id.cmp(&b.element.id));
        let bytes = serde_json::to_vec(&stored)?;
        tokio::fs::write(path, bytes)
            .await
            .map_err(|error| StoreError::WriteFailed {
                backend: BACKEND.to_string(),
                details: format!("{}: {error}", path.display()),
            })
    }

    pub async fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.entries.read().await.keys().cloned().collect();
        ids.sort_unstable();
        ids
    }

    fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
        if a.len() != b.len() {
            return 0.0;
        }

        let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
        let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

        if norm_a == 0.0 || norm_b == 0.0 {
            return 0.0;
        }

        f64::from(dot / (norm_a * norm_b))
    }

    fn check_dimension(&self, vector: &[f32]) -> Result<(), StoreError> {
        if vector.len() == self.dimension {
            Ok(())
        } else {
            Err(StoreError::DimensionMismatch {
                expected: self.dimension,
                actual: vector.len(),
            })
        }
    }
}

fn unavailable(path: &Path, error: std::io::Error) -> StoreError {
    StoreError::Unavailable {
        backend: BACKEND.to_string(),
        details: format!("{}: {error}", path.display()),
    }
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    async fn upsert(&self, entries: &[VectorEntry]) -> Result<(), StoreError> {
        for entry in entries {
            self.check_dimension(&entry.vector)?;
        }
        self.ensure_loaded().await?;

        let mut store = self.entries.write().await;
        for entry in entries {
            store.insert(
                entry.id().to_string(),
                StoredEntry {
                    element: entry.element.clone(),
                    vector: entry.vector.clone(),
                },
            );
        }
        self.persist(&store).await?;
        debug!(count = entries.len(), "upserted entries");
        Ok(())
    }

    async fn query(&self, vector: &[f32], k: usize) -> Result<Vec<StoreHit>, StoreError> {
        self.check_dimension(vector)?;
        self.ensure_loaded().await?;

        let store = self.entries.read().await;
        let mut scored: Vec<(f64, &StoredEntry)> = store
            .values()
            .map(|entry| (Self::cosine_similarity(vector, &entry.vector), entry))
            .collect();

        scored.sort_by(|a, b| {
            b.0.total_cmp(&a.0)
                .then_with(|| a.1.element.id.cmp(&b.1.element.id))
        });

        Ok(scored
            .into_iter()
            .take(k)
            .map(|(score, entry)| StoreHit {
                element: entry.element.clone(),
                score,
            })
            .collect())
    }

    async fn remove(&self, ids: &[String]) -> Result<(), StoreError> {
        self.ensure_loaded().await?;
        let mut store = self.entries.write().await;
        for id in ids {
            store.remove(id);
        }
        self.persist(&store).await
    }

    async fn list_document(&self, document_id: &str) -> Result<Vec<String>, StoreError> {
        self.ensure_loaded().await?;
        let store = self.entries.read().await;
        Ok(store
            .iter()
            .filter(|(_, entry)| entry.element.document_id == document_id)
            .map(|(id, _)| id.clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ElementContent;

    fn entry(document_id: &str, position: u64, vector: Vec<f32>) -> VectorEntry {
        VectorEntry {
            element: Element::new(document_id, position, ElementContent::text("x")),
            vector,
        }
    }

    #[tokio::test]
    async fn upsert_overwrites_by_id() -> Result<(), StoreError> {
        let store = InMemoryVectorStore::new(2);
        store.upsert(&[entry("doc", 0, vec![1.0, 0.0])]).await?;
        store.upsert(&[entry("doc", 0, vec![0.0, 1.0])]).await?;
        assert_eq!(store.len().await, 1);

        let hits = store.query(&[0.0, 1.0], 5).await?;
        assert!((hits[0].score - 1.0).abs() < 1e-6);
        Ok(())
    }

    #[tokio::test]
    async fn query_is_best_first_and_bounded() -> Result<(), StoreError> {
        let store = InMemoryVectorStore::new(2);
        store
            .upsert(&[
                entry("doc", 0, vec![1.0, 0.0]),
                entry("doc", 1, vec![0.7, 0.7]),
                entry("doc", 2, vec![0.0, 1.0]),
            ])
            .await?;

        let hits = store.query(&[1.0, 0.0], 2).await?;
        let positions: Vec<_> = hits.iter().map(|hit| hit.element.position).collect();
        assert_eq!(positions, vec![0, 1]);
        Ok(())
    }

    #[tokio::test]
    async fn dimension_mismatch_is_rejected() {
        let store = InMemoryVectorStore::new(3);
        let result = store.upsert(&[entry("doc", 0, vec![1.0])]).await;
        assert!(matches!(
            result,
            Err(StoreError::DimensionMismatch { expected: 3, actual: 1 })
        ));
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn list_and_remove_by_document() -> Result<(), StoreError> {
        let store = InMemoryVectorStore::new(2);
        store
            .upsert(&[
                entry("a", 0, vec![1.0, 0.0]),
                entry("a", 1, vec![1.0, 0.0]),
                entry("b", 0, vec![1.0, 0.0]),
            ])
            .await?;

        let ids = store.list_document("a").await?;
        assert_eq!(ids.len(), 2);
        store.remove(&ids).await?;
        assert_eq!(store.len().await, 1);
        assert!(store.list_document("a").await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn snapshot_is_shared_across_instances() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("store.json");

        let writer = InMemoryVectorStore::new(2).with_snapshot(&path);
        writer.upsert(&[entry("a", 0, vec![1.0, 0.0])]).await?;

        let reader = InMemoryVectorStore::new(2).with_snapshot(&path);
        let hits = reader.query(&[1.0, 0.0], 1).await?;
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].element.document_id, "a");
        Ok(())
    }
}
