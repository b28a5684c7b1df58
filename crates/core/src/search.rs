use crate::cancel::CancelSignal;
use crate::embeddings::Embedder;
use crate::error::{ConfigError, SearchError};
use crate::models::SearchResult;
use crate::store::StoreHit;
use crate::traits::{Rephraser, Reranker, VectorStore};
use futures::future::try_join_all;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchOptions {
    pub oversampling: usize,
    pub score_threshold: Option<f64>,
    pub timeout_secs: Option<u64>,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            oversampling: 3,
            score_threshold: None,
            timeout_secs: None,
        }
    }
}

impl SearchOptions {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.oversampling == 0 {
            return Err(ConfigError::Invalid(
                "search oversampling must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }
}

pub struct SearchOrchestrator {
    embedder: Arc<dyn Embedder>,
    store: Arc<dyn VectorStore>,
    rephraser: Option<Arc<dyn Rephraser>>,
    reranker: Option<Arc<dyn Reranker>>,
    options: SearchOptions,
}

impl SearchOrchestrator {
    pub fn new(embedder: Arc<dyn Embedder>, store: Arc<dyn VectorStore>) -> Self {
        Self {
            embedder,
            store,
            rephraser: None,
            reranker: None,
            options: SearchOptions::default(),
        }
    }

    pub fn with_rephraser(mut self, rephraser: Arc<dyn Rephraser>) -> Self {
        self.rephraser = Some(rephraser);
        self
    }

    pub fn with_reranker(mut self, reranker: Arc<dyn Reranker>) -> Self {
        self.reranker = Some(reranker);
        self
    }

    pub fn with_options(mut self, options: SearchOptions) -> Result<Self, ConfigError> {
        options.validate()?;
        self.options = options;
        Ok(self)
    }

    pub fn options(&self) -> &SearchOptions {
        &self.options
    }

    pub async fn search(&self, query: &str, top_k: usize) -> Result<Vec<SearchResult>, SearchError> {
        self.search_with_cancel(query, top_k, &CancelSignal::new())
            .await
    }

    pub async fn search_with_cancel(
        &self,
        query: &str,
        top_k: usize,
        cancel: &CancelSignal,
    ) -> Result<Vec<SearchResult>, SearchError> {
        if query.trim().is_empty() {
            return Err(SearchError::Request("query is empty".to_string()));
        }
        if top_k == 0 {
            return Err(SearchError::Request("top_k must be at least 1".to_string()));
        }

        let cancel = match self.options.timeout() {
            Some(timeout) => cancel.clone().with_timeout(timeout),
            None => cancel.clone(),
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                warn!(query, "search cancelled");
                Err(SearchError::Cancelled("search did not finish in time".to_string()))
            }
            results = self.run(query, top_k) => results,
        }
    }

    async fn run(&self, query: &str, top_k: usize) -> Result<Vec<SearchResult>, SearchError> {
        let variants = self.variants(query).await;
        debug!(variants = variants.len(), "query variants");

        let vectors = self
            .embedder
            .embed_text(&variants)
            .await
            .map_err(|error| SearchError::EmbeddingFailed(error.to_string()))?;
        if vectors.len() != variants.len() {
            return Err(SearchError::EmbeddingFailed(format!(
                "expected {} query vectors, embedder returned {}",
                variants.len(),
                vectors.len()
            )));
        }

        let pool = match self.reranker {
            Some(_) => top_k.saturating_mul(self.options.oversampling),
            None => top_k,
        };
        let pools: Vec<Vec<StoreHit>> = try_join_all(
            vectors
                .iter()
                .map(|vector| self.store.query(vector, pool)),
        )
        .await
        .map_err(SearchError::from)?;

        let merged = merge_max_score(pools);
        let mut results = self.rerank(query, merged).await;

        if let Some(threshold) = self.options.score_threshold {
            results.retain(|result| result.score >= threshold);
        }
        results.truncate(top_k);

        info!(query, results = results.len(), "search finished");
        Ok(results)
    }

    async fn variants(&self, query: &str) -> Vec<String> {
        let Some(rephraser) = &self.rephraser else {
            return vec![query.to_string()];
        };

        match rephraser.rephrase(query).await {
            Ok(variants) => {
                let variants: Vec<String> = variants
                    .into_iter()
                    .filter(|variant| !variant.trim().is_empty())
                    .collect();
                if variants.is_empty() {
                    warn!(query, "rephraser returned no variants, using original query");
                    vec![query.to_string()]
                } else {
                    variants
                }
            }
            Err(error) => {
                warn!(query, error = %error, "rephrase failed, using original query");
                vec![query.to_string()]
            }
        }
    }

    async fn rerank(&self, query: &str, candidates: Vec<SearchResult>) -> Vec<SearchResult> {
        let Some(reranker) = &self.reranker else {
            return candidates;
        };
        if candidates.is_empty() {
            return candidates;
        }

        match reranker.rerank(query, &candidates).await {
            Ok(reranked) => reranked,
            Err(error) => {
                warn!(query, error = %error, "rerank failed, keeping vector order");
                candidates
            }
        }
    }
}

/// Deduplicates candidate pools by element id, keeping each element's highest
/// score. Output is best first; equal scores keep first-seen order.
pub fn merge_max_score(pools: Vec<Vec<StoreHit>>) -> Vec<SearchResult> {
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut merged: Vec<SearchResult> = Vec::new();

    for hit in pools.into_iter().flatten() {
        match index.get(&hit.element.id) {
            Some(&slot) => {
                if hit.score > merged[slot].score {
                    merged[slot].score = hit.score;
                }
            }
            None => {
                index.insert(hit.element.id.clone(), merged.len());
                merged.push(hit.into_result());
            }
        }
    }

    // Stable sort keeps first-seen order among ties.
    merged.sort_by(|a, b| b.score.total_cmp(&a.score));
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::CharacterNgramEmbedder;
    use crate::error::StoreError;
    use crate::models::{Element, ElementContent};
    use crate::rerankers::NoopReranker;
    use crate::store::VectorEntry;
    use async_trait::async_trait;
    use std::sync::Mutex;

    // Records the `k` of every query and returns nothing.
    #[derive(Default)]
    struct RecordingStore {
        requested: Mutex<Vec<usize>>,
    }

    impl RecordingStore {
        fn requested(&self) -> Vec<usize> {
            self.requested
                .lock()
                .map(|requested| requested.clone())
                .unwrap_or_default()
        }
    }

    #[async_trait]
    impl VectorStore for RecordingStore {
        async fn upsert(&self, _entries: &[VectorEntry]) -> Result<(), StoreError> {
            Ok(())
        }

        async fn query(&self, _vector: &[f32], k: usize) -> Result<Vec<StoreHit>, StoreError> {
            if let Ok(mut requested) = self.requested.lock() {
                requested.push(k);
            }
            Ok(Vec::new())
        }

        async fn remove(&self, _ids: &[String]) -> Result<(), StoreError> {
            Ok(())
        }

        async fn list_document(&self, _document_id: &str) -> Result<Vec<String>, StoreError> {
            Ok(Vec::new())
        }
    }

    fn hit(document_id: &str, position: u64, score: f64) -> StoreHit {
        StoreHit {
            element: Element::new(document_id, position, ElementContent::text("x")),
            score,
        }
    }

    #[test]
    fn merge_keeps_highest_score_once() {
        let merged = merge_max_score(vec![
            vec![hit("a", 0, 0.4), hit("a", 1, 0.9)],
            vec![hit("a", 0, 0.7), hit("b", 0, 0.2)],
        ]);

        let positions: Vec<(String, u64, f64)> = merged
            .iter()
            .map(|result| {
                (
                    result.element.document_id.clone(),
                    result.element.position,
                    result.score,
                )
            })
            .collect();
        assert_eq!(
            positions,
            vec![
                ("a".to_string(), 1, 0.9),
                ("a".to_string(), 0, 0.7),
                ("b".to_string(), 0, 0.2),
            ]
        );
    }

    #[test]
    fn merge_ties_keep_first_seen_order() {
        let merged = merge_max_score(vec![vec![hit("b", 0, 0.5)], vec![hit("a", 0, 0.5)]]);
        assert_eq!(merged[0].element.document_id, "b");
        assert_eq!(merged[1].element.document_id, "a");
    }

    #[tokio::test]
    async fn candidate_pool_is_top_k_without_reranker() -> Result<(), SearchError> {
        let store = Arc::new(RecordingStore::default());
        let orchestrator =
            SearchOrchestrator::new(Arc::new(CharacterNgramEmbedder::new(16)), store.clone());

        orchestrator.search("blue sky", 2).await?;

        assert_eq!(store.requested(), vec![2]);
        Ok(())
    }

    #[tokio::test]
    async fn candidate_pool_is_oversampled_for_reranker() -> Result<(), Box<dyn std::error::Error>> {
        let store = Arc::new(RecordingStore::default());
        let orchestrator =
            SearchOrchestrator::new(Arc::new(CharacterNgramEmbedder::new(16)), store.clone())
                .with_reranker(Arc::new(NoopReranker));
        orchestrator.search("blue sky", 2).await?;
        assert_eq!(store.requested(), vec![6]);

        let store = Arc::new(RecordingStore::default());
        let orchestrator =
            SearchOrchestrator::new(Arc::new(CharacterNgramEmbedder::new(16)), store.clone())
                .with_reranker(Arc::new(NoopReranker))
                .with_options(SearchOptions {
                    oversampling: 5,
                    ..SearchOptions::default()
                })?;
        orchestrator.search("blue sky", 2).await?;
        assert_eq!(store.requested(), vec![10]);
        Ok(())
    }

    #[test]
    fn zero_oversampling_is_rejected() {
        let options = SearchOptions {
            oversampling: 0,
            ..SearchOptions::default()
        };
        assert!(options.validate().is_err());
    }
}
