use crate::error::ModelError;
use crate::models::SearchResult;
use crate::traits::Reranker;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopReranker;

#[async_trait]
impl Reranker for NoopReranker {
    async fn rerank(
        &self,
        _query: &str,
        candidates: &[SearchResult],
    ) -> Result<Vec<SearchResult>, ModelError> {
        Ok(candidates.to_vec())
    }
}

#[derive(Debug, Serialize)]
struct RerankRequest<'a> {
    model: &'a str,
    query: &'a str,
    documents: Vec<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_n: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct RerankResponse {
    results: Vec<RerankScore>,
}

#[derive(Debug, Deserialize)]
struct RerankScore {
    index: usize,
    relevance_score: f64,
}

#[derive(Debug, Clone)]
pub struct HttpReranker {
    endpoint: String,
    model: String,
    api_key: Option<String>,
    top_n: Option<usize>,
    client: Client,
}

impl HttpReranker {
    pub fn new(endpoint: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            model: model.into(),
            api_key: None,
            top_n: None,
            client: Client::new(),
        }
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn with_top_n(mut self, top_n: usize) -> Self {
        self.top_n = Some(top_n);
        self
    }
}

#[async_trait]
impl Reranker for HttpReranker {
    async fn rerank(
        &self,
        query: &str,
        candidates: &[SearchResult],
    ) -> Result<Vec<SearchResult>, ModelError> {
        if candidates.is_empty() {
            return Ok(Vec::new());
        }

        let documents = candidates
            .iter()
            .map(|candidate| candidate.element.text_representation().unwrap_or_default())
            .collect();

        let mut request = self
            .client
            .post(format!("{}/rerank", self.endpoint.trim_end_matches('/')))
            .json(&RerankRequest {
                model: &self.model,
                query,
                documents,
                top_n: self.top_n,
            });
        if let Some(api_key) = &self.api_key {
            request = request.bearer_auth(api_key);
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(ModelError::RerankFailed(format!(
                "rerank endpoint returned {}",
                response.status()
            )));
        }

        let mut payload: RerankResponse = response.json().await?;
        payload
            .results
            .sort_by(|a, b| b.relevance_score.total_cmp(&a.relevance_score));

        payload
            .results
            .into_iter()
            .map(|scored| {
                candidates
                    .get(scored.index)
                    .map(|candidate| SearchResult {
                        element: candidate.element.clone(),
                        score: scored.relevance_score,
                    })
                    .ok_or_else(|| {
                        ModelError::RerankFailed(format!(
                            "rerank index {} out of range for {} candidates",
                            scored.index,
                            candidates.len()
                        ))
                    })
            })
            .collect()
    }
}
