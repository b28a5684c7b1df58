use crate::error::StoreError;
use crate::models::Element;
use crate::store::{StoreHit, VectorEntry};
use crate::traits::VectorStore;
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde_json::{json, Value};
use tokio::sync::OnceCell;
use tracing::debug;
use uuid::Uuid;

const BACKEND: &str = "qdrant";
const SCROLL_PAGE: usize = 256;

pub struct QdrantStore {
    endpoint: String,
    collection: String,
    api_key: Option<String>,
    client: Client,
    vector_size: usize,
    collection_ready: OnceCell<()>,
}

impl QdrantStore {
    pub fn new(endpoint: impl Into<String>, collection: impl Into<String>, vector_size: usize) -> Self {
        Self {
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            collection: collection.into(),
            api_key: None,
            client: Client::new(),
            vector_size,
            collection_ready: OnceCell::new(),
        }
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn point_id(element_id: &str) -> String {
        Uuid::new_v5(&Uuid::NAMESPACE_OID, element_id.as_bytes()).to_string()
    }

    fn url(&self, suffix: &str) -> String {
        format!("{}/collections/{}{}", self.endpoint, self.collection, suffix)
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.api_key {
            Some(key) => request.header("api-key", key),
            None => request,
        }
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, StoreError> {
        self.authorized(request).send().await.map_err(|error| {
            if error.is_connect() || error.is_timeout() {
                unavailable(error)
            } else {
                StoreError::Http(error)
            }
        })
    }

    pub async fn ensure_collection(&self) -> Result<(), StoreError> {
        self.collection_ready
            .get_or_try_init(|| async {
                let response = self.send(self.client.get(self.url(""))).await?;
                if response.status().is_success() {
                    return Ok(());
                }
                if response.status() != StatusCode::NOT_FOUND {
                    return Err(unavailable(response.status()));
                }

                let response = self
                    .send(self.client.put(self.url("")).json(&json!({
                        "vectors": { "size": self.vector_size, "distance": "Cosine" }
                    })))
                    .await?;
                if !response.status().is_success() {
                    return Err(write_failed(response.status()));
                }

                debug!(collection = %self.collection, size = self.vector_size, "created collection");
                Ok::<(), StoreError>(())
            })
            .await
            .map(|_| ())
    }

    fn check_dimension(&self, vector: &[f32]) -> Result<(), StoreError> {
        if vector.len() == self.vector_size {
            Ok(())
        } else {
            Err(StoreError::DimensionMismatch {
                expected: self.vector_size,
                actual: vector.len(),
            })
        }
    }
}

fn unavailable(details: impl ToString) -> StoreError {
    StoreError::Unavailable {
        backend: BACKEND.to_string(),
        details: details.to_string(),
    }
}

fn write_failed(status: StatusCode) -> StoreError {
    if status.is_server_error() {
        unavailable(status)
    } else {
        StoreError::WriteFailed {
            backend: BACKEND.to_string(),
            details: status.to_string(),
        }
    }
}

#[async_trait]
impl VectorStore for QdrantStore {
    async fn upsert(&self, entries: &[VectorEntry]) -> Result<(), StoreError> {
        if entries.is_empty() {
            return Ok(());
        }

        let points = entries
            .iter()
            .map(|entry| {
                self.check_dimension(&entry.vector)?;
                Ok(json!({
                    "id": Self::point_id(entry.id()),
                    "vector": entry.vector,
                    "payload": {
                        "element_id": entry.id(),
                        "document_id": entry.element.document_id,
                        "element": serde_json::to_value(&entry.element)?,
                    },
                }))
            })
            .collect::<Result<Vec<_>, StoreError>>()?;

        self.ensure_collection().await?;

        let response = self
            .send(
                self.client
                    .put(self.url("/points?wait=true"))
                    .json(&json!({ "points": points })),
            )
            .await?;

        if !response.status().is_success() {
            return Err(write_failed(response.status()));
        }
        Ok(())
    }

    async fn query(&self, vector: &[f32], k: usize) -> Result<Vec<StoreHit>, StoreError> {
        self.check_dimension(vector)?;

        let response = self
            .send(self.client.post(self.url("/points/search")).json(&json!({
                "vector": vector,
                "limit": k,
                "with_payload": true,
            })))
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            debug!(collection = %self.collection, "collection missing, nothing stored yet");
            return Ok(Vec::new());
        }
        if !response.status().is_success() {
            return Err(unavailable(response.status()));
        }

        let parsed: Value = response.json().await?;
        let hits = parsed
            .pointer("/result")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        let mut result = Vec::with_capacity(hits.len());
        for hit in hits {
            let score = hit.pointer("/score").and_then(Value::as_f64).unwrap_or(0.0);
            let element_value = hit.pointer("/payload/element").cloned().ok_or_else(|| {
                unavailable("search hit without element payload")
            })?;
            let element: Element = serde_json::from_value(element_value)?;
            result.push(StoreHit { element, score });
        }

        Ok(result)
    }

    async fn remove(&self, ids: &[String]) -> Result<(), StoreError> {
        if ids.is_empty() {
            return Ok(());
        }

        let points: Vec<String> = ids.iter().map(|id| Self::point_id(id)).collect();
        let response = self
            .send(
                self.client
                    .post(self.url("/points/delete?wait=true"))
                    .json(&json!({ "points": points })),
            )
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(());
        }
        if !response.status().is_success() {
            return Err(write_failed(response.status()));
        }
        Ok(())
    }

    async fn list_document(&self, document_id: &str) -> Result<Vec<String>, StoreError> {
        let mut ids = Vec::new();
        let mut offset = Value::Null;

        loop {
            let mut body = json!({
                "filter": { "must": [{ "key": "document_id", "match": { "value": document_id } }] },
                "limit": SCROLL_PAGE,
                "with_payload": ["element_id"],
                "with_vector": false,
            });
            if !offset.is_null() {
                body["offset"] = offset.clone();
            }

            let response = self
                .send(self.client.post(self.url("/points/scroll")).json(&body))
                .await?;
            if response.status() == StatusCode::NOT_FOUND {
                return Ok(ids);
            }
            if !response.status().is_success() {
                return Err(unavailable(response.status()));
            }

            let parsed: Value = response.json().await?;
            let points = parsed
                .pointer("/result/points")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default();
            ids.extend(points.iter().filter_map(|point| {
                point
                    .pointer("/payload/element_id")
                    .and_then(Value::as_str)
                    .map(str::to_string)
            }));

            offset = parsed
                .pointer("/result/next_page_offset")
                .cloned()
                .unwrap_or(Value::Null);
            if offset.is_null() {
                return Ok(ids);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ElementContent;
    use httpmock::{
        Method::{GET, POST, PUT},
        MockServer,
    };

    fn entry(position: u64) -> VectorEntry {
        VectorEntry {
            element: Element::new("text:doc", position, ElementContent::text("hello")),
            vector: vec![0.6, 0.8],
        }
    }

    #[test]
    fn point_ids_are_stable_uuids() {
        let first = QdrantStore::point_id("abc");
        assert_eq!(first, QdrantStore::point_id("abc"));
        assert_ne!(first, QdrantStore::point_id("abd"));
        assert!(Uuid::parse_str(&first).is_ok());
    }

    #[tokio::test]
    async fn upsert_creates_missing_collection_once() -> Result<(), StoreError> {
        let server = MockServer::start_async().await;
        let lookup = server
            .mock_async(|when, then| {
                when.method(GET).path("/collections/docs");
                then.status(404);
            })
            .await;
        let create = server
            .mock_async(|when, then| {
                when.method(PUT).path("/collections/docs");
                then.status(200).json_body(json!({ "result": true }));
            })
            .await;
        let points = server
            .mock_async(|when, then| {
                when.method(PUT)
                    .path("/collections/docs/points")
                    .query_param("wait", "true");
                then.status(200).json_body(json!({ "result": { "status": "completed" } }));
            })
            .await;

        let store = QdrantStore::new(server.base_url(), "docs", 2);
        store.upsert(&[entry(0)]).await?;
        store.upsert(&[entry(1)]).await?;

        lookup.assert_hits_async(1).await;
        create.assert_hits_async(1).await;
        points.assert_hits_async(2).await;
        Ok(())
    }

    #[tokio::test]
    async fn rejected_write_is_write_failure() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/collections/docs");
                then.status(200).json_body(json!({ "result": {} }));
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(PUT).path("/collections/docs/points");
                then.status(400);
            })
            .await;

        let store = QdrantStore::new(server.base_url(), "docs", 2);
        let result = store.upsert(&[entry(0)]).await;
        assert!(matches!(result, Err(StoreError::WriteFailed { .. })));
    }

    #[tokio::test]
    async fn query_decodes_element_payloads() -> Result<(), StoreError> {
        let server = MockServer::start_async().await;
        let element = entry(3).element;
        let payload = serde_json::to_value(&element)?;
        server
            .mock_async(move |when, then| {
                when.method(POST).path("/collections/docs/points/search");
                then.status(200).json_body(json!({
                    "result": [{ "id": "x", "score": 0.93, "payload": { "element": payload } }]
                }));
            })
            .await;

        let store = QdrantStore::new(server.base_url(), "docs", 2);
        let hits = store.query(&[0.6, 0.8], 5).await?;
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].element, element);
        assert!((hits[0].score - 0.93).abs() < 1e-9);
        Ok(())
    }

    #[tokio::test]
    async fn list_document_follows_scroll_pages() -> Result<(), StoreError> {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/collections/docs/points/scroll")
                    .json_body_partial(r#"{ "offset": "page-2" }"#);
                then.status(200).json_body(json!({
                    "result": { "points": [{ "payload": { "element_id": "e2" } }], "next_page_offset": null }
                }));
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/collections/docs/points/scroll");
                then.status(200).json_body(json!({
                    "result": { "points": [{ "payload": { "element_id": "e1" } }], "next_page_offset": "page-2" }
                }));
            })
            .await;

        let store = QdrantStore::new(server.base_url(), "docs", 2);
        let ids = store.list_document("text:doc").await?;
        assert_eq!(ids, vec!["e1".to_string(), "e2".to_string()]);
        Ok(())
    }

    #[tokio::test]
    async fn unreachable_store_is_unavailable() {
        let store = QdrantStore::new("http://127.0.0.1:9", "docs", 2);
        let result = store.query(&[0.6, 0.8], 5).await;
        match result {
            Err(error) => assert!(error.is_unavailable(), "unexpected error: {error}"),
            Ok(_) => panic!("query against a closed port should fail"),
        }
    }
}
