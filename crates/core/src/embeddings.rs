use crate::error::ModelError;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

pub const DEFAULT_EMBEDDING_DIMENSIONS: usize = 128;

/// Maps content to fixed-dimension vectors. Output has the same length and
/// order as the input.
#[async_trait]
pub trait Embedder: Send + Sync {
    fn dimensions(&self) -> usize;

    async fn embed_text(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ModelError>;

    fn supports_images(&self) -> bool {
        false
    }

    async fn embed_image(&self, _images: &[Vec<u8>]) -> Result<Vec<Vec<f32>>, ModelError> {
        Err(ModelError::Unsupported(
            "embedder does not accept images".to_string(),
        ))
    }
}

#[derive(Debug, Clone, Copy)]
pub struct CharacterNgramEmbedder {
    pub dimensions: usize,
}

impl Default for CharacterNgramEmbedder {
    fn default() -> Self {
        Self {
            dimensions: DEFAULT_EMBEDDING_DIMENSIONS,
        }
    }
}

impl CharacterNgramEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self { dimensions }
    }

    pub fn embed_one(&self, text: &str) -> Vec<f32> {
        let lowered = text.to_lowercase();
        let chars: Vec<char> = lowered.chars().collect();
        let mut vector = vec![0f32; self.dimensions.max(1)];

        for window in chars.windows(3) {
            let mut buffer = [0u8; 12];
            let mut token = Vec::with_capacity(12);
            for ch in window {
                token.extend_from_slice(ch.encode_utf8(&mut buffer).as_bytes());
            }
            let slot = bucket(&token, vector.len());
            vector[slot] += 1.0;
        }

        normalize(vector)
    }

    fn embed_bytes(&self, bytes: &[u8]) -> Vec<f32> {
        let mut vector = vec![0f32; self.dimensions.max(1)];
        for window in bytes.windows(3) {
            let slot = bucket(window, vector.len());
            vector[slot] += 1.0;
        }
        normalize(vector)
    }
}

fn bucket(token: &[u8], buckets: usize) -> usize {
    let mut hash = 1469598103934665603u64;
    for byte in token {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(1099511628211);
    }
    (hash % buckets as u64) as usize
}

fn normalize(mut vector: Vec<f32>) -> Vec<f32> {
    let magnitude = vector.iter().map(|value| value * value).sum::<f32>().sqrt();
    if magnitude > 0.0 {
        for value in &mut vector {
            *value /= magnitude;
        }
    }
    vector
}

#[async_trait]
impl Embedder for CharacterNgramEmbedder {
    fn dimensions(&self) -> usize {
        self.dimensions.max(1)
    }

    async fn embed_text(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ModelError> {
        Ok(texts.iter().map(|text| self.embed_one(text)).collect())
    }

    fn supports_images(&self) -> bool {
        true
    }

    async fn embed_image(&self, images: &[Vec<u8>]) -> Result<Vec<Vec<f32>>, ModelError> {
        Ok(images.iter().map(|image| self.embed_bytes(image)).collect())
    }
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingDatum>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingDatum {
    #[serde(default)]
    index: usize,
    embedding: Vec<f32>,
}

#[derive(Debug, Clone)]
pub struct HttpEmbedder {
    endpoint: String,
    model: String,
    dimensions: usize,
    api_key: Option<String>,
    client: Client,
}

impl HttpEmbedder {
    pub fn new(endpoint: impl Into<String>, model: impl Into<String>, dimensions: usize) -> Self {
        Self {
            endpoint: endpoint.into(),
            model: model.into(),
            dimensions,
            api_key: None,
            client: Client::new(),
        }
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }
}

#[async_trait]
impl Embedder for HttpEmbedder {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed_text(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ModelError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let mut request = self
            .client
            .post(format!("{}/embeddings", self.endpoint.trim_end_matches('/')))
            .json(&EmbeddingRequest {
                model: &self.model,
                input: texts,
            });
        if let Some(api_key) = &self.api_key {
            request = request.bearer_auth(api_key);
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(ModelError::EmbeddingFailed(format!(
                "embedding endpoint returned {}",
                response.status()
            )));
        }

        let mut payload: EmbeddingResponse = response.json().await?;
        if payload.data.len() != texts.len() {
            return Err(ModelError::EmbeddingFailed(format!(
                "expected {} embeddings, got {}",
                texts.len(),
                payload.data.len()
            )));
        }

        payload.data.sort_by_key(|datum| datum.index);
        payload
            .data
            .into_iter()
            .map(|datum| {
                if datum.embedding.len() == self.dimensions {
                    Ok(datum.embedding)
                } else {
                    Err(ModelError::EmbeddingFailed(format!(
                        "embedding dimension {} != {}",
                        datum.embedding.len(),
                        self.dimensions
                    )))
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::{Method::POST, MockServer};
    use serde_json::json;

    #[tokio::test]
    async fn embedder_is_deterministic() -> Result<(), ModelError> {
        let embedder = CharacterNgramEmbedder::default();
        let texts = vec!["Hydraulic pressure and flow".to_string()];
        let first = embedder.embed_text(&texts).await?;
        let second = embedder.embed_text(&texts).await?;
        assert_eq!(first, second);
        Ok(())
    }

    #[tokio::test]
    async fn embedder_outputs_expected_length_and_order() -> Result<(), ModelError> {
        let embedder = CharacterNgramEmbedder::new(32);
        let texts = vec!["abc".to_string(), "the sky is blue".to_string()];
        let vectors = embedder.embed_text(&texts).await?;
        assert_eq!(vectors.len(), 2);
        assert!(vectors.iter().all(|vector| vector.len() == 32));
        assert_eq!(vectors[1], embedder.embed_one("the sky is blue"));
        Ok(())
    }

    #[tokio::test]
    async fn image_bytes_embed_to_unit_vectors() -> Result<(), ModelError> {
        let embedder = CharacterNgramEmbedder::new(16);
        let images = vec![vec![0x89, b'P', b'N', b'G', 1, 2, 3, 4]];
        let vectors = embedder.embed_image(&images).await?;

        assert_eq!(vectors.len(), 1);
        assert_eq!(vectors[0].len(), 16);
        let magnitude = vectors[0].iter().map(|value| value * value).sum::<f32>().sqrt();
        assert!((magnitude - 1.0).abs() < 1e-5);
        assert_eq!(vectors, embedder.embed_image(&images).await?);
        Ok(())
    }

    #[tokio::test]
    async fn http_embedder_orders_by_index() -> Result<(), ModelError> {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/v1/embeddings")
                    .header("authorization", "Bearer secret");
                then.status(200).json_body(json!({
                    "data": [
                        { "index": 1, "embedding": [0.0, 1.0] },
                        { "index": 0, "embedding": [1.0, 0.0] }
                    ]
                }));
            })
            .await;

        let embedder = HttpEmbedder::new(server.url("/v1"), "test-model", 2).with_api_key("secret");
        let vectors = embedder
            .embed_text(&["first".to_string(), "second".to_string()])
            .await?;

        mock.assert_async().await;
        assert_eq!(vectors, vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
        Ok(())
    }

    #[tokio::test]
    async fn http_embedder_rejects_wrong_dimension() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/embeddings");
                then.status(200)
                    .json_body(json!({ "data": [{ "index": 0, "embedding": [1.0] }] }));
            })
            .await;

        let embedder = HttpEmbedder::new(server.base_url(), "test-model", 4);
        let result = embedder.embed_text(&["text".to_string()]).await;
        assert!(matches!(result, Err(ModelError::EmbeddingFailed(_))));
    }
}
