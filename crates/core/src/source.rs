use crate::error::IngestError;
use crate::models::{DocumentType, FetchedContent};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use url::Url;
use walkdir::WalkDir;

/// Resolves a document reference to locally accessible content.
///
/// `identity` must be stable for the same location: it becomes the document
/// identity and every element identity is derived from it.
#[async_trait]
pub trait Source: Send + Sync {
    fn identity(&self) -> String;

    fn document_type(&self) -> DocumentType;

    async fn fetch(&self) -> Result<FetchedContent, IngestError>;
}

#[derive(Debug, Clone)]
pub struct LocalFileSource {
    path: PathBuf,
}

impl LocalFileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn list_sources(folder: &Path) -> Result<Vec<Self>, IngestError> {
        if !folder.is_dir() {
            return Err(IngestError::InvalidArgument(format!(
                "not a directory: {}",
                folder.display()
            )));
        }

        let mut files = Vec::new();
        for entry in WalkDir::new(folder)
            .into_iter()
            .filter_map(|item| item.ok())
        {
            if entry.file_type().is_file() {
                files.push(entry.path().to_path_buf());
            }
        }

        files.sort_unstable();
        Ok(files.into_iter().map(Self::new).collect())
    }
}

#[async_trait]
impl Source for LocalFileSource {
    fn identity(&self) -> String {
        format!("file:{}", self.path.to_string_lossy())
    }

    fn document_type(&self) -> DocumentType {
        DocumentType::from_path(&self.path)
    }

    async fn fetch(&self) -> Result<FetchedContent, IngestError> {
        match tokio::fs::metadata(&self.path).await {
            Ok(metadata) if metadata.is_file() => tokio::fs::read(&self.path)
                .await
                .map(FetchedContent::Bytes)
                .map_err(|error| IngestError::unavailable(self.identity(), error)),
            Ok(_) => Err(IngestError::unavailable(self.identity(), "not a regular file")),
            Err(error) => Err(IngestError::unavailable(self.identity(), error)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TextSource {
    text: String,
    name: Option<String>,
}

impl TextSource {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            name: None,
        }
    }

    pub fn named(name: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            name: Some(name.into()),
        }
    }
}

#[async_trait]
impl Source for TextSource {
    fn identity(&self) -> String {
        match &self.name {
            Some(name) => format!("text:{name}"),
            None => {
                let mut hasher = Sha256::new();
                hasher.update(self.text.as_bytes());
                format!("text:{:x}", hasher.finalize())
            }
        }
    }

    fn document_type(&self) -> DocumentType {
        DocumentType::Txt
    }

    async fn fetch(&self) -> Result<FetchedContent, IngestError> {
        Ok(FetchedContent::Bytes(self.text.clone().into_bytes()))
    }
}

#[derive(Debug, Clone)]
pub struct HttpSource {
    url: Url,
    bearer_token: Option<String>,
    client: Client,
}

impl HttpSource {
    pub fn new(url: Url) -> Self {
        Self {
            url,
            bearer_token: None,
            client: Client::new(),
        }
    }

    pub fn with_bearer_token(mut self, token: impl Into<String>) -> Self {
        self.bearer_token = Some(token.into());
        self
    }
}

#[async_trait]
impl Source for HttpSource {
    fn identity(&self) -> String {
        self.url.to_string()
    }

    fn document_type(&self) -> DocumentType {
        self.url
            .path_segments()
            .and_then(|mut segments| segments.next_back().map(str::to_string))
            .map(|name| DocumentType::from_path(Path::new(&name)))
            .unwrap_or_else(|| DocumentType::Other("unknown".to_string()))
    }

    async fn fetch(&self) -> Result<FetchedContent, IngestError> {
        let bytes = download(
            &self.client,
            self.url.clone(),
            self.bearer_token.as_deref(),
            &self.identity(),
        )
        .await?;
        Ok(FetchedContent::Bytes(bytes))
    }
}

const GCS_ENDPOINT: &str = "https://storage.googleapis.com";

#[derive(Debug, Clone)]
pub struct GcsSource {
    bucket: String,
    object: String,
    endpoint: String,
    bearer_token: Option<String>,
    client: Client,
}

impl GcsSource {
    pub fn new(bucket: impl Into<String>, object: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            object: object.into(),
            endpoint: GCS_ENDPOINT.to_string(),
            bearer_token: std::env::var("GCS_ACCESS_TOKEN")
                .ok()
                .filter(|token| !token.trim().is_empty()),
            client: Client::new(),
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub fn with_bearer_token(mut self, token: impl Into<String>) -> Self {
        self.bearer_token = Some(token.into());
        self
    }

    fn object_url(&self) -> Result<Url, IngestError> {
        let mut url = Url::parse(&self.endpoint)
            .map_err(|error| IngestError::unavailable(self.identity(), error))?;
        url.path_segments_mut()
            .map_err(|()| IngestError::unavailable(self.identity(), "endpoint cannot be a base"))?
            .pop_if_empty()
            .extend(["storage", "v1", "b", self.bucket.as_str(), "o", self.object.as_str()]);
        url.query_pairs_mut().append_pair("alt", "media");
        Ok(url)
    }
}

#[async_trait]
impl Source for GcsSource {
    fn identity(&self) -> String {
        format!("gcs:gs://{}/{}", self.bucket, self.object)
    }

    fn document_type(&self) -> DocumentType {
        DocumentType::from_path(Path::new(&self.object))
    }

    async fn fetch(&self) -> Result<FetchedContent, IngestError> {
        let url = self.object_url()?;
        let bytes = download(
            &self.client,
            url,
            self.bearer_token.as_deref(),
            &self.identity(),
        )
        .await?;
        Ok(FetchedContent::Bytes(bytes))
    }
}

const HF_ROWS_ENDPOINT: &str = "https://datasets-server.huggingface.co";

#[derive(Debug, Clone)]
pub struct HuggingFaceSource {
    dataset: String,
    split: String,
    row: u64,
    content_column: String,
    document_type: DocumentType,
    endpoint: String,
    client: Client,
}

impl HuggingFaceSource {
    pub fn new(dataset: impl Into<String>, split: impl Into<String>, row: u64) -> Self {
        Self {
            dataset: dataset.into(),
            split: split.into(),
            row,
            content_column: "content".to_string(),
            document_type: DocumentType::Txt,
            endpoint: HF_ROWS_ENDPOINT.to_string(),
            client: Client::new(),
        }
    }

    pub fn with_content_column(mut self, column: impl Into<String>) -> Self {
        self.content_column = column.into();
        self
    }

    pub fn with_document_type(mut self, document_type: DocumentType) -> Self {
        self.document_type = document_type;
        self
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }
}

#[async_trait]
impl Source for HuggingFaceSource {
    fn identity(&self) -> String {
        format!("hf:{}/{}/{}", self.dataset, self.split, self.row)
    }

    fn document_type(&self) -> DocumentType {
        self.document_type.clone()
    }

    async fn fetch(&self) -> Result<FetchedContent, IngestError> {
        let mut url = Url::parse(&format!("{}/rows", self.endpoint.trim_end_matches('/')))
            .map_err(|error| IngestError::unavailable(self.identity(), error))?;
        url.query_pairs_mut()
            .append_pair("dataset", &self.dataset)
            .append_pair("config", "default")
            .append_pair("split", &self.split)
            .append_pair("offset", &self.row.to_string())
            .append_pair("length", "1");

        let bytes = download(&self.client, url, None, &self.identity()).await?;
        let parsed: Value = serde_json::from_slice(&bytes)
            .map_err(|error| IngestError::unavailable(self.identity(), error))?;

        let content = parsed
            .pointer("/rows/0/row")
            .and_then(|row| row.get(&self.content_column))
            .and_then(Value::as_str)
            .ok_or_else(|| {
                IngestError::unavailable(
                    self.identity(),
                    format!("row has no text column '{}'", self.content_column),
                )
            })?;

        Ok(FetchedContent::Bytes(content.as_bytes().to_vec()))
    }
}

async fn download(
    client: &Client,
    url: Url,
    bearer_token: Option<&str>,
    identity: &str,
) -> Result<Vec<u8>, IngestError> {
    let mut request = client.get(url);
    if let Some(token) = bearer_token {
        request = request.bearer_auth(token);
    }

    let response = request
        .send()
        .await
        .map_err(|error| IngestError::unavailable(identity, error))?;

    if !response.status().is_success() {
        return Err(IngestError::unavailable(
            identity,
            format!("remote returned {}", response.status()),
        ));
    }

    let bytes = response
        .bytes()
        .await
        .map_err(|error| IngestError::unavailable(identity, error))?;
    Ok(bytes.to_vec())
}

pub fn source_from_uri(uri: &str) -> Result<Arc<dyn Source>, IngestError> {
    if let Some(path) = uri.strip_prefix("file://") {
        return Ok(Arc::new(LocalFileSource::new(path)));
    }

    if let Some(text) = uri.strip_prefix("text://") {
        return Ok(Arc::new(TextSource::new(text)));
    }

    if let Some(rest) = uri.strip_prefix("gcs://") {
        let (bucket, object) = rest
            .split_once('/')
            .filter(|(bucket, object)| !bucket.is_empty() && !object.is_empty())
            .ok_or_else(|| {
                IngestError::InvalidArgument(format!("expected gcs://<bucket>/<object>: {uri}"))
            })?;
        return Ok(Arc::new(GcsSource::new(bucket, object)));
    }

    if let Some(rest) = uri.strip_prefix("hf://") {
        let mut parts = rest.rsplitn(3, '/');
        let row = parts.next().and_then(|row| row.parse::<u64>().ok());
        let split = parts.next().filter(|split| !split.is_empty());
        let dataset = parts.next().filter(|dataset| !dataset.is_empty());
        return match (dataset, split, row) {
            (Some(dataset), Some(split), Some(row)) => {
                Ok(Arc::new(HuggingFaceSource::new(dataset, split, row)))
            }
            _ => Err(IngestError::InvalidArgument(format!(
                "expected hf://<dataset>/<split>/<row>: {uri}"
            ))),
        };
    }

    if uri.starts_with("http://") || uri.starts_with("https://") {
        let url = Url::parse(uri)
            .map_err(|error| IngestError::InvalidArgument(format!("{uri}: {error}")))?;
        return Ok(Arc::new(HttpSource::new(url)));
    }

    if uri.contains("://") {
        return Err(IngestError::InvalidArgument(format!(
            "unsupported source scheme: {uri}"
        )));
    }

    Ok(Arc::new(LocalFileSource::new(uri)))
}
