use crate::error::IngestError;
use crate::source::{LocalFileSource, Source, TextSource};
use serde::{Deserialize, Serialize};
use serde_with::{base64::Base64, serde_as, DeserializeFromStr, SerializeDisplay};
use sha2::{Digest, Sha256};
use std::convert::Infallible;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq, Hash, SerializeDisplay, DeserializeFromStr)]
pub enum DocumentType {
    Txt,
    Md,
    Html,
    Json,
    Csv,
    Pdf,
    Png,
    Jpg,
    Other(String),
}

impl DocumentType {
    pub fn from_extension(extension: &str) -> Self {
        match extension.trim_start_matches('.').to_ascii_lowercase().as_str() {
            "txt" | "text" => Self::Txt,
            "md" | "markdown" => Self::Md,
            "html" | "htm" => Self::Html,
            "json" => Self::Json,
            "csv" => Self::Csv,
            "pdf" => Self::Pdf,
            "png" => Self::Png,
            "jpg" | "jpeg" => Self::Jpg,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn from_path(path: &Path) -> Self {
        path.extension()
            .and_then(|ext| ext.to_str())
            .map(Self::from_extension)
            .unwrap_or_else(|| Self::Other("unknown".to_string()))
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Txt => "txt",
            Self::Md => "md",
            Self::Html => "html",
            Self::Json => "json",
            Self::Csv => "csv",
            Self::Pdf => "pdf",
            Self::Png => "png",
            Self::Jpg => "jpg",
            Self::Other(name) => name,
        }
    }

    pub fn is_image(&self) -> bool {
        matches!(self, Self::Png | Self::Jpg)
    }
}

impl fmt::Display for DocumentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DocumentType {
    type Err = Infallible;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Ok(Self::from_extension(value))
    }
}

#[derive(Clone)]
pub struct DocumentMeta {
    id: String,
    document_type: DocumentType,
    source: Arc<dyn Source>,
}

impl DocumentMeta {
    pub fn new(document_type: DocumentType, source: Arc<dyn Source>) -> Self {
        Self {
            id: source.identity(),
            document_type,
            source,
        }
    }

    pub fn from_source(source: Arc<dyn Source>) -> Self {
        let document_type = source.document_type();
        Self::new(document_type, source)
    }

    pub fn from_text(text: impl Into<String>) -> Self {
        Self::from_source(Arc::new(TextSource::new(text)))
    }

    pub fn from_local_path(path: impl Into<PathBuf>) -> Self {
        Self::from_source(Arc::new(LocalFileSource::new(path)))
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn document_type(&self) -> &DocumentType {
        &self.document_type
    }

    pub fn source(&self) -> &Arc<dyn Source> {
        &self.source
    }

    pub async fn fetch(&self) -> Result<Document, IngestError> {
        let content = self.source.fetch().await?;
        Ok(Document {
            meta: self.clone(),
            content,
        })
    }
}

impl fmt::Debug for DocumentMeta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DocumentMeta")
            .field("id", &self.id)
            .field("document_type", &self.document_type)
            .finish()
    }
}

#[derive(Debug, Clone)]
pub enum FetchedContent {
    Path(PathBuf),
    Bytes(Vec<u8>),
}

impl FetchedContent {
    pub async fn read_bytes(&self) -> std::io::Result<Vec<u8>> {
        match self {
            Self::Path(path) => tokio::fs::read(path).await,
            Self::Bytes(bytes) => Ok(bytes.clone()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Document {
    pub meta: DocumentMeta,
    pub content: FetchedContent,
}

impl Document {
    pub fn id(&self) -> &str {
        self.meta.id()
    }

    // A handle that can no longer be read counts as an unavailable source.
    pub async fn read_bytes(&self) -> Result<Vec<u8>, IngestError> {
        self.content
            .read_bytes()
            .await
            .map_err(|error| IngestError::unavailable(self.id(), error))
    }

    pub async fn read_text(&self) -> Result<String, IngestError> {
        let bytes = self.read_bytes().await?;
        String::from_utf8(bytes).map_err(|error| IngestError::parsing(self.id(), error))
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum ElementKind {
    Text,
    Image,
}

impl ElementKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Image => "image",
        }
    }
}

#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ElementContent {
    Text {
        text: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        section: Option<String>,
    },
    Image {
        #[serde_as(as = "Base64")]
        bytes: Vec<u8>,
        mime_type: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        description: Option<String>,
    },
}

impl ElementContent {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text {
            text: text.into(),
            section: None,
        }
    }

    pub fn kind(&self) -> ElementKind {
        match self {
            Self::Text { .. } => ElementKind::Text,
            Self::Image { .. } => ElementKind::Image,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Element {
    pub id: String,
    pub document_id: String,
    pub position: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,
    pub content: ElementContent,
}

impl Element {
    pub fn new(document_id: impl Into<String>, position: u64, content: ElementContent) -> Self {
        let document_id = document_id.into();
        Self {
            id: element_identity(&document_id, position, content.kind()),
            document_id,
            position,
            page: None,
            content,
        }
    }

    pub fn with_page(mut self, page: u32) -> Self {
        self.page = Some(page);
        self
    }

    pub fn kind(&self) -> ElementKind {
        self.content.kind()
    }

    pub fn text_representation(&self) -> Option<&str> {
        match &self.content {
            ElementContent::Text { text, .. } => Some(text),
            ElementContent::Image { description, .. } => description.as_deref(),
        }
    }
}

/// Element identity: sha256 over (document identity, kind, position).
/// Content is not part of it, so an edited document overwrites in place.
pub fn element_identity(document_id: &str, position: u64, kind: ElementKind) -> String {
    let mut hasher = Sha256::new();
    hasher.update(document_id.as_bytes());
    hasher.update([0u8]);
    hasher.update(kind.as_str().as_bytes());
    hasher.update([0u8]);
    hasher.update(position.to_le_bytes());
    format!("{:x}", hasher.finalize())
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchResult {
    pub element: Element,
    pub score: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn element_identity_is_stable_and_position_sensitive() {
        let first = element_identity("text:abc", 0, ElementKind::Text);
        let again = element_identity("text:abc", 0, ElementKind::Text);
        let next = element_identity("text:abc", 1, ElementKind::Text);
        let image = element_identity("text:abc", 0, ElementKind::Image);

        assert_eq!(first, again);
        assert_ne!(first, next);
        assert_ne!(first, image);
    }

    #[test]
    fn edited_content_keeps_identity() {
        let before = Element::new("file:/a.txt", 3, ElementContent::text("old"));
        let after = Element::new("file:/a.txt", 3, ElementContent::text("new"));
        assert_eq!(before.id, after.id);
    }

    #[test]
    fn document_type_comes_from_extension() {
        assert_eq!(DocumentType::from_path(Path::new("/x/report.PDF")), DocumentType::Pdf);
        assert_eq!(DocumentType::from_path(Path::new("notes.markdown")), DocumentType::Md);
        assert_eq!(
            DocumentType::from_path(Path::new("archive.zip")),
            DocumentType::Other("zip".to_string())
        );
        assert_eq!("jpeg".parse::<DocumentType>().ok(), Some(DocumentType::Jpg));
    }

    #[test]
    fn image_payload_survives_json() -> Result<(), serde_json::Error> {
        let element = Element::new(
            "file:/a.png",
            0,
            ElementContent::Image {
                bytes: vec![0, 159, 146, 150],
                mime_type: "image/png".to_string(),
                description: None,
            },
        );
        let encoded = serde_json::to_value(&element)?;
        assert_eq!(encoded["content"]["kind"], "image");
        assert!(encoded["content"]["bytes"].is_string());

        let decoded: Element = serde_json::from_value(encoded)?;
        assert_eq!(decoded, element);
        Ok(())
    }

    #[test]
    fn text_representation_skips_undescribed_images() {
        let image = Element::new(
            "file:/a.png",
            0,
            ElementContent::Image {
                bytes: Vec::new(),
                mime_type: "image/png".to_string(),
                description: None,
            },
        );
        assert_eq!(image.text_representation(), None);
        let text = Element::new("text:x", 0, ElementContent::text("hello"));
        assert_eq!(text.text_representation(), Some("hello"));
    }
}
