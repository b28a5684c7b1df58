use super::Parser;
use crate::error::IngestError;
use crate::models::{Document, DocumentType, Element, ElementContent, ElementKind};
use async_trait::async_trait;

pub struct ImageParser {
    document_types: Vec<DocumentType>,
}

impl ImageParser {
    pub fn new() -> Self {
        Self {
            document_types: vec![DocumentType::Png, DocumentType::Jpg],
        }
    }
}

impl Default for ImageParser {
    fn default() -> Self {
        Self::new()
    }
}

fn mime_type(document_type: &DocumentType) -> &'static str {
    match document_type {
        DocumentType::Png => "image/png",
        DocumentType::Jpg => "image/jpeg",
        _ => "application/octet-stream",
    }
}

#[async_trait]
impl Parser for ImageParser {
    fn name(&self) -> &str {
        "image"
    }

    fn supported_document_types(&self) -> &[DocumentType] {
        &self.document_types
    }

    fn supported_element_kinds(&self) -> &[ElementKind] {
        &[ElementKind::Image]
    }

    async fn parse(&self, document: &Document) -> Result<Vec<Element>, IngestError> {
        let bytes = document.read_bytes().await?;
        if bytes.is_empty() {
            return Ok(Vec::new());
        }

        let content = ElementContent::Image {
            bytes,
            mime_type: mime_type(document.meta.document_type()).to_string(),
            description: None,
        };
        Ok(vec![Element::new(document.id(), 0, content)])
    }
}
