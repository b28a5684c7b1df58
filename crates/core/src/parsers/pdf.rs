use super::Parser;
use crate::chunking::{chunk_by_paragraph, ChunkingConfig};
use crate::error::IngestError;
use crate::models::{Document, DocumentType, Element, ElementContent, ElementKind};
use async_trait::async_trait;
use lopdf::Document as PdfDocument;

#[derive(Debug, Clone)]
pub struct PageText {
    pub number: u32,
    pub text: String,
}

pub struct PdfParser {
    config: ChunkingConfig,
    document_types: Vec<DocumentType>,
}

impl PdfParser {
    pub fn new(config: ChunkingConfig) -> Result<Self, IngestError> {
        config.validate()?;
        Ok(Self {
            config,
            document_types: vec![DocumentType::Pdf],
        })
    }
}

pub fn extract_page_texts(bytes: &[u8]) -> Result<Vec<PageText>, lopdf::Error> {
    let document = PdfDocument::load_mem(bytes)?;

    let mut pages = Vec::new();
    for (page_no, _page_id) in document.get_pages() {
        match document.extract_text(&[page_no]) {
            Ok(text) if !text.trim().is_empty() => pages.push(PageText {
                number: page_no,
                text,
            }),
            Ok(_) => {}
            Err(error) => {
                tracing::debug!(page = page_no, error = %error, "skipping unreadable pdf page");
            }
        }
    }

    Ok(pages)
}

#[async_trait]
impl Parser for PdfParser {
    fn name(&self) -> &str {
        "pdf"
    }

    fn supported_document_types(&self) -> &[DocumentType] {
        &self.document_types
    }

    fn supported_element_kinds(&self) -> &[ElementKind] {
        &[ElementKind::Text]
    }

    async fn parse(&self, document: &Document) -> Result<Vec<Element>, IngestError> {
        let bytes = document.read_bytes().await?;
        let pages = tokio::task::spawn_blocking(move || extract_page_texts(&bytes))
            .await
            .map_err(|error| IngestError::parsing(document.id(), error))?
            .map_err(|error| IngestError::parsing(document.id(), error))?;

        let mut elements = Vec::new();
        let mut position = 0u64;
        for page in pages {
            for chunk in chunk_by_paragraph(&page.text, self.config) {
                elements.push(
                    Element::new(document.id(), position, ElementContent::text(chunk))
                        .with_page(page.number),
                );
                position += 1;
            }
        }

        if elements.is_empty() {
            tracing::warn!(document_id = document.id(), "pdf had no readable page text");
        }
        Ok(elements)
    }
}
