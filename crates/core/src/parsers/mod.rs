pub mod image;
pub mod pdf;
pub mod text;

pub use image::ImageParser;
pub use pdf::PdfParser;
pub use text::TextParser;

use crate::error::IngestError;
use crate::models::{Document, DocumentType, Element, ElementKind};
use async_trait::async_trait;

/// Turns a fetched document into an ordered sequence of elements.
///
/// The declared document types are checked when the parser is registered with
/// a router; the declared element kinds are checked against every parse.
/// Zero elements is a valid outcome for empty or unreadable content.
#[async_trait]
pub trait Parser: Send + Sync {
    fn name(&self) -> &str;

    fn supported_document_types(&self) -> &[DocumentType];

    fn supported_element_kinds(&self) -> &[ElementKind];

    async fn parse(&self, document: &Document) -> Result<Vec<Element>, IngestError>;

    fn supports(&self, document_type: &DocumentType) -> bool {
        self.supported_document_types().contains(document_type)
    }
}
