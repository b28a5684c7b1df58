use crate::chunking::ChunkingConfig;
use crate::error::{ConfigError, IngestError};
use crate::models::DocumentType;
use crate::parsers::{ImageParser, Parser, PdfParser, TextParser};
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Clone, Default)]
pub struct ParserRouter {
    routes: HashMap<DocumentType, Arc<dyn Parser>>,
    default: Option<Arc<dyn Parser>>,
}

impl ParserRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_builtins(chunking: ChunkingConfig) -> Result<Self, ConfigError> {
        let text = TextParser::new(chunking).map_err(invalid)?;
        let pdf = PdfParser::new(chunking).map_err(invalid)?;
        Self::new()
            .register(Arc::new(text))?
            .register(Arc::new(pdf))?
            .register(Arc::new(ImageParser::new()))
    }

    pub fn register(mut self, parser: Arc<dyn Parser>) -> Result<Self, ConfigError> {
        for document_type in parser.supported_document_types().to_vec() {
            if let Some(existing) = self.routes.get(&document_type) {
                return Err(ConfigError::Invalid(format!(
                    "document type {document_type} is claimed by both {} and {}",
                    existing.name(),
                    parser.name()
                )));
            }
            self.routes.insert(document_type, Arc::clone(&parser));
        }
        Ok(self)
    }

    pub fn route(
        mut self,
        document_type: DocumentType,
        parser: Arc<dyn Parser>,
    ) -> Result<Self, ConfigError> {
        if !parser.supports(&document_type) {
            return Err(ConfigError::Invalid(format!(
                "parser {} does not support document type {document_type}",
                parser.name()
            )));
        }
        self.routes.insert(document_type, parser);
        Ok(self)
    }

    pub fn with_default(mut self, parser: Arc<dyn Parser>) -> Self {
        self.default = Some(parser);
        self
    }

    pub fn resolve(&self, document_type: &DocumentType) -> Result<Arc<dyn Parser>, IngestError> {
        self.routes
            .get(document_type)
            .or(self.default.as_ref())
            .cloned()
            .ok_or_else(|| IngestError::UnsupportedDocumentType(document_type.to_string()))
    }

    pub fn routed_types(&self) -> Vec<&DocumentType> {
        let mut types: Vec<_> = self.routes.keys().collect();
        types.sort_by(|left, right| left.as_str().cmp(right.as_str()));
        types
    }
}

fn invalid(error: IngestError) -> ConfigError {
    ConfigError::Invalid(error.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_is_deterministic() -> Result<(), Box<dyn std::error::Error>> {
        let router = ParserRouter::with_builtins(ChunkingConfig::default())?;
        let first = router.resolve(&DocumentType::Pdf)?;
        let second = router.resolve(&DocumentType::Pdf)?;
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.name(), "pdf");
        assert_eq!(router.resolve(&DocumentType::Md)?.name(), "text");
        assert_eq!(router.resolve(&DocumentType::Jpg)?.name(), "image");
        Ok(())
    }

    #[test]
    fn unknown_type_without_default_fails_closed() -> Result<(), ConfigError> {
        let router = ParserRouter::with_builtins(ChunkingConfig::default())?;
        let result = router.resolve(&DocumentType::Other("docx".to_string()));
        assert!(matches!(
            result,
            Err(IngestError::UnsupportedDocumentType(name)) if name == "docx"
        ));
        Ok(())
    }

    #[test]
    fn default_parser_catches_unmapped_types() -> Result<(), Box<dyn std::error::Error>> {
        let text: Arc<dyn Parser> = Arc::new(TextParser::new(ChunkingConfig::default())?);
        let router = ParserRouter::new().with_default(Arc::clone(&text));
        let parser = router.resolve(&DocumentType::Other("log".to_string()))?;
        assert!(Arc::ptr_eq(&parser, &text));
        Ok(())
    }

    #[test]
    fn overlapping_registrations_are_rejected() -> Result<(), Box<dyn std::error::Error>> {
        let router = ParserRouter::new().register(Arc::new(ImageParser::new()))?;
        assert!(router.register(Arc::new(ImageParser::new())).is_err());
        Ok(())
    }

    #[test]
    fn explicit_route_must_be_supported() -> Result<(), Box<dyn std::error::Error>> {
        let result = ParserRouter::new().route(DocumentType::Pdf, Arc::new(ImageParser::new()));
        assert!(result.is_err());

        let text: Arc<dyn Parser> = Arc::new(TextParser::new(ChunkingConfig::default())?);
        let router = ParserRouter::with_builtins(ChunkingConfig::default())?
            .route(DocumentType::Html, Arc::clone(&text))?;
        assert!(Arc::ptr_eq(&router.resolve(&DocumentType::Html)?, &text));
        Ok(())
    }
}
