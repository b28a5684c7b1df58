use super::Parser;
use crate::chunking::{chunk_by_paragraph, ChunkingConfig};
use crate::error::IngestError;
use crate::models::{Document, DocumentType, Element, ElementContent, ElementKind};
use async_trait::async_trait;
use regex::Regex;

const MARKDOWN_HEADING: &str = r"(?m)^[ \t]{0,3}#{1,6}[ \t]+(.+?)[ \t]*#*[ \t]*$";
const HTML_NOISE: &str = r"(?is)<(script|style)[^>]*>.*?</(script|style)>";
const HTML_TAG: &str = r"(?s)<[^>]+>";

pub struct TextParser {
    config: ChunkingConfig,
    document_types: Vec<DocumentType>,
    heading_re: Regex,
    html_noise_re: Regex,
    html_tag_re: Regex,
}

impl TextParser {
    pub fn new(config: ChunkingConfig) -> Result<Self, IngestError> {
        config.validate()?;
        Ok(Self {
            config,
            document_types: vec![
                DocumentType::Txt,
                DocumentType::Md,
                DocumentType::Html,
                DocumentType::Json,
                DocumentType::Csv,
            ],
            heading_re: Regex::new(MARKDOWN_HEADING)?,
            html_noise_re: Regex::new(HTML_NOISE)?,
            html_tag_re: Regex::new(HTML_TAG)?,
        })
    }

    fn markdown_sections(&self, text: &str) -> Vec<(Option<String>, String)> {
        let mut sections = Vec::new();
        let mut heading = None;
        let mut cursor = 0;

        for capture in self.heading_re.captures_iter(text) {
            let (Some(whole), Some(title)) = (capture.get(0), capture.get(1)) else {
                continue;
            };
            sections.push((heading.take(), text[cursor..whole.start()].to_string()));
            heading = Some(title.as_str().to_string());
            cursor = whole.end();
        }
        sections.push((heading, text[cursor..].to_string()));
        sections
    }

    fn strip_html(&self, text: &str) -> String {
        let without_noise = self.html_noise_re.replace_all(text, " ");
        self.html_tag_re
            .replace_all(&without_noise, "\n\n")
            .replace("&nbsp;", " ")
            .replace("&amp;", "&")
            .replace("&lt;", "<")
            .replace("&gt;", ">")
    }
}

#[async_trait]
impl Parser for TextParser {
    fn name(&self) -> &str {
        "text"
    }

    fn supported_document_types(&self) -> &[DocumentType] {
        &self.document_types
    }

    fn supported_element_kinds(&self) -> &[ElementKind] {
        &[ElementKind::Text]
    }

    async fn parse(&self, document: &Document) -> Result<Vec<Element>, IngestError> {
        let raw = document.read_text().await?;

        let sections = match document.meta.document_type() {
            DocumentType::Md => self.markdown_sections(&raw),
            DocumentType::Html => vec![(None, self.strip_html(&raw))],
            _ => vec![(None, raw)],
        };

        let mut elements = Vec::new();
        let mut position = 0u64;
        for (section, body) in sections {
            for chunk in chunk_by_paragraph(&body, self.config) {
                elements.push(Element::new(
                    document.id(),
                    position,
                    ElementContent::Text {
                        text: chunk,
                        section: section.clone(),
                    },
                ));
                position += 1;
            }
        }

        tracing::debug!(
            document_id = document.id(),
            element_count = elements.len(),
            "parsed text document"
        );
        Ok(elements)
    }
}
