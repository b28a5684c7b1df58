use crate::cancel::CancelSignal;
use crate::embeddings::Embedder;
use crate::error::{ConfigError, IngestError, ModelError, StoreError};
use crate::models::{DocumentMeta, Element, ElementContent};
use crate::router::ParserRouter;
use crate::store::VectorEntry;
use crate::traits::VectorStore;
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestOptions {
    pub concurrency: usize,
    pub embed_batch_size: usize,
    pub timeout_secs: Option<u64>,
}

impl Default for IngestOptions {
    fn default() -> Self {
        Self {
            concurrency: 4,
            embed_batch_size: 64,
            timeout_secs: None,
        }
    }
}

impl IngestOptions {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.concurrency == 0 {
            return Err(ConfigError::Invalid(
                "ingest concurrency must be at least 1".to_string(),
            ));
        }
        if self.embed_batch_size == 0 {
            return Err(ConfigError::Invalid(
                "embed_batch_size must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }
}

#[derive(Debug)]
pub struct FailedDocument {
    pub document_id: String,
    pub error: IngestError,
}

#[derive(Debug)]
pub struct IngestReport {
    pub succeeded: Vec<String>,
    pub failed: Vec<FailedDocument>,
    pub elements_written: usize,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl IngestReport {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn failed_ids(&self) -> Vec<&str> {
        self.failed
            .iter()
            .map(|failure| failure.document_id.as_str())
            .collect()
    }

    pub fn failure(&self, document_id: &str) -> Option<&IngestError> {
        self.failed
            .iter()
            .find(|failure| failure.document_id == document_id)
            .map(|failure| &failure.error)
    }
}

struct ParsedDocument {
    document_id: String,
    elements: Vec<Element>,
}

struct EmbeddedDocument {
    document_id: String,
    entries: Vec<VectorEntry>,
}

type Outcomes = HashMap<String, Result<usize, IngestError>>;

pub struct IngestOrchestrator {
    router: ParserRouter,
    embedder: Arc<dyn Embedder>,
    store: Arc<dyn VectorStore>,
    options: IngestOptions,
}

impl IngestOrchestrator {
    pub fn new(
        router: ParserRouter,
        embedder: Arc<dyn Embedder>,
        store: Arc<dyn VectorStore>,
    ) -> Self {
        Self {
            router,
            embedder,
            store,
            options: IngestOptions::default(),
        }
    }

    pub fn with_options(mut self, options: IngestOptions) -> Result<Self, ConfigError> {
        options.validate()?;
        self.options = options;
        Ok(self)
    }

    pub fn options(&self) -> &IngestOptions {
        &self.options
    }

    pub fn router(&self) -> &ParserRouter {
        &self.router
    }

    pub async fn ingest(&self, documents: &[DocumentMeta]) -> IngestReport {
        self.ingest_with_cancel(documents, &CancelSignal::new()).await
    }

    pub async fn ingest_with_cancel(
        &self,
        documents: &[DocumentMeta],
        cancel: &CancelSignal,
    ) -> IngestReport {
        let started_at = Utc::now();
        let cancel = match self.options.timeout() {
            Some(timeout) => cancel.clone().with_timeout(timeout),
            None => cancel.clone(),
        };

        let mut seen = HashSet::new();
        let unique: Vec<&DocumentMeta> = documents
            .iter()
            .filter(|meta| seen.insert(meta.id().to_string()))
            .collect();
        if unique.len() < documents.len() {
            debug!(
                duplicates = documents.len() - unique.len(),
                "ignoring repeated documents in batch"
            );
        }
        info!(
            documents = unique.len(),
            concurrency = self.options.concurrency,
            "ingest started"
        );

        let mut outcomes = Outcomes::new();
        let parsed = self.parse_all(&unique, &cancel, &mut outcomes).await;
        let embedded = self.embed_all(parsed, &cancel, &mut outcomes).await;
        self.write_all(embedded, &cancel, &mut outcomes).await;

        let mut report = IngestReport {
            succeeded: Vec::new(),
            failed: Vec::new(),
            elements_written: 0,
            started_at,
            finished_at: started_at,
        };
        for meta in unique {
            let document_id = meta.id().to_string();
            match outcomes.remove(&document_id) {
                Some(Ok(count)) => {
                    report.elements_written += count;
                    report.succeeded.push(document_id);
                }
                Some(Err(error)) => report.failed.push(FailedDocument { document_id, error }),
                None => report.failed.push(FailedDocument {
                    document_id,
                    error: IngestError::Cancelled(
                        "document did not finish before cancellation".to_string(),
                    ),
                }),
            }
        }
        report.finished_at = Utc::now();

        info!(
            succeeded = report.succeeded.len(),
            failed = report.failed.len(),
            elements_written = report.elements_written,
            "ingest finished"
        );
        report
    }

    async fn parse_all(
        &self,
        documents: &[&DocumentMeta],
        cancel: &CancelSignal,
        outcomes: &mut Outcomes,
    ) -> Vec<ParsedDocument> {
        let mut parsed = Vec::with_capacity(documents.len());
        let mut pending = stream::iter(documents.iter().copied())
            .map(move |meta| async move {
                (meta.id().to_string(), self.parse_document(meta).await)
            })
            .buffer_unordered(self.options.concurrency);

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    warn!("ingest cancelled while fetching and parsing");
                    break;
                }
                next = pending.next() => next,
            };
            let Some((document_id, result)) = next else {
                break;
            };

            match result {
                Ok(elements) => parsed.push(ParsedDocument {
                    document_id,
                    elements,
                }),
                Err(error) => {
                    warn!(document_id = %document_id, error = %error, "document failed");
                    outcomes.insert(document_id, Err(error));
                }
            }
        }

        parsed
    }

    async fn parse_document(&self, meta: &DocumentMeta) -> Result<Vec<Element>, IngestError> {
        let parser = self.router.resolve(meta.document_type())?;
        let document = meta.fetch().await?;
        let elements = parser.parse(&document).await?;

        let mut ids = HashSet::with_capacity(elements.len());
        for element in &elements {
            if !parser.supported_element_kinds().contains(&element.kind()) {
                return Err(IngestError::parsing(
                    meta.id(),
                    format!(
                        "parser {} emitted undeclared element kind {}",
                        parser.name(),
                        element.kind().as_str()
                    ),
                ));
            }
            if element.document_id != meta.id() {
                return Err(IngestError::parsing(
                    meta.id(),
                    format!("element belongs to {}", element.document_id),
                ));
            }
            if !ids.insert(element.id.as_str()) {
                return Err(IngestError::parsing(
                    meta.id(),
                    format!("duplicate element at position {}", element.position),
                ));
            }
        }

        debug!(
            document_id = meta.id(),
            parser = parser.name(),
            element_count = elements.len(),
            "parsed document"
        );
        Ok(elements)
    }

    async fn embed_all(
        &self,
        parsed: Vec<ParsedDocument>,
        cancel: &CancelSignal,
        outcomes: &mut Outcomes,
    ) -> Vec<EmbeddedDocument> {
        let mut vectors: Vec<Vec<Option<Vec<f32>>>> = parsed
            .iter()
            .map(|document| vec![None; document.elements.len()])
            .collect();
        let mut failed = vec![false; parsed.len()];
        let slots: Vec<(usize, usize)> = parsed
            .iter()
            .enumerate()
            .flat_map(|(doc, document)| (0..document.elements.len()).map(move |el| (doc, el)))
            .collect();

        let mut cancelled = false;
        for chunk in slots.chunks(self.options.embed_batch_size) {
            let batch: Vec<(usize, usize)> = chunk
                .iter()
                .copied()
                .filter(|(doc, _)| !failed[*doc])
                .collect();
            if batch.is_empty() {
                continue;
            }

            let elements: Vec<&Element> = batch
                .iter()
                .map(|(doc, el)| &parsed[*doc].elements[*el])
                .collect();
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    cancelled = true;
                    break;
                }
                result = self.embed_elements(&elements) => result,
            };

            match result {
                Ok(batch_vectors) => {
                    for ((doc, el), vector) in batch.iter().zip(batch_vectors) {
                        vectors[*doc][*el] = Some(vector);
                    }
                }
                Err(error) => {
                    debug!(error = %error, size = batch.len(), "shared embedding batch failed, retrying per document");

                    // Slots are ordered by document, so each document's share is contiguous.
                    let mut by_document: Vec<(usize, Vec<usize>)> = Vec::new();
                    for (doc, el) in &batch {
                        match by_document.last_mut() {
                            Some((last, indices)) if *last == *doc => indices.push(*el),
                            _ => by_document.push((*doc, vec![*el])),
                        }
                    }

                    for (doc, indices) in by_document {
                        let elements: Vec<&Element> = indices
                            .iter()
                            .map(|el| &parsed[doc].elements[*el])
                            .collect();
                        let retry = tokio::select! {
                            biased;
                            _ = cancel.cancelled() => {
                                cancelled = true;
                                break;
                            }
                            retry = self.embed_elements(&elements) => retry,
                        };

                        match retry {
                            Ok(document_vectors) => {
                                for (el, vector) in indices.iter().zip(document_vectors) {
                                    vectors[doc][*el] = Some(vector);
                                }
                            }
                            Err(error) => {
                                let document_id = parsed[doc].document_id.clone();
                                warn!(document_id = %document_id, error = %error, "embedding failed");
                                failed[doc] = true;
                                outcomes.insert(
                                    document_id,
                                    Err(IngestError::EmbeddingFailed(error.to_string())),
                                );
                            }
                        }
                    }
                    if cancelled {
                        break;
                    }
                }
            }
        }

        if cancelled {
            warn!("ingest cancelled while embedding");
            return Vec::new();
        }

        parsed
            .into_iter()
            .zip(vectors)
            .zip(failed)
            .filter(|(_, failed)| !failed)
            .filter_map(|((document, document_vectors), _)| {
                let entries = document
                    .elements
                    .into_iter()
                    .zip(document_vectors)
                    .map(|(element, vector)| vector.map(|vector| VectorEntry { element, vector }))
                    .collect::<Option<Vec<_>>>()?;
                Some(EmbeddedDocument {
                    document_id: document.document_id,
                    entries,
                })
            })
            .collect()
    }

    async fn embed_elements(&self, elements: &[&Element]) -> Result<Vec<Vec<f32>>, ModelError> {
        let mut texts = Vec::new();
        let mut text_slots = Vec::new();
        let mut images = Vec::new();
        let mut image_slots = Vec::new();

        for (slot, element) in elements.iter().enumerate() {
            match &element.content {
                ElementContent::Image { bytes, .. } if self.embedder.supports_images() => {
                    images.push(bytes.clone());
                    image_slots.push(slot);
                }
                _ => match element.text_representation() {
                    Some(text) => {
                        texts.push(text.to_string());
                        text_slots.push(slot);
                    }
                    None => {
                        return Err(ModelError::Unsupported(format!(
                            "element at position {} has no embeddable content",
                            element.position
                        )))
                    }
                },
            }
        }

        let mut vectors: Vec<Option<Vec<f32>>> = vec![None; elements.len()];
        if !texts.is_empty() {
            let output = self.embedder.embed_text(&texts).await?;
            place(&mut vectors, &text_slots, output)?;
        }
        if !images.is_empty() {
            let output = self.embedder.embed_image(&images).await?;
            place(&mut vectors, &image_slots, output)?;
        }

        vectors
            .into_iter()
            .map(|vector| {
                vector.ok_or_else(|| {
                    ModelError::EmbeddingFailed("embedder skipped an element".to_string())
                })
            })
            .collect()
    }

    async fn write_all(
        &self,
        embedded: Vec<EmbeddedDocument>,
        cancel: &CancelSignal,
        outcomes: &mut Outcomes,
    ) {
        let mut outage: Option<String> = None;

        for document in embedded {
            if let Some(details) = &outage {
                outcomes.insert(
                    document.document_id,
                    Err(IngestError::Store(StoreError::Unavailable {
                        backend: "vector store".to_string(),
                        details: format!("not written after earlier outage: {details}"),
                    })),
                );
                continue;
            }

            // Once the upsert lands the prune runs to completion, so the
            // outcome reflects what the store holds.
            let upserted = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    warn!("ingest cancelled while writing");
                    break;
                }
                result = self.upsert_document(&document) => result,
            };
            let result = match upserted {
                Ok(()) => self
                    .prune_document(&document)
                    .await
                    .map(|()| document.entries.len()),
                Err(error) => Err(error),
            };

            match result {
                Ok(count) => {
                    debug!(document_id = %document.document_id, element_count = count, "stored document");
                    outcomes.insert(document.document_id, Ok(count));
                }
                Err(error) => {
                    warn!(document_id = %document.document_id, error = %error, "store write failed");
                    if error.is_unavailable() {
                        outage = Some(error.to_string());
                    }
                    outcomes.insert(document.document_id, Err(IngestError::Store(error)));
                }
            }
        }
    }

    async fn upsert_document(&self, document: &EmbeddedDocument) -> Result<(), StoreError> {
        if document.entries.is_empty() {
            return Ok(());
        }
        self.store.upsert(&document.entries).await
    }

    async fn prune_document(&self, document: &EmbeddedDocument) -> Result<(), StoreError> {
        let current: HashSet<&str> = document.entries.iter().map(|entry| entry.id()).collect();
        let stale: Vec<String> = self
            .store
            .list_document(&document.document_id)
            .await?
            .into_iter()
            .filter(|id| !current.contains(id.as_str()))
            .collect();

        if !stale.is_empty() {
            self.store.remove(&stale).await?;
            debug!(document_id = %document.document_id, stale = stale.len(), "pruned stale elements");
        }
        Ok(())
    }
}

fn place(
    vectors: &mut [Option<Vec<f32>>],
    slots: &[usize],
    output: Vec<Vec<f32>>,
) -> Result<(), ModelError> {
    if output.len() != slots.len() {
        return Err(ModelError::EmbeddingFailed(format!(
            "expected {} vectors, embedder returned {}",
            slots.len(),
            output.len()
        )));
    }
    for (slot, vector) in slots.iter().zip(output) {
        vectors[*slot] = Some(vector);
    }
    Ok(())
}
