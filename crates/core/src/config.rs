use crate::chunking::ChunkingConfig;
use crate::embeddings::{CharacterNgramEmbedder, Embedder, HttpEmbedder, DEFAULT_EMBEDDING_DIMENSIONS};
use crate::error::ConfigError;
use crate::ingest::{IngestOptions, IngestOrchestrator};
use crate::llm::ChatCompletionsClient;
use crate::models::DocumentType;
use crate::parsers::{ImageParser, Parser, PdfParser, TextParser};
use crate::rephrasers::{LlmRephraser, MultiQueryRephraser, NoopRephraser};
use crate::rerankers::{HttpReranker, NoopReranker};
use crate::router::ParserRouter;
use crate::search::{SearchOptions, SearchOrchestrator};
use crate::stores::{InMemoryVectorStore, QdrantStore};
use crate::traits::{Rephraser, Reranker, VectorStore};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentConfig {
    pub kind: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub config: Value,
}

impl ComponentConfig {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            config: Value::Null,
        }
    }

    pub fn with_config(mut self, config: Value) -> Self {
        self.config = config;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParsersConfig {
    pub chunking: ChunkingConfig,
    pub routes: HashMap<DocumentType, ComponentConfig>,
    pub default: Option<ComponentConfig>,
}

impl Default for ParsersConfig {
    fn default() -> Self {
        let text = ComponentConfig::new("text");
        let routes = [
            (DocumentType::Txt, text.clone()),
            (DocumentType::Md, text.clone()),
            (DocumentType::Html, text.clone()),
            (DocumentType::Json, text.clone()),
            (DocumentType::Csv, text),
            (DocumentType::Pdf, ComponentConfig::new("pdf")),
            (DocumentType::Png, ComponentConfig::new("image")),
            (DocumentType::Jpg, ComponentConfig::new("image")),
        ]
        .into_iter()
        .collect();

        Self {
            chunking: ChunkingConfig::default(),
            routes,
            default: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub embedder: ComponentConfig,
    pub vector_store: ComponentConfig,
    #[serde(default)]
    pub parsers: ParsersConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rephraser: Option<ComponentConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reranker: Option<ComponentConfig>,
    #[serde(default)]
    pub ingest: IngestOptions,
    #[serde(default)]
    pub search: SearchOptions,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            embedder: ComponentConfig::new("ngram"),
            vector_store: ComponentConfig::new("memory"),
            parsers: ParsersConfig::default(),
            rephraser: None,
            reranker: None,
            ingest: IngestOptions::default(),
            search: SearchOptions::default(),
        }
    }
}

pub struct Pipeline {
    pub ingest: IngestOrchestrator,
    pub search: SearchOrchestrator,
}

impl PipelineConfig {
    pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(raw)?)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json(&raw)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.ingest.validate()?;
        self.search.validate()?;
        self.parsers
            .chunking
            .validate()
            .map_err(|error| ConfigError::Invalid(error.to_string()))?;
        if self.parsers.routes.is_empty() && self.parsers.default.is_none() {
            return Err(ConfigError::Invalid(
                "at least one parser route or a default parser is required".to_string(),
            ));
        }
        Ok(())
    }

    pub fn build(&self, registry: &ComponentRegistry) -> Result<Pipeline, ConfigError> {
        self.validate()?;

        let embedder = registry.embedder(&self.embedder)?;
        let store = registry.vector_store(&self.vector_store, embedder.dimensions())?;
        let router = self.build_router(registry)?;

        let mut search = SearchOrchestrator::new(Arc::clone(&embedder), Arc::clone(&store))
            .with_options(self.search.clone())?;
        if let Some(rephraser) = &self.rephraser {
            search = search.with_rephraser(registry.rephraser(rephraser)?);
        }
        if let Some(reranker) = &self.reranker {
            search = search.with_reranker(registry.reranker(reranker)?);
        }

        let ingest =
            IngestOrchestrator::new(router, embedder, store).with_options(self.ingest.clone())?;

        info!(
            embedder = %self.embedder.kind,
            vector_store = %self.vector_store.kind,
            rephraser = self.rephraser.as_ref().map(|c| c.kind.as_str()).unwrap_or("none"),
            reranker = self.reranker.as_ref().map(|c| c.kind.as_str()).unwrap_or("none"),
            "pipeline assembled"
        );
        Ok(Pipeline { ingest, search })
    }

    fn build_router(&self, registry: &ComponentRegistry) -> Result<ParserRouter, ConfigError> {
        let chunking = self.parsers.chunking;
        // Identical parser configs share one instance.
        let mut built: HashMap<String, Arc<dyn Parser>> = HashMap::new();
        let mut parser_for = |component: &ComponentConfig| -> Result<Arc<dyn Parser>, ConfigError> {
            let key = serde_json::to_string(component)?;
            if let Some(parser) = built.get(&key) {
                return Ok(Arc::clone(parser));
            }
            let parser = registry.parser(component, chunking)?;
            built.insert(key, Arc::clone(&parser));
            Ok(parser)
        };

        let mut routes: Vec<(&DocumentType, &ComponentConfig)> = self.parsers.routes.iter().collect();
        routes.sort_by(|left, right| left.0.as_str().cmp(right.0.as_str()));

        let mut router = ParserRouter::new();
        for (document_type, component) in routes {
            router = router.route(document_type.clone(), parser_for(component)?)?;
        }
        if let Some(component) = &self.parsers.default {
            router = router.with_default(parser_for(component)?);
        }
        Ok(router)
    }
}

type EmbedderFactory = dyn Fn(&Value) -> Result<Arc<dyn Embedder>, ConfigError> + Send + Sync;
type StoreFactory =
    dyn Fn(&Value, usize) -> Result<Arc<dyn VectorStore>, ConfigError> + Send + Sync;
type ParserFactory =
    dyn Fn(&Value, ChunkingConfig) -> Result<Arc<dyn Parser>, ConfigError> + Send + Sync;
type RephraserFactory = dyn Fn(&Value) -> Result<Arc<dyn Rephraser>, ConfigError> + Send + Sync;
type RerankerFactory = dyn Fn(&Value) -> Result<Arc<dyn Reranker>, ConfigError> + Send + Sync;

#[derive(Default)]
pub struct ComponentRegistry {
    embedders: HashMap<String, Arc<EmbedderFactory>>,
    stores: HashMap<String, Arc<StoreFactory>>,
    parsers: HashMap<String, Arc<ParserFactory>>,
    rephrasers: HashMap<String, Arc<RephraserFactory>>,
    rerankers: HashMap<String, Arc<RerankerFactory>>,
}

impl ComponentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_builtins() -> Self {
        let mut registry = Self::new();

        registry
            .register_embedder("ngram", |value| {
                let settings: NgramSettings = decode_settings("embedder", "ngram", value)?;
                Ok(Arc::new(CharacterNgramEmbedder::new(settings.dimensions)) as Arc<dyn Embedder>)
            })
            .register_embedder("http", |value| {
                let settings: HttpEmbedderSettings = decode_settings("embedder", "http", value)?;
                let mut embedder =
                    HttpEmbedder::new(settings.endpoint, settings.model, settings.dimensions);
                if let Some(key) = api_key(settings.api_key_env.as_deref())? {
                    embedder = embedder.with_api_key(key);
                }
                Ok(Arc::new(embedder) as Arc<dyn Embedder>)
            });

        registry
            .register_store("memory", |value, dimensions| {
                let settings: MemorySettings = decode_settings("vector_store", "memory", value)?;
                let mut store = InMemoryVectorStore::new(dimensions);
                if let Some(path) = settings.snapshot {
                    store = store.with_snapshot(path);
                }
                Ok(Arc::new(store) as Arc<dyn VectorStore>)
            })
            .register_store("qdrant", |value, dimensions| {
                let settings: QdrantSettings = decode_settings("vector_store", "qdrant", value)?;
                let mut store = QdrantStore::new(settings.url, settings.collection, dimensions);
                if let Some(key) = api_key(settings.api_key_env.as_deref())? {
                    store = store.with_api_key(key);
                }
                Ok(Arc::new(store) as Arc<dyn VectorStore>)
            });

        registry
            .register_parser("text", |value, chunking| {
                let chunking = parser_chunking("text", value, chunking)?;
                let parser = TextParser::new(chunking).map_err(invalid)?;
                Ok(Arc::new(parser) as Arc<dyn Parser>)
            })
            .register_parser("pdf", |value, chunking| {
                let chunking = parser_chunking("pdf", value, chunking)?;
                let parser = PdfParser::new(chunking).map_err(invalid)?;
                Ok(Arc::new(parser) as Arc<dyn Parser>)
            })
            .register_parser("image", |_, _| Ok(Arc::new(ImageParser::new()) as Arc<dyn Parser>));

        registry
            .register_rephraser("noop", |_| Ok(Arc::new(NoopRephraser) as Arc<dyn Rephraser>))
            .register_rephraser("llm", |value| {
                let settings: LlmSettings = decode_settings("rephraser", "llm", value)?;
                let client = settings.client()?;
                Ok(Arc::new(LlmRephraser::new(Arc::new(client))) as Arc<dyn Rephraser>)
            })
            .register_rephraser("multi", |value| {
                let settings: LlmSettings = decode_settings("rephraser", "multi", value)?;
                let client = settings.client()?;
                Ok(Arc::new(MultiQueryRephraser::new(Arc::new(client), settings.n))
                    as Arc<dyn Rephraser>)
            });

        registry
            .register_reranker("noop", |_| Ok(Arc::new(NoopReranker) as Arc<dyn Reranker>))
            .register_reranker("http", |value| {
                let settings: HttpRerankerSettings = decode_settings("reranker", "http", value)?;
                let mut reranker = HttpReranker::new(settings.endpoint, settings.model);
                if let Some(key) = api_key(settings.api_key_env.as_deref())? {
                    reranker = reranker.with_api_key(key);
                }
                if let Some(top_n) = settings.top_n {
                    reranker = reranker.with_top_n(top_n);
                }
                Ok(Arc::new(reranker) as Arc<dyn Reranker>)
            });

        registry
    }

    pub fn register_embedder<F>(&mut self, kind: impl Into<String>, factory: F) -> &mut Self
    where
        F: Fn(&Value) -> Result<Arc<dyn Embedder>, ConfigError> + Send + Sync + 'static,
    {
        self.embedders.insert(kind.into(), Arc::new(factory));
        self
    }

    pub fn register_store<F>(&mut self, kind: impl Into<String>, factory: F) -> &mut Self
    where
        F: Fn(&Value, usize) -> Result<Arc<dyn VectorStore>, ConfigError> + Send + Sync + 'static,
    {
        self.stores.insert(kind.into(), Arc::new(factory));
        self
    }

    pub fn register_parser<F>(&mut self, kind: impl Into<String>, factory: F) -> &mut Self
    where
        F: Fn(&Value, ChunkingConfig) -> Result<Arc<dyn Parser>, ConfigError>
            + Send
            + Sync
            + 'static,
    {
        self.parsers.insert(kind.into(), Arc::new(factory));
        self
    }

    pub fn register_rephraser<F>(&mut self, kind: impl Into<String>, factory: F) -> &mut Self
    where
        F: Fn(&Value) -> Result<Arc<dyn Rephraser>, ConfigError> + Send + Sync + 'static,
    {
        self.rephrasers.insert(kind.into(), Arc::new(factory));
        self
    }

    pub fn register_reranker<F>(&mut self, kind: impl Into<String>, factory: F) -> &mut Self
    where
        F: Fn(&Value) -> Result<Arc<dyn Reranker>, ConfigError> + Send + Sync + 'static,
    {
        self.rerankers.insert(kind.into(), Arc::new(factory));
        self
    }

    pub fn embedder(&self, component: &ComponentConfig) -> Result<Arc<dyn Embedder>, ConfigError> {
        let factory = lookup(&self.embedders, "embedder", &component.kind)?;
        factory(&component.config)
    }

    pub fn vector_store(
        &self,
        component: &ComponentConfig,
        dimensions: usize,
    ) -> Result<Arc<dyn VectorStore>, ConfigError> {
        let factory = lookup(&self.stores, "vector_store", &component.kind)?;
        factory(&component.config, dimensions)
    }

    pub fn parser(
        &self,
        component: &ComponentConfig,
        chunking: ChunkingConfig,
    ) -> Result<Arc<dyn Parser>, ConfigError> {
        let factory = lookup(&self.parsers, "parser", &component.kind)?;
        factory(&component.config, chunking)
    }

    pub fn rephraser(&self, component: &ComponentConfig) -> Result<Arc<dyn Rephraser>, ConfigError> {
        let factory = lookup(&self.rephrasers, "rephraser", &component.kind)?;
        factory(&component.config)
    }

    pub fn reranker(&self, component: &ComponentConfig) -> Result<Arc<dyn Reranker>, ConfigError> {
        let factory = lookup(&self.rerankers, "reranker", &component.kind)?;
        factory(&component.config)
    }
}

fn lookup<'a, T: ?Sized>(
    table: &'a HashMap<String, Arc<T>>,
    role: &str,
    kind: &str,
) -> Result<&'a Arc<T>, ConfigError> {
    table.get(kind).ok_or_else(|| ConfigError::UnknownComponent {
        role: role.to_string(),
        kind: kind.to_string(),
    })
}

fn decode_settings<T: DeserializeOwned>(role: &str, kind: &str, value: &Value) -> Result<T, ConfigError> {
    let value = if value.is_null() { json!({}) } else { value.clone() };
    serde_json::from_value(value)
        .map_err(|error| ConfigError::Invalid(format!("{role} {kind}: {error}")))
}

fn api_key(variable: Option<&str>) -> Result<Option<String>, ConfigError> {
    match variable {
        None => Ok(None),
        Some(name) => std::env::var(name).map(Some).map_err(|_| {
            ConfigError::Invalid(format!("environment variable {name} is not set"))
        }),
    }
}

fn parser_chunking(
    kind: &str,
    value: &Value,
    chunking: ChunkingConfig,
) -> Result<ChunkingConfig, ConfigError> {
    let settings: ParserSettings = decode_settings("parser", kind, value)?;
    Ok(settings.chunking.unwrap_or(chunking))
}

fn invalid(error: impl ToString) -> ConfigError {
    ConfigError::Invalid(error.to_string())
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct NgramSettings {
    #[serde(default = "default_dimensions")]
    dimensions: usize,
}

fn default_dimensions() -> usize {
    DEFAULT_EMBEDDING_DIMENSIONS
}

#[derive(Deserialize)]
struct HttpEmbedderSettings {
    endpoint: String,
    model: String,
    dimensions: usize,
    api_key_env: Option<String>,
}

#[derive(Deserialize)]
struct MemorySettings {
    snapshot: Option<PathBuf>,
}

#[derive(Deserialize)]
struct QdrantSettings {
    url: String,
    collection: String,
    api_key_env: Option<String>,
}

#[derive(Deserialize)]
struct ParserSettings {
    chunking: Option<ChunkingConfig>,
}

#[derive(Deserialize)]
struct LlmSettings {
    endpoint: String,
    model: String,
    api_key_env: Option<String>,
    #[serde(default = "default_variants")]
    n: usize,
}

fn default_variants() -> usize {
    3
}

impl LlmSettings {
    fn client(&self) -> Result<ChatCompletionsClient, ConfigError> {
        let mut client = ChatCompletionsClient::new(&self.endpoint, &self.model);
        if let Some(key) = api_key(self.api_key_env.as_deref())? {
            client = client.with_api_key(key);
        }
        Ok(client)
    }
}

#[derive(Deserialize)]
struct HttpRerankerSettings {
    endpoint: String,
    model: String,
    api_key_env: Option<String>,
    top_n: Option<usize>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_builds() -> Result<(), ConfigError> {
        let pipeline = PipelineConfig::default().build(&ComponentRegistry::with_builtins())?;
        let router = pipeline.ingest.router();
        assert_eq!(router.routed_types().len(), 8);
        assert!(router.resolve(&DocumentType::Other("zip".to_string())).is_err());
        Ok(())
    }

    #[test]
    fn json_config_is_read() -> Result<(), ConfigError> {
        let config = PipelineConfig::from_json(
            r#"{
                "embedder": { "kind": "ngram", "config": { "dimensions": 64 } },
                "vector_store": { "kind": "qdrant", "config": { "url": "http://localhost:6333", "collection": "docs" } },
                "parsers": { "routes": { "md": { "kind": "text" } }, "default": { "kind": "text" } },
                "reranker": { "kind": "noop" },
                "ingest": { "concurrency": 2 },
                "search": { "oversampling": 5 }
            }"#,
        )?;

        assert_eq!(config.ingest.concurrency, 2);
        assert_eq!(config.ingest.embed_batch_size, IngestOptions::default().embed_batch_size);
        assert_eq!(config.search.oversampling, 5);
        assert_eq!(config.parsers.routes.len(), 1);

        let pipeline = config.build(&ComponentRegistry::with_builtins())?;
        let parser = pipeline.ingest.router().resolve(&DocumentType::Other("log".to_string()));
        assert!(parser.is_ok());
        Ok(())
    }

    #[test]
    fn unknown_kind_is_reported_with_role() {
        let config = PipelineConfig {
            embedder: ComponentConfig::new("word2vec"),
            ..PipelineConfig::default()
        };
        let result = config.build(&ComponentRegistry::with_builtins());
        assert!(matches!(
            result,
            Err(ConfigError::UnknownComponent { role, kind }) if role == "embedder" && kind == "word2vec"
        ));
    }

    #[test]
    fn parser_must_support_its_route() {
        let mut config = PipelineConfig::default();
        config
            .parsers
            .routes
            .insert(DocumentType::Pdf, ComponentConfig::new("image"));
        let result = config.build(&ComponentRegistry::with_builtins());
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn zero_concurrency_fails_validation() {
        let mut config = PipelineConfig::default();
        config.ingest.concurrency = 0;
        assert!(config.build(&ComponentRegistry::with_builtins()).is_err());
    }

    #[test]
    fn missing_api_key_variable_is_invalid() {
        let mut config = PipelineConfig::default();
        config.reranker = Some(ComponentConfig::new("http").with_config(json!({
            "endpoint": "http://localhost:8080",
            "model": "rerank",
            "api_key_env": "DOCSEARCH_TEST_KEY_THAT_IS_NEVER_SET"
        })));
        let result = config.build(&ComponentRegistry::with_builtins());
        assert!(matches!(result, Err(ConfigError::Invalid(message)) if message.contains("DOCSEARCH_TEST_KEY_THAT_IS_NEVER_SET")));
    }

    #[test]
    fn custom_components_can_be_registered() -> Result<(), ConfigError> {
        let mut registry = ComponentRegistry::with_builtins();
        registry.register_embedder("tiny", |_| {
            Ok(Arc::new(CharacterNgramEmbedder::new(8)) as Arc<dyn Embedder>)
        });
        let config = PipelineConfig {
            embedder: ComponentConfig::new("tiny"),
            ..PipelineConfig::default()
        };
        config.build(&registry)?;
        Ok(())
    }
}
