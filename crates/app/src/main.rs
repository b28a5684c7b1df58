use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand};
use docsearch_core::{
    source_from_uri, CancelSignal, ComponentConfig, ComponentRegistry, DocumentMeta,
    ElementContent, LocalFileSource, PipelineConfig, TextSource,
};
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "docsearch", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Pipeline configuration (JSON). Without one, an offline pipeline is used.
    #[arg(long, env = "DOCSEARCH_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Snapshot file for the in-memory store of the offline pipeline.
    #[arg(
        long,
        env = "DOCSEARCH_SNAPSHOT",
        default_value = "docsearch-store.json",
        global = true
    )]
    snapshot: PathBuf,
}

#[derive(Subcommand)]
enum Command {
    /// Ingest files, folders, literal text and remote objects.
    Ingest {
        /// Folder ingested recursively. May be repeated.
        #[arg(long = "dir")]
        dirs: Vec<PathBuf>,
        /// Literal text ingested as its own document. May be repeated.
        #[arg(long = "text")]
        texts: Vec<String>,
        /// Document URIs: file://, text://, gcs://, hf://, http(s)://, or a plain path.
        uris: Vec<String>,
    },
    /// Search ingested elements.
    Search {
        #[arg(long)]
        query: String,
        /// Number of results to return.
        #[arg(long, default_value = "5")]
        top_k: usize,
    },
}

fn load_config(cli: &Cli) -> anyhow::Result<PipelineConfig> {
    match &cli.config {
        Some(path) => PipelineConfig::from_file(path)
            .with_context(|| format!("failed to load config {}", path.display())),
        None => {
            let mut config = PipelineConfig::default();
            config.vector_store = ComponentConfig::new("memory")
                .with_config(json!({ "snapshot": cli.snapshot }));
            Ok(config)
        }
    }
}

fn collect_documents(
    dirs: &[PathBuf],
    texts: &[String],
    uris: &[String],
) -> anyhow::Result<Vec<DocumentMeta>> {
    let mut documents = Vec::new();

    for dir in dirs {
        let sources = LocalFileSource::list_sources(dir)
            .with_context(|| format!("failed to list {}", dir.display()))?;
        documents.extend(
            sources
                .into_iter()
                .map(|source| DocumentMeta::from_source(Arc::new(source))),
        );
    }
    for text in texts {
        documents.push(DocumentMeta::from_source(Arc::new(TextSource::new(text.as_str()))));
    }
    for uri in uris {
        let source = source_from_uri(uri).with_context(|| format!("invalid document uri {uri}"))?;
        documents.push(DocumentMeta::from_source(source));
    }

    Ok(documents)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli)?;
    let pipeline = config
        .build(&ComponentRegistry::with_builtins())
        .context("failed to assemble pipeline")?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        started_at = %Utc::now().to_rfc3339(),
        "docsearch boot"
    );

    match cli.command {
        Command::Ingest { dirs, texts, uris } => {
            let documents = collect_documents(&dirs, &texts, &uris)?;
            if documents.is_empty() {
                anyhow::bail!("nothing to ingest: pass --dir, --text or document uris");
            }

            let cancel = CancelSignal::new();
            let on_interrupt = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("interrupt received, cancelling ingest");
                    on_interrupt.cancel();
                }
            });

            let report = pipeline
                .ingest
                .ingest_with_cancel(&documents, &cancel)
                .await;

            for document_id in &report.succeeded {
                println!("ok     {document_id}");
            }
            for failure in &report.failed {
                println!("failed {} ({})", failure.document_id, failure.error);
            }
            println!(
                "{} succeeded, {} failed, {} elements written in {} ms",
                report.succeeded.len(),
                report.failed.len(),
                report.elements_written,
                (report.finished_at - report.started_at).num_milliseconds()
            );

            if !report.is_success() {
                anyhow::bail!("{} document(s) failed to ingest", report.failed.len());
            }
        }
        Command::Search { query, top_k } => {
            let results = pipeline
                .search
                .search(&query, top_k)
                .await
                .context("search failed")?;

            println!("query: {query}");
            if results.is_empty() {
                println!("no results");
            }
            for (rank, result) in results.iter().enumerate() {
                let element = &result.element;
                let page = element
                    .page
                    .map(|page| format!(" page={page}"))
                    .unwrap_or_default();
                println!(
                    "[{}] score={:.4} document={} position={}{}",
                    rank + 1,
                    result.score,
                    element.document_id,
                    element.position,
                    page
                );
                match &element.content {
                    ElementContent::Text { text, section } => {
                        if let Some(section) = section {
                            println!("  section: {section}");
                        }
                        println!("  {text}");
                    }
                    ElementContent::Image {
                        mime_type,
                        description,
                        bytes,
                    } => {
                        println!(
                            "  <{mime_type}, {} bytes> {}",
                            bytes.len(),
                            description.as_deref().unwrap_or("")
                        );
                    }
                }
            }
        }
    }

    Ok(())
}
