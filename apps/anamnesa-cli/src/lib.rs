//! Shared wiring for the `anamnesa-*` binaries.
use std::sync::Arc;
use std::time::{Duration, Instant};

use anamnesa_core::config::{Config, FacadeConfig, Settings};
use anamnesa_core::ingest::{CrawlerExportSource, DefaultExtractor, DirectorySource};
use anamnesa_core::traits::DocumentSource;
use anamnesa_core::types::RetrievalContext;
use anamnesa_hybrid::{IndexBuilder, RetrievalFacade, RetrievalRequest, RetrievalResponse, RetrievalService, SnapshotStore};
use anyhow::Context;
use tracing_subscriber::EnvFilter;

/// Logs go to stderr so stdout stays clean for JSON output.
/// `RUST_LOG` wins over `logging.filter`.
pub fn init_tracing(default_filter: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

/// `<query> [max_docs] [context]`, the UI's positional contract.
/// `--max-docs/-k` and `--context/-c` override the positional values.
/// Context defaults to `anamnesis`.
pub fn parse_query_args(args: &[String]) -> Result<RetrievalRequest, String> {
    let mut request = RetrievalRequest { context: RetrievalContext::Anamnesis, ..RetrievalRequest::default() };
    let mut positional = Vec::new();
    let mut max_docs_flag = None;
    let mut context_flag = None;
    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--max-docs" | "-k" => {
                max_docs_flag = Some(args.get(i + 1).ok_or("--max-docs requires a number")?.as_str());
                i += 1;
            }
            "--context" | "-c" => {
                context_flag = Some(args.get(i + 1).ok_or("--context requires a value")?.as_str());
                i += 1;
            }
            other => positional.push(other),
        }
        i += 1;
    }

    let mut positional = positional.into_iter();
    request.query = positional.next().unwrap_or_default().to_string();
    let max_docs = max_docs_flag.or(positional.next());
    let context = context_flag.or(positional.next());
    if let Some(extra) = positional.next() {
        return Err(format!("unexpected argument '{extra}'"));
    }
    if let Some(value) = max_docs {
        request.max_docs = Some(value.parse().map_err(|_| format!("invalid max_docs value '{value}'"))?);
    }
    if let Some(value) = context {
        request.context = value.parse::<RetrievalContext>().map_err(|e| e.to_string())?;
    }
    Ok(request)
}

pub struct App {
    pub config: Config,
    pub settings: Settings,
}

impl App {
    pub fn load() -> anyhow::Result<Self> {
        let config = Config::load().context("failed to load configuration")?;
        let settings = config.settings()?;
        Ok(Self { config, settings })
    }

    /// Every configured document source, drive mirror first.
    pub fn sources(&self) -> Vec<Arc<dyn DocumentSource>> {
        let data = &self.settings.data;
        let mut sources: Vec<Arc<dyn DocumentSource>> = Vec::new();
        if let Some(dir) = &data.drive_mirror_dir {
            sources.push(Arc::new(DirectorySource::new(self.config.resolve_path(dir))));
        }
        for export in &data.crawler_exports {
            sources.push(Arc::new(CrawlerExportSource::new(self.config.resolve_path(export))));
        }
        if sources.is_empty() {
            tracing::warn!("no document sources configured (data.drive_mirror_dir, data.crawler_exports)");
        }
        sources
    }

    pub fn store(&self) -> SnapshotStore {
        SnapshotStore::new(self.config.resolve_path(&self.settings.data.snapshot_dir))
    }

    pub fn builder(&self, show_progress: bool) -> anyhow::Result<IndexBuilder> {
        let embedder = anamnesa_embed::build_embedder(&self.settings.embedding).context("failed to set up embedder")?;
        Ok(IndexBuilder::new(self.settings.clone(), embedder, Arc::new(DefaultExtractor)).with_progress(show_progress))
    }

    /// Service on the stored snapshot. Building is left to `anamnesa-indexer`;
    /// without a snapshot every query answers with no results.
    pub async fn service(&self) -> anyhow::Result<RetrievalService> {
        let service = RetrievalService::load(self.builder(false)?, self.store(), self.sources()).await?;
        Ok(service)
    }

    /// Answer one request within `facade.timeout_ms`, snapshot loading included.
    pub async fn answer(&self, request: RetrievalRequest) -> RetrievalResponse {
        let config = self.settings.facade.clone();
        let deadline = Duration::from_millis(config.timeout_ms);
        let started = Instant::now();
        let elapsed_ms = || started.elapsed().as_millis() as u64;

        let service = match tokio::time::timeout(deadline, self.service()).await {
            Ok(Ok(service)) => service,
            Ok(Err(e)) => {
                tracing::error!(error = %format!("{e:#}"), "failed to open retrieval service");
                return RetrievalResponse::failed(&request, "index_load", &config.apology_message, elapsed_ms());
            }
            Err(_) => {
                tracing::error!(timeout_ms = config.timeout_ms, "timed out loading the index snapshot");
                return RetrievalResponse::failed(&request, "query_timeout", &config.apology_message, elapsed_ms());
            }
        };
        let remaining = deadline.saturating_sub(started.elapsed()).as_millis().max(1) as u64;
        let facade = RetrievalFacade::new(Arc::clone(service.engine()), FacadeConfig { timeout_ms: remaining, ..config });
        facade.answer(request).await
    }
}
