use std::sync::Arc;

use anamnesa_core::config::Settings;
use anamnesa_core::error::Result;
use anamnesa_core::traits::DocumentSource;
use anamnesa_core::Error;
use tokio::sync::Mutex;

use crate::builder::{BuildReport, IndexBuilder};
use crate::engine::HybridSearchEngine;
use crate::facade::RetrievalFacade;
use crate::snapshot::{IndexSnapshot, SnapshotStore};

/// Owns the engine, the snapshot store and the rebuild path.
pub struct RetrievalService {
    engine: Arc<HybridSearchEngine>,
    builder: IndexBuilder,
    store: SnapshotStore,
    sources: Vec<Arc<dyn DocumentSource>>,
    rebuild_lock: Mutex<()>,
}

/// What a rebuild ended up doing.
#[derive(Debug, Clone)]
pub enum RebuildOutcome {
    /// A stored snapshot for the same corpus version was reused.
    Reused(String),
    Built(BuildReport),
}

impl RetrievalService {
    /// Start on the stored `CURRENT` snapshot, or on an empty one if there is
    /// none or it fails validation. Never ingests or embeds.
    pub async fn load(builder: IndexBuilder, store: SnapshotStore, sources: Vec<Arc<dyn DocumentSource>>) -> Result<Self> {
        let vector_config = builder.settings().vector;
        let loaded = {
            let store = store.clone();
            tokio::task::spawn_blocking(move || store.load_current(vector_config))
                .await
                .map_err(|e| Error::Operation(format!("snapshot load task failed: {e}")))?
        };
        let initial = match loaded {
            Ok(snapshot) if snapshot.embedder_id() == builder.embedder().id() => snapshot,
            Ok(snapshot) => {
                tracing::warn!(
                    stored = snapshot.embedder_id(),
                    configured = builder.embedder().id(),
                    "stored snapshot was built with a different embedder, ignoring it"
                );
                Self::empty_snapshot(&builder)
            }
            Err(e) => {
                tracing::warn!(error = %e, "no usable snapshot on disk, run the indexer to build one");
                Self::empty_snapshot(&builder)
            }
        };
        let settings = builder.settings();
        let engine = Arc::new(HybridSearchEngine::new(
            initial,
            Arc::clone(builder.embedder()),
            settings.fusion.clone(),
            &settings.facade,
        ));
        Ok(Self { engine, builder, store, sources, rebuild_lock: Mutex::new(()) })
    }

    /// Like [`load`](Self::load), but rebuilds immediately when nothing usable
    /// was loaded. Meant for the indexer, not the query path.
    pub async fn open(builder: IndexBuilder, store: SnapshotStore, sources: Vec<Arc<dyn DocumentSource>>) -> Result<Self> {
        let service = Self::load(builder, store, sources).await?;
        if service.engine.snapshot().is_empty() {
            service.rebuild().await?;
        }
        Ok(service)
    }

    fn empty_snapshot(builder: &IndexBuilder) -> IndexSnapshot {
        let s: &Settings = builder.settings();
        IndexSnapshot::empty(builder.embedder().dim(), s.tokenizer.clone(), s.bm25, s.vector)
    }

    pub fn engine(&self) -> &Arc<HybridSearchEngine> {
        &self.engine
    }

    pub fn store(&self) -> &SnapshotStore {
        &self.store
    }

    pub fn facade(&self) -> RetrievalFacade<HybridSearchEngine> {
        RetrievalFacade::new(Arc::clone(&self.engine), self.builder.settings().facade.clone())
    }

    /// Re-ingest every source and activate the resulting snapshot. Chunks
    /// unchanged since the active snapshot keep their vectors.
    ///
    /// Concurrent calls are serialized; queries keep running on the previous
    /// snapshot until the swap.
    pub async fn rebuild(&self) -> Result<RebuildOutcome> {
        let _guard = self.rebuild_lock.lock().await;
        let documents = self.builder.ingest(&self.sources).await;
        let version = self.builder.corpus_version(&documents);
        let vector_config = self.builder.settings().vector;

        if self.engine.snapshot().corpus_version() == version {
            tracing::info!(corpus_version = %version, "corpus unchanged, keeping active snapshot");
            return Ok(RebuildOutcome::Reused(version));
        }

        let store = self.store.clone();
        let stored = {
            let version = version.clone();
            tokio::task::spawn_blocking(move || store.load(&version, vector_config))
                .await
                .map_err(|e| Error::Operation(format!("snapshot load task failed: {e}")))?
        };
        let outcome = match stored {
            Ok(snapshot) => {
                tracing::info!(corpus_version = %version, "reusing stored snapshot");
                self.store.set_current(&version)?;
                self.engine.swap_snapshot(snapshot);
                RebuildOutcome::Reused(version)
            }
            Err(e) => {
                tracing::debug!(corpus_version = %version, error = %e, "no stored snapshot for version, building");
                let active = self.engine.snapshot();
                let (snapshot, report) = self.builder.build_reusing(&documents, Some(&active)).await?;
                self.activate(snapshot).await?;
                RebuildOutcome::Built(report)
            }
        };

        let keep = self.builder.settings().data.keep_snapshots;
        if let Err(e) = self.store.prune(keep) {
            tracing::warn!(error = %e, "failed to prune old snapshots");
        }
        Ok(outcome)
    }

    /// Persist `snapshot` as current, then swap it into the engine.
    async fn activate(&self, snapshot: IndexSnapshot) -> Result<()> {
        let store = self.store.clone();
        let snapshot = tokio::task::spawn_blocking(move || store.save(&snapshot).map(|_| snapshot))
            .await
            .map_err(|e| Error::Operation(format!("snapshot save task failed: {e}")))??;
        self.engine.swap_snapshot(snapshot);
        Ok(())
    }
}
