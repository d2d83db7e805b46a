use std::fs;
use std::sync::Arc;
use std::time::Duration;

use anamnesa_core::config::{FacadeConfig, Settings, VectorConfig};
use anamnesa_core::error::{EmbeddingServiceError, IndexLoadError};
use anamnesa_core::ingest::{DefaultExtractor, DirectorySource};
use anamnesa_core::traits::{DocumentSource, Embedder};
use anamnesa_core::types::{Document, DocumentMetadata, RetrievalContext, SourceType};
use anamnesa_embed::HashingEmbedder;
use anamnesa_hybrid::snapshot::{load_snapshot, FORMAT_VERSION};
use anamnesa_hybrid::{HybridSearchEngine, IndexBuilder, IndexSnapshot, RebuildOutcome, RetrievalService, SnapshotStore};
use async_trait::async_trait;
use tempfile::TempDir;

fn builder() -> IndexBuilder {
    IndexBuilder::new(Settings::default(), Arc::new(HashingEmbedder::new(96)), Arc::new(DefaultExtractor))
}

fn docs(extra: &str) -> Vec<Document> {
    ["demam tinggi tiga hari", "batuk berdahak malam hari", extra]
        .iter()
        .enumerate()
        .map(|(i, text)| {
            let metadata = DocumentMetadata { file_name: format!("{i}.txt"), mime_type: "text/plain".into(), ..Default::default() };
            Document::new(&format!("drive/{i}.txt"), SourceType::CloudDrive, text.to_string(), metadata)
        })
        .collect()
}

async fn build(extra: &str) -> anyhow::Result<IndexSnapshot> {
    Ok(builder().build_from_documents(&docs(extra)).await?.0)
}

#[tokio::test]
async fn reloaded_snapshot_answers_identically() -> anyhow::Result<()> {
    let tmp = TempDir::new()?;
    let store = SnapshotStore::new(tmp.path());
    let snapshot = build("nyeri dada saat batuk").await?;
    let version = snapshot.corpus_version().to_string();
    store.save(&snapshot)?;
    assert_eq!(store.current_version().as_deref(), Some(version.as_str()));

    let embedder: Arc<dyn Embedder> = Arc::new(HashingEmbedder::new(96));
    let original = HybridSearchEngine::new(snapshot, Arc::clone(&embedder), Default::default(), &FacadeConfig::default());
    let restored = HybridSearchEngine::new(
        store.load_current(VectorConfig::default())?,
        embedder,
        Default::default(),
        &FacadeConfig::default(),
    );
    for q in ["batuk", "demam tinggi", "nyeri dada"] {
        let a = original.query(q, 3, RetrievalContext::General).await?;
        let b = restored.query(q, 3, RetrievalContext::General).await?;
        assert_eq!(a, b, "query {q}");
    }
    assert_eq!(restored.snapshot().stats().chunks, 3);
    Ok(())
}

#[tokio::test]
async fn corrupted_artifact_is_rejected() -> anyhow::Result<()> {
    let tmp = TempDir::new()?;
    let store = SnapshotStore::new(tmp.path());
    let snapshot = build("sesak napas").await?;
    let dir = store.save(&snapshot)?;

    let mut bytes = fs::read(dir.join("vector.bin"))?;
    let last = bytes.len() - 1;
    bytes[last] ^= 0xFF;
    fs::write(dir.join("vector.bin"), bytes)?;

    match store.load_current(VectorConfig::default()) {
        Err(IndexLoadError::Checksum { artifact }) => assert_eq!(artifact, "vector.bin"),
        Err(other) => panic!("unexpected error: {other}"),
        Ok(_) => panic!("corrupted snapshot loaded"),
    }
    Ok(())
}

#[tokio::test]
async fn version_and_format_mismatches_are_rejected() -> anyhow::Result<()> {
    let tmp = TempDir::new()?;
    let store = SnapshotStore::new(tmp.path());
    let snapshot = build("mual muntah").await?;
    let dir = store.save(&snapshot)?;

    assert!(matches!(
        load_snapshot(&dir, Some("0000000000000000"), VectorConfig::default()),
        Err(IndexLoadError::VersionMismatch { .. })
    ));
    assert!(matches!(store.load("missing", VectorConfig::default()), Err(IndexLoadError::Missing(_))));

    let manifest_path = dir.join("manifest.json");
    let mut manifest: serde_json::Value = serde_json::from_slice(&fs::read(&manifest_path)?)?;
    manifest["format_version"] = serde_json::json!(FORMAT_VERSION + 1);
    fs::write(&manifest_path, serde_json::to_vec(&manifest)?)?;
    assert!(matches!(
        load_snapshot(&dir, None, VectorConfig::default()),
        Err(IndexLoadError::FormatVersion { .. })
    ));
    Ok(())
}

#[tokio::test]
async fn prune_keeps_current_and_newest() -> anyhow::Result<()> {
    let tmp = TempDir::new()?;
    let store = SnapshotStore::new(tmp.path());
    let first = build("satu").await?;
    let second = build("dua").await?;
    let third = build("tiga").await?;
    store.save(&first)?;
    store.save(&second)?;
    store.save(&third)?;
    assert_eq!(store.versions().len(), 3);

    let removed = store.prune(1)?;
    assert_eq!(removed, vec![first.corpus_version().to_string()]);
    assert_eq!(store.current_version().as_deref(), Some(third.corpus_version()));
    assert_eq!(store.versions().len(), 2);
    Ok(())
}

#[tokio::test]
async fn service_rebuilds_once_and_reopens_from_disk() -> anyhow::Result<()> {
    let tmp = TempDir::new()?;
    let drive = tmp.path().join("drive");
    fs::create_dir_all(&drive)?;
    fs::write(drive.join("demam.txt"), "Demam tinggi disertai menggigil.")?;
    let snapshots = tmp.path().join("snapshots");
    let sources: Vec<Arc<dyn DocumentSource>> = vec![Arc::new(DirectorySource::new(&drive))];

    let service = RetrievalService::open(builder(), SnapshotStore::new(&snapshots), sources.clone()).await?;
    let first = service.engine().snapshot().corpus_version().to_string();
    assert_eq!(service.engine().snapshot().len(), 1);

    fs::write(drive.join("batuk.txt"), "Batuk kering lebih dari dua minggu.")?;
    let (a, b) = tokio::join!(service.rebuild(), service.rebuild());
    let outcomes = [a?, b?];
    let built = outcomes.iter().filter(|o| matches!(o, RebuildOutcome::Built(_))).count();
    assert_eq!(built, 1, "concurrent rebuilds are serialized");
    let report = outcomes.iter().find_map(|o| match o {
        RebuildOutcome::Built(report) => Some(report),
        RebuildOutcome::Reused(_) => None,
    });
    assert_eq!(report.map(|r| (r.reused, r.chunks)), Some((1, 2)), "unchanged demam.txt keeps its vector");

    let second = service.engine().snapshot().corpus_version().to_string();
    assert_ne!(first, second);
    assert_eq!(service.store().current_version().as_deref(), Some(second.as_str()));

    let resp = service.facade().answer_query("batuk kering", RetrievalContext::Diagnosis, Some(1)).await;
    assert_eq!(resp.documents[0].file_name, "batuk.txt");

    let reopened = RetrievalService::load(builder(), SnapshotStore::new(&snapshots), sources).await?;
    assert_eq!(reopened.engine().snapshot().corpus_version(), second);
    Ok(())
}

/// Document embedding never finishes.
struct NeverEmbeds(HashingEmbedder);

#[async_trait]
impl Embedder for NeverEmbeds {
    fn id(&self) -> &str {
        self.0.id()
    }

    fn dim(&self) -> usize {
        self.0.dim()
    }

    async fn embed_documents(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingServiceError> {
        std::future::pending().await
    }

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>, EmbeddingServiceError> {
        self.0.embed_query(text).await
    }
}

#[tokio::test]
async fn load_reads_the_store_without_building() -> anyhow::Result<()> {
    let tmp = TempDir::new()?;
    let drive = tmp.path().join("drive");
    fs::create_dir_all(&drive)?;
    fs::write(drive.join("demam.txt"), "Demam tinggi disertai menggigil.")?;
    let sources: Vec<Arc<dyn DocumentSource>> = vec![Arc::new(DirectorySource::new(&drive))];
    let builder = IndexBuilder::new(Settings::default(), Arc::new(NeverEmbeds(HashingEmbedder::new(96))), Arc::new(DefaultExtractor));

    let service = tokio::time::timeout(
        Duration::from_secs(1),
        RetrievalService::load(builder, SnapshotStore::new(tmp.path().join("snapshots")), sources),
    )
    .await??;
    assert!(service.engine().snapshot().is_empty());

    let resp = service.facade().answer_query("demam", RetrievalContext::General, None).await;
    assert!(!resp.is_degraded());
    assert!(resp.documents.is_empty());
    Ok(())
}
