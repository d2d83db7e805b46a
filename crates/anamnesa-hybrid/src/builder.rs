use std::sync::Arc;
use std::time::{Duration, Instant};

use anamnesa_core::chunking;
use anamnesa_core::config::Settings;
use anamnesa_core::error::{EmbeddingServiceError, Error, Result};
use anamnesa_core::ingest;
use anamnesa_core::traits::{DocumentSource, Embedder, TextExtractor};
use anamnesa_core::types::{ChunkRecord, Document};
use anamnesa_text::{Analyzer, KeywordIndex};
use anamnesa_vector::VectorIndex;
use futures::stream::{self, StreamExt};
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;

use crate::snapshot::IndexSnapshot;

/// Summary of one build, printed by the indexer.
#[derive(Debug, Clone, Serialize)]
pub struct BuildReport {
    pub corpus_version: String,
    pub documents: usize,
    pub chunks: usize,
    pub embedded: usize,
    /// Vectors carried over from the previous snapshot instead of re-embedded.
    pub reused: usize,
    pub dropped: usize,
    pub elapsed_ms: u64,
}

/// Turns sources into a fresh [`IndexSnapshot`].
pub struct IndexBuilder {
    settings: Settings,
    embedder: Arc<dyn Embedder>,
    extractor: Arc<dyn TextExtractor>,
    show_progress: bool,
}

impl IndexBuilder {
    pub fn new(settings: Settings, embedder: Arc<dyn Embedder>, extractor: Arc<dyn TextExtractor>) -> Self {
        Self { settings, embedder, extractor, show_progress: false }
    }

    pub fn with_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn embedder(&self) -> &Arc<dyn Embedder> {
        &self.embedder
    }

    pub async fn ingest(&self, sources: &[Arc<dyn DocumentSource>]) -> Vec<Document> {
        ingest::ingest(sources, self.extractor.as_ref()).await
    }

    /// Chunk every document. A document that fails to chunk is skipped.
    pub fn chunk_documents(&self, documents: &[Document]) -> Vec<ChunkRecord> {
        let mut records = Vec::new();
        for doc in documents {
            match chunking::chunk(doc, &self.settings.chunking) {
                Ok(chunks) => records.extend(chunks.into_iter().map(|chunk| ChunkRecord {
                    chunk,
                    source_type: doc.source_type,
                    metadata: doc.metadata.clone(),
                })),
                Err(e) => tracing::warn!(document_id = %doc.id, error = %e, "failed to chunk document"),
            }
        }
        records
    }

    /// Version identifier derived from document contents and every setting
    /// that changes what the indexes hold.
    pub fn corpus_version(&self, documents: &[Document]) -> String {
        let mut entries: Vec<(&str, String)> = documents.iter().map(|d| (d.id.as_str(), d.content_hash())).collect();
        entries.sort();

        let mut hasher = blake3::Hasher::new();
        for (id, hash) in &entries {
            hasher.update(id.as_bytes());
            hasher.update(b"\0");
            hasher.update(hash.as_bytes());
            hasher.update(b"\n");
        }
        let params = serde_json::json!({
            "chunking": self.settings.chunking,
            "tokenizer": self.settings.tokenizer,
            "bm25": self.settings.bm25,
            "embedder": self.embedder.id(),
        });
        hasher.update(params.to_string().as_bytes());
        hasher.finalize().to_hex()[..16].to_string()
    }

    fn progress(&self, len: usize) -> ProgressBar {
        if !self.show_progress {
            return ProgressBar::hidden();
        }
        let pb = ProgressBar::new(len as u64);
        let style = ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} chunks ({percent}%) {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("#>-");
        pb.set_style(style);
        pb
    }

    /// Embed chunks in batches. A batch that still fails after one retry is
    /// dropped and logged; the rest of the corpus is indexed.
    pub async fn build_vector_index(&self, records: &[ChunkRecord]) -> Result<VectorIndex> {
        Ok(self.embed_records(records, None).await?.0)
    }

    /// Vector of an unchanged chunk in `previous`, if it was built by this embedder.
    fn reusable<'a>(&self, previous: Option<&'a IndexSnapshot>, record: &ChunkRecord) -> Option<&'a [f32]> {
        let previous = previous.filter(|p| p.embedder_id() == self.embedder.id() && p.vector().dim() == self.embedder.dim())?;
        let old = previous.chunk(&record.chunk.chunk_id)?;
        if old.chunk.text != record.chunk.text {
            return None;
        }
        previous.vector().get(&record.chunk.chunk_id)
    }

    /// Returns the index and how many vectors were copied from `previous`.
    async fn embed_records(&self, records: &[ChunkRecord], previous: Option<&IndexSnapshot>) -> Result<(VectorIndex, usize)> {
        let cfg = &self.settings.embedding;
        let batch_size = cfg.batch_size.max(1);
        let retry_delay = Duration::from_millis(cfg.batch_retry_delay_ms);

        let mut index = VectorIndex::new(self.embedder.dim(), self.settings.vector);
        let mut reused = 0usize;
        let mut pending: Vec<&ChunkRecord> = Vec::with_capacity(records.len());
        for record in records {
            if let Some(vector) = self.reusable(previous, record) {
                if index.add(&record.chunk.chunk_id, vector).is_ok() {
                    reused += 1;
                    continue;
                }
            }
            pending.push(record);
        }
        if reused > 0 {
            tracing::info!(reused, to_embed = pending.len(), "reusing vectors of unchanged chunks");
        }

        let pb = self.progress(pending.len());
        pb.set_message("embedding");

        let batches: Vec<(Vec<String>, Vec<String>)> = pending
            .chunks(batch_size)
            .map(|batch| {
                let ids = batch.iter().map(|r| r.chunk.chunk_id.clone()).collect();
                let texts = batch.iter().map(|r| r.chunk.text.clone()).collect();
                (ids, texts)
            })
            .collect();

        let results: Vec<(Vec<String>, std::result::Result<Vec<Vec<f32>>, EmbeddingServiceError>)> =
            stream::iter(batches)
                .map(|(ids, texts)| {
                    let embedder = Arc::clone(&self.embedder);
                    let pb = pb.clone();
                    async move {
                        let mut outcome = embedder.embed_documents(&texts).await;
                        if let Err(e) = &outcome {
                            tracing::warn!(batch = ids.len(), error = %e, "embedding batch failed, retrying once");
                            tokio::time::sleep(retry_delay).await;
                            outcome = embedder.embed_documents(&texts).await;
                        }
                        pb.inc(ids.len() as u64);
                        (ids, outcome)
                    }
                })
                .buffered(cfg.concurrency.max(1))
                .collect()
                .await;

        let mut dropped = 0usize;
        for (ids, outcome) in results {
            match outcome {
                Ok(vectors) if vectors.len() == ids.len() => {
                    for (id, v) in ids.iter().zip(&vectors) {
                        if let Err(e) = index.add(id, v) {
                            dropped += 1;
                            tracing::warn!(chunk_id = %id, error = %e, "dropping chunk vector");
                        }
                    }
                }
                Ok(vectors) => {
                    dropped += ids.len();
                    tracing::error!(expected = ids.len(), got = vectors.len(), "embedding batch returned wrong count, dropping");
                }
                Err(e) => {
                    dropped += ids.len();
                    tracing::error!(batch = ids.len(), error = %e, "embedding batch failed, dropping");
                }
            }
        }
        pb.finish_with_message(format!("embedded {} chunks", index.len()));
        if dropped > 0 {
            tracing::warn!(dropped, "some chunks have no vector and are searchable by keyword only");
        }

        let index = tokio::task::spawn_blocking(move || {
            index.prepare();
            index
        })
        .await
        .map_err(|e| Error::Operation(format!("vector index build task failed: {e}")))?;
        Ok((index, reused))
    }

    pub async fn build_keyword_index(&self, records: &[ChunkRecord]) -> Result<KeywordIndex> {
        let analyzer = Analyzer::new(self.settings.tokenizer.clone());
        let params = self.settings.bm25;
        let pairs: Vec<(String, String)> =
            records.iter().map(|r| (r.chunk.chunk_id.clone(), r.chunk.text.clone())).collect();
        tokio::task::spawn_blocking(move || {
            KeywordIndex::build(analyzer, params, pairs.iter().map(|(id, text)| (id.as_str(), text.as_str())))
        })
        .await
        .map_err(|e| Error::Operation(format!("keyword index build task failed: {e}")))
    }

    /// Build a snapshot from already-ingested documents.
    pub async fn build_from_documents(&self, documents: &[Document]) -> Result<(IndexSnapshot, BuildReport)> {
        self.build_reusing(documents, None).await
    }

    /// Like [`build_from_documents`](Self::build_from_documents), but chunks
    /// whose text is unchanged in `previous` keep their stored vector.
    pub async fn build_reusing(
        &self,
        documents: &[Document],
        previous: Option<&IndexSnapshot>,
    ) -> Result<(IndexSnapshot, BuildReport)> {
        let started = Instant::now();
        let corpus_version = self.corpus_version(documents);
        let records = self.chunk_documents(documents);
        tracing::info!(documents = documents.len(), chunks = records.len(), %corpus_version, "building indexes");

        let (vector, reused) = self.embed_records(&records, previous).await?;
        let keyword = self.build_keyword_index(&records).await?;
        let embedded = vector.len();
        let chunks = records.len();

        let snapshot = IndexSnapshot::new(corpus_version.clone(), self.embedder.id().to_string(), records, vector, keyword)?;
        let report = BuildReport {
            corpus_version,
            documents: documents.len(),
            chunks,
            embedded,
            reused,
            dropped: chunks - embedded,
            elapsed_ms: started.elapsed().as_millis() as u64,
        };
        tracing::info!(
            corpus_version = %report.corpus_version,
            chunks = report.chunks,
            embedded = report.embedded,
            reused = report.reused,
            elapsed_ms = report.elapsed_ms,
            "index build complete"
        );
        Ok((snapshot, report))
    }

    /// Ingest `sources` and build a snapshot.
    pub async fn build(&self, sources: &[Arc<dyn DocumentSource>]) -> Result<(IndexSnapshot, BuildReport)> {
        let documents = self.ingest(sources).await;
        self.build_from_documents(&documents).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    use anamnesa_core::ingest::DefaultExtractor;
    use anamnesa_core::types::{DocumentMetadata, SourceType};
    use anamnesa_embed::HashingEmbedder;
    use async_trait::async_trait;

    fn builder() -> IndexBuilder {
        IndexBuilder::new(Settings::default(), Arc::new(HashingEmbedder::new(64)), Arc::new(DefaultExtractor))
    }

    fn doc(key: &str, text: &str) -> Document {
        let metadata = DocumentMetadata { file_name: key.to_string(), mime_type: "text/plain".into(), ..Default::default() };
        Document::new(key, SourceType::CloudDrive, text.to_string(), metadata)
    }

    #[test]
    fn corpus_version_ignores_order_and_tracks_content() {
        let b = builder();
        let a = doc("a.txt", "demam tinggi");
        let c = doc("c.txt", "batuk kering");
        let v1 = b.corpus_version(&[a.clone(), c.clone()]);
        assert_eq!(v1, b.corpus_version(&[c.clone(), a.clone()]));
        assert_ne!(v1, b.corpus_version(&[a, doc("c.txt", "batuk berdahak")]));
        assert_eq!(v1.len(), 16);
    }

    #[tokio::test]
    async fn builds_consistent_snapshot() -> anyhow::Result<()> {
        let b = builder();
        let docs = vec![doc("a.txt", "pasien demam tinggi"), doc("b.txt", "batuk kering malam hari")];
        let (snapshot, report) = b.build_from_documents(&docs).await?;
        assert_eq!(report.documents, 2);
        assert_eq!(report.chunks, snapshot.len());
        assert_eq!(report.embedded, snapshot.vector().len());
        assert_eq!(report.dropped, 0);
        assert_eq!(snapshot.keyword().len(), snapshot.len());
        Ok(())
    }

    /// Fails any batch containing `marker` until `failures` runs out.
    struct FailingBatch {
        inner: HashingEmbedder,
        marker: &'static str,
        failures: AtomicU32,
        calls: AtomicU32,
        texts: AtomicU32,
    }

    impl FailingBatch {
        fn new(marker: &'static str, failures: u32) -> Self {
            Self {
                inner: HashingEmbedder::new(64),
                marker,
                failures: AtomicU32::new(failures),
                calls: AtomicU32::new(0),
                texts: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl Embedder for FailingBatch {
        fn id(&self) -> &str {
            self.inner.id()
        }

        fn dim(&self) -> usize {
            self.inner.dim()
        }

        async fn embed_documents(&self, texts: &[String]) -> std::result::Result<Vec<Vec<f32>>, EmbeddingServiceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if texts.iter().any(|t| t.contains(self.marker))
                && self.failures.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1)).is_ok()
            {
                return Err(EmbeddingServiceError::Transport("connection reset".into()));
            }
            self.texts.fetch_add(texts.len() as u32, Ordering::SeqCst);
            self.inner.embed_documents(texts).await
        }

        async fn embed_query(&self, text: &str) -> std::result::Result<Vec<f32>, EmbeddingServiceError> {
            self.inner.embed_query(text).await
        }
    }

    fn batch_builder(embedder: Arc<FailingBatch>) -> IndexBuilder {
        let mut settings = Settings::default();
        settings.embedding.batch_size = 2;
        settings.embedding.batch_retry_delay_ms = 1;
        IndexBuilder::new(settings, embedder, Arc::new(DefaultExtractor))
    }

    fn four_docs() -> Vec<Document> {
        vec![
            doc("a.txt", "demam tinggi"),
            doc("b.txt", "batuk kering"),
            doc("c.txt", "sesak napas"),
            doc("d.txt", "nyeri dada"),
        ]
    }

    #[tokio::test]
    async fn failed_batch_is_retried_once() -> anyhow::Result<()> {
        let embedder = Arc::new(FailingBatch::new("sesak", 1));
        let (snapshot, report) = batch_builder(Arc::clone(&embedder)).build_from_documents(&four_docs()).await?;
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 3);
        assert_eq!(report.dropped, 0);
        assert_eq!(report.embedded, 4);
        assert_eq!(snapshot.vector().len(), 4);
        Ok(())
    }

    #[tokio::test]
    async fn batch_failing_twice_is_dropped_and_rest_indexed() -> anyhow::Result<()> {
        let embedder = Arc::new(FailingBatch::new("sesak", u32::MAX));
        let (snapshot, report) = batch_builder(Arc::clone(&embedder)).build_from_documents(&four_docs()).await?;
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 3);
        assert_eq!(report.chunks, 4);
        assert_eq!(report.dropped, 2);
        assert_eq!(report.embedded, 2);
        assert_eq!(snapshot.len(), 4);

        let dropped: Vec<&str> = snapshot
            .chunks()
            .iter()
            .filter(|r| r.chunk.text.contains("sesak") || r.chunk.text.contains("nyeri"))
            .map(|r| r.chunk.chunk_id.as_str())
            .collect();
        assert_eq!(dropped.len(), 2);
        assert!(dropped.iter().all(|id| !snapshot.vector().contains(id)));

        let keyword = snapshot.keyword().search_text("sesak", 5);
        assert_eq!(keyword[0].id, dropped[0]);
        let query = embedder.embed_query("demam tinggi").await?;
        let vector = snapshot.vector().search(&query, 1)?;
        assert_eq!(snapshot.chunk(&vector[0].id).map(|r| r.metadata.file_name.as_str()), Some("a.txt"));
        Ok(())
    }

    #[tokio::test]
    async fn rebuild_embeds_only_changed_chunks() -> anyhow::Result<()> {
        let embedder = Arc::new(FailingBatch::new("unused", 0));
        let b = batch_builder(Arc::clone(&embedder));
        let (first, _) = b.build_from_documents(&four_docs()).await?;
        assert_eq!(embedder.texts.load(Ordering::SeqCst), 4);

        let mut docs = four_docs();
        docs[3] = doc("d.txt", "nyeri dada kiri");
        docs.push(doc("e.txt", "mual muntah"));
        let (second, report) = b.build_reusing(&docs, Some(&first)).await?;
        assert_eq!(embedder.texts.load(Ordering::SeqCst), 6);
        assert_eq!(report.reused, 3);
        assert_eq!(report.embedded, 5);
        assert_eq!(report.dropped, 0);
        assert_ne!(first.corpus_version(), second.corpus_version());

        let a_id = &first.chunks()[0].chunk.chunk_id;
        assert_eq!(first.vector().get(a_id), second.vector().get(a_id));
        let hits = second.keyword().search_text("kiri", 1);
        assert_eq!(second.chunk(&hits[0].id).map(|r| r.metadata.file_name.as_str()), Some("d.txt"));
        Ok(())
    }

    #[tokio::test]
    async fn vectors_from_another_embedder_are_not_reused() -> anyhow::Result<()> {
        let other = IndexBuilder::new(Settings::default(), Arc::new(HashingEmbedder::new(32)), Arc::new(DefaultExtractor));
        let (first, _) = other.build_from_documents(&four_docs()).await?;
        let embedder = Arc::new(FailingBatch::new("unused", 0));
        let (_, report) = batch_builder(Arc::clone(&embedder)).build_reusing(&four_docs(), Some(&first)).await?;
        assert_eq!(report.reused, 0);
        assert_eq!(embedder.texts.load(Ordering::SeqCst), 4);
        Ok(())
    }
}
