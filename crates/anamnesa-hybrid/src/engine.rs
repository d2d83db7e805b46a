use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anamnesa_core::config::{FacadeConfig, FusionConfig};
use anamnesa_core::error::{EmbeddingServiceError, RetrievalError};
use anamnesa_core::traits::{Embedder, SearchEngine};
use anamnesa_core::types::{preview, RetrievalContext, SearchHit, SearchResult};
use anamnesa_vector::VectorError;
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;

use crate::fusion::{self, AppliedFusion};
use crate::snapshot::IndexSnapshot;

/// Runs both retrieval branches against the active snapshot and fuses them.
///
/// The snapshot sits behind an `RwLock<Arc<_>>`: a query clones the `Arc`
/// once and works on that version to the end, while a rebuild swaps in a
/// new one without blocking queries already in flight.
pub struct HybridSearchEngine {
    snapshot: RwLock<Arc<IndexSnapshot>>,
    embedder: Arc<dyn Embedder>,
    fusion: FusionConfig,
    branch_timeout: Duration,
    preview_chars: usize,
    timings: Mutex<Timings>,
}

/// Average per-stage latency over every query that reached fusion.
#[derive(Debug, Clone, Serialize)]
pub struct EngineStats {
    pub total_searches: u64,
    pub avg_vector_ms: f64,
    pub avg_keyword_ms: f64,
    pub avg_fusion_ms: f64,
    pub avg_total_ms: f64,
    pub fusion: FusionConfig,
}

#[derive(Debug, Default)]
struct Timings {
    searches: u64,
    vector: Duration,
    keyword: Duration,
    fusion: Duration,
    total: Duration,
}

impl Timings {
    fn average_ms(&self, total: Duration) -> f64 {
        if self.searches == 0 {
            0.0
        } else {
            total.as_secs_f64() * 1000.0 / self.searches as f64
        }
    }
}

async fn timed<F: Future>(fut: F) -> (F::Output, Duration) {
    let started = Instant::now();
    let out = fut.await;
    (out, started.elapsed())
}

impl HybridSearchEngine {
    pub fn new(snapshot: IndexSnapshot, embedder: Arc<dyn Embedder>, fusion: FusionConfig, facade: &FacadeConfig) -> Self {
        Self {
            snapshot: RwLock::new(Arc::new(snapshot)),
            embedder,
            fusion,
            branch_timeout: Duration::from_millis(facade.branch_timeout_ms),
            preview_chars: facade.preview_chars,
            timings: Mutex::new(Timings::default()),
        }
    }

    pub fn snapshot(&self) -> Arc<IndexSnapshot> {
        Arc::clone(&self.snapshot.read())
    }

    /// Replace the active snapshot and return the previous one.
    pub fn swap_snapshot(&self, next: IndexSnapshot) -> Arc<IndexSnapshot> {
        let next = Arc::new(next);
        let previous = std::mem::replace(&mut *self.snapshot.write(), next);
        tracing::info!(
            from = previous.corpus_version(),
            to = self.snapshot.read().corpus_version(),
            "activated index snapshot"
        );
        previous
    }

    pub fn embedder(&self) -> &Arc<dyn Embedder> {
        &self.embedder
    }

    pub fn fusion_config(&self) -> &FusionConfig {
        &self.fusion
    }

    pub fn stats(&self) -> EngineStats {
        let t = self.timings.lock();
        EngineStats {
            total_searches: t.searches,
            avg_vector_ms: t.average_ms(t.vector),
            avg_keyword_ms: t.average_ms(t.keyword),
            avg_fusion_ms: t.average_ms(t.fusion),
            avg_total_ms: t.average_ms(t.total),
            fusion: self.fusion.clone(),
        }
    }

    async fn keyword_branch(snapshot: Arc<IndexSnapshot>, tokens: Vec<String>, k: usize) -> Result<Vec<SearchHit>, RetrievalError> {
        tokio::task::spawn_blocking(move || snapshot.keyword().search(&tokens, k))
            .await
            .map_err(|e| RetrievalError::Branch(format!("keyword search task failed: {e}")))
    }

    async fn vector_branch(
        snapshot: Arc<IndexSnapshot>,
        embedder: Arc<dyn Embedder>,
        text: String,
        k: usize,
    ) -> Result<Vec<SearchHit>, RetrievalError> {
        let query = embedder.embed_query(&text).await?;
        let hits = tokio::task::spawn_blocking(move || snapshot.vector().search(&query, k))
            .await
            .map_err(|e| RetrievalError::Branch(format!("vector search task failed: {e}")))?;
        hits.map_err(|e| match e {
            VectorError::DimensionMismatch { expected, actual } => {
                RetrievalError::Embedding(EmbeddingServiceError::DimensionMismatch { expected, actual })
            }
            other => RetrievalError::Branch(other.to_string()),
        })
    }

    /// Top `k` fused results for `text`.
    ///
    /// A branch that exceeds its timeout contributes an empty list; if both
    /// do, the query fails with [`RetrievalError::QueryTimeout`].
    pub async fn query(&self, text: &str, k: usize, context: RetrievalContext) -> Result<Vec<SearchResult>, RetrievalError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(RetrievalError::InvalidQuery("query is empty".to_string()));
        }
        let snapshot = self.snapshot();
        if snapshot.is_empty() || k == 0 {
            tracing::info!(corpus_version = snapshot.corpus_version(), "no chunks indexed, returning no results");
            return Ok(Vec::new());
        }

        let started = Instant::now();
        let tokens = snapshot.keyword().analyzer().tokenize(text);
        let keyword_k = self.fusion.keyword_top_k.max(k);
        let vector_k = self.fusion.vector_top_k.max(k);

        let keyword = timed(tokio::time::timeout(
            self.branch_timeout,
            Self::keyword_branch(Arc::clone(&snapshot), tokens, keyword_k),
        ));
        let vector = timed(tokio::time::timeout(
            self.branch_timeout,
            Self::vector_branch(Arc::clone(&snapshot), Arc::clone(&self.embedder), text.to_string(), vector_k),
        ));
        let ((keyword, keyword_time), (vector, vector_time)) = tokio::join!(keyword, vector);

        let elapsed_ms = started.elapsed().as_millis() as u64;
        let (vector_hits, keyword_hits) = match (vector, keyword) {
            (Err(_), Err(_)) => return Err(RetrievalError::QueryTimeout { elapsed_ms }),
            (v, kw) => {
                let v = match v {
                    Ok(hits) => hits?,
                    Err(_) => {
                        tracing::warn!(elapsed_ms, "vector branch timed out, continuing with keyword results");
                        Vec::new()
                    }
                };
                let kw = match kw {
                    Ok(hits) => hits?,
                    Err(_) => {
                        tracing::warn!(elapsed_ms, "keyword branch timed out, continuing with vector results");
                        Vec::new()
                    }
                };
                (v, kw)
            }
        };

        let fusion_started = Instant::now();
        let applied = fusion::plan(&self.fusion, context, &vector_hits, &keyword_hits);
        let fused = fusion::fuse(&vector_hits, &keyword_hits, applied, k);
        {
            let mut t = self.timings.lock();
            t.searches += 1;
            t.vector += vector_time;
            t.keyword += keyword_time;
            t.fusion += fusion_started.elapsed();
            t.total += started.elapsed();
        }
        tracing::debug!(
            vector = vector_hits.len(),
            keyword = keyword_hits.len(),
            fused = fused.len(),
            strategy = match applied {
                AppliedFusion::WeightedSum(_) => "weighted_sum",
                AppliedFusion::Rrf { .. } => "rrf",
            },
            %context,
            "fused query results"
        );

        Ok(fused
            .into_iter()
            .filter_map(|f| {
                let record = snapshot.chunk(&f.chunk_id)?;
                Some(SearchResult {
                    document_id: record.chunk.document_id.clone(),
                    score: f.score,
                    source_scores: f.source_scores,
                    content_preview: preview(&record.chunk.text, self.preview_chars),
                    text: record.chunk.text.clone(),
                    source_type: record.source_type,
                    metadata: record.metadata.clone(),
                    chunk_id: f.chunk_id,
                })
            })
            .collect())
    }
}

#[async_trait]
impl SearchEngine for HybridSearchEngine {
    async fn query(&self, text: &str, k: usize, context: RetrievalContext) -> Result<Vec<SearchResult>, RetrievalError> {
        HybridSearchEngine::query(self, text, k, context).await
    }

    fn chunk_count(&self) -> usize {
        self.snapshot.read().len()
    }
}
