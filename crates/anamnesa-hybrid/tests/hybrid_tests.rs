use std::sync::Arc;
use std::time::{Duration, Instant};

use anamnesa_core::config::{FacadeConfig, FusionConfig, FusionStrategy, Settings};
use anamnesa_core::error::{EmbeddingServiceError, RetrievalError};
use anamnesa_core::ingest::DefaultExtractor;
use anamnesa_core::traits::{Embedder, SearchEngine};
use anamnesa_core::types::{Document, DocumentMetadata, RetrievalContext, SearchResult, SourceType};
use anamnesa_embed::HashingEmbedder;
use anamnesa_hybrid::{HybridSearchEngine, IndexBuilder, IndexSnapshot, RetrievalFacade};
use async_trait::async_trait;

fn doc(file_name: &str, text: &str) -> Document {
    let metadata = DocumentMetadata { file_name: file_name.to_string(), mime_type: "text/plain".into(), ..Default::default() };
    Document::new(&format!("drive/{file_name}"), SourceType::CloudDrive, text.to_string(), metadata)
}

fn corpus() -> Vec<Document> {
    vec![
        doc("a.txt", "demam dan batuk"),
        doc("b.txt", "sakit kepala berat"),
        doc("c.txt", "demam tinggi disertai batuk"),
    ]
}

async fn snapshot_with(embedder: Arc<dyn Embedder>, docs: &[Document]) -> anyhow::Result<IndexSnapshot> {
    let builder = IndexBuilder::new(Settings::default(), embedder, Arc::new(DefaultExtractor));
    Ok(builder.build_from_documents(docs).await?.0)
}

async fn engine(strategy: FusionStrategy) -> anyhow::Result<HybridSearchEngine> {
    let embedder: Arc<dyn Embedder> = Arc::new(HashingEmbedder::new(512));
    let snapshot = snapshot_with(Arc::clone(&embedder), &corpus()).await?;
    let fusion = FusionConfig { strategy, ..FusionConfig::default() };
    Ok(HybridSearchEngine::new(snapshot, embedder, fusion, &FacadeConfig::default()))
}

#[tokio::test]
async fn every_strategy_ranks_matching_chunks_first() -> anyhow::Result<()> {
    for strategy in [FusionStrategy::WeightedSum, FusionStrategy::Rrf, FusionStrategy::Adaptive] {
        let engine = engine(strategy).await?;
        let results = engine.query("demam batuk", 2, RetrievalContext::General).await?;
        let names: Vec<&str> = results.iter().map(|r| r.metadata.file_name.as_str()).collect();
        assert_eq!(names, vec!["a.txt", "c.txt"], "strategy {strategy:?}");
        assert!(results.iter().all(|r| (0.0..=1.0).contains(&r.score)));
        assert!(results[0].score >= results[1].score);
        assert!(results[0].source_scores.keyword_rank.is_some());
        assert!(results[0].source_scores.vector_rank.is_some());
    }
    Ok(())
}

#[tokio::test]
async fn engine_tracks_query_stats_and_matched_terms() -> anyhow::Result<()> {
    let engine = engine(FusionStrategy::Rrf).await?;
    assert_eq!(engine.stats().total_searches, 0);

    let results = engine.query("demam batuk", 2, RetrievalContext::General).await?;
    assert_eq!(results[0].source_scores.matched_terms, vec!["batuk", "demam"]);
    engine.query("sakit kepala", 2, RetrievalContext::General).await?;

    let stats = engine.stats();
    assert_eq!(stats.total_searches, 2);
    assert!(stats.avg_total_ms >= stats.avg_fusion_ms);
    assert!(stats.avg_vector_ms >= 0.0 && stats.avg_keyword_ms >= 0.0);
    assert_eq!(stats.fusion.strategy, FusionStrategy::Rrf);
    Ok(())
}

#[tokio::test]
async fn repeated_queries_are_identical() -> anyhow::Result<()> {
    let engine = engine(FusionStrategy::WeightedSum).await?;
    let first = engine.query("batuk kering", 3, RetrievalContext::Diagnosis).await?;
    let second = engine.query("batuk kering", 3, RetrievalContext::Diagnosis).await?;
    assert_eq!(first, second);
    Ok(())
}

#[tokio::test]
async fn empty_corpus_returns_no_documents_without_error() {
    let settings = Settings::default();
    let snapshot = IndexSnapshot::empty(64, settings.tokenizer.clone(), settings.bm25, settings.vector);
    let engine = Arc::new(HybridSearchEngine::new(
        snapshot,
        Arc::new(HashingEmbedder::new(64)),
        settings.fusion.clone(),
        &settings.facade,
    ));
    let facade = RetrievalFacade::new(engine, settings.facade.clone());
    let resp = facade.answer_query("apa saja gejala", RetrievalContext::General, None).await;
    assert!(resp.documents.is_empty());
    assert_eq!(resp.metadata.num_retrieved_docs, 0);
    assert_eq!(resp.metadata.error, None);
    assert_eq!(resp.response_text, settings.facade.no_results_message);
}

/// Query embedding always fails; document embedding is delegated.
struct DownAtQueryTime(HashingEmbedder);

#[async_trait]
impl Embedder for DownAtQueryTime {
    fn id(&self) -> &str {
        self.0.id()
    }

    fn dim(&self) -> usize {
        self.0.dim()
    }

    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingServiceError> {
        self.0.embed_documents(texts).await
    }

    async fn embed_query(&self, _text: &str) -> Result<Vec<f32>, EmbeddingServiceError> {
        Err(EmbeddingServiceError::Transport("connection refused".into()))
    }
}

/// Query embedding never returns in time.
struct Stalled(HashingEmbedder);

#[async_trait]
impl Embedder for Stalled {
    fn id(&self) -> &str {
        self.0.id()
    }

    fn dim(&self) -> usize {
        self.0.dim()
    }

    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingServiceError> {
        self.0.embed_documents(texts).await
    }

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>, EmbeddingServiceError> {
        tokio::time::sleep(Duration::from_secs(30)).await;
        self.0.embed_query(text).await
    }
}

#[tokio::test]
async fn embedding_outage_yields_degraded_response() -> anyhow::Result<()> {
    let embedder: Arc<dyn Embedder> = Arc::new(DownAtQueryTime(HashingEmbedder::new(128)));
    let snapshot = snapshot_with(Arc::clone(&embedder), &corpus()).await?;
    let config = FacadeConfig { timeout_ms: 2_000, backoff_base_ms: 5, backoff_max_ms: 10, ..FacadeConfig::default() };
    let engine = Arc::new(HybridSearchEngine::new(snapshot, embedder, FusionConfig::default(), &config));
    let facade = RetrievalFacade::new(engine, config.clone());

    let started = Instant::now();
    let resp = facade.answer_query("demam", RetrievalContext::General, Some(3)).await;
    assert!(started.elapsed() < Duration::from_millis(config.timeout_ms));
    assert_eq!(resp.metadata.error, Some(true));
    assert_eq!(resp.metadata.error_kind.as_deref(), Some("embedding_service"));
    assert_eq!(resp.metadata.attempts, config.retries + 1);
    assert!(resp.documents.is_empty());
    assert_eq!(resp.response_text, config.apology_message);
    Ok(())
}

/// Accepts queries and never answers.
struct Hung;

#[async_trait]
impl SearchEngine for Hung {
    async fn query(&self, _text: &str, _k: usize, _context: RetrievalContext) -> Result<Vec<SearchResult>, RetrievalError> {
        std::future::pending().await
    }

    fn chunk_count(&self) -> usize {
        3
    }
}

#[tokio::test]
async fn hung_engine_degrades_within_the_deadline() {
    let config = FacadeConfig { timeout_ms: 200, branch_timeout_ms: 100, ..FacadeConfig::default() };
    let facade = RetrievalFacade::new(Arc::new(Hung), config.clone());

    let started = Instant::now();
    let resp = facade.answer_query("apa saja gejala", RetrievalContext::Anamnesis, None).await;
    let elapsed = started.elapsed();

    assert!(elapsed >= Duration::from_millis(config.timeout_ms));
    assert!(elapsed < Duration::from_millis(config.timeout_ms + 500), "took {elapsed:?}");
    assert_eq!(resp.metadata.error, Some(true));
    assert_eq!(resp.metadata.error_kind.as_deref(), Some("query_timeout"));
    assert_eq!(resp.metadata.attempts, 1);
    assert_eq!(resp.metadata.total_chunks_available, 3);
    assert!(resp.documents.is_empty());
    assert_eq!(resp.response_text, config.apology_message);
}

#[tokio::test]
async fn slow_vector_branch_falls_back_to_keyword_results() -> anyhow::Result<()> {
    let embedder: Arc<dyn Embedder> = Arc::new(Stalled(HashingEmbedder::new(128)));
    let snapshot = snapshot_with(Arc::clone(&embedder), &corpus()).await?;
    let config = FacadeConfig { timeout_ms: 5_000, branch_timeout_ms: 100, ..FacadeConfig::default() };
    let engine = HybridSearchEngine::new(snapshot, embedder, FusionConfig::default(), &config);

    let results = engine.query("sakit kepala", 3, RetrievalContext::General).await?;
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].metadata.file_name, "b.txt");
    assert!(results[0].source_scores.vector_rank.is_none());
    Ok(())
}

#[tokio::test]
async fn facade_builds_references_and_context_block() -> anyhow::Result<()> {
    let engine = Arc::new(engine(FusionStrategy::Adaptive).await?);
    let facade = RetrievalFacade::new(Arc::clone(&engine), FacadeConfig::default());
    let resp = facade.answer_query("demam batuk", RetrievalContext::Anamnesis, Some(2)).await;

    assert_eq!(resp.metadata.num_retrieved_docs, 2);
    assert_eq!(resp.metadata.total_chunks_available, engine.chunk_count());
    assert_eq!(resp.metadata.data_sources, vec!["Google Drive".to_string()]);
    assert_eq!(resp.metadata.top_similarity_score, resp.documents[0].similarity_score);
    assert_eq!(resp.documents[0].reference, "Google Drive:a.txt");
    assert!(resp.response_text.starts_with("--- Referensi 1: [Google Drive] a.txt ---\ndemam dan batuk"));
    let json = serde_json::to_value(&resp)?;
    assert!(json["metadata"].get("error").is_none());
    Ok(())
}
