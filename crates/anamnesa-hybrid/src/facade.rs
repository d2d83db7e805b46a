//! The single entry point the UI calls.
//!
//! Every failure below this boundary turns into a degraded response; the
//! facade itself never returns an error.
use std::collections::BTreeSet;
use std::fmt::Write as _;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anamnesa_core::config::FacadeConfig;
use anamnesa_core::error::RetrievalError;
use anamnesa_core::retry::{retry_with_backoff, Backoff};
use anamnesa_core::traits::SearchEngine;
use anamnesa_core::types::{ChunkId, DocumentId, RetrievalContext, SearchResult};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RetrievalRequest {
    pub query: String,
    #[serde(default)]
    pub context: RetrievalContext,
    #[serde(default)]
    pub max_docs: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetrievedDocument {
    pub file_name: String,
    pub title: String,
    pub content_preview: String,
    pub similarity_score: f32,
    pub chunk_id: ChunkId,
    pub document_id: DocumentId,
    pub source: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    pub reference: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResponseMetadata {
    pub num_retrieved_docs: usize,
    pub top_similarity_score: f32,
    pub data_sources: Vec<String>,
    pub total_chunks_available: usize,
    pub context: RetrievalContext,
    pub attempts: u32,
    pub elapsed_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetrievalResponse {
    pub query: String,
    pub documents: Vec<RetrievedDocument>,
    pub metadata: ResponseMetadata,
    pub response_text: String,
}

impl RetrievalResponse {
    /// Degraded response for a request that never reached an engine.
    pub fn failed(request: &RetrievalRequest, error_kind: &str, response_text: &str, elapsed_ms: u64) -> Self {
        Self {
            query: request.query.clone(),
            documents: Vec::new(),
            metadata: ResponseMetadata {
                num_retrieved_docs: 0,
                top_similarity_score: 0.0,
                data_sources: Vec::new(),
                total_chunks_available: 0,
                context: request.context,
                attempts: 0,
                elapsed_ms,
                error: Some(true),
                error_kind: Some(error_kind.to_string()),
            },
            response_text: response_text.to_string(),
        }
    }

    pub fn is_degraded(&self) -> bool {
        self.metadata.error == Some(true)
    }
}

pub struct RetrievalFacade<E: SearchEngine> {
    engine: Arc<E>,
    config: FacadeConfig,
}

impl<E: SearchEngine> RetrievalFacade<E> {
    pub fn new(engine: Arc<E>, config: FacadeConfig) -> Self {
        Self { engine, config }
    }

    pub fn engine(&self) -> &Arc<E> {
        &self.engine
    }

    pub async fn answer_query(&self, query: &str, context: RetrievalContext, max_docs: Option<usize>) -> RetrievalResponse {
        self.answer(RetrievalRequest { query: query.to_string(), context, max_docs }).await
    }

    pub async fn answer(&self, request: RetrievalRequest) -> RetrievalResponse {
        let started = Instant::now();
        let query = request.query.trim().to_string();
        if query.is_empty() {
            let err = RetrievalError::InvalidQuery("query is empty".to_string());
            return self.degraded(&request, &err, 0, started);
        }
        let k = request
            .max_docs
            .unwrap_or(self.config.default_max_docs)
            .clamp(1, self.config.max_docs_limit.max(1));

        let attempts = AtomicU32::new(0);
        let backoff = Backoff::from_millis(self.config.backoff_base_ms, self.config.backoff_max_ms);
        let run = retry_with_backoff(self.config.retries, backoff, RetrievalError::is_retryable, |attempt| {
            attempts.store(attempt, Ordering::Relaxed);
            self.engine.query(&query, k, request.context)
        });

        let outcome = match tokio::time::timeout(Duration::from_millis(self.config.timeout_ms), run).await {
            Ok(attempted) => attempted.result,
            Err(_) => Err(RetrievalError::QueryTimeout { elapsed_ms: started.elapsed().as_millis() as u64 }),
        };
        let attempts = attempts.load(Ordering::Relaxed);

        match outcome {
            Ok(results) => self.success(&request, results, attempts, started),
            Err(e) => {
                tracing::error!(error = %e, kind = e.kind(), attempts, "retrieval failed, returning degraded response");
                self.degraded(&request, &e, attempts, started)
            }
        }
    }

    fn success(&self, request: &RetrievalRequest, results: Vec<SearchResult>, attempts: u32, started: Instant) -> RetrievalResponse {
        let data_sources: BTreeSet<String> = results.iter().map(|r| r.source_type.label().to_string()).collect();
        let response_text = if results.is_empty() {
            self.config.no_results_message.clone()
        } else {
            context_block(&results)
        };
        let documents: Vec<RetrievedDocument> = results
            .into_iter()
            .map(|r| {
                let source = r.source_type.label().to_string();
                let title = r.metadata.display_title().to_string();
                RetrievedDocument {
                    reference: format!("{source}:{title}"),
                    file_name: r.metadata.file_name,
                    title,
                    content_preview: r.content_preview,
                    similarity_score: r.score,
                    chunk_id: r.chunk_id,
                    document_id: r.document_id,
                    source,
                    url: r.metadata.url,
                }
            })
            .collect();
        let metadata = ResponseMetadata {
            num_retrieved_docs: documents.len(),
            top_similarity_score: documents.first().map_or(0.0, |d| d.similarity_score),
            data_sources: data_sources.into_iter().collect(),
            total_chunks_available: self.engine.chunk_count(),
            context: request.context,
            attempts,
            elapsed_ms: started.elapsed().as_millis() as u64,
            error: None,
            error_kind: None,
        };
        tracing::info!(
            docs = metadata.num_retrieved_docs,
            top = metadata.top_similarity_score,
            attempts,
            elapsed_ms = metadata.elapsed_ms,
            "answered query"
        );
        RetrievalResponse { query: request.query.clone(), documents, metadata, response_text }
    }

    fn degraded(&self, request: &RetrievalRequest, error: &RetrievalError, attempts: u32, started: Instant) -> RetrievalResponse {
        let elapsed_ms = started.elapsed().as_millis() as u64;
        let mut response = RetrievalResponse::failed(request, error.kind(), &self.config.apology_message, elapsed_ms);
        response.metadata.attempts = attempts;
        response.metadata.total_chunks_available = self.engine.chunk_count();
        response
    }
}

/// Numbered reference blocks for a generative model prompt.
pub fn context_block(results: &[SearchResult]) -> String {
    let mut out = String::new();
    for (i, r) in results.iter().enumerate() {
        let _ = writeln!(out, "--- Referensi {}: [{}] {} ---", i + 1, r.source_type.label(), r.metadata.display_title());
        let _ = writeln!(out, "{}", r.text);
        out.push('\n');
    }
    out.truncate(out.trim_end().len());
    out
}
