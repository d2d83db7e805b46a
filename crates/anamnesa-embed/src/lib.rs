//! Embedding collaborators behind the [`Embedder`] trait.
//!
//! `APP_USE_FAKE_EMBEDDINGS=1` forces the [`HashingEmbedder`] regardless of
//! configuration, for fast and deterministic runs in tests and development.
use std::sync::Arc;

use anamnesa_core::config::{EmbeddingConfig, EmbeddingProvider};
use anamnesa_core::error::EmbeddingServiceError;
use anamnesa_core::traits::Embedder;

pub mod hashing;
#[cfg(feature = "local-model")]
pub mod local;
pub mod remote;

pub use hashing::HashingEmbedder;
pub use remote::RemoteEmbedder;

pub fn fake_embeddings_forced() -> bool {
    std::env::var("APP_USE_FAKE_EMBEDDINGS")
        .ok()
        .is_some_and(|v| v == "1" || v.eq_ignore_ascii_case("true"))
}

/// Embedder selected by `config.provider`.
pub fn build_embedder(config: &EmbeddingConfig) -> Result<Arc<dyn Embedder>, EmbeddingServiceError> {
    if fake_embeddings_forced() {
        tracing::info!(dim = config.dim, "using hashing embedder (APP_USE_FAKE_EMBEDDINGS)");
        return Ok(Arc::new(HashingEmbedder::new(config.dim)));
    }
    match config.provider {
        EmbeddingProvider::Hashing => Ok(Arc::new(HashingEmbedder::new(config.dim))),
        EmbeddingProvider::Remote => {
            let embedder = RemoteEmbedder::from_config(config)?;
            tracing::info!(model = %config.model, dim = config.dim, "using remote embedder");
            Ok(Arc::new(embedder))
        }
        EmbeddingProvider::Local => local_embedder(config),
    }
}

#[cfg(feature = "local-model")]
fn local_embedder(config: &EmbeddingConfig) -> Result<Arc<dyn Embedder>, EmbeddingServiceError> {
    let configured = config.model_dir.as_deref().map(anamnesa_core::config::expand_path);
    let dir = local::resolve_model_dir(configured.as_deref())?;
    let embedder = local::LocalEmbedder::load(&dir)?;
    if embedder.dim() != config.dim {
        return Err(EmbeddingServiceError::DimensionMismatch { expected: config.dim, actual: embedder.dim() });
    }
    Ok(Arc::new(embedder))
}

#[cfg(not(feature = "local-model"))]
fn local_embedder(_config: &EmbeddingConfig) -> Result<Arc<dyn Embedder>, EmbeddingServiceError> {
    Err(EmbeddingServiceError::NotConfigured(
        "local embeddings require building with the `local-model` feature".to_string(),
    ))
}
