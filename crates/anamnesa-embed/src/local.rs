//! Local BGE-M3 (XLM-RoBERTa) embeddings with candle.
//!
//! Expects `tokenizer.json`, `config.json` and `pytorch_model.bin` in the
//! model directory. Inference is CPU/GPU bound and runs on the blocking pool.
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anamnesa_core::error::EmbeddingServiceError;
use anamnesa_core::traits::Embedder;
use async_trait::async_trait;
use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::xlm_roberta::{Config as XLMRobertaConfig, XLMRobertaModel};
use tokenizers::Tokenizer;

const MAX_LEN: usize = 256;
const PAD_ID: u32 = 1;

struct Model {
    model: XLMRobertaModel,
    tokenizer: Tokenizer,
    device: Device,
    dim: usize,
}

pub struct LocalEmbedder {
    inner: Arc<Model>,
    id: String,
}

fn model_err(e: impl std::fmt::Display) -> EmbeddingServiceError {
    EmbeddingServiceError::Model(e.to_string())
}

pub fn select_device() -> Device {
    #[cfg(feature = "metal")]
    {
        if let Ok(dev) = Device::new_metal(0) {
            tracing::info!("embedding device: Metal");
            return dev;
        }
    }
    tracing::info!("embedding device: CPU");
    Device::Cpu
}

/// First existing directory among the configured one, `APP_MODEL_DIR` and `models/bge-m3`.
pub fn resolve_model_dir(configured: Option<&Path>) -> Result<PathBuf, EmbeddingServiceError> {
    let candidates = configured
        .map(Path::to_path_buf)
        .into_iter()
        .chain(std::env::var("APP_MODEL_DIR").ok().map(PathBuf::from))
        .chain([PathBuf::from("../models/bge-m3"), PathBuf::from("models/bge-m3")]);
    for dir in candidates {
        if dir.exists() {
            tracing::info!(dir = %dir.display(), "using local model directory");
            return Ok(dir);
        }
    }
    Err(EmbeddingServiceError::NotConfigured("could not locate BGE-M3 model directory".to_string()))
}

impl LocalEmbedder {
    pub fn load(model_dir: &Path) -> Result<Self, EmbeddingServiceError> {
        let device = select_device();
        let tokenizer_path = model_dir.join("tokenizer.json");
        let tokenizer = Tokenizer::from_file(&tokenizer_path).map_err(model_err)?;
        let config_raw = std::fs::read_to_string(model_dir.join("config.json")).map_err(model_err)?;
        let config: XLMRobertaConfig = serde_json::from_str(&config_raw).map_err(model_err)?;
        let weights = candle_core::pickle::read_all(model_dir.join("pytorch_model.bin")).map_err(model_err)?;
        let weights: HashMap<String, Tensor> = weights.into_iter().collect();
        let vb = VarBuilder::from_tensors(weights, DType::F32, &device);
        let model = XLMRobertaModel::new(&config, vb).map_err(model_err)?;
        let dim = config.hidden_size;
        tracing::info!(dir = %model_dir.display(), dim, "loaded BGE-M3 model");
        Ok(Self { inner: Arc::new(Model { model, tokenizer, device, dim }), id: format!("local:bge-m3:d{dim}") })
    }
}

impl Model {
    fn embed_one(&self, text: &str) -> Result<Vec<f32>, EmbeddingServiceError> {
        let enc = self.tokenizer.encode(text, true).map_err(model_err)?;
        let mut ids = enc.get_ids().to_vec();
        let mut mask = enc.get_attention_mask().to_vec();
        ids.truncate(MAX_LEN);
        mask.truncate(MAX_LEN);
        ids.resize(MAX_LEN, PAD_ID);
        mask.resize(MAX_LEN, 0);

        let input_ids = Tensor::from_iter(ids, &self.device).and_then(|t| t.reshape((1, MAX_LEN))).map_err(model_err)?;
        let attention = Tensor::from_iter(mask, &self.device).and_then(|t| t.reshape((1, MAX_LEN))).map_err(model_err)?;
        let token_type = Tensor::zeros((1, MAX_LEN), DType::I64, &self.device).map_err(model_err)?;
        let hidden = self
            .model
            .forward(&input_ids, &attention, &token_type, None, None, None)
            .map_err(model_err)?;
        let pooled = masked_mean_l2(&hidden, &attention).map_err(model_err)?;
        let v: Vec<f32> = pooled.to_device(&Device::Cpu).and_then(|t| t.squeeze(0)).and_then(|t| t.to_vec1()).map_err(model_err)?;
        if v.len() == self.dim {
            Ok(v)
        } else {
            Err(EmbeddingServiceError::DimensionMismatch { expected: self.dim, actual: v.len() })
        }
    }
}

/// Mean of the hidden states over unmasked positions, L2-normalized. `[B,T,H] -> [B,H]`.
pub fn masked_mean_l2(hidden: &Tensor, attention_mask: &Tensor) -> candle_core::Result<Tensor> {
    let mask = attention_mask.to_device(hidden.device())?.to_dtype(hidden.dtype())?;
    let mask_3d = mask.unsqueeze(2)?.broadcast_as(hidden.shape())?;
    let sum = (hidden * &mask_3d)?.sum(1)?;
    let lengths = mask.sum(1)?.unsqueeze(1)?.to_dtype(sum.dtype())?;
    let mean = sum.broadcast_div(&lengths)?;
    let eps_val = match hidden.dtype() {
        DType::F16 => 1e-6f32,
        _ => 1e-12f32,
    };
    let eps = Tensor::new(&[eps_val], hidden.device())?.to_dtype(hidden.dtype())?.unsqueeze(0)?;
    let norm = mean.sqr()?.sum_keepdim(1)?.sqrt()?.broadcast_add(&eps)?;
    mean.broadcast_div(&norm)
}

#[async_trait]
impl Embedder for LocalEmbedder {
    fn id(&self) -> &str {
        &self.id
    }

    fn dim(&self) -> usize {
        self.inner.dim
    }

    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingServiceError> {
        let model = Arc::clone(&self.inner);
        let texts = texts.to_vec();
        tokio::task::spawn_blocking(move || texts.iter().map(|t| model.embed_one(t)).collect())
            .await
            .map_err(model_err)?
    }

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>, EmbeddingServiceError> {
        let model = Arc::clone(&self.inner);
        let text = text.to_string();
        tokio::task::spawn_blocking(move || model.embed_one(&text)).await.map_err(model_err)?
    }
}
