use std::cmp::Ordering;
use std::collections::HashMap;

use anamnesa_core::config::VectorConfig;
use anamnesa_core::error::IndexLoadError;
use anamnesa_core::types::{ChunkId, SearchHit, SourceKind};
use hnsw_rs::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// HNSW layer cap supported by hnsw_rs.
const MAX_LAYERS: usize = 16;

#[derive(Debug, Error, PartialEq)]
pub enum VectorError {
    #[error("vector dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("vector for {0} has zero norm or non-finite components")]
    Degenerate(String),
}

/// Serializable form of a [`VectorIndex`]; the HNSW graph is rebuilt on load.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorArtifact {
    pub dim: usize,
    pub ids: Vec<ChunkId>,
    pub vectors: Vec<Vec<f32>>,
}

/// Cosine-similarity index. Vectors are stored L2-normalized so similarity
/// is a dot product.
pub struct VectorIndex {
    dim: usize,
    config: VectorConfig,
    ids: Vec<ChunkId>,
    vectors: Vec<Vec<f32>>,
    slots: HashMap<ChunkId, usize>,
    ann: Option<Hnsw<'static, f32, DistCosine>>,
}

impl VectorIndex {
    pub fn new(dim: usize, config: VectorConfig) -> Self {
        Self { dim, config, ids: Vec::new(), vectors: Vec::new(), slots: HashMap::new(), ann: None }
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn ids(&self) -> &[ChunkId] {
        &self.ids
    }

    pub fn contains(&self, chunk_id: &str) -> bool {
        self.slots.contains_key(chunk_id)
    }

    /// Stored (normalized) vector for `chunk_id`.
    pub fn get(&self, chunk_id: &str) -> Option<&[f32]> {
        self.slots.get(chunk_id).map(|&slot| self.vectors[slot].as_slice())
    }

    /// Whether searches currently go through the HNSW graph.
    pub fn is_approximate(&self) -> bool {
        self.ann.is_some()
    }

    /// Insert or replace the vector for `chunk_id`. Invalidates the HNSW graph.
    pub fn add(&mut self, chunk_id: &str, vector: &[f32]) -> Result<(), VectorError> {
        let normalized = self.normalize(chunk_id, vector)?;
        match self.slots.get(chunk_id) {
            Some(&slot) => self.vectors[slot] = normalized,
            None => {
                self.slots.insert(chunk_id.to_string(), self.ids.len());
                self.ids.push(chunk_id.to_string());
                self.vectors.push(normalized);
            }
        }
        self.ann = None;
        Ok(())
    }

    fn normalize(&self, chunk_id: &str, vector: &[f32]) -> Result<Vec<f32>, VectorError> {
        if vector.len() != self.dim {
            return Err(VectorError::DimensionMismatch { expected: self.dim, actual: vector.len() });
        }
        let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if !norm.is_finite() || norm <= f32::EPSILON {
            return Err(VectorError::Degenerate(chunk_id.to_string()));
        }
        // Unit vectors are stored bit-for-bit.
        if (norm - 1.0).abs() <= 1e-6 {
            return Ok(vector.to_vec());
        }
        Ok(vector.iter().map(|x| x / norm).collect())
    }

    /// Build the HNSW graph when the corpus has reached `ann_threshold`.
    pub fn prepare(&mut self) {
        if self.ids.len() < self.config.ann_threshold || self.ids.is_empty() {
            self.ann = None;
            return;
        }
        let count = self.ids.len();
        tracing::info!(
            points = count,
            m = self.config.hnsw_m,
            ef_construction = self.config.hnsw_ef_construction,
            "building HNSW graph"
        );
        let hnsw = Hnsw::new(self.config.hnsw_m, count, MAX_LAYERS, self.config.hnsw_ef_construction, DistCosine);
        let data: Vec<(&Vec<f32>, usize)> = self.vectors.iter().enumerate().map(|(slot, v)| (v, slot)).collect();
        hnsw.parallel_insert(&data);
        self.ann = Some(hnsw);
    }

    /// Top `k` chunks by cosine similarity in [-1, 1], descending, ties by
    /// lower chunk id.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<SearchHit>, VectorError> {
        if query.len() != self.dim {
            return Err(VectorError::DimensionMismatch { expected: self.dim, actual: query.len() });
        }
        let norm = query.iter().map(|x| x * x).sum::<f32>().sqrt();
        if k == 0 || self.ids.is_empty() || !norm.is_finite() || norm <= f32::EPSILON {
            return Ok(Vec::new());
        }
        let q: Vec<f32> = query.iter().map(|x| x / norm).collect();

        let mut scored: Vec<(usize, f32)> = match &self.ann {
            Some(hnsw) => {
                let candidates = (k * self.config.candidate_multiplier).min(self.ids.len());
                let ef = self.config.hnsw_ef_search.max(candidates);
                hnsw.search(&q, candidates, ef)
                    .into_iter()
                    .filter(|n| n.d_id < self.vectors.len())
                    .map(|n| (n.d_id, self.similarity(&q, n.d_id)))
                    .collect()
            }
            None => (0..self.vectors.len()).map(|slot| (slot, self.similarity(&q, slot))).collect(),
        };

        let cmp = |a: &(usize, f32), b: &(usize, f32)| -> Ordering {
            b.1.total_cmp(&a.1).then_with(|| self.ids[a.0].cmp(&self.ids[b.0]))
        };
        if scored.len() > k {
            scored.select_nth_unstable_by(k - 1, cmp);
            scored.truncate(k);
        }
        scored.sort_by(cmp);
        Ok(scored
            .into_iter()
            .map(|(slot, score)| SearchHit::new(self.ids[slot].clone(), score, SourceKind::Vector))
            .collect())
    }

    fn similarity(&self, q: &[f32], slot: usize) -> f32 {
        let dot: f32 = self.vectors[slot].iter().zip(q).map(|(a, b)| a * b).sum();
        dot.clamp(-1.0, 1.0)
    }

    pub fn to_artifact(&self) -> VectorArtifact {
        VectorArtifact { dim: self.dim, ids: self.ids.clone(), vectors: self.vectors.clone() }
    }

    /// Restore from an artifact and rebuild the HNSW graph if needed.
    pub fn from_artifact(artifact: VectorArtifact, config: VectorConfig) -> Result<Self, IndexLoadError> {
        let VectorArtifact { dim, ids, vectors } = artifact;
        if ids.len() != vectors.len() {
            return Err(IndexLoadError::Inconsistent(format!(
                "vector index has {} ids but {} vectors",
                ids.len(),
                vectors.len()
            )));
        }
        let mut index = Self::new(dim, config);
        for (id, v) in ids.iter().zip(&vectors) {
            if index.contains(id) {
                return Err(IndexLoadError::Inconsistent(format!("duplicate vector chunk id {id}")));
            }
            index.add(id, v).map_err(|e| IndexLoadError::Inconsistent(e.to_string()))?;
        }
        index.prepare();
        Ok(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exact() -> VectorConfig {
        VectorConfig { ann_threshold: usize::MAX, ..VectorConfig::default() }
    }

    #[test]
    fn self_similarity_is_top_result() {
        let mut idx = VectorIndex::new(3, exact());
        idx.add("a", &[1.0, 0.0, 0.0]).expect("add");
        idx.add("b", &[0.0, 1.0, 0.0]).expect("add");
        idx.add("c", &[1.0, 1.0, 0.0]).expect("add");
        let hits = idx.search(&[0.0, 2.0, 0.0], 3).expect("search");
        assert_eq!(hits[0].id, "b");
        assert!((hits[0].score - 1.0).abs() < 1e-6);
        assert!(hits.iter().all(|h| (-1.0..=1.0).contains(&h.score)));
    }

    #[test]
    fn add_is_idempotent_and_replaces() {
        let mut idx = VectorIndex::new(2, exact());
        idx.add("a", &[1.0, 0.0]).expect("add");
        idx.add("a", &[0.0, 3.0]).expect("add");
        assert_eq!(idx.len(), 1);
        assert_eq!(idx.get("a"), Some(&[0.0, 1.0][..]));
        assert!(idx.get("b").is_none());
        let hits = idx.search(&[0.0, 1.0], 1).expect("search");
        assert!((hits[0].score - 1.0).abs() < 1e-6);
    }

    #[test]
    fn ties_break_on_lower_chunk_id() {
        let mut idx = VectorIndex::new(2, exact());
        for id in ["c", "a", "b"] {
            idx.add(id, &[1.0, 1.0]).expect("add");
        }
        let ids: Vec<String> = idx.search(&[1.0, 1.0], 2).expect("search").into_iter().map(|h| h.id).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[test]
    fn rejects_bad_vectors() {
        let mut idx = VectorIndex::new(2, exact());
        assert_eq!(idx.add("a", &[1.0]), Err(VectorError::DimensionMismatch { expected: 2, actual: 1 }));
        assert!(matches!(idx.add("z", &[0.0, 0.0]), Err(VectorError::Degenerate(_))));
        assert!(idx.search(&[1.0, 2.0, 3.0], 1).is_err());
        assert!(idx.search(&[0.0, 0.0], 1).expect("zero query").is_empty());
    }
}
