//! Score normalization and re-ranking fusion.
//!
//! Cosine similarity and BM25 live on different scales, so weighted fusion
//! min-max normalizes each list on its own first. Reciprocal rank fusion only
//! looks at ranks. The adaptive strategy measures how much the heads of both
//! lists agree and picks one of the two.
use std::collections::{HashMap, HashSet};

use anamnesa_core::config::{FusionConfig, FusionStrategy, FusionWeights};
use anamnesa_core::types::{ChunkId, RetrievalContext, SearchHit, SourceScores};

/// One deduplicated candidate after fusion.
#[derive(Debug, Clone, PartialEq)]
pub struct Fused {
    pub chunk_id: ChunkId,
    pub score: f32,
    pub source_scores: SourceScores,
}

/// Strategy actually applied to a query (adaptive resolves to one of the others).
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AppliedFusion {
    WeightedSum(FusionWeights),
    Rrf { c: f32 },
}

/// Min-max normalize scores to [0, 1]. A list whose scores are all equal maps
/// to 1.0 when positive and 0.0 otherwise.
pub fn min_max_normalize(hits: &[SearchHit]) -> Vec<f32> {
    let Some(first) = hits.first() else {
        return Vec::new();
    };
    let (min, max) = hits.iter().fold((first.score, first.score), |(lo, hi), h| (lo.min(h.score), hi.max(h.score)));
    let range = max - min;
    hits.iter()
        .map(|h| {
            if range > f32::EPSILON {
                ((h.score - min) / range).clamp(0.0, 1.0)
            } else if max > 0.0 {
                1.0
            } else {
                0.0
            }
        })
        .collect()
}

/// Fraction of the top-`depth` chunk ids shared by both lists, measured
/// against the shorter head. Zero when either list is empty.
pub fn agreement(vector: &[SearchHit], keyword: &[SearchHit], depth: usize) -> f32 {
    let d = depth.min(vector.len()).min(keyword.len());
    if d == 0 {
        return 0.0;
    }
    let head: HashSet<&str> = vector.iter().take(depth).map(|h| h.id.as_str()).collect();
    let shared = keyword.iter().take(depth).filter(|h| head.contains(h.id.as_str())).count();
    (shared.min(d) as f32) / (d as f32)
}

/// Decide the strategy for one query.
pub fn plan(config: &FusionConfig, context: RetrievalContext, vector: &[SearchHit], keyword: &[SearchHit]) -> AppliedFusion {
    match config.strategy {
        FusionStrategy::WeightedSum => AppliedFusion::WeightedSum(config.weights_for(context)),
        FusionStrategy::Rrf => AppliedFusion::Rrf { c: config.rrf_c },
        FusionStrategy::Adaptive => {
            let a = agreement(vector, keyword, config.adaptive.depth);
            if a >= config.adaptive.agreement_threshold {
                AppliedFusion::WeightedSum(FusionWeights {
                    vector_weight: config.adaptive.vector_weight,
                    keyword_weight: config.adaptive.keyword_weight,
                })
            } else {
                AppliedFusion::Rrf { c: config.rrf_c }
            }
        }
    }
}

/// Fuse both lists, deduplicate by chunk id, sort by score descending then
/// chunk id ascending, and keep the top `k`.
pub fn fuse(vector: &[SearchHit], keyword: &[SearchHit], applied: AppliedFusion, k: usize) -> Vec<Fused> {
    let mut fused = match applied {
        AppliedFusion::WeightedSum(weights) => weighted_sum(vector, keyword, weights),
        AppliedFusion::Rrf { c } => reciprocal_rank_fusion(vector, keyword, c),
    };
    fused.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.chunk_id.cmp(&b.chunk_id)));
    fused.truncate(k);
    fused
}

struct Candidate {
    scores: SourceScores,
    vector_norm: f32,
    keyword_norm: f32,
}

/// Merge both lists by chunk id, recording raw scores and 1-based ranks. A
/// chunk repeated within one list keeps its best-ranked entry.
fn collect(vector: &[SearchHit], keyword: &[SearchHit]) -> (Vec<ChunkId>, HashMap<ChunkId, Candidate>) {
    let vector_norm = min_max_normalize(vector);
    let keyword_norm = min_max_normalize(keyword);
    let mut order = Vec::new();
    let mut by_id: HashMap<ChunkId, Candidate> = HashMap::new();

    for (i, h) in vector.iter().enumerate() {
        let c = by_id.entry(h.id.clone()).or_insert_with(|| {
            order.push(h.id.clone());
            Candidate { scores: SourceScores::default(), vector_norm: 0.0, keyword_norm: 0.0 }
        });
        if c.scores.vector_rank.is_none() {
            c.scores.vector_rank = Some(i + 1);
            c.scores.vector_score = Some(h.score);
            c.vector_norm = vector_norm[i];
        }
    }
    for (i, h) in keyword.iter().enumerate() {
        let c = by_id.entry(h.id.clone()).or_insert_with(|| {
            order.push(h.id.clone());
            Candidate { scores: SourceScores::default(), vector_norm: 0.0, keyword_norm: 0.0 }
        });
        if c.scores.keyword_rank.is_none() {
            c.scores.keyword_rank = Some(i + 1);
            c.scores.keyword_score = Some(h.score);
            c.scores.matched_terms.clone_from(&h.matched_terms);
            c.keyword_norm = keyword_norm[i];
        }
    }
    (order, by_id)
}

/// `w_v * norm_v + w_k * norm_k` with weights rescaled to sum to 1, so the
/// fused score stays in [0, 1]. A missing signal contributes 0.
pub fn weighted_sum(vector: &[SearchHit], keyword: &[SearchHit], weights: FusionWeights) -> Vec<Fused> {
    let total = weights.vector_weight + weights.keyword_weight;
    let (wv, wk) = if total > 0.0 {
        (weights.vector_weight / total, weights.keyword_weight / total)
    } else {
        (0.5, 0.5)
    };
    let (order, mut by_id) = collect(vector, keyword);
    order
        .into_iter()
        .filter_map(|id| {
            let c = by_id.remove(&id)?;
            let score = (wv * c.vector_norm + wk * c.keyword_norm).clamp(0.0, 1.0);
            Some(Fused { chunk_id: id, score, source_scores: c.scores })
        })
        .collect()
}

/// `Σ 1 / (rank + c)` over the lists a chunk appears in, divided by the best
/// attainable `2 / (1 + c)` so scores lie in [0, 1].
pub fn reciprocal_rank_fusion(vector: &[SearchHit], keyword: &[SearchHit], c: f32) -> Vec<Fused> {
    let c = c.max(0.0);
    let best = 2.0 / (1.0 + c);
    let (order, mut by_id) = collect(vector, keyword);
    order
        .into_iter()
        .filter_map(|id| {
            let cand = by_id.remove(&id)?;
            let rr = |rank: Option<usize>| rank.map_or(0.0, |r| 1.0 / (r as f32 + c));
            let raw = rr(cand.scores.vector_rank) + rr(cand.scores.keyword_rank);
            Some(Fused { chunk_id: id, score: (raw / best).clamp(0.0, 1.0), source_scores: cand.scores })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use anamnesa_core::types::SourceKind;

    fn hits(source: SourceKind, items: &[(&str, f32)]) -> Vec<SearchHit> {
        items.iter().map(|(id, s)| SearchHit::new(*id, *s, source)).collect()
    }

    #[test]
    fn normalization_handles_degenerate_lists() {
        assert!(min_max_normalize(&[]).is_empty());
        let same = hits(SourceKind::Keyword, &[("a", 2.0), ("b", 2.0)]);
        assert_eq!(min_max_normalize(&same), vec![1.0, 1.0]);
        let zeros = hits(SourceKind::Vector, &[("a", 0.0)]);
        assert_eq!(min_max_normalize(&zeros), vec![0.0]);
        let spread = hits(SourceKind::Vector, &[("a", 0.9), ("b", 0.5), ("c", 0.1)]);
        let n = min_max_normalize(&spread);
        assert!((n[0] - 1.0).abs() < 1e-6 && (n[1] - 0.5).abs() < 1e-6 && n[2].abs() < 1e-6);
    }

    #[test]
    fn rrf_matches_formula_and_is_normalized() {
        let v = hits(SourceKind::Vector, &[("a", 0.9), ("b", 0.8)]);
        let k = hits(SourceKind::Keyword, &[("b", 7.0), ("c", 3.0)]);
        let out = fuse(&v, &k, AppliedFusion::Rrf { c: 60.0 }, 10);
        let best = 2.0 / 61.0;
        let b = out.iter().find(|f| f.chunk_id == "b").expect("b");
        assert!((b.score - (1.0 / 62.0 + 1.0 / 61.0) / best).abs() < 1e-6);
        assert_eq!(out[0].chunk_id, "b");
        assert_eq!(b.source_scores.vector_rank, Some(2));
        assert_eq!(b.source_scores.keyword_rank, Some(1));
        assert!(out.iter().all(|f| (0.0..=1.0).contains(&f.score)));
    }

    #[test]
    fn chunk_in_both_lists_appears_once() {
        let v = hits(SourceKind::Vector, &[("a", 0.9), ("b", 0.2)]);
        let k = hits(SourceKind::Keyword, &[("a", 3.0), ("a", 1.0)]);
        let w = FusionWeights { vector_weight: 0.6, keyword_weight: 0.4 };
        let out = fuse(&v, &k, AppliedFusion::WeightedSum(w), 10);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].chunk_id, "a");
        assert_eq!(out[0].source_scores.keyword_score, Some(3.0));
    }

    #[test]
    fn adaptive_follows_agreement() {
        let cfg = FusionConfig { strategy: FusionStrategy::Adaptive, ..FusionConfig::default() };
        let v = hits(SourceKind::Vector, &[("a", 0.9), ("b", 0.8), ("c", 0.1)]);
        let agree = hits(SourceKind::Keyword, &[("b", 4.0), ("a", 2.0)]);
        let diverge = hits(SourceKind::Keyword, &[("x", 4.0), ("y", 2.0)]);
        assert!((agreement(&v, &agree, 5) - 1.0).abs() < 1e-6);
        assert!(matches!(plan(&cfg, RetrievalContext::General, &v, &agree), AppliedFusion::WeightedSum(w) if (w.vector_weight - 0.7).abs() < 1e-6));
        assert!(matches!(plan(&cfg, RetrievalContext::General, &v, &diverge), AppliedFusion::Rrf { .. }));
        assert!(matches!(plan(&cfg, RetrievalContext::General, &v, &[]), AppliedFusion::Rrf { .. }));
    }

    #[test]
    fn ties_break_on_chunk_id_and_truncate() {
        let v = hits(SourceKind::Vector, &[("b", 0.5), ("a", 0.5), ("c", 0.5)]);
        let out = fuse(&v, &[], AppliedFusion::WeightedSum(FusionWeights { vector_weight: 1.0, keyword_weight: 0.0 }), 2);
        let ids: Vec<&str> = out.iter().map(|f| f.chunk_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }
}
