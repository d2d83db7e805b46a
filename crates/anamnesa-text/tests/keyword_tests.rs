use anamnesa_core::config::{Bm25Config, TokenizerConfig};
use anamnesa_text::{Analyzer, KeywordArtifact, KeywordIndex};

const CORPUS: &[(&str, &str)] = &[
    ("doc:000000", "demam dan batuk"),
    ("doc:000001", "sakit kepala berat"),
    ("doc:000002", "demam tinggi disertai batuk"),
];

#[test]
fn scenario_ranks_matching_chunks_only() {
    let idx = KeywordIndex::build(Analyzer::default(), Bm25Config::default(), CORPUS.iter().copied());
    let hits = idx.search_text("demam batuk", 2);
    let ids: Vec<&str> = hits.iter().map(|h| h.id.as_str()).collect();
    assert_eq!(ids, vec!["doc:000000", "doc:000002"], "shorter chunk wins on length normalization");
    assert!(hits[0].score > hits[1].score);
}

#[test]
fn same_pipeline_at_index_and_query_time() {
    let idx = KeywordIndex::build(Analyzer::default(), Bm25Config::default(), [("c1", "Batuknya BERDAHAK sejak kemarin.")]);
    assert_eq!(idx.search_text("batuk berdahak", 1).len(), 1);
    let tokens = idx.analyzer().tokenize("BATUK");
    assert_eq!(idx.search(&tokens, 1)[0].id, "c1");
}

#[test]
fn artifact_survives_bincode_and_keeps_tokenizer_settings() -> anyhow::Result<()> {
    let analyzer = Analyzer::new(TokenizerConfig { stem: false, ..TokenizerConfig::default() });
    let idx = KeywordIndex::build(analyzer, Bm25Config { k1: 1.2, b: 0.5 }, CORPUS.iter().copied());
    let bytes = bincode::serialize(&idx.to_artifact())?;
    let artifact: KeywordArtifact = bincode::deserialize(&bytes)?;
    assert!(!artifact.tokenizer.stem);
    let restored = KeywordIndex::from_artifact(artifact)?;
    assert_eq!(restored.search_text("demam batuk", 3), idx.search_text("demam batuk", 3));
    assert_eq!(restored.term_count(), idx.term_count());
    Ok(())
}
