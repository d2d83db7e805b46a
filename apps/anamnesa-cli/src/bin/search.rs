use std::env;

use anamnesa_cli::{init_tracing, App};
use anamnesa_core::types::RetrievalContext;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        eprintln!("Usage: {} <query> [k] [anamnesis|diagnosis|general]", args[0]);
        eprintln!("Example: {} 'demam dan batuk' 10 anamnesis", args[0]);
        std::process::exit(1);
    }
    let query = &args[1];
    let k = args.get(2).and_then(|s| s.parse().ok()).unwrap_or(10);
    let context: RetrievalContext = match args.get(3) {
        Some(s) => s.parse()?,
        None => RetrievalContext::default(),
    };

    let app = App::load()?;
    init_tracing(&app.settings.logging.filter);
    let service = app.service().await?;
    let engine = service.engine();
    let stats = engine.snapshot().stats();

    println!("anamnesa-search\n===============");
    println!("Query: {query}");
    println!(
        "Snapshot: {} ({} chunks, {} vectors, {} terms, strategy {:?})",
        stats.corpus_version,
        stats.chunks,
        stats.vectors,
        stats.keyword_terms,
        engine.fusion_config().strategy
    );

    let results = engine.query(query, k, context).await?;
    println!("\nFound {} results for \"{}\" [{}]", results.len(), query, context);
    for (i, r) in results.iter().enumerate() {
        let s = &r.source_scores;
        println!(
            "\n  {}. score={:.4}  vector={}  keyword={}  [{}] {}",
            i + 1,
            r.score,
            s.vector_rank.map_or("-".to_string(), |rank| format!("#{rank} {:.4}", s.vector_score.unwrap_or(0.0))),
            s.keyword_rank.map_or("-".to_string(), |rank| format!("#{rank} {:.4}", s.keyword_score.unwrap_or(0.0))),
            r.source_type.label(),
            r.metadata.display_title(),
        );
        println!("     chunk={}", r.chunk_id);
        if !s.matched_terms.is_empty() {
            println!("     matched: {}", s.matched_terms.join(", "));
        }
        println!("     {}", r.content_preview.replace('\n', " "));
    }

    let es = engine.stats();
    println!(
        "\nEngine: {} searches, avg vector {:.2} ms, keyword {:.2} ms, fusion {:.3} ms, total {:.2} ms",
        es.total_searches, es.avg_vector_ms, es.avg_keyword_ms, es.avg_fusion_ms, es.avg_total_ms
    );
    Ok(())
}
