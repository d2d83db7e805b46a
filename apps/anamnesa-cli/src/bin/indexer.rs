use std::env;

use anamnesa_cli::{init_tracing, App};
use anamnesa_hybrid::{RebuildOutcome, RetrievalService};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let app = App::load().map_err(|e| {
        eprintln!("Error loading config: {e:#}");
        e
    })?;
    init_tracing(&app.settings.logging.filter);

    let args: Vec<String> = env::args().skip(1).collect();
    let mut force = false;
    for arg in &args {
        match arg.as_str() {
            "--force" | "-f" => force = true,
            "--help" | "-h" => {
                eprintln!("Usage: anamnesa-indexer [--force]");
                eprintln!("  --force  rebuild even if a snapshot for the current corpus exists");
                return Ok(());
            }
            other => {
                eprintln!("Error: unknown argument '{other}'");
                std::process::exit(1);
            }
        }
    }

    let store = app.store();
    let sources = app.sources();
    eprintln!("Anamnesa Indexer\n================");
    eprintln!("Snapshot directory: {}", store.root().display());
    eprintln!("Sources: {}", sources.len());

    if force {
        let builder = app.builder(true)?;
        let (snapshot, report) = builder.build(&sources).await?;
        store.save(&snapshot)?;
        store.prune(app.settings.data.keep_snapshots)?;
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    let service = RetrievalService::load(app.builder(true)?, store, sources).await?;
    match service.rebuild().await? {
        RebuildOutcome::Built(report) => println!("{}", serde_json::to_string_pretty(&report)?),
        RebuildOutcome::Reused(version) => {
            eprintln!("Corpus unchanged, snapshot {version} is current");
            println!("{}", serde_json::to_string_pretty(&service.engine().snapshot().stats())?);
        }
    }
    Ok(())
}
