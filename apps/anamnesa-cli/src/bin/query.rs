//! JSON query endpoint for the UI layer.
//!
//! Usage: `anamnesa-query <query> [max_docs] [context]`. Prints one
//! `RetrievalResponse` on stdout and always exits 0; failures are reported
//! inside the JSON body.
use std::env;

use anamnesa_cli::{init_tracing, parse_query_args, App};
use anamnesa_core::config::FacadeConfig;
use anamnesa_hybrid::{RetrievalRequest, RetrievalResponse};

async fn run(args: &[String]) -> RetrievalResponse {
    let request = match parse_query_args(args) {
        Ok(request) => request,
        Err(message) => {
            eprintln!("Error: {message}");
            let request = RetrievalRequest { query: args.first().cloned().unwrap_or_default(), ..RetrievalRequest::default() };
            return RetrievalResponse::failed(&request, "invalid_arguments", &FacadeConfig::default().apology_message, 0);
        }
    };
    let app = match App::load() {
        Ok(app) => app,
        Err(e) => {
            eprintln!("Error loading config: {e:#}");
            return RetrievalResponse::failed(&request, "configuration", &FacadeConfig::default().apology_message, 0);
        }
    };
    init_tracing(&app.settings.logging.filter);
    app.answer(request).await
}

#[tokio::main]
async fn main() {
    let args: Vec<String> = env::args().skip(1).collect();
    let response = run(&args).await;
    match serde_json::to_string(&response) {
        Ok(body) => println!("{body}"),
        Err(e) => println!("{{\"error\":true,\"error_kind\":\"serialization\",\"message\":{:?}}}", e.to_string()),
    }
}
