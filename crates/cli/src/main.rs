//! Knowledge engine command-line entry point
//!
//! Ingests the given files into a knowledge base and prints the hybrid query
//! response as JSON.
//!
//! Usage: `knowledge-engine [--kb <id>] <query> <file>...`

use anyhow::{bail, Context};
use std::path::Path;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, Layer};

use knowledge_engine_config::{load_settings, Settings};
use knowledge_engine_rag::{IngestOptions, KnowledgeEngine, QueryOptions};

const USAGE: &str = "Usage: knowledge-engine [--kb <id>] <query> <file>...";

struct CliArgs {
    knowledge_base_id: Option<String>,
    query: String,
    files: Vec<String>,
}

fn parse_args(args: impl IntoIterator<Item = String>) -> anyhow::Result<CliArgs> {
    let mut knowledge_base_id = None;
    let mut positional = Vec::new();

    let mut args = args.into_iter();
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--kb" => {
                let id = args.next().context("--kb requires a knowledge base id")?;
                knowledge_base_id = Some(id);
            },
            "-h" | "--help" => bail!(USAGE),
            _ => positional.push(arg),
        }
    }

    if positional.len() < 2 {
        bail!(USAGE);
    }
    let query = positional.remove(0);

    Ok(CliArgs {
        knowledge_base_id,
        query,
        files: positional,
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Priority: env vars > config/{env}.yaml > config/default.yaml > defaults
    let env = std::env::var("KNOWLEDGE_ENGINE_ENV").ok();
    let settings = match load_settings(env.as_deref()) {
        Ok(settings) => settings,
        Err(e) => {
            // Tracing not yet initialized
            eprintln!("Warning: Failed to load config: {}. Using defaults.", e);
            Settings::default()
        },
    };

    init_tracing(&settings);

    let args = parse_args(std::env::args().skip(1))?;
    let knowledge_base_id = args
        .knowledge_base_id
        .unwrap_or_else(|| settings.rag.default_knowledge_base.clone());

    tracing::info!(
        environment = ?settings.environment,
        knowledge_base_id = %knowledge_base_id,
        files = args.files.len(),
        "Starting knowledge engine v{}",
        env!("CARGO_PKG_VERSION")
    );

    let engine = KnowledgeEngine::from_settings(&settings)
        .context("failed to initialize knowledge engine")?;

    let options = IngestOptions::for_knowledge_base(knowledge_base_id.clone());
    for file in &args.files {
        let bytes = std::fs::read(file).with_context(|| format!("failed to read {}", file))?;
        let filename = Path::new(file)
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or(file.as_str());

        let outcome = engine.ingest_document(&bytes, filename, &options).await;
        if outcome.success {
            tracing::info!(source = filename, chunks = outcome.chunk_count, "Ingested");
        } else {
            eprintln!("{}", serde_json::to_string_pretty(&outcome)?);
        }
    }

    let response = engine
        .query_knowledge_base(&knowledge_base_id, &args.query, &QueryOptions::default())
        .await
        .with_context(|| format!("query against '{}' failed", knowledge_base_id))?;

    if response.is_partial() {
        tracing::warn!(degraded = ?response.degraded, "Partial results");
    }
    println!("{}", serde_json::to_string_pretty(&response)?);

    Ok(())
}

fn init_tracing(settings: &Settings) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = &settings.observability.log_level;
        format!("knowledge_engine_rag={},knowledge_engine_cli={}", level, level).into()
    });

    let subscriber = tracing_subscriber::registry().with(env_filter);
    let fmt_layer = if settings.observability.log_json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .boxed()
    };
    subscriber.with(fmt_layer).init();
}
