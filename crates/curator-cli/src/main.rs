//! curator — arXiv paper ingestion.
//! Entry point for the command-line binary.

mod cli;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use curator_config::Config;
use curator_ingestion::pipeline::PipelineOptions;
use curator_ingestion::repository::PaperStore;
use curator_ingestion::services::ServiceCache;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use cli::{Cli, Command, IngestArgs};

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    let default_filter = if cli.quiet {
        "warn"
    } else if cli.verbose {
        "curator_ingestion=debug,curator_cli=debug,info"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)))
        .with_writer(std::io::stderr)
        .init();

    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    let config = Config::load().context("could not load curator.toml")?;
    let services = ServiceCache::new(config);

    match cli.command {
        Command::Ingest(args) => ingest(&services, &args).await,
        Command::InitIndex { force } => init_index(&services, force).await,
        Command::Stats => stats(&services).await,
    }
}

async fn ingest(services: &ServiceCache, args: &IngestArgs) -> Result<()> {
    let range = args.date_range(Utc::now().date_naive())?;

    let mut options = PipelineOptions::from_config(services.config());
    options.fetch_content = !args.no_pdfs;
    options.persist = !args.no_store;
    options.index = args.index;
    options.use_cache = !args.no_cache;
    if let Some(n) = args.max_results {
        options.max_results = n;
    }

    if options.index {
        let opensearch = services.opensearch().await?;
        if !opensearch.health_check().await {
            warn!("OpenSearch is not healthy; index stage failures are likely");
        }
        opensearch.create_index(false).await.context("could not prepare search index")?;
    }

    let pipeline = services.pipeline(&options).await?;
    let report = pipeline.run(&range, &options).await?;

    println!("{}", serde_json::to_string_pretty(&report)?);
    if !report.is_clean() {
        warn!(errors = report.errors.len(), "Ingestion finished with errors");
    }
    Ok(())
}

async fn init_index(services: &ServiceCache, force: bool) -> Result<()> {
    let opensearch = services.opensearch().await?;
    let created = opensearch.create_index(force).await?;
    if created {
        info!(index = opensearch.index_name(), "Index created");
    } else {
        info!(index = opensearch.index_name(), "Index already exists (use --force to recreate)");
    }
    Ok(())
}

async fn stats(services: &ServiceCache) -> Result<()> {
    let store = services.store().await?;
    let total = store.count().await?;
    let processed = store.processed_count().await?;

    let mut out = serde_json::json!({
        "papers": total,
        "pdf_processed": processed,
    });

    let opensearch = services.opensearch().await?;
    if opensearch.health_check().await {
        match opensearch.document_count().await {
            Ok(n) => out["indexed"] = n.into(),
            Err(e) => warn!(error = %e, "Could not count indexed documents"),
        }
    }

    println!("{}", serde_json::to_string_pretty(&out)?);
    Ok(())
}
