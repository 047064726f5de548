// Copyright Kyler Chin <kyler@catenarymaps.org>
// Catenary Transit Initiatives
// Attribution cannot be removed

// Juniper: reconciles per-operator station feeds into canonical interchange
// hubs and spokes, then resynchronises them into Postgres.

use anyhow::{Context, Result};
use clap::Parser;
use interchange::memory_store::InMemoryNodeStore;
use interchange::pg_store::reconcile_postgres;
use interchange::pipeline::{Pipeline, PipelineConfig};
use interchange::postgres_tools::make_async_pool;
use interchange::source::{FileFeedSource, fetch_all};
use interchange::station::StationKind;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};

#[cfg(not(target_env = "msvc"))]
use tikv_jemallocator::Jemalloc;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

#[derive(Parser, Debug)]
#[command(version, about = "Merge co-constructed stations into interchange hubs", long_about = None)]
struct Args {
    /// Pipeline configuration json. Defaults apply when omitted.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Directory holding `{operator}__{kind}.json` feed dumps
    #[arg(long)]
    feeds_dir: PathBuf,
    /// Comma separated operator ids
    #[arg(long, value_delimiter = ',')]
    operators: Vec<String>,
    /// Comma separated kinds: station, bus_stop
    #[arg(long, value_delimiter = ',', default_value = "station")]
    kinds: Vec<StationKind>,
    /// Run against an in-memory store instead of Postgres
    #[arg(long)]
    dry_run: bool,
    #[arg(long, default_value_t = 4)]
    parallelism: usize,
    /// Per-source read timeout
    #[arg(long, default_value_t = 30)]
    timeout_secs: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let args = Args::parse();

    let config = match &args.config {
        Some(path) => PipelineConfig::from_json_file(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => PipelineConfig::default(),
    };

    let pipeline = Pipeline::new(config).context("Invalid pipeline config")?;

    let sources: Vec<FileFeedSource> = args
        .operators
        .iter()
        .flat_map(|operator| {
            args.kinds.iter().map(|&kind| FileFeedSource {
                dir: args.feeds_dir.clone(),
                operator: operator.clone(),
                kind,
                timeout: Some(Duration::from_secs(args.timeout_secs)),
            })
        })
        .collect();

    if sources.is_empty() {
        warn!("no operators given, nothing to fetch");
    }

    let fetched = fetch_all(&sources, args.parallelism).await;

    let output = pipeline.run(&fetched.batches)?;
    let mut summary = output.summary.clone();
    summary.failed_sources = fetched.failed_sources;

    if args.dry_run {
        let mut store = InMemoryNodeStore::default();
        pipeline
            .write_to_store(&mut store, &output, &mut summary)
            .await
            .context("Dry run write failed")?;
        info!("dry run wrote {} nodes", store.nodes().len());
    } else {
        let pool = make_async_pool()
            .await
            .map_err(|e| anyhow::anyhow!(e))
            .context("Failed to connect to Postgres")?;

        let outcomes = reconcile_postgres(
            &pool,
            pipeline.writer(),
            &output.scoped_rows(pipeline.config()),
        )
        .await
        .context("Failed to reconcile interchange nodes")?;

        for outcome in &outcomes {
            summary.record_write(outcome);
        }
    }

    println!("{}", serde_json::to_string_pretty(&summary)?);

    Ok(())
}
