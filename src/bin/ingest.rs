use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use tweetload::db::Db;
use tweetload::pipeline::{self, IngestOptions, OnError};
use tweetload::util::env as env_util;

#[derive(Parser, Debug)]
#[command(
    name = "ingest",
    version,
    about = "Load zipped tweet archives into Postgres"
)]
struct Cli {
    /// Input zip archives of newline-delimited tweet JSON
    #[arg(required = true)]
    inputs: Vec<PathBuf>,

    /// Postgres DSN (falls back to DATABASE_URL)
    #[arg(long)]
    db_url: Option<String>,

    /// Records per transaction
    #[arg(long, default_value_t = 1000)]
    batch_size: usize,

    /// Emit a progress line every N committed records
    #[arg(long, default_value_t = 1000)]
    progress_every: usize,

    /// What to do with a malformed record
    #[arg(long, value_enum, default_value = "fail")]
    on_error: OnError,

    /// Maximum pool connections
    #[arg(long, default_value_t = 4)]
    max_connections: u32,

    /// Apply pending migrations before loading
    #[arg(long, default_value_t = false)]
    migrate: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_util::init_env();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let db_url = match cli.db_url.clone() {
        Some(url) => url,
        None => env_util::db_url().context("no --db-url given")?,
    };

    // Tag the session so the load is identifiable in pg_stat_activity.
    let app_name = format!(
        "ingest {}",
        cli.inputs
            .iter()
            .map(|p| p.display().to_string())
            .collect::<Vec<_>>()
            .join(" ")
    );
    let db = Db::connect(&db_url, cli.max_connections, &app_name).await?;
    if cli.migrate {
        db.run_migrations().await.context("running migrations")?;
    }

    let opts = IngestOptions {
        batch_size: cli.batch_size,
        progress_every: cli.progress_every,
        on_error: cli.on_error,
    };
    let stats = pipeline::run(&db, &cli.inputs, &opts).await?;
    info!(
        archives = stats.archives,
        members = stats.members,
        records = stats.records,
        skipped = stats.skipped,
        batches = stats.batches,
        "done"
    );
    Ok(())
}
