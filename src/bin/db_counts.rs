use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use tweetload::db::Db;
use tweetload::util::env as env_util;

const TABLES: [&str; 7] = [
    "urls",
    "users",
    "tweets",
    "tweet_urls",
    "tweet_mentions",
    "tweet_tags",
    "tweet_media",
];

#[derive(Parser, Debug)]
#[command(
    name = "db_counts",
    version,
    about = "Print row counts for the loader's tables"
)]
struct Cli {
    /// Optional override for the database URL
    #[arg(long)]
    db_url: Option<String>,
}

fn is_undefined_table_error(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.code().as_deref() == Some("42P01"),
        _ => false,
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    env_util::init_env();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let db_url = match cli.db_url {
        Some(url) => url,
        None => env_util::db_url()?,
    };
    let db = Db::connect(&db_url, env_util::env_parse("DB_MAX_CONNS", 2), "db_counts").await?;

    for table in TABLES {
        let sql = format!("SELECT count(*) FROM {table}");
        let count = match sqlx::query_scalar::<_, i64>(&sql)
            .persistent(false)
            .fetch_one(&db.pool)
            .await
        {
            Ok(val) => val,
            // Missing table reads as zero rows; useful before first migrate.
            Err(e) if is_undefined_table_error(&e) => 0,
            Err(e) => return Err(e.into()),
        };
        println!("{table:>16} {count}");
    }
    Ok(())
}
