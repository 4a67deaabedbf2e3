//! Postgres connection handle.

use std::str::FromStr;
use std::time::Duration;

use anyhow::Result;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions, PgSslMode};
use sqlx::{PgPool, Row};
use tracing::{info, instrument};

#[derive(Clone)]
pub struct Db {
    pub pool: PgPool,
}

impl Db {
    // SECURITY: never include raw DSNs in tracing spans (they may contain credentials).
    #[instrument(skip(database_url, application_name))]
    pub async fn connect(
        database_url: &str,
        max_connections: u32,
        application_name: &str,
    ) -> Result<Self> {
        let mut connect_options = PgConnectOptions::from_str(database_url)?
            .application_name(application_name)
            // PgBouncer txn mode safe: our statements are dynamic anyway.
            .statement_cache_capacity(0);

        // Ensure TLS is enabled when the DSN asks for it.
        if database_url.contains("sslmode=require") && !database_url.contains("sslmode=disable") {
            connect_options = connect_options.ssl_mode(PgSslMode::Require);
        }

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(10))
            .idle_timeout(Duration::from_secs(600))
            .connect_with(connect_options)
            .await?;
        info!("connected to db");
        Ok(Self { pool })
    }

    /// Apply pending `./migrations/NNNN_description.sql` files in version
    /// order, tracked in `_tweetload_migrations`. Non-numeric filenames are
    /// ignored.
    pub async fn run_migrations(&self) -> Result<()> {
        use std::{fs, path::Path};
        let dir = Path::new("./migrations");
        if !dir.exists() {
            return Ok(());
        }
        sqlx::raw_sql(
            "CREATE TABLE IF NOT EXISTS _tweetload_migrations (
                version BIGINT PRIMARY KEY,
                description TEXT,
                installed_at TIMESTAMPTZ DEFAULT now()
             )",
        )
        .execute(&self.pool)
        .await?;

        let applied_rows = sqlx::raw_sql("SELECT version FROM _tweetload_migrations")
            .fetch_all(&self.pool)
            .await?;
        let mut applied = std::collections::HashSet::new();
        for row in applied_rows {
            applied.insert(row.try_get::<i64, _>(0)?);
        }

        let mut candidates: Vec<(i64, String, std::path::PathBuf)> = Vec::new();
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            if !path.is_file() {
                continue;
            }
            let Some(fname) = path.file_name().and_then(|s| s.to_str()) else {
                continue;
            };
            if !fname.ends_with(".sql") {
                continue;
            }
            let num_str: String = fname.chars().take_while(|c| c.is_ascii_digit()).collect();
            let Ok(version) = num_str.parse::<i64>() else {
                continue;
            };
            let desc = fname
                .strip_prefix(&num_str)
                .and_then(|s| s.strip_prefix('_'))
                .map(|s| s.trim_end_matches(".sql").to_owned())
                .unwrap_or_default();
            candidates.push((version, desc, path));
        }
        candidates.sort_by_key(|(version, _, _)| *version);

        for (version, desc, path) in candidates {
            if applied.contains(&version) {
                continue;
            }
            let sql = fs::read_to_string(&path)?;
            info!(version, file = ?path, "applying migration");
            sqlx::raw_sql(&sql).execute(&self.pool).await?;
            let desc_escaped = desc.replace('\'', "''");
            let stmt = format!(
                "INSERT INTO _tweetload_migrations(version, description) VALUES ({}, '{}')",
                version, desc_escaped
            );
            sqlx::raw_sql(&stmt).execute(&self.pool).await?;
            applied.insert(version);
        }
        Ok(())
    }
}
