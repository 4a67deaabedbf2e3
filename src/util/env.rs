//! Environment helpers: centralized dotenv loading and ergonomic getters.

use std::str::FromStr;
use std::sync::Once;

static INIT: Once = Once::new();

/// Load .env if present, exactly once. Safe to call many times.
pub fn init_env() {
    INIT.call_once(|| {
        let _ = dotenv::dotenv();
    });
}

/// Resolve the Postgres DSN from the environment.
pub fn db_url() -> anyhow::Result<String> {
    init_env();
    std::env::var("DATABASE_URL").map_err(|_| anyhow::anyhow!("missing env var DATABASE_URL"))
}

/// Get parsed value with default fallback.
pub fn env_parse<T>(key: &str, default: T) -> T
where
    T: FromStr,
{
    init_env();
    match std::env::var(key) {
        Ok(raw) => raw.parse::<T>().unwrap_or(default),
        Err(_) => default,
    }
}
