//! URL interning: one surrogate id per distinct URL string.

use std::collections::HashMap;

use tracing::instrument;

use crate::db::Db;
use crate::error::NormalizeError;

/// Resolves a URL string to its `urls.id`, creating the row on first use.
///
/// The insert and the existing-row lookup are a single statement: `ON
/// CONFLICT (url) DO UPDATE SET url = excluded.url RETURNING id` always
/// returns exactly one id, so concurrent loaders racing on the same URL
/// serialize on the unique constraint instead of duplicating rows. Inserts
/// autocommit outside any batch transaction; a later batch rollback can at
/// worst leave an unreferenced URL row behind, never a dangling reference,
/// which is why the in-memory cache is safe to keep for the whole run.
pub struct UrlInterner {
    cache: HashMap<String, i64>,
}

impl UrlInterner {
    pub fn new() -> Self {
        Self {
            cache: HashMap::new(),
        }
    }

    #[instrument(skip(self, db, url))]
    pub async fn resolve(&mut self, db: &Db, url: &str) -> Result<i64, NormalizeError> {
        if let Some(&id) = self.cache.get(url) {
            return Ok(id);
        }
        let id: Option<i64> = sqlx::query_scalar(
            "INSERT INTO urls (url) VALUES ($1) \
             ON CONFLICT (url) DO UPDATE SET url = excluded.url \
             RETURNING id",
        )
        .bind(url)
        .persistent(false)
        .fetch_optional(&db.pool)
        .await
        .map_err(|source| NormalizeError::Intern {
            url: url.to_owned(),
            source,
        })?;
        let id = id.ok_or_else(|| NormalizeError::InternIntegrity {
            url: url.to_owned(),
        })?;
        self.cache.insert(url.to_owned(), id);
        Ok(id)
    }

    /// Distinct URLs resolved so far (cache size).
    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }
}

impl Default for UrlInterner {
    fn default() -> Self {
        Self::new()
    }
}
