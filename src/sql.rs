//! Conflict-suppressed multi-row insert statements.
//!
//! Every insert in the pipeline goes through `INSERT .. VALUES .. ON CONFLICT
//! DO NOTHING` so reprocessing an already-loaded archive is a no-op. The
//! generic builder handles any relation whose columns are plain binds; the
//! `tweets` relation needs a computed geometry expression and gets its own
//! statement path.

use std::fmt::Write as _;

use chrono::{DateTime, Utc};
use sqlx::postgres::PgArguments;
use sqlx::query::Query;
use sqlx::{Postgres, Transaction};

use crate::error::StatementError;

/// One owned bind value. Every variant is nullable so a draft can render
/// NULL without losing the Postgres type of the placeholder.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    BigInt(Option<i64>),
    Int(Option<i32>),
    Bool(Option<bool>),
    Text(Option<String>),
    TextArray(Option<Vec<String>>),
    Timestamp(Option<DateTime<Utc>>),
}

impl From<i64> for SqlValue {
    fn from(v: i64) -> Self {
        SqlValue::BigInt(Some(v))
    }
}

impl From<Option<i64>> for SqlValue {
    fn from(v: Option<i64>) -> Self {
        SqlValue::BigInt(v)
    }
}

impl From<i32> for SqlValue {
    fn from(v: i32) -> Self {
        SqlValue::Int(Some(v))
    }
}

impl From<Option<i32>> for SqlValue {
    fn from(v: Option<i32>) -> Self {
        SqlValue::Int(v)
    }
}

impl From<bool> for SqlValue {
    fn from(v: bool) -> Self {
        SqlValue::Bool(Some(v))
    }
}

impl From<Option<bool>> for SqlValue {
    fn from(v: Option<bool>) -> Self {
        SqlValue::Bool(v)
    }
}

impl From<String> for SqlValue {
    fn from(v: String) -> Self {
        SqlValue::Text(Some(v))
    }
}

impl From<Option<String>> for SqlValue {
    fn from(v: Option<String>) -> Self {
        SqlValue::Text(v)
    }
}

impl From<&str> for SqlValue {
    fn from(v: &str) -> Self {
        SqlValue::Text(Some(v.to_owned()))
    }
}

impl From<Option<Vec<String>>> for SqlValue {
    fn from(v: Option<Vec<String>>) -> Self {
        SqlValue::TextArray(v)
    }
}

impl From<DateTime<Utc>> for SqlValue {
    fn from(v: DateTime<Utc>) -> Self {
        SqlValue::Timestamp(Some(v))
    }
}

impl From<Option<DateTime<Utc>>> for SqlValue {
    fn from(v: Option<DateTime<Utc>>) -> Self {
        SqlValue::Timestamp(v)
    }
}

/// An ordered column/value list for one future row. Column order is the
/// order of `col` calls, so drafts of the same relation always render the
/// same shape and the generated statement text is reproducible.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row {
    cols: Vec<(&'static str, SqlValue)>,
}

impl Row {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn col(mut self, name: &'static str, value: impl Into<SqlValue>) -> Self {
        self.cols.push((name, value.into()));
        self
    }

    fn columns(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.cols.iter().map(|(name, _)| *name)
    }
}

/// Build one parameterized multi-row insert with conflict suppression.
///
/// Returns the statement text and the bind values in placeholder order
/// (row-major, `$1` upward, one distinct placeholder per value). An empty
/// row list and rows that disagree on their column set are both fatal input
/// errors: they mean the batch was malformed upstream, and silently doing
/// nothing would hide the bug.
pub fn bulk_insert_sql(table: &str, rows: &[Row]) -> Result<(String, Vec<SqlValue>), StatementError> {
    let first = rows.first().ok_or_else(|| StatementError::Empty {
        table: table.to_owned(),
    })?;
    let columns: Vec<&'static str> = first.columns().collect();
    for row in rows {
        if !row.columns().eq(columns.iter().copied()) {
            return Err(StatementError::ShapeMismatch {
                table: table.to_owned(),
            });
        }
    }

    let mut sql = String::with_capacity(64 + rows.len() * columns.len() * 5);
    sql.push_str("INSERT INTO ");
    sql.push_str(table);
    sql.push_str(" (");
    sql.push_str(&columns.join(","));
    sql.push_str(") VALUES ");

    let mut binds = Vec::with_capacity(rows.len() * columns.len());
    let mut placeholder = 1usize;
    for (i, row) in rows.iter().enumerate() {
        if i > 0 {
            sql.push(',');
        }
        sql.push('(');
        for (j, (_, value)) in row.cols.iter().enumerate() {
            if j > 0 {
                sql.push(',');
            }
            write!(sql, "${placeholder}").expect("write to String");
            binds.push(value.clone());
            placeholder += 1;
        }
        sql.push(')');
    }
    sql.push_str(" ON CONFLICT DO NOTHING");
    Ok((sql, binds))
}

fn bind_value<'q>(
    query: Query<'q, Postgres, PgArguments>,
    value: SqlValue,
) -> Query<'q, Postgres, PgArguments> {
    match value {
        SqlValue::BigInt(v) => query.bind(v),
        SqlValue::Int(v) => query.bind(v),
        SqlValue::Bool(v) => query.bind(v),
        SqlValue::Text(v) => query.bind(v),
        SqlValue::TextArray(v) => query.bind(v),
        SqlValue::Timestamp(v) => query.bind(v),
    }
}

/// Execute one multi-row conflict-suppressed insert inside `tx`.
///
/// An empty row list is a no-op at this call level; the statement builder
/// itself stays strict. `.persistent(false)` keeps the dynamic statement out
/// of the prepared-statement cache (PgBouncer-safe).
pub async fn bulk_insert(
    tx: &mut Transaction<'_, Postgres>,
    table: &str,
    rows: &[Row],
) -> anyhow::Result<()> {
    if rows.is_empty() {
        return Ok(());
    }
    let (sql, binds) = bulk_insert_sql(table, rows)?;
    let mut query = sqlx::query(&sql);
    for value in binds {
        query = bind_value(query, value);
    }
    query.persistent(false).execute(&mut **tx).await?;
    Ok(())
}

/// Binds per tweet row: 18 columns, with `geo` consuming two parameters
/// (geometry tag and coordinate text).
pub const TWEET_BIND_COUNT: usize = 19;

/// Multi-row insert for `tweets`.
///
/// The `geo` column is computed server-side as
/// `ST_GeomFromText(tag || '(' || coords || ')')`; when a tweet carries no
/// geometry both parameters bind NULL and the concatenation collapses the
/// whole expression to NULL.
pub fn tweet_insert_sql(rows: usize) -> Result<String, StatementError> {
    if rows == 0 {
        return Err(StatementError::Empty {
            table: "tweets".to_owned(),
        });
    }
    let mut sql = String::from(
        "INSERT INTO tweets \
         (id,user_id,created_at,in_reply_to_status_id,in_reply_to_user_id,quoted_status_id,\
         geo,retweet_count,quote_count,favorite_count,withheld_copyright,withheld_in_countries,\
         place_name,country_code,state_code,lang,text,source) VALUES ",
    );
    for i in 0..rows {
        if i > 0 {
            sql.push(',');
        }
        let p = |k: usize| i * TWEET_BIND_COUNT + k;
        write!(
            sql,
            "(${},${},${},${},${},${},ST_GeomFromText(${} || '(' || ${} || ')')",
            p(1),
            p(2),
            p(3),
            p(4),
            p(5),
            p(6),
            p(7),
            p(8),
        )
        .expect("write to String");
        for k in 9..=TWEET_BIND_COUNT {
            write!(sql, ",${}", p(k)).expect("write to String");
        }
        sql.push(')');
    }
    sql.push_str(" ON CONFLICT DO NOTHING");
    Ok(sql)
}

/// Execute the specialized tweet insert for pre-rendered bind vectors, each
/// exactly `TWEET_BIND_COUNT` values long.
pub async fn insert_tweets(
    tx: &mut Transaction<'_, Postgres>,
    rows: Vec<Vec<SqlValue>>,
) -> anyhow::Result<()> {
    if rows.is_empty() {
        return Ok(());
    }
    debug_assert!(rows.iter().all(|r| r.len() == TWEET_BIND_COUNT));
    let sql = tweet_insert_sql(rows.len())?;
    let mut query = sqlx::query(&sql);
    for value in rows.into_iter().flatten() {
        query = bind_value(query, value);
    }
    query.persistent(false).execute(&mut **tx).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_row_statement() {
        let rows = vec![Row::new().col("message", "hello world").col("id", 5i64)];
        let (sql, binds) = bulk_insert_sql("test", &rows).unwrap();
        assert_eq!(
            sql,
            "INSERT INTO test (message,id) VALUES ($1,$2) ON CONFLICT DO NOTHING"
        );
        assert_eq!(
            binds,
            vec![
                SqlValue::Text(Some("hello world".to_owned())),
                SqlValue::BigInt(Some(5)),
            ]
        );
    }

    #[test]
    fn two_rows_get_distinct_placeholders() {
        let rows = vec![
            Row::new().col("message", "hello world").col("id", 5i64),
            Row::new().col("message", "goodbye world").col("id", 6i64),
        ];
        let (sql, binds) = bulk_insert_sql("test", &rows).unwrap();
        assert_eq!(
            sql,
            "INSERT INTO test (message,id) VALUES ($1,$2),($3,$4) ON CONFLICT DO NOTHING"
        );
        assert_eq!(binds.len(), 4);
        assert_eq!(binds[2], SqlValue::Text(Some("goodbye world".to_owned())));
        assert_eq!(binds[3], SqlValue::BigInt(Some(6)));
    }

    #[test]
    fn statement_text_is_reproducible() {
        let rows = vec![Row::new().col("a", 1i64).col("b", 2i64)];
        let (first, _) = bulk_insert_sql("t", &rows).unwrap();
        let (second, _) = bulk_insert_sql("t", &rows).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn mismatched_columns_are_rejected() {
        let rows = vec![
            Row::new().col("message", "hello world").col("id", 5i64),
            Row::new().col("id", 6i64),
        ];
        let err = bulk_insert_sql("test", &rows).unwrap_err();
        assert_eq!(
            err,
            StatementError::ShapeMismatch {
                table: "test".to_owned()
            }
        );
    }

    #[test]
    fn empty_input_is_rejected() {
        let err = bulk_insert_sql("test", &[]).unwrap_err();
        assert_eq!(
            err,
            StatementError::Empty {
                table: "test".to_owned()
            }
        );
    }

    #[test]
    fn tweet_statement_computes_geometry() {
        let sql = tweet_insert_sql(1).unwrap();
        assert!(sql.starts_with("INSERT INTO tweets (id,user_id,created_at,"));
        assert!(sql.contains("ST_GeomFromText($7 || '(' || $8 || ')')"));
        assert!(sql.ends_with("ON CONFLICT DO NOTHING"));
    }

    #[test]
    fn tweet_statement_offsets_later_rows() {
        let sql = tweet_insert_sql(2).unwrap();
        // Second row starts one full bind block further along.
        assert!(sql.contains(",($20,$21,"));
        assert!(sql.contains("ST_GeomFromText($26 || '(' || $27 || ')')"));
        assert!(sql.ends_with(",$36,$37,$38) ON CONFLICT DO NOTHING"));
    }

    #[test]
    fn tweet_statement_rejects_empty_batch() {
        assert!(matches!(
            tweet_insert_sql(0),
            Err(StatementError::Empty { .. })
        ));
    }
}
