//! Error taxonomy for the load pipeline.
//!
//! Statement and record errors are typed so callers (and the skip/fail
//! policy) can tell data faults apart from store faults. Everything else
//! rides on `anyhow` at the orchestration level.

use thiserror::Error;

/// Fatal input errors raised by the bulk statement builder.
///
/// Both variants indicate a malformed batch upstream, never bad source data:
/// callers are expected to filter empty draft lists before building, and
/// drafts for one relation always render the same column set.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum StatementError {
    #[error("no rows supplied for bulk insert into {table}")]
    Empty { table: String },
    #[error("rows for bulk insert into {table} disagree on column set")]
    ShapeMismatch { table: String },
}

/// A structural fault in one raw input record.
#[derive(Debug, Error)]
pub enum RecordError {
    #[error("{member}:{line}: record is not valid JSON: {source}")]
    Json {
        member: String,
        line: u64,
        #[source]
        source: serde_json::Error,
    },
}

/// Faults raised while normalizing one parsed record.
#[derive(Debug, Error)]
pub enum NormalizeError {
    /// A data fault confined to the record; eligible for skip-and-log.
    #[error("unparseable timestamp {value:?}")]
    Timestamp {
        value: String,
        #[source]
        source: chrono::ParseError,
    },
    /// Store failure while interning a URL; never skippable.
    #[error("url interning failed for {url:?}")]
    Intern {
        url: String,
        #[source]
        source: sqlx::Error,
    },
    /// Interning found neither an inserted nor an existing row. The unique
    /// constraint on `urls.url` makes this unreachable; seeing it means the
    /// store is in an inconsistent state.
    #[error("url {url:?} missing after insert and lookup; urls table integrity fault")]
    InternIntegrity { url: String },
}

impl NormalizeError {
    /// Whether the skip-and-log policy may apply to this fault. Store
    /// failures always abort regardless of policy.
    pub fn is_record_fault(&self) -> bool {
        matches!(self, NormalizeError::Timestamp { .. })
    }
}
