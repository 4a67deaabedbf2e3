//! End-to-end load: archives → records → batches → transactions.

use std::io::{BufRead, Read, Seek};
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::ValueEnum;
use itertools::Itertools;
use tracing::{info, warn};

use crate::archive::Archive;
use crate::batch::chunked;
use crate::db::Db;
use crate::error::RecordError;
use crate::interner::UrlInterner;
use crate::model::Tweet;
use crate::normalize::normalize;
use crate::writer::{write_batch, RowSet};

/// What to do with a record that cannot be parsed or normalized. Store
/// failures always abort regardless of this policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OnError {
    /// Abort the load at the offending record.
    Fail,
    /// Log the record's source position and continue.
    Skip,
}

#[derive(Debug, Clone)]
pub struct IngestOptions {
    /// Records per transaction.
    pub batch_size: usize,
    /// Emit a progress line every this many committed records.
    pub progress_every: usize,
    pub on_error: OnError,
}

impl Default for IngestOptions {
    fn default() -> Self {
        Self {
            batch_size: 1000,
            progress_every: 1000,
            on_error: OnError::Fail,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct IngestStats {
    pub archives: usize,
    pub members: usize,
    /// Records committed.
    pub records: usize,
    /// Records dropped under the skip policy.
    pub skipped: usize,
    pub batches: usize,
}

/// Load every archive in `inputs`.
///
/// Archives, and members within an archive, are processed in
/// reverse-lexicographic name order: newer exports tend to sort last, and
/// loading them first means the bulk of later author rows are conflict
/// no-ops instead of fresh inserts. Ordering is a throughput policy only;
/// correctness never depends on it.
pub async fn run(db: &Db, inputs: &[PathBuf], opts: &IngestOptions) -> Result<IngestStats> {
    let mut stats = IngestStats::default();
    let mut interner = UrlInterner::new();
    let mut progress_marker = 0usize;

    for path in inputs.iter().sorted().rev() {
        info!(archive = %path.display(), "loading archive");
        let mut archive = Archive::open(path)?;
        stats.archives += 1;
        for member in archive.member_names() {
            info!(member = %member, "loading member");
            stats.members += 1;
            let records = parse_member(&mut archive, &member, opts.on_error, &mut stats)?;
            for (batch_idx, chunk) in chunked(records, opts.batch_size).enumerate() {
                let mut rows = RowSet::default();
                for tweet in &chunk {
                    match normalize(db, &mut interner, tweet).await {
                        Ok(normalized) => rows.push(&normalized),
                        Err(err) if err.is_record_fault() && opts.on_error == OnError::Skip => {
                            warn!(member = %member, tweet = tweet.id, error = %err, "skipping unnormalizable record");
                            stats.skipped += 1;
                        }
                        Err(err) => {
                            return Err(err).with_context(|| {
                                format!("normalizing tweet {} from {member}", tweet.id)
                            });
                        }
                    }
                }
                let committed = rows.records();
                write_batch(db, rows)
                    .await
                    .with_context(|| format!("writing batch {batch_idx} of {member}"))?;
                stats.batches += 1;
                stats.records += committed;
                if opts.progress_every > 0 && stats.records / opts.progress_every > progress_marker {
                    progress_marker = stats.records / opts.progress_every;
                    info!(
                        records = stats.records,
                        skipped = stats.skipped,
                        urls = interner.len(),
                        "progress"
                    );
                }
            }
        }
    }

    info!(
        archives = stats.archives,
        members = stats.members,
        records = stats.records,
        skipped = stats.skipped,
        batches = stats.batches,
        "load complete"
    );
    Ok(stats)
}

fn parse_member<R: Read + Seek>(
    archive: &mut Archive<R>,
    member: &str,
    on_error: OnError,
    stats: &mut IngestStats,
) -> Result<Vec<Tweet>> {
    let reader = archive.member_reader(member)?;
    let mut records = Vec::new();
    for (idx, line) in reader.lines().enumerate() {
        let line = line.with_context(|| format!("reading {member}"))?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<Tweet>(&line) {
            Ok(tweet) => records.push(tweet),
            Err(source) => {
                let err = RecordError::Json {
                    member: member.to_owned(),
                    line: idx as u64 + 1,
                    source,
                };
                match on_error {
                    OnError::Skip => {
                        warn!(error = %err, "skipping malformed record");
                        stats.skipped += 1;
                    }
                    OnError::Fail => bail!(err),
                }
            }
        }
    }
    Ok(records)
}
