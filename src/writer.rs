//! Transactional batch writer.
//!
//! One batch commits atomically or not at all. Insert order inside the
//! transaction follows the foreign-key dependencies: author rows (hydrated
//! first, then stubs) before tweets, tweets before the composite-key link
//! relations. URL rows already exist by this point; the interner creates
//! them at normalization time.

use std::collections::HashSet;

use anyhow::{Context, Result};
use tracing::{debug, instrument};

use crate::db::Db;
use crate::normalize::NormalizedTweet;
use crate::sql::{bulk_insert, insert_tweets, Row, SqlValue};

/// Rows accumulated for one batch, grouped per relation and deduplicated on
/// their conflict keys. First occurrence wins, matching the store's
/// first-write-wins insert semantics.
#[derive(Default)]
pub struct RowSet {
    users: Vec<Row>,
    reply_stubs: Vec<Row>,
    mention_stubs: Vec<Row>,
    tweets: Vec<Vec<SqlValue>>,
    mentions: Vec<Row>,
    tags: Vec<Row>,
    media: Vec<Row>,
    tweet_urls: Vec<Row>,

    seen_users: HashSet<i64>,
    seen_reply_stubs: HashSet<i64>,
    seen_mention_stubs: HashSet<i64>,
    seen_tweets: HashSet<i64>,
    seen_mentions: HashSet<(i64, i64)>,
    seen_tags: HashSet<(i64, String)>,
    seen_media: HashSet<(i64, i64, String)>,
    seen_tweet_urls: HashSet<(i64, i64)>,

    records: usize,
}

impl RowSet {
    pub fn push(&mut self, normalized: &NormalizedTweet) {
        self.records += 1;
        if self.seen_users.insert(normalized.user.id) {
            self.users.push(normalized.user.row());
        }
        if let Some(stub) = &normalized.reply_stub {
            if self.seen_reply_stubs.insert(stub.id) {
                self.reply_stubs.push(stub.row());
            }
        }
        for stub in &normalized.mention_stubs {
            if self.seen_mention_stubs.insert(stub.id) {
                self.mention_stubs.push(stub.row());
            }
        }
        if self.seen_tweets.insert(normalized.tweet.id) {
            self.tweets.push(normalized.tweet.binds());
        }
        for mention in &normalized.mentions {
            if self
                .seen_mentions
                .insert((mention.tweet_id, mention.user_id))
            {
                self.mentions.push(mention.row());
            }
        }
        for tag in &normalized.tags {
            if self.seen_tags.insert((tag.tweet_id, tag.tag.clone())) {
                self.tags.push(tag.row());
            }
        }
        for medium in &normalized.media {
            if self
                .seen_media
                .insert((medium.tweet_id, medium.url_id, medium.kind.clone()))
            {
                self.media.push(medium.row());
            }
        }
        for url in &normalized.urls {
            if self.seen_tweet_urls.insert((url.tweet_id, url.url_id)) {
                self.tweet_urls.push(url.row());
            }
        }
    }

    pub fn records(&self) -> usize {
        self.records
    }

    pub fn is_empty(&self) -> bool {
        self.records == 0
    }
}

/// Apply one accumulated batch inside a single transaction. Every statement
/// is conflict-suppressed, so replaying a batch (after a rollback, or when
/// reprocessing an archive) is a no-op; any failure rolls back the whole
/// batch and surfaces to the caller.
#[instrument(skip(db, batch), fields(records = batch.records()))]
pub async fn write_batch(db: &Db, batch: RowSet) -> Result<()> {
    if batch.is_empty() {
        return Ok(());
    }
    let (users, tweets, links) = (
        batch.users.len() + batch.reply_stubs.len() + batch.mention_stubs.len(),
        batch.tweets.len(),
        batch.mentions.len() + batch.tags.len() + batch.media.len() + batch.tweet_urls.len(),
    );

    let mut tx = db
        .pool
        .begin()
        .await
        .context("starting batch transaction")?;
    bulk_insert(&mut tx, "users", &batch.users).await?;
    bulk_insert(&mut tx, "users", &batch.reply_stubs).await?;
    bulk_insert(&mut tx, "users", &batch.mention_stubs).await?;
    insert_tweets(&mut tx, batch.tweets).await?;
    bulk_insert(&mut tx, "tweet_mentions", &batch.mentions).await?;
    bulk_insert(&mut tx, "tweet_tags", &batch.tags).await?;
    bulk_insert(&mut tx, "tweet_media", &batch.media).await?;
    bulk_insert(&mut tx, "tweet_urls", &batch.tweet_urls).await?;
    tx.commit().await.context("committing batch")?;

    debug!(users, tweets, links, "batch committed");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Tweet;
    use crate::normalize::draft;
    use serde_json::json;

    fn normalized(tweet_id: i64, user_id: i64) -> NormalizedTweet {
        let tweet: Tweet = serde_json::from_value(json!({
            "id": tweet_id,
            "text": "x",
            "created_at": "Wed Oct 10 20:19:24 +0000 2018",
            "user": {"id": user_id, "screen_name": "someone"},
            "entities": {"user_mentions": [{"id": 5, "screen_name": "m"}]}
        }))
        .unwrap();
        let drafts = draft(&tweet).unwrap();
        NormalizedTweet {
            user: drafts.user,
            reply_stub: drafts.reply_stub,
            mention_stubs: drafts.mention_stubs,
            tweet: drafts.tweet,
            mentions: drafts.mentions,
            tags: drafts.tags,
            media: Vec::new(),
            urls: Vec::new(),
        }
    }

    #[test]
    fn duplicate_keys_collapse_within_a_batch() {
        let mut set = RowSet::default();
        set.push(&normalized(1, 7));
        set.push(&normalized(2, 7));
        set.push(&normalized(1, 7));
        assert_eq!(set.records(), 3);
        assert_eq!(set.users.len(), 1);
        assert_eq!(set.tweets.len(), 2);
        assert_eq!(set.mention_stubs.len(), 1);
        // One mention link per distinct (tweet, user) pair.
        assert_eq!(set.mentions.len(), 2);
    }

    #[test]
    fn empty_rowset_reports_empty() {
        assert!(RowSet::default().is_empty());
    }
}
