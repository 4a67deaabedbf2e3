//! Record normalization: one raw tweet record becomes typed row drafts for
//! every target relation.
//!
//! Extraction is a pure pass (`draft`) so the fallback chains, geometry
//! encoding and place derivation are testable without a store; `normalize`
//! then interns every URL reference through the resolver.

use chrono::{DateTime, Utc};
use serde_json::Number;
use std::fmt::Write as _;

use crate::db::Db;
use crate::error::NormalizeError;
use crate::interner::UrlInterner;
use crate::model::{Entities, Tweet};
use crate::sql::{Row, SqlValue, TWEET_BIND_COUNT};

const TWITTER_TIME_FORMAT: &str = "%a %b %d %H:%M:%S %z %Y";

pub fn parse_twitter_time(value: &str) -> Result<DateTime<Utc>, NormalizeError> {
    DateTime::parse_from_str(value, TWITTER_TIME_FORMAT)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|source| NormalizeError::Timestamp {
            value: value.to_owned(),
            source,
        })
}

/// Replace every NUL with the visible escape `\x00`. Postgres text columns
/// reject `\0`, and the original bytes are not recoverable afterwards; this
/// is the documented lossy transform.
pub fn sanitize(s: &str) -> String {
    s.replace('\0', "\\x00")
}

fn sanitize_opt(s: Option<&str>) -> Option<String> {
    s.map(sanitize)
}

/// Geometry for one tweet: a WKT type tag plus coordinate text. The two
/// parts concatenate server-side into `TAG(coords)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Geometry {
    pub tag: &'static str,
    pub coords: String,
}

/// A direct point coordinate wins over the place bounding box; anything
/// absent or malformed yields no geometry at all, never an error.
pub fn extract_geometry(tweet: &Tweet) -> Option<Geometry> {
    if let Some(coords) = tweet.geo.as_ref().and_then(|g| g.coordinates.as_deref()) {
        if let [a, b, ..] = coords {
            return Some(Geometry {
                tag: "POINT",
                coords: format!("{a} {b}"),
            });
        }
    }
    let rings = &tweet.place.as_ref()?.bounding_box.as_ref()?.coordinates;
    multipolygon(rings).map(|coords| Geometry {
        tag: "MULTIPOLYGON",
        coords,
    })
}

/// Render bounding-box rings as multipolygon coordinate text, closing each
/// ring by repeating its first point.
fn multipolygon(rings: &[Vec<Vec<Number>>]) -> Option<String> {
    if rings.is_empty() {
        return None;
    }
    let mut out = String::from("(");
    for (i, ring) in rings.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        out.push('(');
        for point in ring {
            let [x, y, ..] = point.as_slice() else {
                return None;
            };
            write!(out, "{x} {y},").expect("write to String");
        }
        let [x0, y0, ..] = ring.first()?.as_slice() else {
            return None;
        };
        write!(out, "{x0} {y0}").expect("write to String");
        out.push(')');
    }
    out.push(')');
    Some(out)
}

/// Lower-cased country code, plus the place's full name and, for US places
/// only, a two-letter state code taken from the text after the last comma of
/// the full name. A longer trailing segment is not a state abbreviation.
fn place_fields(tweet: &Tweet) -> (Option<String>, Option<String>, Option<String>) {
    let place = tweet.place.as_ref();
    let place_name = place.and_then(|p| p.full_name.clone());
    let country_code = place
        .and_then(|p| p.country_code.as_deref())
        .map(str::to_lowercase);
    let state_code = if country_code.as_deref() == Some("us") {
        place
            .and_then(|p| p.full_name.as_deref())
            .and_then(state_code)
    } else {
        None
    };
    (place_name, country_code, state_code)
}

fn state_code(full_name: &str) -> Option<String> {
    let tail = full_name
        .rsplit(',')
        .next()
        .unwrap_or_default()
        .trim()
        .to_lowercase();
    if tail.chars().count() > 2 {
        None
    } else {
        Some(tail)
    }
}

/// Hydrated author row, as observed on the tweet itself.
#[derive(Debug, Clone)]
pub struct UserDraft {
    pub id: i64,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
    pub screen_name: Option<String>,
    pub name: Option<String>,
    pub location: Option<String>,
    pub url_id: Option<i64>,
    pub description: Option<String>,
    pub protected: Option<bool>,
    pub verified: Option<bool>,
    pub friends_count: Option<i32>,
    pub listed_count: Option<i32>,
    pub favourites_count: Option<i32>,
    pub statuses_count: Option<i32>,
    pub withheld_in_countries: Option<Vec<String>>,
}

impl UserDraft {
    pub fn row(&self) -> Row {
        Row::new()
            .col("id", self.id)
            .col("created_at", self.created_at)
            .col("updated_at", self.updated_at)
            .col("screen_name", self.screen_name.clone())
            .col("name", self.name.clone())
            .col("location", self.location.clone())
            .col("url_id", self.url_id)
            .col("description", self.description.clone())
            .col("protected", self.protected)
            .col("verified", self.verified)
            .col("friends_count", self.friends_count)
            .col("listed_count", self.listed_count)
            .col("favourites_count", self.favourites_count)
            .col("statuses_count", self.statuses_count)
            .col("withheld_in_countries", self.withheld_in_countries.clone())
    }
}

/// Stub author implied by a reply reference: id and screen name only. Never
/// overwrites an existing row, hydrated or not.
#[derive(Debug, Clone)]
pub struct ReplyStubDraft {
    pub id: i64,
    pub screen_name: Option<String>,
}

impl ReplyStubDraft {
    pub fn row(&self) -> Row {
        Row::new()
            .col("id", self.id)
            .col("screen_name", self.screen_name.clone())
    }
}

/// Stub author implied by a mention: id, display name and screen name.
#[derive(Debug, Clone)]
pub struct MentionStubDraft {
    pub id: i64,
    pub name: Option<String>,
    pub screen_name: Option<String>,
}

impl MentionStubDraft {
    pub fn row(&self) -> Row {
        Row::new()
            .col("id", self.id)
            .col("name", self.name.clone())
            .col("screen_name", self.screen_name.clone())
    }
}

#[derive(Debug, Clone)]
pub struct TweetDraft {
    pub id: i64,
    pub user_id: i64,
    pub created_at: DateTime<Utc>,
    pub in_reply_to_status_id: Option<i64>,
    pub in_reply_to_user_id: Option<i64>,
    pub quoted_status_id: Option<i64>,
    pub geometry: Option<Geometry>,
    pub retweet_count: Option<i32>,
    pub quote_count: Option<i32>,
    pub favorite_count: Option<i32>,
    pub withheld_copyright: Option<bool>,
    pub withheld_in_countries: Option<Vec<String>>,
    pub place_name: Option<String>,
    pub country_code: Option<String>,
    pub state_code: Option<String>,
    pub lang: Option<String>,
    pub text: String,
    pub source: Option<String>,
}

impl TweetDraft {
    /// Bind values in `tweet_insert_sql` placeholder order.
    pub fn binds(&self) -> Vec<SqlValue> {
        let (tag, coords) = match &self.geometry {
            Some(g) => (Some(g.tag.to_owned()), Some(g.coords.clone())),
            None => (None, None),
        };
        let values = vec![
            self.id.into(),
            self.user_id.into(),
            self.created_at.into(),
            self.in_reply_to_status_id.into(),
            self.in_reply_to_user_id.into(),
            self.quoted_status_id.into(),
            SqlValue::Text(tag),
            SqlValue::Text(coords),
            self.retweet_count.into(),
            self.quote_count.into(),
            self.favorite_count.into(),
            self.withheld_copyright.into(),
            self.withheld_in_countries.clone().into(),
            self.place_name.clone().into(),
            self.country_code.clone().into(),
            self.state_code.clone().into(),
            self.lang.clone().into(),
            self.text.clone().into(),
            self.source.clone().into(),
        ];
        debug_assert_eq!(values.len(), TWEET_BIND_COUNT);
        values
    }
}

#[derive(Debug, Clone)]
pub struct MentionDraft {
    pub tweet_id: i64,
    pub user_id: i64,
}

impl MentionDraft {
    pub fn row(&self) -> Row {
        Row::new()
            .col("tweet_id", self.tweet_id)
            .col("user_id", self.user_id)
    }
}

#[derive(Debug, Clone)]
pub struct TagDraft {
    pub tweet_id: i64,
    pub tag: String,
}

impl TagDraft {
    pub fn row(&self) -> Row {
        Row::new()
            .col("tweet_id", self.tweet_id)
            .col("tag", self.tag.clone())
    }
}

#[derive(Debug, Clone)]
pub struct MediaDraft {
    pub tweet_id: i64,
    pub url_id: i64,
    pub kind: String,
}

impl MediaDraft {
    pub fn row(&self) -> Row {
        Row::new()
            .col("tweet_id", self.tweet_id)
            .col("url_id", self.url_id)
            .col("type", self.kind.clone())
    }
}

#[derive(Debug, Clone)]
pub struct TweetUrlDraft {
    pub tweet_id: i64,
    pub url_id: i64,
}

impl TweetUrlDraft {
    pub fn row(&self) -> Row {
        Row::new()
            .col("tweet_id", self.tweet_id)
            .col("url_id", self.url_id)
    }
}

/// Everything extracted from one record before URL resolution. URL-bearing
/// entries still carry their raw (sanitized) strings.
#[derive(Debug, Clone)]
pub struct Drafts {
    pub user: UserDraft,
    pub user_url: Option<String>,
    pub reply_stub: Option<ReplyStubDraft>,
    pub mention_stubs: Vec<MentionStubDraft>,
    pub tweet: TweetDraft,
    pub mentions: Vec<MentionDraft>,
    pub tags: Vec<TagDraft>,
    /// (media url, media type)
    pub media: Vec<(String, String)>,
    pub urls: Vec<String>,
}

/// Pure extraction pass over one parsed record.
///
/// Fallback chains are explicit field access, each branch keyed on container
/// presence: extended full text over truncated text, the extended tweet's
/// entity lists over the top-level ones, and media through two containers
/// before defaulting to none.
pub fn draft(tweet: &Tweet) -> Result<Drafts, NormalizeError> {
    let observed_at = parse_twitter_time(&tweet.created_at)?;
    let user_created = tweet
        .user
        .created_at
        .as_deref()
        .map(parse_twitter_time)
        .transpose()?;

    let user = UserDraft {
        id: tweet.user.id,
        created_at: user_created,
        // The freshest observation we have of this author is this tweet.
        updated_at: observed_at,
        screen_name: sanitize_opt(tweet.user.screen_name.as_deref()),
        name: sanitize_opt(tweet.user.name.as_deref()),
        location: sanitize_opt(tweet.user.location.as_deref()),
        url_id: None,
        description: sanitize_opt(tweet.user.description.as_deref()),
        protected: tweet.user.protected,
        verified: tweet.user.verified,
        friends_count: tweet.user.friends_count,
        listed_count: tweet.user.listed_count,
        favourites_count: tweet.user.favourites_count,
        statuses_count: tweet.user.statuses_count,
        withheld_in_countries: tweet.user.withheld_in_countries.clone(),
    };
    let user_url = tweet.user.url.as_deref().map(sanitize);

    let text = tweet
        .extended_tweet
        .as_ref()
        .and_then(|e| e.full_text.as_deref())
        .unwrap_or(&tweet.text);
    let entities: &Entities = tweet
        .extended_tweet
        .as_ref()
        .and_then(|e| e.entities.as_ref())
        .unwrap_or(&tweet.entities);
    let media_entities = tweet
        .extended_tweet
        .as_ref()
        .and_then(|e| e.extended_entities.as_ref())
        .or(tweet.extended_entities.as_ref())
        .map(|e| e.media.as_slice())
        .unwrap_or_default();

    let reply_stub = tweet.in_reply_to_user_id.map(|id| ReplyStubDraft {
        id,
        screen_name: sanitize_opt(tweet.in_reply_to_screen_name.as_deref()),
    });

    let mut mention_stubs = Vec::with_capacity(entities.user_mentions.len());
    let mut mentions = Vec::with_capacity(entities.user_mentions.len());
    for mention in &entities.user_mentions {
        mention_stubs.push(MentionStubDraft {
            id: mention.id,
            name: sanitize_opt(mention.name.as_deref()),
            screen_name: sanitize_opt(mention.screen_name.as_deref()),
        });
        mentions.push(MentionDraft {
            tweet_id: tweet.id,
            user_id: mention.id,
        });
    }

    let tags = entities
        .hashtags
        .iter()
        .map(|h| format!("#{}", h.text))
        .chain(entities.symbols.iter().map(|s| format!("${}", s.text)))
        .map(|tag| TagDraft {
            tweet_id: tweet.id,
            tag: sanitize(&tag),
        })
        .collect();

    let media = media_entities
        .iter()
        .map(|m| (sanitize(&m.media_url), m.kind.clone()))
        .collect();
    let urls = entities
        .urls
        .iter()
        .map(|u| sanitize(&u.expanded_url))
        .collect();

    let (place_name, country_code, state_code) = place_fields(tweet);

    let tweet_draft = TweetDraft {
        id: tweet.id,
        user_id: tweet.user.id,
        created_at: observed_at,
        in_reply_to_status_id: tweet.in_reply_to_status_id,
        in_reply_to_user_id: tweet.in_reply_to_user_id,
        quoted_status_id: tweet.quoted_status_id,
        geometry: extract_geometry(tweet),
        retweet_count: tweet.retweet_count,
        quote_count: tweet.quote_count,
        favorite_count: tweet.favorite_count,
        withheld_copyright: tweet.withheld_copyright,
        withheld_in_countries: tweet.withheld_in_countries.clone(),
        place_name,
        country_code,
        state_code,
        lang: tweet.lang.clone(),
        text: sanitize(text),
        source: sanitize_opt(tweet.source.as_deref()),
    };

    Ok(Drafts {
        user,
        user_url,
        reply_stub,
        mention_stubs,
        tweet: tweet_draft,
        mentions,
        tags,
        media,
        urls,
    })
}

/// Per-relation drafts for one record, with every URL reference resolved.
#[derive(Debug, Clone)]
pub struct NormalizedTweet {
    pub user: UserDraft,
    pub reply_stub: Option<ReplyStubDraft>,
    pub mention_stubs: Vec<MentionStubDraft>,
    pub tweet: TweetDraft,
    pub mentions: Vec<MentionDraft>,
    pub tags: Vec<TagDraft>,
    pub media: Vec<MediaDraft>,
    pub urls: Vec<TweetUrlDraft>,
}

/// Normalize one record: extract drafts, then intern every URL it touches.
pub async fn normalize(
    db: &Db,
    interner: &mut UrlInterner,
    tweet: &Tweet,
) -> Result<NormalizedTweet, NormalizeError> {
    let drafts = draft(tweet)?;
    let mut user = drafts.user;
    if let Some(url) = &drafts.user_url {
        user.url_id = Some(interner.resolve(db, url).await?);
    }
    let mut media = Vec::with_capacity(drafts.media.len());
    for (url, kind) in &drafts.media {
        media.push(MediaDraft {
            tweet_id: drafts.tweet.id,
            url_id: interner.resolve(db, url).await?,
            kind: kind.clone(),
        });
    }
    let mut urls = Vec::with_capacity(drafts.urls.len());
    for url in &drafts.urls {
        urls.push(TweetUrlDraft {
            tweet_id: drafts.tweet.id,
            url_id: interner.resolve(db, url).await?,
        });
    }
    Ok(NormalizedTweet {
        user,
        reply_stub: drafts.reply_stub,
        mention_stubs: drafts.mention_stubs,
        tweet: drafts.tweet,
        mentions: drafts.mentions,
        tags: drafts.tags,
        media,
        urls,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn tweet(value: serde_json::Value) -> Tweet {
        serde_json::from_value(value).unwrap()
    }

    fn base() -> serde_json::Value {
        json!({
            "id": 100,
            "text": "plain text",
            "created_at": "Wed Oct 10 20:19:24 +0000 2018",
            "user": {"id": 7, "screen_name": "someone"}
        })
    }

    #[test]
    fn sanitize_leaves_clean_text_alone() {
        assert_eq!(sanitize("hello world"), "hello world");
    }

    #[test]
    fn sanitize_replaces_every_nul() {
        assert_eq!(sanitize("\0"), "\\x00");
        assert_eq!(sanitize("hello\0 world\0"), "hello\\x00 world\\x00");
        assert!(!sanitize("a\0b\0c").contains('\0'));
    }

    #[test]
    fn sanitize_is_idempotent() {
        let once = sanitize("hello\0 world");
        assert_eq!(sanitize(&once), once);
    }

    #[test]
    fn point_geometry_wins_and_keeps_float_spelling() {
        let mut v = base();
        v["geo"] = json!({"coordinates": [10.0, 20.0]});
        v["place"] = json!({"bounding_box": {"coordinates": [[[0, 0], [1, 0], [1, 1]]]}});
        let geo = extract_geometry(&tweet(v)).unwrap();
        assert_eq!(geo.tag, "POINT");
        assert_eq!(geo.coords, "10.0 20.0");
        assert_eq!(format!("{}({})", geo.tag, geo.coords), "POINT(10.0 20.0)");
    }

    #[test]
    fn bounding_box_closes_each_ring() {
        let mut v = base();
        v["place"] = json!({"bounding_box": {"coordinates": [[[0, 0], [1, 0], [1, 1]]]}});
        let geo = extract_geometry(&tweet(v)).unwrap();
        assert_eq!(geo.tag, "MULTIPOLYGON");
        assert_eq!(geo.coords, "((0 0,1 0,1 1,0 0))");
        assert_eq!(
            format!("{}({})", geo.tag, geo.coords),
            "MULTIPOLYGON(((0 0,1 0,1 1,0 0)))"
        );
    }

    #[test]
    fn absent_or_malformed_geometry_is_null() {
        assert_eq!(extract_geometry(&tweet(base())), None);

        let mut v = base();
        v["geo"] = json!(null);
        v["place"] = json!(null);
        assert_eq!(extract_geometry(&tweet(v)), None);

        // A ring without points is malformed, not an error.
        let mut v = base();
        v["place"] = json!({"bounding_box": {"coordinates": [[]]}});
        assert_eq!(extract_geometry(&tweet(v)), None);
    }

    #[test]
    fn us_place_yields_state_code() {
        let mut v = base();
        v["place"] = json!({"full_name": "Austin, TX", "country_code": "US"});
        let drafts = draft(&tweet(v)).unwrap();
        assert_eq!(drafts.tweet.country_code.as_deref(), Some("us"));
        assert_eq!(drafts.tweet.state_code.as_deref(), Some("tx"));
        assert_eq!(drafts.tweet.place_name.as_deref(), Some("Austin, TX"));
    }

    #[test]
    fn long_trailing_segment_is_not_a_state() {
        let mut v = base();
        v["place"] = json!({"full_name": "Somewhere, United States", "country_code": "US"});
        let drafts = draft(&tweet(v)).unwrap();
        assert_eq!(drafts.tweet.state_code, None);
    }

    #[test]
    fn non_us_place_never_gets_a_state() {
        let mut v = base();
        v["place"] = json!({"full_name": "Toronto, ON", "country_code": "CA"});
        let drafts = draft(&tweet(v)).unwrap();
        assert_eq!(drafts.tweet.country_code.as_deref(), Some("ca"));
        assert_eq!(drafts.tweet.state_code, None);
    }

    #[test]
    fn extended_text_wins_over_truncated() {
        let mut v = base();
        v["extended_tweet"] = json!({"full_text": "the whole thing"});
        let drafts = draft(&tweet(v)).unwrap();
        assert_eq!(drafts.tweet.text, "the whole thing");

        let drafts = draft(&tweet(base())).unwrap();
        assert_eq!(drafts.tweet.text, "plain text");
    }

    #[test]
    fn extended_entities_win_over_standard() {
        let mut v = base();
        v["entities"] = json!({"hashtags": [{"text": "old"}]});
        v["extended_tweet"] = json!({
            "full_text": "x",
            "entities": {"hashtags": [{"text": "new"}], "symbols": [{"text": "CASH"}]}
        });
        let drafts = draft(&tweet(v)).unwrap();
        let tags: Vec<&str> = drafts.tags.iter().map(|t| t.tag.as_str()).collect();
        assert_eq!(tags, vec!["#new", "$CASH"]);
    }

    #[test]
    fn media_falls_back_through_both_containers() {
        let mut v = base();
        v["extended_tweet"] = json!({
            "full_text": "x",
            "extended_entities": {"media": [{"media_url": "http://a/1.jpg", "type": "photo"}]}
        });
        v["extended_entities"] =
            json!({"media": [{"media_url": "http://b/2.jpg", "type": "video"}]});
        let drafts = draft(&tweet(v)).unwrap();
        assert_eq!(
            drafts.media,
            vec![("http://a/1.jpg".to_owned(), "photo".to_owned())]
        );

        let mut v = base();
        v["extended_entities"] =
            json!({"media": [{"media_url": "http://b/2.jpg", "type": "video"}]});
        let drafts = draft(&tweet(v)).unwrap();
        assert_eq!(
            drafts.media,
            vec![("http://b/2.jpg".to_owned(), "video".to_owned())]
        );

        let drafts = draft(&tweet(base())).unwrap();
        assert!(drafts.media.is_empty());
    }

    #[test]
    fn reply_reference_emits_a_stub() {
        let mut v = base();
        v["in_reply_to_user_id"] = json!(42);
        v["in_reply_to_screen_name"] = json!("them");
        v["in_reply_to_status_id"] = json!(41);
        let drafts = draft(&tweet(v)).unwrap();
        let stub = drafts.reply_stub.unwrap();
        assert_eq!(stub.id, 42);
        assert_eq!(stub.screen_name.as_deref(), Some("them"));
        assert_eq!(drafts.tweet.in_reply_to_status_id, Some(41));

        let drafts = draft(&tweet(base())).unwrap();
        assert!(drafts.reply_stub.is_none());
    }

    #[test]
    fn mentions_emit_stub_and_link_drafts() {
        let mut v = base();
        v["entities"] = json!({"user_mentions": [{"id": 9, "screen_name": "other", "name": "Other"}]});
        let drafts = draft(&tweet(v)).unwrap();
        assert_eq!(drafts.mention_stubs.len(), 1);
        assert_eq!(drafts.mention_stubs[0].id, 9);
        assert_eq!(drafts.mentions[0].tweet_id, 100);
        assert_eq!(drafts.mentions[0].user_id, 9);
    }

    #[test]
    fn free_text_fields_are_sanitized() {
        let mut v = base();
        v["text"] = json!("body\0 text");
        v["source"] = json!("web\0client");
        v["user"]["name"] = json!("na\0me");
        v["entities"] = json!({"hashtags": [{"text": "ta\0g"}]});
        let drafts = draft(&tweet(v)).unwrap();
        assert_eq!(drafts.tweet.text, "body\\x00 text");
        assert_eq!(drafts.tweet.source.as_deref(), Some("web\\x00client"));
        assert_eq!(drafts.user.name.as_deref(), Some("na\\x00me"));
        assert_eq!(drafts.tags[0].tag, "#ta\\x00g");
    }

    #[test]
    fn unparseable_timestamp_is_a_record_fault() {
        let mut v = base();
        v["created_at"] = json!("not a time");
        let err = draft(&tweet(v)).unwrap_err();
        assert!(err.is_record_fault());
    }

    #[test]
    fn observation_time_feeds_user_updated_at() {
        let drafts = draft(&tweet(base())).unwrap();
        assert_eq!(drafts.user.updated_at, drafts.tweet.created_at);
    }
}
