//! Typed view of one raw tweet record.
//!
//! The export format is optional-field-laden: everything that can be absent
//! deserializes to `None` or an empty list instead of failing the record.
//! Coordinates stay as `serde_json::Number` so geometry text reproduces the
//! source's numeric spelling (`10.0` does not collapse to `10`).

use serde::Deserialize;
use serde_json::Number;

#[derive(Debug, Clone, Deserialize)]
pub struct Tweet {
    pub id: i64,
    pub text: String,
    pub created_at: String,
    pub user: TweetUser,
    #[serde(default)]
    pub extended_tweet: Option<ExtendedTweet>,
    #[serde(default)]
    pub entities: Entities,
    #[serde(default)]
    pub extended_entities: Option<ExtendedEntities>,
    #[serde(default)]
    pub geo: Option<Geo>,
    #[serde(default)]
    pub place: Option<Place>,
    #[serde(default)]
    pub in_reply_to_status_id: Option<i64>,
    #[serde(default)]
    pub in_reply_to_user_id: Option<i64>,
    #[serde(default)]
    pub in_reply_to_screen_name: Option<String>,
    #[serde(default)]
    pub quoted_status_id: Option<i64>,
    #[serde(default)]
    pub retweet_count: Option<i32>,
    #[serde(default)]
    pub quote_count: Option<i32>,
    #[serde(default)]
    pub favorite_count: Option<i32>,
    #[serde(default)]
    pub withheld_copyright: Option<bool>,
    #[serde(default)]
    pub withheld_in_countries: Option<Vec<String>>,
    #[serde(default)]
    pub lang: Option<String>,
    #[serde(default)]
    pub source: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TweetUser {
    pub id: i64,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub screen_name: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub protected: Option<bool>,
    #[serde(default)]
    pub verified: Option<bool>,
    #[serde(default)]
    pub friends_count: Option<i32>,
    #[serde(default)]
    pub listed_count: Option<i32>,
    #[serde(default)]
    pub favourites_count: Option<i32>,
    #[serde(default)]
    pub statuses_count: Option<i32>,
    #[serde(default)]
    pub withheld_in_countries: Option<Vec<String>>,
}

/// The `extended_tweet` container carries the untruncated text and, when
/// present, its own entity lists that supersede the top-level ones.
#[derive(Debug, Clone, Deserialize)]
pub struct ExtendedTweet {
    #[serde(default)]
    pub full_text: Option<String>,
    #[serde(default)]
    pub entities: Option<Entities>,
    #[serde(default)]
    pub extended_entities: Option<ExtendedEntities>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Entities {
    #[serde(default)]
    pub urls: Vec<UrlEntity>,
    #[serde(default)]
    pub user_mentions: Vec<MentionEntity>,
    #[serde(default)]
    pub hashtags: Vec<TagEntity>,
    #[serde(default)]
    pub symbols: Vec<TagEntity>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExtendedEntities {
    #[serde(default)]
    pub media: Vec<MediaEntity>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UrlEntity {
    pub expanded_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MentionEntity {
    pub id: i64,
    #[serde(default)]
    pub screen_name: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TagEntity {
    pub text: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MediaEntity {
    pub media_url: String,
    #[serde(rename = "type")]
    pub kind: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Geo {
    #[serde(default)]
    pub coordinates: Option<Vec<Number>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Place {
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub country_code: Option<String>,
    #[serde(default)]
    pub bounding_box: Option<BoundingBox>,
}

/// `coordinates` is a list of rings, each ring a list of `[lon, lat]` pairs.
#[derive(Debug, Clone, Deserialize)]
pub struct BoundingBox {
    #[serde(default)]
    pub coordinates: Vec<Vec<Vec<Number>>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserializes_a_minimal_record() {
        let tweet: Tweet = serde_json::from_str(
            r#"{
                "id": 1,
                "text": "hello",
                "created_at": "Wed Oct 10 20:19:24 +0000 2018",
                "user": {"id": 7, "screen_name": "someone"}
            }"#,
        )
        .unwrap();
        assert_eq!(tweet.id, 1);
        assert_eq!(tweet.user.id, 7);
        assert!(tweet.extended_tweet.is_none());
        assert!(tweet.entities.urls.is_empty());
        assert!(tweet.geo.is_none());
        assert!(tweet.in_reply_to_user_id.is_none());
    }

    #[test]
    fn deserializes_extended_and_place_fields() {
        let tweet: Tweet = serde_json::from_str(
            r#"{
                "id": 2,
                "text": "truncated…",
                "created_at": "Wed Oct 10 20:19:24 +0000 2018",
                "user": {"id": 7, "screen_name": "someone", "friends_count": 12},
                "extended_tweet": {
                    "full_text": "the whole thing",
                    "entities": {"hashtags": [{"text": "rust"}]}
                },
                "geo": null,
                "place": {
                    "full_name": "Austin, TX",
                    "country_code": "US",
                    "bounding_box": {"coordinates": [[[0, 0], [1, 0], [1, 1]]]}
                },
                "entities": {"user_mentions": [{"id": 9, "screen_name": "other"}]}
            }"#,
        )
        .unwrap();
        let extended = tweet.extended_tweet.as_ref().unwrap();
        assert_eq!(extended.full_text.as_deref(), Some("the whole thing"));
        assert_eq!(extended.entities.as_ref().unwrap().hashtags[0].text, "rust");
        assert_eq!(tweet.entities.user_mentions[0].id, 9);
        let place = tweet.place.as_ref().unwrap();
        assert_eq!(place.country_code.as_deref(), Some("US"));
        assert_eq!(
            place.bounding_box.as_ref().unwrap().coordinates[0].len(),
            3
        );
        assert_eq!(tweet.user.friends_count, Some(12));
    }

    #[test]
    fn float_coordinates_keep_their_spelling() {
        let geo: Geo = serde_json::from_str(r#"{"coordinates": [10.0, 20.0]}"#).unwrap();
        let coords = geo.coordinates.unwrap();
        assert_eq!(coords[0].to_string(), "10.0");
        assert_eq!(coords[1].to_string(), "20.0");
    }
}
