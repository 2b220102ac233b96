use crate::constants::{CHANNELS_URL, CHANNEL_URL_PREFIX, MAX_IDS_PER_CALL, VIDEOS_URL};
use crate::error::{Result, ScraperError};
use crate::types::{ChannelApi, ChannelDetail, Likes, VideoDetail, VideoDetailApi};
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::StatusCode;
use serde_json::Value;
use tracing::{debug, instrument, warn};

static ISO8601_DURATION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^P(?:(\d+)D)?(?:T(?:(\d+)H)?(?:(\d+)M)?(?:(\d+)S)?)?$").unwrap()
});

/// Data API v3 client for batched video and channel enrichment lookups.
pub struct DataApiClient {
    client: reqwest::Client,
    api_key: String,
}

impl DataApiClient {
    pub fn new(api_key: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
        }
    }

    /// One list call with up to [`MAX_IDS_PER_CALL`] comma-joined ids.
    /// A 403 carrying a quota reason becomes [`ScraperError::QuotaExhausted`];
    /// other failures keep their transient/permanent classification.
    async fn list(&self, url: &str, part: &str, ids: &[String]) -> Result<Value> {
        debug_assert!(ids.len() <= MAX_IDS_PER_CALL);
        let response = self
            .client
            .get(url)
            .query(&[
                ("part", part),
                ("id", ids.join(",").as_str()),
                ("maxResults", "50"),
                ("key", self.api_key.as_str()),
            ])
            .send()
            .await?;

        if response.status() == StatusCode::FORBIDDEN {
            let body: Value = match response.json().await {
                Ok(v) => v,
                Err(_) => Value::Null,
            };
            let reason = body["error"]["errors"][0]["reason"].as_str().unwrap_or("");
            if reason == "quotaExceeded" || reason == "dailyLimitExceeded" {
                warn!("Data API reports quota exhaustion ({})", reason);
                return Err(ScraperError::QuotaExhausted);
            }
            return Err(ScraperError::Api {
                message: format!("Data API request forbidden: {reason}"),
            });
        }

        let response = response.error_for_status()?;
        Ok(response.json().await?)
    }
}

#[async_trait::async_trait]
impl VideoDetailApi for DataApiClient {
    #[instrument(skip(self, ids), fields(batch_size = ids.len()))]
    async fn list_videos(&self, ids: &[String]) -> Result<Vec<VideoDetail>> {
        let body = self
            .list(VIDEOS_URL, "snippet,statistics,contentDetails", ids)
            .await?;
        let items = body["items"].as_array().cloned().unwrap_or_default();
        let details: Vec<VideoDetail> = items.iter().filter_map(parse_video_detail).collect();
        debug!("Fetched {} video details for {} ids", details.len(), ids.len());
        Ok(details)
    }
}

#[async_trait::async_trait]
impl ChannelApi for DataApiClient {
    #[instrument(skip(self, ids), fields(batch_size = ids.len()))]
    async fn list_channels(&self, ids: &[String]) -> Result<Vec<ChannelDetail>> {
        let body = self.list(CHANNELS_URL, "snippet,statistics", ids).await?;
        let items = body["items"].as_array().cloned().unwrap_or_default();
        let details: Vec<ChannelDetail> = items.iter().filter_map(parse_channel_detail).collect();
        debug!("Fetched {} channel details for {} ids", details.len(), ids.len());
        Ok(details)
    }
}

fn parse_video_detail(item: &Value) -> Option<VideoDetail> {
    let video_id = item["id"].as_str()?.to_string();
    let snippet = &item["snippet"];
    let statistics = &item["statistics"];
    let content = &item["contentDetails"];

    let channel_id = snippet["channelId"].as_str().map(str::to_string);
    // The API omits likeCount entirely when the creator hides it; that is an
    // observed "disabled", not an unknown.
    let likes = if statistics.is_null() {
        None
    } else {
        match count_field(&statistics["likeCount"]) {
            Some(n) => Some(Likes::Count(n)),
            None => Some(Likes::Disabled),
        }
    };

    Some(VideoDetail {
        creator_url: channel_id
            .as_deref()
            .map(|id| format!("{CHANNEL_URL_PREFIX}{id}")),
        channel_id,
        view_count: count_field(&statistics["viewCount"]),
        likes,
        comment_count: count_field(&statistics["commentCount"]),
        published_at: snippet["publishedAt"]
            .as_str()
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc)),
        description: snippet["description"].as_str().map(str::to_string),
        keywords: snippet["tags"].as_array().map(|tags| {
            tags.iter()
                .filter_map(|t| t.as_str().map(str::to_string))
                .collect()
        }),
        length_seconds: content["duration"].as_str().and_then(parse_iso8601_duration),
        is_live: snippet["liveBroadcastContent"].as_str().map(|s| s == "live"),
        category_label: snippet["categoryId"].as_str().map(category_label),
        family_safe: if content.is_null() {
            None
        } else {
            Some(content["contentRating"]["ytRating"].as_str() != Some("ytAgeRestricted"))
        },
        video_id,
    })
}

fn parse_channel_detail(item: &Value) -> Option<ChannelDetail> {
    let channel_id = item["id"].as_str()?.to_string();
    let statistics = &item["statistics"];
    let hidden = statistics["hiddenSubscriberCount"].as_bool().unwrap_or(false);
    Some(ChannelDetail {
        channel_id,
        subscriber_count: if hidden {
            None
        } else {
            count_field(&statistics["subscriberCount"])
        },
        // channels.list exposes no verification badge. The flag is parsed
        // from the feed's owner badges upstream; leaving it unknown here
        // keeps that observation intact.
        verified: None,
    })
}

/// Counts arrive as decimal strings ("1234567"); tolerate plain numbers too.
fn count_field(value: &Value) -> Option<u64> {
    match value {
        Value::String(s) => s.parse().ok(),
        Value::Number(n) => n.as_u64(),
        _ => None,
    }
}

/// Parse an ISO-8601 duration like `PT1H2M3S` (or `P1DT2H`) into seconds.
pub fn parse_iso8601_duration(duration: &str) -> Option<u64> {
    let captures = ISO8601_DURATION.captures(duration)?;
    let part = |i: usize| -> u64 {
        captures
            .get(i)
            .and_then(|m| m.as_str().parse().ok())
            .unwrap_or(0)
    };
    let total = part(1) * 86_400 + part(2) * 3_600 + part(3) * 60 + part(4);
    // "P" alone is not a duration
    if captures.iter().skip(1).all(|m| m.is_none()) {
        return None;
    }
    Some(total)
}

/// Stable Data API category-id → label mapping. Unknown ids fall back to the
/// raw id so the column never silently loses information.
pub fn category_label(id: &str) -> String {
    let label = match id {
        "1" => "Film & Animation",
        "2" => "Autos & Vehicles",
        "10" => "Music",
        "15" => "Pets & Animals",
        "17" => "Sports",
        "19" => "Travel & Events",
        "20" => "Gaming",
        "22" => "People & Blogs",
        "23" => "Comedy",
        "24" => "Entertainment",
        "25" => "News & Politics",
        "26" => "Howto & Style",
        "27" => "Education",
        "28" => "Science & Technology",
        "29" => "Nonprofits & Activism",
        "30" => "Movies",
        "43" => "Shows",
        "44" => "Trailers",
        other => return other.to_string(),
    };
    label.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_full_video_item() {
        let item = json!({
            "id": "abc123",
            "snippet": {
                "publishedAt": "2023-12-08T15:00:00Z",
                "channelId": "UCxyz",
                "description": "full description",
                "tags": ["one", "two"],
                "categoryId": "10",
                "liveBroadcastContent": "none"
            },
            "statistics": {
                "viewCount": "1234567",
                "likeCount": "8910",
                "commentCount": "42"
            },
            "contentDetails": {"duration": "PT1H2M3S"}
        });
        let detail = parse_video_detail(&item).unwrap();
        assert_eq!(detail.video_id, "abc123");
        assert_eq!(detail.view_count, Some(1_234_567));
        assert_eq!(detail.likes, Some(Likes::Count(8910)));
        assert_eq!(detail.comment_count, Some(42));
        assert_eq!(detail.length_seconds, Some(3723));
        assert_eq!(detail.is_live, Some(false));
        assert_eq!(detail.category_label.as_deref(), Some("Music"));
        assert_eq!(detail.family_safe, Some(true));
        assert_eq!(detail.keywords.as_deref(), Some(["one".to_string(), "two".to_string()].as_slice()));
        assert_eq!(
            detail.creator_url.as_deref(),
            Some("https://www.youtube.com/channel/UCxyz")
        );
    }

    #[test]
    fn hidden_like_count_is_disabled_not_unknown() {
        let item = json!({
            "id": "abc",
            "snippet": {"channelId": "UC1"},
            "statistics": {"viewCount": "10"}
        });
        let detail = parse_video_detail(&item).unwrap();
        assert_eq!(detail.likes, Some(Likes::Disabled));
        assert_eq!(detail.comment_count, None);
    }

    #[test]
    fn age_restricted_video_is_not_family_safe() {
        let item = json!({
            "id": "abc",
            "snippet": {},
            "contentDetails": {
                "duration": "PT30S",
                "contentRating": {"ytRating": "ytAgeRestricted"}
            }
        });
        let detail = parse_video_detail(&item).unwrap();
        assert_eq!(detail.family_safe, Some(false));
        assert_eq!(detail.length_seconds, Some(30));
    }

    #[test]
    fn hidden_subscriber_count_stays_unknown() {
        let item = json!({
            "id": "UC1",
            "statistics": {"subscriberCount": "12345", "hiddenSubscriberCount": true}
        });
        let detail = parse_channel_detail(&item).unwrap();
        assert_eq!(detail.subscriber_count, None);

        let visible = json!({
            "id": "UC2",
            "statistics": {"subscriberCount": "12345", "hiddenSubscriberCount": false}
        });
        assert_eq!(
            parse_channel_detail(&visible).unwrap().subscriber_count,
            Some(12345)
        );
    }

    #[test]
    fn iso8601_durations_parse() {
        assert_eq!(parse_iso8601_duration("PT45S"), Some(45));
        assert_eq!(parse_iso8601_duration("PT10M1S"), Some(601));
        assert_eq!(parse_iso8601_duration("PT1H2M3S"), Some(3723));
        assert_eq!(parse_iso8601_duration("P1DT2H"), Some(93_600));
        assert_eq!(parse_iso8601_duration("P"), None);
        assert_eq!(parse_iso8601_duration("nonsense"), None);
    }

    #[test]
    fn unknown_category_id_falls_back_to_raw_id() {
        assert_eq!(category_label("20"), "Gaming");
        assert_eq!(category_label("99"), "99");
    }
}
