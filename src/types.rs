use crate::error::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Trending categories a video can appear under. `RecentlyTrending` is never
/// requested directly; it is a shelf inside the `Now` tab.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum TrendingCategory {
    Now,
    RecentlyTrending,
    Music,
    Gaming,
    Movies,
}

impl TrendingCategory {
    /// Human label used in the output dataset's `videoType` column.
    pub fn label(&self) -> &'static str {
        match self {
            TrendingCategory::Now => "Now",
            TrendingCategory::RecentlyTrending => "Recently Trending",
            TrendingCategory::Music => "Music",
            TrendingCategory::Gaming => "Gaming",
            TrendingCategory::Movies => "Movies",
        }
    }

    /// Browse params selecting this category's feed tab, if it has one.
    pub fn browse_params(&self) -> Option<&'static str> {
        match self {
            TrendingCategory::Now | TrendingCategory::RecentlyTrending => None,
            TrendingCategory::Music => Some(crate::constants::MUSIC_PARAMS),
            TrendingCategory::Gaming => Some(crate::constants::GAMING_PARAMS),
            TrendingCategory::Movies => Some(crate::constants::MOVIES_PARAMS),
        }
    }

    /// Categories that can be requested as feed tabs (everything but
    /// `RecentlyTrending`).
    pub fn requestable() -> &'static [TrendingCategory] {
        &[
            TrendingCategory::Now,
            TrendingCategory::Music,
            TrendingCategory::Gaming,
            TrendingCategory::Movies,
        ]
    }

    pub fn from_config_name(name: &str) -> Option<TrendingCategory> {
        match name.trim().to_lowercase().as_str() {
            "now" => Some(TrendingCategory::Now),
            "music" => Some(TrendingCategory::Music),
            "gaming" => Some(TrendingCategory::Gaming),
            "movies" | "movie" => Some(TrendingCategory::Movies),
            _ => None,
        }
    }
}

/// Long-form video or short-form reel item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ItemKind {
    Video,
    Short,
}

/// Raw entry descriptor as parsed from one trending feed page, already tagged
/// with its source country and category. Shorts legitimately lack several of
/// the optional fields; the feed does not expose them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedEntry {
    pub video_id: String,
    pub title: String,
    pub kind: ItemKind,
    pub category: TrendingCategory,
    pub country: String,
    pub thumbnail_url: Option<String>,
    pub description_snippet: Option<String>,
    pub published_time_text: Option<String>,
    pub length_text: Option<String>,
    pub view_count_text: Option<String>,
    pub creator_name: Option<String>,
    /// Derived from the owner badges on the renderer; shorts carry no owner
    /// and leave this unset.
    pub creator_verified: Option<bool>,
}

/// One page of the trending feed plus the token for the next one, if any.
#[derive(Debug, Clone, Default)]
pub struct FeedPage {
    pub entries: Vec<FeedEntry>,
    pub continuation: Option<String>,
    /// Entries that failed basic-field extraction on this page.
    pub malformed: usize,
}

/// Like count as reported by the detail source. Creators can disable the
/// counter, which is a distinct observation from "not fetched yet".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Likes {
    Count(u64),
    Disabled,
}

/// Enrichment payload for one video from the detail source.
#[derive(Debug, Clone, Default)]
pub struct VideoDetail {
    pub video_id: String,
    pub channel_id: Option<String>,
    pub view_count: Option<u64>,
    pub likes: Option<Likes>,
    pub comment_count: Option<u64>,
    pub published_at: Option<DateTime<Utc>>,
    pub description: Option<String>,
    pub keywords: Option<Vec<String>>,
    pub length_seconds: Option<u64>,
    pub is_live: Option<bool>,
    pub category_label: Option<String>,
    pub family_safe: Option<bool>,
    pub creator_url: Option<String>,
}

/// Enrichment payload for one channel from the channel source.
#[derive(Debug, Clone, Default)]
pub struct ChannelDetail {
    pub channel_id: String,
    /// None when the channel hides its subscriber count.
    pub subscriber_count: Option<u64>,
    pub verified: Option<bool>,
}

/// Paginated trending feed source for one (country, category) pair.
#[async_trait::async_trait]
pub trait TrendingFeed: Send + Sync {
    async fn fetch_page(
        &self,
        country: &str,
        category: TrendingCategory,
        continuation: Option<&str>,
    ) -> Result<FeedPage>;
}

/// Batched video-detail source. Implementations accept at most
/// [`crate::constants::MAX_IDS_PER_CALL`] identifiers per call and key their
/// response by id; callers must not rely on positional order.
#[async_trait::async_trait]
pub trait VideoDetailApi: Send + Sync {
    async fn list_videos(&self, ids: &[String]) -> Result<Vec<VideoDetail>>;
}

/// Batched channel source, same per-call identifier ceiling.
#[async_trait::async_trait]
pub trait ChannelApi: Send + Sync {
    async fn list_channels(&self, ids: &[String]) -> Result<Vec<ChannelDetail>>;
}
