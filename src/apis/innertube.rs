use crate::constants::{
    BROWSE_URL, INNERTUBE_CLIENT_NAME, INNERTUBE_CLIENT_VERSION, TRENDING_BROWSE_ID,
    TRENDING_ORIGINAL_URL,
};
use crate::error::Result;
use crate::types::{FeedEntry, FeedPage, ItemKind, TrendingCategory, TrendingFeed};
use serde_json::{json, Value};
use tracing::{debug, instrument};

/// Trending feed client speaking the innertube browse protocol. One POST per
/// page; continuation tokens select follow-up pages.
pub struct InnertubeFeedClient {
    client: reqwest::Client,
}

impl Default for InnertubeFeedClient {
    fn default() -> Self {
        Self::new()
    }
}

impl InnertubeFeedClient {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }

    fn build_payload(
        country: &str,
        category: TrendingCategory,
        continuation: Option<&str>,
    ) -> Value {
        let mut payload = json!({
            "context": {
                "client": {
                    "gl": country,
                    "clientName": INNERTUBE_CLIENT_NAME,
                    "clientVersion": INNERTUBE_CLIENT_VERSION,
                    "originalUrl": TRENDING_ORIGINAL_URL,
                },
            },
            "browseId": TRENDING_BROWSE_ID,
        });
        if let Some(params) = category.browse_params() {
            payload["params"] = params.into();
        }
        if let Some(token) = continuation {
            payload["continuation"] = token.into();
        }
        payload
    }
}

#[async_trait::async_trait]
impl TrendingFeed for InnertubeFeedClient {
    #[instrument(skip(self, continuation), fields(country = %country, category = %category.label()))]
    async fn fetch_page(
        &self,
        country: &str,
        category: TrendingCategory,
        continuation: Option<&str>,
    ) -> Result<FeedPage> {
        let payload = Self::build_payload(country, category, continuation);
        let response = self
            .client
            .post(BROWSE_URL)
            .json(&payload)
            .send()
            .await?
            .error_for_status()?;

        let body: Value = response.json().await?;
        let page = parse_feed_response(&body, country, category);
        debug!(
            "Parsed feed page: {} entries, {} malformed, continuation={}",
            page.entries.len(),
            page.malformed,
            page.continuation.is_some()
        );
        Ok(page)
    }
}

/// Parse one browse response (initial or continuation) into tagged entries.
/// Malformed items are counted, never fatal.
pub fn parse_feed_response(body: &Value, country: &str, category: TrendingCategory) -> FeedPage {
    let mut page = FeedPage::default();

    for section in feed_sections(body) {
        collect_section(section, country, category, &mut page);
    }
    page
}

/// Locate the section list in either an initial browse response or a
/// continuation response.
fn feed_sections(body: &Value) -> Vec<&Value> {
    // Initial response: tabs → sectionListRenderer.
    if let Some(tabs) = body["contents"]["twoColumnBrowseResultsRenderer"]["tabs"].as_array() {
        for tab in tabs {
            if let Some(sections) =
                tab["tabRenderer"]["content"]["sectionListRenderer"]["contents"].as_array()
            {
                if !sections.is_empty() {
                    return sections.iter().collect();
                }
            }
        }
    }
    // Continuation response: appended items.
    if let Some(actions) = body["onResponseReceivedActions"].as_array() {
        for action in actions {
            if let Some(items) = action["appendContinuationItemsAction"]["continuationItems"]
                .as_array()
            {
                return items.iter().collect();
            }
        }
    }
    Vec::new()
}

fn collect_section(section: &Value, country: &str, category: TrendingCategory, page: &mut FeedPage) {
    if let Some(token) =
        section["continuationItemRenderer"]["continuationEndpoint"]["continuationCommand"]["token"]
            .as_str()
    {
        page.continuation = Some(token.to_string());
        return;
    }

    let Some(contents) = section["itemSectionRenderer"]["contents"].as_array() else {
        return;
    };
    for content in contents {
        let shelf = &content["shelfRenderer"];
        if !shelf.is_null() {
            let shelf_category = classify_shelf(shelf, category);
            if let Some(items) =
                shelf["content"]["expandedShelfContentsRenderer"]["items"].as_array()
            {
                for item in items {
                    match parse_video_item(&item["videoRenderer"], country, shelf_category) {
                        Some(entry) => page.entries.push(entry),
                        None => page.malformed += 1,
                    }
                }
            }
            continue;
        }
        if let Some(items) = content["reelShelfRenderer"]["items"].as_array() {
            for item in items {
                match parse_short_item(&item["reelItemRenderer"], country, category) {
                    Some(entry) => page.entries.push(entry),
                    None => page.malformed += 1,
                }
            }
        }
    }
}

/// The `Now` tab mixes shelves; the one titled "Recently trending" carries
/// its own classification. Every other tab's shelves keep the requested
/// category.
fn classify_shelf(shelf: &Value, requested: TrendingCategory) -> TrendingCategory {
    if requested != TrendingCategory::Now {
        return requested;
    }
    let title = shelf["title"]["runs"][0]["text"]
        .as_str()
        .or_else(|| shelf["title"]["simpleText"].as_str())
        .unwrap_or("");
    if title.to_lowercase().contains("recently") {
        TrendingCategory::RecentlyTrending
    } else {
        TrendingCategory::Now
    }
}

fn parse_video_item(renderer: &Value, country: &str, category: TrendingCategory) -> Option<FeedEntry> {
    let video_id = renderer["videoId"].as_str()?;
    let title = renderer["title"]["runs"][0]["text"].as_str()?;
    Some(FeedEntry {
        video_id: video_id.to_string(),
        title: title.to_string(),
        kind: ItemKind::Video,
        category,
        country: country.to_string(),
        thumbnail_url: best_thumbnail(&renderer["thumbnail"]["thumbnails"]),
        description_snippet: renderer["descriptionSnippet"]["runs"][0]["text"]
            .as_str()
            .map(str::to_string),
        published_time_text: renderer["publishedTimeText"]["simpleText"]
            .as_str()
            .map(str::to_string),
        length_text: renderer["lengthText"]["simpleText"].as_str().map(str::to_string),
        view_count_text: renderer["viewCountText"]["simpleText"].as_str().map(str::to_string),
        creator_name: renderer["ownerText"]["runs"][0]["text"].as_str().map(str::to_string),
        creator_verified: Some(owner_verified(renderer)),
    })
}

/// Verified creators carry an owner badge on the renderer; an absent badge
/// list is an observed "not verified", not an unknown.
fn owner_verified(renderer: &Value) -> bool {
    renderer["ownerBadges"]
        .as_array()
        .map(|badges| {
            badges.iter().any(|badge| {
                let badge = &badge["metadataBadgeRenderer"];
                badge["tooltip"].as_str() == Some("Verified")
                    || matches!(badge["style"].as_str(), Some(s) if s.contains("VERIFIED"))
            })
        })
        .unwrap_or(false)
}

/// Shorts expose only id, headline, thumbnail and a view-count text; the
/// remaining basic fields stay empty by design.
fn parse_short_item(renderer: &Value, country: &str, category: TrendingCategory) -> Option<FeedEntry> {
    let video_id = renderer["videoId"].as_str()?;
    let title = renderer["headline"]["simpleText"].as_str()?;
    Some(FeedEntry {
        video_id: video_id.to_string(),
        title: title.to_string(),
        kind: ItemKind::Short,
        category,
        country: country.to_string(),
        thumbnail_url: best_thumbnail(&renderer["thumbnail"]["thumbnails"]),
        description_snippet: None,
        published_time_text: None,
        length_text: None,
        view_count_text: renderer["viewCountText"]["simpleText"].as_str().map(str::to_string),
        creator_name: None,
        creator_verified: None,
    })
}

/// Highest-resolution thumbnail available; the feed lists them small-first.
fn best_thumbnail(thumbnails: &Value) -> Option<String> {
    let list = thumbnails.as_array()?;
    list.last()
        .and_then(|t| t["url"].as_str())
        .map(str::to_string)
}
