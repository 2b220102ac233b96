use crate::config::DuplicatePolicy;
use crate::types::{ChannelDetail, FeedEntry, ItemKind, Likes, TrendingCategory, VideoDetail};
use chrono::{DateTime, Utc};
use metrics::counter;
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use tracing::debug;

/// Shard count for the record map. Merges for distinct videos proceed in
/// parallel; a given record's read-modify-write is serialized by its shard.
const SHARD_COUNT: usize = 16;

/// Canonical storage key. Under the per-country policy the same video
/// trending in two countries keeps two records; under the global policy it
/// collapses to one.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct RecordKey {
    video_id: String,
    country: Option<String>,
}

impl RecordKey {
    fn for_entry(entry: &FeedEntry, policy: DuplicatePolicy) -> Self {
        Self {
            video_id: entry.video_id.clone(),
            country: match policy {
                DuplicatePolicy::PerCountry => Some(entry.country.clone()),
                DuplicatePolicy::Global => None,
            },
        }
    }
}

/// The progressively-filled canonical representation of one trending video.
/// `video_id` never changes once assigned; every other field is filled at
/// most once and never downgraded back to `None`.
#[derive(Debug, Clone)]
pub struct VideoRecord {
    /// Insertion order of first observation, which is also final row order.
    pub seq: u64,
    pub video_id: String,
    pub country: String,
    /// Ordered set of categories this video appeared under.
    pub categories: Vec<TrendingCategory>,
    pub kind: ItemKind,

    // Basic fields, from the feed descriptor.
    pub title: String,
    pub thumbnail_url: Option<String>,
    pub description_snippet: Option<String>,
    pub published_time_text: Option<String>,
    pub length_text: Option<String>,
    pub view_count_text: Option<String>,
    pub creator_name: Option<String>,

    // Enriched fields, from the detail and channel sources.
    pub channel_id: Option<String>,
    pub exact_view_count: Option<u64>,
    pub likes: Option<Likes>,
    pub published_at: Option<DateTime<Utc>>,
    pub subscriber_count: Option<u64>,
    pub verbose_description: Option<String>,
    pub comment_count: Option<u64>,
    pub creator_verified: Option<bool>,
    pub keywords: Option<Vec<String>>,
    pub length_seconds: Option<u64>,
    pub is_live: Option<bool>,
    pub category_label: Option<String>,
    pub family_safe: Option<bool>,
    pub creator_url: Option<String>,

    /// Set when every enrichment attempt for this id failed for good.
    pub enrichment_unavailable: bool,
}

/// Fill a slot only if it is still empty and the incoming value is present.
/// This single helper carries both merge rules: first-writer-wins for basic
/// fields and monotonic no-clear fill for enriched ones.
fn fill<T>(slot: &mut Option<T>, value: Option<T>) {
    if slot.is_none() {
        if let Some(v) = value {
            *slot = Some(v);
        }
    }
}

impl VideoRecord {
    fn from_entry(seq: u64, entry: &FeedEntry) -> Self {
        Self {
            seq,
            video_id: entry.video_id.clone(),
            country: entry.country.clone(),
            categories: vec![entry.category],
            kind: entry.kind,
            title: entry.title.clone(),
            thumbnail_url: entry.thumbnail_url.clone(),
            description_snippet: entry.description_snippet.clone(),
            published_time_text: entry.published_time_text.clone(),
            length_text: entry.length_text.clone(),
            view_count_text: entry.view_count_text.clone(),
            creator_name: entry.creator_name.clone(),
            creator_verified: entry.creator_verified,
            channel_id: None,
            exact_view_count: None,
            likes: None,
            published_at: None,
            subscriber_count: None,
            verbose_description: None,
            comment_count: None,
            keywords: None,
            length_seconds: None,
            is_live: None,
            category_label: None,
            family_safe: None,
            creator_url: None,
            enrichment_unavailable: false,
        }
    }

    fn merge_entry(&mut self, entry: &FeedEntry) {
        if !self.categories.contains(&entry.category) {
            self.categories.push(entry.category);
        }
        fill(&mut self.thumbnail_url, entry.thumbnail_url.clone());
        fill(&mut self.description_snippet, entry.description_snippet.clone());
        fill(&mut self.published_time_text, entry.published_time_text.clone());
        fill(&mut self.length_text, entry.length_text.clone());
        fill(&mut self.view_count_text, entry.view_count_text.clone());
        fill(&mut self.creator_name, entry.creator_name.clone());
        fill(&mut self.creator_verified, entry.creator_verified);
    }

    fn apply_detail(&mut self, detail: &VideoDetail) {
        fill(&mut self.channel_id, detail.channel_id.clone());
        fill(&mut self.exact_view_count, detail.view_count);
        fill(&mut self.likes, detail.likes);
        fill(&mut self.published_at, detail.published_at);
        fill(&mut self.verbose_description, detail.description.clone());
        fill(&mut self.comment_count, detail.comment_count);
        fill(&mut self.keywords, detail.keywords.clone());
        fill(&mut self.length_seconds, detail.length_seconds);
        fill(&mut self.is_live, detail.is_live);
        fill(&mut self.category_label, detail.category_label.clone());
        fill(&mut self.family_safe, detail.family_safe);
        fill(&mut self.creator_url, detail.creator_url.clone());
    }

    fn apply_channel(&mut self, detail: &ChannelDetail) {
        fill(&mut self.subscriber_count, detail.subscriber_count);
        fill(&mut self.creator_verified, detail.verified);
    }
}

/// Sharded `videoId → VideoRecord` map. Feed tasks merge concurrently; each
/// record's merge is atomic under its shard lock. No network I/O happens
/// here.
pub struct RecordAggregator {
    shards: Vec<Mutex<HashMap<RecordKey, VideoRecord>>>,
    next_seq: AtomicU64,
    policy: DuplicatePolicy,
}

impl RecordAggregator {
    pub fn new(policy: DuplicatePolicy) -> Self {
        Self {
            shards: (0..SHARD_COUNT).map(|_| Mutex::new(HashMap::new())).collect(),
            next_seq: AtomicU64::new(0),
            policy,
        }
    }

    fn shard(&self, key: &RecordKey) -> &Mutex<HashMap<RecordKey, VideoRecord>> {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        &self.shards[(hasher.finish() as usize) % SHARD_COUNT]
    }

    /// Merge one descriptor: create the record on first sight, otherwise
    /// union the category tag and fill still-empty basic fields.
    pub fn observe(&self, entry: &FeedEntry) {
        let key = RecordKey::for_entry(entry, self.policy);
        let mut shard = self.shard(&key).lock().unwrap();
        match shard.get_mut(&key) {
            Some(record) => {
                record.merge_entry(entry);
                counter!("youtrend_descriptors_merged_total").increment(1);
            }
            None => {
                let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
                shard.insert(key, VideoRecord::from_entry(seq, entry));
                counter!("youtrend_records_created_total").increment(1);
            }
        }
    }

    /// Distinct video ids still awaiting enrichment, in first-observation
    /// order. Under the per-country policy the same id may back several
    /// records but is listed once.
    pub fn pending_video_ids(&self) -> Vec<String> {
        let mut seen: Vec<(u64, String)> = Vec::new();
        for shard in &self.shards {
            let shard = shard.lock().unwrap();
            for record in shard.values() {
                if !seen.iter().any(|(_, id)| id == &record.video_id) {
                    seen.push((record.seq, record.video_id.clone()));
                }
            }
        }
        seen.sort_by_key(|(seq, _)| *seq);
        seen.into_iter().map(|(_, id)| id).collect()
    }

    /// Distinct channel ids discovered by the detail phase, dedup'd in
    /// first-observation order. The same creator often owns several trending
    /// videos; one lookup covers them all.
    pub fn pending_channel_ids(&self) -> Vec<String> {
        let mut seen: Vec<(u64, String)> = Vec::new();
        for shard in &self.shards {
            let shard = shard.lock().unwrap();
            for record in shard.values() {
                if let Some(channel_id) = &record.channel_id {
                    if !seen.iter().any(|(_, id)| id == channel_id) {
                        seen.push((record.seq, channel_id.clone()));
                    }
                }
            }
        }
        seen.sort_by_key(|(seq, _)| *seq);
        seen.into_iter().map(|(_, id)| id).collect()
    }

    /// Apply a detail payload to every record carrying its video id. A
    /// populated field is never overwritten, so replays and duplicate
    /// responses are no-ops.
    pub fn apply_video_detail(&self, detail: &VideoDetail) {
        for shard in &self.shards {
            let mut shard = shard.lock().unwrap();
            for record in shard.values_mut() {
                if record.video_id == detail.video_id {
                    record.apply_detail(detail);
                }
            }
        }
    }

    pub fn apply_channel_detail(&self, detail: &ChannelDetail) {
        for shard in &self.shards {
            let mut shard = shard.lock().unwrap();
            for record in shard.values_mut() {
                if record.channel_id.as_deref() == Some(detail.channel_id.as_str()) {
                    record.apply_channel(detail);
                }
            }
        }
    }

    /// Mark every record for this video id as enrichment-unavailable. The
    /// record stays in the dataset; its enriched fields stay empty.
    pub fn mark_enrichment_unavailable(&self, video_id: &str) {
        for shard in &self.shards {
            let mut shard = shard.lock().unwrap();
            for record in shard.values_mut() {
                if record.video_id == video_id {
                    record.enrichment_unavailable = true;
                }
            }
        }
        counter!("youtrend_enrichment_unavailable_total").increment(1);
    }

    pub fn len(&self) -> usize {
        self.shards.iter().map(|s| s.lock().unwrap().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drain into the final record list, ordered by first observation. This
    /// is the synchronization-barrier handoff to the dataset builder; records
    /// are immutable from here on.
    pub fn into_records(self) -> Vec<VideoRecord> {
        let mut records: Vec<VideoRecord> = self
            .shards
            .into_iter()
            .flat_map(|shard| shard.into_inner().unwrap().into_values())
            .collect();
        records.sort_by_key(|r| r.seq);
        debug!("Aggregator drained {} records", records.len());
        records
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(video_id: &str, country: &str, category: TrendingCategory) -> FeedEntry {
        FeedEntry {
            video_id: video_id.to_string(),
            title: format!("title-{video_id}"),
            kind: ItemKind::Video,
            category,
            country: country.to_string(),
            thumbnail_url: Some(format!("https://img/{video_id}.jpg")),
            description_snippet: None,
            published_time_text: Some("1 day ago".to_string()),
            length_text: Some("3:21".to_string()),
            view_count_text: Some("1,000 views".to_string()),
            creator_name: Some("creator".to_string()),
            creator_verified: Some(false),
        }
    }

    #[test]
    fn cross_category_duplicate_collapses_to_one_record() {
        let agg = RecordAggregator::new(DuplicatePolicy::PerCountry);
        agg.observe(&entry("vid1", "US", TrendingCategory::Now));
        agg.observe(&entry("vid1", "US", TrendingCategory::Music));

        let records = agg.into_records();
        assert_eq!(records.len(), 1);
        assert_eq!(
            records[0].categories,
            vec![TrendingCategory::Now, TrendingCategory::Music]
        );
    }

    #[test]
    fn per_country_policy_keeps_one_record_per_country() {
        let agg = RecordAggregator::new(DuplicatePolicy::PerCountry);
        agg.observe(&entry("vid1", "US", TrendingCategory::Now));
        agg.observe(&entry("vid1", "FR", TrendingCategory::Now));
        assert_eq!(agg.len(), 2);
        // But the id is enriched once.
        assert_eq!(agg.pending_video_ids(), vec!["vid1".to_string()]);
    }

    #[test]
    fn global_policy_collapses_across_countries() {
        let agg = RecordAggregator::new(DuplicatePolicy::Global);
        agg.observe(&entry("vid1", "US", TrendingCategory::Now));
        agg.observe(&entry("vid1", "FR", TrendingCategory::Music));
        let records = agg.into_records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].country, "US");
        assert_eq!(records[0].categories.len(), 2);
    }

    #[test]
    fn basic_fields_are_first_writer_wins() {
        let agg = RecordAggregator::new(DuplicatePolicy::PerCountry);
        let mut sparse = entry("vid1", "US", TrendingCategory::Now);
        sparse.creator_name = None;
        agg.observe(&sparse);

        let mut second = entry("vid1", "US", TrendingCategory::Now);
        second.creator_name = Some("late creator".to_string());
        second.length_text = Some("9:99".to_string());
        agg.observe(&second);

        let records = agg.into_records();
        // Empty slot filled by the later descriptor...
        assert_eq!(records[0].creator_name.as_deref(), Some("late creator"));
        // ...but an occupied slot is never overwritten.
        assert_eq!(records[0].length_text.as_deref(), Some("3:21"));
    }

    #[test]
    fn enrichment_fill_is_monotonic() {
        let agg = RecordAggregator::new(DuplicatePolicy::PerCountry);
        agg.observe(&entry("vid1", "US", TrendingCategory::Now));

        agg.apply_video_detail(&VideoDetail {
            video_id: "vid1".to_string(),
            view_count: Some(500),
            likes: Some(Likes::Count(10)),
            channel_id: Some("UC1".to_string()),
            ..Default::default()
        });
        // A later empty response for the same id must not clear anything.
        agg.apply_video_detail(&VideoDetail {
            video_id: "vid1".to_string(),
            ..Default::default()
        });

        let records = agg.into_records();
        assert_eq!(records[0].exact_view_count, Some(500));
        assert_eq!(records[0].likes, Some(Likes::Count(10)));
        assert_eq!(records[0].channel_id.as_deref(), Some("UC1"));
    }

    #[test]
    fn detail_applies_to_every_country_record() {
        let agg = RecordAggregator::new(DuplicatePolicy::PerCountry);
        agg.observe(&entry("vid1", "US", TrendingCategory::Now));
        agg.observe(&entry("vid1", "FR", TrendingCategory::Now));
        agg.apply_video_detail(&VideoDetail {
            video_id: "vid1".to_string(),
            view_count: Some(7),
            ..Default::default()
        });
        for record in agg.into_records() {
            assert_eq!(record.exact_view_count, Some(7));
        }
    }

    #[test]
    fn channel_ids_are_deduplicated_in_order() {
        let agg = RecordAggregator::new(DuplicatePolicy::PerCountry);
        agg.observe(&entry("vid1", "US", TrendingCategory::Now));
        agg.observe(&entry("vid2", "US", TrendingCategory::Now));
        agg.observe(&entry("vid3", "US", TrendingCategory::Now));
        for (vid, chan) in [("vid1", "UCa"), ("vid2", "UCb"), ("vid3", "UCa")] {
            agg.apply_video_detail(&VideoDetail {
                video_id: vid.to_string(),
                channel_id: Some(chan.to_string()),
                ..Default::default()
            });
        }
        assert_eq!(agg.pending_channel_ids(), vec!["UCa".to_string(), "UCb".to_string()]);
    }

    #[test]
    fn feed_badge_wins_over_later_channel_verification() {
        let agg = RecordAggregator::new(DuplicatePolicy::PerCountry);
        let mut badged = entry("vid1", "US", TrendingCategory::Now);
        badged.creator_verified = Some(true);
        agg.observe(&badged);
        agg.apply_video_detail(&VideoDetail {
            video_id: "vid1".to_string(),
            channel_id: Some("UC1".to_string()),
            ..Default::default()
        });
        // The channel lookup reports nothing either way; the badge stands.
        agg.apply_channel_detail(&ChannelDetail {
            channel_id: "UC1".to_string(),
            subscriber_count: Some(10),
            verified: None,
        });
        let records = agg.into_records();
        assert_eq!(records[0].creator_verified, Some(true));
        assert_eq!(records[0].subscriber_count, Some(10));
    }

    #[test]
    fn channel_verification_fills_records_without_a_badge() {
        let agg = RecordAggregator::new(DuplicatePolicy::PerCountry);
        let mut badgeless = entry("vid1", "US", TrendingCategory::Now);
        badgeless.creator_verified = None;
        agg.observe(&badgeless);
        agg.apply_video_detail(&VideoDetail {
            video_id: "vid1".to_string(),
            channel_id: Some("UC1".to_string()),
            ..Default::default()
        });
        agg.apply_channel_detail(&ChannelDetail {
            channel_id: "UC1".to_string(),
            subscriber_count: None,
            verified: Some(true),
        });
        assert_eq!(agg.into_records()[0].creator_verified, Some(true));
    }

    #[test]
    fn unavailable_mark_keeps_the_record() {
        let agg = RecordAggregator::new(DuplicatePolicy::PerCountry);
        agg.observe(&entry("vid1", "US", TrendingCategory::Now));
        agg.mark_enrichment_unavailable("vid1");
        let records = agg.into_records();
        assert_eq!(records.len(), 1);
        assert!(records[0].enrichment_unavailable);
        assert_eq!(records[0].exact_view_count, None);
    }

    #[test]
    fn records_come_out_in_first_observation_order() {
        let agg = RecordAggregator::new(DuplicatePolicy::PerCountry);
        for id in ["z9", "a1", "m5"] {
            agg.observe(&entry(id, "US", TrendingCategory::Now));
        }
        let ids: Vec<String> = agg.into_records().into_iter().map(|r| r.video_id).collect();
        assert_eq!(ids, vec!["z9", "a1", "m5"]);
    }
}
