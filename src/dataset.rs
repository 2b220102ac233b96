use crate::aggregator::VideoRecord;
use crate::error::Result;
use crate::types::{ItemKind, Likes};
use chrono::Utc;
use metrics::counter;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Explicit missing-value marker. `0` and the empty string are reserved for
/// genuinely observed values.
pub const MISSING: &str = "NA";

/// The dataset's fixed column schema, in order.
pub const COLUMNS: [&str; 24] = [
    "videoTitle",
    "videoId",
    "videoThumbnailUrl",
    "videoDescriptionSnippet",
    "videoRelativePublishedTimeText",
    "videoLength",
    "videoViewCountText",
    "videoCreatorName",
    "videoType",
    "trendingCountry",
    "exactViewNumber",
    "numberLikes",
    "videoDate",
    "creatorSubscriberNumber",
    "videoVerboseDescription",
    "numberOfComments",
    "isCreatorVerified",
    "videoKeywords",
    "videoLengthSeconds",
    "videoIsLiveContent",
    "videoCategory",
    "isFamilySafe",
    "videoExactPublishDate",
    "creatorUrl",
];

/// One finalized, immutable tabular snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct DatasetSnapshot {
    pub rows: Vec<Vec<String>>,
    /// Records dropped for violating the output schema (missing required
    /// key). Never aborts the snapshot.
    pub excluded: usize,
}

impl DatasetSnapshot {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(name: &str) -> Option<usize> {
        COLUMNS.iter().position(|c| *c == name)
    }
}

/// Pure projection of the final record list into the fixed schema. No
/// network I/O; deterministic given its input.
pub struct DatasetBuilder;

impl DatasetBuilder {
    pub fn build(records: &[VideoRecord]) -> DatasetSnapshot {
        let mut rows = Vec::with_capacity(records.len());
        let mut excluded = 0;

        // Records arrive in first-observation order and are not resorted.
        for record in records {
            match Self::project(record) {
                Some(row) => rows.push(row),
                None => {
                    warn!("Excluding record with missing required key (id='{}')", record.video_id);
                    excluded += 1;
                }
            }
        }
        if excluded > 0 {
            counter!("youtrend_rows_excluded_total").increment(excluded as u64);
        }
        debug!("Projected {} rows ({} excluded)", rows.len(), excluded);
        DatasetSnapshot { rows, excluded }
    }

    fn project(record: &VideoRecord) -> Option<Vec<String>> {
        // Required keys: a row without them violates the output schema.
        if record.video_id.is_empty() || record.title.is_empty() || record.country.is_empty() {
            return None;
        }

        let classification = match record.kind {
            ItemKind::Short => "Short".to_string(),
            ItemKind::Video => record
                .categories
                .iter()
                .map(|c| c.label())
                .collect::<Vec<_>>()
                .join("|"),
        };

        Some(vec![
            record.title.clone(),
            record.video_id.clone(),
            text(&record.thumbnail_url),
            text(&record.description_snippet),
            text(&record.published_time_text),
            text(&record.length_text),
            text(&record.view_count_text),
            text(&record.creator_name),
            classification,
            record.country.clone(),
            number(record.exact_view_count),
            likes(record.likes),
            record
                .published_at
                .map(|dt| dt.format("%Y-%m-%d").to_string())
                .unwrap_or_else(|| MISSING.to_string()),
            number(record.subscriber_count),
            text(&record.verbose_description),
            number(record.comment_count),
            boolean(record.creator_verified),
            keywords(&record.keywords),
            number(record.length_seconds),
            boolean(record.is_live),
            text(&record.category_label),
            boolean(record.family_safe),
            record
                .published_at
                .map(|dt| dt.to_rfc3339())
                .unwrap_or_else(|| MISSING.to_string()),
            text(&record.creator_url),
        ])
    }

    /// Write the snapshot as CSV, atomically: everything lands in a temp file
    /// first and is renamed under the final name only once complete.
    pub fn write_csv(snapshot: &DatasetSnapshot, output_dir: &Path, run_id: Uuid) -> Result<PathBuf> {
        fs::create_dir_all(output_dir)?;

        let date = Utc::now().format("%Y-%m-%d");
        let short_id = &run_id.to_string()[..8];
        let final_path = output_dir.join(format!("{date}_extraction_{short_id}.csv"));
        let tmp_path = output_dir.join(format!(".{date}_extraction_{short_id}.csv.tmp"));

        let mut content = String::new();
        content.push_str(&COLUMNS.join(","));
        content.push('\n');
        for row in &snapshot.rows {
            let cells: Vec<String> = row.iter().map(|c| escape_csv(c)).collect();
            content.push_str(&cells.join(","));
            content.push('\n');
        }

        fs::write(&tmp_path, content)?;
        fs::rename(&tmp_path, &final_path)?;
        info!("Wrote {} rows to {}", snapshot.rows.len(), final_path.display());
        Ok(final_path)
    }
}

fn text(value: &Option<String>) -> String {
    value.clone().unwrap_or_else(|| MISSING.to_string())
}

fn number(value: Option<u64>) -> String {
    value.map(|n| n.to_string()).unwrap_or_else(|| MISSING.to_string())
}

fn boolean(value: Option<bool>) -> String {
    match value {
        Some(true) => "true".to_string(),
        Some(false) => "false".to_string(),
        None => MISSING.to_string(),
    }
}

fn likes(value: Option<Likes>) -> String {
    match value {
        Some(Likes::Count(n)) => n.to_string(),
        Some(Likes::Disabled) => "disabled".to_string(),
        None => MISSING.to_string(),
    }
}

fn keywords(value: &Option<Vec<String>>) -> String {
    match value {
        Some(list) => list.join("|"),
        None => MISSING.to_string(),
    }
}

fn escape_csv(cell: &str) -> String {
    if cell.contains(',') || cell.contains('"') || cell.contains('\n') || cell.contains('\r') {
        format!("\"{}\"", cell.replace('"', "\"\""))
    } else {
        cell.to_string()
    }
}
