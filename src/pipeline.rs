use crate::aggregator::RecordAggregator;
use crate::cancel::CancelSignal;
use crate::config::Config;
use crate::dataset::DatasetBuilder;
use crate::enrich::{EnrichmentBatcher, EnrichmentSummary};
use crate::error::{Result, ScraperError};
use crate::feed::{FeedFetcher, PairOutcome};
use crate::quota::QuotaBudget;
use crate::types::{ChannelApi, TrendingCategory, TrendingFeed, VideoDetailApi};
use metrics::{counter, histogram};
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info, instrument};
use uuid::Uuid;

/// Result of one complete pipeline run.
#[derive(Debug, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub pairs: usize,
    pub incomplete_pairs: usize,
    pub pages: usize,
    pub feed_entries: usize,
    pub malformed_entries: usize,
    pub distinct_records: usize,
    pub enrichment: EnrichmentSummary,
    pub rows: usize,
    pub excluded_rows: usize,
    pub cancelled: bool,
    pub output_file: String,
}

/// The four-stage run: feed traversal → aggregation → enrichment → snapshot.
/// Each stage only starts once the previous one has fully settled; the
/// dataset builder in particular is a synchronization barrier, never a
/// concurrent stage.
pub struct Pipeline {
    feed: Arc<dyn TrendingFeed>,
    enrichment: Option<(Arc<dyn VideoDetailApi>, Arc<dyn ChannelApi>)>,
    config: Config,
}

impl Pipeline {
    pub fn new(
        feed: Arc<dyn TrendingFeed>,
        detail: Arc<dyn VideoDetailApi>,
        channels: Arc<dyn ChannelApi>,
        config: Config,
    ) -> Self {
        Self {
            feed,
            enrichment: Some((detail, channels)),
            config,
        }
    }

    /// A pipeline without enrichment sources; `run` will stop after the
    /// aggregation stage and snapshot basic fields only.
    pub fn new_feed_only(feed: Arc<dyn TrendingFeed>, config: Config) -> Self {
        Self {
            feed,
            enrichment: None,
            config,
        }
    }

    #[instrument(skip(self, cancel), fields(run_id = tracing::field::Empty))]
    pub async fn run(&self, cancel: CancelSignal) -> Result<RunReport> {
        let run_id = Uuid::new_v4();
        tracing::Span::current().record("run_id", tracing::field::display(run_id));
        info!("🚀 Starting trending pipeline run {}", run_id);
        println!("🚀 Starting trending pipeline run {run_id}");
        counter!("youtrend_pipeline_runs_total").increment(1);
        let t_pipeline = std::time::Instant::now();

        // Stage 1+2: paginated feed traversal, merging into the shared map.
        let aggregator = Arc::new(RecordAggregator::new(self.config.output.duplicate_policy));
        let outcomes = self.fetch_all_pairs(aggregator.clone(), &cancel).await;

        let pairs = outcomes.len();
        let incomplete_pairs = outcomes.iter().filter(|o| !o.complete).count();
        let pages: usize = outcomes.iter().map(|o| o.pages).sum();
        let feed_entries: usize = outcomes.iter().map(|o| o.entries).sum();
        let malformed_entries: usize = outcomes.iter().map(|o| o.malformed).sum();
        let distinct_records = aggregator.len();

        info!(
            "✅ Feed stage done: {} pairs ({} incomplete), {} pages, {} entries, {} malformed, {} distinct records",
            pairs, incomplete_pairs, pages, feed_entries, malformed_entries, distinct_records
        );
        println!(
            "✅ Feed stage done: {pairs} pairs ({incomplete_pairs} incomplete), {distinct_records} distinct records"
        );

        // Stage 3: batched enrichment, gated on the full pending-id set.
        let enrichment = match &self.enrichment {
            Some((detail, channels)) => {
                let budget = Arc::new(QuotaBudget::new(
                    self.config.enrichment.requests_per_min,
                    self.config.enrichment.quota_units,
                ));
                let batcher = EnrichmentBatcher::new(
                    detail.clone(),
                    channels.clone(),
                    budget,
                    self.config.enrichment.max_batch_size,
                    self.config.enrichment.max_concurrent_batches,
                    Duration::from_millis(self.config.scrape.retry_base_ms),
                );
                let summary = batcher.run(aggregator.clone(), &cancel).await;
                info!(
                    "✅ Enrichment done: {} videos enriched, {} unavailable, soft_stop={}",
                    summary.enriched_videos, summary.unavailable_videos, summary.quota_soft_stop
                );
                println!(
                    "✅ Enrichment done: {} videos enriched, {} unavailable",
                    summary.enriched_videos, summary.unavailable_videos
                );
                summary
            }
            None => {
                info!("Skipping enrichment stage (feed-only pipeline)");
                EnrichmentSummary::default()
            }
        };

        // Stage 4: snapshot. All upstream tasks have joined; records are
        // closed from here on. A cancelled run still snapshots what exists.
        let records = Arc::try_unwrap(aggregator)
            .map_err(|_| ScraperError::Api {
                message: "aggregator still shared after barrier".to_string(),
            })?
            .into_records();
        let snapshot = DatasetBuilder::build(&records);
        let output_file =
            DatasetBuilder::write_csv(&snapshot, Path::new(&self.config.output.dir), run_id)?;

        let total_secs = t_pipeline.elapsed().as_secs_f64();
        histogram!("youtrend_pipeline_duration_seconds").record(total_secs);
        info!("💾 Snapshot written to {} ({:.1}s total)", output_file.display(), total_secs);
        println!("💾 Snapshot written to {}", output_file.display());

        Ok(RunReport {
            run_id,
            pairs,
            incomplete_pairs,
            pages,
            feed_entries,
            malformed_entries,
            distinct_records,
            enrichment,
            rows: snapshot.len(),
            excluded_rows: snapshot.excluded,
            cancelled: cancel.is_cancelled(),
            output_file: output_file.to_string_lossy().to_string(),
        })
    }

    /// Run every (country, category) pair under the configured concurrency
    /// bound. Each pair owns its retry loop and failure containment; a pair
    /// that exhausts retries degrades to incomplete without touching the
    /// others.
    async fn fetch_all_pairs(
        &self,
        aggregator: Arc<RecordAggregator>,
        cancel: &CancelSignal,
    ) -> Vec<PairOutcome> {
        let fetcher = Arc::new(FeedFetcher::new(
            self.feed.clone(),
            self.config.scrape.page_retry_attempts,
            Duration::from_millis(self.config.scrape.retry_base_ms),
        ));
        let sem = Arc::new(Semaphore::new(self.config.scrape.max_concurrent_fetches));
        let mut tasks: JoinSet<PairOutcome> = JoinSet::new();

        for country in &self.config.scrape.countries {
            for category in self.config.requested_categories() {
                let fetcher = fetcher.clone();
                let sem = sem.clone();
                let aggregator = aggregator.clone();
                let cancel = cancel.clone();
                let country = country.clone();
                tasks.spawn(async move {
                    let _permit = sem.acquire_owned().await.expect("semaphore closed");
                    fetcher.run_pair(&country, category, &aggregator, &cancel).await
                });
            }
        }

        let mut outcomes = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(outcome) => {
                    if !outcome.complete {
                        counter!("youtrend_incomplete_pairs_total").increment(1);
                    }
                    outcomes.push(outcome);
                }
                Err(e) => error!("Feed task panicked: {}", e),
            }
        }
        outcomes
    }
}

/// Pairs that will be requested for a config, mostly useful for logging.
pub fn planned_pairs(config: &Config) -> Vec<(String, TrendingCategory)> {
    let mut pairs = Vec::new();
    for country in &config.scrape.countries {
        for category in config.requested_categories() {
            pairs.push((country.clone(), category));
        }
    }
    pairs
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn planned_pairs_cover_the_matrix() {
        let config: Config = toml::from_str(
            "[scrape]\ncountries = [\"US\", \"FR\"]\ncategories = [\"now\", \"music\"]\n",
        )
        .unwrap();
        let pairs = planned_pairs(&config);
        assert_eq!(pairs.len(), 4);
        assert!(pairs.contains(&("FR".to_string(), TrendingCategory::Music)));
    }
}
