use crate::aggregator::RecordAggregator;
use crate::cancel::CancelSignal;
use crate::error::ScraperError;
use crate::quota::{Acquire, QuotaBudget};
use crate::types::{ChannelApi, VideoDetailApi};
use metrics::{counter, histogram};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{info, instrument, warn};

/// Counters reported by one enrichment phase.
#[derive(Debug, Default, Clone, Serialize)]
pub struct EnrichmentSummary {
    pub video_batches: usize,
    pub channel_batches: usize,
    pub enriched_videos: usize,
    pub enriched_channels: usize,
    /// Ids whose enrichment failed for good; their records stay in the
    /// dataset with empty enriched fields.
    pub unavailable_videos: usize,
    /// Batches never issued because of cancellation or quota soft stop.
    pub skipped_batches: usize,
    pub quota_soft_stop: bool,
    /// Unit allowance left when the run settled.
    pub budget_remaining: u64,
}

#[derive(Debug, Default)]
struct BatchOutcome {
    enriched: usize,
    unavailable: usize,
    skipped: bool,
}

/// Batched enrichment over the pending id set: video details first, then
/// subscriber counts for the channels those details reveal. Batches never
/// exceed the per-call identifier ceiling, run bounded-parallel, and share
/// one quota budget. A failed batch is retried once with backoff, then its
/// ids are marked unavailable rather than dropped.
pub struct EnrichmentBatcher {
    detail: Arc<dyn VideoDetailApi>,
    channels: Arc<dyn ChannelApi>,
    budget: Arc<QuotaBudget>,
    max_batch_size: usize,
    max_concurrent_batches: usize,
    retry_base: Duration,
}

impl EnrichmentBatcher {
    pub fn new(
        detail: Arc<dyn VideoDetailApi>,
        channels: Arc<dyn ChannelApi>,
        budget: Arc<QuotaBudget>,
        max_batch_size: usize,
        max_concurrent_batches: usize,
        retry_base: Duration,
    ) -> Self {
        Self {
            detail,
            channels,
            budget,
            max_batch_size: max_batch_size.clamp(1, crate::constants::MAX_IDS_PER_CALL),
            max_concurrent_batches: max_concurrent_batches.max(1),
            retry_base,
        }
    }

    /// Run both enrichment phases against the aggregator. The channel phase
    /// only starts once every video batch has settled, because the channel id
    /// set is discovered by the video responses.
    #[instrument(skip(self, aggregator, cancel))]
    pub async fn run(
        &self,
        aggregator: Arc<RecordAggregator>,
        cancel: &CancelSignal,
    ) -> EnrichmentSummary {
        let mut summary = EnrichmentSummary::default();
        let soft_stop = Arc::new(AtomicBool::new(false));

        let video_ids = aggregator.pending_video_ids();
        info!("Enriching {} distinct videos", video_ids.len());
        let outcomes = self
            .run_video_batches(&video_ids, aggregator.clone(), cancel, soft_stop.clone())
            .await;
        summary.video_batches = outcomes.iter().filter(|o| !o.skipped).count();
        for outcome in &outcomes {
            summary.enriched_videos += outcome.enriched;
            summary.unavailable_videos += outcome.unavailable;
            summary.skipped_batches += outcome.skipped as usize;
        }

        let channel_ids = aggregator.pending_channel_ids();
        info!("Enriching {} distinct channels", channel_ids.len());
        let outcomes = self
            .run_channel_batches(&channel_ids, aggregator.clone(), cancel, soft_stop.clone())
            .await;
        summary.channel_batches = outcomes.iter().filter(|o| !o.skipped).count();
        for outcome in &outcomes {
            summary.enriched_channels += outcome.enriched;
            summary.skipped_batches += outcome.skipped as usize;
        }

        summary.budget_remaining = self.budget.remaining().await;
        // The allowance running dry on the last batch is still a soft stop:
        // any further call would be refused.
        summary.quota_soft_stop =
            soft_stop.load(Ordering::SeqCst) || self.budget.is_exhausted().await;
        if summary.quota_soft_stop {
            warn!(
                "Quota exhausted; finalized with partial enrichment ({} units left)",
                summary.budget_remaining
            );
        }
        summary
    }

    async fn run_video_batches(
        &self,
        ids: &[String],
        aggregator: Arc<RecordAggregator>,
        cancel: &CancelSignal,
        soft_stop: Arc<AtomicBool>,
    ) -> Vec<BatchOutcome> {
        let sem = Arc::new(Semaphore::new(self.max_concurrent_batches));
        let mut tasks: JoinSet<BatchOutcome> = JoinSet::new();

        for chunk in ids.chunks(self.max_batch_size) {
            let batch: Vec<String> = chunk.to_vec();
            let sem = sem.clone();
            let detail = self.detail.clone();
            let budget = self.budget.clone();
            let aggregator = aggregator.clone();
            let cancel = cancel.clone();
            let soft_stop = soft_stop.clone();
            let retry_base = self.retry_base;

            tasks.spawn(async move {
                let _permit = sem.acquire_owned().await.expect("semaphore closed");
                if cancel.is_cancelled() || soft_stop.load(Ordering::SeqCst) {
                    return BatchOutcome {
                        skipped: true,
                        ..Default::default()
                    };
                }
                if budget.acquire().await == Acquire::Exhausted {
                    soft_stop.store(true, Ordering::SeqCst);
                    return BatchOutcome {
                        skipped: true,
                        ..Default::default()
                    };
                }

                counter!("youtrend_video_batches_total").increment(1);
                let t_batch = std::time::Instant::now();
                // One retry with backoff, then the whole batch degrades to
                // unavailable.
                let mut result = detail.list_videos(&batch).await;
                if let Err(e) = &result {
                    if matches!(e, ScraperError::QuotaExhausted) {
                        budget.mark_exhausted().await;
                        soft_stop.store(true, Ordering::SeqCst);
                        return BatchOutcome {
                            skipped: true,
                            ..Default::default()
                        };
                    }
                    warn!("Video batch failed, retrying once: {}", e);
                    tokio::time::sleep(retry_base).await;
                    if budget.acquire().await == Acquire::Exhausted {
                        soft_stop.store(true, Ordering::SeqCst);
                        return BatchOutcome {
                            skipped: true,
                            ..Default::default()
                        };
                    }
                    result = detail.list_videos(&batch).await;
                }
                histogram!("youtrend_video_batch_duration_seconds")
                    .record(t_batch.elapsed().as_secs_f64());

                match result {
                    Ok(details) => {
                        // Match responses back by id; an id the API did not
                        // return is unavailable, not an error for the batch.
                        let mut returned: HashSet<&str> = HashSet::new();
                        for detail in &details {
                            aggregator.apply_video_detail(detail);
                            returned.insert(detail.video_id.as_str());
                        }
                        let mut outcome = BatchOutcome {
                            enriched: returned.len(),
                            ..Default::default()
                        };
                        for id in &batch {
                            if !returned.contains(id.as_str()) {
                                aggregator.mark_enrichment_unavailable(id);
                                outcome.unavailable += 1;
                            }
                        }
                        outcome
                    }
                    Err(ScraperError::QuotaExhausted) => {
                        budget.mark_exhausted().await;
                        soft_stop.store(true, Ordering::SeqCst);
                        BatchOutcome {
                            skipped: true,
                            ..Default::default()
                        }
                    }
                    Err(e) => {
                        warn!("Video batch failed permanently, {} ids unavailable: {}", batch.len(), e);
                        counter!("youtrend_video_batches_failed_total").increment(1);
                        for id in &batch {
                            aggregator.mark_enrichment_unavailable(id);
                        }
                        BatchOutcome {
                            unavailable: batch.len(),
                            ..Default::default()
                        }
                    }
                }
            });
        }

        let mut outcomes = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => warn!("Video batch task panicked: {}", e),
            }
        }
        outcomes
    }

    async fn run_channel_batches(
        &self,
        ids: &[String],
        aggregator: Arc<RecordAggregator>,
        cancel: &CancelSignal,
        soft_stop: Arc<AtomicBool>,
    ) -> Vec<BatchOutcome> {
        let sem = Arc::new(Semaphore::new(self.max_concurrent_batches));
        let mut tasks: JoinSet<BatchOutcome> = JoinSet::new();

        for chunk in ids.chunks(self.max_batch_size) {
            let batch: Vec<String> = chunk.to_vec();
            let sem = sem.clone();
            let channels = self.channels.clone();
            let budget = self.budget.clone();
            let aggregator = aggregator.clone();
            let cancel = cancel.clone();
            let soft_stop = soft_stop.clone();
            let retry_base = self.retry_base;

            tasks.spawn(async move {
                let _permit = sem.acquire_owned().await.expect("semaphore closed");
                if cancel.is_cancelled() || soft_stop.load(Ordering::SeqCst) {
                    return BatchOutcome {
                        skipped: true,
                        ..Default::default()
                    };
                }
                if budget.acquire().await == Acquire::Exhausted {
                    soft_stop.store(true, Ordering::SeqCst);
                    return BatchOutcome {
                        skipped: true,
                        ..Default::default()
                    };
                }

                counter!("youtrend_channel_batches_total").increment(1);
                let mut result = channels.list_channels(&batch).await;
                if let Err(e) = &result {
                    if matches!(e, ScraperError::QuotaExhausted) {
                        budget.mark_exhausted().await;
                        soft_stop.store(true, Ordering::SeqCst);
                        return BatchOutcome {
                            skipped: true,
                            ..Default::default()
                        };
                    }
                    warn!("Channel batch failed, retrying once: {}", e);
                    tokio::time::sleep(retry_base).await;
                    if budget.acquire().await == Acquire::Exhausted {
                        soft_stop.store(true, Ordering::SeqCst);
                        return BatchOutcome {
                            skipped: true,
                            ..Default::default()
                        };
                    }
                    result = channels.list_channels(&batch).await;
                }

                match result {
                    Ok(details) => {
                        for detail in &details {
                            aggregator.apply_channel_detail(detail);
                        }
                        BatchOutcome {
                            enriched: details.len(),
                            ..Default::default()
                        }
                    }
                    Err(ScraperError::QuotaExhausted) => {
                        budget.mark_exhausted().await;
                        soft_stop.store(true, Ordering::SeqCst);
                        BatchOutcome {
                            skipped: true,
                            ..Default::default()
                        }
                    }
                    Err(e) => {
                        // Subscriber counts stay empty for these channels;
                        // the video records themselves are unaffected.
                        warn!("Channel batch failed permanently: {}", e);
                        counter!("youtrend_channel_batches_failed_total").increment(1);
                        BatchOutcome::default()
                    }
                }
            });
        }

        let mut outcomes = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => warn!("Channel batch task panicked: {}", e),
            }
        }
        outcomes
    }
}
