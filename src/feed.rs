use crate::aggregator::RecordAggregator;
use crate::cancel::CancelSignal;
use crate::error::Result;
use crate::types::{FeedPage, TrendingCategory, TrendingFeed};
use metrics::{counter, histogram};
use rand::Rng;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// Outcome of one (country, category) feed traversal.
#[derive(Debug, Clone, Serialize)]
pub struct PairOutcome {
    pub country: String,
    pub category: TrendingCategory,
    pub pages: usize,
    pub entries: usize,
    pub malformed: usize,
    /// False when retries were exhausted or the run was cancelled mid-pair.
    /// Pages already merged stay valid either way.
    pub complete: bool,
}

/// Paginated feed traversal for (country, category) pairs. Each pair gets one
/// full pass over its continuation chain; transient page failures retry with
/// bounded exponential backoff and jitter, then degrade the pair to
/// incomplete.
pub struct FeedFetcher {
    feed: Arc<dyn TrendingFeed>,
    retry_attempts: u32,
    retry_base: Duration,
}

impl FeedFetcher {
    pub fn new(feed: Arc<dyn TrendingFeed>, retry_attempts: u32, retry_base: Duration) -> Self {
        Self {
            feed,
            retry_attempts: retry_attempts.max(1),
            retry_base,
        }
    }

    /// Traverse one pair to completion, merging every descriptor into the
    /// aggregator as it arrives.
    #[instrument(skip(self, aggregator, cancel), fields(country = %country, category = %category.label()))]
    pub async fn run_pair(
        &self,
        country: &str,
        category: TrendingCategory,
        aggregator: &RecordAggregator,
        cancel: &CancelSignal,
    ) -> PairOutcome {
        let mut outcome = PairOutcome {
            country: country.to_string(),
            category,
            pages: 0,
            entries: 0,
            malformed: 0,
            complete: true,
        };
        let mut continuation: Option<String> = None;

        loop {
            if cancel.is_cancelled() {
                debug!("Cancelled before next page, leaving pair incomplete");
                outcome.complete = false;
                break;
            }

            let t_page = std::time::Instant::now();
            let page = match self
                .fetch_page_with_retry(country, category, continuation.as_deref())
                .await
            {
                Ok(page) => page,
                Err(e) => {
                    warn!("Giving up on page after retries: {}", e);
                    counter!("youtrend_feed_pages_failed_total").increment(1);
                    outcome.complete = false;
                    break;
                }
            };
            histogram!("youtrend_feed_page_duration_seconds").record(t_page.elapsed().as_secs_f64());
            counter!("youtrend_feed_pages_total").increment(1);

            outcome.pages += 1;
            outcome.entries += page.entries.len();
            outcome.malformed += page.malformed;
            if page.malformed > 0 {
                counter!("youtrend_feed_malformed_entries_total").increment(page.malformed as u64);
            }
            for entry in &page.entries {
                aggregator.observe(entry);
            }

            // An absent token is normal completion, even on an empty page.
            match page.continuation {
                Some(token) => continuation = Some(token),
                None => break,
            }
        }

        info!(
            "Pair finished: {} pages, {} entries, {} malformed, complete={}",
            outcome.pages, outcome.entries, outcome.malformed, outcome.complete
        );
        outcome
    }

    async fn fetch_page_with_retry(
        &self,
        country: &str,
        category: TrendingCategory,
        continuation: Option<&str>,
    ) -> Result<FeedPage> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.feed.fetch_page(country, category, continuation).await {
                Ok(page) => return Ok(page),
                Err(e) if e.is_transient() && attempt < self.retry_attempts => {
                    let backoff = self.retry_base * 2u32.saturating_pow(attempt - 1);
                    let jitter = Duration::from_millis(rand::thread_rng().gen_range(0..250));
                    warn!(
                        "Transient page failure (attempt {}/{}), backing off {:?}: {}",
                        attempt, self.retry_attempts, backoff, e
                    );
                    tokio::time::sleep(backoff + jitter).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DuplicatePolicy;
    use crate::error::ScraperError;
    use crate::types::{FeedEntry, ItemKind};
    use std::sync::Mutex;

    /// Scripted feed: one response per expected continuation token.
    struct ScriptedFeed {
        pages: Mutex<Vec<(Option<String>, Result<FeedPage>)>>,
    }

    impl ScriptedFeed {
        fn new(pages: Vec<(Option<&str>, Result<FeedPage>)>) -> Self {
            Self {
                pages: Mutex::new(
                    pages
                        .into_iter()
                        .map(|(tok, page)| (tok.map(str::to_string), page))
                        .collect(),
                ),
            }
        }
    }

    #[async_trait::async_trait]
    impl TrendingFeed for ScriptedFeed {
        async fn fetch_page(
            &self,
            _country: &str,
            _category: TrendingCategory,
            continuation: Option<&str>,
        ) -> Result<FeedPage> {
            let mut pages = self.pages.lock().unwrap();
            assert!(!pages.is_empty(), "fetch_page called more times than scripted");
            let (expected, page) = pages.remove(0);
            assert_eq!(expected.as_deref(), continuation);
            page
        }
    }

    fn page_with(ids: &[&str], continuation: Option<&str>) -> FeedPage {
        FeedPage {
            entries: ids
                .iter()
                .map(|id| FeedEntry {
                    video_id: id.to_string(),
                    title: format!("t-{id}"),
                    kind: ItemKind::Video,
                    category: TrendingCategory::Now,
                    country: "US".to_string(),
                    thumbnail_url: None,
                    description_snippet: None,
                    published_time_text: None,
                    length_text: None,
                    view_count_text: None,
                    creator_name: None,
                    creator_verified: None,
                })
                .collect(),
            continuation: continuation.map(str::to_string),
            malformed: 0,
        }
    }

    fn fetcher(feed: ScriptedFeed) -> FeedFetcher {
        FeedFetcher::new(Arc::new(feed), 3, Duration::from_millis(1))
    }

    #[tokio::test]
    async fn follows_continuations_until_token_runs_out() {
        // T1 → T2 → null means exactly three pages.
        let feed = ScriptedFeed::new(vec![
            (None, Ok(page_with(&["v1"], Some("T1")))),
            (Some("T1"), Ok(page_with(&["v2"], Some("T2")))),
            (Some("T2"), Ok(page_with(&["v3"], None))),
        ]);
        let aggregator = RecordAggregator::new(DuplicatePolicy::PerCountry);
        let outcome = fetcher(feed)
            .run_pair("US", TrendingCategory::Now, &aggregator, &CancelSignal::new())
            .await;
        assert_eq!(outcome.pages, 3);
        assert_eq!(outcome.entries, 3);
        assert!(outcome.complete);
        assert_eq!(aggregator.len(), 3);
    }

    #[tokio::test]
    async fn empty_tokenless_page_is_normal_completion() {
        let feed = ScriptedFeed::new(vec![(None, Ok(page_with(&[], None)))]);
        let aggregator = RecordAggregator::new(DuplicatePolicy::PerCountry);
        let outcome = fetcher(feed)
            .run_pair("US", TrendingCategory::Now, &aggregator, &CancelSignal::new())
            .await;
        assert!(outcome.complete);
        assert_eq!(outcome.pages, 1);
        assert_eq!(outcome.entries, 0);
    }

    #[tokio::test]
    async fn transient_failure_retries_then_succeeds() {
        let timeout_err = || {
            ScraperError::Io(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                "simulated timeout",
            ))
        };
        let feed = ScriptedFeed::new(vec![
            (None, Err(timeout_err())),
            (None, Ok(page_with(&["v1"], None))),
        ]);
        let aggregator = RecordAggregator::new(DuplicatePolicy::PerCountry);
        let outcome = fetcher(feed)
            .run_pair("US", TrendingCategory::Now, &aggregator, &CancelSignal::new())
            .await;
        assert!(outcome.complete);
        assert_eq!(outcome.entries, 1);
    }

    #[tokio::test]
    async fn exhausted_retries_leave_prior_pages_valid() {
        let timeout_err = || {
            ScraperError::Io(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                "simulated timeout",
            ))
        };
        let feed = ScriptedFeed::new(vec![
            (None, Ok(page_with(&["v1"], Some("T1")))),
            (Some("T1"), Err(timeout_err())),
            (Some("T1"), Err(timeout_err())),
            (Some("T1"), Err(timeout_err())),
        ]);
        let aggregator = RecordAggregator::new(DuplicatePolicy::PerCountry);
        let outcome = fetcher(feed)
            .run_pair("US", TrendingCategory::Now, &aggregator, &CancelSignal::new())
            .await;
        assert!(!outcome.complete);
        assert_eq!(outcome.pages, 1);
        assert_eq!(aggregator.len(), 1);
    }

    #[tokio::test]
    async fn permanent_failure_does_not_retry() {
        let feed = ScriptedFeed::new(vec![(
            None,
            Err(ScraperError::Api {
                message: "permanent".to_string(),
            }),
        )]);
        let aggregator = RecordAggregator::new(DuplicatePolicy::PerCountry);
        let outcome = fetcher(feed)
            .run_pair("US", TrendingCategory::Now, &aggregator, &CancelSignal::new())
            .await;
        assert!(!outcome.complete);
        assert_eq!(outcome.pages, 0);
    }

    #[tokio::test]
    async fn cancellation_stops_before_next_page() {
        let cancel = CancelSignal::new();
        cancel.cancel();
        let feed = ScriptedFeed::new(vec![]);
        let aggregator = RecordAggregator::new(DuplicatePolicy::PerCountry);
        let outcome = fetcher(feed)
            .run_pair("US", TrendingCategory::Now, &aggregator, &cancel)
            .await;
        assert!(!outcome.complete);
        assert_eq!(outcome.pages, 0);
    }

    #[tokio::test]
    async fn malformed_entries_are_counted() {
        let mut page = page_with(&["v1"], None);
        page.malformed = 2;
        let feed = ScriptedFeed::new(vec![(None, Ok(page))]);
        let aggregator = RecordAggregator::new(DuplicatePolicy::PerCountry);
        let outcome = fetcher(feed)
            .run_pair("US", TrendingCategory::Now, &aggregator, &CancelSignal::new())
            .await;
        assert_eq!(outcome.malformed, 2);
        assert_eq!(outcome.entries, 1);
    }
}
