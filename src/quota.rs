use std::time::{Duration, Instant};
use tokio::sync::Mutex;

/// Outcome of asking the budget for permission to issue one call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acquire {
    Granted,
    /// The run-wide allowance is gone (locally counted down or reported by
    /// the API). Callers stop issuing new work and finalize with what they
    /// have.
    Exhausted,
}

#[derive(Debug)]
struct BudgetState {
    /// Token bucket for request pacing, refilled continuously.
    tokens: f64,
    last_refill: Instant,
    /// Remaining call allowance for the run. None once the API itself has
    /// signalled exhaustion.
    remaining_units: Option<u64>,
}

/// Process-wide API budget: paces calls under a requests-per-minute ceiling
/// and counts down a finite unit allowance. All state sits behind one mutex
/// so "remaining quota" reads are consistent snapshots, never stale.
#[derive(Debug)]
pub struct QuotaBudget {
    requests_per_min: u64,
    state: Mutex<BudgetState>,
}

impl QuotaBudget {
    pub fn new(requests_per_min: u64, quota_units: u64) -> Self {
        Self {
            requests_per_min,
            state: Mutex::new(BudgetState {
                tokens: requests_per_min as f64,
                last_refill: Instant::now(),
                remaining_units: Some(quota_units),
            }),
        }
    }

    /// Acquire permission for one API call, sleeping as needed to stay under
    /// the rate ceiling. Returns `Exhausted` without sleeping when the unit
    /// allowance is gone.
    pub async fn acquire(&self) -> Acquire {
        loop {
            let mut state = self.state.lock().await;
            match state.remaining_units {
                Some(0) | None => return Acquire::Exhausted,
                Some(_) => {}
            }

            if self.requests_per_min == 0 {
                // No pacing configured; only the unit allowance applies.
                if let Some(units) = state.remaining_units.as_mut() {
                    *units -= 1;
                }
                return Acquire::Granted;
            }

            let capacity = self.requests_per_min as f64;
            let refill_rate = capacity / 60.0; // tokens per second
            let now = Instant::now();
            let elapsed = now.duration_since(state.last_refill).as_secs_f64();
            state.tokens = (state.tokens + elapsed * refill_rate).min(capacity);
            state.last_refill = now;

            if state.tokens >= 1.0 {
                state.tokens -= 1.0;
                if let Some(units) = state.remaining_units.as_mut() {
                    *units -= 1;
                }
                return Acquire::Granted;
            }

            let need = 1.0 - state.tokens;
            let secs = need / refill_rate;
            drop(state);
            tokio::time::sleep(Duration::from_secs_f64(secs.max(0.001))).await;
        }
    }

    /// Record a server-side quota-exhaustion signal. Subsequent `acquire`
    /// calls return `Exhausted` immediately.
    pub async fn mark_exhausted(&self) {
        let mut state = self.state.lock().await;
        state.remaining_units = None;
    }

    /// Consistent snapshot of the remaining unit allowance.
    pub async fn remaining(&self) -> u64 {
        self.state.lock().await.remaining_units.unwrap_or(0)
    }

    pub async fn is_exhausted(&self) -> bool {
        self.remaining().await == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn grants_until_units_run_out() {
        let budget = QuotaBudget::new(0, 2);
        assert_eq!(budget.acquire().await, Acquire::Granted);
        assert_eq!(budget.acquire().await, Acquire::Granted);
        assert_eq!(budget.acquire().await, Acquire::Exhausted);
        assert_eq!(budget.remaining().await, 0);
    }

    #[tokio::test]
    async fn server_signal_stops_further_grants() {
        let budget = QuotaBudget::new(0, 100);
        assert_eq!(budget.acquire().await, Acquire::Granted);
        budget.mark_exhausted().await;
        assert_eq!(budget.acquire().await, Acquire::Exhausted);
        assert!(budget.is_exhausted().await);
    }

    #[tokio::test]
    async fn pacing_still_grants_within_capacity() {
        // Fresh bucket starts full, so the first few calls pass untimed.
        let budget = QuotaBudget::new(600, 10);
        for _ in 0..3 {
            assert_eq!(budget.acquire().await, Acquire::Granted);
        }
        assert_eq!(budget.remaining().await, 7);
    }
}
