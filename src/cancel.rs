use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Run-wide cancellation signal. Cancellation stops new pages and batches
/// from starting; in-flight calls finish and the run still snapshots what it
/// has.
#[derive(Clone, Default)]
pub struct CancelSignal {
    cancelled: Arc<AtomicBool>,
}

impl CancelSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Arm a deadline after which the run is cancelled.
    pub fn arm_deadline(&self, deadline: Duration) {
        let signal = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(deadline).await;
            if !signal.is_cancelled() {
                info!("Run deadline reached, cancelling");
                signal.cancel();
            }
        });
    }
}
