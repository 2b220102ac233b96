use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;

static HANDLE: OnceCell<PrometheusHandle> = OnceCell::new();

/// Install the recorder backing the `counter!`/`histogram!` macros. Without
/// this every recorded value is dropped on the floor.
pub fn init_metrics() {
    match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => {
            let _ = HANDLE.set(handle);
        }
        Err(e) => {
            println!("[metrics] Recorder install failed (possibly already installed): {}", e);
        }
    }
}

pub fn get_handle() -> Option<PrometheusHandle> {
    HANDLE.get().cloned()
}

/// Write the current exposition next to the log files so a finished run
/// leaves its counters inspectable.
pub fn flush_to_disk() {
    if let Some(handle) = get_handle() {
        let _ = std::fs::create_dir_all("logs");
        if let Err(e) = std::fs::write("logs/youtrend_metrics.prom", handle.render()) {
            tracing::warn!("Failed to write metrics exposition: {}", e);
        }
    }
}
