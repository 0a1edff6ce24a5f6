use crate::ScrapeError;
use metrics::{gauge, histogram, increment_counter};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;
use tracing::info;

pub const JOBS_SUBMITTED: &str = "scrape_jobs_submitted_total";
pub const JOBS_COMPLETED: &str = "scrape_jobs_completed_total";
pub const JOB_DURATION: &str = "scrape_job_duration_seconds";
pub const RENDER_DURATION: &str = "scrape_render_duration_seconds";
pub const RETRIES: &str = "scrape_retries_total";
pub const ERRORS: &str = "scrape_errors_total";
pub const CACHE_LOOKUPS: &str = "scrape_cache_lookups_total";
pub const CACHE_ENTRIES: &str = "scrape_cache_entries";
pub const DEDUPLICATED: &str = "scrape_jobs_deduplicated_total";
pub const QUEUE_DEPTH: &str = "scrape_queue_depth";
pub const POOL_LEASED: &str = "scrape_pool_leased_sessions";
pub const SESSION_LAUNCHES: &str = "scrape_session_launches_total";
pub const MEMORY_USAGE: &str = "scrape_process_memory_bytes";

/// Install the Prometheus recorder with its scrape endpoint on `0.0.0.0:port`.
///
/// Must be called from inside a tokio runtime.
pub fn install_prometheus(port: u16) -> Result<(), ScrapeError> {
    let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, port));

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| ScrapeError::ConfigurationError(format!("metrics exporter: {e}")))?;

    info!("Prometheus metrics available on {}", addr);
    Ok(())
}

pub fn record_submission(cached: bool) {
    increment_counter!(JOBS_SUBMITTED);
    let outcome = if cached { "hit" } else { "miss" };
    increment_counter!(CACHE_LOOKUPS, "outcome" => outcome);
}

pub fn record_deduplicated() {
    increment_counter!(DEDUPLICATED);
}

pub fn record_job_completed(status: &'static str, duration: Duration) {
    increment_counter!(JOBS_COMPLETED, "status" => status);
    histogram!(JOB_DURATION, duration.as_secs_f64());
}

pub fn record_render(duration: Duration) {
    histogram!(RENDER_DURATION, duration.as_secs_f64());
}

pub fn record_retry() {
    increment_counter!(RETRIES);
}

pub fn record_error(error: &ScrapeError) {
    increment_counter!(ERRORS, "kind" => error.kind());
}

pub fn record_session_launch() {
    increment_counter!(SESSION_LAUNCHES);
}

pub fn set_queue_depth(depth: usize) {
    gauge!(QUEUE_DEPTH, depth as f64);
}

pub fn set_cache_entries(entries: usize) {
    gauge!(CACHE_ENTRIES, entries as f64);
}

pub fn set_pool_leased(leased: usize) {
    gauge!(POOL_LEASED, leased as f64);
}

pub fn set_memory_usage(bytes: usize) {
    gauge!(MEMORY_USAGE, bytes as f64);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_without_recorder_is_noop() {
        record_submission(true);
        record_job_completed("succeeded", Duration::from_millis(10));
        record_error(&ScrapeError::PoolExhausted);
        set_queue_depth(3);
    }
}
