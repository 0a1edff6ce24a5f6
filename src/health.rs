use crate::{CacheStats, PoolStats, ScrapeService, WorkerStats};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthLevel {
    Healthy,
    Warning,
    Critical,
}

#[derive(Debug, Clone)]
pub struct HealthThresholds {
    /// Queue fill ratio above which the service reports a warning
    pub queue_warning_ratio: f64,
    pub pool_warning_utilization: f64,
    /// Share of launched sessions that were discarded
    pub discard_warning_rate: f64,
    pub discard_critical_rate: f64,
    pub max_memory_usage: usize,
}

impl Default for HealthThresholds {
    fn default() -> Self {
        Self {
            queue_warning_ratio: 0.8,
            pool_warning_utilization: 0.9,
            discard_warning_rate: 0.2,
            discard_critical_rate: 0.5,
            max_memory_usage: 4 * 1024 * 1024 * 1024,
        }
    }
}

/// Point-in-time view of the orchestration core.
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub level: HealthLevel,
    /// The process is up and its queue accepts or drains work
    pub live: bool,
    /// New submissions can currently be admitted and executed
    pub ready: bool,
    pub queue_depth: usize,
    pub queue_capacity: usize,
    pub in_flight: usize,
    pub pool: PoolStats,
    pub lanes: Vec<WorkerStats>,
    pub cache: CacheStats,
    pub memory_usage: Option<usize>,
    pub uptime: Duration,
    pub checked_at: DateTime<Utc>,
}

impl HealthReport {
    pub fn is_ready(&self) -> bool {
        self.ready
    }
}

pub fn check_pool_health(stats: &PoolStats, thresholds: &HealthThresholds) -> HealthLevel {
    if stats.launched == 0 && stats.launch_failures > 0 {
        error!(
            "Browser pool health critical: {} launch failures, no session ever started",
            stats.launch_failures
        );
        return HealthLevel::Critical;
    }

    let discard_rate = if stats.launched > 0 {
        stats.discarded as f64 / stats.launched as f64
    } else {
        0.0
    };

    if discard_rate > thresholds.discard_critical_rate {
        error!(
            "Browser pool health critical: discard rate {:.2}%",
            discard_rate * 100.0
        );
        return HealthLevel::Critical;
    } else if discard_rate > thresholds.discard_warning_rate {
        warn!(
            "Browser pool health warning: discard rate {:.2}%",
            discard_rate * 100.0
        );
        return HealthLevel::Warning;
    }

    if stats.utilization() > thresholds.pool_warning_utilization {
        warn!(
            "Browser pool high utilization: {:.2}%",
            stats.utilization() * 100.0
        );
        return HealthLevel::Warning;
    }

    HealthLevel::Healthy
}

pub fn check_queue_health(depth: usize, capacity: usize, thresholds: &HealthThresholds) -> HealthLevel {
    if capacity == 0 || depth >= capacity {
        error!("Queue health critical: {} of {} slots used", depth, capacity);
        HealthLevel::Critical
    } else if depth as f64 / capacity as f64 > thresholds.queue_warning_ratio {
        warn!("Queue health warning: {} of {} slots used", depth, capacity);
        HealthLevel::Warning
    } else {
        HealthLevel::Healthy
    }
}

pub fn check_resource_health(memory_usage: Option<usize>, thresholds: &HealthThresholds) -> HealthLevel {
    match memory_usage {
        Some(bytes) if bytes > thresholds.max_memory_usage => {
            error!("Resource health critical: memory usage {} MB", bytes / 1024 / 1024);
            HealthLevel::Critical
        }
        Some(bytes) if bytes > thresholds.max_memory_usage * 8 / 10 => {
            warn!("Resource health warning: memory usage {} MB", bytes / 1024 / 1024);
            HealthLevel::Warning
        }
        _ => HealthLevel::Healthy,
    }
}

pub fn determine_overall_health(levels: &[HealthLevel]) -> HealthLevel {
    levels.iter().copied().max().unwrap_or(HealthLevel::Healthy)
}

/// Log a health summary every `period` until `stop` is cancelled.
pub fn spawn_health_monitor(
    service: Arc<ScrapeService>,
    period: Duration,
    stop: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(period);
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = stop.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let report = service.health().await;
            crate::metrics::set_pool_leased(report.pool.leased);
            if let Some(bytes) = report.memory_usage {
                crate::metrics::set_memory_usage(bytes);
            }

            match report.level {
                HealthLevel::Healthy => info!(
                    "System health: OK - queue {}/{}, sessions {}/{} leased, cache {} entries",
                    report.queue_depth,
                    report.queue_capacity,
                    report.pool.leased,
                    report.pool.capacity,
                    report.cache.entries
                ),
                HealthLevel::Warning => warn!(
                    "System health: WARNING - queue {}/{}, sessions {}/{} leased, discarded {}",
                    report.queue_depth,
                    report.queue_capacity,
                    report.pool.leased,
                    report.pool.capacity,
                    report.pool.discarded
                ),
                HealthLevel::Critical => error!(
                    "System health: CRITICAL - ready={}, queue {}/{}, launch failures {}",
                    report.ready,
                    report.queue_depth,
                    report.queue_capacity,
                    report.pool.launch_failures
                ),
            }
        }
    })
}
