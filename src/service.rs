//! Intake and lifecycle of the orchestration core.

use crate::health::{
    check_pool_health, check_queue_health, check_resource_health, determine_overall_health,
    HealthReport, HealthThresholds,
};
use crate::job::Admission;
use crate::{
    check_url_safety, process_memory_usage, BrowserPool, CacheStats, CompletionHandle, Config,
    Fingerprint, Job, JobId, JobOutcome, JobQueue, JobRegistry, JobStatus, Orchestrator,
    PoolStats, ResultCache, ScrapeError, ScrapeRequest, ScrapeResult, SessionLauncher,
    StrategyRegistry, WorkerPool,
};
use chrono::Utc;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// What `submit` hands back to the caller.
#[derive(Debug)]
pub enum Submission {
    /// Served from the result cache; no job was created
    Cached(Arc<ScrapeResult>),
    /// A job is queued or running; the handle resolves once it finishes
    Pending(CompletionHandle),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownMode {
    /// Let running jobs finish for up to the grace period, then cancel the rest
    Drain(Duration),
    /// Cancel running jobs right away
    Abandon,
}

/// Scrape orchestration service
///
/// Owns the browser pool, result cache, job queue, in-flight registry and
/// worker lanes. Requests enter through [`ScrapeService::submit`].
pub struct ScrapeService {
    config: Arc<Config>,
    pool: Arc<BrowserPool>,
    cache: Arc<ResultCache>,
    queue: Arc<JobQueue>,
    registry: Arc<JobRegistry>,
    strategies: StrategyRegistry,
    workers: WorkerPool,
    background: CancellationToken,
    thresholds: HealthThresholds,
    started_at: Instant,
}

impl ScrapeService {
    pub async fn start(
        config: Config,
        launcher: Arc<dyn SessionLauncher>,
        strategies: StrategyRegistry,
    ) -> Result<Arc<Self>, ScrapeError> {
        config.validate()?;
        let config = Arc::new(config);

        let pool = BrowserPool::new(config.browser_pool_size, launcher);
        if config.prewarm {
            if let Err(e) = pool.prewarm().await {
                pool.shutdown(Duration::ZERO).await;
                return Err(e);
            }
        }

        let background = CancellationToken::new();
        pool.spawn_maintenance(config.health_interval);

        let cache = Arc::new(ResultCache::new());
        if !config.cache.ttl.is_zero() {
            cache.spawn_sweeper(config.cache.sweep_interval, background.child_token());
        }

        let queue = Arc::new(JobQueue::new(config.queue_capacity));
        let registry = Arc::new(JobRegistry::new());
        let orchestrator = Arc::new(Orchestrator::new(
            pool.clone(),
            cache.clone(),
            registry.clone(),
            config.clone(),
        ));
        let workers = WorkerPool::start(config.workers, queue.clone(), orchestrator);

        info!(
            "Scrape service started: {} sessions, {} lanes, queue capacity {}, strategies {:?}",
            config.browser_pool_size,
            config.workers,
            config.queue_capacity,
            strategies.names()
        );

        Ok(Arc::new(Self {
            thresholds: memory_threshold(&config),
            config,
            pool,
            cache,
            queue,
            registry,
            strategies,
            workers,
            background,
            started_at: Instant::now(),
        }))
    }

    /// Validate a request and either serve it from cache or attach it to a job.
    pub async fn submit(&self, request: ScrapeRequest) -> Result<Submission, ScrapeError> {
        if self.queue.is_closed() {
            return Err(ScrapeError::QueueClosed);
        }

        let strategy = self.strategies.get(&request.strategy)?;
        let settings = request.options.resolve(&self.config.limits)?;
        if request.timeout().is_some_and(|t| t.is_zero()) {
            return Err(ScrapeError::InvalidRequest(
                "Timeout must be greater than 0".to_string(),
            ));
        }

        let fingerprint =
            Fingerprint::compute(&request.url, strategy.name(), strategy.capture(), &settings)?;

        if let Some(result) = self.cache.get(&fingerprint) {
            debug!("Cache hit for {} ({})", request.url, fingerprint);
            crate::metrics::record_submission(true);
            return Ok(Submission::Cached(result));
        }

        // Host resolution only runs on a miss
        check_url_safety(
            &request.url,
            self.config.allow_private_networks,
            self.config.allow_file_urls,
        )
        .await?;
        crate::metrics::record_submission(false);

        let admission = self.registry.admit(&fingerprint, || {
            Job::new(request, settings, fingerprint.clone(), strategy)
        });

        match admission {
            Admission::Attached(job) => {
                debug!("Attached duplicate request to job {}", job.id);
                crate::metrics::record_deduplicated();
                Ok(Submission::Pending(job.handle()))
            }
            Admission::Created(job) => {
                let handle = job.handle();
                if let Err(e) = self.queue.enqueue(job.clone()) {
                    warn!("Rejected job {} for {}: {}", job.id, job.request.url, e);
                    self.registry
                        .resolve(&job, JobStatus::Failed, None, Some(e.clone()));
                    return Err(e);
                }
                debug!("Queued job {} for {}", job.id, job.request.url);
                Ok(Submission::Pending(handle))
            }
        }
    }

    /// Submit and wait for the result.
    pub async fn scrape(&self, request: ScrapeRequest) -> Result<Arc<ScrapeResult>, ScrapeError> {
        match self.submit(request).await? {
            Submission::Cached(result) => Ok(result),
            Submission::Pending(handle) => outcome_result(handle.wait().await),
        }
    }

    /// Cancel a live job. Returns false if it is unknown or already finished.
    ///
    /// A queued job is resolved on the spot without touching the pool; a
    /// running job is interrupted and resolves once its session is released.
    /// Every caller attached to the job observes the cancellation.
    pub fn cancel(&self, id: &JobId) -> bool {
        let Some(job) = self.registry.get(id) else {
            return false;
        };

        job.request_cancel();
        if let Some(job) = self.queue.remove(id) {
            self.registry.resolve(
                &job,
                JobStatus::Cancelled,
                None,
                Some(ScrapeError::Cancelled),
            );
        }
        info!("Cancellation requested for job {}", id);
        true
    }

    /// Status of a live job; finished jobs are reported through their handles.
    pub fn job_status(&self, id: &JobId) -> Option<JobStatus> {
        self.registry.get(id).map(|job| job.status())
    }

    pub async fn health(&self) -> HealthReport {
        let pool = self.pool.get_stats().await;
        let queue_depth = self.queue.len();
        let queue_capacity = self.queue.capacity();
        let closed = self.queue.is_closed();
        let memory_usage = process_memory_usage();

        let level = determine_overall_health(&[
            check_pool_health(&pool, &self.thresholds),
            check_queue_health(queue_depth, queue_capacity, &self.thresholds),
            check_resource_health(memory_usage, &self.thresholds),
        ]);

        let can_launch = pool.launch_failures == 0 || pool.idle + pool.leased > 0;

        HealthReport {
            level,
            live: !closed || self.workers.active_workers() > 0,
            ready: !closed && !pool.shutting_down && queue_depth < queue_capacity && can_launch,
            queue_depth,
            queue_capacity,
            in_flight: self.registry.len(),
            lanes: self.workers.get_worker_stats(),
            cache: self.cache.stats(),
            memory_usage,
            uptime: self.started_at.elapsed(),
            checked_at: Utc::now(),
            pool,
        }
    }

    pub async fn pool_stats(&self) -> PoolStats {
        self.pool.get_stats().await
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn strategies(&self) -> &StrategyRegistry {
        &self.strategies
    }

    /// Token cancelled when the service shuts down; background tasks hang off it.
    pub fn background_token(&self) -> CancellationToken {
        self.background.child_token()
    }

    /// Stop intake and wind the service down.
    ///
    /// Queued jobs are resolved as cancelled in both modes.
    pub async fn shutdown(&self, mode: ShutdownMode) {
        if self.queue.is_closed() {
            debug!("Scrape service already shut down");
            return;
        }
        info!("Shutting down scrape service ({:?})", mode);

        let queued = self.queue.close();
        for job in &queued {
            job.request_cancel();
            self.registry.resolve(
                job,
                JobStatus::Cancelled,
                None,
                Some(ScrapeError::Cancelled),
            );
        }
        if !queued.is_empty() {
            info!("Cancelled {} queued jobs", queued.len());
        }

        let pool_grace = match mode {
            ShutdownMode::Drain(grace) => {
                if timeout(grace, self.workers.join()).await.is_err() {
                    warn!(
                        "{} jobs still running after {:?}, cancelling",
                        self.registry.len(),
                        grace
                    );
                    self.cancel_running();
                    self.workers.join().await;
                }
                grace
            }
            ShutdownMode::Abandon => {
                self.cancel_running();
                self.workers.join().await;
                Duration::ZERO
            }
        };

        self.background.cancel();
        self.pool.shutdown(pool_grace).await;
        info!(
            "Scrape service stopped after processing {} jobs ({} unsuccessful)",
            self.workers.total_processed(),
            self.workers.total_errors()
        );
    }

    fn cancel_running(&self) {
        for job in self.registry.jobs() {
            job.request_cancel();
        }
    }
}

fn memory_threshold(config: &Config) -> HealthThresholds {
    let defaults = HealthThresholds::default();
    HealthThresholds {
        max_memory_usage: config
            .memory_limit
            .map(|limit| limit.saturating_mul(config.browser_pool_size.max(1)))
            .unwrap_or(defaults.max_memory_usage),
        ..defaults
    }
}

/// Turn a finished job into the caller-facing result.
pub fn outcome_result(outcome: JobOutcome) -> Result<Arc<ScrapeResult>, ScrapeError> {
    match (outcome.status, outcome.result) {
        (JobStatus::Succeeded, Some(result)) => Ok(result),
        (JobStatus::Cancelled, _) => Err(ScrapeError::Cancelled),
        (_, _) => Err(outcome.error.unwrap_or(ScrapeError::Cancelled)),
    }
}
