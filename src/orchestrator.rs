//! Runs a job against a pooled browser session with timeout and retry policy.

use crate::{
    BrowserPool, Config, Job, JobRegistry, JobStatus, ResultCache, ResultStatus, ResultTiming,
    ScrapeError, ScrapeResult, SessionHealth,
};
use chrono::Utc;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

pub struct Orchestrator {
    pool: Arc<BrowserPool>,
    cache: Arc<ResultCache>,
    registry: Arc<JobRegistry>,
    config: Arc<Config>,
}

impl Orchestrator {
    pub fn new(
        pool: Arc<BrowserPool>,
        cache: Arc<ResultCache>,
        registry: Arc<JobRegistry>,
        config: Arc<Config>,
    ) -> Self {
        Self {
            pool,
            cache,
            registry,
            config,
        }
    }

    /// Drive `job` to a terminal status and resolve every caller waiting on it.
    pub async fn run(&self, job: Arc<Job>) -> JobStatus {
        let started = Instant::now();

        if !job.mark_running() {
            debug!("Job {} was cancelled before it started", job.id);
            return self.resolve(&job, Err(ScrapeError::Cancelled), started);
        }

        let attempt_timeout = job
            .request
            .timeout()
            .unwrap_or(self.config.navigation_timeout);
        let max_attempts = self.config.retry.max_attempts;

        let outcome = loop {
            let attempt = job.begin_attempt();
            debug!(
                "Job {} attempt {}/{} for {}",
                job.id, attempt, max_attempts, job.request.url
            );

            let error = match self.attempt(&job, attempt_timeout, started).await {
                Ok(result) => break Ok(result),
                Err(e) => e,
            };

            crate::metrics::record_error(&error);
            if error == ScrapeError::Cancelled || !error.is_retryable() || attempt >= max_attempts {
                break Err(error);
            }

            let delay = self.config.retry.delay_for_attempt(attempt);
            warn!(
                "Job {} attempt {}/{} failed: {}; retrying in {:?}",
                job.id, attempt, max_attempts, error, delay
            );
            crate::metrics::record_retry();

            tokio::select! {
                _ = job.cancel_token().cancelled() => break Err(ScrapeError::Cancelled),
                _ = sleep(delay) => {}
            }
        };

        self.resolve(&job, outcome, started)
    }

    async fn attempt(
        &self,
        job: &Job,
        attempt_timeout: Duration,
        started: Instant,
    ) -> Result<ScrapeResult, ScrapeError> {
        let cancel = job.cancel_token();
        if cancel.is_cancelled() {
            return Err(ScrapeError::Cancelled);
        }

        let lease = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ScrapeError::Cancelled),
            lease = self.pool.acquire(self.config.acquire_timeout) => lease?,
        };

        let render_started = Instant::now();
        let capture = job.strategy.capture();
        let rendered = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(ScrapeError::Cancelled),
            rendered = timeout(
                attempt_timeout,
                lease.session().render(&job.request.url, &job.settings, capture),
            ) => rendered.unwrap_or(Err(ScrapeError::NavigationTimeout(attempt_timeout))),
        };

        let health = match &rendered {
            Err(e) if e.implicates_session() => SessionHealth::Unhealthy,
            _ if !lease.session().is_alive() => SessionHealth::Unhealthy,
            _ => SessionHealth::Healthy,
        };
        debug!(
            "Releasing session {} for job {} as {:?}",
            lease.session_id(),
            job.id,
            health
        );
        self.pool.release(lease, health).await;

        let page = rendered?;
        let render_time = render_started.elapsed();
        crate::metrics::record_render(render_time);

        let extract_started = Instant::now();
        let extracted = job.strategy.extract(&page, &job.settings)?;
        let extract_time = extract_started.elapsed();

        Ok(ScrapeResult {
            url: job.request.url.clone(),
            strategy: job.strategy.name().to_string(),
            final_url: page.final_url,
            status_code: page.status_code,
            title: page.title,
            content_type: extracted.content_type,
            body: extracted.body,
            status: extracted.status,
            timing: ResultTiming {
                render: render_time,
                extract: extract_time,
                total: started.elapsed(),
                attempts: job.attempts(),
                captured_at: Utc::now(),
            },
            metadata: extracted.metadata,
        })
    }

    fn resolve(
        &self,
        job: &Arc<Job>,
        outcome: Result<ScrapeResult, ScrapeError>,
        started: Instant,
    ) -> JobStatus {
        let status = match outcome {
            Ok(result) => {
                let result = Arc::new(result);
                // Error pages are returned to callers but never cached
                if result.status != ResultStatus::Failure {
                    self.cache
                        .put(job.fingerprint.clone(), result.clone(), self.config.cache.ttl);
                }
                info!(
                    "Job {} succeeded for {} ({:?}, {} attempts, {:?})",
                    job.id,
                    job.request.url,
                    result.status,
                    job.attempts(),
                    started.elapsed()
                );
                self.registry
                    .resolve(job, JobStatus::Succeeded, Some(result), None);
                JobStatus::Succeeded
            }
            Err(ScrapeError::Cancelled) => {
                info!("Job {} cancelled", job.id);
                self.registry.resolve(
                    job,
                    JobStatus::Cancelled,
                    None,
                    Some(ScrapeError::Cancelled),
                );
                JobStatus::Cancelled
            }
            Err(e) => {
                warn!(
                    "Job {} failed for {} after {} attempts: {}",
                    job.id,
                    job.request.url,
                    job.attempts(),
                    e
                );
                self.registry.resolve(job, JobStatus::Failed, None, Some(e));
                JobStatus::Failed
            }
        };

        crate::metrics::record_job_completed(status.as_str(), started.elapsed());
        status
    }
}
