//! Jobs, completion handles and the in-flight registry.

use crate::{ExtractionStrategy, Fingerprint, Priority, RenderSettings, ScrapeError, ScrapeRequest, ScrapeResult};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl std::str::FromStr for JobId {
    type Err = ScrapeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| ScrapeError::InvalidRequest(format!("Invalid job id '{s}': {e}")))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Succeeded | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Succeeded => "succeeded",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }
}

/// Terminal state of a job as seen by every caller attached to it.
#[derive(Debug, Clone)]
pub struct JobOutcome {
    pub job_id: JobId,
    pub status: JobStatus,
    pub result: Option<Arc<ScrapeResult>>,
    pub error: Option<ScrapeError>,
    pub attempts: u32,
}

impl JobOutcome {
    pub fn is_success(&self) -> bool {
        self.status == JobStatus::Succeeded
    }
}

/// One unit of work in the orchestration core.
///
/// The request is immutable once the job exists. Status moves
/// `queued -> running -> terminal` and the terminal transition happens once;
/// later attempts to finish the job are ignored.
pub struct Job {
    pub id: JobId,
    pub request: ScrapeRequest,
    pub settings: RenderSettings,
    pub fingerprint: Fingerprint,
    pub strategy: Arc<dyn ExtractionStrategy>,
    pub submitted_at: Instant,
    status: Mutex<JobStatus>,
    attempts: AtomicU32,
    cancel: CancellationToken,
    outcome: watch::Sender<Option<JobOutcome>>,
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job")
            .field("id", &self.id)
            .field("url", &self.request.url)
            .field("strategy", &self.request.strategy)
            .field("fingerprint", &self.fingerprint.to_string())
            .field("status", &self.status())
            .field("attempts", &self.attempts())
            .finish()
    }
}

impl Job {
    pub fn new(
        request: ScrapeRequest,
        settings: RenderSettings,
        fingerprint: Fingerprint,
        strategy: Arc<dyn ExtractionStrategy>,
    ) -> Arc<Self> {
        let (outcome, _) = watch::channel(None);
        Arc::new(Self {
            id: JobId::new(),
            request,
            settings,
            fingerprint,
            strategy,
            submitted_at: Instant::now(),
            status: Mutex::new(JobStatus::Queued),
            attempts: AtomicU32::new(0),
            cancel: CancellationToken::new(),
            outcome,
        })
    }

    pub fn priority(&self) -> Priority {
        self.request.priority
    }

    pub fn status(&self) -> JobStatus {
        *self.lock_status()
    }

    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::Relaxed)
    }

    /// Count a new attempt and return its 1-based number.
    pub fn begin_attempt(&self) -> u32 {
        self.attempts.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Move a queued job to running. False if it was already cancelled.
    pub fn mark_running(&self) -> bool {
        let mut status = self.lock_status();
        if *status != JobStatus::Queued || self.cancel.is_cancelled() {
            return false;
        }
        *status = JobStatus::Running;
        true
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn request_cancel(&self) {
        self.cancel.cancel();
    }

    pub fn handle(&self) -> CompletionHandle {
        CompletionHandle {
            job_id: self.id,
            rx: self.outcome.subscribe(),
        }
    }

    /// Record the terminal outcome. Returns false if the job had already finished.
    pub fn finish(
        &self,
        status: JobStatus,
        result: Option<Arc<ScrapeResult>>,
        error: Option<ScrapeError>,
    ) -> bool {
        debug_assert!(status.is_terminal());
        let mut current = self.lock_status();
        if current.is_terminal() {
            return false;
        }
        *current = status;

        self.outcome.send_replace(Some(JobOutcome {
            job_id: self.id,
            status,
            result,
            error,
            attempts: self.attempts(),
        }));
        true
    }

    fn lock_status(&self) -> std::sync::MutexGuard<'_, JobStatus> {
        self.status.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Cloneable receiver for the single outcome of a job.
#[derive(Debug, Clone)]
pub struct CompletionHandle {
    job_id: JobId,
    rx: watch::Receiver<Option<JobOutcome>>,
}

impl CompletionHandle {
    pub fn job_id(&self) -> JobId {
        self.job_id
    }

    /// The outcome, if the job has finished.
    pub fn outcome(&self) -> Option<JobOutcome> {
        self.rx.borrow().clone()
    }

    pub async fn wait(mut self) -> JobOutcome {
        loop {
            let current = self.rx.borrow_and_update().clone();
            if let Some(outcome) = current {
                return outcome;
            }
            if self.rx.changed().await.is_err() {
                // Job dropped without finishing
                return self.rx.borrow().clone().unwrap_or(JobOutcome {
                    job_id: self.job_id,
                    status: JobStatus::Cancelled,
                    result: None,
                    error: Some(ScrapeError::Cancelled),
                    attempts: 0,
                });
            }
        }
    }
}

pub enum Admission {
    /// A new job was registered and must be enqueued by the caller
    Created(Arc<Job>),
    /// An identical job is already in flight
    Attached(Arc<Job>),
}

/// Live jobs, indexed by id and by fingerprint.
///
/// At most one job per fingerprint is in flight; a duplicate submission
/// attaches to the existing job instead of creating another.
#[derive(Default)]
pub struct JobRegistry {
    in_flight: DashMap<Fingerprint, Arc<Job>>,
    jobs: DashMap<JobId, Arc<Job>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach to the in-flight job for `fingerprint`, or register the job `create` builds.
    pub fn admit(&self, fingerprint: &Fingerprint, create: impl FnOnce() -> Arc<Job>) -> Admission {
        match self.in_flight.entry(fingerprint.clone()) {
            // A cancelled job is on its way out; new callers get a fresh one
            Entry::Occupied(mut existing) if existing.get().is_cancelled() => {
                let job = create();
                self.jobs.insert(job.id, job.clone());
                existing.insert(job.clone());
                Admission::Created(job)
            }
            Entry::Occupied(existing) => Admission::Attached(existing.get().clone()),
            Entry::Vacant(slot) => {
                let job = create();
                self.jobs.insert(job.id, job.clone());
                slot.insert(job.clone());
                Admission::Created(job)
            }
        }
    }

    pub fn get(&self, id: &JobId) -> Option<Arc<Job>> {
        self.jobs.get(id).map(|job| job.clone())
    }

    /// Retire a job and record its outcome. Returns false if it had already finished.
    pub fn resolve(
        &self,
        job: &Arc<Job>,
        status: JobStatus,
        result: Option<Arc<ScrapeResult>>,
        error: Option<ScrapeError>,
    ) -> bool {
        self.in_flight
            .remove_if(&job.fingerprint, |_, current| current.id == job.id);
        self.jobs.remove(&job.id);
        job.finish(status, result, error)
    }

    pub fn jobs(&self) -> Vec<Arc<Job>> {
        self.jobs.iter().map(|entry| entry.value().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}
