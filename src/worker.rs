use crate::{JobQueue, JobStatus, Orchestrator, ScrapeError};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// One lane: dequeues a job, runs it to completion, repeats.
#[derive(Clone)]
pub struct ScrapeWorker {
    id: usize,
    queue: Arc<JobQueue>,
    orchestrator: Arc<Orchestrator>,
    is_running: Arc<AtomicBool>,
    busy: Arc<AtomicBool>,
    processed_count: Arc<AtomicUsize>,
    error_count: Arc<AtomicUsize>,
}

impl ScrapeWorker {
    pub fn new(id: usize, queue: Arc<JobQueue>, orchestrator: Arc<Orchestrator>) -> Self {
        Self {
            id,
            queue,
            orchestrator,
            is_running: Arc::new(AtomicBool::new(false)),
            busy: Arc::new(AtomicBool::new(false)),
            processed_count: Arc::new(AtomicUsize::new(0)),
            error_count: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub async fn run(&self) {
        info!("Starting scrape worker {}", self.id);
        self.is_running.store(true, Ordering::Relaxed);

        loop {
            let job = match self.queue.dequeue().await {
                Ok(job) => job,
                Err(ScrapeError::QueueClosed) => break,
                Err(e) => {
                    debug!("Worker {} dequeue error: {}", self.id, e);
                    break;
                }
            };

            debug!("Worker {} processing job {} for URL: {}", self.id, job.id, job.request.url);
            self.busy.store(true, Ordering::Relaxed);
            let status = self.orchestrator.run(job).await;
            self.busy.store(false, Ordering::Relaxed);

            self.processed_count.fetch_add(1, Ordering::Relaxed);
            if status != JobStatus::Succeeded {
                self.error_count.fetch_add(1, Ordering::Relaxed);
            }
        }

        self.is_running.store(false, Ordering::Relaxed);
        info!("Scrape worker {} stopped", self.id);
    }

    pub fn get_stats(&self) -> WorkerStats {
        WorkerStats {
            id: self.id,
            is_running: self.is_running.load(Ordering::Relaxed),
            busy: self.busy.load(Ordering::Relaxed),
            processed_count: self.processed_count.load(Ordering::Relaxed),
            error_count: self.error_count.load(Ordering::Relaxed),
        }
    }

    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::Relaxed)
    }

    pub fn processed_count(&self) -> usize {
        self.processed_count.load(Ordering::Relaxed)
    }

    pub fn error_count(&self) -> usize {
        self.error_count.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct WorkerStats {
    pub id: usize,
    pub is_running: bool,
    pub busy: bool,
    pub processed_count: usize,
    pub error_count: usize,
}

/// Fixed set of lanes draining a shared [`JobQueue`].
pub struct WorkerPool {
    workers: Vec<ScrapeWorker>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    pub fn start(lanes: usize, queue: Arc<JobQueue>, orchestrator: Arc<Orchestrator>) -> Self {
        let workers: Vec<ScrapeWorker> = (0..lanes)
            .map(|id| ScrapeWorker::new(id, queue.clone(), orchestrator.clone()))
            .collect();

        let handles = workers
            .iter()
            .map(|worker| {
                let worker = worker.clone();
                tokio::spawn(async move { worker.run().await })
            })
            .collect();

        Self {
            workers,
            handles: Mutex::new(handles),
        }
    }

    /// Wait for every lane to exit. Lanes exit once the queue is closed and drained.
    ///
    /// Safe to call again after an earlier call was abandoned by a timeout.
    pub async fn join(&self) {
        let mut handles = self.handles.lock().await;

        while let Some(handle) = handles.last_mut() {
            let joined = handle.await;
            handles.pop();
            if let Err(e) = joined {
                tracing::error!("Worker task ended abnormally: {}", e);
            }
        }
    }

    pub fn get_worker_stats(&self) -> Vec<WorkerStats> {
        self.workers.iter().map(|w| w.get_stats()).collect()
    }

    pub fn lanes(&self) -> usize {
        self.workers.len()
    }

    pub fn total_processed(&self) -> usize {
        self.workers.iter().map(|w| w.processed_count()).sum()
    }

    pub fn total_errors(&self) -> usize {
        self.workers.iter().map(|w| w.error_count()).sum()
    }

    pub fn active_workers(&self) -> usize {
        self.workers.iter().filter(|w| w.is_running()).count()
    }
}
