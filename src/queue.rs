//! Bounded priority queue of pending jobs.

use crate::{Job, JobId, Priority, ScrapeError};
use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;
use tracing::debug;

struct QueuedJob {
    priority: Priority,
    seq: Reverse<u64>,
    job: Arc<Job>,
}

impl PartialEq for QueuedJob {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for QueuedJob {}

impl PartialOrd for QueuedJob {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedJob {
    // Max-heap: higher priority first, then lower sequence number
    fn cmp(&self, other: &Self) -> Ordering {
        (self.priority, self.seq).cmp(&(other.priority, other.seq))
    }
}

struct QueueState {
    heap: BinaryHeap<QueuedJob>,
    next_seq: u64,
    closed: bool,
}

/// Priority-then-arrival job queue with a fixed capacity.
pub struct JobQueue {
    state: Mutex<QueueState>,
    capacity: usize,
    available: Notify,
}

impl JobQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(QueueState {
                heap: BinaryHeap::with_capacity(capacity),
                next_seq: 0,
                closed: false,
            }),
            capacity,
            available: Notify::new(),
        }
    }

    pub fn enqueue(&self, job: Arc<Job>) -> Result<(), ScrapeError> {
        {
            let mut state = self.lock();
            if state.closed {
                return Err(ScrapeError::QueueClosed);
            }
            if state.heap.len() >= self.capacity {
                return Err(ScrapeError::QueueFull);
            }

            let seq = state.next_seq;
            state.next_seq += 1;
            debug!("Enqueued job {} ({:?}, seq {})", job.id, job.priority(), seq);
            state.heap.push(QueuedJob {
                priority: job.priority(),
                seq: Reverse(seq),
                job,
            });
            crate::metrics::set_queue_depth(state.heap.len());
        }

        self.available.notify_one();
        Ok(())
    }

    /// Wait for the next job.
    ///
    /// Cancelled jobs are handed out too; the lane that dequeues a job
    /// resolves it.
    pub async fn dequeue(&self) -> Result<Arc<Job>, ScrapeError> {
        loop {
            // Register before checking so a concurrent enqueue cannot be missed
            let notified = self.available.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.lock();
                if let Some(entry) = state.heap.pop() {
                    if entry.job.is_cancelled() {
                        debug!("Dequeued job {} after cancellation", entry.job.id);
                    }
                    crate::metrics::set_queue_depth(state.heap.len());
                    let more = !state.heap.is_empty();
                    drop(state);
                    if more {
                        // Pass the wakeup on to the next idle lane
                        self.available.notify_one();
                    }
                    return Ok(entry.job);
                }
                if state.closed {
                    return Err(ScrapeError::QueueClosed);
                }
            }

            notified.await;
        }
    }

    /// Take a still-queued job out of the queue.
    pub fn remove(&self, id: &JobId) -> Option<Arc<Job>> {
        let mut state = self.lock();
        let mut removed = None;
        state.heap.retain(|entry| {
            if entry.job.id == *id {
                removed = Some(entry.job.clone());
                false
            } else {
                true
            }
        });
        crate::metrics::set_queue_depth(state.heap.len());
        removed
    }

    /// Refuse further jobs, wake every waiting lane and hand back what was still queued.
    pub fn close(&self) -> Vec<Arc<Job>> {
        let remaining = {
            let mut state = self.lock();
            state.closed = true;
            let mut remaining: Vec<QueuedJob> = state.heap.drain().collect();
            remaining.sort_by(|a, b| b.cmp(a));
            remaining.into_iter().map(|entry| entry.job).collect()
        };
        crate::metrics::set_queue_depth(0);

        self.available.notify_waiters();
        remaining
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    pub fn len(&self) -> usize {
        self.lock().heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::sample_job;
    use std::time::Duration;
    use tokio_test::{assert_pending, assert_ready_err, task};

    #[tokio::test]
    async fn test_priority_then_arrival_order() {
        let queue = JobQueue::new(10);
        let low = sample_job("https://low.example", Priority::Low);
        let normal_a = sample_job("https://a.example", Priority::Normal);
        let critical = sample_job("https://critical.example", Priority::Critical);
        let normal_b = sample_job("https://b.example", Priority::Normal);

        for job in [&low, &normal_a, &critical, &normal_b] {
            queue.enqueue(job.clone()).unwrap();
        }

        let order: Vec<JobId> = [
            queue.dequeue().await.unwrap(),
            queue.dequeue().await.unwrap(),
            queue.dequeue().await.unwrap(),
            queue.dequeue().await.unwrap(),
        ]
        .iter()
        .map(|job| job.id)
        .collect();
        assert_eq!(order, vec![critical.id, normal_a.id, normal_b.id, low.id]);
    }

    #[test]
    fn test_capacity_and_close() {
        let queue = JobQueue::new(1);
        queue.enqueue(sample_job("https://a.example", Priority::Normal)).unwrap();
        assert_eq!(
            queue.enqueue(sample_job("https://b.example", Priority::Normal)),
            Err(ScrapeError::QueueFull)
        );

        let remaining = queue.close();
        assert_eq!(remaining.len(), 1);
        assert!(queue.is_empty());
        assert_eq!(
            queue.enqueue(sample_job("https://c.example", Priority::Normal)),
            Err(ScrapeError::QueueClosed)
        );
    }

    #[test]
    fn test_close_wakes_waiting_dequeue() {
        let queue = JobQueue::new(4);
        let mut waiter = task::spawn(queue.dequeue());
        assert_pending!(waiter.poll());

        queue.close();
        assert!(waiter.is_woken());
        assert_ready_err!(waiter.poll());
    }

    #[tokio::test]
    async fn test_dequeue_waits_for_enqueue() {
        let queue = Arc::new(JobQueue::new(4));
        let consumer = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.dequeue().await })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        let job = sample_job("https://example.com", Priority::Normal);
        queue.enqueue(job.clone()).unwrap();

        let got = consumer.await.unwrap().unwrap();
        assert_eq!(got.id, job.id);
    }

    #[tokio::test]
    async fn test_remove_and_hand_out_cancelled() {
        let queue = JobQueue::new(4);
        let removed = sample_job("https://removed.example", Priority::High);
        let cancelled = sample_job("https://cancelled.example", Priority::High);
        let kept = sample_job("https://kept.example", Priority::Low);
        for job in [&removed, &cancelled, &kept] {
            queue.enqueue(job.clone()).unwrap();
        }

        assert_eq!(queue.remove(&removed.id).map(|job| job.id), Some(removed.id));
        assert!(queue.remove(&removed.id).is_none());
        cancelled.request_cancel();

        // A cancelled job still leaves through dequeue so its lane can resolve it
        let first = queue.dequeue().await.unwrap();
        assert_eq!(first.id, cancelled.id);
        assert!(first.is_cancelled());
        assert_eq!(queue.dequeue().await.unwrap().id, kept.id);
        assert!(queue.is_empty());
    }
}
