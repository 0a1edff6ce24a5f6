//! Browser session pool
//!
//! This module owns a bounded set of live rendering-engine sessions and lends
//! them out as exclusive leases. A session returned unhealthy is closed and a
//! replacement is launched lazily on a later acquire, so a crashed engine
//! degrades to one discarded session instead of a pool-wide restart.

use crate::{CaptureSpec, RenderSettings, RenderedPage, ScrapeError};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Sessions older than this are recycled by the maintenance task while idle.
const MAX_SESSION_AGE: Duration = Duration::from_secs(3600);

/// One live rendering-engine instance.
///
/// `render` must run the page in a browsing context of its own (cookies and
/// storage scoped to that one call) and tear that context down before it
/// returns.
#[async_trait]
pub trait EngineSession: Send + Sync {
    fn id(&self) -> usize;

    /// False once the underlying engine process has exited or lost its connection.
    fn is_alive(&self) -> bool;

    async fn render(
        &self,
        url: &str,
        settings: &RenderSettings,
        capture: CaptureSpec,
    ) -> Result<RenderedPage, ScrapeError>;

    async fn close(self: Box<Self>);
}

/// Starts new engine sessions for the pool.
#[async_trait]
pub trait SessionLauncher: Send + Sync {
    async fn launch(&self, id: usize) -> Result<Box<dyn EngineSession>, ScrapeError>;
}

/// Health verdict handed back with a lease.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionHealth {
    /// Session finished cleanly and may serve another job
    Healthy,
    /// Session crashed, timed out or was interrupted and must be discarded
    Unhealthy,
}

struct PooledSession {
    session: Box<dyn EngineSession>,
    created_at: Instant,
    renders: usize,
}

impl PooledSession {
    fn new(session: Box<dyn EngineSession>) -> Self {
        Self {
            session,
            created_at: Instant::now(),
            renders: 0,
        }
    }
}

/// Exclusive right to use one session until it is released.
///
/// Prefer [`BrowserPool::release`]; a lease that is dropped instead is
/// treated as unhealthy and its session closed in the background.
pub struct SessionLease {
    session: Option<PooledSession>,
    permit: Option<OwnedSemaphorePermit>,
    pool: Arc<BrowserPool>,
}

impl SessionLease {
    pub fn session(&self) -> &dyn EngineSession {
        // Present until the lease is consumed by release or drop
        self.session
            .as_ref()
            .map(|pooled| pooled.session.as_ref())
            .expect("lease holds a session until released")
    }

    pub fn session_id(&self) -> usize {
        self.session().id()
    }
}

impl Drop for SessionLease {
    fn drop(&mut self) {
        let Some(pooled) = self.session.take() else {
            return;
        };
        let pool = self.pool.clone();
        let permit = self.permit.take();

        warn!(
            "Session {} dropped without release, discarding",
            pooled.session.id()
        );
        pool.counters.released.fetch_add(1, Ordering::Relaxed);
        pool.counters.discarded.fetch_add(1, Ordering::Relaxed);

        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                pooled.session.close().await;
                drop(permit);
            });
        }
    }
}

#[derive(Default)]
struct PoolCounters {
    acquired: AtomicUsize,
    released: AtomicUsize,
    launched: AtomicUsize,
    discarded: AtomicUsize,
    launch_failures: AtomicUsize,
}

pub struct BrowserPool {
    launcher: Arc<dyn SessionLauncher>,
    idle: Mutex<VecDeque<PooledSession>>,
    permits: Arc<Semaphore>,
    capacity: usize,
    next_id: AtomicUsize,
    is_shutting_down: AtomicBool,
    maintenance: CancellationToken,
    counters: PoolCounters,
}

impl BrowserPool {
    pub fn new(capacity: usize, launcher: Arc<dyn SessionLauncher>) -> Arc<Self> {
        Arc::new(Self {
            launcher,
            idle: Mutex::new(VecDeque::with_capacity(capacity)),
            permits: Arc::new(Semaphore::new(capacity)),
            capacity,
            next_id: AtomicUsize::new(0),
            is_shutting_down: AtomicBool::new(false),
            maintenance: CancellationToken::new(),
            counters: PoolCounters::default(),
        })
    }

    /// Launch every session up front.
    pub async fn prewarm(&self) -> Result<(), ScrapeError> {
        let mut idle = self.idle.lock().await;

        while idle.len() < self.capacity {
            let session = self.launch_session().await?;
            info!("Browser session {} created successfully", session.id());
            idle.push_back(PooledSession::new(session));
        }

        info!("Browser pool initialized with {} sessions", idle.len());
        Ok(())
    }

    async fn launch_session(&self) -> Result<Box<dyn EngineSession>, ScrapeError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        match self.launcher.launch(id).await {
            Ok(session) => {
                self.counters.launched.fetch_add(1, Ordering::Relaxed);
                crate::metrics::record_session_launch();
                Ok(session)
            }
            Err(e) => {
                self.counters.launch_failures.fetch_add(1, Ordering::Relaxed);
                error!("Failed to launch browser session {}: {}", id, e);
                Err(e)
            }
        }
    }

    /// Borrow a session, waiting at most `timeout` for one to become free.
    pub async fn acquire(self: &Arc<Self>, timeout: Duration) -> Result<SessionLease, ScrapeError> {
        if self.is_shutting_down.load(Ordering::Relaxed) {
            return Err(ScrapeError::PoolClosed);
        }

        let permit = match tokio::time::timeout(timeout, self.permits.clone().acquire_owned()).await
        {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => return Err(ScrapeError::PoolClosed),
            Err(_) => {
                debug!("No browser session free after {:?}", timeout);
                return Err(ScrapeError::PoolExhausted);
            }
        };

        loop {
            let candidate = self.idle.lock().await.pop_front();
            match candidate {
                Some(pooled) if pooled.session.is_alive() => {
                    return Ok(self.lease(pooled, permit));
                }
                Some(pooled) => {
                    warn!(
                        "Browser session {} died while idle, replacing",
                        pooled.session.id()
                    );
                    self.counters.discarded.fetch_add(1, Ordering::Relaxed);
                    pooled.session.close().await;
                }
                None => {
                    // Permit held, so launching stays within capacity
                    let session = self.launch_session().await?;
                    return Ok(self.lease(PooledSession::new(session), permit));
                }
            }
        }
    }

    fn lease(self: &Arc<Self>, mut pooled: PooledSession, permit: OwnedSemaphorePermit) -> SessionLease {
        pooled.renders += 1;
        self.counters.acquired.fetch_add(1, Ordering::Relaxed);
        SessionLease {
            session: Some(pooled),
            permit: Some(permit),
            pool: self.clone(),
        }
    }

    /// Return a lease. Unhealthy or dead sessions are closed, not reused.
    pub async fn release(&self, mut lease: SessionLease, health: SessionHealth) {
        let Some(pooled) = lease.session.take() else {
            return;
        };
        let permit = lease.permit.take();
        self.counters.released.fetch_add(1, Ordering::Relaxed);

        let reusable = health == SessionHealth::Healthy
            && pooled.session.is_alive()
            && !self.is_shutting_down.load(Ordering::Relaxed);

        if reusable {
            self.idle.lock().await.push_back(pooled);
        } else {
            debug!(
                "Discarding browser session {} ({:?})",
                pooled.session.id(),
                health
            );
            self.counters.discarded.fetch_add(1, Ordering::Relaxed);
            pooled.session.close().await;
        }

        drop(permit);
    }

    /// Periodically close idle sessions that died or grew too old.
    pub fn spawn_maintenance(self: &Arc<Self>, interval: Duration) {
        let pool = self.clone();
        let stop = self.maintenance.clone();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = stop.cancelled() => break,
                    _ = ticker.tick() => pool.recycle_idle().await,
                }
            }
        });
    }

    async fn recycle_idle(&self) {
        let stale: Vec<PooledSession> = {
            let mut idle = self.idle.lock().await;
            let (keep, stale): (VecDeque<_>, VecDeque<_>) = idle.drain(..).partition(|pooled| {
                pooled.session.is_alive() && pooled.created_at.elapsed() < MAX_SESSION_AGE
            });
            *idle = keep;
            stale.into()
        };

        for pooled in stale {
            info!(
                "Recycling browser session {}: alive={}, age={:?}, renders={}",
                pooled.session.id(),
                pooled.session.is_alive(),
                pooled.created_at.elapsed(),
                pooled.renders
            );
            self.counters.discarded.fetch_add(1, Ordering::Relaxed);
            pooled.session.close().await;
        }
    }

    pub async fn shutdown(&self, grace: Duration) {
        info!("Shutting down browser pool...");
        self.is_shutting_down.store(true, Ordering::Relaxed);
        self.maintenance.cancel();

        // Wait for outstanding leases to come back
        let deadline = Instant::now() + grace;
        while self.leased() > 0 && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        if self.leased() > 0 {
            warn!("{} browser sessions still leased at shutdown", self.leased());
        }
        self.permits.close();

        let mut idle = self.idle.lock().await;
        for pooled in idle.drain(..) {
            pooled.session.close().await;
        }

        info!("Browser pool shutdown complete");
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn leased(&self) -> usize {
        self.counters
            .acquired
            .load(Ordering::Relaxed)
            .saturating_sub(self.counters.released.load(Ordering::Relaxed))
    }

    pub async fn get_stats(&self) -> PoolStats {
        let idle = self.idle.lock().await.len();
        let leased = self.leased();

        PoolStats {
            capacity: self.capacity,
            idle,
            leased,
            available: self.permits.available_permits(),
            acquired: self.counters.acquired.load(Ordering::Relaxed),
            released: self.counters.released.load(Ordering::Relaxed),
            launched: self.counters.launched.load(Ordering::Relaxed),
            discarded: self.counters.discarded.load(Ordering::Relaxed),
            launch_failures: self.counters.launch_failures.load(Ordering::Relaxed),
            shutting_down: self.is_shutting_down.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct PoolStats {
    pub capacity: usize,
    pub idle: usize,
    pub leased: usize,
    pub available: usize,
    pub acquired: usize,
    pub released: usize,
    pub launched: usize,
    pub discarded: usize,
    pub launch_failures: usize,
    pub shutting_down: bool,
}

impl PoolStats {
    pub fn utilization(&self) -> f64 {
        if self.capacity == 0 {
            0.0
        } else {
            self.leased as f64 / self.capacity as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeLauncher, PageScript};

    #[tokio::test]
    async fn test_prewarm_fills_pool() {
        let launcher = FakeLauncher::new();
        let pool = BrowserPool::new(3, launcher.clone());
        pool.prewarm().await.unwrap();

        let stats = pool.get_stats().await;
        assert_eq!(stats.idle, 3);
        assert_eq!(stats.launched, 3);
        assert_eq!(stats.leased, 0);
        assert_eq!(launcher.launch_count(), 3);
    }

    #[tokio::test]
    async fn test_lease_is_exclusive_and_reused() {
        let launcher = FakeLauncher::new();
        let pool = BrowserPool::new(1, launcher.clone());

        let lease = pool.acquire(Duration::from_millis(50)).await.unwrap();
        let first_id = lease.session_id();

        // Only session is out: second acquire times out
        assert_eq!(
            pool.acquire(Duration::from_millis(20)).await.err(),
            Some(ScrapeError::PoolExhausted)
        );

        pool.release(lease, SessionHealth::Healthy).await;
        let again = pool.acquire(Duration::from_millis(50)).await.unwrap();
        assert_eq!(again.session_id(), first_id);
        pool.release(again, SessionHealth::Healthy).await;

        let stats = pool.get_stats().await;
        assert_eq!(stats.acquired, 2);
        assert_eq!(stats.released, 2);
        assert_eq!(stats.launched, 1);
    }

    #[tokio::test]
    async fn test_unhealthy_release_replaces_lazily() {
        let launcher = FakeLauncher::new();
        let pool = BrowserPool::new(1, launcher.clone());

        let lease = pool.acquire(Duration::from_millis(50)).await.unwrap();
        let crashed_id = lease.session_id();
        pool.release(lease, SessionHealth::Unhealthy).await;

        let stats = pool.get_stats().await;
        assert_eq!(stats.discarded, 1);
        assert_eq!(stats.idle, 0);
        assert_eq!(launcher.closed_count(), 1);

        let replacement = pool.acquire(Duration::from_millis(50)).await.unwrap();
        assert_ne!(replacement.session_id(), crashed_id);
        assert_eq!(launcher.launch_count(), 2);
        pool.release(replacement, SessionHealth::Healthy).await;
    }

    #[tokio::test]
    async fn test_dead_idle_session_is_skipped() {
        let launcher = FakeLauncher::new();
        let pool = BrowserPool::new(1, launcher.clone());
        pool.prewarm().await.unwrap();

        launcher.kill_all();
        let lease = pool.acquire(Duration::from_millis(50)).await.unwrap();
        assert!(lease.session().is_alive());
        assert_eq!(launcher.launch_count(), 2);
        pool.release(lease, SessionHealth::Healthy).await;
    }

    #[tokio::test]
    async fn test_recycle_closes_dead_idle_sessions() {
        let launcher = FakeLauncher::new();
        let pool = BrowserPool::new(2, launcher.clone());
        pool.prewarm().await.unwrap();

        launcher.kill_all();
        pool.recycle_idle().await;

        let stats = pool.get_stats().await;
        assert_eq!(stats.idle, 0);
        assert_eq!(stats.discarded, 2);
        assert_eq!(launcher.closed_count(), 2);

        // Live sessions stay idle
        let lease = pool.acquire(Duration::from_millis(50)).await.unwrap();
        pool.release(lease, SessionHealth::Healthy).await;
        pool.recycle_idle().await;

        let stats = pool.get_stats().await;
        assert_eq!(stats.idle, 1);
        assert_eq!(stats.discarded, 2);
    }

    #[tokio::test]
    async fn test_dropped_lease_counts_as_released() {
        let launcher = FakeLauncher::new();
        let pool = BrowserPool::new(1, launcher.clone());

        let lease = pool.acquire(Duration::from_millis(50)).await.unwrap();
        drop(lease);

        let stats = pool.get_stats().await;
        assert_eq!(stats.released, 1);
        assert_eq!(stats.discarded, 1);

        // Permit comes back once the background close finishes
        let lease = pool.acquire(Duration::from_secs(1)).await.unwrap();
        pool.release(lease, SessionHealth::Healthy).await;
    }

    #[tokio::test]
    async fn test_launch_failure_returns_permit() {
        let launcher = FakeLauncher::new();
        launcher.fail_next_launches(1);
        let pool = BrowserPool::new(1, launcher.clone());

        assert!(matches!(
            pool.acquire(Duration::from_millis(50)).await,
            Err(ScrapeError::BrowserLaunchFailed(_))
        ));
        let lease = pool.acquire(Duration::from_millis(50)).await.unwrap();
        assert_eq!(pool.get_stats().await.launch_failures, 1);
        pool.release(lease, SessionHealth::Healthy).await;
    }

    #[tokio::test]
    async fn test_shutdown_rejects_acquire() {
        let launcher = FakeLauncher::with_script(PageScript::ok());
        let pool = BrowserPool::new(2, launcher.clone());
        pool.prewarm().await.unwrap();

        pool.shutdown(Duration::from_millis(10)).await;
        assert_eq!(
            pool.acquire(Duration::from_millis(10)).await.err(),
            Some(ScrapeError::PoolClosed)
        );
        assert_eq!(launcher.closed_count(), 2);
    }
}
