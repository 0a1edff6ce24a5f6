//! In-process engine doubles and fixtures shared by the unit and scenario tests.

use crate::{
    CaptureSpec, Config, EngineSession, ExtractionMetadata, Fingerprint, Job, Priority,
    RenderOptions, RenderSettings, RenderedPage, RequestLimits, ResultStatus, ResultTiming,
    ScrapeError, ScrapeRequest, ScrapeResult, SessionLauncher, StrategyRegistry,
};
use async_trait::async_trait;
use chrono::Utc;
use image::{DynamicImage, ImageBuffer, Rgb};
use std::io::Cursor;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Scripted behaviour of every fake session launched by a [`FakeLauncher`].
#[derive(Debug, Clone)]
pub struct PageScript {
    pub delay: Duration,
    pub status_code: u16,
    pub html: String,
    pub page_height: u32,
    /// Number of renders (across all sessions) that fail before renders succeed
    pub failures: u32,
    pub failure: ScrapeError,
    /// Failing renders also kill their session
    pub crash: bool,
    /// Renders never complete
    pub hang: bool,
}

impl PageScript {
    pub fn ok() -> Self {
        Self {
            delay: Duration::ZERO,
            status_code: 200,
            html: "<html><head><title>Fixture</title></head><body><p>Hello fixture</p></body></html>"
                .to_string(),
            page_height: 150,
            failures: 0,
            failure: ScrapeError::NetworkError("connection reset".to_string()),
            crash: false,
            hang: false,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_status(mut self, status_code: u16) -> Self {
        self.status_code = status_code;
        self
    }

    pub fn failing(mut self, failures: u32, failure: ScrapeError) -> Self {
        self.failures = failures;
        self.failure = failure;
        self
    }

    pub fn crashing(mut self, failures: u32) -> Self {
        self.failures = failures;
        self.failure = ScrapeError::SessionCrashed("renderer process gone".to_string());
        self.crash = true;
        self
    }

    pub fn hanging(mut self) -> Self {
        self.hang = true;
        self
    }
}

struct Shared {
    script: Mutex<PageScript>,
    failures_remaining: AtomicU32,
    launches: AtomicUsize,
    pending_launch_failures: AtomicUsize,
    closed: AtomicUsize,
    renders: AtomicUsize,
    rendered_urls: Mutex<Vec<String>>,
    sessions: Mutex<Vec<Arc<AtomicBool>>>,
}

pub struct FakeLauncher {
    shared: Arc<Shared>,
}

impl FakeLauncher {
    pub fn new() -> Arc<Self> {
        Self::with_script(PageScript::ok())
    }

    pub fn with_script(script: PageScript) -> Arc<Self> {
        Arc::new(Self {
            shared: Arc::new(Shared {
                failures_remaining: AtomicU32::new(script.failures),
                script: Mutex::new(script),
                launches: AtomicUsize::new(0),
                pending_launch_failures: AtomicUsize::new(0),
                closed: AtomicUsize::new(0),
                renders: AtomicUsize::new(0),
                rendered_urls: Mutex::new(Vec::new()),
                sessions: Mutex::new(Vec::new()),
            }),
        })
    }

    pub fn fail_next_launches(&self, count: usize) {
        self.shared
            .pending_launch_failures
            .store(count, Ordering::SeqCst);
    }

    /// Mark every session launched so far as dead.
    pub fn kill_all(&self) {
        for alive in self.shared.sessions.lock().unwrap().iter() {
            alive.store(false, Ordering::SeqCst);
        }
    }

    pub fn launch_count(&self) -> usize {
        self.shared.launches.load(Ordering::SeqCst)
    }

    pub fn closed_count(&self) -> usize {
        self.shared.closed.load(Ordering::SeqCst)
    }

    pub fn render_count(&self) -> usize {
        self.shared.renders.load(Ordering::SeqCst)
    }

    /// URLs in the order renders started.
    pub fn rendered_urls(&self) -> Vec<String> {
        self.shared.rendered_urls.lock().unwrap().clone()
    }
}

#[async_trait]
impl SessionLauncher for FakeLauncher {
    async fn launch(&self, id: usize) -> Result<Box<dyn EngineSession>, ScrapeError> {
        let pending = &self.shared.pending_launch_failures;
        if pending
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(ScrapeError::BrowserLaunchFailed(
                "chromium exited during startup".to_string(),
            ));
        }

        self.shared.launches.fetch_add(1, Ordering::SeqCst);
        let alive = Arc::new(AtomicBool::new(true));
        self.shared.sessions.lock().unwrap().push(alive.clone());

        Ok(Box::new(FakeSession {
            id,
            alive,
            shared: self.shared.clone(),
        }))
    }
}

struct FakeSession {
    id: usize,
    alive: Arc<AtomicBool>,
    shared: Arc<Shared>,
}

#[async_trait]
impl EngineSession for FakeSession {
    fn id(&self) -> usize {
        self.id
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    async fn render(
        &self,
        url: &str,
        settings: &RenderSettings,
        capture: CaptureSpec,
    ) -> Result<RenderedPage, ScrapeError> {
        self.shared.renders.fetch_add(1, Ordering::SeqCst);
        self.shared.rendered_urls.lock().unwrap().push(url.to_string());
        let script = self.shared.script.lock().unwrap().clone();

        if !script.delay.is_zero() {
            tokio::time::sleep(script.delay).await;
        }
        if script.hang {
            std::future::pending::<()>().await;
        }

        let failed = self
            .shared
            .failures_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            if script.crash {
                self.alive.store(false, Ordering::SeqCst);
            }
            return Err(script.failure);
        }

        let screenshots = if capture.screenshots {
            let segments = script
                .page_height
                .div_ceil(settings.viewport.height)
                .clamp(1, settings.max_screenshots.max(1));
            (0..segments)
                .map(|_| png_segment(settings.viewport.width, settings.viewport.height))
                .collect()
        } else {
            Vec::new()
        };

        Ok(RenderedPage {
            requested_url: url.to_string(),
            final_url: Some(url.to_string()),
            status_code: Some(script.status_code),
            title: Some("Fixture".to_string()),
            html: script.html,
            page_height: Some(script.page_height),
            screenshots,
        })
    }

    async fn close(self: Box<Self>) {
        self.alive.store(false, Ordering::SeqCst);
        self.shared.closed.fetch_add(1, Ordering::SeqCst);
    }
}

pub fn png_segment(width: u32, height: u32) -> Vec<u8> {
    let img = ImageBuffer::from_pixel(width, height, Rgb([200u8, 200, 200]));
    let mut out = Vec::new();
    DynamicImage::ImageRgb8(img)
        .write_to(&mut Cursor::new(&mut out), image::ImageFormat::Png)
        .unwrap();
    out
}

/// Small, fast configuration for tests. Private addresses are allowed so
/// fixture hosts are never resolved.
pub fn test_config() -> Config {
    let mut config = Config {
        browser_pool_size: 2,
        workers: 2,
        queue_capacity: 16,
        navigation_timeout: Duration::from_millis(500),
        acquire_timeout: Duration::from_millis(100),
        allow_private_networks: true,
        prewarm: false,
        shutdown_grace: Duration::from_secs(1),
        ..Default::default()
    };
    config.retry.initial_delay = Duration::from_millis(10);
    config.retry.max_delay = Duration::from_millis(40);
    config.limits.default_wait = Duration::ZERO;
    config
}

pub fn default_settings() -> RenderSettings {
    RenderOptions::default()
        .resolve(&RequestLimits::default())
        .unwrap()
}

pub fn sample_job(url: &str, priority: Priority) -> Arc<Job> {
    let request = ScrapeRequest::new(url, "html").with_priority(priority);
    let settings = default_settings();
    let fingerprint =
        Fingerprint::compute(url, "html", CaptureSpec::default(), &settings).unwrap();
    let strategy = StrategyRegistry::with_defaults().get("html").unwrap();
    Job::new(request, settings, fingerprint, strategy)
}

pub fn sample_result(url: &str) -> ScrapeResult {
    ScrapeResult {
        url: url.to_string(),
        strategy: "html".to_string(),
        final_url: Some(url.to_string()),
        status_code: Some(200),
        title: Some("Fixture".to_string()),
        content_type: "text/html; charset=utf-8".to_string(),
        body: b"<html></html>".to_vec(),
        status: ResultStatus::Success,
        timing: ResultTiming {
            render: Duration::from_millis(5),
            extract: Duration::from_millis(1),
            total: Duration::from_millis(6),
            attempts: 1,
            captured_at: Utc::now(),
        },
        metadata: ExtractionMetadata::default(),
    }
}
