//! Chromium sessions driven over the DevTools protocol with chromiumoxide.

use crate::{
    get_chrome_args, CaptureSpec, Config, EngineSession, RenderSettings, RenderedPage,
    ScrapeError, SessionLauncher,
};
use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::emulation::SetDeviceMetricsOverrideParams;
use chromiumoxide::cdp::browser_protocol::page::CaptureScreenshotFormat;
use chromiumoxide::cdp::browser_protocol::browser::BrowserContextId;
use chromiumoxide::cdp::browser_protocol::target::{
    CreateBrowserContextParams, CreateTargetParams, DisposeBrowserContextParams,
};
use chromiumoxide::error::CdpError;
use chromiumoxide::page::{Page, ScreenshotParams};
use futures::StreamExt;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

const STATUS_SCRIPT: &str =
    "(() => { const nav = performance.getEntriesByType('navigation')[0]; \
     return nav && nav.responseStatus ? nav.responseStatus : null; })()";

const HEIGHT_SCRIPT: &str =
    "Math.max(document.body ? document.body.scrollHeight : 0, \
     document.documentElement ? document.documentElement.scrollHeight : 0)";

/// Navigations Chromium aborts because the response became a download.
const DOWNLOAD_MARKERS: [&str; 2] = ["net::ERR_ABORTED", "Download is starting"];

/// Map a DevTools failure onto the error taxonomy.
fn classify_failure(message: &str, alive: bool, timed_out: bool) -> ScrapeError {
    if !alive {
        ScrapeError::SessionCrashed(message.to_string())
    } else if timed_out {
        ScrapeError::NetworkError(format!("CDP request timed out: {message}"))
    } else if DOWNLOAD_MARKERS.iter().any(|marker| message.contains(marker)) {
        ScrapeError::UnsupportedContent(message.to_string())
    } else {
        // net::ERR_* navigation failures and dropped CDP traffic alike
        ScrapeError::NetworkError(message.to_string())
    }
}

pub fn create_browser_config(config: &Config, id: usize) -> Result<BrowserConfig, ScrapeError> {
    let unique_id = format!("{}-{}", std::process::id(), id);
    let viewport = config.limits.default_viewport;

    let mut builder = BrowserConfig::builder()
        .window_size(viewport.width, viewport.height)
        .request_timeout(config.navigation_timeout)
        .args(get_chrome_args(config, &unique_id));

    if let Some(chrome_path) = &config.chrome_path {
        builder = builder.chrome_executable(chrome_path);
    }

    builder.build().map_err(ScrapeError::BrowserLaunchFailed)
}

/// Launches one headless Chromium process per pool slot.
pub struct ChromeLauncher {
    config: Config,
}

impl ChromeLauncher {
    pub fn new(config: Config) -> Self {
        Self { config }
    }
}

#[async_trait]
impl SessionLauncher for ChromeLauncher {
    async fn launch(&self, id: usize) -> Result<Box<dyn EngineSession>, ScrapeError> {
        let browser_config = create_browser_config(&self.config, id)?;

        let (browser, mut handler) = Browser::launch(browser_config)
            .await
            .map_err(|e| ScrapeError::BrowserLaunchFailed(e.to_string()))?;

        // The handler stream drives all CDP traffic and must be polled continuously
        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    error!("Browser session {} handler error: {}", id, e);
                    return Err(e);
                }
            }
            info!("Browser session {} handler stream ended", id);
            Ok(())
        });

        debug!("Launched browser session {}", id);
        Ok(Box::new(ChromeSession {
            id,
            browser: Mutex::new(browser),
            handler: handler_task,
        }))
    }
}

pub struct ChromeSession {
    id: usize,
    browser: Mutex<Browser>,
    handler: JoinHandle<Result<(), CdpError>>,
}

impl ChromeSession {
    fn classify(&self, err: CdpError) -> ScrapeError {
        classify_failure(
            &err.to_string(),
            self.is_alive(),
            matches!(err, CdpError::Timeout),
        )
    }

    async fn open_context(&self, browser: &Browser) -> Result<(BrowserContextId, Page), ScrapeError> {
        let context_id = browser
            .execute(CreateBrowserContextParams::default())
            .await
            .map_err(|e| self.classify(e))?
            .result
            .browser_context_id;

        let target = CreateTargetParams::builder()
            .url("about:blank")
            .browser_context_id(context_id.clone())
            .build()
            .map_err(ScrapeError::SessionCrashed)?;

        match browser.new_page(target).await {
            Ok(page) => Ok((context_id, page)),
            Err(e) => {
                let _ = browser
                    .execute(DisposeBrowserContextParams::new(context_id))
                    .await;
                Err(self.classify(e))
            }
        }
    }

    async fn capture(
        &self,
        page: &Page,
        url: &str,
        settings: &RenderSettings,
        capture: CaptureSpec,
    ) -> Result<RenderedPage, ScrapeError> {
        let metrics = SetDeviceMetricsOverrideParams::builder()
            .width(settings.viewport.width as i64)
            .height(settings.viewport.height as i64)
            .device_scale_factor(1.0)
            .mobile(false)
            .build()
            .map_err(ScrapeError::SessionCrashed)?;
        page.execute(metrics).await.map_err(|e| self.classify(e))?;

        page.goto(url).await.map_err(|e| self.classify(e))?;
        page.wait_for_navigation()
            .await
            .map_err(|e| self.classify(e))?;

        if !settings.wait.is_zero() {
            sleep(settings.wait).await;
        }

        let status_code = page
            .evaluate(STATUS_SCRIPT)
            .await
            .ok()
            .and_then(|result| result.into_value::<Option<u16>>().ok())
            .flatten();
        let title = page.get_title().await.unwrap_or_default();
        let final_url = page.url().await.unwrap_or_default();
        let html = page.content().await.map_err(|e| self.classify(e))?;

        let page_height = page
            .evaluate(HEIGHT_SCRIPT)
            .await
            .ok()
            .and_then(|result| result.into_value::<f64>().ok())
            .map(|height| height.max(0.0).ceil() as u32);

        let mut screenshots = Vec::new();
        if capture.screenshots {
            let height = page_height.unwrap_or(settings.viewport.height);
            let segment = settings.viewport.height.max(1);
            let needed = height.div_ceil(segment).max(1);
            let count = needed.min(settings.max_screenshots.max(1));

            for index in 0..count {
                page.evaluate(format!("window.scrollTo(0, {})", index * segment))
                    .await
                    .map_err(|e| self.classify(e))?;
                let params = ScreenshotParams::builder()
                    .format(CaptureScreenshotFormat::Png)
                    .build();
                let png = page
                    .screenshot(params)
                    .await
                    .map_err(|e| self.classify(e))?;
                screenshots.push(png);
            }

            if needed > count {
                debug!(
                    "Truncated {} to {} of {} screenshot segments",
                    url, count, needed
                );
            }
        }

        Ok(RenderedPage {
            requested_url: url.to_string(),
            final_url,
            status_code,
            title,
            html,
            page_height,
            screenshots,
        })
    }
}

#[async_trait]
impl EngineSession for ChromeSession {
    fn id(&self) -> usize {
        self.id
    }

    fn is_alive(&self) -> bool {
        !self.handler.is_finished()
    }

    async fn render(
        &self,
        url: &str,
        settings: &RenderSettings,
        capture: CaptureSpec,
    ) -> Result<RenderedPage, ScrapeError> {
        let browser = self.browser.lock().await;
        let (context_id, page) = self.open_context(&browser).await?;

        let rendered = self.capture(&page, url, settings, capture).await;

        if let Err(e) = page.close().await {
            debug!("Failed to close page in session {}: {}", self.id, e);
        }
        if let Err(e) = browser
            .execute(DisposeBrowserContextParams::new(context_id))
            .await
        {
            warn!("Failed to dispose browser context in session {}: {}", self.id, e);
        }

        rendered
    }

    async fn close(self: Box<Self>) {
        let mut browser = self.browser.lock().await;
        if let Err(e) = browser.close().await {
            debug!("Browser session {} close: {}", self.id, e);
        }
        let _ = browser.wait().await;
        self.handler.abort();
        info!("Browser session {} shut down", self.id);
    }
}
