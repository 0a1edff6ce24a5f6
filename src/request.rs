//! Scrape requests, fingerprints and results.

use crate::{normalize_url, CaptureSpec, RequestLimits, ScrapeError, Viewport};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::time::Duration;

/// Priority levels for scrape requests
///
/// Higher priority jobs are dequeued before lower priority ones; equal
/// priorities keep arrival order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    Normal,
    High,
    Critical,
}

impl Default for Priority {
    fn default() -> Self {
        Self::Normal
    }
}

impl std::str::FromStr for Priority {
    type Err = ScrapeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "low" => Ok(Priority::Low),
            "normal" => Ok(Priority::Normal),
            "high" => Ok(Priority::High),
            "critical" => Ok(Priority::Critical),
            other => Err(ScrapeError::InvalidRequest(format!(
                "Unknown priority '{other}'; expected low, normal, high or critical"
            ))),
        }
    }
}

/// Image encodings supported by the screenshot strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    Png,
    Jpeg,
    Webp,
}

impl Default for ImageFormat {
    fn default() -> Self {
        Self::Jpeg
    }
}

impl ImageFormat {
    pub fn mime_type(&self) -> &'static str {
        match self {
            ImageFormat::Png => "image/png",
            ImageFormat::Jpeg => "image/jpeg",
            ImageFormat::Webp => "image/webp",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            ImageFormat::Png => "png",
            ImageFormat::Jpeg => "jpg",
            ImageFormat::Webp => "webp",
        }
    }
}

impl std::str::FromStr for ImageFormat {
    type Err = ScrapeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "png" | "image/png" => Ok(ImageFormat::Png),
            "jpeg" | "jpg" | "image/jpeg" | "image/*" | "*/*" => Ok(ImageFormat::Jpeg),
            "webp" | "image/webp" => Ok(ImageFormat::Webp),
            other => Err(ScrapeError::InvalidRequest(format!(
                "Unsupported image format '{other}'"
            ))),
        }
    }
}

/// Caller-supplied render options; unset fields fall back to the configured defaults.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct RenderOptions {
    pub viewport: Option<Viewport>,
    pub wait_ms: Option<u64>,
    pub max_screenshots: Option<u32>,
    pub image_format: ImageFormat,
}

impl RenderOptions {
    /// Fill in defaults and enforce the configured bounds.
    pub fn resolve(&self, limits: &RequestLimits) -> Result<RenderSettings, ScrapeError> {
        let viewport = self.viewport.unwrap_or(limits.default_viewport);
        if !limits.viewport_in_bounds(&viewport) {
            return Err(ScrapeError::InvalidRequest(format!(
                "Viewport {}x{} is outside {}x{} ..= {}x{}",
                viewport.width,
                viewport.height,
                limits.min_viewport.width,
                limits.min_viewport.height,
                limits.max_viewport.width,
                limits.max_viewport.height
            )));
        }

        let wait = self
            .wait_ms
            .map(Duration::from_millis)
            .unwrap_or(limits.default_wait);
        if wait > limits.max_wait {
            return Err(ScrapeError::InvalidRequest(format!(
                "Value {}ms for wait is unacceptable; must be between 0 and {}ms",
                wait.as_millis(),
                limits.max_wait.as_millis()
            )));
        }

        let max_screenshots = self.max_screenshots.unwrap_or(limits.default_screenshots);
        if max_screenshots > limits.max_screenshots {
            return Err(ScrapeError::InvalidRequest(format!(
                "Value {} for max_screenshots is unacceptable; must not exceed {}",
                max_screenshots, limits.max_screenshots
            )));
        }

        Ok(RenderSettings {
            viewport,
            wait,
            max_screenshots,
            image_format: self.image_format,
            quality: limits.screenshot_quality,
        })
    }
}

/// Fully resolved render options carried by a queued job.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderSettings {
    pub viewport: Viewport,
    pub wait: Duration,
    pub max_screenshots: u32,
    pub image_format: ImageFormat,
    pub quality: u8,
}

/// An inbound scrape request.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ScrapeRequest {
    pub url: String,
    #[serde(default = "default_strategy")]
    pub strategy: String,
    /// Per-attempt timeout override in milliseconds
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub options: RenderOptions,
}

fn default_strategy() -> String {
    "html".to_string()
}

impl ScrapeRequest {
    pub fn new(url: impl Into<String>, strategy: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            strategy: strategy.into(),
            timeout_ms: None,
            priority: Priority::default(),
            options: RenderOptions::default(),
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    pub fn with_options(mut self, options: RenderOptions) -> Self {
        self.options = options;
        self
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }
}

/// Deterministic cache and de-duplication key of a request.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Digest the parts of a request that change what a scrape produces.
    ///
    /// Priority and timeout only affect scheduling, so they are left out.
    /// Screenshot count and image format only count for strategies that
    /// capture screenshots.
    pub fn compute(
        url: &str,
        strategy: &str,
        capture: CaptureSpec,
        settings: &RenderSettings,
    ) -> Result<Self, ScrapeError> {
        let normalized = normalize_url(url)?;

        let mut parts = vec![
            normalized,
            strategy.to_string(),
            settings.viewport.width.to_string(),
            settings.viewport.height.to_string(),
            settings.wait.as_millis().to_string(),
        ];
        if capture.screenshots {
            parts.push(settings.max_screenshots.to_string());
            parts.push(settings.image_format.extension().to_string());
        }

        let mut hasher = Sha256::new();
        for part in &parts {
            hasher.update(part.as_bytes());
            hasher.update([0u8]);
        }

        Ok(Self(format!("{:x}", hasher.finalize())))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0[..12.min(self.0.len())])
    }
}

/// Outcome indicator of a scrape result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultStatus {
    Success,
    Partial,
    Failure,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultTiming {
    pub render: Duration,
    pub extract: Duration,
    pub total: Duration,
    pub attempts: u32,
    pub captured_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExtractionMetadata {
    /// Number of viewport-high segments the page would need
    pub screenshots_original: Option<u32>,
    /// Number of segments actually captured
    pub screenshots_truncated: Option<u32>,
    pub original_bytes: Option<usize>,
}

/// Content extracted from one rendered page.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScrapeResult {
    pub url: String,
    pub strategy: String,
    pub final_url: Option<String>,
    pub status_code: Option<u16>,
    pub title: Option<String>,
    pub content_type: String,
    #[serde(skip)]
    pub body: Vec<u8>,
    pub status: ResultStatus,
    pub timing: ResultTiming,
    pub metadata: ExtractionMetadata,
}

impl ScrapeResult {
    pub fn body_text(&self) -> Option<&str> {
        if self.content_type.starts_with("text/") {
            std::str::from_utf8(&self.body).ok()
        } else {
            None
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == ResultStatus::Success
    }
}
