//! Pluggable extraction strategies
//!
//! A strategy turns a [`RenderedPage`] snapshot into the body of a
//! [`ScrapeResult`]. The set of strategies is fixed when the service starts;
//! requests name the one they want.

use crate::{ExtractionMetadata, ImageFormat, RenderSettings, ResultStatus, ScrapeError};
use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, GenericImage, RgbImage};
use scraper::{Html, Selector};
use std::collections::HashMap;
use std::io::Cursor;
use std::sync::Arc;

/// What a strategy needs captured from the live page besides the DOM.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CaptureSpec {
    pub screenshots: bool,
}

/// Snapshot of a page after navigation and the settle wait.
#[derive(Debug, Clone, Default)]
pub struct RenderedPage {
    pub requested_url: String,
    pub final_url: Option<String>,
    pub status_code: Option<u16>,
    pub title: Option<String>,
    pub html: String,
    /// Full document height in CSS pixels
    pub page_height: Option<u32>,
    /// PNG-encoded viewport segments, top to bottom
    pub screenshots: Vec<Vec<u8>>,
}

/// Strategy output before timing and request fields are attached.
#[derive(Debug, Clone)]
pub struct Extracted {
    pub content_type: String,
    pub body: Vec<u8>,
    pub status: ResultStatus,
    pub metadata: ExtractionMetadata,
}

#[cfg_attr(test, mockall::automock)]
pub trait ExtractionStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    fn capture(&self) -> CaptureSpec {
        CaptureSpec::default()
    }

    fn extract(
        &self,
        page: &RenderedPage,
        settings: &RenderSettings,
    ) -> Result<Extracted, ScrapeError>;
}

fn status_for(page: &RenderedPage) -> ResultStatus {
    match page.status_code {
        Some(code) if code >= 400 => ResultStatus::Failure,
        _ => ResultStatus::Success,
    }
}

/// Returns the rendered DOM as HTML.
pub struct HtmlStrategy;

impl ExtractionStrategy for HtmlStrategy {
    fn name(&self) -> &'static str {
        "html"
    }

    fn extract(
        &self,
        page: &RenderedPage,
        _settings: &RenderSettings,
    ) -> Result<Extracted, ScrapeError> {
        Ok(Extracted {
            content_type: "text/html; charset=utf-8".to_string(),
            body: page.html.clone().into_bytes(),
            status: status_for(page),
            metadata: ExtractionMetadata::default(),
        })
    }
}

/// Returns the visible text of the document body.
pub struct TextStrategy;

impl TextStrategy {
    pub fn visible_text(html: &str) -> Result<String, ScrapeError> {
        let document = Html::parse_document(html);
        let body = Selector::parse("body")
            .map_err(|e| ScrapeError::ExtractionError(format!("selector: {e:?}")))?;
        let skipped = ["script", "style", "noscript", "template"];

        let mut words = Vec::new();
        let root = document
            .select(&body)
            .next()
            .unwrap_or_else(|| document.root_element());

        for node in root.descendants() {
            let Some(text) = node.value().as_text() else {
                continue;
            };
            let hidden = node.ancestors().any(|ancestor| {
                ancestor
                    .value()
                    .as_element()
                    .map(|el| skipped.contains(&el.name()))
                    .unwrap_or(false)
            });
            if !hidden {
                words.extend(text.split_whitespace().map(str::to_string));
            }
        }

        Ok(words.join(" "))
    }
}

impl ExtractionStrategy for TextStrategy {
    fn name(&self) -> &'static str {
        "text"
    }

    fn extract(
        &self,
        page: &RenderedPage,
        _settings: &RenderSettings,
    ) -> Result<Extracted, ScrapeError> {
        let text = Self::visible_text(&page.html)?;
        let status = match status_for(page) {
            ResultStatus::Success if text.is_empty() => ResultStatus::Partial,
            other => other,
        };

        Ok(Extracted {
            content_type: "text/plain; charset=utf-8".to_string(),
            body: text.into_bytes(),
            status,
            metadata: ExtractionMetadata::default(),
        })
    }
}

/// Captures the page in viewport-high segments and stacks them into one image.
pub struct ScreenshotStrategy;

impl ScreenshotStrategy {
    pub fn stack_segments(
        segments: &[Vec<u8>],
        format: ImageFormat,
        quality: u8,
    ) -> Result<Vec<u8>, ScrapeError> {
        let images = segments
            .iter()
            .map(|data| image::load_from_memory(data))
            .collect::<Result<Vec<_>, _>>()?;

        let width = images.iter().map(|img| img.width()).max().unwrap_or(0);
        let height: u32 = images.iter().map(|img| img.height()).sum();
        if width == 0 || height == 0 {
            return Err(ScrapeError::ExtractionError(
                "No screenshot segments captured".to_string(),
            ));
        }

        let mut stacked = RgbImage::new(width, height);
        let mut offset = 0;
        for img in &images {
            stacked.copy_from(&img.to_rgb8(), 0, offset)?;
            offset += img.height();
        }

        let mut encoded = Vec::new();
        match format {
            ImageFormat::Jpeg => {
                JpegEncoder::new_with_quality(&mut encoded, quality).encode_image(&stacked)?;
            }
            ImageFormat::Png => {
                DynamicImage::ImageRgb8(stacked)
                    .write_to(&mut Cursor::new(&mut encoded), image::ImageFormat::Png)?;
            }
            ImageFormat::Webp => {
                DynamicImage::ImageRgb8(stacked)
                    .write_to(&mut Cursor::new(&mut encoded), image::ImageFormat::WebP)?;
            }
        }
        Ok(encoded)
    }
}

impl ExtractionStrategy for ScreenshotStrategy {
    fn name(&self) -> &'static str {
        "screenshot"
    }

    fn capture(&self) -> CaptureSpec {
        CaptureSpec { screenshots: true }
    }

    fn extract(
        &self,
        page: &RenderedPage,
        settings: &RenderSettings,
    ) -> Result<Extracted, ScrapeError> {
        if page.screenshots.is_empty() {
            return Err(ScrapeError::ExtractionError(
                "Page produced no screenshots".to_string(),
            ));
        }

        let original = page
            .page_height
            .map(|h| h.div_ceil(settings.viewport.height.max(1)))
            .unwrap_or(page.screenshots.len() as u32);
        let truncated = page.screenshots.len() as u32;
        let raw_bytes: usize = page.screenshots.iter().map(Vec::len).sum();

        let body =
            Self::stack_segments(&page.screenshots, settings.image_format, settings.quality)?;

        let status = match status_for(page) {
            ResultStatus::Success if truncated < original => ResultStatus::Partial,
            other => other,
        };

        Ok(Extracted {
            content_type: settings.image_format.mime_type().to_string(),
            body,
            status,
            metadata: ExtractionMetadata {
                screenshots_original: Some(original),
                screenshots_truncated: Some(truncated),
                original_bytes: Some(raw_bytes),
            },
        })
    }
}

/// Fixed set of strategies, keyed by name.
#[derive(Clone, Default)]
pub struct StrategyRegistry {
    strategies: HashMap<&'static str, Arc<dyn ExtractionStrategy>>,
}

impl StrategyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the built-in `html`, `text` and `screenshot` strategies.
    pub fn with_defaults() -> Self {
        Self::new()
            .register(Arc::new(HtmlStrategy))
            .register(Arc::new(TextStrategy))
            .register(Arc::new(ScreenshotStrategy))
    }

    pub fn register(mut self, strategy: Arc<dyn ExtractionStrategy>) -> Self {
        self.strategies.insert(strategy.name(), strategy);
        self
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn ExtractionStrategy>, ScrapeError> {
        self.strategies
            .get(name)
            .cloned()
            .ok_or_else(|| ScrapeError::UnknownStrategy(name.to_string()))
    }

    pub fn names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.strategies.keys().copied().collect();
        names.sort_unstable();
        names
    }
}
