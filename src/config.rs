//! Configuration management with serde serialization/deserialization
//!
//! This module provides all configuration structures for the scrape
//! orchestrator: browser pool sizing, worker lanes, queue admission, retry
//! policy, result caching and request limits.

use crate::ScrapeError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main configuration structure for the scrape orchestrator
///
/// Controls the browser session pool, the worker lanes that drain the job
/// queue, per-attempt timeouts, retry policy and the result cache.
///
/// # Examples
///
/// ```rust
/// use scrape_orchestrator::Config;
///
/// // Use default configuration
/// let config = Config::default();
///
/// // Create custom configuration
/// let config = Config {
///     browser_pool_size: 4,
///     workers: 4,
///     queue_capacity: 256,
///     ..Default::default()
/// };
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    /// Number of browser sessions the pool may hold at once (default: 1-3, by CPU count)
    ///
    /// Each session is a separate Chromium process, so memory use scales
    /// linearly with this value.
    pub browser_pool_size: usize,

    /// Number of worker lanes draining the job queue (default: same as the pool)
    ///
    /// Must not exceed `browser_pool_size`; extra lanes would only contend
    /// for sessions and burn retries on `PoolExhausted`.
    pub workers: usize,

    /// Maximum number of queued jobs before submissions are rejected (default: 100)
    pub queue_capacity: usize,

    /// Hard limit for a single render attempt (default: 30 seconds)
    ///
    /// A request may override this with its own timeout.
    pub navigation_timeout: Duration,

    /// How long an attempt waits for a free browser session (default: 10 seconds)
    pub acquire_timeout: Duration,

    /// Retry policy applied to transient failures
    pub retry: RetryConfig,

    /// Result cache settings
    pub cache: CacheConfig,

    /// Bounds and defaults for per-request render options
    pub limits: RequestLimits,

    /// Allow URLs resolving to loopback/private/link-local addresses (default: false)
    pub allow_private_networks: bool,

    /// Allow `file://` URLs (default: false)
    pub allow_file_urls: bool,

    /// Launch every browser session at startup instead of on first use (default: true)
    pub prewarm: bool,

    /// How long a graceful shutdown waits for running jobs (default: 30 seconds)
    pub shutdown_grace: Duration,

    /// Interval between periodic health log lines in serve mode (default: 30 seconds)
    pub health_interval: Duration,

    /// Port for the Prometheus exporter; disabled when None
    pub metrics_port: Option<u16>,

    /// Path to Chrome/Chromium executable (default: auto-detect)
    pub chrome_path: Option<String>,

    /// Custom User-Agent string for page loads
    pub user_agent: Option<String>,

    /// Memory limit per Chrome instance in bytes (default: 4GB)
    pub memory_limit: Option<usize>,
}

impl Default for Config {
    fn default() -> Self {
        let lanes = num_cpus::get().clamp(1, 3);
        Self {
            browser_pool_size: lanes,
            workers: lanes,
            queue_capacity: 100,
            navigation_timeout: Duration::from_secs(30),
            acquire_timeout: Duration::from_secs(10),
            retry: RetryConfig::default(),
            cache: CacheConfig::default(),
            limits: RequestLimits::default(),
            allow_private_networks: false,
            allow_file_urls: false,
            prewarm: true,
            shutdown_grace: Duration::from_secs(30),
            health_interval: Duration::from_secs(30),
            metrics_port: None,
            chrome_path: None,
            user_agent: Some(
                "Mozilla/5.0 (compatible; ScrapeOrchestrator/0.1; headless)".to_string(),
            ),
            memory_limit: Some(4 * 1024 * 1024 * 1024),
        }
    }
}

impl Config {
    /// Check the configuration invariants the orchestrator relies on.
    pub fn validate(&self) -> Result<(), ScrapeError> {
        let fail = |msg: &str| Err(ScrapeError::ConfigurationError(msg.to_string()));

        if self.browser_pool_size == 0 {
            return fail("Browser pool size must be greater than 0");
        }
        if self.workers == 0 {
            return fail("Worker count must be greater than 0");
        }
        if self.workers > self.browser_pool_size {
            return Err(ScrapeError::ConfigurationError(format!(
                "Worker count ({}) must not exceed browser pool size ({})",
                self.workers, self.browser_pool_size
            )));
        }
        if self.queue_capacity == 0 {
            return fail("Queue capacity must be greater than 0");
        }
        if self.navigation_timeout.is_zero() {
            return fail("Navigation timeout must be greater than 0");
        }
        if self.acquire_timeout.is_zero() {
            return fail("Acquire timeout must be greater than 0");
        }
        if self.retry.max_attempts == 0 {
            return fail("Retry attempts must be greater than 0");
        }
        if self.retry.multiplier < 1.0 {
            return fail("Retry multiplier must be at least 1.0");
        }
        if self.retry.initial_delay > self.retry.max_delay {
            return fail("Initial retry delay must not exceed the maximum delay");
        }
        self.limits.validate()
    }
}

/// Browser viewport dimensions in CSS pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

impl Viewport {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl Default for Viewport {
    fn default() -> Self {
        Self::new(1280, 2000)
    }
}

/// Exponential backoff policy for transient failures
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts per job, including the first one
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Delay to wait after failed attempt `attempt` (1-indexed) before the next one.
    ///
    /// Grows as `initial_delay * multiplier^(attempt - 1)` and is capped at
    /// `max_delay`, so the sequence never decreases.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let millis = self.initial_delay.as_millis() as f64 * self.multiplier.powi(exponent);

        if !millis.is_finite() || millis >= self.max_delay.as_millis() as f64 {
            self.max_delay
        } else {
            Duration::from_millis(millis as u64)
        }
    }
}

/// Result cache settings
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Time-to-live for cached results; zero disables caching
    pub ttl: Duration,
    /// How often expired entries are swept
    pub sweep_interval: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(300),
            sweep_interval: Duration::from_secs(60),
        }
    }
}

/// Defaults and bounds for the render options a caller may set
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RequestLimits {
    pub default_wait: Duration,
    pub max_wait: Duration,
    pub default_viewport: Viewport,
    pub min_viewport: Viewport,
    pub max_viewport: Viewport,
    pub default_screenshots: u32,
    pub max_screenshots: u32,
    /// JPEG/WebP encoder quality for stacked screenshots
    pub screenshot_quality: u8,
}

impl Default for RequestLimits {
    fn default() -> Self {
        Self {
            default_wait: Duration::from_millis(1000),
            max_wait: Duration::from_millis(5000),
            default_viewport: Viewport::new(1280, 2000),
            min_viewport: Viewport::new(100, 100),
            max_viewport: Viewport::new(2400, 4000),
            default_screenshots: 5,
            max_screenshots: 10,
            screenshot_quality: 85,
        }
    }
}

impl RequestLimits {
    fn validate(&self) -> Result<(), ScrapeError> {
        if self.min_viewport.width > self.max_viewport.width
            || self.min_viewport.height > self.max_viewport.height
        {
            return Err(ScrapeError::ConfigurationError(
                "Minimum viewport exceeds maximum viewport".to_string(),
            ));
        }
        if !self.viewport_in_bounds(&self.default_viewport) {
            return Err(ScrapeError::ConfigurationError(
                "Default viewport is outside the configured bounds".to_string(),
            ));
        }
        if self.default_wait > self.max_wait {
            return Err(ScrapeError::ConfigurationError(
                "Default wait exceeds maximum wait".to_string(),
            ));
        }
        if self.default_screenshots > self.max_screenshots {
            return Err(ScrapeError::ConfigurationError(
                "Default screenshot count exceeds maximum".to_string(),
            ));
        }
        if self.screenshot_quality == 0 || self.screenshot_quality > 100 {
            return Err(ScrapeError::ConfigurationError(
                "Screenshot quality must be within 1..=100".to_string(),
            ));
        }
        Ok(())
    }

    pub fn viewport_in_bounds(&self, viewport: &Viewport) -> bool {
        (self.min_viewport.width..=self.max_viewport.width).contains(&viewport.width)
            && (self.min_viewport.height..=self.max_viewport.height).contains(&viewport.height)
    }
}

/// Generate Chrome arguments for one pooled browser session
///
/// Every launch gets its own user data and temp directories so concurrent
/// instances never trip over Chrome's process singleton.
///
/// # Examples
///
/// ```rust
/// use scrape_orchestrator::{Config, get_chrome_args};
///
/// let config = Config::default();
/// let args = get_chrome_args(&config, "0-1");
/// assert!(args.contains(&"--headless".to_string()));
/// ```
pub fn get_chrome_args(config: &Config, unique_id: &str) -> Vec<String> {
    let viewport = config.limits.default_viewport;
    let mut args = vec![
        "--headless".to_string(),
        "--no-sandbox".to_string(),
        "--disable-dev-shm-usage".to_string(),
        "--disable-gpu".to_string(),
        "--disable-background-timer-throttling".to_string(),
        "--disable-backgrounding-occluded-windows".to_string(),
        "--disable-renderer-backgrounding".to_string(),
        "--disable-features=TranslateUI,ProcessSingleton".to_string(),
        "--disable-extensions".to_string(),
        "--disable-default-apps".to_string(),
        "--disable-sync".to_string(),
        "--no-first-run".to_string(),
        "--disable-process-singleton-dialog".to_string(),
        "--disable-plugins".to_string(),
        format!("--window-size={},{}", viewport.width, viewport.height),
        format!("--user-data-dir=/tmp/scrape-orchestrator-{}", unique_id),
        format!("--temp-dir=/tmp/scrape-orchestrator-temp-{}", unique_id),
    ];

    if let Some(memory_limit) = config.memory_limit {
        args.push(format!(
            "--js-flags=--max-old-space-size={}",
            memory_limit / 1024 / 1024
        ));
    }

    if let Some(user_agent) = &config.user_agent {
        args.push(format!("--user-agent={user_agent}"));
    }

    args
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert!(config.browser_pool_size >= 1);
        assert_eq!(config.workers, config.browser_pool_size);
        assert_eq!(config.queue_capacity, 100);
        assert_eq!(config.navigation_timeout, Duration::from_secs(30));
        assert_eq!(config.retry.max_attempts, 3);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_workers_must_not_exceed_pool() {
        let config = Config {
            browser_pool_size: 2,
            workers: 3,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ScrapeError::ConfigurationError(_))
        ));
    }

    #[test]
    fn test_zero_values_rejected() {
        let mut config = Config {
            browser_pool_size: 1,
            workers: 1,
            ..Default::default()
        };
        config.queue_capacity = 0;
        assert!(config.validate().is_err());

        config.queue_capacity = 1;
        config.retry.max_attempts = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_backoff_is_non_decreasing_and_capped() {
        let retry = RetryConfig {
            max_attempts: 10,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(1),
            multiplier: 2.0,
        };

        assert_eq!(retry.delay_for_attempt(1), Duration::from_millis(100));
        assert_eq!(retry.delay_for_attempt(2), Duration::from_millis(200));
        assert_eq!(retry.delay_for_attempt(3), Duration::from_millis(400));

        let delays: Vec<_> = (1..=20).map(|k| retry.delay_for_attempt(k)).collect();
        assert!(delays.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(*delays.last().unwrap(), Duration::from_secs(1));
    }

    #[test]
    fn test_partial_config_file_uses_defaults() {
        let config: Config =
            serde_json::from_str(r#"{"browser_pool_size": 4, "workers": 2}"#).unwrap();
        assert_eq!(config.browser_pool_size, 4);
        assert_eq!(config.workers, 2);
        assert_eq!(config.limits.max_screenshots, 10);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_chrome_args_generation() {
        let config = Config::default();
        let args = get_chrome_args(&config, "7-1");

        assert!(args.contains(&"--headless".to_string()));
        assert!(args.contains(&"--no-sandbox".to_string()));
        assert!(args.contains(&"--window-size=1280,2000".to_string()));
        assert!(args.iter().any(|a| a.ends_with("scrape-orchestrator-7-1")));
        assert!(args.iter().any(|a| a.starts_with("--user-agent=")));
    }

    #[test]
    fn test_viewport_bounds() {
        let limits = RequestLimits::default();
        assert!(limits.viewport_in_bounds(&Viewport::new(1280, 2000)));
        assert!(limits.viewport_in_bounds(&Viewport::new(100, 4000)));
        assert!(!limits.viewport_in_bounds(&Viewport::new(99, 500)));
        assert!(!limits.viewport_in_bounds(&Viewport::new(2401, 500)));
    }
}
