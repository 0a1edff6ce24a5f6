use crate::{
    format_bytes, format_duration, sanitize_filename, spawn_health_monitor, ChromeLauncher,
    Config, HealthReport, ImageFormat, JobId, Priority, RenderOptions, ScrapeError,
    ScrapeRequest, ScrapeResult, ScrapeService, ShutdownMode, StrategyRegistry, Submission,
    Viewport,
};
use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::fs;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(name = "scrape-orchestrator")]
#[command(about = "Browser-automation scrape orchestrator")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    #[arg(long, global = true, help = "Configuration file path")]
    pub config: Option<PathBuf>,

    #[arg(long, global = true, help = "Browser pool size")]
    pub pool_size: Option<usize>,

    #[arg(long, global = true, help = "Number of worker lanes")]
    pub workers: Option<usize>,

    #[arg(long, global = true, help = "Navigation timeout in seconds")]
    pub timeout: Option<u64>,

    #[arg(long, global = true, help = "Enable verbose logging")]
    pub verbose: bool,

    #[arg(long, global = true, help = "Chrome executable path")]
    pub chrome_path: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Scrape a single URL
    Scrape {
        #[arg(help = "URL to scrape")]
        url: String,

        #[arg(short, long, default_value = "html", help = "Extraction strategy (html, text, screenshot)")]
        strategy: String,

        #[arg(short, long, help = "Write the result body to this file")]
        output: Option<PathBuf>,

        #[command(flatten)]
        render: RenderArgs,

        #[arg(long, help = "Request priority (low, normal, high, critical)")]
        priority: Option<String>,
    },

    /// Scrape URLs from a file
    Batch {
        #[arg(short, long, help = "Input file containing URLs (one per line)")]
        input: PathBuf,

        #[arg(short, long, help = "Output directory for results")]
        output: PathBuf,

        #[arg(short, long, default_value = "html", help = "Extraction strategy (html, text, screenshot)")]
        strategy: String,

        #[arg(short, long, default_value = "10", help = "Maximum submissions in flight")]
        concurrency: usize,

        #[command(flatten)]
        render: RenderArgs,

        #[arg(long, help = "Progress reporting interval in seconds")]
        progress_interval: Option<u64>,
    },

    /// Accept JSON-lines requests on stdin and write outcomes to stdout
    Serve {
        #[arg(long, help = "Expose Prometheus metrics on this port")]
        metrics_port: Option<u16>,

        #[arg(long, help = "Directory for binary result bodies (screenshots)")]
        output: Option<PathBuf>,
    },

    /// Validate configuration
    Validate {
        #[arg(help = "Configuration file to validate")]
        file: PathBuf,
    },

    /// Show system information and health
    Health {
        #[arg(long, help = "Show per-lane and cache details")]
        detailed: bool,
    },
}

#[derive(Debug, Clone, Default, clap::Args)]
pub struct RenderArgs {
    #[arg(long, help = "Viewport width")]
    pub width: Option<u32>,

    #[arg(long, help = "Viewport height")]
    pub height: Option<u32>,

    #[arg(long, help = "Wait time in milliseconds after navigation")]
    pub wait: Option<u64>,

    #[arg(long, help = "Maximum screenshot segments")]
    pub max_screenshots: Option<u32>,

    #[arg(long, help = "Image format for screenshots (png, jpeg, webp)")]
    pub format: Option<String>,
}

impl RenderArgs {
    pub fn to_options(&self, config: &Config) -> Result<RenderOptions, ScrapeError> {
        let viewport = if self.width.is_some() || self.height.is_some() {
            let default = config.limits.default_viewport;
            Some(Viewport::new(
                self.width.unwrap_or(default.width),
                self.height.unwrap_or(default.height),
            ))
        } else {
            None
        };

        let image_format = match self.format.as_deref() {
            Some(format) => format.parse::<ImageFormat>()?,
            None => ImageFormat::default(),
        };

        Ok(RenderOptions {
            viewport,
            wait_ms: self.wait,
            max_screenshots: self.max_screenshots,
            image_format,
        })
    }
}

/// One line of serve-mode input.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum IntakeLine {
    Cancel {
        cancel: JobId,
    },
    Status {
        status: JobId,
    },
    Scrape {
        /// Caller correlation id, echoed back
        #[serde(default)]
        id: Option<String>,
        #[serde(flatten)]
        request: ScrapeRequest,
    },
}

/// One line of serve-mode output.
#[derive(Debug, Default, Serialize)]
pub struct IntakeReply {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_id: Option<JobId>,
    pub status: String,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub cached: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<ResultSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ResultSummary {
    pub url: String,
    pub final_url: Option<String>,
    pub status_code: Option<u16>,
    pub title: Option<String>,
    pub content_type: String,
    pub bytes: usize,
    /// Inline body for text results
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    /// Where a binary body was written
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
    pub attempts: u32,
    pub render_ms: u128,
}

impl ResultSummary {
    fn new(result: &ScrapeResult, path: Option<PathBuf>) -> Self {
        let body = if result.content_type.starts_with("image/") {
            None
        } else {
            result.body_text().map(str::to_string)
        };
        Self {
            url: result.url.clone(),
            final_url: result.final_url.clone(),
            status_code: result.status_code,
            title: result.title.clone(),
            content_type: result.content_type.clone(),
            bytes: result.body.len(),
            body,
            path,
            attempts: result.timing.attempts,
            render_ms: result.timing.render.as_millis(),
        }
    }
}

pub struct CliRunner {
    pub config: Config,
    pub service: Arc<ScrapeService>,
}

impl CliRunner {
    pub async fn new(config: Config) -> Result<Self> {
        let launcher = Arc::new(ChromeLauncher::new(config.clone()));
        let service =
            ScrapeService::start(config.clone(), launcher, StrategyRegistry::with_defaults())
                .await
                .context("Failed to start scrape service")?;

        Ok(Self { config, service })
    }

    pub async fn run(&self, command: Commands) -> Result<()> {
        match command {
            Commands::Scrape {
                url,
                strategy,
                output,
                render,
                priority,
            } => self.run_scrape(url, strategy, output, render, priority).await,
            Commands::Batch {
                input,
                output,
                strategy,
                concurrency,
                render,
                progress_interval,
            } => {
                self.run_batch(input, output, strategy, concurrency, render, progress_interval)
                    .await
            }
            Commands::Serve {
                metrics_port,
                output,
            } => self.run_serve(metrics_port, output).await,
            Commands::Health { detailed } => self.show_health(detailed).await,
            Commands::Validate { file } => {
                validate_config_file(&file).await?;
                Ok(())
            }
        }
    }

    pub async fn run_scrape(
        &self,
        url: String,
        strategy: String,
        output: Option<PathBuf>,
        render: RenderArgs,
        priority: Option<String>,
    ) -> Result<()> {
        info!("Scraping {} with strategy {}", url, strategy);

        let priority = match priority.as_deref() {
            Some(p) => p.parse::<Priority>()?,
            None => Priority::Normal,
        };
        let request = ScrapeRequest::new(url, strategy)
            .with_priority(priority)
            .with_options(render.to_options(&self.config)?);

        let started = Instant::now();
        let result = self.service.scrape(request).await?;

        if let Some(path) = &output {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).await?;
            }
            fs::write(path, &result.body).await?;
            info!("Result saved to: {}", path.display());
        }

        println!("Scrape completed:");
        println!("  URL: {}", result.url);
        if let Some(final_url) = &result.final_url {
            println!("  Final URL: {final_url}");
        }
        if let Some(code) = result.status_code {
            println!("  Status: {code} ({:?})", result.status);
        }
        if let Some(title) = &result.title {
            println!("  Title: {title}");
        }
        println!("  Content type: {}", result.content_type);
        println!("  Size: {}", format_bytes(result.body.len()));
        println!("  Attempts: {}", result.timing.attempts);
        println!("  Duration: {}", format_duration(started.elapsed()));

        if output.is_none() {
            let textual = !result.content_type.starts_with("image/");
            if let Some(text) = result.body_text().filter(|_| textual) {
                println!();
                println!("{text}");
            }
        }

        Ok(())
    }

    pub async fn run_batch(
        &self,
        input: PathBuf,
        output: PathBuf,
        strategy: String,
        concurrency: usize,
        render: RenderArgs,
        progress_interval: Option<u64>,
    ) -> Result<()> {
        info!("Starting batch scrape");

        let urls = read_urls_from_file(&input).await?;
        let total = urls.len();
        info!("Loaded {} URLs from {}", total, input.display());

        fs::create_dir_all(&output).await?;
        let options = render.to_options(&self.config)?;

        let completed = Arc::new(AtomicUsize::new(0));
        let failed = Arc::new(AtomicUsize::new(0));
        let started = Instant::now();

        let reporter = progress_interval.map(|secs| {
            let completed = completed.clone();
            let failed = failed.clone();
            let stop = self.service.background_token();
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(Duration::from_secs(secs.max(1)));
                ticker.tick().await;
                loop {
                    tokio::select! {
                        _ = stop.cancelled() => break,
                        _ = ticker.tick() => {}
                    }
                    let done = completed.load(Ordering::Relaxed);
                    let elapsed = started.elapsed().as_secs_f64().max(0.001);
                    println!(
                        "Progress: {}/{} ({:.1}%) - Errors: {}, Rate: {:.1}/s",
                        done,
                        total,
                        done as f64 / total.max(1) as f64 * 100.0,
                        failed.load(Ordering::Relaxed),
                        done as f64 / elapsed
                    );
                    if done >= total {
                        break;
                    }
                }
            })
        });

        let service = self.service.clone();
        stream::iter(urls)
            .map(|url| {
                let request = ScrapeRequest::new(url.clone(), strategy.clone())
                    .with_options(options.clone());
                let service = service.clone();
                async move { (url, service.scrape(request).await) }
            })
            .buffer_unordered(concurrency.max(1))
            .for_each(|(url, outcome)| {
                let output = &output;
                let completed = &completed;
                let failed = &failed;
                async move {
                    match outcome {
                        Ok(result) => match write_result(output, &result).await {
                            Ok(path) => info!("Saved result: {}", path.display()),
                            Err(e) => {
                                failed.fetch_add(1, Ordering::Relaxed);
                                warn!("Failed to save result for {}: {}", url, e);
                            }
                        },
                        Err(e) => {
                            failed.fetch_add(1, Ordering::Relaxed);
                            warn!("Failed to scrape {}: {}", url, e);
                        }
                    }
                    completed.fetch_add(1, Ordering::Relaxed);
                }
            })
            .await;

        if let Some(reporter) = reporter {
            reporter.abort();
        }

        let errors = failed.load(Ordering::Relaxed);
        info!(
            "Batch completed in {}. Success: {}, Errors: {}",
            format_duration(started.elapsed()),
            total - errors,
            errors
        );
        Ok(())
    }

    /// Long-running intake. Ends on stdin EOF or SIGINT/SIGTERM with a drain.
    pub async fn run_serve(&self, metrics_port: Option<u16>, output: Option<PathBuf>) -> Result<()> {
        if let Some(port) = metrics_port.or(self.config.metrics_port) {
            crate::metrics::install_prometheus(port)?;
            info!("Prometheus metrics listening on port {}", port);
        }
        if let Some(dir) = &output {
            fs::create_dir_all(dir).await?;
        }

        let monitor = spawn_health_monitor(
            self.service.clone(),
            self.config.health_interval,
            self.service.background_token(),
        );

        let (tx, mut rx) = mpsc::unbounded_channel::<IntakeReply>();
        let writer = tokio::spawn(async move {
            let mut stdout = tokio::io::stdout();
            while let Some(reply) = rx.recv().await {
                match serde_json::to_vec(&reply) {
                    Ok(mut line) => {
                        line.push(b'\n');
                        if let Err(e) = stdout.write_all(&line).await {
                            error!("Failed to write reply: {}", e);
                            break;
                        }
                        let _ = stdout.flush().await;
                    }
                    Err(e) => error!("Failed to encode reply: {}", e),
                }
            }
        });

        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        let output = output.map(Arc::new);
        let shutdown = shutdown_signal();
        tokio::pin!(shutdown);

        loop {
            let line = tokio::select! {
                line = lines.next_line() => line?,
                _ = &mut shutdown => {
                    info!("Received shutdown signal");
                    break;
                }
            };
            let Some(line) = line else {
                info!("Intake closed");
                break;
            };
            if line.trim().is_empty() {
                continue;
            }

            match serde_json::from_str::<IntakeLine>(&line) {
                Ok(IntakeLine::Cancel { cancel }) => {
                    let found = self.service.cancel(&cancel);
                    let _ = tx.send(IntakeReply {
                        job_id: Some(cancel),
                        status: if found { "cancelling" } else { "unknown" }.to_string(),
                        ..Default::default()
                    });
                }
                Ok(IntakeLine::Status { status }) => {
                    let state = self.service.job_status(&status);
                    let _ = tx.send(IntakeReply {
                        job_id: Some(status),
                        status: state.map_or("unknown", |s| s.as_str()).to_string(),
                        ..Default::default()
                    });
                }
                Ok(IntakeLine::Scrape { id, request }) => {
                    self.intake(id, request, tx.clone(), output.clone()).await;
                }
                Err(e) => {
                    let _ = tx.send(IntakeReply {
                        status: "rejected".to_string(),
                        error: Some(format!("Malformed request: {e}")),
                        ..Default::default()
                    });
                }
            }
        }

        self.service
            .shutdown(ShutdownMode::Drain(self.config.shutdown_grace))
            .await;
        drop(tx);
        let _ = writer.await;
        let _ = monitor.await;
        Ok(())
    }

    async fn intake(
        &self,
        id: Option<String>,
        request: ScrapeRequest,
        tx: mpsc::UnboundedSender<IntakeReply>,
        output: Option<Arc<PathBuf>>,
    ) {
        match self.service.submit(request).await {
            Ok(Submission::Cached(result)) => {
                let path = save_binary(output.as_deref(), &result, None).await;
                let _ = tx.send(IntakeReply {
                    id,
                    status: "succeeded".to_string(),
                    cached: true,
                    result: Some(ResultSummary::new(&result, path)),
                    ..Default::default()
                });
            }
            Ok(Submission::Pending(handle)) => {
                let _ = tx.send(IntakeReply {
                    id: id.clone(),
                    job_id: Some(handle.job_id()),
                    status: "queued".to_string(),
                    ..Default::default()
                });
                tokio::spawn(async move {
                    let outcome = handle.wait().await;
                    let result = match &outcome.result {
                        Some(result) => {
                            let path =
                                save_binary(output.as_deref(), result, Some(outcome.job_id)).await;
                            Some(ResultSummary::new(result, path))
                        }
                        None => None,
                    };
                    let _ = tx.send(IntakeReply {
                        id,
                        job_id: Some(outcome.job_id),
                        status: outcome.status.as_str().to_string(),
                        result,
                        error: outcome.error.map(|e| e.to_string()),
                        ..Default::default()
                    });
                });
            }
            Err(e) => {
                let _ = tx.send(IntakeReply {
                    id,
                    status: "rejected".to_string(),
                    error: Some(e.to_string()),
                    ..Default::default()
                });
            }
        }
    }

    pub async fn show_health(&self, detailed: bool) -> Result<()> {
        let report = self.service.health().await;
        print_health(&report, detailed);
        self.service.shutdown(ShutdownMode::Abandon).await;
        Ok(())
    }
}

fn print_health(report: &HealthReport, detailed: bool) {
    println!("System Health Check");
    println!("==================");
    println!("Level: {:?} (live: {}, ready: {})", report.level, report.live, report.ready);

    println!("Browser Pool:");
    println!("  Capacity: {}", report.pool.capacity);
    println!("  Idle sessions: {}", report.pool.idle);
    println!("  Leased sessions: {}", report.pool.leased);
    println!("  Launched: {}", report.pool.launched);
    println!("  Discarded: {}", report.pool.discarded);
    println!("  Launch failures: {}", report.pool.launch_failures);

    println!("\nQueue Status:");
    println!("  Pending jobs: {}/{}", report.queue_depth, report.queue_capacity);
    println!("  In flight: {}", report.in_flight);

    if let Some(bytes) = report.memory_usage {
        println!("\nMemory: {}", format_bytes(bytes));
    }

    if detailed {
        println!("\nLanes:");
        for lane in &report.lanes {
            println!(
                "  Lane {}: running {}, busy {}, processed {}, errors {}",
                lane.id, lane.is_running, lane.busy, lane.processed_count, lane.error_count
            );
        }
        println!("\nCache:");
        println!("  Entries: {}", report.cache.entries);
        println!("  Hits: {}, Misses: {}", report.cache.hits, report.cache.misses);
        println!("  Evictions: {}", report.cache.evictions);
    }
}

/// Parse and validate a configuration file without starting anything.
pub async fn validate_config_file(path: &Path) -> Result<Config> {
    println!("Validating configuration: {}", path.display());

    let config = read_config(path).await?;
    config.validate()?;

    println!("Configuration is valid:");
    println!("  Browser pool size: {}", config.browser_pool_size);
    println!("  Worker lanes: {}", config.workers);
    println!("  Queue capacity: {}", config.queue_capacity);
    println!("  Navigation timeout: {:?}", config.navigation_timeout);
    println!("  Retry attempts: {}", config.retry.max_attempts);
    println!("  Cache TTL: {:?}", config.cache.ttl);

    Ok(config)
}

async fn read_config(path: &Path) -> Result<Config> {
    let content = fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("Invalid configuration in {}", path.display()))
}

/// Load the configuration file (or defaults) and apply command-line overrides.
pub async fn load_config(args: &Cli) -> Result<Config> {
    let mut config = match &args.config {
        Some(path) => read_config(path).await?,
        None => Config::default(),
    };

    if let Some(pool_size) = args.pool_size {
        config.browser_pool_size = pool_size;
        if args.workers.is_none() {
            config.workers = config.workers.min(pool_size);
        }
    }
    if let Some(workers) = args.workers {
        config.workers = workers;
    }
    if let Some(timeout) = args.timeout {
        config.navigation_timeout = Duration::from_secs(timeout);
    }
    if let Some(chrome_path) = &args.chrome_path {
        config.chrome_path = Some(chrome_path.clone());
    }

    config.validate()?;

    info!("Configuration loaded successfully");
    info!("Browser pool size: {}", config.browser_pool_size);
    info!("Worker lanes: {}", config.workers);
    info!("Navigation timeout: {:?}", config.navigation_timeout);

    Ok(config)
}

pub async fn read_urls_from_file(path: &Path) -> Result<Vec<String>> {
    let content = fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let urls: Vec<String> = parse_url_list(&content);
    if urls.is_empty() {
        bail!("No URLs found in {}", path.display());
    }
    Ok(urls)
}

fn parse_url_list(content: &str) -> Vec<String> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect()
}

pub fn generate_filename(url: &str, content_type: &str) -> String {
    let stem = url
        .trim_start_matches("https://")
        .trim_start_matches("http://");
    let extension = match content_type.split(';').next().unwrap_or_default().trim() {
        "text/html" => "html",
        "text/plain" => "txt",
        "image/png" => "png",
        "image/jpeg" => "jpg",
        "image/webp" => "webp",
        _ => "bin",
    };
    format!("{}.{}", sanitize_filename(stem), extension)
}

async fn write_result(dir: &Path, result: &ScrapeResult) -> Result<PathBuf> {
    let path = dir.join(generate_filename(&result.url, &result.content_type));
    fs::write(&path, &result.body).await?;
    Ok(path)
}

async fn save_binary(
    dir: Option<&PathBuf>,
    result: &ScrapeResult,
    job_id: Option<JobId>,
) -> Option<PathBuf> {
    let dir = dir?;
    if !result.content_type.starts_with("image/") {
        return None;
    }
    let name = match job_id {
        Some(id) => format!("{}-{}", id, generate_filename(&result.url, &result.content_type)),
        None => generate_filename(&result.url, &result.content_type),
    };
    let path = dir.join(name);
    match fs::write(&path, &result.body).await {
        Ok(()) => Some(path),
        Err(e) => {
            warn!("Failed to write {}: {}", path.display(), e);
            None
        }
    }
}

/// Resolves on SIGINT or SIGTERM.
pub async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match (
            signal(SignalKind::interrupt()),
            signal(SignalKind::terminate()),
        ) {
            (Ok(mut sigint), Ok(mut sigterm)) => {
                tokio::select! {
                    _ = sigint.recv() => info!("Received SIGINT"),
                    _ = sigterm.recv() => info!("Received SIGTERM"),
                }
            }
            _ => {
                warn!("Failed to install signal handlers, falling back to ctrl-c");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

pub fn setup_logging(verbose: bool) -> Result<()> {
    let level = if verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_list_skips_comments_and_blanks() {
        let urls = parse_url_list("https://a.example\n\n# comment\n  https://b.example  \n");
        assert_eq!(urls, vec!["https://a.example", "https://b.example"]);
    }

    #[test]
    fn test_generate_filename() {
        assert_eq!(
            generate_filename("https://example.com/a?b=c", "text/html; charset=utf-8"),
            "example.com_a_b_c.html"
        );
        assert_eq!(
            generate_filename("http://example.com", "image/webp"),
            "example.com.webp"
        );
    }

    #[test]
    fn test_render_args_fill_missing_dimension() {
        let config = Config::default();
        let args = RenderArgs {
            width: Some(800),
            format: Some("jpeg".to_string()),
            ..Default::default()
        };
        let options = args.to_options(&config).unwrap();
        assert_eq!(
            options.viewport,
            Some(Viewport::new(800, config.limits.default_viewport.height))
        );
        assert_eq!(options.image_format, ImageFormat::Jpeg);
        assert!(RenderArgs::default().to_options(&config).unwrap().viewport.is_none());
    }

    #[test]
    fn test_intake_line_shapes() {
        let id = JobId::new();
        let cancel: IntakeLine =
            serde_json::from_str(&format!(r#"{{"cancel":"{id}"}}"#)).unwrap();
        assert!(matches!(cancel, IntakeLine::Cancel { cancel } if cancel == id));

        let scrape: IntakeLine = serde_json::from_str(
            r#"{"id":"r1","url":"https://example.com","strategy":"text","priority":"high"}"#,
        )
        .unwrap();
        match scrape {
            IntakeLine::Scrape { id, request } => {
                assert_eq!(id.as_deref(), Some("r1"));
                assert_eq!(request.strategy, "text");
                assert_eq!(request.priority, Priority::High);
            }
            other => panic!("unexpected intake line: {other:?}"),
        }
    }

    #[test]
    fn test_reply_omits_empty_fields() {
        let reply = IntakeReply {
            status: "rejected".to_string(),
            error: Some("Job queue is full".to_string()),
            ..Default::default()
        };
        assert_eq!(
            serde_json::to_string(&reply).unwrap(),
            r#"{"status":"rejected","error":"Job queue is full"}"#
        );
    }
}
