//! # Scrape Orchestrator
//!
//! Job orchestration core of a browser-automation scraping service. Scrape
//! requests are validated, fingerprinted and either answered from a TTL
//! result cache or turned into jobs that a fixed set of worker lanes run
//! against a bounded pool of headless Chromium sessions.
//!
//! ## Pipeline
//!
//! ```text
//! request -> validation -> fingerprint -> cache hit? -> in-flight de-dup
//!         -> priority queue -> worker lane -> session lease -> render
//!         -> extraction strategy -> cache write -> completion handle
//! ```
//!
//! ## Guarantees
//!
//! | Property | Mechanism |
//! |----------|-----------|
//! | **One terminal status per job** | Status transition guarded by the job's lock |
//! | **One execution per fingerprint** | In-flight registry; duplicates attach to the live job |
//! | **Exclusive sessions** | Semaphore-backed leases; dropped leases are discarded |
//! | **Bounded retries** | Exponential backoff, capped, interruptible by cancellation |
//! | **Backpressure** | Bounded queue rejects with `QueueFull` |
//! | **No stale results** | Expired entries are never served and are swept periodically |
//!
//! ## Features
//!
//! - **Browser Pool Management**: Persistent Chrome sessions, pre-warmed at startup
//! - **Isolated Renders**: Every render gets its own browser context
//! - **Pluggable Extraction**: `html`, `text` and `screenshot` strategies
//! - **Priority Scheduling**: Four priority levels with FIFO order within a level
//! - **Health Monitoring**: Periodic health reports and Prometheus metrics
//! - **Graceful Shutdown**: Drain with a grace period or abandon running jobs
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use scrape_orchestrator::{
//!     ChromeLauncher, Config, ScrapeRequest, ScrapeService, ShutdownMode, StrategyRegistry,
//! };
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::default();
//!     let launcher = Arc::new(ChromeLauncher::new(config.clone()));
//!     let service = ScrapeService::start(config, launcher, StrategyRegistry::with_defaults()).await?;
//!
//!     let result = service
//!         .scrape(ScrapeRequest::new("https://example.com", "text"))
//!         .await?;
//!     println!("{}", result.body_text().unwrap_or_default());
//!
//!     service.shutdown(ShutdownMode::Abandon).await;
//!     Ok(())
//! }
//! ```
//!
//! ## CLI Usage
//!
//! ### Single Page
//! ```bash
//! scrape-orchestrator scrape https://example.com --strategy text
//! ```
//!
//! ### Batch Processing
//! ```bash
//! scrape-orchestrator batch --input urls.txt --output results/ --strategy screenshot
//! ```
//!
//! ### Long-running Intake
//! ```bash
//! scrape-orchestrator serve --metrics-port 9000 < requests.jsonl
//! ```

/// Configuration and settings for the orchestrator
pub mod config;

/// Error types and error handling utilities
pub mod error;

/// Scrape requests, fingerprints and results
pub mod request;

/// Extraction strategies applied to rendered pages
pub mod strategy;

/// Browser session pool
pub mod browser_pool;

/// Chromium engine sessions
pub mod chrome;

/// TTL result cache
pub mod cache;

/// Jobs, completion handles and the in-flight registry
pub mod job;

/// Priority job queue
pub mod queue;

/// Per-job execution with timeout and retry policy
pub mod orchestrator;

/// Worker lanes draining the job queue
pub mod worker;

/// Intake, cancellation and shutdown
pub mod service;

/// Command-line interface implementation
pub mod cli;

/// Metrics recording and Prometheus export
pub mod metrics;

/// Health reporting for the pool, queue and process
pub mod health;

/// Utility functions and helpers
pub mod utils;

#[cfg(test)]
mod testing;


pub use browser_pool::*;
pub use cache::*;
pub use chrome::*;
pub use cli::*;
pub use config::*;
pub use error::*;
pub use health::*;
pub use job::*;
pub use orchestrator::*;
pub use queue::*;
pub use request::*;
pub use service::*;
pub use strategy::*;
pub use utils::*;
pub use worker::*;
