//! Export Worker Library
//!
//! Core functionality for asynchronous report exports: requests are
//! enqueued as jobs, a worker resolves each one through the export
//! pipeline (metadata enrichment, template auto-selection, render call),
//! and clients poll the job record until it reaches a terminal state.
//!
//! ## Module Overview
//!
//! - `config`: environment-driven operational configuration
//! - `error`: typed pipeline errors and the stable error-code vocabulary
//! - `job`: job records, export requests, and state management
//! - `template`: template records, selection rules, and the catalog
//! - `queue`: interchangeable queue backends (in-memory and Redis)
//! - `pipeline`: the per-job export pipeline
//! - `render`: render service client
//! - `runner`: worker loops driving the queues
//! - `metrics`: job counters and duration histogram
//! - `telemetry`: OpenTelemetry integration and structured logging
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use export_worker::{
//!     job::ExportRequest,
//!     metrics::MetricsSink,
//!     pipeline::{ExportPipeline, NullDirectory},
//!     queue::{memory::MemoryQueue, ExportQueue},
//!     render::HttpRenderClient,
//!     runner::PollRunner,
//!     template::MemoryCatalog,
//! };
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let renderer = HttpRenderClient::new(
//!         "http://localhost:8000",
//!         Duration::from_secs(15),
//!     )?;
//!     let pipeline = Arc::new(ExportPipeline::new(
//!         Arc::new(NullDirectory),
//!         Arc::new(NullDirectory),
//!         Arc::new(MemoryCatalog::new()),
//!         Arc::new(renderer),
//!     ));
//!
//!     let queue = Arc::new(MemoryQueue::new());
//!     let request: ExportRequest = serde_json::from_str(
//!         r#"{ "title": "Weekly Report", "content": [] }"#,
//!     )?;
//!     let record = queue.enqueue(request).await?;
//!
//!     let runner = PollRunner::new(
//!         queue.clone(),
//!         pipeline,
//!         MetricsSink::new(),
//!         Duration::from_millis(500),
//!     );
//!     runner.tick_once().await?;
//!
//!     let job = queue.get_job(&record.job_id).await?;
//!     println!("{job:?}");
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod job;
pub mod metrics;
pub mod pipeline;
pub mod queue;
pub mod render;
pub mod runner;
pub mod telemetry;
pub mod template;
