//! Presswork: An Asynchronous Content-Pipeline Scheduler
//!
//! Provides the scheduling and orchestration core of an automated content
//! pipeline: discover trending topics, generate content, enrich it (SEO,
//! images), and publish it, on both ad-hoc and recurring schedules.
//!
//! # Features
//!
//! - Trigger tasks with:
//!   - Daily cron times (`hour:minute`, UTC).
//!   - Fixed intervals (e.g., every 14 days), drift-free across slow runs.
//!   - One-shot dates (`DateTime<Utc>`); past dates fire on the next poll.
//! - Durable task records (pending/running/completed/failed) through a
//!   pluggable [`store::TaskStore`]: in-memory by default, SQLite behind the
//!   `sqlite-store` feature.
//! - Fixed per-kind pipeline stage chains ([`pipeline::Pipeline`]) over
//!   injected collaborator traits, with partial-result traces on failure.
//! - At-most-one concurrent execution per trigger identifier; overlapping
//!   fires are skipped and logged as missed, never queued twice.
//! - Bounded retry (`retry_task`) with a hard ceiling of three attempts and
//!   one-shot re-arming for re-runnable kinds.
//! - A bounded worker pool capping concurrent pipeline executions.
//! - Built-in metrics ([`metrics::MetricsSnapshot`]) and `tracing`
//!   instrumentation throughout.
//! - Graceful and forced shutdown with optional timeout.
//!
//! # Usage
//!
//! ```no_run
//! use presswork::{Presswork, TaskKind, TaskStatus};
//! use presswork::pipeline::Collaborators;
//! use chrono::{Duration, Utc};
//!
//! # fn collaborators() -> Collaborators { unimplemented!() }
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let scheduler = Presswork::builder()
//!         .collaborators(collaborators()) // your trait implementations
//!         .workers(4)
//!         .build()?;
//!
//!     // Spawns the coordinator and worker pool, and registers the standing
//!     // schedule (daily scrape, recurring generation) from configuration.
//!     scheduler.start();
//!
//!     // Ad-hoc: generate a custom piece tomorrow, held for review.
//!     let mut params = presswork::TaskPayload::new();
//!     params.insert("topic".into(), "Networking for new graduates".into());
//!     let task_id = scheduler
//!         .schedule_one_shot(TaskKind::CustomBlog, params, Utc::now() + Duration::days(1))
//!         .await?;
//!     println!("scheduled task {task_id}");
//!
//!     // Immediate: run a scrape right now, blocking until it finishes.
//!     let task = scheduler
//!         .run_immediate(TaskKind::Scrape, presswork::TaskPayload::new())
//!         .await?;
//!     println!("scrape finished: {:?} {:?}", task.status, task.result);
//!
//!     // Inspect history, newest first.
//!     for task in scheduler.list_tasks(Some(TaskStatus::Failed))? {
//!         println!("failed: {} {:?}", task.id, task.error);
//!         // Failed generate-and-publish tasks can be re-armed, up to the
//!         // retry ceiling.
//!         let retried = scheduler.retry_task(task.id).await?;
//!         println!("retry scheduled: {retried}");
//!     }
//!
//!     scheduler.stop(Some(std::time::Duration::from_secs(10))).await?;
//!     Ok(())
//! }
//! ```
//!
//! # Execution model
//!
//! A single coordinator task owns all trigger registrations and a fire queue
//! ordered by next fire time. Due fires are handed to a bounded worker pool;
//! each worker drives the job runner, which
//! persists the task record *before* the first collaborator call and folds
//! every failure (including panics) into task state. The scheduling loop
//! never terminates because one task failed.
//!
//! Stopping gracefully lets in-flight executions reach a terminal state. A
//! forced stop abandons them: their records keep `status = running` and are
//! not rewritten, so stuck work stays visible to an external auditor.

mod command;
pub mod config;
mod coordinator;
pub mod error;
pub mod metrics;
pub mod pipeline;
mod runner;
pub mod scheduler;
pub mod store;
pub mod task;
pub mod trigger;
mod worker;

// --- Public Re-exports ---

// Core scheduler components
pub use scheduler::{Presswork, PressworkBuilder};

// Configuration
pub use config::PipelineConfig;

// Error types
pub use error::{
  BuildError, ConfigError, PipelineError, QueryError, ShutdownError, StageError, StoreError,
};

// Task and trigger types
pub use task::{Task, TaskId, TaskKind, TaskPayload, TaskStatus, MAX_RETRIES};
pub use trigger::{Trigger, TriggerDef, TriggerId};

// Metrics types
pub use metrics::{MetricsSnapshot, SchedulerMetrics};
