use crate::pipeline::Stage;
use crate::task::TaskId;

use thiserror::Error;

/// Errors that can occur while assembling a scheduler via `PressworkBuilder`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BuildError {
  #[error("Worker count (`workers`) must be greater than zero")]
  ZeroWorkers,
  #[error("Pipeline collaborators must be provided before building")]
  MissingCollaborators,
}

/// An invalid trigger definition, rejected at registration time.
///
/// A trigger that passes validation never disables itself mid-run; malformed
/// configuration is surfaced here and the registration is refused.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
  #[error("Cron trigger hour {0} is out of range (0..=23)")]
  CronHourOutOfRange(u32),
  #[error("Cron trigger minute {0} is out of range (0..=59)")]
  CronMinuteOutOfRange(u32),
  #[error("Interval trigger duration must be non-zero")]
  ZeroInterval,
  #[error("Interval trigger duration is out of range")]
  IntervalOutOfRange,
  #[error("Trigger id must not be empty")]
  EmptyTriggerId,
}

/// A collaborator call failure inside one pipeline stage.
///
/// Recovered at the job-runner boundary and recorded on the failed task; a
/// stage error never propagates far enough to terminate the scheduling loop.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("stage `{stage}` failed: {message}")]
pub struct StageError {
  pub stage: Stage,
  pub message: String,
}

impl StageError {
  pub fn new(stage: Stage, message: impl Into<String>) -> Self {
    Self {
      stage,
      message: message.into(),
    }
  }
}

/// A stage failure together with the stages that already completed.
///
/// The completed-stage trace is what makes a failed task diagnosable: earlier
/// stages' side effects (written images, marked trends) are not rolled back,
/// so the record must say how far the chain got.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineError {
  pub error: StageError,
  pub completed: Vec<Stage>,
}

impl std::error::Error for PipelineError {
  fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
    Some(&self.error)
  }
}

impl std::fmt::Display for PipelineError {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    if self.completed.is_empty() {
      write!(f, "{}", self.error)
    } else {
      let done: Vec<&str> = self.completed.iter().map(|s| s.as_str()).collect();
      write!(f, "{} (completed: {})", self.error, done.join(", "))
    }
  }
}

/// Errors from the storage backend underneath the task store.
#[derive(Error, Debug)]
pub enum StoreError {
  #[error("Storage backend error: {0}")]
  Backend(String),
  #[cfg(feature = "sqlite-store")]
  #[error("SQLite error: {0}")]
  Sqlite(#[from] rusqlite::Error),
  #[error("Failed to encode task payload: {0}")]
  Encode(#[from] serde_json::Error),
}

/// Errors related to querying or mutating scheduler state
/// (e.g., via `list_tasks`, `retry_task`, `schedule_one_shot`).
#[derive(Error, Debug)]
pub enum QueryError {
  #[error("Scheduler command channel is closed (not started, or shut down).")]
  SchedulerShutdown,
  #[error("Scheduler did not respond to the query (coordinator task may have panicked).")]
  ResponseFailed,
  #[error("Task with id {0} not found.")]
  TaskNotFound(TaskId),
  #[error("Invalid trigger registration: {0}")]
  Config(#[from] ConfigError),
  #[error(transparent)]
  Store(#[from] StoreError),
}

/// Errors related to the scheduler shutdown process (`stop`).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ShutdownError {
  #[error("Failed to send shutdown signal (scheduler already shut down or never started).")]
  SignalFailed,
  #[error("Timed out waiting for scheduler tasks (coordinator, workers) to complete shutdown.")]
  Timeout,
  #[error("A worker or coordinator task panicked during the shutdown process.")]
  TaskPanic,
}
