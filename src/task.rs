use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Type alias for the unique identifier of a task record. Uses UUID v4.
pub type TaskId = Uuid;

/// Opaque key-value payload carried by a task: its input parameters on the
/// way in, its structured result on the way out.
pub type TaskPayload = serde_json::Map<String, serde_json::Value>;

/// Retry ceiling for failed tasks. Once `retry_count` reaches this value the
/// task is no longer eligible for `retry_task`; the ceiling is a hard stop,
/// not a backoff delay.
pub const MAX_RETRIES: u32 = 3;

/// The pipeline a task executes when it runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
  /// Discover trending topics from all configured sources and persist them.
  Scrape,
  /// Full automated chain: pick a trend, research, generate, optimize,
  /// illustrate, publish.
  GenerateAndPublish,
  /// A user-scheduled content request, executed at its scheduled date and
  /// held for review instead of auto-publishing.
  CustomBlog,
  /// An immediately-requested custom generation, also held for review.
  GenerateCustom,
}

impl TaskKind {
  pub fn as_str(&self) -> &'static str {
    match self {
      TaskKind::Scrape => "scrape",
      TaskKind::GenerateAndPublish => "generate_and_publish",
      TaskKind::CustomBlog => "custom_blog",
      TaskKind::GenerateCustom => "generate_custom",
    }
  }

  /// Whether the retry policy may re-arm this kind automatically after a
  /// failure. Other kinds must be resubmitted by the caller.
  pub fn auto_retryable(&self) -> bool {
    matches!(self, TaskKind::GenerateAndPublish)
  }
}

impl fmt::Display for TaskKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl std::str::FromStr for TaskKind {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "scrape" => Ok(TaskKind::Scrape),
      "generate_and_publish" => Ok(TaskKind::GenerateAndPublish),
      "custom_blog" => Ok(TaskKind::CustomBlog),
      "generate_custom" => Ok(TaskKind::GenerateCustom),
      other => Err(format!("unknown task kind: {other}")),
    }
  }
}

/// Lifecycle state of a task record.
///
/// `Completed` and `Failed` are terminal: no further transitions happen
/// without an explicit `retry_task`, which resets a failed record to
/// `Pending`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
  Pending,
  Running,
  Completed,
  Failed,
}

impl TaskStatus {
  pub fn as_str(&self) -> &'static str {
    match self {
      TaskStatus::Pending => "pending",
      TaskStatus::Running => "running",
      TaskStatus::Completed => "completed",
      TaskStatus::Failed => "failed",
    }
  }

  pub fn is_terminal(&self) -> bool {
    matches!(self, TaskStatus::Completed | TaskStatus::Failed)
  }
}

impl fmt::Display for TaskStatus {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl std::str::FromStr for TaskStatus {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "pending" => Ok(TaskStatus::Pending),
      "running" => Ok(TaskStatus::Running),
      "completed" => Ok(TaskStatus::Completed),
      "failed" => Ok(TaskStatus::Failed),
      other => Err(format!("unknown task status: {other}")),
    }
  }
}

/// One scheduled or ad-hoc execution instance of a pipeline kind.
///
/// Exactly one of `result`/`error` is non-empty once the status is terminal.
/// A record is persisted with `status = Running` *before* the first
/// collaborator call, so a crash mid-pipeline leaves a detectable
/// stuck-running row rather than a silent loss.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
  pub id: TaskId,
  pub kind: TaskKind,
  pub status: TaskStatus,
  /// The instant the task became eligible to run.
  pub scheduled_for: DateTime<Utc>,
  /// Set when execution begins. For a retried record this reflects the most
  /// recent attempt.
  pub started_at: Option<DateTime<Utc>>,
  /// Set when the record reaches a terminal state, again per attempt.
  pub completed_at: Option<DateTime<Utc>>,
  /// Kind-specific input payload (topic, custom instructions, ...).
  pub parameters: TaskPayload,
  /// Structured output, populated only on success.
  pub result: TaskPayload,
  /// Human-readable failure cause, populated only on failure. Names the
  /// failing stage and the stages that completed before it.
  pub error: Option<String>,
  /// Incremented each time an execution attempt fails. Never exceeds
  /// [`MAX_RETRIES`].
  pub retry_count: u32,
  /// Identifier of the trigger that spawned this record, if any. Manual
  /// `run_immediate` records carry `None`.
  pub trigger_id: Option<String>,
  pub created_at: DateTime<Utc>,
  pub updated_at: DateTime<Utc>,
}

impl Task {
  /// Creates a record already in the `Running` state, used when a trigger
  /// fires or a caller requests immediate execution.
  pub fn new_running(kind: TaskKind, parameters: TaskPayload, trigger_id: Option<String>) -> Self {
    let now = Utc::now();
    Self {
      id: Uuid::new_v4(),
      kind,
      status: TaskStatus::Running,
      scheduled_for: now,
      started_at: Some(now),
      completed_at: None,
      parameters,
      result: TaskPayload::new(),
      error: None,
      retry_count: 0,
      trigger_id,
      created_at: now,
      updated_at: now,
    }
  }

  /// Creates a `Pending` record for a one-shot scheduled in the future; the
  /// Date trigger that fires it carries this record's id.
  pub fn new_pending(
    kind: TaskKind,
    parameters: TaskPayload,
    scheduled_for: DateTime<Utc>,
    trigger_id: Option<String>,
  ) -> Self {
    let now = Utc::now();
    Self {
      id: Uuid::new_v4(),
      kind,
      status: TaskStatus::Pending,
      scheduled_for,
      started_at: None,
      completed_at: None,
      parameters,
      result: TaskPayload::new(),
      error: None,
      retry_count: 0,
      trigger_id,
      created_at: now,
      updated_at: now,
    }
  }

  /// Transitions `Pending -> Running` at execution start.
  pub fn begin(&mut self) {
    let now = Utc::now();
    self.status = TaskStatus::Running;
    self.started_at = Some(now);
    self.completed_at = None;
    self.updated_at = now;
  }

  /// Finalizes a successful execution.
  pub fn complete(&mut self, result: TaskPayload) {
    let now = Utc::now();
    self.status = TaskStatus::Completed;
    self.completed_at = Some(now);
    self.result = result;
    self.error = None;
    self.updated_at = now;
  }

  /// Finalizes a failed execution, incrementing the retry counter.
  pub fn fail(&mut self, error: impl Into<String>) {
    let now = Utc::now();
    self.status = TaskStatus::Failed;
    self.completed_at = Some(now);
    self.result = TaskPayload::new();
    self.error = Some(error.into());
    self.retry_count = self.retry_count.saturating_add(1);
    self.updated_at = now;
  }

  /// Resets a failed record for another attempt. Caller must have checked
  /// [`Task::retry_eligible`].
  pub fn reset_for_retry(&mut self, scheduled_for: DateTime<Utc>) {
    self.status = TaskStatus::Pending;
    self.error = None;
    self.scheduled_for = scheduled_for;
    self.updated_at = Utc::now();
  }

  /// Whether `retry_task` may act on this record: failed, and under the
  /// retry ceiling.
  pub fn retry_eligible(&self) -> bool {
    self.status == TaskStatus::Failed && self.retry_count < MAX_RETRIES
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn params(topic: &str) -> TaskPayload {
    let mut p = TaskPayload::new();
    p.insert("topic".into(), serde_json::Value::String(topic.into()));
    p
  }

  #[test]
  fn running_task_has_started_at() {
    let task = Task::new_running(TaskKind::Scrape, TaskPayload::new(), None);
    assert_eq!(task.status, TaskStatus::Running);
    assert!(task.started_at.is_some());
    assert!(task.completed_at.is_none());
    assert_eq!(task.retry_count, 0);
  }

  #[test]
  fn complete_sets_result_and_clears_error() {
    let mut task = Task::new_running(TaskKind::Scrape, TaskPayload::new(), None);
    let mut result = TaskPayload::new();
    result.insert("trends_found".into(), 7.into());
    task.complete(result);

    assert_eq!(task.status, TaskStatus::Completed);
    assert!(task.status.is_terminal());
    assert!(task.error.is_none());
    assert!(!task.result.is_empty());
    assert!(task.started_at.unwrap() <= task.completed_at.unwrap());
  }

  #[test]
  fn fail_sets_error_and_bumps_retry_count() {
    let mut task = Task::new_running(TaskKind::GenerateAndPublish, params("visas"), None);
    task.fail("stage `publish` failed: endpoint unreachable");

    assert_eq!(task.status, TaskStatus::Failed);
    assert!(task.result.is_empty());
    assert_eq!(task.retry_count, 1);
    assert!(task.error.as_deref().unwrap().contains("publish"));
  }

  #[test]
  fn retry_eligibility_respects_ceiling_and_status() {
    let mut task = Task::new_running(TaskKind::GenerateAndPublish, TaskPayload::new(), None);
    assert!(!task.retry_eligible(), "running task is not retryable");

    task.fail("boom");
    assert!(task.retry_eligible());

    task.retry_count = MAX_RETRIES;
    assert!(!task.retry_eligible(), "ceiling is a hard stop");

    let mut done = Task::new_running(TaskKind::Scrape, TaskPayload::new(), None);
    done.complete(TaskPayload::new());
    assert!(!done.retry_eligible(), "completed task is not retryable");
  }

  #[test]
  fn reset_for_retry_clears_error_and_reschedules() {
    let mut task = Task::new_running(TaskKind::GenerateAndPublish, TaskPayload::new(), None);
    task.fail("transient");
    let later = Utc::now() + chrono::Duration::minutes(5);
    task.reset_for_retry(later);

    assert_eq!(task.status, TaskStatus::Pending);
    assert!(task.error.is_none());
    assert_eq!(task.scheduled_for, later);
    assert_eq!(task.retry_count, 1, "retry count survives the reset");
  }

  #[test]
  fn kind_round_trips_through_str() {
    for kind in [
      TaskKind::Scrape,
      TaskKind::GenerateAndPublish,
      TaskKind::CustomBlog,
      TaskKind::GenerateCustom,
    ] {
      assert_eq!(kind.as_str().parse::<TaskKind>().unwrap(), kind);
    }
    assert!("publish_everything".parse::<TaskKind>().is_err());
  }
}
