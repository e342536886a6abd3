use chrono::{DateTime, Utc};
use tokio::sync::oneshot;

use crate::error::QueryError;
use crate::task::{TaskId, TaskKind, TaskPayload};
use crate::trigger::{TriggerDef, TriggerId};

/// Commands sent from the `Presswork` handle to the coordinator task.
///
/// Each command carries a `oneshot::Sender` for the coordinator to send the
/// response back to the requesting task.
#[derive(Debug)]
pub(crate) enum CoordinatorCommand {
  /// Register a trigger (validated by the coordinator before queuing).
  /// Used for one-shot Date registrations; standing triggers are registered
  /// internally at start.
  RegisterTrigger {
    def: TriggerDef,
    responder: oneshot::Sender<Result<(), QueryError>>,
  },
  /// Retry a failed task: reset it to pending and re-arm a one-shot Date
  /// trigger for re-runnable kinds. Responds `Ok(true)` iff a new execution
  /// was actually scheduled.
  RetryTask {
    task_id: TaskId,
    responder: oneshot::Sender<Result<bool, QueryError>>,
  },
}

/// Represents the requested shutdown mode. Sent via a `watch` channel;
/// `None` indicates the scheduler is running normally.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ShutdownMode {
  /// Wait for in-flight executions to reach a terminal state, then exit.
  Graceful,
  /// Exit as soon as possible. An abandoned execution's record is left with
  /// `status = running`; it is not rewritten.
  Force,
}

/// One due trigger handed from the coordinator to a worker.
#[derive(Debug, Clone)]
pub(crate) struct FireDispatch {
  pub trigger_id: TriggerId,
  pub kind: TaskKind,
  pub parameters: TaskPayload,
  /// Pre-created record for one-shots and retries; `None` for standing
  /// triggers, whose fires spawn fresh records.
  pub task_id: Option<TaskId>,
  /// The fire time the trigger was due at, for logging and lateness checks.
  pub scheduled_for: DateTime<Utc>,
}

/// Message sent from a worker back to the coordinator after an execution
/// attempt, so the trigger's running marker can be cleared.
#[derive(Debug)]
pub(crate) struct FireOutcome {
  pub trigger_id: TriggerId,
}
