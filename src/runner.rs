use std::sync::Arc;
use std::time::Instant;

use tracing::{error, info, warn, Instrument};

use crate::error::{QueryError, StoreError};
use crate::metrics::SchedulerMetrics;
use crate::pipeline::context::{PipelineContext, CURRENT_PIPELINE_CONTEXT};
use crate::pipeline::Pipeline;
use crate::store::TaskStore;
use crate::task::{Task, TaskId, TaskKind, TaskPayload, TaskStatus};

/// Executes one task's pipeline body, owning the record's lifecycle from
/// `Running` to a terminal state.
///
/// The record is persisted *before* the first collaborator call, so a crash
/// mid-pipeline is detectable as a stuck-running row. Failures and panics are
/// absorbed here and converted into task state; nothing a pipeline does can
/// take down the scheduling loop.
pub(crate) struct JobRunner {
  store: Arc<dyn TaskStore>,
  pipeline: Arc<Pipeline>,
  metrics: SchedulerMetrics,
}

impl JobRunner {
  pub fn new(store: Arc<dyn TaskStore>, pipeline: Arc<Pipeline>, metrics: SchedulerMetrics) -> Self {
    Self {
      store,
      pipeline,
      metrics,
    }
  }

  /// Creates a fresh `Running` record and drives it to a terminal state.
  /// Entry point for trigger fires and for `run_immediate`.
  pub async fn run_now(
    &self,
    kind: TaskKind,
    parameters: TaskPayload,
    trigger_id: Option<String>,
  ) -> Result<Task, StoreError> {
    let mut task = Task::new_running(kind, parameters, trigger_id);
    self.store.save(&task)?;
    self
      .metrics
      .tasks_spawned
      .fetch_add(1, std::sync::atomic::Ordering::Relaxed);

    self.execute(&mut task).await?;
    Ok(task)
  }

  /// Drives an existing `Pending` record (a scheduled one-shot or a retry)
  /// to a terminal state.
  pub async fn run_pending(&self, task_id: TaskId) -> Result<Task, QueryError> {
    let mut task = self
      .store
      .find_by_id(task_id)?
      .ok_or(QueryError::TaskNotFound(task_id))?;

    if task.status != TaskStatus::Pending {
      // The record was already picked up (or finished) elsewhere; firing it
      // again would violate the single-execution guarantee.
      warn!(%task_id, status = %task.status, "Skipping fire for non-pending task record.");
      return Ok(task);
    }

    task.begin();
    self.store.save(&task)?;
    self.execute(&mut task).await?;
    Ok(task)
  }

  /// Runs the pipeline for a `Running` record and persists the terminal
  /// state. Panics inside the pipeline are caught via the spawned task's
  /// join handle and recorded as failures.
  async fn execute(&self, task: &mut Task) -> Result<(), StoreError> {
    let span = tracing::info_span!(
      "pipeline_exec",
      task_id = %task.id,
      kind = %task.kind,
      trigger_id = task.trigger_id.as_deref().unwrap_or("manual"),
    );

    let pipeline = self.pipeline.clone();
    let kind = task.kind;
    let parameters = task.parameters.clone();
    let context = PipelineContext {
      task_id: task.id,
      trigger_id: task.trigger_id.clone(),
    };

    let started = Instant::now();
    let handle = tokio::spawn(
      CURRENT_PIPELINE_CONTEXT
        .scope(context, async move { pipeline.run(kind, &parameters).await })
        .instrument(span),
    );

    let ordering = std::sync::atomic::Ordering::Relaxed;
    match handle.await {
      Ok(Ok(result)) => {
        task.complete(result);
        self.metrics.tasks_completed.fetch_add(1, ordering);
        info!(task_id = %task.id, kind = %task.kind, "Task completed.");
      }
      Ok(Err(pipeline_error)) => {
        task.fail(pipeline_error.to_string());
        self.metrics.tasks_failed.fetch_add(1, ordering);
        error!(
          task_id = %task.id,
          kind = %task.kind,
          retry_count = task.retry_count,
          error = %pipeline_error,
          "Task failed."
        );
      }
      Err(join_error) => {
        if join_error.is_panic() {
          self.metrics.tasks_panicked.fetch_add(1, ordering);
          task.fail("pipeline execution panicked");
          error!(task_id = %task.id, kind = %task.kind, "Pipeline panicked; task marked failed.");
        } else {
          task.fail("pipeline execution was cancelled");
          warn!(task_id = %task.id, "Pipeline task cancelled during execution.");
        }
        self.metrics.tasks_failed.fetch_add(1, ordering);
      }
    }
    self.metrics.pipeline_duration.record(started.elapsed());

    self.store.save(task)
  }
}
