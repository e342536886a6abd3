use crate::task::TaskId;

/// Contextual information available to collaborator implementations while a
/// pipeline is executing, via a tokio task-local. Set by the job runner
/// around each pipeline execution.
#[derive(Clone, Debug)]
pub struct PipelineContext {
  /// The task record this execution is writing to.
  pub task_id: TaskId,
  /// The trigger that spawned the task, if any. `None` for manual runs.
  pub trigger_id: Option<String>,
}

tokio::task_local! {
  /// Provides access to the current `PipelineContext` within a pipeline's
  /// execution scope.
  pub static CURRENT_PIPELINE_CONTEXT: PipelineContext;
}

/// Attempts to retrieve the context of the currently executing pipeline.
///
/// Returns `None` when called outside a runner-managed execution (e.g. from
/// a collaborator unit test driving the trait directly).
pub fn try_current_context() -> Option<PipelineContext> {
  CURRENT_PIPELINE_CONTEXT.try_with(|ctx| ctx.clone()).ok()
}
