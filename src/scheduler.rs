use std::sync::atomic::AtomicUsize;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::command::{CoordinatorCommand, FireDispatch, FireOutcome, ShutdownMode};
use crate::config::PipelineConfig;
use crate::coordinator::{Coordinator, CoordinatorState};
use crate::error::{BuildError, QueryError, ShutdownError};
use crate::metrics::{MetricsSnapshot, SchedulerMetrics};
use crate::pipeline::{Collaborators, Pipeline};
use crate::runner::JobRunner;
use crate::store::{MemoryStore, TaskStore};
use crate::task::{Task, TaskId, TaskKind, TaskPayload, TaskStatus};
use crate::trigger::{Trigger, TriggerDef};
use crate::worker::Worker;

const DEFAULT_CHANNEL_BOUND: usize = 128;
const DEFAULT_DISPATCH_BOUND: usize = 1;
const DEFAULT_WORKERS: usize = 4;

/// Builder for configuring and creating a [`Presswork`] scheduler instance.
///
/// # Example
///
/// ```no_run
/// # use presswork::{Presswork, pipeline::Collaborators};
/// # fn collaborators() -> Collaborators { unimplemented!() }
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let scheduler = Presswork::builder()
///     .collaborators(collaborators())
///     .workers(4)
///     .build()?;
/// # Ok(())
/// # }
/// ```
pub struct PressworkBuilder {
  workers: usize,
  store: Option<Arc<dyn TaskStore>>,
  collaborators: Option<Collaborators>,
  config: PipelineConfig,
  command_buffer_size: usize,
  dispatch_buffer_size: usize,
  standing_schedule: bool,
}

impl Default for PressworkBuilder {
  fn default() -> Self {
    Self {
      workers: DEFAULT_WORKERS,
      store: None,
      collaborators: None,
      config: PipelineConfig::default(),
      command_buffer_size: DEFAULT_CHANNEL_BOUND,
      dispatch_buffer_size: DEFAULT_DISPATCH_BOUND,
      standing_schedule: true,
    }
  }
}

impl PressworkBuilder {
  pub fn new() -> Self {
    Self::default()
  }

  /// Sets the worker pool size: how many pipelines may execute concurrently.
  /// Defaults to 4.
  pub fn workers(mut self, count: usize) -> Self {
    self.workers = count;
    self
  }

  /// Sets the task store backend. Defaults to an in-memory store.
  pub fn store(mut self, store: Arc<dyn TaskStore>) -> Self {
    self.store = Some(store);
    self
  }

  /// Sets the pipeline collaborators (required).
  pub fn collaborators(mut self, collaborators: Collaborators) -> Self {
    self.collaborators = Some(collaborators);
    self
  }

  /// Sets the pipeline configuration, including the standing schedule.
  pub fn config(mut self, config: PipelineConfig) -> Self {
    self.config = config;
    self
  }

  /// Sets the size of the internal buffer for commands.
  pub fn command_buffer_size(mut self, size: usize) -> Self {
    self.command_buffer_size = size.max(1);
    self
  }

  /// Sets the size of the coordinator-to-worker dispatch channel. The
  /// default of 1 keeps backpressure visible to the coordinator.
  pub fn dispatch_buffer_size(mut self, size: usize) -> Self {
    self.dispatch_buffer_size = size.max(1);
    self
  }

  /// Whether `start()` registers the standing Cron/Interval triggers derived
  /// from configuration. Defaults to true; disable for hosts that only use
  /// one-shots and immediate runs.
  pub fn standing_schedule(mut self, enabled: bool) -> Self {
    self.standing_schedule = enabled;
    self
  }

  /// Assembles a dormant scheduler. Call [`Presswork::start`] to spawn the
  /// coordinator and worker tasks.
  ///
  /// # Errors
  ///
  /// - [`BuildError::ZeroWorkers`] if the pool size is zero.
  /// - [`BuildError::MissingCollaborators`] if no collaborators were given.
  pub fn build(self) -> Result<Presswork, BuildError> {
    if self.workers == 0 {
      return Err(BuildError::ZeroWorkers);
    }
    let collaborators = self.collaborators.ok_or(BuildError::MissingCollaborators)?;
    let store = self.store.unwrap_or_else(|| Arc::new(MemoryStore::new()));

    let metrics = SchedulerMetrics::new();
    let pipeline = Arc::new(Pipeline::new(collaborators, self.config.clone()));
    let runner = Arc::new(JobRunner::new(store.clone(), pipeline, metrics.clone()));
    let active_workers_counter = Arc::new(AtomicUsize::new(0));

    let (cmd_tx, cmd_rx) = mpsc::channel::<CoordinatorCommand>(self.command_buffer_size);
    let (shutdown_tx, shutdown_rx) = watch::channel::<Option<ShutdownMode>>(None);
    let (dispatch_tx, dispatch_rx) = async_channel::bounded::<FireDispatch>(self.dispatch_buffer_size);
    let (outcome_tx, outcome_rx) = mpsc::channel::<FireOutcome>(self.command_buffer_size);

    Ok(Presswork {
      store,
      runner,
      metrics,
      config: self.config,
      cmd_tx,
      shutdown_tx,
      lifecycle: Mutex::new(Lifecycle::Dormant(Box::new(DormantParts {
        cmd_rx,
        shutdown_rx,
        dispatch_tx,
        dispatch_rx,
        outcome_tx,
        outcome_rx,
        workers: self.workers,
        standing_schedule: self.standing_schedule,
        active_workers_counter,
      }))),
    })
  }
}

/// Channel ends and settings held between `build()` and `start()`.
struct DormantParts {
  cmd_rx: mpsc::Receiver<CoordinatorCommand>,
  shutdown_rx: watch::Receiver<Option<ShutdownMode>>,
  dispatch_tx: async_channel::Sender<FireDispatch>,
  dispatch_rx: async_channel::Receiver<FireDispatch>,
  outcome_tx: mpsc::Sender<FireOutcome>,
  outcome_rx: mpsc::Receiver<FireOutcome>,
  workers: usize,
  standing_schedule: bool,
  active_workers_counter: Arc<AtomicUsize>,
}

enum Lifecycle {
  Dormant(Box<DormantParts>),
  Running {
    coordinator: JoinHandle<()>,
    workers: Vec<JoinHandle<()>>,
  },
  Stopped,
}

/// The presswork content-pipeline scheduler.
///
/// One instance owns its trigger engine, task store handle, and collaborator
/// references; construct it once at process start and pass it by reference
/// to API handlers. There is no ambient global.
pub struct Presswork {
  store: Arc<dyn TaskStore>,
  runner: Arc<JobRunner>,
  metrics: SchedulerMetrics,
  config: PipelineConfig,
  cmd_tx: mpsc::Sender<CoordinatorCommand>,
  shutdown_tx: watch::Sender<Option<ShutdownMode>>,
  lifecycle: Mutex<Lifecycle>,
}

impl std::fmt::Debug for Presswork {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Presswork")
      .field("config", &self.config)
      .finish_non_exhaustive()
  }
}

impl Presswork {
  /// Returns a builder to configure and create a `Presswork` instance.
  pub fn builder() -> PressworkBuilder {
    PressworkBuilder::new()
  }

  /// Spawns the coordinator and worker tasks and registers the standing
  /// schedule. Idempotent: calling `start` on a running scheduler is a
  /// no-op. Must be called within a tokio runtime.
  pub fn start(&self) {
    let mut lifecycle = self.lifecycle.lock();
    let parts = match &mut *lifecycle {
      Lifecycle::Dormant(_) => {
        let Lifecycle::Dormant(parts) = std::mem::replace(&mut *lifecycle, Lifecycle::Stopped)
        else {
          unreachable!()
        };
        parts
      }
      Lifecycle::Running { .. } => {
        info!("Scheduler already started; ignoring.");
        return;
      }
      Lifecycle::Stopped => {
        warn!("Scheduler was stopped; a stopped instance cannot be restarted.");
        return;
      }
    };

    let DormantParts {
      cmd_rx,
      shutdown_rx,
      dispatch_tx,
      dispatch_rx,
      outcome_tx,
      outcome_rx,
      workers,
      standing_schedule,
      active_workers_counter,
    } = *parts;

    let standing = if standing_schedule {
      self.config.standing_triggers()
    } else {
      Vec::new()
    };

    let coordinator_state = CoordinatorState {
      cmd_rx,
      shutdown_rx: shutdown_rx.clone(),
      outcome_rx,
      dispatch_tx,
      store: self.store.clone(),
      config: self.config.clone(),
      metrics: self.metrics.clone(),
      active_workers_counter: active_workers_counter.clone(),
      max_workers: workers,
      standing,
    };
    let coordinator = tokio::spawn(async move {
      Coordinator::new(coordinator_state).run().await;
      info!("Coordinator task finished.");
    });

    let mut worker_handles = Vec::with_capacity(workers);
    for worker_id in 0..workers {
      let mut worker = Worker::new(
        worker_id,
        self.runner.clone(),
        self.metrics.clone(),
        shutdown_rx.clone(),
        outcome_tx.clone(),
        dispatch_rx.clone(),
        active_workers_counter.clone(),
      );
      worker_handles.push(tokio::spawn(async move { worker.run().await }));
    }
    // Workers hold the clones; dropping the originals lets channel-closure
    // detection work.
    drop(outcome_tx);
    drop(dispatch_rx);

    info!(workers = worker_handles.len(), "Scheduler started.");
    *lifecycle = Lifecycle::Running {
      coordinator,
      workers: worker_handles,
    };
  }

  fn is_running(&self) -> bool {
    matches!(&*self.lifecycle.lock(), Lifecycle::Running { .. })
  }

  /// Creates a `Pending` task record and registers a one-shot Date trigger
  /// to execute it at `when`. Returns immediately with the task id.
  pub async fn schedule_one_shot(
    &self,
    kind: TaskKind,
    parameters: TaskPayload,
    when: DateTime<Utc>,
  ) -> Result<TaskId, QueryError> {
    if !self.is_running() {
      return Err(QueryError::SchedulerShutdown);
    }

    let task = Task::new_pending(kind, parameters.clone(), when, None);
    let task_id = task.id;
    let trigger_id = format!("oneshot_{task_id}");

    let mut task = task;
    task.trigger_id = Some(trigger_id.clone());
    self.store.save(&task)?;
    self
      .metrics
      .tasks_spawned
      .fetch_add(1, std::sync::atomic::Ordering::Relaxed);

    let def = TriggerDef::new(trigger_id, Trigger::Date(when), kind)
      .with_parameters(parameters)
      .with_task_id(task_id);

    let (responder, response_rx) = oneshot::channel();
    self
      .cmd_tx
      .send(CoordinatorCommand::RegisterTrigger { def, responder })
      .await
      .map_err(|_| QueryError::SchedulerShutdown)?;
    response_rx
      .await
      .map_err(|_| QueryError::ResponseFailed)??;

    info!(%task_id, %when, kind = %kind, "One-shot scheduled.");
    Ok(task_id)
  }

  /// Executes a pipeline immediately through the shared runner, blocking the
  /// caller until the task reaches a terminal state. Does not require the
  /// scheduling loop and does not occupy a pool worker.
  pub async fn run_immediate(
    &self,
    kind: TaskKind,
    parameters: TaskPayload,
  ) -> Result<Task, QueryError> {
    Ok(self.runner.run_now(kind, parameters, None).await?)
  }

  /// Lists task records, optionally filtered by status, most recently
  /// scheduled first.
  pub fn list_tasks(&self, status: Option<TaskStatus>) -> Result<Vec<Task>, QueryError> {
    Ok(self.store.list_by_status(status)?)
  }

  /// Fetches one task record.
  pub fn get_task(&self, task_id: TaskId) -> Result<Task, QueryError> {
    self
      .store
      .find_by_id(task_id)?
      .ok_or(QueryError::TaskNotFound(task_id))
  }

  /// Retries a failed task. Returns `Ok(true)` iff a new execution was
  /// actually scheduled; ineligible tasks (not failed, retries exhausted,
  /// kind not re-runnable) return `Ok(false)` with no state change.
  pub async fn retry_task(&self, task_id: TaskId) -> Result<bool, QueryError> {
    if !self.is_running() {
      return Err(QueryError::SchedulerShutdown);
    }
    let (responder, response_rx) = oneshot::channel();
    self
      .cmd_tx
      .send(CoordinatorCommand::RetryTask { task_id, responder })
      .await
      .map_err(|_| QueryError::SchedulerShutdown)?;
    response_rx.await.map_err(|_| QueryError::ResponseFailed)?
  }

  /// Retrieves a snapshot of the current scheduler metrics.
  pub fn metrics_snapshot(&self) -> MetricsSnapshot {
    self.metrics.snapshot()
  }

  /// Initiates a graceful shutdown: stop firing triggers, let in-flight
  /// executions reach a terminal state, then join all tasks. Idempotent;
  /// stopping a never-started or already-stopped scheduler succeeds.
  pub async fn stop(&self, timeout: Option<Duration>) -> Result<(), ShutdownError> {
    self.shutdown(ShutdownMode::Graceful, timeout).await
  }

  /// Initiates a forced shutdown. In-flight executions are abandoned: their
  /// records are left with `status = running` and are not rewritten, so an
  /// external auditor can identify them by `started_at`.
  pub async fn stop_force(&self, timeout: Option<Duration>) -> Result<(), ShutdownError> {
    self.shutdown(ShutdownMode::Force, timeout).await
  }

  async fn shutdown(
    &self,
    mode: ShutdownMode,
    timeout: Option<Duration>,
  ) -> Result<(), ShutdownError> {
    let (coordinator, workers) = {
      let mut lifecycle = self.lifecycle.lock();
      match std::mem::replace(&mut *lifecycle, Lifecycle::Stopped) {
        Lifecycle::Running {
          coordinator,
          workers,
        } => (coordinator, workers),
        Lifecycle::Dormant(_) | Lifecycle::Stopped => {
          // Never started, or a second stop call.
          return Ok(());
        }
      }
    };

    info!(?mode, "Initiating scheduler shutdown...");
    self
      .shutdown_tx
      .send(Some(mode))
      .map_err(|_| ShutdownError::SignalFailed)?;

    let mut handles = Vec::with_capacity(1 + workers.len());
    handles.push(coordinator);
    handles.extend(workers);
    let join_all_fut = join_all(handles);

    let results = if let Some(timeout) = timeout {
      match tokio::time::timeout(timeout, join_all_fut).await {
        Ok(results) => results,
        Err(_) => {
          tracing::error!("Shutdown timed out after {:?}", timeout);
          return Err(ShutdownError::Timeout);
        }
      }
    } else {
      join_all_fut.await
    };

    for result in results {
      if let Err(e) = result {
        if e.is_panic() {
          tracing::error!("A scheduler task panicked during shutdown: {:?}", e);
          return Err(ShutdownError::TaskPanic);
        }
      }
    }
    info!("All scheduler tasks joined.");
    Ok(())
  }
}
