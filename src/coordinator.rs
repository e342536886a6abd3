use std::cmp::Reverse;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use priority_queue::PriorityQueue;
use tokio::sync::{mpsc, watch};
use tokio::time::sleep;
use tracing::{debug, error, info, trace, warn};

use crate::command::{CoordinatorCommand, FireDispatch, FireOutcome, ShutdownMode};
use crate::config::PipelineConfig;
use crate::error::QueryError;
use crate::metrics::SchedulerMetrics;
use crate::store::TaskStore;
use crate::task::TaskStatus;
use crate::trigger::{Trigger, TriggerDef, TriggerId};

/// State handed to the coordinator task at spawn.
pub(crate) struct CoordinatorState {
  pub cmd_rx: mpsc::Receiver<CoordinatorCommand>,
  pub shutdown_rx: watch::Receiver<Option<ShutdownMode>>,
  pub outcome_rx: mpsc::Receiver<FireOutcome>,
  pub dispatch_tx: async_channel::Sender<FireDispatch>,
  pub store: Arc<dyn TaskStore>,
  pub config: PipelineConfig,
  pub metrics: SchedulerMetrics,
  pub active_workers_counter: Arc<AtomicUsize>,
  pub max_workers: usize,
  /// Standing registrations (Cron/Interval), re-derived from configuration
  /// at every start; only their spawned task records persist.
  pub standing: Vec<TriggerDef>,
}

/// The central coordinator task for the scheduler.
///
/// Owns every trigger registration and the fire queue; nothing else touches
/// them, so trigger state needs no locking. Dispatches due fires to the
/// worker pool and enforces the one-execution-per-trigger guarantee.
pub(crate) struct Coordinator {
  state: CoordinatorState,
  /// Registration details keyed by trigger id.
  triggers: HashMap<TriggerId, TriggerDef>,
  /// Fire queue: earliest next_fire wins.
  queue: PriorityQueue<TriggerId, Reverse<DateTime<Utc>>>,
  /// Triggers with an execution currently in flight. A due trigger in this
  /// set is skipped (logged as a missed fire), never queued twice.
  running: HashSet<TriggerId>,
  /// Cached instant for the next timer wakeup.
  next_wakeup_timer: Option<tokio::time::Instant>,
  shutting_down: Option<ShutdownMode>,
}

impl Coordinator {
  pub fn new(state: CoordinatorState) -> Self {
    Self {
      state,
      triggers: HashMap::new(),
      queue: PriorityQueue::new(),
      running: HashSet::new(),
      next_wakeup_timer: None,
      shutting_down: None,
    }
  }

  /// Runs the main event loop for the coordinator.
  pub async fn run(&mut self) {
    info!("Coordinator started.");

    let standing = std::mem::take(&mut self.state.standing);
    for def in standing {
      if let Err(e) = self.register_trigger(def) {
        // Standing triggers come from validated configuration; refusal here
        // is a programming error worth shouting about, not a loop-killer.
        error!(error = %e, "Standing trigger rejected at registration.");
      }
    }

    loop {
      self.update_gauge_metrics();

      let sleep_duration = self.calculate_sleep();

      tokio::select! {
        biased; // Prioritize checking the shutdown signal

        Ok(()) = self.state.shutdown_rx.changed() => {
          let mode = *self.state.shutdown_rx.borrow();
          if mode != self.shutting_down && mode.is_some() {
            self.shutting_down = mode;
            info!(mode = ?mode.unwrap(), "Coordinator received shutdown signal.");
            // No further fires either way; closing lets workers drain any
            // dispatch already in the channel and then exit.
            self.state.dispatch_tx.close();
            if self.shutting_down == Some(ShutdownMode::Force) {
              break;
            }
          }
        }

        maybe_cmd = self.state.cmd_rx.recv() => {
          match maybe_cmd {
            Some(cmd) => self.handle_command(cmd),
            None => {
              // Handle dropped without an explicit stop.
              if self.shutting_down.is_none() {
                warn!("Command channel closed unexpectedly. Initiating graceful shutdown.");
                self.shutting_down = Some(ShutdownMode::Graceful);
              }
            }
          }
        }

        maybe_outcome = self.state.outcome_rx.recv(), if self.shutting_down != Some(ShutdownMode::Force) => {
          if let Some(outcome) = maybe_outcome {
            trace!(trigger_id = %outcome.trigger_id, "Fire outcome received.");
            self.running.remove(&outcome.trigger_id);
            // A worker just freed up; recheck the queue promptly.
            self.try_wake_timer();
          }
        }

        _ = sleep(sleep_duration) => {
          trace!("Timer fired.");
          if self.shutting_down.is_none() {
            self.try_dispatch_due().await;
          }
        }
      }

      // Graceful shutdown completes once every in-flight fire has reported.
      if self.shutting_down == Some(ShutdownMode::Graceful) {
        let active = self
          .state
          .active_workers_counter
          .load(AtomicOrdering::Relaxed);
        if active == 0 {
          info!("Graceful shutdown: all workers idle. Coordinator exiting.");
          break;
        }
        trace!(active_workers = active, "Graceful shutdown: waiting for active workers.");
      }
    }

    info!("Coordinator task shutting down.");
    // Signals any waiting workers that no more fires are coming.
    self.state.dispatch_tx.close();
  }

  fn update_gauge_metrics(&self) {
    self
      .state
      .metrics
      .triggers_registered_current
      .store(self.queue.len(), AtomicOrdering::Relaxed);
    self.state.metrics.workers_active_current.store(
      self
        .state
        .active_workers_counter
        .load(AtomicOrdering::Relaxed),
      AtomicOrdering::Relaxed,
    );
  }

  /// Validates and queues a trigger registration. Re-registering an id
  /// replaces the previous entry.
  fn register_trigger(&mut self, def: TriggerDef) -> Result<(), QueryError> {
    def.validate()?;

    let now = Utc::now();
    let Some(first_fire) = def.trigger.initial_fire(now) else {
      // Post-validation this is unreachable for Cron/Interval, and Date
      // always yields its instant.
      warn!(trigger_id = %def.id, "Trigger has no computable fire time; rejected.");
      return Err(QueryError::Config(crate::error::ConfigError::IntervalOutOfRange));
    };

    if self.triggers.contains_key(&def.id) {
      debug!(trigger_id = %def.id, "Replacing existing trigger registration.");
      self.queue.remove(&def.id);
    }
    if matches!(def.trigger, Trigger::Date(_)) {
      self
        .state
        .metrics
        .oneshots_scheduled
        .fetch_add(1, AtomicOrdering::Relaxed);
    }

    debug!(trigger_id = %def.id, kind = %def.kind, %first_fire, "Trigger registered.");
    self.queue.push(def.id.clone(), Reverse(first_fire));
    self.triggers.insert(def.id.clone(), def);
    self.try_wake_timer();
    Ok(())
  }

  fn handle_command(&mut self, cmd: CoordinatorCommand) {
    match cmd {
      CoordinatorCommand::RegisterTrigger { def, responder } => {
        let result = self.register_trigger(def);
        let _ = responder.send(result);
      }
      CoordinatorCommand::RetryTask { task_id, responder } => {
        let result = self.handle_retry(task_id);
        let _ = responder.send(result);
      }
    }
  }

  /// Retry policy: eligible only for failed tasks under the retry ceiling,
  /// and only re-runnable kinds get a new one-shot trigger. `Ok(true)` iff
  /// a new execution was actually scheduled.
  fn handle_retry(&mut self, task_id: crate::task::TaskId) -> Result<bool, QueryError> {
    let mut task = self
      .state
      .store
      .find_by_id(task_id)?
      .ok_or(QueryError::TaskNotFound(task_id))?;

    if !task.retry_eligible() {
      if task.status == TaskStatus::Failed {
        warn!(%task_id, retry_count = task.retry_count, "Task has exhausted its retry budget.");
      } else {
        debug!(%task_id, status = %task.status, "Retry refused for non-failed task.");
      }
      return Ok(false);
    }
    if !task.kind.auto_retryable() {
      info!(%task_id, kind = %task.kind, "Task kind is not auto-retryable; resubmit instead.");
      return Ok(false);
    }

    let rearm_delay = chrono::Duration::from_std(self.state.config.retry_rearm_delay)
      .unwrap_or_else(|_| chrono::Duration::minutes(5));
    let run_at = Utc::now() + rearm_delay;

    task.reset_for_retry(run_at);
    self.state.store.save(&task)?;

    let def = TriggerDef::new(
      format!("retry_{task_id}"),
      Trigger::Date(run_at),
      task.kind,
    )
    .with_parameters(task.parameters.clone())
    .with_task_id(task_id);
    self.register_trigger(def)?;

    self
      .state
      .metrics
      .tasks_retried
      .fetch_add(1, AtomicOrdering::Relaxed);
    info!(%task_id, %run_at, "Task scheduled for retry.");
    Ok(true)
  }

  /// Pops and dispatches every due trigger, re-arming recurring ones from
  /// their scheduled fire time so execution latency never becomes drift.
  async fn try_dispatch_due(&mut self) {
    let now = Utc::now();
    loop {
      let active = self
        .state
        .active_workers_counter
        .load(AtomicOrdering::Relaxed);
      if active >= self.state.max_workers {
        trace!(active, max = self.state.max_workers, "Dispatch check: all workers busy.");
        // Poll again shortly rather than spinning on the zero-sleep path.
        self.next_wakeup_timer = Some(tokio::time::Instant::now() + Duration::from_millis(50));
        return;
      }

      let due = match self.queue.peek() {
        Some((_, Reverse(fire_at))) if *fire_at <= now => true,
        Some(_) => {
          trace!("Dispatch check: next fire is in the future.");
          false
        }
        None => {
          trace!("Dispatch check: queue empty.");
          false
        }
      };
      if !due {
        break;
      }

      let (trigger_id, Reverse(fire_at)) = self.queue.pop().expect("peeked entry vanished");
      let Some(def) = self.triggers.get(&trigger_id).cloned() else {
        warn!(%trigger_id, "Queued trigger has no registration; discarding.");
        continue;
      };

      if self.running.contains(&trigger_id) {
        // Previous execution still in flight: skip this fire entirely
        // rather than queuing a second concurrent one.
        warn!(%trigger_id, %fire_at, "Missed fire: previous execution still running.");
        self
          .state
          .metrics
          .trigger_fires_missed
          .fetch_add(1, AtomicOrdering::Relaxed);
        self.rearm_or_remove(&def, fire_at);
        continue;
      }

      // Increment active count before sending so capacity checks stay
      // conservative even while the dispatch is in the channel.
      let prev_active = self
        .state
        .active_workers_counter
        .fetch_add(1, AtomicOrdering::Relaxed);
      self
        .state
        .metrics
        .workers_active_current
        .store(prev_active + 1, AtomicOrdering::Relaxed);

      let dispatch = FireDispatch {
        trigger_id: trigger_id.clone(),
        kind: def.kind,
        parameters: def.parameters.clone(),
        task_id: def.task_id,
        scheduled_for: fire_at,
      };
      if let Err(e) = self.state.dispatch_tx.send(dispatch).await {
        error!(%trigger_id, error = %e, "Failed to dispatch fire; channel closed.");
        let prev = self
          .state
          .active_workers_counter
          .fetch_sub(1, AtomicOrdering::Relaxed);
        self
          .state
          .metrics
          .workers_active_current
          .store(prev.saturating_sub(1), AtomicOrdering::Relaxed);
        // Put the fire back so a restart-free recovery is at least possible.
        self.queue.push(trigger_id, Reverse(fire_at));
        break;
      }

      debug!(%trigger_id, %fire_at, "Fire dispatched.");
      self.running.insert(trigger_id.clone());
      self
        .state
        .metrics
        .trigger_fires
        .fetch_add(1, AtomicOrdering::Relaxed);
      self.rearm_or_remove(&def, fire_at);
    }

    self.next_wakeup_timer = None; // Force recalculation
  }

  /// Computes the next fire from the scheduled (not actual) fire time and
  /// re-queues, or retires a one-shot registration.
  fn rearm_or_remove(&mut self, def: &TriggerDef, fired_at: DateTime<Utc>) {
    match def.trigger.next_fire(fired_at) {
      Some(next) => {
        trace!(trigger_id = %def.id, %next, "Trigger re-armed.");
        self.queue.push(def.id.clone(), Reverse(next));
      }
      None => {
        debug!(trigger_id = %def.id, "Trigger retired (no further fires).");
        self.triggers.remove(&def.id);
      }
    }
  }

  /// Calculates the duration to sleep until the next fire is due.
  fn calculate_sleep(&mut self) -> Duration {
    if self.shutting_down.is_some() {
      return Duration::from_millis(50);
    }

    if let Some(wakeup) = self.next_wakeup_timer {
      let now = tokio::time::Instant::now();
      if wakeup > now {
        return wakeup.duration_since(now);
      }
    }

    match self.queue.peek() {
      Some((_, Reverse(next_fire))) => {
        let now_utc = Utc::now();
        let until = if *next_fire > now_utc {
          (*next_fire - now_utc)
            .to_std()
            .unwrap_or(Duration::from_millis(10))
            .max(Duration::from_millis(1))
        } else {
          // Already due; a minimal sleep keeps the timer branch armed.
          Duration::from_millis(1)
        };
        self.next_wakeup_timer = Some(tokio::time::Instant::now() + until);
        trace!(%next_fire, sleep = ?until, "Calculated next timer wakeup.");
        until
      }
      None => {
        // Nothing queued; sleep long, commands will wake us.
        self.next_wakeup_timer = None;
        Duration::from_secs(60 * 60 * 24 * 7)
      }
    }
  }

  /// Clears the cached wakeup, forcing recalculation on the next loop.
  fn try_wake_timer(&mut self) {
    self.next_wakeup_timer = None;
  }
}
