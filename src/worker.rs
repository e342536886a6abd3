use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use crate::command::{FireDispatch, FireOutcome, ShutdownMode};
use crate::metrics::SchedulerMetrics;
use crate::runner::JobRunner;

/// A worker task that executes trigger fires.
///
/// Workers wait for dispatches from the coordinator on a shared channel,
/// drive the job runner, and report back so the coordinator can clear the
/// trigger's running marker. The pool size bounds how many pipelines run
/// concurrently.
pub(crate) struct Worker {
  id: usize,
  runner: Arc<JobRunner>,
  metrics: SchedulerMetrics,
  shutdown_rx: watch::Receiver<Option<ShutdownMode>>,
  outcome_tx: mpsc::Sender<FireOutcome>,
  dispatch_rx: async_channel::Receiver<FireDispatch>,
  active_counter: Arc<AtomicUsize>,
}

impl Worker {
  pub fn new(
    id: usize,
    runner: Arc<JobRunner>,
    metrics: SchedulerMetrics,
    shutdown_rx: watch::Receiver<Option<ShutdownMode>>,
    outcome_tx: mpsc::Sender<FireOutcome>,
    dispatch_rx: async_channel::Receiver<FireDispatch>,
    active_counter: Arc<AtomicUsize>,
  ) -> Self {
    Self {
      id,
      runner,
      metrics,
      shutdown_rx,
      outcome_tx,
      dispatch_rx,
      active_counter,
    }
  }

  /// Runs the main loop for the worker task: wait for a dispatch or a
  /// shutdown signal.
  pub async fn run(&mut self) {
    info!(worker_id = self.id, "Worker started. Waiting for fires...");

    loop {
      if self.force_shutdown() {
        break;
      }

      tokio::select! {
        biased;

        Ok(()) = self.shutdown_rx.changed() => {
          // Force: abandon immediately. Graceful: keep draining the
          // dispatch channel; the coordinator closes it, and recv() below
          // errors once the remaining fires are handled.
          if self.force_shutdown() {
            info!(worker_id = self.id, "Worker received forced shutdown signal.");
            break;
          }
        }

        result = self.dispatch_rx.recv() => {
          match result {
            Ok(dispatch) => self.handle_dispatch(dispatch).await,
            Err(_) => {
              // Channel closed and drained: coordinator exited or is
              // shutting down gracefully.
              if self.shutdown_rx.borrow().is_none() {
                error!(worker_id = self.id, "Dispatch channel closed unexpectedly. Worker exiting.");
              } else {
                info!(worker_id = self.id, "Dispatch channel drained during shutdown. Worker exiting.");
              }
              break;
            }
          }
        }
      }
    }

    info!(worker_id = self.id, "Worker task shutting down.");
  }

  fn force_shutdown(&self) -> bool {
    *self.shutdown_rx.borrow() == Some(ShutdownMode::Force)
  }

  async fn handle_dispatch(&self, dispatch: FireDispatch) {
    let trigger_id = dispatch.trigger_id.clone();
    debug!(
      worker_id = self.id,
      %trigger_id,
      kind = %dispatch.kind,
      "Received fire dispatch."
    );

    let lateness = Utc::now().signed_duration_since(dispatch.scheduled_for);
    if lateness > chrono::Duration::seconds(5) {
      warn!(
        worker_id = self.id,
        %trigger_id,
        late_by_secs = lateness.num_seconds(),
        "Fire started well after its scheduled time."
      );
    }

    // One-shots and retries run their pre-created record; standing triggers
    // spawn a fresh one. Runner errors here are store failures -- the
    // pipeline's own failures are already folded into task state.
    let run_result = match dispatch.task_id {
      Some(task_id) => self.runner.run_pending(task_id).await.map(|_| ()).map_err(|e| e.to_string()),
      None => self
        .runner
        .run_now(dispatch.kind, dispatch.parameters, Some(trigger_id.clone()))
        .await
        .map(|_| ())
        .map_err(|e| e.to_string()),
    };
    if let Err(e) = run_result {
      error!(worker_id = self.id, %trigger_id, error = %e, "Fire execution could not be recorded.");
    }

    if self
      .outcome_tx
      .send(FireOutcome {
        trigger_id: trigger_id.clone(),
      })
      .await
      .is_err()
    {
      // Coordinator may have shut down between execution and reporting.
      warn!(worker_id = self.id, %trigger_id, "Failed to report fire outcome (scheduler likely shutting down).");
    }

    let prev = self.active_counter.fetch_sub(1, AtomicOrdering::Relaxed);
    self
      .metrics
      .workers_active_current
      .store(prev.saturating_sub(1), AtomicOrdering::Relaxed);
    debug!(worker_id = self.id, %trigger_id, "Fire handled; worker idle.");
  }
}
