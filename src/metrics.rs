use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

// --- Simple Histogram Implementation ---

/// A basic concurrent histogram storing count and sum.
///
/// Suitable for simple latency tracking without detailed percentile
/// information. Uses `Relaxed` ordering; strict inter-metric consistency is
/// not required here.
#[derive(Debug, Default)]
pub struct SimpleHistogram {
  count: AtomicUsize,
  sum_micros: AtomicUsize,
}

impl SimpleHistogram {
  /// Records a duration observation in the histogram.
  pub fn record(&self, duration: Duration) {
    self.count.fetch_add(1, Ordering::Relaxed);
    self.sum_micros.fetch_add(
      duration.as_micros().try_into().unwrap_or(usize::MAX),
      Ordering::Relaxed,
    );
  }

  /// Gets the total number of observations recorded.
  pub fn get_count(&self) -> usize {
    self.count.load(Ordering::Relaxed)
  }

  /// Gets the total sum of durations recorded (in microseconds).
  pub fn get_sum_micros(&self) -> usize {
    self.sum_micros.load(Ordering::Relaxed)
  }
}

/// Internal state for tracking scheduler metrics using atomic counters.
///
/// Cloned and shared between the coordinator, the workers, and the runner.
/// Cloning only clones the `Arc`s.
#[derive(Debug, Clone, Default)]
pub struct SchedulerMetrics {
  // --- Counters (monotonically increasing) ---
  /// Trigger fires dispatched to the worker pool.
  pub trigger_fires: Arc<AtomicUsize>,
  /// Due fires skipped because the trigger's previous execution was still
  /// running.
  pub trigger_fires_missed: Arc<AtomicUsize>,
  /// Task records spawned (triggered, one-shot, and immediate).
  pub tasks_spawned: Arc<AtomicUsize>,
  /// Tasks that reached `Completed`.
  pub tasks_completed: Arc<AtomicUsize>,
  /// Tasks that reached `Failed` (including panics).
  pub tasks_failed: Arc<AtomicUsize>,
  /// Pipeline executions that panicked rather than returning an error.
  pub tasks_panicked: Arc<AtomicUsize>,
  /// Successful `retry_task` calls (a new execution was scheduled).
  pub tasks_retried: Arc<AtomicUsize>,
  /// One-shot Date triggers registered via the API or the retry policy.
  pub oneshots_scheduled: Arc<AtomicUsize>,

  // --- Gauges (current state values) ---
  /// Trigger registrations currently queued.
  pub triggers_registered_current: Arc<AtomicUsize>,
  /// Workers actively executing a fire.
  pub workers_active_current: Arc<AtomicUsize>,

  // --- Histograms ---
  /// Execution duration of pipeline runs (terminal either way).
  pub pipeline_duration: Arc<SimpleHistogram>,
}

impl SchedulerMetrics {
  pub fn new() -> Self {
    Self::default()
  }

  /// Creates a point-in-time snapshot of the current metric values.
  pub fn snapshot(&self) -> MetricsSnapshot {
    let order = Ordering::Relaxed;
    MetricsSnapshot {
      trigger_fires: self.trigger_fires.load(order),
      trigger_fires_missed: self.trigger_fires_missed.load(order),
      tasks_spawned: self.tasks_spawned.load(order),
      tasks_completed: self.tasks_completed.load(order),
      tasks_failed: self.tasks_failed.load(order),
      tasks_panicked: self.tasks_panicked.load(order),
      tasks_retried: self.tasks_retried.load(order),
      oneshots_scheduled: self.oneshots_scheduled.load(order),
      triggers_registered_current: self.triggers_registered_current.load(order),
      workers_active_current: self.workers_active_current.load(order),
      pipeline_duration_count: self.pipeline_duration.get_count(),
      pipeline_duration_sum_micros: self.pipeline_duration.get_sum_micros(),
    }
  }
}

/// A snapshot of the scheduler's metrics at a specific point in time.
///
/// Plain data; easily cloned, serialized, or shipped to monitoring.
#[derive(Debug, Clone, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
pub struct MetricsSnapshot {
  pub trigger_fires: usize,
  pub trigger_fires_missed: usize,
  pub tasks_spawned: usize,
  pub tasks_completed: usize,
  pub tasks_failed: usize,
  pub tasks_panicked: usize,
  pub tasks_retried: usize,
  pub oneshots_scheduled: usize,
  pub triggers_registered_current: usize,
  pub workers_active_current: usize,
  pub pipeline_duration_count: usize,
  pub pipeline_duration_sum_micros: usize,
}

impl MetricsSnapshot {
  /// Mean pipeline execution duration, if any runs completed.
  pub fn mean_pipeline_duration(&self) -> Option<Duration> {
    if self.pipeline_duration_count == 0 {
      None
    } else {
      let mean = self.pipeline_duration_sum_micros as f64 / self.pipeline_duration_count as f64;
      Some(Duration::from_micros(mean as u64))
    }
  }
}
