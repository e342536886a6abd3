use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration as ChronoDuration, NaiveTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::ConfigError;
use crate::task::{TaskId, TaskKind, TaskPayload};

/// Type alias for the identifier of a trigger registration.
///
/// Standing registrations use fixed names ("daily_trend_scraping"); one-shots
/// derive theirs from the task they will run ("retry_<task id>").
pub type TriggerId = String;

/// A standing rule describing when new task records are spawned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trigger {
  /// Fires at a fixed UTC time of day, once per calendar day.
  Cron { hour: u32, minute: u32 },
  /// Fires every fixed duration, relative to registration for the first fire
  /// and to the previous *scheduled* fire afterwards, so execution latency
  /// never accumulates as drift.
  Interval(StdDuration),
  /// Fires exactly once at the configured instant, then the registration is
  /// removed. A timestamp already in the past fires on the next poll rather
  /// than being dropped.
  Date(DateTime<Utc>),
}

impl Trigger {
  /// Validates the definition at registration time. A trigger that passes
  /// never silently disables itself mid-run; a malformed one never reaches
  /// the queue.
  pub fn validate(&self) -> Result<(), ConfigError> {
    match self {
      Trigger::Cron { hour, minute } => {
        if *hour >= 24 {
          return Err(ConfigError::CronHourOutOfRange(*hour));
        }
        if *minute >= 60 {
          return Err(ConfigError::CronMinuteOutOfRange(*minute));
        }
        Ok(())
      }
      Trigger::Interval(interval) => {
        if interval.is_zero() {
          return Err(ConfigError::ZeroInterval);
        }
        if chrono::Duration::from_std(*interval).is_err() {
          return Err(ConfigError::IntervalOutOfRange);
        }
        Ok(())
      }
      Trigger::Date(_) => Ok(()),
    }
  }

  /// Calculates the fire time strictly after `reference`.
  ///
  /// `reference` is the registration instant for the first call and the
  /// previous scheduled fire time on re-arm. Returns `None` when no further
  /// fire exists (a Date trigger whose instant has been reached).
  pub fn next_fire(&self, reference: DateTime<Utc>) -> Option<DateTime<Utc>> {
    match self {
      Trigger::Cron { hour, minute } => {
        // Validation guarantees the time is representable.
        let time = NaiveTime::from_hms_opt(*hour, *minute, 0)?;
        let today = reference.date_naive().and_time(time);
        let candidate = Utc.from_utc_datetime(&today);
        if candidate > reference {
          Some(candidate)
        } else {
          Some(candidate + ChronoDuration::days(1))
        }
      }
      Trigger::Interval(interval) => match ChronoDuration::from_std(*interval) {
        Ok(chrono_interval) => reference.checked_add_signed(chrono_interval),
        Err(e) => {
          warn!(?interval, error = %e, "Interval duration not representable; trigger will not re-arm.");
          None
        }
      },
      Trigger::Date(run_at) => {
        // Usually called with the fire time after execution; yielding
        // nothing at that point prevents rescheduling.
        if reference < *run_at {
          Some(*run_at)
        } else {
          None
        }
      }
    }
  }

  /// The first fire time for a registration made at `registered_at`.
  ///
  /// Differs from [`Trigger::next_fire`] only for Date triggers: an instant
  /// already in the past is returned as-is, so the engine sees an overdue
  /// fire on its next poll instead of silently dropping the registration.
  pub fn initial_fire(&self, registered_at: DateTime<Utc>) -> Option<DateTime<Utc>> {
    match self {
      Trigger::Date(run_at) => Some(*run_at),
      other => other.next_fire(registered_at),
    }
  }

  /// Whether the registration survives a fire. Date triggers are one-shot.
  pub fn recurs(&self) -> bool {
    !matches!(self, Trigger::Date(_))
  }
}

/// A trigger registration: the firing rule plus the work it spawns.
///
/// Standing registrations (Cron/Interval) spawn a fresh task record each
/// fire; Date registrations reference the `Pending` record created when they
/// were scheduled, so retries and one-shots re-run a known row.
#[derive(Debug, Clone)]
pub struct TriggerDef {
  pub id: TriggerId,
  pub trigger: Trigger,
  pub kind: TaskKind,
  pub parameters: TaskPayload,
  pub task_id: Option<TaskId>,
}

impl TriggerDef {
  pub fn new(id: impl Into<TriggerId>, trigger: Trigger, kind: TaskKind) -> Self {
    Self {
      id: id.into(),
      trigger,
      kind,
      parameters: TaskPayload::new(),
      task_id: None,
    }
  }

  pub fn with_parameters(mut self, parameters: TaskPayload) -> Self {
    self.parameters = parameters;
    self
  }

  pub fn with_task_id(mut self, task_id: TaskId) -> Self {
    self.task_id = Some(task_id);
    self
  }

  /// Full registration-time validation: trigger shape plus identifier.
  pub fn validate(&self) -> Result<(), ConfigError> {
    if self.id.is_empty() {
      return Err(ConfigError::EmptyTriggerId);
    }
    self.trigger.validate()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap()
  }

  #[test]
  fn cron_fires_later_today_when_time_not_passed() {
    let trigger = Trigger::Cron { hour: 9, minute: 0 };
    let now = at(2025, 3, 10, 6, 30, 0);
    let fire = trigger.next_fire(now).unwrap();
    assert_eq!(fire, at(2025, 3, 10, 9, 0, 0));
  }

  #[test]
  fn cron_rolls_to_next_day_when_time_passed() {
    let trigger = Trigger::Cron { hour: 9, minute: 0 };
    let now = at(2025, 3, 10, 9, 0, 0); // exactly the configured time
    let fire = trigger.next_fire(now).unwrap();
    assert_eq!(fire, at(2025, 3, 11, 9, 0, 0));

    let later = at(2025, 3, 10, 15, 45, 12);
    assert_eq!(trigger.next_fire(later).unwrap(), at(2025, 3, 11, 9, 0, 0));
  }

  #[test]
  fn cron_gap_is_always_under_24h_with_configured_hour() {
    let trigger = Trigger::Cron {
      hour: 9,
      minute: 30,
    };
    for offset_hours in 0..48 {
      let now = at(2025, 3, 10, 0, 0, 1) + ChronoDuration::hours(offset_hours);
      let fire = trigger.next_fire(now).unwrap();
      assert!(fire > now);
      assert!(fire - now < ChronoDuration::hours(24));
      assert_eq!(fire.format("%H:%M").to_string(), "09:30");
    }
  }

  #[test]
  fn interval_first_fire_is_registration_plus_interval() {
    // Scenario: a 14-day publishing interval registered at t0.
    let t0 = at(2025, 1, 1, 12, 0, 0);
    let trigger = Trigger::Interval(StdDuration::from_secs(14 * 24 * 3600));

    let first = trigger.next_fire(t0).unwrap();
    assert_eq!(first, t0 + ChronoDuration::days(14));

    // Re-arm references the scheduled fire time, not completion time, so
    // consecutive fires differ by exactly the interval.
    let second = trigger.next_fire(first).unwrap();
    assert_eq!(second, t0 + ChronoDuration::days(28));
  }

  #[test]
  fn date_fires_once_then_retires() {
    let run_at = at(2025, 6, 1, 8, 0, 0);
    let trigger = Trigger::Date(run_at);

    let registered = at(2025, 5, 20, 0, 0, 0);
    assert_eq!(trigger.next_fire(registered).unwrap(), run_at);
    assert_eq!(trigger.next_fire(run_at), None);
    assert!(!trigger.recurs());
  }

  #[test]
  fn past_date_still_yields_its_instant() {
    // A timestamp already in the past at registration is not silently
    // dropped; the engine sees an overdue fire on its next poll.
    let run_at = at(2025, 6, 1, 8, 0, 0);
    let trigger = Trigger::Date(run_at);
    let registered_late = at(2025, 6, 2, 0, 0, 0);
    assert_eq!(trigger.initial_fire(registered_late).unwrap(), run_at);
    // ...but once fired, next_fire reports nothing further.
    assert_eq!(trigger.next_fire(registered_late), None);
  }

  #[test]
  fn validation_rejects_malformed_definitions() {
    assert_eq!(
      Trigger::Cron {
        hour: 24,
        minute: 0
      }
      .validate(),
      Err(ConfigError::CronHourOutOfRange(24))
    );
    assert_eq!(
      Trigger::Cron {
        hour: 9,
        minute: 60
      }
      .validate(),
      Err(ConfigError::CronMinuteOutOfRange(60))
    );
    assert_eq!(
      Trigger::Interval(StdDuration::ZERO).validate(),
      Err(ConfigError::ZeroInterval)
    );
    assert!(Trigger::Date(Utc::now()).validate().is_ok());

    let def = TriggerDef::new("", Trigger::Cron { hour: 9, minute: 0 }, TaskKind::Scrape);
    assert_eq!(def.validate(), Err(ConfigError::EmptyTriggerId));
  }
}
