use std::time::Duration as StdDuration;

use serde::{Deserialize, Serialize};

use crate::task::TaskKind;
use crate::trigger::{Trigger, TriggerDef};

/// Trigger identifier for the daily trend-scraping registration.
pub const DAILY_SCRAPE_TRIGGER: &str = "daily_trend_scraping";
/// Trigger identifier for the recurring generate-and-publish registration.
pub const PUBLISH_INTERVAL_TRIGGER: &str = "recurring_generation";

/// Configuration for the content pipeline and its standing schedule.
///
/// Standing trigger registrations are re-derived from this at every start;
/// only their effects (spawned task records) are persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
  /// UTC hour of the daily trend scrape.
  pub scrape_hour: u32,
  /// UTC minute of the daily trend scrape.
  pub scrape_minute: u32,
  /// Time between automated generate-and-publish runs.
  pub publish_interval: StdDuration,
  /// How many top trends to consider when selecting a topic.
  pub trend_candidates: usize,
  /// How many of the selected trends to mark as used per run.
  pub trends_marked_used: usize,
  /// Topic used when no unused trends are available.
  pub default_topic: String,
  /// Subtitle rendered onto generated thumbnails.
  pub thumbnail_subtitle: String,
  /// Category label rendered onto generated banners.
  pub banner_category: String,
  /// How long user-requested content is held for review before it becomes
  /// eligible for publishing.
  pub review_delay: StdDuration,
  /// Delay before a retried task's one-shot trigger fires.
  pub retry_rearm_delay: StdDuration,
}

impl Default for PipelineConfig {
  fn default() -> Self {
    Self {
      scrape_hour: 9,
      scrape_minute: 0,
      publish_interval: StdDuration::from_secs(14 * 24 * 3600),
      trend_candidates: 5,
      trends_marked_used: 3,
      default_topic: "Career development strategies for early professionals".to_string(),
      thumbnail_subtitle: "Editorial".to_string(),
      banner_category: "Career Development".to_string(),
      review_delay: StdDuration::from_secs(24 * 3600),
      retry_rearm_delay: StdDuration::from_secs(5 * 60),
    }
  }
}

impl PipelineConfig {
  /// The standing trigger registrations derived from this configuration:
  /// the daily scrape cron and the recurring generation interval.
  pub fn standing_triggers(&self) -> Vec<TriggerDef> {
    vec![
      TriggerDef::new(
        DAILY_SCRAPE_TRIGGER,
        Trigger::Cron {
          hour: self.scrape_hour,
          minute: self.scrape_minute,
        },
        TaskKind::Scrape,
      ),
      TriggerDef::new(
        PUBLISH_INTERVAL_TRIGGER,
        Trigger::Interval(self.publish_interval),
        TaskKind::GenerateAndPublish,
      ),
    ]
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn standing_triggers_are_valid() {
    let config = PipelineConfig::default();
    for def in config.standing_triggers() {
      def.validate().expect("default standing trigger must validate");
    }
  }

  #[test]
  fn default_schedule_matches_expected_cadence() {
    let config = PipelineConfig::default();
    let triggers = config.standing_triggers();
    assert_eq!(triggers.len(), 2);
    assert!(matches!(
      triggers[0].trigger,
      Trigger::Cron { hour: 9, minute: 0 }
    ));
    assert!(matches!(
      triggers[1].trigger,
      Trigger::Interval(d) if d == StdDuration::from_secs(14 * 24 * 3600)
    ));
  }
}
