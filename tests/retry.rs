//! tests/retry.rs
//! Retry policy: eligibility, the hard ceiling, and one-shot re-arming.

mod common;

use std::sync::atomic::Ordering;
use std::time::Duration as StdDuration;

use common::{build_scheduler, setup_tracing, test_config, wait_for, MockCollab};
use presswork::{QueryError, TaskKind, TaskPayload, TaskStatus, MAX_RETRIES};

#[tokio::test]
async fn retry_walks_the_same_record_to_the_ceiling() {
  setup_tracing();
  // Publisher permanently down: every attempt fails at the publish stage.
  let mock = MockCollab::new().with_trends(10);
  mock.publish_ok.store(false, Ordering::SeqCst);
  *mock.publish_message.lock() = "endpoint unreachable".to_string();

  let scheduler = build_scheduler(&mock, 1, test_config());
  scheduler.start();

  let task = scheduler
    .run_immediate(TaskKind::GenerateAndPublish, TaskPayload::new())
    .await
    .unwrap();
  let task_id = task.id;
  assert_eq!(task.status, TaskStatus::Failed);
  assert_eq!(task.retry_count, 1);

  // First retry: re-armed, re-run, fails again on the same record.
  assert!(scheduler.retry_task(task_id).await.unwrap());
  let pending_now = scheduler.get_task(task_id).unwrap();
  assert_eq!(pending_now.status, TaskStatus::Pending);
  assert!(pending_now.error.is_none(), "error cleared on retry");

  let failed_again = wait_for(StdDuration::from_secs(3), || {
    let t = scheduler.get_task(task_id).unwrap();
    t.status == TaskStatus::Failed && t.retry_count == 2
  })
  .await;
  assert!(failed_again, "re-armed execution reaches retry_count 2");

  // Second retry: same dance up to the ceiling.
  assert!(scheduler.retry_task(task_id).await.unwrap());
  let at_ceiling = wait_for(StdDuration::from_secs(3), || {
    let t = scheduler.get_task(task_id).unwrap();
    t.status == TaskStatus::Failed && t.retry_count == MAX_RETRIES
  })
  .await;
  assert!(at_ceiling, "re-armed execution reaches the retry ceiling");

  // Third call: ceiling reached, hard stop, record untouched.
  let before = scheduler.get_task(task_id).unwrap();
  assert!(!scheduler.retry_task(task_id).await.unwrap());
  let after = scheduler.get_task(task_id).unwrap();
  assert_eq!(after, before, "refused retry leaves the record unchanged");

  let metrics = scheduler.metrics_snapshot();
  assert_eq!(metrics.tasks_retried, 2);
  assert_eq!(metrics.tasks_failed, 3);

  scheduler.stop(None).await.unwrap();
}

#[tokio::test]
async fn retry_on_completed_task_is_refused() {
  setup_tracing();
  let mock = MockCollab::new().with_trends(1);
  let scheduler = build_scheduler(&mock, 1, test_config());
  scheduler.start();

  let task = scheduler
    .run_immediate(TaskKind::Scrape, TaskPayload::new())
    .await
    .unwrap();
  assert_eq!(task.status, TaskStatus::Completed);

  assert!(!scheduler.retry_task(task.id).await.unwrap());
  let unchanged = scheduler.get_task(task.id).unwrap();
  assert_eq!(unchanged.status, TaskStatus::Completed);
  assert_eq!(unchanged.retry_count, 0);

  scheduler.stop(None).await.unwrap();
}

#[tokio::test]
async fn retry_of_unknown_task_is_not_found() {
  setup_tracing();
  let mock = MockCollab::new();
  let scheduler = build_scheduler(&mock, 1, test_config());
  scheduler.start();

  let missing = uuid::Uuid::new_v4();
  let result = scheduler.retry_task(missing).await;
  assert!(matches!(result, Err(QueryError::TaskNotFound(id)) if id == missing));

  scheduler.stop(None).await.unwrap();
}

#[tokio::test]
async fn non_rerunnable_kinds_are_not_rearmed() {
  setup_tracing();
  let mock = MockCollab::new();
  mock.fail_generation.store(true, Ordering::SeqCst);
  let scheduler = build_scheduler(&mock, 1, test_config());
  scheduler.start();

  let mut params = TaskPayload::new();
  params.insert("topic".into(), "Housing guides".into());
  let task = scheduler
    .run_immediate(TaskKind::CustomBlog, params)
    .await
    .unwrap();
  assert_eq!(task.status, TaskStatus::Failed);

  // Failed and under the ceiling, but custom content must be resubmitted by
  // the caller rather than re-armed automatically.
  assert!(!scheduler.retry_task(task.id).await.unwrap());
  let unchanged = scheduler.get_task(task.id).unwrap();
  assert_eq!(unchanged.status, TaskStatus::Failed);
  assert_eq!(unchanged.retry_count, 1);

  scheduler.stop(None).await.unwrap();
}

#[tokio::test]
async fn retry_succeeds_when_the_fault_clears() {
  setup_tracing();
  let mock = MockCollab::new().with_trends(5);
  mock.publish_ok.store(false, Ordering::SeqCst);
  let scheduler = build_scheduler(&mock, 1, test_config());
  scheduler.start();

  let task = scheduler
    .run_immediate(TaskKind::GenerateAndPublish, TaskPayload::new())
    .await
    .unwrap();
  assert_eq!(task.status, TaskStatus::Failed);

  // Publisher recovers before the re-armed execution.
  mock.publish_ok.store(true, Ordering::SeqCst);
  assert!(scheduler.retry_task(task.id).await.unwrap());

  let recovered = wait_for(StdDuration::from_secs(3), || {
    scheduler.get_task(task.id).unwrap().status == TaskStatus::Completed
  })
  .await;
  assert!(recovered, "retried execution completes once the publisher is back");

  let final_task = scheduler.get_task(task.id).unwrap();
  assert!(final_task.error.is_none());
  assert!(!final_task.result.is_empty());
  assert_eq!(final_task.retry_count, 1, "count reflects the one failed attempt");

  scheduler.stop(None).await.unwrap();
}
