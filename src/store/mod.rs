#[cfg(feature = "sqlite-store")]
pub mod sqlite;

use std::collections::HashMap;

use parking_lot::RwLock;

use crate::error::StoreError;
use crate::task::{Task, TaskId, TaskStatus};

/// Durable record store for task instances.
///
/// The scheduler core depends only on this interface; any backend providing
/// atomic whole-record writes qualifies. All reads and updates to a single
/// record during its lifecycle come from the one runner execution that owns
/// it, so no cross-record locking is required of implementations.
pub trait TaskStore: Send + Sync {
  /// Inserts or replaces the record keyed by `task.id`.
  fn save(&self, task: &Task) -> Result<(), StoreError>;

  /// Fetches a record by id.
  fn find_by_id(&self, id: TaskId) -> Result<Option<Task>, StoreError>;

  /// Lists records, optionally filtered by status, ordered by
  /// `scheduled_for` descending (most recently scheduled first).
  fn list_by_status(&self, status: Option<TaskStatus>) -> Result<Vec<Task>, StoreError>;
}

/// In-memory task store backed by a `HashMap`.
///
/// The default backend; suitable for tests and for deployments where task
/// history does not need to survive a restart.
#[derive(Debug, Default)]
pub struct MemoryStore {
  tasks: RwLock<HashMap<TaskId, Task>>,
}

impl MemoryStore {
  pub fn new() -> Self {
    Self::default()
  }
}

impl TaskStore for MemoryStore {
  fn save(&self, task: &Task) -> Result<(), StoreError> {
    self.tasks.write().insert(task.id, task.clone());
    Ok(())
  }

  fn find_by_id(&self, id: TaskId) -> Result<Option<Task>, StoreError> {
    Ok(self.tasks.read().get(&id).cloned())
  }

  fn list_by_status(&self, status: Option<TaskStatus>) -> Result<Vec<Task>, StoreError> {
    let tasks = self.tasks.read();
    let mut out: Vec<Task> = tasks
      .values()
      .filter(|t| status.map_or(true, |s| t.status == s))
      .cloned()
      .collect();
    out.sort_by(|a, b| b.scheduled_for.cmp(&a.scheduled_for));
    Ok(out)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::task::{TaskKind, TaskPayload};
  use chrono::{Duration, Utc};

  #[test]
  fn save_and_find_round_trip() {
    let store = MemoryStore::new();
    let task = Task::new_running(TaskKind::Scrape, TaskPayload::new(), None);
    store.save(&task).unwrap();

    let found = store.find_by_id(task.id).unwrap().unwrap();
    assert_eq!(found, task);
    assert!(store.find_by_id(uuid::Uuid::new_v4()).unwrap().is_none());
  }

  #[test]
  fn save_replaces_existing_record() {
    let store = MemoryStore::new();
    let mut task = Task::new_running(TaskKind::Scrape, TaskPayload::new(), None);
    store.save(&task).unwrap();

    task.fail("collaborator unreachable");
    store.save(&task).unwrap();

    let found = store.find_by_id(task.id).unwrap().unwrap();
    assert_eq!(found.status, TaskStatus::Failed);
    assert_eq!(found.retry_count, 1);
  }

  #[test]
  fn list_filters_and_orders_by_scheduled_for_desc() {
    let store = MemoryStore::new();
    let now = Utc::now();

    let mut older = Task::new_pending(
      TaskKind::CustomBlog,
      TaskPayload::new(),
      now - Duration::hours(2),
      None,
    );
    let newer = Task::new_pending(
      TaskKind::CustomBlog,
      TaskPayload::new(),
      now + Duration::hours(2),
      None,
    );
    let mut failed = Task::new_running(TaskKind::Scrape, TaskPayload::new(), None);
    failed.fail("nope");

    older.begin();
    older.complete(TaskPayload::new());

    store.save(&older).unwrap();
    store.save(&newer).unwrap();
    store.save(&failed).unwrap();

    let all = store.list_by_status(None).unwrap();
    assert_eq!(all.len(), 3);
    assert!(all.windows(2).all(|w| w[0].scheduled_for >= w[1].scheduled_for));

    let failed_only = store.list_by_status(Some(TaskStatus::Failed)).unwrap();
    assert_eq!(failed_only.len(), 1);
    assert_eq!(failed_only[0].id, failed.id);
  }
}
