//! SQLite-backed task store (feature `sqlite-store`).

use std::path::Path;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, Row};
use uuid::Uuid;

use crate::error::StoreError;
use crate::store::TaskStore;
use crate::task::{Task, TaskId, TaskKind, TaskPayload, TaskStatus};

/// Task store persisted to a SQLite database.
///
/// One record per row; payloads are stored as JSON text. Writes go through a
/// single connection behind a mutex, which gives the store-level atomicity
/// the scheduler core relies on.
pub struct SqliteStore {
  conn: Mutex<Connection>,
}

impl SqliteStore {
  /// Opens (or creates) the database at `path` and initialises the schema.
  pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
    let conn = Connection::open(path)?;
    Self::init_schema(&conn)?;
    Ok(Self {
      conn: Mutex::new(conn),
    })
  }

  /// Opens an in-memory database, useful for tests.
  pub fn open_in_memory() -> Result<Self, StoreError> {
    let conn = Connection::open_in_memory()?;
    Self::init_schema(&conn)?;
    Ok(Self {
      conn: Mutex::new(conn),
    })
  }

  // Safe to run on every startup, uses IF NOT EXISTS throughout.
  fn init_schema(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(
      "CREATE TABLE IF NOT EXISTS tasks (
          id            TEXT PRIMARY KEY,
          kind          TEXT NOT NULL,
          status        TEXT NOT NULL,
          scheduled_for TEXT NOT NULL,
          started_at    TEXT,
          completed_at  TEXT,
          parameters    TEXT NOT NULL,
          result        TEXT NOT NULL,
          error         TEXT,
          retry_count   INTEGER NOT NULL DEFAULT 0,
          trigger_id    TEXT,
          created_at    TEXT NOT NULL,
          updated_at    TEXT NOT NULL
      );
      CREATE INDEX IF NOT EXISTS idx_tasks_status
          ON tasks(status, scheduled_for DESC);",
    )?;
    Ok(())
  }

  fn row_to_task(row: &Row<'_>) -> rusqlite::Result<Task> {
    let id: String = row.get("id")?;
    let kind: String = row.get("kind")?;
    let status: String = row.get("status")?;
    let scheduled_for: String = row.get("scheduled_for")?;
    let started_at: Option<String> = row.get("started_at")?;
    let completed_at: Option<String> = row.get("completed_at")?;
    let parameters: String = row.get("parameters")?;
    let result: String = row.get("result")?;
    let created_at: String = row.get("created_at")?;
    let updated_at: String = row.get("updated_at")?;

    let parse_ts = |s: &str| {
      DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e)))
    };
    let bad_text = |e: Box<dyn std::error::Error + Send + Sync>| {
      rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, e)
    };

    Ok(Task {
      id: Uuid::parse_str(&id).map_err(|e| bad_text(Box::new(e)))?,
      kind: TaskKind::from_str(&kind).map_err(|e| bad_text(e.into()))?,
      status: TaskStatus::from_str(&status).map_err(|e| bad_text(e.into()))?,
      scheduled_for: parse_ts(&scheduled_for)?,
      started_at: started_at.as_deref().map(parse_ts).transpose()?,
      completed_at: completed_at.as_deref().map(parse_ts).transpose()?,
      parameters: serde_json::from_str::<TaskPayload>(&parameters)
        .map_err(|e| bad_text(Box::new(e)))?,
      result: serde_json::from_str::<TaskPayload>(&result).map_err(|e| bad_text(Box::new(e)))?,
      error: row.get("error")?,
      retry_count: row.get("retry_count")?,
      trigger_id: row.get("trigger_id")?,
      created_at: parse_ts(&created_at)?,
      updated_at: parse_ts(&updated_at)?,
    })
  }
}

impl TaskStore for SqliteStore {
  fn save(&self, task: &Task) -> Result<(), StoreError> {
    let parameters = serde_json::to_string(&task.parameters)?;
    let result = serde_json::to_string(&task.result)?;

    let conn = self.conn.lock();
    conn.execute(
      "INSERT OR REPLACE INTO tasks
          (id, kind, status, scheduled_for, started_at, completed_at,
           parameters, result, error, retry_count, trigger_id,
           created_at, updated_at)
       VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
      params![
        task.id.to_string(),
        task.kind.as_str(),
        task.status.as_str(),
        task.scheduled_for.to_rfc3339(),
        task.started_at.map(|t| t.to_rfc3339()),
        task.completed_at.map(|t| t.to_rfc3339()),
        parameters,
        result,
        task.error,
        task.retry_count,
        task.trigger_id,
        task.created_at.to_rfc3339(),
        task.updated_at.to_rfc3339(),
      ],
    )?;
    Ok(())
  }

  fn find_by_id(&self, id: TaskId) -> Result<Option<Task>, StoreError> {
    let conn = self.conn.lock();
    let mut stmt = conn.prepare("SELECT * FROM tasks WHERE id = ?1")?;
    let mut rows = stmt.query_map(params![id.to_string()], Self::row_to_task)?;
    match rows.next() {
      Some(task) => Ok(Some(task?)),
      None => Ok(None),
    }
  }

  fn list_by_status(&self, status: Option<TaskStatus>) -> Result<Vec<Task>, StoreError> {
    let conn = self.conn.lock();
    let mut out = Vec::new();
    match status {
      Some(status) => {
        let mut stmt = conn.prepare(
          "SELECT * FROM tasks WHERE status = ?1 ORDER BY scheduled_for DESC",
        )?;
        let rows = stmt.query_map(params![status.as_str()], Self::row_to_task)?;
        for task in rows {
          out.push(task?);
        }
      }
      None => {
        let mut stmt = conn.prepare("SELECT * FROM tasks ORDER BY scheduled_for DESC")?;
        let rows = stmt.query_map([], Self::row_to_task)?;
        for task in rows {
          out.push(task?);
        }
      }
    }
    Ok(out)
  }
}
