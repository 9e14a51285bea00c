//! SQLite-backed record store.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use rusqlite::{params, Connection, OptionalExtension};
use tokio::sync::broadcast;
use tracing::debug;

use super::entity::Record;
use super::error::StoreError;
use super::record_store::{Change, ChangeKind, ChangeSet, RecordStore, StoreWriter};
use super::scope::Scope;

/// Capacity of the change broadcast; slow subscribers see `Lagged` and re-read.
const CHANGE_CHANNEL_CAPACITY: usize = 256;

/// Schema for the record table.
const RECORD_SCHEMA: &str = r#"
-- Every entity type shares one table; data holds the serialized JSON
CREATE TABLE IF NOT EXISTS records (
    entity_type TEXT NOT NULL,
    id TEXT NOT NULL,
    data TEXT NOT NULL,
    stored_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (entity_type, id)
);

CREATE INDEX IF NOT EXISTS idx_records_type ON records(entity_type);
"#;

/// SQLite-based record store.
///
/// One connection behind a mutex serializes every read and write.
pub struct SqliteRecordStore {
  conn: Mutex<Connection>,
  changes: broadcast::Sender<Arc<ChangeSet>>,
}

impl SqliteRecordStore {
  /// Open (or create) the store at the default location.
  pub fn open_default() -> Result<Self, StoreError> {
    let path = Self::default_path().ok_or_else(|| {
      StoreError::Constraint("could not determine data directory".to_string())
    })?;
    Self::open(&path)
  }

  /// Open (or create) the store at `path`.
  pub fn open(path: &Path) -> Result<Self, StoreError> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent).map_err(|e| {
        StoreError::Constraint(format!(
          "failed to create cache directory {}: {}",
          parent.display(),
          e
        ))
      })?;
    }

    debug!(path = %path.display(), "opening record store");
    Self::from_connection(Connection::open(path)?)
  }

  /// A private in-memory store, gone when dropped.
  pub fn open_in_memory() -> Result<Self, StoreError> {
    Self::from_connection(Connection::open_in_memory()?)
  }

  fn from_connection(conn: Connection) -> Result<Self, StoreError> {
    conn.execute_batch(RECORD_SCHEMA)?;
    let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
    Ok(Self {
      conn: Mutex::new(conn),
      changes,
    })
  }

  /// Number of live change subscriptions.
  pub fn subscriber_count(&self) -> usize {
    self.changes.receiver_count()
  }

  /// Get the default database path.
  pub fn default_path() -> Option<PathBuf> {
    let data_dir = dirs::data_dir().or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))?;
    Some(data_dir.join("coursecache").join("cache.db"))
  }
}

impl RecordStore for SqliteRecordStore {
  fn fetch_records(&self, entity_type: &str, scope: &Scope) -> Result<Vec<Record>, StoreError> {
    let conn = self.conn.lock().map_err(|_| StoreError::Poisoned)?;
    select_records(&conn, entity_type, scope)
  }

  fn write<R, F>(&self, f: F) -> Result<R, StoreError>
  where
    F: FnOnce(&mut dyn StoreWriter) -> Result<R, StoreError>,
  {
    let mut conn = self.conn.lock().map_err(|_| StoreError::Poisoned)?;
    let tx = conn.transaction()?;

    let mut writer = SqliteWriter {
      conn: &tx,
      changes: Vec::new(),
    };
    // Dropping the transaction on error rolls it back
    let result = f(&mut writer)?;
    let changes = writer.changes;
    tx.commit()?;
    drop(conn);

    if !changes.is_empty() {
      debug!(count = changes.len(), "committed record changes");
      // No subscribers is fine
      let _ = self.changes.send(Arc::new(ChangeSet { changes }));
    }

    Ok(result)
  }

  fn subscribe(&self) -> broadcast::Receiver<Arc<ChangeSet>> {
    self.changes.subscribe()
  }
}

/// Writer bound to an open transaction, collecting changes until commit.
struct SqliteWriter<'a> {
  conn: &'a Connection,
  changes: Vec<Change>,
}

impl StoreWriter for SqliteWriter<'_> {
  fn get(&self, entity_type: &str, id: &str) -> Result<Option<Record>, StoreError> {
    get_record(self.conn, entity_type, id)
  }

  fn fetch(&self, entity_type: &str, scope: &Scope) -> Result<Vec<Record>, StoreError> {
    select_records(self.conn, entity_type, scope)
  }

  fn upsert(&mut self, record: Record) -> Result<(), StoreError> {
    let existing = get_record(self.conn, &record.entity_type, &record.id)?;

    // Writing identical data is not a change
    if existing.as_ref().is_some_and(|e| e.data == record.data) {
      return Ok(());
    }

    let data = serde_json::to_string(&record.data)?;
    self.conn.execute(
      "INSERT OR REPLACE INTO records (entity_type, id, data, stored_at)
       VALUES (?, ?, ?, datetime('now'))",
      params![record.entity_type, record.id, data],
    )?;

    let kind = if existing.is_some() {
      ChangeKind::Update
    } else {
      ChangeKind::Insert
    };
    self.changes.push(Change {
      entity_type: record.entity_type,
      id: record.id,
      kind,
      before: existing.map(|e| e.data),
      after: Some(record.data),
    });

    Ok(())
  }

  fn delete(&mut self, entity_type: &str, id: &str) -> Result<bool, StoreError> {
    let Some(existing) = get_record(self.conn, entity_type, id)? else {
      return Ok(false);
    };

    self.conn.execute(
      "DELETE FROM records WHERE entity_type = ? AND id = ?",
      params![entity_type, id],
    )?;

    self.changes.push(Change {
      entity_type: existing.entity_type,
      id: existing.id,
      kind: ChangeKind::Delete,
      before: Some(existing.data),
      after: None,
    });

    Ok(true)
  }
}

fn get_record(conn: &Connection, entity_type: &str, id: &str) -> Result<Option<Record>, StoreError> {
  let data: Option<String> = conn
    .query_row(
      "SELECT data FROM records WHERE entity_type = ? AND id = ?",
      params![entity_type, id],
      |row| row.get(0),
    )
    .optional()?;

  match data {
    Some(data) => Ok(Some(Record::new(entity_type, id, serde_json::from_str(&data)?))),
    None => Ok(None),
  }
}

/// Load every record of the type, then filter and order by the scope.
fn select_records(conn: &Connection, entity_type: &str, scope: &Scope) -> Result<Vec<Record>, StoreError> {
  let mut stmt = conn.prepare("SELECT id, data FROM records WHERE entity_type = ?")?;

  let rows = stmt
    .query_map(params![entity_type], |row| {
      Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
    })?
    .collect::<Result<Vec<_>, _>>()?;

  let mut records = Vec::with_capacity(rows.len());
  for (id, data) in rows {
    let data = serde_json::from_str(&data)?;
    if scope.matches(&data) {
      records.push(Record::new(entity_type, id, data));
    }
  }

  records.sort_by(|a, b| scope.compare(&a.data, &b.data));
  Ok(records)
}
