//! Contracts for the local record store and its change notifications.

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::broadcast;

use super::entity::{Entity, Record};
use super::error::StoreError;
use super::scope::Scope;

/// What happened to a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
  Insert,
  Update,
  Delete,
}

/// A single committed mutation with before/after images of the record data.
#[derive(Debug, Clone, PartialEq)]
pub struct Change {
  pub entity_type: String,
  pub id: String,
  pub kind: ChangeKind,
  pub before: Option<Value>,
  pub after: Option<Value>,
}

/// All changes committed by one write transaction.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChangeSet {
  pub changes: Vec<Change>,
}

impl ChangeSet {
  pub fn is_empty(&self) -> bool {
    self.changes.is_empty()
  }
}

/// Write access inside a single store transaction.
///
/// Every write made through one writer commits together or not at all.
pub trait StoreWriter {
  /// Look up a record by identity.
  fn get(&self, entity_type: &str, id: &str) -> Result<Option<Record>, StoreError>;

  /// Records of `entity_type` matching `scope`, ordered by it.
  fn fetch(&self, entity_type: &str, scope: &Scope) -> Result<Vec<Record>, StoreError>;

  /// Insert or replace the record with the same identity.
  fn upsert(&mut self, record: Record) -> Result<(), StoreError>;

  /// Remove a record. Returns whether it existed.
  fn delete(&mut self, entity_type: &str, id: &str) -> Result<bool, StoreError>;
}

/// Typed helpers over any [`StoreWriter`].
pub trait StoreWriterExt: StoreWriter {
  fn save<T: Entity>(&mut self, entity: &T) -> Result<(), StoreError> {
    self.upsert(Record::from_entity(entity)?)
  }

  fn save_all<T: Entity>(&mut self, entities: &[T]) -> Result<(), StoreError> {
    entities.iter().try_for_each(|entity| self.save(entity))
  }

  fn find<T: Entity>(&self, id: &str) -> Result<Option<T>, StoreError> {
    self
      .get(T::entity_type(), id)?
      .map(|record| record.to_entity())
      .transpose()
  }

  fn fetch_entities<T: Entity>(&self, scope: &Scope) -> Result<Vec<T>, StoreError> {
    self
      .fetch(T::entity_type(), scope)?
      .iter()
      .map(|record| record.to_entity::<T>())
      .collect()
  }

  /// Delete every record of `T` matching `scope`. Returns how many went.
  fn delete_matching<T: Entity>(&mut self, scope: &Scope) -> Result<usize, StoreError> {
    let doomed = self.fetch(T::entity_type(), scope)?;
    for record in &doomed {
      self.delete(&record.entity_type, &record.id)?;
    }
    Ok(doomed.len())
  }
}

impl<W: StoreWriter + ?Sized> StoreWriterExt for W {}

/// A transactional, queryable local object store with change notifications.
///
/// The store is the serialization point for all reads and writes; callers add
/// no locking of their own.
pub trait RecordStore: Send + Sync + 'static {
  /// Records of `entity_type` matching `scope`, ordered by it.
  fn fetch_records(&self, entity_type: &str, scope: &Scope) -> Result<Vec<Record>, StoreError>;

  /// Run `f` in one transaction. Committed on `Ok`, rolled back on `Err`.
  ///
  /// Subscribers are notified after a commit that changed anything.
  fn write<R, F>(&self, f: F) -> Result<R, StoreError>
  where
    F: FnOnce(&mut dyn StoreWriter) -> Result<R, StoreError>;

  /// Subscribe to committed change sets.
  fn subscribe(&self) -> broadcast::Receiver<Arc<ChangeSet>>;

  /// Typed fetch of the result set for `scope`.
  fn fetch<T: Entity>(&self, scope: &Scope) -> Result<Vec<T>, StoreError> {
    self
      .fetch_records(T::entity_type(), scope)?
      .iter()
      .map(|record| record.to_entity::<T>())
      .collect()
  }
}
