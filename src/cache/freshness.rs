//! Freshness records: when each cache key last completed a full fetch.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::entity::Entity;
use super::error::StoreError;
use super::record_store::{RecordStore, StoreWriter, StoreWriterExt};
use super::scope::Scope;

/// Durable TTL marker for a cache key.
///
/// Stored in the record store like any other entity, so it survives restarts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FreshnessRecord {
  pub key: String,
  pub last_refresh: DateTime<Utc>,
}

impl Entity for FreshnessRecord {
  fn id(&self) -> String {
    self.key.clone()
  }

  fn entity_type() -> &'static str {
    "ttl"
  }
}

impl FreshnessRecord {
  /// Whether a refresh at `last_refresh` is still valid at `now`.
  pub fn is_fresh_at(&self, ttl: Duration, now: DateTime<Utc>) -> bool {
    now - self.last_refresh < ttl
  }
}

/// Load the freshness record for `key`, if any.
pub fn freshness<S: RecordStore>(store: &S, key: &str) -> Result<Option<FreshnessRecord>, StoreError> {
  store
    .fetch_records(FreshnessRecord::entity_type(), &Scope::where_eq("key", key))?
    .first()
    .map(|record| record.to_entity())
    .transpose()
}

/// True iff a record exists for `key` and `now - last_refresh < ttl`.
pub fn is_fresh<S: RecordStore>(
  store: &S,
  key: &str,
  ttl: Duration,
  now: DateTime<Utc>,
) -> Result<bool, StoreError> {
  Ok(
    freshness(store, key)?
      .map(|record| record.is_fresh_at(ttl, now))
      .unwrap_or(false),
  )
}

/// Upsert the freshness record for `key` with `last_refresh = now`.
pub fn mark_fresh(writer: &mut dyn StoreWriter, key: &str, now: DateTime<Utc>) -> Result<(), StoreError> {
  writer.save(&FreshnessRecord {
    key: key.to_string(),
    last_refresh: now,
  })
}
