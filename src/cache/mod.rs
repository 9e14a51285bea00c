//! Generic fetch / persist / observe layer.
//!
//! This module backs feature code with data that:
//! - Is fetched from the network one page at a time and written to a local store
//! - Is served from the store while a per-key freshness record is within its TTL
//! - Is always read back from the store, never from an in-memory copy
//! - Can be observed live, re-reading the store on every relevant change
//! - Comes only from the store in offline mode

mod async_store;
mod entity;
mod error;
pub mod freshness;
mod offline;
mod pagination;
mod record_store;
mod scope;
mod sqlite;
mod stream;
mod use_case;

#[cfg(test)]
mod testing;

pub use async_store::AsyncStore;
pub use entity::{Entity, Record};
pub use error::{NetworkError, StoreError, SyncError};
pub use freshness::FreshnessRecord;
pub use offline::{OfflineFlag, OfflineSignal};
pub use pagination::DEFAULT_MAX_PAGES;
pub use record_store::{Change, ChangeKind, ChangeSet, RecordStore, StoreWriter, StoreWriterExt};
pub use scope::{Predicate, Scope, SortKey};
pub use sqlite::SqliteRecordStore;
pub use stream::EntityStream;
pub use use_case::{LocalUseCase, Page, PageToken, UseCase, DEFAULT_TTL_SECS};
