//! Error types for the cache engine.

use thiserror::Error;

/// The remote side of a fetch failed.
#[derive(Debug, Error)]
pub enum NetworkError {
  #[error("HTTP request failed: {0}")]
  Http(#[from] reqwest::Error),

  #[error("server returned {status} for {url}")]
  Status { status: u16, url: String },

  #[error("failed to decode response: {0}")]
  Decode(#[from] serde_json::Error),

  #[error("invalid URL: {0}")]
  InvalidUrl(#[from] url::ParseError),

  /// A page pointed at a cursor that was already fetched in the same loop.
  #[error("pagination loop detected at page token {token}")]
  PaginationLoop { token: String },

  #[error("pagination exceeded {limit} pages")]
  PageLimit { limit: usize },

  #[error("{0}")]
  Other(String),
}

/// The local record store failed to read or write.
#[derive(Debug, Error)]
pub enum StoreError {
  #[error("SQLite error: {0}")]
  Sqlite(#[from] rusqlite::Error),

  #[error("failed to (de)serialize record: {0}")]
  Serialize(#[from] serde_json::Error),

  #[error("record store lock poisoned")]
  Poisoned,

  #[error("constraint violation: {0}")]
  Constraint(String),
}

/// Failure of an engine operation.
#[derive(Debug, Error)]
pub enum SyncError {
  #[error(transparent)]
  Network(#[from] NetworkError),

  #[error(transparent)]
  Store(#[from] StoreError),
}

impl SyncError {
  pub fn is_network(&self) -> bool {
    matches!(self, SyncError::Network(_))
  }

  pub fn is_store(&self) -> bool {
    matches!(self, SyncError::Store(_))
  }
}
