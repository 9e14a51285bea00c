//! The per-feature work descriptor the engine operates over.

use std::fmt;
use std::future::Future;
use std::marker::PhantomData;

use chrono::Duration;

use super::entity::Entity;
use super::error::{NetworkError, StoreError};
use super::record_store::StoreWriter;
use super::scope::Scope;

/// Default time a completed fetch stays fresh, in seconds (2 hours).
pub const DEFAULT_TTL_SECS: i64 = 2 * 60 * 60;

/// Opaque cursor to the next page of a remote collection.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PageToken(pub String);

impl PageToken {
  pub fn new(token: impl Into<String>) -> Self {
    Self(token.into())
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }
}

impl fmt::Display for PageToken {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

/// One page of remote truth.
#[derive(Debug, Clone)]
pub struct Page<R> {
  /// Raw response; `None` means the fetch succeeded with nothing to write
  pub response: Option<R>,
  /// Cursor for the following page, if there is one
  pub next: Option<PageToken>,
}

impl<R> Page<R> {
  pub fn last(response: R) -> Self {
    Self {
      response: Some(response),
      next: None,
    }
  }

  pub fn with_next(response: R, next: PageToken) -> Self {
    Self {
      response: Some(response),
      next: Some(next),
    }
  }

  pub fn empty() -> Self {
    Self {
      response: None,
      next: None,
    }
  }
}

/// Describes what to fetch and how to reconcile it into the record store.
///
/// Built fresh per logical request; the engine is generic over it.
pub trait UseCase: Send + Sync {
  /// Stored model making up the result set
  type Model: Entity;
  /// Raw remote payload for one page
  type Response: Send;

  /// Identity for freshness tracking. `None` means always fetch.
  fn cache_key(&self) -> Option<String>;

  /// Which stored records form the result set.
  fn scope(&self) -> Scope {
    Scope::all()
  }

  /// How long a completed fetch stays fresh. Zero forces a fetch every call.
  fn ttl(&self) -> Duration {
    Duration::seconds(DEFAULT_TTL_SECS)
  }

  /// Fetch one page. `None` requests the first page.
  fn fetch_page(
    &self,
    page: Option<&PageToken>,
  ) -> impl Future<Output = Result<Page<Self::Response>, NetworkError>> + Send;

  /// Runs before the first page is written, in the same transaction.
  ///
  /// Collection-style use cases delete everything in `scope` here so that the
  /// fetched collection replaces the stored one.
  fn reset(&self, _writer: &mut dyn StoreWriter) -> Result<(), StoreError> {
    Ok(())
  }

  /// Upsert one page of raw records, keyed by their own identity.
  ///
  /// Must be idempotent: writing the same response twice leaves the same state.
  fn write(&self, response: Self::Response, writer: &mut dyn StoreWriter) -> Result<(), StoreError>;
}

/// A use case with no remote side, for pure local reads and observation.
pub struct LocalUseCase<T> {
  scope: Scope,
  _model: PhantomData<fn() -> T>,
}

impl<T> LocalUseCase<T> {
  pub fn new(scope: Scope) -> Self {
    Self {
      scope,
      _model: PhantomData,
    }
  }
}

impl<T: Entity> UseCase for LocalUseCase<T> {
  type Model = T;
  type Response = ();

  fn cache_key(&self) -> Option<String> {
    None
  }

  fn scope(&self) -> Scope {
    self.scope.clone()
  }

  async fn fetch_page(&self, _page: Option<&PageToken>) -> Result<Page<()>, NetworkError> {
    Ok(Page::empty())
  }

  fn write(&self, _response: (), _writer: &mut dyn StoreWriter) -> Result<(), StoreError> {
    Ok(())
  }
}
