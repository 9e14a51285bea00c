//! Live result sets that re-query the store on every relevant change.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::stream::{self, BoxStream, Stream, StreamExt};
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, warn};

use super::entity::{Entity, Record};
use super::error::StoreError;
use super::record_store::{ChangeSet, RecordStore};
use super::scope::Scope;

/// A live sequence of result sets for one scope.
///
/// Yields the result set as it was when the stream was created, then a fresh
/// read after every committed change that intersects the scope. Emissions
/// happen on the task polling the stream. A read error is yielded once and
/// ends the stream.
///
/// Dropping the stream (or calling [`EntityStream::cancel`]) releases the
/// change subscription immediately.
pub struct EntityStream<T> {
  inner: BoxStream<'static, Result<Vec<T>, StoreError>>,
}

struct Observer<S, T> {
  store: Arc<S>,
  scope: Scope,
  changes: broadcast::Receiver<Arc<ChangeSet>>,
  /// Snapshot taken at construction, yielded on first poll
  initial: Option<Result<Vec<T>, StoreError>>,
  /// Records behind the last emission
  last: Option<Vec<Record>>,
  finished: bool,
}

impl<T: Entity> EntityStream<T> {
  /// Subscribe to `store` and read the current result set now.
  ///
  /// Changes committed after this returns are delivered after the initial
  /// snapshot, even if they land before the first poll.
  pub fn observe<S: RecordStore>(store: Arc<S>, scope: Scope) -> Self {
    let changes = store.subscribe();
    let (initial, last) = match store.fetch_records(T::entity_type(), &scope) {
      Ok(records) => {
        let entities: Result<Vec<T>, StoreError> =
          records.iter().map(|r| r.to_entity::<T>()).collect();
        (entities, Some(records))
      }
      Err(e) => (Err(e), None),
    };

    let observer = Observer {
      store,
      scope,
      changes,
      initial: Some(initial),
      last,
      finished: false,
    };

    let inner = stream::unfold(observer, |mut observer| async move {
      if observer.finished {
        return None;
      }
      let item = match observer.initial.take() {
        Some(initial) => initial,
        None => next_result_set::<T, S>(&mut observer).await?,
      };
      if item.is_err() {
        observer.finished = true;
      }
      Some((item, observer))
    })
    .boxed();

    Self { inner }
  }

  /// Stop observing. No further emissions occur once this returns.
  pub fn cancel(self) {
    debug!(entity_type = T::entity_type(), "live result set cancelled");
  }
}

async fn next_result_set<T: Entity, S: RecordStore>(
  observer: &mut Observer<S, T>,
) -> Option<Result<Vec<T>, StoreError>> {
  let entity_type = T::entity_type();

  loop {
    match observer.changes.recv().await {
      Ok(changes) => {
        if !observer.scope.intersects(entity_type, &changes) {
          continue;
        }
      }
      // Missed notifications are covered by re-reading
      Err(RecvError::Lagged(skipped)) => {
        warn!(entity_type, skipped, "change subscription lagged");
      }
      Err(RecvError::Closed) => return None,
    }

    let records = match observer.store.fetch_records(entity_type, &observer.scope) {
      Ok(records) => records,
      Err(e) => return Some(Err(e)),
    };

    // Same rows as last time: nothing to report
    if observer.last.as_ref() == Some(&records) {
      continue;
    }

    let entities = records.iter().map(|r| r.to_entity::<T>()).collect();
    observer.last = Some(records);
    return Some(entities);
  }
}

impl<T> Stream for EntityStream<T> {
  type Item = Result<Vec<T>, StoreError>;

  fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
    self.inner.poll_next_unpin(cx)
  }
}

impl<T> std::fmt::Debug for EntityStream<T> {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("EntityStream")
      .field("model", &std::any::type_name::<T>())
      .finish_non_exhaustive()
  }
}
