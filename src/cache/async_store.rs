//! Engine that decides between the store and the network for a use case.

use std::sync::Arc;

use chrono::{Duration, Utc};
use tracing::{debug, info};

use super::entity::Entity;
use super::error::{StoreError, SyncError};
use super::freshness;
use super::offline::OfflineSignal;
use super::pagination::{self, DEFAULT_MAX_PAGES};
use super::record_store::RecordStore;
use super::stream::EntityStream;
use super::use_case::UseCase;

/// Fetch-persist-observe engine for one use case.
///
/// The result set is always read back from the record store; nothing is
/// kept in memory between calls except through the store itself. Freshness
/// is tracked per cache key with a [`freshness::FreshnessRecord`].
///
/// Concurrent calls for the same cache key are not coalesced: overlapping
/// forced fetches each hit the network and each reconcile their pages.
pub struct AsyncStore<U: UseCase, S: RecordStore> {
  use_case: U,
  store: Arc<S>,
  offline: Option<Arc<dyn OfflineSignal>>,
  max_pages: Option<usize>,
}

impl<U: UseCase, S: RecordStore> AsyncStore<U, S> {
  pub fn new(store: Arc<S>, use_case: U) -> Self {
    Self {
      use_case,
      store,
      offline: None,
      max_pages: Some(DEFAULT_MAX_PAGES),
    }
  }

  /// Consult `signal` at the start of every call.
  pub fn with_offline_signal(mut self, signal: Arc<dyn OfflineSignal>) -> Self {
    self.offline = Some(signal);
    self
  }

  /// Ceiling on pages per pagination loop; `None` removes it.
  pub fn with_max_pages(mut self, max_pages: Option<usize>) -> Self {
    self.max_pages = max_pages;
    self
  }

  pub fn use_case(&self) -> &U {
    &self.use_case
  }

  /// Produce the result set for the use case.
  ///
  /// Offline, this only reads the store. Online, it fetches when
  /// `ignore_cache` is set or the cache key has expired, writes every page
  /// to the store, then reads the store. `load_all_pages` follows cursors
  /// until the remote runs out; otherwise only the first page is fetched.
  pub async fn get_entities(
    &self,
    ignore_cache: bool,
    load_all_pages: bool,
  ) -> Result<Vec<U::Model>, SyncError> {
    self.sync(ignore_cache, load_all_pages).await?;
    Ok(self.get_entities_from_database()?)
  }

  /// Read the result set from the store without any fetch decision.
  pub fn get_entities_from_database(&self) -> Result<Vec<U::Model>, StoreError> {
    self.store.fetch(&self.use_case.scope())
  }

  /// Like [`get_entities`](Self::get_entities), but keeps observing the
  /// store and yields a new result set after every relevant change.
  ///
  /// The fetch decision runs once, before the stream is returned; a fetch
  /// failure is returned here and no stream is created. Store mutations
  /// never trigger another fetch. The stream does not end on its own.
  pub async fn stream_entities(
    &self,
    ignore_cache: bool,
    load_all_pages: bool,
  ) -> Result<EntityStream<U::Model>, SyncError> {
    self.sync(ignore_cache, load_all_pages).await?;
    Ok(self.stream_entities_from_database())
  }

  /// Observe the store only. The stream does not end on its own.
  pub fn stream_entities_from_database(&self) -> EntityStream<U::Model> {
    EntityStream::observe(Arc::clone(&self.store), self.use_case.scope())
  }

  /// Fetch from the network regardless of freshness.
  ///
  /// Live streams over the same scope pick up the result through the
  /// store's change notifications. Offline mode still wins: no request is
  /// made and nothing changes.
  pub async fn force_refresh(&self, load_all_pages: bool) -> Result<(), SyncError> {
    self.sync(true, load_all_pages).await
  }

  /// Decide whether to fetch, and if so fetch and reconcile.
  async fn sync(&self, ignore_cache: bool, load_all_pages: bool) -> Result<(), SyncError> {
    let entity_type = U::Model::entity_type();

    if self.is_offline() {
      debug!(entity_type, "offline, serving from store");
      return Ok(());
    }

    if !ignore_cache && !self.has_expired()? {
      debug!(entity_type, "cache fresh, serving from store");
      return Ok(());
    }

    self.fetch_from_api(load_all_pages).await
  }

  fn is_offline(&self) -> bool {
    self
      .offline
      .as_ref()
      .is_some_and(|signal| signal.is_offline())
  }

  /// Whether the use case must go to the network.
  fn has_expired(&self) -> Result<bool, StoreError> {
    let Some(key) = self.use_case.cache_key() else {
      return Ok(true);
    };

    let ttl = self.use_case.ttl();
    if ttl <= Duration::zero() {
      return Ok(true);
    }

    Ok(!freshness::is_fresh(&*self.store, &key, ttl, Utc::now())?)
  }

  async fn fetch_from_api(&self, load_all_pages: bool) -> Result<(), SyncError> {
    let pages =
      pagination::fetch_pages(&self.use_case, &*self.store, load_all_pages, self.max_pages).await?;

    // Only a complete pagination loop refreshes the key
    if let Some(key) = self.use_case.cache_key() {
      self
        .store
        .write(|writer| freshness::mark_fresh(writer, &key, Utc::now()))?;
    }

    info!(
      entity_type = U::Model::entity_type(),
      pages, "fetched from network"
    );
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::entity::test_support::Course;
  use crate::cache::freshness::FreshnessRecord;
  use crate::cache::offline::OfflineFlag;
  use crate::cache::record_store::StoreWriterExt;
  use crate::cache::scope::{Predicate, Scope};
  use crate::cache::sqlite::SqliteRecordStore;
  use crate::cache::testing::ScriptedUseCase;
  use crate::cache::use_case::LocalUseCase;
  use futures::StreamExt;
  use std::time::Duration as StdDuration;

  fn store() -> Arc<SqliteRecordStore> {
    Arc::new(SqliteRecordStore::open_in_memory().unwrap())
  }

  fn ids(courses: &[Course]) -> Vec<&str> {
    courses.iter().map(|c| c.id.as_str()).collect()
  }

  fn seed(store: &SqliteRecordStore, courses: &[Course]) {
    store.write(|w| w.save_all(courses)).unwrap();
  }

  fn set_refreshed(store: &SqliteRecordStore, key: &str, ago: Duration) {
    store
      .write(|w| freshness::mark_fresh(w, key, Utc::now() - ago))
      .unwrap();
  }

  async fn next<T>(stream: &mut EntityStream<T>) -> Vec<T> {
    tokio::time::timeout(StdDuration::from_secs(1), stream.next())
      .await
      .expect("timed out waiting for emission")
      .expect("stream ended")
      .expect("store error")
  }

  async fn assert_quiet<T: std::fmt::Debug>(stream: &mut EntityStream<T>) {
    let pending = tokio::time::timeout(StdDuration::from_millis(50), stream.next()).await;
    assert!(pending.is_err(), "unexpected emission: {:?}", pending);
  }

  #[tokio::test]
  async fn test_first_fetch_creates_freshness_record() {
    let store = store();
    let use_case = ScriptedUseCase::new().page(None, vec![Course::make("1")], None);
    let calls = use_case.calls();
    let testee = AsyncStore::new(Arc::clone(&store), use_case);

    let courses = testee.get_entities(false, false).await.unwrap();

    assert_eq!(ids(&courses), vec!["1"]);
    assert_eq!(calls.fetches(), 1);
    assert_eq!(calls.writes(), 1);
    assert!(freshness::freshness(&*store, "courses").unwrap().is_some());
  }

  #[tokio::test]
  async fn test_all_pages_are_merged() {
    let store = store();
    let use_case = ScriptedUseCase::new()
      .page(None, vec![Course::make("1")], Some("c1"))
      .page(Some("c1"), vec![Course::make("2")], None);
    let calls = use_case.calls();
    let testee = AsyncStore::new(Arc::clone(&store), use_case);
    let mut ttl_changes = store.subscribe();

    let courses = testee.get_entities(false, true).await.unwrap();

    assert_eq!(ids(&courses), vec!["1", "2"]);
    assert_eq!(calls.fetches(), 2);
    assert_eq!(calls.writes(), 2);

    // Two page commits, then exactly one freshness write
    let mut ttl_writes = 0;
    while let Ok(changes) = ttl_changes.try_recv() {
      ttl_writes += changes
        .changes
        .iter()
        .filter(|c| c.entity_type == FreshnessRecord::entity_type())
        .count();
    }
    assert_eq!(ttl_writes, 1);
  }

  #[tokio::test]
  async fn test_fresh_cache_skips_network() {
    let store = store();
    seed(&store, &[Course::make("0")]);
    set_refreshed(&store, "courses", Duration::zero());
    let use_case = ScriptedUseCase::new().page(None, vec![Course::make("1")], None);
    let calls = use_case.calls();
    let testee = AsyncStore::new(Arc::clone(&store), use_case);

    let courses = testee.get_entities(false, true).await.unwrap();

    assert_eq!(ids(&courses), vec!["0"]);
    assert_eq!(calls.fetches(), 0);
  }

  #[tokio::test]
  async fn test_freshness_gate_at_half_and_double_ttl() {
    let ttl = Duration::hours(1);

    let store_a = store();
    set_refreshed(&store_a, "courses", ttl / 2);
    let use_case = ScriptedUseCase::new().with_ttl(ttl).page(None, vec![], None);
    let fresh_calls = use_case.calls();
    AsyncStore::new(store_a, use_case)
      .get_entities(false, true)
      .await
      .unwrap();
    assert_eq!(fresh_calls.fetches(), 0);

    let store_b = store();
    set_refreshed(&store_b, "courses", ttl * 2);
    let use_case = ScriptedUseCase::new().with_ttl(ttl).page(None, vec![], None);
    let stale_calls = use_case.calls();
    AsyncStore::new(store_b, use_case)
      .get_entities(false, true)
      .await
      .unwrap();
    assert_eq!(stale_calls.fetches(), 1);
  }

  #[tokio::test]
  async fn test_missing_cache_key_or_zero_ttl_always_fetch() {
    let store = store();
    set_refreshed(&store, "courses", Duration::zero());

    let no_key = ScriptedUseCase::new()
      .with_cache_key(None)
      .page(None, vec![], None);
    let no_key_calls = no_key.calls();
    let testee = AsyncStore::new(Arc::clone(&store), no_key);
    testee.get_entities(false, true).await.unwrap();
    testee.get_entities(false, true).await.unwrap();
    assert_eq!(no_key_calls.fetches(), 2);

    let zero_ttl = ScriptedUseCase::new()
      .with_ttl(Duration::zero())
      .page(None, vec![], None);
    let zero_ttl_calls = zero_ttl.calls();
    AsyncStore::new(Arc::clone(&store), zero_ttl)
      .get_entities(false, true)
      .await
      .unwrap();
    assert_eq!(zero_ttl_calls.fetches(), 1);
  }

  #[tokio::test]
  async fn test_ignore_cache_adds_to_existing_records() {
    let store = store();
    seed(&store, &[Course::make("0")]);
    set_refreshed(&store, "courses", Duration::zero());
    let use_case = ScriptedUseCase::new().page(None, vec![Course::make("1")], None);
    let calls = use_case.calls();
    let testee = AsyncStore::new(Arc::clone(&store), use_case);

    let courses = testee.get_entities(true, true).await.unwrap();

    assert_eq!(ids(&courses), vec!["0", "1"]);
    assert_eq!(calls.fetches(), 1);
  }

  #[tokio::test]
  async fn test_offline_never_fetches() {
    let store = store();
    seed(&store, &[Course::make("0")]);
    let use_case = ScriptedUseCase::new().page(None, vec![Course::make("1")], None);
    let calls = use_case.calls();
    let offline = OfflineFlag::new(true);
    let testee =
      AsyncStore::new(Arc::clone(&store), use_case).with_offline_signal(Arc::new(offline.clone()));

    assert_eq!(ids(&testee.get_entities(true, true).await.unwrap()), vec!["0"]);
    assert_eq!(ids(&testee.get_entities(false, false).await.unwrap()), vec!["0"]);
    testee.force_refresh(true).await.unwrap();
    let stream = testee.stream_entities(true, true).await.unwrap();
    drop(stream);
    assert_eq!(calls.fetches(), 0);
    assert!(freshness::freshness(&*store, "courses").unwrap().is_none());

    // The signal is read on every call
    offline.set_offline(false);
    assert_eq!(ids(&testee.get_entities(false, true).await.unwrap()), vec!["0", "1"]);
    assert_eq!(calls.fetches(), 1);
  }

  #[tokio::test]
  async fn test_failed_second_page_leaves_freshness_untouched() {
    let store = store();
    let use_case = ScriptedUseCase::new()
      .page(None, vec![Course::make("1")], Some("c1"))
      .failure(Some("c1"), "server error");
    let testee = AsyncStore::new(Arc::clone(&store), use_case);

    let result = testee.get_entities(false, true).await;
    assert!(result.unwrap_err().is_network());
    assert!(freshness::freshness(&*store, "courses").unwrap().is_none());

    let before = Utc::now() - Duration::hours(5);
    store
      .write(|w| freshness::mark_fresh(w, "courses", before))
      .unwrap();
    assert!(testee.get_entities(false, true).await.is_err());
    assert_eq!(
      freshness::freshness(&*store, "courses")
        .unwrap()
        .unwrap()
        .last_refresh,
      before
    );
  }

  #[tokio::test]
  async fn test_failed_first_page_leaves_store_unchanged() {
    let store = store();
    seed(&store, &[Course::make("0")]);
    let use_case = ScriptedUseCase::new()
      .replacing_collection()
      .failure(None, "timeout");
    let testee = AsyncStore::new(Arc::clone(&store), use_case);

    assert!(testee.get_entities(true, true).await.is_err());
    assert_eq!(ids(&testee.get_entities_from_database().unwrap()), vec!["0"]);
  }

  #[tokio::test]
  async fn test_failed_page_write_is_a_store_error() {
    let store = store();
    let use_case = ScriptedUseCase::new()
      .page(None, vec![Course::make("1")], None)
      .rejecting_writes();
    let testee = AsyncStore::new(Arc::clone(&store), use_case);

    let err = testee.get_entities(false, false).await.unwrap_err();

    assert!(err.is_store());
    assert!(!err.is_network());
    assert!(testee.get_entities_from_database().unwrap().is_empty());
    assert!(freshness::freshness(&*store, "courses").unwrap().is_none());
  }

  #[tokio::test]
  async fn test_result_set_follows_use_case_scope() {
    let store = store();
    let mut dropped = Course::make("2");
    dropped.enrolled = false;
    let use_case = ScriptedUseCase::new()
      .with_scope(Scope::with_predicate(Predicate::eq("enrolled", true)))
      .page(None, vec![Course::make("1"), dropped, Course::make("3")], None);
    let testee = AsyncStore::new(Arc::clone(&store), use_case);

    let courses = testee.get_entities(false, false).await.unwrap();

    assert_eq!(ids(&courses), vec!["1", "3"]);
    assert_eq!(store.fetch::<Course>(&Scope::all()).unwrap().len(), 3);
  }

  #[tokio::test]
  async fn test_database_read_reflects_current_store() {
    let store = store();
    let testee = AsyncStore::new(Arc::clone(&store), LocalUseCase::<Course>::new(Scope::all()));

    assert!(testee.get_entities_from_database().unwrap().is_empty());
    seed(&store, &[Course::make("1")]);
    assert_eq!(ids(&testee.get_entities_from_database().unwrap()), vec!["1"]);
    store.write(|w| w.delete("course", "1")).unwrap();
    assert!(testee.get_entities_from_database().unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_reconcile_twice_is_idempotent() {
    let store = store();
    let use_case = ScriptedUseCase::new().page(None, vec![Course::named("1", "Biology")], None);
    let testee = AsyncStore::new(Arc::clone(&store), use_case);

    let once = testee.get_entities(true, true).await.unwrap();
    let twice = testee.get_entities(true, true).await.unwrap();

    assert_eq!(once, twice);
    assert_eq!(once, vec![Course::named("1", "Biology")]);
  }

  #[tokio::test]
  async fn test_stream_republishes_direct_store_inserts() {
    let store = store();
    let use_case = ScriptedUseCase::new().page(None, vec![], None);
    let calls = use_case.calls();
    let testee = AsyncStore::new(Arc::clone(&store), use_case);

    let mut stream = testee.stream_entities(false, true).await.unwrap();
    assert!(next(&mut stream).await.is_empty());
    assert_eq!(calls.fetches(), 1);

    seed(&store, &[Course::make("3rdpartyinsert")]);

    assert_eq!(ids(&next(&mut stream).await), vec!["3rdpartyinsert"]);
    assert_eq!(calls.fetches(), 1);
  }

  #[tokio::test]
  async fn test_stream_publishes_updates_and_deletions() {
    let store = store();
    seed(&store, &[Course::named("1", "original")]);
    let testee = AsyncStore::new(Arc::clone(&store), LocalUseCase::<Course>::new(Scope::all()));
    let mut stream = testee.stream_entities(false, true).await.unwrap();
    assert_eq!(next(&mut stream).await[0].name, "original");

    seed(&store, &[Course::named("1", "updatedName")]);
    assert_eq!(next(&mut stream).await[0].name, "updatedName");

    store.write(|w| w.delete("course", "1")).unwrap();
    assert!(next(&mut stream).await.is_empty());
  }

  #[tokio::test]
  async fn test_stream_ignores_changes_outside_scope() {
    let store = store();
    let testee = AsyncStore::new(
      Arc::clone(&store),
      LocalUseCase::<Course>::new(Scope::where_eq("enrolled", true)),
    );
    let mut stream = testee.stream_entities_from_database();
    assert!(next(&mut stream).await.is_empty());

    let mut unenrolled = Course::make("9");
    unenrolled.enrolled = false;
    seed(&store, &[unenrolled.clone()]);
    set_refreshed(&store, "courses", Duration::zero());
    assert_quiet(&mut stream).await;

    // Moving a record into the scope is seen
    unenrolled.enrolled = true;
    seed(&store, &[unenrolled]);
    assert_eq!(ids(&next(&mut stream).await), vec!["9"]);
  }

  #[tokio::test]
  async fn test_force_refresh_reaches_live_stream() {
    let store = store();
    seed(&store, &[Course::make("0")]);
    set_refreshed(&store, "courses", Duration::zero());
    let use_case = ScriptedUseCase::new().page(None, vec![Course::make("1")], None);
    let calls = use_case.calls();
    let testee = AsyncStore::new(Arc::clone(&store), use_case);

    let mut stream = testee.stream_entities(false, true).await.unwrap();
    assert_eq!(ids(&next(&mut stream).await), vec!["0"]);
    assert_eq!(calls.fetches(), 0);

    testee.force_refresh(true).await.unwrap();

    assert_eq!(ids(&next(&mut stream).await), vec!["0", "1"]);
    assert_eq!(calls.fetches(), 1);
  }

  #[tokio::test]
  async fn test_refresh_before_first_poll_still_emits_snapshot() {
    let store = store();
    seed(&store, &[Course::make("0")]);
    set_refreshed(&store, "courses", Duration::zero());
    let use_case = ScriptedUseCase::new().page(None, vec![Course::make("1")], None);
    let testee = AsyncStore::new(Arc::clone(&store), use_case);

    let mut stream = testee.stream_entities(false, true).await.unwrap();
    testee.force_refresh(true).await.unwrap();

    assert_eq!(ids(&next(&mut stream).await), vec!["0"]);
    assert_eq!(ids(&next(&mut stream).await), vec!["0", "1"]);
  }

  #[tokio::test]
  async fn test_force_refresh_failure_is_reported() {
    let store = store();
    let use_case = ScriptedUseCase::new().failure(None, "unauthorized");
    let testee = AsyncStore::new(Arc::clone(&store), use_case);

    let err = testee.force_refresh(false).await.unwrap_err();
    assert!(err.is_network());
  }

  #[tokio::test]
  async fn test_stream_setup_fails_on_fetch_error() {
    let store = store();
    let use_case = ScriptedUseCase::new().failure(None, "unreachable");
    let testee = AsyncStore::new(Arc::clone(&store), use_case);

    assert!(testee.stream_entities(true, true).await.is_err());
  }

  #[tokio::test]
  async fn test_cancel_releases_subscription() {
    let store = store();
    let testee = AsyncStore::new(Arc::clone(&store), LocalUseCase::<Course>::new(Scope::all()));

    let mut stream = testee.stream_entities_from_database();
    next(&mut stream).await;
    assert_eq!(store.subscriber_count(), 1);

    stream.cancel();
    assert_eq!(store.subscriber_count(), 0);
  }
}
