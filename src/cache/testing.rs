//! Scripted use case for engine tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::Duration;

use super::entity::test_support::Course;
use super::error::{NetworkError, StoreError};
use super::record_store::{StoreWriter, StoreWriterExt};
use super::scope::Scope;
use super::use_case::{Page, PageToken, UseCase};

/// Counts of remote and write calls, shared with the test body.
#[derive(Debug, Clone, Default)]
pub struct Calls {
  fetches: Arc<AtomicUsize>,
  writes: Arc<AtomicUsize>,
}

impl Calls {
  pub fn fetches(&self) -> usize {
    self.fetches.load(Ordering::SeqCst)
  }

  pub fn writes(&self) -> usize {
    self.writes.load(Ordering::SeqCst)
  }
}

enum Scripted {
  Page(Option<Vec<Course>>, Option<PageToken>),
  Failure(String),
}

/// Serves canned pages keyed by the requested cursor.
pub struct ScriptedUseCase {
  cache_key: Option<String>,
  ttl: Duration,
  scope: Scope,
  replace_collection: bool,
  reject_writes: bool,
  script: HashMap<Option<String>, Scripted>,
  calls: Calls,
}

impl ScriptedUseCase {
  pub fn new() -> Self {
    Self {
      cache_key: Some("courses".to_string()),
      ttl: Duration::hours(1),
      scope: Scope::all(),
      replace_collection: false,
      reject_writes: false,
      script: HashMap::new(),
      calls: Calls::default(),
    }
  }

  pub fn calls(&self) -> Calls {
    self.calls.clone()
  }

  pub fn with_cache_key(mut self, key: Option<&str>) -> Self {
    self.cache_key = key.map(String::from);
    self
  }

  pub fn with_ttl(mut self, ttl: Duration) -> Self {
    self.ttl = ttl;
    self
  }

  pub fn with_scope(mut self, scope: Scope) -> Self {
    self.scope = scope;
    self
  }

  pub fn replacing_collection(mut self) -> Self {
    self.replace_collection = true;
    self
  }

  /// Make every page write fail inside its transaction.
  pub fn rejecting_writes(mut self) -> Self {
    self.reject_writes = true;
    self
  }

  pub fn page(mut self, token: Option<&str>, courses: Vec<Course>, next: Option<&str>) -> Self {
    self.script.insert(
      token.map(String::from),
      Scripted::Page(Some(courses), next.map(PageToken::new)),
    );
    self
  }

  pub fn empty_page(mut self, token: Option<&str>) -> Self {
    self
      .script
      .insert(token.map(String::from), Scripted::Page(None, None));
    self
  }

  pub fn failure(mut self, token: Option<&str>, message: &str) -> Self {
    self.script.insert(
      token.map(String::from),
      Scripted::Failure(message.to_string()),
    );
    self
  }
}

impl UseCase for ScriptedUseCase {
  type Model = Course;
  type Response = Vec<Course>;

  fn cache_key(&self) -> Option<String> {
    self.cache_key.clone()
  }

  fn scope(&self) -> Scope {
    self.scope.clone()
  }

  fn ttl(&self) -> Duration {
    self.ttl
  }

  async fn fetch_page(&self, page: Option<&PageToken>) -> Result<Page<Vec<Course>>, NetworkError> {
    self.calls.fetches.fetch_add(1, Ordering::SeqCst);
    let key = page.map(|t| t.as_str().to_string());

    match self.script.get(&key) {
      Some(Scripted::Page(courses, next)) => Ok(match (courses.clone(), next.clone()) {
        (Some(courses), Some(next)) => Page::with_next(courses, next),
        (Some(courses), None) => Page::last(courses),
        (None, _) => Page::empty(),
      }),
      Some(Scripted::Failure(message)) => Err(NetworkError::Other(message.clone())),
      None => Err(NetworkError::Other(format!("unscripted page {:?}", key))),
    }
  }

  fn reset(&self, writer: &mut dyn StoreWriter) -> Result<(), StoreError> {
    if self.replace_collection {
      writer.delete_matching::<Course>(&self.scope)?;
    }
    Ok(())
  }

  fn write(&self, response: Vec<Course>, writer: &mut dyn StoreWriter) -> Result<(), StoreError> {
    self.calls.writes.fetch_add(1, Ordering::SeqCst);
    writer.save_all(&response)?;
    if self.reject_writes {
      return Err(StoreError::Constraint("write rejected".to_string()));
    }
    Ok(())
  }
}
