//! Generic REST collection use case backed by [`ApiClient`].

use chrono::Duration;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use tracing::warn;

use super::ApiClient;
use crate::cache::{
  Entity, NetworkError, Page, PageToken, Scope, StoreError, StoreWriter, StoreWriterExt, UseCase,
  DEFAULT_TTL_SECS,
};

/// A remote JSON object stored under the collection it was fetched from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiObject {
  /// Store identity: `<collection>:<remote id>`
  #[serde(rename = "_key")]
  pub key: String,
  #[serde(rename = "_collection")]
  pub collection: String,
  /// The remote object as received, including its `id`
  #[serde(flatten)]
  pub fields: Map<String, Value>,
}

impl ApiObject {
  /// Wrap a remote object. Returns `None` when it has no usable `id`.
  pub fn from_value(collection: &str, value: Value) -> Option<Self> {
    let Value::Object(mut fields) = value else {
      return None;
    };

    let id = match fields.get("id")? {
      Value::String(s) if !s.is_empty() => s.clone(),
      Value::Number(n) => n.to_string(),
      _ => return None,
    };

    // Reserved for the store
    fields.remove("_key");
    fields.remove("_collection");

    Some(Self {
      key: format!("{}:{}", collection, id),
      collection: collection.to_string(),
      fields,
    })
  }

  /// Remote id as received.
  pub fn remote_id(&self) -> Option<&Value> {
    self.fields.get("id")
  }
}

impl Entity for ApiObject {
  fn id(&self) -> String {
    self.key.clone()
  }

  fn entity_type() -> &'static str {
    "api_object"
  }
}

/// Fetches `path` page by page and stores each object under the collection.
#[derive(Clone)]
pub struct RestCollection {
  client: ApiClient,
  path: String,
  collection: String,
  ttl: Duration,
  replace: bool,
}

impl RestCollection {
  pub fn new(client: ApiClient, path: &str) -> Self {
    let collection = normalize_path(path);
    Self {
      client,
      path: collection.clone(),
      collection,
      ttl: Duration::seconds(DEFAULT_TTL_SECS),
      replace: false,
    }
  }

  pub fn with_ttl(mut self, ttl: Duration) -> Self {
    self.ttl = ttl;
    self
  }

  /// Make a fetch replace the stored collection instead of merging into it.
  pub fn replacing(mut self, replace: bool) -> Self {
    self.replace = replace;
    self
  }

  pub fn collection(&self) -> &str {
    &self.collection
  }
}

impl UseCase for RestCollection {
  type Model = ApiObject;
  type Response = Vec<Value>;

  fn cache_key(&self) -> Option<String> {
    Some(collection_cache_key(&self.collection))
  }

  fn scope(&self) -> Scope {
    Scope::where_eq("_collection", self.collection.as_str())
  }

  fn ttl(&self) -> Duration {
    self.ttl
  }

  async fn fetch_page(&self, page: Option<&PageToken>) -> Result<Page<Vec<Value>>, NetworkError> {
    self.client.get_page(&self.path, page).await
  }

  fn reset(&self, writer: &mut dyn StoreWriter) -> Result<(), StoreError> {
    if self.replace {
      writer.delete_matching::<ApiObject>(&self.scope())?;
    }
    Ok(())
  }

  fn write(&self, response: Vec<Value>, writer: &mut dyn StoreWriter) -> Result<(), StoreError> {
    for value in response {
      match ApiObject::from_value(&self.collection, value) {
        Some(object) => writer.save(&object)?,
        None => warn!(collection = %self.collection, "skipping object without id"),
      }
    }
    Ok(())
  }
}

/// Trim slashes and whitespace so equivalent paths share a collection.
fn normalize_path(path: &str) -> String {
  path.trim().trim_matches('/').to_string()
}

/// SHA256 hash for stable, fixed-length freshness keys.
pub fn collection_cache_key(collection: &str) -> String {
  let mut hasher = Sha256::new();
  hasher.update(format!("get:{}", collection).as_bytes());
  hex::encode(hasher.finalize())
}
