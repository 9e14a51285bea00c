//! Subcommand handlers for the CLI.

use chrono::{DateTime, Duration, Utc};
use color_eyre::{eyre::eyre, Result};
use futures::StreamExt;
use serde_json::Value;
use std::sync::Arc;
use tracing::info;

use coursecache::api::{ApiClient, ApiObject, RestCollection};
use coursecache::cache::{
  AsyncStore, FreshnessRecord, OfflineFlag, RecordStore, Scope, SqliteRecordStore,
};
use coursecache::config::Config;

/// Shared state for every subcommand.
pub struct Context {
  store: Arc<SqliteRecordStore>,
  client: ApiClient,
  offline: OfflineFlag,
  config: Config,
}

impl Context {
  pub fn new(config: Config, force_offline: bool) -> Result<Self> {
    let store = match &config.cache.path {
      Some(path) => SqliteRecordStore::open(path)?,
      None => SqliteRecordStore::open_default()?,
    };
    let client = ApiClient::new(&config)?;
    let offline = OfflineFlag::new(config.offline || force_offline);

    Ok(Self {
      store: Arc::new(store),
      client,
      offline,
      config,
    })
  }

  fn ttl(&self) -> Result<Duration> {
    ttl_from_secs(self.config.cache.ttl_secs)
  }

  fn engine(&self, path: &str, replace: bool) -> Result<AsyncStore<RestCollection, SqliteRecordStore>> {
    let use_case = RestCollection::new(self.client.clone(), path)
      .with_ttl(self.ttl()?)
      .replacing(replace);

    Ok(
      AsyncStore::new(Arc::clone(&self.store), use_case)
        .with_offline_signal(Arc::new(self.offline.clone()))
        .with_max_pages(self.config.cache.max_pages),
    )
  }
}

/// `fetch`: fetch if needed, then print the stored collection.
pub async fn fetch(
  ctx: &Context,
  path: &str,
  all_pages: bool,
  ignore_cache: bool,
  replace: bool,
) -> Result<()> {
  let engine = ctx.engine(path, replace)?;
  let objects = engine.get_entities(ignore_cache, all_pages).await?;
  info!(collection = engine.use_case().collection(), count = objects.len(), "fetch complete");
  println!("{}", render_objects(&objects)?);
  Ok(())
}

/// `show`: print the stored collection without touching the network.
pub fn show(ctx: &Context, path: &str) -> Result<()> {
  let objects = ctx.engine(path, false)?.get_entities_from_database()?;
  println!("{}", render_objects(&objects)?);
  Ok(())
}

/// `watch`: print the collection, then again after every change until Ctrl-C.
///
/// With `refresh_secs`, a forced refresh runs on that interval; its writes
/// reach the output through the live stream.
pub async fn watch(ctx: &Context, path: &str, all_pages: bool, refresh_secs: Option<u64>) -> Result<()> {
  let engine = ctx.engine(path, false)?;
  let mut stream = engine.stream_entities(false, all_pages).await?;

  let period = std::time::Duration::from_secs(refresh_secs.unwrap_or(0).max(1));
  let mut refresh = tokio::time::interval(period);
  // The first tick completes immediately; the initial fetch already ran
  refresh.tick().await;

  loop {
    tokio::select! {
      item = stream.next() => {
        let Some(objects) = item else { break };
        println!("{}", render_objects(&objects?)?);
      }
      _ = refresh.tick(), if refresh_secs.is_some() => {
        if let Err(e) = engine.force_refresh(all_pages).await {
          eprintln!("refresh failed: {}", e);
        }
      }
      _ = tokio::signal::ctrl_c() => break,
    }
  }

  stream.cancel();
  Ok(())
}

/// `freshness`: list freshness records and whether each is still valid.
pub fn freshness(ctx: &Context) -> Result<()> {
  let records: Vec<FreshnessRecord> = ctx
    .store
    .fetch(&Scope::all().order_by("last_refresh", false))?;

  for line in format_freshness(&records, ctx.ttl()?, Utc::now()) {
    println!("{}", line);
  }
  Ok(())
}

/// `cache.ttl_secs` as a duration; values chrono cannot represent are rejected.
fn ttl_from_secs(secs: i64) -> Result<Duration> {
  Duration::try_seconds(secs).ok_or_else(|| eyre!("cache.ttl_secs out of range: {}", secs))
}

/// Pretty JSON array of the remote objects as received.
fn render_objects(objects: &[ApiObject]) -> Result<String> {
  let values: Vec<Value> = objects
    .iter()
    .map(|o| Value::Object(o.fields.clone()))
    .collect();
  serde_json::to_string_pretty(&values).map_err(|e| eyre!("Failed to render objects: {}", e))
}

fn format_freshness(records: &[FreshnessRecord], ttl: Duration, now: DateTime<Utc>) -> Vec<String> {
  records
    .iter()
    .map(|record| {
      let state = if record.is_fresh_at(ttl, now) {
        "fresh"
      } else {
        "expired"
      };
      format!(
        "{}  {}  {}",
        record.key,
        record.last_refresh.format("%Y-%m-%d %H:%M:%S"),
        state
      )
    })
    .collect()
}
