//! Drives `fetch_page` / `write` across remote pages.

use std::collections::HashSet;

use tracing::{debug, warn};

use super::error::{NetworkError, SyncError};
use super::record_store::RecordStore;
use super::use_case::{Page, PageToken, UseCase};

/// Default ceiling on pages fetched by one pagination loop.
pub const DEFAULT_MAX_PAGES: usize = 500;

/// Fetch and reconcile pages until the remote returns no cursor.
///
/// Each page is written in its own transaction as soon as it arrives, so pages
/// before a failing one stay stored. With `load_all_pages == false` exactly one
/// page is fetched. Returns the number of pages written.
pub async fn fetch_pages<U, S>(
  use_case: &U,
  store: &S,
  load_all_pages: bool,
  max_pages: Option<usize>,
) -> Result<usize, SyncError>
where
  U: UseCase,
  S: RecordStore,
{
  let mut token: Option<PageToken> = None;
  let mut seen: HashSet<PageToken> = HashSet::new();
  let mut pages = 0;

  loop {
    debug!(page = pages + 1, token = ?token, "fetching page");
    let Page { response, next } = use_case.fetch_page(token.as_ref()).await?;

    let first = pages == 0;
    store.write(|writer| {
      if first {
        use_case.reset(writer)?;
      }
      match response {
        Some(response) => use_case.write(response, writer),
        None => Ok(()),
      }
    })?;
    pages += 1;

    if !load_all_pages {
      return Ok(pages);
    }

    let Some(next) = next else {
      return Ok(pages);
    };

    if let Some(limit) = max_pages {
      if pages >= limit {
        warn!(limit, "pagination stopped at page limit");
        return Err(NetworkError::PageLimit { limit }.into());
      }
    }

    if let Some(current) = token.take() {
      seen.insert(current);
    }
    if seen.contains(&next) {
      warn!(token = %next, "remote returned an already fetched page cursor");
      return Err(
        NetworkError::PaginationLoop {
          token: next.to_string(),
        }
        .into(),
      );
    }

    token = Some(next);
  }
}
