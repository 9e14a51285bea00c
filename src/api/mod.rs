//! REST client for a Canvas-style paginated API.

mod collection;
mod links;

pub use collection::{ApiObject, RestCollection};
pub use links::{next_link, parse_link_header};

use reqwest::header::{ACCEPT, AUTHORIZATION};
use serde_json::Value;
use tracing::{debug, warn};
use url::Url;

use crate::cache::{NetworkError, Page, PageToken};
use crate::config::Config;

/// API client wrapper
#[derive(Clone)]
pub struct ApiClient {
  http: reqwest::Client,
  base_url: Url,
  token: Option<String>,
  per_page: u32,
}

impl ApiClient {
  pub fn new(config: &Config) -> Result<Self, NetworkError> {
    let base_url = Url::parse(&config.api.base_url)?;
    let token = match Config::get_api_token() {
      Ok(token) => Some(token),
      Err(e) => {
        warn!("{}; requests will be sent unauthenticated", e);
        None
      }
    };

    let http = reqwest::Client::builder()
      .user_agent(concat!("coursecache/", env!("CARGO_PKG_VERSION")))
      .build()?;

    Ok(Self {
      http,
      base_url,
      token,
      per_page: config.api.per_page,
    })
  }

  /// URL of the first page of `path`, with the page size applied.
  pub fn first_page_url(&self, path: &str) -> Result<Url, NetworkError> {
    let mut url = self.base_url.join(path.trim_start_matches('/'))?;
    let has_per_page = url.query_pairs().any(|(k, _)| k == "per_page");
    if !has_per_page {
      url
        .query_pairs_mut()
        .append_pair("per_page", &self.per_page.to_string());
    }
    Ok(url)
  }

  /// Fetch one page of `path`. A page token is the absolute next-page URL.
  pub async fn get_page(
    &self,
    path: &str,
    page: Option<&PageToken>,
  ) -> Result<Page<Vec<Value>>, NetworkError> {
    let url = match page {
      Some(token) => Url::parse(token.as_str())?,
      None => self.first_page_url(path)?,
    };

    debug!(url = %url, "GET");
    let mut request = self.http.get(url.clone()).header(ACCEPT, "application/json");
    if let Some(token) = &self.token {
      request = request.header(AUTHORIZATION, format!("Bearer {}", token));
    }

    let response = request.send().await?;
    let status = response.status();
    if !status.is_success() {
      return Err(NetworkError::Status {
        status: status.as_u16(),
        url: url.to_string(),
      });
    }

    let next = next_link(response.headers(), &url).map(|u| PageToken::new(u.to_string()));
    let body = response.bytes().await?;

    Ok(Page {
      response: decode_items(&body)?,
      next,
    })
  }
}

/// Collections arrive as arrays, single resources as objects; empty bodies
/// carry nothing to write.
fn decode_items(body: &[u8]) -> Result<Option<Vec<Value>>, NetworkError> {
  if body.iter().all(u8::is_ascii_whitespace) {
    return Ok(None);
  }

  match serde_json::from_slice(body)? {
    Value::Null => Ok(None),
    Value::Array(items) => Ok(Some(items)),
    other => Ok(Some(vec![other])),
  }
}
