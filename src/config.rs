use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::cache::{DEFAULT_MAX_PAGES, DEFAULT_TTL_SECS};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  pub api: ApiConfig,
  #[serde(default)]
  pub cache: CacheConfig,
  /// Start in offline mode: serve everything from the local store
  #[serde(default)]
  pub offline: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
  /// API root, e.g. "https://canvas.instructure.com/api/v1/"
  pub base_url: String,
  /// Page size requested from paginated endpoints
  #[serde(default = "default_per_page")]
  pub per_page: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
  /// Seconds a completed fetch stays fresh
  #[serde(default = "default_ttl_secs")]
  pub ttl_secs: i64,
  /// Ceiling on pages per fetch; null disables it
  #[serde(default = "default_max_pages")]
  pub max_pages: Option<usize>,
  /// Database location (defaults to the platform data directory)
  pub path: Option<PathBuf>,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      ttl_secs: default_ttl_secs(),
      max_pages: default_max_pages(),
      path: None,
    }
  }
}

fn default_per_page() -> u32 {
  50
}

fn default_ttl_secs() -> i64 {
  DEFAULT_TTL_SECS
}

fn default_max_pages() -> Option<usize> {
  Some(DEFAULT_MAX_PAGES)
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./coursecache.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/coursecache/config.yaml
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Err(eyre!(
        "No configuration file found. Create one at ~/.config/coursecache/config.yaml\n\
                 with at least `api: {{ base_url: https://<host>/api/v1/ }}`."
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("coursecache.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("coursecache").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::parse(&contents).map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  fn parse(contents: &str) -> Result<Self, serde_yaml::Error> {
    serde_yaml::from_str(contents)
  }

  /// Get the API token from environment variables.
  ///
  /// Checks COURSECACHE_API_TOKEN first, then CANVAS_API_TOKEN as fallback.
  pub fn get_api_token() -> Result<String> {
    std::env::var("COURSECACHE_API_TOKEN")
      .or_else(|_| std::env::var("CANVAS_API_TOKEN"))
      .map_err(|_| {
        eyre!("API token not found. Set COURSECACHE_API_TOKEN or CANVAS_API_TOKEN environment variable.")
      })
  }
}
