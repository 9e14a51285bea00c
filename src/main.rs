mod commands;
mod logging;

use clap::{Parser, Subcommand};
use color_eyre::Result;
use coursecache::config::Config;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "coursecache")]
#[command(about = "Fetch, cache and watch Canvas API collections")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/coursecache/config.yaml)
  #[arg(short, long, global = true)]
  config: Option<PathBuf>,

  /// Serve everything from the local store; never touch the network
  #[arg(long, global = true)]
  offline: bool,

  /// Mirror logs to stderr
  #[arg(short, long, global = true)]
  verbose: bool,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Fetch a collection if its cache expired, then print it
  Fetch {
    /// API path relative to the base URL, e.g. "courses"
    path: String,
    /// Follow pagination links to the last page
    #[arg(long)]
    all_pages: bool,
    /// Fetch even if the cache is still fresh
    #[arg(long)]
    ignore_cache: bool,
    /// Replace the stored collection instead of merging into it
    #[arg(long)]
    replace: bool,
  },
  /// Print a collection from the local store only
  Show { path: String },
  /// Print a collection and again after every change, until Ctrl-C
  Watch {
    path: String,
    #[arg(long)]
    all_pages: bool,
    /// Force a refresh every N seconds
    #[arg(long, value_name = "SECS")]
    refresh: Option<u64>,
  },
  /// List freshness records
  Freshness,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let _log_guard = logging::init(args.verbose)?;

  // Load configuration
  let config = Config::load(args.config.as_deref())?;
  let ctx = commands::Context::new(config, args.offline)?;

  match args.command {
    Command::Fetch {
      path,
      all_pages,
      ignore_cache,
      replace,
    } => commands::fetch(&ctx, &path, all_pages, ignore_cache, replace).await,
    Command::Show { path } => commands::show(&ctx, &path),
    Command::Watch {
      path,
      all_pages,
      refresh,
    } => commands::watch(&ctx, &path, all_pages, refresh).await,
    Command::Freshness => commands::freshness(&ctx),
  }
}
