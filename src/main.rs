use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use offline_worker::cache::{CacheLayer, CacheStorage, SqliteStorage};
use offline_worker::config::Config;
use offline_worker::logging;
use offline_worker::net::{Destination, HttpNetwork, Network, Request};
use offline_worker::worker::{OfflineWorker, Registration, WorkerConfig};

#[derive(Parser, Debug)]
#[command(name = "offline-worker")]
#[command(about = "Cache-first offline agent for single-page applications")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/offline-worker/config.yaml)
  #[arg(short, long, global = true)]
  config: Option<PathBuf>,

  /// Enable debug logging
  #[arg(short, long, global = true)]
  verbose: bool,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Install the worker (precache the manifest), then activate it
  Install,
  /// Delete cache generations other than the current version
  Activate,
  /// Dispatch a fetch event for URL
  Fetch {
    url: String,
    /// Declared request destination (document, script, style, image, ...)
    #[arg(short, long, default_value = "document")]
    destination: Destination,
    /// Write the response body to this file
    #[arg(short, long)]
    output: Option<PathBuf>,
  },
  /// Dispatch a message event with a JSON payload
  Message { payload: String },
  /// Dispatch a background-sync event
  Sync { tag: String },
  /// List cache generations and their entries
  Caches,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let config = Config::load(args.config.as_deref())?;

  let db_path = match &config.storage.path {
    Some(path) => path.clone(),
    None => SqliteStorage::default_path()?,
  };
  let log_dir = db_path
    .parent()
    .map(|p| p.join("logs"))
    .ok_or_else(|| eyre!("Invalid storage path {}", db_path.display()))?;
  let _guard = logging::init(&log_dir, args.verbose)?;

  match &config.source {
    Some(path) => info!(path = %path.display(), version = %config.precache.version, "Loaded configuration"),
    None => info!(version = %config.precache.version, "Using built-in manifest"),
  }

  let storage = Arc::new(SqliteStorage::open(&db_path)?);
  let network = Arc::new(HttpNetwork::new()?);
  let worker = OfflineWorker::new(
    WorkerConfig::from_config(&config)?,
    CacheLayer::from_shared(Arc::clone(&storage)),
    Arc::clone(&network),
  );

  match args.command {
    Command::Install => {
      let mut registration = Registration::new();
      let state = registration.register(worker).await?;
      println!("{} {}", config.precache.version, state);
    }
    Command::Activate => {
      worker.activate().await?;
      for name in storage.keys()? {
        println!("{}", name);
      }
    }
    Command::Fetch {
      url,
      destination,
      output,
    } => {
      let url = config.resolve(&url)?;
      let request = Request::new(url, destination);

      let (source, response) = match worker.fetch(&request).await? {
        Some(served) => (served.source.to_string(), served.response),
        None => ("passthrough".to_string(), network.fetch(&request).await?),
      };
      worker.cache().flush().await?;

      eprintln!("{} {} {}", source, response.status, request.url);
      match output {
        Some(path) => {
          std::fs::write(&path, &response.body)
            .map_err(|e| eyre!("Failed to write {}: {}", path.display(), e))?;
          info!(path = %path.display(), bytes = response.body.len(), "Wrote response body");
        }
        None => {
          let mut stdout = std::io::stdout().lock();
          stdout
            .write_all(&response.body)
            .and_then(|_| stdout.flush())
            .map_err(|e| eyre!("Failed to write response body: {}", e))?;
        }
      }
    }
    Command::Message { payload } => {
      let payload: serde_json::Value =
        serde_json::from_str(&payload).map_err(|e| eyre!("Invalid JSON payload: {}", e))?;
      match worker.message(&payload) {
        Some(signal) => println!("{:?}", signal),
        None => println!("ignored"),
      }
    }
    Command::Sync { tag } => {
      worker.sync(&tag).await?;
    }
    Command::Caches => {
      for name in storage.keys()? {
        println!("{}", name);
        for key in storage.entries(&name)? {
          println!("  {}", key);
        }
      }
    }
  }

  Ok(())
}
