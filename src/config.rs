use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::debug;
use url::Url;

use crate::net::{Destination, Request};

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
  /// Base URL the worker controls; relative manifest paths resolve against it
  #[serde(default = "default_scope")]
  pub scope: String,
  #[serde(default)]
  pub precache: PrecacheConfig,
  /// Tag the background-sync handler recognises
  #[serde(default = "default_sync_tag")]
  pub sync_tag: String,
  #[serde(default)]
  pub storage: StorageConfig,
  /// File this configuration was read from; `None` for the built-in manifest
  #[serde(skip)]
  pub source: Option<PathBuf>,
}

/// Static precache manifest.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PrecacheConfig {
  /// Cache generation name; changing it triggers a full re-install
  pub version: String,
  /// Resources fetched and stored at install time, in order
  pub urls: Vec<String>,
  /// Entry served when a document request fails on the network
  #[serde(default = "default_offline_page")]
  pub offline_page: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StorageConfig {
  /// SQLite database path (defaults to $XDG_DATA_HOME/offline-worker/cache.db)
  pub path: Option<PathBuf>,
}

fn default_scope() -> String {
  "http://localhost:8080/".to_string()
}

fn default_sync_tag() -> String {
  "background-sync".to_string()
}

fn default_offline_page() -> String {
  "./index.html".to_string()
}

impl Default for PrecacheConfig {
  fn default() -> Self {
    Self {
      version: "time-check-buddy-v2-1-8".to_string(),
      urls: [
        "./",
        "./index.html",
        "./manifest.json",
        "./icon-192.svg",
        "./icon-512.svg",
      ]
      .iter()
      .map(|s| s.to_string())
      .collect(),
      offline_page: default_offline_page(),
    }
  }
}

impl Default for Config {
  fn default() -> Self {
    Self {
      scope: default_scope(),
      precache: PrecacheConfig::default(),
      sync_tag: default_sync_tag(),
      storage: StorageConfig::default(),
      source: None,
    }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./offline-worker.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/offline-worker/config.yaml
  ///
  /// Falls back to the built-in manifest when no file exists.
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
      None => {
        debug!("No configuration file found, using built-in manifest");
        let config = Config::default();
        config.validate()?;
        Ok(config)
      }
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("offline-worker.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("offline-worker").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    let mut config = Self::from_yaml(&contents)
      .map_err(|e| eyre!("Invalid config file {}: {}", path.display(), e))?;
    config.source = Some(path.to_path_buf());

    debug!(path = %path.display(), version = %config.precache.version, "Loaded configuration");
    Ok(config)
  }

  /// Parse and validate a YAML document.
  pub fn from_yaml(contents: &str) -> Result<Self> {
    let config: Config =
      serde_yaml::from_str(contents).map_err(|e| eyre!("Failed to parse config: {}", e))?;
    config.validate()?;
    Ok(config)
  }

  fn validate(&self) -> Result<()> {
    if self.precache.version.trim().is_empty() {
      return Err(eyre!("precache.version must not be empty"));
    }
    self.scope_url()?;
    self.precache_requests()?;
    self.offline_key()?;
    Ok(())
  }

  /// Parsed scope URL.
  pub fn scope_url(&self) -> Result<Url> {
    let scope =
      Url::parse(&self.scope).map_err(|e| eyre!("Invalid scope URL {}: {}", self.scope, e))?;
    if scope.cannot_be_a_base() {
      return Err(eyre!("Scope {} cannot be used as a base URL", self.scope));
    }
    Ok(scope)
  }

  /// Resolve a manifest path against the scope.
  pub fn resolve(&self, path: &str) -> Result<Url> {
    self
      .scope_url()?
      .join(path)
      .map_err(|e| eyre!("Failed to resolve {} against {}: {}", path, self.scope, e))
  }

  /// Precache list as requests, in manifest order.
  pub fn precache_requests(&self) -> Result<Vec<Request>> {
    self
      .precache
      .urls
      .iter()
      .map(|path| Ok(Request::new(self.resolve(path)?, Destination::Empty)))
      .collect()
  }

  /// Cache key of the offline fallback document.
  pub fn offline_key(&self) -> Result<String> {
    Ok(Request::new(self.resolve(&self.precache.offline_page)?, Destination::Document).cache_key())
  }
}
