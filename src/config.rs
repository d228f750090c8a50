use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use url::Url;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
  /// Origin every root-relative path resolves against
  pub origin: String,
  /// Path prefix of requests eligible for cache-through treatment
  pub api_prefix: String,
  pub cache: CacheConfig,
  pub outbox: OutboxConfig,
  pub network: NetworkConfig,
  /// Database file (default: $XDG_DATA_HOME/outpost/outpost.db)
  pub database: Option<PathBuf>,
  /// Directory for rolling log files; logs go to stderr when unset
  pub log_dir: Option<PathBuf>,
}

impl Default for Config {
  fn default() -> Self {
    Self {
      origin: "http://localhost:5176".to_string(),
      api_prefix: "/api/".to_string(),
      cache: CacheConfig::default(),
      outbox: OutboxConfig::default(),
      network: NetworkConfig::default(),
      database: None,
      log_dir: None,
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
  /// Prefix shared by every generation this app owns
  pub namespace: String,
  /// Release tag, bumped on every deployment of new static assets
  pub version: String,
  /// Root-relative paths precached on install
  pub manifest: Vec<String>,
  /// Document served for offline navigations
  pub root_document: String,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      namespace: "hospice-".to_string(),
      version: "v1.3.2".to_string(),
      manifest: [
        "/",
        "/index.html",
        "/manifest.json",
        "/favicon.ico",
        "/pwa-192x192.png",
        "/pwa-512x512.png",
      ]
      .iter()
      .map(|s| s.to_string())
      .collect(),
      root_document: "/index.html".to_string(),
    }
  }
}

impl CacheConfig {
  /// Prefix of every static generation, whatever its version.
  pub fn static_prefix(&self) -> String {
    format!("{}static-", self.namespace)
  }

  /// Name of the static generation for the configured version.
  pub fn static_name(&self) -> String {
    format!("{}{}", self.static_prefix(), self.version)
  }

  /// Name of the unversioned dynamic generation.
  pub fn dynamic_name(&self) -> String {
    format!("{}dynamic", self.namespace)
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OutboxConfig {
  /// Path of the one POST endpoint protected by the outbox
  pub endpoint: String,
  /// Tag used to request and recognize replay triggers
  pub sync_tag: String,
  /// Period of the background worker's replay tick
  pub replay_interval_secs: u64,
}

impl Default for OutboxConfig {
  fn default() -> Self {
    Self {
      endpoint: "/api/chat/send".to_string(),
      sync_tag: "sync-chat".to_string(),
      replay_interval_secs: 30,
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
  pub timeout_secs: u64,
}

impl Default for NetworkConfig {
  fn default() -> Self {
    Self { timeout_secs: 15 }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./outpost.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/outpost/config.yaml
  ///
  /// Falls back to built-in defaults when no file is found. The origin is
  /// taken from `origin` if given, else from `OUTPOST_ORIGIN`, else from the
  /// file. Validation runs after every override.
  pub fn load(explicit_path: Option<&Path>, origin: Option<String>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    let config = match path {
      Some(p) => Self::load_from_path(&p)?,
      None => Self::default(),
    };

    config.with_origin(origin.or_else(Self::origin_override))
  }

  fn with_origin(mut self, origin: Option<String>) -> Result<Self> {
    if let Some(origin) = origin {
      self.origin = origin;
    }
    self.validate()?;
    Ok(self)
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("outpost.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("outpost").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::from_yaml(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  fn from_yaml(contents: &str) -> Result<Self> {
    let config: Config = serde_yaml::from_str(contents)?;
    Ok(config)
  }

  fn origin_override() -> Option<String> {
    std::env::var("OUTPOST_ORIGIN").ok().filter(|s| !s.is_empty())
  }

  fn validate(&self) -> Result<()> {
    let origin = self.origin_url()?;
    if !matches!(origin.scheme(), "http" | "https") {
      return Err(eyre!("Origin must be an http(s) URL: {}", self.origin));
    }
    if !self.api_prefix.starts_with('/') || !self.outbox.endpoint.starts_with('/') {
      return Err(eyre!("API prefix and outbox endpoint must be root-relative paths"));
    }
    if self.cache.version.is_empty() {
      return Err(eyre!("cache.version must not be empty"));
    }
    Ok(())
  }

  pub fn origin_url(&self) -> Result<Url> {
    Url::parse(&self.origin).map_err(|e| eyre!("Invalid origin '{}': {}", self.origin, e))
  }

  /// Resolve a root-relative path against the origin.
  pub fn resolve(&self, path: &str) -> Result<Url> {
    self
      .origin_url()?
      .join(path)
      .map_err(|e| eyre!("Invalid path '{}': {}", path, e))
  }

  /// Absolute URLs of the precache manifest, in manifest order.
  pub fn manifest_urls(&self) -> Result<Vec<Url>> {
    self.cache.manifest.iter().map(|p| self.resolve(p)).collect()
  }
}
