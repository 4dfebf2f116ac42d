use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
  /// Base URL of the content server (projects, content and version endpoints)
  pub backend_url: String,
  /// The agent's own origin; scheme-less URLs resolve against it
  pub origin: String,
  /// Root document scanned for discoverable resources
  pub root_document: String,
  /// Blob namespace generation; bump it to purge every stored blob on activation
  pub cache_generation: String,
  pub poll_interval_secs: u64,
  pub request_timeout_secs: u64,
  /// Storage directory (defaults to $XDG_DATA_HOME/kiosk-cache)
  pub data_dir: Option<PathBuf>,
  /// Structured resource that is always treated as an opaque blob
  pub manifest_name: String,
  /// URL suffix marking a structured (JSON) resource
  pub structured_suffix: String,
  /// Extra assets added to every discovery pass
  pub precache: Vec<String>,
}

impl Default for Config {
  fn default() -> Self {
    Self {
      backend_url: "http://localhost:5000".to_string(),
      origin: "http://localhost:8080".to_string(),
      root_document: "/".to_string(),
      cache_generation: "v1".to_string(),
      poll_interval_secs: 10,
      request_timeout_secs: 30,
      data_dir: None,
      manifest_name: "manifest.json".to_string(),
      structured_suffix: ".json".to_string(),
      precache: Vec::new(),
    }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./kiosk-cache.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/kiosk-cache/config.yaml
  ///
  /// Without any file the defaults apply. `KIOSK_BACKEND_URL` overrides the
  /// backend URL either way.
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

    let config = match path {
      Some(p) => Self::load_from_path(&p)?,
      None => Config::default(),
    };

    Ok(config.with_env_overrides())
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("kiosk-cache.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("kiosk-cache").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::parse(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  fn parse(contents: &str) -> Result<Self> {
    let config: Config = serde_yaml::from_str(contents)?;
    config.validate()?;
    Ok(config)
  }

  fn validate(&self) -> Result<()> {
    url::Url::parse(&self.backend_url)
      .map_err(|e| eyre!("Invalid backend_url '{}': {}", self.backend_url, e))?;
    url::Url::parse(&self.origin).map_err(|e| eyre!("Invalid origin '{}': {}", self.origin, e))?;
    if self.poll_interval_secs == 0 {
      return Err(eyre!("poll_interval_secs must be greater than zero"));
    }
    Ok(())
  }

  fn with_env_overrides(self) -> Self {
    match std::env::var("KIOSK_BACKEND_URL") {
      Ok(url) if !url.is_empty() => Config {
        backend_url: url,
        ..self
      },
      _ => self,
    }
  }

  /// Blob namespace name for this generation.
  pub fn namespace(&self) -> String {
    format!("kiosk-cache-{}", self.cache_generation)
  }

  pub fn poll_interval(&self) -> Duration {
    Duration::from_secs(self.poll_interval_secs)
  }

  pub fn request_timeout(&self) -> Duration {
    Duration::from_secs(self.request_timeout_secs)
  }

  /// Storage directory, falling back to the platform data directory.
  pub fn data_dir(&self) -> Result<PathBuf> {
    match &self.data_dir {
      Some(dir) => Ok(dir.clone()),
      None => crate::db::default_data_dir(),
    }
  }
}
