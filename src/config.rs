use chrono::Duration;
use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use url::Url;

use crate::cache::Partitions;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  /// Origin the application talks to; relative asset paths resolve against it
  #[serde(default = "default_origin")]
  pub origin: Url,
  #[serde(default)]
  pub cache: CacheConfig,
  #[serde(default)]
  pub policy: PolicyConfig,
  #[serde(default)]
  pub timeouts: TimeoutConfig,
  #[serde(default)]
  pub sync: SyncConfig,
  #[serde(default)]
  pub lifecycle: LifecycleConfig,
  #[serde(default)]
  pub storage: StorageConfig,
}

fn default_origin() -> Url {
  Url::parse("http://localhost:3000").expect("static URL is valid")
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
  /// Prefix of every partition name (e.g. "kiduka-pos")
  pub app_name: String,
  /// Current generation; partitions of other generations are purged on activation
  pub version: String,
  pub api_prefix: String,
  /// Assets stored in the static partition at install time
  pub precache: Vec<String>,
  pub offline_path: String,
  /// Root document served for navigations the cache has no exact match for
  pub app_shell: String,
  pub placeholder_image: String,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      app_name: "kiduka-pos".to_string(),
      version: "v2".to_string(),
      api_prefix: "/api".to_string(),
      precache: vec![
        "/".to_string(),
        "/index.html".to_string(),
        "/manifest.json".to_string(),
        "/favicon.ico".to_string(),
        "/placeholder.svg".to_string(),
      ],
      offline_path: "/offline.html".to_string(),
      app_shell: "/index.html".to_string(),
      placeholder_image: "/placeholder.svg".to_string(),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
  /// Replay attempts before a queued mutation is dropped
  pub max_retries: u32,
  pub critical_max_age_hours: i64,
  pub default_max_age_days: i64,
  /// Endpoint names (first segment after the API prefix) with the shorter window
  pub critical_endpoints: Vec<String>,
  /// Endpoints answered with `[]` when nothing usable is cached
  pub list_endpoints: Vec<String>,
  /// API paths re-fetched after each periodic sync
  pub refresh_paths: Vec<String>,
}

impl Default for PolicyConfig {
  fn default() -> Self {
    Self {
      max_retries: 3,
      critical_max_age_hours: 24,
      default_max_age_days: 7,
      critical_endpoints: ["products", "sales", "customers", "profile"]
        .iter()
        .map(|s| s.to_string())
        .collect(),
      list_endpoints: vec!["products".to_string(), "sales".to_string()],
      refresh_paths: vec!["/api/products".to_string(), "/api/customers".to_string()],
    }
  }
}

impl PolicyConfig {
  pub fn critical_max_age(&self) -> Duration {
    Duration::try_hours(self.critical_max_age_hours).unwrap_or(Duration::MAX)
  }

  pub fn default_max_age(&self) -> Duration {
    Duration::try_days(self.default_max_age_days).unwrap_or(Duration::MAX)
  }

  /// Reject windows that are negative or too large to represent.
  fn validate(&self) -> std::result::Result<(), String> {
    let windows = [
      (
        "critical_max_age_hours",
        self.critical_max_age_hours,
        Duration::try_hours(self.critical_max_age_hours),
      ),
      (
        "default_max_age_days",
        self.default_max_age_days,
        Duration::try_days(self.default_max_age_days),
      ),
    ];
    for (name, value, window) in windows {
      if value < 0 || window.is_none() {
        return Err(format!("policy.{} out of range: {}", name, value));
      }
    }
    Ok(())
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
  pub api_secs: u64,
  /// Images, static assets, navigations and precache downloads
  pub resource_secs: u64,
}

impl Default for TimeoutConfig {
  fn default() -> Self {
    Self {
      api_secs: 5,
      resource_secs: 3,
    }
  }
}

impl TimeoutConfig {
  pub fn api(&self) -> std::time::Duration {
    std::time::Duration::from_secs(self.api_secs)
  }

  pub fn resource(&self) -> std::time::Duration {
    std::time::Duration::from_secs(self.resource_secs)
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
  pub interval_secs: u64,
  pub probe_interval_secs: u64,
  pub probe_path: String,
}

impl Default for SyncConfig {
  fn default() -> Self {
    Self {
      interval_secs: 300,
      probe_interval_secs: 30,
      probe_path: "/".to_string(),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LifecycleConfig {
  /// Activate right after install instead of waiting for SKIP_WAITING
  pub skip_waiting: bool,
}

impl Default for LifecycleConfig {
  fn default() -> Self {
    Self { skip_waiting: true }
  }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StorageConfig {
  /// Database file (default: $XDG_DATA_HOME/kiduka-offline/cache.db)
  pub path: Option<PathBuf>,
}

impl Default for Config {
  fn default() -> Self {
    Self {
      origin: default_origin(),
      cache: CacheConfig::default(),
      policy: PolicyConfig::default(),
      timeouts: TimeoutConfig::default(),
      sync: SyncConfig::default(),
      lifecycle: LifecycleConfig::default(),
      storage: StorageConfig::default(),
    }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./kiduka-offline.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/kiduka-offline/config.yaml
  ///
  /// Falls back to the built-in defaults when no file exists.
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
        tracing::debug!("no configuration file found, using defaults");
        Ok(Self::default())
      }
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    let local = PathBuf::from("kiduka-offline.yaml");
    if local.exists() {
      return Some(local);
    }

    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("kiduka-offline").join("config.yaml");
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

  pub fn from_yaml(contents: &str) -> std::result::Result<Self, serde_yaml::Error> {
    let config: Self = serde_yaml::from_str(contents)?;
    config
      .policy
      .validate()
      .map_err(<serde_yaml::Error as serde::de::Error>::custom)?;
    Ok(config)
  }

  /// Partition names of the current generation.
  pub fn partitions(&self) -> Partitions {
    Partitions::new(&self.cache.app_name, &self.cache.version)
  }

  /// Resolve an absolute path (e.g. "/offline.html") against the origin.
  pub fn resolve(&self, path: &str) -> Result<Url> {
    self
      .origin
      .join(path)
      .map_err(|e| eyre!("Invalid path '{}': {}", path, e))
  }

  /// Directory for the database and log files.
  pub fn data_dir() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("kiduka-offline"))
  }

  pub fn database_path(&self) -> Result<PathBuf> {
    match &self.storage.path {
      Some(path) => Ok(path.clone()),
      None => Ok(Self::data_dir()?.join("cache.db")),
    }
  }
}
