use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::annotations::DEFAULT_CUTOFF_MILES;
use crate::geocode::DEFAULT_NOMINATIM_URL;

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct EngineConfig {
    pub remote: RemoteConfig,
    pub geocoding: GeocodingConfig,
    pub cache: CacheConfig,
    pub viewport: ViewportConfig,
    pub sync: SyncConfig,
    /// Persisted element data is dropped when this differs from the last run
    pub app_version: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RemoteConfig {
    pub endpoint: String,
    pub timeout_secs: u64,
    pub user_agent: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct GeocodingConfig {
    pub max_concurrent: usize,
    pub nominatim_url: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct CacheConfig {
    pub data_dir: PathBuf,
    pub address_capacity: usize,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ViewportConfig {
    pub cutoff_miles: f64,
    pub debounce_ms: u64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SyncConfig {
    pub backoff_base_secs: u64,
    pub backoff_max_secs: u64,
}

fn user_agent() -> String {
    format!("locus/{}", env!("CARGO_PKG_VERSION"))
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            remote: RemoteConfig::default(),
            geocoding: GeocodingConfig::default(),
            cache: CacheConfig::default(),
            viewport: ViewportConfig::default(),
            sync: SyncConfig::default(),
            app_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://api.btcmap.org/v2/elements".to_string(),
            timeout_secs: 60,
            user_agent: user_agent(),
        }
    }
}

impl Default for GeocodingConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 4,
            nominatim_url: DEFAULT_NOMINATIM_URL.to_string(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            address_capacity: 100,
        }
    }
}

impl Default for ViewportConfig {
    fn default() -> Self {
        Self {
            cutoff_miles: DEFAULT_CUTOFF_MILES,
            debounce_ms: 500,
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            backoff_base_secs: 30,
            backoff_max_secs: 1800,
        }
    }
}

impl EngineConfig {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path).context("Failed to read config file")?;
        let config: EngineConfig = toml::from_str(&content).context("Failed to parse config file")?;
        Ok(config)
    }

    pub fn snapshot_path(&self) -> PathBuf {
        self.cache.data_dir.join("elements.json")
    }

    pub fn settings_path(&self) -> PathBuf {
        self.cache.data_dir.join("settings")
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.remote.timeout_secs)
    }

    pub fn debounce_interval(&self) -> Duration {
        Duration::from_millis(self.viewport.debounce_ms)
    }

    pub fn backoff_base(&self) -> Duration {
        Duration::from_secs(self.sync.backoff_base_secs)
    }

    pub fn backoff_max(&self) -> Duration {
        Duration::from_secs(self.sync.backoff_max_secs)
    }
}
