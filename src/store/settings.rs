//! Scalar settings persisted next to the snapshot (sled key/value tree).

use std::path::Path;

use anyhow::{Context, Result};
use sled::Db;
use tracing::warn;

use crate::models::{Address, Watermark};

const KEY_WATERMARK: &str = "watermark";
const KEY_APP_VERSION: &str = "app_version";
const KEY_ADDRESS_CACHE: &str = "address_cache";

/// Watermark, last known application version and the exported address cache.
///
/// Cloning is cheap; clones share the same database handle.
#[derive(Clone)]
pub struct Settings {
    db: Db,
}

impl Settings {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let db = sled::open(path)
            .with_context(|| format!("Failed to open settings store at {}", path.display()))?;
        Ok(Self { db })
    }

    /// In-memory store removed on drop
    pub fn temporary() -> Result<Self> {
        let db = sled::Config::new()
            .temporary(true)
            .open()
            .context("Failed to open temporary settings store")?;
        Ok(Self { db })
    }

    fn get_string(&self, key: &str) -> Option<String> {
        match self.db.get(key) {
            Ok(Some(bytes)) => match String::from_utf8(bytes.to_vec()) {
                Ok(value) => Some(value),
                Err(e) => {
                    warn!("Setting '{}' is not valid UTF-8: {}", key, e);
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                warn!("Failed to read setting '{}': {}", key, e);
                None
            }
        }
    }

    fn set_string(&self, key: &str, value: &str) -> Result<()> {
        self.db
            .insert(key, value.as_bytes())
            .with_context(|| format!("Failed to write setting '{}'", key))?;
        Ok(())
    }

    pub fn watermark(&self) -> Option<Watermark> {
        self.get_string(KEY_WATERMARK).map(Watermark::new)
    }

    pub fn set_watermark(&self, watermark: &Watermark) -> Result<()> {
        self.set_string(KEY_WATERMARK, watermark.as_str())
    }

    pub fn clear_watermark(&self) -> Result<()> {
        self.db
            .remove(KEY_WATERMARK)
            .context("Failed to clear watermark")?;
        Ok(())
    }

    pub fn app_version(&self) -> Option<String> {
        self.get_string(KEY_APP_VERSION)
    }

    pub fn set_app_version(&self, version: &str) -> Result<()> {
        self.set_string(KEY_APP_VERSION, version)
    }

    /// Exported address cache entries, least recently used first
    pub fn address_cache(&self) -> Vec<(String, Address)> {
        let Some(json) = self.get_string(KEY_ADDRESS_CACHE) else {
            return Vec::new();
        };
        match serde_json::from_str(&json) {
            Ok(entries) => entries,
            Err(e) => {
                warn!("Discarding unreadable address cache: {}", e);
                Vec::new()
            }
        }
    }

    pub fn set_address_cache(&self, entries: &[(String, Address)]) -> Result<()> {
        let json = serde_json::to_string(entries).context("Failed to encode address cache")?;
        self.set_string(KEY_ADDRESS_CACHE, &json)
    }

    pub fn flush(&self) -> Result<()> {
        self.db.flush().context("Failed to flush settings store")?;
        Ok(())
    }
}
