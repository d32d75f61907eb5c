//! Environment-driven storage configuration.
//!
//! Variables (a `.env` file is honored when present):
//!   DATABASE_URL        - SQLite url (default: "sqlite://atelier.db")
//!   IMAGE_STORAGE_PATH  - blob directory (default: "./assets/images")
//!   IMAGE_URI_PREFIX    - public uri prefix (default: "/images")
//!   DB_MAX_CONNECTIONS  - pool ceiling (default: 5)

use std::path::PathBuf;

use crate::defaults;
use crate::error::{Error, Result};

/// Where the relational store and blob directory live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageConfig {
    pub database_url: String,
    pub image_dir: PathBuf,
    pub image_uri_prefix: String,
    pub max_connections: u32,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_url: defaults::DATABASE_URL.to_string(),
            image_dir: PathBuf::from(defaults::IMAGE_STORAGE_PATH),
            image_uri_prefix: defaults::IMAGE_URI_PREFIX.to_string(),
            max_connections: defaults::DB_MAX_CONNECTIONS,
        }
    }
}

impl StorageConfig {
    /// Load `.env` if present, then read the process environment.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup; unset keys fall back to defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        if let Some(url) = lookup("DATABASE_URL") {
            config.database_url = url;
        }
        if let Some(dir) = lookup("IMAGE_STORAGE_PATH") {
            config.image_dir = PathBuf::from(dir);
        }
        if let Some(prefix) = lookup("IMAGE_URI_PREFIX") {
            config.image_uri_prefix = normalize_prefix(&prefix)?;
        }
        if let Some(raw) = lookup("DB_MAX_CONNECTIONS") {
            config.max_connections = raw.trim().parse().map_err(|_| {
                Error::Config(format!("DB_MAX_CONNECTIONS must be a number, got {raw:?}"))
            })?;
            if config.max_connections == 0 {
                return Err(Error::Config(
                    "DB_MAX_CONNECTIONS must be at least 1".to_string(),
                ));
            }
        }
        Ok(config)
    }
}

/// Ensure a leading slash and no trailing slash.
fn normalize_prefix(raw: &str) -> Result<String> {
    let trimmed = raw.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        return Err(Error::Config("IMAGE_URI_PREFIX must not be empty".to_string()));
    }
    if trimmed.starts_with('/') {
        Ok(trimmed.to_string())
    } else {
        Ok(format!("/{trimmed}"))
    }
}
