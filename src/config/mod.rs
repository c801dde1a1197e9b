//! Configuration management.
//!
//! This module resolves the docshift home directory, the checkpoint and
//! scratch locations under it, and the connection settings for the two
//! remote stores.
//!
//! # Layout
//!
//! ```text
//! ~/.docshift/
//! ├── config.json          connection settings (source / target)
//! ├── state/<id>.json      one checkpoint per unfinished job
//! └── scratch/<id>/        downloaded binaries for the current batch
//! ```
//!
//! `DOCSHIFT_HOME` relocates the whole tree. Connection settings are read
//! from `config.json` and overridden per field by environment variables.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

/// REST API version used when none is configured.
pub const DEFAULT_API_VERSION: &str = "59.0";

/// Which side of the migration a store handle serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreRole {
    Source,
    Target,
}

impl StoreRole {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Source => "source",
            Self::Target => "target",
        }
    }

    const fn env_prefix(&self) -> &'static str {
        match self {
            Self::Source => "DOCSHIFT_SOURCE",
            Self::Target => "DOCSHIFT_TARGET",
        }
    }
}

/// Connection settings for one store.
///
/// The access token is obtained out of band; docshift never performs the
/// login flow itself.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreSettings {
    pub instance_url: Option<String>,
    pub access_token: Option<String>,
    pub api_version: Option<String>,
}

/// docshift configuration file structure.
///
/// Stored at `~/.docshift/config.json`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DocshiftConfig {
    pub source: Option<StoreSettings>,
    pub target: Option<StoreSettings>,
}

/// Fully resolved settings ready to open a store connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedStore {
    pub instance_url: String,
    pub access_token: String,
    pub api_version: String,
}

/// Get the docshift home directory.
///
/// Priority:
/// 1. `DOCSHIFT_HOME` environment variable
/// 2. `~/.docshift`
#[must_use]
pub fn home_dir() -> Option<PathBuf> {
    if let Ok(home) = std::env::var("DOCSHIFT_HOME") {
        if !home.trim().is_empty() {
            return Some(PathBuf::from(home));
        }
    }
    directories::BaseDirs::new().map(|b| b.home_dir().join(".docshift"))
}

fn require_home() -> Result<PathBuf> {
    home_dir().ok_or_else(|| Error::Config("Could not determine home directory".into()))
}

/// Directory holding checkpoint files.
pub fn state_dir() -> Result<PathBuf> {
    Ok(require_home()?.join("state"))
}

/// Root under which each job gets its own scratch directory.
pub fn scratch_root() -> Result<PathBuf> {
    Ok(require_home()?.join("scratch"))
}

fn config_path() -> Result<PathBuf> {
    Ok(require_home()?.join("config.json"))
}

/// Load the configuration file, or defaults if it does not exist.
pub fn load_config() -> Result<DocshiftConfig> {
    let path = config_path()?;

    if !path.exists() {
        return Ok(DocshiftConfig::default());
    }

    let content = fs::read_to_string(&path)
        .map_err(|e| Error::Config(format!("Failed to read config file: {e}")))?;

    serde_json::from_str(&content)
        .map_err(|e| Error::Config(format!("Failed to parse config file: {e}")))
}

/// Resolve connection settings for a store from config file and environment.
pub fn resolve_store(role: StoreRole) -> Result<ResolvedStore> {
    let config = load_config()?;
    let file = match role {
        StoreRole::Source => config.source,
        StoreRole::Target => config.target,
    };
    merge_store_settings(role, file.as_ref(), |key| {
        std::env::var(key).ok().filter(|v| !v.trim().is_empty())
    })
}

/// Merge file settings with environment lookups. Environment wins per field.
///
/// `DOCSHIFT_API_VERSION` applies to both stores.
pub fn merge_store_settings(
    role: StoreRole,
    file: Option<&StoreSettings>,
    env: impl Fn(&str) -> Option<String>,
) -> Result<ResolvedStore> {
    let prefix = role.env_prefix();
    let file = file.cloned().unwrap_or_default();

    let instance_url = env(&format!("{prefix}_URL"))
        .or(file.instance_url)
        .ok_or_else(|| {
            Error::Config(format!(
                "No {} instance URL (set {prefix}_URL or {}.instance_url)",
                role.as_str(),
                role.as_str()
            ))
        })?;

    let access_token = env(&format!("{prefix}_TOKEN"))
        .or(file.access_token)
        .ok_or_else(|| {
            Error::Config(format!(
                "No {} access token (set {prefix}_TOKEN or {}.access_token)",
                role.as_str(),
                role.as_str()
            ))
        })?;

    let api_version = env("DOCSHIFT_API_VERSION")
        .or(file.api_version)
        .unwrap_or_else(|| DEFAULT_API_VERSION.to_string());

    Ok(ResolvedStore {
        instance_url,
        access_token,
        api_version,
    })
}
