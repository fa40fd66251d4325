//! Shared config utilities for loading/saving JSON config files
//! and resolving API keys from fields or environment variables.

use crate::ai::MoodConfig;
use crate::animation::{BlendConfig, PointerConfig};
use crate::render::{ExpressionConfig, SinkConfig};
use crate::server::{ServerConfig, TouchConfig, WindowConfig};
use crate::tts::{LipSyncConfig, TtsSystemConfig};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to write config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Everything a session needs. Missing sections take their defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CompanionConfig {
    pub server: ServerConfig,
    pub blend: BlendConfig,
    pub pointer: PointerConfig,
    pub mood: MoodConfig,
    pub lip_sync: LipSyncConfig,
    pub touch: TouchConfig,
    pub sink: SinkConfig,
    pub tts: TtsSystemConfig,
    pub expressions: ExpressionConfig,
    pub window: WindowConfig,
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_filter: Option<String>,
}

/// `<config_dir>/sprite-control/config.json`, or `./config.json` without a config dir.
pub fn default_config_path() -> PathBuf {
    dirs_next::config_dir()
        .map(|dir| dir.join("sprite-control"))
        .unwrap_or_else(|| PathBuf::from("."))
        .join("config.json")
}

/// How a config file was read.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigSource {
    Loaded,
    Missing,
    /// The file exists but could not be parsed; defaults were used.
    Invalid(String),
}

/// Read a config without logging. Missing or unparsable files give `T::default()`.
pub fn read_json_config<T: DeserializeOwned + Default>(path: &Path) -> (T, ConfigSource) {
    match std::fs::read_to_string(path) {
        Ok(content) => match serde_json::from_str::<T>(&content) {
            Ok(config) => (config, ConfigSource::Loaded),
            Err(e) => (T::default(), ConfigSource::Invalid(e.to_string())),
        },
        Err(_) => (T::default(), ConfigSource::Missing),
    }
}

pub fn log_config_source(label: &str, path: &Path, source: &ConfigSource) {
    match source {
        ConfigSource::Loaded => {
            tracing::info!(config = label, path = %path.display(), "loaded config")
        }
        ConfigSource::Missing => {
            tracing::info!(config = label, path = %path.display(), "no config file, using defaults")
        }
        ConfigSource::Invalid(error) => tracing::warn!(
            config = label,
            path = %path.display(),
            error = %error,
            "failed to parse config, using defaults"
        ),
    }
}

/// Generic save for any Serde config type.
pub fn save_json_config<T: Serialize>(path: &Path, config: &T, label: &str) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|source| ConfigError::Io {
            path: parent.to_path_buf(),
            source,
        })?;
    }
    let json = serde_json::to_string_pretty(config)?;
    std::fs::write(path, json).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    tracing::info!(config = label, path = %path.display(), "saved config");
    Ok(())
}

/// Resolve an API key: check the direct `api_key` field first,
/// then fall back to reading the environment variable named in `api_key_env`.
pub fn resolve_api_key(api_key: &Option<String>, api_key_env: &Option<String>) -> Option<String> {
    if let Some(ref key) = api_key {
        if !key.is_empty() {
            return Some(key.clone());
        }
    }
    if let Some(ref env_var) = api_key_env {
        if let Ok(key) = std::env::var(env_var) {
            if !key.is_empty() {
                return Some(key);
            }
        }
    }
    None
}
