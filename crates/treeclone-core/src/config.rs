//! Configuration system for treeclone.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $TREECLONE_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/treeclone/config.toml
//!   3. ~/.config/treeclone/config.toml

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::chunk::DEFAULT_CHUNK_SIZE;

/// Default relay listening port.
pub const DEFAULT_RELAY_PORT: u16 = 8080;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TreecloneConfig {
    pub relay: RelayConfig,
    pub peer: PeerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Interface address the relay binds to.
    pub bind: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PeerConfig {
    pub relay_host: String,
    pub relay_port: u16,
    /// Logical address of this peer. Empty = auto-detect the outbound IPv4.
    pub address: String,
    /// Directory scanned and served to requesters.
    pub root_dir: PathBuf,
    /// Where snapshots received in Responses are stored.
    pub snapshot_dir: PathBuf,
    /// Where the per-responder selection lists are saved on `summary`.
    pub manifest_dir: PathBuf,
    /// Bytes per Cloning chunk. 0 = default.
    pub chunk_size: usize,
}

// ── Defaults ──────────────────────────────────────────────────────────────────

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".to_string(),
            port: DEFAULT_RELAY_PORT,
        }
    }
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self {
            relay_host: "127.0.0.1".to_string(),
            relay_port: DEFAULT_RELAY_PORT,
            address: String::new(),
            root_dir: dirs_or_home(),
            snapshot_dir: data_dir().join("snapshots"),
            manifest_dir: data_dir().join("manifests"),
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".config"))
        .join("treeclone")
}

pub fn data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".local").join("share"))
        .join("treeclone")
}

fn dirs_or_home() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),
    #[error("failed to parse {0}: {1}")]
    ParseFailed(PathBuf, toml::de::Error),
    #[error("failed to write {0}: {1}")]
    WriteFailed(PathBuf, std::io::Error),
    #[error("failed to serialize: {0}")]
    SerializeFailed(toml::ser::Error),
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl TreecloneConfig {
    /// Load config: env vars → file → defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::file_path();
        let mut config = if path.exists() {
            let text = std::fs::read_to_string(&path)
                .map_err(|e| ConfigError::ReadFailed(path.clone(), e))?;
            Self::from_toml(&text).map_err(|e| ConfigError::ParseFailed(path.clone(), e))?
        } else {
            TreecloneConfig::default()
        };
        config.apply_env_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn from_toml(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("TREECLONE_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_dir().join("config.toml"))
    }

    /// Write default config if none exists. Returns the path.
    pub fn write_default_if_missing() -> Result<PathBuf, ConfigError> {
        let path = Self::file_path();
        if !path.exists() {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
            }
            let text = toml::to_string_pretty(&TreecloneConfig::default())
                .map_err(ConfigError::SerializeFailed)?;
            std::fs::write(&path, text).map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
        }
        Ok(path)
    }

    /// Apply TREECLONE_* overrides. `lookup` is `std::env::var` in production.
    fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup("TREECLONE_RELAY__PORT") {
            if let Ok(p) = v.parse() {
                self.relay.port = p;
            }
        }
        if let Some(v) = lookup("TREECLONE_PEER__RELAY_HOST") {
            self.peer.relay_host = v;
        }
        if let Some(v) = lookup("TREECLONE_PEER__RELAY_PORT") {
            if let Ok(p) = v.parse() {
                self.peer.relay_port = p;
            }
        }
        if let Some(v) = lookup("TREECLONE_PEER__ADDRESS") {
            self.peer.address = v;
        }
        if let Some(v) = lookup("TREECLONE_PEER__ROOT_DIR") {
            self.peer.root_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("TREECLONE_PEER__MANIFEST_DIR") {
            self.peer.manifest_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("TREECLONE_PEER__CHUNK_SIZE") {
            if let Ok(n) = v.parse() {
                self.peer.chunk_size = n;
            }
        }
    }
}
