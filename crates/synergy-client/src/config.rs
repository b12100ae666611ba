//! TOML configuration persistence.
//!
//! Reads `AppConfig` from the platform-appropriate config file:
//! - Windows:  `%APPDATA%\Synergy\synergyc.toml`
//! - Linux:    `~/.config/synergy/synergyc.toml`
//! - macOS:    `~/Library/Application Support/Synergy/synergyc.toml`
//!
//! Every field has a serde default, so a missing file or a partial file
//! behaves like the built-in defaults and command-line flags stay the source
//! of truth when passed.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error type for configuration file operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A file system I/O error occurred.
    #[error("I/O error accessing config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be parsed.
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),
}

// ── Config schema ─────────────────────────────────────────────────────────────

/// Top-level client configuration stored on disk.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AppConfig {
    #[serde(default)]
    pub client: ClientSection,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClientSection {
    /// Screen name; the hostname when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Server address as `[host][:port]`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server: Option<String>,
    /// Vertical scroll delta per wheel notch.
    #[serde(default = "default_yscroll")]
    pub yscroll: i32,
    /// Reconnect automatically when the connection drops.
    #[serde(default = "default_true")]
    pub restart: bool,
}

impl Default for ClientSection {
    fn default() -> Self {
        Self {
            name: None,
            server: None,
            yscroll: default_yscroll(),
            restart: default_true(),
        }
    }
}

fn default_yscroll() -> i32 {
    120
}

fn default_true() -> bool {
    true
}

// ── Loading ───────────────────────────────────────────────────────────────────

/// Resolves the default config file path for this platform, if one exists
/// for the environment.
pub fn default_config_path() -> Option<PathBuf> {
    platform_config_dir().map(|dir| dir.join("synergyc.toml"))
}

/// Loads the config from `path`, or from the platform default when `path`
/// is `None`.  A missing file yields `AppConfig::default()`.
pub fn load_config(path: Option<&Path>) -> Result<AppConfig, ConfigError> {
    let path = match path {
        Some(path) => path.to_path_buf(),
        None => match default_config_path() {
            Some(path) => path,
            None => return Ok(AppConfig::default()),
        },
    };
    match std::fs::read_to_string(&path) {
        Ok(content) => Ok(toml::from_str(&content)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(AppConfig::default()),
        Err(source) => Err(ConfigError::Io { path, source }),
    }
}

fn platform_config_dir() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA").map(|p| PathBuf::from(p).join("Synergy"))
    }

    #[cfg(target_os = "linux")]
    {
        let base = std::env::var_os("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".config")))?;
        Some(base.join("synergy"))
    }

    #[cfg(target_os = "macos")]
    {
        std::env::var_os("HOME").map(|h| {
            PathBuf::from(h)
                .join("Library")
                .join("Application Support")
                .join("Synergy")
        })
    }

    #[cfg(not(any(target_os = "windows", target_os = "linux", target_os = "macos")))]
    {
        None
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
