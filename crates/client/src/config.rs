// Client configuration: `~/.notesync/config.toml`, then environment
// overrides.

use std::path::{Path, PathBuf};
use std::time::Duration;

use notesync_common::protocol::rest::validate_api_base_url;
use notesync_common::protocol::ws::validate_ws_base_url;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::autosave::debounce::DEFAULT_DEBOUNCE_MS;
use crate::autosave::AutosaveConfig;

const DEFAULT_API_BASE_URL: &str = "http://localhost:8080";
const DEFAULT_WS_BASE_URL: &str = "ws://localhost:8080";
const DEFAULT_LOG_FILTER: &str = "info";

/// Root directory for client state: `~/.notesync/`.
pub fn global_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|h| h.join(".notesync"))
}

/// Path to the config file: `~/.notesync/config.toml`.
pub fn global_config_path() -> Option<PathBuf> {
    global_dir().map(|d| d.join("config.toml"))
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ClientConfig {
    /// REST base for snapshot storage (e.g. `https://api.example.com`).
    pub api_base_url: String,
    /// Websocket base for live note rooms (e.g. `wss://sync.example.com`).
    pub ws_base_url: String,
    pub log_filter: String,
    pub autosave: AutosaveSection,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            ws_base_url: DEFAULT_WS_BASE_URL.to_string(),
            log_filter: DEFAULT_LOG_FILTER.to_string(),
            autosave: AutosaveSection::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct AutosaveSection {
    pub debounce_ms: u64,
    pub mirror_legacy_content: bool,
}

impl Default for AutosaveSection {
    fn default() -> Self {
        Self { debounce_ms: DEFAULT_DEBOUNCE_MS, mirror_legacy_content: false }
    }
}

impl ClientConfig {
    /// Load `~/.notesync/config.toml` (defaults when absent), apply the
    /// process environment, and validate.
    pub fn load() -> Result<Self, ConfigError> {
        let base = match global_config_path() {
            Some(path) if path.exists() => Self::load_from(&path)?,
            _ => Self::default(),
        };
        let config = base.with_env_fn(|key| std::env::var(key));
        config.validate()?;
        Ok(config)
    }

    /// Load from a specific path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(ConfigError::Io)?;
        toml::from_str(&contents).map_err(ConfigError::Parse)
    }

    /// Apply `NOTESYNC_*` overrides from an environment lookup function.
    /// Unparseable numeric or boolean values are ignored.
    pub fn with_env_fn<F>(mut self, env: F) -> Self
    where
        F: Fn(&str) -> Result<String, std::env::VarError>,
    {
        if let Ok(url) = env("NOTESYNC_API_BASE_URL") {
            self.api_base_url = url;
        }
        if let Ok(url) = env("NOTESYNC_WS_BASE_URL") {
            self.ws_base_url = url;
        }
        if let Ok(filter) = env("NOTESYNC_LOG_FILTER") {
            self.log_filter = filter;
        }
        if let Some(ms) = env("NOTESYNC_AUTOSAVE_DEBOUNCE_MS").ok().and_then(|v| v.parse().ok()) {
            self.autosave.debounce_ms = ms;
        }
        if let Some(mirror) =
            env("NOTESYNC_MIRROR_LEGACY_CONTENT").ok().and_then(|v| parse_bool(&v))
        {
            self.autosave.mirror_legacy_content = mirror;
        }
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_api_base_url(&self.api_base_url)
            .map_err(|error| ConfigError::Invalid(error.to_string()))?;
        validate_ws_base_url(&self.ws_base_url)
            .map_err(|error| ConfigError::Invalid(error.to_string()))?;
        if self.autosave.debounce_ms == 0 {
            return Err(ConfigError::Invalid("autosave.debounce_ms must be positive".into()));
        }
        Ok(())
    }

    pub fn autosave_config(&self) -> AutosaveConfig {
        AutosaveConfig {
            debounce: Duration::from_millis(self.autosave.debounce_ms),
            mirror_legacy_content: self.autosave.mirror_legacy_content,
        }
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

// ── Errors ─────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config I/O error: {0}")]
    Io(std::io::Error),
    #[error("config parse error: {0}")]
    Parse(toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}
