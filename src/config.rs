//! Configuration file parser for ~/.config/gleaner/config.toml.
//!
//! The config file is optional — a missing or empty file yields
//! `Config::default()`. Unknown keys are ignored by serde, though a
//! warning is logged to catch typos.
use serde::Deserialize;
use std::path::Path;
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),
}

// ============================================================================
// Configuration Struct
// ============================================================================

/// Top-level application configuration.
///
/// All fields use `#[serde(default)]` so any subset of keys can be
/// specified; missing keys fall back to `Default::default()`. The
/// translation API key is masked in `Debug` output so it cannot leak
/// through logs.
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// SQLite database path. Empty means the default location next to the
    /// config file.
    pub database_path: String,

    /// Base URL of an outbound forward proxy. Empty = fetch directly.
    pub proxy_base_url: String,

    /// Timeout for scheduled/manual feed fetches, in seconds.
    pub fetch_timeout_secs: u64,

    /// Shorter timeout used when subscribing interactively.
    pub add_timeout_secs: u64,

    /// Maximum feeds fetched concurrently in the all-feeds path.
    pub max_concurrency: usize,

    /// Default age cutoff for `prune`, in days.
    pub prune_after_days: i64,

    /// Translation backend: "dummy", "google", or "deepl".
    pub translation_provider: String,

    /// API key for the translation backend, if any.
    pub translation_api_key: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_path: String::new(),
            proxy_base_url: String::new(),
            fetch_timeout_secs: 30,
            add_timeout_secs: 10,
            max_concurrency: 8,
            prune_after_days: 30,
            translation_provider: "dummy".to_string(),
            translation_api_key: None,
        }
    }
}

/// Mask the translation API key in Debug output.
impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("database_path", &self.database_path)
            .field("proxy_base_url", &self.proxy_base_url)
            .field("fetch_timeout_secs", &self.fetch_timeout_secs)
            .field("add_timeout_secs", &self.add_timeout_secs)
            .field("max_concurrency", &self.max_concurrency)
            .field("prune_after_days", &self.prune_after_days)
            .field("translation_provider", &self.translation_provider)
            .field(
                "translation_api_key",
                &self.translation_api_key.as_ref().map(|_| "[REDACTED]"),
            )
            .finish()
    }
}

impl Config {
    /// Load configuration from a TOML file.
    ///
    /// - Missing file → `Ok(Config::default())`
    /// - Empty file → `Ok(Config::default())`
    /// - Invalid TOML → `Err(ConfigError::Parse)`
    /// - Unknown keys → accepted, logged as a warning
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No config file found, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
        };

        if content.trim().is_empty() {
            tracing::debug!(path = %path.display(), "Config file is empty, using defaults");
            return Ok(Self::default());
        }

        // Scan for unknown top-level keys so typos surface in the logs.
        if let Ok(raw) = content.parse::<toml::Table>() {
            let known_keys = [
                "database_path",
                "proxy_base_url",
                "fetch_timeout_secs",
                "add_timeout_secs",
                "max_concurrency",
                "prune_after_days",
                "translation_provider",
                "translation_api_key",
            ];
            for key in raw.keys() {
                if !known_keys.contains(&key.as_str()) {
                    tracing::warn!(key = %key, "Unknown key in config file, ignoring");
                }
            }
        }

        let config: Config = toml::from_str(&content)?;
        tracing::info!(path = %path.display(), "Loaded configuration");
        Ok(config)
    }

    pub fn fetch_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.fetch_timeout_secs)
    }

    pub fn add_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.add_timeout_secs)
    }

    /// The proxy base, or `None` when disabled.
    pub fn proxy_base(&self) -> Option<&str> {
        let base = self.proxy_base_url.trim();
        (!base.is_empty()).then_some(base)
    }
}

// ============================================================================
// Tests
// ============================================================================
