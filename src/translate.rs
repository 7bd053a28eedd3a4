//! Article translation providers.
//!
//! A closed set of providers selected by configuration. Only the ingestion
//! pipeline is load-bearing; translation is an optional enrichment, so the
//! API-backed providers are placeholders that report themselves as
//! unavailable until an endpoint is wired up. Nothing in the fetch or
//! reconcile paths depends on this module.

use std::str::FromStr;

use crate::config::Config;

/// Supported translation backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TranslationProvider {
    /// Deterministic marker translation, for development and tests
    Dummy,
    Google,
    Deepl,
}

impl FromStr for TranslationProvider {
    type Err = UnknownProvider;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "dummy" => Ok(TranslationProvider::Dummy),
            "google" => Ok(TranslationProvider::Google),
            "deepl" => Ok(TranslationProvider::Deepl),
            other => Err(UnknownProvider(other.to_string())),
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("Unknown translation provider: {0}")]
pub struct UnknownProvider(String);

/// Translator selected from configuration.
pub struct Translator {
    provider: TranslationProvider,
    api_key: Option<String>,
}

impl Translator {
    /// Build the configured provider. An unrecognized provider name falls
    /// back to [`TranslationProvider::Dummy`] with a warning rather than
    /// failing startup.
    pub fn from_config(config: &Config) -> Self {
        let provider = config
            .translation_provider
            .parse::<TranslationProvider>()
            .unwrap_or_else(|err| {
                tracing::warn!(error = %err, "falling back to dummy translator");
                TranslationProvider::Dummy
            });
        Self {
            provider,
            api_key: config.translation_api_key.clone(),
        }
    }

    pub fn provider(&self) -> TranslationProvider {
        self.provider
    }

    /// Translate `text` into `target_lang`. `None` when the provider could
    /// not produce a translation.
    pub fn translate(&self, text: &str, target_lang: &str) -> Option<String> {
        match self.provider {
            TranslationProvider::Dummy => Some(format!("[{}] {}", target_lang, text)),
            TranslationProvider::Google | TranslationProvider::Deepl => {
                if self.api_key.is_none() {
                    tracing::warn!(provider = ?self.provider, "translation API key not configured");
                } else {
                    tracing::warn!(provider = ?self.provider, "translation API not wired up");
                }
                None
            }
        }
    }
}
