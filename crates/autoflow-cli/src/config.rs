//! Configuration for the `autoflow` binary.
//!
//! Values come from `config/default.toml` (every key optional), then from
//! `AUTOFLOW_*` environment variables, which win.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use autoflow_adapters::{
    ChatAdapter, CredentialProvider, MailAdapter, NotesAdapter, RetryPolicy,
    TextGenerationAdapter, http, text_generation,
};
use autoflow_engine::{AdapterSet, EngineConfig};
use serde::Deserialize;

/// Location used when `--config` is not given. A missing file is fine.
pub const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub engine: EngineSection,
    pub store: StoreSection,
    pub logging: LoggingSection,
    pub mail: ServiceSection,
    pub notes: ServiceSection,
    pub chat: ServiceSection,
    pub text_generation: TextGenerationSection,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct EngineSection {
    pub step_timeout_secs: u64,
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            step_timeout_secs: 300,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct StoreSection {
    pub db_path: PathBuf,
}

impl Default for StoreSection {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("data/autoflow.db"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Compact,
    Json,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: LogFormat::Compact,
        }
    }
}

/// Endpoint settings shared by the mail, notes and chat adapters.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ServiceSection {
    pub base_url: Option<String>,
    pub timeout_secs: u64,
}

impl Default for ServiceSection {
    fn default() -> Self {
        Self {
            base_url: None,
            timeout_secs: http::DEFAULT_TIMEOUT.as_secs(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct TextGenerationSection {
    pub base_url: Option<String>,
    pub model: Option<String>,
    /// Per attempt.
    pub timeout_secs: u64,
    pub max_attempts: u32,
    pub base_delay_ms: u64,
}

impl Default for TextGenerationSection {
    fn default() -> Self {
        let retry = RetryPolicy::default();
        Self {
            base_url: None,
            model: None,
            timeout_secs: text_generation::DEFAULT_TIMEOUT.as_secs(),
            max_attempts: retry.max_attempts,
            base_delay_ms: u64::try_from(retry.base_delay.as_millis()).unwrap_or(1000),
        }
    }
}

impl AppConfig {
    /// Read the file at `path` (or the default location) and apply
    /// environment overrides. An explicit path must exist.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => {
                let text = std::fs::read_to_string(path)
                    .with_context(|| format!("failed to read config file {}", path.display()))?;
                Self::from_toml_str(&text)
                    .with_context(|| format!("invalid config file {}", path.display()))?
            }
            None => match std::fs::read_to_string(DEFAULT_CONFIG_PATH) {
                Ok(text) => Self::from_toml_str(&text)
                    .with_context(|| format!("invalid config file {DEFAULT_CONFIG_PATH}"))?,
                Err(_) => Self::default(),
            },
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    pub fn from_toml_str(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Apply `AUTOFLOW_*` overrides read through `lookup`.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(path) = get("AUTOFLOW_DB_PATH") {
            self.store.db_path = PathBuf::from(path);
        }
        if let Some(level) = get("AUTOFLOW_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(format) = get("AUTOFLOW_LOG_FORMAT") {
            self.logging.format = match format.to_ascii_lowercase().as_str() {
                "json" => LogFormat::Json,
                "compact" => LogFormat::Compact,
                other => bail!("AUTOFLOW_LOG_FORMAT must be `compact` or `json`, got `{other}`"),
            };
        }
        if let Some(secs) = get("AUTOFLOW_STEP_TIMEOUT_SECS") {
            self.engine.step_timeout_secs = secs
                .trim()
                .parse()
                .with_context(|| format!("AUTOFLOW_STEP_TIMEOUT_SECS is not a number: {secs}"))?;
        }
        if let Some(model) = get("AUTOFLOW_AI_MODEL") {
            self.text_generation.model = Some(model);
        }
        if let Some(url) = get("AUTOFLOW_AI_BASE_URL") {
            self.text_generation.base_url = Some(url);
        }
        Ok(())
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig::default().with_step_timeout(Duration::from_secs(self.engine.step_timeout_secs.max(1)))
    }

    /// Build the HTTP adapters described by this configuration.
    pub fn adapters(&self, credentials: Arc<dyn CredentialProvider>) -> AdapterSet {
        let mut mail = MailAdapter::new("mail", Arc::clone(&credentials))
            .with_timeout(Duration::from_secs(self.mail.timeout_secs));
        if let Some(url) = &self.mail.base_url {
            mail = mail.with_base_url(url.clone());
        }

        let mut notes = NotesAdapter::new("notes", Arc::clone(&credentials))
            .with_timeout(Duration::from_secs(self.notes.timeout_secs));
        if let Some(url) = &self.notes.base_url {
            notes = notes.with_base_url(url.clone());
        }

        let mut chat = ChatAdapter::new("chat", Arc::clone(&credentials))
            .with_timeout(Duration::from_secs(self.chat.timeout_secs));
        if let Some(url) = &self.chat.base_url {
            chat = chat.with_base_url(url.clone());
        }

        let ai = &self.text_generation;
        let mut text = TextGenerationAdapter::new("text_generation", credentials)
            .with_timeout(Duration::from_secs(ai.timeout_secs))
            .with_retry_policy(RetryPolicy {
                max_attempts: ai.max_attempts.max(1),
                base_delay: Duration::from_millis(ai.base_delay_ms),
            });
        if let Some(url) = &ai.base_url {
            text = text.with_base_url(url.clone());
        }
        if let Some(model) = &ai.model {
            text = text.with_model(model.clone());
        }

        AdapterSet::new(Arc::new(mail), Arc::new(notes), Arc::new(chat), Arc::new(text))
    }
}
