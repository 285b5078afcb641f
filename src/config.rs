//! Settings parsing, validation, and credential loading.

use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::warn;

use crate::model::EngineId;
use crate::{AppError, Result};

/// Nested Telegram configuration.
///
/// The bot token is loaded at runtime via OS keychain or environment
/// variables, never from the TOML config file.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct TelegramConfig {
    /// Chat ids the bridge accepts messages from.
    pub allowed_chat_ids: Vec<i64>,
    /// Bot API token (populated at runtime).
    #[serde(skip)]
    pub bot_token: String,
}

/// Per-engine overrides.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct EngineConfig {
    /// Whether this engine is registered at all.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Override for the engine binary name or path.
    #[serde(default)]
    pub program: Option<String>,
    /// Extra arguments appended to every invocation.
    #[serde(default)]
    pub extra_args: Vec<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            program: None,
            extra_args: Vec::new(),
        }
    }
}

fn default_true() -> bool {
    true
}

/// Progress rendering and edit throttling knobs.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct ProgressConfig {
    /// Character budget for the progress body.
    #[serde(default = "default_char_budget")]
    pub char_budget: usize,
    /// Minimum interval between two progress edits.
    #[serde(default = "default_min_edit_interval_ms")]
    pub min_edit_interval_ms: u64,
    /// Number of recent actions shown in the progress body.
    #[serde(default = "default_max_actions")]
    pub max_actions: usize,
}

impl Default for ProgressConfig {
    fn default() -> Self {
        Self {
            char_budget: default_char_budget(),
            min_edit_interval_ms: default_min_edit_interval_ms(),
            max_actions: default_max_actions(),
        }
    }
}

fn default_char_budget() -> usize {
    3500
}

fn default_min_edit_interval_ms() -> u64 {
    1500
}

fn default_max_actions() -> usize {
    5
}

fn default_transport() -> String {
    "telegram".into()
}

fn default_engine() -> String {
    "codex".into()
}

/// Global configuration parsed from `takopi.toml`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct TakopiConfig {
    /// Transport backend id.
    #[serde(default = "default_transport")]
    pub transport: String,
    /// Engine used when no directive or resume token selects one.
    #[serde(default = "default_engine")]
    pub default_engine: String,
    /// Deliver the final response as a new message instead of an edit.
    #[serde(default = "default_true")]
    pub final_notify: bool,
    /// Telegram connectivity settings.
    pub telegram: TelegramConfig,
    /// Per-engine overrides keyed by engine id.
    #[serde(default)]
    pub engines: HashMap<String, EngineConfig>,
    /// Progress rendering knobs.
    #[serde(default)]
    pub progress: ProgressConfig,
}

impl TakopiConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path).map_err(|err| {
            AppError::Config(format!(
                "cannot read config file '{}': {err} — run `takopi` after creating it, \
                 or pass --config <path>",
                path.display()
            ))
        })?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string and validate it.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Default config path: `~/.config/takopi/takopi.toml`.
    #[must_use]
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("takopi")
            .join("takopi.toml")
    }

    /// Per-user state directory holding the instance lockfile.
    #[must_use]
    pub fn state_dir() -> PathBuf {
        dirs::state_dir()
            .or_else(dirs::data_local_dir)
            .unwrap_or_else(|| PathBuf::from("."))
            .join("takopi")
    }

    /// Load the bot token from OS keychain with env-var fallback.
    ///
    /// Tries the `takopi` keyring service first, then falls back to the
    /// `TELEGRAM_BOT_TOKEN` environment variable.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if neither source provides the token.
    pub async fn load_credentials(&mut self) -> Result<()> {
        self.telegram.bot_token = load_credential("telegram_bot_token", "TELEGRAM_BOT_TOKEN").await?;
        Ok(())
    }

    /// Overrides for one engine; defaults when the table has no entry.
    #[must_use]
    pub fn engine_config(&self, engine: &EngineId) -> EngineConfig {
        self.engines.get(engine.as_str()).cloned().unwrap_or_default()
    }

    fn validate(&self) -> Result<()> {
        if self.transport.trim().is_empty() {
            return Err(AppError::Config("transport must not be empty".into()));
        }
        EngineId::new(&self.default_engine)?;
        for id in self.engines.keys() {
            EngineId::new(id)?;
        }
        if self.telegram.allowed_chat_ids.is_empty() {
            return Err(AppError::Config(
                "telegram.allowed_chat_ids must not be empty".into(),
            ));
        }
        if self.progress.char_budget == 0 {
            return Err(AppError::Config(
                "progress.char_budget must be greater than zero".into(),
            ));
        }
        if self.progress.max_actions == 0 {
            return Err(AppError::Config(
                "progress.max_actions must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

/// Load a single credential from OS keychain with env-var fallback.
async fn load_credential(keyring_key: &str, env_key: &str) -> Result<String> {
    let key = keyring_key.to_owned();

    // Keyring is synchronous I/O; probe it off the runtime.
    let keychain_result = tokio::task::spawn_blocking(move || {
        keyring::Entry::new("takopi", &key).and_then(|entry| entry.get_password())
    })
    .await
    .map_err(|err| AppError::Config(format!("keychain task panicked: {err}")))?;

    match keychain_result {
        Ok(value) if !value.is_empty() => return Ok(value),
        Ok(_) => {
            warn!(key = keyring_key, "keychain entry is empty, trying env var");
        }
        Err(err) => {
            warn!(
                key = keyring_key,
                ?err,
                "keychain lookup failed, trying env var"
            );
        }
    }

    env::var(env_key).map_err(|_| {
        AppError::Config(format!(
            "credential {keyring_key} not found in keychain or {env_key} env var"
        ))
    })
}
