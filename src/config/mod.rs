//! Service configuration
//!
//! Read once at startup from a TOML file. Every field is optional.

use crate::collectors::PluginFilter;
use crate::error::ConfigError;
use crate::subscriptions::observers::DEFAULT_CHUNK_SIZE;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Only superusers may run `error_alert` commands
    pub error_alert_superuser_only: bool,
    /// User ids treated as superusers
    pub superusers: Vec<String>,
    /// Directory holding persisted state
    pub data_dir: PathBuf,
    /// Only alert on errors raised through these plugins
    pub plugin_allowlist: Option<Vec<String>>,
    /// Never alert on errors raised through these plugins
    pub plugin_denylist: Option<Vec<String>>,
    /// Messages per aggregated batch when flushing a digest
    pub aggregate_chunk_size: usize,
    /// Bots to connect at startup
    pub bots: Vec<BotConfig>,
}

/// Kind of bot connection
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BotKind {
    Webhook,
    Console,
}

/// One bot connection
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BotConfig {
    pub id: String,
    pub kind: BotKind,
    /// Endpoint, required for webhook bots
    #[serde(default)]
    pub url: Option<String>,
    /// Whether the bot accepts aggregated message batches
    #[serde(default)]
    pub aggregated: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            error_alert_superuser_only: true,
            superusers: Vec::new(),
            data_dir: PathBuf::from("./data"),
            plugin_allowlist: None,
            plugin_denylist: None,
            aggregate_chunk_size: DEFAULT_CHUNK_SIZE,
            bots: Vec::new(),
        }
    }
}

impl Config {
    /// Load and validate configuration from a TOML file
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ReadError` if the file cannot be read, or a
    /// parse / validation error if its content is invalid.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadError(format!("{}: {}", path.display(), e)))?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` when both plugin lists are
    /// set, the chunk size is zero, a webhook bot has no url, or two bots
    /// share an id.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.plugin_allowlist.is_some() && self.plugin_denylist.is_some() {
            return Err(ConfigError::ValidationError(
                "plugin_allowlist and plugin_denylist are mutually exclusive".to_string(),
            ));
        }

        if self.aggregate_chunk_size == 0 {
            return Err(ConfigError::ValidationError(
                "aggregate_chunk_size must be greater than 0".to_string(),
            ));
        }

        let mut ids = HashSet::new();
        for bot in &self.bots {
            if !ids.insert(bot.id.as_str()) {
                return Err(ConfigError::ValidationError(format!(
                    "duplicate bot id '{}'",
                    bot.id
                )));
            }
            if bot.kind == BotKind::Webhook && bot.url.as_deref().map_or(true, str::is_empty) {
                return Err(ConfigError::ValidationError(format!(
                    "webhook bot '{}' requires a url",
                    bot.id
                )));
            }
        }

        Ok(())
    }

    /// Plugin filter described by the allow / deny lists
    pub fn plugin_filter(&self) -> PluginFilter {
        PluginFilter::from_lists(self.plugin_allowlist.clone(), self.plugin_denylist.clone())
    }

    /// Whether `user_id` may run `error_alert` commands
    pub fn is_permitted(&self, user_id: &str) -> bool {
        !self.error_alert_superuser_only || self.superusers.iter().any(|u| u == user_id)
    }
}
