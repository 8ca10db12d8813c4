//! ==============================================================================
//! config.rs - Runtime Configuration Loader
//! ==============================================================================
//!
//! purpose:
//!     defines the schema for `chorecast.toml`.
//!     loads configuration from file or falls back to defaults.
//!
//! structure:
//!     - ServerConfig: where the webhook/api server listens.
//!     - LoggingConfig: default log level and payload verbosity.
//!     - EntryConfig: the chorecast entries to set up at startup.
//!
//! ==============================================================================

use crate::domain::{ConfigEntry, EntryData, EntryOptions, DEFAULT_WEBHOOK_ID};
use crate::flow::ENTRY_TITLE;

use anyhow::Context;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// env var naming an explicit config file
pub const CONFIG_ENV: &str = "CHORECAST_CONFIG";

/// Root configuration structure
#[derive(Debug, Deserialize, Clone, Default)]
pub struct HostConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default = "default_entries")]
    pub entries: Vec<EntryConfig>,
    /// where this config came from, for the startup summary
    #[serde(skip)]
    pub source: Option<PathBuf>,
    /// load problems hit before logging was up
    #[serde(skip)]
    pub warnings: Vec<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_level")]
    pub level: String,
    #[serde(default)]
    pub show_payloads: bool,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct EntryConfig {
    pub entry_id: String,
    #[serde(default = "default_title")]
    pub title: String,
    #[serde(default = "default_webhook_id")]
    pub webhook_id: String,
    #[serde(default)]
    pub options_webhook_id: Option<String>,
}

fn default_bind() -> String {
    "0.0.0.0:8123".to_string()
}

fn default_level() -> String {
    "info".to_string()
}

fn default_title() -> String {
    ENTRY_TITLE.to_string()
}

fn default_webhook_id() -> String {
    DEFAULT_WEBHOOK_ID.to_string()
}

fn default_entries() -> Vec<EntryConfig> {
    vec![EntryConfig {
        entry_id: "chorecast".to_string(),
        title: default_title(),
        webhook_id: default_webhook_id(),
        options_webhook_id: None,
    }]
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { bind: default_bind() }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            show_payloads: false,
        }
    }
}

impl EntryConfig {
    pub fn to_entry(&self) -> ConfigEntry {
        ConfigEntry {
            entry_id: self.entry_id.clone(),
            title: self.title.clone(),
            data: EntryData {
                webhook_id: self.webhook_id.clone(),
            },
            options: EntryOptions {
                webhook_id: self.options_webhook_id.clone(),
            },
        }
    }
}

impl HostConfig {
    /// Load configuration from file
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file {}", path.as_ref().display()))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> anyhow::Result<Self> {
        let config: HostConfig = toml::from_str(content).context("Failed to parse config")?;
        Ok(config)
    }

    /// Load with default fallback
    ///
    /// runs before tracing is initialised, so problems are kept in
    /// `warnings` and reported by `log_summary`.
    pub fn load_or_default() -> Self {
        let mut warnings = Vec::new();
        let paths: Vec<PathBuf> = match std::env::var(CONFIG_ENV) {
            Ok(path) => vec![PathBuf::from(path)],
            Err(_) => vec![
                PathBuf::from("config").join("chorecast.toml"),
                PathBuf::from("..").join("config").join("chorecast.toml"),
            ],
        };

        for path in &paths {
            if path.exists() {
                match Self::load(path) {
                    Ok(mut config) => {
                        config.source = Some(path.clone());
                        return config;
                    }
                    Err(e) => warnings.push(format!("Failed to load {}: {:#}", path.display(), e)),
                }
            }
        }

        warnings.push("No config file found - using defaults".to_string());
        Self {
            entries: default_entries(),
            warnings,
            ..Self::default()
        }
    }

    pub fn config_entries(&self) -> Vec<ConfigEntry> {
        self.entries.iter().map(EntryConfig::to_entry).collect()
    }

    /// Log configuration summary
    pub fn log_summary(&self) {
        for warning in &self.warnings {
            tracing::warn!("[CONFIG] {}", warning);
        }
        if let Some(source) = &self.source {
            tracing::info!("[CONFIG] Loaded from {}", source.display());
        }
        tracing::info!(
            bind = %self.server.bind,
            level = %self.logging.level,
            entries = self.entries.len(),
            "[CONFIG] host configuration"
        );
    }
}
