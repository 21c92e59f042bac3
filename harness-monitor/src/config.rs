//! Configuration loading and parsing

use anyhow::{Context, Result};
use harness_diag::DiagnosticsConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Main application configuration (loaded from config.toml)
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    #[serde(default)]
    pub catalog: CatalogConfig,
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default)]
    pub webhook: Option<WebhookConfig>,
    /// Missing table means the three-ECU harness preset
    #[serde(default = "DiagnosticsConfig::harness_demo")]
    pub diagnostics: DiagnosticsConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            catalog: CatalogConfig::default(),
            output: OutputConfig::default(),
            webhook: None,
            diagnostics: DiagnosticsConfig::harness_demo(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct CatalogConfig {
    #[serde(default)]
    pub dbc_files: Vec<PathBuf>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OutputConfig {
    /// Directory for the CSV frame log; no log when unset
    pub csv_dir: Option<PathBuf>,
    #[serde(default = "default_report_interval")]
    pub report_interval_secs: u64,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            csv_dir: None,
            report_interval_secs: default_report_interval(),
        }
    }
}

fn default_report_interval() -> u64 {
    1
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WebhookConfig {
    pub url: String,
    #[serde(default = "default_webhook_timeout")]
    pub timeout_secs: u64,
    /// Events waiting for the worker; overflow is dropped
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

impl WebhookConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            timeout_secs: default_webhook_timeout(),
            queue_capacity: default_queue_capacity(),
        }
    }
}

fn default_webhook_timeout() -> u64 {
    5
}

fn default_queue_capacity() -> usize {
    64
}

/// Load configuration from a TOML file
pub fn load_config(path: &Path) -> Result<AppConfig> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;

    let config: AppConfig = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {:?}", path))?;

    config
        .diagnostics
        .validate()
        .with_context(|| format!("Invalid diagnostics in config file: {:?}", path))?;

    if let Some(webhook) = &config.webhook {
        if webhook.queue_capacity == 0 {
            anyhow::bail!("webhook.queue_capacity must be at least 1");
        }
    }

    Ok(config)
}
