use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use forum_harness_core::models::SortOrder;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    pub forum: ForumConfig,
    #[serde(default)]
    pub analysis: AnalysisConfig,
    #[serde(default)]
    pub batch: BatchConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ForumConfig {
    pub base_url: String,
    #[serde(default = "default_listing_path")]
    pub listing_path: String,
    /// Environment variable holding the API key, if the forum needs one.
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default)]
    pub api_username_env: Option<String>,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_forum_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_forum_max_retries")]
    pub max_retries: u32,
}

fn default_listing_path() -> String {
    "/latest.json".to_string()
}
fn default_user_agent() -> String {
    format!("forum-harness/{}", env!("CARGO_PKG_VERSION"))
}
fn default_forum_timeout_secs() -> u64 {
    30
}
fn default_forum_max_retries() -> u32 {
    2
}

#[derive(Debug, Deserialize, Clone)]
pub struct AnalysisConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_analysis_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            provider: "disabled".to_string(),
            model: None,
            url: None,
            timeout_secs: 120,
            max_tokens: 2000,
            temperature: 0.2,
        }
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_analysis_timeout_secs() -> u64 {
    120
}
fn default_max_tokens() -> u32 {
    2000
}
fn default_temperature() -> f32 {
    0.2
}

impl AnalysisConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct BatchConfig {
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_lease_secs")]
    pub lease_secs: u64,
    #[serde(default)]
    pub retry_call_failures: u32,
    #[serde(default)]
    pub order: SortOrder,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            concurrency: 1,
            lease_secs: 600,
            retry_call_failures: 0,
            order: SortOrder::NewestFirst,
        }
    }
}

fn default_concurrency() -> usize {
    1
}
fn default_lease_secs() -> u64 {
    600
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

/// Reject configurations that would fail mid-run.
pub fn validate(config: &Config) -> Result<()> {
    // Validate forum
    let base = config.forum.base_url.trim();
    if !(base.starts_with("http://") || base.starts_with("https://")) {
        bail!("forum.base_url must be an http(s) URL, got '{}'", base);
    }
    if !config.forum.listing_path.starts_with('/') {
        bail!("forum.listing_path must start with '/'");
    }
    if config.forum.timeout_secs == 0 {
        bail!("forum.timeout_secs must be > 0");
    }

    // Validate analysis
    if config.analysis.timeout_secs == 0 {
        bail!("analysis.timeout_secs must be > 0");
    }
    match config.analysis.provider.as_str() {
        "disabled" => {}
        "openai" | "ollama" => {
            if config.analysis.model.is_none() {
                bail!(
                    "analysis.model must be specified when provider is '{}'",
                    config.analysis.provider
                );
            }
        }
        "http" => {
            if config.analysis.url.is_none() {
                bail!("analysis.url must be specified when provider is 'http'");
            }
        }
        other => bail!(
            "Unknown analysis provider: '{}'. Must be disabled, openai, ollama, or http.",
            other
        ),
    }

    // Validate batch
    if config.batch.concurrency == 0 {
        bail!("batch.concurrency must be >= 1");
    }
    if config.batch.lease_secs <= config.analysis.timeout_secs {
        bail!(
            "batch.lease_secs ({}) must exceed analysis.timeout_secs ({})",
            config.batch.lease_secs,
            config.analysis.timeout_secs
        );
    }

    Ok(())
}
