//! TOML configuration.
//!
//! Every section except `[db]` and `[remote]` is optional and falls back to
//! the defaults below. [`load_config`] validates the result; any failure is
//! fatal before the remote API or the database is touched.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use contact_harvest_core::client::MAX_DETAIL_BATCH;
use contact_harvest_core::normalize::DEFAULT_PLACEHOLDER_AVATAR;
use contact_harvest_core::resolver::ResolveOptions;
use contact_harvest_core::walker::WalkLimits;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    pub remote: RemoteConfig,
    #[serde(default)]
    pub harvest: HarvestConfig,
    #[serde(default)]
    pub notify: NotifyConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
    #[serde(default = "default_busy_timeout_secs")]
    pub busy_timeout_secs: u64,
}

fn default_busy_timeout_secs() -> u64 {
    5
}

#[derive(Debug, Deserialize, Clone)]
pub struct RemoteConfig {
    pub base_url: String,
    /// Account the remote API acts as; sent as `Wxid` on every call.
    pub account: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct HarvestConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_max_pages")]
    pub max_pages: usize,
    #[serde(default = "default_max_stalled_pages")]
    pub max_stalled_pages: usize,
    #[serde(default = "default_placeholder_avatar")]
    pub placeholder_avatar: String,
}

impl Default for HarvestConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            concurrency: default_concurrency(),
            max_pages: default_max_pages(),
            max_stalled_pages: default_max_stalled_pages(),
            placeholder_avatar: default_placeholder_avatar(),
        }
    }
}

fn default_chunk_size() -> usize {
    MAX_DETAIL_BATCH
}
fn default_concurrency() -> usize {
    4
}
fn default_max_pages() -> usize {
    10_000
}
fn default_max_stalled_pages() -> usize {
    5
}
fn default_placeholder_avatar() -> String {
    DEFAULT_PLACEHOLDER_AVATAR.to_string()
}

impl HarvestConfig {
    pub fn walk_limits(&self) -> WalkLimits {
        WalkLimits {
            max_pages: self.max_pages,
            max_stalled_pages: self.max_stalled_pages,
        }
    }

    pub fn resolve_options(&self) -> ResolveOptions {
        ResolveOptions {
            chunk_size: self.chunk_size,
            concurrency: self.concurrency,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct NotifyConfig {
    /// Identifier that receives completion and failure messages.
    #[serde(default)]
    pub operator: Option<String>,
    #[serde(default = "default_on_success")]
    pub on_success: bool,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            operator: None,
            on_success: true,
        }
    }
}

fn default_on_success() -> bool {
    true
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
        }
    }
}

fn default_level() -> String {
    "info".to_string()
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    parse_config(&content)
}

pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;

    if config.db.path.as_os_str().is_empty() {
        anyhow::bail!("db.path must not be empty");
    }

    // Validate remote
    let base_url = config.remote.base_url.trim();
    if base_url.is_empty() {
        anyhow::bail!("remote.base_url must not be empty");
    }
    if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
        anyhow::bail!(
            "remote.base_url must start with http:// or https://, got '{}'",
            base_url
        );
    }
    if config.remote.account.trim().is_empty() {
        anyhow::bail!("remote.account must not be empty");
    }
    if config.remote.timeout_secs == 0 {
        anyhow::bail!("remote.timeout_secs must be > 0");
    }

    // Validate harvest
    if !(1..=MAX_DETAIL_BATCH).contains(&config.harvest.chunk_size) {
        anyhow::bail!(
            "harvest.chunk_size must be in [1, {}], got {}",
            MAX_DETAIL_BATCH,
            config.harvest.chunk_size
        );
    }
    if config.harvest.concurrency == 0 {
        anyhow::bail!("harvest.concurrency must be >= 1");
    }
    if config.harvest.max_pages == 0 {
        anyhow::bail!("harvest.max_pages must be >= 1");
    }
    if config.harvest.max_stalled_pages == 0 {
        anyhow::bail!("harvest.max_stalled_pages must be >= 1");
    }

    if let Some(operator) = &config.notify.operator {
        if operator.trim().is_empty() {
            anyhow::bail!("notify.operator must not be blank when set");
        }
    }

    Ok(config)
}
