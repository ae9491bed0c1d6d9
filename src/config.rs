//! Configuration management for Page-Harvest

use crate::engine::ContentMode;
use crate::loader::Configuration;
use crate::{Error, Result};
use serde::Deserialize;
use std::env;
use std::path::Path;
use std::time::Duration;

/// Harvester configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// CDP endpoint of the browser
    pub cdp_endpoint: String,

    /// Readiness timeout in milliseconds
    pub timeout_ms: u64,

    /// Debounce window in milliseconds
    pub debounce_ms: u64,

    /// Grace window in milliseconds
    pub grace_ms: u64,

    /// Per-evaluation timeout in milliseconds (0 disables it)
    pub script_timeout_ms: u64,

    /// Block images, stylesheets, media and fonts
    pub block_resources: bool,

    /// Allow page scripts
    pub allow_script: bool,

    /// Give each page its own cookie store
    pub use_ephemeral_cookies: bool,

    /// User agent override
    pub user_agent: Option<String>,

    /// Emulated layout
    pub content_mode: ContentMode,

    /// Log level
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cdp_endpoint: "ws://localhost:9222".to_string(),
            timeout_ms: 30000,
            debounce_ms: 300,
            grace_ms: 1000,
            script_timeout_ms: 30000,
            block_resources: true,
            allow_script: true,
            use_ephemeral_cookies: true,
            user_agent: None,
            content_mode: ContentMode::Recommended,
            log_level: "info".to_string(),
        }
    }
}

fn parse_var<T: std::str::FromStr>(name: &str, value: String) -> Result<T> {
    value
        .parse()
        .map_err(|_| Error::configuration(format!("Invalid {}", name)))
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Config::default().with_env_overrides()
    }

    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)?;
        toml::from_str(&contents)
            .map_err(|e| Error::configuration(format!("Invalid config file {}: {}", path.display(), e)))
    }

    /// Apply `HARVEST_*` environment variables on top of this configuration
    pub fn with_env_overrides(mut self) -> Result<Self> {
        if let Ok(endpoint) = env::var("HARVEST_CDP_ENDPOINT") {
            self.cdp_endpoint = endpoint;
        }

        if let Ok(timeout) = env::var("HARVEST_TIMEOUT_MS") {
            self.timeout_ms = parse_var("HARVEST_TIMEOUT_MS", timeout)?;
        }

        if let Ok(debounce) = env::var("HARVEST_DEBOUNCE_MS") {
            self.debounce_ms = parse_var("HARVEST_DEBOUNCE_MS", debounce)?;
        }

        if let Ok(grace) = env::var("HARVEST_GRACE_MS") {
            self.grace_ms = parse_var("HARVEST_GRACE_MS", grace)?;
        }

        if let Ok(timeout) = env::var("HARVEST_SCRIPT_TIMEOUT_MS") {
            self.script_timeout_ms = parse_var("HARVEST_SCRIPT_TIMEOUT_MS", timeout)?;
        }

        if let Ok(block) = env::var("HARVEST_BLOCK_RESOURCES") {
            self.block_resources = parse_var("HARVEST_BLOCK_RESOURCES", block)?;
        }

        if let Ok(allow) = env::var("HARVEST_ALLOW_SCRIPT") {
            self.allow_script = parse_var("HARVEST_ALLOW_SCRIPT", allow)?;
        }

        if let Ok(ephemeral) = env::var("HARVEST_EPHEMERAL_COOKIES") {
            self.use_ephemeral_cookies = parse_var("HARVEST_EPHEMERAL_COOKIES", ephemeral)?;
        }

        if let Ok(user_agent) = env::var("HARVEST_USER_AGENT") {
            self.user_agent = Some(user_agent);
        }

        if let Ok(mode) = env::var("HARVEST_CONTENT_MODE") {
            self.content_mode = match mode.to_ascii_lowercase().as_str() {
                "recommended" => ContentMode::Recommended,
                "mobile" => ContentMode::Mobile,
                "desktop" => ContentMode::Desktop,
                _ => return Err(Error::configuration("Invalid HARVEST_CONTENT_MODE")),
            };
        }

        if let Ok(log_level) = env::var("HARVEST_LOG_LEVEL") {
            self.log_level = log_level;
        }

        Ok(self)
    }

    /// Loader configuration for these settings
    pub fn loader_configuration(&self) -> Result<Configuration> {
        let script_timeout = match self.script_timeout_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        };

        let mut builder = Configuration::builder()
            .allow_script(self.allow_script)
            .block_resources(self.block_resources)
            .use_ephemeral_cookies(self.use_ephemeral_cookies)
            .content_mode(self.content_mode)
            .timeout(Duration::from_millis(self.timeout_ms))
            .debounce(Duration::from_millis(self.debounce_ms))
            .grace(Duration::from_millis(self.grace_ms))
            .script_timeout(script_timeout);

        if let Some(user_agent) = &self.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }

        builder.build()
    }
}
