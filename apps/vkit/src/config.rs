// SPDX-FileCopyrightText: © 2025 VisionKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Server process configuration.
//!
//! Layered: serde defaults, then a TOML file, then `VK_`-prefixed
//! environment variables (`VK_SERVER__ADDRESS`, `VK_LOG__FILE_ENABLE`, ...).
//! This is the process configuration only; the runtime system config lives
//! in the file-backed [`visionkit_core::ConfigStore`].

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::Level;

/// Log level for filtering messages.
#[derive(Deserialize, Serialize, Debug, Clone, Default, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl From<LogLevel> for Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Debug => Self::DEBUG,
            LogLevel::Info => Self::INFO,
            LogLevel::Warn => Self::WARN,
            LogLevel::Error => Self::ERROR,
        }
    }
}

/// Log file format options.
#[derive(Deserialize, Serialize, Debug, Clone, Copy, Default, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Plain text format (faster, lower CPU overhead)
    #[default]
    Text,
    /// JSON format (structured, better for log aggregation)
    Json,
}

/// Logging configuration for console and file output.
#[derive(Deserialize, Serialize, Debug, Clone, JsonSchema)]
pub struct LogConfig {
    #[serde(default)]
    pub console_enable: bool,
    #[serde(default)]
    pub file_enable: bool,
    #[serde(default)]
    pub console_level: LogLevel,
    #[serde(default)]
    pub file_level: LogLevel,
    #[serde(default)]
    pub file_path: String,
    #[serde(default)]
    pub file_format: LogFormat,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            console_enable: true,
            file_enable: false,
            console_level: LogLevel::default(),
            file_level: LogLevel::Info,
            file_path: "./vkit.log".to_string(),
            file_format: LogFormat::default(),
        }
    }
}

/// HTTP server configuration.
#[derive(Deserialize, Serialize, Debug, Clone, JsonSchema)]
pub struct ServerConfig {
    pub address: String,
    /// Optional cap on concurrently-processed instance create requests.
    /// Creates run the pipeline builder and may touch the filesystem and
    /// brokers; unset means no limit.
    pub max_concurrent_creates: Option<usize>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        // Same port the runtime system config advertises by default.
        Self { address: "127.0.0.1:3546".to_string(), max_concurrent_creates: None }
    }
}

/// Persistent state locations.
#[derive(Deserialize, Serialize, Debug, Clone, JsonSchema)]
pub struct StorageConfig {
    /// Directory holding the node pool snapshot (`nodes.json`).
    pub directory: String,
    /// File backing the runtime system configuration. Empty keeps the
    /// config in memory only.
    pub system_config_path: String,
    /// Seed pre-configured nodes from the default solutions at startup.
    #[serde(default = "default_true")]
    pub seed_default_nodes: bool,
}

const fn default_true() -> bool {
    true
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            directory: "./storage".to_string(),
            system_config_path: "./storage/config.json".to_string(),
            seed_default_nodes: true,
        }
    }
}

/// Root configuration for the VisionKit server.
#[derive(Deserialize, Serialize, Default, Debug, Clone, JsonSchema)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub log: LogConfig,

    #[serde(default)]
    pub storage: StorageConfig,
}

#[derive(Debug)]
pub struct ConfigLoadResult {
    pub config: Config,
    pub file_missing: Option<String>,
}

/// Loads the configuration from defaults, a TOML file and environment
/// variables.
///
/// # Errors
///
/// Returns an error when the file exists but contains invalid TOML, or when
/// environment overrides fail validation.
pub fn load(config_path: &str) -> Result<ConfigLoadResult, Box<figment::Error>> {
    let mut figment =
        Figment::new().merge(figment::providers::Serialized::defaults(Config::default()));

    let mut file_missing = None;
    if std::path::Path::new(config_path).exists() {
        figment = figment.merge(Toml::file(config_path));
    } else {
        file_missing = Some(config_path.to_string());
    }

    let config: Config =
        figment.merge(Env::prefixed("VK_").split("__")).extract().map_err(Box::new)?;
    Ok(ConfigLoadResult { config, file_missing })
}

/// Generates the default configuration as a pretty-printed TOML string.
///
/// # Errors
///
/// Returns an error if the default configuration cannot be serialized,
/// which would indicate a programming error.
pub fn generate_default() -> Result<String, toml::ser::Error> {
    toml::to_string_pretty(&Config::default())
}
