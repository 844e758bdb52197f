//! Effective configuration with provenance
//!
//! The effective config is the merged configuration plus a record of which
//! sources contributed to it.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};

use rpci_protocol::OpenFlags;

use super::defaults::BuiltinDefaults;
use super::merge::merge_layers;
use crate::channel::ChannelConfig;

/// Environment variable naming a config file when `--config` is absent
pub const CONFIG_ENV: &str = "VMW_RPCI_CONFIG";

/// Origin of a configuration source
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ConfigOrigin {
    Builtin,
    File,
    Cli,
}

/// A contributing config source
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigSource {
    pub origin: ConfigOrigin,

    /// File path (None for builtin/cli)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,

    /// SHA-256 digest of the raw file bytes (None for builtin/cli)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,
}

impl ConfigSource {
    fn unsourced(origin: ConfigOrigin) -> Self {
        Self {
            origin,
            path: None,
            digest: None,
        }
    }
}

/// Merged configuration plus its sources in precedence order
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EffectiveConfig {
    pub config: Value,
    pub sources: Vec<ConfigSource>,
}

impl EffectiveConfig {
    /// Build the effective config. A missing `file` is an error: unlike the
    /// builtin layer, a config file is only consulted when asked for.
    pub fn build(file: Option<&Path>, cli_overrides: Option<Value>) -> Result<Self, ConfigError> {
        let mut layers = vec![BuiltinDefaults::default().to_value()];
        let mut sources = vec![ConfigSource::unsourced(ConfigOrigin::Builtin)];

        if let Some(path) = file {
            let (value, digest) = load_toml_file(path)?;
            layers.push(value);
            sources.push(ConfigSource {
                origin: ConfigOrigin::File,
                path: Some(path.to_string_lossy().to_string()),
                digest: Some(digest),
            });
        }

        if let Some(cli) = cli_overrides {
            layers.push(cli);
            sources.push(ConfigSource::unsourced(ConfigOrigin::Cli));
        }

        let config = merge_layers(layers);
        validate_config(&config)?;

        Ok(Self { config, sources })
    }

    /// Resolve the config file path: an explicit path wins over the
    /// environment.
    pub fn resolve_path(explicit: Option<PathBuf>) -> Option<PathBuf> {
        explicit.or_else(|| {
            std::env::var_os(CONFIG_ENV)
                .filter(|v| !v.is_empty())
                .map(PathBuf::from)
        })
    }

    /// Channel settings from the `channel` table
    pub fn channel(&self) -> Result<ChannelConfig, ConfigError> {
        let table = self.get("channel").cloned().unwrap_or(Value::Null);
        if table.is_null() {
            return Ok(ChannelConfig::default());
        }
        serde_json::from_value(table)
            .map_err(|e| ConfigError::ValidationError(format!("channel: {}", e)))
    }

    /// Log filter directive
    pub fn log_filter(&self) -> &str {
        self.get_str("log.filter").unwrap_or("warn")
    }

    /// Get a config value by dot-separated path
    pub fn get(&self, path: &str) -> Option<&Value> {
        let mut current = &self.config;
        for part in path.split('.') {
            current = current.get(part)?;
        }
        Some(current)
    }

    pub fn get_str(&self, path: &str) -> Option<&str> {
        self.get(path).and_then(Value::as_str)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

/// Load and parse a TOML file, returning the value and digest
fn load_toml_file(path: &Path) -> Result<(Value, String), ConfigError> {
    let bytes = fs::read(path)
        .map_err(|e| ConfigError::IoError(format!("{}: {}", path.display(), e)))?;

    let digest = hex::encode(Sha256::digest(&bytes));

    let contents = String::from_utf8(bytes)
        .map_err(|e| ConfigError::ParseError(format!("Invalid UTF-8: {}", e)))?;

    let toml_value: toml::Value = toml::from_str(&contents)
        .map_err(|e| ConfigError::ParseError(format!("TOML parse error: {}", e)))?;

    Ok((toml_to_json(toml_value), digest))
}

fn toml_to_json(toml: toml::Value) -> Value {
    match toml {
        toml::Value::String(s) => Value::String(s),
        toml::Value::Integer(i) => Value::Number(i.into()),
        toml::Value::Float(f) => serde_json::Number::from_f64(f)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        toml::Value::Boolean(b) => Value::Bool(b),
        toml::Value::Datetime(dt) => Value::String(dt.to_string()),
        toml::Value::Array(arr) => Value::Array(arr.into_iter().map(toml_to_json).collect()),
        toml::Value::Table(table) => Value::Object(
            table
                .into_iter()
                .map(|(k, v)| (k, toml_to_json(v)))
                .collect(),
        ),
    }
}

fn validate_config(config: &Value) -> Result<(), ConfigError> {
    if let Some(protocol) = config.pointer("/channel/protocol") {
        // The top bit of the open argument carries the cookie flag
        let valid = protocol
            .as_u64()
            .map_or(false, |p| p < u64::from(OpenFlags::COOKIE.bits()));
        if !valid {
            return Err(ConfigError::ValidationError(format!(
                "channel.protocol must be an integer below {:#x}, got {}",
                OpenFlags::COOKIE.bits(),
                protocol
            )));
        }
    }

    if let Some(flag) = config.pointer("/channel/prefer_low_bandwidth") {
        if !flag.is_boolean() {
            return Err(ConfigError::ValidationError(
                "channel.prefer_low_bandwidth must be a boolean".to_string(),
            ));
        }
    }

    if let Some(filter) = config.pointer("/log/filter") {
        if !filter.is_string() {
            return Err(ConfigError::ValidationError(
                "log.filter must be a string".to_string(),
            ));
        }
    }

    Ok(())
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),
}
