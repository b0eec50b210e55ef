//! Server configuration
//!
//! Configuration is read from a TOML file or from defaults, then overridden by
//! `CHORUS_*` environment variables and validated.
//!
//! ```toml
//! [server]
//! name = "Chorus"
//! root_channel_name = "Root"
//! default_channel = "Lobby"
//! max_users = 100
//!
//! [[server.channels]]
//! name = "Lobby"
//!
//! [[server.channels]]
//! name = "AFK"
//! parent = "Lobby"
//!
//! [[server.links]]
//! a = "Lobby"
//! b = "Lobby/AFK"
//! ```
//!
//! Channel paths are `/`-separated names below the root channel; the empty
//! path is the root itself.

use crate::types::ServerId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::env;
use std::path::Path;

mod error;

pub use error::ConfigError;

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Virtual server settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub id: ServerId,
    pub name: String,
    pub root_channel_name: String,
    /// Path of the channel new participants join; the root when unset
    pub default_channel: Option<String>,
    pub max_users: usize,
    /// Initial channel tree, parents before children
    pub channels: Vec<ChannelSeed>,
    pub links: Vec<LinkSeed>,
}

/// Channel created at startup
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelSeed {
    pub name: String,
    /// Parent path; the root when unset
    #[serde(default)]
    pub parent: Option<String>,
}

impl ChannelSeed {
    pub fn path(&self) -> String {
        join_path(self.parent.as_deref().unwrap_or(""), &self.name)
    }
}

/// Link created at startup between two channel paths
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkSeed {
    pub a: String,
    pub b: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// trace, debug, info, warn or error
    pub level: String,
    pub json_format: bool,
    pub with_timestamp: bool,
    pub with_target: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            id: ServerId(1),
            name: "Chorus".to_string(),
            root_channel_name: "Root".to_string(),
            default_channel: None,
            max_users: 100,
            channels: Vec::new(),
            links: Vec::new(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
            with_timestamp: true,
            with_target: true,
        }
    }
}

impl ServerConfig {
    /// Check limits and that every referenced channel path is declared
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_users == 0 {
            return Err(ConfigError::ValidationFailed(
                "max_users must be greater than 0".to_string(),
            ));
        }
        if self.root_channel_name.trim().is_empty() {
            return Err(ConfigError::ValidationFailed(
                "root_channel_name must not be empty".to_string(),
            ));
        }

        let mut known: BTreeSet<String> = BTreeSet::from([String::new()]);
        for seed in &self.channels {
            if seed.name.trim().is_empty() || seed.name.contains('/') {
                return Err(ConfigError::ValidationFailed(format!(
                    "invalid channel name '{}'",
                    seed.name
                )));
            }
            let parent = normalize_path(seed.parent.as_deref().unwrap_or(""));
            if !known.contains(&parent) {
                return Err(ConfigError::ValidationFailed(format!(
                    "channel '{}' has unknown parent '{}'",
                    seed.name, parent
                )));
            }
            if !known.insert(join_path(&parent, &seed.name)) {
                return Err(ConfigError::ValidationFailed(format!(
                    "duplicate channel '{}'",
                    seed.path()
                )));
            }
        }

        if let Some(default) = &self.default_channel {
            if !known.contains(&normalize_path(default)) {
                return Err(ConfigError::ValidationFailed(format!(
                    "default_channel '{}' is not a configured channel",
                    default
                )));
            }
        }

        for link in &self.links {
            for end in [&link.a, &link.b] {
                if !known.contains(&normalize_path(end)) {
                    return Err(ConfigError::ValidationFailed(format!(
                        "link endpoint '{}' is not a configured channel",
                        end
                    )));
                }
            }
        }

        Ok(())
    }
}

/// Join a parent path and a channel name
pub fn join_path(parent: &str, name: &str) -> String {
    let parent = parent.trim_matches('/');
    if parent.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", parent, name)
    }
}

/// Split a channel path into its names; empty for the root
pub fn split_path(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|s| !s.is_empty())
}

fn normalize_path(path: &str) -> String {
    split_path(path).collect::<Vec<_>>().join("/")
}

fn parse_var<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    value
        .parse()
        .map_err(|e| ConfigError::InvalidValue(format!("{}: {}", key, e)))
}

impl Config {
    /// Defaults overridden by the environment
    ///
    /// Variables follow `CHORUS_<SECTION>_<KEY>`, e.g. `CHORUS_SERVER_MAX_USERS=50`.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Load a TOML file, then apply environment overrides
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            ConfigError::FileReadError(format!("{}: {}", path.as_ref().display(), e))
        })?;

        let mut config = Self::from_toml(&contents)?;
        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Parse TOML text without consulting the environment
    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        let config: Self =
            toml::from_str(contents).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_vars(env::vars().filter(|(k, _)| k.starts_with("CHORUS_")))
    }

    fn apply_vars(&mut self, vars: impl IntoIterator<Item = (String, String)>) -> Result<(), ConfigError> {
        for (key, value) in vars {
            match key.as_str() {
                "CHORUS_SERVER_ID" => self.server.id = ServerId(parse_var(&key, &value)?),
                "CHORUS_SERVER_NAME" => self.server.name = value,
                "CHORUS_SERVER_ROOT_CHANNEL_NAME" => self.server.root_channel_name = value,
                "CHORUS_SERVER_DEFAULT_CHANNEL" => self.server.default_channel = Some(value),
                "CHORUS_SERVER_MAX_USERS" => self.server.max_users = parse_var(&key, &value)?,
                "CHORUS_LOG_LEVEL" => self.logging.level = value,
                "CHORUS_LOG_JSON" => self.logging.json_format = parse_var(&key, &value)?,
                _ => {}
            }
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.server.validate()?;

        if !LOG_LEVELS.contains(&self.logging.level.to_ascii_lowercase().as_str()) {
            return Err(ConfigError::ValidationFailed(format!(
                "Invalid log level: {}",
                self.logging.level
            )));
        }

        Ok(())
    }

    pub fn save_to_file(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let contents =
            toml::to_string_pretty(self).map_err(|e| ConfigError::SerializeError(e.to_string()))?;

        std::fs::write(path, contents).map_err(|e| ConfigError::FileWriteError(e.to_string()))
    }
}
