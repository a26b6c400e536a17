//! Configuration management for Watchlist.
//!
//! Configuration is read from `~/.config/watchlist/config.toml` at startup.
//! If the file doesn't exist, a default configuration with comments is created.

use serde::Deserialize;
use std::fs;
use std::io::Write;
use std::path::PathBuf;

use crate::domain::Identity;

/// Main configuration struct.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub identity: IdentityConfig,
    pub store: StoreConfig,
    pub relations: RelationsConfig,
}

/// Default signed-in user for the command line.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    pub user_id: Option<String>,
    pub login: Option<String>,
}

impl IdentityConfig {
    /// The configured identity, if a user id is set. The login falls back
    /// to the user id.
    pub fn identity(&self) -> Option<Identity> {
        let user_id = self.user_id.as_deref()?.trim();
        if user_id.is_empty() {
            return None;
        }
        let login = self
            .login
            .as_deref()
            .filter(|l| !l.trim().is_empty())
            .unwrap_or(user_id);
        Some(Identity::new(user_id, login))
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Database path. Defaults to `<data dir>/watchlist/watchlist.db`.
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RelationsConfig {
    /// Ask before removing a favorite.
    pub confirm_unfavorite: bool,
    /// Ask before deleting a title.
    pub confirm_delete: bool,
}

impl Default for RelationsConfig {
    fn default() -> Self {
        Self {
            confirm_unfavorite: true,
            confirm_delete: true,
        }
    }
}

impl Config {
    /// Load configuration from the default path.
    ///
    /// If the config file doesn't exist, creates a default one with comments.
    /// If the config file exists but is invalid, returns an error.
    /// Missing fields in the config file will use default values.
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::default_config_path()?;

        if !config_path.exists() {
            Self::create_default_config(&config_path)?;
            return Ok(Self::default());
        }

        Self::load_from(&config_path)
    }

    pub fn load_from(path: &PathBuf) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.clone(),
            source: e,
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.clone(),
            source: e,
        })
    }

    /// Get the default config file path: `~/.config/watchlist/config.toml`
    pub fn default_config_path() -> Result<PathBuf, ConfigError> {
        let config_dir = dirs::config_dir().ok_or(ConfigError::NoConfigDir)?;
        Ok(config_dir.join("watchlist").join("config.toml"))
    }

    /// Create a default config file with comments.
    fn create_default_config(path: &PathBuf) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| ConfigError::Io {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        let mut file = fs::File::create(path).map_err(|e| ConfigError::Io {
            path: path.clone(),
            source: e,
        })?;

        file.write_all(Self::default_config_content().as_bytes())
            .map_err(|e| ConfigError::Io {
                path: path.clone(),
                source: e,
            })?;

        Ok(())
    }

    fn default_config_content() -> &'static str {
        r##"# Watchlist Configuration

[identity]
# User the command line acts as. Can be overridden with --user / --login.
# user_id = "alice"
# login = "alice@example.com"

[store]
# Database location. Defaults to the platform data directory.
# path = "/home/alice/.local/share/watchlist/watchlist.db"

[relations]
# Ask before removing a favorite
confirm_unfavorite = true

# Ask before deleting a title you added
confirm_delete = true
"##
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Could not determine config directory")]
    NoConfigDir,

    #[error("Failed to read/write config file at {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file at {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}
