use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

const APP_DIR: &str = "chatpane";
const CONFIG_PATH_ENV: &str = "CHATPANE_CONFIG";
const API_KEY_ENVS: [&str; 2] = ["CHATPANE_API_KEY", "OPENAI_API_KEY"];

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {}: {source}", path.display())]
    Read { path: PathBuf, source: io::Error },
    #[error("failed to parse config {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

/// Runtime configuration, read from `config.toml`. Every field is optional.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub api_key: Option<String>,
    pub api_base: String,
    pub model: String,
    pub system_prompt: String,
    pub chats_dir: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        let chats_dir = dirs::data_dir()
            .map(|dir| dir.join(APP_DIR).join("chats"))
            .unwrap_or_else(|| PathBuf::from("chats"));

        Self {
            api_key: None,
            api_base: "https://api.openai.com/v1".to_string(),
            model: "gpt-4".to_string(),
            system_prompt: "You are a helpful assistant.".to_string(),
            chats_dir,
        }
    }
}

impl Config {
    pub fn default_path() -> PathBuf {
        if let Some(path) = std::env::var_os(CONFIG_PATH_ENV) {
            return PathBuf::from(path);
        }
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(APP_DIR)
            .join("config.toml")
    }

    /// Loads the config file if present, then applies API key overrides from
    /// the environment.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::from_path(&Self::default_path())?;
        config.api_key = resolve_api_key(config.api_key.take(), |name| std::env::var(name).ok());
        Ok(config)
    }

    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}

fn resolve_api_key(
    from_file: Option<String>,
    env: impl Fn(&str) -> Option<String>,
) -> Option<String> {
    API_KEY_ENVS
        .iter()
        .filter_map(|name| env(name))
        .chain(from_file)
        .map(|key| key.trim().to_string())
        .find(|key| !key.is_empty())
}
