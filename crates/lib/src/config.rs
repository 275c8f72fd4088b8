//! Configuration types and loading.
//!
//! Config is loaded from a JSON file (e.g. `~/.nubot/config.json`), then
//! environment overrides are applied. Command-line flags are applied last by the CLI.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level application config.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Robot identity (name and alias used by respond listeners).
    #[serde(default)]
    pub robot: RobotConfig,

    /// Adapter to run (default "shell").
    #[serde(default = "default_adapter")]
    pub adapter: String,

    /// Minimum log level when RUST_LOG is not set (default "info").
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Shell adapter settings.
    #[serde(default)]
    pub shell: ShellConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            robot: RobotConfig::default(),
            adapter: default_adapter(),
            log_level: default_log_level(),
            shell: ShellConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RobotConfig {
    /// Name of the robot in chat (default "Nubot").
    #[serde(default = "default_name")]
    pub name: String,

    /// Alternate name; messages starting with either trigger respond listeners.
    #[serde(default)]
    pub alias: Option<String>,
}

impl Default for RobotConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            alias: None,
        }
    }
}

/// Who you are when talking to the robot through the shell adapter.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShellConfig {
    #[serde(default = "default_shell_user_id")]
    pub user_id: String,
    #[serde(default = "default_shell_user_name")]
    pub user_name: String,
    #[serde(default = "default_shell_room")]
    pub room: String,
}

impl Default for ShellConfig {
    fn default() -> Self {
        Self {
            user_id: default_shell_user_id(),
            user_name: default_shell_user_name(),
            room: default_shell_room(),
        }
    }
}

fn default_name() -> String {
    "Nubot".to_string()
}

fn default_adapter() -> String {
    "shell".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_shell_user_id() -> String {
    "1".to_string()
}

fn default_shell_user_name() -> String {
    "user".to_string()
}

fn default_shell_room() -> String {
    "shell".to_string()
}

/// First non-empty, trimmed value among `keys`.
fn first_set(lookup: &impl Fn(&str) -> Option<String>, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|k| {
        lookup(k)
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    })
}

impl Config {
    /// Apply NUBOT_* / HUBOT_* environment overrides. NUBOT_* wins.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|k| std::env::var(k).ok());
    }

    pub fn apply_overrides_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = first_set(&lookup, &["NUBOT_NAME", "HUBOT_NAME"]) {
            self.robot.name = v;
        }
        if let Some(v) = first_set(&lookup, &["NUBOT_ALIAS", "HUBOT_ALIAS"]) {
            self.robot.alias = Some(v);
        }
        if let Some(v) = first_set(&lookup, &["NUBOT_ADAPTER", "HUBOT_ADAPTER"]) {
            self.adapter = v;
        }
        if let Some(v) = first_set(&lookup, &["NUBOT_LOG_LEVEL", "HUBOT_LOG_LEVEL"]) {
            self.log_level = v;
        }
        if let Some(v) = first_set(&lookup, &["HUBOT_SHELL_USER_ID"]) {
            self.shell.user_id = v;
        }
        if let Some(v) = first_set(&lookup, &["HUBOT_SHELL_USER_NAME"]) {
            self.shell.user_name = v;
        }
    }

    /// Alias with blanks treated as unset.
    pub fn alias(&self) -> Option<&str> {
        self.robot
            .alias
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }
}

/// Resolve config path from env or default.
pub fn default_config_path() -> PathBuf {
    std::env::var("NUBOT_CONFIG_PATH").map(PathBuf::from).unwrap_or_else(|_| {
        dirs::home_dir()
            .map(|h| h.join(".nubot").join("config.json"))
            .unwrap_or_else(|| PathBuf::from("config.json"))
    })
}

/// Load config from the given path (or the default path). Missing file => default config.
/// Returns the config and the path that was used.
pub fn load_config(path: Option<PathBuf>) -> Result<(Config, PathBuf)> {
    let path = path.unwrap_or_else(default_config_path);
    let config = if !path.exists() {
        log::debug!("config file not found, using defaults: {}", path.display());
        Config::default()
    } else {
        let s = std::fs::read_to_string(&path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        serde_json::from_str(&s)
            .with_context(|| format!("parsing config from {}", path.display()))?
    };
    Ok((config, path))
}
