use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::orchestration::RunOptions;
use crate::{glog_debug, Error, Result};

/// Default agent command. The rendered prompt is appended as the last argument.
pub const DEFAULT_COMMAND: &str = "claude -p --model {model}";
pub const DEFAULT_MAX_CONCURRENCY: usize = 4;
/// Default per-node budget (10 minutes).
pub const DEFAULT_NODE_TIMEOUT_SECS: u64 = 600;

pub const ENV_COMMAND: &str = "AGENTGRAPH_COMMAND";
pub const ENV_MAX_CONCURRENCY: &str = "AGENTGRAPH_MAX_CONCURRENCY";
pub const ENV_NODE_TIMEOUT_SECS: &str = "AGENTGRAPH_NODE_TIMEOUT_SECS";
pub const ENV_DEBUG: &str = crate::log::DEBUG_ENV;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub debug: bool,
    pub command: Option<String>,
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    #[serde(default = "default_node_timeout_secs")]
    pub node_timeout_secs: u64,
}

fn default_max_concurrency() -> usize {
    DEFAULT_MAX_CONCURRENCY
}

fn default_node_timeout_secs() -> u64 {
    DEFAULT_NODE_TIMEOUT_SECS
}

impl Default for Config {
    fn default() -> Self {
        Self {
            debug: false,
            command: None,
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            node_timeout_secs: DEFAULT_NODE_TIMEOUT_SECS,
        }
    }
}

impl Config {
    pub fn home_dir() -> Result<PathBuf> {
        Ok(dirs::home_dir().ok_or(Error::NoHomeDir)?.join(".agentgraph"))
    }

    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::home_dir()?.join("config.toml"))
    }

    pub fn effective_command(&self) -> &str {
        self.command.as_deref().unwrap_or(DEFAULT_COMMAND)
    }

    pub fn node_timeout(&self) -> Duration {
        Duration::from_secs(self.node_timeout_secs)
    }

    pub fn run_options(&self) -> RunOptions {
        RunOptions {
            max_concurrency: self.max_concurrency.max(1),
            node_timeout: self.node_timeout(),
        }
    }

    /// Load the user config file, then apply environment overrides.
    pub fn load() -> Result<Self> {
        let mut config = Self::load_from(&Self::config_path()?)?;
        config.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Load a config file without consulting the environment.
    ///
    /// A missing file yields the defaults.
    pub fn load_from(path: &Path) -> Result<Self> {
        glog_debug!("Config::load_from path={}", path.display());
        if !path.exists() {
            glog_debug!("Config file not found, using defaults");
            return Ok(Self::default());
        }
        let config: Self = toml::from_str(&fs::read_to_string(path)?)?;
        config.validate()?;
        glog_debug!(
            "Config loaded: command={:?}, max_concurrency={}, node_timeout_secs={}",
            config.command,
            config.max_concurrency,
            config.node_timeout_secs
        );
        Ok(config)
    }

    /// Apply `AGENTGRAPH_*` overrides read through `lookup`.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(command) = lookup(ENV_COMMAND).filter(|c| !c.trim().is_empty()) {
            self.command = Some(command);
        }
        if let Some(raw) = lookup(ENV_MAX_CONCURRENCY) {
            self.max_concurrency = parse_env_number(ENV_MAX_CONCURRENCY, &raw)?;
        }
        if let Some(raw) = lookup(ENV_NODE_TIMEOUT_SECS) {
            self.node_timeout_secs = parse_env_number(ENV_NODE_TIMEOUT_SECS, &raw)?;
        }
        if let Some(raw) = lookup(ENV_DEBUG) {
            self.debug = raw == "1" || raw.eq_ignore_ascii_case("true");
        }
        self.validate()
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_concurrency == 0 {
            return Err(Error::Configuration(
                "max_concurrency must be at least 1".to_string(),
            ));
        }
        if self.node_timeout_secs == 0 {
            return Err(Error::Configuration(
                "node_timeout_secs must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn save(&self) -> Result<PathBuf> {
        let path = Self::config_path()?;
        self.save_to(&path)?;
        Ok(path)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                glog_debug!("Creating config directory: {}", parent.display());
                fs::create_dir_all(parent)?;
            }
        }
        fs::write(path, toml::to_string_pretty(self)?)?;
        glog_debug!("Config saved to {}", path.display());
        Ok(())
    }
}

fn parse_env_number<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T> {
    raw.trim()
        .parse()
        .map_err(|_| Error::Configuration(format!("{} must be a number, got {:?}", key, raw)))
}
