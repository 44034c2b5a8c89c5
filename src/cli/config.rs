//! Configuration management for toolgate
//!
//! Provides TOML-based configuration with defaults and validation.
//! Location: ~/.toolgate/config.toml

use crate::errors::{EngineError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Complete configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub workspace: WorkspaceConfig,
    pub proxy: ProxyConfig,
    pub tools: ToolsConfig,
    pub logging: LoggingConfig,
}

/// HTTP listener
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Workspace location (holds `tasks/` and `locks.json`)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkspaceConfig {
    pub root: String,
}

/// Remote tool service
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    pub enabled: bool,
    pub base_url: String,
    pub timeout_secs: u64,
    pub discover_on_start: bool,
    pub discovery_retries: u32,
}

/// Tool execution limits
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    pub default_timeout_secs: u64,
    pub max_output_bytes: usize,
    pub max_parallel_processes: usize,
    pub max_blocking_threads: usize,
    pub replay_capacity: usize,
}

/// Log output
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub log_dir: Option<PathBuf>,
    pub json: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8001,
        }
    }
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            root: "./workspace".to_string(),
        }
    }
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            base_url: "http://localhost:8892".to_string(),
            timeout_secs: 120,
            discover_on_start: true,
            discovery_retries: 3,
        }
    }
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            default_timeout_secs: 300,
            max_output_bytes: 2_097_152,
            max_parallel_processes: 4,
            max_blocking_threads: num_cpus::get().max(1) * 2,
            replay_capacity: 256,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            log_dir: None,
            json: false,
        }
    }
}

impl Config {
    /// Load configuration from file or use defaults
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        if let Some(config_path) = path {
            Self::load_from_file(&config_path)
        } else {
            Self::load_default()
        }
    }

    /// Load configuration from specific file
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| EngineError::ConfigError(format!("Failed to read config: {}", e)))?;

        let config: Config = toml::from_str(&contents)
            .map_err(|e| EngineError::ConfigError(format!("Failed to parse config: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Load default configuration from standard location or use built-in defaults
    pub fn load_default() -> Result<Self> {
        if let Some(path) = Self::default_path() {
            if path.exists() {
                return Self::load_from_file(&path);
            }
        }

        Ok(Config::default())
    }

    /// `~/.toolgate/config.toml`
    pub fn default_path() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(".toolgate").join("config.toml"))
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.workspace.root.trim().is_empty() {
            return Err(EngineError::ConfigError(
                "workspace.root must not be empty".to_string(),
            ));
        }

        if self.proxy.enabled
            && !(self.proxy.base_url.starts_with("http://")
                || self.proxy.base_url.starts_with("https://"))
        {
            return Err(EngineError::ConfigError(format!(
                "proxy.base_url must be an http(s) URL: {}",
                self.proxy.base_url
            )));
        }

        if self.proxy.timeout_secs == 0 {
            return Err(EngineError::ConfigError(
                "proxy.timeout_secs must be greater than 0".to_string(),
            ));
        }

        if self.tools.default_timeout_secs == 0 {
            return Err(EngineError::ConfigError(
                "tools.default_timeout_secs must be greater than 0".to_string(),
            ));
        }

        if self.tools.max_parallel_processes == 0 || self.tools.max_blocking_threads == 0 {
            return Err(EngineError::ConfigError(
                "tools.max_parallel_processes and tools.max_blocking_threads must be greater than 0"
                    .to_string(),
            ));
        }

        match self.logging.level.to_ascii_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => {
                return Err(EngineError::ConfigError(format!(
                    "Invalid log level: {}",
                    self.logging.level
                )))
            }
        }

        Ok(())
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> Result<()> {
        let contents = toml::to_string_pretty(self)
            .map_err(|e| EngineError::ConfigError(format!("Failed to serialize config: {}", e)))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                EngineError::ConfigError(format!("Failed to create config dir: {}", e))
            })?;
        }

        std::fs::write(path, contents)
            .map_err(|e| EngineError::ConfigError(format!("Failed to write config: {}", e)))?;

        Ok(())
    }

    /// Listener address as `host:port`
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    /// Workspace root with `~` expanded
    pub fn workspace_root(&self) -> PathBuf {
        Self::expand_path(&self.workspace.root)
    }

    /// Expand tilde in paths
    pub fn expand_path(path: &str) -> PathBuf {
        if let Some(rest) = path.strip_prefix("~/") {
            if let Some(home) = dirs::home_dir() {
                return home.join(rest);
            }
        }
        PathBuf::from(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.server.port, 8001);
        assert_eq!(config.proxy.base_url, "http://localhost:8892");
        assert_eq!(config.proxy.timeout_secs, 120);
        assert_eq!(config.tools.default_timeout_secs, 300);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("config.toml");
        std::fs::write(
            &path,
            "[server]\nport = 9000\n\n[proxy]\nenabled = false\n",
        )
        .unwrap();

        let config = Config::load(Some(path)).unwrap();
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.host, "0.0.0.0");
        assert!(!config.proxy.enabled);
        assert_eq!(config.tools.replay_capacity, 256);
    }

    #[test]
    fn test_save_then_load() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("nested/config.toml");
        let mut config = Config::default();
        config.workspace.root = "/srv/toolgate".to_string();
        config.save(&path).unwrap();

        let loaded = Config::load_from_file(&path).unwrap();
        assert_eq!(loaded.workspace.root, "/srv/toolgate");
    }

    #[test]
    fn test_validation_rejects_bad_proxy_url() {
        let mut config = Config::default();
        config.proxy.base_url = "localhost:8892".to_string();
        assert!(config.validate().is_err());

        config.proxy.enabled = false;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation_zero_limits() {
        let mut config = Config::default();
        config.tools.max_parallel_processes = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.tools.default_timeout_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_log_level() {
        let mut config = Config::default();
        config.logging.level = "loud".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_expand_path_with_tilde() {
        let expanded = Config::expand_path("~/.toolgate");
        assert!(!expanded.to_string_lossy().contains('~'));
    }

    #[test]
    fn test_expand_path_without_tilde() {
        let expanded = Config::expand_path("/absolute/path");
        assert_eq!(expanded.to_string_lossy(), "/absolute/path");
    }
}
