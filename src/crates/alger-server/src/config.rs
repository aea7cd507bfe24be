//! Server configuration.
//!
//! Loads `alger-server.toml` when present and applies environment overrides
//! on top; every field has a default so the server can start with no
//! configuration at all.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Read(#[from] std::io::Error),
    #[error("failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Listen address configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListenConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ListenConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Handshake credential configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    #[serde(default = "default_username")]
    pub username: String,
    #[serde(default = "default_password")]
    pub password: String,
    #[serde(default = "default_subprotocol")]
    pub subprotocol: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            username: default_username(),
            password: default_password(),
            subprotocol: default_subprotocol(),
        }
    }
}

/// Database location configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite database file path
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

/// Admission-control defaults applied at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_executions: usize,
    #[serde(default)]
    pub executions_halted: bool,
    #[serde(default)]
    pub maintenance_mode: bool,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_concurrent_executions: default_max_concurrent(),
            executions_halted: false,
            maintenance_mode: false,
        }
    }
}

/// Complete server configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default)]
    pub listen: ListenConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
}

impl ServerConfig {
    /// Load configuration from a TOML file.
    pub fn from_file<P: AsRef<std::path::Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml(&content)
    }

    /// Load configuration from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Load configuration from the default locations, falling back to
    /// defaults when no file is found, then apply environment overrides.
    ///
    /// Searches, in order: `CONFIG_PATH`, `config/alger-server.toml`,
    /// `./alger-server.toml`.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = if let Ok(path) = std::env::var("CONFIG_PATH") {
            Self::from_file(path)?
        } else {
            let candidates = [
                PathBuf::from("config/alger-server.toml"),
                PathBuf::from("alger-server.toml"),
            ];
            match candidates.iter().find(|p| p.exists()) {
                Some(path) => Self::from_file(path)?,
                None => Self::default(),
            }
        };
        config.apply_env();
        Ok(config)
    }

    /// Override individual fields from `ALGER_*` environment variables.
    pub fn apply_env(&mut self) {
        if let Ok(host) = std::env::var("ALGER_HOST") {
            self.listen.host = host;
        }
        if let Ok(port) = std::env::var("ALGER_PORT") {
            if let Ok(port) = port.parse() {
                self.listen.port = port;
            }
        }
        if let Ok(username) = std::env::var("ALGER_USERNAME") {
            self.auth.username = username;
        }
        if let Ok(password) = std::env::var("ALGER_PASSWORD") {
            self.auth.password = password;
        }
        if let Ok(path) = std::env::var("ALGER_DB_PATH") {
            self.database.path = path;
        }
        if let Ok(cap) = std::env::var("ALGER_MAX_CONCURRENT_EXECUTIONS") {
            if let Ok(cap) = cap.parse() {
                self.limits.max_concurrent_executions = cap;
            }
        }
        if let Ok(halted) = std::env::var("ALGER_EXECUTIONS_HALTED") {
            self.limits.executions_halted = matches!(halted.as_str(), "1" | "true" | "yes");
        }
        if let Ok(maintenance) = std::env::var("ALGER_MAINTENANCE_MODE") {
            self.limits.maintenance_mode = matches!(maintenance.as_str(), "1" | "true" | "yes");
        }
    }

    /// SQLite connection string for the configured database path.
    pub fn database_url(&self) -> String {
        format!("sqlite://{}?mode=rwc", self.database.path)
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8765
}

fn default_username() -> String {
    "admin".to_string()
}

fn default_password() -> String {
    "admin".to_string()
}

fn default_subprotocol() -> String {
    "alger".to_string()
}

fn default_db_path() -> String {
    "data/alger.sqlite3".to_string()
}

fn default_max_concurrent() -> usize {
    1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.listen.port, 8765);
        assert_eq!(config.auth.username, "admin");
        assert_eq!(config.auth.subprotocol, "alger");
        assert_eq!(config.limits.max_concurrent_executions, 1);
        assert!(!config.limits.executions_halted);
        assert!(!config.limits.maintenance_mode);
    }

    #[test]
    fn test_config_parsing() {
        let toml_content = r#"
[listen]
host = "127.0.0.1"
port = 9000

[auth]
username = "operator"
password = "hunter2"

[database]
path = "alger.db"

[limits]
max_concurrent_executions = 4
executions_halted = true
"#;
        let config = ServerConfig::from_toml(toml_content).unwrap();
        assert_eq!(config.listen.host, "127.0.0.1");
        assert_eq!(config.listen.port, 9000);
        assert_eq!(config.auth.username, "operator");
        assert_eq!(config.auth.subprotocol, "alger");
        assert_eq!(config.database.path, "alger.db");
        assert_eq!(config.limits.max_concurrent_executions, 4);
        assert!(config.limits.executions_halted);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config = ServerConfig::from_toml("[listen]\nport = 8000\n").unwrap();
        assert_eq!(config.listen.port, 8000);
        assert_eq!(config.listen.host, "0.0.0.0");
        assert_eq!(config.database.path, "data/alger.sqlite3");
    }

    #[test]
    fn test_database_url() {
        let config = ServerConfig::default();
        assert_eq!(config.database_url(), "sqlite://data/alger.sqlite3?mode=rwc");
    }
}
