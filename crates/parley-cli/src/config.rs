//! Parley CLI Configuration Management
//!
//! Layered configuration loading for the CLI binary: defaults, then a TOML
//! file (`parley.toml` or an explicit `--config` path), then `PARLEY_*`
//! environment variables, then command-line overrides. The protocol section
//! is the same [`ProtocolConfig`] both library crates consume.

use std::collections::BTreeMap;
use std::path::PathBuf;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use parley_core::ProtocolConfig;
use parley_runtime::ServerConfig;

use crate::error::{CliError, Result};

// ----------------------------------------------------------------------------
// CLI Application Configuration
// ----------------------------------------------------------------------------

/// Complete configuration for the Parley CLI binary
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Protocol configuration shared by client and server roles
    pub protocol: ProtocolConfig,

    /// Server listener and worker-pool settings
    pub server: ServerConfig,

    /// Client connection settings
    pub client: ClientConfig,

    /// Values served to `ConfigGet` callers when running as a server
    pub config_values: BTreeMap<String, String>,
}

/// Where the client connects and where it keeps its state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    pub host: String,
    pub port: u16,
    /// State file path; defaults to ~/.parley/state.toml
    pub state_file: Option<PathBuf>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 7464,
            state_file: None,
        }
    }
}

// ----------------------------------------------------------------------------
// Loading
// ----------------------------------------------------------------------------

impl AppConfig {
    /// Load with the default layering: defaults, `parley.toml`, the home
    /// config file, then environment variables
    pub fn load() -> Result<Self> {
        Self::extract(Self::base_figment())
    }

    /// Load from an explicit file path on top of the defaults
    pub fn load_from_file<P: AsRef<std::path::Path>>(path: P) -> Result<Self> {
        let figment = Figment::new()
            .merge(Serialized::defaults(Self::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("PARLEY_").split("__"));
        Self::extract(figment)
    }

    fn base_figment() -> Figment {
        let mut figment = Figment::new()
            .merge(Serialized::defaults(Self::default()))
            .merge(Toml::file("parley.toml"));
        if let Some(home_config) = Self::home_config_path() {
            figment = figment.merge(Toml::file(home_config));
        }
        figment.merge(Env::prefixed("PARLEY_").split("__"))
    }

    fn extract(figment: Figment) -> Result<Self> {
        let config: AppConfig = figment
            .extract()
            .map_err(|e| CliError::Config(format!("failed to load configuration: {}", e)))?;
        config
            .protocol
            .validate()
            .map_err(CliError::Config)?;
        Ok(config)
    }

    fn home_config_path() -> Option<PathBuf> {
        let home = std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .ok()?;
        Some(PathBuf::from(home).join(".parley").join("config.toml"))
    }

    /// The client state file to use, creating the parent directory
    pub fn state_file(&self) -> Result<PathBuf> {
        let path = match &self.client.state_file {
            Some(path) => path.clone(),
            None => {
                let home = std::env::var("HOME")
                    .or_else(|_| std::env::var("USERPROFILE"))
                    .map_err(|_| {
                        CliError::Config("no HOME directory for the default state file".into())
                    })?;
                PathBuf::from(home).join(".parley").join("state.toml")
            }
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Ok(path)
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config_validates() {
        let config = AppConfig::default();
        assert!(config.protocol.validate().is_ok());
        assert_eq!(config.client.port, 7464);
    }

    #[test]
    fn test_load_from_file_overrides_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[protocol.sessions]\nmax_sessions = 5\nevict_percent = 20\n\n[client]\nhost = \"example.org\"\nport = 9000\n\n[config_values]\n\"library.name\" = \"Branch\"\n"
        )
        .unwrap();

        let config = AppConfig::load_from_file(file.path()).unwrap();
        assert_eq!(config.protocol.sessions.max_sessions, 5);
        assert_eq!(config.protocol.sessions.evict_percent, 20);
        assert_eq!(config.client.host, "example.org");
        assert_eq!(config.client.port, 9000);
        assert_eq!(
            config.config_values.get("library.name").map(String::as_str),
            Some("Branch")
        );
        // Untouched sections keep their defaults.
        assert_eq!(config.protocol.timeouts.default_ms, 30_000);
    }

    #[test]
    fn test_invalid_file_config_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[protocol.sessions]\nmax_sessions = 0\n").unwrap();
        assert!(AppConfig::load_from_file(file.path()).is_err());
    }
}
