//! Agent configuration file (`foglet.toml`).

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(default)]
    pub agent: AgentSection,
    #[serde(default)]
    pub api: ApiSection,
    #[serde(default)]
    pub broker: BrokerSection,
    #[serde(default)]
    pub routing: RoutingSection,
    #[serde(default)]
    pub connector: ConnectorSection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSection {
    /// Host IP handed to created containers; detected when unset.
    pub host_ip: Option<String>,
    /// Data directory for agent state (trust stores, logs).
    pub data_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiSection {
    /// Local API listen port.
    pub port: u16,
    /// Optional REST-Blue forward target, e.g. `http://127.0.0.1:10500`.
    pub restblue_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerSection {
    /// Broker queue memory limit in megabytes.
    pub memory_limit_mb: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingSection {
    /// Average-speed sampling interval in minutes.
    pub speed_interval_minutes: u64,
    /// Liveness watchdog interval in seconds.
    pub watchdog_interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectorSection {
    /// Directory where per-connector trust stores are materialized.
    pub trust_store_dir: PathBuf,
}

impl Default for AgentSection {
    fn default() -> Self {
        Self {
            host_ip: None,
            data_dir: PathBuf::from("/var/lib/foglet"),
        }
    }
}

impl Default for ApiSection {
    fn default() -> Self {
        Self {
            port: 54321,
            restblue_url: None,
        }
    }
}

impl Default for BrokerSection {
    fn default() -> Self {
        Self {
            memory_limit_mb: 128,
        }
    }
}

impl Default for RoutingSection {
    fn default() -> Self {
        Self {
            speed_interval_minutes: 5,
            watchdog_interval_secs: 5,
        }
    }
}

impl Default for ConnectorSection {
    fn default() -> Self {
        Self {
            trust_store_dir: PathBuf::from("/var/lib/foglet/trust-stores"),
        }
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            agent: AgentSection::default(),
            api: ApiSection::default(),
            broker: BrokerSection::default(),
            routing: RoutingSection::default(),
            connector: ConnectorSection::default(),
        }
    }
}

impl AgentConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config = toml::from_str(&content)?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sensible() {
        let config = AgentConfig::default();
        assert_eq!(config.api.port, 54321);
        assert_eq!(config.broker.memory_limit_mb, 128);
        assert_eq!(config.routing.watchdog_interval_secs, 5);
    }

    #[test]
    fn parse_partial_file_fills_defaults() {
        let toml_str = r#"
[api]
port = 6000

[routing]
speed_interval_minutes = 1
watchdog_interval_secs = 2
"#;
        let config: AgentConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.api.port, 6000);
        assert_eq!(config.routing.speed_interval_minutes, 1);
        // Untouched sections fall back to defaults.
        assert_eq!(config.broker.memory_limit_mb, 128);
    }

    #[test]
    fn from_file_reads_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("foglet.toml");
        std::fs::write(&path, "[api]\nport = 7777\n").unwrap();

        let config = AgentConfig::from_file(&path).unwrap();
        assert_eq!(config.api.port, 7777);
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let err = AgentConfig::from_file(Path::new("/nonexistent/foglet.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }
}
