use anyhow::Context;
use docdb_cluster::settings::{
    DEFAULT_HEARTBEAT_INTERVAL, DEFAULT_HEARTBEAT_TIMEOUT, DEFAULT_MIN_HEARTBEAT_INTERVAL,
};
use docdb_cluster::{MonitorSettings, MonitorSettingsConfig};
use docdb_common::types::Endpoint;
use docdb_common::{DocDbError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Prefix for environment variables that override file settings
pub const ENV_PREFIX: &str = "DOCDB";

/// Client configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Seed hosts, `host[:port]`
    #[serde(default)]
    pub hosts: Vec<String>,
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,
    #[serde(default = "default_heartbeat_timeout_ms")]
    pub heartbeat_timeout_ms: u64,
    #[serde(default = "default_min_heartbeat_interval_ms")]
    pub min_heartbeat_interval_ms: u64,
    /// Evaluate the standard capability catalogue on every heartbeat
    #[serde(default = "default_detect_capabilities")]
    pub detect_capabilities: bool,
}

fn default_heartbeat_interval_ms() -> u64 {
    DEFAULT_HEARTBEAT_INTERVAL.as_millis() as u64
}

fn default_heartbeat_timeout_ms() -> u64 {
    DEFAULT_HEARTBEAT_TIMEOUT.as_millis() as u64
}

fn default_min_heartbeat_interval_ms() -> u64 {
    DEFAULT_MIN_HEARTBEAT_INTERVAL.as_millis() as u64
}

fn default_detect_capabilities() -> bool {
    true
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            hosts: Vec::new(),
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            heartbeat_timeout_ms: default_heartbeat_timeout_ms(),
            min_heartbeat_interval_ms: default_min_heartbeat_interval_ms(),
            detect_capabilities: default_detect_capabilities(),
        }
    }
}

impl ClientConfig {
    /// Load from a file, then apply `DOCDB_*` environment overrides
    /// (for example `DOCDB_HEARTBEAT_INTERVAL_MS=5000` or `DOCDB_HOSTS=a:1,b:2`).
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let settings = config::Config::builder()
            .add_source(config::File::from(path))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("hosts"),
            )
            .build()
            .with_context(|| format!("Failed to read client configuration from {}", path.display()))?;

        let config: ClientConfig = settings
            .try_deserialize()
            .context("Invalid client configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.hosts.is_empty() {
            return Err(DocDbError::Configuration {
                message: "at least one host is required".to_string(),
            });
        }
        self.endpoints()?;
        self.monitor_settings()?;
        Ok(())
    }

    pub fn endpoints(&self) -> Result<Vec<Endpoint>> {
        let mut endpoints: Vec<Endpoint> = Vec::with_capacity(self.hosts.len());
        for host in &self.hosts {
            let endpoint: Endpoint = host.parse()?;
            if !endpoints.contains(&endpoint) {
                endpoints.push(endpoint);
            }
        }
        Ok(endpoints)
    }

    pub fn monitor_settings(&self) -> Result<MonitorSettings> {
        MonitorSettings::try_from(MonitorSettingsConfig {
            heartbeat_interval_ms: self.heartbeat_interval_ms,
            heartbeat_timeout_ms: self.heartbeat_timeout_ms,
            min_heartbeat_interval_ms: self.min_heartbeat_interval_ms,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::time::Duration;

    #[test]
    fn test_defaults_need_hosts() {
        let config = ClientConfig::default();
        assert!(config.detect_capabilities);
        assert!(matches!(config.validate(), Err(DocDbError::Configuration { .. })));
    }

    #[test]
    fn test_zero_interval_is_rejected() {
        let config = ClientConfig {
            hosts: vec!["db1".to_string()],
            heartbeat_interval_ms: 0,
            ..ClientConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_duplicate_hosts_collapse() {
        let config = ClientConfig {
            hosts: vec!["db1".to_string(), "db1:27017".to_string(), "db2:27018".to_string()],
            ..ClientConfig::default()
        };
        let endpoints = config.endpoints().unwrap();
        assert_eq!(endpoints.len(), 2);
        assert_eq!(endpoints[1].port(), 27018);
    }

    #[test]
    fn test_load_from_file_with_env_override() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
hosts = ["db1:27017", "db2:27017"]
heartbeat_interval_ms = 2000
detect_capabilities = false
"#
        )
        .unwrap();

        std::env::set_var("DOCDB_HEARTBEAT_TIMEOUT_MS", "750");
        let loaded = ClientConfig::load(file.path());
        std::env::remove_var("DOCDB_HEARTBEAT_TIMEOUT_MS");
        let config = loaded.unwrap();

        assert_eq!(config.hosts.len(), 2);
        assert!(!config.detect_capabilities);

        let settings = config.monitor_settings().unwrap();
        assert_eq!(settings.heartbeat_interval(), Duration::from_secs(2));
        assert_eq!(settings.heartbeat_timeout(), Duration::from_millis(750));
        assert_eq!(settings.min_heartbeat_interval(), DEFAULT_MIN_HEARTBEAT_INTERVAL);
    }

    #[test]
    fn test_load_missing_file_fails() {
        assert!(ClientConfig::load("/nonexistent/docdb-client.toml").is_err());
    }
}
