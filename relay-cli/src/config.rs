use anyhow::{Context, Result};
use link_engine::{LinkConfig, PollConfig, RetryPolicy};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use topic_bus::BusConfig;

/// Contents of `config.toml`. Every section is optional.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Default `EnvFilter` directive when `RUST_LOG` is unset.
    pub log_filter: Option<String>,
    /// Emit JSON log lines.
    pub log_json: bool,
    pub bus: BusConfig,
    pub link: LinkConfig,
    pub retry: RetryPolicy,
    /// Defaults for the `poll` command.
    pub poll: PollConfig,
}

impl AppConfig {
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("chatrelay").join("config.toml"))
    }

    /// Load from `path`, or from the default location when it exists.
    /// An explicit path that cannot be read is an error.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => match Self::default_path() {
                Some(path) if path.exists() => path,
                _ => return Ok(Self::default()),
            },
        };

        let text = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        toml::from_str(&text)
            .with_context(|| format!("Invalid config file {}", path.display()))
    }

    /// Bus settings with the command-line endpoint applied.
    pub fn bus_config(&self, endpoint: Option<&str>) -> BusConfig {
        match endpoint {
            Some(endpoint) => self.bus.clone().with_endpoint(endpoint),
            None => self.bus.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_partial_file() {
        let config: AppConfig = toml::from_str(
            r#"
            log_filter = "chatrelay=debug,topic_bus=trace"

            [bus]
            endpoint = "10.0.0.2:5563"
            linger = 0

            [link]
            handshake_timeout = 15000

            [retry]
            max_attempts = 3
            "#,
        )
        .unwrap();

        assert_eq!(config.log_filter.as_deref(), Some("chatrelay=debug,topic_bus=trace"));
        assert!(!config.log_json);
        assert_eq!(config.bus.endpoint, "10.0.0.2:5563");
        assert_eq!(config.bus.linger, Some(Duration::ZERO));
        assert_eq!(config.link.handshake_timeout, Some(Duration::from_secs(15)));
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.retry.max_delay_ms, 60000);
        assert_eq!(config.poll.interval, Duration::from_secs(30));
    }

    #[test]
    fn test_endpoint_override() {
        let config = AppConfig::default();
        assert_eq!(config.bus_config(Some("127.0.0.1:7000")).endpoint, "127.0.0.1:7000");
        assert_eq!(config.bus_config(None).endpoint, config.bus.endpoint);
    }

    #[test]
    fn test_load_explicit_path() {
        let path = std::env::temp_dir().join(format!("chatrelay-{}.toml", std::process::id()));
        std::fs::write(&path, "log_json = true\n").unwrap();
        let config = AppConfig::load(Some(&path)).unwrap();
        std::fs::remove_file(&path).unwrap();
        assert!(config.log_json);

        assert!(AppConfig::load(Some(&path)).is_err());
    }
}
