//! Configuration for mcpipe clients

use crate::behavior::Behaviors;
use crate::compression::CompressionOptions;
use crate::error::{Error, Result};
use serde::Deserialize;
use std::path::Path;

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub client: ClientConfig,
    /// Behaviors applied right after the servers are added
    pub behaviors: Behaviors,
    pub compression: CompressionConfig,
    pub metrics: MetricsConfig,
}

/// Server list and connection options
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Server strings: `host[:port]`, `[v6]:port`, `udp:host[:port]` or a socket path
    pub servers: Vec<String>,

    /// Use the binary protocol
    pub binary: bool,

    /// SASL credentials
    pub username: Option<String>,
    pub password: Option<String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            servers: vec!["127.0.0.1:11211".to_string()],
            binary: false,
            username: None,
            password: None,
        }
    }
}

/// Default compression settings for stores
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CompressionConfig {
    /// Compress values at least this long (0 = never)
    pub min_compress_len: usize,

    /// zlib level 0-9, unset for zlib's default
    pub compress_level: Option<u32>,
}

impl CompressionConfig {
    pub fn options(&self) -> CompressionOptions {
        CompressionOptions::new(self.min_compress_len, self.compress_level)
    }
}

/// Metrics configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Enable metrics collection
    pub enabled: bool,
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path.as_ref())
            .map_err(|e| Error::Config(format!("Failed to read config file: {e}")))?;

        Self::from_toml(&contents)
    }

    /// Parse configuration from TOML text
    pub fn from_toml(contents: &str) -> Result<Self> {
        toml::from_str(contents).map_err(|e| Error::Config(format!("Failed to parse config: {e}")))
    }

    /// Load configuration from environment variables or use defaults
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(servers) = std::env::var("MCPIPE_SERVERS") {
            config.client.servers = servers
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect();
        }

        if let Ok(binary) = std::env::var("MCPIPE_BINARY") {
            config.client.binary = binary.to_lowercase() == "true" || binary == "1";
        }

        if let Ok(len) = std::env::var("MCPIPE_MIN_COMPRESS_LEN")
            && let Ok(n) = len.parse()
        {
            config.compression.min_compress_len = n;
        }

        if let Ok(level) = std::env::var("MCPIPE_COMPRESS_LEVEL")
            && let Ok(n) = level.parse()
        {
            config.compression.compress_level = Some(n);
        }

        if let Ok(enabled) = std::env::var("MCPIPE_METRICS_ENABLED") {
            config.metrics.enabled = enabled.to_lowercase() == "true" || enabled == "1";
        }

        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::behavior::BehaviorValue;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.client.servers, vec!["127.0.0.1:11211"]);
        assert!(!config.client.binary);
        assert!(config.behaviors.is_empty());
        assert_eq!(config.compression.options(), CompressionOptions::disabled());
        assert!(!config.metrics.enabled);
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
[client]
servers = ["cache1:11211", "cache2:11211"]

[behaviors]
ketama = true
hash = "fnv1a_32"
connect_timeout = 250

[compression]
min_compress_len = 1024
compress_level = 9
"#
        )
        .unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.client.servers.len(), 2);
        assert_eq!(config.behaviors["ketama"], BehaviorValue::Bool(true));
        assert_eq!(config.behaviors["hash"], BehaviorValue::Name("fnv1a_32".into()));
        assert_eq!(config.behaviors["connect_timeout"], BehaviorValue::Int(250));
        assert_eq!(
            config.compression.options(),
            CompressionOptions::new(1024, Some(9))
        );
    }

    #[test]
    fn test_errors() {
        assert!(matches!(
            Config::from_file("/nonexistent/mcpipe.toml"),
            Err(Error::Config(msg)) if msg.contains("read")
        ));
        assert!(matches!(
            Config::from_toml("[client]\nservers = 5"),
            Err(Error::Config(msg)) if msg.contains("parse")
        ));
    }
}
