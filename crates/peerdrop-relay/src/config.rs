//! Relay configuration

use peerdrop_core::SESSION_ID_LEN;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Address to bind
    pub host: String,

    /// Port to listen on
    pub port: u16,

    /// Messages queued per connection; signals beyond it are dropped
    pub outbound_buffer: usize,

    /// Length of issued session ids
    pub id_length: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3001,
            outbound_buffer: 64,
            id_length: SESSION_ID_LEN,
        }
    }
}

impl RelayConfig {
    /// Load configuration from a file
    pub fn load(path: &std::path::Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: RelayConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// `host:port` to bind the listener to
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: RelayConfig = toml::from_str("port = 8080").unwrap();
        assert_eq!(config.port, 8080);
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.id_length, SESSION_ID_LEN);
        assert_eq!(config.bind_addr(), "0.0.0.0:8080");
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("relay.toml");
        std::fs::write(&path, "host = \"127.0.0.1\"\noutbound_buffer = 8\n").unwrap();

        let config = RelayConfig::load(&path).unwrap();
        assert_eq!(config.bind_addr(), "127.0.0.1:3001");
        assert_eq!(config.outbound_buffer, 8);
    }
}
