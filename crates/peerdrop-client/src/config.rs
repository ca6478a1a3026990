//! Client configuration

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// WebSocket URL of the signaling relay
    pub relay_url: String,

    /// Origin used when building shareable links
    pub share_origin: String,

    /// Directory received files are written to
    pub download_dir: String,

    /// STUN/TURN servers handed to the connectivity subsystem
    pub ice_servers: Vec<IceServerConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IceServerConfig {
    /// Server URLs, e.g. `stun:stun.l.google.com:19302`
    pub urls: Vec<String>,
    /// TURN username
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    /// TURN credential
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            relay_url: "ws://localhost:3001".to_string(),
            share_origin: "http://localhost:3000".to_string(),
            download_dir: "~/Downloads".to_string(),
            ice_servers: vec![IceServerConfig {
                urls: vec!["stun:stun.l.google.com:19302".to_string()],
                username: None,
                credential: None,
            }],
        }
    }
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &std::path::Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Load configuration if the file exists, defaults otherwise
    pub fn load_or_default(path: &std::path::Path) -> anyhow::Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Expand ~ in download_dir path
    pub fn download_dir(&self) -> std::path::PathBuf {
        expand_path(&self.download_dir)
    }
}

/// Expand a leading `~/` to the home directory
pub fn expand_path(path: &str) -> std::path::PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    std::path::PathBuf::from(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_roundtrips_through_toml() {
        let toml = toml::to_string_pretty(&Config::default()).unwrap();
        let config: Config = toml::from_str(&toml).unwrap();
        assert_eq!(config.relay_url, "ws://localhost:3001");
        assert_eq!(config.ice_servers.len(), 1);
        assert!(config.ice_servers[0].username.is_none());
    }

    #[test]
    fn test_partial_config() {
        let config: Config = toml::from_str(
            r#"
            relay_url = "wss://relay.example.com"

            [[ice_servers]]
            urls = ["turn:turn.example.com:3478"]
            username = "user"
            credential = "secret"
            "#,
        )
        .unwrap();
        assert_eq!(config.relay_url, "wss://relay.example.com");
        assert_eq!(config.share_origin, "http://localhost:3000");
        assert_eq!(config.ice_servers[0].credential.as_deref(), Some("secret"));
    }

    #[test]
    fn test_load_or_default_missing_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let config = Config::load_or_default(&dir.path().join("missing.toml")).unwrap();
        assert_eq!(config.download_dir, "~/Downloads");
    }

    #[test]
    fn test_expand_path() {
        assert_eq!(expand_path("/tmp/x"), std::path::PathBuf::from("/tmp/x"));
        if let Some(home) = dirs::home_dir() {
            assert_eq!(expand_path("~/Downloads"), home.join("Downloads"));
        }
    }
}
