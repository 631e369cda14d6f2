//! Replay server configuration

use serde::Deserialize;

/// Default listen address: loopback, ephemeral port
pub const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:0";

/// Replay server configuration
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to bind, `host:port`
    pub listen_addr: String,
}

impl ServerConfig {
    /// Create a new configuration builder
    pub fn builder() -> ServerConfigBuilder {
        ServerConfigBuilder::default()
    }

    /// Defaults overridden by `FAKERPC_LISTEN_ADDR`
    pub fn from_env() -> Self {
        match std::env::var("FAKERPC_LISTEN_ADDR") {
            Ok(listen_addr) => Self { listen_addr },
            Err(_) => Self::default(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: DEFAULT_LISTEN_ADDR.to_string(),
        }
    }
}

/// Builder for ServerConfig
#[derive(Debug, Default)]
pub struct ServerConfigBuilder {
    listen_addr: Option<String>,
}

impl ServerConfigBuilder {
    /// Set the listen address
    pub fn listen_addr(mut self, addr: impl Into<String>) -> Self {
        self.listen_addr = Some(addr.into());
        self
    }

    /// Build the configuration
    pub fn build(self) -> ServerConfig {
        ServerConfig {
            listen_addr: self
                .listen_addr
                .unwrap_or_else(|| DEFAULT_LISTEN_ADDR.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder() {
        assert_eq!(ServerConfig::builder().build(), ServerConfig::default());
        let config = ServerConfig::builder().listen_addr("0.0.0.0:8079").build();
        assert_eq!(config.listen_addr, "0.0.0.0:8079");
    }

    #[test]
    fn test_deserialize_empty_object() {
        let config: ServerConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.listen_addr, DEFAULT_LISTEN_ADDR);
    }
}
