//! Recording proxy configuration

use std::time::Duration;

use fakerpc_core::{FakeRpcError, Result};
use reqwest::Url;
use serde::Deserialize;

/// Default listen address: loopback, ephemeral port
pub const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:0";

/// Recording proxy configuration
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    /// Address to bind, `host:port`
    pub listen_addr: String,
    /// Upstream URL; a missing scheme means `http://`
    pub target: String,
    /// Coalescing interval for same-direction writes
    pub max_interval: Option<Duration>,
    /// Capture filter text stored in the log
    pub filter: Option<String>,
}

impl ProxyConfig {
    /// Configuration proxying to `target` with all other values defaulted
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            ..Self::default()
        }
    }

    /// Create a new configuration builder
    pub fn builder() -> ProxyConfigBuilder {
        ProxyConfigBuilder::default()
    }

    /// Configuration for `target`, overridden from the environment
    ///
    /// Reads `FAKERPC_LISTEN_ADDR`, `FAKERPC_MAX_INTERVAL_MS` and
    /// `FAKERPC_FILTER`. Unparsable values are ignored.
    pub fn from_env(target: impl Into<String>) -> Self {
        let mut config = Self::new(target);
        if let Ok(addr) = std::env::var("FAKERPC_LISTEN_ADDR") {
            config.listen_addr = addr;
        }
        if let Ok(ms) = std::env::var("FAKERPC_MAX_INTERVAL_MS") {
            match ms.parse::<u64>() {
                Ok(ms) => config.max_interval = Some(Duration::from_millis(ms)),
                Err(e) => tracing::warn!(value = %ms, error = %e, "Ignoring FAKERPC_MAX_INTERVAL_MS"),
            }
        }
        if let Ok(filter) = std::env::var("FAKERPC_FILTER") {
            config.filter = Some(filter);
        }
        config
    }

    /// Parse and validate the target URL
    pub fn target(&self) -> Result<Target> {
        Target::parse(&self.target)
    }
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            listen_addr: DEFAULT_LISTEN_ADDR.to_string(),
            target: String::new(),
            max_interval: None,
            filter: None,
        }
    }
}

/// Builder for ProxyConfig
#[derive(Debug, Default)]
pub struct ProxyConfigBuilder {
    listen_addr: Option<String>,
    target: Option<String>,
    max_interval: Option<Duration>,
    filter: Option<String>,
}

impl ProxyConfigBuilder {
    /// Set the listen address
    pub fn listen_addr(mut self, addr: impl Into<String>) -> Self {
        self.listen_addr = Some(addr.into());
        self
    }

    /// Set the upstream URL
    pub fn target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    /// Set the coalescing interval
    pub fn max_interval(mut self, interval: Duration) -> Self {
        self.max_interval = Some(interval);
        self
    }

    /// Set the capture filter
    pub fn filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }

    /// Build the configuration
    pub fn build(self) -> ProxyConfig {
        ProxyConfig {
            listen_addr: self
                .listen_addr
                .unwrap_or_else(|| DEFAULT_LISTEN_ADDR.to_string()),
            target: self.target.unwrap_or_default(),
            max_interval: self.max_interval,
            filter: self.filter,
        }
    }
}

/// A validated upstream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    /// Scheme, authority and base path, without a trailing slash
    pub base: String,
    /// Value for the forwarded `Host` header
    pub authority: String,
    /// `host:port` used for address resolution
    pub host_port: String,
}

impl Target {
    /// Parse a target URL, defaulting the scheme to `http`
    pub fn parse(raw: &str) -> Result<Self> {
        let invalid = |reason: String| FakeRpcError::InvalidTarget {
            url: raw.to_string(),
            reason,
        };

        let with_scheme = if raw.contains("://") {
            raw.to_string()
        } else {
            format!("http://{raw}")
        };
        let url = Url::parse(&with_scheme).map_err(|e| invalid(e.to_string()))?;

        match url.scheme() {
            "http" | "https" => {}
            other => return Err(invalid(format!("unsupported scheme '{other}'"))),
        }
        let host = url
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| invalid("missing host".to_string()))?;
        let port = url
            .port_or_known_default()
            .ok_or_else(|| invalid("missing port".to_string()))?;

        let authority = match url.port() {
            Some(p) => format!("{host}:{p}"),
            None => host.to_string(),
        };
        let path = url.path().trim_end_matches('/');

        Ok(Target {
            base: format!("{}://{}{}", url.scheme(), authority, path),
            authority,
            host_port: format!("{host}:{port}"),
        })
    }

    /// Upstream URL for a request path (with query)
    pub fn url_for(&self, path_and_query: &str) -> String {
        if path_and_query.starts_with('/') {
            format!("{}{}", self.base, path_and_query)
        } else {
            format!("{}/{}", self.base, path_and_query)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_defaults() {
        let config = ProxyConfig::builder().target("localhost:8080").build();
        assert_eq!(config.listen_addr, DEFAULT_LISTEN_ADDR);
        assert_eq!(config.target, "localhost:8080");
        assert!(config.max_interval.is_none());
        assert_eq!(config, ProxyConfig::new("localhost:8080"));
    }

    #[test]
    fn test_target_defaults_scheme_and_port() {
        let t = Target::parse("example.com").unwrap();
        assert_eq!(t.base, "http://example.com");
        assert_eq!(t.authority, "example.com");
        assert_eq!(t.host_port, "example.com:80");

        let t = Target::parse("https://example.com/api/").unwrap();
        assert_eq!(t.base, "https://example.com/api");
        assert_eq!(t.host_port, "example.com:443");
        assert_eq!(t.url_for("/v1?x=1"), "https://example.com/api/v1?x=1");

        let t = Target::parse("127.0.0.1:9000").unwrap();
        assert_eq!(t.authority, "127.0.0.1:9000");
        assert_eq!(t.url_for("/"), "http://127.0.0.1:9000/");
    }

    #[test]
    fn test_target_rejects_bad_urls() {
        for bad in ["", "http://", "ftp://example.com", "http://[::1"] {
            let err = Target::parse(bad).unwrap_err();
            assert_eq!(err.error_code(), "INVALID_TARGET", "input {bad:?}");
        }
    }

    #[test]
    fn test_deserialize_partial() {
        let config: ProxyConfig =
            serde_json::from_str(r#"{"target": "http://backend", "filter": "tcp"}"#).unwrap();
        assert_eq!(config.listen_addr, DEFAULT_LISTEN_ADDR);
        assert_eq!(config.filter.as_deref(), Some("tcp"));
    }
}
