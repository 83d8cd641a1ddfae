//! Proxy upstream and connection pool configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Settings for the recording proxy.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProxyConfig {
    /// Base URL of the engine, e.g. `http://localhost:8080`
    pub upstream: String,
    /// Port the proxy listens on
    pub port: u16,
    #[serde(default)]
    pub connection_pool: ConnectionPoolConfig,
}

impl ProxyConfig {
    /// Validate that the upstream URL is usable
    pub fn validate(&self) -> Result<(), String> {
        let url_parts: Vec<&str> = self.upstream.splitn(2, "://").collect();
        if url_parts.len() != 2 || url_parts[1].is_empty() {
            return Err(format!(
                "Invalid upstream URL (expected scheme://host[:port]): {}",
                self.upstream
            ));
        }
        match url_parts[0] {
            "http" | "https" => Ok(()),
            other => Err(format!(
                "Unsupported upstream protocol '{other}'. Currently supported: http, https"
            )),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ConnectionPoolConfig {
    #[serde(default = "default_pool_max_idle_per_host")]
    pub max_idle_per_host: usize,

    #[serde(default = "default_pool_idle_timeout")]
    pub idle_timeout_secs: u64,

    #[serde(default = "default_keepalive_timeout")]
    pub keepalive_timeout_secs: u64,

    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Upper bound on a whole proxied round trip; 0 leaves it to the transport
    #[serde(default)]
    pub request_timeout_secs: u64,
}

impl ConnectionPoolConfig {
    pub fn request_timeout(&self) -> Option<Duration> {
        (self.request_timeout_secs > 0).then(|| Duration::from_secs(self.request_timeout_secs))
    }
}

impl Default for ConnectionPoolConfig {
    fn default() -> Self {
        Self {
            max_idle_per_host: default_pool_max_idle_per_host(),
            idle_timeout_secs: default_pool_idle_timeout(),
            keepalive_timeout_secs: default_keepalive_timeout(),
            connect_timeout_secs: default_connect_timeout(),
            request_timeout_secs: 0,
        }
    }
}

fn default_pool_max_idle_per_host() -> usize {
    10
}

fn default_pool_idle_timeout() -> u64 {
    30
}

fn default_keepalive_timeout() -> u64 {
    60
}

fn default_connect_timeout() -> u64 {
    5
}

#[cfg(test)]
mod tests {
    use super::*;

    fn proxy(upstream: &str) -> ProxyConfig {
        ProxyConfig {
            upstream: upstream.to_string(),
            port: 8081,
            connection_pool: ConnectionPoolConfig::default(),
        }
    }

    #[test]
    fn test_validate_accepts_http() {
        assert!(proxy("http://localhost:8080").validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_missing_scheme() {
        assert!(proxy("localhost:8080").validate().is_err());
    }

    #[test]
    fn test_validate_rejects_other_scheme() {
        let err = proxy("ws://localhost:8080").validate().unwrap_err();
        assert!(err.contains("Unsupported upstream protocol"));
    }

    #[test]
    fn test_request_timeout_zero_means_none() {
        let mut pool = ConnectionPoolConfig::default();
        assert_eq!(pool.request_timeout(), None);
        pool.request_timeout_secs = 30;
        assert_eq!(pool.request_timeout(), Some(Duration::from_secs(30)));
    }

    #[test]
    fn test_pool_defaults_from_empty_yaml() {
        let pool: ConnectionPoolConfig = serde_yaml::from_str("{}").unwrap();
        assert_eq!(pool.max_idle_per_host, 10);
        assert_eq!(pool.connect_timeout_secs, 5);
        assert_eq!(pool.request_timeout_secs, 0);
    }
}
