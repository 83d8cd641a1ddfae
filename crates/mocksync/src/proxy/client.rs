//! HTTP client creation and configuration.
//!
//! The proxy talks plain HTTP/1.1 to a locally running engine, so the shared
//! client is a pooled `hyper_util` client over an `HttpConnector`. Bodies are
//! always fully buffered before sending, hence `Full<Bytes>`.

use crate::config::ConnectionPoolConfig;
use bytes::Bytes;
use http_body_util::Full;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use std::time::Duration;
use tracing::debug;

/// Type alias for the HTTP client used by the proxy.
pub type HttpClient = Client<HttpConnector, Full<Bytes>>;

/// Create a shared HTTP client with connection pooling.
pub fn create_http_client(pool: &ConnectionPoolConfig) -> HttpClient {
    let mut http_connector = HttpConnector::new();
    http_connector.set_keepalive(Some(Duration::from_secs(pool.keepalive_timeout_secs)));
    http_connector.set_connect_timeout(Some(Duration::from_secs(pool.connect_timeout_secs)));
    http_connector.set_nodelay(true);

    let http_client = Client::builder(TokioExecutor::new())
        .pool_idle_timeout(Duration::from_secs(pool.idle_timeout_secs))
        .pool_max_idle_per_host(pool.max_idle_per_host)
        .build(http_connector);

    debug!(
        "Connection pool configured: max_idle={}, idle_timeout={}s, keepalive={}s, request_timeout={}",
        pool.max_idle_per_host,
        pool.idle_timeout_secs,
        pool.keepalive_timeout_secs,
        pool.request_timeout()
            .map(|t| format!("{}s", t.as_secs()))
            .unwrap_or_else(|| "none".to_string())
    );

    http_client
}
