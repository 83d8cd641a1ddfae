//! Recording reverse proxy.
//!
//! Forwards client requests to the mock engine, filters hop-by-hop headers in
//! both directions and reports every completed exchange to an observer before
//! the client sees the response. Bodies are buffered in full.
//!
//! # Module Structure
//!
//! - `headers` - Header policy (proxy and recording denylists)
//! - `handler` - Per-request round trip and the `Exchange` type
//! - `forwarding` - Upstream URI join and buffered forwarding
//! - `client` - Pooled HTTP client creation
//! - `server` - ProxyServer struct and accept loop
//! - `network` - Listener creation

mod client;
mod error;
mod forwarding;
mod handler;
pub mod headers;
mod network;
mod server;


pub use client::{create_http_client, HttpClient};
pub use error::ProxyError;
pub use forwarding::{error_response, join_upstream_uri};
pub use handler::{handle, Exchange, ExchangeObserver, NoopObserver};
pub use headers::{filter_and_copy, recordable_headers, Direction};
pub use server::ProxyServer;
