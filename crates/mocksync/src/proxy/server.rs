//! ProxyServer struct and main run loop.
//!
//! Accepts connections, serves each one on its own task over HTTP/1.1 and
//! hands every request to [`handle`].

use super::client::{create_http_client, HttpClient};
use super::handler::{handle, ExchangeObserver};
use super::network::create_reusable_listener;
use crate::config::ProxyConfig;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{debug, error, info};

/// The recording proxy server.
pub struct ProxyServer {
    listen: SocketAddr,
    upstream: String,
    request_timeout: Option<Duration>,
    http_client: HttpClient,
    observer: Arc<dyn ExchangeObserver>,
}

impl ProxyServer {
    /// Create a new ProxyServer from configuration.
    pub fn new(config: &ProxyConfig, observer: Arc<dyn ExchangeObserver>) -> Self {
        Self {
            listen: SocketAddr::from(([0, 0, 0, 0], config.port)),
            upstream: config.upstream.clone(),
            request_timeout: config.connection_pool.request_timeout(),
            http_client: create_http_client(&config.connection_pool),
            observer,
        }
    }

    /// Bind the configured port and serve until `shutdown` resolves.
    pub async fn run<S>(self, shutdown: S) -> Result<(), anyhow::Error>
    where
        S: Future<Output = ()> + Send,
    {
        let listener = create_reusable_listener(self.listen)?;
        self.serve(listener, shutdown).await
    }

    /// Serve connections from an already bound listener until `shutdown`
    /// resolves. Connections already accepted run to completion.
    pub async fn serve<S>(self, listener: TcpListener, shutdown: S) -> Result<(), anyhow::Error>
    where
        S: Future<Output = ()> + Send,
    {
        let addr = listener.local_addr()?;
        info!("Listening on http://{}", addr);
        info!("Proxying to {}", self.upstream);

        let server = Arc::new(self);
        tokio::pin!(shutdown);

        loop {
            let accepted = tokio::select! {
                accepted = listener.accept() => accepted,
                _ = &mut shutdown => {
                    info!("Proxy on {} shutting down", addr);
                    return Ok(());
                }
            };

            let (stream, remote_addr) = match accepted {
                Ok(conn) => conn,
                Err(e) => {
                    error!("Accept error on {}: {}", addr, e);
                    continue;
                }
            };

            let server = Arc::clone(&server);
            tokio::spawn(async move {
                let io = TokioIo::new(stream);
                let service = service_fn(move |req| {
                    let server = Arc::clone(&server);
                    async move {
                        let response = handle(
                            &server.http_client,
                            &server.upstream,
                            req,
                            server.observer.as_ref(),
                            server.request_timeout,
                        )
                        .await;
                        Ok::<_, Infallible>(response)
                    }
                });

                if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                    debug!("Error serving connection from {}: {}", remote_addr, err);
                }
            });
        }
    }
}
