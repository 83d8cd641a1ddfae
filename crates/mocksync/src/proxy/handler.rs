//! Per-request handling for the recording proxy.
//!
//! One call to [`handle`] performs a full buffered round trip: read the client
//! body, forward it, read the upstream body, hand the complete [`Exchange`] to
//! the observer and only then build the client response.

use super::client::HttpClient;
use super::error::ProxyError;
use super::forwarding::{error_response, forward, join_upstream_uri};
use super::headers::{filter_and_copy, Direction};
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Body;
use hyper::{HeaderMap, Method, Request, Response, StatusCode};
use std::fmt::Display;
use std::time::{Duration, Instant};
use tracing::{debug, error, info};

/// One completed request/response pair.
#[derive(Debug, Clone)]
pub struct Exchange {
    pub method: Method,
    pub path: String,
    pub request_headers: HeaderMap,
    pub request_body: Bytes,
    pub status: StatusCode,
    pub response_headers: HeaderMap,
    pub response_body: Bytes,
    /// Time spent waiting on the upstream round trip.
    pub latency: Duration,
}

/// Receives every completed exchange, synchronously, before the client
/// response is written. Implementations must not block for long: the client
/// is waiting.
pub trait ExchangeObserver: Send + Sync {
    fn on_exchange(&self, exchange: &Exchange);
}

impl<F> ExchangeObserver for F
where
    F: Fn(&Exchange) + Send + Sync,
{
    fn on_exchange(&self, exchange: &Exchange) {
        self(exchange)
    }
}

/// Observer that ignores every exchange.
pub struct NoopObserver;

impl ExchangeObserver for NoopObserver {
    fn on_exchange(&self, _exchange: &Exchange) {}
}

/// Proxy one request to `upstream` and return the response for the client.
///
/// Failures never propagate: an unreadable client body gives `400`, an
/// unreachable or misbehaving upstream gives `502`, and a response that cannot
/// be assembled gives `500`. The observer only sees exchanges that completed.
pub async fn handle<B>(
    http_client: &HttpClient,
    upstream: &str,
    req: Request<B>,
    observer: &dyn ExchangeObserver,
    timeout: Option<Duration>,
) -> Response<Full<Bytes>>
where
    B: Body,
    B::Error: Display,
{
    let start_time = Instant::now();
    let method = req.method().clone();
    let uri = req.uri().clone();
    debug!("received request {} {}", method, uri);

    let exchange = match round_trip(http_client, upstream, req, timeout).await {
        Ok(exchange) => exchange,
        Err(e) => {
            error!("{} {}: {}", method, uri, e);
            return error_response(e.status(), &e.to_string());
        }
    };

    observer.on_exchange(&exchange);

    match client_response(&exchange) {
        Ok(response) => {
            info!(
                "proxied {} {} to upstream [status: {}, body {} bytes] in {:?}",
                method,
                uri,
                exchange.status.as_u16(),
                exchange.response_body.len(),
                start_time.elapsed()
            );
            response
        }
        Err(e) => {
            error!("{} {}: {}", method, uri, e);
            error_response(e.status(), &e.to_string())
        }
    }
}

async fn round_trip<B>(
    http_client: &HttpClient,
    upstream: &str,
    req: Request<B>,
    timeout: Option<Duration>,
) -> Result<Exchange, ProxyError>
where
    B: Body,
    B::Error: Display,
{
    let (parts, body) = req.into_parts();
    let request_body = body
        .collect()
        .await
        .map_err(|e| ProxyError::ReadRequestBody(e.to_string()))?
        .to_bytes();

    let upstream_uri = join_upstream_uri(upstream, &parts.uri)?;

    let mut upstream_headers = HeaderMap::with_capacity(parts.headers.len());
    filter_and_copy(
        &parts.headers,
        &mut upstream_headers,
        Direction::ClientToUpstream,
    );

    let sent_at = Instant::now();
    let (response_parts, response_body) = forward(
        http_client,
        parts.method.clone(),
        upstream_uri,
        upstream_headers,
        request_body.clone(),
        timeout,
    )
    .await?;

    Ok(Exchange {
        method: parts.method,
        path: parts.uri.path().to_string(),
        request_headers: parts.headers,
        request_body,
        status: response_parts.status,
        response_headers: response_parts.headers,
        response_body,
        latency: sent_at.elapsed(),
    })
}

fn client_response(exchange: &Exchange) -> Result<Response<Full<Bytes>>, ProxyError> {
    let mut builder = Response::builder().status(exchange.status);
    if let Some(headers) = builder.headers_mut() {
        filter_and_copy(
            &exchange.response_headers,
            headers,
            Direction::UpstreamToClient,
        );
    }
    builder
        .body(Full::new(exchange.response_body.clone()))
        .map_err(|e| ProxyError::BuildResponse(e.to_string()))
}
