//! Request forwarding to the upstream engine.

use super::client::HttpClient;
use super::error::ProxyError;
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::http::response::Parts;
use hyper::{HeaderMap, Method, Request, Response, StatusCode, Uri};
use std::time::Duration;
use tracing::{debug, trace};

/// Helper function to create an error response.
pub fn error_response(status: StatusCode, message: &str) -> Response<Full<Bytes>> {
    let body = serde_json::json!({ "error": message }).to_string();
    let mut response = Response::new(Full::new(Bytes::from(body)));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response
}

/// Join the upstream base URL with the path and query of the client request.
///
/// A base path is kept (`http://host/api` + `/pets` gives `http://host/api/pets`)
/// and exactly one slash separates the two parts.
pub fn join_upstream_uri(base: &str, uri: &Uri) -> Result<Uri, ProxyError> {
    let path = uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/");
    let invalid = |reason: String| ProxyError::InvalidUpstreamUri {
        base: base.to_string(),
        path: path.to_string(),
        reason,
    };

    let joined = format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    );
    let upstream_uri: Uri = joined.parse().map_err(|e| invalid(format!("{e}")))?;

    match upstream_uri.scheme_str() {
        Some("http") | Some("https") => {}
        Some(other) => return Err(invalid(format!("unsupported scheme '{other}'"))),
        None => return Err(invalid("missing scheme".to_string())),
    }
    if upstream_uri.authority().is_none() {
        return Err(invalid("missing host".to_string()));
    }
    Ok(upstream_uri)
}

/// Send a buffered request upstream and buffer the whole response.
///
/// `timeout` bounds the complete round trip, including reading the body. No
/// retry is attempted.
pub async fn forward(
    http_client: &HttpClient,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
    timeout: Option<Duration>,
) -> Result<(Parts, Bytes), ProxyError> {
    debug!(
        "invoking upstream {} with {} [body: {} bytes]",
        uri,
        method,
        body.len()
    );

    let mut upstream_req = Request::new(Full::new(body));
    *upstream_req.method_mut() = method;
    *upstream_req.uri_mut() = uri;
    *upstream_req.headers_mut() = headers;

    let round_trip = async {
        let upstream_response = http_client
            .request(upstream_req)
            .await
            .map_err(|e| ProxyError::Upstream(describe_client_error(&e)))?;
        let (parts, body) = upstream_response.into_parts();
        let body_bytes = body
            .collect()
            .await
            .map_err(|e| ProxyError::ReadResponseBody(e.to_string()))?
            .to_bytes();
        Ok::<_, ProxyError>((parts, body_bytes))
    };

    let (parts, body_bytes) = match timeout {
        Some(limit) => tokio::time::timeout(limit, round_trip)
            .await
            .map_err(|_| ProxyError::Timeout(limit))??,
        None => round_trip.await?,
    };

    trace!(
        "upstream responded with status {} [body: {} bytes]",
        parts.status,
        body_bytes.len()
    );
    Ok((parts, body_bytes))
}

/// The legacy client error only says "client error (Connect)"; the cause is
/// in the source chain.
fn describe_client_error(err: &hyper_util::client::legacy::Error) -> String {
    use std::error::Error;

    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}
