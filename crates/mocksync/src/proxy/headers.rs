//! Header policy for the recording proxy.
//!
//! Two denylists live here and they are deliberately kept apart:
//!
//! - [`SKIP_PROXY_HEADERS`] is applied whenever headers cross the proxy, in
//!   either direction. It holds `Accept-Encoding` (so the engine never compresses
//!   a body the proxy would then have to decode) and the hop-by-hop headers of
//!   RFC 2616 section 13.5.1.
//! - [`SKIP_RECORD_HEADERS`] names cache and validator headers that carry no
//!   meaning once an exchange has been captured. It is never used while
//!   forwarding; only [`recordable_headers`] applies it, for consumers that want
//!   to persist or display an exchange.

use hyper::header::{self, HeaderMap, HeaderName};

pub static SKIP_PROXY_HEADERS: [HeaderName; 9] = [
    header::ACCEPT_ENCODING,
    // hop-by-hop
    header::CONNECTION,
    HeaderName::from_static("keep-alive"),
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
    header::TE,
    HeaderName::from_static("trailers"),
    header::TRANSFER_ENCODING,
    header::UPGRADE,
];

pub static SKIP_RECORD_HEADERS: [HeaderName; 10] = [
    header::ACCEPT_RANGES,
    header::AGE,
    header::CACHE_CONTROL,
    header::CONTENT_LENGTH,
    header::DATE,
    header::ETAG,
    header::EXPIRES,
    header::LAST_MODIFIED,
    header::SERVER,
    header::VARY,
];

/// Which leg of the proxy a header copy is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Client request headers on their way to the engine. `Host` is dropped as
    /// well, the outbound client derives it from the upstream URI.
    ClientToUpstream,
    /// Engine response headers on their way back to the client.
    UpstreamToClient,
}

/// Returns true if `name` must never be forwarded by the proxy.
pub fn is_hop_by_hop(name: &HeaderName) -> bool {
    SKIP_PROXY_HEADERS.contains(name)
}

/// Returns true if `name` is a cache/validator header excluded from recordings.
pub fn is_unrecordable(name: &HeaderName) -> bool {
    SKIP_RECORD_HEADERS.contains(name)
}

/// Copy every header of `source` into `destination` except the ones the
/// proxy must not forward. Repeated headers keep all their values, in order.
pub fn filter_and_copy(source: &HeaderMap, destination: &mut HeaderMap, direction: Direction) {
    for (name, value) in source.iter() {
        if is_hop_by_hop(name) {
            continue;
        }
        if direction == Direction::ClientToUpstream && name == header::HOST {
            continue;
        }
        destination.append(name.clone(), value.clone());
    }
}

/// Headers of a captured exchange worth keeping in a recording.
pub fn recordable_headers(source: &HeaderMap) -> HeaderMap {
    let mut recordable = HeaderMap::with_capacity(source.len());
    for (name, value) in source.iter() {
        if !is_hop_by_hop(name) && !is_unrecordable(name) {
            recordable.append(name.clone(), value.clone());
        }
    }
    recordable
}
