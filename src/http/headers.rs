//! Header rewriting between the client leg and the upstream leg.
//!
//! # Responsibilities
//! - Strip hop-by-hop headers in both directions
//! - Point `Host` at the upstream authority
//! - Maintain `X-Forwarded-For`, `X-Forwarded-Proto`, `X-Forwarded-Host`

use std::net::IpAddr;

use axum::http::header::{
    HeaderMap, HeaderName, HeaderValue, CONNECTION, HOST, PROXY_AUTHENTICATE,
    PROXY_AUTHORIZATION, TE, TRAILER, TRANSFER_ENCODING, UPGRADE,
};

pub const X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");
pub const X_FORWARDED_PROTO: HeaderName = HeaderName::from_static("x-forwarded-proto");
pub const X_FORWARDED_HOST: HeaderName = HeaderName::from_static("x-forwarded-host");

const KEEP_ALIVE: HeaderName = HeaderName::from_static("keep-alive");
const PROXY_CONNECTION: HeaderName = HeaderName::from_static("proxy-connection");
// Legacy spelling still seen in the wild.
const TRAILERS: HeaderName = HeaderName::from_static("trailers");

/// Headers that only make sense for a single transport leg.
pub const HOP_BY_HOP: [HeaderName; 10] = [
    CONNECTION,
    KEEP_ALIVE,
    PROXY_AUTHENTICATE,
    PROXY_AUTHORIZATION,
    PROXY_CONNECTION,
    TE,
    TRAILER,
    TRAILERS,
    TRANSFER_ENCODING,
    UPGRADE,
];

/// Remove hop-by-hop headers, including any named in `Connection`.
pub fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let listed: Vec<HeaderName> = headers
        .get_all(CONNECTION)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .filter_map(|token| HeaderName::try_from(token.trim()).ok())
        .collect();

    for name in listed.iter().chain(HOP_BY_HOP.iter()) {
        headers.remove(name);
    }
}

/// Prepare inbound headers for the upstream leg.
pub fn prepare_upstream_headers(
    headers: &mut HeaderMap,
    upstream_authority: &str,
    client_ip: Option<IpAddr>,
) -> Result<(), axum::http::header::InvalidHeaderValue> {
    let original_host = headers.get(HOST).cloned();

    strip_hop_by_hop(headers);

    if let Some(ip) = client_ip {
        let chain = headers
            .get_all(&X_FORWARDED_FOR)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .chain(std::iter::once(ip.to_string().as_str()))
            .collect::<Vec<_>>()
            .join(", ");
        headers.insert(X_FORWARDED_FOR, HeaderValue::from_str(&chain)?);
    }

    if !headers.contains_key(&X_FORWARDED_PROTO) {
        headers.insert(X_FORWARDED_PROTO, HeaderValue::from_static("http"));
    }
    if let Some(host) = original_host {
        if !headers.contains_key(&X_FORWARDED_HOST) {
            headers.insert(X_FORWARDED_HOST, host);
        }
    }

    headers.insert(HOST, HeaderValue::from_str(upstream_authority)?);
    Ok(())
}
