//! Request handling and transformation.
//!
//! # Responsibilities
//! - Generate unique request IDs
//! - Rewrite `/upstream/...` paths for the upstream
//! - Build the upstream request from the inbound one
//!
//! # Design Decisions
//! - Request ID added as early as possible for tracing
//! - The inbound request is consumed; the upstream gets a fresh header map

use axum::http::{header, request::Parts, HeaderValue, Request, Uri, Version};
use tower_http::request_id::{MakeRequestId, RequestId};
use uuid::Uuid;

use crate::discovery::UpstreamTarget;
use crate::error::ProxyError;
use crate::net::ConnectionContext;
use crate::security::headers::{forwarded_request_headers, set_forwarded_headers};

/// Path prefix under which the proxy is mounted.
pub const UPSTREAM_PREFIX: &str = "/upstream";

/// UUID v4 request IDs for `SetRequestIdLayer`.
#[derive(Debug, Clone, Copy, Default)]
pub struct MakeRequestUuid;

impl MakeRequestId for MakeRequestUuid {
    fn make_request_id<B>(&mut self, _request: &Request<B>) -> Option<RequestId> {
        HeaderValue::from_str(&Uuid::new_v4().to_string())
            .ok()
            .map(RequestId::new)
    }
}

/// Upstream path: the inbound path without the `/upstream` prefix, plus the
/// re-encoded query string.
pub fn upstream_path_and_query(uri: &Uri) -> String {
    let path = uri.path();
    let rest = path.strip_prefix(UPSTREAM_PREFIX).unwrap_or(path);
    let mut out = if rest.is_empty() {
        "/".to_string()
    } else {
        rest.to_string()
    };

    if let Some(query) = uri.query() {
        let encoded = url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(url::form_urlencoded::parse(query.as_bytes()))
            .finish();
        if !encoded.is_empty() {
            out.push('?');
            out.push_str(&encoded);
        }
    }
    out
}

/// Host the client addressed: the `Host` header, or the URI authority for
/// HTTP/2.
pub fn original_host(parts: &Parts) -> Option<&str> {
    parts
        .headers
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .or_else(|| parts.uri.authority().map(|a| a.as_str()))
}

/// Build the HTTP/1.1 request sent to `target`.
pub fn build_upstream_request<B>(
    parts: &Parts,
    body: B,
    target: &UpstreamTarget,
    connection: &ConnectionContext,
    upgrade: bool,
) -> Result<Request<B>, ProxyError> {
    let mut headers = forwarded_request_headers(&parts.headers, upgrade);
    set_forwarded_headers(
        &mut headers,
        connection.peer(),
        connection.is_secure(),
        original_host(parts),
    );
    let host = HeaderValue::from_str(&target.authority())
        .map_err(|e| ProxyError::upstream_conn(target.to_string(), e))?;
    headers.insert(header::HOST, host);

    let mut request = Request::builder()
        .method(parts.method.clone())
        .uri(upstream_path_and_query(&parts.uri))
        .version(Version::HTTP_11)
        .body(body)
        .map_err(|e| ProxyError::upstream_conn(target.to_string(), e))?;
    *request.headers_mut() = headers;
    Ok(request)
}
