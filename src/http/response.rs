//! Response handling and transformation.
//!
//! Upstream responses are streamed to the client with their status and
//! end-to-end headers intact. Hop-by-hop headers are stripped.
//!
//! The body carries an idle timeout: if the upstream goes quiet for longer
//! than the response window between frames, the stream fails and the client
//! connection is aborted rather than left hanging.

use std::time::Duration;

use axum::body::Body;
use axum::response::Response;
use hyper::body::Incoming;
use tower_http::timeout::TimeoutBody;

use crate::security::headers::strip_hop_by_hop;

/// Relay an upstream response without buffering its body.
pub fn relay_response(response: hyper::Response<Incoming>, idle_timeout: Duration) -> Response {
    let (mut parts, body) = response.into_parts();
    strip_hop_by_hop(&mut parts.headers);
    Response::from_parts(parts, Body::new(TimeoutBody::new(idle_timeout, body)))
}
