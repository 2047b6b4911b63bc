//! WebSocket upgrade forwarding.
//!
//! # Responsibilities
//! - Relay the upgrade handshake to the resolved upstream
//! - On 101, splice the client and upstream connections together
//! - Tie the tunnel to the client connection's lifecycle
//!
//! # Data Flow
//! ```text
//! Client ←──── raw bytes ────→ Proxy ←──── raw bytes ────→ Upstream
//! ```
//!
//! # Design Decisions
//! - Byte-level relay; frames are never parsed
//! - A refused handshake (non-101) is relayed to the client as-is
//! - Draining shuts both sides down; destroying drops them

use std::sync::Arc;

use axum::body::Body;
use axum::extract::Request;
use axum::http::StatusCode;
use axum::response::Response;
use hyper::upgrade::OnUpgrade;
use hyper_util::rt::TokioIo;
use tokio::io::AsyncWriteExt;

use crate::discovery::{ServiceEndpoint, UpstreamTarget};
use crate::error::ProxyError;
use crate::http::forward::Forwarder;
use crate::http::request::build_upstream_request;
use crate::http::response::relay_response;
use crate::net::{ConnectionContext, ConnectionGuard};
use crate::routing::InstanceIdentity;

/// Forward a WebSocket upgrade request.
///
/// On success the returned 101 response completes the client handshake and a
/// background task relays bytes until either side closes.
pub async fn forward_upgrade(
    forwarder: &Forwarder,
    connection: &ConnectionContext,
    identity: &InstanceIdentity,
    endpoint: ServiceEndpoint,
    mut request: Request,
) -> Result<Response, ProxyError> {
    let target = UpstreamTarget::new(identity, endpoint);
    let client_upgrade = hyper::upgrade::on(&mut request);
    let (parts, body) = request.into_parts();
    let upstream_request = build_upstream_request(&parts, body, &target, connection, true)?;

    let mut response = forwarder.exchange(&target, upstream_request, true).await?;
    if response.status() != StatusCode::SWITCHING_PROTOCOLS {
        tracing::info!(
            target = %target,
            status = response.status().as_u16(),
            "Upstream refused WebSocket upgrade"
        );
        return Ok(relay_response(response, forwarder.response_timeout()));
    }

    let upstream_upgrade = hyper::upgrade::on(&mut response);
    let mut switching = Response::new(Body::empty());
    *switching.status_mut() = StatusCode::SWITCHING_PROTOCOLS;
    *switching.headers_mut() = response.headers().clone();

    tracing::info!(target = %target, path = %parts.uri.path(), "WebSocket upgraded");
    tokio::spawn(tunnel(
        connection.guard(),
        client_upgrade,
        upstream_upgrade,
        target.to_string(),
    ));
    Ok(switching)
}

/// Relay bytes between the upgraded client and upstream connections.
///
/// The guard keeps the client connection registered for the tunnel's
/// lifetime, so draining waits for it.
async fn tunnel(
    guard: Arc<ConnectionGuard>,
    client: OnUpgrade,
    upstream: OnUpgrade,
    target: String,
) {
    let (client, upstream) = match futures_util::future::try_join(client, upstream).await {
        Ok(upgraded) => upgraded,
        Err(e) => {
            tracing::warn!(target = %target, error = %e, "WebSocket upgrade failed");
            return;
        }
    };
    let mut client = TokioIo::new(client);
    let mut upstream = TokioIo::new(upstream);

    tokio::select! {
        result = tokio::io::copy_bidirectional(&mut client, &mut upstream) => match result {
            Ok((sent, received)) => tracing::debug!(
                target = %target,
                bytes_sent = sent,
                bytes_received = received,
                "WebSocket closed"
            ),
            Err(e) => tracing::debug!(target = %target, error = %e, "WebSocket relay error"),
        },
        _ = guard.closing() => {
            tracing::debug!(target = %target, "Closing WebSocket for shutdown");
            tokio::select! {
                _ = async {
                    let _ = client.shutdown().await;
                    let _ = upstream.shutdown().await;
                } => {}
                _ = guard.destroyed() => {}
            }
        }
    }
}
