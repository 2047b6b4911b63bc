//! Plain HTTP forwarding.
//!
//! # Responsibilities
//! - Open one upstream connection per request through the `Dialer`
//! - Send the rewritten request and wait for the response head
//! - Stream the upstream response back to the client
//!
//! # Design Decisions
//! - No connection pooling: every request re-dials the resolved target
//! - The response window covers dial, handshake, and the response head;
//!   the relayed body then gets the same window as an idle timeout

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::extract::Request;
use axum::response::Response;
use hyper::body::Incoming;
use hyper::client::conn::http1::{self, SendRequest};
use hyper_util::rt::TokioIo;

use crate::discovery::{ServiceEndpoint, UpstreamTarget};
use crate::error::ProxyError;
use crate::http::request::build_upstream_request;
use crate::http::response::relay_response;
use crate::net::{ConnectionContext, Dialer};
use crate::resilience::timeouts::with_response_timeout;
use crate::routing::InstanceIdentity;

/// Sends proxied requests to resolved upstreams.
pub struct Forwarder {
    dialer: Arc<dyn Dialer>,
    response_timeout: Duration,
}

impl Forwarder {
    pub fn new(dialer: Arc<dyn Dialer>, response_timeout: Duration) -> Self {
        Self {
            dialer,
            response_timeout,
        }
    }

    pub fn response_timeout(&self) -> Duration {
        self.response_timeout
    }

    /// Forward a non-upgrade request and relay the upstream response.
    pub async fn forward(
        &self,
        connection: &ConnectionContext,
        identity: &InstanceIdentity,
        endpoint: ServiceEndpoint,
        request: Request,
    ) -> Result<Response, ProxyError> {
        let target = UpstreamTarget::new(identity, endpoint);
        let (parts, body) = request.into_parts();
        let upstream_request = build_upstream_request(&parts, body, &target, connection, false)?;
        let path = upstream_request.uri().to_string();

        let response = self.exchange(&target, upstream_request, false).await?;

        tracing::info!(
            target = %target,
            path = %path,
            status = response.status().as_u16(),
            "Upstream responded"
        );
        Ok(relay_response(response, self.response_timeout))
    }

    /// Dial, handshake, and send `request`, bounded by the response window.
    pub(crate) async fn exchange(
        &self,
        target: &UpstreamTarget,
        request: Request,
        upgrades: bool,
    ) -> Result<hyper::Response<Incoming>, ProxyError> {
        with_response_timeout(self.response_timeout, target, async {
            let mut sender = self.connect(target, upgrades).await?;
            sender
                .send_request(request)
                .await
                .map_err(|e| ProxyError::upstream_conn(target.to_string(), e))
        })
        .await
    }

    async fn connect(
        &self,
        target: &UpstreamTarget,
        upgrades: bool,
    ) -> Result<SendRequest<Body>, ProxyError> {
        let io = self
            .dialer
            .dial(target)
            .await
            .map_err(|e| ProxyError::upstream_conn(target.to_string(), e))?;

        let (sender, connection) = http1::handshake::<_, Body>(TokioIo::new(io))
            .await
            .map_err(|e| ProxyError::upstream_conn(target.to_string(), e))?;

        let label = target.to_string();
        if upgrades {
            tokio::spawn(async move {
                if let Err(e) = connection.with_upgrades().await {
                    tracing::debug!(target = %label, error = %e, "Upstream connection error");
                }
            });
        } else {
            tokio::spawn(async move {
                if let Err(e) = connection.await {
                    tracing::debug!(target = %label, error = %e, "Upstream connection error");
                }
            });
        }
        Ok(sender)
    }
}

impl std::fmt::Debug for Forwarder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Forwarder")
            .field("response_timeout", &self.response_timeout)
            .finish_non_exhaustive()
    }
}
