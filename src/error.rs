//! Proxy error taxonomy.
//!
//! Every failure on the `/upstream` path is converted to a client-visible
//! status at the point of detection. Response bodies are always empty so that
//! callers cannot tell a missing Service from a rejected one.

use std::time::Duration;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};

/// Boxed error used for upstream and cluster API failures.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Errors raised while resolving or forwarding a proxied request.
#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    /// Missing or malformed instance identity.
    #[error("invalid instance identity: {0}")]
    Validation(String),

    /// The cluster API call for the Service failed.
    #[error("failed to look up Service {name:?} in namespace {namespace:?}: {source}")]
    UpstreamLookup {
        namespace: String,
        name: String,
        #[source]
        source: BoxError,
    },

    /// The Service exists but does not carry the ownership labels.
    #[error("Service {name:?} in namespace {namespace:?} does not have the expected Cryostat labels")]
    Policy { namespace: String, name: String },

    /// The Service has no port usable for http(s).
    #[error("no port with http(s) appProtocol or name ending in http(s) on <{name}, {namespace}>")]
    NoSuitablePort { namespace: String, name: String },

    /// The upstream did not answer within the response window.
    #[error("upstream {target} did not respond within {timeout:?}")]
    UpstreamTimeout { target: String, timeout: Duration },

    /// Transport failure talking to the resolved upstream.
    #[error("upstream {target} connection failed: {source}")]
    UpstreamConn {
        target: String,
        #[source]
        source: BoxError,
    },
}

impl ProxyError {
    pub fn upstream_conn(target: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self::UpstreamConn {
            target: target.into(),
            source: source.into(),
        }
    }

    /// Status code returned to the client.
    pub fn status_code(&self) -> StatusCode {
        match self {
            ProxyError::Validation(_) => StatusCode::BAD_REQUEST,
            ProxyError::UpstreamLookup { .. }
            | ProxyError::Policy { .. }
            | ProxyError::NoSuitablePort { .. }
            | ProxyError::UpstreamConn { .. } => StatusCode::BAD_GATEWAY,
            ProxyError::UpstreamTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        }
    }

    /// Short label used for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            ProxyError::Validation(_) => "validation",
            ProxyError::UpstreamLookup { .. } => "lookup",
            ProxyError::Policy { .. } => "policy",
            ProxyError::NoSuitablePort { .. } => "no_port",
            ProxyError::UpstreamTimeout { .. } => "timeout",
            ProxyError::UpstreamConn { .. } => "connection",
        }
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        self.status_code().into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping() {
        assert_eq!(
            ProxyError::Validation("missing".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ProxyError::Policy {
                namespace: "ns".into(),
                name: "svc".into()
            }
            .status_code(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            ProxyError::NoSuitablePort {
                namespace: "ns".into(),
                name: "svc".into()
            }
            .status_code(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            ProxyError::UpstreamTimeout {
                target: "svc.ns:8181".into(),
                timeout: Duration::from_secs(10)
            }
            .status_code(),
            StatusCode::GATEWAY_TIMEOUT
        );
    }

    #[test]
    fn lookup_and_policy_are_indistinguishable_to_clients() {
        let lookup = ProxyError::UpstreamLookup {
            namespace: "ns".into(),
            name: "svc".into(),
            source: "not found".into(),
        }
        .into_response();
        let policy = ProxyError::Policy {
            namespace: "ns".into(),
            name: "svc".into(),
        }
        .into_response();
        assert_eq!(lookup.status(), policy.status());
    }
}
