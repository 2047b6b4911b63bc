//! Service discovery subsystem.
//!
//! # Data Flow
//! ```text
//! InstanceIdentity
//!     → lookup.rs (one cluster API read of the Service)
//!     → ports.rs (ownership labels, then port selection)
//!     → ServiceEndpoint { uses_tls, port }
//! ```
//!
//! # Design Decisions
//! - Every request re-resolves from scratch; nothing is cached
//! - Lookup failures are not retried
//! - Label validation always runs before port selection

pub mod lookup;
pub mod ports;

use std::fmt;
use std::sync::Arc;

pub use lookup::{KubeServiceLookup, ServiceLookup, ServicePortRecord, ServiceRecord};

use crate::error::ProxyError;
use crate::routing::InstanceIdentity;

/// Protocol and port selected on a Service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServiceEndpoint {
    pub uses_tls: bool,
    pub port: u16,
}

/// Fully resolved upstream for one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamTarget {
    host: String,
    endpoint: ServiceEndpoint,
}

impl UpstreamTarget {
    pub fn new(identity: &InstanceIdentity, endpoint: ServiceEndpoint) -> Self {
        Self {
            host: identity.host(),
            endpoint,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.endpoint.port
    }

    pub fn uses_tls(&self) -> bool {
        self.endpoint.uses_tls
    }

    pub fn scheme(&self) -> &'static str {
        if self.endpoint.uses_tls {
            "https"
        } else {
            "http"
        }
    }

    /// `host:port`, as sent in the upstream `Host` header.
    pub fn authority(&self) -> String {
        format!("{}:{}", self.host, self.endpoint.port)
    }
}

impl fmt::Display for UpstreamTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}", self.scheme(), self.authority())
    }
}

/// Resolves instance identities to endpoints.
#[derive(Clone)]
pub struct Discovery {
    lookup: Arc<dyn ServiceLookup>,
}

impl Discovery {
    pub fn new(lookup: Arc<dyn ServiceLookup>) -> Self {
        Self { lookup }
    }

    pub async fn resolve(
        &self,
        identity: &InstanceIdentity,
    ) -> Result<ServiceEndpoint, ProxyError> {
        let service = self
            .lookup
            .lookup(identity)
            .await
            .map_err(|source| ProxyError::UpstreamLookup {
                namespace: identity.namespace().to_string(),
                name: identity.name().to_string(),
                source,
            })?;

        if !ports::has_ownership_labels(&service.labels) {
            return Err(ProxyError::Policy {
                namespace: identity.namespace().to_string(),
                name: identity.name().to_string(),
            });
        }

        let endpoint =
            ports::select_port(&service.ports).ok_or_else(|| ProxyError::NoSuitablePort {
                namespace: identity.namespace().to_string(),
                name: identity.name().to_string(),
            })?;

        tracing::debug!(
            namespace = %identity.namespace(),
            name = %identity.name(),
            port = endpoint.port,
            tls = endpoint.uses_tls,
            "Resolved upstream endpoint"
        );
        Ok(endpoint)
    }
}
