//! Live Service lookup against the cluster API.

use std::collections::BTreeMap;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Service;
use kube::{Api, Client};

use crate::error::BoxError;
use crate::routing::InstanceIdentity;

/// The parts of a Service the proxy cares about.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServiceRecord {
    pub labels: BTreeMap<String, String>,
    pub ports: Vec<ServicePortRecord>,
}

/// One declared Service port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServicePortRecord {
    pub name: Option<String>,
    pub port: u16,
    pub app_protocol: Option<String>,
}

impl From<Service> for ServiceRecord {
    fn from(service: Service) -> Self {
        let labels = service.metadata.labels.unwrap_or_default();
        let ports = service
            .spec
            .and_then(|spec| spec.ports)
            .unwrap_or_default()
            .into_iter()
            .filter_map(|port| {
                let number = match u16::try_from(port.port) {
                    Ok(number) if number > 0 => number,
                    _ => {
                        tracing::debug!(port = port.port, "Ignoring out of range Service port");
                        return None;
                    }
                };
                Some(ServicePortRecord {
                    name: port.name,
                    port: number,
                    app_protocol: port.app_protocol,
                })
            })
            .collect();
        Self { labels, ports }
    }
}

/// Reads a Service by namespace and name.
#[async_trait]
pub trait ServiceLookup: Send + Sync + 'static {
    async fn lookup(&self, identity: &InstanceIdentity) -> Result<ServiceRecord, BoxError>;
}

/// `ServiceLookup` backed by the Kubernetes API.
#[derive(Clone)]
pub struct KubeServiceLookup {
    client: Client,
}

impl KubeServiceLookup {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Build a client from the in-cluster or kubeconfig environment.
    pub async fn from_environment(skip_tls_verify: bool) -> Result<Self, BoxError> {
        let mut config = kube::Config::infer().await?;
        if skip_tls_verify {
            tracing::warn!("Cluster API certificate verification disabled");
            config.accept_invalid_certs = true;
        }
        let client = Client::try_from(config)?;
        Ok(Self::new(client))
    }
}

#[async_trait]
impl ServiceLookup for KubeServiceLookup {
    async fn lookup(&self, identity: &InstanceIdentity) -> Result<ServiceRecord, BoxError> {
        let api: Api<Service> = Api::namespaced(self.client.clone(), identity.namespace());
        let service = api.get(identity.name()).await?;
        Ok(service.into())
    }
}
