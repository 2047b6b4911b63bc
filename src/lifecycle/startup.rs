//! Startup orchestration.
//!
//! # Responsibilities
//! - Load the front door certificate and key
//! - Build the cluster client and upstream dialer
//! - Bind the listener last, so traffic only arrives when ready
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - Subsystems initialize in order, not concurrently

use std::sync::Arc;

use crate::config::ProxyConfig;
use crate::discovery::{Discovery, KubeServiceLookup};
use crate::error::BoxError;
use crate::http::{AppState, Forwarder, ProxyServer};
use crate::lifecycle::shutdown::DrainPolicy;
use crate::net::listener::ListenerError;
use crate::net::tls::{load_tls_config, TlsError};
use crate::net::{Listener, TcpDialer};

#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("TLS setup failed: {0}")]
    Tls(#[from] TlsError),
    #[error("cluster client setup failed: {0}")]
    Cluster(#[source] BoxError),
    #[error(transparent)]
    Listener(#[from] ListenerError),
}

/// Build the server and bind its listener.
pub async fn start(config: &ProxyConfig) -> Result<(ProxyServer, Listener), StartupError> {
    let tls = match &config.listener.tls {
        Some(tls) => Some(load_tls_config(&tls.cert_path, &tls.key_path).await?),
        None => {
            tracing::warn!("TLS disabled, serving plaintext HTTP");
            None
        }
    };

    let lookup = KubeServiceLookup::from_environment(config.upstream.skip_tls_verify)
        .await
        .map_err(StartupError::Cluster)?;
    let dialer = TcpDialer::new(&config.upstream)?;

    let state = AppState::new(
        Discovery::new(Arc::new(lookup)),
        Forwarder::new(Arc::new(dialer), config.upstream.response_timeout()),
    );
    let mut server = ProxyServer::new(state, &config.static_files.html_dir)
        .with_drain_policy(DrainPolicy::from(&config.shutdown));
    if let Some(tls) = &tls {
        server = server.with_tls(tls);
    }

    let listener = Listener::bind(&config.listener).await?;
    Ok((server, listener))
}
