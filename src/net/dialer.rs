//! Upstream dialing.
//!
//! The forwarder never opens sockets itself; it asks a `Dialer` for a stream
//! to the resolved target. Production uses `TcpDialer`, tests substitute a
//! dialer pointed at local mock upstreams.

use std::sync::Arc;

use async_trait::async_trait;
use rustls::pki_types::ServerName;
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;

use crate::config::UpstreamConfig;
use crate::discovery::UpstreamTarget;
use crate::net::tls::{upstream_client_config, TlsError};
use crate::net::BoxedIo;

/// Opens transport connections to upstream targets.
#[async_trait]
pub trait Dialer: Send + Sync + 'static {
    async fn dial(&self, target: &UpstreamTarget) -> std::io::Result<BoxedIo>;
}

/// Dials `host:port` over TCP and wraps the stream in TLS when the selected
/// port speaks https.
#[derive(Clone)]
pub struct TcpDialer {
    tls: TlsConnector,
}

impl TcpDialer {
    pub fn new(config: &UpstreamConfig) -> Result<Self, TlsError> {
        let client = upstream_client_config(config)?;
        Ok(Self {
            tls: TlsConnector::from(Arc::new(client)),
        })
    }

    /// Finish a dial over an already connected stream, adding TLS when the
    /// target speaks https.
    pub async fn establish(
        &self,
        stream: TcpStream,
        target: &UpstreamTarget,
    ) -> std::io::Result<BoxedIo> {
        stream.set_nodelay(true)?;

        if !target.uses_tls() {
            return Ok(Box::new(stream));
        }

        let server_name = ServerName::try_from(target.host().to_string())
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;
        let stream = self.tls.connect(server_name, stream).await?;
        Ok(Box::new(stream))
    }
}

#[async_trait]
impl Dialer for TcpDialer {
    async fn dial(&self, target: &UpstreamTarget) -> std::io::Result<BoxedIo> {
        let stream = TcpStream::connect((target.host(), target.port())).await?;
        self.establish(stream, target).await
    }
}
