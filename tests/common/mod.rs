//! Shared utilities for integration testing.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum_server::tls_rustls::RustlsConfig;
use console_plugin_proxy::discovery::ports::{COMPONENT_LABEL, PART_OF_LABEL};
use console_plugin_proxy::discovery::{
    Discovery, ServiceLookup, ServicePortRecord, ServiceRecord, UpstreamTarget,
};
use console_plugin_proxy::error::BoxError;
use console_plugin_proxy::http::{AppState, Forwarder, ProxyServer};
use console_plugin_proxy::lifecycle::{DrainPolicy, LifecycleState, Shutdown, Termination};
use console_plugin_proxy::net::listener::ListenerError;
use console_plugin_proxy::net::tls::{crypto_provider, install_crypto_provider, load_tls_config};
use console_plugin_proxy::net::{BoxedIo, ConnectionRegistry, Dialer, Listener, TcpDialer};
use console_plugin_proxy::routing::InstanceIdentity;
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_rustls::TlsAcceptor;

/// Service lookup returning a fixed record and counting calls.
pub struct FakeLookup {
    record: Result<ServiceRecord, String>,
    calls: AtomicUsize,
}

impl FakeLookup {
    pub fn found(record: ServiceRecord) -> Arc<Self> {
        Arc::new(Self {
            record: Ok(record),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn failing(message: &str) -> Arc<Self> {
        Arc::new(Self {
            record: Err(message.to_string()),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ServiceLookup for FakeLookup {
    async fn lookup(&self, _identity: &InstanceIdentity) -> Result<ServiceRecord, BoxError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.record.clone().map_err(Into::into)
    }
}

/// Dialer sending every upstream connection to one local address.
pub struct StaticDialer {
    addr: SocketAddr,
    upstream: Option<TcpDialer>,
    dialed: Mutex<Vec<String>>,
}

impl StaticDialer {
    pub fn new(addr: SocketAddr) -> Arc<Self> {
        Arc::new(Self {
            addr,
            upstream: None,
            dialed: Mutex::new(Vec::new()),
        })
    }

    /// Connect to `addr` and let the production dialer finish the
    /// connection, so https targets get TLS.
    pub fn through(addr: SocketAddr, upstream: TcpDialer) -> Arc<Self> {
        Arc::new(Self {
            addr,
            upstream: Some(upstream),
            dialed: Mutex::new(Vec::new()),
        })
    }

    /// Targets dialed so far, as `scheme://host:port`.
    pub fn dialed(&self) -> Vec<String> {
        self.dialed.lock().unwrap().clone()
    }
}

#[async_trait]
impl Dialer for StaticDialer {
    async fn dial(&self, target: &UpstreamTarget) -> std::io::Result<BoxedIo> {
        self.dialed.lock().unwrap().push(target.to_string());
        let stream = TcpStream::connect(self.addr).await?;
        match &self.upstream {
            Some(upstream) => upstream.establish(stream, target).await,
            None => Ok(Box::new(stream)),
        }
    }
}

pub fn cryostat_labels() -> BTreeMap<String, String> {
    BTreeMap::from([
        (PART_OF_LABEL.to_string(), "cryostat".to_string()),
        (COMPONENT_LABEL.to_string(), "cryostat".to_string()),
    ])
}

pub fn port(name: &str, number: u16, app_protocol: Option<&str>) -> ServicePortRecord {
    ServicePortRecord {
        name: Some(name.to_string()),
        port: number,
        app_protocol: app_protocol.map(str::to_string),
    }
}

/// A labelled Cryostat Service exposing plain http on 8181.
pub fn cryostat_service() -> ServiceRecord {
    ServiceRecord {
        labels: cryostat_labels(),
        ports: vec![port("jfr-jmx", 9091, None), port("cryostat-http", 8181, None)],
    }
}

/// A running proxy bound to an ephemeral local port.
pub struct TestProxy {
    pub addr: SocketAddr,
    pub secure: bool,
    pub shutdown: Shutdown,
    pub connections: ConnectionRegistry,
    pub lifecycle: watch::Receiver<LifecycleState>,
    pub html_dir: PathBuf,
    pub handle: JoinHandle<Result<Termination, ListenerError>>,
}

impl TestProxy {
    pub fn url(&self, path: &str) -> String {
        let scheme = if self.secure { "https" } else { "http" };
        format!("{scheme}://{}{path}", self.addr)
    }

    pub fn ws_url(&self, path: &str) -> String {
        format!("ws://{}{}", self.addr, path)
    }

    /// Trigger shutdown and wait for draining to finish.
    pub async fn stop(self) -> Termination {
        self.shutdown.trigger();
        let termination = tokio::time::timeout(Duration::from_secs(15), self.handle)
            .await
            .expect("proxy stopped")
            .expect("proxy task")
            .expect("proxy run");
        let _ = std::fs::remove_dir_all(&self.html_dir);
        termination
    }
}

pub struct ProxyOptions {
    pub response_timeout: Duration,
    pub drain_policy: DrainPolicy,
    pub tls: Option<RustlsConfig>,
}

impl Default for ProxyOptions {
    fn default() -> Self {
        Self {
            response_timeout: Duration::from_secs(10),
            drain_policy: DrainPolicy::default(),
            tls: None,
        }
    }
}

/// Start the proxy with the given lookup and dialer.
pub async fn spawn_proxy(
    lookup: Arc<dyn ServiceLookup>,
    dialer: Arc<dyn Dialer>,
    options: ProxyOptions,
) -> TestProxy {
    let html_dir = temp_dir();
    std::fs::write(
        html_dir.join("plugin-manifest.json"),
        r#"{"name":"cryostat-plugin"}"#,
    )
    .unwrap();

    let state = AppState::new(
        Discovery::new(lookup),
        Forwarder::new(dialer, options.response_timeout),
    );
    let mut server = ProxyServer::new(state, &html_dir).with_drain_policy(options.drain_policy);
    let secure = options.tls.is_some();
    if let Some(tls) = &options.tls {
        server = server.with_tls(tls);
    }

    let tcp = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let listener = Listener::from_tcp(tcp, 100).unwrap();
    let addr = listener.local_addr().unwrap();

    let shutdown = Shutdown::new();
    let connections = server.connections();
    let lifecycle = server.lifecycle();
    let handle = tokio::spawn(server.run(listener, shutdown.signal()));

    TestProxy {
        addr,
        secure,
        shutdown,
        connections,
        lifecycle,
        html_dir,
        handle,
    }
}

/// A fresh, empty directory under the system temp dir.
pub fn temp_dir() -> PathBuf {
    let dir = std::env::temp_dir().join(format!("console-plugin-proxy-{}", uuid::Uuid::new_v4()));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

/// Write a self-signed certificate for `hosts` into `dir` and load it the
/// way the proxy loads its front door certificate.
pub async fn self_signed_tls(dir: &std::path::Path, hosts: &[&str]) -> RustlsConfig {
    install_crypto_provider();
    let hosts = hosts.iter().map(|h| h.to_string()).collect::<Vec<_>>();
    let certified = rcgen::generate_simple_self_signed(hosts).unwrap();
    let cert_path = dir.join("tls.crt");
    let key_path = dir.join("tls.key");
    std::fs::write(&cert_path, certified.cert.pem()).unwrap();
    std::fs::write(&key_path, certified.key_pair.serialize_pem()).unwrap();
    load_tls_config(&cert_path, &key_path).await.unwrap()
}

/// Read an HTTP/1.1 request head from `socket`.
pub async fn read_head<S>(socket: &mut S) -> String
where
    S: tokio::io::AsyncRead + Unpin,
{
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];
    while !buf.windows(4).any(|w| w == b"\r\n\r\n") {
        match socket.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => buf.extend_from_slice(&chunk[..n]),
        }
    }
    String::from_utf8_lossy(&buf).into_owned()
}

/// Start a mock upstream that answers every request with 200 and the raw
/// request head as the body.
pub async fn start_echo_upstream() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let head = read_head(&mut socket).await;
                let response = format!(
                    "HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    head.len(),
                    head
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            });
        }
    });
    addr
}

/// Start a mock upstream that sends a response head and part of the body,
/// then goes quiet.
pub async fn start_stalling_upstream() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let _ = read_head(&mut socket).await;
                let _ = socket
                    .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 100\r\n\r\npartial")
                    .await;
                tokio::time::sleep(Duration::from_secs(60)).await;
            });
        }
    });
    addr
}

/// Start a TLS mock upstream answering like `start_echo_upstream`, using a
/// self-signed certificate for `host`.
pub async fn start_tls_echo_upstream(host: &str) -> SocketAddr {
    install_crypto_provider();
    let certified = rcgen::generate_simple_self_signed(vec![host.to_string()]).unwrap();
    let key = rustls::pki_types::PrivatePkcs8KeyDer::from(certified.key_pair.serialize_der());
    let config = rustls::ServerConfig::builder_with_provider(crypto_provider())
        .with_safe_default_protocol_versions()
        .unwrap()
        .with_no_client_auth()
        .with_single_cert(vec![certified.cert.der().clone()], key.into())
        .unwrap();
    let acceptor = TlsAcceptor::from(Arc::new(config));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            let acceptor = acceptor.clone();
            tokio::spawn(async move {
                let Ok(mut stream) = acceptor.accept(socket).await else {
                    return;
                };
                let head = read_head(&mut stream).await;
                let response = format!(
                    "HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    head.len(),
                    head
                );
                let _ = stream.write_all(response.as_bytes()).await;
                let _ = stream.shutdown().await;
            });
        }
    });
    addr
}

/// Start a mock upstream that accepts connections and never answers.
/// Every accepted connection is reported on the returned channel.
pub async fn start_silent_upstream() -> (SocketAddr, mpsc::UnboundedReceiver<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let _ = tx.send(());
            tokio::spawn(async move {
                let _ = read_head(&mut socket).await;
                tokio::time::sleep(Duration::from_secs(60)).await;
            });
        }
    });
    (addr, rx)
}

/// Start a mock upstream WebSocket server echoing every message.
pub async fn start_websocket_upstream() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let Ok(mut ws) = tokio_tungstenite::accept_async(socket).await else {
                    return;
                };
                while let Some(Ok(message)) = ws.next().await {
                    if message.is_close() {
                        break;
                    }
                    if ws.send(message).await.is_err() {
                        break;
                    }
                }
            });
        }
    });
    addr
}

/// An address with nothing listening on it.
pub async fn unused_addr() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap()
}

/// Wait until `registry` holds `count` connections.
pub async fn wait_for_connections(registry: &ConnectionRegistry, count: usize) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while registry.len() != count {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("connections registered");
}

/// HTTP client that ignores proxy settings from the environment.
pub fn client() -> reqwest::Client {
    reqwest::Client::builder().no_proxy().build().unwrap()
}

/// Client that trusts the proxy's self-signed certificate.
pub fn tls_client() -> reqwest::Client {
    reqwest::Client::builder()
        .no_proxy()
        .danger_accept_invalid_certs(true)
        .build()
        .unwrap()
}
