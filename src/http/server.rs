//! HTTP server setup and connection serving.
//!
//! # Responsibilities
//! - Create Axum Router with all handlers
//! - Accept connections, register them, and terminate TLS
//! - Serve HTTP/1.1 and HTTP/2 with upgrade support
//! - Dispatch `/upstream` requests to discovery and forwarding
//! - Drain connections when the shutdown signal fires
//!
//! # Design Decisions
//! - Own accept loop instead of `axum::serve`: every connection must be
//!   individually closable and destroyable during draining
//! - Connections are registered before their task is spawned

use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::{Request, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{any, get},
    Extension, Router,
};
use axum_server::tls_rustls::RustlsConfig;
use hyper::body::Incoming;
use hyper_util::{
    rt::{TokioExecutor, TokioIo},
    server::conn::auto,
};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio_rustls::TlsAcceptor;
use tower::ServiceExt;
use tower_http::{
    request_id::{PropagateRequestIdLayer, SetRequestIdLayer},
    services::ServeDir,
    trace::TraceLayer,
};
use tracing::Instrument;

use crate::discovery::Discovery;
use crate::error::ProxyError;
use crate::http::forward::Forwarder;
use crate::http::request::MakeRequestUuid;
use crate::http::websocket;
use crate::lifecycle::shutdown::{drain, DrainPolicy, LifecycleState, Termination};
use crate::net::connection::ConnectionState;
use crate::net::listener::{ConnectionPermit, ListenerError};
use crate::net::{BoxedIo, ConnectionContext, ConnectionGuard, ConnectionRegistry, Listener};
use crate::observability::metrics;
use crate::routing::InstanceIdentity;
use crate::security::headers::{is_websocket_upgrade, X_REQUEST_ID};

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub discovery: Discovery,
    pub forwarder: Arc<Forwarder>,
}

impl AppState {
    pub fn new(discovery: Discovery, forwarder: Forwarder) -> Self {
        Self {
            discovery,
            forwarder: Arc::new(forwarder),
        }
    }
}

/// HTTP server for the console plugin.
pub struct ProxyServer {
    router: Router,
    tls: Option<TlsAcceptor>,
    registry: ConnectionRegistry,
    drain_policy: DrainPolicy,
    lifecycle: watch::Sender<LifecycleState>,
}

impl ProxyServer {
    /// Create a server routing `/upstream` through `state` and serving static
    /// files from `html_dir`.
    pub fn new(state: AppState, html_dir: &Path) -> Self {
        let (lifecycle, _) = watch::channel(LifecycleState::Running);
        Self {
            router: Self::build_router(state, html_dir),
            tls: None,
            registry: ConnectionRegistry::new(),
            drain_policy: DrainPolicy::default(),
            lifecycle,
        }
    }

    /// Terminate TLS on every accepted connection.
    pub fn with_tls(mut self, config: &RustlsConfig) -> Self {
        self.tls = Some(TlsAcceptor::from(config.get_inner()));
        self
    }

    pub fn with_drain_policy(mut self, policy: DrainPolicy) -> Self {
        self.drain_policy = policy;
        self
    }

    /// Registry of open client connections.
    pub fn connections(&self) -> ConnectionRegistry {
        self.registry.clone()
    }

    pub fn lifecycle(&self) -> watch::Receiver<LifecycleState> {
        self.lifecycle.subscribe()
    }

    /// Build the Axum router with all middleware layers.
    fn build_router(state: AppState, html_dir: &Path) -> Router {
        Router::new()
            .route("/health", get(health_handler))
            .route("/upstream", any(upstream_handler))
            .route("/upstream/", any(upstream_handler))
            .route("/upstream/{*path}", any(upstream_handler))
            .fallback_service(ServeDir::new(html_dir))
            .with_state(state)
            .layer(PropagateRequestIdLayer::new(X_REQUEST_ID))
            .layer(TraceLayer::new_for_http())
            .layer(SetRequestIdLayer::new(X_REQUEST_ID, MakeRequestUuid))
    }

    /// Accept connections until `shutdown` resolves, then drain.
    ///
    /// The listener is closed before draining starts, so no connection is
    /// accepted once the lifecycle has left `Running`.
    pub async fn run<S>(self, listener: Listener, shutdown: S) -> Result<Termination, ListenerError>
    where
        S: Future<Output = ()>,
    {
        let addr = listener.local_addr().map_err(ListenerError::Accept)?;
        tracing::info!(
            address = %addr,
            tls = self.tls.is_some(),
            "HTTP server starting"
        );

        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                biased;
                _ = &mut shutdown => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer, permit)) => self.spawn_connection(stream, peer, permit),
                    Err(ListenerError::Accept(e)) => {
                        tracing::warn!(error = %e, "Failed to accept connection");
                    }
                    Err(e) => return Err(e),
                },
            }
        }

        drop(listener);
        self.lifecycle.send_replace(LifecycleState::Draining);
        let termination = drain(&self.registry, self.drain_policy).await;
        self.lifecycle.send_replace(LifecycleState::Terminated);

        tracing::info!(?termination, "HTTP server stopped");
        Ok(termination)
    }

    fn spawn_connection(
        &self,
        stream: TcpStream,
        peer: std::net::SocketAddr,
        permit: ConnectionPermit,
    ) {
        let guard = Arc::new(self.registry.insert(peer));
        tokio::spawn(serve_connection(
            stream,
            guard,
            permit,
            self.router.clone(),
            self.tls.clone(),
        ));
    }
}

/// Serve one client connection until it closes or is destroyed.
async fn serve_connection(
    stream: TcpStream,
    guard: Arc<ConnectionGuard>,
    _permit: ConnectionPermit,
    router: Router,
    tls: Option<TlsAcceptor>,
) {
    let connection_id = guard.id();
    let secure = tls.is_some();

    let io: BoxedIo = match tls {
        Some(acceptor) => {
            let handshake = tokio::select! {
                result = acceptor.accept(stream) => result,
                _ = guard.closing() => return,
            };
            match handshake {
                Ok(stream) => Box::new(stream),
                Err(e) => {
                    tracing::debug!(
                        connection_id = %connection_id,
                        peer_addr = %guard.peer(),
                        error = %e,
                        "TLS handshake failed"
                    );
                    return;
                }
            }
        }
        None => Box::new(stream),
    };

    let context = ConnectionContext::new(Arc::clone(&guard), secure);
    let service = hyper::service::service_fn(move |mut request: hyper::Request<Incoming>| {
        request.extensions_mut().insert(context.clone());
        router.clone().oneshot(request)
    });

    let builder = auto::Builder::new(TokioExecutor::new());
    let connection = builder.serve_connection_with_upgrades(TokioIo::new(io), service);
    tokio::pin!(connection);

    let mut state = guard.watch();
    loop {
        tokio::select! {
            result = connection.as_mut() => {
                if let Err(e) = result {
                    tracing::debug!(connection_id = %connection_id, error = %e, "Connection error");
                }
                break;
            }
            changed = state.changed() => {
                let current = if changed.is_ok() {
                    *state.borrow_and_update()
                } else {
                    ConnectionState::Destroyed
                };
                match current {
                    ConnectionState::Open => {}
                    ConnectionState::Closing => connection.as_mut().graceful_shutdown(),
                    ConnectionState::Destroyed => {
                        tracing::debug!(connection_id = %connection_id, "Connection destroyed");
                        break;
                    }
                }
            }
        }
    }
}

async fn health_handler() -> StatusCode {
    StatusCode::NO_CONTENT
}

/// Proxy handler for `/upstream/*`.
async fn upstream_handler(
    State(state): State<AppState>,
    Extension(connection): Extension<ConnectionContext>,
    request: Request,
) -> Response {
    let start = Instant::now();
    let method = request.method().to_string();
    let upgrade = is_websocket_upgrade(request.headers());

    let span = tracing::info_span!(
        "upstream",
        namespace = tracing::field::Empty,
        name = tracing::field::Empty
    );
    // HTTP/2 streams run on their own tasks, so a destroyed connection does
    // not drop them; stop the exchange here instead.
    let guard = connection.guard();
    let result = tokio::select! {
        result = proxy(&state, &connection, request, upgrade).instrument(span.clone()) => result,
        _ = guard.destroyed() => {
            span.in_scope(|| tracing::debug!("Connection destroyed before upstream responded"));
            return StatusCode::BAD_GATEWAY.into_response();
        }
    };

    let response = match result {
        Ok(response) => response,
        Err(error) => {
            span.in_scope(|| match &error {
                ProxyError::Validation(_) => tracing::warn!(error = %error, "Rejected request"),
                _ => tracing::error!(error = %error, kind = error.kind(), "Proxy request failed"),
            });
            metrics::record_upstream_error(error.kind());
            if upgrade {
                connection.destroy();
            }
            error.into_response()
        }
    };

    metrics::record_request(&method, response.status().as_u16(), start);
    response
}

async fn proxy(
    state: &AppState,
    connection: &ConnectionContext,
    request: Request,
    upgrade: bool,
) -> Result<Response, ProxyError> {
    let identity = InstanceIdentity::from_request(request.headers(), request.uri())?;
    let span = tracing::Span::current();
    span.record("namespace", identity.namespace());
    span.record("name", identity.name());

    let endpoint = state.discovery.resolve(&identity).await?;

    if upgrade {
        websocket::forward_upgrade(&state.forwarder, connection, &identity, endpoint, request).await
    } else {
        state
            .forwarder
            .forward(connection, &identity, endpoint, request)
            .await
    }
}
