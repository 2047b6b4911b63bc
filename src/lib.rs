//! Upstream proxy for the Cryostat console plugin.
//!
//! Serves the plugin's static assets and forwards `/upstream/*` requests,
//! including WebSocket upgrades, to the Cryostat instance named by each
//! request.
//!
//! # Architecture Overview
//!
//! ```text
//!     Client Request
//!     ──▶ net (listener, TLS) ──▶ http server ──▶ routing (identity)
//!                                                     │
//!                                                     ▼
//!                                             discovery (Service
//!                                             labels, port choice)
//!                                                     │
//!     Client Response                                 ▼
//!     ◀── http response ◀── forward / websocket ◀── net dialer ◀── Cryostat
//!
//!     Cross-cutting: config, observability, resilience, security, lifecycle
//! ```

// Core subsystems
pub mod config;
pub mod discovery;
pub mod error;
pub mod http;
pub mod net;
pub mod routing;

// Cross-cutting concerns
pub mod lifecycle;
pub mod observability;
pub mod resilience;
pub mod security;

pub use config::schema::ProxyConfig;
pub use error::ProxyError;
pub use http::ProxyServer;
pub use lifecycle::{Shutdown, Termination};
