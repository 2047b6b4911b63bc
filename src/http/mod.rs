//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP/TLS connection
//!     → server.rs (Axum setup, per-connection serving)
//!     → request.rs (request ID, path rewrite, upstream request)
//!     → [discovery resolves the Service endpoint]
//!     → forward.rs or websocket.rs (one upstream connection per request)
//!     → response.rs (strip hop-by-hop headers, stream body)
//!     → Send to client
//! ```

pub mod forward;
pub mod request;
pub mod response;
pub mod server;
pub mod websocket;

pub use forward::Forwarder;
pub use request::{MakeRequestUuid, UPSTREAM_PREFIX};
pub use server::{AppState, ProxyServer};
