//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection
//!     → listener.rs (accept loop, connection limits)
//!     → connection.rs (registered in the ConnectionRegistry)
//!     → tls.rs (TLS handshake with the mounted certificate)
//!     → Hand off to HTTP layer
//!
//! Outgoing upstream connection
//!     → dialer.rs (TCP connect, optional TLS)
//!     → Hand off to the forwarder
//!
//! Connection States:
//!     Open → Closing → Destroyed
//! ```
//!
//! # Design Decisions
//! - Bounded accept queue prevents resource exhaustion
//! - Each connection tracked for graceful shutdown
//! - Inbound and outbound streams share one boxed IO type

pub mod connection;
pub mod dialer;
pub mod listener;
pub mod tls;

use tokio::io::{AsyncRead, AsyncWrite};

pub use connection::{ConnectionContext, ConnectionGuard, ConnectionId, ConnectionRegistry};
pub use dialer::{Dialer, TcpDialer};
pub use listener::Listener;

/// A bidirectional byte stream, plain or TLS.
pub trait Io: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T> Io for T where T: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

pub type BoxedIo = Box<dyn Io>;
