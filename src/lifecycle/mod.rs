//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Load TLS material → Build cluster client → Bind listener
//!
//! Shutdown (shutdown.rs):
//!     Signal received → Stop accepting → Drain connections → Exit 0 or 1
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Trigger draining
//! ```
//!
//! # Design Decisions
//! - Ordered startup: certificates first, then cluster client, then listener
//! - Ordered shutdown: stop accept, close, destroy
//! - Shutdown has a deadline: forced exit after it elapses

pub mod shutdown;
pub mod signals;
pub mod startup;

pub use shutdown::{drain, DrainPolicy, LifecycleState, Shutdown, Termination};
