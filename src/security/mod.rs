//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Inbound request:
//!     → headers.rs (whitelist, add X-Forwarded-*)
//!     → Forwarded to the upstream
//!
//! Upstream response:
//!     → headers.rs (strip hop-by-hop)
//!     → Relayed to the client
//! ```
//!
//! # Design Decisions
//! - Only whitelisted request headers reach the upstream, so console session
//!   cookies never leave the proxy
//! - No trust in client-supplied X-Forwarded-* headers

pub mod headers;
