//! Request routing subsystem.
//!
//! # Data Flow
//! ```text
//! /upstream/* request
//!     → identity.rs (headers, then query parameters)
//!     → InstanceIdentity { namespace, name }
//!     → discovery (Service lookup, port selection)
//! ```
//!
//! # Design Decisions
//! - Routing is decided per request; nothing is cached
//! - An invalid identity is rejected before any network I/O

pub mod identity;

pub use identity::InstanceIdentity;
