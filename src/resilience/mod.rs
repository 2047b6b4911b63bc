//! Resilience subsystem.
//!
//! # Design Decisions
//! - Failed lookups and upstream connections are never retried
//! - The only protection is a fixed response window per request

pub mod timeouts;
