//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! optional TOML file (--config / CONSOLE_PLUGIN_PROXY_CONFIG)
//!     → loader.rs (parse & deserialize)
//!     → loader.rs (PORT, TLS_CERT_PATH, TLS_KEY_PATH, HTML_DIR, SKIP_TLS_VERIFY, ...)
//!     → validation.rs (semantic checks)
//!     → ProxyConfig (validated, immutable)
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; changes require a restart
//! - All fields have defaults matching the deployment manifests
//! - Environment variables win over the file

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, ConfigError};
pub use schema::{
    ListenerConfig, LogFormat, ObservabilityConfig, ProxyConfig, ShutdownConfig,
    StaticFilesConfig, TlsConfig, UpstreamConfig,
};
