//! Cryostat console plugin proxy.
//!
//! Configuration comes from an optional TOML file overlaid with the
//! environment (`PORT`, `TLS_CERT_PATH`, `TLS_KEY_PATH`, `HTML_DIR`,
//! `SKIP_TLS_VERIFY`). Exits 0 after a graceful drain, 1 otherwise.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use console_plugin_proxy::config::load_config;
use console_plugin_proxy::lifecycle::{signals, startup};
use console_plugin_proxy::net::tls::install_crypto_provider;
use console_plugin_proxy::observability::{logging, metrics};

#[derive(Debug, Parser)]
#[command(name = "console-plugin-proxy", version, about)]
struct Args {
    /// Optional TOML configuration file.
    #[arg(short, long, env = "CONSOLE_PLUGIN_PROXY_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<ExitCode, Box<dyn std::error::Error>> {
    let args = Args::parse();
    install_crypto_provider();

    let config = load_config(args.config.as_deref(), |key| std::env::var(key).ok())?;
    logging::init_logging(&config.observability)?;

    tracing::info!("console-plugin-proxy v{} starting", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        port = config.listener.port,
        tls = config.listener.tls.is_some(),
        html_dir = %config.static_files.html_dir.display(),
        skip_tls_verify = config.upstream.skip_tls_verify,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let (server, listener) = startup::start(&config).await?;
    tracing::info!(port = config.listener.port, "Service started");

    let termination = server.run(listener, signals::termination_signal()).await?;
    tracing::info!(?termination, "Shutdown complete");
    Ok(termination.into())
}
