//! wtlab-server: WebTransport session server.
//!
//! Serves its certificate fingerprint over plain HTTP, accepts WebTransport
//! sessions, and exercises datagrams, bidirectional and unidirectional
//! streams on each one.

mod cert;
mod config;
mod fingerprint_http;
mod handler;
mod registry;
mod server;
mod transport;

use clap::Parser;
use config::{Overrides, ServerConfig};
use std::path::PathBuf;
use tracing::{error, info};
use wtlab_core::CancelSignal;

/// wtlab-server: WebTransport session server
#[derive(Parser, Debug)]
#[command(name = "wtlab-server", version, about = "WebTransport session server")]
struct Cli {
    /// WebTransport (UDP) port
    #[arg(short, long)]
    port: Option<u16>,

    /// Fingerprint endpoint (TCP) port
    #[arg(long)]
    http_port: Option<u16>,

    /// Address to bind both listeners on
    #[arg(long)]
    bind: Option<String>,

    /// TLS certificate (PEM)
    #[arg(long)]
    cert: Option<String>,

    /// TLS private key (PEM)
    #[arg(long)]
    key: Option<String>,

    /// Config file path
    #[arg(long, default_value = "~/.wtlab/server.toml")]
    config: String,

    /// Generate a short-lived self-signed certificate under ~/.wtlab
    #[arg(long)]
    generate_cert: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize tracing
    use tracing_subscriber::EnvFilter;
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "starting wtlab-server");

    let config_path = PathBuf::from(&cli.config);
    let mut server_config = match ServerConfig::load(
        Some(&config_path),
        Overrides {
            port: cli.port,
            http_port: cli.http_port,
            bind: cli.bind.clone(),
            cert: cli.cert.clone(),
            key: cli.key.clone(),
        },
    ) {
        Ok(cfg) => cfg,
        Err(e) => {
            error!(error = %e, "failed to load config");
            std::process::exit(1);
        }
    };

    if cli.generate_cert {
        let dir = config::expand_tilde(std::path::Path::new("~/.wtlab"));
        match cert::generate_self_signed(&dir, server_config.cert_validity_days) {
            Ok((c, k)) => {
                server_config.cert_path = c;
                server_config.key_path = k;
            }
            Err(e) => {
                error!(error = %e, "failed to generate self-signed certificate");
                std::process::exit(1);
            }
        }
    }

    let shutdown = CancelSignal::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            shutdown_signal().await;
            info!("received shutdown signal");
            shutdown.cancel();
        });
    }

    if let Err(e) = server::serve(server_config, shutdown).await {
        error!(error = %e, "server error");
        std::process::exit(1);
    }

    info!("wtlab-server stopped");
}

/// Wait for SIGTERM or SIGINT (Ctrl+C).
async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => {}
            _ = sigterm.recv() => {}
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
    }
}
