//! wtlab: WebTransport session client CLI.
//!
//! Connects to a wtlab server (pinning its certificate via the plain-HTTP
//! fingerprint endpoint), streams the session log, and reports how many
//! datagrams and streams each channel saw.

mod commands;
mod config;

use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::error;
use wtlab_core::CertificatePin;

/// wtlab: WebTransport session client
#[derive(Parser)]
#[command(name = "wtlab", version, about = "WebTransport session client")]
struct Cli {
    /// Config file path
    #[arg(long = "config", global = true)]
    config: Option<String>,

    /// Log level for diagnostics on stderr (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Open a session and watch its channels
    Connect {
        /// Session URL, e.g. https://localhost:4433/ (uses config default)
        endpoint: Option<String>,

        /// Bidirectional streams to open, each with a periodic writer
        #[arg(long, default_value_t = 0)]
        bidi: usize,

        /// Unidirectional streams to open, each with a periodic writer
        #[arg(long, default_value_t = 0)]
        uni: usize,

        /// Datagram to send once ready (hex, repeatable)
        #[arg(long = "datagram", value_name = "HEX")]
        datagrams: Vec<String>,

        /// Milliseconds between writes on local streams
        #[arg(long, default_value_t = 30)]
        write_interval_ms: u64,

        /// Pin this certificate fingerprint instead of fetching it
        #[arg(long, value_name = "AB:CD:..")]
        fingerprint: Option<String>,

        /// Fingerprint URL (derived from the endpoint by default)
        #[arg(long)]
        fingerprint_url: Option<String>,

        /// Do not pin; rely on normal certificate validation
        #[arg(long)]
        no_pinning: bool,

        /// Connect unpinned when the fingerprint cannot be fetched
        #[arg(long)]
        fallback: bool,

        /// Skip certificate validation when not pinned
        #[arg(long)]
        insecure: bool,

        /// Close after this many seconds instead of waiting for Ctrl-C
        #[arg(long)]
        duration: Option<u64>,
    },

    /// Fetch and print a server's certificate fingerprint
    Fingerprint {
        /// Session URL or fingerprint URL (uses config default)
        endpoint: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    use tracing_subscriber::EnvFilter;
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let config_path = cli.config.clone().unwrap_or_else(|| {
        let home = dirs::home_dir().unwrap_or_default();
        home.join(".wtlab").join("client.toml").to_string_lossy().to_string()
    });

    let result = run(cli.command, &config_path).await;

    if let Err(e) = result {
        error!("{:#}", e);
        eprintln!("wtlab: {e:#}");
        std::process::exit(1);
    }
}

async fn run(command: Command, config_path: &str) -> Result<()> {
    let cfg = config::Config::load(config_path)?;

    match command {
        Command::Connect {
            endpoint,
            bidi,
            uni,
            datagrams,
            write_interval_ms,
            fingerprint,
            fingerprint_url,
            no_pinning,
            fallback,
            insecure,
            duration,
        } => {
            let mut client = cfg.client_config(endpoint.as_deref());
            if let Some(fp) = fingerprint {
                client.pin = Some(CertificatePin::from_colon_hex(&fp)?);
            }
            if fingerprint_url.is_some() {
                client.fingerprint_url = fingerprint_url;
            }
            client.pinning &= !no_pinning;
            client.bootstrap_fallback |= fallback;
            client.insecure |= insecure;

            let actions = commands::connect::Actions {
                bidi,
                uni,
                datagrams: datagrams
                    .iter()
                    .map(|d| config::parse_hex_payload(d))
                    .collect::<Result<_>>()?,
                write_interval: Duration::from_millis(write_interval_ms.max(1)),
                duration: duration.map(Duration::from_secs),
            };
            commands::connect::run(client, actions).await
        }
        Command::Fingerprint { endpoint } => {
            let client = cfg.client_config(endpoint.as_deref());
            let url = if client.endpoint.starts_with("http://") {
                client.endpoint.clone()
            } else {
                client.fingerprint_url()?
            };
            commands::fingerprint::run(&url, client.connect_timeout()).await
        }
    }
}
