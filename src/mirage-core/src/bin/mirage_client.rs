//! Mirage client — connects to a camouflaged tunnel server.
//!
//! Establishes the outbound connection through the engine, exposes local
//! SOCKS5/HTTP mapping ports, and runs the control surface for the desktop
//! shell until interrupted.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use mirage_core::api::{ApiServer, ApiState};
use mirage_core::camouflage::{list_fingerprints, select_fingerprint};
use mirage_core::config::{load_client_config, ClientConfig};
use mirage_core::engine::Engine;
use mirage_core::loader::default_loader;

#[derive(Parser)]
#[command(name = "mirage-client", version, about = "Client for the camouflaged tunnel")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Connect to a tunnel server
    Connect(ConnectArgs),
    /// Print the compiled engine JSON config
    ShowConfig {
        /// Path to the client config file
        #[arg(short, long)]
        config: PathBuf,
    },
    /// List supported browser fingerprints
    Fingerprints,
}

#[derive(clap::Args)]
struct ConnectArgs {
    /// Path to the client config file (the flags below are ignored when set)
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Server address (host:port)
    #[arg(long, default_value = "")]
    server: String,
    /// Client credential UUID
    #[arg(long, default_value = "")]
    uuid: String,
    /// SNI for the outer handshake
    #[arg(long, default_value = "")]
    sni: String,
    /// Browser fingerprint for the outer handshake
    #[arg(long, default_value = "chrome")]
    fingerprint: String,
    /// Server public key
    #[arg(long, default_value = "")]
    public_key: String,
    /// Short ID partitioning this client
    #[arg(long, default_value = "")]
    short_id: String,
    /// Local SOCKS5 listen address
    #[arg(long, default_value = "127.0.0.1:1080")]
    local: String,
    /// Local HTTP listen address (optional)
    #[arg(long, default_value = "")]
    http: String,
    /// Control surface address for the desktop shell
    #[arg(long, default_value = "127.0.0.1:9876")]
    api: String,
    /// Enable low-latency sports streaming mode
    #[arg(long)]
    sports_mode: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Connect(args) => connect(args).await,
        Command::ShowConfig { config } => show_config(&config).await,
        Command::Fingerprints => {
            println!("Supported browser fingerprints:");
            for name in list_fingerprints() {
                // Listed names always resolve.
                if let Ok(id) = select_fingerprint(name) {
                    println!("  {name:<15} -> {id}");
                }
            }
            Ok(())
        }
    }
}

async fn connect(args: ConnectArgs) -> Result<()> {
    let mut cfg = match &args.config {
        Some(path) => load_client_config(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => ClientConfig {
            server: args.server,
            uuid: args.uuid,
            sni: args.sni,
            fingerprint: args.fingerprint,
            public_key: args.public_key,
            short_id: args.short_id,
            local_listen: args.local,
            http_listen: args.http,
            api_listen: args.api,
            sports_mode: args.sports_mode,
            ..Default::default()
        },
    };
    cfg.validate().context("invalid configuration")?;

    let utls_id = select_fingerprint(&cfg.fingerprint)?;
    info!(
        server = %cfg.server,
        sni = %cfg.sni,
        fingerprint = %utls_id,
        local_socks5 = %cfg.local_listen,
        sports_mode = cfg.sports_mode,
        "connecting"
    );

    let api_listen = cfg.api_listen.clone();
    let sports_mode = cfg.sports_mode;
    let engine = Arc::new(Engine::new_client(cfg, default_loader())?);

    engine.start().await.context("failed to start engine")?;
    info!("connected");

    let state = Arc::new(ApiState::new(Arc::clone(&engine)).with_sports_mode(sports_mode));
    let api = ApiServer::new(api_listen, state);
    match api.start().await {
        Ok(addr) => info!(addr = %addr, "control surface running"),
        Err(e) => warn!(error = %e, "failed to start control surface"),
    }

    wait_for_shutdown().await;
    info!("received signal, disconnecting");

    api.stop();
    if let Err(e) = engine.stop().await {
        error!(error = %e, "error stopping engine");
    }
    Ok(())
}

async fn show_config(config_path: &Path) -> Result<()> {
    let mut cfg = load_client_config(config_path)?;
    cfg.validate().context("invalid configuration")?;
    let json = mirage_core::xray_config::build_client_config(&cfg)?;
    println!("{}", String::from_utf8_lossy(&json));
    Ok(())
}

#[cfg(unix)]
async fn wait_for_shutdown() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate = match signal(SignalKind::terminate()) {
        Ok(signal) => signal,
        Err(e) => {
            error!(error = %e, "failed to install SIGTERM handler");
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = terminate.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown() {
    let _ = tokio::signal::ctrl_c().await;
}
