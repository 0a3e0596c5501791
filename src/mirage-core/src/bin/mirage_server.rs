//! Mirage server — camouflaged tunnel ingress with endpoint rotation.
//!
//! Loads the YAML configuration, boots the engine through the configured
//! backend loader, and optionally drives the rotation controller and health
//! monitor until interrupted.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use mirage_core::config::{load_config, RotationConfig};
use mirage_core::engine::Engine;
use mirage_core::loader::default_loader;
use mirage_core::rotation::aws::AwsController;
use mirage_core::rotation::cloudflare::CloudflareController;
use mirage_core::rotation::health::HealthMonitor;
use mirage_core::rotation::{
    start_auto_rotation, stop_auto_rotation, NoOpController, RotationController,
};

const HEALTH_INTERVAL: Duration = Duration::from_secs(30);
const HEALTH_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Parser)]
#[command(name = "mirage-server", version, about = "Camouflaged tunnel server with endpoint rotation")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start the tunnel server
    Serve {
        /// Path to the server config file
        #[arg(short, long, default_value = "configs/server.yaml")]
        config: PathBuf,
    },
    /// Print the compiled engine JSON config
    ShowConfig {
        /// Path to the server config file
        #[arg(short, long, default_value = "configs/server.yaml")]
        config: PathBuf,
    },
    /// Print an example server configuration
    GenerateConfig,
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
        Command::Serve { config } => serve(&config).await,
        Command::ShowConfig { config } => show_config(&config).await,
        Command::GenerateConfig => {
            print!("{EXAMPLE_CONFIG}");
            Ok(())
        }
    }
}

async fn serve(config_path: &Path) -> Result<()> {
    info!(path = %config_path.display(), "loading configuration");

    let mut cfg = load_config(config_path)
        .with_context(|| format!("loading config from {}", config_path.display()))?;
    cfg.validate().context("invalid configuration")?;

    let rotation_cfg = cfg.rotation.clone();
    let engine = Arc::new(Engine::new(cfg.clone(), default_loader())?);
    engine.start().await.context("failed to start engine")?;

    info!(
        listen = %cfg.listen,
        protocol = %cfg.protocol,
        sni = %cfg.reality.sni,
        fingerprint = %cfg.fingerprint,
        "server is running"
    );

    let mut controller: Option<Arc<dyn RotationController>> = None;
    let mut monitor: Option<Arc<HealthMonitor>> = None;

    if rotation_cfg.enabled {
        let ctl = build_controller(&rotation_cfg)?;
        let interval = rotation_cfg.interval_duration()?;
        start_auto_rotation(Arc::clone(&ctl), interval);

        let health = Arc::new(HealthMonitor::new(
            Arc::clone(&ctl),
            HEALTH_INTERVAL,
            HEALTH_TIMEOUT,
        )?);
        health.start();

        info!(provider = %rotation_cfg.provider, interval = ?interval, "endpoint rotation enabled");
        controller = Some(ctl);
        monitor = Some(health);
    }

    wait_for_shutdown().await;
    info!("received signal, shutting down");

    if let Some(health) = &monitor {
        health.stop();
    }
    if let Some(ctl) = &controller {
        stop_auto_rotation(ctl);
    }
    if let Err(e) = engine.stop().await {
        error!(error = %e, "error stopping engine");
    }

    info!("server shutdown complete");
    Ok(())
}

fn build_controller(cfg: &RotationConfig) -> Result<Arc<dyn RotationController>> {
    match cfg.provider.as_str() {
        "cloudflare" => {
            let mut ctl = CloudflareController::new(
                cfg.cf_api_token.clone(),
                cfg.cf_account_id.clone(),
                cfg.cf_zone_id.clone(),
            )?;
            if let Some(record) = &cfg.cf_dns_record {
                ctl = ctl.with_dns_record(record.clone());
            }
            Ok(Arc::new(ctl))
        }
        "aws" => Ok(Arc::new(AwsController::new(
            cfg.aws_region.clone(),
            cfg.aws_access_key.clone(),
            cfg.aws_secret_key.clone(),
        )?)),
        "noop" | "" => Ok(Arc::new(NoOpController::new())),
        other => bail!("unsupported rotation provider: {other}"),
    }
}

async fn show_config(config_path: &Path) -> Result<()> {
    let mut cfg = load_config(config_path)?;
    cfg.validate().context("invalid configuration")?;
    let json = mirage_core::xray_config::build_server_config(&cfg)?;
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

const EXAMPLE_CONFIG: &str = r#"# Mirage server configuration
listen: ":443"
protocol: vless
uuid: "your-uuid-here"

reality:
  sni: "www.google.com"
  private_key: "your-x25519-private-key"
  public_key: "your-x25519-public-key"
  short_ids:
    - "abcdef01"

fingerprint: "chrome"

fallbacks:
  - protocol: trojan
    listen: ":8443"
    transport: ws
    path: "/ws"

log_level: "info"

# Rotation (optional)
rotation:
  enabled: false
  provider: "cloudflare"
  interval: "30m"
"#;
