//! Engine lifecycle supervision.
//!
//! One [`Engine`] owns one backend [`Instance`](crate::loader::Instance) and
//! drives it through stopped → starting → running → stopping. Start compiles
//! the JSON document for the configured mode, hands it to the loader, and
//! boots the instance; any failure parks the engine in the error state.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{broadcast, RwLock};
use tracing::{debug, info, warn};

use crate::config::{ClientConfig, ServerConfig};
use crate::error::EngineError;
use crate::loader::{Instance, InstanceLoader};
use crate::xray_config::{build_client_config, build_server_config};

/// Current state of the tunnel engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Stopped,
    Starting,
    Running,
    Stopping,
    Error,
}

impl EngineState {
    pub fn as_str(&self) -> &'static str {
        match self {
            EngineState::Stopped => "stopped",
            EngineState::Starting => "starting",
            EngineState::Running => "running",
            EngineState::Stopping => "stopping",
            EngineState::Error => "error",
        }
    }
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Distinguishes server from client engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineMode {
    Server,
    Client,
}

impl EngineMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            EngineMode::Server => "server",
            EngineMode::Client => "client",
        }
    }
}

enum ModeConfig {
    Server(ServerConfig),
    Client(ClientConfig),
}

struct EngineInner {
    state: EngineState,
    instance: Option<Box<dyn Instance>>,
    config_json: Option<Vec<u8>>,
    stop_tx: broadcast::Sender<()>,
    started_at: Option<Instant>,
}

/// Supervises one backend instance through its lifecycle.
pub struct Engine {
    config: ModeConfig,
    loader: Arc<dyn InstanceLoader>,
    inner: RwLock<EngineInner>,
}

impl Engine {
    /// Create a server-mode engine. The configuration is validated eagerly.
    pub fn new(mut config: ServerConfig, loader: Arc<dyn InstanceLoader>) -> Result<Self, EngineError> {
        config.validate()?;
        Ok(Self::with_config(ModeConfig::Server(config), loader))
    }

    /// Create a client-mode engine. The configuration is validated eagerly.
    pub fn new_client(
        mut config: ClientConfig,
        loader: Arc<dyn InstanceLoader>,
    ) -> Result<Self, EngineError> {
        config.validate()?;
        Ok(Self::with_config(ModeConfig::Client(config), loader))
    }

    fn with_config(config: ModeConfig, loader: Arc<dyn InstanceLoader>) -> Self {
        let (stop_tx, _) = broadcast::channel(1);
        Self {
            config,
            loader,
            inner: RwLock::new(EngineInner {
                state: EngineState::Stopped,
                instance: None,
                config_json: None,
                stop_tx,
                started_at: None,
            }),
        }
    }

    pub fn mode(&self) -> EngineMode {
        match self.config {
            ModeConfig::Server(_) => EngineMode::Server,
            ModeConfig::Client(_) => EngineMode::Client,
        }
    }

    /// Compile the configured mode's document, load it, and start the
    /// resulting instance. Fails with [`EngineError::AlreadyRunning`] when
    /// called on a running engine; any other failure parks the engine in the
    /// error state and is returned to the caller.
    pub async fn start(&self) -> Result<(), EngineError> {
        let mut inner = self.inner.write().await;

        if inner.state == EngineState::Running {
            return Err(EngineError::AlreadyRunning);
        }

        inner.state = EngineState::Starting;

        let built = match &self.config {
            ModeConfig::Server(cfg) => {
                info!(
                    listen = %cfg.listen,
                    protocol = %cfg.protocol,
                    sni = %cfg.reality.sni,
                    "building server config"
                );
                build_server_config(cfg)
            }
            ModeConfig::Client(cfg) => {
                info!(
                    server = %cfg.server,
                    sni = %cfg.sni,
                    fingerprint = %cfg.fingerprint,
                    "building client config"
                );
                build_client_config(cfg)
            }
        };

        let config_json = match built {
            Ok(json) => json,
            Err(e) => {
                inner.state = EngineState::Error;
                return Err(EngineError::InvalidConfig(e));
            }
        };

        debug!(bytes = config_json.len(), "engine JSON config generated");
        inner.config_json = Some(config_json.clone());

        let mut instance = match self.loader.load(&config_json).await {
            Ok(instance) => instance,
            Err(e) => {
                inner.state = EngineState::Error;
                return Err(e);
            }
        };

        if let Err(e) = instance.start().await {
            inner.state = EngineState::Error;
            return Err(e);
        }

        inner.instance = Some(instance);
        inner.started_at = Some(Instant::now());
        inner.state = EngineState::Running;
        info!(mode = self.mode().as_str(), "engine is running");
        Ok(())
    }

    /// Shut down the running instance. Close errors are logged, not
    /// propagated; the stop signal fires before the instance closes and a
    /// fresh signal is prepared for the next run.
    pub async fn stop(&self) -> Result<(), EngineError> {
        let mut inner = self.inner.write().await;

        if inner.state != EngineState::Running {
            return Err(EngineError::NotRunning(inner.state));
        }

        inner.state = EngineState::Stopping;
        info!(mode = self.mode().as_str(), "stopping engine");

        let _ = inner.stop_tx.send(());

        if let Some(mut instance) = inner.instance.take() {
            if let Err(e) = instance.close().await {
                warn!(error = %e, "error closing engine instance");
            }
        }

        inner.state = EngineState::Stopped;
        inner.started_at = None;
        let (stop_tx, _) = broadcast::channel(1);
        inner.stop_tx = stop_tx;
        info!("engine stopped");
        Ok(())
    }

    /// The most recently stored state.
    pub async fn status(&self) -> EngineState {
        self.inner.read().await.state
    }

    /// A receiver that fires when the engine begins stopping. The underlying
    /// channel is replaced after each stop, so re-subscribe per run.
    pub async fn subscribe_stop(&self) -> broadcast::Receiver<()> {
        self.inner.read().await.stop_tx.subscribe()
    }

    /// Time since the last successful start, while running.
    pub async fn uptime(&self) -> Option<Duration> {
        self.inner.read().await.started_at.map(|t| t.elapsed())
    }

    /// The generated JSON config, cached by the last start attempt.
    pub async fn config_json(&self) -> Option<Vec<u8>> {
        self.inner.read().await.config_json.clone()
    }

    /// Indented JSON config for display.
    pub async fn config_pretty(&self) -> String {
        let Some(raw) = self.config_json().await else {
            return "{}".to_string();
        };
        match serde_json::from_slice::<serde_json::Value>(&raw) {
            Ok(value) => serde_json::to_string_pretty(&value)
                .unwrap_or_else(|_| String::from_utf8_lossy(&raw).into_owned()),
            Err(_) => String::from_utf8_lossy(&raw).into_owned(),
        }
    }
}
