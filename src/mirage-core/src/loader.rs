//! Backend loaders turning a compiled JSON document into a runnable instance.
//!
//! Two interchangeable loaders exist: a validating stub for tests and
//! runtime-less environments, and a process loader driving the system `xray`
//! binary. Selecting one is a compile-time decision (`xray-run` feature);
//! nothing outside this module changes when swapping.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::process::{Child, Command};
use tracing::{debug, info};

use crate::error::EngineError;

/// Handle owning one running engine backend.
#[async_trait]
pub trait Instance: Send + Sync {
    async fn start(&mut self) -> Result<(), EngineError>;
    async fn close(&mut self) -> Result<(), EngineError>;
}

/// Converts a compiled JSON document into an [`Instance`].
#[async_trait]
pub trait InstanceLoader: Send + Sync {
    async fn load(&self, config: &[u8]) -> Result<Box<dyn Instance>, EngineError>;
}

/// The loader selected at build time.
pub fn default_loader() -> Arc<dyn InstanceLoader> {
    #[cfg(feature = "xray-run")]
    {
        Arc::new(ProcessLoader::new())
    }
    #[cfg(not(feature = "xray-run"))]
    {
        Arc::new(StubLoader)
    }
}

/// Validating no-op loader for tests and environments without the runtime.
pub struct StubLoader;

#[async_trait]
impl InstanceLoader for StubLoader {
    async fn load(&self, config: &[u8]) -> Result<Box<dyn Instance>, EngineError> {
        serde_json::from_slice::<serde_json::Value>(config)
            .map_err(|e| EngineError::Load(format!("invalid JSON config: {e}")))?;
        Ok(Box::new(StubInstance))
    }
}

struct StubInstance;

#[async_trait]
impl Instance for StubInstance {
    async fn start(&mut self) -> Result<(), EngineError> {
        Ok(())
    }

    async fn close(&mut self) -> Result<(), EngineError> {
        Ok(())
    }
}

/// Loader that writes the document to disk and runs the system `xray` binary.
pub struct ProcessLoader {
    counter: AtomicU64,
}

impl ProcessLoader {
    pub fn new() -> Self {
        Self {
            counter: AtomicU64::new(0),
        }
    }
}

impl Default for ProcessLoader {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl InstanceLoader for ProcessLoader {
    async fn load(&self, config: &[u8]) -> Result<Box<dyn Instance>, EngineError> {
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        let config_path = std::env::temp_dir().join(format!(
            "engine-config-{}-{}.json",
            std::process::id(),
            n
        ));

        tokio::fs::write(&config_path, config)
            .await
            .map_err(|e| EngineError::Load(format!("writing config file: {e}")))?;

        Ok(Box::new(ProcessInstance {
            config_path,
            child: None,
        }))
    }
}

struct ProcessInstance {
    config_path: PathBuf,
    child: Option<Child>,
}

impl ProcessInstance {
    fn locate_binary() -> Option<PathBuf> {
        if let Ok(path_var) = std::env::var("PATH") {
            for dir in std::env::split_paths(&path_var) {
                let candidate = dir.join("xray");
                if candidate.is_file() {
                    return Some(candidate);
                }
            }
        }
        for candidate in ["/opt/homebrew/bin/xray", "/usr/local/bin/xray", "/usr/bin/xray"] {
            let path = PathBuf::from(candidate);
            if path.is_file() {
                return Some(path);
            }
        }
        None
    }
}

#[async_trait]
impl Instance for ProcessInstance {
    async fn start(&mut self) -> Result<(), EngineError> {
        let binary = Self::locate_binary().ok_or_else(|| {
            EngineError::InstanceStart(
                "xray binary not found in PATH or common locations".to_string(),
            )
        })?;

        debug!(binary = %binary.display(), config = %self.config_path.display(), "spawning engine process");

        let child = Command::new(&binary)
            .arg("run")
            .arg("-config")
            .arg(&self.config_path)
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| EngineError::InstanceStart(e.to_string()))?;

        info!(pid = child.id(), "engine process started");
        self.child = Some(child);
        Ok(())
    }

    async fn close(&mut self) -> Result<(), EngineError> {
        if let Some(mut child) = self.child.take() {
            if let Err(e) = child.kill().await {
                debug!(error = %e, "engine process already gone");
            }
        }
        let _ = tokio::fs::remove_file(&self.config_path).await;
        Ok(())
    }
}
