//! Endpoint health monitoring and failure-driven rotation.
//!
//! The monitor probes every active endpoint at a fixed cadence. Worker and
//! function endpoints answer HTTPS; everything else gets a raw TCP connect.
//! Three consecutive failures trigger retire-then-rotate in the background
//! so probing never blocks on provider calls.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::net::TcpStream;
use tokio::sync::broadcast;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

use crate::error::RotationError;
use crate::rotation::{Endpoint, RotationController};

/// Consecutive failures before an endpoint is replaced.
const FAILURE_THRESHOLD: u32 = 3;

/// Health status of one endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResult {
    pub endpoint_id: String,
    pub healthy: bool,
    pub latency: Duration,
    pub last_check: DateTime<Utc>,
    pub fail_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Periodically probes a controller's active endpoints.
pub struct HealthMonitor {
    controller: Arc<dyn RotationController>,
    interval: Duration,
    timeout: Duration,
    results: Mutex<HashMap<String, HealthResult>>,
    stop: Mutex<Option<broadcast::Sender<()>>>,
    client: reqwest::Client,
}

impl HealthMonitor {
    pub fn new(
        controller: Arc<dyn RotationController>,
        interval: Duration,
        timeout: Duration,
    ) -> Result<Self, RotationError> {
        Ok(Self {
            controller,
            interval,
            timeout,
            results: Mutex::new(HashMap::new()),
            stop: Mutex::new(None),
            client: reqwest::Client::builder()
                .timeout(timeout)
                .build()
                .map_err(|e| RotationError::Transport(e.to_string()))?,
        })
    }

    /// Begin periodic probing. Calling again replaces the running task.
    pub fn start(self: &Arc<Self>) {
        let (stop_tx, mut stop_rx) = broadcast::channel(1);
        if let Some(previous) = self.stop.lock().unwrap().replace(stop_tx) {
            let _ = previous.send(());
        }

        let monitor = Arc::clone(self);
        let interval = self.interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = stop_rx.recv() => break,
                    _ = ticker.tick() => monitor.check_all().await,
                }
            }
        });

        info!(interval = ?self.interval, timeout = ?self.timeout, "health monitor started");
    }

    /// Halt probing; a later [`start`](Self::start) resumes it.
    pub fn stop(&self) {
        if let Some(stop_tx) = self.stop.lock().unwrap().take() {
            let _ = stop_tx.send(());
        }
    }

    /// Snapshot of the current results by endpoint identifier.
    pub fn results(&self) -> HashMap<String, HealthResult> {
        self.results.lock().unwrap().clone()
    }

    async fn check_all(&self) {
        let endpoints = self.controller.active_endpoints();

        // Results are retained only while the endpoint exists.
        {
            let mut results = self.results.lock().unwrap();
            results.retain(|id, _| endpoints.iter().any(|e| &e.id == id));
        }

        for endpoint in endpoints {
            let result = self.check_endpoint(&endpoint).await;

            self.results
                .lock()
                .unwrap()
                .insert(endpoint.id.clone(), result.clone());

            if !result.healthy {
                warn!(
                    id = %endpoint.id,
                    fail_count = result.fail_count,
                    error = result.error.as_deref().unwrap_or(""),
                    "endpoint unhealthy"
                );

                if result.fail_count >= FAILURE_THRESHOLD {
                    info!(id = %endpoint.id, "replacing unhealthy endpoint");
                    let controller = Arc::clone(&self.controller);
                    tokio::spawn(async move {
                        if let Err(e) = controller.retire(&endpoint).await {
                            warn!(id = %endpoint.id, error = %e, "failed to retire unhealthy endpoint");
                        }
                        if let Err(e) = controller.rotate().await {
                            warn!(error = %e, "failed to rotate replacement endpoint");
                        }
                    });
                }
            }
        }
    }

    async fn check_endpoint(&self, endpoint: &Endpoint) -> HealthResult {
        let previous_failures = self
            .results
            .lock()
            .unwrap()
            .get(&endpoint.id)
            .map(|r| r.fail_count)
            .unwrap_or(0);

        let started = Instant::now();
        let outcome = match endpoint.provider.as_str() {
            "cloudflare" | "aws" => self.probe_https(&endpoint.address).await,
            _ => self.probe_tcp(&endpoint.address).await,
        };
        let latency = started.elapsed();

        match outcome {
            Ok(()) => HealthResult {
                endpoint_id: endpoint.id.clone(),
                healthy: true,
                latency,
                last_check: Utc::now(),
                fail_count: 0,
                error: None,
            },
            Err(e) => HealthResult {
                endpoint_id: endpoint.id.clone(),
                healthy: false,
                latency,
                last_check: Utc::now(),
                fail_count: previous_failures + 1,
                error: Some(e.to_string()),
            },
        }
    }

    async fn probe_tcp(&self, addr: &str) -> Result<(), RotationError> {
        match tokio::time::timeout(self.timeout, TcpStream::connect(addr)).await {
            Err(_) => Err(RotationError::Timeout),
            Ok(Err(e)) => Err(RotationError::Transport(format!("TCP probe failed: {e}"))),
            Ok(Ok(_)) => Ok(()),
        }
    }

    async fn probe_https(&self, host: &str) -> Result<(), RotationError> {
        let url = if host.starts_with("https://") || host.starts_with("http://") {
            host.to_string()
        } else {
            format!("https://{host}/")
        };

        let resp = self.client.get(&url).send().await?;
        let status = resp.status().as_u16();
        if status >= 500 {
            return Err(RotationError::Provider {
                status,
                message: format!("probe returned {status}"),
            });
        }
        Ok(())
    }
}
