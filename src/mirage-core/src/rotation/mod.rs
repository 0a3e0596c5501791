//! Dynamic endpoint rotation across cloud providers.
//!
//! A [`RotationController`] provisions externally-reachable endpoints and
//! maintains the active list. The provider variants share one state layout
//! ([`EndpointSet`]) and differ only in the side-effects of rotate/retire.

pub mod aws;
pub mod cloudflare;
pub mod health;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

use crate::error::RotationError;

/// Auto-rotation keeps at most this many endpoints in the active list.
pub const MAX_ACTIVE_ENDPOINTS: usize = 2;

/// An externally-reachable ingress with its provider metadata.
///
/// The identifier doubles as the provider-side resource name so teardown can
/// reconstruct the API path without additional state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Endpoint {
    pub id: String,
    pub address: String,
    pub region: String,
    /// "cloudflare", "aws", or "noop"
    pub provider: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, String>,
}

impl Endpoint {
    /// Whether the endpoint has passed its expiry time.
    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }
}

/// Provisions and retires endpoints while maintaining the active list.
#[async_trait]
pub trait RotationController: Send + Sync {
    /// Provision a new endpoint and append it to the active list.
    async fn rotate(&self) -> Result<Endpoint, RotationError>;

    /// Tear down the identified endpoint and remove it from the active list.
    async fn retire(&self, endpoint: &Endpoint) -> Result<(), RotationError>;

    /// Snapshot of the non-expired endpoints, in provisioning order.
    fn active_endpoints(&self) -> Vec<Endpoint>;

    /// Shared state backing this controller.
    fn endpoints(&self) -> &EndpointSet;
}

struct AutoRotation {
    stop_tx: broadcast::Sender<()>,
    handle: JoinHandle<()>,
}

/// State shared by all controller variants: the ordered active list, the
/// monotonic rotation counter, and the auto-rotation task slot.
pub struct EndpointSet {
    endpoints: Mutex<Vec<Endpoint>>,
    counter: AtomicU64,
    auto: Mutex<Option<AutoRotation>>,
}

impl EndpointSet {
    pub fn new() -> Self {
        Self {
            endpoints: Mutex::new(Vec::new()),
            counter: AtomicU64::new(0),
            auto: Mutex::new(None),
        }
    }

    /// Next value of the per-instance rotation counter (monotonic, 1-based).
    pub fn next_counter(&self) -> u64 {
        self.counter.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn insert(&self, endpoint: Endpoint) {
        self.endpoints.lock().unwrap().push(endpoint);
    }

    /// Remove by identifier; reports whether it was present.
    pub fn remove(&self, id: &str) -> bool {
        let mut endpoints = self.endpoints.lock().unwrap();
        let before = endpoints.len();
        endpoints.retain(|e| e.id != id);
        endpoints.len() != before
    }

    /// Copied-out list of non-expired endpoints.
    pub fn active(&self) -> Vec<Endpoint> {
        self.endpoints
            .lock()
            .unwrap()
            .iter()
            .filter(|e| !e.is_expired())
            .cloned()
            .collect()
    }

    /// Oldest endpoints beyond the newest `keep`, for background retirement.
    pub fn overflow(&self, keep: usize) -> Vec<Endpoint> {
        let endpoints = self.endpoints.lock().unwrap();
        if endpoints.len() <= keep {
            return Vec::new();
        }
        endpoints[..endpoints.len() - keep].to_vec()
    }
}

impl Default for EndpointSet {
    fn default() -> Self {
        Self::new()
    }
}

/// Begin rotating at the given cadence. Missed ticks are dropped, and after
/// each rotation the oldest endpoints are retired in the background while
/// the list holds more than [`MAX_ACTIVE_ENDPOINTS`]. Calling again replaces
/// the previous schedule.
pub fn start_auto_rotation(controller: Arc<dyn RotationController>, interval: Duration) {
    let (stop_tx, mut stop_rx) = broadcast::channel(1);

    let task_controller = Arc::clone(&controller);
    let handle = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // The first tick completes immediately; rotation begins one interval in.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = stop_rx.recv() => break,
                _ = ticker.tick() => {}
            }

            // An in-flight rotation is abandoned when the schedule stops.
            let outcome = tokio::select! {
                _ = stop_rx.recv() => Err(RotationError::Cancelled),
                result = task_controller.rotate() => result,
            };
            match outcome {
                Ok(_) => {}
                Err(RotationError::Cancelled) => {
                    info!("rotation cancelled by stop");
                    break;
                }
                Err(e) => warn!(error = %e, "auto-rotation failed"),
            }

            for endpoint in task_controller.endpoints().overflow(MAX_ACTIVE_ENDPOINTS) {
                let retire_controller = Arc::clone(&task_controller);
                tokio::spawn(async move {
                    if let Err(e) = retire_controller.retire(&endpoint).await {
                        warn!(endpoint = %endpoint.id, error = %e, "failed to retire endpoint");
                    }
                });
            }
        }
    });

    let mut slot = controller.endpoints().auto.lock().unwrap();
    if let Some(previous) = slot.take() {
        let _ = previous.stop_tx.send(());
    }
    *slot = Some(AutoRotation { stop_tx, handle });
    info!(interval = ?interval, "auto-rotation started");
}

/// Cancel the rotation schedule; a later [`start_auto_rotation`] restarts it.
pub fn stop_auto_rotation(controller: &Arc<dyn RotationController>) {
    if let Some(auto) = controller.endpoints().auto.lock().unwrap().take() {
        let _ = auto.stop_tx.send(());
        drop(auto.handle);
        info!("auto-rotation stopped");
    }
}

/// Map an HTTP >= 400 response to [`RotationError::Provider`].
pub(crate) async fn ensure_success(
    resp: reqwest::Response,
) -> Result<reqwest::Response, RotationError> {
    let status = resp.status();
    if status.as_u16() >= 400 {
        let message = resp.text().await.unwrap_or_default();
        return Err(RotationError::Provider {
            status: status.as_u16(),
            message,
        });
    }
    Ok(resp)
}

/// Controller without cloud side-effects: endpoints are synthetic loopback
/// addresses. Used for tests and single-host deployments.
pub struct NoOpController {
    set: EndpointSet,
}

impl NoOpController {
    pub fn new() -> Self {
        Self {
            set: EndpointSet::new(),
        }
    }
}

impl Default for NoOpController {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RotationController for NoOpController {
    async fn rotate(&self) -> Result<Endpoint, RotationError> {
        let n = self.set.next_counter();
        let now = Utc::now();
        let endpoint = Endpoint {
            id: format!("noop-{n}"),
            address: format!("127.0.0.1:{}", 10000 + n),
            region: "local".to_string(),
            provider: "noop".to_string(),
            created_at: now,
            expires_at: now + chrono::Duration::hours(1),
            metadata: HashMap::new(),
        };

        self.set.insert(endpoint.clone());
        info!(id = %endpoint.id, address = %endpoint.address, "rotated endpoint (noop)");
        Ok(endpoint)
    }

    async fn retire(&self, endpoint: &Endpoint) -> Result<(), RotationError> {
        if self.set.remove(&endpoint.id) {
            info!(id = %endpoint.id, "retired endpoint (noop)");
            Ok(())
        } else {
            Err(RotationError::NotFound(endpoint.id.clone()))
        }
    }

    fn active_endpoints(&self) -> Vec<Endpoint> {
        self.set.active()
    }

    fn endpoints(&self) -> &EndpointSet {
        &self.set
    }
}
