//! Endpoint rotation via Cloudflare Workers.
//!
//! Each rotation uploads a fixed-shape forwarder script under a unique name;
//! the worker's public subdomain becomes the endpoint address. An optional
//! stable DNS record can be kept pointed at the newest worker.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use tracing::{info, warn};

use crate::error::RotationError;
use crate::rotation::{ensure_success, Endpoint, EndpointSet, RotationController};

const API_BASE: &str = "https://api.cloudflare.com/client/v4";

/// Forwarder script deployed to each worker. WebSocket upgrades are relayed
/// upstream; anything else gets plausible decoy content.
const WORKER_SCRIPT: &str = r#"
export default {
    async fetch(request) {
        const url = new URL(request.url);
        if (request.headers.get("Upgrade") === "websocket") {
            const upstream = new URL(url.pathname, "wss://UPSTREAM_HOST");
            return fetch(new Request(upstream, request));
        }
        return new Response("<!DOCTYPE html><html><body><h1>Welcome</h1></body></html>", {
            headers: { "content-type": "text/html" },
        });
    }
};"#;

pub struct CloudflareController {
    set: EndpointSet,
    api_token: String,
    account_id: String,
    zone_id: String,
    dns_record: Option<String>,
    client: reqwest::Client,
}

impl CloudflareController {
    pub fn new(
        api_token: impl Into<String>,
        account_id: impl Into<String>,
        zone_id: impl Into<String>,
    ) -> Result<Self, RotationError> {
        Ok(Self {
            set: EndpointSet::new(),
            api_token: api_token.into(),
            account_id: account_id.into(),
            zone_id: zone_id.into(),
            dns_record: None,
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .map_err(|e| RotationError::Transport(e.to_string()))?,
        })
    }

    /// Keep a stable DNS name pointed at the newest worker after each rotation.
    pub fn with_dns_record(mut self, record: impl Into<String>) -> Self {
        self.dns_record = Some(record.into());
        self
    }

    async fn deploy_worker(&self, name: &str) -> Result<(), RotationError> {
        let url = format!(
            "{API_BASE}/accounts/{}/workers/scripts/{}",
            self.account_id, name
        );

        let resp = self
            .client
            .put(&url)
            .bearer_auth(&self.api_token)
            .header("Content-Type", "application/javascript")
            .body(WORKER_SCRIPT)
            .send()
            .await?;
        ensure_success(resp).await?;
        Ok(())
    }

    async fn delete_worker(&self, name: &str) -> Result<(), RotationError> {
        let url = format!(
            "{API_BASE}/accounts/{}/workers/scripts/{}",
            self.account_id, name
        );

        let resp = self
            .client
            .delete(&url)
            .bearer_auth(&self.api_token)
            .send()
            .await?;
        ensure_success(resp).await?;
        Ok(())
    }

    /// Create or update a CNAME pointing `record` at `target` (proxied,
    /// short TTL so rotations propagate quickly).
    pub async fn update_dns(&self, record: &str, target: &str) -> Result<(), RotationError> {
        let url = format!("{API_BASE}/zones/{}/dns_records", self.zone_id);

        let payload = json!({
            "type": "CNAME",
            "name": record,
            "content": target,
            "ttl": 60,
            "proxied": true,
        });

        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.api_token)
            .json(&payload)
            .send()
            .await?;
        ensure_success(resp).await?;

        info!(record = %record, target = %target, "DNS record updated");
        Ok(())
    }
}

#[async_trait]
impl RotationController for CloudflareController {
    async fn rotate(&self) -> Result<Endpoint, RotationError> {
        let n = self.set.next_counter();
        let name = format!("edge-worker-{}-{}", Utc::now().timestamp(), n);

        info!(name = %name, "deploying new worker");
        self.deploy_worker(&name).await?;

        let address = format!("{name}.workers.dev");
        let now = Utc::now();
        let endpoint = Endpoint {
            id: name.clone(),
            address: address.clone(),
            // Workers are global anycast.
            region: "global".to_string(),
            provider: "cloudflare".to_string(),
            created_at: now,
            expires_at: now + chrono::Duration::hours(1),
            metadata: HashMap::from([
                ("worker_name".to_string(), name),
                ("type".to_string(), "workers".to_string()),
            ]),
        };

        // Listed before the DNS repoint; teardown must be able to find
        // the worker even if the repoint is abandoned.
        self.set.insert(endpoint.clone());

        if let Some(record) = &self.dns_record {
            if let Err(e) = self.update_dns(record, &address).await {
                warn!(record = %record, error = %e, "failed to repoint DNS record");
            }
        }

        info!(id = %endpoint.id, address = %endpoint.address, "worker deployed");
        Ok(endpoint)
    }

    async fn retire(&self, endpoint: &Endpoint) -> Result<(), RotationError> {
        if endpoint.provider != "cloudflare" {
            return if self.set.remove(&endpoint.id) {
                Ok(())
            } else {
                Err(RotationError::NotFound(endpoint.id.clone()))
            };
        }

        info!(name = %endpoint.id, "retiring worker");
        let present = self.set.remove(&endpoint.id);

        match self.delete_worker(&endpoint.id).await {
            Ok(()) => {}
            Err(e) if present => return Err(e),
            // Opportunistic teardown of an unlisted endpoint.
            Err(e) => warn!(name = %endpoint.id, error = %e, "failed to delete worker (may not exist)"),
        }

        if present {
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constructor_stores_credentials() {
        let ctrl = CloudflareController::new("token", "account", "zone").unwrap();
        assert_eq!(ctrl.api_token, "token");
        assert_eq!(ctrl.account_id, "account");
        assert_eq!(ctrl.zone_id, "zone");
        assert!(ctrl.dns_record.is_none());
    }

    #[test]
    fn dns_record_builder() {
        let ctrl = CloudflareController::new("t", "a", "z")
            .unwrap()
            .with_dns_record("edge.example.com");
        assert_eq!(ctrl.dns_record.as_deref(), Some("edge.example.com"));
    }

    #[tokio::test]
    async fn retire_unknown_foreign_endpoint_is_not_found() {
        let ctrl = CloudflareController::new("t", "a", "z").unwrap();
        let ghost = Endpoint {
            id: "noop-1".into(),
            address: "127.0.0.1:1".into(),
            region: "local".into(),
            provider: "noop".into(),
            created_at: Utc::now(),
            expires_at: Utc::now(),
            metadata: HashMap::new(),
        };

        let err = ctrl.retire(&ghost).await.err().unwrap();
        assert!(matches!(err, RotationError::NotFound(_)));
    }
}
