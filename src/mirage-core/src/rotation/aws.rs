//! Endpoint rotation via AWS Lambda function URLs.
//!
//! Each rotation creates a function with a fixed runtime and handler, then a
//! public function URL that becomes the endpoint address. A half-created
//! function (URL creation failed) is deleted before the error is returned.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use serde_json::json;
use sha2::{Digest, Sha256};
use tracing::{info, warn};

use crate::error::RotationError;
use crate::rotation::{ensure_success, Endpoint, EndpointSet, RotationController};

type HmacSha256 = Hmac<Sha256>;

/// Base64 zip of the forwarder handler uploaded with each function.
const FUNCTION_BUNDLE: &str = "UEsDBBQAAAAIAA==";

pub struct AwsController {
    set: EndpointSet,
    region: String,
    access_key: String,
    secret_key: String,
    client: reqwest::Client,
}

impl AwsController {
    pub fn new(
        region: impl Into<String>,
        access_key: impl Into<String>,
        secret_key: impl Into<String>,
    ) -> Result<Self, RotationError> {
        Ok(Self {
            set: EndpointSet::new(),
            region: region.into(),
            access_key: access_key.into(),
            secret_key: secret_key.into(),
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .map_err(|e| RotationError::Transport(e.to_string()))?,
        })
    }

    fn host(&self) -> String {
        format!("lambda.{}.amazonaws.com", self.region)
    }

    async fn create_function(&self, name: &str) -> Result<(), RotationError> {
        let path = "/2015-03-31/functions".to_string();
        let payload = serde_json::to_vec(&json!({
            "FunctionName": name,
            "Runtime": "nodejs20.x",
            "Handler": "index.handler",
            "Role": "arn:aws:iam::role/edge-fn-role",
            "Code": { "ZipFile": FUNCTION_BUNDLE },
            "Timeout": 30,
            "MemorySize": 128,
            "Tags": { "rotation": "auto" },
        }))
        .map_err(|e| RotationError::Transport(e.to_string()))?;

        let resp = self.signed_post(&path, payload).await?;
        ensure_success(resp).await?;
        Ok(())
    }

    async fn create_function_url(&self, name: &str) -> Result<String, RotationError> {
        let path = format!("/2021-10-31/functions/{name}/url");
        let payload = serde_json::to_vec(&json!({
            "AuthType": "NONE",
            "InvokeMode": "RESPONSE_STREAM",
        }))
        .map_err(|e| RotationError::Transport(e.to_string()))?;

        let resp = self.signed_post(&path, payload).await?;
        let resp = ensure_success(resp).await?;

        #[derive(Deserialize)]
        struct CreateUrlResponse {
            #[serde(rename = "FunctionUrl")]
            function_url: String,
        }

        let body: CreateUrlResponse = resp.json().await?;
        Ok(body.function_url)
    }

    async fn delete_function(&self, name: &str) -> Result<(), RotationError> {
        let path = format!("/2015-03-31/functions/{name}");
        let url = format!("https://{}{}", self.host(), path);

        let mut req = self.client.delete(&url);
        for (header, value) in self.sign_request("DELETE", &path, b"") {
            req = req.header(header, value);
        }

        let resp = req.send().await?;
        ensure_success(resp).await?;
        Ok(())
    }

    async fn signed_post(
        &self,
        path: &str,
        payload: Vec<u8>,
    ) -> Result<reqwest::Response, RotationError> {
        let url = format!("https://{}{}", self.host(), path);

        let mut req = self
            .client
            .post(&url)
            .header("Content-Type", "application/json");
        for (header, value) in self.sign_request("POST", path, &payload) {
            req = req.header(header, value);
        }

        Ok(req.body(payload).send().await?)
    }

    /// AWS Signature V4 headers for a request against the Lambda service.
    fn sign_request(&self, method: &str, path: &str, payload: &[u8]) -> Vec<(String, String)> {
        let now = Utc::now();
        let date = now.format("%Y%m%d").to_string();
        let datetime = now.format("%Y%m%dT%H%M%SZ").to_string();
        let host = self.host();

        let payload_hash = hex::encode(Sha256::digest(payload));
        let canonical_headers = format!("host:{host}\nx-amz-date:{datetime}\n");
        let signed_headers = "host;x-amz-date";
        let canonical_request =
            format!("{method}\n{path}\n\n{canonical_headers}\n{signed_headers}\n{payload_hash}");

        let credential_scope = format!("{date}/{}/lambda/aws4_request", self.region);
        let string_to_sign = format!(
            "AWS4-HMAC-SHA256\n{datetime}\n{credential_scope}\n{}",
            hex::encode(Sha256::digest(canonical_request.as_bytes()))
        );

        let k_date = hmac_sha256(
            format!("AWS4{}", self.secret_key).as_bytes(),
            date.as_bytes(),
        );
        let k_region = hmac_sha256(&k_date, self.region.as_bytes());
        let k_service = hmac_sha256(&k_region, b"lambda");
        let k_signing = hmac_sha256(&k_service, b"aws4_request");
        let signature = hex::encode(hmac_sha256(&k_signing, string_to_sign.as_bytes()));

        let authorization = format!(
            "AWS4-HMAC-SHA256 Credential={}/{credential_scope}, SignedHeaders={signed_headers}, Signature={signature}",
            self.access_key
        );

        vec![
            ("x-amz-date".to_string(), datetime),
            ("authorization".to_string(), authorization),
        ]
    }
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    // HMAC-SHA256 accepts keys of any length.
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC key length");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

#[async_trait]
impl RotationController for AwsController {
    async fn rotate(&self) -> Result<Endpoint, RotationError> {
        let n = self.set.next_counter();
        let name = format!("edge-fn-{}-{}", Utc::now().timestamp(), n);

        info!(name = %name, region = %self.region, "deploying new function");
        self.create_function(&name).await?;

        let address = match self.create_function_url(&name).await {
            Ok(url) => url,
            Err(e) => {
                // Don't leave a half-created function behind.
                if let Err(cleanup) = self.delete_function(&name).await {
                    warn!(name = %name, error = %cleanup, "failed to clean up function after URL failure");
                }
                return Err(e);
            }
        };

        let now = Utc::now();
        let endpoint = Endpoint {
            id: name.clone(),
            address,
            region: self.region.clone(),
            provider: "aws".to_string(),
            created_at: now,
            expires_at: now + chrono::Duration::hours(1),
            metadata: HashMap::from([
                ("function_name".to_string(), name),
                ("type".to_string(), "lambda".to_string()),
            ]),
        };

        self.set.insert(endpoint.clone());
        info!(id = %endpoint.id, address = %endpoint.address, "function deployed");
        Ok(endpoint)
    }

    async fn retire(&self, endpoint: &Endpoint) -> Result<(), RotationError> {
        if endpoint.provider != "aws" {
            return if self.set.remove(&endpoint.id) {
                Ok(())
            } else {
                Err(RotationError::NotFound(endpoint.id.clone()))
            };
        }

        info!(name = %endpoint.id, "retiring function");
        let present = self.set.remove(&endpoint.id);

        match self.delete_function(&endpoint.id).await {
            Ok(()) => {}
            Err(e) if present => return Err(e),
            Err(e) => warn!(name = %endpoint.id, error = %e, "failed to delete function (may not exist)"),
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
        let ctrl = AwsController::new("us-east-1", "key", "secret").unwrap();
        assert_eq!(ctrl.region, "us-east-1");
        assert_eq!(ctrl.host(), "lambda.us-east-1.amazonaws.com");
    }

    #[test]
    fn sign_request_shape() {
        let ctrl = AwsController::new("us-east-1", "AKIDEXAMPLE", "secret").unwrap();
        let headers = ctrl.sign_request("POST", "/2015-03-31/functions", b"{}");

        assert_eq!(headers.len(), 2);
        assert_eq!(headers[0].0, "x-amz-date");
        let auth = &headers[1].1;
        assert!(auth.starts_with("AWS4-HMAC-SHA256 Credential=AKIDEXAMPLE/"));
        assert!(auth.contains("/us-east-1/lambda/aws4_request"));
        assert!(auth.contains("SignedHeaders=host;x-amz-date"));
        assert!(auth.contains("Signature="));
    }

    #[test]
    fn hmac_chain_is_deterministic() {
        let a = hmac_sha256(b"key", b"data");
        let b = hmac_sha256(b"key", b"data");
        assert_eq!(a, b);
        assert_eq!(a.len(), 32);
    }

    #[tokio::test]
    async fn retire_unknown_foreign_endpoint_is_not_found() {
        let ctrl = AwsController::new("us-east-1", "k", "s").unwrap();
        let ghost = Endpoint {
            id: "noop-9".into(),
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
