//! Server and client configuration models.
//!
//! Both models deserialize from YAML files whose keys mirror the struct
//! fields. `validate` applies defaults in place and rejects incomplete
//! configurations before the engine compiles them.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Protocols the primary inbound/outbound may carry.
pub const SUPPORTED_PROTOCOLS: &[&str] = &["vless", "trojan"];

/// Server-side tunnel configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub listen: String,
    pub protocol: String,
    pub uuid: String,
    pub reality: RealityConfig,
    pub fingerprint: String,
    pub fallbacks: Vec<FallbackConfig>,
    pub log_level: String,

    /// Rotation settings (optional).
    pub rotation: RotationConfig,
}

/// XTLS-Reality handshake settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RealityConfig {
    pub sni: String,
    pub private_key: String,
    pub public_key: String,
    pub short_ids: Vec<String>,
}

/// A secondary protocol listener behind the primary inbound.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FallbackConfig {
    pub protocol: String,
    pub listen: String,
    pub transport: String,
    pub path: String,
}

/// Dynamic endpoint rotation settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RotationConfig {
    pub enabled: bool,
    /// "cloudflare", "aws", or "noop"
    pub provider: String,
    /// Cadence between rotations, e.g. "30m"
    pub interval: String,
    pub cf_api_token: String,
    pub cf_account_id: String,
    pub cf_zone_id: String,
    /// Stable DNS name kept pointed at the newest worker
    pub cf_dns_record: Option<String>,
    pub aws_region: String,
    pub aws_access_key: String,
    pub aws_secret_key: String,
}

impl RotationConfig {
    /// Parse the configured interval, defaulting to 30 minutes when unset.
    pub fn interval_duration(&self) -> Result<Duration, ConfigError> {
        if self.interval.is_empty() {
            return Ok(Duration::from_secs(30 * 60));
        }
        parse_interval(&self.interval)
    }
}

impl ServerConfig {
    /// Check required fields and apply defaults in place.
    pub fn validate(&mut self) -> Result<(), ConfigError> {
        if self.listen.is_empty() {
            return Err(ConfigError::MissingField("listen"));
        }
        if self.protocol.is_empty() {
            self.protocol = "vless".to_string();
        }
        if self.uuid.is_empty() {
            return Err(ConfigError::MissingField("uuid"));
        }
        if self.reality.sni.is_empty() {
            return Err(ConfigError::MissingField("reality.sni"));
        }
        if self.reality.private_key.is_empty() {
            return Err(ConfigError::MissingField("reality.private_key"));
        }
        if self.fingerprint.is_empty() {
            self.fingerprint = "chrome".to_string();
        }

        if !SUPPORTED_PROTOCOLS.contains(&self.protocol.as_str()) {
            return Err(ConfigError::Unsupported {
                field: "protocol",
                value: self.protocol.clone(),
            });
        }

        Ok(())
    }
}

/// Client-side tunnel configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Remote server address; a bare host implies port 443.
    pub server: String,
    pub uuid: String,
    pub sni: String,
    pub fingerprint: String,
    pub public_key: String,
    pub short_id: String,
    pub local_listen: String,
    pub http_listen: String,
    pub log_level: String,

    /// Low-latency streaming mode with extra cover noise.
    pub sports_mode: bool,

    /// Local control-surface address for the desktop shell.
    pub api_listen: String,
}

impl ClientConfig {
    /// Check required fields and apply defaults in place.
    pub fn validate(&mut self) -> Result<(), ConfigError> {
        if self.server.is_empty() {
            return Err(ConfigError::MissingField("server"));
        }
        if self.uuid.is_empty() {
            return Err(ConfigError::MissingField("uuid"));
        }
        if self.sni.is_empty() {
            return Err(ConfigError::MissingField("sni"));
        }
        if self.public_key.is_empty() {
            return Err(ConfigError::MissingField("public_key"));
        }
        if self.local_listen.is_empty() {
            self.local_listen = "127.0.0.1:1080".to_string();
        }
        if self.fingerprint.is_empty() {
            self.fingerprint = "chrome".to_string();
        }
        if self.api_listen.is_empty() {
            self.api_listen = "127.0.0.1:9876".to_string();
        }
        Ok(())
    }
}

/// Read and parse a server configuration file.
pub fn load_config(path: &Path) -> Result<ServerConfig, ConfigError> {
    let data = std::fs::read_to_string(path)?;
    Ok(serde_yaml::from_str(&data)?)
}

/// Read and parse a client configuration file.
pub fn load_client_config(path: &Path) -> Result<ClientConfig, ConfigError> {
    let data = std::fs::read_to_string(path)?;
    Ok(serde_yaml::from_str(&data)?)
}

/// Parse durations of the form "30m", "1h30m", "45s", "250ms", "2d".
pub fn parse_interval(s: &str) -> Result<Duration, ConfigError> {
    let bad = || ConfigError::Parse(format!("invalid duration {s:?}"));

    if s.is_empty() {
        return Err(bad());
    }

    let mut total = Duration::ZERO;
    let mut chars = s.chars().peekable();
    while chars.peek().is_some() {
        let mut number = String::new();
        while let Some(c) = chars.peek() {
            if c.is_ascii_digit() {
                number.push(*c);
                chars.next();
            } else {
                break;
            }
        }
        let value: u64 = number.parse().map_err(|_| bad())?;

        let mut unit = String::new();
        while let Some(c) = chars.peek() {
            if c.is_ascii_alphabetic() {
                unit.push(*c);
                chars.next();
            } else {
                break;
            }
        }
        total += match unit.as_str() {
            "ms" => Duration::from_millis(value),
            "s" => Duration::from_secs(value),
            "m" => Duration::from_secs(value * 60),
            "h" => Duration::from_secs(value * 60 * 60),
            "d" => Duration::from_secs(value * 24 * 60 * 60),
            _ => return Err(bad()),
        };
    }

    Ok(total)
}
