//! Compilation of the configuration models into the xray-core JSON document.
//!
//! The field names and array ordering below are a fixed contract with the
//! external runtime; tests assert structural properties of the output, so
//! schema drift here breaks the end-to-end system silently.

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::config::{ClientConfig, ServerConfig};
use crate::error::ConfigError;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineDocument {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log: Option<LogSettings>,
    pub inbounds: Vec<Inbound>,
    pub outbounds: Vec<Outbound>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LogSettings {
    pub loglevel: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Inbound {
    pub tag: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub listen: Option<String>,
    pub port: u16,
    pub protocol: String,
    pub settings: serde_json::Value,
    #[serde(rename = "streamSettings", skip_serializing_if = "Option::is_none")]
    pub stream: Option<StreamSettings>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Outbound {
    pub tag: String,
    pub protocol: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub settings: Option<serde_json::Value>,
    #[serde(rename = "streamSettings", skip_serializing_if = "Option::is_none")]
    pub stream: Option<StreamSettings>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamSettings {
    pub network: String,
    pub security: String,
    #[serde(rename = "realitySettings", skip_serializing_if = "Option::is_none")]
    pub reality: Option<RealitySettings>,
    #[serde(rename = "tlsSettings", skip_serializing_if = "Option::is_none")]
    pub tls: Option<TlsSettings>,
    #[serde(rename = "wsSettings", skip_serializing_if = "Option::is_none")]
    pub ws: Option<WsSettings>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RealitySettings {
    pub show: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dest: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub xver: Option<u32>,
    #[serde(rename = "serverNames", skip_serializing_if = "Vec::is_empty")]
    pub server_names: Vec<String>,
    #[serde(rename = "privateKey", skip_serializing_if = "Option::is_none")]
    pub private_key: Option<String>,
    #[serde(rename = "shortIds", skip_serializing_if = "Vec::is_empty")]
    pub short_ids: Vec<String>,
    // Client-side fields
    #[serde(rename = "serverName", skip_serializing_if = "Option::is_none")]
    pub server_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<String>,
    #[serde(rename = "publicKey", skip_serializing_if = "Option::is_none")]
    pub public_key: Option<String>,
    #[serde(rename = "shortId", skip_serializing_if = "Option::is_none")]
    pub short_id: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TlsSettings {
    #[serde(rename = "serverName", skip_serializing_if = "Option::is_none")]
    pub server_name: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WsSettings {
    pub path: String,
}

/// Compile a validated server configuration into the runtime JSON document.
pub fn build_server_config(cfg: &ServerConfig) -> Result<Vec<u8>, ConfigError> {
    let (host, port) = split_host_port(&cfg.listen)?;

    let mut short_ids = cfg.reality.short_ids.clone();
    if short_ids.is_empty() {
        short_ids.push(String::new());
    }

    let primary_settings = json!({
        "clients": [{
            "id": cfg.uuid,
            "flow": "xtls-rprx-vision",
        }],
        "decryption": "none",
    });

    let mut inbounds = vec![Inbound {
        tag: "vless-reality".to_string(),
        listen: Some(host),
        port,
        protocol: cfg.protocol.clone(),
        settings: primary_settings,
        stream: Some(StreamSettings {
            network: "tcp".to_string(),
            security: "reality".to_string(),
            reality: Some(RealitySettings {
                show: false,
                dest: Some(format!("{}:443", cfg.reality.sni)),
                server_names: vec![cfg.reality.sni.clone()],
                private_key: Some(cfg.reality.private_key.clone()),
                short_ids,
                ..Default::default()
            }),
            ..Default::default()
        }),
    }];

    for (i, fb) in cfg.fallbacks.iter().enumerate() {
        let (fb_host, fb_port) = split_host_port(&fb.listen)?;

        let mut inbound = Inbound {
            tag: format!("fallback-{}-{}", fb.protocol, i),
            listen: Some(fb_host),
            port: fb_port,
            protocol: fb.protocol.clone(),
            settings: json!({}),
            stream: None,
        };

        if fb.transport == "ws" {
            inbound.stream = Some(StreamSettings {
                network: "ws".to_string(),
                security: "tls".to_string(),
                ws: Some(WsSettings {
                    path: fb.path.clone(),
                }),
                ..Default::default()
            });
        }

        inbounds.push(inbound);
    }

    let doc = EngineDocument {
        log: Some(LogSettings {
            loglevel: coalesce(&cfg.log_level, "info"),
        }),
        inbounds,
        outbounds: vec![
            Outbound {
                tag: "direct".to_string(),
                protocol: "freedom".to_string(),
                ..Default::default()
            },
            Outbound {
                tag: "block".to_string(),
                protocol: "blackhole".to_string(),
                ..Default::default()
            },
        ],
    };

    Ok(serde_json::to_vec(&doc)?)
}

/// Compile a validated client configuration into the runtime JSON document.
pub fn build_client_config(cfg: &ClientConfig) -> Result<Vec<u8>, ConfigError> {
    let (local_host, local_port) = split_host_port(&cfg.local_listen)?;
    let (server_host, server_port) = parse_server_addr(&cfg.server);

    let fingerprint = if cfg.fingerprint.is_empty() {
        "chrome".to_string()
    } else {
        cfg.fingerprint.clone()
    };

    let outbound_settings = json!({
        "vnext": [{
            "address": server_host,
            "port": server_port,
            "users": [{
                "id": cfg.uuid,
                "encryption": "none",
                "flow": "xtls-rprx-vision",
            }],
        }],
    });

    let mut inbounds = vec![Inbound {
        tag: "socks-in".to_string(),
        listen: Some(local_host),
        port: local_port,
        protocol: "socks".to_string(),
        settings: json!({ "udp": true }),
        stream: None,
    }];

    // HTTP inbound alongside SOCKS when configured and parseable
    if !cfg.http_listen.is_empty() {
        if let Ok((http_host, http_port)) = split_host_port(&cfg.http_listen) {
            inbounds.push(Inbound {
                tag: "http-in".to_string(),
                listen: Some(http_host),
                port: http_port,
                protocol: "http".to_string(),
                settings: json!({ "allowTransparent": false }),
                stream: None,
            });
        }
    }

    let doc = EngineDocument {
        log: Some(LogSettings {
            loglevel: coalesce(&cfg.log_level, "info"),
        }),
        inbounds,
        outbounds: vec![
            Outbound {
                tag: "proxy".to_string(),
                protocol: "vless".to_string(),
                settings: Some(outbound_settings),
                stream: Some(StreamSettings {
                    network: "tcp".to_string(),
                    security: "reality".to_string(),
                    reality: Some(RealitySettings {
                        show: false,
                        server_name: Some(cfg.sni.clone()),
                        fingerprint: Some(fingerprint),
                        public_key: Some(cfg.public_key.clone()),
                        short_id: non_empty(&cfg.short_id),
                        ..Default::default()
                    }),
                    ..Default::default()
                }),
            },
            Outbound {
                tag: "direct".to_string(),
                protocol: "freedom".to_string(),
                ..Default::default()
            },
        ],
    };

    Ok(serde_json::to_vec(&doc)?)
}

/// Split "host:port" into its parts; ":port" expands the host to 0.0.0.0.
pub fn split_host_port(addr: &str) -> Result<(String, u16), ConfigError> {
    if addr.is_empty() {
        return Err(ConfigError::BadAddress(addr.to_string()));
    }

    if let Some(port) = addr.strip_prefix(':') {
        let port = port
            .parse::<u16>()
            .map_err(|_| ConfigError::BadAddress(addr.to_string()))?;
        return Ok(("0.0.0.0".to_string(), port));
    }

    let idx = addr
        .rfind(':')
        .ok_or_else(|| ConfigError::BadAddress(addr.to_string()))?;
    let port = addr[idx + 1..]
        .parse::<u16>()
        .map_err(|_| ConfigError::BadAddress(addr.to_string()))?;

    Ok((addr[..idx].to_string(), port))
}

/// Split a remote server address; a bare host or bad port implies 443.
pub fn parse_server_addr(addr: &str) -> (String, u16) {
    match addr.rfind(':') {
        Some(idx) => match addr[idx + 1..].parse::<u16>() {
            Ok(port) => (addr[..idx].to_string(), port),
            Err(_) => (addr.to_string(), 443),
        },
        None => (addr.to_string(), 443),
    }
}

fn coalesce(value: &str, fallback: &str) -> String {
    if value.is_empty() {
        fallback.to_string()
    } else {
        value.to_string()
    }
}

fn non_empty(value: &str) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{FallbackConfig, RealityConfig};

    #[test]
    fn build_server_config_structure() {
        let cfg = ServerConfig {
            listen: ":443".into(),
            protocol: "vless".into(),
            uuid: "test-uuid-1234".into(),
            reality: RealityConfig {
                sni: "www.google.com".into(),
                private_key: "test-private-key".into(),
                short_ids: vec!["abcd1234".into()],
                ..Default::default()
            },
            fingerprint: "chrome".into(),
            fallbacks: vec![FallbackConfig {
                protocol: "trojan".into(),
                listen: ":8443".into(),
                transport: "ws".into(),
                path: "/ws".into(),
            }],
            ..Default::default()
        };

        let bytes = build_server_config(&cfg).unwrap();
        let parsed: EngineDocument = serde_json::from_slice(&bytes).unwrap();

        assert_eq!(parsed.inbounds.len(), 2);
        assert_eq!(parsed.outbounds.len(), 2);
        assert_eq!(parsed.inbounds[0].protocol, "vless");
        assert_eq!(parsed.inbounds[0].port, 443);
        assert_eq!(parsed.inbounds[0].listen.as_deref(), Some("0.0.0.0"));

        let stream = parsed.inbounds[0].stream.as_ref().unwrap();
        assert_eq!(stream.security, "reality");
        let reality = stream.reality.as_ref().unwrap();
        assert_eq!(reality.short_ids, vec!["abcd1234"]);

        assert_eq!(parsed.outbounds[0].tag, "direct");
        assert_eq!(parsed.outbounds[0].protocol, "freedom");
        assert_eq!(parsed.outbounds[1].tag, "block");
        assert_eq!(parsed.outbounds[1].protocol, "blackhole");
    }

    #[test]
    fn build_server_config_defaults_short_ids() {
        let cfg = ServerConfig {
            listen: ":443".into(),
            protocol: "vless".into(),
            uuid: "u".into(),
            reality: RealityConfig {
                sni: "g.com".into(),
                private_key: "k".into(),
                ..Default::default()
            },
            ..Default::default()
        };

        let bytes = build_server_config(&cfg).unwrap();
        let parsed: EngineDocument = serde_json::from_slice(&bytes).unwrap();
        let reality = parsed.inbounds[0]
            .stream
            .as_ref()
            .unwrap()
            .reality
            .as_ref()
            .unwrap();
        assert_eq!(reality.short_ids, vec![String::new()]);
    }

    #[test]
    fn build_server_config_fallback_tags() {
        let cfg = ServerConfig {
            listen: ":443".into(),
            protocol: "vless".into(),
            uuid: "u".into(),
            reality: RealityConfig {
                sni: "g.com".into(),
                private_key: "k".into(),
                ..Default::default()
            },
            fallbacks: vec![
                FallbackConfig {
                    protocol: "trojan".into(),
                    listen: ":8443".into(),
                    transport: "ws".into(),
                    path: "/ws".into(),
                },
                FallbackConfig {
                    protocol: "trojan".into(),
                    listen: ":8444".into(),
                    ..Default::default()
                },
            ],
            ..Default::default()
        };

        let bytes = build_server_config(&cfg).unwrap();
        let parsed: EngineDocument = serde_json::from_slice(&bytes).unwrap();

        assert_eq!(parsed.inbounds[1].tag, "fallback-trojan-0");
        assert!(parsed.inbounds[1].stream.as_ref().unwrap().ws.is_some());
        assert_eq!(parsed.inbounds[2].tag, "fallback-trojan-1");
        assert!(parsed.inbounds[2].stream.is_none());
    }

    #[test]
    fn build_server_config_rejects_bad_listen() {
        let cfg = ServerConfig {
            listen: "noport".into(),
            uuid: "u".into(),
            reality: RealityConfig {
                sni: "g.com".into(),
                private_key: "k".into(),
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(matches!(
            build_server_config(&cfg),
            Err(ConfigError::BadAddress(_))
        ));
    }

    fn client_config() -> ClientConfig {
        ClientConfig {
            server: "1.2.3.4:443".into(),
            uuid: "test-uuid".into(),
            sni: "www.google.com".into(),
            fingerprint: "chrome".into(),
            public_key: "test-pubkey".into(),
            short_id: "abcd".into(),
            local_listen: "127.0.0.1:1080".into(),
            ..Default::default()
        }
    }

    #[test]
    fn build_client_config_structure() {
        let bytes = build_client_config(&client_config()).unwrap();
        let parsed: EngineDocument = serde_json::from_slice(&bytes).unwrap();

        assert_eq!(parsed.inbounds.len(), 1);
        assert_eq!(parsed.inbounds[0].protocol, "socks");
        assert_eq!(parsed.outbounds.len(), 2);
        assert_eq!(parsed.outbounds[0].protocol, "vless");

        let reality = parsed.outbounds[0]
            .stream
            .as_ref()
            .unwrap()
            .reality
            .as_ref()
            .unwrap();
        assert_eq!(reality.fingerprint.as_deref(), Some("chrome"));
        assert_eq!(reality.short_id.as_deref(), Some("abcd"));
        assert_eq!(reality.server_name.as_deref(), Some("www.google.com"));
    }

    #[test]
    fn build_client_config_with_http_listen() {
        let mut cfg = client_config();
        cfg.http_listen = "127.0.0.1:8080".into();

        let bytes = build_client_config(&cfg).unwrap();
        let parsed: EngineDocument = serde_json::from_slice(&bytes).unwrap();

        assert_eq!(parsed.inbounds.len(), 2);
        assert_eq!(parsed.inbounds[1].tag, "http-in");
        assert_eq!(parsed.inbounds[1].protocol, "http");
    }

    #[test]
    fn build_client_config_skips_unparseable_http_listen() {
        let mut cfg = client_config();
        cfg.http_listen = "bogus".into();

        let bytes = build_client_config(&cfg).unwrap();
        let parsed: EngineDocument = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(parsed.inbounds.len(), 1);
    }

    #[test]
    fn split_host_port_table() {
        assert_eq!(
            split_host_port(":443").unwrap(),
            ("0.0.0.0".to_string(), 443)
        );
        assert_eq!(
            split_host_port(":8080").unwrap(),
            ("0.0.0.0".to_string(), 8080)
        );
        assert_eq!(
            split_host_port("127.0.0.1:1080").unwrap(),
            ("127.0.0.1".to_string(), 1080)
        );
        assert!(split_host_port("").is_err());
        assert!(split_host_port("noport").is_err());
        assert!(split_host_port("host:notaport").is_err());
    }

    #[test]
    fn parse_server_addr_defaults_port() {
        assert_eq!(
            parse_server_addr("example.com"),
            ("example.com".to_string(), 443)
        );
        assert_eq!(
            parse_server_addr("example.com:8443"),
            ("example.com".to_string(), 8443)
        );
    }
}
