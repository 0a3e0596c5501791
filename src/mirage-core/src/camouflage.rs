//! Browser fingerprint selection for the outer TLS handshake.
//!
//! Friendly names map to uTLS ClientHello identifiers. The random picker is
//! weighted toward common browsers so a rotated fingerprint stays plausible.

use rand::seq::SliceRandom;

use crate::error::ConfigError;

/// Supported fingerprint names and their uTLS ClientHello identifiers.
pub const SUPPORTED_FINGERPRINTS: &[(&str, &str)] = &[
    ("chrome", "HelloChrome_Auto"),
    ("chrome-120", "HelloChrome_120"),
    ("chrome-115", "HelloChrome_115"),
    ("firefox", "HelloFirefox_Auto"),
    ("firefox-121", "HelloFirefox_121"),
    ("firefox-120", "HelloFirefox_120"),
    ("safari", "HelloSafari_Auto"),
    ("edge", "HelloEdge_Auto"),
    ("ios", "HelloIOS_Auto"),
    ("android", "HelloAndroid_11_OkHttp"),
    ("random", "HelloRandomized"),
    ("randomized", "HelloRandomizedALPN"),
];

/// Resolve a friendly fingerprint name to its uTLS identifier.
pub fn select_fingerprint(name: &str) -> Result<&'static str, ConfigError> {
    SUPPORTED_FINGERPRINTS
        .iter()
        .find(|(friendly, _)| *friendly == name)
        .map(|(_, id)| *id)
        .ok_or_else(|| ConfigError::Unsupported {
            field: "fingerprint",
            value: name.to_string(),
        })
}

/// All supported fingerprint names.
pub fn list_fingerprints() -> Vec<&'static str> {
    SUPPORTED_FINGERPRINTS
        .iter()
        .map(|(friendly, _)| *friendly)
        .collect()
}

/// Pick a random plausible fingerprint for moving-target defense.
pub fn random_fingerprint() -> &'static str {
    // Weighted toward Chrome, which dominates observed traffic.
    const WEIGHTED: &[&str] = &[
        "chrome",
        "chrome",
        "chrome",
        "chrome",
        "firefox",
        "firefox",
        "edge",
        "safari",
        "chrome-120",
        "firefox-121",
    ];

    WEIGHTED
        .choose(&mut rand::thread_rng())
        .copied()
        .unwrap_or("chrome")
}
