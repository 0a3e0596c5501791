//! Error types shared across the engine, configuration, and rotation layers.

use thiserror::Error;

use crate::engine::EngineState;

/// Error type for configuration validation and compilation.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required field is absent or empty
    #[error("missing required field: {0}")]
    MissingField(&'static str),

    /// A field carries a value outside its allowed set
    #[error("unsupported value for {field}: {value:?}")]
    Unsupported { field: &'static str, value: String },

    /// An address could not be split into host and port
    #[error("invalid address {0:?}")]
    BadAddress(String),

    /// Reading the configuration file failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The configuration document could not be parsed
    #[error("parse error: {0}")]
    Parse(String),
}

impl From<serde_yaml::Error> for ConfigError {
    fn from(e: serde_yaml::Error) -> Self {
        ConfigError::Parse(e.to_string())
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(e: serde_json::Error) -> Self {
        ConfigError::Parse(e.to_string())
    }
}

/// Error type for engine lifecycle operations.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Configuration rejected during validation or compilation
    #[error("invalid configuration: {0}")]
    InvalidConfig(#[from] ConfigError),

    /// The backend loader rejected the compiled document
    #[error("failed to load engine config: {0}")]
    Load(String),

    /// The backend instance failed to start
    #[error("failed to start engine instance: {0}")]
    InstanceStart(String),

    /// Start called while the engine is already running
    #[error("engine is already running")]
    AlreadyRunning,

    /// Stop called while the engine is not running
    #[error("engine is not running (status: {0})")]
    NotRunning(EngineState),
}

/// Error type for endpoint rotation and provider calls.
#[derive(Debug, Error)]
pub enum RotationError {
    /// The cloud provider API answered with HTTP >= 400
    #[error("provider API error {status}: {message}")]
    Provider { status: u16, message: String },

    /// The provider call failed below HTTP (DNS, TLS, connect)
    #[error("provider request failed: {0}")]
    Transport(String),

    /// Retire called on an endpoint absent from the active list
    #[error("endpoint {0} not found")]
    NotFound(String),

    /// A probe or provider call exceeded its deadline
    #[error("operation timed out")]
    Timeout,

    /// The surrounding task was stopped mid-operation
    #[error("operation cancelled")]
    Cancelled,
}

impl From<reqwest::Error> for RotationError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            RotationError::Timeout
        } else {
            RotationError::Transport(e.to_string())
        }
    }
}
