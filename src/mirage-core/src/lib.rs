//! # Mirage Core
//!
//! Camouflaged tunnel engine with multi-cloud endpoint rotation.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                    Engine Supervisor                     │
//! │  ┌────────────┐   ┌───────────────┐   ┌──────────────┐  │
//! │  │ Config     │──▶│ JSON Compiler │──▶│ Backend      │  │
//! │  │ Model      │   │ (xray schema) │   │ Loader       │  │
//! │  └────────────┘   └───────────────┘   └──────┬───────┘  │
//! │                                              │          │
//! │                 stopped → starting → running │          │
//! └──────────────────────────────────────────────┼──────────┘
//!                                                │
//! ┌──────────────────────────────┐   ┌───────────▼──────────┐
//! │     Rotation Controller      │   │   Engine Instance    │
//! │  noop / cloudflare / aws     │   │ (stub or xray child) │
//! │  ┌────────────────────────┐  │   └──────────────────────┘
//! │  │     Health Monitor     │  │
//! │  │ 3 strikes → replace    │  │   ┌──────────────────────┐
//! │  └────────────────────────┘  │   │   Control Surface    │
//! └──────────────────────────────┘   │  (local HTTP, JSON)  │
//!                                    └──────────────────────┘
//! ```
//!
//! The compiled JSON document is a byte-level contract with the external
//! runtime; the compiler and its tests treat field names and array ordering
//! as fixed.

/// Local control surface for the desktop shell
pub mod api;
/// Browser fingerprint selection for the outer handshake
pub mod camouflage;
/// Server and client configuration models
pub mod config;
/// Engine lifecycle supervision
pub mod engine;
/// Error types shared across the crate
pub mod error;
/// Backend loaders (validating stub and process runner)
pub mod loader;
/// Dynamic endpoint rotation and health monitoring
pub mod rotation;
/// Compilation into the engine's JSON wire format
pub mod xray_config;
