//! Cross-environment configuration release engine.
//!
//! Bundles the release crates behind feature flags so embedders can pull in
//! only the parts they need, e.g. the override resolver without the HTTP
//! stack.

#![warn(missing_docs, clippy::pedantic)]

/// Shared identifiers and object kinds.
pub use prd_primitives as primitives;

/// Release coordinator (enabled by `kernel` feature).
#[cfg(feature = "kernel")]
pub use prd_kernel as kernel;

/// Mapping tree and lookup table (enabled by `mapping` feature).
#[cfg(feature = "mapping")]
pub use prd_mapping as mapping;

/// Attribute override resolver (enabled by `overrides` feature).
#[cfg(feature = "overrides")]
pub use prd_override as overrides;

/// Object stores, sources and prompts (enabled by `adapters` feature).
#[cfg(feature = "adapters")]
pub use prd_adapters as adapters;

/// Credentials and release configuration (enabled by `config` feature).
#[cfg(feature = "config")]
pub use prd_config as config;

/// Tracing setup (enabled by `telemetry` feature).
#[cfg(feature = "telemetry")]
pub use prd_telemetry as telemetry;
