//! Observability utilities for release runs.

#![warn(missing_docs, clippy::pedantic)]

pub mod tracing_support;

pub use tracing_support::{TelemetryError, default_directives, init_tracing, release_span};
