//! Configuration management for releases.
//!
//! [`ReleaseConfig`] is assembled once at start-up from the project's
//! `credentials.json`, command-line choices, and environment overrides, then
//! passed by reference to everything that needs it.

#![warn(missing_docs, clippy::pedantic)]

mod error;
pub mod loader;
pub mod schema;

pub use error::{ConfigError, ConfigResult};
pub use loader::{CREDENTIALS_FILENAME, load_credentials};
pub use schema::{Credentials, EnvironmentCredentials, Environments, ReleaseConfig};
