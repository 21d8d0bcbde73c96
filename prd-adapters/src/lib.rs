//! Collaborators of the release engine that talk to the outside world.
//!
//! - [`store`] defines the remote [`ObjectStore`](store::ObjectStore) contract,
//!   implemented over HTTPS in [`http`] and in process in [`memory`].
//! - [`source`] reads the downloaded source environment.
//! - [`prompt`] asks the operator for values the release cannot infer.

#![warn(missing_docs, clippy::pedantic)]

pub mod http;
pub mod memory;
pub mod prompt;
pub mod source;
pub mod store;

mod http_client;
