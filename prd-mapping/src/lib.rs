//! Mapping between source objects and their target counterparts.
//!
//! The [`Mapping`] tree is the only persisted state of a release. It is loaded
//! through a [`MappingStore`], mutated by the release coordinator as targets are
//! created, and written back once the release phases have finished. The
//! [`LookupTable`] is a flat projection of it rebuilt on demand.

#![warn(missing_docs, clippy::pedantic)]

mod error;
mod lookup;
mod node;
pub mod store;
mod traverse;

pub use error::{MappingError, MappingResult};
pub use lookup::LookupTable;
pub use node::{Mapping, MappingNode, find, find_mut};
pub use store::{MappingStore, MemoryMappingStore, YamlMappingFile};
pub use traverse::{NodeRef, Traverse};
