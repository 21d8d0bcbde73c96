//! Attribute override rules for released objects.
//!
//! A mapping node may carry an `attribute_override` table of dotted field
//! paths to values. Each value is parsed once into an [`OverrideExpr`]: a
//! literal, a `$source_value` reference back into the source payload, or a
//! `$prd_ref:<id>.<path>` cross-reference into another object's target
//! record. [`resolve`] evaluates a whole table against one source object.

#![warn(missing_docs, clippy::pedantic)]

pub mod error;
pub mod expr;
pub mod path;
pub mod resolve;
pub mod table;

pub use error::{OverrideError, OverrideResult};
pub use expr::{OverrideExpr, SOURCE_VALUE_KEYWORD, TARGET_REFERENCE_KEYWORD};
pub use path::{FieldPath, Segment};
pub use resolve::{ResolveMode, TargetLookup, TargetRecords, resolve, select_root_keys};
pub use table::{AttributeOverride, OverrideRule};
