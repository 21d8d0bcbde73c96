//! Release coordination between a source and a target environment.
//!
//! A [`Release`] walks the phases in [`Phase`] order: attribute overrides are
//! dry-run first, then the organization, schemas, hooks (created with empty
//! predecessor lists, then re-linked), workspaces, queues with their inboxes,
//! and finally the overrides themselves. Each phase fans out one unit per
//! object through the [`TaskScheduler`] and waits for all of them before the
//! next phase starts.

#![warn(missing_docs, clippy::pedantic)]

mod error;
mod graph;
mod orchestrator;
mod overrides;
mod phase;
mod report;
mod scheduler;
mod state;
mod units;
mod validate;

pub use error::{ReleaseError, ReleaseResult};
pub use orchestrator::Release;
pub use phase::{Phase, PhaseError, PhaseEvent, PhaseMachine};
pub use report::{PlaceholderHook, ReleaseReport, UnitFailure};
pub use scheduler::{SchedulerConfig, SchedulerError, SchedulerResult, TaskScheduler};
pub use state::{PairTable, SourceCache};
