//! Release phase state machine.

use std::fmt;

use prd_primitives::RunId;
use serde::Serialize;
use thiserror::Error;
use tracing::debug;

/// Phases of a release, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Override dry run against the pre-release mapping.
    Validating,
    /// Organization attribute update.
    Organization,
    /// Schema fan-out.
    Schemas,
    /// Hook fan-out with predecessor lists cleared.
    Hooks,
    /// Predecessor lists re-linked to target hooks.
    HookGraph,
    /// Workspace fan-out.
    Workspaces,
    /// Queue fan-out, each queue followed by its inbox.
    Queues,
    /// Attribute overrides pushed to released objects.
    Overrides,
    /// Release complete.
    Finished,
    /// Release stopped by a fatal error.
    Aborted,
}

impl Phase {
    /// Returns `true` once no further phase will run.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Finished | Self::Aborted)
    }

    const fn successor(self) -> Option<Self> {
        match self {
            Self::Validating => Some(Self::Organization),
            Self::Organization => Some(Self::Schemas),
            Self::Schemas => Some(Self::Hooks),
            Self::Hooks => Some(Self::HookGraph),
            Self::HookGraph => Some(Self::Workspaces),
            Self::Workspaces => Some(Self::Queues),
            Self::Queues => Some(Self::Overrides),
            Self::Overrides => Some(Self::Finished),
            Self::Finished | Self::Aborted => None,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Validating => "validating",
            Self::Organization => "organization",
            Self::Schemas => "schemas",
            Self::Hooks => "hooks",
            Self::HookGraph => "hook_graph",
            Self::Workspaces => "workspaces",
            Self::Queues => "queues",
            Self::Overrides => "overrides",
            Self::Finished => "finished",
            Self::Aborted => "aborted",
        })
    }
}

/// Events that move the release between phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseEvent {
    /// Current phase reached its barrier; continue with the next one.
    Advance,
    /// Dry run: finish right after validation.
    Stop,
    /// Fatal error: abandon the release.
    Abort,
}

/// Phase controller of one release.
#[derive(Debug, Clone, Copy)]
pub struct PhaseMachine {
    run_id: RunId,
    phase: Phase,
}

impl PhaseMachine {
    /// Starts in [`Phase::Validating`].
    #[must_use]
    pub const fn new(run_id: RunId) -> Self {
        Self {
            run_id,
            phase: Phase::Validating,
        }
    }

    /// Returns the current phase.
    #[must_use]
    pub const fn phase(&self) -> Phase {
        self.phase
    }

    /// Applies an event, returning the resulting phase.
    ///
    /// # Errors
    ///
    /// Returns [`PhaseError::InvalidTransition`] when the event is not allowed
    /// from the current phase.
    pub fn transition(&mut self, event: PhaseEvent) -> Result<Phase, PhaseError> {
        let next = match (self.phase, event) {
            (phase, PhaseEvent::Advance) => phase.successor(),
            (Phase::Validating, PhaseEvent::Stop) => Some(Phase::Finished),
            (phase, PhaseEvent::Abort) if !phase.is_terminal() => Some(Phase::Aborted),
            _ => None,
        };

        let Some(next) = next else {
            return Err(PhaseError::InvalidTransition {
                from: self.phase,
                event,
            });
        };

        debug!(run_id = %self.run_id, from = %self.phase, to = %next, ?event, "release phase transition");
        self.phase = next;
        Ok(next)
    }
}

/// Errors emitted by the phase controller.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PhaseError {
    /// Transition was not permitted from the current phase.
    #[error("invalid phase transition from {from} via {event:?}")]
    InvalidTransition {
        /// Phase prior to the attempted transition.
        from: Phase,
        /// Event that triggered the failure.
        event: PhaseEvent,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn advances_through_every_phase_in_order() {
        let mut machine = PhaseMachine::new(RunId::random());
        let mut seen = vec![machine.phase()];
        while !machine.phase().is_terminal() {
            seen.push(machine.transition(PhaseEvent::Advance).unwrap());
        }
        assert_eq!(
            seen,
            [
                Phase::Validating,
                Phase::Organization,
                Phase::Schemas,
                Phase::Hooks,
                Phase::HookGraph,
                Phase::Workspaces,
                Phase::Queues,
                Phase::Overrides,
                Phase::Finished,
            ]
        );
        assert!(machine.transition(PhaseEvent::Advance).is_err());
    }

    #[test]
    fn stop_only_after_validation() {
        let mut machine = PhaseMachine::new(RunId::random());
        assert_eq!(machine.transition(PhaseEvent::Stop).unwrap(), Phase::Finished);

        let mut machine = PhaseMachine::new(RunId::random());
        machine.transition(PhaseEvent::Advance).unwrap();
        let err = machine.transition(PhaseEvent::Stop).unwrap_err();
        assert_eq!(
            err,
            PhaseError::InvalidTransition {
                from: Phase::Organization,
                event: PhaseEvent::Stop
            }
        );
    }

    #[test]
    fn abort_from_any_running_phase() {
        let mut machine = PhaseMachine::new(RunId::random());
        machine.transition(PhaseEvent::Advance).unwrap();
        machine.transition(PhaseEvent::Advance).unwrap();
        assert_eq!(machine.transition(PhaseEvent::Abort).unwrap(), Phase::Aborted);
        assert!(machine.transition(PhaseEvent::Abort).is_err());
    }
}
