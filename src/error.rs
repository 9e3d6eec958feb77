//! Error types for chain construction and execution, and for state
//! machine dispatch.

use std::fmt;

use thiserror::Error;

use crate::machine::{EventName, StateName};
use crate::step::StepName;

/// Failure payload produced by a step body.
///
/// Step bodies report failures by returning this type; it wraps any
/// error the body wants to surface, plus a convenience constructor for
/// plain messages.
///
/// # Examples
///
/// ```
/// use asynchro::StepError;
///
/// let err = StepError::msg("upstream returned 503");
/// assert_eq!(err.to_string(), "upstream returned 503");
///
/// let err = StepError::new(std::io::Error::other("socket closed"));
/// assert_eq!(err.to_string(), "socket closed");
/// ```
#[derive(Debug)]
pub struct StepError(Box<dyn std::error::Error + Send + Sync>);

impl StepError {
    /// Wraps an existing error as a step failure.
    pub fn new<E>(source: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self(source.into())
    }

    /// Creates a step failure from a plain message.
    pub fn msg(message: impl fmt::Display) -> Self {
        Self(message.to_string().into())
    }
}

impl fmt::Display for StepError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for StepError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        let source: &(dyn std::error::Error + 'static) = self.0.as_ref();
        Some(source)
    }
}

/// Failure payload produced by an entry, exit, or transition action.
///
/// The state-engine counterpart of [`StepError`].
#[derive(Debug)]
pub struct ActionError(Box<dyn std::error::Error + Send + Sync>);

impl ActionError {
    /// Wraps an existing error as an action failure.
    pub fn new<E>(source: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self(source.into())
    }

    /// Creates an action failure from a plain message.
    pub fn msg(message: impl fmt::Display) -> Self {
        Self(message.to_string().into())
    }
}

impl fmt::Display for ActionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for ActionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        let source: &(dyn std::error::Error + 'static) = self.0.as_ref();
        Some(source)
    }
}

/// Errors detected while building a definition.
///
/// A builder that reports any of these never produces a definition;
/// there is no partially-usable output.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum BuildError {
    /// The chain has no steps.
    #[error("chain definition has no steps")]
    EmptyChain,

    /// A state was declared more than once.
    #[error("state '{0}' is declared more than once")]
    DuplicateState(StateName),

    /// Two rules were declared for the same (state, event) pair.
    #[error("duplicate transition rule for state '{state}' on event '{event}'")]
    DuplicateRule {
        /// The state both rules start from.
        state: StateName,
        /// The event both rules match.
        event: EventName,
    },

    /// A rule or action references a state that was never declared.
    #[error("'{state}' is referenced but never declared")]
    UndeclaredState {
        /// The undeclared state.
        state: StateName,
    },

    /// No initial state was declared.
    #[error("no initial state declared")]
    NoInitialState,

    /// The initial state is not among the declared states.
    #[error("initial state '{0}' is not a declared state")]
    UndeclaredInitialState(StateName),
}

/// Errors that can occur while running a chain.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ChainError {
    /// A non-tolerant step failed, halting the run.
    #[error("step '{step}' (index {index}) failed: {source}")]
    StepFailed {
        /// The name of the step that failed.
        step: StepName,
        /// The step's position in the chain, zero-based.
        index: usize,
        /// The failure the step body reported.
        source: StepError,
    },

    /// The run was cancelled before completing.
    #[error("chain run cancelled after {completed} completed step(s)")]
    Cancelled {
        /// How many steps finished before cancellation was observed.
        completed: usize,
    },

    /// `run` was called on a tracker that already reached a terminal
    /// status.
    #[error("tracker has already finished; create a new one from the definition")]
    TrackerFinished,
}

/// The phase of a transition in which an action failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionPhase {
    /// The exit action of the state being left.
    Exit,
    /// The action attached to the transition rule itself.
    Transition,
    /// The entry action of the state being entered.
    Entry,
}

impl fmt::Display for ActionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActionPhase::Exit => write!(f, "exit"),
            ActionPhase::Transition => write!(f, "transition"),
            ActionPhase::Entry => write!(f, "entry"),
        }
    }
}

/// Errors reported by [`State::dispatch`](crate::State::dispatch).
///
/// Dispatch is atomic: whenever one of these is returned, the current
/// state and the history are exactly as they were before the call.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum DispatchError {
    /// No rule matches the current state and the dispatched event.
    #[error("no transition from state '{state}' for event '{event}'")]
    UnhandledEvent {
        /// The state the machine was in.
        state: StateName,
        /// The event that had no matching rule.
        event: EventName,
    },

    /// An entry, exit, or transition action failed; the transition was
    /// not committed.
    #[error("{phase} action failed while handling '{event}' in state '{state}': {source}")]
    ActionFailure {
        /// The state the machine was in when the event arrived.
        state: StateName,
        /// The event being handled.
        event: EventName,
        /// Which action failed.
        phase: ActionPhase,
        /// The failure the action reported.
        source: ActionError,
    },

    /// The machine is in a terminal state and accepts no more events.
    #[error("state machine is terminated in state '{state}'")]
    Terminated {
        /// The terminal state the machine rests in.
        state: StateName,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_error_display() {
        assert_eq!(BuildError::EmptyChain.to_string(), "chain definition has no steps");
        assert_eq!(
            BuildError::DuplicateState(StateName::new("idle")).to_string(),
            "state 'idle' is declared more than once"
        );
        assert_eq!(
            BuildError::DuplicateRule {
                state: StateName::new("idle"),
                event: EventName::new("start"),
            }
            .to_string(),
            "duplicate transition rule for state 'idle' on event 'start'"
        );
    }

    #[test]
    fn test_chain_error_display() {
        let error = ChainError::StepFailed {
            step: StepName::new("fetch"),
            index: 2,
            source: StepError::msg("connection refused"),
        };
        assert_eq!(
            error.to_string(),
            "step 'fetch' (index 2) failed: connection refused"
        );

        let error = ChainError::Cancelled { completed: 1 };
        assert_eq!(error.to_string(), "chain run cancelled after 1 completed step(s)");
    }

    #[test]
    fn test_dispatch_error_display() {
        let error = DispatchError::UnhandledEvent {
            state: StateName::new("idle"),
            event: EventName::new("finish"),
        };
        assert_eq!(
            error.to_string(),
            "no transition from state 'idle' for event 'finish'"
        );

        let error = DispatchError::ActionFailure {
            state: StateName::new("idle"),
            event: EventName::new("start"),
            phase: ActionPhase::Entry,
            source: ActionError::msg("boom"),
        };
        assert_eq!(
            error.to_string(),
            "entry action failed while handling 'start' in state 'idle': boom"
        );
    }

    #[test]
    fn test_action_phase_display() {
        assert_eq!(ActionPhase::Exit.to_string(), "exit");
        assert_eq!(ActionPhase::Transition.to_string(), "transition");
        assert_eq!(ActionPhase::Entry.to_string(), "entry");
    }

    #[test]
    fn test_step_error_source() {
        use std::error::Error;

        let err = StepError::new(std::io::Error::other("socket closed"));
        assert!(err.source().is_some());
    }
}
