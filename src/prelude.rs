//! Commonly used types and traits.

pub use crate::error::{
    ActionError, ActionPhase, BuildError, ChainError, DispatchError, StepError,
};
pub use crate::{chain, state_machine};
pub use crate::{Action, EventName, State, StateBuilder, StateDefinition, StateName};
pub use crate::{CancelHandle, ChainBuilder, ChainDefinition, ChainOutcome, Tracker, TrackerStatus};
pub use crate::{Step, StepName, TransitionRecord};
