//! # asynchro
//!
//! Asynchronous step chains and event-driven state machines, configured
//! declaratively and executed with strict ordering guarantees.
//!
//! Two engines share one configuration pattern:
//!
//! - a **chain**: an ordered sequence of async steps. A [`Tracker`]
//!   drives one run, feeding each step the previous step's output,
//!   halting on the first failure unless a step is declared tolerant,
//!   and honoring cooperative cancellation at step boundaries.
//! - a **state machine**: named states, one initial state, and a
//!   transition rule table. A [`State`] instance advances through
//!   [`dispatch`](State::dispatch)ed events, running declared exit,
//!   transition, and entry actions atomically.
//!
//! ## Features
//!
//! - **Type-safe**: [`StepName`], [`StateName`], and [`EventName`]
//!   newtypes prevent typos at the API level
//! - **Async first**: step and action bodies are async; plain async
//!   closures work out of the box
//! - **Strict ordering**: a step (or dispatch) never begins before its
//!   predecessor has fully resolved
//! - **Structured errors**: build problems, step failures, and
//!   unhandled events are reported as structured outcomes, never panics
//! - **Shareable definitions**: definitions are immutable; one
//!   definition drives any number of concurrent runs
//!
//! ## Running a chain
//!
//! ```rust
//! use asynchro::chain;
//!
//! # #[tokio::main]
//! # async fn main() {
//! let definition = chain(|c| {
//!     c.step("double", |n: i64| async move { Ok(n * 2) });
//!     c.step("increment", |n: i64| async move { Ok(n + 1) });
//! })
//! .expect("valid chain");
//!
//! let mut tracker = definition.tracker();
//! let outcome = tracker.run(3).await;
//! assert_eq!(outcome.success(), Some(7));
//! # }
//! ```
//!
//! ## Running a state machine
//!
//! ```rust
//! use asynchro::state_machine;
//!
//! # #[tokio::main]
//! # async fn main() {
//! let definition = state_machine(|m| {
//!     m.state("idle");
//!     m.state("running");
//!     m.state("done");
//!     m.initial("idle");
//!     m.transition("idle", "start", "running");
//!     m.transition("running", "finish", "done");
//! })
//! .expect("valid machine");
//!
//! let mut machine = definition.start();
//! machine.dispatch("start").await.expect("handled");
//! machine.dispatch("finish").await.expect("handled");
//!
//! assert_eq!(machine.current_state().as_str(), "done");
//! assert_eq!(machine.history().len(), 2);
//! # }
//! ```
//!
//! ## Handling failures
//!
//! ```rust
//! use asynchro::{chain, ChainError, ChainOutcome, StepError};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let definition = chain(|c| {
//!     c.step("parse", |s: String| async move {
//!         if s.is_empty() {
//!             return Err(StepError::msg("empty input"));
//!         }
//!         Ok(s)
//!     });
//! })
//! .expect("valid chain");
//!
//! let outcome = definition.tracker().run(String::new()).await;
//! match outcome {
//!     ChainOutcome::Failed(ChainError::StepFailed { step, index, source }) => {
//!         eprintln!("step {step} (#{index}) failed: {source}");
//!     }
//!     _ => unreachable!(),
//! }
//! # }
//! ```

mod error;
mod machine;
mod step;
mod tracker;

pub mod prelude;

pub use error::{
    ActionError, ActionPhase, BuildError, ChainError, DispatchError, StepError,
};
pub use machine::{
    Action, EventName, State, StateBuilder, StateDefinition, StateName, TransitionRecord,
};
pub use step::{Step, StepName};
pub use tracker::{
    CancelHandle, ChainBuilder, ChainDefinition, ChainOutcome, Tracker, TrackerStatus,
};

/// Builds a chain definition from a declaration block.
///
/// The block receives a [`ChainBuilder`]; declarations are applied in
/// call order and no step body is run. The returned definition is
/// immutable and cheap to clone; call [`ChainDefinition::tracker`] for
/// each run.
///
/// # Errors
///
/// Returns [`BuildError::EmptyChain`] if the block declares no steps.
///
/// # Examples
///
/// ```
/// use asynchro::chain;
///
/// let definition = chain(|c| {
///     c.step("trim", |s: String| async move { Ok(s.trim().to_owned()) });
/// })
/// .expect("valid chain");
/// assert_eq!(definition.len(), 1);
/// ```
pub fn chain<T, F>(configure: F) -> Result<ChainDefinition<T>, BuildError>
where
    T: Send + 'static,
    F: FnOnce(&mut ChainBuilder<T>),
{
    let mut builder = ChainBuilder::new();
    configure(&mut builder);
    builder.build()
}

/// Builds a state machine definition from a declaration block.
///
/// The block receives a [`StateBuilder`]; declarations are applied in
/// call order and no action is run. The returned definition is
/// immutable and cheap to clone; call [`StateDefinition::start`] for
/// each instance.
///
/// # Errors
///
/// Returns the first [`BuildError`] the declarations produced: a
/// duplicate state, a duplicate `(state, event)` rule, a reference to
/// an undeclared state, or a missing/undeclared initial state.
///
/// # Examples
///
/// ```
/// use asynchro::state_machine;
///
/// let definition = state_machine(|m| {
///     m.state("closed");
///     m.state("open");
///     m.initial("closed");
///     m.transition("closed", "open", "open");
///     m.transition("open", "close", "closed");
/// })
/// .expect("valid machine");
/// assert_eq!(definition.initial_state().as_str(), "closed");
/// ```
pub fn state_machine<F>(configure: F) -> Result<StateDefinition, BuildError>
where
    F: FnOnce(&mut StateBuilder),
{
    let mut builder = StateBuilder::new();
    configure(&mut builder);
    builder.build()
}
