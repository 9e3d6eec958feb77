//! Chain definitions and the tracker that executes them.

use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::{BuildError, ChainError, StepError};
use crate::step::{Step, StepName};

struct StepEntry<T> {
    name: StepName,
    body: Box<dyn Step<T>>,
    tolerant: bool,
}

/// An immutable, ordered sequence of steps.
///
/// Built once via [`ChainBuilder`] (or the [`chain`](crate::chain)
/// entry point). The step table lives behind a shared pointer, so
/// cloning a definition is cheap and every clone drives the same
/// steps; one definition can feed any number of concurrent
/// [`Tracker`] runs.
///
/// # Examples
///
/// ```
/// use asynchro::ChainDefinition;
///
/// # #[tokio::main]
/// # async fn main() {
/// let mut builder = ChainDefinition::builder();
/// builder.step("double", |n: i64| async move { Ok(n * 2) });
/// builder.step("increment", |n: i64| async move { Ok(n + 1) });
/// let definition = builder.build().expect("valid chain");
///
/// let outcome = definition.tracker().run(3).await;
/// assert_eq!(outcome.success(), Some(7));
/// # }
/// ```
pub struct ChainDefinition<T> {
    steps: Arc<Vec<StepEntry<T>>>,
}

impl<T> Clone for ChainDefinition<T> {
    fn clone(&self) -> Self {
        Self {
            steps: Arc::clone(&self.steps),
        }
    }
}

impl<T> fmt::Debug for ChainDefinition<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChainDefinition")
            .field("steps", &self.steps.iter().map(|s| &s.name).collect::<Vec<_>>())
            .finish()
    }
}

impl<T> ChainDefinition<T>
where
    T: Send + 'static,
{
    /// Creates a new chain builder.
    pub fn builder() -> ChainBuilder<T> {
        ChainBuilder::new()
    }

    /// Returns the number of steps in the chain. Always at least one.
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Returns `true` if the chain has no steps. Kept for API
    /// convention; a built definition is never empty.
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Returns an iterator over the step names, in execution order.
    pub fn step_names(&self) -> impl Iterator<Item = &StepName> {
        self.steps.iter().map(|s| &s.name)
    }

    /// Creates a tracker for one run of this definition.
    ///
    /// Each call produces an independent run; the definition itself is
    /// never mutated.
    pub fn tracker(&self) -> Tracker<T> {
        Tracker::new(self.clone())
    }
}

/// Builder for [`ChainDefinition`] instances.
///
/// Steps execute in declaration order. Declaration never runs a step
/// body; the builder only assembles the definition.
pub struct ChainBuilder<T> {
    steps: Vec<StepEntry<T>>,
}

impl<T> Default for ChainBuilder<T>
where
    T: Send + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T> ChainBuilder<T>
where
    T: Send + 'static,
{
    /// Creates a new empty chain builder.
    pub fn new() -> Self {
        Self { steps: Vec::new() }
    }

    /// Appends a step. A failure in this step halts the run.
    pub fn step<S>(&mut self, name: impl Into<StepName>, step: S) -> &mut Self
    where
        S: Step<T> + 'static,
    {
        self.steps.push(StepEntry {
            name: name.into(),
            body: Box::new(step),
            tolerant: false,
        });
        self
    }

    /// Appends a tolerant step. Its failure is recorded on the tracker
    /// but does not halt the run; the next step receives the same input
    /// this step received.
    pub fn tolerant_step<S>(&mut self, name: impl Into<StepName>, step: S) -> &mut Self
    where
        S: Step<T> + 'static,
    {
        self.steps.push(StepEntry {
            name: name.into(),
            body: Box::new(step),
            tolerant: true,
        });
        self
    }

    /// Builds the definition.
    ///
    /// # Errors
    ///
    /// Returns [`BuildError::EmptyChain`] if no steps were declared.
    pub fn build(self) -> Result<ChainDefinition<T>, BuildError> {
        if self.steps.is_empty() {
            return Err(BuildError::EmptyChain);
        }
        Ok(ChainDefinition {
            steps: Arc::new(self.steps),
        })
    }
}

/// Execution status of a [`Tracker`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackerStatus {
    /// `run` has not been called yet.
    Pending,
    /// The run is in progress.
    Running,
    /// Every step completed.
    Completed,
    /// A non-tolerant step failed.
    Failed,
    /// The run was cancelled at a step boundary.
    Cancelled,
}

impl TrackerStatus {
    /// Returns `true` once the tracker can no longer advance.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TrackerStatus::Completed | TrackerStatus::Failed | TrackerStatus::Cancelled
        )
    }
}

/// Clonable handle used to cancel a tracker run.
///
/// Cancellation is cooperative: it takes effect at the next step
/// boundary, and a step body that is already running is never
/// interrupted. The handle may be cloned into other tasks, or into a
/// step body itself.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    token: CancellationToken,
}

impl CancelHandle {
    /// Requests cancellation of the associated run.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Returns `true` if cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

/// Terminal outcome of one chain run.
#[derive(Debug)]
pub enum ChainOutcome<T> {
    /// Every step completed; carries the last step's output.
    Completed(T),
    /// The run stopped early; carries the failure descriptor.
    Failed(ChainError),
    /// The run was cancelled at a step boundary.
    Cancelled {
        /// How many steps finished before cancellation was observed.
        completed: usize,
    },
}

impl<T> ChainOutcome<T> {
    /// Returns the final value if the run completed.
    pub fn success(self) -> Option<T> {
        match self {
            ChainOutcome::Completed(value) => Some(value),
            _ => None,
        }
    }

    /// Returns `true` if the run completed.
    pub fn is_completed(&self) -> bool {
        matches!(self, ChainOutcome::Completed(_))
    }

    /// Returns `true` if the run failed.
    pub fn is_failed(&self) -> bool {
        matches!(self, ChainOutcome::Failed(_))
    }

    /// Returns `true` if the run was cancelled.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, ChainOutcome::Cancelled { .. })
    }

    /// Converts the outcome into a `Result`, folding cancellation into
    /// [`ChainError::Cancelled`].
    pub fn into_result(self) -> Result<T, ChainError> {
        match self {
            ChainOutcome::Completed(value) => Ok(value),
            ChainOutcome::Failed(error) => Err(error),
            ChainOutcome::Cancelled { completed } => Err(ChainError::Cancelled { completed }),
        }
    }
}

/// One run of a [`ChainDefinition`].
///
/// A tracker owns the mutable state of a single execution: the current
/// position, the status, and any tolerated failures. It is single-shot;
/// once the status is terminal, further `run` calls report
/// [`ChainError::TrackerFinished`]. Create a fresh tracker from the
/// definition for each run.
pub struct Tracker<T> {
    definition: ChainDefinition<T>,
    status: TrackerStatus,
    tolerated: Vec<(StepName, StepError)>,
    token: CancellationToken,
}

impl<T> fmt::Debug for Tracker<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tracker")
            .field("definition", &self.definition)
            .field("status", &self.status)
            .field("tolerated", &self.tolerated.len())
            .finish()
    }
}

impl<T> Tracker<T>
where
    T: Send + 'static,
{
    fn new(definition: ChainDefinition<T>) -> Self {
        Self {
            definition,
            status: TrackerStatus::Pending,
            tolerated: Vec::new(),
            token: CancellationToken::new(),
        }
    }

    /// Returns the current execution status.
    pub fn status(&self) -> TrackerStatus {
        self.status
    }

    /// Returns a handle that cancels this run at the next step boundary.
    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle {
            token: self.token.clone(),
        }
    }

    /// Returns the failures swallowed by tolerant steps, in the order
    /// they occurred.
    pub fn tolerated_failures(&self) -> &[(StepName, StepError)] {
        &self.tolerated
    }
}

impl<T> Tracker<T>
where
    T: Clone + Send + 'static,
{
    /// Executes the chain starting from `initial`.
    ///
    /// Steps run strictly in declaration order, one at a time; each
    /// step's output becomes the next step's input. Cancellation is
    /// checked before every step. The value type is `Clone` because a
    /// tolerant step's input must be replayed to its successor when the
    /// step fails; the clone is only taken before tolerant steps.
    pub async fn run(&mut self, initial: T) -> ChainOutcome<T> {
        if self.status != TrackerStatus::Pending {
            return ChainOutcome::Failed(ChainError::TrackerFinished);
        }
        self.status = TrackerStatus::Running;

        let definition = self.definition.clone();
        let mut value = initial;

        for (index, entry) in definition.steps.iter().enumerate() {
            if self.token.is_cancelled() {
                info!(step = %entry.name, index, "chain run cancelled before step");
                self.status = TrackerStatus::Cancelled;
                return ChainOutcome::Cancelled { completed: index };
            }

            if entry.tolerant {
                match entry.body.run(value.clone()).await {
                    Ok(output) => {
                        info!(step = %entry.name, index, "step completed");
                        value = output;
                    }
                    Err(error) => {
                        warn!(step = %entry.name, index, %error, "tolerant step failed; continuing");
                        self.tolerated.push((entry.name.clone(), error));
                    }
                }
            } else {
                match entry.body.run(value).await {
                    Ok(output) => {
                        info!(step = %entry.name, index, "step completed");
                        value = output;
                    }
                    Err(error) => {
                        warn!(step = %entry.name, index, %error, "step failed; halting chain");
                        self.status = TrackerStatus::Failed;
                        return ChainOutcome::Failed(ChainError::StepFailed {
                            step: entry.name.clone(),
                            index,
                            source: error,
                        });
                    }
                }
            }
        }

        // A cancel request that lands after the last step loses the
        // race; the run is already complete.
        self.status = TrackerStatus::Completed;
        ChainOutcome::Completed(value)
    }
}
