//! State machine definitions and the engine that runs them.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{ActionError, ActionPhase, BuildError, DispatchError};

/// Type-safe state name wrapper.
///
/// # Examples
///
/// ```
/// use asynchro::StateName;
///
/// let name = StateName::new("idle");
/// assert_eq!(name.as_str(), "idle");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StateName(String);

impl StateName {
    /// Creates a new StateName.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Returns the state name as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StateName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for StateName {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for StateName {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl AsRef<str> for StateName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl std::borrow::Borrow<str> for StateName {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// Type-safe event name wrapper.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventName(String);

impl EventName {
    /// Creates a new EventName.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Returns the event name as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EventName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for EventName {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for EventName {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl AsRef<str> for EventName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl std::borrow::Borrow<str> for EventName {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// Work attached to a transition: a state's entry or exit action, or a
/// rule's own action.
///
/// Any async closure of the right shape is an action; implement the
/// trait directly when an action carries configuration.
///
/// # Examples
///
/// ```
/// use asynchro::{Action, ActionError};
/// use async_trait::async_trait;
///
/// struct Notify(String);
///
/// #[async_trait]
/// impl Action for Notify {
///     async fn run(&self) -> Result<(), ActionError> {
///         println!("entered: {}", self.0);
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait Action: Send + Sync {
    /// Executes the action body.
    async fn run(&self) -> Result<(), ActionError>;
}

#[async_trait]
impl<F, Fut> Action for F
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), ActionError>> + Send,
{
    async fn run(&self) -> Result<(), ActionError> {
        (self)().await
    }
}

struct StateEntry {
    terminal: bool,
    on_entry: Option<Box<dyn Action>>,
    on_exit: Option<Box<dyn Action>>,
}

struct TransitionRule {
    next: StateName,
    action: Option<Box<dyn Action>>,
}

/// One applied transition, as recorded in a [`State`]'s history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransitionRecord {
    /// The state the machine left.
    pub from: StateName,
    /// The event that caused the transition.
    pub event: EventName,
    /// The state the machine entered.
    pub to: StateName,
}

impl fmt::Display for TransitionRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} --{}--> {}", self.from, self.event, self.to)
    }
}

/// An immutable state machine definition: declared states, the initial
/// state, and the transition rule table.
///
/// Built once via [`StateBuilder`] (or the
/// [`state_machine`](crate::state_machine) entry point). The tables
/// live behind a shared pointer, so cloning a definition is cheap and
/// every clone describes the same machine; one definition can feed any
/// number of running [`State`] instances.
#[derive(Clone)]
pub struct StateDefinition {
    inner: Arc<DefinitionInner>,
}

struct DefinitionInner {
    states: HashMap<StateName, StateEntry>,
    initial: StateName,
    rules: HashMap<(StateName, EventName), TransitionRule>,
}

impl fmt::Debug for StateDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateDefinition")
            .field("states", &self.inner.states.keys().collect::<Vec<_>>())
            .field("initial", &self.inner.initial)
            .field("rules", &self.inner.rules.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl StateDefinition {
    /// Creates a new state machine builder.
    pub fn builder() -> StateBuilder {
        StateBuilder::new()
    }

    /// Returns the initial state.
    pub fn initial_state(&self) -> &StateName {
        &self.inner.initial
    }

    /// Returns `true` if the given state is declared.
    pub fn has_state(&self, name: &str) -> bool {
        self.inner.states.contains_key(name)
    }

    /// Returns an iterator over all declared state names.
    pub fn state_names(&self) -> impl Iterator<Item = &StateName> {
        self.inner.states.keys()
    }

    /// Returns the number of declared transition rules.
    pub fn rule_count(&self) -> usize {
        self.inner.rules.len()
    }

    /// Starts a new machine instance at the initial state.
    ///
    /// Each call produces an independent instance; the definition
    /// itself is never mutated.
    pub fn start(&self) -> State {
        State::new(self.clone())
    }

    fn is_terminal(&self, state: &StateName) -> bool {
        self.inner
            .states
            .get(state.as_str())
            .is_some_and(|s| s.terminal)
    }
}

/// Builder for [`StateDefinition`] instances.
///
/// Declarations are applied in call order. Duplicate declarations
/// (a state declared twice, or two rules for one `(state, event)` pair)
/// are recorded at the offending call and surfaced by [`build`], which
/// then produces no definition; the first such error wins. References
/// to undeclared states are checked in [`build`], so states may be
/// declared after the rules that mention them.
///
/// [`build`]: StateBuilder::build
#[derive(Default)]
pub struct StateBuilder {
    states: HashMap<StateName, bool>,
    initial: Option<StateName>,
    rules: HashMap<(StateName, EventName), TransitionRule>,
    entry_actions: HashMap<StateName, Box<dyn Action>>,
    exit_actions: HashMap<StateName, Box<dyn Action>>,
    error: Option<BuildError>,
}

impl StateBuilder {
    /// Creates a new empty state machine builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares a state.
    pub fn state(&mut self, name: impl Into<StateName>) -> &mut Self {
        self.declare(name.into(), false)
    }

    /// Declares a terminal state. Once a machine reaches it, any
    /// further dispatch fails fast with
    /// [`DispatchError::Terminated`].
    pub fn terminal_state(&mut self, name: impl Into<StateName>) -> &mut Self {
        self.declare(name.into(), true)
    }

    fn declare(&mut self, name: StateName, terminal: bool) -> &mut Self {
        if self.states.contains_key(name.as_str()) {
            if self.error.is_none() {
                self.error = Some(BuildError::DuplicateState(name));
            }
            return self;
        }
        self.states.insert(name, terminal);
        self
    }

    /// Designates the initial state. If called more than once, the last
    /// call wins.
    pub fn initial(&mut self, name: impl Into<StateName>) -> &mut Self {
        self.initial = Some(name.into());
        self
    }

    /// Declares a transition rule: in `from`, event `event` moves the
    /// machine to `to`.
    pub fn transition(
        &mut self,
        from: impl Into<StateName>,
        event: impl Into<EventName>,
        to: impl Into<StateName>,
    ) -> &mut Self {
        self.add_rule(from.into(), event.into(), to.into(), None)
    }

    /// Declares a transition rule with an action that runs as part of
    /// the transition, between the exit and entry actions.
    pub fn transition_with<A>(
        &mut self,
        from: impl Into<StateName>,
        event: impl Into<EventName>,
        to: impl Into<StateName>,
        action: A,
    ) -> &mut Self
    where
        A: Action + 'static,
    {
        self.add_rule(from.into(), event.into(), to.into(), Some(Box::new(action)))
    }

    fn add_rule(
        &mut self,
        from: StateName,
        event: EventName,
        to: StateName,
        action: Option<Box<dyn Action>>,
    ) -> &mut Self {
        let key = (from, event);
        if self.rules.contains_key(&key) {
            if self.error.is_none() {
                self.error = Some(BuildError::DuplicateRule {
                    state: key.0,
                    event: key.1,
                });
            }
            return self;
        }
        self.rules.insert(key, TransitionRule { next: to, action });
        self
    }

    /// Attaches an entry action to a state, run whenever a transition
    /// into the state commits. Replaces any previously attached entry
    /// action.
    pub fn on_entry<A>(&mut self, state: impl Into<StateName>, action: A) -> &mut Self
    where
        A: Action + 'static,
    {
        self.entry_actions.insert(state.into(), Box::new(action));
        self
    }

    /// Attaches an exit action to a state, run whenever a transition
    /// out of the state is attempted. Replaces any previously attached
    /// exit action.
    pub fn on_exit<A>(&mut self, state: impl Into<StateName>, action: A) -> &mut Self
    where
        A: Action + 'static,
    {
        self.exit_actions.insert(state.into(), Box::new(action));
        self
    }

    /// Builds the definition.
    ///
    /// # Errors
    ///
    /// Returns the first declaration error recorded by the builder, or
    /// one of [`BuildError::NoInitialState`],
    /// [`BuildError::UndeclaredInitialState`], or
    /// [`BuildError::UndeclaredState`] if the completed declaration set
    /// is inconsistent.
    pub fn build(self) -> Result<StateDefinition, BuildError> {
        if let Some(error) = self.error {
            return Err(error);
        }

        let initial = self.initial.ok_or(BuildError::NoInitialState)?;
        if !self.states.contains_key(initial.as_str()) {
            return Err(BuildError::UndeclaredInitialState(initial));
        }

        for ((from, _), rule) in &self.rules {
            for referenced in [from, &rule.next] {
                if !self.states.contains_key(referenced.as_str()) {
                    return Err(BuildError::UndeclaredState {
                        state: referenced.clone(),
                    });
                }
            }
        }
        for referenced in self.entry_actions.keys().chain(self.exit_actions.keys()) {
            if !self.states.contains_key(referenced.as_str()) {
                return Err(BuildError::UndeclaredState {
                    state: referenced.clone(),
                });
            }
        }

        let mut entry_actions = self.entry_actions;
        let mut exit_actions = self.exit_actions;
        let states = self
            .states
            .into_iter()
            .map(|(name, terminal)| {
                let entry = StateEntry {
                    terminal,
                    on_entry: entry_actions.remove(name.as_str()),
                    on_exit: exit_actions.remove(name.as_str()),
                };
                (name, entry)
            })
            .collect();

        Ok(StateDefinition {
            inner: Arc::new(DefinitionInner {
                states,
                initial,
                rules: self.rules,
            }),
        })
    }
}

/// One running instance of a [`StateDefinition`].
///
/// Starts at the definition's initial state and advances only through
/// [`dispatch`]. Each instance owns its current state and history
/// exclusively; many instances may run concurrently over one shared
/// definition.
///
/// [`dispatch`]: State::dispatch
///
/// # Examples
///
/// ```
/// use asynchro::state_machine;
///
/// # #[tokio::main]
/// # async fn main() {
/// let definition = state_machine(|m| {
///     m.state("idle");
///     m.state("running");
///     m.initial("idle");
///     m.transition("idle", "start", "running");
/// })
/// .expect("valid machine");
///
/// let mut machine = definition.start();
/// machine.dispatch("start").await.expect("handled");
/// assert_eq!(machine.current_state().as_str(), "running");
/// # }
/// ```
pub struct State {
    definition: StateDefinition,
    current: StateName,
    history: Vec<TransitionRecord>,
}

impl fmt::Debug for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("State")
            .field("current", &self.current)
            .field("history", &self.history)
            .finish()
    }
}

impl State {
    fn new(definition: StateDefinition) -> Self {
        let current = definition.inner.initial.clone();
        Self {
            definition,
            current,
            history: Vec::new(),
        }
    }

    /// Returns the current state: the initial state, or the target of
    /// the last successfully committed transition.
    pub fn current_state(&self) -> &StateName {
        &self.current
    }

    /// Returns the committed transitions, oldest first.
    pub fn history(&self) -> &[TransitionRecord] {
        &self.history
    }

    /// Returns `true` if the current state is terminal; no further
    /// dispatch will succeed.
    pub fn is_terminated(&self) -> bool {
        self.definition.is_terminal(&self.current)
    }

    /// Feeds one event into the machine.
    ///
    /// Looks up the rule for the current state and `event`, runs the
    /// current state's exit action, then the rule's action, then the
    /// next state's entry action, and finally commits: the current
    /// state advances and the transition is appended to the history.
    ///
    /// Dispatch is atomic. If no rule matches, or any of the three
    /// actions fails, the current state and the history are left
    /// untouched — the transition commits only after every action has
    /// succeeded, so an entry action still observes the machine in the
    /// pre-transition state.
    ///
    /// # Errors
    ///
    /// [`DispatchError::Terminated`] if the current state is terminal,
    /// [`DispatchError::UnhandledEvent`] if no rule matches, or
    /// [`DispatchError::ActionFailure`] if an action fails.
    pub async fn dispatch(
        &mut self,
        event: impl Into<EventName>,
    ) -> Result<&TransitionRecord, DispatchError> {
        let event = event.into();
        let definition = self.definition.clone();

        if definition.is_terminal(&self.current) {
            warn!(state = %self.current, %event, "dispatch on terminated machine");
            return Err(DispatchError::Terminated {
                state: self.current.clone(),
            });
        }

        let key = (self.current.clone(), event.clone());
        let rule = definition
            .inner
            .rules
            .get(&key)
            .ok_or_else(|| DispatchError::UnhandledEvent {
                state: self.current.clone(),
                event: event.clone(),
            })?;

        let exit = definition
            .inner
            .states
            .get(self.current.as_str())
            .and_then(|s| s.on_exit.as_ref());
        let entry = definition
            .inner
            .states
            .get(rule.next.as_str())
            .and_then(|s| s.on_entry.as_ref());

        let phases = [
            (ActionPhase::Exit, exit),
            (ActionPhase::Transition, rule.action.as_ref()),
            (ActionPhase::Entry, entry),
        ];
        for (phase, action) in phases {
            if let Some(action) = action {
                if let Err(source) = action.run().await {
                    warn!(state = %self.current, %event, %phase, %source, "action failed; transition not committed");
                    return Err(DispatchError::ActionFailure {
                        state: self.current.clone(),
                        event,
                        phase,
                        source,
                    });
                }
            }
        }

        let record = TransitionRecord {
            from: self.current.clone(),
            event,
            to: rule.next.clone(),
        };
        info!(%record, "transition committed");
        self.current = rule.next.clone();
        self.history.push(record);

        match self.history.last() {
            Some(record) => Ok(record),
            None => unreachable!("record was just pushed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    fn idle_running_done() -> StateDefinition {
        let mut builder = StateDefinition::builder();
        builder.state("idle");
        builder.state("running");
        builder.state("done");
        builder.initial("idle");
        builder.transition("idle", "start", "running");
        builder.transition("running", "finish", "done");
        builder.build().unwrap()
    }

    #[tokio::test]
    async fn test_dispatch_walks_the_rule_table() {
        let definition = idle_running_done();
        let mut machine = definition.start();
        assert_eq!(machine.current_state().as_str(), "idle");

        machine.dispatch("start").await.unwrap();
        let record = machine.dispatch("finish").await.unwrap();
        assert_eq!(record.to.as_str(), "done");

        assert_eq!(machine.current_state().as_str(), "done");
        let history = machine.history();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].to_string(), "idle --start--> running");
        assert_eq!(history[1].to_string(), "running --finish--> done");
    }

    #[tokio::test]
    async fn test_unhandled_event_changes_nothing() {
        let definition = idle_running_done();
        let mut machine = definition.start();

        let error = machine.dispatch("finish").await.unwrap_err();
        assert!(matches!(error, DispatchError::UnhandledEvent { .. }));
        assert_eq!(machine.current_state().as_str(), "idle");
        assert!(machine.history().is_empty());
    }

    #[tokio::test]
    async fn test_action_ordering_exit_transition_entry() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let record = |label: &'static str, order: &Arc<Mutex<Vec<&'static str>>>| {
            let order = Arc::clone(order);
            move || {
                let order = Arc::clone(&order);
                async move {
                    order.lock().unwrap().push(label);
                    Ok::<(), ActionError>(())
                }
            }
        };

        let mut builder = StateDefinition::builder();
        builder.state("idle");
        builder.state("running");
        builder.initial("idle");
        builder.transition_with("idle", "start", "running", record("transition", &order));
        builder.on_exit("idle", record("exit", &order));
        builder.on_entry("running", record("entry", &order));
        let definition = builder.build().unwrap();

        let mut machine = definition.start();
        machine.dispatch("start").await.unwrap();

        assert_eq!(*order.lock().unwrap(), vec!["exit", "transition", "entry"]);
    }

    #[tokio::test]
    async fn test_entry_action_failure_leaves_state_untouched() {
        let mut builder = StateDefinition::builder();
        builder.state("idle");
        builder.state("running");
        builder.initial("idle");
        builder.transition("idle", "start", "running");
        builder.on_entry("running", || async { Err::<(), _>(ActionError::msg("refused")) });
        let definition = builder.build().unwrap();

        let mut machine = definition.start();
        let error = machine.dispatch("start").await.unwrap_err();

        match error {
            DispatchError::ActionFailure { phase, source, .. } => {
                assert_eq!(phase, ActionPhase::Entry);
                assert_eq!(source.to_string(), "refused");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(machine.current_state().as_str(), "idle");
        assert!(machine.history().is_empty());
    }

    #[tokio::test]
    async fn test_exit_action_failure_skips_later_actions() {
        let entry_ran = Arc::new(AtomicUsize::new(0));
        let ran = Arc::clone(&entry_ran);

        let mut builder = StateDefinition::builder();
        builder.state("idle");
        builder.state("running");
        builder.initial("idle");
        builder.transition("idle", "start", "running");
        builder.on_exit("idle", || async { Err::<(), _>(ActionError::msg("stuck")) });
        builder.on_entry("running", move || {
            let ran = Arc::clone(&ran);
            async move {
                ran.fetch_add(1, Ordering::SeqCst);
                Ok::<(), ActionError>(())
            }
        });
        let definition = builder.build().unwrap();

        let mut machine = definition.start();
        let error = machine.dispatch("start").await.unwrap_err();

        assert!(matches!(
            error,
            DispatchError::ActionFailure {
                phase: ActionPhase::Exit,
                ..
            }
        ));
        assert_eq!(entry_ran.load(Ordering::SeqCst), 0);
        assert_eq!(machine.current_state().as_str(), "idle");
    }

    #[tokio::test]
    async fn test_terminal_state_fails_fast() {
        let mut builder = StateDefinition::builder();
        builder.state("running");
        builder.terminal_state("done");
        builder.initial("running");
        builder.transition("running", "finish", "done");
        let definition = builder.build().unwrap();

        let mut machine = definition.start();
        machine.dispatch("finish").await.unwrap();
        assert!(machine.is_terminated());

        let error = machine.dispatch("finish").await.unwrap_err();
        assert!(matches!(error, DispatchError::Terminated { .. }));
        assert_eq!(machine.current_state().as_str(), "done");
        assert_eq!(machine.history().len(), 1);
    }

    #[tokio::test]
    async fn test_determinism_across_instances() {
        let definition = idle_running_done();
        let mut a = definition.start();
        let mut b = definition.start();

        for machine in [&mut a, &mut b] {
            machine.dispatch("start").await.unwrap();
            machine.dispatch("finish").await.unwrap();
        }

        assert_eq!(a.current_state(), b.current_state());
        assert_eq!(a.history(), b.history());
    }

    #[test]
    fn test_duplicate_state_is_a_build_error() {
        let mut builder = StateDefinition::builder();
        builder.state("idle");
        builder.state("idle");
        builder.initial("idle");

        let error = builder.build().unwrap_err();
        assert!(matches!(error, BuildError::DuplicateState(name) if name.as_str() == "idle"));
    }

    #[test]
    fn test_duplicate_rule_is_a_build_error() {
        let mut builder = StateDefinition::builder();
        builder.state("idle");
        builder.state("running");
        builder.initial("idle");
        builder.transition("idle", "start", "running");
        builder.transition("idle", "start", "idle");

        let error = builder.build().unwrap_err();
        assert!(matches!(error, BuildError::DuplicateRule { .. }));
    }

    #[test]
    fn test_rule_to_undeclared_state_is_a_build_error() {
        let mut builder = StateDefinition::builder();
        builder.state("idle");
        builder.initial("idle");
        builder.transition("idle", "start", "running");

        let error = builder.build().unwrap_err();
        assert!(matches!(error, BuildError::UndeclaredState { state } if state.as_str() == "running"));
    }

    #[test]
    fn test_missing_initial_is_a_build_error() {
        let mut builder = StateDefinition::builder();
        builder.state("idle");

        assert!(matches!(builder.build(), Err(BuildError::NoInitialState)));

        let mut builder = StateDefinition::builder();
        builder.state("idle");
        builder.initial("warp");

        assert!(matches!(
            builder.build(),
            Err(BuildError::UndeclaredInitialState(name)) if name.as_str() == "warp"
        ));
    }

    #[test]
    fn test_action_on_undeclared_state_is_a_build_error() {
        let mut builder = StateDefinition::builder();
        builder.state("idle");
        builder.initial("idle");
        builder.on_entry("running", || async { Ok::<(), ActionError>(()) });

        let error = builder.build().unwrap_err();
        assert!(matches!(error, BuildError::UndeclaredState { state } if state.as_str() == "running"));
    }

    #[test]
    fn test_first_declaration_error_wins() {
        let mut builder = StateDefinition::builder();
        builder.state("idle");
        builder.state("idle");
        builder.state("running");
        builder.state("running");
        builder.initial("idle");

        let error = builder.build().unwrap_err();
        assert!(matches!(error, BuildError::DuplicateState(name) if name.as_str() == "idle"));
    }

    #[test]
    fn test_states_may_be_declared_after_rules() {
        let mut builder = StateDefinition::builder();
        builder.transition("idle", "start", "running");
        builder.state("idle");
        builder.state("running");
        builder.initial("idle");

        let definition = builder.build().unwrap();
        assert_eq!(definition.rule_count(), 1);
        assert!(definition.has_state("running"));
    }
}
