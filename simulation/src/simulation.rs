//! # Simulation Engine
//!
//! Step history over a deterministic [`Context`]. Steps live in an arena addressed by
//! [`StepIndex`]; the arena order always equals the chain order from the initial step,
//! so discarding a stale branch is a truncation.
//!
//! Each step holds the actions that will run when it is executed and the events that
//! were produced on arriving at it:
//!
//! ```text
//!  step 0              step 1                    step 2
//! ┌──────────────┐    ┌─────────────────────┐    ┌─────────────────────┐
//! │ user actions │ ─> │ previous_step_hash  │ ─> │ previous_step_hash  │
//! │              │    │ previous_events     │    │ previous_events     │
//! │              │    │ user/protocol acts  │    │ user/protocol acts  │
//! └──────────────┘    └─────────────────────┘    └─────────────────────┘
//! ```
//!
//! Executing a step whose recomputed hash matches the recorded `previous_step_hash` of
//! its successor reuses the successor; otherwise the successor and everything after it
//! is replaced by a freshly computed step. Going back resets the context and replays
//! from the initial step.

use crate::engine::{sha256_hex, Context, ProtocolActionKind, UserActionKind};
use crate::{FederatedVotingContext, PublicKey};
use std::collections::BTreeSet;
use tracing::{debug, info};

/// Position of a step in the arena
pub type StepIndex = usize;

/// One tick of simulation history
#[derive(Debug, Clone, PartialEq)]
pub struct SimulationStep<U, P, E> {
    pub user_actions: Vec<U>,
    pub protocol_actions: Vec<P>,
    /// Events produced by executing the previous step
    pub previous_events: Vec<E>,
    pub previous: Option<StepIndex>,
    pub next: Option<StepIndex>,
    /// Hash of the previous step's actions at the time this step was recorded
    pub previous_step_hash: Option<String>,
}

impl<U, P, E> SimulationStep<U, P, E> {
    fn initial() -> Self {
        Self {
            user_actions: Vec::new(),
            protocol_actions: Vec::new(),
            previous_events: Vec::new(),
            previous: None,
            next: None,
            previous_step_hash: None,
        }
    }

    pub fn has_pending_actions(&self) -> bool {
        !self.user_actions.is_empty() || !self.protocol_actions.is_empty()
    }
}

impl<U: UserActionKind, P: ProtocolActionKind, E> SimulationStep<U, P, E> {
    /// SHA-256 over the canonical action strings and protocol content hashes
    pub fn hash(&self) -> String {
        step_hash(&self.user_actions, &self.protocol_actions)
    }
}

/// Hash of a batch of actions as it is recorded in the successor step
pub fn step_hash<U: UserActionKind, P: ProtocolActionKind>(user_actions: &[U], protocol_actions: &[P]) -> String {
    let join = |parts: Vec<String>| parts.join("|");
    let users = join(user_actions.iter().map(ToString::to_string).collect());
    let protocols = join(protocol_actions.iter().map(ToString::to_string).collect());
    let contents = join(protocol_actions.iter().map(ProtocolActionKind::content_hash).collect());
    sha256_hex(&[users.as_bytes(), b"|", protocols.as_bytes(), b"|", contents.as_bytes()])
}

type Step<C> = SimulationStep<<C as Context>::UserAction, <C as Context>::ProtocolAction, <C as Context>::Event>;

/// Recorded actions of one step, used to rebuild a history
pub type StepActions<C> = (Vec<<C as Context>::UserAction>, Vec<<C as Context>::ProtocolAction>);

pub struct Simulation<C: Context> {
    context: C,
    steps: Vec<Step<C>>,
    current: StepIndex,
    reused_steps: usize,
}

impl<C: Context> Simulation<C> {
    pub fn new(context: C) -> Self {
        Self {
            context,
            steps: vec![SimulationStep::initial()],
            current: 0,
            reused_steps: 0,
        }
    }

    /// Rebuild a recorded history, positioned at its initial step
    ///
    /// The link hashes are recomputed from the recorded actions, so replaying the same
    /// actions reuses every recorded step.
    pub fn with_history(context: C, history: Vec<StepActions<C>>) -> Self {
        let mut simulation = Self::new(context);
        simulation.steps.clear();

        let mut previous_hash: Option<String> = None;
        for (index, (user_actions, protocol_actions)) in history.into_iter().enumerate() {
            let hash = step_hash(&user_actions, &protocol_actions);
            simulation.steps.push(SimulationStep {
                user_actions,
                protocol_actions,
                previous_events: Vec::new(),
                previous: index.checked_sub(1),
                next: None,
                previous_step_hash: previous_hash.take(),
            });
            if index > 0 {
                simulation.steps[index - 1].next = Some(index);
            }
            previous_hash = Some(hash);
        }
        if simulation.steps.is_empty() {
            simulation.steps.push(SimulationStep::initial());
        }
        simulation
    }

    pub fn context(&self) -> &C {
        &self.context
    }

    pub fn current_step_index(&self) -> StepIndex {
        self.current
    }

    pub fn current_step(&self) -> &Step<C> {
        &self.steps[self.current]
    }

    pub fn steps(&self) -> &[Step<C>] {
        &self.steps
    }

    pub fn step_count(&self) -> usize {
        self.steps.len()
    }

    /// How often `execute_step` advanced onto an already recorded step
    pub fn reused_step_count(&self) -> usize {
        self.reused_steps
    }

    /// Link hashes of the whole recorded chain, in order
    pub fn step_hashes(&self) -> Vec<String> {
        self.chain(self.steps.len())
            .filter_map(|index| self.steps[index].previous_step_hash.clone())
            .collect()
    }

    /// Indices from the initial step, following `next` links, limited to `count` steps
    fn chain(&self, count: usize) -> impl Iterator<Item = StepIndex> + '_ {
        std::iter::successors(Some(0), move |&index| self.steps[index].next).take(count)
    }

    pub fn pending_user_actions(&self) -> &[C::UserAction] {
        &self.steps[self.current].user_actions
    }

    pub fn pending_protocol_actions(&self) -> &[C::ProtocolAction] {
        &self.steps[self.current].protocol_actions
    }

    /// Queue a user action on the current step.
    ///
    /// A pending action it replaces is overwritten in place; otherwise immediate
    /// actions go to the front and the rest to the back.
    pub fn add_user_action(&mut self, action: C::UserAction) {
        let pending = &mut self.steps[self.current].user_actions;
        if let Some(position) = pending.iter().position(|existing| action.replaces(existing)) {
            debug!("Replacing pending {} with {}", pending[position], action);
            pending[position] = action;
        } else if action.immediate_execution() {
            pending.insert(0, action);
        } else {
            pending.push(action);
        }
    }

    /// Remove a pending user action; returns false when it was not pending
    pub fn cancel_pending_user_action(&mut self, action: &C::UserAction) -> bool {
        let pending = &mut self.steps[self.current].user_actions;
        match pending.iter().position(|existing| existing == action) {
            Some(position) => {
                pending.remove(position);
                true
            }
            None => false,
        }
    }

    /// Toggle the disruption flag of a pending protocol action
    pub fn set_pending_protocol_action_disrupted(&mut self, index: usize, disrupted: bool) -> bool {
        match self.steps[self.current].protocol_actions.get_mut(index) {
            Some(action) => {
                action.set_disrupted(disrupted);
                true
            }
            None => false,
        }
    }

    /// Disrupt every pending protocol action of `public_key`; returns how many changed
    pub fn disrupt_pending_actions_of(&mut self, public_key: &str) -> usize {
        let mut changed = 0;
        for action in self.steps[self.current].protocol_actions.iter_mut() {
            if action.subject() == public_key && !action.is_disrupted() {
                action.set_disrupted(true);
                changed += 1;
            }
        }
        changed
    }

    /// Execute the current step's actions and advance
    pub fn execute_step(&mut self) {
        let step = &self.steps[self.current];
        let hash = step.hash();
        let protocol_actions = step.protocol_actions.clone();
        let user_actions = step.user_actions.clone();

        let spawned = self.context.execute_actions(&protocol_actions, &user_actions);
        let events = self.context.drain_events();

        if let Some(next) = self.steps[self.current].next {
            if self.steps[next].previous_step_hash.as_deref() == Some(hash.as_str()) {
                debug!("Reusing recorded step {}", next);
                self.steps[next].previous_events = events;
                self.current = next;
                self.reused_steps += 1;
                return;
            }
            info!(
                "Discarding {} stale step(s) after step {}",
                self.steps.len() - self.current - 1,
                self.current
            );
            self.steps.truncate(self.current + 1);
        }

        let index = self.steps.len();
        self.steps.push(SimulationStep {
            user_actions: Vec::new(),
            protocol_actions: spawned,
            previous_events: events,
            previous: Some(self.current),
            next: None,
            previous_step_hash: Some(hash),
        });
        self.steps[self.current].next = Some(index);
        self.current = index;
    }

    /// Move to the previous step by replaying the history from the initial step
    pub fn go_back_one_step(&mut self) {
        let Some(target) = self.steps[self.current].previous else {
            return;
        };

        self.context.reset();
        for index in self.chain(self.steps.len()).take_while(|&index| index != target).collect::<Vec<_>>() {
            let step = &self.steps[index];
            self.context.execute_actions(&step.protocol_actions, &step.user_actions);
        }
        self.context.drain_events();
        self.current = target;
    }

    pub fn go_to_first_step(&mut self) {
        self.context.reset();
        self.context.drain_events();
        self.current = 0;
    }

    pub fn has_next_step(&self) -> bool {
        let step = &self.steps[self.current];
        step.next.is_some() || step.has_pending_actions()
    }

    pub fn has_previous_step(&self) -> bool {
        self.steps[self.current].previous.is_some()
    }

    /// Events produced by the last executed step
    pub fn latest_events(&self) -> &[C::Event] {
        &self.steps[self.current].previous_events
    }

    /// Events of every executed step up to the current one, grouped per step
    ///
    /// Entry `i` holds the events produced by executing the `i`-th step of the chain.
    pub fn full_event_log(&self) -> Vec<Vec<C::Event>> {
        self.chain(self.current + 1)
            .skip(1)
            .map(|index| self.steps[index].previous_events.clone())
            .collect()
    }

    /// Subjects of disrupted protocol actions up to and including the current step
    pub fn disrupted_nodes(&self) -> BTreeSet<PublicKey> {
        self.chain(self.current + 1)
            .flat_map(|index| self.steps[index].protocol_actions.iter())
            .filter(|action| action.is_disrupted())
            .map(|action| action.subject().to_string())
            .collect()
    }

    /// Execute steps until nothing is left or `max_steps` ran; returns the number run
    pub fn run_to_completion(&mut self, max_steps: usize) -> usize {
        let mut executed = 0;
        while executed < max_steps && self.has_next_step() {
            self.execute_step();
            executed += 1;
        }
        executed
    }
}

impl Simulation<FederatedVotingContext> {
    /// Nothing left to execute and the network did not reach consensus
    pub fn is_stuck(&self) -> bool {
        !self.has_next_step() && !self.context.consensus_reached()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::symmetric_network;
    use crate::{Event, Phase, SimulationConfig, UserAction};

    fn simulation() -> Simulation<FederatedVotingContext> {
        let nodes = symmetric_network(&["A", "B", "C"], 2).unwrap();
        Simulation::new(FederatedVotingContext::with_nodes(SimulationConfig::default(), nodes).unwrap())
    }

    #[test]
    fn test_add_user_action_replaces_same_subject() {
        let mut simulation = simulation();
        simulation.add_user_action(UserAction::vote("A", "x"));
        simulation.add_user_action(UserAction::vote("B", "x"));
        simulation.add_user_action(UserAction::vote("A", "y"));

        assert_eq!(
            simulation.pending_user_actions(),
            &[UserAction::vote("A", "y"), UserAction::vote("B", "x")]
        );
    }

    #[test]
    fn test_immediate_actions_go_first() {
        let mut simulation = simulation();
        simulation.add_user_action(UserAction::vote("A", "x"));
        simulation.add_user_action(UserAction::remove_node("C"));

        assert_eq!(simulation.pending_user_actions()[0], UserAction::remove_node("C"));
    }

    #[test]
    fn test_connection_actions_coexist() {
        let mut simulation = simulation();
        simulation.add_user_action(UserAction::add_connection("A", "B"));
        simulation.add_user_action(UserAction::add_connection("A", "C"));
        assert_eq!(simulation.pending_user_actions().len(), 2);
    }

    #[test]
    fn test_cancel_pending_user_action() {
        let mut simulation = simulation();
        simulation.add_user_action(UserAction::vote("A", "x"));
        assert!(!simulation.cancel_pending_user_action(&UserAction::vote("B", "x")));
        assert!(simulation.cancel_pending_user_action(&UserAction::vote("A", "x")));
        assert!(!simulation.has_next_step());
    }

    #[test]
    fn test_execute_and_go_back() {
        let mut simulation = simulation();
        assert!(!simulation.has_previous_step());

        simulation.add_user_action(UserAction::vote("A", "x"));
        simulation.execute_step();
        assert!(simulation.has_previous_step());
        assert!(simulation
            .latest_events()
            .iter()
            .any(|event| matches!(event, Event::Voted { .. })));
        assert_eq!(simulation.pending_protocol_actions().len(), 2);

        simulation.go_back_one_step();
        assert_eq!(simulation.current_step_index(), 0);
        assert_eq!(simulation.context().state("A").map(|state| state.phase), Some(Phase::Unknown));
        assert!(simulation.has_next_step());
    }

    #[test]
    fn test_event_log_is_grouped_per_step() {
        let mut simulation = simulation();
        assert!(simulation.full_event_log().is_empty());

        simulation.add_user_action(UserAction::vote("A", "x"));
        simulation.execute_step();
        simulation.execute_step();
        simulation.execute_step();

        let log = simulation.full_event_log();
        assert_eq!(log.len(), 3);
        assert!(log[0].iter().all(|event| matches!(event, Event::Voted { .. })));
        assert!(log[1].iter().all(|event| matches!(event, Event::MessageSent { .. })));
        assert!(log[2].iter().any(|event| matches!(event, Event::MessageReceived { .. })));
        assert_eq!(log.last().map(Vec::as_slice), Some(simulation.latest_events()));

        simulation.go_back_one_step();
        assert_eq!(simulation.full_event_log(), log[..2].to_vec());
    }

    #[test]
    fn test_same_actions_reuse_next_step() {
        let mut simulation = simulation();
        simulation.add_user_action(UserAction::vote("A", "x"));
        simulation.execute_step();
        simulation.go_to_first_step();

        simulation.execute_step();
        assert_eq!(simulation.reused_step_count(), 1);
        assert_eq!(simulation.step_count(), 2);
    }

    #[test]
    fn test_divergence_discards_stale_branch() {
        let mut simulation = simulation();
        simulation.add_user_action(UserAction::vote("A", "x"));
        simulation.execute_step();
        simulation.execute_step();
        assert_eq!(simulation.step_count(), 3);

        simulation.go_to_first_step();
        simulation.add_user_action(UserAction::vote("B", "x"));
        simulation.execute_step();

        assert_eq!(simulation.reused_step_count(), 0);
        assert_eq!(simulation.step_count(), 2);
        assert!(simulation.current_step().next.is_none());
    }

    #[test]
    fn test_disruption_is_recorded() {
        let mut simulation = simulation();
        simulation.add_user_action(UserAction::vote("A", "x"));
        simulation.execute_step();

        assert_eq!(simulation.disrupt_pending_actions_of("A"), 2);
        assert!(simulation.set_pending_protocol_action_disrupted(0, false));
        assert!(!simulation.set_pending_protocol_action_disrupted(9, true));
        assert_eq!(simulation.disrupted_nodes(), BTreeSet::from(["A".to_string()]));
    }

    #[test]
    fn test_with_history_links_steps() {
        let history = vec![(vec![UserAction::vote("A", "x")], vec![]), (vec![], vec![])];
        let simulation = Simulation::with_history(
            FederatedVotingContext::with_nodes(
                SimulationConfig::default(),
                symmetric_network(&["A", "B", "C"], 2).unwrap(),
            )
            .unwrap(),
            history,
        );

        assert_eq!(simulation.step_count(), 2);
        assert_eq!(simulation.steps()[0].next, Some(1));
        assert_eq!(simulation.step_hashes().len(), 1);
        assert!(simulation.has_next_step());
    }
}
