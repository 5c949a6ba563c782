//! # Federated Voting Context
//!
//! Live protocol state of every node plus the overlay that connects them. The context
//! applies batches of actions deterministically: user actions first, in order, then
//! protocol actions, each of which may spawn further protocol actions for the next
//! step.
//!
//! Message flow for a vote from A to B:
//! ```text
//! VoteOnStatement(A) ──> SendMessage(A -> B) ──> ReceiveMessage(A -> B) ──> B evaluates
//!                             step n+1                  step n+2
//! ```

use crate::engine::util::Out;
use crate::engine::{Context, ProtocolActionKind};
use crate::{
    properties, DropReason, Event, FederatedVotingProtocol, FederatedVotingState, Message, NetworkAnalysis,
    NetworkOutcome, Node, Overlay, Phase, ProtocolAction, PublicKey, QuorumSet, SimulationConfig,
    SimulationError, SimulationResult, Statement, UserAction, Vote,
};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::{debug, trace};

/// Read-only projection of a node for display
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FederatedNode {
    pub public_key: PublicKey,
    pub quorum_set: QuorumSet,
    pub phase: Phase,
    pub voted: Option<Statement>,
    pub accepted: Option<Statement>,
    pub confirmed: Option<Statement>,
    pub processed_votes: usize,
    pub peers: Vec<PublicKey>,
}

#[derive(Debug, Clone)]
pub struct FederatedVotingContext {
    config: SimulationConfig,
    initial_nodes: Vec<Node>,
    states: IndexMap<PublicKey, FederatedVotingState>,
    overlay: Overlay,
    events: Vec<Event>,
}

impl FederatedVotingContext {
    /// An empty network; nodes join through `AddNode` actions
    pub fn new(config: SimulationConfig) -> Self {
        let overlay = Overlay::new(config.overlay_fully_connected, config.overlay_gossip_enabled);
        Self {
            config,
            initial_nodes: Vec::new(),
            states: IndexMap::new(),
            overlay,
            events: Vec::new(),
        }
    }

    /// A network that starts with `nodes`, rejecting duplicate keys and trust in
    /// nodes outside the roster
    pub fn with_nodes(config: SimulationConfig, nodes: Vec<Node>) -> SimulationResult<Self> {
        config.validate()?;

        let mut keys = BTreeSet::new();
        for node in &nodes {
            node.quorum_set.validate()?;
            if !keys.insert(node.public_key.clone()) {
                return Err(SimulationError::DuplicateNode(node.public_key.clone()));
            }
        }
        for node in &nodes {
            if let Some(unknown) = node.trusted_nodes().into_iter().find(|trusted| !keys.contains(trusted)) {
                return Err(SimulationError::UnknownTrustedNode {
                    node: node.public_key.clone(),
                    trusted: unknown,
                });
            }
        }

        let mut context = Self::new(config);
        context.initial_nodes = nodes;
        context.reset();
        Ok(context)
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    /// Roster the context starts from after a reset
    pub fn initial_nodes(&self) -> &[Node] {
        &self.initial_nodes
    }

    pub fn overlay(&self) -> &Overlay {
        &self.overlay
    }

    /// Current roster in join order
    pub fn nodes(&self) -> Vec<Node> {
        self.states.values().map(|state| state.node.clone()).collect()
    }

    pub fn node_count(&self) -> usize {
        self.states.len()
    }

    pub fn states(&self) -> impl Iterator<Item = &FederatedVotingState> + Clone {
        self.states.values()
    }

    pub fn state(&self, public_key: &str) -> Option<&FederatedVotingState> {
        self.states.get(public_key)
    }

    pub fn federated_nodes(&self) -> Vec<FederatedNode> {
        self.states
            .values()
            .map(|state| FederatedNode {
                public_key: state.node.public_key.clone(),
                quorum_set: state.node.quorum_set.clone(),
                phase: state.phase,
                voted: state.voted.clone(),
                accepted: state.accepted.clone(),
                confirmed: state.confirmed.clone(),
                processed_votes: state.processed_votes.len(),
                peers: self.overlay.peers(&state.node.public_key),
            })
            .collect()
    }

    pub fn overlay_connections(&self) -> Vec<(PublicKey, PublicKey)> {
        self.overlay.connections()
    }

    pub fn confirmed_values(&self) -> BTreeSet<Statement> {
        properties::confirmed_values(self.states())
    }

    pub fn consensus_reached(&self) -> bool {
        properties::consensus_reached(self.states())
    }

    pub fn is_network_split(&self) -> bool {
        properties::is_network_split(self.states())
    }

    pub fn outcome(&self) -> NetworkOutcome {
        properties::outcome(self.states())
    }

    /// Analyze the current roster, bounded by the configured network size
    pub fn analyze(&self) -> SimulationResult<NetworkAnalysis> {
        NetworkAnalysis::analyze_with_limit(&self.nodes(), self.config.max_analyzed_nodes)
    }

    fn sends_for(&self, sender: &str, votes: Vec<Vote>, skip: &[&str]) -> Vec<ProtocolAction> {
        let peers = self.overlay.peers(sender);
        votes
            .into_iter()
            .flat_map(|vote| {
                peers
                    .iter()
                    .filter(|peer| !skip.contains(&peer.as_str()))
                    .map(move |peer| ProtocolAction::send(Message::new(sender, peer.clone(), vote.clone())))
                    .collect::<Vec<_>>()
            })
            .collect()
    }

    fn apply_user_action(&mut self, action: &UserAction) -> Vec<ProtocolAction> {
        trace!("Applying {}", action);
        match action {
            UserAction::AddNode { public_key, quorum_set } => {
                if self.states.contains_key(public_key) {
                    debug!("Node {} already exists, ignoring", public_key);
                    return Vec::new();
                }
                let node = Node::new(public_key.clone(), quorum_set.clone());
                self.states.insert(public_key.clone(), FederatedVotingState::new(node));
                self.overlay.add_node(public_key.clone());
                self.events.push(Event::NodeAdded {
                    public_key: public_key.clone(),
                    quorum_set: quorum_set.clone(),
                });
                Vec::new()
            }
            UserAction::RemoveNode { public_key } => {
                if self.states.shift_remove(public_key).is_some() {
                    self.overlay.remove_node(public_key);
                    self.events.push(Event::NodeRemoved {
                        public_key: public_key.clone(),
                    });
                } else {
                    debug!("Node {} does not exist, ignoring removal", public_key);
                }
                Vec::new()
            }
            UserAction::UpdateQuorumSet { public_key, quorum_set } => {
                let Some(state) = self.states.get_mut(public_key) else {
                    debug!("Node {} does not exist, ignoring quorum set update", public_key);
                    return Vec::new();
                };
                state.node.quorum_set = quorum_set.clone();

                let mut out = Out::new();
                FederatedVotingProtocol::reevaluate(state, &mut out);
                self.events.push(Event::QuorumSetUpdated {
                    public_key: public_key.clone(),
                    quorum_set: quorum_set.clone(),
                });
                self.events.extend(out.drain_events());
                self.sends_for(public_key, out.drain_broadcasts(), &[])
            }
            UserAction::VoteOnStatement { public_key, statement } => {
                let Some(state) = self.states.get_mut(public_key) else {
                    debug!("Node {} does not exist, ignoring vote", public_key);
                    return Vec::new();
                };

                let mut out = Out::new();
                FederatedVotingProtocol::vote(state, statement.clone(), &mut out);
                self.events.extend(out.drain_events());
                self.sends_for(public_key, out.drain_broadcasts(), &[])
            }
            UserAction::AddConnection { public_key, peer } => {
                if self.overlay.add_connection(public_key, peer) {
                    self.events.push(Event::ConnectionAdded {
                        a: public_key.clone(),
                        b: peer.clone(),
                    });
                }
                Vec::new()
            }
            UserAction::RemoveConnection { public_key, peer } => {
                if self.overlay.remove_connection(public_key, peer) {
                    self.events.push(Event::ConnectionRemoved {
                        a: public_key.clone(),
                        b: peer.clone(),
                    });
                }
                Vec::new()
            }
            UserAction::ForgeMessage { message } => {
                self.events.push(Event::MessageForged {
                    message: message.clone(),
                });
                vec![ProtocolAction::send(message.clone())]
            }
        }
    }

    fn drop_message(&mut self, message: &Message, reason: DropReason) {
        debug!("Dropping {} ({})", message, reason);
        self.events.push(Event::MessageDropped {
            message: message.clone(),
            reason,
        });
    }

    fn apply_protocol_action(&mut self, action: &ProtocolAction) -> Vec<ProtocolAction> {
        trace!("Applying {}", action);
        let message = action.message();

        match action {
            ProtocolAction::SendMessage { .. } => {
                if action.is_disrupted() {
                    self.drop_message(message, DropReason::Disrupted);
                    return Vec::new();
                }
                if !self.states.contains_key(&message.sender) {
                    self.drop_message(message, DropReason::SenderUnknown);
                    return Vec::new();
                }
                if !self.overlay.is_connected(&message.sender, &message.receiver) {
                    self.drop_message(message, DropReason::NotConnected);
                    return Vec::new();
                }
                self.events.push(Event::MessageSent {
                    message: message.clone(),
                });
                vec![ProtocolAction::receive(message.clone())]
            }
            ProtocolAction::ReceiveMessage { .. } => {
                if !self.states.contains_key(&message.receiver) {
                    self.drop_message(message, DropReason::ReceiverUnknown);
                    return Vec::new();
                }
                if action.is_disrupted() {
                    self.drop_message(message, DropReason::Disrupted);
                    return Vec::new();
                }
                self.events.push(Event::MessageReceived {
                    message: message.clone(),
                });

                let mut out = Out::new();
                let is_new = match self.states.get_mut(&message.receiver) {
                    Some(state) => FederatedVotingProtocol::process_vote(state, message.vote.clone(), &mut out),
                    None => false,
                };
                self.events.extend(out.drain_events());

                let receiver = message.receiver.as_str();
                let mut spawned = self.sends_for(receiver, out.drain_broadcasts(), &[]);
                if is_new && self.overlay.is_gossip_enabled() {
                    let skip = [message.sender.as_str(), message.vote.public_key.as_str()];
                    spawned.extend(self.sends_for(receiver, vec![message.vote.clone()], &skip));
                }
                spawned
            }
        }
    }
}

impl Context for FederatedVotingContext {
    type UserAction = UserAction;
    type ProtocolAction = ProtocolAction;
    type Event = Event;

    fn execute_actions(
        &mut self,
        protocol_actions: &[ProtocolAction],
        user_actions: &[UserAction],
    ) -> Vec<ProtocolAction> {
        let mut spawned = Vec::new();
        for action in user_actions {
            spawned.extend(self.apply_user_action(action));
        }
        for action in protocol_actions {
            spawned.extend(self.apply_protocol_action(action));
        }
        spawned
    }

    fn drain_events(&mut self) -> Vec<Event> {
        std::mem::take(&mut self.events)
    }

    fn reset(&mut self) {
        self.states.clear();
        self.overlay = Overlay::new(self.config.overlay_fully_connected, self.config.overlay_gossip_enabled);
        for node in &self.initial_nodes {
            self.states
                .insert(node.public_key.clone(), FederatedVotingState::new(node.clone()));
            self.overlay.add_node(node.public_key.clone());
        }
        self.events.clear();
    }
}
