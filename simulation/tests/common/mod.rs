// Author: FBAS Simulation Team
//! Shared helpers for the integration tests

#![allow(dead_code)]

use fbas_simulation::{
    FederatedVotingContext, Node, ProtocolAction, QuorumSet, Simulation, SimulationConfig, UserAction,
};

pub const MAX_STEPS: usize = 100;

pub fn quorum_set(threshold: usize, validators: &[&str]) -> QuorumSet {
    QuorumSet::new(threshold, validators.iter().copied(), vec![]).expect("valid quorum set")
}

/// Empty network that learns its nodes through `AddNode` actions
pub fn empty_simulation(config: SimulationConfig) -> Simulation<FederatedVotingContext> {
    Simulation::new(FederatedVotingContext::new(config))
}

pub fn simulation_with(nodes: Vec<Node>) -> Simulation<FederatedVotingContext> {
    let context = FederatedVotingContext::with_nodes(SimulationConfig::default(), nodes).expect("valid roster");
    Simulation::new(context)
}

/// Queue `AddNode` for every node, keeping roster order
pub fn add_nodes(simulation: &mut Simulation<FederatedVotingContext>, nodes: &[(&str, QuorumSet)]) {
    for (key, quorum_set) in nodes.iter().rev() {
        simulation.add_user_action(UserAction::add_node(*key, quorum_set.clone()));
    }
}

pub fn vote_all(simulation: &mut Simulation<FederatedVotingContext>, votes: &[(&str, &str)]) {
    for (key, statement) in votes {
        simulation.add_user_action(UserAction::vote(*key, *statement));
    }
}

/// Disrupt every pending receive addressed to `receiver`
pub fn disrupt_receives_of(simulation: &mut Simulation<FederatedVotingContext>, receiver: &str) {
    let indices: Vec<usize> = simulation
        .pending_protocol_actions()
        .iter()
        .enumerate()
        .filter(|(_, action)| {
            matches!(action, ProtocolAction::ReceiveMessage { message, .. } if message.receiver == receiver)
        })
        .map(|(index, _)| index)
        .collect();
    for index in indices {
        simulation.set_pending_protocol_action_disrupted(index, true);
    }
}
