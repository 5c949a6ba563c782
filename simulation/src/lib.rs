//! # FBAS Simulation - Federated Voting Engine
//!
//! This library provides a deterministic, step-driven model of federated voting
//! in a Federated Byzantine Agreement System (FBAS), together with an analyzer
//! for the global safety properties of the configured trust graph.
//!
//! ## Architecture
//!
//! - **QuorumSet / Node**: recursive trust descriptors and the participants owning them
//! - **Analysis**: exhaustive search for quorums, minimal quorums, D-Sets and quorum intersection
//! - **Federated Voting**: the per-node `unknown → voted → accepted → confirmed` state machine
//! - **Actions / Events**: closed sum types for everything that mutates or is observed
//! - **Context**: live per-node protocol state plus the overlay, executes batches of actions
//! - **Simulation**: rewindable step history with content-hashed step reuse for scenario replay
//!
//! ## Usage
//!
//! ```rust
//! use fbas_simulation::{
//!     FederatedVotingContext, QuorumSet, Simulation, SimulationConfig, UserAction,
//! };
//!
//! let config = SimulationConfig::new().with_fully_connected_overlay(true);
//! let mut simulation = Simulation::new(FederatedVotingContext::new(config));
//!
//! let quorum_set = QuorumSet::new(2, ["A", "B", "C"], vec![]).unwrap();
//! for key in ["A", "B", "C"] {
//!     simulation.add_user_action(UserAction::add_node(key, quorum_set.clone()));
//!     simulation.add_user_action(UserAction::vote(key, "x"));
//! }
//!
//! while simulation.has_next_step() {
//!     simulation.execute_step();
//! }
//! assert!(simulation.context().consensus_reached());
//! ```

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod engine;
pub mod quorum_set;
pub mod node;
pub mod analysis;
pub mod federated_voting;
pub mod overlay;
pub mod action;
pub mod event;
pub mod context;
pub mod simulation;
pub mod scenario;
pub mod config;

// Re-export main components
pub use engine::{Context, ProtocolActionKind, UserActionKind};
pub use quorum_set::{QuorumSet, MAX_ENUMERATED_SLICES};
pub use node::Node;
pub use analysis::{AnalysisCache, NetworkAnalysis, MAX_ANALYZED_NODES};
pub use federated_voting::{FederatedVotingProtocol, FederatedVotingState, Phase, Vote};
pub use overlay::{Message, Overlay};
pub use action::{ProtocolAction, UserAction};
pub use event::{DropReason, Event};
pub use context::{FederatedNode, FederatedVotingContext};
pub use simulation::{Simulation, SimulationStep, StepIndex};
pub use scenario::{RecordedStep, Scenario, ScenarioFactory, ScenarioLoader};
pub use config::SimulationConfig;

/// Node identity; a Stellar-style public key string
pub type PublicKey = String;

/// The value a federated vote is about
pub type Statement = String;

/// Errors surfaced across the public API.
///
/// Only configuration problems and I/O produce errors; operational outcomes such as
/// dropped messages or split networks are observable state, not errors.
#[derive(Debug, Error)]
pub enum SimulationError {
    /// A quorum set whose threshold cannot be met or is zero
    #[error("invalid quorum set: {0}")]
    InvalidQuorumSet(String),

    /// A node trusts a node that is not part of the configured network
    #[error("node {node} trusts unknown node {trusted}")]
    UnknownTrustedNode { node: PublicKey, trusted: PublicKey },

    /// The same public key was configured twice
    #[error("duplicate node {0}")]
    DuplicateNode(PublicKey),

    /// Analysis would not finish in reasonable time
    #[error("network of {nodes} nodes exceeds the analyzable maximum of {max}")]
    NetworkTooLarge { nodes: usize, max: usize },

    /// A quorum set with more minimal slices than can be listed
    #[error("quorum set has {count} minimal slices, more than the enumerable maximum of {max}")]
    TooManySlices { count: u64, max: u64 },

    /// Invalid simulation configuration
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Scenario not found or malformed
    #[error("scenario error: {0}")]
    Scenario(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration file parse error
    #[error("configuration parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for simulation operations
pub type SimulationResult<T> = Result<T, SimulationError>;

/// Summary of where a network of federated voting nodes stands.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub enum NetworkOutcome {
    /// Every node confirmed the same statement
    Consensus,
    /// Nodes confirmed conflicting statements
    Split,
    /// Not every node has confirmed yet
    Pending,
}

/// Network-level predicates over node projections
pub mod properties {
    use super::*;
    use std::collections::BTreeSet;

    /// Distinct statements confirmed by any node
    pub fn confirmed_values<'a, I>(states: I) -> BTreeSet<Statement>
    where
        I: IntoIterator<Item = &'a FederatedVotingState>,
    {
        states
            .into_iter()
            .filter_map(|state| state.confirmed.clone())
            .collect()
    }

    /// Two or more different statements were confirmed
    pub fn is_network_split<'a, I>(states: I) -> bool
    where
        I: IntoIterator<Item = &'a FederatedVotingState>,
    {
        confirmed_values(states).len() > 1
    }

    /// Every node confirmed, and all on the same statement
    pub fn consensus_reached<'a, I>(states: I) -> bool
    where
        I: IntoIterator<Item = &'a FederatedVotingState> + Clone,
    {
        let mut any = false;
        for state in states.clone() {
            any = true;
            if state.confirmed.is_none() {
                return false;
            }
        }
        any && confirmed_values(states).len() == 1
    }

    /// Classify the network
    pub fn outcome<'a, I>(states: I) -> NetworkOutcome
    where
        I: IntoIterator<Item = &'a FederatedVotingState> + Clone,
    {
        if is_network_split(states.clone()) {
            NetworkOutcome::Split
        } else if consensus_reached(states) {
            NetworkOutcome::Consensus
        } else {
            NetworkOutcome::Pending
        }
    }
}

/// Helpers for building common network shapes
pub mod utils {
    use super::*;

    /// Nodes that all trust each other with the same threshold
    pub fn symmetric_network(keys: &[&str], threshold: usize) -> SimulationResult<Vec<Node>> {
        let quorum_set = QuorumSet::new(threshold, keys.iter().copied(), vec![])?;
        Ok(keys
            .iter()
            .map(|key| Node::new(*key, quorum_set.clone()))
            .collect())
    }

    /// Two groups that only trust themselves; no quorum intersection between them
    pub fn disjoint_network(
        left: &[&str],
        right: &[&str],
        threshold: usize,
    ) -> SimulationResult<Vec<Node>> {
        let mut nodes = symmetric_network(left, threshold)?;
        nodes.extend(symmetric_network(right, threshold)?);
        Ok(nodes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(key: &str, confirmed: Option<&str>) -> FederatedVotingState {
        let quorum_set = QuorumSet::new(1, [key], vec![]).unwrap();
        let mut state = FederatedVotingState::new(Node::new(key, quorum_set));
        state.confirmed = confirmed.map(str::to_string);
        state
    }

    #[test]
    fn test_outcome_classification() {
        let agreed = vec![state("A", Some("x")), state("B", Some("x"))];
        assert_eq!(properties::outcome(&agreed), NetworkOutcome::Consensus);

        let split = vec![state("A", Some("x")), state("B", Some("y"))];
        assert_eq!(properties::outcome(&split), NetworkOutcome::Split);
        assert!(properties::is_network_split(&split));

        let pending = vec![state("A", Some("x")), state("B", None)];
        assert_eq!(properties::outcome(&pending), NetworkOutcome::Pending);
        assert!(!properties::consensus_reached(&pending));
    }

    #[test]
    fn test_empty_network_has_no_consensus() {
        let empty: Vec<FederatedVotingState> = vec![];
        assert!(!properties::consensus_reached(&empty));
        assert_eq!(properties::outcome(&empty), NetworkOutcome::Pending);
    }

    #[test]
    fn test_symmetric_network() {
        let nodes = utils::symmetric_network(&["A", "B", "C"], 2).unwrap();
        assert_eq!(nodes.len(), 3);
        assert!(nodes.iter().all(|node| node.quorum_set.threshold == 2));
        assert!(utils::symmetric_network(&["A"], 2).is_err());
    }
}
