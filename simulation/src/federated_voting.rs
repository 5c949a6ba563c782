//! # Federated Voting
//!
//! Per-node federated voting on a single statement per round. A node moves through
//! `unknown → voted → accepted → confirmed` and never moves back:
//!
//! - **vote**: the node votes for a statement and broadcasts the vote
//! - **accept**: the peers that voted for or accepted the statement form a slice of the
//!   node's quorum set, or the peers that accepted it are v-blocking
//! - **confirm**: the peers that accepted the statement form a slice
//!
//! Acceptance of a statement other than the node's own vote is legal; confirmation of
//! different statements by different nodes is how a network split shows up.

use crate::engine::util::Out;
use crate::{Event, Node, PublicKey, QuorumSet, Statement};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use tracing::{debug, trace};

/// Protocol progress of a node; ordered so that later phases compare greater
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "camelCase")]
pub enum Phase {
    Unknown,
    Voted,
    Accepted,
    Confirmed,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Unknown => "unknown",
            Phase::Voted => "voted",
            Phase::Accepted => "accepted",
            Phase::Confirmed => "confirmed",
        };
        f.write_str(name)
    }
}

/// A vote or vote-to-accept on a statement, with the voter's quorum set attached
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub struct Vote {
    pub statement: Statement,
    pub is_vote_to_accept: bool,
    pub public_key: PublicKey,
    pub quorum_set: QuorumSet,
}

impl Vote {
    pub fn new(statement: impl Into<Statement>, is_vote_to_accept: bool, node: &Node) -> Self {
        Self {
            statement: statement.into(),
            is_vote_to_accept,
            public_key: node.public_key.clone(),
            quorum_set: node.quorum_set.clone(),
        }
    }

    /// Same voter, statement and kind
    pub fn same_as(&self, other: &Vote) -> bool {
        self.public_key == other.public_key
            && self.statement == other.statement
            && self.is_vote_to_accept == other.is_vote_to_accept
    }
}

impl fmt::Display for Vote {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_vote_to_accept {
            write!(f, "{} votes to accept {}", self.public_key, self.statement)
        } else {
            write!(f, "{} votes {}", self.public_key, self.statement)
        }
    }
}

/// Protocol state of a single node
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FederatedVotingState {
    pub node: Node,
    pub phase: Phase,
    pub voted: Option<Statement>,
    pub accepted: Option<Statement>,
    pub confirmed: Option<Statement>,
    pub processed_votes: Vec<Vote>,
}

impl FederatedVotingState {
    pub fn new(node: Node) -> Self {
        Self {
            node,
            phase: Phase::Unknown,
            voted: None,
            accepted: None,
            confirmed: None,
            processed_votes: Vec::new(),
        }
    }

    pub fn public_key(&self) -> &str {
        &self.node.public_key
    }

    /// Peers that voted for or accepted `statement`, plus this node if it did
    pub fn supporters(&self, statement: &str) -> BTreeSet<PublicKey> {
        let mut supporters: BTreeSet<PublicKey> = self
            .processed_votes
            .iter()
            .filter(|vote| vote.statement == statement)
            .map(|vote| vote.public_key.clone())
            .collect();
        if self.voted.as_deref() == Some(statement) || self.accepted.as_deref() == Some(statement) {
            supporters.insert(self.node.public_key.clone());
        }
        supporters
    }

    /// Peers that accepted `statement`
    pub fn peer_accepters(&self, statement: &str) -> BTreeSet<PublicKey> {
        self.processed_votes
            .iter()
            .filter(|vote| vote.is_vote_to_accept && vote.statement == statement)
            .map(|vote| vote.public_key.clone())
            .collect()
    }

    /// Peers that accepted `statement`, plus this node if it did
    pub fn accepters(&self, statement: &str) -> BTreeSet<PublicKey> {
        let mut accepters = self.peer_accepters(statement);
        if self.accepted.as_deref() == Some(statement) {
            accepters.insert(self.node.public_key.clone());
        }
        accepters
    }

    /// Statements this node has seen, in first-seen order
    pub fn known_statements(&self) -> Vec<Statement> {
        let mut statements: Vec<Statement> = Vec::new();
        let own = self.voted.iter().chain(self.accepted.iter());
        for statement in own.chain(self.processed_votes.iter().map(|vote| &vote.statement)) {
            if !statements.contains(statement) {
                statements.push(statement.clone());
            }
        }
        statements
    }
}

/// State transitions of federated voting
pub struct FederatedVotingProtocol;

impl FederatedVotingProtocol {
    /// Vote for `statement`; ignored unless the node is still undecided
    pub fn vote(state: &mut FederatedVotingState, statement: Statement, out: &mut Out<Vote, Event>) {
        if state.phase != Phase::Unknown {
            debug!("Node {} already in phase {}, ignoring vote", state.public_key(), state.phase);
            return;
        }

        state.voted = Some(statement.clone());
        state.phase = Phase::Voted;
        out.emit(Event::Voted {
            public_key: state.node.public_key.clone(),
            statement: statement.clone(),
        });
        out.broadcast(Vote::new(statement.clone(), false, &state.node));

        Self::evaluate(state, &statement, out);
    }

    /// Record a vote received from a peer and re-check the thresholds.
    ///
    /// Returns false when the vote was already known or is the node's own.
    pub fn process_vote(state: &mut FederatedVotingState, vote: Vote, out: &mut Out<Vote, Event>) -> bool {
        if vote.public_key == state.node.public_key {
            return false;
        }
        if state.processed_votes.iter().any(|known| known.same_as(&vote)) {
            trace!("Node {} already processed '{}'", state.public_key(), vote);
            return false;
        }

        let statement = vote.statement.clone();
        state.processed_votes.push(vote);
        Self::evaluate(state, &statement, out);
        true
    }

    /// Re-check every known statement, e.g. after the quorum set changed
    pub fn reevaluate(state: &mut FederatedVotingState, out: &mut Out<Vote, Event>) {
        for statement in state.known_statements() {
            Self::evaluate(state, &statement, out);
        }
    }

    fn evaluate(state: &mut FederatedVotingState, statement: &str, out: &mut Out<Vote, Event>) {
        if state.phase < Phase::Accepted {
            let supporters = state.supporters(statement);
            let peer_accepters = state.peer_accepters(statement);

            if state.node.quorum_set.is_slice(&supporters) {
                out.emit(Event::AcceptVoteRatified {
                    public_key: state.node.public_key.clone(),
                    statement: statement.to_string(),
                    slice: supporters,
                });
                Self::accept(state, statement, out);
            } else if state.node.quorum_set.is_v_blocking(&peer_accepters) {
                out.emit(Event::AcceptVoteVBlocked {
                    public_key: state.node.public_key.clone(),
                    statement: statement.to_string(),
                    v_blocking_set: peer_accepters,
                });
                Self::accept(state, statement, out);
            }
        }

        // A node only confirms what it accepted, or accepts and confirms together
        let accepted_other = state.accepted.as_deref().map_or(false, |accepted| accepted != statement);
        if state.phase < Phase::Confirmed && !accepted_other {
            let accepters = state.accepters(statement);
            if state.node.quorum_set.is_slice(&accepters) {
                out.emit(Event::VoteToAcceptRatified {
                    public_key: state.node.public_key.clone(),
                    statement: statement.to_string(),
                    slice: accepters,
                });
                Self::confirm(state, statement, out);
            }
        }
    }

    fn accept(state: &mut FederatedVotingState, statement: &str, out: &mut Out<Vote, Event>) {
        if state.voted.is_none() {
            state.voted = Some(statement.to_string());
        }
        state.accepted = Some(statement.to_string());
        state.phase = Phase::Accepted;

        debug!("Node {} accepted {}", state.public_key(), statement);
        out.emit(Event::Accepted {
            public_key: state.node.public_key.clone(),
            statement: statement.to_string(),
        });
        out.broadcast(Vote::new(statement, true, &state.node));
    }

    fn confirm(state: &mut FederatedVotingState, statement: &str, out: &mut Out<Vote, Event>) {
        if state.accepted.is_none() {
            Self::accept(state, statement, out);
        }
        state.confirmed = Some(statement.to_string());
        state.phase = Phase::Confirmed;

        debug!("Node {} confirmed {}", state.public_key(), statement);
        out.emit(Event::Confirmed {
            public_key: state.node.public_key.clone(),
            statement: statement.to_string(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(key: &str, threshold: usize, validators: &[&str]) -> Node {
        Node::new(key, QuorumSet::new(threshold, validators.iter().copied(), vec![]).unwrap())
    }

    fn peer_vote(key: &str, statement: &str, accept: bool) -> Vote {
        Vote::new(statement, accept, &node(key, 2, &["A", "B", "C"]))
    }

    #[test]
    fn test_vote_broadcasts_once() {
        let mut state = FederatedVotingState::new(node("A", 2, &["A", "B", "C"]));
        let mut out = Out::new();

        FederatedVotingProtocol::vote(&mut state, "x".to_string(), &mut out);
        assert_eq!(state.phase, Phase::Voted);
        assert_eq!(state.voted.as_deref(), Some("x"));
        assert_eq!(out.drain_broadcasts().len(), 1);

        FederatedVotingProtocol::vote(&mut state, "y".to_string(), &mut out);
        assert_eq!(state.voted.as_deref(), Some("x"));
        assert!(out.is_empty());
    }

    #[test]
    fn test_accept_then_confirm() {
        let mut state = FederatedVotingState::new(node("A", 2, &["A", "B", "C"]));
        let mut out = Out::new();

        FederatedVotingProtocol::vote(&mut state, "x".to_string(), &mut out);
        out.drain_broadcasts();

        assert!(FederatedVotingProtocol::process_vote(&mut state, peer_vote("B", "x", false), &mut out));
        assert_eq!(state.phase, Phase::Accepted);
        let broadcasts = out.drain_broadcasts();
        assert_eq!(broadcasts.len(), 1);
        assert!(broadcasts[0].is_vote_to_accept);

        FederatedVotingProtocol::process_vote(&mut state, peer_vote("B", "x", true), &mut out);
        assert_eq!(state.phase, Phase::Confirmed);
        assert_eq!(state.confirmed.as_deref(), Some("x"));
    }

    #[test]
    fn test_acceptance_implies_vote() {
        let mut state = FederatedVotingState::new(node("A", 2, &["A", "B", "C"]));
        let mut out = Out::new();

        FederatedVotingProtocol::process_vote(&mut state, peer_vote("B", "x", false), &mut out);
        assert_eq!(state.phase, Phase::Unknown);
        FederatedVotingProtocol::process_vote(&mut state, peer_vote("C", "x", false), &mut out);

        assert_eq!(state.phase, Phase::Accepted);
        assert_eq!(state.voted.as_deref(), Some("x"));
        assert_eq!(state.accepted.as_deref(), Some("x"));
    }

    #[test]
    fn test_v_blocking_acceptance() {
        // 3 of 4: any two peers intersect every slice
        let mut state = FederatedVotingState::new(node("A", 3, &["A", "B", "C", "D"]));
        let mut out = Out::new();

        FederatedVotingProtocol::vote(&mut state, "y".to_string(), &mut out);
        FederatedVotingProtocol::process_vote(&mut state, peer_vote("B", "x", true), &mut out);
        assert_eq!(state.phase, Phase::Voted);

        out.drain_events();
        FederatedVotingProtocol::process_vote(&mut state, peer_vote("C", "x", true), &mut out);
        assert_eq!(state.accepted.as_deref(), Some("x"));
        assert_eq!(state.voted.as_deref(), Some("y"));
        assert!(out
            .drain_events()
            .iter()
            .any(|event| matches!(event, Event::AcceptVoteVBlocked { .. })));
    }

    #[test]
    fn test_no_confirmation_of_other_statement_than_accepted() {
        let mut state = FederatedVotingState::new(node("A", 2, &["A", "B", "C"]));
        let mut out = Out::new();

        FederatedVotingProtocol::vote(&mut state, "x".to_string(), &mut out);
        FederatedVotingProtocol::process_vote(&mut state, peer_vote("B", "x", false), &mut out);
        assert_eq!(state.accepted.as_deref(), Some("x"));

        FederatedVotingProtocol::process_vote(&mut state, peer_vote("B", "y", true), &mut out);
        FederatedVotingProtocol::process_vote(&mut state, peer_vote("C", "y", true), &mut out);
        assert_eq!(state.phase, Phase::Accepted);
        assert_eq!(state.confirmed, None);
        assert_eq!(state.accepted.as_deref(), Some("x"));
    }

    #[test]
    fn test_duplicate_and_own_votes_are_ignored() {
        let mut state = FederatedVotingState::new(node("A", 2, &["A", "B", "C"]));
        let mut out = Out::new();

        assert!(FederatedVotingProtocol::process_vote(&mut state, peer_vote("B", "x", false), &mut out));
        assert!(!FederatedVotingProtocol::process_vote(&mut state, peer_vote("B", "x", false), &mut out));
        assert!(!FederatedVotingProtocol::process_vote(&mut state, peer_vote("A", "x", false), &mut out));
        assert_eq!(state.processed_votes.len(), 1);
    }

    #[test]
    fn test_unsatisfiable_quorum_set_stays_unknown() {
        let mut state = FederatedVotingState::new(Node::new("A", QuorumSet::empty()));
        let mut out = Out::new();

        for peer in ["B", "C", "D"] {
            FederatedVotingProtocol::process_vote(&mut state, peer_vote(peer, "x", true), &mut out);
        }
        assert_eq!(state.phase, Phase::Unknown);
    }

    #[test]
    fn test_phase_ordering() {
        assert!(Phase::Unknown < Phase::Voted);
        assert!(Phase::Voted < Phase::Accepted);
        assert!(Phase::Accepted < Phase::Confirmed);
    }
}
