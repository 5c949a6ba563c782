//! Overlay network between nodes
//!
//! Either fully connected, where every node reaches every other node, or an explicit
//! undirected adjacency maintained by connection actions.

use crate::{PublicKey, Vote};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// A vote in transit between two overlay peers
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub sender: PublicKey,
    pub receiver: PublicKey,
    pub vote: Vote,
}

impl Message {
    pub fn new(sender: impl Into<PublicKey>, receiver: impl Into<PublicKey>, vote: Vote) -> Self {
        Self {
            sender: sender.into(),
            receiver: receiver.into(),
            vote,
        }
    }

    /// Relayed or forged messages are sent by someone other than the voter
    pub fn is_relayed(&self) -> bool {
        self.sender != self.vote.public_key
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}: {}", self.sender, self.receiver, self.vote)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Overlay {
    fully_connected: bool,
    gossip_enabled: bool,
    adjacency: BTreeMap<PublicKey, BTreeSet<PublicKey>>,
}

impl Overlay {
    pub fn new(fully_connected: bool, gossip_enabled: bool) -> Self {
        Self {
            fully_connected,
            gossip_enabled,
            adjacency: BTreeMap::new(),
        }
    }

    pub fn is_fully_connected(&self) -> bool {
        self.fully_connected
    }

    pub fn is_gossip_enabled(&self) -> bool {
        self.gossip_enabled
    }

    pub fn contains(&self, node: &str) -> bool {
        self.adjacency.contains_key(node)
    }

    pub fn add_node(&mut self, node: impl Into<PublicKey>) {
        self.adjacency.entry(node.into()).or_default();
    }

    /// Remove a node together with all of its connections
    pub fn remove_node(&mut self, node: &str) {
        self.adjacency.remove(node);
        for peers in self.adjacency.values_mut() {
            peers.remove(node);
        }
    }

    /// Connect two known nodes; returns false when nothing changed
    pub fn add_connection(&mut self, a: &str, b: &str) -> bool {
        if self.fully_connected || a == b || !self.contains(a) || !self.contains(b) {
            return false;
        }
        let inserted = self
            .adjacency
            .get_mut(a)
            .map(|peers| peers.insert(b.to_string()))
            .unwrap_or(false);
        if let Some(peers) = self.adjacency.get_mut(b) {
            peers.insert(a.to_string());
        }
        inserted
    }

    /// Disconnect two nodes; returns false when they were not connected
    pub fn remove_connection(&mut self, a: &str, b: &str) -> bool {
        if self.fully_connected {
            return false;
        }
        let removed = self
            .adjacency
            .get_mut(a)
            .map(|peers| peers.remove(b))
            .unwrap_or(false);
        if let Some(peers) = self.adjacency.get_mut(b) {
            peers.remove(a);
        }
        removed
    }

    /// Peers of `node` in key order
    pub fn peers(&self, node: &str) -> Vec<PublicKey> {
        if !self.contains(node) {
            return Vec::new();
        }
        if self.fully_connected {
            return self
                .adjacency
                .keys()
                .filter(|peer| peer.as_str() != node)
                .cloned()
                .collect();
        }
        self.adjacency
            .get(node)
            .map(|peers| peers.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn is_connected(&self, a: &str, b: &str) -> bool {
        a != b && self.peers(a).iter().any(|peer| peer == b)
    }

    /// Every undirected connection once, as `(smaller, larger)` pairs
    pub fn connections(&self) -> Vec<(PublicKey, PublicKey)> {
        let mut connections = Vec::new();
        for node in self.adjacency.keys() {
            for peer in self.peers(node) {
                if node < &peer {
                    connections.push((node.clone(), peer));
                }
            }
        }
        connections
    }

    pub fn clear(&mut self) {
        self.adjacency.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn overlay(fully_connected: bool) -> Overlay {
        let mut overlay = Overlay::new(fully_connected, false);
        for node in ["A", "B", "C"] {
            overlay.add_node(node);
        }
        overlay
    }

    #[test]
    fn test_fully_connected_peers() {
        let mut overlay = overlay(true);
        assert_eq!(overlay.peers("B"), vec!["A".to_string(), "C".to_string()]);
        assert!(!overlay.remove_connection("A", "B"));
        assert!(overlay.is_connected("A", "B"));
        assert_eq!(overlay.connections().len(), 3);
    }

    #[test]
    fn test_explicit_connections_are_bidirectional() {
        let mut overlay = overlay(false);
        assert!(overlay.peers("A").is_empty());

        assert!(overlay.add_connection("A", "B"));
        assert!(!overlay.add_connection("B", "A"));
        assert!(overlay.is_connected("B", "A"));
        assert!(!overlay.add_connection("A", "Z"));

        assert!(overlay.remove_connection("B", "A"));
        assert!(!overlay.is_connected("A", "B"));
    }

    #[test]
    fn test_remove_node_drops_connections() {
        let mut overlay = overlay(false);
        overlay.add_connection("A", "B");
        overlay.add_connection("B", "C");
        overlay.remove_node("B");

        assert!(overlay.peers("A").is_empty());
        assert!(overlay.peers("B").is_empty());
        assert!(overlay.connections().is_empty());
    }
}
