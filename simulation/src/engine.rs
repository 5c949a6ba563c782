//! Engine abstractions shared by protocol contexts and the simulation
//!
//! A [`Context`] is a deterministic state machine: given the same sequence of action
//! batches it must produce the same protocol actions and events. The
//! [`Simulation`](crate::Simulation) relies on that to rewind by replay instead of
//! snapshotting.

use sha2::{Digest, Sha256};
use std::fmt::{Debug, Display};

/// Lowercase hex SHA-256 over the concatenation of `parts`
pub fn sha256_hex(parts: &[&[u8]]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part);
    }
    format!("{:x}", hasher.finalize())
}

/// Output channel used while a context handles a single action
pub mod util {
    /// Collects the broadcasts and events produced by a state transition
    #[derive(Debug)]
    pub struct Out<M, E> {
        pub broadcasts: Vec<M>,
        pub events: Vec<E>,
    }

    impl<M, E> Out<M, E> {
        pub fn new() -> Self {
            Self {
                broadcasts: Vec::new(),
                events: Vec::new(),
            }
        }

        /// Queue a message for every overlay peer of the emitting node
        pub fn broadcast(&mut self, msg: M) {
            self.broadcasts.push(msg);
        }

        /// Record an observable event
        pub fn emit(&mut self, event: E) {
            self.events.push(event);
        }

        pub fn is_empty(&self) -> bool {
            self.broadcasts.is_empty() && self.events.is_empty()
        }

        /// Get all pending broadcasts and clear the queue
        pub fn drain_broadcasts(&mut self) -> Vec<M> {
            std::mem::take(&mut self.broadcasts)
        }

        /// Get all pending events and clear the queue
        pub fn drain_events(&mut self) -> Vec<E> {
            std::mem::take(&mut self.events)
        }
    }

    impl<M, E> Default for Out<M, E> {
        fn default() -> Self {
            Self::new()
        }
    }
}

/// An operator-issued action that waits in a step until it is executed or canceled
pub trait UserActionKind: Clone + Debug + Display + PartialEq {
    /// Public key of the node the action is about
    fn subject(&self) -> &str;

    /// Variant name, used together with the subject to deduplicate pending actions
    fn kind(&self) -> &'static str;

    /// Whether the action jumps to the front of the pending list
    fn immediate_execution(&self) -> bool;

    /// Actions that may be queued several times for the same subject
    fn may_coexist(&self) -> bool {
        false
    }

    /// Whether queuing `self` replaces the pending `other`
    fn replaces(&self, other: &Self) -> bool {
        !self.may_coexist() && self.kind() == other.kind() && self.subject() == other.subject()
    }
}

/// An engine-generated action, replayed deterministically
pub trait ProtocolActionKind: Clone + Debug + Display + PartialEq {
    /// Public key of the node whose behaviour the action models
    fn subject(&self) -> &str;

    fn is_disrupted(&self) -> bool;

    fn set_disrupted(&mut self, disrupted: bool);

    /// Content hash covering every field, including the disruption flag
    fn content_hash(&self) -> String;
}

/// Deterministic protocol state driven by batches of actions
pub trait Context {
    type UserAction: UserActionKind;
    type ProtocolAction: ProtocolActionKind;
    type Event: Clone + Debug + PartialEq;

    /// Apply user actions in order, then protocol actions, and return the
    /// protocol actions spawned by them
    fn execute_actions(
        &mut self,
        protocol_actions: &[Self::ProtocolAction],
        user_actions: &[Self::UserAction],
    ) -> Vec<Self::ProtocolAction>;

    /// Events accumulated since the last drain
    fn drain_events(&mut self) -> Vec<Self::Event>;

    /// Return to the state the context was constructed with
    fn reset(&mut self);
}

#[cfg(test)]
mod tests {
    use super::sha256_hex;
    use super::util::Out;

    #[test]
    fn test_sha256_hex() {
        assert_eq!(
            sha256_hex(&[b"ab".as_slice(), b"c".as_slice()]),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert_eq!(
            sha256_hex(&[]),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
        let digest = sha256_hex(&[b"hash".as_slice()]);
        assert_eq!(digest.len(), 64);
        assert!(digest.chars().all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c)));
    }

    #[test]
    fn test_out_drains() {
        let mut out: Out<u32, &str> = Out::new();
        assert!(out.is_empty());

        out.broadcast(1);
        out.broadcast(2);
        out.emit("voted");
        assert!(!out.is_empty());

        assert_eq!(out.drain_broadcasts(), vec![1, 2]);
        assert_eq!(out.drain_events(), vec!["voted"]);
        assert!(out.is_empty());
    }
}
