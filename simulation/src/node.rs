//! Network participants

use crate::{PublicKey, QuorumSet, SimulationResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// A node: its identity and the quorum set it owns
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    pub public_key: PublicKey,
    pub quorum_set: QuorumSet,
}

impl Node {
    pub fn new(public_key: impl Into<PublicKey>, quorum_set: QuorumSet) -> Self {
        Self {
            public_key: public_key.into(),
            quorum_set,
        }
    }

    /// All validators this node trusts, directly or through inner sets
    pub fn trusted_nodes(&self) -> BTreeSet<PublicKey> {
        self.quorum_set.all_validators()
    }

    /// Minimal slices of this node; the node itself is always part of its slices
    pub fn quorum_slices(&self) -> SimulationResult<Vec<BTreeSet<PublicKey>>> {
        Ok(self
            .quorum_set
            .slices()?
            .into_iter()
            .map(|mut slice| {
                slice.insert(self.public_key.clone());
                slice
            })
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect())
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.public_key, self.quorum_set)
    }
}
