//! # Actions
//!
//! Everything that mutates a [`FederatedVotingContext`](crate::FederatedVotingContext)
//! is an action. User actions are queued by an operator and may be canceled before a
//! step runs; protocol actions are generated by the context itself and replayed.
//!
//! The `Display` form of an action is canonical: it feeds the step hash, so it must
//! be stable and cover every field that influences execution.

use crate::engine::{sha256_hex, ProtocolActionKind, UserActionKind};
use crate::{Message, PublicKey, QuorumSet, Statement};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all_fields = "camelCase")]
pub enum UserAction {
    AddNode {
        public_key: PublicKey,
        quorum_set: QuorumSet,
    },
    RemoveNode {
        public_key: PublicKey,
    },
    UpdateQuorumSet {
        public_key: PublicKey,
        quorum_set: QuorumSet,
    },
    VoteOnStatement {
        public_key: PublicKey,
        statement: Statement,
    },
    AddConnection {
        public_key: PublicKey,
        peer: PublicKey,
    },
    RemoveConnection {
        public_key: PublicKey,
        peer: PublicKey,
    },
    /// Inject a message that no node voted for
    ForgeMessage {
        message: Message,
    },
}

impl UserAction {
    pub fn add_node(public_key: impl Into<PublicKey>, quorum_set: QuorumSet) -> Self {
        UserAction::AddNode {
            public_key: public_key.into(),
            quorum_set,
        }
    }

    pub fn remove_node(public_key: impl Into<PublicKey>) -> Self {
        UserAction::RemoveNode {
            public_key: public_key.into(),
        }
    }

    pub fn update_quorum_set(public_key: impl Into<PublicKey>, quorum_set: QuorumSet) -> Self {
        UserAction::UpdateQuorumSet {
            public_key: public_key.into(),
            quorum_set,
        }
    }

    pub fn vote(public_key: impl Into<PublicKey>, statement: impl Into<Statement>) -> Self {
        UserAction::VoteOnStatement {
            public_key: public_key.into(),
            statement: statement.into(),
        }
    }

    pub fn add_connection(public_key: impl Into<PublicKey>, peer: impl Into<PublicKey>) -> Self {
        UserAction::AddConnection {
            public_key: public_key.into(),
            peer: peer.into(),
        }
    }

    pub fn remove_connection(public_key: impl Into<PublicKey>, peer: impl Into<PublicKey>) -> Self {
        UserAction::RemoveConnection {
            public_key: public_key.into(),
            peer: peer.into(),
        }
    }

    pub fn forge_message(message: Message) -> Self {
        UserAction::ForgeMessage { message }
    }
}

impl UserActionKind for UserAction {
    fn subject(&self) -> &str {
        match self {
            UserAction::AddNode { public_key, .. }
            | UserAction::RemoveNode { public_key }
            | UserAction::UpdateQuorumSet { public_key, .. }
            | UserAction::VoteOnStatement { public_key, .. }
            | UserAction::AddConnection { public_key, .. }
            | UserAction::RemoveConnection { public_key, .. } => public_key,
            UserAction::ForgeMessage { message } => &message.sender,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            UserAction::AddNode { .. } => "AddNode",
            UserAction::RemoveNode { .. } => "RemoveNode",
            UserAction::UpdateQuorumSet { .. } => "UpdateQuorumSet",
            UserAction::VoteOnStatement { .. } => "VoteOnStatement",
            UserAction::AddConnection { .. } => "AddConnection",
            UserAction::RemoveConnection { .. } => "RemoveConnection",
            UserAction::ForgeMessage { .. } => "ForgeMessage",
        }
    }

    fn immediate_execution(&self) -> bool {
        matches!(
            self,
            UserAction::AddNode { .. } | UserAction::RemoveNode { .. } | UserAction::UpdateQuorumSet { .. }
        )
    }

    fn may_coexist(&self) -> bool {
        matches!(
            self,
            UserAction::AddConnection { .. } | UserAction::RemoveConnection { .. } | UserAction::ForgeMessage { .. }
        )
    }
}

impl fmt::Display for UserAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UserAction::AddNode { public_key, quorum_set } => write!(f, "AddNode({}, {})", public_key, quorum_set),
            UserAction::RemoveNode { public_key } => write!(f, "RemoveNode({})", public_key),
            UserAction::UpdateQuorumSet { public_key, quorum_set } => {
                write!(f, "UpdateQuorumSet({}, {})", public_key, quorum_set)
            }
            UserAction::VoteOnStatement { public_key, statement } => {
                write!(f, "VoteOnStatement({}, {})", public_key, statement)
            }
            UserAction::AddConnection { public_key, peer } => write!(f, "AddConnection({}, {})", public_key, peer),
            UserAction::RemoveConnection { public_key, peer } => {
                write!(f, "RemoveConnection({}, {})", public_key, peer)
            }
            UserAction::ForgeMessage { message } => write!(f, "ForgeMessage({})", message),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all_fields = "camelCase")]
pub enum ProtocolAction {
    /// The sender hands a message to the overlay
    SendMessage {
        message: Message,
        #[serde(default)]
        disrupted: bool,
    },
    /// The receiver processes a delivered message
    ReceiveMessage {
        message: Message,
        #[serde(default)]
        disrupted: bool,
    },
}

impl ProtocolAction {
    pub fn send(message: Message) -> Self {
        ProtocolAction::SendMessage {
            message,
            disrupted: false,
        }
    }

    pub fn receive(message: Message) -> Self {
        ProtocolAction::ReceiveMessage {
            message,
            disrupted: false,
        }
    }

    pub fn message(&self) -> &Message {
        match self {
            ProtocolAction::SendMessage { message, .. } | ProtocolAction::ReceiveMessage { message, .. } => message,
        }
    }
}

impl ProtocolActionKind for ProtocolAction {
    /// Sender for sends, receiver for receives
    fn subject(&self) -> &str {
        match self {
            ProtocolAction::SendMessage { message, .. } => &message.sender,
            ProtocolAction::ReceiveMessage { message, .. } => &message.receiver,
        }
    }

    fn is_disrupted(&self) -> bool {
        match self {
            ProtocolAction::SendMessage { disrupted, .. } | ProtocolAction::ReceiveMessage { disrupted, .. } => {
                *disrupted
            }
        }
    }

    fn set_disrupted(&mut self, value: bool) {
        match self {
            ProtocolAction::SendMessage { disrupted, .. } | ProtocolAction::ReceiveMessage { disrupted, .. } => {
                *disrupted = value
            }
        }
    }

    fn content_hash(&self) -> String {
        sha256_hex(&[
            self.to_string().as_bytes(),
            self.message().vote.quorum_set.canonical().as_bytes(),
            &[u8::from(self.is_disrupted())],
        ])
    }
}

impl fmt::Display for ProtocolAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (name, message) = match self {
            ProtocolAction::SendMessage { message, .. } => ("SendMessage", message),
            ProtocolAction::ReceiveMessage { message, .. } => ("ReceiveMessage", message),
        };
        write!(f, "{}({})", name, message)?;
        if self.is_disrupted() {
            write!(f, " [disrupted]")?;
        }
        Ok(())
    }
}
