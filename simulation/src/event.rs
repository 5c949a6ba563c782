//! Observable outcomes of executing actions

use crate::{Message, PublicKey, QuorumSet, Statement};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Why a message never reached its receiver
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub enum DropReason {
    /// The action carrying the message was disrupted
    Disrupted,
    /// The sender no longer exists
    SenderUnknown,
    /// The receiver does not exist at delivery time
    ReceiverUnknown,
    /// Sender and receiver are not overlay peers
    NotConnected,
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            DropReason::Disrupted => "disrupted",
            DropReason::SenderUnknown => "sender unknown",
            DropReason::ReceiverUnknown => "receiver unknown",
            DropReason::NotConnected => "not connected",
        };
        f.write_str(reason)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all_fields = "camelCase")]
pub enum Event {
    Voted {
        public_key: PublicKey,
        statement: Statement,
    },
    /// A slice voted for or accepted the statement
    AcceptVoteRatified {
        public_key: PublicKey,
        statement: Statement,
        slice: BTreeSet<PublicKey>,
    },
    /// A v-blocking set accepted the statement
    AcceptVoteVBlocked {
        public_key: PublicKey,
        statement: Statement,
        v_blocking_set: BTreeSet<PublicKey>,
    },
    Accepted {
        public_key: PublicKey,
        statement: Statement,
    },
    /// A slice accepted the statement
    VoteToAcceptRatified {
        public_key: PublicKey,
        statement: Statement,
        slice: BTreeSet<PublicKey>,
    },
    Confirmed {
        public_key: PublicKey,
        statement: Statement,
    },
    NodeAdded {
        public_key: PublicKey,
        quorum_set: QuorumSet,
    },
    NodeRemoved {
        public_key: PublicKey,
    },
    QuorumSetUpdated {
        public_key: PublicKey,
        quorum_set: QuorumSet,
    },
    ConnectionAdded {
        a: PublicKey,
        b: PublicKey,
    },
    ConnectionRemoved {
        a: PublicKey,
        b: PublicKey,
    },
    MessageSent {
        message: Message,
    },
    MessageReceived {
        message: Message,
    },
    MessageDropped {
        message: Message,
        reason: DropReason,
    },
    MessageForged {
        message: Message,
    },
}

impl Event {
    /// Node the event is about; the receiver for message events
    pub fn subject(&self) -> &str {
        match self {
            Event::Voted { public_key, .. }
            | Event::AcceptVoteRatified { public_key, .. }
            | Event::AcceptVoteVBlocked { public_key, .. }
            | Event::Accepted { public_key, .. }
            | Event::VoteToAcceptRatified { public_key, .. }
            | Event::Confirmed { public_key, .. }
            | Event::NodeAdded { public_key, .. }
            | Event::NodeRemoved { public_key }
            | Event::QuorumSetUpdated { public_key, .. } => public_key,
            Event::ConnectionAdded { a, .. } | Event::ConnectionRemoved { a, .. } => a,
            Event::MessageSent { message }
            | Event::MessageReceived { message }
            | Event::MessageDropped { message, .. }
            | Event::MessageForged { message } => &message.receiver,
        }
    }

    /// Events produced by the voting state machine itself
    pub fn is_protocol_event(&self) -> bool {
        matches!(
            self,
            Event::Voted { .. }
                | Event::AcceptVoteRatified { .. }
                | Event::AcceptVoteVBlocked { .. }
                | Event::Accepted { .. }
                | Event::VoteToAcceptRatified { .. }
                | Event::Confirmed { .. }
        )
    }
}

fn keys(set: &BTreeSet<PublicKey>) -> String {
    set.iter().cloned().collect::<Vec<_>>().join(", ")
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Event::Voted { public_key, statement } => write!(f, "{} voted {}", public_key, statement),
            Event::AcceptVoteRatified { public_key, statement, slice } => write!(
                f,
                "{}: slice [{}] voted or accepted {}",
                public_key,
                keys(slice),
                statement
            ),
            Event::AcceptVoteVBlocked {
                public_key,
                statement,
                v_blocking_set,
            } => write!(
                f,
                "{}: v-blocking set [{}] accepted {}",
                public_key,
                keys(v_blocking_set),
                statement
            ),
            Event::Accepted { public_key, statement } => write!(f, "{} accepted {}", public_key, statement),
            Event::VoteToAcceptRatified { public_key, statement, slice } => write!(
                f,
                "{}: slice [{}] accepted {}",
                public_key,
                keys(slice),
                statement
            ),
            Event::Confirmed { public_key, statement } => write!(f, "{} confirmed {}", public_key, statement),
            Event::NodeAdded { public_key, quorum_set } => write!(f, "{} added with {}", public_key, quorum_set),
            Event::NodeRemoved { public_key } => write!(f, "{} removed", public_key),
            Event::QuorumSetUpdated { public_key, quorum_set } => {
                write!(f, "{} updated quorum set to {}", public_key, quorum_set)
            }
            Event::ConnectionAdded { a, b } => write!(f, "{} connected to {}", a, b),
            Event::ConnectionRemoved { a, b } => write!(f, "{} disconnected from {}", a, b),
            Event::MessageSent { message } => write!(f, "sent {}", message),
            Event::MessageReceived { message } => write!(f, "received {}", message),
            Event::MessageDropped { message, reason } => write!(f, "dropped {} ({})", message, reason),
            Event::MessageForged { message } => write!(f, "forged {}", message),
        }
    }
}
