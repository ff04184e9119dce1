//! Wire messages exchanged between nodes and clients.
//!
//! Every message is a JSON envelope `{"src", "dest", "body"}`. The body
//! carries optional request correlation ids plus a payload tagged by its
//! `type` field:
//!
//! ```json
//! {"src": "c1", "dest": "n1", "body": {"type": "broadcast", "msg_id": 7, "message": 42}}
//! ```

use std::collections::HashMap;
use std::fmt;

use rumor_store::Value;
use serde::{Deserialize, Serialize};

/// Identifier the cluster assigns to a node or client (`n1`, `c3`, ...).
pub type NodeId = String;

/// Neighbor lists for every node in the cluster.
pub type Topology = HashMap<NodeId, Vec<NodeId>>;

/// A complete message envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub src: NodeId,
    pub dest: NodeId,
    pub body: Body,
}

impl Message {
    /// Build the reply to this message, addressed back to its sender.
    #[must_use]
    pub fn reply(&self, payload: Payload) -> Self {
        Self {
            src: self.dest.clone(),
            dest: self.src.clone(),
            body: Body {
                msg_id: None,
                in_reply_to: self.body.msg_id,
                payload,
            },
        }
    }
}

/// Message body: correlation ids plus the typed payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Body {
    /// Present when the sender expects a reply.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub msg_id: Option<u64>,

    /// Present when this body answers an earlier request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub in_reply_to: Option<u64>,

    #[serde(flatten)]
    pub payload: Payload,
}

impl Body {
    /// A body with no correlation ids.
    #[must_use]
    pub fn new(payload: Payload) -> Self {
        Self {
            msg_id: None,
            in_reply_to: None,
            payload,
        }
    }

    /// A body that expects a reply correlated by `msg_id`.
    #[must_use]
    pub fn request(msg_id: u64, payload: Payload) -> Self {
        Self {
            msg_id: Some(msg_id),
            in_reply_to: None,
            payload,
        }
    }
}

/// Typed message payload, one variant per message kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Payload {
    /// Assigns this process its node id and lists the cluster.
    Init {
        node_id: NodeId,
        node_ids: Vec<NodeId>,
    },
    InitOk,
    /// Neighbor lists for the whole cluster.
    Topology { topology: Topology },
    TopologyOk,
    /// A value to ingest, from a client or a gossiping neighbor.
    Broadcast { message: Value },
    BroadcastOk,
    Read,
    ReadOk { messages: Vec<Value> },
    /// A failed request.
    Error { code: u32, text: String },
}

impl Payload {
    /// Every `type` tag this protocol understands.
    pub const KNOWN_TYPES: [&'static str; 9] = [
        "init",
        "init_ok",
        "topology",
        "topology_ok",
        "broadcast",
        "broadcast_ok",
        "read",
        "read_ok",
        "error",
    ];

    /// Build an error payload.
    pub fn error(code: ErrorCode, text: impl Into<String>) -> Self {
        Self::Error {
            code: code.code(),
            text: text.into(),
        }
    }

    /// The payload's wire `type` tag.
    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        match self {
            Self::Init { .. } => "init",
            Self::InitOk => "init_ok",
            Self::Topology { .. } => "topology",
            Self::TopologyOk => "topology_ok",
            Self::Broadcast { .. } => "broadcast",
            Self::BroadcastOk => "broadcast_ok",
            Self::Read => "read",
            Self::ReadOk { .. } => "read_ok",
            Self::Error { .. } => "error",
        }
    }

    /// Whether `type_name` is a tag this protocol understands.
    #[must_use]
    pub fn is_known_type(type_name: &str) -> bool {
        Self::KNOWN_TYPES.contains(&type_name)
    }
}

/// Error codes carried by [`Payload::Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ErrorCode {
    Timeout = 0,
    NotSupported = 10,
    TemporarilyUnavailable = 11,
    MalformedRequest = 12,
    Crash = 13,
}

impl ErrorCode {
    /// Numeric wire code.
    #[must_use]
    pub const fn code(self) -> u32 {
        self as u32
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout => write!(f, "timeout"),
            Self::NotSupported => write!(f, "not-supported"),
            Self::TemporarilyUnavailable => write!(f, "temporarily-unavailable"),
            Self::MalformedRequest => write!(f, "malformed-request"),
            Self::Crash => write!(f, "crash"),
        }
    }
}
