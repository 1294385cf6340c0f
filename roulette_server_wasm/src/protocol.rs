//! Wire-independent message types exchanged between clients and the relay
//!
//! Inbound requests and outbound events serialize as externally tagged JSON,
//! e.g. `"Join"`, `{"Ready": null}` or `{"Signal": {"sender": "<uuid>", "data": ...}}`.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Opaque identifier assigned to a live connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConnectionId(pub Uuid);

impl ConnectionId {
    /// Allocate a fresh random id
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for ConnectionId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl FromStr for ConnectionId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Requests a connected client can send
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ClientRequest {
    /// Ask to be paired with a partner
    Join,
    /// End the current pairing, or stop waiting for one
    Leave,
    /// Negotiation payload (offer, answer, candidate) for the partner
    Signal {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        target: Option<ConnectionId>,
        data: serde_json::Value,
    },
    /// Text chat for the partner
    Chat {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        target: Option<ConnectionId>,
        message: String,
    },
    /// Keeps the connection from being reaped
    KeepAlive,
}

impl FromStr for ClientRequest {
    type Err = serde_json::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        serde_json::from_str(s)
    }
}

/// Events delivered to clients through their mailbox
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ServerEvent {
    /// Your connection id, always the first event a client sees
    IdAssigned(ConnectionId),
    /// Result of a join: the partner's id, or `None` while waiting
    Ready(Option<ConnectionId>),
    /// The partner left the session
    PartnerLeft,
    /// The partner's connection went away
    PartnerDisconnected,
    /// Forwarded negotiation payload
    Signal {
        sender: ConnectionId,
        data: serde_json::Value,
    },
    /// Forwarded chat message
    Chat { message: String },
    /// Number of live connections
    OnlineCount(usize),
}

impl fmt::Display for ServerEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let json = serde_json::to_string(self).map_err(|_| fmt::Error)?;
        f.write_str(&json)
    }
}

/// Who an outbound event is addressed to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recipient {
    Connection(ConnectionId),
    /// Every live connection at delivery time
    Everyone,
}

/// An outbound event tagged with its destination
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub to: Recipient,
    pub event: ServerEvent,
}

impl Envelope {
    pub fn to(id: ConnectionId, event: ServerEvent) -> Self {
        Self {
            to: Recipient::Connection(id),
            event,
        }
    }

    pub fn broadcast(event: ServerEvent) -> Self {
        Self {
            to: Recipient::Everyone,
            event,
        }
    }
}
