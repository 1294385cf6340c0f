//! Authoritative set of live connections

use crate::protocol::{ConnectionId, Envelope, ServerEvent};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Tracks which connection ids are currently live
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct Registry {
    live: HashSet<ConnectionId>,
}

impl Registry {
    /// An empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a connection and announce the new online count.
    ///
    /// Ids are transport-assigned and unique, so registering one twice is a
    /// bug in the caller rather than a client-reachable condition.
    pub fn register(&mut self, id: ConnectionId) -> Envelope {
        let inserted = self.live.insert(id);
        debug_assert!(inserted, "connection {id} registered twice");
        self.online_count()
    }

    /// Remove a connection. Returns the online-count broadcast, or `None`
    /// if the id was not live.
    pub fn unregister(&mut self, id: &ConnectionId) -> Option<Envelope> {
        self.live.remove(id).then(|| self.online_count())
    }

    pub fn contains(&self, id: &ConnectionId) -> bool {
        self.live.contains(id)
    }

    pub fn count(&self) -> usize {
        self.live.len()
    }

    pub fn ids(&self) -> impl Iterator<Item = &ConnectionId> {
        self.live.iter()
    }

    fn online_count(&self) -> Envelope {
        Envelope::broadcast(ServerEvent::OnlineCount(self.count()))
    }
}
