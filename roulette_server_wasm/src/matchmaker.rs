//! Pairing state machine and envelope routing
//!
//! Every inbound event is handled to completion by [`Matchmaker::dispatch`],
//! which returns the envelopes the transport must deliver. The matchmaker
//! never performs I/O, so callers can hold a single lock around it.
//!
//! A connection moves through `connected -> waiting -> paired -> connected`;
//! when a pairing ends the remaining side is *not* re-queued and has to
//! send another `Join`.

use crate::protocol::{ClientRequest, ConnectionId, Envelope, ServerEvent};
use crate::registry::Registry;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use tracing::{debug, info, warn};

/// Events fed into the matchmaker by the transport
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Connect(ConnectionId),
    Disconnect(ConnectionId),
    Request {
        from: ConnectionId,
        request: ClientRequest,
    },
}

/// Owns the registry, the waiting queue and the pairing relation
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct Matchmaker {
    registry: Registry,
    /// Oldest waiter at the front
    waiting: VecDeque<ConnectionId>,
    /// Symmetric: `pairs[a] == b` iff `pairs[b] == a`
    pairs: HashMap<ConnectionId, ConnectionId>,
}

impl Matchmaker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Current partner of `id`, if it is paired
    pub fn partner_of(&self, id: &ConnectionId) -> Option<ConnectionId> {
        self.pairs.get(id).copied()
    }

    pub fn is_waiting(&self, id: &ConnectionId) -> bool {
        self.waiting.contains(id)
    }

    /// Number of connections waiting for a partner
    pub fn waiting_len(&self) -> usize {
        self.waiting.len()
    }

    /// Apply one event and return the envelopes it produces
    pub fn dispatch(&mut self, event: Inbound) -> Vec<Envelope> {
        let out = match event {
            Inbound::Connect(id) => self.connect(id),
            Inbound::Disconnect(id) => self.disconnect(id),
            Inbound::Request { from, request } => {
                if !self.registry.contains(&from) {
                    warn!(%from, "request from unregistered connection dropped");
                    return Vec::new();
                }
                match request {
                    ClientRequest::Join => self.join(from),
                    ClientRequest::Leave => self.leave(from),
                    ClientRequest::Signal { target, data } => self
                        .resolve_partner(from, target)
                        .map(|to| Envelope::to(to, ServerEvent::Signal { sender: from, data }))
                        .into_iter()
                        .collect(),
                    ClientRequest::Chat { target, message } => self
                        .resolve_partner(from, target)
                        .map(|to| Envelope::to(to, ServerEvent::Chat { message }))
                        .into_iter()
                        .collect(),
                    ClientRequest::KeepAlive => Vec::new(),
                }
            }
        };
        self.check_invariants();
        out
    }

    fn connect(&mut self, id: ConnectionId) -> Vec<Envelope> {
        info!(%id, "connection registered");
        vec![self.registry.register(id)]
    }

    fn join(&mut self, id: ConnectionId) -> Vec<Envelope> {
        if let Some(partner) = self.partner_of(&id) {
            debug!(%id, %partner, "join while paired, repeating ready");
            return vec![Envelope::to(id, ServerEvent::Ready(Some(partner)))];
        }
        if self.is_waiting(&id) {
            debug!(%id, "join while already waiting ignored");
            return Vec::new();
        }
        match self.waiting.pop_front() {
            Some(partner) => {
                self.pairs.insert(id, partner);
                self.pairs.insert(partner, id);
                info!(%id, %partner, "paired");
                vec![
                    Envelope::to(id, ServerEvent::Ready(Some(partner))),
                    Envelope::to(partner, ServerEvent::Ready(Some(id))),
                ]
            }
            None => {
                self.waiting.push_back(id);
                info!(%id, "waiting for a partner");
                vec![Envelope::to(id, ServerEvent::Ready(None))]
            }
        }
    }

    fn leave(&mut self, id: ConnectionId) -> Vec<Envelope> {
        self.release(id, ServerEvent::PartnerLeft)
            .into_iter()
            .collect()
    }

    fn disconnect(&mut self, id: ConnectionId) -> Vec<Envelope> {
        let mut out: Vec<Envelope> = self
            .release(id, ServerEvent::PartnerDisconnected)
            .into_iter()
            .collect();
        if let Some(count) = self.registry.unregister(&id) {
            info!(%id, online = self.registry.count(), "connection unregistered");
            out.push(count);
        }
        out
    }

    /// Drop `id` from the queue and break its pairing, notifying the partner
    fn release(&mut self, id: ConnectionId, notice: ServerEvent) -> Option<Envelope> {
        self.waiting.retain(|waiting| *waiting != id);
        let partner = self.pairs.remove(&id)?;
        self.pairs.remove(&partner);
        info!(%id, %partner, "session ended");
        Some(Envelope::to(partner, notice))
    }

    /// Destination of a routed message, or `None` if it must be dropped
    fn resolve_partner(
        &self,
        from: ConnectionId,
        target: Option<ConnectionId>,
    ) -> Option<ConnectionId> {
        let Some(partner) = self.partner_of(&from) else {
            debug!(%from, "no partner, message dropped");
            return None;
        };
        match target {
            Some(target) if target != partner => {
                warn!(%from, %target, "target is not the current partner, message dropped");
                None
            }
            _ => Some(partner),
        }
    }

    #[cfg(debug_assertions)]
    fn check_invariants(&self) {
        for (a, b) in &self.pairs {
            debug_assert_ne!(a, b, "connection paired with itself");
            debug_assert_eq!(self.pairs.get(b), Some(a), "asymmetric pairing");
            debug_assert!(self.registry.contains(a), "pairing for dead connection {a}");
        }
        for (i, id) in self.waiting.iter().enumerate() {
            debug_assert!(!self.pairs.contains_key(id), "{id} both waiting and paired");
            debug_assert!(self.registry.contains(id), "dead connection {id} waiting");
            debug_assert!(!self.waiting.range(..i).any(|other| other == id), "{id} queued twice");
        }
    }

    #[cfg(not(debug_assertions))]
    fn check_invariants(&self) {}
}
