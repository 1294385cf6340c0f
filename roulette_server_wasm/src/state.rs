//! Server state management for the signaling relay
//!
//! This module wraps the [`Matchmaker`] with per-connection mailboxes and
//! liveness tracking. Under `wasmtime serve` every request may run in a fresh
//! instance, so state is persisted to a JSON file between requests unless the
//! relay is configured to keep it in memory. Instances may run concurrently,
//! so every load/apply/save cycle holds an exclusive lock file next to the
//! state file, and saves go through a rename so readers never see a partial
//! write.

use crate::config::RelayConfig;
use crate::error::SignalingError;
use crate::matchmaker::{Inbound, Matchmaker};
use crate::protocol::{ClientRequest, ConnectionId, Envelope, Recipient, ServerEvent};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::ffi::OsString;
use std::fs::OpenOptions;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tracing::{debug, info, warn};

/// How long a request waits for another instance to release the state file
const LOCK_WAIT: Duration = Duration::from_secs(2);

const LOCK_RETRY: Duration = Duration::from_millis(2);

/// A lock file older than this was left behind by a crashed instance
const STALE_LOCK: Duration = Duration::from_secs(10);

/// `<state file><suffix>`, next to the state file
fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(suffix);
    PathBuf::from(name)
}

/// Exclusive ownership of the state file, released on drop
///
/// Exclusive creation of the lock file is the one primitive available both
/// natively and under WASI, where there is no `flock`.
#[derive(Debug)]
struct StateFileLock {
    path: PathBuf,
}

impl StateFileLock {
    fn acquire(state_file: &Path) -> Result<Self, SignalingError> {
        let path = sibling(state_file, ".lock");
        let started = Instant::now();
        loop {
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(_) => return Ok(Self { path }),
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    if Self::is_stale(&path) {
                        warn!(?path, "breaking stale state lock");
                        let _ = std::fs::remove_file(&path);
                        continue;
                    }
                    if started.elapsed() >= LOCK_WAIT {
                        return Err(SignalingError::StateLocked);
                    }
                    std::thread::sleep(LOCK_RETRY);
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn is_stale(path: &Path) -> bool {
        std::fs::metadata(path)
            .and_then(|meta| meta.modified())
            .ok()
            .and_then(|modified| modified.elapsed().ok())
            .is_some_and(|age| age > STALE_LOCK)
    }
}

impl Drop for StateFileLock {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            warn!(path = ?self.path, "failed to release state lock: {e}");
        }
    }
}

/// Pending events and liveness for one connection
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
struct Mailbox {
    events: VecDeque<ServerEvent>,
    /// Unix millis of the last poll or message
    last_seen: u64,
}

/// Serializable state
#[derive(Default, Debug, Clone, Serialize, Deserialize)]
struct InnerState {
    matchmaker: Matchmaker,
    mailboxes: HashMap<ConnectionId, Mailbox>,
}

impl InnerState {
    /// Load state from file, or create default if it is missing or unreadable
    fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => serde_json::from_str(&contents).unwrap_or_else(|e| {
                warn!(?path, "discarding unreadable state file: {e}");
                Self::default()
            }),
            Err(_) => Self::default(),
        }
    }

    /// Save state to file, replacing it in one rename
    fn save(&self, path: &Path) -> Result<(), SignalingError> {
        let json = serde_json::to_string(self)?;
        let staging = sibling(path, ".tmp");
        std::fs::write(&staging, json)?;
        std::fs::rename(&staging, path)?;
        Ok(())
    }

    fn connect(&mut self, now: u64) -> ConnectionId {
        let id = ConnectionId::new();
        let mailbox = Mailbox {
            events: VecDeque::from([ServerEvent::IdAssigned(id)]),
            last_seen: now,
        };
        self.mailboxes.insert(id, mailbox);
        self.apply(Inbound::Connect(id));
        id
    }

    fn disconnect(&mut self, id: ConnectionId) {
        self.apply(Inbound::Disconnect(id));
        self.mailboxes.remove(&id);
    }

    fn apply(&mut self, event: Inbound) {
        let envelopes = self.matchmaker.dispatch(event);
        self.deliver(envelopes);
    }

    fn deliver(&mut self, envelopes: Vec<Envelope>) {
        for Envelope { to, event } in envelopes {
            match to {
                Recipient::Connection(id) => match self.mailboxes.get_mut(&id) {
                    Some(mailbox) => mailbox.events.push_back(event),
                    None => debug!(%id, "recipient gone, event dropped"),
                },
                Recipient::Everyone => {
                    for id in self.matchmaker.registry().ids() {
                        if let Some(mailbox) = self.mailboxes.get_mut(id) {
                            mailbox.events.push_back(event.clone());
                        }
                    }
                }
            }
        }
    }

    /// Mark a live connection as seen. Returns false if it is not live.
    fn touch(&mut self, id: &ConnectionId, now: u64) -> bool {
        match self.mailboxes.get_mut(id) {
            Some(mailbox) if self.matchmaker.registry().contains(id) => {
                mailbox.last_seen = now;
                true
            }
            _ => false,
        }
    }

    /// Disconnect every connection silent for longer than `timeout_ms`
    fn reap(&mut self, now: u64, timeout_ms: u64) {
        let stale: Vec<ConnectionId> = self
            .mailboxes
            .iter()
            .filter(|(_, mailbox)| now.saturating_sub(mailbox.last_seen) > timeout_ms)
            .map(|(id, _)| *id)
            .collect();
        for id in stale {
            info!(%id, "connection timed out");
            self.disconnect(id);
        }
    }
}

/// Where the state lives between requests
#[derive(Debug, Clone)]
enum Store {
    File(PathBuf),
    Memory(Arc<Mutex<InnerState>>),
}

/// The main server state handle
#[derive(Debug, Clone)]
pub struct ServerState {
    store: Store,
    timeout_ms: u64,
}

impl Default for ServerState {
    fn default() -> Self {
        Self::new(&RelayConfig::default())
    }
}

impl ServerState {
    /// Create a new server state handle
    pub fn new(config: &RelayConfig) -> Self {
        let store = match &config.state_file {
            Some(path) => Store::File(path.clone()),
            None => Store::Memory(Arc::default()),
        };
        Self {
            store,
            timeout_ms: u64::try_from(config.peer_timeout.as_millis()).unwrap_or(u64::MAX),
        }
    }

    /// Run `f` against the state, holding it exclusively for the duration
    fn with_state<R>(
        &self,
        now: u64,
        f: impl FnOnce(&mut InnerState) -> R,
    ) -> Result<R, SignalingError> {
        match &self.store {
            Store::File(path) => {
                let _lock = StateFileLock::acquire(path)?;
                let mut state = InnerState::load(path);
                state.reap(now, self.timeout_ms);
                let result = f(&mut state);
                state.save(path)?;
                Ok(result)
            }
            Store::Memory(shared) => {
                let mut state = shared.lock().unwrap_or_else(PoisonError::into_inner);
                state.reap(now, self.timeout_ms);
                Ok(f(&mut *state))
            }
        }
    }

    /// Connect a new peer or poll for events
    ///
    /// If `peer_id` is `None` or no longer live, a new connection is
    /// registered. Returns the peer's id and its drained events.
    pub fn connect_or_poll(
        &self,
        peer_id: Option<ConnectionId>,
    ) -> Result<(ConnectionId, Vec<ServerEvent>), SignalingError> {
        self.connect_or_poll_at(peer_id, now_millis())
    }

    fn connect_or_poll_at(
        &self,
        peer_id: Option<ConnectionId>,
        now: u64,
    ) -> Result<(ConnectionId, Vec<ServerEvent>), SignalingError> {
        self.with_state(now, |state| {
            let id = match peer_id {
                Some(id) if state.touch(&id, now) => id,
                _ => state.connect(now),
            };
            let events = state
                .mailboxes
                .get_mut(&id)
                .map(|mailbox| mailbox.events.drain(..).collect())
                .unwrap_or_default();
            (id, events)
        })
    }

    /// Handle a request from a live connection
    pub fn submit(&self, from: ConnectionId, request: ClientRequest) -> Result<(), SignalingError> {
        self.submit_at(from, request, now_millis())
    }

    fn submit_at(
        &self,
        from: ConnectionId,
        request: ClientRequest,
        now: u64,
    ) -> Result<(), SignalingError> {
        self.with_state(now, |state| {
            if !state.touch(&from, now) {
                return Err(SignalingError::UnknownPeer);
            }
            state.apply(Inbound::Request { from, request });
            Ok(())
        })?
    }

    /// Remove a connection. Safe to call more than once.
    pub fn disconnect(&self, id: ConnectionId) -> Result<(), SignalingError> {
        self.disconnect_at(id, now_millis())
    }

    fn disconnect_at(&self, id: ConnectionId, now: u64) -> Result<(), SignalingError> {
        self.with_state(now, |state| state.disconnect(id))
    }

    /// Number of live connections
    pub fn online_count(&self) -> Result<usize, SignalingError> {
        self.with_state(now_millis(), |state| state.matchmaker.registry().count())
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or_default()
}
