//! Runtime configuration, read from the environment

use std::path::PathBuf;
use std::time::Duration;
use tracing::warn;

/// Environment variable naming the state file. Empty selects the in-memory store.
pub const STATE_FILE_VAR: &str = "ROULETTE_STATE_FILE";

/// Environment variable holding the liveness timeout in seconds
pub const PEER_TIMEOUT_VAR: &str = "ROULETTE_PEER_TIMEOUT_SECS";

const DEFAULT_STATE_FILE: &str = "roulette_state.json";

/// A ping interval of 10s plus a 5s grace period
const DEFAULT_PEER_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayConfig {
    /// Where state is persisted between requests; `None` keeps it in memory
    pub state_file: Option<PathBuf>,
    /// Connections silent for longer than this are disconnected
    pub peer_timeout: Duration,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            state_file: Some(PathBuf::from(DEFAULT_STATE_FILE)),
            peer_timeout: DEFAULT_PEER_TIMEOUT,
        }
    }
}

impl RelayConfig {
    /// Configuration kept entirely in memory
    pub fn in_memory() -> Self {
        Self {
            state_file: None,
            ..Self::default()
        }
    }

    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(path) = lookup(STATE_FILE_VAR) {
            config.state_file = (!path.is_empty()).then(|| PathBuf::from(path));
        }

        if let Some(raw) = lookup(PEER_TIMEOUT_VAR) {
            match raw.trim().parse::<u64>() {
                Ok(secs) if secs > 0 => config.peer_timeout = Duration::from_secs(secs),
                _ => warn!(value = %raw, "invalid {PEER_TIMEOUT_VAR}, using default"),
            }
        }

        config
    }
}
