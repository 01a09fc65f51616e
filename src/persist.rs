use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::error::{RaftError, Result};
use crate::raft::state::LogEntry;

/// Stable storage for a peer's durable Raft state.
///
/// The peer calls `save_raft_state` after every mutation of term, vote, or
/// log, before the mutation can be observed in an outbound message. A save
/// failure is fatal: the peer stops participating rather than risk voting
/// twice or forgetting log entries after a crash.
pub trait Persister: Send + Sync {
    fn save_raft_state(&self, data: Vec<u8>) -> Result<()>;

    /// Returns the most recently saved state, or an empty buffer if nothing
    /// has ever been saved.
    fn read_raft_state(&self) -> Vec<u8>;
}

/// The durable tuple: everything that must survive a crash.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HardState {
    pub current_term: u64,
    pub voted_for: Option<u64>,
    pub log: Vec<LogEntry>,
}

impl HardState {
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(bincode::deserialize(bytes)?)
    }
}

/// In-memory persister. Survives a node restart within one process, which is
/// what the crash/restart tests need; a production deployment supplies a
/// disk-backed implementation instead.
#[derive(Default)]
pub struct MemoryPersister {
    state: Mutex<Vec<u8>>,
}

impl MemoryPersister {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Persister for MemoryPersister {
    fn save_raft_state(&self, data: Vec<u8>) -> Result<()> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| RaftError::Persist("persister lock poisoned".to_string()))?;
        *state = data;
        Ok(())
    }

    fn read_raft_state(&self) -> Vec<u8> {
        self.state.lock().map(|s| s.clone()).unwrap_or_default()
    }
}
