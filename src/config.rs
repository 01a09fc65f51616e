/// Timing configuration for a Raft peer.
///
/// The election timeout must comfortably exceed the heartbeat interval, or
/// followers will start elections while the leader is still healthy.
#[derive(Debug, Clone)]
pub struct RaftConfig {
    pub election_timeout_min_ms: u64,
    pub election_timeout_max_ms: u64,
    pub heartbeat_interval_ms: u64,
}

impl Default for RaftConfig {
    fn default() -> Self {
        Self {
            election_timeout_min_ms: 300,
            election_timeout_max_ms: 400,
            heartbeat_interval_ms: 100,
        }
    }
}

impl RaftConfig {
    pub fn new(election_min_ms: u64, election_max_ms: u64, heartbeat_ms: u64) -> Self {
        Self {
            election_timeout_min_ms: election_min_ms,
            election_timeout_max_ms: election_max_ms,
            heartbeat_interval_ms: heartbeat_ms,
        }
    }

    /// Shorter timeouts for tests, keeping the same heartbeat/election ratio.
    pub fn fast() -> Self {
        Self {
            election_timeout_min_ms: 100,
            election_timeout_max_ms: 200,
            heartbeat_interval_ms: 25,
        }
    }
}
