use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::persist::HardState;

/// Raft node role
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RaftRole {
    Follower,
    Candidate,
    Leader,
}

impl std::fmt::Display for RaftRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RaftRole::Follower => write!(f, "follower"),
            RaftRole::Candidate => write!(f, "candidate"),
            RaftRole::Leader => write!(f, "leader"),
        }
    }
}

/// A single entry in the replicated log. Commands are opaque bytes supplied
/// by the service; the engine never inspects them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub term: u64,
    pub command: Vec<u8>,
}

impl LogEntry {
    /// The permanent entry at index 0. Keeps `prev_log_index` references
    /// valid at the head of the log.
    pub fn sentinel() -> Self {
        Self {
            term: 0,
            command: Vec::new(),
        }
    }
}

/// Per-peer Raft state, all of it guarded by one mutex in `RaftNode`.
///
/// # Raft Safety Invariants
///
/// This implementation maintains the following safety guarantees:
///
/// ## Election Safety
/// At most one leader can be elected in a given term. Enforced by:
/// - Each node votes for at most one candidate per term (`voted_for`,
///   cleared only when the term advances)
/// - A candidate must receive a strict majority of votes to become leader
///
/// ## Leader Append-Only
/// A leader never overwrites or deletes entries in its log. Enforced by:
/// - Leaders only append via `append_command`
/// - Log truncation only occurs on followers, at a term-mismatched slot
///
/// ## Log Matching
/// If two logs contain an entry with the same index and term, the logs are
/// identical up through that index. Enforced by:
/// - The `AppendEntries` consistency check (prev_log_index, prev_log_term)
/// - Conflicting suffixes are truncated before appending
///
/// ## Leader Completeness
/// A committed entry is present in the log of every later leader. Enforced
/// by:
/// - The vote restriction (`is_log_up_to_date`)
/// - Leaders only count replication for entries of their own term
///   (`advance_commit_index`)
///
/// ## State Machine Safety
/// No two peers apply different commands at the same index. Follows from the
/// above plus `last_applied <= commit_index`.
#[derive(Debug)]
pub struct RaftState {
    // Persistent state
    pub current_term: u64,
    pub voted_for: Option<u64>,
    /// Log entries, 1-indexed; slot 0 holds a sentinel with term 0.
    pub log: Vec<LogEntry>,

    // Volatile state on all servers
    pub commit_index: u64,
    pub last_applied: u64,

    // Volatile state on leaders (reinitialized after election)
    pub next_index: HashMap<u64, u64>,
    pub match_index: HashMap<u64, u64>,

    // Current role
    pub role: RaftRole,

    // Most recently observed leader (if any), used to hint redirection
    pub leader_id: Option<u64>,
}

impl RaftState {
    pub fn new() -> Self {
        Self {
            current_term: 0,
            voted_for: None,
            log: vec![LogEntry::sentinel()],
            commit_index: 0,
            last_applied: 0,
            next_index: HashMap::new(),
            match_index: HashMap::new(),
            role: RaftRole::Follower,
            leader_id: None,
        }
    }

    /// Rebuild volatile defaults around a rehydrated durable tuple.
    pub fn from_hard_state(hard: HardState) -> Self {
        let mut state = Self::new();
        state.current_term = hard.current_term;
        state.voted_for = hard.voted_for;
        if !hard.log.is_empty() {
            state.log = hard.log;
        }
        state
    }

    /// The durable tuple, cloned out for the persister.
    pub fn hard_state(&self) -> HardState {
        HardState {
            current_term: self.current_term,
            voted_for: self.voted_for,
            log: self.log.clone(),
        }
    }

    /// Get the last log index (0 when only the sentinel is present)
    pub fn last_log_index(&self) -> u64 {
        (self.log.len() - 1) as u64
    }

    /// Get the term of the last log entry
    pub fn last_log_term(&self) -> u64 {
        self.log[self.log.len() - 1].term
    }

    /// Term of the entry at `index`, if the log reaches that far.
    pub fn entry_term(&self, index: u64) -> Option<u64> {
        self.log.get(index as usize).map(|e| e.term)
    }

    /// Entries from `start_index` (inclusive) to the end, copied so the
    /// caller can release the lock before sending them.
    pub fn entries_from(&self, start_index: u64) -> Vec<LogEntry> {
        let start = (start_index as usize).min(self.log.len());
        self.log[start..].to_vec()
    }

    /// Append a new command under the current term. Returns its index.
    pub fn append_command(&mut self, command: Vec<u8>) -> u64 {
        self.log.push(LogEntry {
            term: self.current_term,
            command,
        });
        self.last_log_index()
    }

    /// Check if a candidate's log is at least as up-to-date as ours:
    /// a later last term wins; equal last terms prefer the longer log.
    pub fn is_log_up_to_date(&self, last_log_index: u64, last_log_term: u64) -> bool {
        last_log_term > self.last_log_term()
            || (last_log_term == self.last_log_term() && last_log_index >= self.last_log_index())
    }

    /// Transition to follower at `term`.
    ///
    /// The vote is cleared only when the term actually advances; stepping
    /// down within the current term must not allow a second vote in it.
    pub fn become_follower(&mut self, term: u64) {
        debug_assert!(term >= self.current_term);
        if term > self.current_term {
            self.current_term = term;
            self.voted_for = None;
        }
        self.role = RaftRole::Follower;
    }

    /// Transition to candidate: new term, vote for self.
    pub fn become_candidate(&mut self, my_id: u64) {
        self.role = RaftRole::Candidate;
        self.current_term += 1;
        self.voted_for = Some(my_id);
        self.leader_id = None;
    }

    /// Transition to leader state (only reachable from candidate)
    pub fn become_leader(&mut self, my_id: u64, peer_ids: &[u64]) {
        self.role = RaftRole::Leader;
        self.leader_id = Some(my_id);

        let next = self.last_log_index() + 1;
        self.next_index.clear();
        self.match_index.clear();
        for &peer_id in peer_ids {
            self.next_index.insert(peer_id, next);
            self.match_index.insert(peer_id, 0);
        }
    }

    /// Recompute the leader's commit index from the match indices.
    ///
    /// Sorts the match indices of all peers (self counts at its own last log
    /// index) and takes the median: the highest index replicated on a
    /// majority. Only entries of the current term may be committed by
    /// replication count; earlier-term entries commit transitively.
    /// Returns true if the commit index advanced.
    pub fn advance_commit_index(&mut self) -> bool {
        let mut match_indices: Vec<u64> = self.match_index.values().copied().collect();
        match_indices.push(self.last_log_index());
        match_indices.sort_unstable();

        let majority_index = match_indices[match_indices.len() / 2];
        if majority_index > self.commit_index
            && self.entry_term(majority_index) == Some(self.current_term)
        {
            self.commit_index = majority_index;
            return true;
        }
        false
    }
}

impl Default for RaftState {
    fn default() -> Self {
        Self::new()
    }
}
