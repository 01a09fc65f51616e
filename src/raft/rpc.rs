use serde::{Deserialize, Serialize};

use crate::raft::state::{LogEntry, RaftRole, RaftState};

/// RequestVote RPC arguments, sent by candidates to gather votes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoteRequest {
    pub term: u64,
    pub candidate_id: u64,
    pub last_log_index: u64,
    pub last_log_term: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoteResponse {
    pub term: u64,
    pub vote_granted: bool,
}

/// AppendEntries RPC arguments, sent by the leader to replicate log entries.
/// An empty `entries` doubles as a heartbeat.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppendEntriesRequest {
    pub term: u64,
    pub leader_id: u64,
    pub prev_log_index: u64,
    pub prev_log_term: u64,
    pub entries: Vec<LogEntry>,
    pub leader_commit: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppendEntriesResponse {
    pub term: u64,
    pub success: bool,
}

/// Handle RequestVote RPC
pub fn handle_request_vote(state: &mut RaftState, req: &VoteRequest, my_id: u64) -> VoteResponse {
    // Any message carrying a higher term demotes us first.
    if req.term > state.current_term {
        state.become_follower(req.term);
    }

    let vote_granted = if req.term < state.current_term {
        false
    } else if state.voted_for.is_some() && state.voted_for != Some(req.candidate_id) {
        // Already voted for someone else in this term
        false
    } else if !state.is_log_up_to_date(req.last_log_index, req.last_log_term) {
        false
    } else {
        state.voted_for = Some(req.candidate_id);
        true
    };

    tracing::debug!(
        node_id = my_id,
        candidate = req.candidate_id,
        term = req.term,
        granted = vote_granted,
        "RequestVote response"
    );

    VoteResponse {
        term: state.current_term,
        vote_granted,
    }
}

/// Handle AppendEntries RPC
pub fn handle_append_entries(
    state: &mut RaftState,
    req: &AppendEntriesRequest,
    my_id: u64,
) -> AppendEntriesResponse {
    if req.term > state.current_term {
        state.become_follower(req.term);
    }

    // Reject if the sender's term is behind ours.
    if req.term < state.current_term {
        return AppendEntriesResponse {
            term: state.current_term,
            success: false,
        };
    }

    // Valid AppendEntries from the current leader: candidates step down.
    if state.role != RaftRole::Follower {
        state.become_follower(req.term);
    }
    state.leader_id = Some(req.leader_id);

    // Consistency check: our log must contain the leader's previous entry.
    if state.last_log_index() < req.prev_log_index
        || state.entry_term(req.prev_log_index) != Some(req.prev_log_term)
    {
        tracing::debug!(
            node_id = my_id,
            prev_log_index = req.prev_log_index,
            prev_log_term = req.prev_log_term,
            last_log_index = state.last_log_index(),
            "AppendEntries consistency check failed"
        );
        return AppendEntriesResponse {
            term: state.current_term,
            success: false,
        };
    }

    // Reconcile: walk the incoming entries against the log, truncating only
    // at a term-mismatched slot. A reordered duplicate of an earlier request
    // finds every slot matching and changes nothing, so it cannot roll back
    // entries already accepted from this leader.
    let mut idx = req.prev_log_index as usize;
    for (i, entry) in req.entries.iter().enumerate() {
        idx += 1;
        if idx >= state.log.len() {
            state.log.extend_from_slice(&req.entries[i..]);
            break;
        }
        if state.log[idx].term != entry.term {
            state.log.truncate(idx);
            state.log.extend_from_slice(&req.entries[i..]);
            break;
        }
    }

    if !req.entries.is_empty() {
        tracing::debug!(
            node_id = my_id,
            entries = req.entries.len(),
            new_last_index = state.last_log_index(),
            "Appended entries"
        );
    }

    // Follow the leader's commit index, clamped to what we actually hold.
    if req.leader_commit > state.commit_index {
        state.commit_index = std::cmp::min(req.leader_commit, state.last_log_index());
    }

    AppendEntriesResponse {
        term: state.current_term,
        success: true,
    }
}
