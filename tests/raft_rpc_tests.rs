//! Handler-level tests for the RequestVote and AppendEntries receivers.

use raft_lite::raft::rpc::{
    handle_append_entries, handle_request_vote, AppendEntriesRequest, VoteRequest,
};
use raft_lite::{LogEntry, RaftRole, RaftState};

fn entry(term: u64, command: &[u8]) -> LogEntry {
    LogEntry {
        term,
        command: command.to_vec(),
    }
}

fn vote_request(term: u64, candidate_id: u64, last_index: u64, last_term: u64) -> VoteRequest {
    VoteRequest {
        term,
        candidate_id,
        last_log_index: last_index,
        last_log_term: last_term,
    }
}

fn append_request(
    term: u64,
    prev_index: u64,
    prev_term: u64,
    entries: Vec<LogEntry>,
    leader_commit: u64,
) -> AppendEntriesRequest {
    AppendEntriesRequest {
        term,
        leader_id: 2,
        prev_log_index: prev_index,
        prev_log_term: prev_term,
        entries,
        leader_commit,
    }
}

#[test]
fn test_request_vote_grant_vote() {
    let mut state = RaftState::new();
    state.current_term = 1;

    let resp = handle_request_vote(&mut state, &vote_request(2, 2, 0, 0), 1);

    assert!(resp.vote_granted);
    assert_eq!(resp.term, 2);
    assert_eq!(state.voted_for, Some(2));
    assert_eq!(state.current_term, 2);
}

#[test]
fn test_request_vote_reject_stale_term() {
    let mut state = RaftState::new();
    state.current_term = 5;

    let resp = handle_request_vote(&mut state, &vote_request(3, 2, 0, 0), 1);

    assert!(!resp.vote_granted);
    assert_eq!(resp.term, 5);
}

#[test]
fn test_request_vote_reject_already_voted() {
    let mut state = RaftState::new();
    state.current_term = 2;
    state.voted_for = Some(3);

    let resp = handle_request_vote(&mut state, &vote_request(2, 2, 0, 0), 1);

    assert!(!resp.vote_granted);
    assert_eq!(state.voted_for, Some(3));
}

#[test]
fn test_request_vote_regrant_same_candidate() {
    let mut state = RaftState::new();
    state.current_term = 2;
    state.voted_for = Some(2);

    // A duplicate request from the candidate we voted for succeeds again.
    let resp = handle_request_vote(&mut state, &vote_request(2, 2, 0, 0), 1);

    assert!(resp.vote_granted);
    assert_eq!(state.voted_for, Some(2));
}

#[test]
fn test_request_vote_reject_outdated_log() {
    let mut state = RaftState::new();
    state.current_term = 2;
    state.log.push(entry(2, b"a"));

    // Candidate's log ends at term 0, ours at term 2.
    let resp = handle_request_vote(&mut state, &vote_request(3, 2, 0, 0), 1);
    assert!(!resp.vote_granted);

    // Same last term but shorter log also loses.
    let resp = handle_request_vote(&mut state, &vote_request(3, 2, 0, 2), 1);
    assert!(!resp.vote_granted);

    // The term still advanced via the request.
    assert_eq!(state.current_term, 3);
    assert_eq!(state.voted_for, None);
}

#[test]
fn test_request_vote_higher_term_clears_stale_vote() {
    let mut state = RaftState::new();
    state.current_term = 2;
    state.voted_for = Some(3);

    // A new term means a fresh vote.
    let resp = handle_request_vote(&mut state, &vote_request(3, 2, 0, 0), 1);

    assert!(resp.vote_granted);
    assert_eq!(state.current_term, 3);
    assert_eq!(state.voted_for, Some(2));
}

#[test]
fn test_append_entries_heartbeat() {
    let mut state = RaftState::new();
    state.current_term = 1;

    let resp = handle_append_entries(&mut state, &append_request(1, 0, 0, vec![], 0), 1);

    assert!(resp.success);
    assert_eq!(resp.term, 1);
    assert_eq!(state.leader_id, Some(2));
}

#[test]
fn test_append_entries_reject_stale_term() {
    let mut state = RaftState::new();
    state.current_term = 5;

    let resp = handle_append_entries(&mut state, &append_request(3, 0, 0, vec![], 0), 1);

    assert!(!resp.success);
    assert_eq!(resp.term, 5);
    assert_eq!(state.leader_id, None);
}

#[test]
fn test_append_entries_reject_missing_prev_entry() {
    let mut state = RaftState::new();
    state.current_term = 1;

    // Leader thinks we hold up to index 3; we hold nothing.
    let resp = handle_append_entries(&mut state, &append_request(1, 3, 1, vec![entry(1, b"d")], 0), 1);

    assert!(!resp.success);
    assert_eq!(state.last_log_index(), 0);
}

#[test]
fn test_append_entries_reject_prev_term_mismatch() {
    let mut state = RaftState::new();
    state.current_term = 3;
    state.log.push(entry(1, b"a"));

    let resp = handle_append_entries(&mut state, &append_request(3, 1, 2, vec![entry(3, b"b")], 0), 1);

    assert!(!resp.success);
    // The mismatched entry is not removed here; reconciliation happens when
    // the leader retries from an earlier index.
    assert_eq!(state.last_log_index(), 1);
}

#[test]
fn test_append_entries_appends_and_commits() {
    let mut state = RaftState::new();
    state.current_term = 1;

    let entries = vec![entry(1, b"a"), entry(1, b"b")];
    let resp = handle_append_entries(&mut state, &append_request(1, 0, 0, entries, 1), 1);

    assert!(resp.success);
    assert_eq!(state.last_log_index(), 2);
    assert_eq!(state.commit_index, 1);
}

#[test]
fn test_append_entries_commit_clamped_to_log_end() {
    let mut state = RaftState::new();
    state.current_term = 1;

    // Leader has committed far ahead of what it sent us.
    let resp = handle_append_entries(&mut state, &append_request(1, 0, 0, vec![entry(1, b"a")], 10), 1);

    assert!(resp.success);
    assert_eq!(state.commit_index, 1);
}

#[test]
fn test_append_entries_candidate_steps_down_keeping_vote() {
    let mut state = RaftState::new();
    state.become_candidate(1); // term 1, voted for self

    let resp = handle_append_entries(&mut state, &append_request(1, 0, 0, vec![], 0), 1);

    assert!(resp.success);
    assert_eq!(state.role, RaftRole::Follower);
    // Stepping down within the term must not free the vote for reuse.
    assert_eq!(state.voted_for, Some(1));
}

#[test]
fn test_append_entries_overwrites_conflicting_suffix() {
    let mut state = RaftState::new();
    state.current_term = 2;
    state.log.push(entry(1, b"a"));
    state.log.push(entry(1, b"uncommitted"));

    // The new leader's log has a different entry at index 2.
    let resp = handle_append_entries(
        &mut state,
        &append_request(2, 1, 1, vec![entry(2, b"winner")], 0),
        1,
    );

    assert!(resp.success);
    assert_eq!(state.last_log_index(), 2);
    assert_eq!(state.log[2].term, 2);
    assert_eq!(state.log[2].command, b"winner".to_vec());
}

#[test]
fn test_append_entries_duplicate_delivery_is_idempotent() {
    let mut state = RaftState::new();
    state.current_term = 1;

    let req = append_request(1, 0, 0, vec![entry(1, b"a"), entry(1, b"b")], 0);
    assert!(handle_append_entries(&mut state, &req, 1).success);
    assert!(handle_append_entries(&mut state, &req, 1).success);

    assert_eq!(state.last_log_index(), 2);
}
