use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex, Notify};
use tokio::time::{sleep, Duration};
use tokio_util::sync::CancellationToken;

use crate::config::RaftConfig;
use crate::error::{RaftError, Result};
use crate::persist::{HardState, Persister};
use crate::raft::rpc::{
    self, AppendEntriesRequest, AppendEntriesResponse, VoteRequest, VoteResponse,
};
use crate::raft::state::{RaftRole, RaftState};
use crate::raft::timer::random_election_timeout;
use crate::transport::RaftTransport;

/// A committed command delivered to the collocated state-machine service.
///
/// Messages arrive in strictly increasing `command_index` order starting at
/// 1, with no gaps. `command_valid` is always true today; false is reserved
/// for future control messages on the same channel.
#[derive(Debug, Clone)]
pub struct ApplyMsg {
    pub command_valid: bool,
    pub command: Vec<u8>,
    pub command_index: u64,
}

/// A single Raft peer: leader election, log replication, commit advancement,
/// and an ordered apply stream.
///
/// All consensus state sits behind one mutex. The lock is never held across
/// an outbound RPC or an apply-channel send; every reply handler revalidates
/// `(role, term)` under the lock before touching anything.
pub struct RaftNode {
    pub id: u64,
    pub state: Mutex<RaftState>,
    /// The other members of the cluster, by id. Fixed for the peer's life.
    peers: Vec<u64>,
    config: RaftConfig,
    transport: Arc<dyn RaftTransport>,
    persister: Arc<dyn Persister>,
    apply_tx: mpsc::Sender<ApplyMsg>,
    // Coalescing wakeups: repeated signals between ticker iterations
    // collapse into one stored permit.
    heartbeat_seen: Notify,
    vote_granted: Notify,
    apply_notify: Notify,
    shutdown: CancellationToken,
}

impl RaftNode {
    /// Create a peer, rehydrating durable state from the persister.
    ///
    /// The peer starts as a follower and does nothing until `spawn` starts
    /// its background tasks.
    pub fn new(
        id: u64,
        peers: Vec<u64>,
        config: RaftConfig,
        transport: Arc<dyn RaftTransport>,
        persister: Arc<dyn Persister>,
        apply_tx: mpsc::Sender<ApplyMsg>,
    ) -> Result<Arc<Self>> {
        let saved = persister.read_raft_state();
        let state = if saved.is_empty() {
            RaftState::new()
        } else {
            let hard = HardState::from_bytes(&saved)?;
            tracing::info!(
                node_id = id,
                term = hard.current_term,
                log_len = hard.log.len(),
                "Restored persisted state"
            );
            RaftState::from_hard_state(hard)
        };

        Ok(Arc::new(Self {
            id,
            state: Mutex::new(state),
            peers,
            config,
            transport,
            persister,
            apply_tx,
            heartbeat_seen: Notify::new(),
            vote_granted: Notify::new(),
            apply_notify: Notify::new(),
            shutdown: CancellationToken::new(),
        }))
    }

    /// Start the ticker and applier tasks.
    pub fn spawn(self: &Arc<Self>) {
        let node = Arc::clone(self);
        tokio::spawn(async move { node.run_ticker().await });
        let node = Arc::clone(self);
        tokio::spawn(async move { node.run_applier().await });
    }

    /// Current `(term, is_leader)` as one consistent snapshot.
    pub async fn get_state(&self) -> (u64, bool) {
        let state = self.state.lock().await;
        (state.current_term, state.role == RaftRole::Leader)
    }

    pub async fn is_leader(&self) -> bool {
        self.state.lock().await.role == RaftRole::Leader
    }

    pub async fn current_term(&self) -> u64 {
        self.state.lock().await.current_term
    }

    /// The most recently observed leader, if any.
    pub async fn leader_id(&self) -> Option<u64> {
        let state = self.state.lock().await;
        if state.role == RaftRole::Leader {
            Some(self.id)
        } else {
            state.leader_id
        }
    }

    /// Submit a command for replication.
    ///
    /// On the leader, appends the command, kicks off a replication round,
    /// and returns `(index, term)` immediately; commitment is reported
    /// through the apply stream, not the return value. Followers answer
    /// `NotLeader` with a redirection hint.
    pub async fn start(self: &Arc<Self>, command: Vec<u8>) -> Result<(u64, u64)> {
        if self.shutdown.is_cancelled() {
            return Err(RaftError::Stopped);
        }
        let mut state = self.state.lock().await;
        if state.role != RaftRole::Leader {
            return Err(RaftError::NotLeader(state.leader_id));
        }

        let index = state.append_command(command);
        let term = state.current_term;
        self.persist_locked(&state);
        tracing::debug!(node_id = self.id, index, term, "Appended command to log");

        if self.peers.is_empty() {
            // Single-node cluster: nothing to replicate to.
            if state.advance_commit_index() {
                self.apply_notify.notify_one();
            }
        }
        drop(state);

        self.broadcast_append_entries();
        Ok((index, term))
    }

    /// Stop issuing new work. In-flight reply handlers may still complete.
    pub fn kill(&self) {
        self.shutdown.cancel();
    }

    pub fn is_killed(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Handle an incoming RequestVote RPC.
    pub async fn handle_vote_request(&self, req: VoteRequest) -> VoteResponse {
        let mut state = self.state.lock().await;
        let fingerprint = hard_fingerprint(&state);
        let resp = rpc::handle_request_vote(&mut state, &req, self.id);
        if hard_fingerprint(&state) != fingerprint {
            self.persist_locked(&state);
        }
        drop(state);

        if resp.vote_granted {
            // Granting a vote postpones our own election.
            self.vote_granted.notify_one();
        }
        resp
    }

    /// Handle an incoming AppendEntries RPC.
    pub async fn handle_append_entries(&self, req: AppendEntriesRequest) -> AppendEntriesResponse {
        let mut state = self.state.lock().await;
        let fingerprint = hard_fingerprint(&state);
        let commit_before = state.commit_index;
        let resp = rpc::handle_append_entries(&mut state, &req, self.id);
        if hard_fingerprint(&state) != fingerprint {
            self.persist_locked(&state);
        }
        let commit_advanced = state.commit_index > commit_before;
        drop(state);

        if resp.term == req.term {
            // A valid-term AppendEntries suppresses elections even when the
            // log consistency check fails.
            self.heartbeat_seen.notify_one();
        }
        if commit_advanced {
            self.apply_notify.notify_one();
        }
        resp
    }

    /// The control loop: election timeouts for non-leaders, heartbeats for
    /// the leader.
    async fn run_ticker(self: Arc<Self>) {
        loop {
            if self.shutdown.is_cancelled() {
                break;
            }
            let role = self.state.lock().await.role;
            match role {
                RaftRole::Leader => {
                    tokio::select! {
                        _ = self.shutdown.cancelled() => break,
                        _ = sleep(Duration::from_millis(self.config.heartbeat_interval_ms)) => {
                            self.broadcast_append_entries();
                        }
                    }
                }
                RaftRole::Follower | RaftRole::Candidate => {
                    let timeout = random_election_timeout(
                        self.config.election_timeout_min_ms,
                        self.config.election_timeout_max_ms,
                    );
                    tokio::select! {
                        _ = self.shutdown.cancelled() => break,
                        _ = self.heartbeat_seen.notified() => {}
                        _ = self.vote_granted.notified() => {}
                        _ = sleep(timeout) => {
                            tracing::debug!(node_id = self.id, "Election timeout");
                            self.start_election().await;
                        }
                    }
                }
            }
        }
    }

    /// Become candidate and fan RequestVote out to every other peer.
    async fn start_election(self: &Arc<Self>) {
        let req = {
            let mut state = self.state.lock().await;
            state.become_candidate(self.id);
            self.persist_locked(&state);
            VoteRequest {
                term: state.current_term,
                candidate_id: self.id,
                last_log_index: state.last_log_index(),
                last_log_term: state.last_log_term(),
            }
        };

        tracing::info!(node_id = self.id, term = req.term, "Starting election");

        if self.peers.is_empty() {
            // The self-vote is already a majority.
            let mut state = self.state.lock().await;
            if state.role == RaftRole::Candidate && state.current_term == req.term {
                state.become_leader(self.id, &self.peers);
                tracing::info!(node_id = self.id, term = req.term, "Became leader");
            }
            return;
        }

        let votes = Arc::new(AtomicU64::new(1)); // self-vote
        let total = self.peers.len() as u64 + 1;

        for &peer_id in &self.peers {
            let node = Arc::clone(self);
            let votes = Arc::clone(&votes);
            let req = req.clone();
            tokio::spawn(async move {
                let resp = match node.transport.request_vote(peer_id, req.clone()).await {
                    Ok(resp) => resp,
                    Err(e) => {
                        tracing::trace!(node_id = node.id, peer_id, error = %e, "Vote request failed");
                        return;
                    }
                };
                node.handle_vote_reply(peer_id, req.term, resp, votes, total).await;
            });
        }
    }

    async fn handle_vote_reply(
        self: &Arc<Self>,
        peer_id: u64,
        election_term: u64,
        resp: VoteResponse,
        votes: Arc<AtomicU64>,
        total: u64,
    ) {
        let mut state = self.state.lock().await;
        if resp.term > state.current_term {
            state.become_follower(resp.term);
            self.persist_locked(&state);
            return;
        }
        if state.role != RaftRole::Candidate || state.current_term != election_term {
            // Election superseded; once a reply promotes us this guard also
            // stops later replies from re-firing the heartbeat burst.
            return;
        }
        if !resp.vote_granted {
            return;
        }

        let tally = votes.fetch_add(1, Ordering::SeqCst) + 1;
        tracing::debug!(node_id = self.id, peer_id, votes = tally, "Received vote");
        if tally > total / 2 {
            state.become_leader(self.id, &self.peers);
            tracing::info!(
                node_id = self.id,
                term = election_term,
                votes = tally,
                "Became leader"
            );
            drop(state);
            // Wake the ticker into the leader arm and announce leadership.
            self.vote_granted.notify_one();
            self.broadcast_append_entries();
        }
    }

    /// One replication round: a task per follower. Empty entry batches
    /// double as heartbeats.
    fn broadcast_append_entries(self: &Arc<Self>) {
        for &peer_id in &self.peers {
            let node = Arc::clone(self);
            tokio::spawn(async move { node.replicate_to_peer(peer_id).await });
        }
    }

    /// Advance one follower, backing `next_index` off on mismatch and
    /// retrying until the logs agree or the round is superseded.
    async fn replicate_to_peer(self: Arc<Self>, peer_id: u64) {
        loop {
            let req = {
                let state = self.state.lock().await;
                if state.role != RaftRole::Leader || self.shutdown.is_cancelled() {
                    return;
                }
                let next = state.next_index.get(&peer_id).copied().unwrap_or(1);
                let prev_log_index = next - 1;
                let prev_log_term = match state.entry_term(prev_log_index) {
                    Some(term) => term,
                    None => return,
                };
                AppendEntriesRequest {
                    term: state.current_term,
                    leader_id: self.id,
                    prev_log_index,
                    prev_log_term,
                    entries: state.entries_from(next),
                    leader_commit: state.commit_index,
                }
            };

            let resp = match self.transport.append_entries(peer_id, req.clone()).await {
                Ok(resp) => resp,
                Err(e) => {
                    // Dropped or dead peer; the next heartbeat tick retries.
                    tracing::trace!(node_id = self.id, peer_id, error = %e, "AppendEntries failed");
                    return;
                }
            };

            let mut state = self.state.lock().await;
            if resp.term > state.current_term {
                state.become_follower(resp.term);
                self.persist_locked(&state);
                return;
            }
            if state.role != RaftRole::Leader || state.current_term != req.term {
                return; // superseded by a newer term or demotion
            }

            if resp.success {
                let match_idx = req.prev_log_index + req.entries.len() as u64;
                state.match_index.insert(peer_id, match_idx);
                state.next_index.insert(peer_id, match_idx + 1);
                if state.advance_commit_index() {
                    tracing::debug!(
                        node_id = self.id,
                        commit_index = state.commit_index,
                        "Advanced commit index"
                    );
                    self.apply_notify.notify_one();
                }
                return;
            }

            // Log mismatch: step the follower's next_index back one slot
            // (never past the sentinel) and retry within this round.
            let next = state.next_index.get(&peer_id).copied().unwrap_or(1);
            state.next_index.insert(peer_id, next.saturating_sub(1).max(1));
        }
    }

    /// Drain committed-but-unapplied entries to the apply channel in index
    /// order. The state lock is released around every send, so a slow
    /// consumer stalls applies but never RPC handling.
    async fn run_applier(self: Arc<Self>) {
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => return,
                _ = self.apply_notify.notified() => {}
            }
            loop {
                let msg = {
                    let mut state = self.state.lock().await;
                    if state.last_applied < state.commit_index {
                        state.last_applied += 1;
                        let entry = &state.log[state.last_applied as usize];
                        Some(ApplyMsg {
                            command_valid: true,
                            command: entry.command.clone(),
                            command_index: state.last_applied,
                        })
                    } else {
                        None
                    }
                };
                match msg {
                    Some(msg) => {
                        if self.apply_tx.send(msg).await.is_err() {
                            return; // consumer dropped the receiver
                        }
                    }
                    None => break,
                }
            }
        }
    }

    /// Flush the durable tuple. Must be called (under the lock) after every
    /// term, vote, or log mutation, before the lock is released. A persister
    /// failure stops the node: continuing could double-vote after a crash.
    fn persist_locked(&self, state: &RaftState) {
        let result = state
            .hard_state()
            .to_bytes()
            .and_then(|bytes| self.persister.save_raft_state(bytes));
        if let Err(e) = result {
            tracing::error!(node_id = self.id, error = %e, "Failed to persist state, stopping node");
            self.shutdown.cancel();
        }
    }
}

/// Change detector for the durable tuple. Within one term a log suffix
/// cannot change without changing its length or last term, so this
/// quadruple is sufficient.
fn hard_fingerprint(state: &RaftState) -> (u64, Option<u64>, u64, u64) {
    (
        state.current_term,
        state.voted_for,
        state.last_log_index(),
        state.last_log_term(),
    )
}
