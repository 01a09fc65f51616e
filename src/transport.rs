use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::{RaftError, Result};
use crate::raft::node::RaftNode;
use crate::raft::rpc::{AppendEntriesRequest, AppendEntriesResponse, VoteRequest, VoteResponse};

/// Outbound RPC surface consumed by a peer.
///
/// At-most-once semantics: an `Err` may mean a dropped request, a dropped
/// reply, a timeout, or a dead peer, and the caller cannot tell which. The
/// engine discards such failures without touching its state; the next
/// replication tick retries.
#[async_trait]
pub trait RaftTransport: Send + Sync {
    async fn request_vote(&self, peer_id: u64, req: VoteRequest) -> Result<VoteResponse>;

    async fn append_entries(
        &self,
        peer_id: u64,
        req: AppendEntriesRequest,
    ) -> Result<AppendEntriesResponse>;
}

/// In-process network connecting a cluster of peers in one address space.
///
/// Delivery is direct invocation of the target's RPC handlers. Links can be
/// cut and restored to simulate partitions, and nodes deregistered to
/// simulate crashes. Used by the demo binary and the integration tests; a
/// production deployment plugs a real network stack into `RaftTransport`
/// instead.
#[derive(Default)]
pub struct LocalNetwork {
    inner: RwLock<NetworkInner>,
}

#[derive(Default)]
struct NetworkInner {
    nodes: HashMap<u64, Arc<RaftNode>>,
    /// Directed links currently down.
    cut: HashSet<(u64, u64)>,
}

impl LocalNetwork {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// The transport handle a single node sends through.
    pub fn endpoint(self: &Arc<Self>, from: u64) -> Arc<LocalEndpoint> {
        Arc::new(LocalEndpoint {
            network: Arc::clone(self),
            from,
        })
    }

    pub async fn register(&self, id: u64, node: Arc<RaftNode>) {
        self.inner.write().await.nodes.insert(id, node);
    }

    /// Remove a node from the network entirely (crash).
    pub async fn deregister(&self, id: u64) {
        self.inner.write().await.nodes.remove(&id);
    }

    /// Cut the link between two nodes, both directions.
    pub async fn disconnect(&self, a: u64, b: u64) {
        let mut inner = self.inner.write().await;
        inner.cut.insert((a, b));
        inner.cut.insert((b, a));
    }

    /// Restore the link between two nodes.
    pub async fn reconnect(&self, a: u64, b: u64) {
        let mut inner = self.inner.write().await;
        inner.cut.remove(&(a, b));
        inner.cut.remove(&(b, a));
    }

    /// Cut every link touching `id`.
    pub async fn isolate(&self, id: u64) {
        let mut inner = self.inner.write().await;
        let others: Vec<u64> = inner.nodes.keys().copied().filter(|&n| n != id).collect();
        for other in others {
            inner.cut.insert((id, other));
            inner.cut.insert((other, id));
        }
    }

    /// Restore every link touching `id`.
    pub async fn heal(&self, id: u64) {
        let mut inner = self.inner.write().await;
        inner.cut.retain(|&(a, b)| a != id && b != id);
    }

    async fn target(&self, from: u64, to: u64) -> Result<Arc<RaftNode>> {
        let inner = self.inner.read().await;
        if !inner.nodes.contains_key(&from) {
            return Err(RaftError::Transport(format!("node {from} is not on the network")));
        }
        if inner.cut.contains(&(from, to)) {
            return Err(RaftError::Transport(format!("link {from}->{to} is down")));
        }
        inner
            .nodes
            .get(&to)
            .cloned()
            .ok_or_else(|| RaftError::Transport(format!("peer {to} unreachable")))
    }
}

pub struct LocalEndpoint {
    network: Arc<LocalNetwork>,
    from: u64,
}

#[async_trait]
impl RaftTransport for LocalEndpoint {
    async fn request_vote(&self, peer_id: u64, req: VoteRequest) -> Result<VoteResponse> {
        let node = self.network.target(self.from, peer_id).await?;
        if node.is_killed() {
            return Err(RaftError::Transport(format!("peer {peer_id} is down")));
        }
        Ok(node.handle_vote_request(req).await)
    }

    async fn append_entries(
        &self,
        peer_id: u64,
        req: AppendEntriesRequest,
    ) -> Result<AppendEntriesResponse> {
        let node = self.network.target(self.from, peer_id).await?;
        if node.is_killed() {
            return Err(RaftError::Transport(format!("peer {peer_id} is down")));
        }
        Ok(node.handle_append_entries(req).await)
    }
}
