pub mod config;
pub mod error;
pub mod persist;
pub mod raft;
pub mod transport;

pub use config::RaftConfig;
pub use error::{RaftError, Result};
pub use persist::{HardState, MemoryPersister, Persister};
pub use raft::node::{ApplyMsg, RaftNode};
pub use raft::rpc::{AppendEntriesRequest, AppendEntriesResponse, VoteRequest, VoteResponse};
pub use raft::state::{LogEntry, RaftRole, RaftState};
pub use transport::{LocalNetwork, RaftTransport};
