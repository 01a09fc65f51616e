use thiserror::Error;

#[derive(Error, Debug)]
pub enum RaftError {
    #[error("Not the leader, current leader is node {0:?}")]
    NotLeader(Option<u64>),

    #[error("Node has been stopped")]
    Stopped,

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Persister error: {0}")]
    Persist(String),

    #[error("Codec error: {0}")]
    Codec(#[from] bincode::Error),
}

pub type Result<T> = std::result::Result<T, RaftError>;
