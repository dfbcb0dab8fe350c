use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("username taken: {0}")]
    NameTaken(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("node id must not be empty")]
    EmptyNodeId,

    #[error("invalid peer {0:?}: expected ID=HOST:PORT")]
    InvalidPeer(String),

    #[error("peer {0} has the same id as this node")]
    SelfPeer(String),

    #[error("peer {0} is configured more than once")]
    DuplicatePeer(String),

    #[error("outbound queue capacity must be at least 1")]
    ZeroQueue,
}
