pub mod chat_log;
pub mod config;
pub mod connector;
pub mod dedup;
pub mod error;
pub mod node;
pub mod outbound;
pub mod peer_link;
pub mod peers;
pub mod registry;
pub mod router;
pub mod session;

pub use config::{NodeConfig, PeerConfig};
pub use node::{Node, NodeState};
