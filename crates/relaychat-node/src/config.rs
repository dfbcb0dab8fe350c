use crate::error::ConfigError;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(2);
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_OUTBOUND_QUEUE: usize = 256;

/// A peer node this node keeps an outbound link to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerConfig {
    pub id: String,
    pub host: String,
    pub port: u16,
}

impl PeerConfig {
    pub fn new(id: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        Self {
            id: id.into(),
            host: host.into(),
            port,
        }
    }

    /// `host:port`, suitable for `TcpStream::connect`.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl fmt::Display for PeerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}:{}", self.id, self.host, self.port)
    }
}

/// Parses `ID=HOST:PORT`, e.g. `B=127.0.0.1:5002`.
impl FromStr for PeerConfig {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ConfigError::InvalidPeer(s.to_string());
        let (id, addr) = s.split_once('=').ok_or_else(invalid)?;
        let (host, port) = addr.rsplit_once(':').ok_or_else(invalid)?;
        let port: u16 = port.parse().map_err(|_| invalid())?;
        if id.is_empty() || host.is_empty() {
            return Err(invalid());
        }
        Ok(Self::new(id, host, port))
    }
}

/// Peers file entry: `["B", "127.0.0.1", 5002]`.
#[derive(Deserialize)]
struct PeerTuple(String, String, u16);

/// Load a JSON peers file: `[["B","127.0.0.1",5002], ["C","127.0.0.1",5003]]`.
pub fn load_peers_file(path: &Path) -> Result<Vec<PeerConfig>> {
    let data = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read peers file {}", path.display()))?;
    let tuples: Vec<PeerTuple> = serde_json::from_str(&data)
        .with_context(|| format!("invalid peers file {}", path.display()))?;
    Ok(tuples
        .into_iter()
        .map(|PeerTuple(id, host, port)| PeerConfig { id, host, port })
        .collect())
}

/// Everything a node needs at startup.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub node_id: String,
    /// Address to bind, e.g. `0.0.0.0:5001`.
    pub listen: String,
    pub peers: Vec<PeerConfig>,
    /// Shared chat log (may be shared with other node processes).
    pub log_path: PathBuf,
    /// Pause between peer connection attempts.
    pub retry_delay: Duration,
    pub connect_timeout: Duration,
    /// Per-connection outbound queue length. A recipient whose queue is full
    /// is dropped rather than stalling broadcasts.
    pub outbound_queue: usize,
    /// Bound on remembered relay fingerprints; `None` remembers all of them.
    pub dedup_capacity: Option<usize>,
}

impl NodeConfig {
    pub fn new(
        node_id: impl Into<String>,
        listen: impl Into<String>,
        log_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            node_id: node_id.into(),
            listen: listen.into(),
            peers: Vec::new(),
            log_path: log_path.into(),
            retry_delay: DEFAULT_RETRY_DELAY,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            outbound_queue: DEFAULT_OUTBOUND_QUEUE,
            dedup_capacity: None,
        }
    }

    pub fn with_peer(mut self, peer: PeerConfig) -> Self {
        self.peers.push(peer);
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.node_id.trim().is_empty() {
            return Err(ConfigError::EmptyNodeId);
        }
        if self.outbound_queue == 0 {
            return Err(ConfigError::ZeroQueue);
        }
        let mut seen = HashSet::new();
        for peer in &self.peers {
            if peer.id == self.node_id {
                return Err(ConfigError::SelfPeer(peer.id.clone()));
            }
            if !seen.insert(peer.id.as_str()) {
                return Err(ConfigError::DuplicatePeer(peer.id.clone()));
            }
        }
        Ok(())
    }
}
