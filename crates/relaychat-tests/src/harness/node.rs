use super::{STEP_TIMEOUT, wait_until};
use anyhow::{Result, bail};
use relaychat_node::{Node, NodeConfig, NodeState, PeerConfig};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

/// A listening socket reserved for a node that has not started yet, so
/// peers can be configured with its address up front.
pub struct NodeSlot {
    pub id: String,
    pub addr: SocketAddr,
    listener: TcpListener,
}

impl NodeSlot {
    pub async fn bind(id: &str) -> Result<Self> {
        Self::bind_addr(id, SocketAddr::from(([127, 0, 0, 1], 0))).await
    }

    /// Bind a specific address, e.g. to bring a node back on its old port.
    pub async fn bind_addr(id: &str, addr: SocketAddr) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let addr = listener.local_addr()?;
        Ok(Self {
            id: id.to_string(),
            addr,
            listener,
        })
    }

    /// How other nodes should be configured to dial this one.
    pub fn peer_config(&self) -> PeerConfig {
        PeerConfig::new(self.id.as_str(), self.addr.ip().to_string(), self.addr.port())
    }

    /// Start the node with its own temporary chat log.
    pub async fn start(self, peers: Vec<PeerConfig>) -> Result<TestNode> {
        let log_dir = TempDir::new()?;
        let log_path = log_dir.path().join("logs").join("chat.log");
        self.start_inner(peers, log_path, Some(log_dir)).await
    }

    /// Start the node writing to `log_path`, which other nodes may share.
    pub async fn start_with_log(self, peers: Vec<PeerConfig>, log_path: &Path) -> Result<TestNode> {
        self.start_inner(peers, log_path.to_path_buf(), None).await
    }

    async fn start_inner(
        self,
        peers: Vec<PeerConfig>,
        log_path: PathBuf,
        log_dir: Option<TempDir>,
    ) -> Result<TestNode> {
        let mut config = NodeConfig::new(self.id.as_str(), self.addr.to_string(), &log_path);
        config.peers = peers;
        config.retry_delay = Duration::from_millis(100);
        config.connect_timeout = Duration::from_secs(1);

        let node = Node::with_listener(config, self.listener)?;
        let addr = node.local_addr()?;
        let state = node.state();
        let node_id = self.id;
        let task = tokio::spawn(async move {
            if let Err(e) = node.run().await {
                tracing::debug!(err = %e, "test node stopped");
            }
        });

        Ok(TestNode {
            state,
            addr,
            node_id,
            log_path,
            task,
            _log_dir: log_dir,
        })
    }
}

/// An in-process node. Dropping it aborts the node and every connection it holds.
pub struct TestNode {
    pub state: Arc<NodeState>,
    pub addr: SocketAddr,
    pub node_id: String,
    pub log_path: PathBuf,
    task: JoinHandle<()>,
    _log_dir: Option<TempDir>,
}

impl TestNode {
    /// Spawn a node with no peers.
    pub async fn spawn(id: &str) -> Result<Self> {
        NodeSlot::bind(id).await?.start(Vec::new()).await
    }

    /// Spawn one node per id, each configured to dial all the others, and
    /// wait until every node has a link to every other.
    pub async fn spawn_mesh(ids: &[&str]) -> Result<Vec<Self>> {
        let mut slots = Vec::new();
        for id in ids {
            slots.push(NodeSlot::bind(id).await?);
        }
        let configs: Vec<PeerConfig> = slots.iter().map(NodeSlot::peer_config).collect();

        let mut nodes = Vec::new();
        for slot in slots {
            let peers = configs.iter().filter(|p| p.id != slot.id).cloned().collect();
            nodes.push(slot.start(peers).await?);
        }
        for node in &nodes {
            node.wait_for_peers(ids.len() - 1).await?;
        }
        Ok(nodes)
    }

    /// Wait until this node's peer table holds at least `count` links.
    pub async fn wait_for_peers(&self, count: usize) -> Result<()> {
        if !wait_until(STEP_TIMEOUT, || self.state.peers.len() >= count).await {
            bail!(
                "node {} has peers {:?}, expected {count}",
                self.node_id,
                self.state.peers.peer_ids()
            );
        }
        Ok(())
    }

    /// Wait until `name` is (or is no longer) logged in on this node.
    pub async fn wait_for_session(&self, name: &str, present: bool) -> Result<()> {
        if !wait_until(STEP_TIMEOUT, || self.state.sessions.contains(name) == present).await {
            bail!("node {}: session {name} present != {present}", self.node_id);
        }
        Ok(())
    }

    pub fn peer_config(&self) -> PeerConfig {
        PeerConfig::new(self.node_id.as_str(), self.addr.ip().to_string(), self.addr.port())
    }
}

impl Drop for TestNode {
    fn drop(&mut self) {
        self.task.abort();
    }
}
