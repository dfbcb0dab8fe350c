use crate::chat_log::ChatLog;
use crate::config::{NodeConfig, PeerConfig};
use crate::dedup::RelayDeduplicator;
use crate::peers::PeerTable;
use crate::registry::SessionRegistry;
use crate::{connector, router};
use anyhow::{Context, Result};
use relaychat::protocol::{ChatRecord, Event, Message, RelayPacket};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinSet;

/// State shared by every connection task of one node.
pub struct NodeState {
    pub node_id: String,
    pub sessions: SessionRegistry,
    pub peers: PeerTable,
    pub seen: RelayDeduplicator,
    pub log: ChatLog,
    pub retry_delay: Duration,
    pub connect_timeout: Duration,
    pub outbound_queue: usize,
}

impl NodeState {
    pub fn new(config: &NodeConfig) -> Result<Arc<Self>> {
        let log = ChatLog::open(&config.log_path)?;
        Ok(Arc::new(Self {
            node_id: config.node_id.clone(),
            sessions: SessionRegistry::new(),
            peers: PeerTable::new(),
            seen: RelayDeduplicator::with_capacity(config.dedup_capacity),
            log,
            retry_delay: config.retry_delay,
            connect_timeout: config.connect_timeout,
            outbound_queue: config.outbound_queue,
        }))
    }

    /// Publish a chat line written by a local client: local broadcast
    /// (sender included), relay to every peer, log.
    pub fn publish_local(&self, record: ChatRecord) {
        // Remember our own lines so an echo from a peer is not shown twice.
        self.seen.should_process(record.fingerprint());
        self.sessions.broadcast(&Event::Msg(record.clone()), None);
        let relayed = self
            .peers
            .broadcast_all(&Message::RelayMsg(RelayPacket::from(&record)));
        tracing::debug!(from = %record.from, peers = relayed, "chat line published");
        self.log.append(record);
    }

    /// Accept a chat line relayed by a peer. Returns false if it was already seen.
    pub fn accept_relay(&self, packet: RelayPacket) -> bool {
        if !self.seen.should_process(packet.fingerprint()) {
            tracing::debug!(origin = %packet.origin_server, from = %packet.from, "duplicate relay ignored");
            return false;
        }
        let record = ChatRecord::from(packet);
        self.sessions.broadcast(&Event::Msg(record.clone()), None);
        self.log.append(record);
        true
    }
}

/// A bound chat node: listening socket plus the peers it should dial.
pub struct Node {
    state: Arc<NodeState>,
    listener: TcpListener,
    peers: Vec<PeerConfig>,
}

impl Node {
    /// Validate `config`, open the chat log and bind the listening socket.
    pub async fn bind(config: NodeConfig) -> Result<Self> {
        config.validate()?;
        let listener = TcpListener::bind(&config.listen)
            .await
            .with_context(|| format!("failed to bind {}", config.listen))?;
        Self::assemble(config, listener)
    }

    /// Like [`bind`](Self::bind) but with an already-bound listener. `config.listen` is ignored.
    pub fn with_listener(config: NodeConfig, listener: TcpListener) -> Result<Self> {
        config.validate()?;
        Self::assemble(config, listener)
    }

    fn assemble(config: NodeConfig, listener: TcpListener) -> Result<Self> {
        let state = NodeState::new(&config)?;
        Ok(Self {
            state,
            listener,
            peers: config.peers,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn state(&self) -> Arc<NodeState> {
        self.state.clone()
    }

    /// Dial every configured peer and serve connections until the future is
    /// dropped. Dropping it aborts every connection and connector task.
    pub async fn run(self) -> Result<()> {
        let Self {
            state,
            listener,
            peers,
        } = self;

        tracing::info!(
            node_id = %state.node_id,
            addr = %listener.local_addr()?,
            peers = peers.len(),
            log = %state.log.path().display(),
            "node listening"
        );

        let mut tasks = JoinSet::new();
        for peer in peers {
            tasks.spawn(connector::run(state.clone(), peer));
        }

        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, addr)) => {
                        stream.set_nodelay(true).ok();
                        tasks.spawn(router::route(state.clone(), stream, addr));
                    }
                    Err(e) => {
                        tracing::error!(err = %e, "accept error");
                    }
                },
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    if let Err(e) = joined
                        && e.is_panic()
                    {
                        tracing::error!(err = %e, "connection task panicked");
                    }
                }
            }
        }
    }
}
