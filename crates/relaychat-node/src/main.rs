use anyhow::{Context, Result};
use clap::Parser;
use relaychat::DEFAULT_PORT;
use relaychat_node::config::{DEFAULT_OUTBOUND_QUEUE, load_peers_file};
use relaychat_node::{Node, NodeConfig, PeerConfig};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about = "relaychat node: local chat clients plus relaying to peer nodes")]
struct Args {
    /// Id of this node, shown to clients and stamped on relayed lines.
    #[arg(long)]
    id: String,

    /// Address to accept clients and peers on [default: 0.0.0.0:5001].
    #[arg(long)]
    listen: Option<String>,

    /// Shared chat log (JSON lines). Parent directories are created.
    #[arg(long, default_value = "shared/logs/chat.log")]
    log: PathBuf,

    /// JSON peers file: [["B","127.0.0.1",5002], ...].
    #[arg(long)]
    peers: Option<PathBuf>,

    /// Peer to keep a link to, as ID=HOST:PORT (can be repeated).
    #[arg(long = "peer")]
    peer: Vec<PeerConfig>,

    /// Pause between peer connection attempts.
    #[arg(long, default_value_t = 2000)]
    retry_delay_ms: u64,

    /// Remember only the last N relayed lines for duplicate suppression.
    #[arg(long)]
    dedup_capacity: Option<usize>,

    /// Outbound queue length per connection.
    #[arg(long, default_value_t = DEFAULT_OUTBOUND_QUEUE)]
    outbound_queue: usize,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "relaychat_node=info".into()),
        )
        .init();

    let args = Args::parse();

    let listen = args
        .listen
        .unwrap_or_else(|| format!("0.0.0.0:{DEFAULT_PORT}"));
    let mut config = NodeConfig::new(args.id, listen, args.log);
    if let Some(path) = &args.peers {
        config.peers = load_peers_file(path)?;
    }
    config.peers.extend(args.peer);
    config.retry_delay = Duration::from_millis(args.retry_delay_ms);
    config.dedup_capacity = args.dedup_capacity;
    config.outbound_queue = args.outbound_queue;

    let node = Node::bind(config).await.context("failed to start node")?;

    tokio::select! {
        result = node.run() => {
            result.context("node failed")?;
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("received SIGINT, shutting down");
        }
    }

    tracing::info!("relaychat-node shut down");
    Ok(())
}
