use crate::config::PeerConfig;
use crate::node::NodeState;
use crate::outbound::spawn_writer;
use crate::peer_link;
use crate::peers::LinkDirection;
use anyhow::{Context, Result, anyhow};
use relaychat::protocol::{JsonLinesCodec, Message};
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio_util::codec::FramedRead;

/// Keep an outbound link to `peer` for as long as the node runs.
///
/// Dials, sends the `hello` handshake, serves the link, and after any
/// failure or disconnect waits `retry_delay` and dials again. Each peer has
/// its own connector task so an unreachable peer never delays the others.
pub async fn run(state: Arc<NodeState>, peer: PeerConfig) {
    let mut failures: u64 = 0;
    loop {
        match dial(&state, &peer).await {
            Ok(stream) => {
                failures = 0;
                tracing::info!(peer = %peer.id, addr = %peer.addr(), "peer link established");
                match serve(&state, &peer, stream).await {
                    Ok(()) => tracing::info!(peer = %peer.id, "peer link lost"),
                    Err(e) => tracing::info!(peer = %peer.id, err = %e, "peer link lost"),
                }
            }
            Err(e) => {
                failures += 1;
                if failures == 1 {
                    tracing::warn!(peer = %peer.id, addr = %peer.addr(), err = %e, "peer unreachable, retrying");
                } else {
                    tracing::debug!(peer = %peer.id, attempt = failures, err = %e, "peer still unreachable");
                }
            }
        }
        tokio::time::sleep(state.retry_delay).await;
    }
}

async fn dial(state: &NodeState, peer: &PeerConfig) -> Result<TcpStream> {
    let addr = peer.addr();
    let stream = tokio::time::timeout(state.connect_timeout, TcpStream::connect(&addr))
        .await
        .map_err(|_| anyhow!("connect to {addr} timed out"))?
        .with_context(|| format!("failed to connect to {addr}"))?;
    stream.set_nodelay(true).ok();
    Ok(stream)
}

async fn serve(state: &NodeState, peer: &PeerConfig, stream: TcpStream) -> Result<()> {
    let (r, w) = stream.into_split();
    let outbound = spawn_writer(w, state.outbound_queue);
    outbound
        .send(Message::Hello {
            from_server: state.node_id.clone(),
        })
        .await
        .map_err(|_| anyhow!("peer closed before handshake"))?;

    let reader = FramedRead::new(r, JsonLinesCodec::<Message>::new());
    peer_link::run(state, &peer.id, LinkDirection::Outbound, reader, outbound).await
}
