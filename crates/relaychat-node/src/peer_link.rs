use crate::node::NodeState;
use crate::outbound::Outbound;
use crate::peers::{LinkDirection, LinkId, PeerTable};
use crate::router::MessageReader;
use anyhow::{Result, bail};
use futures_util::StreamExt;
use relaychat::protocol::Message;

/// Removes the link from the peer table and closes the socket, however the
/// link ends.
struct LinkGuard<'a> {
    peers: &'a PeerTable,
    peer_id: &'a str,
    link: LinkId,
    outbound: &'a Outbound<Message>,
}

impl Drop for LinkGuard<'_> {
    fn drop(&mut self) {
        self.peers.unregister(self.peer_id, self.link);
        self.outbound.close();
    }
}

/// Serve one handshaken peer link until it closes.
///
/// Registers the link so local chat lines are relayed over it, then turns
/// every new `relay_msg` from the peer into a local broadcast and a log
/// entry. Relayed lines are not forwarded to other peers.
pub async fn run(
    state: &NodeState,
    peer_id: &str,
    direction: LinkDirection,
    mut reader: MessageReader,
    outbound: Outbound<Message>,
) -> Result<()> {
    let link = state.peers.register(peer_id, direction, outbound.clone());
    let _guard = LinkGuard {
        peers: &state.peers,
        peer_id,
        link,
        outbound: &outbound,
    };
    tracing::debug!(peer = %peer_id, %direction, "peer link registered");

    loop {
        let next = tokio::select! {
            next = reader.next() => next,
            _ = outbound.closed() => bail!("peer link closed"),
        };
        let Some(msg) = next else {
            tracing::debug!(peer = %peer_id, "peer closed the link");
            return Ok(());
        };
        match msg? {
            Message::RelayMsg(packet) => {
                state.accept_relay(packet);
            }
            other => {
                tracing::trace!(peer = %peer_id, ?other, "ignoring non-relay message");
            }
        }
    }
}
