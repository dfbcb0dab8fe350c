use super::STEP_TIMEOUT;
use anyhow::{Context, Result, bail};
use futures_util::{SinkExt, StreamExt};
use relaychat::protocol::{JsonLinesCodec, Message, RelayPacket};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio_util::codec::{FramedRead, FramedWrite};

/// A hand-driven peer node: speaks the node-to-node protocol directly so
/// tests can inject relays and observe what a node forwards.
pub struct TestPeer {
    pub id: String,
    reader: FramedRead<OwnedReadHalf, JsonLinesCodec<Message>>,
    writer: FramedWrite<OwnedWriteHalf, JsonLinesCodec<Message>>,
}

impl TestPeer {
    /// Dial a node and send the `hello` handshake as peer `id`.
    pub async fn connect(addr: SocketAddr, id: &str) -> Result<Self> {
        let stream = TcpStream::connect(addr)
            .await
            .context("failed to connect to node")?;
        let (r, w) = stream.into_split();
        let mut peer = Self {
            id: id.to_string(),
            reader: FramedRead::new(r, JsonLinesCodec::new()),
            writer: FramedWrite::new(w, JsonLinesCodec::new()),
        };
        peer.send(Message::Hello {
            from_server: id.to_string(),
        })
        .await?;
        Ok(peer)
    }

    pub async fn send(&mut self, msg: Message) -> Result<()> {
        self.writer.send(msg).await?;
        Ok(())
    }

    pub async fn relay(&mut self, packet: RelayPacket) -> Result<()> {
        self.send(Message::RelayMsg(packet)).await
    }

    /// Next `relay_msg` the node sends over this link.
    pub async fn next_relay(&mut self) -> Result<RelayPacket> {
        let deadline = tokio::time::Instant::now() + STEP_TIMEOUT;
        loop {
            let next = tokio::time::timeout_at(deadline, self.reader.next())
                .await
                .context("timed out waiting for relay")?;
            match next {
                Some(Ok(Message::RelayMsg(packet))) => return Ok(packet),
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(e.into()),
                None => bail!("node closed the peer link"),
            }
        }
    }

    /// A relay that arrives within `window`, if any.
    pub async fn relay_within(&mut self, window: Duration) -> Option<RelayPacket> {
        match tokio::time::timeout(window, self.reader.next()).await {
            Ok(Some(Ok(Message::RelayMsg(packet)))) => Some(packet),
            _ => None,
        }
    }
}

/// A relay packet as node `origin` would send it.
pub fn packet(origin: &str, from: &str, text: &str, timestamp: f64) -> RelayPacket {
    RelayPacket {
        from: from.to_string(),
        origin_server: origin.to_string(),
        text: text.to_string(),
        timestamp,
    }
}
