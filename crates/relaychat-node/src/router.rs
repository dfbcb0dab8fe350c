use crate::node::NodeState;
use crate::outbound::spawn_writer;
use crate::peers::LinkDirection;
use crate::{peer_link, session};
use futures_util::StreamExt;
use relaychat::protocol::{JsonLinesCodec, Message};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::net::tcp::OwnedReadHalf;
use tokio_util::codec::FramedRead;

/// Decoded message stream of one accepted or dialed connection.
pub type MessageReader = FramedRead<OwnedReadHalf, JsonLinesCodec<Message>>;

/// Classify a freshly accepted connection by its first message and hand it
/// to the peer link or client session handler.
pub async fn route(state: Arc<NodeState>, stream: TcpStream, addr: SocketAddr) {
    let (r, w) = stream.into_split();
    let mut reader = FramedRead::new(r, JsonLinesCodec::<Message>::new());

    let first = match reader.next().await {
        Some(Ok(msg)) => msg,
        Some(Err(e)) => {
            tracing::debug!(%addr, err = %e, "unreadable first message, closing");
            return;
        }
        None => {
            tracing::debug!(%addr, "closed before first message");
            return;
        }
    };

    match first {
        Message::Hello { from_server } => {
            tracing::info!(%addr, peer = %from_server, "inbound peer link");
            let outbound = spawn_writer(w, state.outbound_queue);
            if let Err(e) =
                peer_link::run(&state, &from_server, LinkDirection::Inbound, reader, outbound).await
            {
                tracing::info!(peer = %from_server, err = %e, "inbound peer link dropped");
            }
        }
        first => {
            tracing::debug!(%addr, "client connected");
            if let Err(e) = session::run(&state, reader, w, first).await {
                tracing::debug!(%addr, err = %e, "client session ended with error");
            }
        }
    }
}
