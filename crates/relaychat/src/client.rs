use crate::protocol::{Event, JsonLinesCodec, Message};
use anyhow::{Context, Result, bail};
use futures_util::{SinkExt, StreamExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio_util::codec::{FramedRead, FramedWrite};

type Reader = FramedRead<OwnedReadHalf, JsonLinesCodec<Event>>;
type Writer = FramedWrite<OwnedWriteHalf, JsonLinesCodec<Message>>;

/// Client for a relaychat node's TCP API.
pub struct ChatClient {
    reader: Reader,
    writer: Writer,
}

impl ChatClient {
    /// Connect to a node. No handshake is exchanged until [`login`](Self::login).
    pub async fn connect(addr: impl ToSocketAddrs) -> Result<Self> {
        let stream = TcpStream::connect(addr)
            .await
            .context("failed to connect to node")?;
        stream.set_nodelay(true).ok();
        let (r, w) = stream.into_split();
        Ok(Self {
            reader: FramedRead::new(r, JsonLinesCodec::new()),
            writer: FramedWrite::new(w, JsonLinesCodec::new()),
        })
    }

    /// Send a raw message to the node.
    pub async fn send(&mut self, msg: Message) -> Result<()> {
        self.writer.send(msg).await?;
        Ok(())
    }

    /// Read the next event from the node.
    pub async fn next_event(&mut self) -> Result<Event> {
        let Some(event) = self.reader.next().await else {
            bail!("node disconnected");
        };
        Ok(event?)
    }

    /// Request a username and return the node's reply: `System` on success,
    /// `Error` when the name is blank or taken.
    pub async fn login(&mut self, username: &str) -> Result<Event> {
        self.send(Message::Login {
            username: username.to_string(),
        })
        .await?;
        self.next_event().await
    }

    /// Post a chat line.
    pub async fn say(&mut self, text: &str) -> Result<()> {
        self.send(Message::Msg {
            text: text.to_string(),
        })
        .await
    }

    /// Leave the chat. The node closes the connection afterwards.
    pub async fn quit(&mut self) -> Result<()> {
        self.send(Message::Quit).await
    }

    /// Split into independent writer and reader halves, e.g. to read events
    /// in one task while a UI sends in another.
    pub fn into_split(self) -> (ChatWriter, ChatReader) {
        (
            ChatWriter {
                writer: self.writer,
            },
            ChatReader {
                reader: self.reader,
            },
        )
    }
}

/// Write half of a split [`ChatClient`].
pub struct ChatWriter {
    writer: Writer,
}

impl ChatWriter {
    pub async fn send(&mut self, msg: Message) -> Result<()> {
        self.writer.send(msg).await?;
        Ok(())
    }
}

/// Read half of a split [`ChatClient`].
pub struct ChatReader {
    reader: Reader,
}

impl ChatReader {
    /// Read the next event. Returns `None` once the node has closed the connection.
    pub async fn next(&mut self) -> Option<Result<Event>> {
        let event = self.reader.next().await?;
        Some(event.map_err(Into::into))
    }
}
