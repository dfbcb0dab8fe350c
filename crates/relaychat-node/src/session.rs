use crate::error::RegistryError;
use crate::node::NodeState;
use crate::outbound::{Outbound, spawn_writer};
use crate::router::MessageReader;
use anyhow::{Result, anyhow};
use futures_util::StreamExt;
use relaychat::protocol::{
    ChatRecord, ERR_INVALID_REQUEST, ERR_USERNAME_REQUIRED, ERR_USERNAME_TAKEN, Event, Message,
};
use tokio::net::tcp::OwnedWriteHalf;

enum Flow {
    Continue,
    Quit,
}

/// One client connection. Unauthenticated while `username` is `None`.
struct ClientSession<'a> {
    state: &'a NodeState,
    outbound: Outbound<Event>,
    username: Option<String>,
}

/// Leave notice and registry cleanup run exactly once, on every exit path.
impl Drop for ClientSession<'_> {
    fn drop(&mut self) {
        if let Some(name) = self.username.take() {
            self.state.sessions.unregister(&name, &self.outbound);
            self.state
                .sessions
                .broadcast(&Event::system(format!("{name} left the chat")), None);
            tracing::info!(username = %name, "client left");
        }
    }
}

impl ClientSession<'_> {
    async fn reply(&self, event: Event) -> Result<()> {
        self.outbound
            .send(event)
            .await
            .map_err(|_| anyhow!("client connection closed"))
    }

    async fn handle(&mut self, msg: Message) -> Result<Flow> {
        match (msg, self.username.is_some()) {
            (Message::Login { username }, false) => self.login(&username).await?,
            (Message::Msg { text }, true) => self.chat(text),
            (Message::Quit, true) => return Ok(Flow::Quit),
            _ => self.reply(Event::error(ERR_INVALID_REQUEST)).await?,
        }
        Ok(Flow::Continue)
    }

    async fn login(&mut self, requested: &str) -> Result<()> {
        let name = requested.trim();
        if name.is_empty() {
            return self.reply(Event::error(ERR_USERNAME_REQUIRED)).await;
        }

        match self.state.sessions.register(name, self.outbound.clone()) {
            Ok(()) => {}
            Err(RegistryError::NameTaken(_)) => {
                return self.reply(Event::error(ERR_USERNAME_TAKEN)).await;
            }
        }
        self.username = Some(name.to_string());
        tracing::info!(username = %name, "client logged in");

        self.reply(Event::system(format!(
            "Welcome {name}! Connected to Server {}",
            self.state.node_id
        )))
        .await?;
        self.state
            .sessions
            .broadcast(&Event::system(format!("{name} joined the chat")), Some(name));
        Ok(())
    }

    fn chat(&self, text: String) {
        let Some(name) = &self.username else { return };
        let record = ChatRecord::new(name.as_str(), self.state.node_id.as_str(), text);
        self.state.publish_local(record);
    }
}

/// Serve one client connection, starting with the already-decoded `first` message.
pub async fn run(
    state: &NodeState,
    mut reader: MessageReader,
    writer: OwnedWriteHalf,
    first: Message,
) -> Result<()> {
    let mut session = ClientSession {
        state,
        outbound: spawn_writer(writer, state.outbound_queue),
        username: None,
    };

    let mut pending = Some(first);
    loop {
        let msg = match pending.take() {
            Some(msg) => msg,
            None => {
                let next = tokio::select! {
                    next = reader.next() => next,
                    _ = session.outbound.closed() => return Ok(()),
                };
                match next {
                    Some(msg) => msg?,
                    None => return Ok(()),
                }
            }
        };
        if let Flow::Quit = session.handle(msg).await? {
            return Ok(());
        }
    }
}
