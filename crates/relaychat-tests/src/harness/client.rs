use super::STEP_TIMEOUT;
use anyhow::{Context, Result, bail};
use relaychat::client::ChatClient;
use relaychat::protocol::{ChatRecord, Event, Message};
use std::net::SocketAddr;
use std::time::Duration;

/// Convenience wrapper over `ChatClient` for integration tests. Every read
/// is bounded by a timeout so a missing event fails the test instead of
/// hanging it.
pub struct TestClient {
    inner: ChatClient,
}

impl TestClient {
    pub async fn connect(addr: SocketAddr) -> Result<Self> {
        let inner = ChatClient::connect(addr).await?;
        Ok(Self { inner })
    }

    /// Connect and log in, checking for the welcome line.
    pub async fn login_as(addr: SocketAddr, name: &str) -> Result<Self> {
        let mut client = Self::connect(addr).await?;
        match client.login(name).await? {
            Event::System { text } if text.starts_with(&format!("Welcome {name}!")) => Ok(client),
            other => bail!("login as {name} failed: {other:?}"),
        }
    }

    /// Send a login and return the node's reply.
    pub async fn login(&mut self, name: &str) -> Result<Event> {
        tokio::time::timeout(STEP_TIMEOUT, self.inner.login(name))
            .await
            .context("timed out waiting for login reply")?
    }

    pub async fn say(&mut self, text: &str) -> Result<()> {
        self.inner.say(text).await
    }

    pub async fn quit(&mut self) -> Result<()> {
        self.inner.quit().await
    }

    /// Send a raw message, e.g. one that is invalid in the current state.
    pub async fn send(&mut self, msg: Message) -> Result<()> {
        self.inner.send(msg).await
    }

    pub async fn next_event(&mut self) -> Result<Event> {
        tokio::time::timeout(STEP_TIMEOUT, self.inner.next_event())
            .await
            .context("timed out waiting for event")?
    }

    /// Skip events until one matches `pred`.
    pub async fn wait_for(&mut self, mut pred: impl FnMut(&Event) -> bool) -> Result<Event> {
        let deadline = tokio::time::Instant::now() + STEP_TIMEOUT;
        loop {
            let event = tokio::time::timeout_at(deadline, self.inner.next_event())
                .await
                .context("timed out waiting for matching event")??;
            if pred(&event) {
                return Ok(event);
            }
        }
    }

    /// Wait for a system line with exactly `text`.
    pub async fn expect_system(&mut self, text: &str) -> Result<()> {
        self.wait_for(|e| matches!(e, Event::System { text: t } if t == text))
            .await?;
        Ok(())
    }

    /// Wait for the next chat line with `text`.
    pub async fn expect_msg(&mut self, text: &str) -> Result<ChatRecord> {
        match self
            .wait_for(|e| matches!(e, Event::Msg(r) if r.text == text))
            .await?
        {
            Event::Msg(record) => Ok(record),
            other => bail!("unexpected event {other:?}"),
        }
    }

    /// Return the first event that arrives within `window`, if any.
    pub async fn event_within(&mut self, window: Duration) -> Option<Event> {
        tokio::time::timeout(window, self.inner.next_event())
            .await
            .ok()
            .and_then(Result::ok)
    }

    /// Wait for the node to close the connection.
    pub async fn expect_closed(&mut self) -> Result<()> {
        let deadline = tokio::time::Instant::now() + STEP_TIMEOUT;
        loop {
            match tokio::time::timeout_at(deadline, self.inner.next_event()).await {
                Err(_) => bail!("connection still open"),
                Ok(Err(_)) => return Ok(()),
                Ok(Ok(_)) => continue,
            }
        }
    }
}
