use bytes::BytesMut;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::marker::PhantomData;
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tokio_util::codec::{Decoder, Encoder, LinesCodec, LinesCodecError};

/// Maximum size of one JSON-lines frame on a node socket (64 KiB).
pub const MAX_LINE_BYTES: usize = 64 * 1024;

pub const ERR_USERNAME_REQUIRED: &str = "username required";
pub const ERR_USERNAME_TAKEN: &str = "username taken";
pub const ERR_INVALID_REQUEST: &str = "invalid request";

// ---------------------------------------------------------------------------
// Inbound: what a node reads from clients and peers
// ---------------------------------------------------------------------------

/// A message read by a node, from either a client or a peer node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Message {
    /// Claim a username on the node.
    Login {
        #[serde(default)]
        username: String,
    },
    /// Chat text from a logged-in client.
    Msg {
        #[serde(default)]
        text: String,
    },
    /// Leave the chat and close the connection.
    Quit,
    /// Node-to-node handshake, always the first line of a peer link.
    Hello { from_server: String },
    /// A chat record forwarded by the node it originated on.
    RelayMsg(RelayPacket),
    /// Any `type` this protocol does not know.
    #[serde(other)]
    Unknown,
}

/// Relay envelope for a [`ChatRecord`] travelling between nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelayPacket {
    pub from: String,
    pub origin_server: String,
    pub text: String,
    pub timestamp: f64,
}

impl RelayPacket {
    pub fn fingerprint(&self) -> RelayFingerprint {
        RelayFingerprint {
            origin_server: self.origin_server.clone(),
            timestamp_bits: self.timestamp.to_bits(),
            from: self.from.clone(),
            text: self.text.clone(),
        }
    }
}

impl From<&ChatRecord> for RelayPacket {
    fn from(record: &ChatRecord) -> Self {
        Self {
            from: record.from.clone(),
            origin_server: record.server.clone(),
            text: record.text.clone(),
            timestamp: record.timestamp,
        }
    }
}

// ---------------------------------------------------------------------------
// Outbound: what a node writes to clients
// ---------------------------------------------------------------------------

/// A message written by a node to a connected client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    System { text: String },
    Error { text: String },
    Msg(ChatRecord),
}

impl Event {
    pub fn system(text: impl Into<String>) -> Self {
        Event::System { text: text.into() }
    }

    pub fn error(text: impl Into<String>) -> Self {
        Event::Error { text: text.into() }
    }
}

/// One chat line: what clients see and what the chat log stores.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatRecord {
    pub from: String,
    pub server: String,
    pub text: String,
    /// Seconds since the Unix epoch.
    pub timestamp: f64,
}

impl ChatRecord {
    /// Build a record stamped with the current time.
    pub fn new(from: impl Into<String>, server: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            server: server.into(),
            text: text.into(),
            timestamp: unix_now(),
        }
    }

    pub fn fingerprint(&self) -> RelayFingerprint {
        RelayFingerprint {
            origin_server: self.server.clone(),
            timestamp_bits: self.timestamp.to_bits(),
            from: self.from.clone(),
            text: self.text.clone(),
        }
    }
}

impl From<RelayPacket> for ChatRecord {
    fn from(packet: RelayPacket) -> Self {
        Self {
            from: packet.from,
            server: packet.origin_server,
            text: packet.text,
            timestamp: packet.timestamp,
        }
    }
}

/// Identity of a relayed chat line: (origin server, timestamp, sender, text).
///
/// The timestamp is kept as raw `f64` bits so the key is hashable; two
/// records match only if their timestamps are bit-identical.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RelayFingerprint {
    pub origin_server: String,
    pub timestamp_bits: u64,
    pub from: String,
    pub text: String,
}

/// Current time as fractional seconds since the Unix epoch.
pub fn unix_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

// ---------------------------------------------------------------------------
// Codec
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("line framing: {0}")]
    Lines(#[from] LinesCodecError),
    #[error("malformed message: {0}")]
    Json(#[from] serde_json::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Serialize one message as a single JSON line (without the trailing newline).
pub fn encode<T: Serialize>(item: &T) -> Result<String, CodecError> {
    Ok(serde_json::to_string(item)?)
}

/// Parse one line. Blank lines yield `Ok(None)`.
pub fn decode_line<T: DeserializeOwned>(line: &str) -> Result<Option<T>, CodecError> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    Ok(Some(serde_json::from_str(line)?))
}

/// Newline-delimited JSON framing over [`LinesCodec`].
///
/// Decodes `T` one line at a time, skipping blank lines; encodes any
/// `Serialize` value as one line.
pub struct JsonLinesCodec<T> {
    lines: LinesCodec,
    _item: PhantomData<fn() -> T>,
}

impl<T> JsonLinesCodec<T> {
    pub fn new() -> Self {
        Self {
            lines: LinesCodec::new_with_max_length(MAX_LINE_BYTES),
            _item: PhantomData,
        }
    }
}

impl<T> Default for JsonLinesCodec<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: DeserializeOwned> Decoder for JsonLinesCodec<T> {
    type Item = T;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<T>, CodecError> {
        while let Some(line) = self.lines.decode(src)? {
            if let Some(item) = decode_line(&line)? {
                return Ok(Some(item));
            }
        }
        Ok(None)
    }

    /// Complete lines still buffered are decoded; an unterminated tail is
    /// dropped, never acted on.
    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<T>, CodecError> {
        if let Some(item) = self.decode(src)? {
            return Ok(Some(item));
        }
        src.clear();
        Ok(None)
    }
}

impl<T, U: Serialize> Encoder<U> for JsonLinesCodec<T> {
    type Error = CodecError;

    fn encode(&mut self, item: U, dst: &mut BytesMut) -> Result<(), CodecError> {
        let line = encode(&item)?;
        self.lines.encode(line, dst)?;
        Ok(())
    }
}
