//! WebSocket transport messages.
//!
//! JSON text frames, internally tagged by `type`. Byte payloads travel as
//! standard base64.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::broker::OutputChunk;
use crate::session::SessionId;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WsMessage {
    /// Server → client: a chunk of terminal output.
    Output {
        session_id: SessionId,
        #[serde(with = "base64_bytes")]
        data: Bytes,
    },
    /// Client → server: bytes to write to a session's input.
    Input {
        session_id: SessionId,
        #[serde(with = "base64_bytes")]
        data: Bytes,
    },
    /// Keepalive; echoed back by the server.
    Heartbeat,
}

impl WsMessage {
    pub fn decode(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

impl From<OutputChunk> for WsMessage {
    fn from(chunk: OutputChunk) -> Self {
        WsMessage::Output {
            session_id: chunk.session_id,
            data: chunk.data,
        }
    }
}

pub(crate) mod base64_bytes {
    use base64::Engine as _;
    use bytes::Bytes;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(data: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&base64::engine::general_purpose::STANDARD.encode(data))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Bytes, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        base64::engine::general_purpose::STANDARD
            .decode(encoded.as_bytes())
            .map(Bytes::from)
            .map_err(serde::de::Error::custom)
    }
}
