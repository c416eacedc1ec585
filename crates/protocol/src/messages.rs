use std::fmt;

use serde::{Deserialize, Serialize};

use crate::TransferId;
use crate::capability::CapabilityDescriptor;

// ---------------------------------------------------------------------------
// Payloads
// ---------------------------------------------------------------------------

/// Announces a new file the sender is about to stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileInfo {
    pub transfer_id: TransferId,
    pub file_name: String,
    pub file_size: u64,
    pub mime_type: String,
}

/// Receiver accepts an announced file; unblocks chunk sending.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ready {
    pub transfer_id: TransferId,
    pub high_speed: bool,
}

/// One slice of file data.
///
/// The `payload` field is base64-encoded in JSON.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chunk {
    pub transfer_id: TransferId,
    pub index: u32,
    pub total_chunks: u32,
    #[serde(with = "base64_bytes")]
    pub payload: Vec<u8>,
    /// Hex SHA-256 of `payload`, only when both peers negotiated checksums.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
}

// Payloads can be megabytes; keep them out of debug output.
impl fmt::Debug for Chunk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Chunk")
            .field("transfer_id", &self.transfer_id)
            .field("index", &self.index)
            .field("total_chunks", &self.total_chunks)
            .field("payload_len", &self.payload.len())
            .field("checksum", &self.checksum)
            .finish()
    }
}

/// Acknowledges one received chunk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ack {
    pub transfer_id: TransferId,
    pub index: u32,
    /// Contiguous bytes the receiver holds after this chunk.
    pub bytes_acked: u64,
}

/// Requests termination of one transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cancel {
    pub transfer_id: TransferId,
}

/// Reports a transfer-level (with id) or session-level (without) fault.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorReport {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transfer_id: Option<TransferId>,
    pub message: String,
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// Application message exchanged over the session channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Message {
    #[serde(rename = "capability")]
    Capability(CapabilityDescriptor),
    #[serde(rename = "file-info")]
    FileInfo(FileInfo),
    #[serde(rename = "ready")]
    Ready(Ready),
    #[serde(rename = "chunk")]
    Chunk(Chunk),
    #[serde(rename = "ack")]
    Ack(Ack),
    #[serde(rename = "cancel")]
    Cancel(Cancel),
    #[serde(rename = "error")]
    Error(ErrorReport),
}

impl Message {
    /// Wire tag of this message.
    pub fn kind(&self) -> &'static str {
        match self {
            Message::Capability(_) => "capability",
            Message::FileInfo(_) => "file-info",
            Message::Ready(_) => "ready",
            Message::Chunk(_) => "chunk",
            Message::Ack(_) => "ack",
            Message::Cancel(_) => "cancel",
            Message::Error(_) => "error",
        }
    }

    /// Transfer this message refers to, if any.
    pub fn transfer_id(&self) -> Option<&str> {
        match self {
            Message::Capability(_) => None,
            Message::FileInfo(m) => Some(&m.transfer_id),
            Message::Ready(m) => Some(&m.transfer_id),
            Message::Chunk(m) => Some(&m.transfer_id),
            Message::Ack(m) => Some(&m.transfer_id),
            Message::Cancel(m) => Some(&m.transfer_id),
            Message::Error(m) => m.transfer_id.as_deref(),
        }
    }

    /// Creates an error report.
    pub fn error(transfer_id: Option<&str>, message: impl Into<String>) -> Self {
        Message::Error(ErrorReport {
            transfer_id: transfer_id.map(str::to_owned),
            message: message.into(),
        })
    }

    /// Creates a cancel request.
    pub fn cancel(transfer_id: &str) -> Self {
        Message::Cancel(Cancel {
            transfer_id: transfer_id.to_owned(),
        })
    }
}

mod base64_bytes {
    use base64::{Engine, engine::general_purpose::STANDARD};
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(data: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        STANDARD.encode(data).serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        STANDARD.decode(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_payload_is_base64() {
        let msg = Message::Chunk(Chunk {
            transfer_id: "t1".into(),
            index: 0,
            total_chunks: 1,
            payload: vec![0x48, 0x65, 0x6c, 0x6c, 0x6f],
            checksum: None,
        });
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains(r#""type":"chunk""#));
        assert!(json.contains("SGVsbG8="));
        assert!(!json.contains("checksum"));
        let parsed: Message = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, msg);
    }

    #[test]
    fn empty_payload_roundtrip() {
        let msg = Message::Chunk(Chunk {
            transfer_id: "t0".into(),
            index: 0,
            total_chunks: 1,
            payload: Vec::new(),
            checksum: None,
        });
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains(r#""payload":"""#));
        let parsed: Message = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, msg);
    }

    #[test]
    fn file_info_uses_camel_case() {
        let msg = Message::FileInfo(FileInfo {
            transfer_id: "abc".into(),
            file_name: "photo.jpg".into(),
            file_size: 2048,
            mime_type: "image/jpeg".into(),
        });
        let v = serde_json::to_value(&msg).unwrap();
        assert_eq!(v["type"], "file-info");
        assert_eq!(v["transferId"], "abc");
        assert_eq!(v["fileName"], "photo.jpg");
        assert_eq!(v["fileSize"], 2048);
        assert_eq!(v["mimeType"], "image/jpeg");
    }

    #[test]
    fn capability_is_flattened_under_tag() {
        let msg = Message::Capability(CapabilityDescriptor::standard());
        let v = serde_json::to_value(&msg).unwrap();
        assert_eq!(v["type"], "capability");
        assert_eq!(v["chunkSize"], 1024 * 1024);
        assert_eq!(v["maxConcurrentTransfers"], 1);
        assert_eq!(v["highSpeed"], false);
    }

    #[test]
    fn session_level_error_omits_transfer_id() {
        let msg = Message::error(None, "bad frame");
        let json = serde_json::to_string(&msg).unwrap();
        assert!(!json.contains("transferId"));
        assert_eq!(msg.transfer_id(), None);
    }

    #[test]
    fn kind_matches_wire_tag() {
        let msgs = [
            Message::cancel("x"),
            Message::error(Some("x"), "boom"),
            Message::Ack(Ack {
                transfer_id: "x".into(),
                index: 3,
                bytes_acked: 10,
            }),
            Message::Ready(Ready {
                transfer_id: "x".into(),
                high_speed: true,
            }),
        ];
        for msg in msgs {
            let v = serde_json::to_value(&msg).unwrap();
            assert_eq!(v["type"], msg.kind());
            assert_eq!(msg.transfer_id(), Some("x"));
        }
    }

    #[test]
    fn unknown_tag_rejected() {
        let result: Result<Message, _> =
            serde_json::from_str(r#"{"type":"file-data","fileId":"x"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn invalid_base64_rejected() {
        let json = r#"{"type":"chunk","transferId":"t","index":0,"totalChunks":1,"payload":"!!!"}"#;
        let result: Result<Message, _> = serde_json::from_str(json);
        assert!(result.is_err());
    }

    #[test]
    fn chunk_debug_hides_payload() {
        let chunk = Chunk {
            transfer_id: "t".into(),
            index: 1,
            total_chunks: 2,
            payload: vec![7u8; 4096],
            checksum: None,
        };
        let out = format!("{chunk:?}");
        assert!(out.contains("payload_len: 4096"));
        assert!(!out.contains("7, 7"));
    }
}
