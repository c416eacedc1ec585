//! Session descriptions and their blob encoding.
//!
//! A blob is URL-safe base64 (no padding) of the description's JSON, so it
//! survives copy/paste, URLs and QR payloads unchanged.

use std::fmt;
use std::net::{IpAddr, SocketAddr};

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use serde::{Deserialize, Serialize};

use fileflow_protocol::PROTOCOL_VERSION;

use crate::code::is_valid_connection_code;
use crate::error::SignalingError;
use crate::handshake::TOKEN_LEN;

/// Which side of the exchange produced a description.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DescriptionKind {
    Offer,
    Answer,
}

impl fmt::Display for DescriptionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DescriptionKind::Offer => f.write_str("offer"),
            DescriptionKind::Answer => f.write_str("answer"),
        }
    }
}

/// One local address of a peer.
///
/// Offers advertise the port they listen on; answers advertise addresses
/// only and carry port 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Candidate {
    pub ip: IpAddr,
    pub port: u16,
}

impl Candidate {
    pub fn addr(&self) -> SocketAddr {
        SocketAddr::new(self.ip, self.port)
    }
}

/// Everything a peer needs to reach (or admit) the other end.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionDescription {
    pub kind: DescriptionKind,
    /// Connection code shared by offer and answer.
    pub session_id: String,
    /// One-time token the answering side presents when it dials in.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    pub candidates: Vec<Candidate>,
    /// False when gathering hit its timeout and the list is best-effort.
    pub gathering_complete: bool,
    pub protocol_version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_name: Option<String>,
}

impl SessionDescription {
    /// Serializes the description into an opaque blob.
    pub fn to_blob(&self) -> Result<String, SignalingError> {
        let json = serde_json::to_vec(self)
            .map_err(|e| SignalingError::Malformed(format!("cannot encode description: {e}")))?;
        Ok(URL_SAFE_NO_PAD.encode(json))
    }

    /// Parses and validates a blob produced by [`to_blob`](Self::to_blob).
    ///
    /// Surrounding whitespace is ignored.
    pub fn from_blob(blob: &str) -> Result<Self, SignalingError> {
        let blob = blob.trim();
        if blob.is_empty() {
            return Err(SignalingError::Malformed("empty blob".into()));
        }
        let json = URL_SAFE_NO_PAD
            .decode(blob)
            .map_err(|e| SignalingError::Malformed(format!("invalid encoding: {e}")))?;
        let description: SessionDescription = serde_json::from_slice(&json)
            .map_err(|e| SignalingError::Malformed(format!("invalid description: {e}")))?;
        description.validate()?;
        Ok(description)
    }

    /// Parses a blob and checks it is of the expected kind.
    pub fn from_blob_expecting(
        blob: &str,
        expected: DescriptionKind,
    ) -> Result<Self, SignalingError> {
        let description = Self::from_blob(blob)?;
        if description.kind != expected {
            return Err(SignalingError::UnexpectedKind {
                expected,
                actual: description.kind,
            });
        }
        Ok(description)
    }

    fn validate(&self) -> Result<(), SignalingError> {
        if self.protocol_version != PROTOCOL_VERSION {
            return Err(SignalingError::UnsupportedVersion(self.protocol_version));
        }
        if !is_valid_connection_code(&self.session_id) {
            return Err(SignalingError::Malformed(format!(
                "invalid session id: {:?}",
                self.session_id
            )));
        }
        match self.kind {
            DescriptionKind::Offer => {
                if self.candidates.is_empty() {
                    return Err(SignalingError::Malformed("offer has no candidates".into()));
                }
                if self.candidates.iter().any(|c| c.port == 0) {
                    return Err(SignalingError::Malformed(
                        "offer candidate without port".into(),
                    ));
                }
            }
            DescriptionKind::Answer => {
                let valid_token = self
                    .token
                    .as_deref()
                    .is_some_and(|t| t.len() == TOKEN_LEN && t.bytes().all(|b| b.is_ascii_hexdigit()));
                if !valid_token {
                    return Err(SignalingError::Malformed("answer without valid token".into()));
                }
            }
        }
        Ok(())
    }
}
