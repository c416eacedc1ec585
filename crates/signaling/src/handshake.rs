//! Token handshake run on a freshly dialed connection.
//!
//! ```text
//! ANSWERER -> OFFERER:  [32 bytes: hex token ASCII]
//! OFFERER -> ANSWERER:  [1 byte: 0x01=accepted, 0x00=rejected]
//! ```
//!
//! After an accepted handshake the stream carries the session channel.

use rand::Rng;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::SignalingError;

/// Handshake response: accepted.
pub const AUTH_OK: u8 = 0x01;

/// Handshake response: rejected.
pub const AUTH_REJECTED: u8 = 0x00;

/// Token length on the wire (32 hex characters).
pub const TOKEN_LEN: usize = 32;

/// Generates a CSPRNG token as a 32-character lowercase hex string.
pub fn generate_token() -> String {
    let mut bytes = [0u8; TOKEN_LEN / 2];
    rand::thread_rng().fill(&mut bytes);
    hex::encode(bytes)
}

/// Compares a presented token with the expected one in constant time.
pub fn validate_token(received: &str, expected: &str) -> bool {
    if received.len() != expected.len() {
        return false;
    }
    let mut diff = 0u8;
    for (a, b) in received.bytes().zip(expected.bytes()) {
        diff |= a ^ b;
    }
    diff == 0
}

/// Writes the token and flushes.
pub async fn write_token<W: AsyncWrite + Unpin>(
    writer: &mut W,
    token: &str,
) -> Result<(), SignalingError> {
    if token.len() != TOKEN_LEN {
        return Err(SignalingError::Malformed(format!(
            "token must be {TOKEN_LEN} bytes, got {}",
            token.len()
        )));
    }
    writer.write_all(token.as_bytes()).await?;
    writer.flush().await?;
    Ok(())
}

/// Reads a token. Non-UTF-8 input is reported as malformed.
pub async fn read_token<R: AsyncRead + Unpin>(reader: &mut R) -> Result<String, SignalingError> {
    let mut buf = [0u8; TOKEN_LEN];
    reader.read_exact(&mut buf).await?;
    String::from_utf8(buf.to_vec())
        .map_err(|e| SignalingError::Malformed(format!("invalid token encoding: {e}")))
}

/// Writes the one-byte verdict.
pub async fn write_verdict<W: AsyncWrite + Unpin>(
    writer: &mut W,
    accepted: bool,
) -> Result<(), SignalingError> {
    writer
        .write_u8(if accepted { AUTH_OK } else { AUTH_REJECTED })
        .await?;
    writer.flush().await?;
    Ok(())
}

/// Reads the one-byte verdict.
pub async fn read_verdict<R: AsyncRead + Unpin>(reader: &mut R) -> Result<bool, SignalingError> {
    let byte = reader.read_u8().await?;
    Ok(byte == AUTH_OK)
}
