//! Version negotiation payloads.
//!
//! The `handshake` method is reserved: it is the only traffic trusted before
//! both sides agree on [`CODEC_VERSION`].

use serde::{Deserialize, Serialize};

/// The only envelope layout this build understands.
pub const CODEC_VERSION: u8 = 1;

/// Payload of `handshake_request`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandshakeRequest {
    /// Version the initiator proposes.
    pub codec_version: u8,
}

impl HandshakeRequest {
    /// Propose the version this build implements.
    pub fn current() -> Self {
        Self {
            codec_version: CODEC_VERSION,
        }
    }
}

/// Reason a responder refused a handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HandshakeError {
    #[error("unsupported protocol version {requested} (supported: {supported})")]
    UnsupportedProtocolVersion { requested: u8, supported: u8 },
}

/// Payload of `handshake_response`.
pub type HandshakeResponse = Result<(), HandshakeError>;

/// Responder-side decision for a proposal.
pub fn answer(request: HandshakeRequest) -> HandshakeResponse {
    if request.codec_version == CODEC_VERSION {
        Ok(())
    } else {
        Err(HandshakeError::UnsupportedProtocolVersion {
            requested: request.codec_version,
            supported: CODEC_VERSION,
        })
    }
}
