//! Envelope codec.
//!
//! Frame layout: `[action:2][id_len:4][request_id:id_len][payload:N]`
//!
//! - **action**: discriminant assigned by the [`Registry`] (little-endian u16)
//! - **id_len**: byte length of the request id (little-endian u32)
//! - **request_id**: UTF-8, opaque, compared only for equality
//! - **payload**: action-specific bytes, opaque to the codec
//!
//! Payload bytes are produced with `serde_json` by the typed helpers on
//! [`Envelope`]; the frame itself never looks inside them.

use crate::action::ActionId;
use crate::registry::Registry;
use serde::Serialize;
use serde::de::DeserializeOwned;

/// Size of the fixed part of a frame: 2 (action) + 4 (id length).
pub const HEADER_SIZE: usize = 6;

/// Longest request id accepted on decode.
pub const MAX_REQUEST_ID_LEN: usize = 256;

/// Request id used for unsolicited, non-correlated pushes.
pub const UNSOLICITED_REQUEST_ID: &str = "";

/// The wire unit exchanged over a provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    /// Correlation token.
    pub request_id: String,
    /// Which member of the tagged union this is.
    pub action: ActionId,
    /// Action-specific payload bytes.
    pub payload: Vec<u8>,
}

impl Envelope {
    /// Build an envelope from already-encoded payload bytes.
    pub fn new(request_id: impl Into<String>, action: ActionId, payload: Vec<u8>) -> Self {
        Self {
            request_id: request_id.into(),
            action,
            payload,
        }
    }

    /// Build an envelope, serializing `payload`.
    pub fn with_payload<T: Serialize>(
        request_id: impl Into<String>,
        action: ActionId,
        payload: &T,
    ) -> Result<Self, CodecError> {
        Ok(Self::new(request_id, action, encode_payload(payload)?))
    }

    /// Deserialize the payload as `T`.
    pub fn payload<T: DeserializeOwned>(&self) -> Result<T, CodecError> {
        decode_payload(&self.payload)
    }

    /// Whether this is an unsolicited push.
    pub fn is_unsolicited(&self) -> bool {
        self.request_id == UNSOLICITED_REQUEST_ID
    }
}

/// Failure decoding a frame. Never surfaced to transport callers: a frame
/// that fails to decode is simply not a message for us.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("truncated frame: need {needed} bytes, have {have}")]
    Truncated { needed: usize, have: usize },
    #[error("unknown action discriminant {0}")]
    UnknownAction(u16),
    #[error("request id is not valid UTF-8")]
    InvalidRequestId,
    #[error("request id too long: {0} bytes (max {MAX_REQUEST_ID_LEN})")]
    RequestIdTooLong(usize),
}

/// Failure (de)serializing a typed payload.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("payload serialization failed: {0}")]
    Json(#[from] serde_json::Error),
}

/// Serialize an envelope into a frame.
pub fn encode(envelope: &Envelope) -> Vec<u8> {
    let id = envelope.request_id.as_bytes();
    let mut buf = Vec::with_capacity(HEADER_SIZE + id.len() + envelope.payload.len());
    buf.extend_from_slice(&envelope.action.as_u16().to_le_bytes());
    buf.extend_from_slice(&(id.len() as u32).to_le_bytes());
    buf.extend_from_slice(id);
    buf.extend_from_slice(&envelope.payload);
    buf
}

/// Parse a frame against the actions `registry` knows.
pub fn decode(registry: &Registry, data: &[u8]) -> Result<Envelope, DecodeError> {
    if data.len() < HEADER_SIZE {
        return Err(DecodeError::Truncated {
            needed: HEADER_SIZE,
            have: data.len(),
        });
    }

    let raw_action = u16::from_le_bytes([data[0], data[1]]);
    let action = registry
        .resolve(raw_action)
        .ok_or(DecodeError::UnknownAction(raw_action))?;

    let id_len = u32::from_le_bytes([data[2], data[3], data[4], data[5]]) as usize;
    if id_len > MAX_REQUEST_ID_LEN {
        return Err(DecodeError::RequestIdTooLong(id_len));
    }
    let id_end = HEADER_SIZE + id_len;
    if data.len() < id_end {
        return Err(DecodeError::Truncated {
            needed: id_end,
            have: data.len(),
        });
    }

    let request_id = std::str::from_utf8(&data[HEADER_SIZE..id_end])
        .map_err(|_| DecodeError::InvalidRequestId)?
        .to_string();

    Ok(Envelope {
        request_id,
        action,
        payload: data[id_end..].to_vec(),
    })
}

/// Serialize a typed payload.
pub fn encode_payload<T: Serialize>(payload: &T) -> Result<Vec<u8>, CodecError> {
    Ok(serde_json::to_vec(payload)?)
}

/// Deserialize a typed payload.
pub fn decode_payload<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, CodecError> {
    Ok(serde_json::from_slice(bytes)?)
}
