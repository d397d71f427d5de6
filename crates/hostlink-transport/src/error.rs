//! Error types for transport operations.

use hostlink_core::{CodecError, RegistryError};

/// Errors returned to the caller that triggered them.
///
/// A failure never affects other pending requests or subscriptions on the
/// same transport.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The provider reports it cannot carry traffic. Nothing was sent.
    #[error("provider environment is not usable")]
    EnvironmentUnusable,

    /// The transport was disposed.
    #[error("transport disposed")]
    Disposed,

    /// The handshake resolved without a connection.
    #[error("transport not ready: handshake did not succeed")]
    NotReady,

    /// The caller's cancellation token fired before a response arrived.
    #[error("request aborted")]
    RequestAborted,

    /// No response within the configured request timeout.
    #[error("request timed out")]
    RequestTimedOut,

    /// The subscription was stopped or interrupted; nothing was sent.
    #[error("subscription closed")]
    SubscriptionClosed,

    /// The negotiated codec version is not the one this build speaks.
    #[error("unsupported protocol version {negotiated} (supported: {supported})")]
    UnsupportedProtocolVersion {
        /// Version agreed during the handshake.
        negotiated: u8,
        /// Version this build implements.
        supported: u8,
    },

    /// The method is not part of this transport's registry (or has the
    /// other shape).
    #[error("unknown method: {0}")]
    UnknownMethod(#[from] RegistryError),

    /// A typed payload failed to (de)serialize.
    #[error(transparent)]
    Codec(#[from] CodecError),

    /// Handler registration needs a tokio runtime to run handlers on.
    #[error("no tokio runtime available to run handlers")]
    NoRuntime,
}
