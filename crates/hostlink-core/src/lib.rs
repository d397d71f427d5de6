//! Core types and traits for hostlink.
//!
//! This crate provides the protocol primitives shared by both sides of a
//! host/product channel: the provider contract, the action registry, the
//! envelope codec and the connection status observable. The transport itself
//! lives in `hostlink-transport`.

mod action;
mod codec;
mod config;
mod handshake;
mod macros;
mod provider;
mod registry;
mod status;
mod subject;

pub use action::{
    ActionId, ActionKind, HANDSHAKE_METHOD, Payload, RequestMethod, SubscriptionMethod,
    action_name,
};
pub use codec::{
    CodecError, DecodeError, Envelope, HEADER_SIZE, MAX_REQUEST_ID_LEN, UNSOLICITED_REQUEST_ID,
    decode, decode_payload, encode, encode_payload,
};
pub use config::{ConfigError, DEFAULT_HANDSHAKE_RETRY_INTERVAL, TransportConfig};
pub use handshake::{
    CODEC_VERSION, HandshakeError, HandshakeRequest, HandshakeResponse, answer as answer_handshake,
};
pub use provider::{MessageCallback, Provider, Unsubscribe};
pub use registry::{ActionEntry, MethodShape, Registry, RegistryBuilder, RegistryError};
pub use status::{ConnectionStatus, StatusObservable};
pub use subject::{Listener, ListenerId, Subject};
