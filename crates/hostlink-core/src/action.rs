//! Actions and method shapes.
//!
//! A method is either a *request* (one request, one response) or a
//! *subscription* (a start payload, then a stream of receive payloads). Each
//! shape materializes into canonical action names of the form
//! `{method}_{suffix}`.

use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fmt;

/// Name of the reserved version-negotiation method.
pub const HANDSHAKE_METHOD: &str = "handshake";

/// The role of one action within its method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionKind {
    /// Caller → responder, expects a `Response`.
    Request,
    /// Responder → caller, echoes the request id.
    Response,
    /// Consumer opens a stream.
    Start,
    /// Consumer closes a stream.
    Stop,
    /// Responder ends a stream on its own.
    Interrupt,
    /// One stream item.
    Receive,
}

impl ActionKind {
    /// Kinds materialized for a request method.
    pub const REQUEST_SHAPE: [ActionKind; 2] = [ActionKind::Request, ActionKind::Response];

    /// Kinds materialized for a subscription method.
    pub const SUBSCRIPTION_SHAPE: [ActionKind; 4] = [
        ActionKind::Start,
        ActionKind::Stop,
        ActionKind::Interrupt,
        ActionKind::Receive,
    ];

    /// Suffix appended to the method name.
    pub fn suffix(self) -> &'static str {
        match self {
            ActionKind::Request => "request",
            ActionKind::Response => "response",
            ActionKind::Start => "start",
            ActionKind::Stop => "stop",
            ActionKind::Interrupt => "interrupt",
            ActionKind::Receive => "receive",
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.suffix())
    }
}

/// Canonical action name, e.g. `chat_post_message_request`.
pub fn action_name(method: &str, kind: ActionKind) -> String {
    format!("{method}_{}", kind.suffix())
}

/// Discriminant of an action inside the envelope's tagged union.
///
/// Assigned by the [`Registry`](crate::Registry) in registration order, so
/// both peers must be built from the same method table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ActionId(pub(crate) u16);

impl ActionId {
    /// `handshake_request`, always index 0.
    pub const HANDSHAKE_REQUEST: ActionId = ActionId(0);
    /// `handshake_response`, always index 1.
    pub const HANDSHAKE_RESPONSE: ActionId = ActionId(1);

    /// Raw wire value.
    pub fn as_u16(self) -> u16 {
        self.0
    }
}

impl fmt::Display for ActionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Marker trait for any payload carried in an envelope.
pub trait Payload: Serialize + DeserializeOwned + Send + 'static {}

impl<T> Payload for T where T: Serialize + DeserializeOwned + Send + 'static {}

/// A request/response method.
///
/// Business errors belong in `Response` itself (typically a `Result`), the
/// transport never inspects payloads.
pub trait RequestMethod: 'static {
    /// Method name, e.g. `"chat_post_message"`.
    const NAME: &'static str;
    /// Payload of `{NAME}_request`.
    type Request: Payload;
    /// Payload of `{NAME}_response`.
    type Response: Payload;
}

/// A subscription method.
pub trait SubscriptionMethod: 'static {
    /// Method name, e.g. `"account_balance"`.
    const NAME: &'static str;
    /// Payload of `{NAME}_start`.
    type Start: Payload;
    /// Payload of every `{NAME}_receive`.
    type Receive: Payload;
}
