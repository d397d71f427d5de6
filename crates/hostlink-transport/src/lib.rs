//! Versioned request/response/subscription transport for hostlink.
//!
//! A [`Transport`] turns one [`Provider`](hostlink_core::Provider), an
//! unframed, uncorrelated byte channel, into typed calls:
//!
//! - [`Transport::is_ready`] negotiates the codec version with the peer,
//!   retrying until it answers.
//! - [`Transport::request`] / [`Transport::handle_request`] for one-shot calls.
//! - [`Transport::subscribe`] / [`Transport::handle_subscription`] for
//!   streams the consumer stops and the responder may interrupt.
//! - [`Transport::dispose`] tears all of it down.

mod error;
mod handshake;
mod request_id;
mod responder;
mod subscription;
mod transport;

pub use error::TransportError;
pub use request_id::next_request_id;
pub use responder::{Registration, SubscriptionSink};
pub use subscription::{Subscription, SubscriptionStream};
pub use tokio_util::sync::CancellationToken;
pub use transport::Transport;
