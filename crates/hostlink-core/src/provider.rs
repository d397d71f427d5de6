//! The raw channel a transport is built on.
//!
//! A provider moves opaque byte frames between two execution contexts. It
//! offers no framing, ordering guarantees beyond delivery order, correlation
//! or readiness signal: everything above raw delivery is the transport's job.

use std::fmt;
use std::sync::Arc;

/// Callback invoked for every frame the peer delivers.
pub type MessageCallback = Box<dyn Fn(&[u8]) + Send + Sync>;

/// Handle returned by [`Provider::on_message`].
///
/// Calling [`Unsubscribe::call`] detaches the callback. Dropping the handle
/// without calling it leaves the callback attached.
pub struct Unsubscribe(Option<Box<dyn FnOnce() + Send>>);

impl Unsubscribe {
    /// Wrap a detach closure.
    pub fn new(f: impl FnOnce() + Send + 'static) -> Self {
        Self(Some(Box::new(f)))
    }

    /// A handle that does nothing when called.
    pub fn noop() -> Self {
        Self(None)
    }

    /// Detach the callback. Safe to call once; the handle is consumed.
    pub fn call(mut self) {
        if let Some(f) = self.0.take() {
            f();
        }
    }
}

impl fmt::Debug for Unsubscribe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Unsubscribe")
            .field("armed", &self.0.is_some())
            .finish()
    }
}

/// Bidirectional byte channel between a host and an embedded product.
///
/// Implementations live in connector crates (in-process bus, WebSocket, ...).
/// If [`is_usable`](Provider::is_usable) returns `true`, bytes passed to
/// [`transmit`](Provider::transmit) are eventually delivered to the peer's
/// message callbacks in order.
pub trait Provider: Send + Sync + 'static {
    /// Whether the channel can carry traffic at all. `false` disables every
    /// transport operation.
    fn is_usable(&self) -> bool;

    /// Fire-and-forget send to the peer.
    fn transmit(&self, bytes: Vec<u8>);

    /// Register a callback for incoming frames.
    fn on_message(&self, callback: MessageCallback) -> Unsubscribe;

    /// Release the channel. Further transmits are dropped.
    fn dispose(&self);
}

/// Share one provider between a transport and code that inspects it.
impl<P: Provider + ?Sized> Provider for Arc<P> {
    fn is_usable(&self) -> bool {
        (**self).is_usable()
    }

    fn transmit(&self, bytes: Vec<u8>) {
        (**self).transmit(bytes)
    }

    fn on_message(&self, callback: MessageCallback) -> Unsubscribe {
        (**self).on_message(callback)
    }

    fn dispose(&self) {
        (**self).dispose()
    }
}
