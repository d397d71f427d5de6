//! Connection status observable.

use crate::provider::Unsubscribe;
use crate::subject::Subject;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, Mutex};

/// Connection lifecycle state. Process-local, never sent over the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    /// No handshake has succeeded (or the transport was disposed).
    Disconnected,
    /// Handshake in flight.
    Connecting,
    /// Peer answered the handshake with a compatible version.
    Connected,
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionStatus::Disconnected => "disconnected",
            ConnectionStatus::Connecting => "connecting",
            ConnectionStatus::Connected => "connected",
        };
        f.write_str(s)
    }
}

struct Inner {
    current: Mutex<ConnectionStatus>,
    listeners: Subject<(), ConnectionStatus>,
}

/// Publishes status changes to any number of listeners.
///
/// New subscribers are called with the current value before `subscribe`
/// returns. Setting the value it already holds emits nothing.
#[derive(Clone)]
pub struct StatusObservable {
    inner: Arc<Inner>,
}

impl StatusObservable {
    /// Start at `initial`.
    pub fn new(initial: ConnectionStatus) -> Self {
        Self {
            inner: Arc::new(Inner {
                current: Mutex::new(initial),
                listeners: Subject::new(),
            }),
        }
    }

    /// Current value.
    pub fn get(&self) -> ConnectionStatus {
        *self.inner.current.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Store `status`, notifying listeners if it changed. Returns whether it
    /// changed.
    pub fn set(&self, status: ConnectionStatus) -> bool {
        self.update(|_| Some(status))
    }

    /// Compute the next value from the current one. `f` runs under the
    /// value lock, so a check-then-set inside it cannot interleave with
    /// another update; returning `None` leaves the value untouched.
    pub fn update(&self, f: impl FnOnce(ConnectionStatus) -> Option<ConnectionStatus>) -> bool {
        let status = {
            let mut current = self.inner.current.lock().unwrap_or_else(|e| e.into_inner());
            match f(*current) {
                Some(next) if next != *current => {
                    *current = next;
                    next
                }
                _ => return false,
            }
        };
        tracing::debug!(%status, "connection status changed");
        self.inner.listeners.emit(&(), &status);
        true
    }

    /// Register `callback`, replaying the current value to it immediately.
    pub fn subscribe(
        &self,
        callback: impl Fn(ConnectionStatus) + Send + Sync + 'static,
    ) -> Unsubscribe {
        let callback = Arc::new(callback);
        let replay = callback.clone();
        let id = self
            .inner
            .listeners
            .listen((), move |status: &ConnectionStatus| callback(*status));
        replay(self.get());

        let inner = Arc::downgrade(&self.inner);
        Unsubscribe::new(move || {
            if let Some(inner) = inner.upgrade() {
                inner.listeners.remove(&(), id);
            }
        })
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.inner.listeners.listener_count(&())
    }
}

impl Default for StatusObservable {
    fn default() -> Self {
        Self::new(ConnectionStatus::Disconnected)
    }
}

impl fmt::Debug for StatusObservable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StatusObservable")
            .field("current", &self.get())
            .finish()
    }
}
