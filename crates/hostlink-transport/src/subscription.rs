//! Consuming subscriptions.

use crate::error::TransportError;
use crate::request_id::next_request_id;
use crate::transport::{Inner, Transport, lock};
use futures_util::Stream;
use hostlink_core::{ActionId, ActionKind, Envelope, ListenerId, SubscriptionMethod};
use std::fmt;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::task::{Context, Poll};
use tokio::sync::mpsc;

type InterruptCallback = Box<dyn FnOnce() + Send>;

struct State {
    inner: Weak<Inner>,
    request_id: String,
    stop: ActionId,
    listeners: Mutex<Vec<(ActionId, ListenerId)>>,
    closed: AtomicBool,
    interrupted: AtomicBool,
    on_interrupt: Mutex<Vec<InterruptCallback>>,
}

impl State {
    fn detach(&self) {
        let listeners = std::mem::take(&mut *lock(&self.listeners));
        if let Some(inner) = self.inner.upgrade() {
            for (action, id) in listeners {
                inner.listeners.remove(&action, id);
            }
        }
    }

    fn interrupted_by_peer(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.interrupted.store(true, Ordering::Release);
        self.detach();
        let callbacks = std::mem::take(&mut *lock(&self.on_interrupt));
        tracing::debug!(
            request_id = %self.request_id,
            callbacks = callbacks.len(),
            "subscription interrupted by peer"
        );
        for callback in callbacks {
            callback();
        }
    }
}

/// Consumer-side handle to an open subscription.
///
/// Dropping it does not stop the stream; call [`stop`](Self::stop).
#[must_use = "the subscription stays open until stop() is called"]
pub struct Subscription {
    state: Arc<State>,
}

impl Subscription {
    /// The id shared by every envelope of this subscription.
    pub fn request_id(&self) -> &str {
        &self.state.request_id
    }

    /// Neither stopped nor interrupted.
    pub fn is_active(&self) -> bool {
        !self.state.closed.load(Ordering::Acquire)
    }

    /// Whether the peer ended the stream.
    pub fn is_interrupted(&self) -> bool {
        self.state.interrupted.load(Ordering::Acquire)
    }

    /// Run `callback` once when the peer interrupts. Runs immediately if it
    /// already has.
    pub fn on_interrupt(&self, callback: impl FnOnce() + Send + 'static) {
        {
            let mut callbacks = lock(&self.state.on_interrupt);
            if !self.state.interrupted.load(Ordering::Acquire) {
                if !self.state.closed.load(Ordering::Acquire) {
                    callbacks.push(Box::new(callback));
                }
                return;
            }
        }
        callback();
    }

    /// Stop receiving and tell the peer. Does nothing after a previous stop
    /// or an interrupt.
    pub fn stop(&self) {
        let state = &self.state;
        if state.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        state.detach();
        lock(&state.on_interrupt).clear();

        let Some(inner) = state.inner.upgrade() else {
            return;
        };
        match inner.send_payload(&state.request_id, state.stop, &()) {
            Ok(()) => tracing::debug!(request_id = %state.request_id, "subscription stopped"),
            Err(e) => tracing::debug!(request_id = %state.request_id, error = %e, "stop not sent"),
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("request_id", &self.state.request_id)
            .field("active", &self.is_active())
            .finish()
    }
}

/// Receive payloads as a [`Stream`].
///
/// The stream ends when the peer interrupts or the transport is disposed.
/// Dropping it stops the subscription.
pub struct SubscriptionStream<T> {
    items: mpsc::UnboundedReceiver<T>,
    subscription: Subscription,
}

impl<T> SubscriptionStream<T> {
    pub fn subscription(&self) -> &Subscription {
        &self.subscription
    }
}

impl<T> Stream for SubscriptionStream<T> {
    type Item = T;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<T>> {
        self.items.poll_recv(cx)
    }
}

impl<T> Drop for SubscriptionStream<T> {
    fn drop(&mut self) {
        self.subscription.stop();
    }
}

impl<T> fmt::Debug for SubscriptionStream<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionStream")
            .field("subscription", &self.subscription)
            .finish()
    }
}

impl Transport {
    /// Open an `M` subscription on the peer.
    ///
    /// `on_receive` is called for every item, in delivery order, until the
    /// subscription is stopped or interrupted.
    pub async fn subscribe<M: SubscriptionMethod>(
        &self,
        start: M::Start,
        on_receive: impl Fn(M::Receive) + Send + Sync + 'static,
    ) -> Result<Subscription, TransportError> {
        let inner = &self.inner;
        inner.ensure_operational()?;
        let start_action = inner.action(M::NAME, ActionKind::Start)?;
        let stop = inner.action(M::NAME, ActionKind::Stop)?;
        let receive = inner.action(M::NAME, ActionKind::Receive)?;
        let interrupt = inner.action(M::NAME, ActionKind::Interrupt)?;
        self.ready().await?;

        let request_id = next_request_id();
        let envelope = Envelope::with_payload(request_id.as_str(), start_action, &start)?;

        let state = Arc::new(State {
            inner: Arc::downgrade(inner),
            request_id: request_id.clone(),
            stop,
            listeners: Mutex::new(Vec::with_capacity(2)),
            closed: AtomicBool::new(false),
            interrupted: AtomicBool::new(false),
            on_interrupt: Mutex::new(Vec::new()),
        });

        let receiver = state.clone();
        let on_item = inner.listeners.listen(receive, move |envelope: &Envelope| {
            if envelope.request_id != receiver.request_id
                || receiver.closed.load(Ordering::Acquire)
            {
                return;
            }
            match envelope.payload::<M::Receive>() {
                Ok(item) => on_receive(item),
                Err(e) => {
                    tracing::warn!(method = M::NAME, error = %e, "undecodable receive payload")
                }
            }
        });

        // Weak: the listener must not keep the state (and its callbacks) alive.
        let interrupted = Arc::downgrade(&state);
        let on_interrupt = inner.listeners.listen(interrupt, move |envelope: &Envelope| {
            if let Some(state) = interrupted.upgrade() {
                if envelope.request_id == state.request_id {
                    state.interrupted_by_peer();
                }
            }
        });
        lock(&state.listeners).extend([(receive, on_item), (interrupt, on_interrupt)]);
        // Disposal may have cleared the listeners just before we registered.
        if inner.is_disposed() {
            state.closed.store(true, Ordering::Release);
            state.detach();
            return Err(TransportError::Disposed);
        }

        inner.transmit(&envelope);
        tracing::debug!(method = M::NAME, %request_id, "subscription started");
        Ok(Subscription { state })
    }

    /// [`subscribe`](Self::subscribe), delivering items through a stream.
    pub async fn subscribe_stream<M: SubscriptionMethod>(
        &self,
        start: M::Start,
    ) -> Result<SubscriptionStream<M::Receive>, TransportError> {
        // The sender lives only in the receive listener, so the stream ends
        // once that listener is gone: on stop, interrupt or disposal.
        let (tx, items) = mpsc::unbounded_channel();
        let subscription = self
            .subscribe::<M>(start, move |item| {
                let _ = tx.send(item);
            })
            .await?;

        Ok(SubscriptionStream {
            items,
            subscription,
        })
    }
}
