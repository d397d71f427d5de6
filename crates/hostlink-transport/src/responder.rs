//! Serving methods to the peer.
//!
//! A handler registration is a set of action listeners plus a teardown kept
//! in the transport, so [`Transport::dispose`] can unwind every registration
//! the same way [`Registration::unregister`] does.

use crate::error::TransportError;
use crate::transport::{Inner, Teardown, Transport, lock};
use hostlink_core::{
    ActionId, ActionKind, Envelope, ListenerId, RequestMethod, SubscriptionMethod,
};
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use tokio::runtime::Handle;

/// Keeps a handler installed until [`unregister`](Self::unregister) or
/// disposal. Dropping it leaves the handler in place.
#[must_use = "a handler stays installed until unregister() or dispose()"]
pub struct Registration {
    key: u64,
    inner: Weak<Inner>,
}

impl Registration {
    /// Remove the handler. Active subscriptions it served are torn down.
    pub fn unregister(self) {
        let Some(inner) = self.inner.upgrade() else {
            return;
        };
        if let Some(teardown) = inner.take_registration(self.key) {
            teardown();
        }
    }
}

impl fmt::Debug for Registration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registration").field("key", &self.key).finish()
    }
}

fn listener_teardown(inner: &Arc<Inner>, listeners: Vec<(ActionId, ListenerId)>) -> Teardown {
    let weak = Arc::downgrade(inner);
    Box::new(move || {
        if let Some(inner) = weak.upgrade() {
            for (action, id) in &listeners {
                inner.listeners.remove(action, *id);
            }
        }
    })
}

/// One served subscription. `teardown` is `None` while the handler runs.
struct Slot {
    closed: Arc<AtomicBool>,
    teardown: Option<Teardown>,
}

type Slots = Arc<Mutex<HashMap<String, Slot>>>;

/// Retire the slot for `request_id` if it is still the one owning `closed`.
fn retire(slots: &Mutex<HashMap<String, Slot>>, request_id: &str, closed: &Arc<AtomicBool>) {
    let teardown = {
        let mut slots = lock(slots);
        match slots.get(request_id) {
            Some(slot) if Arc::ptr_eq(&slot.closed, closed) => {
                slots.remove(request_id).and_then(|slot| slot.teardown)
            }
            _ => None,
        }
    };
    if let Some(teardown) = teardown {
        teardown();
    }
}

/// Responder-side handle to one subscription.
///
/// Cloneable and `Send`, so items can be pushed from any task.
pub struct SubscriptionSink<M: SubscriptionMethod> {
    inner: Weak<Inner>,
    request_id: Arc<str>,
    receive: ActionId,
    interrupt: ActionId,
    closed: Arc<AtomicBool>,
    slots: Weak<Mutex<HashMap<String, Slot>>>,
    _method: PhantomData<fn() -> M>,
}

impl<M: SubscriptionMethod> Clone for SubscriptionSink<M> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            request_id: self.request_id.clone(),
            receive: self.receive,
            interrupt: self.interrupt,
            closed: self.closed.clone(),
            slots: self.slots.clone(),
            _method: PhantomData,
        }
    }
}

impl<M: SubscriptionMethod> SubscriptionSink<M> {
    /// The consumer's subscription id.
    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    /// Whether the consumer stopped or we interrupted.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn upgrade(&self) -> Result<Arc<Inner>, TransportError> {
        self.inner.upgrade().ok_or(TransportError::Disposed)
    }

    /// Push one item to the consumer.
    pub fn send(&self, item: &M::Receive) -> Result<(), TransportError> {
        if self.is_closed() {
            return Err(TransportError::SubscriptionClosed);
        }
        self.upgrade()?
            .send_payload(&self.request_id, self.receive, item)
    }

    /// End the stream from this side. The consumer's interrupt callbacks
    /// fire and the handler's unsubscribe runs. Later calls do nothing.
    pub fn interrupt(&self) -> Result<(), TransportError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let sent = self
            .upgrade()
            .and_then(|inner| inner.send_payload(&self.request_id, self.interrupt, &()));
        if let Some(slots) = self.slots.upgrade() {
            retire(&slots, &self.request_id, &self.closed);
        }
        tracing::debug!(
            method = M::NAME,
            request_id = %self.request_id,
            "subscription interrupted"
        );
        sent
    }
}

impl<M: SubscriptionMethod> fmt::Debug for SubscriptionSink<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionSink")
            .field("method", &M::NAME)
            .field("request_id", &self.request_id)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl Transport {
    fn registration_preconditions(&self) -> Result<Handle, TransportError> {
        if self.inner.is_disposed() {
            return Err(TransportError::Disposed);
        }
        Handle::try_current().map_err(|_| TransportError::NoRuntime)
    }

    /// Answer `M` requests from the peer.
    ///
    /// Each request runs `handler` on its own task; the response is sent
    /// when the future completes. A future that never completes never
    /// answers.
    pub fn handle_request<M, F, Fut>(&self, handler: F) -> Result<Registration, TransportError>
    where
        M: RequestMethod,
        F: Fn(M::Request) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = M::Response> + Send + 'static,
    {
        let inner = &self.inner;
        let request_action = inner.action(M::NAME, ActionKind::Request)?;
        let response_action = inner.action(M::NAME, ActionKind::Response)?;
        let runtime = self.registration_preconditions()?;

        let weak = Arc::downgrade(inner);
        let id = inner.listeners.listen(request_action, move |envelope: &Envelope| {
            let request: M::Request = match envelope.payload() {
                Ok(request) => request,
                Err(e) => {
                    tracing::warn!(method = M::NAME, error = %e, "undecodable request payload");
                    return;
                }
            };
            let request_id = envelope.request_id.clone();
            let response = handler(request);
            let weak = weak.clone();
            runtime.spawn(async move {
                let response = response.await;
                let Some(inner) = weak.upgrade() else {
                    return;
                };
                match inner.send_payload(&request_id, response_action, &response) {
                    Ok(()) => tracing::trace!(method = M::NAME, %request_id, "response sent"),
                    Err(e) => tracing::debug!(
                        method = M::NAME,
                        %request_id,
                        error = %e,
                        "response dropped"
                    ),
                }
            });
        });

        let key = inner.add_registration(listener_teardown(inner, vec![(request_action, id)]));
        tracing::debug!(method = M::NAME, "request handler registered");
        Ok(Registration {
            key,
            inner: Arc::downgrade(inner),
        })
    }

    /// Serve `M` subscriptions to the peer.
    ///
    /// `handler` runs once per new subscription id and returns the
    /// unsubscribe to call when the consumer stops, the sink interrupts, the
    /// registration is removed, or the transport is disposed. A repeated
    /// start for an active id is ignored.
    pub fn handle_subscription<M, F, U>(&self, handler: F) -> Result<Registration, TransportError>
    where
        M: SubscriptionMethod,
        F: Fn(M::Start, SubscriptionSink<M>) -> U + Send + Sync + 'static,
        U: FnOnce() + Send + 'static,
    {
        let inner = &self.inner;
        let start_action = inner.action(M::NAME, ActionKind::Start)?;
        let stop_action = inner.action(M::NAME, ActionKind::Stop)?;
        let receive = inner.action(M::NAME, ActionKind::Receive)?;
        let interrupt = inner.action(M::NAME, ActionKind::Interrupt)?;
        self.registration_preconditions()?;

        let slots: Slots = Arc::default();

        let weak = Arc::downgrade(inner);
        let served = slots.clone();
        let on_start = inner.listeners.listen(start_action, move |envelope: &Envelope| {
            let closed = {
                let mut slots = lock(&served);
                if slots.contains_key(&envelope.request_id) {
                    tracing::trace!(
                        method = M::NAME,
                        request_id = %envelope.request_id,
                        "duplicate start ignored"
                    );
                    return;
                }
                let closed = Arc::new(AtomicBool::new(false));
                slots.insert(
                    envelope.request_id.clone(),
                    Slot {
                        closed: closed.clone(),
                        teardown: None,
                    },
                );
                closed
            };

            let start: M::Start = match envelope.payload() {
                Ok(start) => start,
                Err(e) => {
                    tracing::warn!(method = M::NAME, error = %e, "undecodable start payload");
                    lock(&served).remove(&envelope.request_id);
                    return;
                }
            };

            let sink = SubscriptionSink::<M> {
                inner: weak.clone(),
                request_id: Arc::from(envelope.request_id.as_str()),
                receive,
                interrupt,
                closed: closed.clone(),
                slots: Arc::downgrade(&served),
                _method: PhantomData,
            };
            let unsubscribe: Teardown = Box::new(handler(start, sink));

            // Stopped or interrupted while the handler ran: unwind right away.
            let leftover = {
                let mut slots = lock(&served);
                match slots.get_mut(&envelope.request_id) {
                    Some(slot) if Arc::ptr_eq(&slot.closed, &closed) => {
                        slot.teardown = Some(unsubscribe);
                        None
                    }
                    _ => Some(unsubscribe),
                }
            };
            match leftover {
                Some(unsubscribe) => unsubscribe(),
                None => tracing::debug!(
                    method = M::NAME,
                    request_id = %envelope.request_id,
                    "subscription started"
                ),
            }
        });

        let served = slots.clone();
        let on_stop = inner.listeners.listen(stop_action, move |envelope: &Envelope| {
            let Some(slot) = lock(&served).remove(&envelope.request_id) else {
                tracing::trace!(
                    method = M::NAME,
                    request_id = %envelope.request_id,
                    "stop for unknown subscription"
                );
                return;
            };
            slot.closed.store(true, Ordering::Release);
            if let Some(teardown) = slot.teardown {
                teardown();
            }
            tracing::debug!(
                method = M::NAME,
                request_id = %envelope.request_id,
                "subscription stopped"
            );
        });

        let listeners =
            listener_teardown(inner, vec![(start_action, on_start), (stop_action, on_stop)]);
        let teardown: Teardown = Box::new(move || {
            listeners();
            let active: Vec<Slot> = lock(&slots).drain().map(|(_, slot)| slot).collect();
            for slot in active {
                slot.closed.store(true, Ordering::Release);
                if let Some(teardown) = slot.teardown {
                    teardown();
                }
            }
        });

        let key = inner.add_registration(teardown);
        tracing::debug!(method = M::NAME, "subscription handler registered");
        Ok(Registration {
            key,
            inner: Arc::downgrade(inner),
        })
    }
}
