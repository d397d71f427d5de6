//! The transport: one provider, one handshake, many requests and streams.
//!
//! Every incoming frame goes through [`Inner::handle_frame`]: it is decoded
//! against the registry (undecodable frames are dropped), matched against the
//! pending-request table by request id, then emitted to the listeners of its
//! action in registration order.

use crate::error::TransportError;
use crate::handshake;
use crate::request_id::next_request_id;
use hostlink_core::{
    ActionId, ActionKind, CODEC_VERSION, ConnectionStatus, Envelope, Provider, Registry,
    RequestMethod, StatusObservable, Subject, TransportConfig, Unsubscribe, decode, encode,
};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::runtime::Handle;
use tokio::sync::{oneshot, watch};
use tokio_util::sync::CancellationToken;

/// Lock a mutex, recovering the data if a panicking thread poisoned it.
/// No lock in this crate is held while user code runs.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// What a pending request eventually receives.
pub(crate) type Reply = Result<Envelope, TransportError>;

/// Cleanup run once when a registration is removed or the transport disposed.
pub(crate) type Teardown = Box<dyn FnOnce() + Send>;

struct PendingRequest {
    expects: ActionId,
    reply: oneshot::Sender<Reply>,
}

pub(crate) enum ReadyState {
    Idle,
    InFlight(Arc<watch::Sender<Option<bool>>>),
    Resolved(bool),
}

pub(crate) struct Inner {
    pub(crate) provider: Box<dyn Provider>,
    pub(crate) registry: Arc<Registry>,
    pub(crate) config: TransportConfig,
    pub(crate) status: StatusObservable,
    pub(crate) listeners: Subject<ActionId, Envelope>,
    pub(crate) shutdown: CancellationToken,
    pending: Mutex<HashMap<String, PendingRequest>>,
    ready: Mutex<ReadyState>,
    negotiated: Mutex<Option<u8>>,
    disposed: AtomicBool,
    provider_unsub: Mutex<Option<Unsubscribe>>,
    registrations: Mutex<HashMap<u64, Teardown>>,
    next_registration: AtomicU64,
}

impl Inner {
    pub(crate) fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    /// Preconditions shared by every outgoing operation.
    pub(crate) fn ensure_operational(&self) -> Result<(), TransportError> {
        if self.is_disposed() {
            return Err(TransportError::Disposed);
        }
        if !self.provider.is_usable() {
            self.status.update(|current| {
                (current == ConnectionStatus::Connected).then_some(ConnectionStatus::Disconnected)
            });
            return Err(TransportError::EnvironmentUnusable);
        }
        match *lock(&self.negotiated) {
            Some(negotiated) if negotiated != CODEC_VERSION => {
                Err(TransportError::UnsupportedProtocolVersion {
                    negotiated,
                    supported: CODEC_VERSION,
                })
            }
            _ => Ok(()),
        }
    }

    pub(crate) fn action(
        &self,
        method: &str,
        kind: ActionKind,
    ) -> Result<ActionId, TransportError> {
        Ok(self.registry.action(method, kind)?)
    }

    pub(crate) fn register_pending(
        &self,
        request_id: String,
        expects: ActionId,
    ) -> oneshot::Receiver<Reply> {
        let (reply, rx) = oneshot::channel();
        lock(&self.pending).insert(request_id, PendingRequest { expects, reply });
        rx
    }

    pub(crate) fn remove_pending(&self, request_id: &str) {
        lock(&self.pending).remove(request_id);
    }

    pub(crate) fn transmit(&self, envelope: &Envelope) {
        if self.is_disposed() {
            return;
        }
        self.provider.transmit(encode(envelope));
    }

    /// Encode and send a typed payload, checking preconditions first.
    pub(crate) fn send_payload<T: Serialize>(
        &self,
        request_id: &str,
        action: ActionId,
        payload: &T,
    ) -> Result<(), TransportError> {
        self.ensure_operational()?;
        let envelope = Envelope::with_payload(request_id, action, payload)?;
        self.transmit(&envelope);
        Ok(())
    }

    pub(crate) fn add_registration(&self, teardown: Teardown) -> u64 {
        let key = self.next_registration.fetch_add(1, Ordering::Relaxed);
        lock(&self.registrations).insert(key, teardown);
        key
    }

    pub(crate) fn take_registration(&self, key: u64) -> Option<Teardown> {
        lock(&self.registrations).remove(&key)
    }

    fn handle_frame(&self, bytes: &[u8]) {
        if self.is_disposed() {
            return;
        }
        let envelope = match decode(&self.registry, bytes) {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::trace!(error = %e, len = bytes.len(), "discarding foreign frame");
                return;
            }
        };

        let pending = {
            let mut pending = lock(&self.pending);
            let correlated = pending
                .get(&envelope.request_id)
                .is_some_and(|p| p.expects == envelope.action);
            if correlated {
                pending.remove(&envelope.request_id)
            } else {
                None
            }
        };

        self.listeners.emit(&envelope.action, &envelope);

        if let Some(pending) = pending {
            // The requester may already have given up; that is fine.
            let _ = pending.reply.send(Ok(envelope));
        }
    }

    pub(crate) fn finish_handshake(&self, connected: bool) {
        {
            let mut ready = lock(&self.ready);
            if !matches!(*ready, ReadyState::InFlight(_)) {
                return;
            }
            *ready = ReadyState::Resolved(connected);
        }
        if connected {
            *lock(&self.negotiated) = Some(CODEC_VERSION);
        }
        self.status.update(|_| {
            if self.is_disposed() {
                None
            } else if connected {
                Some(ConnectionStatus::Connected)
            } else {
                Some(ConnectionStatus::Disconnected)
            }
        });
        tracing::debug!(connected, "handshake settled");
    }

    fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.shutdown.cancel();

        let in_flight = {
            let mut ready = lock(&self.ready);
            match std::mem::replace(&mut *ready, ReadyState::Resolved(false)) {
                ReadyState::InFlight(done) => Some(done),
                _ => None,
            }
        };
        if let Some(done) = in_flight {
            done.send_replace(Some(false));
        }
        self.status.set(ConnectionStatus::Disconnected);

        let pending: Vec<_> = lock(&self.pending).drain().collect();
        let rejected = pending.len();
        for (_, request) in pending {
            let _ = request.reply.send(Err(TransportError::Disposed));
        }

        let teardowns: Vec<_> = lock(&self.registrations).drain().collect();
        for (_, teardown) in teardowns {
            teardown();
        }

        if let Some(unsub) = lock(&self.provider_unsub).take() {
            unsub.call();
        }
        self.provider.dispose();
        self.listeners.clear();

        tracing::debug!(rejected, "transport disposed");
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.dispose();
    }
}

/// Removes a pending entry however the request future ends.
struct PendingGuard<'a> {
    inner: &'a Inner,
    request_id: &'a str,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.inner.remove_pending(self.request_id);
    }
}

/// Request/response/subscription transport over a single [`Provider`].
///
/// Cheap to clone; clones share the same connection. Disposal is terminal:
/// afterwards every operation fails with [`TransportError::Disposed`].
///
/// ```rust,no_run
/// use hostlink_core::{methods, Registry, TransportConfig};
/// use hostlink_connector_memory::MemoryProvider;
/// use hostlink_transport::Transport;
/// use std::sync::Arc;
///
/// methods! {
///     pub request Echo("echo") { request: String, response: String }
/// }
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let registry = Arc::new(Registry::builder().request::<Echo>().build()?);
/// let (host_side, product_side) = MemoryProvider::pair();
///
/// let host = Transport::new(host_side, registry.clone(), TransportConfig::default());
/// let product = Transport::new(product_side, registry, TransportConfig::default());
///
/// let _echo = product.handle_request::<Echo, _, _>(|text| async move { text })?;
/// let reply = host.request::<Echo>("hi".to_string(), None).await?;
/// assert_eq!(reply, "hi");
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Transport {
    pub(crate) inner: Arc<Inner>,
}

impl Transport {
    /// Bind a transport to `provider`.
    ///
    /// If the provider is usable, the handshake responder is installed
    /// immediately so the peer can connect to us before we ever call
    /// [`is_ready`](Self::is_ready).
    pub fn new(provider: impl Provider, registry: Arc<Registry>, config: TransportConfig) -> Self {
        let inner = Arc::new(Inner {
            provider: Box::new(provider),
            registry,
            config,
            status: StatusObservable::new(ConnectionStatus::Disconnected),
            listeners: Subject::new(),
            shutdown: CancellationToken::new(),
            pending: Mutex::new(HashMap::new()),
            ready: Mutex::new(ReadyState::Idle),
            negotiated: Mutex::new(None),
            disposed: AtomicBool::new(false),
            provider_unsub: Mutex::new(None),
            registrations: Mutex::new(HashMap::new()),
            next_registration: AtomicU64::new(0),
        });

        let weak = Arc::downgrade(&inner);
        let unsub = inner.provider.on_message(Box::new(move |bytes: &[u8]| {
            if let Some(inner) = weak.upgrade() {
                inner.handle_frame(bytes);
            }
        }));
        *lock(&inner.provider_unsub) = Some(unsub);

        if inner.provider.is_usable() {
            handshake::install_responder(&inner);
        } else {
            tracing::debug!("provider not usable; handshake responder not installed");
        }

        Self { inner }
    }

    /// Bind with [`TransportConfig::default`].
    pub fn with_defaults(provider: impl Provider, registry: Arc<Registry>) -> Self {
        Self::new(provider, registry, TransportConfig::default())
    }

    /// Method table this transport routes by.
    pub fn registry(&self) -> &Registry {
        &self.inner.registry
    }

    /// Timing settings this transport was built with.
    pub fn config(&self) -> &TransportConfig {
        &self.inner.config
    }

    /// Current connection status.
    pub fn connection_status(&self) -> ConnectionStatus {
        self.inner.status.get()
    }

    /// Observe status changes. `callback` is called with the current status
    /// before this returns.
    pub fn on_status_change(
        &self,
        callback: impl Fn(ConnectionStatus) + Send + Sync + 'static,
    ) -> Unsubscribe {
        self.inner.status.subscribe(callback)
    }

    /// Codec version agreed with the peer, once connected.
    pub fn negotiated_version(&self) -> Option<u8> {
        *lock(&self.inner.negotiated)
    }

    /// Whether [`dispose`](Self::dispose) has run.
    pub fn is_disposed(&self) -> bool {
        self.inner.is_disposed()
    }

    /// Whether the peer answered the handshake.
    ///
    /// The first call starts the handshake; concurrent callers share the
    /// same attempt and later calls read the cached outcome. Returns `false`
    /// on rejection, timeout, disposal, or when the provider is not usable.
    pub async fn is_ready(&self) -> bool {
        let inner = &self.inner;
        if inner.is_disposed() {
            return false;
        }
        let Ok(runtime) = Handle::try_current() else {
            tracing::warn!("is_ready polled outside a tokio runtime; handshake not started");
            return false;
        };

        let (mut rx, started) = {
            let mut ready = lock(&inner.ready);
            match *ready {
                ReadyState::Resolved(connected) => return connected,
                ReadyState::InFlight(ref done) => (done.subscribe(), None),
                ReadyState::Idle => {
                    if !inner.provider.is_usable() {
                        return false;
                    }
                    let done = Arc::new(watch::channel(None).0);
                    let rx = done.subscribe();
                    *ready = ReadyState::InFlight(done.clone());
                    (rx, Some(done))
                }
            }
        };

        if let Some(done) = started {
            inner.status.update(|_| {
                (!inner.is_disposed()).then_some(ConnectionStatus::Connecting)
            });
            runtime.spawn(handshake::initiate(Arc::downgrade(inner), done));
        }

        match rx.wait_for(Option::is_some).await {
            Ok(outcome) => (*outcome).unwrap_or(false),
            Err(_) => false,
        }
    }

    /// Await the handshake, mapping failure to the right error.
    pub(crate) async fn ready(&self) -> Result<(), TransportError> {
        if !self.is_ready().await {
            return Err(if self.inner.is_disposed() {
                TransportError::Disposed
            } else {
                TransportError::NotReady
            });
        }
        self.inner.ensure_operational()
    }

    /// Call `M` on the peer and wait for its response.
    ///
    /// Settles exactly once: with the peer's response, with
    /// [`TransportError::RequestAborted`] if `cancel` fires first, with
    /// [`TransportError::RequestTimedOut`] if a request timeout is
    /// configured, or with [`TransportError::Disposed`].
    pub async fn request<M: RequestMethod>(
        &self,
        payload: M::Request,
        cancel: Option<&CancellationToken>,
    ) -> Result<M::Response, TransportError> {
        let inner = self.inner.as_ref();
        inner.ensure_operational()?;
        let request_action = inner.action(M::NAME, ActionKind::Request)?;
        let response_action = inner.action(M::NAME, ActionKind::Response)?;
        self.ready().await?;

        let request_id = next_request_id();
        let envelope = Envelope::with_payload(request_id.as_str(), request_action, &payload)?;
        if cancel.is_some_and(CancellationToken::is_cancelled) {
            return Err(TransportError::RequestAborted);
        }

        let reply = inner.register_pending(request_id.clone(), response_action);
        let _pending = PendingGuard {
            inner,
            request_id: request_id.as_str(),
        };
        // Disposal may have drained the table just before we registered.
        if inner.is_disposed() {
            return Err(TransportError::Disposed);
        }
        inner.transmit(&envelope);
        tracing::trace!(method = M::NAME, %request_id, "request sent");

        let response = self.await_reply(reply, cancel).await?;
        Ok(response.payload()?)
    }

    async fn await_reply(
        &self,
        reply: oneshot::Receiver<Reply>,
        cancel: Option<&CancellationToken>,
    ) -> Reply {
        let aborted = async {
            match cancel {
                Some(token) => token.cancelled().await,
                None => std::future::pending::<()>().await,
            }
        };
        let timed_out = async {
            match self.inner.config.request_timeout() {
                Some(timeout) => tokio::time::sleep(timeout).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            reply = reply => reply.unwrap_or_else(|_| Err(TransportError::Disposed)),
            () = aborted => Err(TransportError::RequestAborted),
            () = timed_out => Err(TransportError::RequestTimedOut),
            () = self.inner.shutdown.cancelled() => Err(TransportError::Disposed),
        }
    }

    /// Observe every decoded envelope carrying `action`.
    pub fn listen(
        &self,
        action: ActionId,
        callback: impl Fn(&Envelope) + Send + Sync + 'static,
    ) -> Result<Unsubscribe, TransportError> {
        if self.inner.is_disposed() {
            return Err(TransportError::Disposed);
        }
        let id = self.inner.listeners.listen(action, callback);
        let weak = Arc::downgrade(&self.inner);
        Ok(Unsubscribe::new(move || {
            if let Some(inner) = weak.upgrade() {
                inner.listeners.remove(&action, id);
            }
        }))
    }

    /// Send an arbitrary envelope, e.g. an unsolicited push.
    pub fn post_envelope(&self, envelope: &Envelope) -> Result<(), TransportError> {
        self.inner.ensure_operational()?;
        self.inner.transmit(envelope);
        Ok(())
    }

    /// Tear everything down. Idempotent.
    ///
    /// Aborts an in-flight handshake, rejects pending requests with
    /// [`TransportError::Disposed`], tears down every handler registration,
    /// and disposes the provider.
    pub fn dispose(&self) {
        self.inner.dispose();
    }
}

impl fmt::Debug for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transport")
            .field("status", &self.inner.status.get())
            .field("disposed", &self.inner.is_disposed())
            .field("pending", &lock(&self.inner.pending).len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hostlink_core::MessageCallback;
    use std::future::Future;
    use std::pin::pin;
    use std::task::{Context, Poll, Waker};
    use std::time::Duration;

    /// A channel that is always usable and never delivers anything.
    struct Silent;

    impl Provider for Silent {
        fn is_usable(&self) -> bool {
            true
        }
        fn transmit(&self, _bytes: Vec<u8>) {}
        fn on_message(&self, _callback: MessageCallback) -> Unsubscribe {
            Unsubscribe::noop()
        }
        fn dispose(&self) {}
    }

    fn silent() -> Transport {
        Transport::new(Silent, Arc::new(Registry::empty()), TransportConfig::default())
    }

    #[tokio::test]
    async fn wait_registered_after_dispose_still_settles() {
        let transport = silent();
        transport.dispose();

        // An entry that slipped in after dispose drained the table.
        let reply = transport
            .inner
            .register_pending("late".to_string(), ActionId::HANDSHAKE_RESPONSE);
        let result = tokio::time::timeout(
            Duration::from_secs(1),
            transport.await_reply(reply, None),
        )
        .await
        .expect("wait must not hang after dispose");
        assert!(matches!(result, Err(TransportError::Disposed)), "{result:?}");
    }

    #[test]
    fn is_ready_outside_runtime_reports_false() {
        let transport = silent();
        let mut ready = pin!(transport.is_ready());
        let mut cx = Context::from_waker(Waker::noop());
        assert!(matches!(ready.as_mut().poll(&mut cx), Poll::Ready(false)));

        // Nothing was cached; the transport is still idle.
        assert!(matches!(*lock(&transport.inner.ready), ReadyState::Idle));
        assert_eq!(transport.connection_status(), ConnectionStatus::Disconnected);
    }
}
