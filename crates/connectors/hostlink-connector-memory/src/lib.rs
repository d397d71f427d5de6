//! In-process provider pair.
//!
//! Two [`MemoryProvider`]s share a pair of unbounded queues. Each side runs a
//! pump task that delivers frames to the local callbacks in send order, so
//! delivery is asynchronous like a real cross-context channel.
//!
//! ```rust,no_run
//! # async fn example() {
//! use hostlink_connector_memory::MemoryProvider;
//! use hostlink_core::Provider;
//!
//! let (host, product) = MemoryProvider::pair();
//! let _unsub = product.on_message(Box::new(|bytes: &[u8]| println!("{bytes:?}")));
//! host.transmit(b"hello".to_vec());
//! # }
//! ```

use hostlink_core::{MessageCallback, Provider, Subject, Unsubscribe};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::mpsc;

struct Endpoint {
    callbacks: Subject<(), Vec<u8>>,
    usable: AtomicBool,
    disposed: AtomicBool,
    sent: AtomicUsize,
    received: AtomicUsize,
}

impl Endpoint {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            callbacks: Subject::new(),
            usable: AtomicBool::new(true),
            disposed: AtomicBool::new(false),
            sent: AtomicUsize::new(0),
            received: AtomicUsize::new(0),
        })
    }

    fn deliver(&self, bytes: &Vec<u8>) {
        if self.disposed.load(Ordering::Acquire) {
            return;
        }
        self.received.fetch_add(1, Ordering::Relaxed);
        let delivered = self.callbacks.emit(&(), bytes);
        if delivered == 0 {
            tracing::trace!(len = bytes.len(), "frame dropped: nobody listening");
        }
    }
}

/// One side of an in-process channel.
pub struct MemoryProvider {
    local: Arc<Endpoint>,
    outbound: mpsc::UnboundedSender<Vec<u8>>,
}

impl MemoryProvider {
    /// Create two connected providers.
    ///
    /// Must be called from within a tokio runtime: each side spawns its
    /// delivery pump.
    pub fn pair() -> (Self, Self) {
        let a = Endpoint::new();
        let b = Endpoint::new();
        let (a_to_b, a_rx) = mpsc::unbounded_channel();
        let (b_to_a, b_rx) = mpsc::unbounded_channel();

        tokio::spawn(pump(a_rx, b.clone()));
        tokio::spawn(pump(b_rx, a.clone()));

        (
            Self {
                local: a,
                outbound: a_to_b,
            },
            Self {
                local: b,
                outbound: b_to_a,
            },
        )
    }

    /// Toggle what [`Provider::is_usable`] reports.
    pub fn set_usable(&self, usable: bool) {
        self.local.usable.store(usable, Ordering::Release);
    }

    /// Deliver `bytes` to this side's callbacks as if the peer had sent them.
    pub fn inject(&self, bytes: Vec<u8>) {
        self.local.deliver(&bytes);
    }

    /// Frames handed to [`Provider::transmit`] while not disposed.
    pub fn frames_sent(&self) -> usize {
        self.local.sent.load(Ordering::Relaxed)
    }

    /// Frames delivered to this side, listened to or not.
    pub fn frames_received(&self) -> usize {
        self.local.received.load(Ordering::Relaxed)
    }

    /// Whether [`Provider::dispose`] was called.
    pub fn is_disposed(&self) -> bool {
        self.local.disposed.load(Ordering::Acquire)
    }
}

async fn pump(mut rx: mpsc::UnboundedReceiver<Vec<u8>>, dest: Arc<Endpoint>) {
    while let Some(bytes) = rx.recv().await {
        dest.deliver(&bytes);
    }
    tracing::trace!("memory channel closed");
}

impl Provider for MemoryProvider {
    fn is_usable(&self) -> bool {
        self.local.usable.load(Ordering::Acquire) && !self.is_disposed()
    }

    fn transmit(&self, bytes: Vec<u8>) {
        if self.is_disposed() {
            return;
        }
        self.local.sent.fetch_add(1, Ordering::Relaxed);
        // Fails only after the runtime has dropped the peer pump.
        let _ = self.outbound.send(bytes);
    }

    fn on_message(&self, callback: MessageCallback) -> Unsubscribe {
        let id = self
            .local
            .callbacks
            .listen((), move |bytes: &Vec<u8>| callback(bytes));
        let local = Arc::downgrade(&self.local);
        Unsubscribe::new(move || {
            if let Some(local) = local.upgrade() {
                local.callbacks.remove(&(), id);
            }
        })
    }

    fn dispose(&self) {
        if !self.local.disposed.swap(true, Ordering::AcqRel) {
            self.local.callbacks.clear();
            tracing::debug!("memory provider disposed");
        }
    }
}
