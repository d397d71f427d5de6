//! WebSocket provider for hostlink.
//!
//! Each binary WebSocket message carries exactly one hostlink frame. Text,
//! ping and pong messages are not frames and are ignored. The socket is
//! driven by two tasks: a reader that hands incoming frames to the message
//! callbacks, and a writer that drains an unbounded queue so
//! [`Provider::transmit`] never blocks.
//!
//! ```rust,no_run
//! use hostlink_connector_websocket::WebSocketProvider;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let provider = WebSocketProvider::connect("ws://127.0.0.1:9300").await?;
//! # Ok(())
//! # }
//! ```

use futures_util::{SinkExt, StreamExt};
use hostlink_core::{MessageCallback, Provider, Subject, Unsubscribe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

/// Failure opening a WebSocket channel.
#[derive(Debug, thiserror::Error)]
pub enum WebSocketError {
    #[error("websocket handshake failed: {0}")]
    Handshake(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

struct Shared {
    callbacks: Subject<(), Vec<u8>>,
    open: AtomicBool,
    disposed: AtomicBool,
}

/// A [`Provider`] over one WebSocket connection.
pub struct WebSocketProvider {
    shared: Arc<Shared>,
    outbound: Mutex<Option<mpsc::UnboundedSender<Vec<u8>>>>,
    shutdown: CancellationToken,
}

impl WebSocketProvider {
    /// Dial `url` as a client.
    pub async fn connect(url: &str) -> Result<Self, WebSocketError> {
        let (ws, _response) = tokio_tungstenite::connect_async(url).await?;
        tracing::debug!(url, "websocket connected");
        Ok(Self::from_stream(ws))
    }

    /// Complete the server side of the WebSocket handshake on `stream`.
    pub async fn accept(stream: TcpStream) -> Result<Self, WebSocketError> {
        let peer = stream.peer_addr()?;
        let ws = tokio_tungstenite::accept_async(stream).await?;
        tracing::debug!(%peer, "websocket accepted");
        Ok(Self::from_stream(ws))
    }

    /// Wrap an established WebSocket. Must be called within a tokio runtime.
    pub fn from_stream<S>(ws: WebSocketStream<S>) -> Self
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let shared = Arc::new(Shared {
            callbacks: Subject::new(),
            open: AtomicBool::new(true),
            disposed: AtomicBool::new(false),
        });
        let shutdown = CancellationToken::new();
        let (outbound, mut queue) = mpsc::unbounded_channel::<Vec<u8>>();
        let (mut sink, mut stream) = ws.split();

        let reader_shared = shared.clone();
        let reader_shutdown = shutdown.clone();
        tokio::spawn(async move {
            loop {
                let message = tokio::select! {
                    () = reader_shutdown.cancelled() => break,
                    message = stream.next() => message,
                };
                match message {
                    Some(Ok(Message::Binary(data))) => {
                        if reader_shared.disposed.load(Ordering::Acquire) {
                            break;
                        }
                        reader_shared.callbacks.emit(&(), &data.to_vec());
                    }
                    Some(Ok(Message::Close(frame))) => {
                        tracing::debug!(?frame, "websocket closed by peer");
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        tracing::debug!(error = %e, "websocket read failed");
                        break;
                    }
                    None => break,
                }
            }
            reader_shared.open.store(false, Ordering::Release);
        });

        let writer_shared = shared.clone();
        tokio::spawn(async move {
            while let Some(bytes) = queue.recv().await {
                if let Err(e) = sink.send(Message::binary(bytes)).await {
                    tracing::debug!(error = %e, "websocket write failed");
                    writer_shared.open.store(false, Ordering::Release);
                    return;
                }
            }
            // Queue closed by dispose: say goodbye.
            let _ = sink.close().await;
        });

        Self {
            shared,
            outbound: Mutex::new(Some(outbound)),
            shutdown,
        }
    }

    /// Whether the socket is still open in both directions.
    pub fn is_open(&self) -> bool {
        self.shared.open.load(Ordering::Acquire)
    }
}

impl Provider for WebSocketProvider {
    fn is_usable(&self) -> bool {
        self.is_open() && !self.shared.disposed.load(Ordering::Acquire)
    }

    fn transmit(&self, bytes: Vec<u8>) {
        let outbound = self.outbound.lock().unwrap_or_else(|e| e.into_inner());
        let queued = match outbound.as_ref() {
            Some(tx) => tx.send(bytes).is_ok(),
            None => false,
        };
        if !queued {
            tracing::trace!("websocket gone; frame dropped");
        }
    }

    fn on_message(&self, callback: MessageCallback) -> Unsubscribe {
        let id = self
            .shared
            .callbacks
            .listen((), move |bytes: &Vec<u8>| callback(bytes));
        let shared = Arc::downgrade(&self.shared);
        Unsubscribe::new(move || {
            if let Some(shared) = shared.upgrade() {
                shared.callbacks.remove(&(), id);
            }
        })
    }

    fn dispose(&self) {
        if self.shared.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.shared.callbacks.clear();
        self.shutdown.cancel();
        // Dropping the sender lets the writer flush what is queued, then close.
        self.outbound
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        tracing::debug!("websocket provider disposed");
    }
}

impl Drop for WebSocketProvider {
    fn drop(&mut self) {
        self.dispose();
    }
}
