//! Host side: accept products and serve them.

use crate::protocol::{self, Echo, Tick, Ticks};
use hostlink_connector_websocket::WebSocketProvider;
use hostlink_core::TransportConfig;
use hostlink_transport::{CancellationToken, Transport};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::net::{TcpListener, TcpStream};

pub async fn run(addr: SocketAddr, config: TransportConfig) -> anyhow::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    tracing::info!("Listening on ws://{}", addr);

    loop {
        let (stream, peer) = listener.accept().await?;
        let config = config.clone();
        tokio::spawn(async move {
            if let Err(e) = serve(stream, config).await {
                tracing::warn!("Connection error from {}: {}", peer, e);
            }
        });
    }
}

async fn serve(stream: TcpStream, config: TransportConfig) -> anyhow::Result<()> {
    let provider = Arc::new(WebSocketProvider::accept(stream).await?);
    let transport = Transport::new(provider.clone(), protocol::registry()?, config);

    let _echo = transport.handle_request::<Echo, _, _>(|req| async move {
        tracing::info!(text = %req.text, "echo");
        if req.shout {
            req.text.to_uppercase()
        } else {
            req.text
        }
    })?;

    let _ticks = transport.handle_subscription::<Ticks, _, _>(|req, sink| {
        let stop = CancellationToken::new();
        let cancelled = stop.clone();
        tokio::spawn(async move {
            let mut every = tokio::time::interval(Duration::from_millis(req.interval_ms.max(1)));
            for seq in 0..req.count {
                tokio::select! {
                    () = cancelled.cancelled() => return,
                    _ = every.tick() => {}
                }
                if let Err(e) = sink.send(&Tick { seq, unix_ms: unix_ms() }) {
                    tracing::debug!(error = %e, "tick not delivered");
                    return;
                }
            }
            let _ = sink.interrupt();
        });
        move || stop.cancel()
    })?;

    while provider.is_open() {
        tokio::time::sleep(Duration::from_millis(200)).await;
    }
    tracing::debug!("product went away");
    transport.dispose();
    Ok(())
}

fn unix_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
