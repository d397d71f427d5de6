//! Product side: connect, call, stream.

use crate::protocol::{self, Echo, EchoRequest, TickRequest, Ticks};
use futures_util::StreamExt;
use hostlink_connector_websocket::WebSocketProvider;
use hostlink_core::{ConnectionStatus, TransportConfig};
use hostlink_transport::Transport;

pub async fn run(
    url: &str,
    config: TransportConfig,
    messages: Vec<String>,
    shout: bool,
    ticks: u32,
) -> anyhow::Result<()> {
    let provider = WebSocketProvider::connect(url).await?;
    let transport = Transport::new(provider, protocol::registry()?, config);
    let _status = transport.on_status_change(|status: ConnectionStatus| {
        tracing::info!(%status, "connection");
    });

    if !transport.is_ready().await {
        anyhow::bail!("host at {url} did not answer the handshake");
    }

    for text in messages {
        let reply = transport.request::<Echo>(EchoRequest { text, shout }, None).await?;
        println!("{reply}");
    }

    let mut stream = transport
        .subscribe_stream::<Ticks>(TickRequest {
            count: ticks,
            interval_ms: 250,
        })
        .await?;
    while let Some(tick) = stream.next().await {
        println!("tick {} at {}", tick.seq, tick.unix_ms);
    }

    transport.dispose();
    Ok(())
}
