#![allow(dead_code)]

use hostlink_connector_memory::MemoryProvider;
use hostlink_core::{Envelope, Provider, Registry, TransportConfig, encode, methods};
use hostlink_transport::Transport;
use std::sync::Arc;
use std::sync::Once;
use std::time::Duration;

methods! {
    pub request Echo("echo") { request: String, response: String }
    /// Answers with its argument after that many milliseconds.
    pub request Delay("delay") { request: u64, response: u64 }
    /// Never answered.
    pub request Hang("hang") { request: (), response: () }
    pub subscription Counter("counter") { start: u32, receive: u32 }
}

pub fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

pub fn registry() -> Arc<Registry> {
    Arc::new(
        Registry::builder()
            .request::<Echo>()
            .request::<Delay>()
            .request::<Hang>()
            .subscription::<Counter>()
            .build()
            .expect("valid method table"),
    )
}

pub fn fast_config() -> TransportConfig {
    TransportConfig::default().with_handshake_retry_interval(Duration::from_millis(5))
}

/// A host and a product transport over one in-memory channel, plus handles
/// to both providers.
pub struct Link {
    pub host: Transport,
    pub product: Transport,
    pub host_provider: Arc<MemoryProvider>,
    pub product_provider: Arc<MemoryProvider>,
}

pub fn link() -> Link {
    link_with(fast_config())
}

pub fn link_with(config: TransportConfig) -> Link {
    init_tracing();
    let (a, b) = MemoryProvider::pair();
    let (a, b) = (Arc::new(a), Arc::new(b));
    let registry = registry();
    Link {
        host: Transport::new(a.clone(), registry.clone(), config.clone()),
        product: Transport::new(b.clone(), registry, config),
        host_provider: a,
        product_provider: b,
    }
}

/// Let the pump tasks deliver whatever is in flight.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(20)).await;
}

/// Put a frame on the wire, bypassing the transport's checks.
pub fn transmit_raw(provider: &MemoryProvider, envelope: &Envelope) {
    provider.transmit(encode(envelope));
}
