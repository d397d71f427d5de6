//! Methods shared by both sides of the demo.

use hostlink_core::{Registry, RegistryError, methods};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EchoRequest {
    pub text: String,
    #[serde(default)]
    pub shout: bool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TickRequest {
    /// Ticks to send before the host ends the stream.
    pub count: u32,
    pub interval_ms: u64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Tick {
    pub seq: u32,
    pub unix_ms: u64,
}

methods! {
    /// Send text back, upper-cased on request.
    pub request Echo("echo") { request: EchoRequest, response: String }

    /// A clock on the host side.
    pub subscription Ticks("ticks") { start: TickRequest, receive: Tick }
}

/// Both peers must build the same table.
pub fn registry() -> Result<Arc<Registry>, RegistryError> {
    Ok(Arc::new(
        Registry::builder()
            .request::<Echo>()
            .subscription::<Ticks>()
            .build()?,
    ))
}
