//! Handshake: retry until acknowledged.
//!
//! There is no channel-level readiness signal, and the peer may not be
//! listening yet, so the initiator retransmits `handshake_request` on a fixed
//! interval (same request id every time) until the first matching
//! `handshake_response` arrives, the optional timeout expires, or the
//! transport is disposed.

use crate::request_id::next_request_id;
use crate::transport::{Inner, Reply};
use hostlink_core::{
    ActionId, Envelope, HandshakeRequest, HandshakeResponse, answer_handshake, encode,
};
use std::future::Future;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{oneshot, watch};
use tokio::time::MissedTickBehavior;

/// Answer every incoming `handshake_request` on `inner`'s provider.
pub(crate) fn install_responder(inner: &Arc<Inner>) {
    let weak = Arc::downgrade(inner);
    inner
        .listeners
        .listen(ActionId::HANDSHAKE_REQUEST, move |envelope: &Envelope| {
            let Some(inner) = weak.upgrade() else {
                return;
            };
            let request: HandshakeRequest = match envelope.payload() {
                Ok(request) => request,
                Err(e) => {
                    tracing::warn!(error = %e, "malformed handshake request");
                    return;
                }
            };

            let response = answer_handshake(request);
            if let Err(e) = &response {
                tracing::debug!(error = %e, "refusing handshake");
            }
            if let Err(e) =
                inner.send_payload(&envelope.request_id, ActionId::HANDSHAKE_RESPONSE, &response)
            {
                tracing::trace!(error = %e, "handshake response not sent");
            }
        });
}

/// Drive one handshake attempt to completion and publish the outcome.
pub(crate) async fn initiate(inner: Weak<Inner>, done: Arc<watch::Sender<Option<bool>>>) {
    let connected = attempt(&inner).await;
    if let Some(inner) = inner.upgrade() {
        inner.finish_handshake(connected);
    }
    done.send_replace(Some(connected));
}

async fn attempt(weak: &Weak<Inner>) -> bool {
    let Some(inner) = weak.upgrade() else {
        return false;
    };

    let request_id = next_request_id();
    let frame = match Envelope::with_payload(
        request_id.as_str(),
        ActionId::HANDSHAKE_REQUEST,
        &HandshakeRequest::current(),
    ) {
        Ok(envelope) => encode(&envelope),
        Err(e) => {
            tracing::warn!(error = %e, "failed to encode handshake request");
            return false;
        }
    };
    let reply = inner.register_pending(request_id.clone(), ActionId::HANDSHAKE_RESPONSE);
    let shutdown = inner.shutdown.clone();
    let every = inner.config.handshake_retry_interval();
    let timeout = inner.config.handshake_timeout();
    drop(inner);

    tracing::debug!(%request_id, ?every, ?timeout, "handshake started");
    let connected = tokio::select! {
        () = shutdown.cancelled() => {
            tracing::debug!("handshake aborted");
            false
        }
        connected = with_timeout(
            timeout,
            retry_until_answered(weak, frame, every, reply),
        ) => connected,
    };

    if let Some(inner) = weak.upgrade() {
        inner.remove_pending(&request_id);
    }
    connected
}

async fn with_timeout(timeout: Option<Duration>, attempt: impl Future<Output = bool>) -> bool {
    match timeout {
        Some(limit) => tokio::time::timeout(limit, attempt)
            .await
            .unwrap_or_else(|_| {
                tracing::debug!(?limit, "handshake timed out");
                false
            }),
        None => attempt.await,
    }
}

async fn retry_until_answered(
    weak: &Weak<Inner>,
    frame: Vec<u8>,
    every: Duration,
    mut reply: oneshot::Receiver<Reply>,
) -> bool {
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut sent: u32 = 0;

    loop {
        tokio::select! {
            answer = &mut reply => return interpret(answer),
            _ = ticker.tick() => {
                let Some(inner) = weak.upgrade() else {
                    return false;
                };
                if inner.is_disposed() {
                    return false;
                }
                if inner.provider.is_usable() {
                    inner.provider.transmit(frame.clone());
                    sent += 1;
                    tracing::trace!(sent, "handshake_request sent");
                }
            }
        }
    }
}

fn interpret(answer: Result<Reply, oneshot::error::RecvError>) -> bool {
    match answer {
        Ok(Ok(envelope)) => match envelope.payload::<HandshakeResponse>() {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "peer rejected handshake");
                false
            }
            Err(e) => {
                tracing::warn!(error = %e, "malformed handshake response");
                false
            }
        },
        Ok(Err(e)) => {
            tracing::debug!(error = %e, "handshake abandoned");
            false
        }
        Err(_) => false,
    }
}
