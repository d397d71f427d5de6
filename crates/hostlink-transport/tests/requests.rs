mod common;

use common::{Delay, Echo, Hang, fast_config, link, link_with, registry, settle};
use futures_util::future::join_all;
use hostlink_connector_memory::MemoryProvider;
use hostlink_core::{Envelope, Provider, encode};
use hostlink_transport::{CancellationToken, Transport, TransportError};
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn request_round_trip() {
    let link = link();
    let _echo = link
        .product
        .handle_request::<Echo, _, _>(|text| async move { text.to_uppercase() })
        .unwrap();

    let reply = link.host.request::<Echo>("hello".into(), None).await.unwrap();
    assert_eq!(reply, "HELLO");
    assert_eq!(link.host.negotiated_version(), Some(1));
}

#[tokio::test]
async fn concurrent_requests_do_not_cross_talk() {
    let link = link();
    let _delay = link
        .product
        .handle_request::<Delay, _, _>(|ms| async move {
            tokio::time::sleep(Duration::from_millis(ms)).await;
            ms
        })
        .unwrap();

    // Later requests answer first.
    let delays = [40u64, 30, 20, 10, 0];
    let replies = join_all(delays.iter().map(|&ms| link.host.request::<Delay>(ms, None))).await;
    let replies: Vec<u64> = replies.into_iter().map(Result::unwrap).collect();
    assert_eq!(replies, delays);
}

#[tokio::test]
async fn both_sides_can_call_each_other() {
    let link = link();
    let _on_product = link
        .product
        .handle_request::<Echo, _, _>(|text| async move { format!("product:{text}") })
        .unwrap();
    let _on_host = link
        .host
        .handle_request::<Echo, _, _>(|text| async move { format!("host:{text}") })
        .unwrap();

    assert_eq!(link.host.request::<Echo>("a".into(), None).await.unwrap(), "product:a");
    assert_eq!(link.product.request::<Echo>("b".into(), None).await.unwrap(), "host:b");
}

#[tokio::test]
async fn cancellation_aborts_the_wait() {
    let link = link();
    let _hang = link
        .product
        .handle_request::<Hang, _, _>(|()| std::future::pending::<()>())
        .unwrap();
    assert!(link.host.is_ready().await);

    let token = CancellationToken::new();
    let host = link.host.clone();
    let waiter = token.clone();
    let call = tokio::spawn(async move { host.request::<Hang>((), Some(&waiter)).await });

    settle().await;
    token.cancel();
    let result = call.await.unwrap();
    assert!(matches!(result, Err(TransportError::RequestAborted)), "{result:?}");
}

#[tokio::test]
async fn already_cancelled_token_sends_nothing() {
    let link = link();
    assert!(link.host.is_ready().await);
    let before = link.host_provider.frames_sent();

    let token = CancellationToken::new();
    token.cancel();
    let result = link.host.request::<Echo>("x".into(), Some(&token)).await;
    assert!(matches!(result, Err(TransportError::RequestAborted)), "{result:?}");
    assert_eq!(link.host_provider.frames_sent(), before);
}

#[tokio::test]
async fn request_timeout_settles_unanswered_calls() {
    let link = link_with(fast_config().with_request_timeout(Some(Duration::from_millis(30))));
    let _hang = link
        .product
        .handle_request::<Hang, _, _>(|()| std::future::pending::<()>())
        .unwrap();

    let result = link.host.request::<Hang>((), None).await;
    assert!(matches!(result, Err(TransportError::RequestTimedOut)), "{result:?}");
}

#[tokio::test]
async fn dispose_rejects_pending_requests() {
    let link = link();
    let _hang = link
        .product
        .handle_request::<Hang, _, _>(|()| std::future::pending::<()>())
        .unwrap();
    assert!(link.host.is_ready().await);

    let host = link.host.clone();
    let call = tokio::spawn(async move { host.request::<Hang>((), None).await });
    settle().await;

    link.host.dispose();
    let result = call.await.unwrap();
    assert!(matches!(result, Err(TransportError::Disposed)), "{result:?}");

    assert!(!link.host.is_ready().await);
    assert!(link.host_provider.is_disposed());
    let again = link.host.request::<Echo>("late".into(), None).await;
    assert!(matches!(again, Err(TransportError::Disposed)), "{again:?}");

    // Idempotent.
    link.host.dispose();
}

#[tokio::test]
async fn unusable_provider_fails_without_sending() {
    let (a, _b) = MemoryProvider::pair();
    a.set_usable(false);
    let a = Arc::new(a);
    let host = Transport::new(a.clone(), registry(), fast_config());

    let result = host.request::<Echo>("x".into(), None).await;
    assert!(matches!(result, Err(TransportError::EnvironmentUnusable)), "{result:?}");
    assert!(!host.is_ready().await);
    assert_eq!(a.frames_sent(), 0);
}

#[tokio::test]
async fn unregistered_method_is_rejected() {
    hostlink_core::methods! {
        request Missing("missing") { request: (), response: () }
    }

    let link = link();
    let result = link.host.request::<Missing>((), None).await;
    assert!(matches!(result, Err(TransportError::UnknownMethod(_))), "{result:?}");
    assert!(link.host.handle_request::<Missing, _, _>(|()| async {}).is_err());
}

#[tokio::test]
async fn garbage_frames_are_ignored() {
    let link = link();
    let _echo = link
        .product
        .handle_request::<Echo, _, _>(|text| async move { text })
        .unwrap();
    assert!(link.host.is_ready().await);

    link.host_provider.inject(vec![0xff]);
    link.host_provider.inject(vec![0xff, 0xff, 0, 0, 0, 0]);
    link.host_provider.inject(vec![2, 0, 0xff, 0xff, 0xff, 0xff]);
    link.product_provider.inject(b"not a frame at all".to_vec());

    let reply = link.host.request::<Echo>("still here".into(), None).await.unwrap();
    assert_eq!(reply, "still here");
}

#[tokio::test]
async fn malformed_response_payload_surfaces_as_codec_error() {
    let link = link();
    let echo_response = link.host.registry().by_name("echo_response").unwrap();
    let echo_request = link.product.registry().by_name("echo_request").unwrap();

    // Answer with bytes that are not a JSON string.
    let raw = link.product_provider.clone();
    let _listen = link
        .product
        .listen(echo_request, move |envelope: &Envelope| {
            let reply = Envelope::new(envelope.request_id.clone(), echo_response, b"{".to_vec());
            raw.transmit(encode(&reply));
        })
        .unwrap();

    let result = link.host.request::<Echo>("x".into(), None).await;
    assert!(matches!(result, Err(TransportError::Codec(_))), "{result:?}");
}

#[tokio::test]
async fn response_with_wrong_action_is_not_correlated() {
    let link = link_with(fast_config().with_request_timeout(Some(Duration::from_millis(50))));
    let echo_request = link.product.registry().by_name("echo_request").unwrap();
    let delay_response = link.product.registry().by_name("delay_response").unwrap();

    let raw = link.product_provider.clone();
    let _listen = link
        .product
        .listen(echo_request, move |envelope: &Envelope| {
            let wrong =
                Envelope::with_payload(envelope.request_id.clone(), delay_response, &7u64).unwrap();
            raw.transmit(encode(&wrong));
        })
        .unwrap();

    let result = link.host.request::<Echo>("x".into(), None).await;
    assert!(matches!(result, Err(TransportError::RequestTimedOut)), "{result:?}");
}

#[tokio::test]
async fn unregistered_handler_stops_answering() {
    let link = link_with(fast_config().with_request_timeout(Some(Duration::from_millis(50))));
    let echo = link
        .product
        .handle_request::<Echo, _, _>(|text| async move { text })
        .unwrap();
    assert_eq!(link.host.request::<Echo>("one".into(), None).await.unwrap(), "one");

    echo.unregister();
    let result = link.host.request::<Echo>("two".into(), None).await;
    assert!(matches!(result, Err(TransportError::RequestTimedOut)), "{result:?}");
}

#[tokio::test]
async fn unsolicited_push_reaches_listeners() {
    let link = link();
    let action = link.host.registry().by_name("counter_receive").unwrap();
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let _listen = link
        .host
        .listen(action, move |envelope: &Envelope| {
            let _ = tx.send(envelope.clone());
        })
        .unwrap();

    let push =
        Envelope::with_payload(hostlink_core::UNSOLICITED_REQUEST_ID, action, &9u32).unwrap();
    link.product.post_envelope(&push).unwrap();

    let got = rx.recv().await.unwrap();
    assert!(got.is_unsolicited());
    assert_eq!(got.payload::<u32>().unwrap(), 9);
    assert_eq!(encode(&got), encode(&push));
}
