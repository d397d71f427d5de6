mod common;

use common::{Counter, link, settle, transmit_raw};
use futures_util::StreamExt;
use hostlink_core::Envelope;
use hostlink_transport::{SubscriptionSink, TransportError};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

type Sinks = Arc<Mutex<Vec<SubscriptionSink<Counter>>>>;

/// Responder that keeps every sink and counts starts and unsubscribes.
fn serve_counter(link: &common::Link) -> (Sinks, Arc<AtomicUsize>, Arc<AtomicUsize>) {
    let sinks: Sinks = Arc::default();
    let starts = Arc::new(AtomicUsize::new(0));
    let stops = Arc::new(AtomicUsize::new(0));

    let (s, st, sp) = (sinks.clone(), starts.clone(), stops.clone());
    let registration = link
        .product
        .handle_subscription::<Counter, _, _>(move |from: u32, sink| {
            st.fetch_add(1, Ordering::SeqCst);
            sink.send(&from).unwrap();
            s.lock().unwrap().push(sink);
            let sp = sp.clone();
            move || {
                sp.fetch_add(1, Ordering::SeqCst);
            }
        })
        .unwrap();
    // Stays installed until the transport is disposed.
    drop(registration);
    (sinks, starts, stops)
}

fn collector() -> (Arc<Mutex<Vec<u32>>>, impl Fn(u32) + Send + Sync + 'static) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let s = seen.clone();
    (seen, move |item: u32| s.lock().unwrap().push(item))
}

#[tokio::test]
async fn items_flow_until_stop() {
    let link = link();
    let (sinks, starts, stops) = serve_counter(&link);
    let (seen, on_receive) = collector();

    let subscription = link.host.subscribe::<Counter>(10, on_receive).await.unwrap();
    settle().await;
    assert_eq!(starts.load(Ordering::SeqCst), 1);

    let sink = sinks.lock().unwrap()[0].clone();
    assert_eq!(sink.request_id(), subscription.request_id());
    sink.send(&11).unwrap();
    sink.send(&12).unwrap();
    settle().await;
    assert_eq!(*seen.lock().unwrap(), [10, 11, 12]);

    subscription.stop();
    settle().await;
    assert_eq!(stops.load(Ordering::SeqCst), 1);
    assert!(sink.is_closed());
    assert!(matches!(sink.send(&13), Err(TransportError::SubscriptionClosed)));

    // A responder that ignores the stop and keeps pushing is not heard.
    let receive = link.product.registry().by_name("counter_receive").unwrap();
    let straggler = Envelope::with_payload(subscription.request_id(), receive, &14u32).unwrap();
    transmit_raw(&link.product_provider, &straggler);
    settle().await;
    assert_eq!(*seen.lock().unwrap(), [10, 11, 12]);

    // Second stop is a no-op on both sides.
    subscription.stop();
    settle().await;
    assert_eq!(stops.load(Ordering::SeqCst), 1);
    assert_eq!(seen.lock().unwrap().len(), 3);
}

#[tokio::test]
async fn subscriptions_are_isolated_by_id() {
    let link = link();
    let (sinks, _, _) = serve_counter(&link);
    let (first, on_first) = collector();
    let (second, on_second) = collector();

    let a = link.host.subscribe::<Counter>(1, on_first).await.unwrap();
    let b = link.host.subscribe::<Counter>(100, on_second).await.unwrap();
    settle().await;

    for sink in sinks.lock().unwrap().iter() {
        let base = if sink.request_id() == a.request_id() { 1 } else { 100 };
        sink.send(&(base + 1)).unwrap();
    }
    settle().await;

    assert_eq!(*first.lock().unwrap(), [1, 2]);
    assert_eq!(*second.lock().unwrap(), [100, 101]);
    assert_ne!(a.request_id(), b.request_id());
}

#[tokio::test]
async fn duplicate_start_is_ignored() {
    let link = link();
    let (_sinks, starts, _) = serve_counter(&link);
    let start = link.host.registry().by_name("counter_start").unwrap();

    let envelope = Envelope::with_payload("dup", start, &5u32).unwrap();
    link.host.post_envelope(&envelope).unwrap();
    link.host.post_envelope(&envelope).unwrap();
    settle().await;

    assert_eq!(starts.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn interrupt_reaches_consumer_once() {
    let link = link();
    let (sinks, _, stops) = serve_counter(&link);
    let (seen, on_receive) = collector();

    let subscription = link.host.subscribe::<Counter>(0, on_receive).await.unwrap();
    let interrupts = Arc::new(AtomicUsize::new(0));
    let i = interrupts.clone();
    subscription.on_interrupt(move || {
        i.fetch_add(1, Ordering::SeqCst);
    });
    settle().await;

    let sink = sinks.lock().unwrap()[0].clone();
    sink.interrupt().unwrap();
    sink.interrupt().unwrap();
    assert_eq!(stops.load(Ordering::SeqCst), 1);

    // A straggler the producer sends around the sink must not arrive.
    let receive = link.product.registry().by_name("counter_receive").unwrap();
    let late = Envelope::with_payload(subscription.request_id(), receive, &99u32).unwrap();
    settle().await;
    transmit_raw(&link.product_provider, &late);
    settle().await;

    assert_eq!(interrupts.load(Ordering::SeqCst), 1);
    assert_eq!(*seen.lock().unwrap(), [0]);
    assert!(subscription.is_interrupted());
    assert!(!subscription.is_active());

    // Registered after the fact: fires right away.
    let late_hook = Arc::new(AtomicUsize::new(0));
    let l = late_hook.clone();
    subscription.on_interrupt(move || {
        l.fetch_add(1, Ordering::SeqCst);
    });
    assert_eq!(late_hook.load(Ordering::SeqCst), 1);

    // Stop after interrupt sends nothing.
    let before = link.host_provider.frames_sent();
    subscription.stop();
    assert_eq!(link.host_provider.frames_sent(), before);
}

#[tokio::test]
async fn stream_ends_on_interrupt() {
    let link = link();
    let (sinks, _, _) = serve_counter(&link);

    let mut stream = link.host.subscribe_stream::<Counter>(1).await.unwrap();
    assert_eq!(stream.next().await, Some(1));

    let sink = sinks.lock().unwrap()[0].clone();
    sink.send(&2).unwrap();
    sink.send(&3).unwrap();
    sink.interrupt().unwrap();

    let rest: Vec<u32> = stream.by_ref().collect().await;
    assert_eq!(rest, [2, 3]);
    assert!(stream.subscription().is_interrupted());
}

#[tokio::test]
async fn dropping_stream_stops_subscription() {
    let link = link();
    let (_sinks, _, stops) = serve_counter(&link);

    let mut stream = link.host.subscribe_stream::<Counter>(7).await.unwrap();
    assert_eq!(stream.next().await, Some(7));
    drop(stream);
    settle().await;

    assert_eq!(stops.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn unregister_tears_down_active_subscriptions() {
    let link = link();
    let stops = Arc::new(AtomicUsize::new(0));
    let sp = stops.clone();
    let registration = link
        .product
        .handle_subscription::<Counter, _, _>(move |_: u32, _sink| {
            let sp = sp.clone();
            move || {
                sp.fetch_add(1, Ordering::SeqCst);
            }
        })
        .unwrap();

    let (_, on_a) = collector();
    let (_, on_b) = collector();
    let _a = link.host.subscribe::<Counter>(1, on_a).await.unwrap();
    let _b = link.host.subscribe::<Counter>(2, on_b).await.unwrap();
    settle().await;

    registration.unregister();
    assert_eq!(stops.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn dispose_tears_down_responder_subscriptions() {
    let link = link();
    let (_sinks, _, stops) = serve_counter(&link);
    let (_, on_receive) = collector();
    let _subscription = link.host.subscribe::<Counter>(1, on_receive).await.unwrap();
    settle().await;

    link.product.dispose();
    assert_eq!(stops.load(Ordering::SeqCst), 1);

    let (_, again) = collector();
    let result = link.product.subscribe::<Counter>(1, again).await;
    assert!(matches!(result, Err(TransportError::Disposed)), "{result:?}");
    assert!(matches!(
        link.product.handle_subscription::<Counter, _, _>(|_: u32, _sink| || {}),
        Err(TransportError::Disposed)
    ));
}

#[tokio::test]
async fn interrupt_from_inside_handler_unwinds_immediately() {
    let link = link();
    let stops = Arc::new(AtomicUsize::new(0));
    let sp = stops.clone();
    let _registration = link
        .product
        .handle_subscription::<Counter, _, _>(move |_: u32, sink| {
            sink.interrupt().unwrap();
            let sp = sp.clone();
            move || {
                sp.fetch_add(1, Ordering::SeqCst);
            }
        })
        .unwrap();

    let mut stream = link.host.subscribe_stream::<Counter>(0).await.unwrap();
    assert_eq!(stream.next().await, None);
    assert_eq!(stops.load(Ordering::SeqCst), 1);
}
