//! Events stream tests driven through the service surface.

mod common;

use bytes::Bytes;
use common::{header, json, service};
use gridgate::fabric::NamedCache;
use gridgate::proxy::proto::{
    listener_request_type, CacheRequest, EntryRequest, ListenerResponseBody, MapListenerRequest,
    MapListenerResponse,
};
use tokio::sync::mpsc::UnboundedReceiver;

fn init(uid: &str) -> MapListenerRequest {
    MapListenerRequest {
        uid: uid.to_string(),
        cache: "orders".to_string(),
        format: "json".to_string(),
        request_type: listener_request_type::INIT,
        ..Default::default()
    }
}

fn subscribe_key(uid: &str, key: &str) -> MapListenerRequest {
    MapListenerRequest {
        uid: uid.to_string(),
        request_type: listener_request_type::KEY,
        key: json(serde_json::json!(key)),
        subscribe: true,
        ..Default::default()
    }
}

fn next(rx: &mut UnboundedReceiver<MapListenerResponse>) -> ListenerResponseBody {
    rx.try_recv().expect("expected a stream response").body.unwrap()
}

#[tokio::test]
async fn subscription_delivers_cache_events() {
    let (service, _factory) = service(8, 1, 1 << 20);
    let (handle, mut rx) = service.open_events();

    handle.process(init("u1")).await.unwrap();
    assert!(matches!(
        next(&mut rx),
        ListenerResponseBody::Subscribed(uid) if uid == "u1"
    ));

    handle.process(subscribe_key("u2", "k")).await.unwrap();
    assert!(matches!(
        next(&mut rx),
        ListenerResponseBody::Subscribed(uid) if uid == "u2"
    ));

    service
        .put(EntryRequest {
            header: header("orders"),
            key: json(serde_json::json!("k")),
            value: json(serde_json::json!("v1")),
        })
        .await
        .unwrap();

    match next(&mut rx) {
        ListenerResponseBody::Event(event) => {
            assert_eq!(event.id, 1);
            assert_eq!(event.key, json(serde_json::json!("k")));
            assert_eq!(event.new_value, json(serde_json::json!("v1")));
            assert!(!event.synthetic);
        }
        other => panic!("expected insert event, got {other:?}"),
    }

    // Unsubscribed keys stay quiet.
    service
        .put(EntryRequest {
            header: header("orders"),
            key: json(serde_json::json!("other")),
            value: json(serde_json::json!(0)),
        })
        .await
        .unwrap();
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn protocol_violations_stay_in_band() {
    let (service, _factory) = service(8, 1, 1 << 20);
    let (handle, mut rx) = service.open_events();

    handle.process(init("u1")).await.unwrap();
    next(&mut rx);

    // Unsubscribing a key this stream never registered.
    let unsubscribe = MapListenerRequest {
        uid: "u2".to_string(),
        request_type: listener_request_type::KEY,
        key: json(serde_json::json!("ghost")),
        subscribe: false,
        ..Default::default()
    };
    handle.process(unsubscribe).await.unwrap();
    match next(&mut rx) {
        ListenerResponseBody::Error(error) => {
            assert_eq!(error.uid, "u2");
            assert_eq!(error.code, 9);
            assert!(!error.stack.is_empty());
        }
        other => panic!("expected in-band error, got {other:?}"),
    }

    // The stream stays open for further requests.
    handle.process(subscribe_key("u3", "k")).await.unwrap();
    assert!(matches!(
        next(&mut rx),
        ListenerResponseBody::Subscribed(uid) if uid == "u3"
    ));
}

#[tokio::test]
async fn destroy_emits_terminal_message_and_closes_the_stream() {
    let (service, _factory) = service(8, 1, 1 << 20);
    let (handle, mut rx) = service.open_events();

    handle.process(init("u1")).await.unwrap();
    next(&mut rx);

    service
        .truncate(CacheRequest {
            header: header("orders"),
        })
        .await
        .unwrap();
    assert!(matches!(
        next(&mut rx),
        ListenerResponseBody::Truncated(name) if name == "orders"
    ));

    service
        .destroy(CacheRequest {
            header: header("orders"),
        })
        .await
        .unwrap();
    assert!(matches!(
        next(&mut rx),
        ListenerResponseBody::Destroyed(name) if name == "orders"
    ));
    // Sink closed on destroy; the receiver completes.
    assert!(rx.recv().await.is_none());

    // Requests racing the destroy are ignored, not failed.
    handle.process(subscribe_key("u9", "k")).await.unwrap();
    handle.process(init("u10")).await.unwrap();
    assert!(rx.try_recv().is_err());

    drop(handle);
}

#[tokio::test]
async fn priming_subscription_keeps_values_despite_lite() {
    let (service, _factory) = service(8, 1, 1 << 20);
    let (handle, mut rx) = service.open_events();

    handle.process(init("u1")).await.unwrap();
    next(&mut rx);

    service
        .put(EntryRequest {
            header: header("orders"),
            key: json(serde_json::json!("k")),
            value: json(serde_json::json!("v0")),
        })
        .await
        .unwrap();

    let mut subscribe = subscribe_key("u2", "k");
    subscribe.lite = true;
    subscribe.priming = true;
    handle.process(subscribe).await.unwrap();

    // The priming event carries the current value and no old value.
    match next(&mut rx) {
        ListenerResponseBody::Event(event) => {
            assert_eq!(event.id, 2);
            assert!(event.synthetic);
            assert!(event.priming);
            assert_eq!(event.new_value, json(serde_json::json!("v0")));
            assert!(event.old_value.is_empty());
        }
        other => panic!("expected priming event, got {other:?}"),
    }
    assert!(matches!(
        next(&mut rx),
        ListenerResponseBody::Subscribed(uid) if uid == "u2"
    ));

    // A priming registration keeps values even though it asked for
    // lite delivery.
    service
        .put(EntryRequest {
            header: header("orders"),
            key: json(serde_json::json!("k")),
            value: json(serde_json::json!("v1")),
        })
        .await
        .unwrap();
    match next(&mut rx) {
        ListenerResponseBody::Event(event) => {
            assert_eq!(event.new_value, json(serde_json::json!("v1")));
        }
        other => panic!("expected update event, got {other:?}"),
    }
}

#[tokio::test]
async fn key_set_filter_subscription_tags_events() {
    let (service, _factory) = service(8, 1, 1 << 20);
    let (handle, mut rx) = service.open_events();

    handle.process(init("u1")).await.unwrap();
    next(&mut rx);

    let filter = MapListenerRequest {
        uid: "u2".to_string(),
        request_type: listener_request_type::FILTER,
        filter_id: 42,
        filter: json(serde_json::json!({ "keys": ["a", "b"] })),
        subscribe: true,
        ..Default::default()
    };
    handle.process(filter).await.unwrap();
    assert!(matches!(
        next(&mut rx),
        ListenerResponseBody::Subscribed(uid) if uid == "u2"
    ));

    service
        .put(EntryRequest {
            header: header("orders"),
            key: json(serde_json::json!("a")),
            value: json(serde_json::json!(1)),
        })
        .await
        .unwrap();
    match next(&mut rx) {
        ListenerResponseBody::Event(event) => assert_eq!(event.filter_ids, vec![42]),
        other => panic!("expected event, got {other:?}"),
    }

    // Keys outside the set are not delivered.
    service
        .put(EntryRequest {
            header: header("orders"),
            key: json(serde_json::json!("c")),
            value: json(serde_json::json!(3)),
        })
        .await
        .unwrap();
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn dropping_the_handle_tears_registrations_down() {
    let (service, factory) = service(8, 1, 1 << 20);
    let (handle, mut rx) = service.open_events();

    handle.process(init("u1")).await.unwrap();
    handle.process(subscribe_key("u2", "k")).await.unwrap();
    next(&mut rx);
    next(&mut rx);

    drop(handle);
    assert!(rx.recv().await.is_none());

    // Further cache changes go nowhere; the registration is gone.
    let cache = factory.ensure_memory_cache("orders");
    cache
        .put(json(serde_json::json!("k")), Bytes::from_static(b"1"))
        .unwrap();
}
