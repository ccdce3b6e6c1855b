//! Cache service operation tests against the in-memory fabric.

mod common;

use common::{header, json, service};
use gridgate::core::error::GateError;
use gridgate::proxy::proto::{
    CacheRequest, CacheRequestHeader, EntriesRequest, Entry, EntryRequest, InvokeRequest,
    KeyRequest, KeysRequest, QueryRequest,
};

#[tokio::test]
async fn bulk_round_trip() {
    let (service, _factory) = service(8, 1, 1 << 20);

    service
        .put_all(EntriesRequest {
            header: header("orders"),
            entries: vec![
                Entry {
                    key: json(serde_json::json!("a")),
                    value: json(serde_json::json!(1)),
                },
                Entry {
                    key: json(serde_json::json!("b")),
                    value: json(serde_json::json!(2)),
                },
                Entry {
                    key: json(serde_json::json!("c")),
                    value: json(serde_json::json!(3)),
                },
            ],
        })
        .await
        .unwrap();

    let entries = service
        .get_all(KeysRequest {
            header: header("orders"),
            keys: vec![
                json(serde_json::json!("a")),
                json(serde_json::json!("c")),
                json(serde_json::json!("missing")),
            ],
        })
        .await
        .unwrap();
    assert_eq!(entries.len(), 2);

    let size = service
        .size(CacheRequest {
            header: header("orders"),
        })
        .await
        .unwrap();
    assert_eq!(size.value, 3);

    service
        .clear(CacheRequest {
            header: header("orders"),
        })
        .await
        .unwrap();
    let empty = service
        .is_empty(CacheRequest {
            header: header("orders"),
        })
        .await
        .unwrap();
    assert!(empty.value);
}

#[tokio::test]
async fn containment_checks() {
    let (service, _factory) = service(8, 1, 1 << 20);

    service
        .put(EntryRequest {
            header: header("orders"),
            key: json(serde_json::json!("k")),
            value: json(serde_json::json!("v")),
        })
        .await
        .unwrap();

    let by_key = service
        .contains_key(KeyRequest {
            header: header("orders"),
            key: json(serde_json::json!("k")),
        })
        .await
        .unwrap();
    assert!(by_key.value);

    let by_entry = service
        .contains_entry(EntryRequest {
            header: header("orders"),
            key: json(serde_json::json!("k")),
            value: json(serde_json::json!("v")),
        })
        .await
        .unwrap();
    assert!(by_entry.value);

    let wrong_value = service
        .contains_entry(EntryRequest {
            header: header("orders"),
            key: json(serde_json::json!("k")),
            value: json(serde_json::json!("other")),
        })
        .await
        .unwrap();
    assert!(!wrong_value.value);
}

#[tokio::test]
async fn filtered_queries_use_the_prefix_predicate() {
    let (service, _factory) = service(8, 1, 1 << 20);

    for key in ["order-1", "order-2", "misc"] {
        service
            .put(EntryRequest {
                header: header("orders"),
                key: json(serde_json::json!(key)),
                value: json(serde_json::json!(key.len())),
            })
            .await
            .unwrap();
    }

    // Native keys are JSON strings, so the byte prefix includes the
    // opening quote.
    let filter = json(serde_json::json!({ "prefix": b"\"order".to_vec() }));
    let keys = service
        .key_set(QueryRequest {
            header: header("orders"),
            filter: filter.clone(),
        })
        .await
        .unwrap();
    assert_eq!(keys.len(), 2);

    let entries = service
        .entry_set(QueryRequest {
            header: header("orders"),
            filter,
        })
        .await
        .unwrap();
    assert_eq!(entries.len(), 2);

    let all = service
        .values(QueryRequest {
            header: header("orders"),
            filter: bytes::Bytes::new(),
        })
        .await
        .unwrap();
    assert_eq!(all.len(), 3);
}

#[tokio::test]
async fn invoke_all_against_filtered_keys() {
    let (service, _factory) = service(8, 1, 1 << 20);

    for key in ["order-1", "order-2", "misc"] {
        service
            .put(EntryRequest {
                header: header("orders"),
                key: json(serde_json::json!(key)),
                value: json(serde_json::json!("old")),
            })
            .await
            .unwrap();
    }

    let results = service
        .invoke_all(InvokeRequest {
            header: header("orders"),
            keys: Vec::new(),
            filter: json(serde_json::json!({ "prefix": b"\"order".to_vec() })),
            processor: json(serde_json::json!({ "get": true })),
        })
        .await
        .unwrap();
    assert_eq!(results.len(), 2);
    for entry in results {
        assert_eq!(entry.value, json(serde_json::json!("old")));
    }
}

#[tokio::test]
async fn destroyed_cache_is_recreated_empty() {
    let (service, _factory) = service(8, 1, 1 << 20);

    service
        .put(EntryRequest {
            header: header("orders"),
            key: json(serde_json::json!("k")),
            value: json(serde_json::json!("v")),
        })
        .await
        .unwrap();

    service
        .destroy(CacheRequest {
            header: header("orders"),
        })
        .await
        .unwrap();

    // The next request addressed to the same name gets a fresh cache.
    let size = service
        .size(CacheRequest {
            header: header("orders"),
        })
        .await
        .unwrap();
    assert_eq!(size.value, 0);
}

#[tokio::test]
async fn unknown_format_is_rejected_up_front() {
    let (service, _factory) = service(8, 1, 1 << 20);

    let err = service
        .get(KeyRequest {
            header: Some(CacheRequestHeader {
                scope: String::new(),
                cache: "orders".to_string(),
                format: "pof".to_string(),
            }),
            key: json(serde_json::json!("k")),
        })
        .await
        .unwrap_err();
    assert!(matches!(err, GateError::InvalidArgument { .. }));
}

#[tokio::test]
async fn unknown_scope_is_rejected() {
    let (service, _factory) = service(8, 1, 1 << 20);

    let err = service
        .size(CacheRequest {
            header: Some(CacheRequestHeader {
                scope: "tenant-9".to_string(),
                cache: "orders".to_string(),
                format: "json".to_string(),
            }),
        })
        .await
        .unwrap_err();
    assert!(err.is_protocol_violation());
}
