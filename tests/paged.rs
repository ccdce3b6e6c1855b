//! Paged scan tests driven through the service surface.

mod common;

use bytes::Bytes;
use common::{header, json, service};
use gridgate::proxy::proto::{EntryRequest, PageCursor, PageRequest};
use prost::Message;
use std::collections::HashSet;

async fn populate(service: &gridgate::proxy::service::NamedCacheService, count: usize) {
    for i in 0..count {
        service
            .put(EntryRequest {
                header: header("scan"),
                key: json(serde_json::json!(format!("key-{i:04}"))),
                value: json(serde_json::json!(format!("value-{i:04}"))),
            })
            .await
            .unwrap();
    }
}

#[tokio::test]
async fn key_scan_covers_the_cache_without_duplicates() {
    let (service, _factory) = service(16, 3, 512);
    populate(&service, 240).await;

    let mut seen: HashSet<Bytes> = HashSet::new();
    let mut cookie = Bytes::new();
    let mut pages = 0;
    loop {
        let items = service
            .next_key_page(PageRequest {
                header: header("scan"),
                cookie: cookie.clone(),
            })
            .await
            .unwrap();
        let (first, rest) = items.split_first().unwrap();
        for key in rest {
            assert!(seen.insert(key.value.clone()), "key delivered twice");
        }
        pages += 1;
        assert!(pages <= 32, "scan did not terminate");
        if first.value.is_empty() {
            break;
        }
        cookie = first.value.clone();
    }
    assert_eq!(seen.len(), 240);
    assert!(pages > 1, "a small threshold should paginate");
}

#[tokio::test]
async fn first_cookie_records_a_calibrated_batch() {
    let (service, _factory) = service(16, 1, 512);
    populate(&service, 240).await;

    let items = service
        .next_key_page(PageRequest {
            header: header("scan"),
            cookie: Bytes::new(),
        })
        .await
        .unwrap();
    let cookie = &items[0].value;
    assert!(!cookie.is_empty(), "240 entries should not fit one page");

    let cursor = PageCursor::decode(cookie.as_ref()).unwrap();
    assert_eq!(cursor.partition_count, 16);
    assert!(cursor.batch_size >= 1);
    assert!(cursor.batch_size <= 16);
}

#[tokio::test]
async fn entry_scan_returns_cookie_item_then_entries() {
    let (service, _factory) = service(8, 1, 1 << 20);
    populate(&service, 30).await;

    let mut collected = Vec::new();
    let mut cookie = Bytes::new();
    loop {
        let items = service
            .next_entry_page(PageRequest {
                header: header("scan"),
                cookie: cookie.clone(),
            })
            .await
            .unwrap();
        let (first, rest) = items.split_first().unwrap();
        assert!(first.key.is_empty() && first.value.is_empty());
        for entry in rest {
            assert!(entry.cookie.is_empty());
            collected.push((entry.key.clone(), entry.value.clone()));
        }
        if first.cookie.is_empty() {
            break;
        }
        cookie = first.cookie.clone();
    }
    assert_eq!(collected.len(), 30);
}

#[tokio::test]
async fn scan_survives_hidden_ownership() {
    let (service, factory) = service(16, 3, 512);
    populate(&service, 60).await;
    // Simulate partition redistribution: owners are unknown, batches
    // fall back to arbitrary remaining partitions.
    factory.ensure_memory_cache("scan").set_ownership_visible(false);

    let mut seen = 0;
    let mut cookie = Bytes::new();
    loop {
        let items = service
            .next_key_page(PageRequest {
                header: header("scan"),
                cookie: cookie.clone(),
            })
            .await
            .unwrap();
        let (first, rest) = items.split_first().unwrap();
        seen += rest.len();
        if first.value.is_empty() {
            break;
        }
        cookie = first.value.clone();
    }
    assert_eq!(seen, 60);
}

#[tokio::test]
async fn stale_cookie_fails_terminally() {
    let (service, _factory) = service(16, 1, 512);
    populate(&service, 10).await;

    let stale = PageCursor {
        partition_count: 64,
        words: vec![u64::MAX],
        batch_size: 4,
    };
    let err = service
        .next_key_page(PageRequest {
            header: header("scan"),
            cookie: Bytes::from(stale.encode_to_vec()),
        })
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        gridgate::core::error::GateError::InvalidCookie { .. }
    ));
}
