//! Common test utilities.
//!
//! This module contains shared helpers for integration tests.
//! Import with `mod common;` in test files.

use bytes::Bytes;
use gridgate::core::config::ProxyConfig;
use gridgate::fabric::memory::MemoryCacheFactory;
use gridgate::fabric::{CacheFactory, ScopeRegistry};
use gridgate::proxy::proto::CacheRequestHeader;
use gridgate::proxy::service::NamedCacheService;
use gridgate::serializer::SerializerRegistry;
use std::sync::Arc;

/// Build a service backed by the in-memory fabric, returning the
/// factory too so tests can reach the backing caches directly.
pub fn service(
    partitions: u32,
    members: u32,
    transfer_threshold: u64,
) -> (Arc<NamedCacheService>, Arc<MemoryCacheFactory>) {
    let factory = Arc::new(MemoryCacheFactory::new(partitions, members));
    let scopes = Arc::new(ScopeRegistry::new(factory.clone() as Arc<dyn CacheFactory>));
    let serializers = Arc::new(SerializerRegistry::new());
    let config = ProxyConfig {
        transfer_threshold,
        min_workers: 2,
        max_workers: 0,
    };
    (
        Arc::new(NamedCacheService::new(scopes, serializers, &config)),
        factory,
    )
}

/// Request header addressing `cache` in the default scope with the
/// native JSON format.
pub fn header(cache: &str) -> Option<CacheRequestHeader> {
    Some(CacheRequestHeader {
        scope: String::new(),
        cache: cache.to_string(),
        format: "json".to_string(),
    })
}

/// Encode a JSON value the way clients do.
pub fn json(value: serde_json::Value) -> Bytes {
    Bytes::from(serde_json::to_vec(&value).unwrap())
}
