//! Cache service operations.
//!
//! [`NamedCacheService`] is the operation layer between the gRPC
//! transport and the fabric seam: it resolves the scope, cache, and
//! serialization format named by each request header, converts
//! payloads, and runs every fabric call on the worker pool so the
//! transport tasks never block on cache work. Streaming operations
//! return fully-materialized pages; the transport frames them.

use crate::core::config::ProxyConfig;
use crate::core::error::{GateError, GateResult};
use crate::core::pool::WorkerPool;
use crate::fabric::{NamedCache, ScopeRegistry};
use crate::proxy::listener::{EventSink, EventStream};
use crate::proxy::paged::PagedScanner;
use crate::proxy::proto::{
    AggregateRequest, BoolValue, BytesValue, CacheRequest, CacheRequestHeader, EntriesRequest,
    Entry, EntryRequest, EntryResult, IndexRequest, InvokeRequest, KeyRequest, KeysRequest,
    MapListenerRequest, MapListenerResponse, OptionalValue, PageRequest, QueryRequest,
    UInt64Value, ValueRequest,
};
use crate::serializer::SerializerRegistry;
use bytes::Bytes;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::info;

/// Service-level counters, exposed for logging and tests.
#[derive(Default)]
pub struct ServiceStats {
    pub requests: AtomicU64,
    pub errors: AtomicU64,
    /// Map events delivered over event streams.
    pub events: AtomicU64,
    /// Scan pages served.
    pub pages: AtomicU64,
    pub active_event_streams: AtomicU64,
}

impl ServiceStats {
    pub fn record_request(&self) {
        self.requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_event(&self) {
        self.events.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_page(&self) {
        self.pages.fetch_add(1, Ordering::Relaxed);
    }
}

/// The cache proxy service.
pub struct NamedCacheService {
    scopes: Arc<ScopeRegistry>,
    serializers: Arc<SerializerRegistry>,
    pool: WorkerPool,
    scanner: PagedScanner,
    stats: ServiceStats,
}

impl NamedCacheService {
    pub fn new(
        scopes: Arc<ScopeRegistry>,
        serializers: Arc<SerializerRegistry>,
        config: &ProxyConfig,
    ) -> Self {
        Self {
            scopes,
            serializers,
            pool: WorkerPool::new(config.min_workers, config.max_workers),
            scanner: PagedScanner::new(config.transfer_threshold),
            stats: ServiceStats::default(),
        }
    }

    pub fn stats(&self) -> &ServiceStats {
        &self.stats
    }

    pub fn serializers(&self) -> &Arc<SerializerRegistry> {
        &self.serializers
    }

    /// Stop the worker pool. In-flight tasks finish; new submissions
    /// fail.
    pub fn shutdown(&self) {
        self.pool.shutdown();
    }

    fn resolve(
        &self,
        header: Option<&CacheRequestHeader>,
    ) -> GateResult<(Arc<dyn NamedCache>, String)> {
        let header = header
            .ok_or_else(|| GateError::invalid_argument("request is missing its header"))?;
        if header.cache.is_empty() {
            return Err(GateError::invalid_argument("cache name must not be empty"));
        }
        // Resolving the format now fails fast on an unknown name.
        self.serializers.resolve(&header.format)?;
        let cache = self.scopes.resolve(&header.scope)?.ensure_cache(&header.cache)?;
        Ok((cache, header.format.clone()))
    }

    // ----- entry access ---------------------------------------------------

    pub async fn get(&self, request: KeyRequest) -> GateResult<OptionalValue> {
        let (cache, format) = self.resolve(request.header.as_ref())?;
        let key = self.serializers.to_native(&format, request.key)?;
        let result = self.pool.run(move || cache.get(&key)).await??;
        self.optional(&format, result)
    }

    pub async fn get_all(&self, request: KeysRequest) -> GateResult<Vec<Entry>> {
        let (cache, format) = self.resolve(request.header.as_ref())?;
        let keys = request
            .keys
            .into_iter()
            .map(|k| self.serializers.to_native(&format, k))
            .collect::<GateResult<Vec<_>>>()?;
        let entries = self.pool.run(move || cache.get_all(&keys)).await??;
        self.entries(&format, entries)
    }

    pub async fn put(&self, request: EntryRequest) -> GateResult<OptionalValue> {
        let (cache, format) = self.resolve(request.header.as_ref())?;
        let key = self.serializers.to_native(&format, request.key)?;
        let value = self.serializers.to_native(&format, request.value)?;
        let previous = self.pool.run(move || cache.put(key, value)).await??;
        self.optional(&format, previous)
    }

    pub async fn put_all(&self, request: EntriesRequest) -> GateResult<()> {
        let (cache, format) = self.resolve(request.header.as_ref())?;
        let entries = request
            .entries
            .into_iter()
            .map(|e| {
                Ok((
                    self.serializers.to_native(&format, e.key)?,
                    self.serializers.to_native(&format, e.value)?,
                ))
            })
            .collect::<GateResult<Vec<_>>>()?;
        self.pool.run(move || cache.put_all(entries)).await??;
        Ok(())
    }

    pub async fn remove(&self, request: KeyRequest) -> GateResult<OptionalValue> {
        let (cache, format) = self.resolve(request.header.as_ref())?;
        let key = self.serializers.to_native(&format, request.key)?;
        let previous = self.pool.run(move || cache.remove(&key)).await??;
        self.optional(&format, previous)
    }

    pub async fn replace(&self, request: EntryRequest) -> GateResult<OptionalValue> {
        let (cache, format) = self.resolve(request.header.as_ref())?;
        let key = self.serializers.to_native(&format, request.key)?;
        let value = self.serializers.to_native(&format, request.value)?;
        let previous = self.pool.run(move || cache.replace(&key, value)).await??;
        self.optional(&format, previous)
    }

    pub async fn contains_key(&self, request: KeyRequest) -> GateResult<BoolValue> {
        let (cache, format) = self.resolve(request.header.as_ref())?;
        let key = self.serializers.to_native(&format, request.key)?;
        let value = self.pool.run(move || cache.contains_key(&key)).await??;
        Ok(BoolValue { value })
    }

    pub async fn contains_value(&self, request: ValueRequest) -> GateResult<BoolValue> {
        let (cache, format) = self.resolve(request.header.as_ref())?;
        let value = self.serializers.to_native(&format, request.value)?;
        let found = self.pool.run(move || cache.contains_value(&value)).await??;
        Ok(BoolValue { value: found })
    }

    pub async fn contains_entry(&self, request: EntryRequest) -> GateResult<BoolValue> {
        let (cache, format) = self.resolve(request.header.as_ref())?;
        let key = self.serializers.to_native(&format, request.key)?;
        let value = self.serializers.to_native(&format, request.value)?;
        let found = self
            .pool
            .run(move || cache.contains_entry(&key, &value))
            .await??;
        Ok(BoolValue { value: found })
    }

    pub async fn size(&self, request: CacheRequest) -> GateResult<UInt64Value> {
        let (cache, _) = self.resolve(request.header.as_ref())?;
        let value = self.pool.run(move || cache.size()).await??;
        Ok(UInt64Value { value })
    }

    pub async fn is_empty(&self, request: CacheRequest) -> GateResult<BoolValue> {
        let (cache, _) = self.resolve(request.header.as_ref())?;
        let value = self.pool.run(move || cache.is_empty()).await??;
        Ok(BoolValue { value })
    }

    pub async fn clear(&self, request: CacheRequest) -> GateResult<()> {
        let (cache, _) = self.resolve(request.header.as_ref())?;
        self.pool.run(move || cache.clear()).await??;
        Ok(())
    }

    // ----- lifecycle ------------------------------------------------------

    pub async fn truncate(&self, request: CacheRequest) -> GateResult<()> {
        let (cache, _) = self.resolve(request.header.as_ref())?;
        self.pool.run(move || cache.truncate()).await??;
        Ok(())
    }

    pub async fn destroy(&self, request: CacheRequest) -> GateResult<()> {
        let (cache, _) = self.resolve(request.header.as_ref())?;
        info!(cache = cache.name(), "destroying cache");
        self.pool.run(move || cache.destroy()).await??;
        Ok(())
    }

    // ----- indexes and invocation -----------------------------------------

    pub async fn add_index(&self, request: IndexRequest) -> GateResult<()> {
        let (cache, format) = self.resolve(request.header.as_ref())?;
        let extractor = self.serializers.to_native(&format, request.extractor)?;
        let sorted = request.sorted;
        self.pool
            .run(move || cache.add_index(extractor, sorted))
            .await??;
        Ok(())
    }

    pub async fn remove_index(&self, request: IndexRequest) -> GateResult<()> {
        let (cache, format) = self.resolve(request.header.as_ref())?;
        let extractor = self.serializers.to_native(&format, request.extractor)?;
        self.pool
            .run(move || cache.remove_index(&extractor))
            .await??;
        Ok(())
    }

    pub async fn invoke(&self, request: InvokeRequest) -> GateResult<OptionalValue> {
        let (cache, format) = self.resolve(request.header.as_ref())?;
        let key = request
            .keys
            .into_iter()
            .next()
            .ok_or_else(|| GateError::invalid_argument("invoke needs a key"))?;
        let key = self.serializers.to_native(&format, key)?;
        let processor = self.serializers.to_native(&format, request.processor)?;
        let result = self
            .pool
            .run(move || cache.invoke(&key, &processor))
            .await??;
        self.optional(&format, result)
    }

    pub async fn invoke_all(&self, request: InvokeRequest) -> GateResult<Vec<Entry>> {
        let (cache, format) = self.resolve(request.header.as_ref())?;
        let keys = request
            .keys
            .into_iter()
            .map(|k| self.serializers.to_native(&format, k))
            .collect::<GateResult<Vec<_>>>()?;
        let filter = self.serializers.decode_filter(&format, request.filter)?;
        let processor = self.serializers.to_native(&format, request.processor)?;
        let results = self
            .pool
            .run(move || cache.invoke_all(&keys, &filter, &processor))
            .await??;
        self.entries(&format, results)
    }

    pub async fn aggregate(&self, request: AggregateRequest) -> GateResult<BytesValue> {
        let (cache, format) = self.resolve(request.header.as_ref())?;
        let keys = request
            .keys
            .into_iter()
            .map(|k| self.serializers.to_native(&format, k))
            .collect::<GateResult<Vec<_>>>()?;
        let filter = self.serializers.decode_filter(&format, request.filter)?;
        let aggregator = self.serializers.to_native(&format, request.aggregator)?;
        let result = self
            .pool
            .run(move || cache.aggregate(&keys, &filter, &aggregator))
            .await??;
        Ok(BytesValue {
            value: self.serializers.from_native(&format, result)?,
        })
    }

    // ----- queries --------------------------------------------------------

    pub async fn key_set(&self, request: QueryRequest) -> GateResult<Vec<BytesValue>> {
        let (cache, format) = self.resolve(request.header.as_ref())?;
        let filter = self.serializers.decode_filter(&format, request.filter)?;
        let keys = self.pool.run(move || cache.keys(&filter)).await??;
        keys.into_iter()
            .map(|k| {
                Ok(BytesValue {
                    value: self.serializers.from_native(&format, k)?,
                })
            })
            .collect()
    }

    pub async fn entry_set(&self, request: QueryRequest) -> GateResult<Vec<Entry>> {
        let (cache, format) = self.resolve(request.header.as_ref())?;
        let filter = self.serializers.decode_filter(&format, request.filter)?;
        let entries = self.pool.run(move || cache.entries(&filter)).await??;
        self.entries(&format, entries)
    }

    pub async fn values(&self, request: QueryRequest) -> GateResult<Vec<BytesValue>> {
        let (cache, format) = self.resolve(request.header.as_ref())?;
        let filter = self.serializers.decode_filter(&format, request.filter)?;
        let values = self.pool.run(move || cache.values(&filter)).await??;
        values
            .into_iter()
            .map(|v| {
                Ok(BytesValue {
                    value: self.serializers.from_native(&format, v)?,
                })
            })
            .collect()
    }

    // ----- paged scans ----------------------------------------------------

    /// The next page of a key scan. The first stream item carries the
    /// cookie; the rest are keys.
    pub async fn next_key_page(&self, request: PageRequest) -> GateResult<Vec<BytesValue>> {
        let (cache, format) = self.resolve(request.header.as_ref())?;
        let scanner = self.scanner;
        let cookie = request.cookie;
        let page = self
            .pool
            .run(move || scanner.key_page(cache.as_ref(), &cookie))
            .await??;
        self.stats.record_page();
        let mut items = Vec::with_capacity(page.keys.len() + 1);
        items.push(BytesValue { value: page.cookie });
        for key in page.keys {
            items.push(BytesValue {
                value: self.serializers.from_native(&format, key)?,
            });
        }
        Ok(items)
    }

    /// The next page of an entry scan. The first stream item carries
    /// only the cookie; the rest carry entries.
    pub async fn next_entry_page(&self, request: PageRequest) -> GateResult<Vec<EntryResult>> {
        let (cache, format) = self.resolve(request.header.as_ref())?;
        let scanner = self.scanner;
        let cookie = request.cookie;
        let page = self
            .pool
            .run(move || scanner.entry_page(cache.as_ref(), &cookie))
            .await??;
        self.stats.record_page();
        let mut items = Vec::with_capacity(page.entries.len() + 1);
        items.push(EntryResult {
            cookie: page.cookie,
            ..Default::default()
        });
        for (key, value) in page.entries {
            items.push(EntryResult {
                key: self.serializers.from_native(&format, key)?,
                value: self.serializers.from_native(&format, value)?,
                cookie: Bytes::new(),
            });
        }
        Ok(items)
    }

    // ----- events stream --------------------------------------------------

    /// Open a bidirectional events stream.
    ///
    /// Returns the handle inbound messages are pushed through and the
    /// receiver of outbound responses. The outbound side completes when
    /// the handle is dropped or the stream's cache is destroyed.
    pub fn open_events(self: &Arc<Self>) -> (EventStreamHandle, mpsc::UnboundedReceiver<MapListenerResponse>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let sink = EventSink::new(tx);
        let stream = EventStream::new(self.scopes.clone(), self.serializers.clone(), sink);
        self.stats.active_event_streams.fetch_add(1, Ordering::Relaxed);
        (
            EventStreamHandle {
                service: self.clone(),
                stream: Arc::new(Mutex::new(stream)),
            },
            rx,
        )
    }

    fn optional(&self, format: &str, value: Option<Bytes>) -> GateResult<OptionalValue> {
        Ok(match value {
            Some(v) => OptionalValue {
                present: true,
                value: self.serializers.from_native(format, v)?,
            },
            None => OptionalValue::default(),
        })
    }

    fn entries(&self, format: &str, entries: Vec<(Bytes, Bytes)>) -> GateResult<Vec<Entry>> {
        entries
            .into_iter()
            .map(|(k, v)| {
                Ok(Entry {
                    key: self.serializers.from_native(format, k)?,
                    value: self.serializers.from_native(format, v)?,
                })
            })
            .collect()
    }
}

/// Inbound half of an open events stream.
pub struct EventStreamHandle {
    service: Arc<NamedCacheService>,
    stream: Arc<Mutex<EventStream>>,
}

impl EventStreamHandle {
    /// Process one inbound subscription message on the worker pool.
    /// Returns an error only for failures that terminate the stream.
    pub async fn process(&self, request: MapListenerRequest) -> GateResult<()> {
        let stream = self.stream.clone();
        self.service
            .pool
            .run(move || stream.lock().process(request))
            .await?
    }
}

impl Drop for EventStreamHandle {
    fn drop(&mut self) {
        self.stream.lock().finish();
        self.service
            .stats
            .active_event_streams
            .fetch_sub(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fabric::memory::MemoryCacheFactory;
    use crate::fabric::CacheFactory;
    use crate::proxy::proto::listener_request_type;

    fn service() -> Arc<NamedCacheService> {
        let factory: Arc<dyn CacheFactory> = Arc::new(MemoryCacheFactory::new(8, 1));
        Arc::new(NamedCacheService::new(
            Arc::new(ScopeRegistry::new(factory)),
            Arc::new(SerializerRegistry::new()),
            &ProxyConfig::default(),
        ))
    }

    fn header(cache: &str) -> Option<CacheRequestHeader> {
        Some(CacheRequestHeader {
            scope: String::new(),
            cache: cache.to_string(),
            format: "json".to_string(),
        })
    }

    fn json(value: serde_json::Value) -> Bytes {
        Bytes::from(serde_json::to_vec(&value).unwrap())
    }

    #[tokio::test]
    async fn get_put_remove_round_trip() {
        let service = service();

        let missing = service
            .get(KeyRequest {
                header: header("orders"),
                key: json(serde_json::json!("k")),
            })
            .await
            .unwrap();
        assert!(!missing.present);

        let previous = service
            .put(EntryRequest {
                header: header("orders"),
                key: json(serde_json::json!("k")),
                value: json(serde_json::json!({"total": 10})),
            })
            .await
            .unwrap();
        assert!(!previous.present);

        let got = service
            .get(KeyRequest {
                header: header("orders"),
                key: json(serde_json::json!("k")),
            })
            .await
            .unwrap();
        assert!(got.present);
        let value: serde_json::Value = serde_json::from_slice(&got.value).unwrap();
        assert_eq!(value["total"], 10);

        let removed = service
            .remove(KeyRequest {
                header: header("orders"),
                key: json(serde_json::json!("k")),
            })
            .await
            .unwrap();
        assert!(removed.present);

        let size = service
            .size(CacheRequest {
                header: header("orders"),
            })
            .await
            .unwrap();
        assert_eq!(size.value, 0);
    }

    #[tokio::test]
    async fn missing_header_and_cache_name_are_rejected() {
        let service = service();

        let err = service
            .size(CacheRequest { header: None })
            .await
            .unwrap_err();
        assert!(matches!(err, GateError::InvalidArgument { .. }));

        let err = service
            .size(CacheRequest { header: header("") })
            .await
            .unwrap_err();
        assert!(matches!(err, GateError::InvalidArgument { .. }));
    }

    #[tokio::test]
    async fn paged_key_scan_streams_cookie_first() {
        let service = service();
        for i in 0..20 {
            service
                .put(EntryRequest {
                    header: header("orders"),
                    key: json(serde_json::json!(format!("key-{i}"))),
                    value: json(serde_json::json!(i)),
                })
                .await
                .unwrap();
        }

        let mut cookie = Bytes::new();
        let mut keys = Vec::new();
        loop {
            let items = service
                .next_key_page(PageRequest {
                    header: header("orders"),
                    cookie: cookie.clone(),
                })
                .await
                .unwrap();
            let (first, rest) = items.split_first().unwrap();
            keys.extend(rest.iter().map(|b| b.value.clone()));
            if first.value.is_empty() {
                break;
            }
            cookie = first.value.clone();
        }
        assert_eq!(keys.len(), 20);
        let pages = service.stats().pages.load(Ordering::Relaxed);
        assert!(pages >= 1, "page counter never moved");
    }

    #[tokio::test]
    async fn events_stream_acknowledges_subscriptions() {
        let service = service();
        let (handle, mut rx) = service.open_events();

        handle
            .process(MapListenerRequest {
                uid: "u1".to_string(),
                cache: "orders".to_string(),
                format: "json".to_string(),
                request_type: listener_request_type::INIT,
                ..Default::default()
            })
            .await
            .unwrap();

        let response = rx.recv().await.unwrap();
        assert!(matches!(
            response.body,
            Some(crate::proxy::proto::ListenerResponseBody::Subscribed(uid)) if uid == "u1"
        ));
        assert_eq!(service.stats().active_event_streams.load(Ordering::Relaxed), 1);

        drop(handle);
        assert_eq!(service.stats().active_event_streams.load(Ordering::Relaxed), 0);
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn invoke_and_aggregate() {
        let service = service();
        service
            .put(EntryRequest {
                header: header("orders"),
                key: json(serde_json::json!("a")),
                value: json(serde_json::json!("old")),
            })
            .await
            .unwrap();

        let result = service
            .invoke(InvokeRequest {
                header: header("orders"),
                keys: vec![json(serde_json::json!("a"))],
                filter: Bytes::new(),
                processor: json(serde_json::json!({"value": b"\"new\"".to_vec()})),
            })
            .await
            .unwrap();
        assert!(result.present);

        let count = service
            .aggregate(AggregateRequest {
                header: header("orders"),
                keys: Vec::new(),
                filter: Bytes::new(),
                aggregator: json(serde_json::json!({"count": true})),
            })
            .await
            .unwrap();
        let n: u64 = serde_json::from_slice(&count.value).unwrap();
        assert_eq!(n, 1);
    }
}
