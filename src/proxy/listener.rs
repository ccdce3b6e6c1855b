//! Listener registration proxy for the bidirectional events stream.
//!
//! Each events stream gets one [`MapListenerProxy`]: the single fabric
//! listener standing in for every subscription the remote client makes
//! on that stream. The proxy keeps per-key registration flags, the
//! filter registration table, and the rules that make re-registration
//! cheap:
//!
//! - lite and priming flags combine across repeated subscriptions; a
//!   lite registration upgraded to heavy forces exactly one fabric
//!   re-registration, and priming is sticky once requested
//! - a priming subscription for an already-registered key synthesizes
//!   the current-value event locally instead of going back to the
//!   fabric
//! - key-set filters track their keys in the same flag table without
//!   per-key fabric registrations; the filter itself is registered
//!   with the fabric exactly once
//!
//! Event values are included unless every registration the event
//! matched is lite and the key registration is not priming; the fabric
//! always delivers values and the proxy strips them here.
//!
//! Subscription mistakes (unknown keys, bad filter ids) are reported
//! in-band and the stream stays open; only transport and fabric
//! failures terminate the stream. A destroyed cache completes the
//! stream, after which further requests are dropped.

use crate::core::error::{GateError, GateResult};
use crate::fabric::{
    DeactivationEvent, DeactivationHandle, DeactivationListener, Filter, ListenerHandle,
    MapEvent, MapListener, NamedCache, ScopeRegistry,
};
use crate::proxy::proto::{
    listener_request_type, ListenerError, ListenerResponseBody, MapEventMessage,
    MapListenerRequest, MapListenerResponse,
};
use crate::serializer::SerializerRegistry;
use bitflags::bitflags;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::hash::Hasher;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use twox_hash::XxHash64;

bitflags! {
    /// Registration flags tracked per subscribed key.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct KeyFlags: u8 {
        const LITE = 0b001;
        const PRIMING = 0b010;
        /// The key holds its own fabric registration. Keys tracked
        /// only through a key-set filter do not; their fabric
        /// registration is the filter itself.
        const REGISTERED = 0b100;
    }
}

const KEY_STRIPES: usize = 16;
const STRIPE_HASH_SEED: u64 = 0x6c73_746e;

static NEXT_LISTENER_ID: AtomicU64 = AtomicU64::new(1);

/// Key registration table, striped to keep subscription changes for
/// unrelated keys from contending.
struct KeyTable {
    stripes: Vec<Mutex<HashMap<Bytes, KeyFlags>>>,
}

impl KeyTable {
    fn new() -> Self {
        Self {
            stripes: (0..KEY_STRIPES)
                .map(|_| Mutex::new(HashMap::new()))
                .collect(),
        }
    }

    fn stripe(&self, key: &[u8]) -> &Mutex<HashMap<Bytes, KeyFlags>> {
        let mut hasher = XxHash64::with_seed(STRIPE_HASH_SEED);
        hasher.write(key);
        &self.stripes[(hasher.finish() % KEY_STRIPES as u64) as usize]
    }

    fn drain(&self) -> Vec<(Bytes, KeyFlags)> {
        let mut keys = Vec::new();
        for stripe in &self.stripes {
            keys.extend(stripe.lock().drain());
        }
        keys
    }
}

#[derive(Clone, Copy)]
struct FilterEntry {
    id: i64,
    lite: bool,
}

#[derive(Default)]
struct FilterTable {
    by_filter: HashMap<Filter, FilterEntry>,
    by_id: HashMap<i64, Filter>,
}

/// Outbound half of an events stream.
///
/// The sender lives behind an Option so the stream can be completed
/// from a fabric callback: closing drops the only sender and the
/// receiver sees end-of-stream.
pub struct EventSink {
    tx: Mutex<Option<mpsc::UnboundedSender<MapListenerResponse>>>,
}

impl EventSink {
    pub fn new(tx: mpsc::UnboundedSender<MapListenerResponse>) -> Arc<Self> {
        Arc::new(Self {
            tx: Mutex::new(Some(tx)),
        })
    }

    pub fn send(&self, body: ListenerResponseBody) {
        if let Some(tx) = self.tx.lock().as_ref() {
            let _ = tx.send(MapListenerResponse { body: Some(body) });
        }
    }

    /// Drop the sender; the stream's receiver completes once in-flight
    /// messages drain.
    pub fn close(&self) {
        self.tx.lock().take();
    }
}

/// The fabric listener standing in for one events stream.
pub struct MapListenerProxy {
    id: u64,
    cache: Arc<dyn NamedCache>,
    serializers: Arc<SerializerRegistry>,
    format: String,
    sink: Arc<EventSink>,
    keys: KeyTable,
    filters: Mutex<FilterTable>,
    torn_down: AtomicBool,
    completed: AtomicBool,
}

impl MapListenerProxy {
    /// Create the proxy for a stream and register it for cache
    /// lifecycle notifications.
    pub fn open(
        cache: Arc<dyn NamedCache>,
        serializers: Arc<SerializerRegistry>,
        format: String,
        sink: Arc<EventSink>,
    ) -> GateResult<Arc<Self>> {
        let proxy = Arc::new(Self {
            id: NEXT_LISTENER_ID.fetch_add(1, Ordering::Relaxed),
            cache,
            serializers,
            format,
            sink,
            keys: KeyTable::new(),
            filters: Mutex::new(FilterTable::default()),
            torn_down: AtomicBool::new(false),
            completed: AtomicBool::new(false),
        });
        let deactivation: Arc<dyn DeactivationListener> = proxy.clone();
        proxy
            .cache
            .add_deactivation_listener(DeactivationHandle::new(proxy.id, &deactivation))?;
        Ok(proxy)
    }

    fn listener_handle(self: &Arc<Self>) -> ListenerHandle {
        let listener: Arc<dyn MapListener> = self.clone();
        ListenerHandle::new(self.id, &listener)
    }

    /// Register or refresh a key subscription.
    pub fn subscribe_key(self: &Arc<Self>, key: Bytes, lite: bool, priming: bool) -> GateResult<()> {
        self.subscribe_key_inner(key, lite, priming, true)
    }

    /// Shared subscription bookkeeping. `register` is false for keys
    /// tracked through a key-set filter, whose one fabric registration
    /// is the filter itself.
    fn subscribe_key_inner(
        self: &Arc<Self>,
        key: Bytes,
        lite: bool,
        priming: bool,
        register: bool,
    ) -> GateResult<()> {
        let stripe = self.keys.stripe(&key);
        let previous = {
            let mut table = stripe.lock();
            let previous = table.get(&key).copied();
            let mut flags = match previous {
                None => {
                    let mut flags = KeyFlags::empty();
                    flags.set(KeyFlags::LITE, lite);
                    flags.set(KeyFlags::PRIMING, priming);
                    flags
                }
                Some(prev) => {
                    let mut flags = prev;
                    if priming {
                        flags |= KeyFlags::PRIMING;
                    }
                    if !lite {
                        flags -= KeyFlags::LITE;
                    }
                    flags
                }
            };
            if register {
                flags |= KeyFlags::REGISTERED;
            }
            table.insert(key.clone(), flags);
            previous
        };

        // The fabric is called outside the stripe lock: a priming
        // registration delivers its synthetic event synchronously, and
        // event conversion reads the flag table.
        let was_registered = previous.is_some_and(|prev| prev.contains(KeyFlags::REGISTERED));
        let mut fabric_primes = false;
        let fabric = if register && !was_registered {
            fabric_primes = priming;
            self.cache
                .add_key_listener(self.listener_handle(), key.clone(), lite, priming)
        } else if register && previous.is_some_and(|prev| prev.contains(KeyFlags::LITE)) && !lite {
            // A lite registration upgraded to heavy is the one refresh
            // that goes back to the fabric.
            self.cache
                .remove_key_listener(self.id, &key)
                .and_then(|()| {
                    self.cache
                        .add_key_listener(self.listener_handle(), key.clone(), false, false)
                })
        } else {
            Ok(())
        };
        if let Err(error) = fabric {
            if previous.is_none() {
                stripe.lock().remove(&key);
            }
            return Err(error);
        }

        if register && priming && previous.is_some() && !fabric_primes {
            // Already tracked: satisfy the priming request locally
            // from the current cached value, no fabric call.
            let current = self.cache.get(&key)?;
            self.emit_priming(&key, current)?;
        }
        Ok(())
    }

    /// Remove a key subscription. Unsubscribing a key this stream never
    /// registered is an illegal-state protocol violation; the fabric is
    /// not called for it.
    pub fn unsubscribe_key(&self, key: &Bytes) -> GateResult<()> {
        let flags = {
            let stripe = self.keys.stripe(key);
            let mut table = stripe.lock();
            match table.remove(key) {
                Some(flags) => flags,
                None => {
                    return Err(GateError::illegal_state(format!(
                        "unsubscribe for a key this stream never registered ({} bytes)",
                        key.len()
                    )))
                }
            }
        };
        if flags.contains(KeyFlags::REGISTERED) {
            self.cache.remove_key_listener(self.id, key)?;
        }
        Ok(())
    }

    /// Register a filter subscription under a client-chosen positive
    /// filter id.
    pub fn subscribe_filter(
        self: &Arc<Self>,
        filter_id: i64,
        filter: Filter,
        lite: bool,
        priming: bool,
    ) -> GateResult<()> {
        if filter_id <= 0 {
            return Err(GateError::invalid_argument(format!(
                "filter id must be positive, got {filter_id}"
            )));
        }
        if priming && !filter.is_key_set() {
            return Err(GateError::invalid_argument(
                "priming subscriptions require a key or key-set filter",
            ));
        }
        if let Filter::KeySet(keys) = &filter {
            // Key-set filters share the key flag table; the fabric
            // sees one registration of the filter itself.
            for key in keys.clone() {
                self.subscribe_key_inner(key, lite, priming, false)?;
            }
        }
        {
            let mut filters = self.filters.lock();
            filters
                .by_filter
                .insert(filter.clone(), FilterEntry { id: filter_id, lite });
            filters.by_id.insert(filter_id, filter.clone());
        }
        // The filter table is populated before the fabric call so the
        // synthetic priming events a key-set registration raises carry
        // the filter id.
        if let Err(error) =
            self.cache
                .add_filter_listener(self.listener_handle(), filter.clone(), lite, priming)
        {
            let mut filters = self.filters.lock();
            filters.by_filter.remove(&filter);
            filters.by_id.remove(&filter_id);
            return Err(error);
        }
        Ok(())
    }

    /// Remove a filter subscription. Removing a filter that is not
    /// registered is a no-op, so a retried unsubscribe never reaches
    /// the fabric twice.
    pub fn unsubscribe_filter(&self, filter: &Filter) -> GateResult<()> {
        let removed_id = {
            let mut filters = self.filters.lock();
            match filters.by_filter.remove(filter) {
                Some(entry) => {
                    filters.by_id.remove(&entry.id);
                    entry.id
                }
                None => return Ok(()),
            }
        };
        if let Filter::KeySet(keys) = filter {
            // Drop keys tracked only for this filter; keys with their
            // own fabric registration keep their entry.
            for key in keys {
                let stripe = self.keys.stripe(key);
                let mut table = stripe.lock();
                if table
                    .get(key)
                    .is_some_and(|flags| !flags.contains(KeyFlags::REGISTERED))
                {
                    table.remove(key);
                }
            }
        }
        self.cache.remove_filter_listener(self.id, filter)?;
        debug!(filter_id = removed_id, "filter subscription removed");
        Ok(())
    }

    /// Drop every registration this stream holds. Idempotent; called
    /// when the stream ends however it ends.
    pub fn teardown(&self) {
        if self.torn_down.swap(true, Ordering::AcqRel) {
            return;
        }
        for (key, flags) in self.keys.drain() {
            if !flags.contains(KeyFlags::REGISTERED) {
                continue;
            }
            if let Err(error) = self.cache.remove_key_listener(self.id, &key) {
                debug!(%error, "key deregistration failed during stream teardown");
            }
        }
        let filters: Vec<Filter> = {
            let mut table = self.filters.lock();
            table.by_id.clear();
            table.by_filter.drain().map(|(f, _)| f).collect()
        };
        for filter in filters {
            if let Err(error) = self.cache.remove_filter_listener(self.id, &filter) {
                debug!(%error, "filter deregistration failed during stream teardown");
            }
        }
        if let Err(error) = self.cache.remove_deactivation_listener(self.id) {
            debug!(%error, "deactivation deregistration failed during stream teardown");
        }
    }

    /// True once the stream's cache has been destroyed.
    pub fn is_completed(&self) -> bool {
        self.completed.load(Ordering::Acquire)
    }

    #[cfg(test)]
    pub(crate) fn key_flags(&self, key: &[u8]) -> Option<KeyFlags> {
        self.keys.stripe(key).lock().get(key).copied()
    }

    fn emit_priming(&self, key: &Bytes, current: Option<Bytes>) -> GateResult<()> {
        let key = self
            .serializers
            .from_native(&self.format, key.clone())?;
        let new_value = match current {
            Some(value) => self.serializers.from_native(&self.format, value)?,
            None => Bytes::new(),
        };
        self.sink
            .send(ListenerResponseBody::Event(MapEventMessage {
                id: crate::fabric::EventKind::Updated.wire_id(),
                key,
                new_value,
                old_value: Bytes::new(),
                filter_ids: Vec::new(),
                synthetic: true,
                priming: true,
            }));
        Ok(())
    }

    fn convert_event(&self, event: &MapEvent) -> GateResult<MapEventMessage> {
        let key_flags = self
            .keys
            .stripe(&event.key)
            .lock()
            .get(&event.key)
            .copied();
        let key_lite = key_flags.map_or(true, |f| f.contains(KeyFlags::LITE));
        let key_priming = key_flags.is_some_and(|f| f.contains(KeyFlags::PRIMING));

        let mut filter_ids = Vec::new();
        let mut filter_lite = true;
        {
            let filters = self.filters.lock();
            for matched in &event.filters {
                if let Some(entry) = filters.by_filter.get(matched) {
                    filter_ids.push(entry.id);
                    filter_lite &= entry.lite;
                }
            }
        }

        // Values travel unless every registration the event matched is
        // lite and the key registration is not priming.
        let include_values = !key_lite || !filter_lite || key_priming || event.priming;
        let convert = |value: &Option<Bytes>| -> GateResult<Bytes> {
            match value {
                Some(v) if include_values => {
                    self.serializers.from_native(&self.format, v.clone())
                }
                _ => Ok(Bytes::new()),
            }
        };
        // Priming events carry only the current value.
        let old_value = if event.priming {
            Bytes::new()
        } else {
            convert(&event.old_value)?
        };
        Ok(MapEventMessage {
            id: event.kind.wire_id(),
            key: self
                .serializers
                .from_native(&self.format, event.key.clone())?,
            new_value: convert(&event.new_value)?,
            old_value,
            filter_ids,
            synthetic: event.synthetic,
            priming: event.priming,
        })
    }
}

impl MapListener for MapListenerProxy {
    fn on_event(&self, event: MapEvent) {
        match self.convert_event(&event) {
            Ok(message) => self.sink.send(ListenerResponseBody::Event(message)),
            Err(error) => {
                warn!(cache = %event.cache, %error, "dropping undeliverable map event");
            }
        }
    }
}

impl DeactivationListener for MapListenerProxy {
    fn on_deactivation(&self, cache: &str, event: DeactivationEvent) {
        match event {
            DeactivationEvent::Truncated => {
                self.sink
                    .send(ListenerResponseBody::Truncated(cache.to_string()));
            }
            DeactivationEvent::Destroyed => {
                self.sink
                    .send(ListenerResponseBody::Destroyed(cache.to_string()));
                self.completed.store(true, Ordering::Release);
                self.sink.close();
            }
        }
    }
}

/// Build the in-band error message for a failed subscription request.
pub fn error_response(uid: &str, error: &GateError) -> ListenerError {
    let stack = std::backtrace::Backtrace::force_capture()
        .to_string()
        .lines()
        .map(str::to_string)
        .collect();
    ListenerError {
        uid: uid.to_string(),
        code: error.grpc_code(),
        message: error.to_string(),
        stack,
    }
}

/// Per-stream request state machine.
///
/// Owns the proxy once the stream is initialized and routes inbound
/// subscription messages to it. Protocol violations become in-band
/// error responses; anything else tears the stream down.
pub struct EventStream {
    scopes: Arc<ScopeRegistry>,
    serializers: Arc<SerializerRegistry>,
    sink: Arc<EventSink>,
    proxy: Option<Arc<MapListenerProxy>>,
    completed: bool,
}

impl EventStream {
    pub fn new(
        scopes: Arc<ScopeRegistry>,
        serializers: Arc<SerializerRegistry>,
        sink: Arc<EventSink>,
    ) -> Self {
        Self {
            scopes,
            serializers,
            sink,
            proxy: None,
            completed: false,
        }
    }

    /// Whether the stream has reached its terminal state (finished, or
    /// its cache was destroyed). Completed streams drop further input.
    fn is_completed(&self) -> bool {
        self.completed || self.proxy.as_ref().is_some_and(|p| p.is_completed())
    }

    /// Handle one inbound message. Returns an error only for failures
    /// that must terminate the stream.
    pub fn process(&mut self, request: MapListenerRequest) -> GateResult<()> {
        if self.is_completed() {
            debug!(uid = request.uid, "dropping request for a completed events stream");
            return Ok(());
        }
        let uid = request.uid.clone();
        match self.handle(request) {
            Ok(()) => Ok(()),
            Err(error) if error.is_protocol_violation() => {
                warn!(uid, %error, "events-stream request rejected");
                self.sink
                    .send(ListenerResponseBody::Error(error_response(&uid, &error)));
                Ok(())
            }
            Err(error) => Err(error),
        }
    }

    fn handle(&mut self, request: MapListenerRequest) -> GateResult<()> {
        match request.request_type {
            listener_request_type::INIT => self.init(request),
            listener_request_type::KEY => self.key_change(request),
            listener_request_type::FILTER => self.filter_change(request),
            other => Err(GateError::invalid_argument(format!(
                "unknown listener request type {other}"
            ))),
        }
    }

    fn init(&mut self, request: MapListenerRequest) -> GateResult<()> {
        if self.proxy.is_some() {
            return Err(GateError::illegal_state(
                "events stream is already initialized",
            ));
        }
        if request.cache.is_empty() {
            return Err(GateError::invalid_argument(
                "events stream init needs a cache name",
            ));
        }
        // Resolving the format up front surfaces an unknown format on
        // init instead of on the first event.
        self.serializers.resolve(&request.format)?;
        let cache = self
            .scopes
            .resolve(&request.scope)?
            .ensure_cache(&request.cache)?;
        let proxy = MapListenerProxy::open(
            cache,
            self.serializers.clone(),
            request.format,
            self.sink.clone(),
        )?;
        self.proxy = Some(proxy);
        self.sink
            .send(ListenerResponseBody::Subscribed(request.uid));
        Ok(())
    }

    fn proxy_for(&self, request: &MapListenerRequest) -> GateResult<&Arc<MapListenerProxy>> {
        let proxy = self.proxy.as_ref().ok_or_else(|| {
            GateError::illegal_state("events stream has not been initialized")
        })?;
        if !request.cache.is_empty() && request.cache != proxy.cache.name() {
            return Err(GateError::illegal_state(format!(
                "events stream is bound to cache {:?}, cannot address {:?}",
                proxy.cache.name(),
                request.cache
            )));
        }
        Ok(proxy)
    }

    fn key_change(&mut self, request: MapListenerRequest) -> GateResult<()> {
        let proxy = self.proxy_for(&request)?.clone();
        let key = self
            .serializers
            .to_native(&proxy.format, request.key)?;
        if request.subscribe {
            proxy.subscribe_key(key, request.lite, request.priming)?;
            self.sink
                .send(ListenerResponseBody::Subscribed(request.uid));
        } else {
            proxy.unsubscribe_key(&key)?;
            self.sink
                .send(ListenerResponseBody::Unsubscribed(request.uid));
        }
        Ok(())
    }

    fn filter_change(&mut self, request: MapListenerRequest) -> GateResult<()> {
        let proxy = self.proxy_for(&request)?.clone();
        let filter = self
            .serializers
            .decode_filter(&proxy.format, request.filter)?;
        if request.subscribe {
            proxy.subscribe_filter(request.filter_id, filter, request.lite, request.priming)?;
            self.sink
                .send(ListenerResponseBody::Subscribed(request.uid));
        } else {
            proxy.unsubscribe_filter(&filter)?;
            self.sink
                .send(ListenerResponseBody::Unsubscribed(request.uid));
        }
        Ok(())
    }

    /// Release every registration the stream holds and complete it.
    pub fn finish(&mut self) {
        self.completed = true;
        if let Some(proxy) = self.proxy.take() {
            proxy.teardown();
        }
        self.sink.close();
    }
}

impl Drop for EventStream {
    fn drop(&mut self) {
        self.finish();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fabric::memory::MemoryCacheFactory;
    use crate::fabric::CacheFactory;

    struct Fixture {
        factory: Arc<MemoryCacheFactory>,
        stream: EventStream,
        rx: mpsc::UnboundedReceiver<MapListenerResponse>,
    }

    fn fixture() -> Fixture {
        let factory = Arc::new(MemoryCacheFactory::new(4, 1));
        let scopes = Arc::new(ScopeRegistry::new(factory.clone() as Arc<dyn CacheFactory>));
        let serializers = Arc::new(SerializerRegistry::new());
        let (tx, rx) = mpsc::unbounded_channel();
        let stream = EventStream::new(scopes, serializers, EventSink::new(tx));
        Fixture {
            factory,
            stream,
            rx,
        }
    }

    fn init_request(uid: &str) -> MapListenerRequest {
        MapListenerRequest {
            uid: uid.to_string(),
            cache: "orders".to_string(),
            format: "json".to_string(),
            request_type: listener_request_type::INIT,
            ..Default::default()
        }
    }

    fn key_request(uid: &str, key: &str, subscribe: bool) -> MapListenerRequest {
        MapListenerRequest {
            uid: uid.to_string(),
            request_type: listener_request_type::KEY,
            key: Bytes::from(serde_json::to_vec(key).unwrap()),
            subscribe,
            ..Default::default()
        }
    }

    fn expect(rx: &mut mpsc::UnboundedReceiver<MapListenerResponse>) -> ListenerResponseBody {
        rx.try_recv().expect("expected a response").body.unwrap()
    }

    #[test]
    fn subscribe_and_receive_events() {
        let mut fx = fixture();
        fx.stream.process(init_request("u1")).unwrap();
        assert!(matches!(
            expect(&mut fx.rx),
            ListenerResponseBody::Subscribed(uid) if uid == "u1"
        ));

        fx.stream.process(key_request("u2", "k", true)).unwrap();
        assert!(matches!(
            expect(&mut fx.rx),
            ListenerResponseBody::Subscribed(uid) if uid == "u2"
        ));

        let cache = fx.factory.ensure_memory_cache("orders");
        cache
            .put(Bytes::from_static(b"\"k\""), Bytes::from_static(b"\"v\""))
            .unwrap();

        match expect(&mut fx.rx) {
            ListenerResponseBody::Event(event) => {
                assert_eq!(event.id, 1);
                assert_eq!(event.key, Bytes::from_static(b"\"k\""));
                assert_eq!(event.new_value, Bytes::from_static(b"\"v\""));
            }
            other => panic!("expected event, got {other:?}"),
        }
    }

    #[test]
    fn lite_flags_combine_and_priming_sticks() {
        let mut fx = fixture();
        fx.stream.process(init_request("u1")).unwrap();

        let mut lite = key_request("u2", "k", true);
        lite.lite = true;
        fx.stream.process(lite).unwrap();

        let proxy = fx.stream.proxy.as_ref().unwrap().clone();
        let key = Bytes::from_static(b"\"k\"");
        assert_eq!(
            proxy.key_flags(&key),
            Some(KeyFlags::LITE | KeyFlags::REGISTERED)
        );

        let mut priming = key_request("u3", "k", true);
        priming.lite = true;
        priming.priming = true;
        fx.stream.process(priming).unwrap();
        assert_eq!(
            proxy.key_flags(&key),
            Some(KeyFlags::LITE | KeyFlags::PRIMING | KeyFlags::REGISTERED)
        );

        // Heavy subscription clears lite; priming stays.
        fx.stream.process(key_request("u4", "k", true)).unwrap();
        assert_eq!(
            proxy.key_flags(&key),
            Some(KeyFlags::PRIMING | KeyFlags::REGISTERED)
        );
    }

    #[test]
    fn priming_resubscription_synthesizes_current_value() {
        let mut fx = fixture();
        let cache = fx.factory.ensure_memory_cache("orders");
        cache
            .put(Bytes::from_static(b"\"k\""), Bytes::from_static(b"\"v\""))
            .unwrap();

        fx.stream.process(init_request("u1")).unwrap();
        fx.stream.process(key_request("u2", "k", true)).unwrap();
        let mut priming = key_request("u3", "k", true);
        priming.priming = true;
        fx.stream.process(priming).unwrap();

        expect(&mut fx.rx); // init ack
        expect(&mut fx.rx); // first subscribe ack
        match expect(&mut fx.rx) {
            ListenerResponseBody::Event(event) => {
                assert!(event.priming);
                assert!(event.synthetic);
                assert_eq!(event.id, 2);
                assert_eq!(event.new_value, Bytes::from_static(b"\"v\""));
            }
            other => panic!("expected priming event, got {other:?}"),
        }
        assert!(matches!(
            expect(&mut fx.rx),
            ListenerResponseBody::Subscribed(uid) if uid == "u3"
        ));
    }

    #[test]
    fn unsubscribing_untracked_key_is_in_band_error() {
        let mut fx = fixture();
        fx.stream.process(init_request("u1")).unwrap();
        expect(&mut fx.rx);

        fx.stream.process(key_request("u2", "k", false)).unwrap();
        match expect(&mut fx.rx) {
            ListenerResponseBody::Error(error) => {
                assert_eq!(error.uid, "u2");
                assert_eq!(error.code, 9);
                assert!(!error.stack.is_empty());
            }
            other => panic!("expected error, got {other:?}"),
        }

        // The stream survives the violation.
        fx.stream.process(key_request("u3", "k", true)).unwrap();
        assert!(matches!(
            expect(&mut fx.rx),
            ListenerResponseBody::Subscribed(uid) if uid == "u3"
        ));
    }

    #[test]
    fn bad_filter_ids_are_rejected_before_the_fabric() {
        let mut fx = fixture();
        fx.stream.process(init_request("u1")).unwrap();
        expect(&mut fx.rx);

        let request = MapListenerRequest {
            uid: "u2".to_string(),
            request_type: listener_request_type::FILTER,
            filter_id: 0,
            subscribe: true,
            ..Default::default()
        };
        fx.stream.process(request).unwrap();
        match expect(&mut fx.rx) {
            ListenerResponseBody::Error(error) => assert_eq!(error.code, 3),
            other => panic!("expected error, got {other:?}"),
        }

        let request = MapListenerRequest {
            uid: "u3".to_string(),
            request_type: listener_request_type::FILTER,
            filter_id: 7,
            filter: Bytes::from(
                serde_json::to_vec(&serde_json::json!({ "prefix": [1] })).unwrap(),
            ),
            subscribe: true,
            priming: true,
            ..Default::default()
        };
        fx.stream.process(request).unwrap();
        match expect(&mut fx.rx) {
            ListenerResponseBody::Error(error) => assert_eq!(error.code, 3),
            other => panic!("expected error, got {other:?}"),
        }
    }

    #[test]
    fn key_set_filters_track_keys_and_tag_events() {
        let mut fx = fixture();
        fx.stream.process(init_request("u1")).unwrap();
        expect(&mut fx.rx);

        let request = MapListenerRequest {
            uid: "u2".to_string(),
            request_type: listener_request_type::FILTER,
            filter_id: 42,
            filter: Bytes::from(
                serde_json::to_vec(&serde_json::json!({ "keys": ["a", "b"] })).unwrap(),
            ),
            subscribe: true,
            ..Default::default()
        };
        fx.stream.process(request).unwrap();
        assert!(matches!(
            expect(&mut fx.rx),
            ListenerResponseBody::Subscribed(uid) if uid == "u2"
        ));

        // The keys are tracked locally but carry no fabric
        // registration of their own.
        let proxy = fx.stream.proxy.as_ref().unwrap().clone();
        assert_eq!(proxy.key_flags(b"\"a\""), Some(KeyFlags::empty()));
        assert_eq!(proxy.key_flags(b"\"b\""), Some(KeyFlags::empty()));

        let cache = fx.factory.ensure_memory_cache("orders");
        cache
            .put(Bytes::from_static(b"\"a\""), Bytes::from_static(b"1"))
            .unwrap();

        match expect(&mut fx.rx) {
            ListenerResponseBody::Event(event) => {
                assert_eq!(event.filter_ids, vec![42]);
                assert_eq!(event.new_value, Bytes::from_static(b"1"));
            }
            other => panic!("expected event, got {other:?}"),
        }

        // A second unsubscribe is a no-op, not an error.
        let unsubscribe = MapListenerRequest {
            uid: "u3".to_string(),
            request_type: listener_request_type::FILTER,
            filter: Bytes::from(
                serde_json::to_vec(&serde_json::json!({ "keys": ["a", "b"] })).unwrap(),
            ),
            subscribe: false,
            ..Default::default()
        };
        fx.stream.process(unsubscribe.clone()).unwrap();
        assert!(matches!(
            expect(&mut fx.rx),
            ListenerResponseBody::Unsubscribed(_)
        ));
        assert_eq!(proxy.key_flags(b"\"a\""), None);
        fx.stream.process(unsubscribe).unwrap();
        assert!(matches!(
            expect(&mut fx.rx),
            ListenerResponseBody::Unsubscribed(_)
        ));
    }

    #[test]
    fn key_set_subscription_registers_the_filter_once() {
        let mut fx = fixture();
        fx.stream.process(init_request("u1")).unwrap();
        expect(&mut fx.rx);

        let request = MapListenerRequest {
            uid: "u2".to_string(),
            request_type: listener_request_type::FILTER,
            filter_id: 9,
            filter: Bytes::from(
                serde_json::to_vec(&serde_json::json!({ "keys": ["a", "b"] })).unwrap(),
            ),
            subscribe: true,
            ..Default::default()
        };
        fx.stream.process(request.clone()).unwrap();

        let cache = fx.factory.ensure_memory_cache("orders");
        let counts = cache.registration_counts();
        assert_eq!(counts.filter_adds.load(Ordering::Relaxed), 1);
        assert_eq!(counts.key_adds.load(Ordering::Relaxed), 0);

        let mut unsubscribe = request;
        unsubscribe.subscribe = false;
        fx.stream.process(unsubscribe).unwrap();
        assert_eq!(counts.filter_removes.load(Ordering::Relaxed), 1);
        assert_eq!(counts.key_removes.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn priming_key_set_subscription_primes_each_key() {
        let mut fx = fixture();
        let cache = fx.factory.ensure_memory_cache("orders");
        cache
            .put(Bytes::from_static(b"\"a\""), Bytes::from_static(b"1"))
            .unwrap();

        fx.stream.process(init_request("u1")).unwrap();
        expect(&mut fx.rx);

        let request = MapListenerRequest {
            uid: "u2".to_string(),
            request_type: listener_request_type::FILTER,
            filter_id: 5,
            filter: Bytes::from(
                serde_json::to_vec(&serde_json::json!({ "keys": ["a", "b"] })).unwrap(),
            ),
            subscribe: true,
            priming: true,
            ..Default::default()
        };
        fx.stream.process(request).unwrap();

        match expect(&mut fx.rx) {
            ListenerResponseBody::Event(event) => {
                assert!(event.priming);
                assert!(event.synthetic);
                assert_eq!(event.filter_ids, vec![5]);
                assert_eq!(event.new_value, Bytes::from_static(b"1"));
            }
            other => panic!("expected priming event, got {other:?}"),
        }
        match expect(&mut fx.rx) {
            ListenerResponseBody::Event(event) => {
                assert!(event.priming);
                assert!(event.new_value.is_empty());
            }
            other => panic!("expected priming event, got {other:?}"),
        }
        assert!(matches!(
            expect(&mut fx.rx),
            ListenerResponseBody::Subscribed(uid) if uid == "u2"
        ));
    }

    #[test]
    fn destroy_completes_the_stream_and_truncate_does_not() {
        let mut fx = fixture();
        fx.stream.process(init_request("u1")).unwrap();
        expect(&mut fx.rx);

        let cache = fx.factory.ensure_memory_cache("orders");
        cache.truncate().unwrap();
        assert!(matches!(
            expect(&mut fx.rx),
            ListenerResponseBody::Truncated(name) if name == "orders"
        ));

        cache.destroy().unwrap();
        assert!(matches!(
            expect(&mut fx.rx),
            ListenerResponseBody::Destroyed(name) if name == "orders"
        ));
        assert!(fx.rx.try_recv().is_err());
        // Sender side is closed; the receiver reports disconnection.
        assert!(matches!(
            fx.rx.try_recv(),
            Err(mpsc::error::TryRecvError::Disconnected)
        ));
    }

    #[test]
    fn messages_before_init_are_rejected_in_band() {
        let mut fx = fixture();
        fx.stream.process(key_request("u1", "k", true)).unwrap();
        match expect(&mut fx.rx) {
            ListenerResponseBody::Error(error) => assert_eq!(error.code, 9),
            other => panic!("expected error, got {other:?}"),
        }
    }

    #[test]
    fn lite_key_subscription_strips_values() {
        let mut fx = fixture();
        fx.stream.process(init_request("u1")).unwrap();
        expect(&mut fx.rx);

        let mut lite = key_request("u2", "k", true);
        lite.lite = true;
        fx.stream.process(lite).unwrap();
        expect(&mut fx.rx);

        let cache = fx.factory.ensure_memory_cache("orders");
        cache
            .put(Bytes::from_static(b"\"k\""), Bytes::from_static(b"\"v\""))
            .unwrap();

        match expect(&mut fx.rx) {
            ListenerResponseBody::Event(event) => {
                assert_eq!(event.id, 1);
                assert_eq!(event.key, Bytes::from_static(b"\"k\""));
                assert!(event.new_value.is_empty());
                assert!(event.old_value.is_empty());
            }
            other => panic!("expected event, got {other:?}"),
        }
    }

    #[test]
    fn lite_priming_key_subscription_keeps_values() {
        let mut fx = fixture();
        fx.stream.process(init_request("u1")).unwrap();
        expect(&mut fx.rx);

        let mut request = key_request("u2", "k", true);
        request.lite = true;
        request.priming = true;
        fx.stream.process(request).unwrap();
        // Registration primes immediately; the key is absent so the
        // synthetic event has no value yet.
        match expect(&mut fx.rx) {
            ListenerResponseBody::Event(event) => {
                assert!(event.priming);
                assert!(event.new_value.is_empty());
            }
            other => panic!("expected priming event, got {other:?}"),
        }
        expect(&mut fx.rx); // subscribe ack

        let cache = fx.factory.ensure_memory_cache("orders");
        cache
            .put(Bytes::from_static(b"\"k\""), Bytes::from_static(b"\"v\""))
            .unwrap();

        // Priming keeps values flowing even though the registration
        // is lite.
        match expect(&mut fx.rx) {
            ListenerResponseBody::Event(event) => {
                assert_eq!(event.id, 1);
                assert_eq!(event.new_value, Bytes::from_static(b"\"v\""));
            }
            other => panic!("expected insert event, got {other:?}"),
        }
    }

    #[test]
    fn heavy_filter_match_overrides_lite_key_subscription() {
        let mut fx = fixture();
        fx.stream.process(init_request("u1")).unwrap();
        expect(&mut fx.rx);

        let mut lite = key_request("u2", "k", true);
        lite.lite = true;
        fx.stream.process(lite).unwrap();
        expect(&mut fx.rx);

        // An empty filter payload is the match-all filter, heavy.
        let filter = MapListenerRequest {
            uid: "u3".to_string(),
            request_type: listener_request_type::FILTER,
            filter_id: 7,
            subscribe: true,
            ..Default::default()
        };
        fx.stream.process(filter).unwrap();
        expect(&mut fx.rx);

        let cache = fx.factory.ensure_memory_cache("orders");
        cache
            .put(Bytes::from_static(b"\"k\""), Bytes::from_static(b"\"v\""))
            .unwrap();

        match expect(&mut fx.rx) {
            ListenerResponseBody::Event(event) => {
                assert_eq!(event.filter_ids, vec![7]);
                assert_eq!(event.new_value, Bytes::from_static(b"\"v\""));
            }
            other => panic!("expected event, got {other:?}"),
        }
    }

    #[test]
    fn requests_after_destroy_are_ignored() {
        let mut fx = fixture();
        fx.stream.process(init_request("u1")).unwrap();
        expect(&mut fx.rx);

        let cache = fx.factory.ensure_memory_cache("orders");
        cache.destroy().unwrap();
        assert!(matches!(
            expect(&mut fx.rx),
            ListenerResponseBody::Destroyed(name) if name == "orders"
        ));

        // The stream is terminal: further requests are silent no-ops,
        // not stream-ending errors.
        fx.stream.process(key_request("u2", "k", true)).unwrap();
        fx.stream.process(init_request("u3")).unwrap();
        assert!(matches!(
            fx.rx.try_recv(),
            Err(mpsc::error::TryRecvError::Disconnected)
        ));
    }

    #[test]
    fn finished_stream_ignores_further_requests() {
        let mut fx = fixture();
        fx.stream.process(init_request("u1")).unwrap();
        expect(&mut fx.rx);

        fx.stream.finish();
        fx.stream.process(key_request("u2", "k", true)).unwrap();
        assert!(matches!(
            fx.rx.try_recv(),
            Err(mpsc::error::TryRecvError::Disconnected)
        ));
    }

    #[test]
    fn lite_to_heavy_upgrade_reregisters_once() {
        let mut fx = fixture();
        fx.stream.process(init_request("u1")).unwrap();
        let cache = fx.factory.ensure_memory_cache("orders");
        let counts = cache.registration_counts();

        let mut lite = key_request("u2", "k", true);
        lite.lite = true;
        fx.stream.process(lite).unwrap();
        assert_eq!(counts.key_adds.load(Ordering::Relaxed), 1);
        assert_eq!(counts.key_removes.load(Ordering::Relaxed), 0);

        fx.stream.process(key_request("u3", "k", true)).unwrap();
        assert_eq!(counts.key_adds.load(Ordering::Relaxed), 2);
        assert_eq!(counts.key_removes.load(Ordering::Relaxed), 1);

        // Repeating the heavy subscription leaves the fabric alone.
        fx.stream.process(key_request("u4", "k", true)).unwrap();
        assert_eq!(counts.key_adds.load(Ordering::Relaxed), 2);
        assert_eq!(counts.key_removes.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn teardown_releases_each_key_once() {
        let mut fx = fixture();
        fx.stream.process(init_request("u1")).unwrap();
        fx.stream.process(key_request("u2", "a", true)).unwrap();
        fx.stream.process(key_request("u3", "b", true)).unwrap();
        let cache = fx.factory.ensure_memory_cache("orders");

        fx.stream.finish();
        fx.stream.finish();

        let counts = cache.registration_counts();
        assert_eq!(counts.key_adds.load(Ordering::Relaxed), 2);
        assert_eq!(counts.key_removes.load(Ordering::Relaxed), 2);
    }
}
