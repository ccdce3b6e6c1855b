//! In-memory partitioned reference backend.
//!
//! A single-process stand-in for the cache fabric, used by tests and
//! standalone serving. Keys hash to partitions with xxHash and a static
//! ownership table assigns partitions to members round-robin. Listener
//! dispatch, priming registration semantics, and destroy/truncate
//! notifications follow the fabric contract the proxy relies on.
//!
//! Opaque predicates and entry processors are interpreted from a small
//! JSON vocabulary; a real fabric evaluates these engine-side and the
//! proxy never looks inside them.

use crate::core::error::{GateError, GateResult};
use crate::fabric::{
    CacheFactory, DeactivationEvent, DeactivationHandle, EventKind, Filter, ListenerHandle,
    MapEvent, MemberId, NamedCache, PartitionSet,
};
use bytes::Bytes;
use parking_lot::RwLock;
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::hash::Hasher;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use twox_hash::XxHash64;

/// Factory producing [`MemoryCache`] instances on demand.
pub struct MemoryCacheFactory {
    partitions: u32,
    members: u32,
    caches: RwLock<HashMap<String, Arc<MemoryCache>>>,
}

impl MemoryCacheFactory {
    /// Create a factory whose caches have `partitions` partitions
    /// spread over `members` members.
    pub fn new(partitions: u32, members: u32) -> Self {
        Self {
            partitions,
            members: members.max(1),
            caches: RwLock::new(HashMap::new()),
        }
    }

    /// Resolve a cache as the concrete type, for test instrumentation.
    pub fn ensure_memory_cache(&self, name: &str) -> Arc<MemoryCache> {
        if let Some(cache) = self.caches.read().get(name) {
            if cache.is_active() {
                return cache.clone();
            }
        }
        let mut caches = self.caches.write();
        if let Some(cache) = caches.get(name) {
            if cache.is_active() {
                return cache.clone();
            }
        }
        let cache = Arc::new(MemoryCache::new(name, self.partitions, self.members));
        caches.insert(name.to_string(), cache.clone());
        cache
    }
}

impl CacheFactory for MemoryCacheFactory {
    fn ensure_cache(&self, name: &str) -> GateResult<Arc<dyn NamedCache>> {
        if name.is_empty() {
            return Err(GateError::invalid_argument("cache name must not be empty"));
        }
        Ok(self.ensure_memory_cache(name))
    }

    fn cache_names(&self) -> Vec<String> {
        self.caches.read().keys().cloned().collect()
    }
}

struct KeyRegistration {
    id: u64,
    handle: ListenerHandle,
}

struct FilterRegistration {
    id: u64,
    filter: Filter,
    handle: ListenerHandle,
}

/// Counters for listener registration traffic, used by tests that
/// assert how often a proxy goes back to the fabric.
#[derive(Default)]
pub struct RegistrationCounts {
    pub key_adds: AtomicU64,
    pub key_removes: AtomicU64,
    pub filter_adds: AtomicU64,
    pub filter_removes: AtomicU64,
}

#[derive(Default)]
struct CacheState {
    data: BTreeMap<Bytes, Bytes>,
    key_listeners: HashMap<Bytes, Vec<KeyRegistration>>,
    filter_listeners: Vec<FilterRegistration>,
    deactivation_listeners: Vec<DeactivationHandle>,
    indexes: HashSet<Bytes>,
}

/// An in-memory partitioned named cache.
pub struct MemoryCache {
    name: String,
    partitions: u32,
    members: u32,
    active: AtomicBool,
    /// When false, `owner_of` reports unknown ownership for every
    /// partition, simulating redistribution in flight.
    ownership_visible: AtomicBool,
    registrations: RegistrationCounts,
    state: RwLock<CacheState>,
}

const PARTITION_HASH_SEED: u64 = 0x6772_6467; // "grdg"

impl MemoryCache {
    fn new(name: &str, partitions: u32, members: u32) -> Self {
        Self {
            name: name.to_string(),
            partitions,
            members,
            active: AtomicBool::new(true),
            ownership_visible: AtomicBool::new(true),
            registrations: RegistrationCounts::default(),
            state: RwLock::new(CacheState::default()),
        }
    }

    /// Listener registration call counters.
    pub fn registration_counts(&self) -> &RegistrationCounts {
        &self.registrations
    }

    /// The partition a key hashes to.
    pub fn partition_of(&self, key: &[u8]) -> u32 {
        let mut hasher = XxHash64::with_seed(PARTITION_HASH_SEED);
        hasher.write(key);
        (hasher.finish() % self.partitions.max(1) as u64) as u32
    }

    /// Toggle ownership visibility, simulating partition
    /// redistribution for tests.
    pub fn set_ownership_visible(&self, visible: bool) {
        self.ownership_visible.store(visible, Ordering::Release);
    }

    fn check_active(&self) -> GateResult<()> {
        if self.is_active() {
            Ok(())
        } else {
            Err(GateError::fabric(format!(
                "cache {:?} has been destroyed",
                self.name
            )))
        }
    }

    /// Collect (listener, matched filters) targets for an event under
    /// the state lock, then dispatch outside it. Values are always
    /// delivered; the proxy decides per stream whether a subscription
    /// may see them.
    fn dispatch(&self, kind: EventKind, key: &Bytes, old: Option<Bytes>, new: Option<Bytes>) {
        struct Target {
            listener: Arc<dyn crate::fabric::MapListener>,
            filters: Vec<Filter>,
        }

        let mut targets: Vec<Target> = Vec::new();
        {
            let state = self.state.read();
            let mut by_listener: HashMap<u64, Target> = HashMap::new();

            if let Some(registrations) = state.key_listeners.get(key) {
                for registration in registrations {
                    if let Some(listener) = registration.handle.listener.upgrade() {
                        by_listener.entry(registration.id).or_insert(Target {
                            listener,
                            filters: Vec::new(),
                        });
                    }
                }
            }

            for registration in &state.filter_listeners {
                if !filter_matches(&registration.filter, key) {
                    continue;
                }
                if let Some(listener) = registration.handle.listener.upgrade() {
                    let target = by_listener.entry(registration.id).or_insert(Target {
                        listener,
                        filters: Vec::new(),
                    });
                    target.filters.push(registration.filter.clone());
                }
            }

            targets.extend(by_listener.into_values());
        }

        for target in targets {
            target.listener.on_event(MapEvent {
                cache: self.name.clone(),
                kind,
                key: key.clone(),
                old_value: old.clone(),
                new_value: new.clone(),
                synthetic: false,
                priming: false,
                filters: target.filters,
            });
        }
    }

    fn notify_deactivation(&self, event: DeactivationEvent) {
        let listeners: Vec<_> = {
            let state = self.state.read();
            state
                .deactivation_listeners
                .iter()
                .filter_map(|h| h.listener.upgrade())
                .collect()
        };
        for listener in listeners {
            listener.on_deactivation(&self.name, event);
        }
    }
}

impl NamedCache for MemoryCache {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    fn get(&self, key: &[u8]) -> GateResult<Option<Bytes>> {
        self.check_active()?;
        Ok(self.state.read().data.get(key).cloned())
    }

    fn get_all(&self, keys: &[Bytes]) -> GateResult<Vec<(Bytes, Bytes)>> {
        self.check_active()?;
        let state = self.state.read();
        Ok(keys
            .iter()
            .filter_map(|k| state.data.get(k).map(|v| (k.clone(), v.clone())))
            .collect())
    }

    fn put(&self, key: Bytes, value: Bytes) -> GateResult<Option<Bytes>> {
        self.check_active()?;
        let previous = {
            let mut state = self.state.write();
            state.data.insert(key.clone(), value.clone())
        };
        let kind = if previous.is_some() {
            EventKind::Updated
        } else {
            EventKind::Inserted
        };
        self.dispatch(kind, &key, previous.clone(), Some(value));
        Ok(previous)
    }

    fn put_all(&self, entries: Vec<(Bytes, Bytes)>) -> GateResult<()> {
        for (key, value) in entries {
            self.put(key, value)?;
        }
        Ok(())
    }

    fn remove(&self, key: &[u8]) -> GateResult<Option<Bytes>> {
        self.check_active()?;
        let key = Bytes::copy_from_slice(key);
        let previous = {
            let mut state = self.state.write();
            state.data.remove(&key)
        };
        if previous.is_some() {
            self.dispatch(EventKind::Deleted, &key, previous.clone(), None);
        }
        Ok(previous)
    }

    fn replace(&self, key: &[u8], value: Bytes) -> GateResult<Option<Bytes>> {
        self.check_active()?;
        let key = Bytes::copy_from_slice(key);
        let previous = {
            let mut state = self.state.write();
            if !state.data.contains_key(&key) {
                return Ok(None);
            }
            state.data.insert(key.clone(), value.clone())
        };
        self.dispatch(EventKind::Updated, &key, previous.clone(), Some(value));
        Ok(previous)
    }

    fn contains_key(&self, key: &[u8]) -> GateResult<bool> {
        self.check_active()?;
        Ok(self.state.read().data.contains_key(key))
    }

    fn contains_value(&self, value: &[u8]) -> GateResult<bool> {
        self.check_active()?;
        Ok(self.state.read().data.values().any(|v| v == value))
    }

    fn contains_entry(&self, key: &[u8], value: &[u8]) -> GateResult<bool> {
        self.check_active()?;
        Ok(self.state.read().data.get(key).map(|v| v.as_ref()) == Some(value))
    }

    fn size(&self) -> GateResult<u64> {
        self.check_active()?;
        Ok(self.state.read().data.len() as u64)
    }

    fn is_empty(&self) -> GateResult<bool> {
        self.check_active()?;
        Ok(self.state.read().data.is_empty())
    }

    fn clear(&self) -> GateResult<()> {
        self.check_active()?;
        let entries: Vec<(Bytes, Bytes)> = {
            let mut state = self.state.write();
            let drained = std::mem::take(&mut state.data);
            drained.into_iter().collect()
        };
        for (key, value) in entries {
            self.dispatch(EventKind::Deleted, &key, Some(value), None);
        }
        Ok(())
    }

    fn truncate(&self) -> GateResult<()> {
        self.check_active()?;
        self.state.write().data.clear();
        self.notify_deactivation(DeactivationEvent::Truncated);
        Ok(())
    }

    fn destroy(&self) -> GateResult<()> {
        if self.active.swap(false, Ordering::AcqRel) {
            self.notify_deactivation(DeactivationEvent::Destroyed);
            let mut state = self.state.write();
            state.data.clear();
            state.key_listeners.clear();
            state.filter_listeners.clear();
            state.deactivation_listeners.clear();
        }
        Ok(())
    }

    fn keys(&self, filter: &Filter) -> GateResult<Vec<Bytes>> {
        self.check_active()?;
        let state = self.state.read();
        Ok(state
            .data
            .keys()
            .filter(|k| filter_matches(filter, k))
            .cloned()
            .collect())
    }

    fn entries(&self, filter: &Filter) -> GateResult<Vec<(Bytes, Bytes)>> {
        self.check_active()?;
        let state = self.state.read();
        Ok(state
            .data
            .iter()
            .filter(|(k, _)| filter_matches(filter, k))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    fn values(&self, filter: &Filter) -> GateResult<Vec<Bytes>> {
        Ok(self.entries(filter)?.into_iter().map(|(_, v)| v).collect())
    }

    fn partition_count(&self) -> u32 {
        self.partitions
    }

    fn owner_of(&self, partition: u32) -> Option<MemberId> {
        if !self.ownership_visible.load(Ordering::Acquire) || partition >= self.partitions {
            return None;
        }
        Some(partition % self.members)
    }

    fn keys_in_partitions(&self, partitions: &PartitionSet) -> GateResult<Vec<Bytes>> {
        self.check_active()?;
        let state = self.state.read();
        Ok(state
            .data
            .keys()
            .filter(|k| partitions.contains(self.partition_of(k)))
            .cloned()
            .collect())
    }

    fn entries_in_partitions(
        &self,
        partitions: &PartitionSet,
    ) -> GateResult<Vec<(Bytes, Bytes)>> {
        self.check_active()?;
        let state = self.state.read();
        Ok(state
            .data
            .iter()
            .filter(|(k, _)| partitions.contains(self.partition_of(k)))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    fn invoke(&self, key: &[u8], processor: &[u8]) -> GateResult<Option<Bytes>> {
        self.check_active()?;
        let processor = Processor::parse(processor)?;
        self.apply_processor(&Bytes::copy_from_slice(key), &processor)
    }

    fn invoke_all(
        &self,
        keys: &[Bytes],
        filter: &Filter,
        processor: &[u8],
    ) -> GateResult<Vec<(Bytes, Bytes)>> {
        self.check_active()?;
        let processor = Processor::parse(processor)?;
        let targets: Vec<Bytes> = if keys.is_empty() {
            self.keys(filter)?
        } else {
            keys.to_vec()
        };
        let mut results = Vec::new();
        for key in targets {
            if let Some(result) = self.apply_processor(&key, &processor)? {
                results.push((key, result));
            }
        }
        Ok(results)
    }

    fn aggregate(&self, keys: &[Bytes], filter: &Filter, aggregator: &[u8]) -> GateResult<Bytes> {
        self.check_active()?;
        let aggregator: Aggregator = serde_json::from_slice(aggregator)
            .map_err(|e| GateError::fabric(format!("unsupported aggregator: {e}")))?;
        let entries: Vec<(Bytes, Bytes)> = if keys.is_empty() {
            self.entries(filter)?
        } else {
            self.get_all(keys)?
        };
        let result = match aggregator {
            Aggregator::Count { .. } => serde_json::json!(entries.len()),
            Aggregator::TotalBytes { .. } => {
                serde_json::json!(entries.iter().map(|(_, v)| v.len() as u64).sum::<u64>())
            }
        };
        Ok(Bytes::from(serde_json::to_vec(&result).map_err(|e| {
            GateError::fabric(format!("aggregator result encoding failed: {e}"))
        })?))
    }

    fn add_index(&self, extractor: Bytes, _sorted: bool) -> GateResult<()> {
        self.check_active()?;
        self.state.write().indexes.insert(extractor);
        Ok(())
    }

    fn remove_index(&self, extractor: &[u8]) -> GateResult<()> {
        self.check_active()?;
        self.state.write().indexes.remove(extractor);
        Ok(())
    }

    fn add_key_listener(
        &self,
        handle: ListenerHandle,
        key: Bytes,
        _lite: bool,
        priming: bool,
    ) -> GateResult<()> {
        self.check_active()?;
        self.registrations.key_adds.fetch_add(1, Ordering::Relaxed);
        let current = {
            let mut state = self.state.write();
            let registrations = state.key_listeners.entry(key.clone()).or_default();
            registrations.retain(|r| r.id != handle.id);
            registrations.push(KeyRegistration {
                id: handle.id,
                handle: handle.clone(),
            });
            if priming {
                state.data.get(&key).cloned()
            } else {
                None
            }
        };

        if priming {
            if let Some(listener) = handle.listener.upgrade() {
                listener.on_event(MapEvent {
                    cache: self.name.clone(),
                    kind: EventKind::Updated,
                    key,
                    old_value: None,
                    new_value: current,
                    synthetic: true,
                    priming: true,
                    filters: Vec::new(),
                });
            }
        }
        Ok(())
    }

    fn remove_key_listener(&self, listener_id: u64, key: &[u8]) -> GateResult<()> {
        self.registrations
            .key_removes
            .fetch_add(1, Ordering::Relaxed);
        let mut state = self.state.write();
        if let Some(registrations) = state.key_listeners.get_mut(key) {
            registrations.retain(|r| r.id != listener_id);
            if registrations.is_empty() {
                state.key_listeners.remove(key);
            }
        }
        Ok(())
    }

    fn add_filter_listener(
        &self,
        handle: ListenerHandle,
        filter: Filter,
        _lite: bool,
        priming: bool,
    ) -> GateResult<()> {
        self.check_active()?;
        self.registrations
            .filter_adds
            .fetch_add(1, Ordering::Relaxed);
        let primed: Vec<(Bytes, Option<Bytes>)> = {
            let mut state = self.state.write();
            state
                .filter_listeners
                .retain(|r| !(r.id == handle.id && r.filter == filter));
            state.filter_listeners.push(FilterRegistration {
                id: handle.id,
                filter: filter.clone(),
                handle: handle.clone(),
            });
            match (&filter, priming) {
                (Filter::KeySet(keys), true) => keys
                    .iter()
                    .map(|k| (k.clone(), state.data.get(k).cloned()))
                    .collect(),
                _ => Vec::new(),
            }
        };

        if !primed.is_empty() {
            if let Some(listener) = handle.listener.upgrade() {
                for (key, current) in primed {
                    listener.on_event(MapEvent {
                        cache: self.name.clone(),
                        kind: EventKind::Updated,
                        key,
                        old_value: None,
                        new_value: current,
                        synthetic: true,
                        priming: true,
                        filters: vec![filter.clone()],
                    });
                }
            }
        }
        Ok(())
    }

    fn remove_filter_listener(&self, listener_id: u64, filter: &Filter) -> GateResult<()> {
        self.registrations
            .filter_removes
            .fetch_add(1, Ordering::Relaxed);
        let mut state = self.state.write();
        state
            .filter_listeners
            .retain(|r| !(r.id == listener_id && &r.filter == filter));
        Ok(())
    }

    fn add_deactivation_listener(&self, handle: DeactivationHandle) -> GateResult<()> {
        self.check_active()?;
        let mut state = self.state.write();
        state.deactivation_listeners.retain(|h| h.id != handle.id);
        state.deactivation_listeners.push(handle);
        Ok(())
    }

    fn remove_deactivation_listener(&self, listener_id: u64) -> GateResult<()> {
        let mut state = self.state.write();
        state.deactivation_listeners.retain(|h| h.id != listener_id);
        Ok(())
    }
}

impl MemoryCache {
    fn apply_processor(&self, key: &Bytes, processor: &Processor) -> GateResult<Option<Bytes>> {
        match processor {
            Processor::Get { .. } => self.get(key),
            Processor::Put { value } => self.put(key.clone(), Bytes::from(value.clone())),
            Processor::Remove { .. } => self.remove(key),
        }
    }
}

/// Entry-processor vocabulary of the reference backend.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Processor {
    Get { get: bool },
    Put { value: Vec<u8> },
    Remove { remove: bool },
}

impl Processor {
    fn parse(raw: &[u8]) -> GateResult<Self> {
        serde_json::from_slice(raw)
            .map_err(|e| GateError::fabric(format!("unsupported entry processor: {e}")))
    }
}

/// Aggregator vocabulary of the reference backend.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Aggregator {
    Count { count: bool },
    TotalBytes { total_bytes: bool },
}

/// Opaque-predicate evaluation.
///
/// The reference backend understands a key-prefix predicate; anything
/// it cannot parse matches every entry, mirroring a fabric that
/// evaluates unknown predicates engine-side.
#[derive(Debug, Deserialize)]
struct OpaquePredicate {
    #[serde(default)]
    prefix: Option<Vec<u8>>,
}

fn filter_matches(filter: &Filter, key: &[u8]) -> bool {
    match filter {
        Filter::All => true,
        Filter::KeySet(keys) => keys.iter().any(|k| k.as_ref() == key),
        Filter::Opaque(raw) => match serde_json::from_slice::<OpaquePredicate>(raw) {
            Ok(OpaquePredicate { prefix: Some(p) }) => key.starts_with(&p),
            _ => true,
        },
    }
}
