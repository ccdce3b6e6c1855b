//! Cache fabric seam.
//!
//! The distributed cache engine GridGate fronts is an external
//! collaborator. This module defines the traits the proxy calls
//! through (named caches, cache factories, scope resolution, and
//! map-event listener registration) and the event and filter types
//! that cross the seam. Partition ownership, replication, eviction,
//! and index maintenance all live behind these traits and are never
//! reimplemented here.
//!
//! [`memory`] provides an in-memory partitioned reference backend used
//! for tests and standalone serving.

pub mod memory;
pub mod partition;

use crate::core::error::{GateError, GateResult};
use bytes::Bytes;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::{Arc, Weak};

pub use partition::PartitionSet;

/// Identifier of a fabric member (storage node) owning partitions.
pub type MemberId = u32;

/// The kind of change a map event describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Inserted,
    Updated,
    Deleted,
}

impl EventKind {
    /// Numeric event id on the wire.
    pub fn wire_id(self) -> i32 {
        match self {
            Self::Inserted => 1,
            Self::Updated => 2,
            Self::Deleted => 3,
        }
    }
}

/// A change event delivered to a registered map listener.
#[derive(Debug, Clone)]
pub struct MapEvent {
    /// Name of the cache the event originated from.
    pub cache: String,
    /// Change kind.
    pub kind: EventKind,
    /// Affected key, in cache-native serialized form.
    pub key: Bytes,
    /// Value before the change, if any.
    pub old_value: Option<Bytes>,
    /// Value after the change, if any.
    pub new_value: Option<Bytes>,
    /// True for events not caused by a client mutation (eviction,
    /// priming).
    pub synthetic: bool,
    /// True for the synthetic current-value event a priming
    /// registration receives.
    pub priming: bool,
    /// The filters of this listener's filter-based registrations that
    /// matched the event. Empty for purely key-based delivery.
    pub filters: Vec<Filter>,
}

/// A query/listener filter as the proxy sees it.
///
/// The proxy decodes only enough structure to recognize an explicit
/// key list; every other predicate stays opaque and is evaluated by
/// the fabric. Identity (for registration bookkeeping) is the filter
/// value exactly as the client sent it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Filter {
    /// Matches every entry.
    All,
    /// An explicit bulk list of keys, in cache-native serialized form.
    KeySet(Vec<Bytes>),
    /// An opaque serialized predicate for the fabric to evaluate.
    Opaque(Bytes),
}

impl Filter {
    /// Whether this is a key-set filter.
    pub fn is_key_set(&self) -> bool {
        matches!(self, Self::KeySet(_))
    }
}

/// Cache lifecycle notifications delivered to a deactivation listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeactivationEvent {
    /// The cache was destroyed; no further events will follow.
    Destroyed,
    /// The cache was truncated. Truncation produces no per-entry
    /// events by cache contract.
    Truncated,
}

/// Receiver of map change events.
pub trait MapListener: Send + Sync {
    fn on_event(&self, event: MapEvent);
}

/// Receiver of cache destroy/truncate notifications.
pub trait DeactivationListener: Send + Sync {
    fn on_deactivation(&self, cache: &str, event: DeactivationEvent);
}

/// A registration handle pairing a proxy-assigned id with a weak
/// listener reference. The fabric drops registrations whose listener
/// has gone away.
#[derive(Clone)]
pub struct ListenerHandle {
    pub id: u64,
    pub listener: Weak<dyn MapListener>,
}

impl ListenerHandle {
    pub fn new(id: u64, listener: &Arc<dyn MapListener>) -> Self {
        Self {
            id,
            listener: Arc::downgrade(listener),
        }
    }
}

/// Deactivation registration handle.
#[derive(Clone)]
pub struct DeactivationHandle {
    pub id: u64,
    pub listener: Weak<dyn DeactivationListener>,
}

impl DeactivationHandle {
    pub fn new(id: u64, listener: &Arc<dyn DeactivationListener>) -> Self {
        Self {
            id,
            listener: Arc::downgrade(listener),
        }
    }
}

/// A named cache in the fabric.
///
/// All payloads are cache-native serialized bytes; the proxy performs
/// format conversion before and after these calls. Every method may
/// fail with a fabric error, which callers surface as-is.
pub trait NamedCache: Send + Sync {
    fn name(&self) -> &str;

    /// False once the cache has been destroyed or released.
    fn is_active(&self) -> bool;

    // ----- entry access ---------------------------------------------------

    fn get(&self, key: &[u8]) -> GateResult<Option<Bytes>>;
    fn get_all(&self, keys: &[Bytes]) -> GateResult<Vec<(Bytes, Bytes)>>;
    fn put(&self, key: Bytes, value: Bytes) -> GateResult<Option<Bytes>>;
    fn put_all(&self, entries: Vec<(Bytes, Bytes)>) -> GateResult<()>;
    fn remove(&self, key: &[u8]) -> GateResult<Option<Bytes>>;
    /// Replace the value only if the key is present. Returns the
    /// previous value if the replace happened.
    fn replace(&self, key: &[u8], value: Bytes) -> GateResult<Option<Bytes>>;
    fn contains_key(&self, key: &[u8]) -> GateResult<bool>;
    fn contains_value(&self, value: &[u8]) -> GateResult<bool>;
    fn contains_entry(&self, key: &[u8], value: &[u8]) -> GateResult<bool>;
    fn size(&self) -> GateResult<u64>;
    fn is_empty(&self) -> GateResult<bool>;
    fn clear(&self) -> GateResult<()>;

    // ----- lifecycle ------------------------------------------------------

    /// Remove all entries without raising per-entry events.
    fn truncate(&self) -> GateResult<()>;
    /// Destroy the cache; deactivation listeners are notified and the
    /// cache becomes inactive.
    fn destroy(&self) -> GateResult<()>;

    // ----- queries --------------------------------------------------------

    fn keys(&self, filter: &Filter) -> GateResult<Vec<Bytes>>;
    fn entries(&self, filter: &Filter) -> GateResult<Vec<(Bytes, Bytes)>>;
    fn values(&self, filter: &Filter) -> GateResult<Vec<Bytes>>;

    // ----- partitioned access ---------------------------------------------

    /// Number of partitions of the owning service. Zero when the
    /// service is not partitioned.
    fn partition_count(&self) -> u32;
    /// The member currently owning `partition`, or None while
    /// ownership is in flux (redistribution in progress).
    fn owner_of(&self, partition: u32) -> Option<MemberId>;
    fn keys_in_partitions(&self, partitions: &PartitionSet) -> GateResult<Vec<Bytes>>;
    fn entries_in_partitions(&self, partitions: &PartitionSet)
        -> GateResult<Vec<(Bytes, Bytes)>>;

    // ----- invocation -----------------------------------------------------

    fn invoke(&self, key: &[u8], processor: &[u8]) -> GateResult<Option<Bytes>>;
    /// Invoke against an explicit key list (when non-empty) or every
    /// entry matching the filter.
    fn invoke_all(
        &self,
        keys: &[Bytes],
        filter: &Filter,
        processor: &[u8],
    ) -> GateResult<Vec<(Bytes, Bytes)>>;
    fn aggregate(&self, keys: &[Bytes], filter: &Filter, aggregator: &[u8]) -> GateResult<Bytes>;

    // ----- indexes --------------------------------------------------------

    fn add_index(&self, extractor: Bytes, sorted: bool) -> GateResult<()>;
    fn remove_index(&self, extractor: &[u8]) -> GateResult<()>;

    // ----- listener registration ------------------------------------------

    /// Register a key listener. A priming registration immediately
    /// receives a synthetic current-value event for the key. The lite
    /// flag is advisory: a fabric may omit values for lite
    /// registrations but is always allowed to deliver them, and the
    /// proxy strips values it must not forward.
    fn add_key_listener(
        &self,
        handle: ListenerHandle,
        key: Bytes,
        lite: bool,
        priming: bool,
    ) -> GateResult<()>;
    fn remove_key_listener(&self, listener_id: u64, key: &[u8]) -> GateResult<()>;
    /// Register a filter listener. A priming key-set registration
    /// immediately receives one synthetic current-value event per key
    /// in the set.
    fn add_filter_listener(
        &self,
        handle: ListenerHandle,
        filter: Filter,
        lite: bool,
        priming: bool,
    ) -> GateResult<()>;
    fn remove_filter_listener(&self, listener_id: u64, filter: &Filter) -> GateResult<()>;
    fn add_deactivation_listener(&self, handle: DeactivationHandle) -> GateResult<()>;
    fn remove_deactivation_listener(&self, listener_id: u64) -> GateResult<()>;
}

/// Producer of named caches.
pub trait CacheFactory: Send + Sync {
    /// Resolve a cache by name, creating it on first use.
    fn ensure_cache(&self, name: &str) -> GateResult<Arc<dyn NamedCache>>;
    /// Names of caches currently known to this factory.
    fn cache_names(&self) -> Vec<String>;
}

/// Registry resolving scope names to cache factories.
///
/// The empty scope name is the default scope.
pub struct ScopeRegistry {
    scopes: RwLock<HashMap<String, Arc<dyn CacheFactory>>>,
}

impl ScopeRegistry {
    /// Create a registry with `default_factory` bound to the default
    /// (empty) scope.
    pub fn new(default_factory: Arc<dyn CacheFactory>) -> Self {
        let mut scopes: HashMap<String, Arc<dyn CacheFactory>> = HashMap::new();
        scopes.insert(String::new(), default_factory);
        Self {
            scopes: RwLock::new(scopes),
        }
    }

    /// Bind a factory to a scope name.
    pub fn register(&self, scope: impl Into<String>, factory: Arc<dyn CacheFactory>) {
        self.scopes.write().insert(scope.into(), factory);
    }

    /// Resolve a scope to its factory.
    pub fn resolve(&self, scope: &str) -> GateResult<Arc<dyn CacheFactory>> {
        self.scopes
            .read()
            .get(scope)
            .cloned()
            .ok_or_else(|| GateError::invalid_argument(format!("unknown scope name: {scope:?}")))
    }
}
