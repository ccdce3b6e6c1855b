//! Wire payload serialization.
//!
//! Clients name a serialization format per request; the cache stores
//! values in its own native format. This module holds the registry of
//! named serializers and the conversion path between a client format
//! and the cache-native one. When the two formats are the same the
//! payload passes through untouched, so the proxy never re-encodes
//! bytes it does not have to.
//!
//! The proxy also needs to see inside exactly one client payload: a
//! filter that is really an explicit key list must be decomposed into
//! per-key registrations. [`SerializerRegistry::decode_filter`] does
//! that recognition; every other predicate stays opaque.

use crate::core::error::{GateError, GateResult};
use crate::fabric::Filter;
use bytes::Bytes;
use parking_lot::RwLock;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;

/// Name of the cache-native format.
pub const NATIVE_FORMAT: &str = "json";

/// A named serialization format.
///
/// Formats convert through a self-describing intermediate value, so
/// any registered format can convert to any other.
pub trait Serializer: Send + Sync {
    /// The format name clients put in requests.
    fn name(&self) -> &str;

    /// Decode a payload into the intermediate representation.
    fn decode(&self, raw: &[u8]) -> GateResult<serde_json::Value>;

    /// Encode the intermediate representation into this format.
    fn encode(&self, value: &serde_json::Value) -> GateResult<Bytes>;
}

impl std::fmt::Debug for dyn Serializer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Serializer").field("name", &self.name()).finish()
    }
}

/// The built-in JSON serializer, also the cache-native format.
pub struct JsonSerializer;

impl Serializer for JsonSerializer {
    fn name(&self) -> &str {
        NATIVE_FORMAT
    }

    fn decode(&self, raw: &[u8]) -> GateResult<serde_json::Value> {
        serde_json::from_slice(raw)
            .map_err(|e| GateError::serialization(format!("malformed json payload: {e}")))
    }

    fn encode(&self, value: &serde_json::Value) -> GateResult<Bytes> {
        serde_json::to_vec(value)
            .map(Bytes::from)
            .map_err(|e| GateError::serialization(format!("json encoding failed: {e}")))
    }
}

/// Shape of a key-set filter payload the proxy recognizes.
#[derive(Deserialize)]
struct KeySetPayload {
    keys: Vec<serde_json::Value>,
}

/// Registry of named serializers.
pub struct SerializerRegistry {
    formats: RwLock<HashMap<String, Arc<dyn Serializer>>>,
}

impl Default for SerializerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SerializerRegistry {
    /// Create a registry with the built-in JSON format registered.
    pub fn new() -> Self {
        let registry = Self {
            formats: RwLock::new(HashMap::new()),
        };
        registry.register(Arc::new(JsonSerializer));
        registry
    }

    /// Register a serializer under its own format name.
    pub fn register(&self, serializer: Arc<dyn Serializer>) {
        self.formats
            .write()
            .insert(serializer.name().to_string(), serializer);
    }

    /// Resolve a format name. The empty name selects the native format.
    pub fn resolve(&self, format: &str) -> GateResult<Arc<dyn Serializer>> {
        let format = if format.is_empty() {
            NATIVE_FORMAT
        } else {
            format
        };
        self.formats.read().get(format).cloned().ok_or_else(|| {
            GateError::invalid_argument(format!("unknown serialization format: {format:?}"))
        })
    }

    /// Convert a client payload into the cache-native format.
    pub fn to_native(&self, format: &str, raw: Bytes) -> GateResult<Bytes> {
        self.convert(format, NATIVE_FORMAT, raw)
    }

    /// Convert a cache-native payload into the client's format.
    pub fn from_native(&self, format: &str, raw: Bytes) -> GateResult<Bytes> {
        self.convert(NATIVE_FORMAT, format, raw)
    }

    /// Convert between two named formats, passing identical formats
    /// through byte-for-byte.
    pub fn convert(&self, from: &str, to: &str, raw: Bytes) -> GateResult<Bytes> {
        let from = self.resolve(from)?;
        let to = self.resolve(to)?;
        if from.name() == to.name() {
            return Ok(raw);
        }
        to.encode(&from.decode(&raw)?)
    }

    /// Decode a client filter payload.
    ///
    /// An empty payload matches every entry. A payload shaped as
    /// `{"keys": [...]}` is an explicit key list and comes back as
    /// [`Filter::KeySet`] with every key converted to cache-native
    /// form. Anything else stays opaque for the fabric to evaluate.
    pub fn decode_filter(&self, format: &str, raw: Bytes) -> GateResult<Filter> {
        if raw.is_empty() {
            return Ok(Filter::All);
        }
        let serializer = self.resolve(format)?;
        if let Ok(value) = serializer.decode(&raw) {
            if let Ok(payload) = serde_json::from_value::<KeySetPayload>(value) {
                let native = self.resolve(NATIVE_FORMAT)?;
                let keys = payload
                    .keys
                    .iter()
                    .map(|k| native.encode(k))
                    .collect::<GateResult<Vec<_>>>()?;
                return Ok(Filter::KeySet(keys));
            }
        }
        Ok(Filter::Opaque(raw))
    }
}
