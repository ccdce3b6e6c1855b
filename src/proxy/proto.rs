//! Protobuf encoding for the gridgate.v1 protocol.
//!
//! This module provides manual prost::Message implementations for the
//! cache service wire types without proto codegen. Request messages are
//! shared between operations with the same shape; the transport layer
//! decides which operation a message means from the request path.

use bytes::Bytes;
use prost::{DecodeError, Message};

// ============================================================================
// CacheRequestHeader
// ============================================================================

/// Common request routing fields carried by every cache request.
#[derive(Clone, Default, Debug, PartialEq)]
pub struct CacheRequestHeader {
    pub scope: String,  // field 1
    pub cache: String,  // field 2
    pub format: String, // field 3
}

impl Message for CacheRequestHeader {
    fn encode_raw(&self, buf: &mut impl prost::bytes::BufMut)
    where
        Self: Sized,
    {
        if !self.scope.is_empty() {
            prost::encoding::string::encode(1, &self.scope, buf);
        }
        if !self.cache.is_empty() {
            prost::encoding::string::encode(2, &self.cache, buf);
        }
        if !self.format.is_empty() {
            prost::encoding::string::encode(3, &self.format, buf);
        }
    }

    fn merge_field(
        &mut self,
        tag: u32,
        wire_type: prost::encoding::WireType,
        buf: &mut impl prost::bytes::Buf,
        ctx: prost::encoding::DecodeContext,
    ) -> Result<(), DecodeError>
    where
        Self: Sized,
    {
        match tag {
            1 => prost::encoding::string::merge(wire_type, &mut self.scope, buf, ctx),
            2 => prost::encoding::string::merge(wire_type, &mut self.cache, buf, ctx),
            3 => prost::encoding::string::merge(wire_type, &mut self.format, buf, ctx),
            _ => prost::encoding::skip_field(wire_type, tag, buf, ctx),
        }
    }

    fn encoded_len(&self) -> usize {
        let mut len = 0;
        if !self.scope.is_empty() {
            len += prost::encoding::string::encoded_len(1, &self.scope);
        }
        if !self.cache.is_empty() {
            len += prost::encoding::string::encoded_len(2, &self.cache);
        }
        if !self.format.is_empty() {
            len += prost::encoding::string::encoded_len(3, &self.format);
        }
        len
    }

    fn clear(&mut self) {
        *self = Self::default();
    }
}

// ============================================================================
// CacheRequest
// ============================================================================

/// Request with no payload beyond the header: size, isEmpty, clear,
/// truncate, destroy.
#[derive(Clone, Default, Debug)]
pub struct CacheRequest {
    pub header: Option<CacheRequestHeader>, // field 1
}

impl Message for CacheRequest {
    fn encode_raw(&self, buf: &mut impl prost::bytes::BufMut)
    where
        Self: Sized,
    {
        if let Some(ref header) = self.header {
            prost::encoding::message::encode(1, header, buf);
        }
    }

    fn merge_field(
        &mut self,
        tag: u32,
        wire_type: prost::encoding::WireType,
        buf: &mut impl prost::bytes::Buf,
        ctx: prost::encoding::DecodeContext,
    ) -> Result<(), DecodeError>
    where
        Self: Sized,
    {
        match tag {
            1 => {
                let mut header = self.header.take().unwrap_or_default();
                prost::encoding::message::merge(wire_type, &mut header, buf, ctx)?;
                self.header = Some(header);
                Ok(())
            }
            _ => prost::encoding::skip_field(wire_type, tag, buf, ctx),
        }
    }

    fn encoded_len(&self) -> usize {
        self.header
            .as_ref()
            .map_or(0, |h| prost::encoding::message::encoded_len(1, h))
    }

    fn clear(&mut self) {
        *self = Self::default();
    }
}

// ============================================================================
// KeyRequest
// ============================================================================

/// Single-key request: get, remove, containsKey.
#[derive(Clone, Default, Debug)]
pub struct KeyRequest {
    pub header: Option<CacheRequestHeader>, // field 1
    pub key: Bytes,                         // field 2
}

impl Message for KeyRequest {
    fn encode_raw(&self, buf: &mut impl prost::bytes::BufMut)
    where
        Self: Sized,
    {
        if let Some(ref header) = self.header {
            prost::encoding::message::encode(1, header, buf);
        }
        if !self.key.is_empty() {
            prost::encoding::bytes::encode(2, &self.key, buf);
        }
    }

    fn merge_field(
        &mut self,
        tag: u32,
        wire_type: prost::encoding::WireType,
        buf: &mut impl prost::bytes::Buf,
        ctx: prost::encoding::DecodeContext,
    ) -> Result<(), DecodeError>
    where
        Self: Sized,
    {
        match tag {
            1 => {
                let mut header = self.header.take().unwrap_or_default();
                prost::encoding::message::merge(wire_type, &mut header, buf, ctx)?;
                self.header = Some(header);
                Ok(())
            }
            2 => prost::encoding::bytes::merge(wire_type, &mut self.key, buf, ctx),
            _ => prost::encoding::skip_field(wire_type, tag, buf, ctx),
        }
    }

    fn encoded_len(&self) -> usize {
        let mut len = 0;
        if let Some(ref header) = self.header {
            len += prost::encoding::message::encoded_len(1, header);
        }
        if !self.key.is_empty() {
            len += prost::encoding::bytes::encoded_len(2, &self.key);
        }
        len
    }

    fn clear(&mut self) {
        *self = Self::default();
    }
}

// ============================================================================
// KeysRequest
// ============================================================================

/// Bulk-key request: getAll.
#[derive(Clone, Default, Debug)]
pub struct KeysRequest {
    pub header: Option<CacheRequestHeader>, // field 1
    pub keys: Vec<Bytes>,                   // field 2
}

impl Message for KeysRequest {
    fn encode_raw(&self, buf: &mut impl prost::bytes::BufMut)
    where
        Self: Sized,
    {
        if let Some(ref header) = self.header {
            prost::encoding::message::encode(1, header, buf);
        }
        prost::encoding::bytes::encode_repeated(2, &self.keys, buf);
    }

    fn merge_field(
        &mut self,
        tag: u32,
        wire_type: prost::encoding::WireType,
        buf: &mut impl prost::bytes::Buf,
        ctx: prost::encoding::DecodeContext,
    ) -> Result<(), DecodeError>
    where
        Self: Sized,
    {
        match tag {
            1 => {
                let mut header = self.header.take().unwrap_or_default();
                prost::encoding::message::merge(wire_type, &mut header, buf, ctx)?;
                self.header = Some(header);
                Ok(())
            }
            2 => prost::encoding::bytes::merge_repeated(wire_type, &mut self.keys, buf, ctx),
            _ => prost::encoding::skip_field(wire_type, tag, buf, ctx),
        }
    }

    fn encoded_len(&self) -> usize {
        let mut len = 0;
        if let Some(ref header) = self.header {
            len += prost::encoding::message::encoded_len(1, header);
        }
        len += prost::encoding::bytes::encoded_len_repeated(2, &self.keys);
        len
    }

    fn clear(&mut self) {
        *self = Self::default();
    }
}

// ============================================================================
// EntryRequest
// ============================================================================

/// Key-and-value request: put, replace, containsEntry.
#[derive(Clone, Default, Debug)]
pub struct EntryRequest {
    pub header: Option<CacheRequestHeader>, // field 1
    pub key: Bytes,                         // field 2
    pub value: Bytes,                       // field 3
}

impl Message for EntryRequest {
    fn encode_raw(&self, buf: &mut impl prost::bytes::BufMut)
    where
        Self: Sized,
    {
        if let Some(ref header) = self.header {
            prost::encoding::message::encode(1, header, buf);
        }
        if !self.key.is_empty() {
            prost::encoding::bytes::encode(2, &self.key, buf);
        }
        if !self.value.is_empty() {
            prost::encoding::bytes::encode(3, &self.value, buf);
        }
    }

    fn merge_field(
        &mut self,
        tag: u32,
        wire_type: prost::encoding::WireType,
        buf: &mut impl prost::bytes::Buf,
        ctx: prost::encoding::DecodeContext,
    ) -> Result<(), DecodeError>
    where
        Self: Sized,
    {
        match tag {
            1 => {
                let mut header = self.header.take().unwrap_or_default();
                prost::encoding::message::merge(wire_type, &mut header, buf, ctx)?;
                self.header = Some(header);
                Ok(())
            }
            2 => prost::encoding::bytes::merge(wire_type, &mut self.key, buf, ctx),
            3 => prost::encoding::bytes::merge(wire_type, &mut self.value, buf, ctx),
            _ => prost::encoding::skip_field(wire_type, tag, buf, ctx),
        }
    }

    fn encoded_len(&self) -> usize {
        let mut len = 0;
        if let Some(ref header) = self.header {
            len += prost::encoding::message::encoded_len(1, header);
        }
        if !self.key.is_empty() {
            len += prost::encoding::bytes::encoded_len(2, &self.key);
        }
        if !self.value.is_empty() {
            len += prost::encoding::bytes::encoded_len(3, &self.value);
        }
        len
    }

    fn clear(&mut self) {
        *self = Self::default();
    }
}

// ============================================================================
// Entry
// ============================================================================

/// A serialized cache entry.
#[derive(Clone, Default, Debug, PartialEq)]
pub struct Entry {
    pub key: Bytes,   // field 1
    pub value: Bytes, // field 2
}

impl Message for Entry {
    fn encode_raw(&self, buf: &mut impl prost::bytes::BufMut)
    where
        Self: Sized,
    {
        if !self.key.is_empty() {
            prost::encoding::bytes::encode(1, &self.key, buf);
        }
        if !self.value.is_empty() {
            prost::encoding::bytes::encode(2, &self.value, buf);
        }
    }

    fn merge_field(
        &mut self,
        tag: u32,
        wire_type: prost::encoding::WireType,
        buf: &mut impl prost::bytes::Buf,
        ctx: prost::encoding::DecodeContext,
    ) -> Result<(), DecodeError>
    where
        Self: Sized,
    {
        match tag {
            1 => prost::encoding::bytes::merge(wire_type, &mut self.key, buf, ctx),
            2 => prost::encoding::bytes::merge(wire_type, &mut self.value, buf, ctx),
            _ => prost::encoding::skip_field(wire_type, tag, buf, ctx),
        }
    }

    fn encoded_len(&self) -> usize {
        let mut len = 0;
        if !self.key.is_empty() {
            len += prost::encoding::bytes::encoded_len(1, &self.key);
        }
        if !self.value.is_empty() {
            len += prost::encoding::bytes::encoded_len(2, &self.value);
        }
        len
    }

    fn clear(&mut self) {
        *self = Self::default();
    }
}

// ============================================================================
// EntriesRequest
// ============================================================================

/// Bulk-entry request: putAll.
#[derive(Clone, Default, Debug)]
pub struct EntriesRequest {
    pub header: Option<CacheRequestHeader>, // field 1
    pub entries: Vec<Entry>,                // field 2
}

impl Message for EntriesRequest {
    fn encode_raw(&self, buf: &mut impl prost::bytes::BufMut)
    where
        Self: Sized,
    {
        if let Some(ref header) = self.header {
            prost::encoding::message::encode(1, header, buf);
        }
        for entry in &self.entries {
            prost::encoding::message::encode(2, entry, buf);
        }
    }

    fn merge_field(
        &mut self,
        tag: u32,
        wire_type: prost::encoding::WireType,
        buf: &mut impl prost::bytes::Buf,
        ctx: prost::encoding::DecodeContext,
    ) -> Result<(), DecodeError>
    where
        Self: Sized,
    {
        match tag {
            1 => {
                let mut header = self.header.take().unwrap_or_default();
                prost::encoding::message::merge(wire_type, &mut header, buf, ctx)?;
                self.header = Some(header);
                Ok(())
            }
            2 => {
                let mut entry = Entry::default();
                prost::encoding::message::merge(wire_type, &mut entry, buf, ctx)?;
                self.entries.push(entry);
                Ok(())
            }
            _ => prost::encoding::skip_field(wire_type, tag, buf, ctx),
        }
    }

    fn encoded_len(&self) -> usize {
        let mut len = 0;
        if let Some(ref header) = self.header {
            len += prost::encoding::message::encoded_len(1, header);
        }
        for entry in &self.entries {
            len += prost::encoding::message::encoded_len(2, entry);
        }
        len
    }

    fn clear(&mut self) {
        *self = Self::default();
    }
}

// ============================================================================
// ValueRequest
// ============================================================================

/// Value-only request: containsValue.
#[derive(Clone, Default, Debug)]
pub struct ValueRequest {
    pub header: Option<CacheRequestHeader>, // field 1
    pub value: Bytes,                       // field 2
}

impl Message for ValueRequest {
    fn encode_raw(&self, buf: &mut impl prost::bytes::BufMut)
    where
        Self: Sized,
    {
        if let Some(ref header) = self.header {
            prost::encoding::message::encode(1, header, buf);
        }
        if !self.value.is_empty() {
            prost::encoding::bytes::encode(2, &self.value, buf);
        }
    }

    fn merge_field(
        &mut self,
        tag: u32,
        wire_type: prost::encoding::WireType,
        buf: &mut impl prost::bytes::Buf,
        ctx: prost::encoding::DecodeContext,
    ) -> Result<(), DecodeError>
    where
        Self: Sized,
    {
        match tag {
            1 => {
                let mut header = self.header.take().unwrap_or_default();
                prost::encoding::message::merge(wire_type, &mut header, buf, ctx)?;
                self.header = Some(header);
                Ok(())
            }
            2 => prost::encoding::bytes::merge(wire_type, &mut self.value, buf, ctx),
            _ => prost::encoding::skip_field(wire_type, tag, buf, ctx),
        }
    }

    fn encoded_len(&self) -> usize {
        let mut len = 0;
        if let Some(ref header) = self.header {
            len += prost::encoding::message::encoded_len(1, header);
        }
        if !self.value.is_empty() {
            len += prost::encoding::bytes::encoded_len(2, &self.value);
        }
        len
    }

    fn clear(&mut self) {
        *self = Self::default();
    }
}

// ============================================================================
// IndexRequest
// ============================================================================

/// Index maintenance request: addIndex, removeIndex (which ignores
/// `sorted`).
#[derive(Clone, Default, Debug)]
pub struct IndexRequest {
    pub header: Option<CacheRequestHeader>, // field 1
    pub extractor: Bytes,                   // field 2
    pub sorted: bool,                       // field 3
}

impl Message for IndexRequest {
    fn encode_raw(&self, buf: &mut impl prost::bytes::BufMut)
    where
        Self: Sized,
    {
        if let Some(ref header) = self.header {
            prost::encoding::message::encode(1, header, buf);
        }
        if !self.extractor.is_empty() {
            prost::encoding::bytes::encode(2, &self.extractor, buf);
        }
        if self.sorted {
            prost::encoding::bool::encode(3, &self.sorted, buf);
        }
    }

    fn merge_field(
        &mut self,
        tag: u32,
        wire_type: prost::encoding::WireType,
        buf: &mut impl prost::bytes::Buf,
        ctx: prost::encoding::DecodeContext,
    ) -> Result<(), DecodeError>
    where
        Self: Sized,
    {
        match tag {
            1 => {
                let mut header = self.header.take().unwrap_or_default();
                prost::encoding::message::merge(wire_type, &mut header, buf, ctx)?;
                self.header = Some(header);
                Ok(())
            }
            2 => prost::encoding::bytes::merge(wire_type, &mut self.extractor, buf, ctx),
            3 => prost::encoding::bool::merge(wire_type, &mut self.sorted, buf, ctx),
            _ => prost::encoding::skip_field(wire_type, tag, buf, ctx),
        }
    }

    fn encoded_len(&self) -> usize {
        let mut len = 0;
        if let Some(ref header) = self.header {
            len += prost::encoding::message::encoded_len(1, header);
        }
        if !self.extractor.is_empty() {
            len += prost::encoding::bytes::encoded_len(2, &self.extractor);
        }
        if self.sorted {
            len += prost::encoding::bool::encoded_len(3, &self.sorted);
        }
        len
    }

    fn clear(&mut self) {
        *self = Self::default();
    }
}

// ============================================================================
// InvokeRequest
// ============================================================================

/// Entry processor invocation: invoke (key set), invokeAll (keys or
/// filter).
#[derive(Clone, Default, Debug)]
pub struct InvokeRequest {
    pub header: Option<CacheRequestHeader>, // field 1
    pub keys: Vec<Bytes>,                   // field 2
    pub filter: Bytes,                      // field 3
    pub processor: Bytes,                   // field 4
}

impl Message for InvokeRequest {
    fn encode_raw(&self, buf: &mut impl prost::bytes::BufMut)
    where
        Self: Sized,
    {
        if let Some(ref header) = self.header {
            prost::encoding::message::encode(1, header, buf);
        }
        prost::encoding::bytes::encode_repeated(2, &self.keys, buf);
        if !self.filter.is_empty() {
            prost::encoding::bytes::encode(3, &self.filter, buf);
        }
        if !self.processor.is_empty() {
            prost::encoding::bytes::encode(4, &self.processor, buf);
        }
    }

    fn merge_field(
        &mut self,
        tag: u32,
        wire_type: prost::encoding::WireType,
        buf: &mut impl prost::bytes::Buf,
        ctx: prost::encoding::DecodeContext,
    ) -> Result<(), DecodeError>
    where
        Self: Sized,
    {
        match tag {
            1 => {
                let mut header = self.header.take().unwrap_or_default();
                prost::encoding::message::merge(wire_type, &mut header, buf, ctx)?;
                self.header = Some(header);
                Ok(())
            }
            2 => prost::encoding::bytes::merge_repeated(wire_type, &mut self.keys, buf, ctx),
            3 => prost::encoding::bytes::merge(wire_type, &mut self.filter, buf, ctx),
            4 => prost::encoding::bytes::merge(wire_type, &mut self.processor, buf, ctx),
            _ => prost::encoding::skip_field(wire_type, tag, buf, ctx),
        }
    }

    fn encoded_len(&self) -> usize {
        let mut len = 0;
        if let Some(ref header) = self.header {
            len += prost::encoding::message::encoded_len(1, header);
        }
        len += prost::encoding::bytes::encoded_len_repeated(2, &self.keys);
        if !self.filter.is_empty() {
            len += prost::encoding::bytes::encoded_len(3, &self.filter);
        }
        if !self.processor.is_empty() {
            len += prost::encoding::bytes::encoded_len(4, &self.processor);
        }
        len
    }

    fn clear(&mut self) {
        *self = Self::default();
    }
}

// ============================================================================
// AggregateRequest
// ============================================================================

/// Aggregator invocation over keys or a filter.
#[derive(Clone, Default, Debug)]
pub struct AggregateRequest {
    pub header: Option<CacheRequestHeader>, // field 1
    pub keys: Vec<Bytes>,                   // field 2
    pub filter: Bytes,                      // field 3
    pub aggregator: Bytes,                  // field 4
}

impl Message for AggregateRequest {
    fn encode_raw(&self, buf: &mut impl prost::bytes::BufMut)
    where
        Self: Sized,
    {
        if let Some(ref header) = self.header {
            prost::encoding::message::encode(1, header, buf);
        }
        prost::encoding::bytes::encode_repeated(2, &self.keys, buf);
        if !self.filter.is_empty() {
            prost::encoding::bytes::encode(3, &self.filter, buf);
        }
        if !self.aggregator.is_empty() {
            prost::encoding::bytes::encode(4, &self.aggregator, buf);
        }
    }

    fn merge_field(
        &mut self,
        tag: u32,
        wire_type: prost::encoding::WireType,
        buf: &mut impl prost::bytes::Buf,
        ctx: prost::encoding::DecodeContext,
    ) -> Result<(), DecodeError>
    where
        Self: Sized,
    {
        match tag {
            1 => {
                let mut header = self.header.take().unwrap_or_default();
                prost::encoding::message::merge(wire_type, &mut header, buf, ctx)?;
                self.header = Some(header);
                Ok(())
            }
            2 => prost::encoding::bytes::merge_repeated(wire_type, &mut self.keys, buf, ctx),
            3 => prost::encoding::bytes::merge(wire_type, &mut self.filter, buf, ctx),
            4 => prost::encoding::bytes::merge(wire_type, &mut self.aggregator, buf, ctx),
            _ => prost::encoding::skip_field(wire_type, tag, buf, ctx),
        }
    }

    fn encoded_len(&self) -> usize {
        let mut len = 0;
        if let Some(ref header) = self.header {
            len += prost::encoding::message::encoded_len(1, header);
        }
        len += prost::encoding::bytes::encoded_len_repeated(2, &self.keys);
        if !self.filter.is_empty() {
            len += prost::encoding::bytes::encoded_len(3, &self.filter);
        }
        if !self.aggregator.is_empty() {
            len += prost::encoding::bytes::encoded_len(4, &self.aggregator);
        }
        len
    }

    fn clear(&mut self) {
        *self = Self::default();
    }
}

// ============================================================================
// QueryRequest
// ============================================================================

/// Filtered whole-cache query: keySet, entrySet, values streams.
#[derive(Clone, Default, Debug)]
pub struct QueryRequest {
    pub header: Option<CacheRequestHeader>, // field 1
    pub filter: Bytes,                      // field 2
}

impl Message for QueryRequest {
    fn encode_raw(&self, buf: &mut impl prost::bytes::BufMut)
    where
        Self: Sized,
    {
        if let Some(ref header) = self.header {
            prost::encoding::message::encode(1, header, buf);
        }
        if !self.filter.is_empty() {
            prost::encoding::bytes::encode(2, &self.filter, buf);
        }
    }

    fn merge_field(
        &mut self,
        tag: u32,
        wire_type: prost::encoding::WireType,
        buf: &mut impl prost::bytes::Buf,
        ctx: prost::encoding::DecodeContext,
    ) -> Result<(), DecodeError>
    where
        Self: Sized,
    {
        match tag {
            1 => {
                let mut header = self.header.take().unwrap_or_default();
                prost::encoding::message::merge(wire_type, &mut header, buf, ctx)?;
                self.header = Some(header);
                Ok(())
            }
            2 => prost::encoding::bytes::merge(wire_type, &mut self.filter, buf, ctx),
            _ => prost::encoding::skip_field(wire_type, tag, buf, ctx),
        }
    }

    fn encoded_len(&self) -> usize {
        let mut len = 0;
        if let Some(ref header) = self.header {
            len += prost::encoding::message::encoded_len(1, header);
        }
        if !self.filter.is_empty() {
            len += prost::encoding::bytes::encoded_len(2, &self.filter);
        }
        len
    }

    fn clear(&mut self) {
        *self = Self::default();
    }
}

// ============================================================================
// PageRequest
// ============================================================================

/// Paged scan request: nextKeyPage, nextEntryPage. An empty cookie
/// starts a new scan.
#[derive(Clone, Default, Debug)]
pub struct PageRequest {
    pub header: Option<CacheRequestHeader>, // field 1
    pub cookie: Bytes,                      // field 2
}

impl Message for PageRequest {
    fn encode_raw(&self, buf: &mut impl prost::bytes::BufMut)
    where
        Self: Sized,
    {
        if let Some(ref header) = self.header {
            prost::encoding::message::encode(1, header, buf);
        }
        if !self.cookie.is_empty() {
            prost::encoding::bytes::encode(2, &self.cookie, buf);
        }
    }

    fn merge_field(
        &mut self,
        tag: u32,
        wire_type: prost::encoding::WireType,
        buf: &mut impl prost::bytes::Buf,
        ctx: prost::encoding::DecodeContext,
    ) -> Result<(), DecodeError>
    where
        Self: Sized,
    {
        match tag {
            1 => {
                let mut header = self.header.take().unwrap_or_default();
                prost::encoding::message::merge(wire_type, &mut header, buf, ctx)?;
                self.header = Some(header);
                Ok(())
            }
            2 => prost::encoding::bytes::merge(wire_type, &mut self.cookie, buf, ctx),
            _ => prost::encoding::skip_field(wire_type, tag, buf, ctx),
        }
    }

    fn encoded_len(&self) -> usize {
        let mut len = 0;
        if let Some(ref header) = self.header {
            len += prost::encoding::message::encoded_len(1, header);
        }
        if !self.cookie.is_empty() {
            len += prost::encoding::bytes::encoded_len(2, &self.cookie);
        }
        len
    }

    fn clear(&mut self) {
        *self = Self::default();
    }
}

// ============================================================================
// PageCursor
// ============================================================================

/// The opaque scan cursor a paged query hands back to the client.
///
/// Clients must treat the encoded form as opaque bytes; the proxy
/// validates it against the cache topology on every page.
#[derive(Clone, Default, Debug, PartialEq)]
pub struct PageCursor {
    pub partition_count: u32, // field 1
    pub words: Vec<u64>,      // field 2 (packed)
    pub batch_size: u32,      // field 3
}

impl Message for PageCursor {
    fn encode_raw(&self, buf: &mut impl prost::bytes::BufMut)
    where
        Self: Sized,
    {
        if self.partition_count != 0 {
            prost::encoding::uint32::encode(1, &self.partition_count, buf);
        }
        prost::encoding::uint64::encode_packed(2, &self.words, buf);
        if self.batch_size != 0 {
            prost::encoding::uint32::encode(3, &self.batch_size, buf);
        }
    }

    fn merge_field(
        &mut self,
        tag: u32,
        wire_type: prost::encoding::WireType,
        buf: &mut impl prost::bytes::Buf,
        ctx: prost::encoding::DecodeContext,
    ) -> Result<(), DecodeError>
    where
        Self: Sized,
    {
        match tag {
            1 => prost::encoding::uint32::merge(wire_type, &mut self.partition_count, buf, ctx),
            2 => prost::encoding::uint64::merge_repeated(wire_type, &mut self.words, buf, ctx),
            3 => prost::encoding::uint32::merge(wire_type, &mut self.batch_size, buf, ctx),
            _ => prost::encoding::skip_field(wire_type, tag, buf, ctx),
        }
    }

    fn encoded_len(&self) -> usize {
        let mut len = 0;
        if self.partition_count != 0 {
            len += prost::encoding::uint32::encoded_len(1, &self.partition_count);
        }
        len += prost::encoding::uint64::encoded_len_packed(2, &self.words);
        if self.batch_size != 0 {
            len += prost::encoding::uint32::encoded_len(3, &self.batch_size);
        }
        len
    }

    fn clear(&mut self) {
        *self = Self::default();
    }
}

// ============================================================================
// Scalar responses
// ============================================================================

/// Empty response for operations with no result.
#[derive(Clone, Default, Debug, PartialEq)]
pub struct Empty {}

impl Message for Empty {
    fn encode_raw(&self, _buf: &mut impl prost::bytes::BufMut)
    where
        Self: Sized,
    {
    }

    fn merge_field(
        &mut self,
        tag: u32,
        wire_type: prost::encoding::WireType,
        buf: &mut impl prost::bytes::Buf,
        ctx: prost::encoding::DecodeContext,
    ) -> Result<(), DecodeError>
    where
        Self: Sized,
    {
        prost::encoding::skip_field(wire_type, tag, buf, ctx)
    }

    fn encoded_len(&self) -> usize {
        0
    }

    fn clear(&mut self) {}
}

/// A bare bytes payload. Also carries the scan cookie as the first
/// item of a key-page stream.
#[derive(Clone, Default, Debug, PartialEq)]
pub struct BytesValue {
    pub value: Bytes, // field 1
}

impl Message for BytesValue {
    fn encode_raw(&self, buf: &mut impl prost::bytes::BufMut)
    where
        Self: Sized,
    {
        if !self.value.is_empty() {
            prost::encoding::bytes::encode(1, &self.value, buf);
        }
    }

    fn merge_field(
        &mut self,
        tag: u32,
        wire_type: prost::encoding::WireType,
        buf: &mut impl prost::bytes::Buf,
        ctx: prost::encoding::DecodeContext,
    ) -> Result<(), DecodeError>
    where
        Self: Sized,
    {
        match tag {
            1 => prost::encoding::bytes::merge(wire_type, &mut self.value, buf, ctx),
            _ => prost::encoding::skip_field(wire_type, tag, buf, ctx),
        }
    }

    fn encoded_len(&self) -> usize {
        if self.value.is_empty() {
            0
        } else {
            prost::encoding::bytes::encoded_len(1, &self.value)
        }
    }

    fn clear(&mut self) {
        *self = Self::default();
    }
}

/// A bare boolean payload.
#[derive(Clone, Default, Debug, PartialEq)]
pub struct BoolValue {
    pub value: bool, // field 1
}

impl Message for BoolValue {
    fn encode_raw(&self, buf: &mut impl prost::bytes::BufMut)
    where
        Self: Sized,
    {
        if self.value {
            prost::encoding::bool::encode(1, &self.value, buf);
        }
    }

    fn merge_field(
        &mut self,
        tag: u32,
        wire_type: prost::encoding::WireType,
        buf: &mut impl prost::bytes::Buf,
        ctx: prost::encoding::DecodeContext,
    ) -> Result<(), DecodeError>
    where
        Self: Sized,
    {
        match tag {
            1 => prost::encoding::bool::merge(wire_type, &mut self.value, buf, ctx),
            _ => prost::encoding::skip_field(wire_type, tag, buf, ctx),
        }
    }

    fn encoded_len(&self) -> usize {
        if self.value {
            prost::encoding::bool::encoded_len(1, &self.value)
        } else {
            0
        }
    }

    fn clear(&mut self) {
        *self = Self::default();
    }
}

/// A bare unsigned integer payload (cache sizes).
#[derive(Clone, Default, Debug, PartialEq)]
pub struct UInt64Value {
    pub value: u64, // field 1
}

impl Message for UInt64Value {
    fn encode_raw(&self, buf: &mut impl prost::bytes::BufMut)
    where
        Self: Sized,
    {
        if self.value != 0 {
            prost::encoding::uint64::encode(1, &self.value, buf);
        }
    }

    fn merge_field(
        &mut self,
        tag: u32,
        wire_type: prost::encoding::WireType,
        buf: &mut impl prost::bytes::Buf,
        ctx: prost::encoding::DecodeContext,
    ) -> Result<(), DecodeError>
    where
        Self: Sized,
    {
        match tag {
            1 => prost::encoding::uint64::merge(wire_type, &mut self.value, buf, ctx),
            _ => prost::encoding::skip_field(wire_type, tag, buf, ctx),
        }
    }

    fn encoded_len(&self) -> usize {
        if self.value != 0 {
            prost::encoding::uint64::encoded_len(1, &self.value)
        } else {
            0
        }
    }

    fn clear(&mut self) {
        *self = Self::default();
    }
}

/// A possibly-absent value, distinguishing "mapped to empty bytes"
/// from "not present".
#[derive(Clone, Default, Debug, PartialEq)]
pub struct OptionalValue {
    pub present: bool, // field 1
    pub value: Bytes,  // field 2
}

impl Message for OptionalValue {
    fn encode_raw(&self, buf: &mut impl prost::bytes::BufMut)
    where
        Self: Sized,
    {
        if self.present {
            prost::encoding::bool::encode(1, &self.present, buf);
        }
        if !self.value.is_empty() {
            prost::encoding::bytes::encode(2, &self.value, buf);
        }
    }

    fn merge_field(
        &mut self,
        tag: u32,
        wire_type: prost::encoding::WireType,
        buf: &mut impl prost::bytes::Buf,
        ctx: prost::encoding::DecodeContext,
    ) -> Result<(), DecodeError>
    where
        Self: Sized,
    {
        match tag {
            1 => prost::encoding::bool::merge(wire_type, &mut self.present, buf, ctx),
            2 => prost::encoding::bytes::merge(wire_type, &mut self.value, buf, ctx),
            _ => prost::encoding::skip_field(wire_type, tag, buf, ctx),
        }
    }

    fn encoded_len(&self) -> usize {
        let mut len = 0;
        if self.present {
            len += prost::encoding::bool::encoded_len(1, &self.present);
        }
        if !self.value.is_empty() {
            len += prost::encoding::bytes::encoded_len(2, &self.value);
        }
        len
    }

    fn clear(&mut self) {
        *self = Self::default();
    }
}

// ============================================================================
// EntryResult
// ============================================================================

/// Item of an entry-page stream. The first item of a page carries only
/// the cookie; subsequent items carry key and value.
#[derive(Clone, Default, Debug, PartialEq)]
pub struct EntryResult {
    pub key: Bytes,    // field 1
    pub value: Bytes,  // field 2
    pub cookie: Bytes, // field 3
}

impl Message for EntryResult {
    fn encode_raw(&self, buf: &mut impl prost::bytes::BufMut)
    where
        Self: Sized,
    {
        if !self.key.is_empty() {
            prost::encoding::bytes::encode(1, &self.key, buf);
        }
        if !self.value.is_empty() {
            prost::encoding::bytes::encode(2, &self.value, buf);
        }
        if !self.cookie.is_empty() {
            prost::encoding::bytes::encode(3, &self.cookie, buf);
        }
    }

    fn merge_field(
        &mut self,
        tag: u32,
        wire_type: prost::encoding::WireType,
        buf: &mut impl prost::bytes::Buf,
        ctx: prost::encoding::DecodeContext,
    ) -> Result<(), DecodeError>
    where
        Self: Sized,
    {
        match tag {
            1 => prost::encoding::bytes::merge(wire_type, &mut self.key, buf, ctx),
            2 => prost::encoding::bytes::merge(wire_type, &mut self.value, buf, ctx),
            3 => prost::encoding::bytes::merge(wire_type, &mut self.cookie, buf, ctx),
            _ => prost::encoding::skip_field(wire_type, tag, buf, ctx),
        }
    }

    fn encoded_len(&self) -> usize {
        let mut len = 0;
        if !self.key.is_empty() {
            len += prost::encoding::bytes::encoded_len(1, &self.key);
        }
        if !self.value.is_empty() {
            len += prost::encoding::bytes::encoded_len(2, &self.value);
        }
        if !self.cookie.is_empty() {
            len += prost::encoding::bytes::encoded_len(3, &self.cookie);
        }
        len
    }

    fn clear(&mut self) {
        *self = Self::default();
    }
}

// ============================================================================
// MapListenerRequest
// ============================================================================

/// Subscription request type discriminator.
pub mod listener_request_type {
    /// Stream initialization; must be the first message.
    pub const INIT: i32 = 0;
    /// Key subscription change.
    pub const KEY: i32 = 1;
    /// Filter subscription change.
    pub const FILTER: i32 = 2;
}

/// A message on the inbound half of the events stream.
#[derive(Clone, Default, Debug)]
pub struct MapListenerRequest {
    pub uid: String,        // field 1
    pub scope: String,      // field 2
    pub cache: String,      // field 3
    pub format: String,     // field 4
    pub request_type: i32,  // field 5
    pub filter_id: i64,     // field 6
    pub filter: Bytes,      // field 7
    pub key: Bytes,         // field 8
    pub lite: bool,         // field 9
    pub subscribe: bool,    // field 10
    pub priming: bool,      // field 11
}

impl Message for MapListenerRequest {
    fn encode_raw(&self, buf: &mut impl prost::bytes::BufMut)
    where
        Self: Sized,
    {
        if !self.uid.is_empty() {
            prost::encoding::string::encode(1, &self.uid, buf);
        }
        if !self.scope.is_empty() {
            prost::encoding::string::encode(2, &self.scope, buf);
        }
        if !self.cache.is_empty() {
            prost::encoding::string::encode(3, &self.cache, buf);
        }
        if !self.format.is_empty() {
            prost::encoding::string::encode(4, &self.format, buf);
        }
        if self.request_type != 0 {
            prost::encoding::int32::encode(5, &self.request_type, buf);
        }
        if self.filter_id != 0 {
            prost::encoding::int64::encode(6, &self.filter_id, buf);
        }
        if !self.filter.is_empty() {
            prost::encoding::bytes::encode(7, &self.filter, buf);
        }
        if !self.key.is_empty() {
            prost::encoding::bytes::encode(8, &self.key, buf);
        }
        if self.lite {
            prost::encoding::bool::encode(9, &self.lite, buf);
        }
        if self.subscribe {
            prost::encoding::bool::encode(10, &self.subscribe, buf);
        }
        if self.priming {
            prost::encoding::bool::encode(11, &self.priming, buf);
        }
    }

    fn merge_field(
        &mut self,
        tag: u32,
        wire_type: prost::encoding::WireType,
        buf: &mut impl prost::bytes::Buf,
        ctx: prost::encoding::DecodeContext,
    ) -> Result<(), DecodeError>
    where
        Self: Sized,
    {
        match tag {
            1 => prost::encoding::string::merge(wire_type, &mut self.uid, buf, ctx),
            2 => prost::encoding::string::merge(wire_type, &mut self.scope, buf, ctx),
            3 => prost::encoding::string::merge(wire_type, &mut self.cache, buf, ctx),
            4 => prost::encoding::string::merge(wire_type, &mut self.format, buf, ctx),
            5 => prost::encoding::int32::merge(wire_type, &mut self.request_type, buf, ctx),
            6 => prost::encoding::int64::merge(wire_type, &mut self.filter_id, buf, ctx),
            7 => prost::encoding::bytes::merge(wire_type, &mut self.filter, buf, ctx),
            8 => prost::encoding::bytes::merge(wire_type, &mut self.key, buf, ctx),
            9 => prost::encoding::bool::merge(wire_type, &mut self.lite, buf, ctx),
            10 => prost::encoding::bool::merge(wire_type, &mut self.subscribe, buf, ctx),
            11 => prost::encoding::bool::merge(wire_type, &mut self.priming, buf, ctx),
            _ => prost::encoding::skip_field(wire_type, tag, buf, ctx),
        }
    }

    fn encoded_len(&self) -> usize {
        let mut len = 0;
        if !self.uid.is_empty() {
            len += prost::encoding::string::encoded_len(1, &self.uid);
        }
        if !self.scope.is_empty() {
            len += prost::encoding::string::encoded_len(2, &self.scope);
        }
        if !self.cache.is_empty() {
            len += prost::encoding::string::encoded_len(3, &self.cache);
        }
        if !self.format.is_empty() {
            len += prost::encoding::string::encoded_len(4, &self.format);
        }
        if self.request_type != 0 {
            len += prost::encoding::int32::encoded_len(5, &self.request_type);
        }
        if self.filter_id != 0 {
            len += prost::encoding::int64::encoded_len(6, &self.filter_id);
        }
        if !self.filter.is_empty() {
            len += prost::encoding::bytes::encoded_len(7, &self.filter);
        }
        if !self.key.is_empty() {
            len += prost::encoding::bytes::encoded_len(8, &self.key);
        }
        if self.lite {
            len += prost::encoding::bool::encoded_len(9, &self.lite);
        }
        if self.subscribe {
            len += prost::encoding::bool::encoded_len(10, &self.subscribe);
        }
        if self.priming {
            len += prost::encoding::bool::encoded_len(11, &self.priming);
        }
        len
    }

    fn clear(&mut self) {
        *self = Self::default();
    }
}

// ============================================================================
// MapEventMessage
// ============================================================================

/// A map change event on the outbound half of the events stream.
#[derive(Clone, Default, Debug, PartialEq)]
pub struct MapEventMessage {
    pub id: i32,              // field 1 (1 insert, 2 update, 3 delete)
    pub key: Bytes,           // field 2
    pub new_value: Bytes,     // field 3
    pub old_value: Bytes,     // field 4
    pub filter_ids: Vec<i64>, // field 5 (packed)
    pub synthetic: bool,      // field 6
    pub priming: bool,        // field 7
}

impl Message for MapEventMessage {
    fn encode_raw(&self, buf: &mut impl prost::bytes::BufMut)
    where
        Self: Sized,
    {
        if self.id != 0 {
            prost::encoding::int32::encode(1, &self.id, buf);
        }
        if !self.key.is_empty() {
            prost::encoding::bytes::encode(2, &self.key, buf);
        }
        if !self.new_value.is_empty() {
            prost::encoding::bytes::encode(3, &self.new_value, buf);
        }
        if !self.old_value.is_empty() {
            prost::encoding::bytes::encode(4, &self.old_value, buf);
        }
        prost::encoding::int64::encode_packed(5, &self.filter_ids, buf);
        if self.synthetic {
            prost::encoding::bool::encode(6, &self.synthetic, buf);
        }
        if self.priming {
            prost::encoding::bool::encode(7, &self.priming, buf);
        }
    }

    fn merge_field(
        &mut self,
        tag: u32,
        wire_type: prost::encoding::WireType,
        buf: &mut impl prost::bytes::Buf,
        ctx: prost::encoding::DecodeContext,
    ) -> Result<(), DecodeError>
    where
        Self: Sized,
    {
        match tag {
            1 => prost::encoding::int32::merge(wire_type, &mut self.id, buf, ctx),
            2 => prost::encoding::bytes::merge(wire_type, &mut self.key, buf, ctx),
            3 => prost::encoding::bytes::merge(wire_type, &mut self.new_value, buf, ctx),
            4 => prost::encoding::bytes::merge(wire_type, &mut self.old_value, buf, ctx),
            5 => prost::encoding::int64::merge_repeated(wire_type, &mut self.filter_ids, buf, ctx),
            6 => prost::encoding::bool::merge(wire_type, &mut self.synthetic, buf, ctx),
            7 => prost::encoding::bool::merge(wire_type, &mut self.priming, buf, ctx),
            _ => prost::encoding::skip_field(wire_type, tag, buf, ctx),
        }
    }

    fn encoded_len(&self) -> usize {
        let mut len = 0;
        if self.id != 0 {
            len += prost::encoding::int32::encoded_len(1, &self.id);
        }
        if !self.key.is_empty() {
            len += prost::encoding::bytes::encoded_len(2, &self.key);
        }
        if !self.new_value.is_empty() {
            len += prost::encoding::bytes::encoded_len(3, &self.new_value);
        }
        if !self.old_value.is_empty() {
            len += prost::encoding::bytes::encoded_len(4, &self.old_value);
        }
        len += prost::encoding::int64::encoded_len_packed(5, &self.filter_ids);
        if self.synthetic {
            len += prost::encoding::bool::encoded_len(6, &self.synthetic);
        }
        if self.priming {
            len += prost::encoding::bool::encoded_len(7, &self.priming);
        }
        len
    }

    fn clear(&mut self) {
        *self = Self::default();
    }
}

// ============================================================================
// ListenerError
// ============================================================================

/// In-band failure report for a subscription change. The stream stays
/// open after one of these.
#[derive(Clone, Default, Debug, PartialEq)]
pub struct ListenerError {
    pub uid: String,        // field 1
    pub code: i32,          // field 2 (gRPC status code)
    pub message: String,    // field 3
    pub stack: Vec<String>, // field 4
}

impl Message for ListenerError {
    fn encode_raw(&self, buf: &mut impl prost::bytes::BufMut)
    where
        Self: Sized,
    {
        if !self.uid.is_empty() {
            prost::encoding::string::encode(1, &self.uid, buf);
        }
        if self.code != 0 {
            prost::encoding::int32::encode(2, &self.code, buf);
        }
        if !self.message.is_empty() {
            prost::encoding::string::encode(3, &self.message, buf);
        }
        prost::encoding::string::encode_repeated(4, &self.stack, buf);
    }

    fn merge_field(
        &mut self,
        tag: u32,
        wire_type: prost::encoding::WireType,
        buf: &mut impl prost::bytes::Buf,
        ctx: prost::encoding::DecodeContext,
    ) -> Result<(), DecodeError>
    where
        Self: Sized,
    {
        match tag {
            1 => prost::encoding::string::merge(wire_type, &mut self.uid, buf, ctx),
            2 => prost::encoding::int32::merge(wire_type, &mut self.code, buf, ctx),
            3 => prost::encoding::string::merge(wire_type, &mut self.message, buf, ctx),
            4 => prost::encoding::string::merge_repeated(wire_type, &mut self.stack, buf, ctx),
            _ => prost::encoding::skip_field(wire_type, tag, buf, ctx),
        }
    }

    fn encoded_len(&self) -> usize {
        let mut len = 0;
        if !self.uid.is_empty() {
            len += prost::encoding::string::encoded_len(1, &self.uid);
        }
        if self.code != 0 {
            len += prost::encoding::int32::encoded_len(2, &self.code);
        }
        if !self.message.is_empty() {
            len += prost::encoding::string::encoded_len(3, &self.message);
        }
        len += prost::encoding::string::encoded_len_repeated(4, &self.stack);
        len
    }

    fn clear(&mut self) {
        *self = Self::default();
    }
}

// ============================================================================
// MapListenerResponse
// ============================================================================

/// Body of an events-stream response.
#[derive(Clone, Debug, PartialEq)]
pub enum ListenerResponseBody {
    /// Acknowledges the request with the given uid. field 1
    Subscribed(String),
    /// Acknowledges an unsubscribe with the given uid. field 2
    Unsubscribed(String),
    /// A map change event. field 3
    Event(MapEventMessage),
    /// An in-band failure for the request with the given uid. field 4
    Error(ListenerError),
    /// The named cache was destroyed; the stream completes after this.
    /// field 5
    Destroyed(String),
    /// The named cache was truncated; the stream stays open. field 6
    Truncated(String),
}

/// A message on the outbound half of the events stream.
#[derive(Clone, Default, Debug, PartialEq)]
pub struct MapListenerResponse {
    pub body: Option<ListenerResponseBody>,
}

impl Message for MapListenerResponse {
    fn encode_raw(&self, buf: &mut impl prost::bytes::BufMut)
    where
        Self: Sized,
    {
        match &self.body {
            Some(ListenerResponseBody::Subscribed(uid)) => {
                prost::encoding::string::encode(1, uid, buf);
            }
            Some(ListenerResponseBody::Unsubscribed(uid)) => {
                prost::encoding::string::encode(2, uid, buf);
            }
            Some(ListenerResponseBody::Event(event)) => {
                prost::encoding::message::encode(3, event, buf);
            }
            Some(ListenerResponseBody::Error(error)) => {
                prost::encoding::message::encode(4, error, buf);
            }
            Some(ListenerResponseBody::Destroyed(cache)) => {
                prost::encoding::string::encode(5, cache, buf);
            }
            Some(ListenerResponseBody::Truncated(cache)) => {
                prost::encoding::string::encode(6, cache, buf);
            }
            None => {}
        }
    }

    fn merge_field(
        &mut self,
        tag: u32,
        wire_type: prost::encoding::WireType,
        buf: &mut impl prost::bytes::Buf,
        ctx: prost::encoding::DecodeContext,
    ) -> Result<(), DecodeError>
    where
        Self: Sized,
    {
        match tag {
            1 => {
                let mut uid = String::new();
                prost::encoding::string::merge(wire_type, &mut uid, buf, ctx)?;
                self.body = Some(ListenerResponseBody::Subscribed(uid));
                Ok(())
            }
            2 => {
                let mut uid = String::new();
                prost::encoding::string::merge(wire_type, &mut uid, buf, ctx)?;
                self.body = Some(ListenerResponseBody::Unsubscribed(uid));
                Ok(())
            }
            3 => {
                let mut event = MapEventMessage::default();
                prost::encoding::message::merge(wire_type, &mut event, buf, ctx)?;
                self.body = Some(ListenerResponseBody::Event(event));
                Ok(())
            }
            4 => {
                let mut error = ListenerError::default();
                prost::encoding::message::merge(wire_type, &mut error, buf, ctx)?;
                self.body = Some(ListenerResponseBody::Error(error));
                Ok(())
            }
            5 => {
                let mut cache = String::new();
                prost::encoding::string::merge(wire_type, &mut cache, buf, ctx)?;
                self.body = Some(ListenerResponseBody::Destroyed(cache));
                Ok(())
            }
            6 => {
                let mut cache = String::new();
                prost::encoding::string::merge(wire_type, &mut cache, buf, ctx)?;
                self.body = Some(ListenerResponseBody::Truncated(cache));
                Ok(())
            }
            _ => prost::encoding::skip_field(wire_type, tag, buf, ctx),
        }
    }

    fn encoded_len(&self) -> usize {
        match &self.body {
            Some(ListenerResponseBody::Subscribed(uid)) => {
                prost::encoding::string::encoded_len(1, uid)
            }
            Some(ListenerResponseBody::Unsubscribed(uid)) => {
                prost::encoding::string::encoded_len(2, uid)
            }
            Some(ListenerResponseBody::Event(event)) => {
                prost::encoding::message::encoded_len(3, event)
            }
            Some(ListenerResponseBody::Error(error)) => {
                prost::encoding::message::encoded_len(4, error)
            }
            Some(ListenerResponseBody::Destroyed(cache)) => {
                prost::encoding::string::encoded_len(5, cache)
            }
            Some(ListenerResponseBody::Truncated(cache)) => {
                prost::encoding::string::encoded_len(6, cache)
            }
            None => 0,
        }
    }

    fn clear(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_request_roundtrip() {
        let req = KeyRequest {
            header: Some(CacheRequestHeader {
                scope: String::new(),
                cache: "orders".to_string(),
                format: "json".to_string(),
            }),
            key: Bytes::from_static(b"\"k1\""),
        };

        let encoded = req.encode_to_vec();
        let decoded = KeyRequest::decode(&encoded[..]).unwrap();

        assert_eq!(decoded.header.unwrap().cache, "orders");
        assert_eq!(decoded.key, Bytes::from_static(b"\"k1\""));
    }

    #[test]
    fn test_page_cursor_roundtrip() {
        let cursor = PageCursor {
            partition_count: 257,
            words: vec![u64::MAX, u64::MAX, u64::MAX, u64::MAX, 1],
            batch_size: 16,
        };

        let encoded = cursor.encode_to_vec();
        let decoded = PageCursor::decode(&encoded[..]).unwrap();

        assert_eq!(decoded, cursor);
    }

    #[test]
    fn test_listener_response_variants() {
        let subscribed = MapListenerResponse {
            body: Some(ListenerResponseBody::Subscribed("uid-1".to_string())),
        };
        let encoded = subscribed.encode_to_vec();
        let decoded = MapListenerResponse::decode(&encoded[..]).unwrap();
        assert_eq!(decoded, subscribed);

        let event = MapListenerResponse {
            body: Some(ListenerResponseBody::Event(MapEventMessage {
                id: 2,
                key: Bytes::from_static(b"k"),
                new_value: Bytes::from_static(b"v"),
                filter_ids: vec![7, 9],
                synthetic: true,
                priming: true,
                ..Default::default()
            })),
        };
        let encoded = event.encode_to_vec();
        let decoded = MapListenerResponse::decode(&encoded[..]).unwrap();
        assert_eq!(decoded, event);

        let error = MapListenerResponse {
            body: Some(ListenerResponseBody::Error(ListenerError {
                uid: "uid-2".to_string(),
                code: 9,
                message: "unregistered key".to_string(),
                stack: vec!["frame one".to_string()],
            })),
        };
        let encoded = error.encode_to_vec();
        let decoded = MapListenerResponse::decode(&encoded[..]).unwrap();
        assert_eq!(decoded, error);
    }

    #[test]
    fn test_optional_value_distinguishes_absent() {
        let absent = OptionalValue::default();
        let present_empty = OptionalValue {
            present: true,
            value: Bytes::new(),
        };

        let decoded = OptionalValue::decode(&absent.encode_to_vec()[..]).unwrap();
        assert!(!decoded.present);
        let decoded = OptionalValue::decode(&present_empty.encode_to_vec()[..]).unwrap();
        assert!(decoded.present);
    }
}
