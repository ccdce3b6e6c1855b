//! Paged partition scanner.
//!
//! Whole-cache scans over a partitioned cache are broken into pages so
//! no single response has to materialize the full key or entry set.
//! The scan state lives entirely in an opaque cookie the client hands
//! back with each page request, so the proxy keeps nothing between
//! pages and any proxy instance can serve any page.
//!
//! The first page of a scan calibrates the batch size: one partition
//! is probed, its result weight is measured, and the number of
//! partitions per page is sized so a page stays near the transfer
//! threshold. The chosen batch is recorded in the cookie and reused
//! for the rest of the scan.

use crate::core::error::{GateError, GateResult};
use crate::fabric::{NamedCache, PartitionSet};
use crate::proxy::proto::PageCursor;
use bytes::Bytes;
use prost::Message;
use tracing::debug;

/// One page of a key scan.
#[derive(Debug)]
pub struct KeyPage {
    /// Cookie for the next page. Empty once the scan is complete.
    pub cookie: Bytes,
    pub keys: Vec<Bytes>,
}

/// One page of an entry scan.
#[derive(Debug)]
pub struct EntryPage {
    /// Cookie for the next page. Empty once the scan is complete.
    pub cookie: Bytes,
    pub entries: Vec<(Bytes, Bytes)>,
}

/// Stateless scanner over the partitions of a cache.
#[derive(Debug, Clone, Copy)]
pub struct PagedScanner {
    transfer_threshold: u64,
}

impl PagedScanner {
    pub fn new(transfer_threshold: u64) -> Self {
        Self { transfer_threshold }
    }

    /// Produce the next page of keys for the scan described by
    /// `cookie`. An empty cookie starts a new scan.
    pub fn key_page(&self, cache: &dyn NamedCache, cookie: &[u8]) -> GateResult<KeyPage> {
        let (cookie, keys) = self.page(
            cache,
            cookie,
            |cache, partitions| cache.keys_in_partitions(partitions),
            |key| key.len() as u64,
        )?;
        Ok(KeyPage { cookie, keys })
    }

    /// Produce the next page of entries for the scan described by
    /// `cookie`. An empty cookie starts a new scan.
    pub fn entry_page(&self, cache: &dyn NamedCache, cookie: &[u8]) -> GateResult<EntryPage> {
        let (cookie, entries) = self.page(
            cache,
            cookie,
            |cache, partitions| cache.entries_in_partitions(partitions),
            |(key, value)| (key.len() + value.len()) as u64,
        )?;
        Ok(EntryPage { cookie, entries })
    }

    fn page<I>(
        &self,
        cache: &dyn NamedCache,
        cookie: &[u8],
        fetch: impl Fn(&dyn NamedCache, &PartitionSet) -> GateResult<Vec<I>>,
        weigh: impl Fn(&I) -> u64,
    ) -> GateResult<(Bytes, Vec<I>)> {
        let partition_count = cache.partition_count();
        if partition_count == 0 {
            return Err(GateError::precondition(format!(
                "cache {:?} is not partitioned; paged scans need a partitioned cache",
                cache.name()
            )));
        }

        let (mut remaining, mut batch) = parse_cookie(cookie, partition_count)?;
        if remaining.is_empty() {
            return Ok((Bytes::new(), Vec::new()));
        }

        let mut rng = rand::thread_rng();
        let mut items = Vec::new();

        if batch == 0 {
            // Calibration probe: one partition, weighed to size the
            // batch for the rest of the scan.
            let probe = select_batch(cache, &remaining, 1, &mut rng);
            for p in probe.iter() {
                remaining.remove(p);
            }
            let probed = fetch(cache, &probe)?;
            let sample: u64 = probed.iter().map(&weigh).sum();
            batch = if sample == 0 {
                partition_count
            } else {
                (self.transfer_threshold / sample).clamp(1, partition_count as u64) as u32
            };
            debug!(
                cache = cache.name(),
                sample, batch, "calibrated scan batch size"
            );
            items.extend(probed);

            if batch > 1 && !remaining.is_empty() {
                let rest = select_batch(cache, &remaining, batch - 1, &mut rng);
                for p in rest.iter() {
                    remaining.remove(p);
                }
                items.extend(fetch(cache, &rest)?);
            }
        } else {
            let selected = select_batch(cache, &remaining, batch, &mut rng);
            for p in selected.iter() {
                remaining.remove(p);
            }
            items.extend(fetch(cache, &selected)?);
        }

        let cookie = if remaining.is_empty() {
            Bytes::new()
        } else {
            let cursor = PageCursor {
                partition_count,
                words: remaining.words().to_vec(),
                batch_size: batch,
            };
            Bytes::from(cursor.encode_to_vec())
        };
        Ok((cookie, items))
    }
}

/// Decode a scan cookie against the cache topology.
///
/// Returns the partitions still to visit and the recorded batch size
/// (zero when the scan has not been calibrated yet).
fn parse_cookie(cookie: &[u8], partition_count: u32) -> GateResult<(PartitionSet, u32)> {
    if cookie.is_empty() {
        return Ok((PartitionSet::full(partition_count), 0));
    }
    let cursor = PageCursor::decode(cookie)
        .map_err(|e| GateError::invalid_cookie(format!("malformed page cookie: {e}")))?;
    if cursor.partition_count != partition_count {
        return Err(GateError::invalid_cookie(format!(
            "page cookie is for a {}-partition topology, cache has {}",
            cursor.partition_count, partition_count
        )));
    }
    let remaining = PartitionSet::from_words(partition_count, cursor.words)?;
    Ok((remaining, cursor.batch_size))
}

/// Pick up to `limit` partitions to query together.
///
/// Batches are built owner group by owner group: a random remaining
/// partition seeds each round and every remaining partition with the
/// same owner joins the batch, repeating until the batch is full. One
/// page therefore tends to hit few fabric members. When ownership of a
/// picked partition is unknown (topology in flux) the rest of the
/// batch is filled with arbitrary remaining partitions.
fn select_batch(
    cache: &dyn NamedCache,
    remaining: &PartitionSet,
    limit: u32,
    rng: &mut impl rand::Rng,
) -> PartitionSet {
    let mut pool = remaining.clone();
    let mut selected = PartitionSet::empty(remaining.universe());
    let mut picked = 0;

    while picked < limit {
        let seed = match pool.random(rng) {
            Some(p) => p,
            None => break,
        };
        pool.remove(seed);
        selected.insert(seed);
        picked += 1;

        match cache.owner_of(seed) {
            Some(owner) => {
                for p in pool.iter().collect::<Vec<_>>() {
                    if picked >= limit {
                        break;
                    }
                    if cache.owner_of(p) == Some(owner) {
                        pool.remove(p);
                        selected.insert(p);
                        picked += 1;
                    }
                }
            }
            None => {
                for p in pool.iter().collect::<Vec<_>>() {
                    if picked >= limit {
                        break;
                    }
                    pool.remove(p);
                    selected.insert(p);
                    picked += 1;
                }
                break;
            }
        }
    }
    selected
}
