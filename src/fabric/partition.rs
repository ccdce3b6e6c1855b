//! Partition bitset.
//!
//! A compact set of partition ids for a partitioned cache service. The
//! paged scanner carries one of these inside its cursor to track which
//! partitions a scan still has to visit.

use crate::core::error::{GateError, GateResult};

/// A fixed-universe set of partition ids backed by 64-bit words.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionSet {
    count: u32,
    words: Vec<u64>,
}

impl PartitionSet {
    /// Create an empty set over `count` partitions.
    pub fn empty(count: u32) -> Self {
        Self {
            count,
            words: vec![0u64; Self::word_len(count)],
        }
    }

    /// Create a set containing every partition in `{0..count-1}`.
    pub fn full(count: u32) -> Self {
        let mut set = Self::empty(count);
        for word in set.words.iter_mut() {
            *word = u64::MAX;
        }
        set.mask_tail();
        set
    }

    /// Reconstruct a set from its word representation.
    ///
    /// Fails if a bit beyond the partition universe is set, which means
    /// the words did not come from a set over the same topology.
    pub fn from_words(count: u32, words: Vec<u64>) -> GateResult<Self> {
        if words.len() != Self::word_len(count) {
            return Err(GateError::invalid_cookie(format!(
                "partition bitset has {} words, expected {} for {} partitions",
                words.len(),
                Self::word_len(count),
                count
            )));
        }
        let set = Self { count, words };
        let mut masked = set.clone();
        masked.mask_tail();
        if masked != set {
            return Err(GateError::invalid_cookie(
                "partition bitset has bits outside the partition universe",
            ));
        }
        Ok(set)
    }

    fn word_len(count: u32) -> usize {
        ((count as usize) + 63) / 64
    }

    fn mask_tail(&mut self) {
        let tail = (self.count % 64) as u64;
        if tail != 0 {
            if let Some(last) = self.words.last_mut() {
                *last &= (1u64 << tail) - 1;
            }
        }
    }

    /// Total number of partitions in the universe.
    pub fn universe(&self) -> u32 {
        self.count
    }

    /// Number of partitions in the set.
    pub fn cardinality(&self) -> u32 {
        self.words.iter().map(|w| w.count_ones()).sum()
    }

    /// Whether the set is empty.
    pub fn is_empty(&self) -> bool {
        self.words.iter().all(|w| *w == 0)
    }

    /// Whether the set contains `partition`.
    pub fn contains(&self, partition: u32) -> bool {
        if partition >= self.count {
            return false;
        }
        self.words[(partition / 64) as usize] & (1u64 << (partition % 64)) != 0
    }

    /// Add a partition. Returns false if it was already present.
    pub fn insert(&mut self, partition: u32) -> bool {
        debug_assert!(partition < self.count);
        let word = &mut self.words[(partition / 64) as usize];
        let bit = 1u64 << (partition % 64);
        let added = *word & bit == 0;
        *word |= bit;
        added
    }

    /// Remove a partition. Returns false if it was not present.
    pub fn remove(&mut self, partition: u32) -> bool {
        if partition >= self.count {
            return false;
        }
        let word = &mut self.words[(partition / 64) as usize];
        let bit = 1u64 << (partition % 64);
        let removed = *word & bit != 0;
        *word &= !bit;
        removed
    }

    /// Iterate over partitions in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = u32> + '_ {
        let count = self.count;
        (0..count).filter(move |p| self.contains(*p))
    }

    /// The `n`-th set partition in ascending order, if any.
    pub fn nth(&self, n: u32) -> Option<u32> {
        self.iter().nth(n as usize)
    }

    /// A uniformly random member of the set, if any.
    pub fn random(&self, rng: &mut impl rand::Rng) -> Option<u32> {
        let cardinality = self.cardinality();
        if cardinality == 0 {
            return None;
        }
        self.nth(rng.gen_range(0..cardinality))
    }

    /// The raw word representation.
    pub fn words(&self) -> &[u64] {
        &self.words
    }
}
