//! Per-batch lookup table over resolved node coordinates.

use log::warn;
use osmweave_core::CoordinatePair;

use super::ResolvedNodes;

/// Table size used for the default node batch limit.
pub const DEFAULT_TABLE_SIZE: usize = 3_145_739;

const EMPTY: i32 = -1;

/// Slot value pointing at overflow bucket `bucket`.
fn chain_ref(bucket: usize) -> Option<i32> {
    i32::try_from(bucket).ok()?.checked_neg()?.checked_sub(2)
}

fn chain_target(slot: i32) -> Option<usize> {
    if slot <= -2 {
        usize::try_from(-(slot + 2)).ok()
    } else {
        None
    }
}

#[derive(Debug, Clone, Copy)]
struct OverflowBucket {
    entry: u32,
    next: i32,
}

/// Maps node ids of one way batch to their resolved coordinates.
///
/// Ids hash by identity into a prime-sized slot table. Collisions chain
/// through a bounded overflow pool; once the pool runs out, hashing is
/// switched off until [`RequestIndex::reset`] and lookups fall back to a
/// binary search over the sorted entries.
#[derive(Debug)]
pub struct RequestIndex {
    entries: ResolvedNodes,
    slots: Vec<i32>,
    overflow: Vec<OverflowBucket>,
    table_size: usize,
    overflow_cap: usize,
    hashing_enabled: bool,
    hashed: bool,
}

/// Smallest prime not below `n`.
#[expect(
    clippy::integer_division_remainder_used,
    reason = "trial division needs the remainder"
)]
fn next_prime(n: usize) -> usize {
    fn is_prime(n: usize) -> bool {
        if n < 2 {
            return false;
        }
        let mut d = 2;
        while d * d <= n {
            if n % d == 0 {
                return false;
            }
            d += 1;
        }
        true
    }
    let mut candidate = n.max(2);
    while !is_prime(candidate) {
        candidate += 1;
    }
    candidate
}

impl RequestIndex {
    /// Size the table for batches of at most `max_nodes` distinct ids.
    #[must_use]
    #[expect(
        clippy::integer_division,
        clippy::integer_division_remainder_used,
        reason = "overflow pool is 40% of the batch limit, rounded down per hundred"
    )]
    pub fn new(max_nodes: usize) -> Self {
        let wanted = max_nodes.saturating_mul(3);
        let table_size = if wanted <= DEFAULT_TABLE_SIZE {
            DEFAULT_TABLE_SIZE
        } else {
            next_prime(wanted)
        };
        Self::with_table_size(table_size, max_nodes / 100 * 40)
    }

    /// Build with an explicit slot count and overflow capacity.
    #[must_use]
    pub fn with_table_size(table_size: usize, overflow_cap: usize) -> Self {
        Self {
            entries: Vec::new(),
            slots: Vec::new(),
            overflow: Vec::new(),
            table_size: table_size.max(1),
            overflow_cap,
            hashing_enabled: true,
            hashed: false,
        }
    }

    /// Whether the current batch is served through the hash table.
    #[must_use]
    pub const fn is_hashed(&self) -> bool {
        self.hashed
    }

    /// Number of resolved entries.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no entry was resolved.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Replace the indexed batch. `entries` must be sorted by id without
    /// duplicates, as returned by the node stores.
    pub fn rebuild(&mut self, entries: ResolvedNodes) {
        self.entries = entries;
        self.hashed = false;
        if self.entries.len() < 2 || !self.hashing_enabled {
            return;
        }
        if self.slots.len() != self.table_size {
            self.slots = vec![EMPTY; self.table_size];
        } else {
            self.slots.fill(EMPTY);
        }
        self.overflow.clear();
        if self.populate() {
            self.hashed = true;
        } else {
            warn!("too many node id collisions, disabling hashed lookups");
            self.hashing_enabled = false;
        }
    }

    #[expect(
        clippy::integer_division_remainder_used,
        reason = "identity hash reduced modulo the prime table size"
    )]
    fn slot_of(&self, id: i64) -> usize {
        // Identity hash; negative ids wrap like an unsigned cast.
        let reduced = id.cast_unsigned() % self.table_size as u64;
        usize::try_from(reduced).unwrap_or(0)
    }

    fn populate(&mut self) -> bool {
        for position in 0..self.entries.len() {
            let Some(&(id, _)) = self.entries.get(position) else {
                return false;
            };
            let (Ok(entry), Ok(marker)) = (u32::try_from(position), i32::try_from(position)) else {
                return false;
            };
            let slot = self.slot_of(id);
            let Some(current) = self.slots.get(slot).copied() else {
                return false;
            };
            if current == EMPTY {
                if let Some(cell) = self.slots.get_mut(slot) {
                    *cell = marker;
                }
                continue;
            }
            let Some(head) = chain_target(current).or_else(|| self.open_chain(slot, current))
            else {
                return false;
            };
            if self.overflow.len() >= self.overflow_cap {
                return false;
            }
            let mut tail = head;
            while let Some(next) = self.overflow.get(tail).and_then(|b| chain_target_index(b.next)) {
                tail = next;
            }
            let Ok(added) = i32::try_from(self.overflow.len()) else {
                return false;
            };
            self.overflow.push(OverflowBucket { entry, next: EMPTY });
            if let Some(bucket) = self.overflow.get_mut(tail) {
                bucket.next = added;
            }
        }
        true
    }

    /// Move the single entry held by `slot` into a fresh overflow chain.
    fn open_chain(&mut self, slot: usize, current: i32) -> Option<usize> {
        if self.overflow.len() >= self.overflow_cap {
            return None;
        }
        let bucket = self.overflow.len();
        let marker = chain_ref(bucket)?;
        self.overflow.push(OverflowBucket {
            entry: u32::try_from(current).ok()?,
            next: EMPTY,
        });
        *self.slots.get_mut(slot)? = marker;
        Some(bucket)
    }

    /// Locate `id`, trying `previous + 1` first when a hint is given.
    #[must_use]
    pub fn find(&self, id: i64, previous: Option<usize>) -> Option<usize> {
        if let Some(next) = previous.map(|p| p + 1)
            && self.entries.get(next).is_some_and(|&(candidate, _)| candidate == id)
        {
            return Some(next);
        }
        if self.hashed {
            return self.find_hashed(id);
        }
        self.entries.binary_search_by_key(&id, |&(key, _)| key).ok()
    }

    fn find_hashed(&self, id: i64) -> Option<usize> {
        let slot = *self.slots.get(self.slot_of(id))?;
        if slot == EMPTY {
            return None;
        }
        if let Some(mut bucket) = chain_target(slot) {
            loop {
                let link = self.overflow.get(bucket)?;
                let entry = usize::try_from(link.entry).ok()?;
                if self.entries.get(entry).is_some_and(|&(key, _)| key == id) {
                    return Some(entry);
                }
                bucket = chain_target_index(link.next)?;
            }
        }
        let entry = usize::try_from(slot).ok()?;
        self.entries
            .get(entry)
            .is_some_and(|&(key, _)| key == id)
            .then_some(entry)
    }

    /// Coordinates stored at `position`.
    #[must_use]
    pub fn coord_at(&self, position: usize) -> Option<CoordinatePair> {
        self.entries.get(position).map(|&(_, coord)| coord)
    }

    /// Convenience lookup without a hint.
    #[must_use]
    pub fn get(&self, id: i64) -> Option<CoordinatePair> {
        self.find(id, None).and_then(|position| self.coord_at(position))
    }

    /// Forget the batch and re-enable hashing.
    pub fn reset(&mut self) {
        self.entries.clear();
        self.overflow.clear();
        self.slots = Vec::new();
        self.hashing_enabled = true;
        self.hashed = false;
    }
}

/// Overflow `next` links are plain bucket indices, `EMPTY` ends a chain.
fn chain_target_index(next: i32) -> Option<usize> {
    usize::try_from(next).ok()
}
