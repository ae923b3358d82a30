//! Node coordinate index.
//!
//! Nodes are absorbed with [`NodeStore::put`] during a pass and later
//! resolved in bulk with [`NodeStore::lookup_many`]. Two backends implement
//! the contract:
//!
//! - [`PagedNodeStore`] buckets ids into fixed-size sectors and appends them
//!   to a [`SpillFile`], which requires strictly increasing ids.
//! - [`KeyedNodeStore`] keeps one row per node in the scratch database and
//!   accepts ids in any order.
//!
//! Both start in memory and migrate to disk through
//! [`NodeStore::migrate_to_disk`] when the driver decides the memory budget
//! is exhausted. [`RequestIndex`] then answers per-reference lookups over
//! the resolved batch.

use osmweave_core::CoordinatePair;
use thiserror::Error;

use crate::scratch::ScratchError;

mod keyed;
mod paged;
mod request;
mod spill;

pub use keyed::KeyedNodeStore;
pub use paged::{BUCKET_SIZE, PagedNodeStore, SECTOR_SIZE};
pub use request::RequestIndex;
pub use spill::SpillFile;

/// Errors raised by the coordinate index.
#[derive(Debug, Error)]
pub enum IndexError {
    /// Appending to the backing store failed.
    #[error("failed to write node coordinates to the backing store")]
    StorageWriteFailed {
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// Reading from the backing store failed.
    #[error("failed to read node coordinates at offset {offset}")]
    StorageReadFailed {
        /// Offset of the failed read.
        offset: u64,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// A stored sector could not be decoded.
    #[error("corrupt coordinate sector at offset {offset}")]
    CorruptSector {
        /// Offset of the sector.
        offset: u64,
    },
    /// Ids arrived out of order for the paged backend.
    #[error(
        "node id {id} is not greater than previous id {previous}; \
         disable custom indexing to use the keyed fallback for unsorted input"
    )]
    NonMonotonicId {
        /// Offending id.
        id: i64,
        /// Previously stored id.
        previous: i64,
    },
    /// Negative ids cannot be bucketed.
    #[error(
        "node id {id} is negative; disable custom indexing to use the keyed \
         fallback for such input"
    )]
    NegativeId {
        /// Offending id.
        id: i64,
    },
    /// The keyed backend's scratch database failed.
    #[error(transparent)]
    Scratch(#[from] ScratchError),
}

/// Which backend an index is using.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexBackend {
    /// Paged custom store.
    Paged,
    /// Keyed scratch-database store.
    Keyed,
}

/// Coordinates resolved for a batch, sorted by id without duplicates.
pub type ResolvedNodes = Vec<(i64, CoordinatePair)>;

/// Contract shared by the coordinate index backends.
pub trait NodeStore {
    /// Record the position of node `id`.
    fn put(&mut self, id: i64, coord: CoordinatePair) -> Result<(), IndexError>;

    /// Resolve `ids`, which may be unsorted and contain duplicates.
    ///
    /// Ids that were never stored are omitted from the result.
    fn lookup_many(&mut self, ids: &[i64]) -> Result<ResolvedNodes, IndexError>;

    /// Drop every stored coordinate and return to the memory tier.
    fn clear(&mut self) -> Result<(), IndexError>;

    /// Bytes currently held by the backing store.
    fn storage_bytes(&self) -> Result<u64, IndexError>;

    /// Whether the backing store has moved to disk.
    fn is_on_disk(&self) -> bool;

    /// Move the backing store to disk; a no-op when already there.
    fn migrate_to_disk(&mut self) -> Result<(), IndexError>;

    /// Backend identity, for diagnostics.
    fn backend(&self) -> IndexBackend;
}

/// Sort and deduplicate a request.
pub(crate) fn normalise_request(ids: &[i64]) -> Vec<i64> {
    let mut sorted = ids.to_vec();
    sorted.sort_unstable();
    sorted.dedup();
    sorted
}

#[cfg(test)]
mod tests;
