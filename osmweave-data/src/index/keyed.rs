//! Keyed coordinate store backed by a private scratch database.
//!
//! Accepts ids in any order at the cost of slower bulk inserts. Puts are
//! buffered and written in one transaction per batch.

use std::path::PathBuf;

use osmweave_core::CoordinatePair;

use super::{IndexBackend, IndexError, NodeStore, ResolvedNodes, normalise_request};
use crate::scratch::ScratchDb;

const PUT_BATCH: usize = 10_000;

/// Coordinate store keeping one `nodes` row per id.
#[derive(Debug)]
pub struct KeyedNodeStore {
    db: ScratchDb,
    pending: Vec<(i64, [u8; 8])>,
    scratch_dir: Option<PathBuf>,
}

#[expect(clippy::little_endian_bytes, reason = "rows store pairs little-endian")]
fn encode_pair(coord: CoordinatePair) -> [u8; 8] {
    let mut bytes = [0_u8; 8];
    let (lon, lat) = bytes.split_at_mut(4);
    lon.copy_from_slice(&coord.lon.to_le_bytes());
    lat.copy_from_slice(&coord.lat.to_le_bytes());
    bytes
}

#[expect(clippy::little_endian_bytes, reason = "rows store pairs little-endian")]
fn decode_pair(bytes: &[u8]) -> Option<CoordinatePair> {
    let lon: [u8; 4] = bytes.get(0..4)?.try_into().ok()?;
    let lat: [u8; 4] = bytes.get(4..8)?.try_into().ok()?;
    Some(CoordinatePair::new(
        i32::from_le_bytes(lon),
        i32::from_le_bytes(lat),
    ))
}

impl KeyedNodeStore {
    /// Create an empty store with its own in-memory scratch database.
    ///
    /// # Errors
    /// Returns [`IndexError::Scratch`] when the database cannot be opened.
    pub fn new(scratch_dir: Option<PathBuf>) -> Result<Self, IndexError> {
        Ok(Self {
            db: ScratchDb::open_in_memory()?,
            pending: Vec::with_capacity(PUT_BATCH),
            scratch_dir,
        })
    }

    fn flush_pending(&mut self) -> Result<(), IndexError> {
        if self.pending.is_empty() {
            return Ok(());
        }
        self.db.store_nodes(&self.pending)?;
        self.pending.clear();
        Ok(())
    }
}

impl NodeStore for KeyedNodeStore {
    fn put(&mut self, id: i64, coord: CoordinatePair) -> Result<(), IndexError> {
        self.pending.push((id, encode_pair(coord)));
        if self.pending.len() >= PUT_BATCH {
            self.flush_pending()?;
        }
        Ok(())
    }

    fn lookup_many(&mut self, ids: &[i64]) -> Result<ResolvedNodes, IndexError> {
        self.flush_pending()?;
        let request = normalise_request(ids);
        let rows = self.db.fetch_nodes(&request)?;
        Ok(request
            .into_iter()
            .filter_map(|id| {
                rows.get(&id)
                    .and_then(|blob| decode_pair(blob))
                    .filter(|coord| !coord.is_absent())
                    .map(|coord| (id, coord))
            })
            .collect())
    }

    fn clear(&mut self) -> Result<(), IndexError> {
        self.pending.clear();
        if self.db.is_on_disk() {
            self.db = ScratchDb::open_in_memory()?;
        } else {
            self.db.clear()?;
        }
        Ok(())
    }

    fn storage_bytes(&self) -> Result<u64, IndexError> {
        Ok(self.db.size_bytes()?)
    }

    fn is_on_disk(&self) -> bool {
        self.db.is_on_disk()
    }

    fn migrate_to_disk(&mut self) -> Result<(), IndexError> {
        self.flush_pending()?;
        self.db.migrate_to_disk(self.scratch_dir.as_deref())?;
        Ok(())
    }

    fn backend(&self) -> IndexBackend {
        IndexBackend::Keyed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    fn accepts_unsorted_ids() {
        let mut store = KeyedNodeStore::new(None).expect("open store");
        store.put(30, CoordinatePair::new(3, 3)).expect("put");
        store.put(-4, CoordinatePair::new(-4, 4)).expect("put");
        store.put(10, CoordinatePair::new(1, 1)).expect("put");
        let found = store.lookup_many(&[10, 30, 10, 99, -4]).expect("lookup");
        assert_eq!(
            found,
            vec![
                (-4, CoordinatePair::new(-4, 4)),
                (10, CoordinatePair::new(1, 1)),
                (30, CoordinatePair::new(3, 3)),
            ]
        );
    }

    #[rstest]
    fn rows_stay_in_the_private_database() {
        let way_store = ScratchDb::open_in_memory().expect("scratch db");
        let mut store = KeyedNodeStore::new(None).expect("open store");
        let mut other = KeyedNodeStore::new(None).expect("open store");
        store.put(7, CoordinatePair::new(7, 7)).expect("put");
        assert_eq!(store.lookup_many(&[7]).expect("lookup").len(), 1);
        assert!(other.lookup_many(&[7]).expect("lookup").is_empty());
        assert!(way_store.fetch_nodes(&[7]).expect("fetch").is_empty());
    }

    #[rstest]
    fn pair_encoding_is_little_endian() {
        let bytes = encode_pair(CoordinatePair::new(1, -1));
        assert_eq!(bytes, [1, 0, 0, 0, 0xff, 0xff, 0xff, 0xff]);
        assert_eq!(decode_pair(&bytes), Some(CoordinatePair::new(1, -1)));
    }
}
