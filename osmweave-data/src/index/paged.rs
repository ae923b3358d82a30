//! Paged coordinate store for strictly increasing node ids.
//!
//! The id space is cut into buckets of [`BUCKET_SIZE`] ids, each holding
//! 1024 sectors of [`SECTOR_SIZE`] ids. A sector is buffered while ids fall
//! inside it and appended to the spill file once the stream moves past it,
//! so every bucket occupies one contiguous run of the file. Buckets live in
//! a page arena indexed by bucket number and record where their run starts
//! plus which sectors exist, which is enough to compute a sector's offset
//! without a separate index file.
//!
//! Raw sectors are 64 fixed-point pairs (512 bytes). Compressed sectors are
//! an 8-byte presence bitmap, the first present pair in full, then zig-zag
//! varint deltas between consecutive present pairs; a sector that would not
//! shrink is stored raw.

use std::path::PathBuf;

use osmweave_core::{
    CoordinatePair, WireCursor,
    wire::write_svarint64,
};

use super::{IndexBackend, IndexError, NodeStore, ResolvedNodes, SpillFile, normalise_request};

/// Ids per bucket.
pub const BUCKET_SIZE: i64 = 1 << BUCKET_BITS;
/// Ids per sector.
pub const SECTOR_SIZE: i64 = 1 << SECTOR_BITS;

const SECTOR_BITS: u32 = 6;
const BUCKET_BITS: u32 = 16;
const SLOTS: usize = 1 << SECTOR_BITS;
const SECTORS_PER_BUCKET: usize = 1 << (BUCKET_BITS - SECTOR_BITS);
const PRESENCE_WORDS: usize = SECTORS_PER_BUCKET >> 6;
const PAIR_BYTES: usize = 8;
const RAW_SECTOR_BYTES: usize = SLOTS * PAIR_BYTES;
const BITMAP_BYTES: usize = 8;
/// Size code stored for a sector that fell back to the raw layout.
const RAW_SIZE_CODE: u8 = 252;

type SectorCoords = [CoordinatePair; SLOTS];

/// Which sectors of a bucket exist, and how large they are on disk.
enum SectorTable {
    Presence(Box<[u64; PRESENCE_WORDS]>),
    /// Per-sector size code; `0` means absent, otherwise `code * 2 + 8` bytes.
    Sizes(Box<[u8; SECTORS_PER_BUCKET]>),
}

impl SectorTable {
    fn new(compress: bool) -> Self {
        if compress {
            Self::Sizes(Box::new([0; SECTORS_PER_BUCKET]))
        } else {
            Self::Presence(Box::new([0; PRESENCE_WORDS]))
        }
    }

    fn stored_size(&self, sector: usize) -> Option<u64> {
        match self {
            Self::Presence(words) => {
                let word = words.get(sector >> 6)?;
                ((word & (1_u64 << (sector & 63))) != 0).then_some(RAW_SECTOR_BYTES as u64)
            }
            Self::Sizes(codes) => match codes.get(sector) {
                Some(0) | None => None,
                Some(code) => Some(u64::from(*code) * 2 + BITMAP_BYTES as u64),
            },
        }
    }

    fn record(&mut self, sector: usize, size_code: u8) {
        match self {
            Self::Presence(words) => {
                if let Some(word) = words.get_mut(sector >> 6) {
                    *word |= 1_u64 << (sector & 63);
                }
            }
            Self::Sizes(codes) => {
                if let Some(code) = codes.get_mut(sector) {
                    *code = size_code;
                }
            }
        }
    }
}

struct Bucket {
    offset: u64,
    sectors: SectorTable,
}

struct OpenSector {
    bucket: usize,
    sector: usize,
    coords: SectorCoords,
}

#[derive(Clone, Copy)]
struct Location {
    bucket: usize,
    sector: usize,
    slot: usize,
}

fn locate(id: i64) -> Option<Location> {
    let raw = u64::try_from(id).ok()?;
    let bucket = usize::try_from(raw >> BUCKET_BITS).ok()?;
    let sector = usize::try_from((raw >> SECTOR_BITS) & (SECTORS_PER_BUCKET as u64 - 1)).ok()?;
    let slot = usize::try_from(raw & (SLOTS as u64 - 1)).ok()?;
    Some(Location {
        bucket,
        sector,
        slot,
    })
}

/// Running offset while walking one bucket's sectors in ascending order.
struct BucketScan {
    bucket: usize,
    next_sector: usize,
    offset: u64,
}

/// Bucketed, append-only coordinate store.
pub struct PagedNodeStore {
    spill: SpillFile,
    pages: Vec<Option<Bucket>>,
    compress: bool,
    open: Option<OpenSector>,
    last_id: Option<i64>,
    scratch_dir: Option<PathBuf>,
    encode_buf: Vec<u8>,
}

impl std::fmt::Debug for PagedNodeStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PagedNodeStore")
            .field("compress", &self.compress)
            .field("bytes", &self.spill.len())
            .field("last_id", &self.last_id)
            .finish_non_exhaustive()
    }
}

impl PagedNodeStore {
    /// Create an empty store; `scratch_dir` hosts the spill file once migrated.
    #[must_use]
    pub fn new(compress: bool, scratch_dir: Option<PathBuf>) -> Self {
        Self {
            spill: SpillFile::default(),
            pages: Vec::new(),
            compress,
            open: None,
            last_id: None,
            scratch_dir,
            encode_buf: Vec::new(),
        }
    }

    fn write_sector(&mut self, open: &OpenSector) -> Result<(), IndexError> {
        let presence = open
            .coords
            .iter()
            .enumerate()
            .filter(|(_, coord)| !coord.is_absent())
            .fold(0_u64, |bits, (slot, _)| bits | (1_u64 << slot));
        if presence == 0 {
            return Ok(());
        }
        self.encode_buf.clear();
        let size_code = if self.compress {
            encode_compressed(&open.coords, presence, &mut self.encode_buf);
            let odd = self.encode_buf.len() & 1;
            if self.encode_buf.len() + odd >= RAW_SECTOR_BYTES {
                self.encode_buf.clear();
                encode_raw(&open.coords, &mut self.encode_buf);
                RAW_SIZE_CODE
            } else {
                if odd == 1 {
                    self.encode_buf.push(0);
                }
                u8::try_from((self.encode_buf.len() - BITMAP_BYTES) >> 1).unwrap_or(RAW_SIZE_CODE)
            }
        } else {
            encode_raw(&open.coords, &mut self.encode_buf);
            RAW_SIZE_CODE
        };
        let offset = self
            .spill
            .append(&self.encode_buf)
            .map_err(|source| IndexError::StorageWriteFailed { source })?;
        if self.pages.len() <= open.bucket {
            self.pages.resize_with(open.bucket + 1, || None);
        }
        if let Some(page) = self.pages.get_mut(open.bucket) {
            let compress = self.compress;
            page.get_or_insert_with(|| Bucket {
                offset,
                sectors: SectorTable::new(compress),
            })
            .sectors
            .record(open.sector, size_code);
        }
        Ok(())
    }

    /// Read the stored sector at `location`, or `None` when it was never written.
    fn load_sector(
        &mut self,
        location: Location,
        scan: &mut Option<BucketScan>,
        read_buf: &mut Vec<u8>,
    ) -> Result<Option<SectorCoords>, IndexError> {
        let Some(Some(bucket)) = self.pages.get(location.bucket) else {
            return Ok(None);
        };
        let Some(size) = bucket.sectors.stored_size(location.sector) else {
            return Ok(None);
        };
        let start = match scan.take() {
            Some(state)
                if state.bucket == location.bucket && state.next_sector <= location.sector =>
            {
                state
            }
            _ => BucketScan {
                bucket: location.bucket,
                next_sector: 0,
                offset: bucket.offset,
            },
        };
        let state = advance_scan(start, &bucket.sectors, location.sector);
        let offset = state.offset;
        *scan = Some(state);

        read_buf.resize(usize::try_from(size).unwrap_or(RAW_SECTOR_BYTES), 0);
        self.spill
            .read_at(offset, read_buf)
            .map_err(|source| IndexError::StorageReadFailed { offset, source })?;
        decode_sector(read_buf)
            .map(Some)
            .ok_or(IndexError::CorruptSector { offset })
    }
}

#[expect(clippy::little_endian_bytes, reason = "sectors are stored little-endian")]
fn encode_raw(coords: &SectorCoords, out: &mut Vec<u8>) {
    for coord in coords {
        out.extend_from_slice(&coord.lon.to_le_bytes());
        out.extend_from_slice(&coord.lat.to_le_bytes());
    }
}

#[expect(clippy::little_endian_bytes, reason = "sectors are stored little-endian")]
fn encode_compressed(coords: &SectorCoords, presence: u64, out: &mut Vec<u8>) {
    out.extend_from_slice(&presence.to_le_bytes());
    let mut previous: Option<CoordinatePair> = None;
    for coord in coords.iter().filter(|coord| !coord.is_absent()) {
        match previous {
            None => {
                out.extend_from_slice(&coord.lon.to_le_bytes());
                out.extend_from_slice(&coord.lat.to_le_bytes());
            }
            Some(prev) => {
                write_svarint64(out, i64::from(coord.lon) - i64::from(prev.lon));
                write_svarint64(out, i64::from(coord.lat) - i64::from(prev.lat));
            }
        }
        previous = Some(*coord);
    }
}

fn decode_sector(bytes: &[u8]) -> Option<SectorCoords> {
    let mut coords = [CoordinatePair::ABSENT; SLOTS];
    let mut cursor = WireCursor::new(bytes);
    if bytes.len() == RAW_SECTOR_BYTES {
        for coord in &mut coords {
            let lon = cursor.read_fixed32().ok()?.cast_signed();
            let lat = cursor.read_fixed32().ok()?.cast_signed();
            *coord = CoordinatePair::new(lon, lat);
        }
        return Some(coords);
    }
    let presence = cursor.read_fixed64().ok()?;
    let mut previous: Option<CoordinatePair> = None;
    for (slot, coord) in coords.iter_mut().enumerate() {
        if (presence & (1_u64 << slot)) == 0 {
            continue;
        }
        let next = match previous {
            None => CoordinatePair::new(
                cursor.read_fixed32().ok()?.cast_signed(),
                cursor.read_fixed32().ok()?.cast_signed(),
            ),
            Some(prev) => {
                let lon = i64::from(prev.lon).checked_add(cursor.read_svarint64().ok()?)?;
                let lat = i64::from(prev.lat).checked_add(cursor.read_svarint64().ok()?)?;
                CoordinatePair::new(i32::try_from(lon).ok()?, i32::try_from(lat).ok()?)
            }
        };
        *coord = next;
        previous = Some(next);
    }
    Some(coords)
}

impl NodeStore for PagedNodeStore {
    fn put(&mut self, id: i64, coord: CoordinatePair) -> Result<(), IndexError> {
        if let Some(previous) = self.last_id
            && id <= previous
        {
            return Err(IndexError::NonMonotonicId { id, previous });
        }
        let location = locate(id).ok_or(IndexError::NegativeId { id })?;
        self.last_id = Some(id);
        let mut open = match self.open.take() {
            Some(open) if open.bucket == location.bucket && open.sector == location.sector => open,
            previous => {
                if let Some(finished) = previous {
                    self.write_sector(&finished)?;
                }
                OpenSector {
                    bucket: location.bucket,
                    sector: location.sector,
                    coords: [CoordinatePair::ABSENT; SLOTS],
                }
            }
        };
        if let Some(slot) = open.coords.get_mut(location.slot) {
            *slot = coord;
        }
        self.open = Some(open);
        Ok(())
    }

    fn lookup_many(&mut self, ids: &[i64]) -> Result<ResolvedNodes, IndexError> {
        let mut resolved = Vec::with_capacity(ids.len());
        let mut scan: Option<BucketScan> = None;
        let mut cached: Option<(usize, usize, SectorCoords)> = None;
        let mut read_buf = Vec::with_capacity(RAW_SECTOR_BYTES);

        for id in normalise_request(ids) {
            let Some(location) = locate(id) else {
                continue;
            };
            let coord = match &self.open {
                Some(open) if open.bucket == location.bucket && open.sector == location.sector => {
                    open.coords.get(location.slot).copied()
                }
                _ => {
                    let hit = matches!(
                        &cached,
                        Some((bucket, sector, _))
                            if *bucket == location.bucket && *sector == location.sector
                    );
                    if !hit {
                        let Some(coords) = self.load_sector(location, &mut scan, &mut read_buf)?
                        else {
                            continue;
                        };
                        cached = Some((location.bucket, location.sector, coords));
                    }
                    cached
                        .as_ref()
                        .and_then(|(_, _, coords)| coords.get(location.slot).copied())
                }
            };
            if let Some(coord) = coord.filter(|coord| !coord.is_absent()) {
                resolved.push((id, coord));
            }
        }
        Ok(resolved)
    }

    fn clear(&mut self) -> Result<(), IndexError> {
        self.spill.clear();
        self.pages.clear();
        self.open = None;
        self.last_id = None;
        Ok(())
    }

    fn storage_bytes(&self) -> Result<u64, IndexError> {
        Ok(self.spill.len())
    }

    fn is_on_disk(&self) -> bool {
        self.spill.is_on_disk()
    }

    fn migrate_to_disk(&mut self) -> Result<(), IndexError> {
        self.spill
            .migrate_to_disk(self.scratch_dir.as_deref())
            .map_err(|source| IndexError::StorageWriteFailed { source })
    }

    fn backend(&self) -> IndexBackend {
        IndexBackend::Paged
    }
}

/// Accumulate sector sizes until `scan` points at `target`.
fn advance_scan(mut scan: BucketScan, sectors: &SectorTable, target: usize) -> BucketScan {
    while scan.next_sector < target {
        scan.offset += sectors.stored_size(scan.next_sector).unwrap_or(0);
        scan.next_sector += 1;
    }
    scan
}
