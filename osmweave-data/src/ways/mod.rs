//! Way resolution.
//!
//! Ways arrive before their node positions are needed, so they queue in a
//! [`PendingWayBatch`] until a cap is hit, a relation shows up or the input
//! ends. [`WayResolver::flush`] then resolves every reference of the batch
//! with one [`NodeStore::lookup_many`] call, builds line features, and
//! persists [`EncodedWay`]s for the relation pass.

use std::{collections::HashSet, ops::Range};

use geo::LineString;
use log::{debug, warn};
use osmweave_core::{
    Collection, CoordinatePair, Feature, Geometry, PrimitiveInfo, RawWay, Tag, WireError,
};
use thiserror::Error;

use crate::{
    config::DecoderConfig,
    index::{IndexError, NodeStore, RequestIndex},
    scratch::{ScratchDb, ScratchError},
    stats::StreamStats,
};

mod area;
mod dictionary;
mod encoded;

pub use area::{AreaRules, IGNORED_KEYS, has_significant_tags, is_ignored_key};
pub use dictionary::{KeyDictionary, MAX_KEYS, MAX_VALUES_PER_KEY, ValueRef};
pub use encoded::{EncodedWay, MAX_TAGS_PER_WAY};

/// Errors raised while resolving ways or relations.
#[derive(Debug, Error)]
pub enum ResolveError {
    /// The coordinate index failed.
    #[error(transparent)]
    Index(#[from] IndexError),
    /// The scratch database failed.
    #[error(transparent)]
    Scratch(#[from] ScratchError),
    /// A persisted way could not be decoded.
    #[error("stored way {id} is corrupt")]
    CorruptWay {
        /// Way id.
        id: i64,
        /// Decoding failure.
        #[source]
        source: WireError,
    },
}

/// Number of different positions among `coords`.
fn distinct_positions(coords: &[CoordinatePair]) -> usize {
    coords.iter().collect::<HashSet<_>>().len()
}

/// Convert fixed-point positions into a `geo` line.
pub(crate) fn to_line_string(coords: &[CoordinatePair]) -> LineString<f64> {
    coords.iter().copied().collect()
}

#[derive(Debug)]
struct PendingWay {
    id: i64,
    refs: Range<usize>,
    tags: Vec<Tag>,
    info: Option<PrimitiveInfo>,
    is_area: bool,
}

/// Ways waiting for their node positions.
///
/// References of all queued ways live in one flat vector so the batch can
/// be resolved with a single index request.
#[derive(Debug)]
pub struct PendingWayBatch {
    ways: Vec<PendingWay>,
    refs: Vec<i64>,
    tag_count: usize,
    value_bytes: usize,
    max_refs: usize,
    max_ways: usize,
    max_tags: usize,
    max_value_bytes: usize,
}

impl PendingWayBatch {
    /// Create an empty batch with the caps from `config`.
    #[must_use]
    pub fn new(config: &DecoderConfig) -> Self {
        Self {
            ways: Vec::new(),
            refs: Vec::new(),
            tag_count: 0,
            value_bytes: 0,
            max_refs: config.max_nodes_in_batch.max(1),
            max_ways: config.max_ways_in_batch.max(1),
            max_tags: config.max_tags_in_batch.max(1),
            max_value_bytes: config.max_inline_bytes_in_batch.max(1),
        }
    }

    /// Number of queued ways.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.ways.len()
    }

    /// Whether nothing is queued.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.ways.is_empty()
    }

    /// Number of queued node references.
    #[must_use]
    pub const fn ref_count(&self) -> usize {
        self.refs.len()
    }

    /// Whether any cap has been reached.
    #[must_use]
    pub const fn is_full(&self) -> bool {
        self.refs.len() >= self.max_refs
            || self.ways.len() >= self.max_ways
            || self.tag_count >= self.max_tags
            || self.value_bytes >= self.max_value_bytes
    }

    fn push(&mut self, way: RawWay, refs: &[i64], is_area: bool) {
        let start = self.refs.len();
        self.refs.extend_from_slice(refs);
        self.tag_count += way.tags.len();
        self.value_bytes += way.tags.iter().map(|tag| tag.value.len()).sum::<usize>();
        self.ways.push(PendingWay {
            id: way.id,
            refs: start..self.refs.len(),
            tags: way.tags,
            info: way.info,
            is_area,
        });
    }

    /// Drop every queued way.
    pub fn clear(&mut self) {
        self.ways.clear();
        self.refs.clear();
        self.tag_count = 0;
        self.value_bytes = 0;
    }
}

/// Where resolved ways go.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WayOutputs {
    /// Emit line features into [`Collection::Lines`].
    pub lines: bool,
    /// Persist encoded ways and standalone candidates for later passes.
    pub persist: bool,
}

/// Turns queued ways into features and persisted [`EncodedWay`]s.
#[derive(Debug)]
pub struct WayResolver {
    rules: AreaRules,
    dictionary: KeyDictionary,
    batch: PendingWayBatch,
    request: RequestIndex,
    outputs: WayOutputs,
    max_refs_per_way: usize,
    index_all_ways: bool,
    report_all_ways: bool,
    attributes: bool,
    warned_oversized: bool,
    warned_tags: bool,
}

impl WayResolver {
    /// Build a resolver for `config`, producing every output.
    #[must_use]
    pub fn new(config: &DecoderConfig) -> Self {
        Self {
            rules: AreaRules::new(&config.closed_ways_are_polygons),
            dictionary: KeyDictionary::new(),
            batch: PendingWayBatch::new(config),
            request: RequestIndex::new(config.max_nodes_in_batch),
            outputs: WayOutputs {
                lines: true,
                persist: true,
            },
            max_refs_per_way: config.max_refs_per_way,
            index_all_ways: config.index_all_ways,
            report_all_ways: config.report_all_ways,
            attributes: config.attributes,
            warned_oversized: false,
            warned_tags: false,
        }
    }

    /// Choose which outputs later flushes produce.
    pub const fn set_outputs(&mut self, outputs: WayOutputs) {
        self.outputs = outputs;
    }

    /// Dictionary used to encode persisted ways.
    #[must_use]
    pub const fn dictionary(&self) -> &KeyDictionary {
        &self.dictionary
    }

    /// Currently queued ways.
    #[must_use]
    pub const fn batch(&self) -> &PendingWayBatch {
        &self.batch
    }

    /// Validate and queue `way`. Returns `true` when the batch should be
    /// flushed.
    pub fn accept(&mut self, mut way: RawWay, stats: &mut StreamStats) -> bool {
        if way.refs.len() < 2 {
            debug!("way {} has {} node references; skipping", way.id, way.refs.len());
            stats.unresolved_ways += 1;
            return false;
        }
        if way.refs.len() > self.max_refs_per_way {
            if !self.warned_oversized {
                warn!(
                    "way {} has {} node references, more than the limit of {}; \
                     such ways are skipped",
                    way.id,
                    way.refs.len(),
                    self.max_refs_per_way
                );
                self.warned_oversized = true;
            }
            stats.capacity_exceeded += 1;
            return false;
        }
        if way.tags.len() > MAX_TAGS_PER_WAY {
            if !self.warned_tags {
                warn!(
                    "way {} has {} tags; keeping the first {MAX_TAGS_PER_WAY}",
                    way.id,
                    way.tags.len()
                );
                self.warned_tags = true;
            }
            stats.capacity_exceeded += 1;
            way.tags.truncate(MAX_TAGS_PER_WAY);
        }

        let is_area = self.rules.is_area(&way);
        let significant = self.report_all_ways || has_significant_tags(&way.tags);
        let wanted = (self.outputs.lines && !is_area && significant)
            || (self.outputs.persist && (is_area || self.index_all_ways));
        if !wanted {
            return false;
        }

        let refs = std::mem::take(&mut way.refs);
        // Rings are re-closed from the first resolved position.
        let queued = if is_area {
            refs.get(..refs.len() - 1).unwrap_or_default()
        } else {
            refs.as_slice()
        };
        self.batch.push(way, queued, is_area);
        self.batch.is_full()
    }

    /// Resolve every queued way, appending line features to `out`.
    ///
    /// # Errors
    /// Propagates coordinate index and scratch database failures.
    pub fn flush(
        &mut self,
        nodes: &mut dyn NodeStore,
        scratch: &mut ScratchDb,
        out: &mut Vec<Feature>,
        stats: &mut StreamStats,
    ) -> Result<(), ResolveError> {
        if self.batch.is_empty() {
            return Ok(());
        }
        let resolved = nodes.lookup_many(&self.batch.refs)?;
        self.request.rebuild(resolved);
        stats.way_flushes += 1;

        let mut stored = Vec::new();
        let mut standalone = Vec::new();
        let ways = std::mem::take(&mut self.batch.ways);
        for mut way in ways {
            let refs = self.batch.refs.get(way.refs.clone()).unwrap_or_default();
            let mut coords = self.resolve_refs(refs);
            let needed = if way.is_area { 3 } else { 2 };
            if distinct_positions(&coords) < needed {
                debug!(
                    "way {}: {} of {} node references resolved to fewer than {needed} distinct positions; dropping",
                    way.id,
                    coords.len(),
                    refs.len()
                );
                stats.unresolved_ways += 1;
                continue;
            }
            if way.is_area
                && let Some(&first) = coords.first()
            {
                coords.push(first);
            }

            let significant = self.report_all_ways || has_significant_tags(&way.tags);
            let info = way.info.filter(|_| self.attributes);
            let emit_line = self.outputs.lines && !way.is_area && significant;
            if self.outputs.persist && (way.is_area || self.index_all_ways) {
                let tags = if emit_line {
                    way.tags.clone()
                } else {
                    std::mem::take(&mut way.tags)
                };
                let encoded = EncodedWay {
                    is_area: way.is_area,
                    tags,
                    info: info.clone(),
                    coords: coords.clone(),
                };
                stored.push((way.id, encoded.encode(&mut self.dictionary)));
                if way.is_area && significant {
                    standalone.push(way.id);
                }
            }
            if emit_line {
                out.push(Feature {
                    collection: Collection::Lines,
                    id: way.id,
                    tags: way.tags,
                    info,
                    geometry: Geometry::LineString(to_line_string(&coords)),
                    is_area: false,
                });
            }
        }
        self.batch.clear();
        scratch.store_ways(&stored, &standalone)?;
        Ok(())
    }

    /// Positions of `refs` that the current request index knows, in order.
    fn resolve_refs(&self, refs: &[i64]) -> Vec<CoordinatePair> {
        let mut coords = Vec::with_capacity(refs.len() + 1);
        let mut previous = None;
        for &id in refs {
            previous = self.request.find(id, previous);
            if let Some(coord) = previous.and_then(|position| self.request.coord_at(position)) {
                coords.push(coord);
            }
        }
        coords
    }

    /// Forget queued ways and dictionary entries for a new pass.
    pub fn clear(&mut self) {
        self.batch.clear();
        self.dictionary.clear();
        self.request.reset();
        self.warned_oversized = false;
        self.warned_tags = false;
    }
}
