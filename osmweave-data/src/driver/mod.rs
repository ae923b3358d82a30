//! Pull-based streaming driver.
//!
//! [`OsmStream`] owns a decoder together with every piece of per-pass state
//! and turns one bounded step of work into one [`Advance`]. Callers drive it
//! with [`OsmStream::advance`], [`OsmStream::next_feature`] or as an
//! iterator; nothing runs in the background.
//!
//! Two consumption disciplines are supported. In exclusive mode only the
//! current collection is produced, so interest directly limits the work
//! done. In interleaved mode every collection of interest is buffered and
//! served round-robin.

use std::{collections::VecDeque, path::PathBuf};

use camino::{Utf8Path, Utf8PathBuf};
use log::{debug, error, info};
use osmweave_core::{Bounds, Collection, Feature};
use thiserror::Error;

use crate::{
    config::DecoderConfig,
    decoder::{BlockDecoder, DecodeError, InputFormat, UnitOutcome, open_decoder},
    index::{IndexBackend, IndexError, KeyedNodeStore, NodeStore, PagedNodeStore},
    relations::RelationResolver,
    scratch::{LIMIT_IDS_PER_REQUEST, ScratchDb, ScratchError},
    stats::StreamStats,
    ways::{ResolveError, WayOutputs, WayResolver},
};

mod sink;

use sink::{ExtentSink, PassSink};

/// Errors surfaced by [`OsmStream`]. All of them end the pass.
#[derive(Debug, Error)]
pub enum StreamError {
    /// The decoder failed.
    #[error(transparent)]
    Decode(#[from] DecodeError),
    /// The coordinate index failed.
    #[error(transparent)]
    Index(#[from] IndexError),
    /// The scratch database failed.
    #[error(transparent)]
    Scratch(#[from] ScratchError),
    /// Way or relation resolution failed.
    #[error(transparent)]
    Resolve(#[from] ResolveError),
    /// The configured scratch directory is unusable.
    #[error("scratch directory {path:?} is not an existing UTF-8 directory")]
    ScratchDir {
        /// Configured path.
        path: PathBuf,
    },
}

/// Result of one [`OsmStream::advance`] step.
#[derive(Debug, Clone, PartialEq)]
pub enum Advance {
    /// A feature is ready.
    Emitted(Feature),
    /// Work was done but nothing is ready yet.
    NeedMore,
    /// The pass is over.
    EndOfInput,
}

/// Which work the active collections call for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Wants {
    active: [bool; 5],
}

impl Wants {
    pub(crate) fn has(self, collection: Collection) -> bool {
        self.active
            .get(collection.index())
            .copied()
            .unwrap_or(false)
    }

    /// Node positions and ways are needed.
    pub(crate) fn geometry(self) -> bool {
        self.has(Collection::Lines) || self.relations()
    }

    /// Relations are needed.
    pub(crate) fn relations(self) -> bool {
        self.has(Collection::MultiPolygons)
            || self.has(Collection::MultiLineStrings)
            || self.has(Collection::OtherRelations)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Decoding,
    Flushing,
    Standalone { after: i64 },
    Finished,
}

/// Streams features out of one OSM file.
pub struct OsmStream {
    config: DecoderConfig,
    decoder: Box<dyn BlockDecoder>,
    nodes: Box<dyn NodeStore>,
    scratch: ScratchDb,
    ways: WayResolver,
    relations: RelationResolver,
    interest: [bool; 5],
    current: Collection,
    queues: [VecDeque<Feature>; 5],
    next_queue: usize,
    phase: Phase,
    migration_due: bool,
    units: u64,
    stopped: bool,
    extent: Option<Bounds>,
    stats: StreamStats,
}

impl std::fmt::Debug for OsmStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OsmStream")
            .field("format", &self.decoder.format())
            .field("backend", &self.nodes.backend())
            .field("phase", &self.phase)
            .field("current", &self.current)
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}

fn validate_scratch_dir(configured: Option<&PathBuf>) -> Result<(), StreamError> {
    let Some(dir) = configured else {
        return Ok(());
    };
    let invalid = || StreamError::ScratchDir { path: dir.clone() };
    let utf8 = Utf8PathBuf::from_path_buf(dir.clone()).map_err(|_| invalid())?;
    match osmweave_fs::is_directory(&utf8) {
        Ok(true) => Ok(()),
        _ => Err(invalid()),
    }
}

impl OsmStream {
    /// Open `path`, detecting its format from the leading bytes.
    ///
    /// # Errors
    /// Returns [`StreamError::Decode`] when the file cannot be opened or is
    /// neither OSM XML nor PBF, and the errors of [`OsmStream::from_decoder`].
    pub fn open(path: &Utf8Path, config: DecoderConfig) -> Result<Self, StreamError> {
        let decoder = open_decoder(path)?;
        Self::from_decoder(decoder, config)
    }

    /// Wrap an existing decoder.
    ///
    /// # Errors
    /// Returns [`StreamError::ScratchDir`] for an unusable scratch directory
    /// and storage errors when the scratch database cannot be created.
    pub fn from_decoder(
        decoder: Box<dyn BlockDecoder>,
        config: DecoderConfig,
    ) -> Result<Self, StreamError> {
        validate_scratch_dir(config.scratch_dir.as_ref())?;
        let nodes: Box<dyn NodeStore> = if config.use_custom_indexing {
            Box::new(PagedNodeStore::new(
                config.compress_nodes,
                config.scratch_dir.clone(),
            ))
        } else {
            Box::new(KeyedNodeStore::new(config.scratch_dir.clone())?)
        };
        let mut stream = Self {
            scratch: ScratchDb::open_in_memory()?,
            ways: WayResolver::new(&config),
            relations: RelationResolver::new(config.attributes),
            interest: [true; 5],
            current: Collection::Points,
            queues: Default::default(),
            next_queue: 0,
            phase: Phase::Decoding,
            migration_due: false,
            units: 0,
            stopped: false,
            extent: None,
            stats: StreamStats::default(),
            decoder,
            nodes,
            config,
        };
        stream.refresh_outputs();
        Ok(stream)
    }

    /// Active configuration.
    #[must_use]
    pub const fn config(&self) -> &DecoderConfig {
        &self.config
    }

    /// Format of the underlying input.
    #[must_use]
    pub fn format(&self) -> InputFormat {
        self.decoder.format()
    }

    /// Backend holding node positions.
    #[must_use]
    pub fn backend(&self) -> IndexBackend {
        self.nodes.backend()
    }

    /// Counters for the current pass.
    #[must_use]
    pub const fn stats(&self) -> StreamStats {
        self.stats
    }

    /// Whether node positions have spilled to disk.
    #[must_use]
    pub fn nodes_on_disk(&self) -> bool {
        self.nodes.is_on_disk()
    }

    /// Whether the scratch database has spilled to disk.
    #[must_use]
    pub const fn scratch_on_disk(&self) -> bool {
        self.scratch.is_on_disk()
    }

    /// Declare whether features of `collection` should be produced.
    pub fn set_interest(&mut self, collection: Collection, interested: bool) {
        if let Some(slot) = self.interest.get_mut(collection.index()) {
            *slot = interested;
        }
        self.refresh_outputs();
    }

    /// Whether `collection` is of interest.
    #[must_use]
    pub fn is_interested(&self, collection: Collection) -> bool {
        self.interest
            .get(collection.index())
            .copied()
            .unwrap_or(false)
    }

    /// Collection drained in exclusive mode.
    #[must_use]
    pub const fn current_collection(&self) -> Collection {
        self.current
    }

    /// Switch the exclusively drained collection, restarting the pass when
    /// it changes.
    ///
    /// # Errors
    /// Propagates the errors of [`OsmStream::reset`].
    pub fn set_current_collection(&mut self, collection: Collection) -> Result<(), StreamError> {
        if collection == self.current {
            return Ok(());
        }
        self.current = collection;
        self.reset()
    }

    fn wants(&self) -> Wants {
        let mut active = self.interest;
        if !self.config.interleaved {
            for (index, slot) in active.iter_mut().enumerate() {
                *slot &= index == self.current.index();
            }
        }
        Wants { active }
    }

    fn refresh_outputs(&mut self) {
        let wants = self.wants();
        self.ways.set_outputs(WayOutputs {
            lines: wants.has(Collection::Lines),
            persist: wants.relations(),
        });
    }

    /// Ask the stream to stop; honoured before the next unit of work.
    pub const fn request_stop(&mut self) {
        self.stopped = true;
    }

    /// Whether the stream has stopped, on request or after an error.
    #[must_use]
    pub const fn is_stopped(&self) -> bool {
        self.stopped
    }

    /// Rewind to the start of the input and forget all per-pass state.
    ///
    /// # Errors
    /// Returns an error when the decoder cannot rewind or storage cannot be
    /// cleared.
    pub fn reset(&mut self) -> Result<(), StreamError> {
        self.decoder.rewind()?;
        self.nodes.clear()?;
        self.scratch.clear()?;
        self.ways.clear();
        self.queues.iter_mut().for_each(VecDeque::clear);
        self.next_queue = 0;
        self.phase = Phase::Decoding;
        self.migration_due = false;
        self.units = 0;
        self.stopped = false;
        self.extent = None;
        self.stats = StreamStats::default();
        self.refresh_outputs();
        debug!("stream reset");
        Ok(())
    }

    /// Declared bounds of the input, if any.
    ///
    /// Before the pass starts, units are decoded until bounds or the first
    /// primitive appear, then the decoder is rewound. Once the pass is under
    /// way the bounds seen so far are returned.
    ///
    /// # Errors
    /// Propagates decoder failures.
    pub fn extent(&mut self) -> Result<Option<Bounds>, StreamError> {
        if self.extent.is_some() || self.units > 0 {
            return Ok(self.extent);
        }
        let mut lookup = ExtentSink::default();
        while !lookup.settled {
            if self.decoder.process_unit(&mut lookup)? == UnitOutcome::Finished {
                break;
            }
        }
        self.decoder.rewind()?;
        self.extent = lookup.bounds;
        Ok(self.extent)
    }

    /// Perform one bounded step of work.
    ///
    /// A buffered feature is returned first when the discipline allows;
    /// otherwise one decode unit, one storage migration check, one final
    /// flush or one page of standalone areas is processed. Migration checks
    /// follow every unit and the final flush.
    ///
    /// # Errors
    /// The first fatal error is returned once and stops the stream; later
    /// calls report [`Advance::EndOfInput`].
    pub fn advance(&mut self) -> Result<Advance, StreamError> {
        if self.stopped {
            return Ok(Advance::EndOfInput);
        }
        if let Some(feature) = self.pop_ready() {
            self.stats.features += 1;
            return Ok(Advance::Emitted(feature));
        }
        self.step().inspect_err(|err| {
            error!("stopping OSM stream: {err}");
            self.stopped = true;
        })
    }

    /// Advance until a feature is ready or the input is exhausted.
    ///
    /// # Errors
    /// See [`OsmStream::advance`].
    pub fn next_feature(&mut self) -> Result<Option<Feature>, StreamError> {
        loop {
            match self.advance()? {
                Advance::Emitted(feature) => return Ok(Some(feature)),
                Advance::NeedMore => {}
                Advance::EndOfInput => return Ok(None),
            }
        }
    }

    fn step(&mut self) -> Result<Advance, StreamError> {
        if self.migration_due {
            self.migration_due = false;
            self.check_migration()?;
            return Ok(Advance::NeedMore);
        }
        match self.phase {
            Phase::Decoding => self.decode_unit()?,
            Phase::Flushing => {
                let mut out = Vec::new();
                self.ways.flush(
                    self.nodes.as_mut(),
                    &mut self.scratch,
                    &mut out,
                    &mut self.stats,
                )?;
                self.enqueue(out);
                self.migration_due = true;
                self.phase = if self.wants().has(Collection::MultiPolygons) {
                    Phase::Standalone { after: i64::MIN }
                } else {
                    Phase::Finished
                };
            }
            Phase::Standalone { after } => {
                let (features, cursor) = self.relations.standalone_page(
                    after,
                    LIMIT_IDS_PER_REQUEST,
                    self.ways.dictionary(),
                    &self.scratch,
                )?;
                self.enqueue(features);
                self.phase = cursor.map_or(Phase::Finished, |after| Phase::Standalone { after });
            }
            Phase::Finished => return Ok(Advance::EndOfInput),
        }
        Ok(Advance::NeedMore)
    }

    fn decode_unit(&mut self) -> Result<(), StreamError> {
        self.refresh_outputs();
        let mut sink = PassSink {
            wants: self.wants(),
            report_all_nodes: self.config.report_all_nodes,
            attributes: self.config.attributes,
            nodes: self.nodes.as_mut(),
            scratch: &mut self.scratch,
            ways: &mut self.ways,
            relations: &self.relations,
            stats: &mut self.stats,
            extent: &mut self.extent,
            out: Vec::new(),
            error: None,
        };
        let outcome = self.decoder.process_unit(&mut sink);
        let PassSink { out, error, .. } = sink;
        self.units += 1;
        self.enqueue(out);
        if let Some(err) = error {
            return Err(err);
        }
        match outcome? {
            UnitOutcome::Finished => {
                info!(
                    "finished decoding after {} bytes ({} nodes, {} ways, {} relations)",
                    self.decoder.bytes_consumed(),
                    self.stats.nodes,
                    self.stats.ways,
                    self.stats.relations
                );
                self.phase = Phase::Flushing;
            }
            UnitOutcome::Decoded | UnitOutcome::Interrupted => {}
        }
        self.migration_due = true;
        Ok(())
    }

    /// Move storage to disk once it outgrows its share of the budget.
    fn check_migration(&mut self) -> Result<(), StreamError> {
        let budget = self.config.tmpfile_budget_bytes();
        if !self.nodes.is_on_disk()
            && self.nodes.storage_bytes()? >= self.config.node_spill_threshold()
        {
            info!("node storage exceeded its memory budget; moving to disk");
            self.nodes.migrate_to_disk()?;
        }
        let share = if self.nodes.is_on_disk() {
            budget
        } else {
            budget >> 2
        };
        if !self.scratch.is_on_disk() && self.scratch.size_bytes()? >= share {
            self.scratch
                .migrate_to_disk(self.config.scratch_dir.as_deref())?;
        }
        Ok(())
    }

    fn enqueue(&mut self, features: Vec<Feature>) {
        let wants = self.wants();
        for feature in features {
            if !wants.has(feature.collection) {
                continue;
            }
            if let Some(queue) = self.queues.get_mut(feature.collection.index()) {
                queue.push_back(feature);
            }
        }
    }

    fn pop_ready(&mut self) -> Option<Feature> {
        if !self.config.interleaved {
            return self.queues.get_mut(self.current.index())?.pop_front();
        }
        let limit = self.config.max_buffered_features;
        // Reversed so ties go to the earliest collection.
        if let Some(queue) = self
            .queues
            .iter_mut()
            .rev()
            .filter(|queue| queue.len() > limit)
            .max_by_key(|queue| queue.len())
        {
            return queue.pop_front();
        }
        let count = self.queues.len();
        let start = self.next_queue.min(count);
        for index in (start..count).chain(0..start) {
            if let Some(feature) = self.queues.get_mut(index).and_then(VecDeque::pop_front) {
                self.next_queue = if index + 1 == count { 0 } else { index + 1 };
                return Some(feature);
            }
        }
        None
    }
}

impl Iterator for OsmStream {
    type Item = Result<Feature, StreamError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_feature().transpose()
    }
}
