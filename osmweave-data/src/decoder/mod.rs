//! Block decoders for the binary and text OSM formats.
//!
//! Both front ends share one contract: each call to
//! [`BlockDecoder::process_unit`] consumes one bounded unit of input (a blob
//! for PBF, roughly one 64 KiB chunk for XML) and reports what it found to a
//! [`PrimitiveSink`] synchronously. Nothing is queued inside the decoder.

use std::{io, ops::ControlFlow};

use osmweave_core::{Bounds, RawNode, RawRelation, RawWay, WireError};
use thiserror::Error;

mod pbf;
mod sniff;
mod xml;

pub use pbf::{PbfDecoder, PbfHeader};
pub use sniff::{InputFormat, SNIFF_BYTES, decoder_for, open_decoder, sniff_format};
pub use xml::{MAX_ELEMENT_STRING_BYTES, XmlDecoder};

/// Errors raised while decoding an input file.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// Reading or rewinding the underlying file failed.
    #[error("failed to read OSM input")]
    Io {
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },
    /// The input ended in the middle of a structure.
    #[error("input truncated near byte {offset}")]
    TruncatedInput {
        /// Approximate file offset of the failure.
        offset: u64,
    },
    /// The input is structurally invalid.
    #[error("corrupt input near byte {offset}: {reason}")]
    CorruptInput {
        /// Approximate file offset of the failure.
        offset: u64,
        /// Short description of the violation.
        reason: String,
    },
    /// A PBF header requires a feature this decoder does not implement.
    #[error("unsupported required feature: {feature}")]
    UnsupportedFeature {
        /// Feature name as declared by the file.
        feature: String,
    },
    /// A zlib blob failed to inflate.
    #[error("failed to inflate blob at byte {offset}")]
    Inflate {
        /// Offset of the blob.
        offset: u64,
        /// Underlying decompression error.
        #[source]
        source: io::Error,
    },
    /// The XML tokenizer rejected the input.
    #[error("malformed XML near byte {offset}")]
    Xml {
        /// Reader position when the error was raised.
        offset: u64,
        /// Underlying tokenizer error.
        #[source]
        source: quick_xml::Error,
    },
}

impl DecodeError {
    pub(crate) fn corrupt(offset: u64, reason: impl Into<String>) -> Self {
        Self::CorruptInput {
            offset,
            reason: reason.into(),
        }
    }

    /// Lift a wire error raised inside the structure starting at `base`.
    pub(crate) fn from_wire(base: u64, err: WireError) -> Self {
        match err {
            WireError::TruncatedInput { offset, .. } => Self::TruncatedInput {
                offset: base + offset as u64,
            },
            WireError::CorruptInput { offset, reason } => {
                Self::corrupt(base + offset as u64, reason)
            }
        }
    }
}

/// Receiver of decoded primitives.
///
/// Returning [`ControlFlow::Break`] abandons the rest of the current unit;
/// the decoder then reports [`UnitOutcome::Interrupted`].
pub trait PrimitiveSink {
    /// A batch of nodes, in file order.
    fn notify_nodes(&mut self, nodes: &[RawNode]) -> ControlFlow<()>;

    /// One way.
    fn notify_way(&mut self, way: RawWay) -> ControlFlow<()>;

    /// One relation.
    fn notify_relation(&mut self, relation: RawRelation) -> ControlFlow<()>;

    /// The file's declared extent.
    fn notify_bounds(&mut self, bounds: Bounds) -> ControlFlow<()>;
}

/// Result of processing one unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitOutcome {
    /// A unit was consumed and more input remains.
    Decoded,
    /// The sink stopped the unit early.
    Interrupted,
    /// The input is exhausted.
    Finished,
}

/// Incremental decoder over one input.
pub trait BlockDecoder {
    /// Decode the next unit, reporting primitives to `sink`.
    ///
    /// # Errors
    /// Returns a [`DecodeError`] on I/O failure or malformed input. Errors
    /// are fatal for the pass.
    fn process_unit(&mut self, sink: &mut dyn PrimitiveSink) -> Result<UnitOutcome, DecodeError>;

    /// Return to the start of the input.
    ///
    /// # Errors
    /// Returns [`DecodeError::Io`] when the source cannot seek.
    fn rewind(&mut self) -> Result<(), DecodeError>;

    /// Bytes of input consumed so far.
    fn bytes_consumed(&self) -> u64;

    /// Format handled by this decoder.
    fn format(&self) -> InputFormat;
}
