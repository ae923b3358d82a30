//! Streaming OSM decoding for the osmweave toolkit.
//!
//! Responsibilities:
//! - Decode OSM PBF and OSM XML into the primitive model of
//!   `osmweave-core`.
//! - Index node positions and persist ways so that ways and relations can
//!   be resolved into geometries.
//! - Drive a pull-based pass that emits features per collection.
//!
//! Boundaries:
//! - No output formats live here; callers serialise [`Feature`]s themselves.
//! - Storage is local: in memory first, temporary files once budgets are
//!   exceeded.
//!
//! Invariants:
//! - One [`OsmStream`] owns all of its pass state; nothing is global.
//! - Work happens only inside calls to the stream.
//!
//! [`Feature`]: osmweave_core::Feature

pub mod config;
pub mod decoder;
pub mod driver;
pub mod index;
pub mod relations;
pub mod scratch;
mod stats;
pub mod ways;

pub use config::DecoderConfig;
pub use decoder::{InputFormat, decoder_for, open_decoder};
pub use driver::{Advance, OsmStream, StreamError};
pub use stats::StreamStats;
