//! Core domain types for osmweave.
//!
//! This crate holds the pieces shared by every stage of the OSM decoding
//! pipeline: the protobuf wire cursor, the primitive model emitted by the
//! block decoders, fixed-point coordinates, the output geometry sum type, and
//! the feature records handed to downstream consumers.
#![forbid(unsafe_code)]

pub mod coord;
mod feature;
mod geometry;
mod mapping;
pub mod model;
pub mod wire;

#[cfg(feature = "test-support")]
pub mod test_support;

pub use coord::{CoordinatePair, is_valid_lon_lat, validated_coord};
pub use feature::{Collection, Feature, ParseCollectionError};
pub use geometry::{Geometry, GeometryKind, Track, TrackPoint};
#[cfg(feature = "serde")]
pub use mapping::JsonTagMapper;
pub use mapping::TagMapper;
pub use model::{
    Bounds, Member, MemberType, PrimitiveInfo, RawNode, RawRelation, RawWay, Tag, Timestamp,
    find_tag,
};
pub use wire::{WireCursor, WireError};
