//! Resolved features and the collections they are emitted into.

use std::{fmt, str::FromStr};

use thiserror::Error;

use crate::{Geometry, PrimitiveInfo, Tag};

/// Output collection a feature belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum Collection {
    /// Tagged nodes.
    Points,
    /// Open or non-area ways.
    Lines,
    /// `multilinestring` and `route` relations.
    MultiLineStrings,
    /// Multipolygon relations and standalone area ways.
    MultiPolygons,
    /// Every other relation type.
    OtherRelations,
}

impl Collection {
    /// All collections in round-robin order.
    pub const ALL: [Self; 5] = [
        Self::Points,
        Self::Lines,
        Self::MultiLineStrings,
        Self::MultiPolygons,
        Self::OtherRelations,
    ];

    /// Stable snake-case name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Points => "points",
            Self::Lines => "lines",
            Self::MultiLineStrings => "multilinestrings",
            Self::MultiPolygons => "multipolygons",
            Self::OtherRelations => "other_relations",
        }
    }

    /// Position within [`Collection::ALL`].
    #[must_use]
    pub const fn index(self) -> usize {
        match self {
            Self::Points => 0,
            Self::Lines => 1,
            Self::MultiLineStrings => 2,
            Self::MultiPolygons => 3,
            Self::OtherRelations => 4,
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Error returned when parsing an unknown collection name.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("unknown collection {0:?}; expected one of points, lines, multilinestrings, multipolygons, other_relations")]
pub struct ParseCollectionError(pub String);

impl FromStr for Collection {
    type Err = ParseCollectionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|collection| collection.name() == s)
            .ok_or_else(|| ParseCollectionError(s.to_owned()))
    }
}

/// A resolved feature ready for downstream consumption.
#[derive(Debug, Clone, PartialEq)]
pub struct Feature {
    /// Destination collection.
    pub collection: Collection,
    /// Id of the source node, way or relation.
    pub id: i64,
    /// Tags surfaced onto the feature.
    pub tags: Vec<Tag>,
    /// Provenance of the source primitive.
    pub info: Option<PrimitiveInfo>,
    /// Reconstructed geometry.
    pub geometry: Geometry,
    /// Whether the source way was classified as an area.
    pub is_area: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    fn names_round_trip_through_from_str() {
        for collection in Collection::ALL {
            assert_eq!(collection.name().parse::<Collection>(), Ok(collection));
            assert_eq!(Collection::ALL.get(collection.index()), Some(&collection));
        }
    }

    #[rstest]
    fn unknown_names_are_rejected() {
        let err = "polygons".parse::<Collection>().expect_err("unknown name");
        assert_eq!(err, ParseCollectionError("polygons".into()));
    }
}
