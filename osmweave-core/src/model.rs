//! Primitive records produced by the block decoders.
//!
//! These mirror the OSM data model: nodes carry a position, ways reference
//! nodes by id, and relations group typed members under roles. Tags keep
//! their source order so duplicate keys resolve to the first occurrence.

use geo::{Coord, Rect};

/// A single `key=value` tag.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Tag {
    /// Tag key.
    pub key: String,
    /// Tag value.
    pub value: String,
}

impl Tag {
    /// Construct a tag from anything string-like.
    ///
    /// # Examples
    /// ```
    /// use osmweave_core::Tag;
    ///
    /// let tag = Tag::new("building", "yes");
    /// assert_eq!(tag.key, "building");
    /// ```
    #[must_use]
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Look up the value of `key`, returning the first match.
///
/// # Examples
/// ```
/// use osmweave_core::{Tag, find_tag};
///
/// let tags = [Tag::new("type", "multipolygon"), Tag::new("type", "route")];
/// assert_eq!(find_tag(&tags, "type"), Some("multipolygon"));
/// assert_eq!(find_tag(&tags, "name"), None);
/// ```
#[must_use]
pub fn find_tag<'a>(tags: &'a [Tag], key: &str) -> Option<&'a str> {
    tags.iter()
        .find(|tag| tag.key == key)
        .map(|tag| tag.value.as_str())
}

/// Edit timestamp attached to a primitive.
///
/// Binary blocks carry an epoch integer while the text format carries the
/// literal attribute; the two never coexist.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Timestamp {
    /// Seconds since the Unix epoch.
    Epoch(i64),
    /// Unparsed timestamp text, usually ISO 8601.
    Raw(String),
}

/// Optional provenance for a primitive.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PrimitiveInfo {
    /// Object version.
    pub version: Option<i32>,
    /// Changeset that last touched the object.
    pub changeset: Option<i64>,
    /// Author id.
    pub uid: Option<i32>,
    /// Author display name.
    pub user: Option<String>,
    /// Edit time.
    pub timestamp: Option<Timestamp>,
    /// Historical visibility flag.
    pub visible: Option<bool>,
}

impl PrimitiveInfo {
    /// Whether no field is populated.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }
}

/// A node: a tagged point.
#[derive(Debug, Clone, PartialEq)]
pub struct RawNode {
    /// Node id.
    pub id: i64,
    /// Longitude in decimal degrees.
    pub lon: f64,
    /// Latitude in decimal degrees.
    pub lat: f64,
    /// Tags in source order.
    pub tags: Vec<Tag>,
    /// Provenance, when present.
    pub info: Option<PrimitiveInfo>,
}

impl RawNode {
    /// Node position as a `geo` coordinate.
    #[must_use]
    pub const fn coord(&self) -> Coord<f64> {
        Coord {
            x: self.lon,
            y: self.lat,
        }
    }
}

/// A way: an ordered list of node references.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawWay {
    /// Way id.
    pub id: i64,
    /// Referenced node ids in order.
    pub refs: Vec<i64>,
    /// Tags in source order.
    pub tags: Vec<Tag>,
    /// Provenance, when present.
    pub info: Option<PrimitiveInfo>,
}

impl RawWay {
    /// Whether the first and last references coincide.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.refs.len() >= 2 && self.refs.first() == self.refs.last()
    }
}

/// Kind of primitive a relation member points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum MemberType {
    /// A node member.
    Node,
    /// A way member.
    Way,
    /// A nested relation.
    Relation,
}

impl MemberType {
    /// Parse the text-format `type` attribute.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "node" => Some(Self::Node),
            "way" => Some(Self::Way),
            "relation" => Some(Self::Relation),
            _ => None,
        }
    }

    /// Map the binary-format member type code.
    #[must_use]
    pub const fn from_code(code: u64) -> Option<Self> {
        match code {
            0 => Some(Self::Node),
            1 => Some(Self::Way),
            2 => Some(Self::Relation),
            _ => None,
        }
    }
}

/// A relation member.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Member {
    /// Id of the referenced primitive.
    pub id: i64,
    /// Role string, possibly empty.
    pub role: String,
    /// Kind of the referenced primitive.
    pub kind: MemberType,
}

/// A relation: a typed list of members.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawRelation {
    /// Relation id.
    pub id: i64,
    /// Members in order.
    pub members: Vec<Member>,
    /// Tags in source order.
    pub tags: Vec<Tag>,
    /// Provenance, when present.
    pub info: Option<PrimitiveInfo>,
}

/// Bounding box announced by a file header.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Bounds {
    /// Western edge.
    pub min_lon: f64,
    /// Southern edge.
    pub min_lat: f64,
    /// Eastern edge.
    pub max_lon: f64,
    /// Northern edge.
    pub max_lat: f64,
}

impl Bounds {
    /// Convert to a normalised `geo` rectangle.
    #[must_use]
    pub fn to_rect(self) -> Rect<f64> {
        Rect::new(
            Coord {
                x: self.min_lon,
                y: self.min_lat,
            },
            Coord {
                x: self.max_lon,
                y: self.max_lat,
            },
        )
    }
}
