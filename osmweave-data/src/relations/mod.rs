//! Relation resolution.
//!
//! Relations are resolved one at a time against the ways persisted by
//! [`WayResolver`](crate::ways::WayResolver). Multipolygons and boundaries
//! reassemble their rings; route-like relations become multi-line
//! collections; everything else becomes a generic geometry collection.

use std::collections::HashMap;

use geo::Polygon;
use log::debug;
use osmweave_core::{
    Collection, CoordinatePair, Feature, Geometry, Member, MemberType, RawRelation, Tag, find_tag,
};

use crate::{
    index::NodeStore,
    scratch::ScratchDb,
    stats::StreamStats,
    ways::{EncodedWay, KeyDictionary, ResolveError, is_ignored_key, to_line_string},
};

mod organize;
mod rings;

pub use organize::organize_polygons;
pub use rings::{MIN_RING_POINTS, RingAssembly, assemble_rings};

/// Geometry family of a relation, taken from its `type` tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelationKind {
    /// `multipolygon` and `boundary`.
    MultiPolygon,
    /// `multilinestring` and `route`.
    MultiLineString,
    /// Any other type.
    Generic,
}

impl RelationKind {
    /// Classify by `type`; untyped relations are generic collections.
    #[must_use]
    pub fn classify(tags: &[Tag]) -> Self {
        match find_tag(tags, "type") {
            Some("multipolygon" | "boundary") => Self::MultiPolygon,
            Some("multilinestring" | "route") => Self::MultiLineString,
            _ => Self::Generic,
        }
    }

    /// Output collection for this kind.
    #[must_use]
    pub const fn collection(self) -> Collection {
        match self {
            Self::MultiPolygon => Collection::MultiPolygons,
            Self::MultiLineString => Collection::MultiLineStrings,
            Self::Generic => Collection::OtherRelations,
        }
    }
}

fn is_subarea(member: &Member) -> bool {
    member.role == "subarea"
}

fn is_outer(member: &Member) -> bool {
    member.role == "outer" || member.role.is_empty()
}

fn closed(coords: &[CoordinatePair]) -> bool {
    coords.len() >= 2 && coords.first() == coords.last()
}

/// Builds features for relations and for standalone area ways.
#[derive(Debug, Clone, Copy)]
pub struct RelationResolver {
    attributes: bool,
}

impl RelationResolver {
    /// Create a resolver; `attributes` keeps provenance on features.
    #[must_use]
    pub const fn new(attributes: bool) -> Self {
        Self { attributes }
    }

    /// Resolve `relation` as `kind`.
    ///
    /// Returns `Ok(None)` when the relation yields nothing, which is
    /// counted in `stats` rather than reported as an error.
    ///
    /// # Errors
    /// Propagates storage failures and corrupt persisted ways.
    pub fn resolve(
        &self,
        relation: RawRelation,
        kind: RelationKind,
        dictionary: &KeyDictionary,
        nodes: &mut dyn NodeStore,
        scratch: &mut ScratchDb,
        stats: &mut StreamStats,
    ) -> Result<Option<Feature>, ResolveError> {
        let ways = fetch_way_members(&relation, dictionary, scratch)?;
        let feature = match kind {
            RelationKind::MultiPolygon => self.multipolygon(relation, &ways, scratch)?,
            RelationKind::MultiLineString | RelationKind::Generic => {
                self.collection(relation, kind, &ways, nodes)?
            }
        };
        if feature.is_none() {
            stats.unresolved_relations += 1;
        }
        Ok(feature)
    }

    fn multipolygon(
        &self,
        relation: RawRelation,
        ways: &HashMap<i64, EncodedWay>,
        scratch: &mut ScratchDb,
    ) -> Result<Option<Feature>, ResolveError> {
        let members: Vec<&Member> = relation
            .members
            .iter()
            .filter(|member| member.kind == MemberType::Way && !is_subarea(member))
            .collect();
        if let Some(missing) = members.iter().find(|member| !ways.contains_key(&member.id)) {
            debug!(
                "relation {}: way {} is unresolved; dropping multipolygon",
                relation.id, missing.id
            );
            return Ok(None);
        }

        let mut rings = Vec::new();
        let mut fragments = Vec::new();
        let mut outer_tags: Option<&[Tag]> = None;
        for member in &members {
            let Some(way) = ways.get(&member.id) else {
                continue;
            };
            if is_outer(member) && outer_tags.is_none() {
                outer_tags = Some(&way.tags);
            }
            if closed(&way.coords) {
                rings.push(way.coords.clone());
                if is_outer(member) {
                    scratch.remove_standalone(member.id)?;
                }
            } else {
                fragments.push(way.coords.clone());
            }
        }

        let assembly = assemble_rings(fragments);
        if assembly.unclosed > 0 {
            debug!(
                "relation {}: discarded {} unclosed ring fragment chains",
                relation.id, assembly.unclosed
            );
        }
        rings.extend(assembly.rings);
        rings.retain(|ring| ring.len() >= MIN_RING_POINTS);
        if rings.is_empty() {
            debug!("relation {}: no closed rings; dropping multipolygon", relation.id);
            return Ok(None);
        }

        let polygons = organize_polygons(rings.iter().map(|ring| to_line_string(ring)).collect());
        let mut tags = relation.tags;
        if let Some(outer) = outer_tags {
            for tag in outer {
                if !is_ignored_key(&tag.key) && find_tag(&tags, &tag.key).is_none() {
                    tags.push(tag.clone());
                }
            }
        }
        Ok(Some(Feature {
            collection: Collection::MultiPolygons,
            id: relation.id,
            tags,
            info: relation.info.filter(|_| self.attributes),
            geometry: Geometry::multi_polygon(polygons),
            is_area: true,
        }))
    }

    fn collection(
        &self,
        relation: RawRelation,
        kind: RelationKind,
        ways: &HashMap<i64, EncodedWay>,
        nodes: &mut dyn NodeStore,
    ) -> Result<Option<Feature>, ResolveError> {
        let generic = kind == RelationKind::Generic;
        let node_ids: Vec<i64> = relation
            .members
            .iter()
            .filter(|member| generic && member.kind == MemberType::Node)
            .map(|member| member.id)
            .collect();
        let positions = if node_ids.is_empty() {
            Vec::new()
        } else {
            nodes.lookup_many(&node_ids)?
        };

        let mut parts = Vec::new();
        let mut missing = 0_usize;
        for member in relation.members.iter().filter(|member| !is_subarea(member)) {
            match member.kind {
                MemberType::Way => match ways.get(&member.id) {
                    Some(way) if generic && way.is_area => {
                        let ring = to_line_string(&way.coords);
                        parts.push(Geometry::Polygon(Polygon::new(ring, Vec::new())));
                    }
                    Some(way) => parts.push(Geometry::LineString(to_line_string(&way.coords))),
                    None => missing += 1,
                },
                MemberType::Node if generic => {
                    match positions.binary_search_by_key(&member.id, |&(id, _)| id) {
                        Ok(index) => {
                            if let Some(&(_, coord)) = positions.get(index) {
                                parts.push(Geometry::Point(coord.to_coord().into()));
                            }
                        }
                        Err(_) => missing += 1,
                    }
                }
                MemberType::Node | MemberType::Relation => {}
            }
        }
        if missing > 0 {
            debug!("relation {}: {missing} members unresolved", relation.id);
        }
        if parts.is_empty() {
            debug!("relation {}: nothing resolved; dropping", relation.id);
            return Ok(None);
        }
        Ok(Some(Feature {
            collection: kind.collection(),
            id: relation.id,
            tags: relation.tags,
            info: relation.info.filter(|_| self.attributes),
            geometry: Geometry::MultiGeometry(parts),
            is_area: false,
        }))
    }

    /// Build multipolygon features for up to `limit` standalone area ways
    /// with ids above `after`.
    ///
    /// Returns the features and the last id visited, or `None` for the
    /// cursor once the candidates are exhausted.
    ///
    /// # Errors
    /// Propagates storage failures and corrupt persisted ways.
    pub fn standalone_page(
        &self,
        after: i64,
        limit: usize,
        dictionary: &KeyDictionary,
        scratch: &ScratchDb,
    ) -> Result<(Vec<Feature>, Option<i64>), ResolveError> {
        let ids = scratch.standalone_page(after, limit)?;
        let Some(&last) = ids.last() else {
            return Ok((Vec::new(), None));
        };
        let mut stored = scratch.fetch_ways(&ids)?;
        let mut features = Vec::with_capacity(ids.len());
        for id in ids {
            let Some(bytes) = stored.remove(&id) else {
                continue;
            };
            let way = EncodedWay::decode(&bytes, dictionary)
                .map_err(|source| ResolveError::CorruptWay { id, source })?;
            if way.coords.len() < MIN_RING_POINTS {
                continue;
            }
            features.push(Feature {
                collection: Collection::MultiPolygons,
                id,
                tags: way.tags,
                info: way.info.filter(|_| self.attributes),
                geometry: Geometry::multi_polygon(organize_polygons(vec![to_line_string(
                    &way.coords,
                )])),
                is_area: true,
            });
        }
        Ok((features, Some(last)))
    }
}

fn fetch_way_members(
    relation: &RawRelation,
    dictionary: &KeyDictionary,
    scratch: &ScratchDb,
) -> Result<HashMap<i64, EncodedWay>, ResolveError> {
    let mut ids: Vec<i64> = relation
        .members
        .iter()
        .filter(|member| member.kind == MemberType::Way && !is_subarea(member))
        .map(|member| member.id)
        .collect();
    ids.sort_unstable();
    ids.dedup();
    scratch
        .fetch_ways(&ids)?
        .into_iter()
        .map(|(id, bytes)| {
            EncodedWay::decode(&bytes, dictionary)
                .map(|way| (id, way))
                .map_err(|source| ResolveError::CorruptWay { id, source })
        })
        .collect()
}
