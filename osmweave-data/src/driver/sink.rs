//! Sinks that receive decoder callbacks on behalf of the stream.

use std::ops::ControlFlow;

use osmweave_core::{
    Bounds, Collection, CoordinatePair, Feature, Geometry, RawNode, RawRelation, RawWay,
};

use super::{StreamError, Wants};
use crate::{
    decoder::PrimitiveSink,
    index::NodeStore,
    relations::{RelationKind, RelationResolver},
    scratch::ScratchDb,
    stats::StreamStats,
    ways::{WayResolver, has_significant_tags},
};

/// Routes one unit's primitives through the index and resolvers.
///
/// Failures cannot cross the callback boundary, so the first error is
/// parked in `error` and the unit is interrupted.
pub(super) struct PassSink<'a> {
    pub wants: Wants,
    pub report_all_nodes: bool,
    pub attributes: bool,
    pub nodes: &'a mut dyn NodeStore,
    pub scratch: &'a mut ScratchDb,
    pub ways: &'a mut WayResolver,
    pub relations: &'a RelationResolver,
    pub stats: &'a mut StreamStats,
    pub extent: &'a mut Option<Bounds>,
    pub out: Vec<Feature>,
    pub error: Option<StreamError>,
}

impl PassSink<'_> {
    fn fail(&mut self, err: impl Into<StreamError>) -> ControlFlow<()> {
        self.error = Some(err.into());
        ControlFlow::Break(())
    }

    fn flush_ways(&mut self) -> ControlFlow<()> {
        match self
            .ways
            .flush(&mut *self.nodes, &mut *self.scratch, &mut self.out, &mut *self.stats)
        {
            Ok(()) => ControlFlow::Continue(()),
            Err(err) => self.fail(err),
        }
    }

    fn point(&self, node: &RawNode) -> Feature {
        Feature {
            collection: Collection::Points,
            id: node.id,
            tags: node.tags.clone(),
            info: node.info.clone().filter(|_| self.attributes),
            geometry: Geometry::Point(node.coord().into()),
            is_area: false,
        }
    }
}

impl PrimitiveSink for PassSink<'_> {
    fn notify_nodes(&mut self, nodes: &[RawNode]) -> ControlFlow<()> {
        self.stats.nodes += nodes.len() as u64;
        let index = self.wants.geometry();
        let points = self.wants.has(Collection::Points);
        for node in nodes {
            if index
                && let Err(err) = self
                    .nodes
                    .put(node.id, CoordinatePair::from_degrees(node.lon, node.lat))
            {
                return self.fail(err);
            }
            if points && (self.report_all_nodes || has_significant_tags(&node.tags)) {
                let feature = self.point(node);
                self.out.push(feature);
            }
        }
        ControlFlow::Continue(())
    }

    fn notify_way(&mut self, way: RawWay) -> ControlFlow<()> {
        self.stats.ways += 1;
        if !self.wants.geometry() {
            return ControlFlow::Continue(());
        }
        if self.ways.accept(way, self.stats) {
            return self.flush_ways();
        }
        ControlFlow::Continue(())
    }

    fn notify_relation(&mut self, relation: RawRelation) -> ControlFlow<()> {
        self.stats.relations += 1;
        if !self.wants.relations() {
            return ControlFlow::Continue(());
        }
        if !self.ways.batch().is_empty() {
            self.flush_ways()?;
        }
        let kind = RelationKind::classify(&relation.tags);
        if !self.wants.has(kind.collection()) {
            return ControlFlow::Continue(());
        }
        let resolved = self.relations.resolve(
            relation,
            kind,
            self.ways.dictionary(),
            &mut *self.nodes,
            &mut *self.scratch,
            &mut *self.stats,
        );
        match resolved {
            Ok(Some(feature)) => {
                self.out.push(feature);
                ControlFlow::Continue(())
            }
            Ok(None) => ControlFlow::Continue(()),
            Err(err) => self.fail(err),
        }
    }

    fn notify_bounds(&mut self, bounds: Bounds) -> ControlFlow<()> {
        if self.extent.is_none() {
            *self.extent = Some(bounds);
        }
        ControlFlow::Continue(())
    }
}

/// Looks for declared bounds ahead of the first primitive.
#[derive(Debug, Default)]
pub(super) struct ExtentSink {
    pub bounds: Option<Bounds>,
    pub settled: bool,
}

impl ExtentSink {
    fn settle(&mut self) -> ControlFlow<()> {
        self.settled = true;
        ControlFlow::Break(())
    }
}

impl PrimitiveSink for ExtentSink {
    fn notify_nodes(&mut self, nodes: &[RawNode]) -> ControlFlow<()> {
        if nodes.is_empty() {
            ControlFlow::Continue(())
        } else {
            self.settle()
        }
    }

    fn notify_way(&mut self, _way: RawWay) -> ControlFlow<()> {
        self.settle()
    }

    fn notify_relation(&mut self, _relation: RawRelation) -> ControlFlow<()> {
        self.settle()
    }

    fn notify_bounds(&mut self, bounds: Bounds) -> ControlFlow<()> {
        self.bounds = Some(bounds);
        self.settle()
    }
}
