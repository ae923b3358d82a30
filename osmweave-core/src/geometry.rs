//! Output geometries.
//!
//! [`Geometry`] is a closed sum type over the shapes the resolvers can
//! produce. Downstream code matches it exhaustively rather than probing
//! runtime type tags.

use geo::{BoundingRect, Coord, LineString, Point, Polygon, Rect};

/// A position sampled along a track, with an optional epoch timestamp.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrackPoint {
    /// Sampled position.
    pub coord: Coord<f64>,
    /// Seconds since the Unix epoch, when known.
    pub timestamp: Option<i64>,
}

/// An ordered sequence of timed positions.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Track {
    /// Samples in travel order.
    pub points: Vec<TrackPoint>,
}

impl Track {
    /// The track path without timestamps.
    #[must_use]
    pub fn to_line_string(&self) -> LineString<f64> {
        self.points.iter().map(|point| point.coord).collect()
    }
}

/// Geometry attached to an emitted feature.
#[derive(Debug, Clone, PartialEq)]
pub enum Geometry {
    /// A single position.
    Point(Point<f64>),
    /// An open polyline.
    LineString(LineString<f64>),
    /// A closed ring that is not (yet) part of a polygon.
    LinearRing(LineString<f64>),
    /// A polygon with optional holes.
    Polygon(Polygon<f64>),
    /// A heterogeneous or homogeneous collection.
    MultiGeometry(Vec<Geometry>),
    /// A timed path.
    Track(Track),
    /// Several timed paths.
    MultiTrack(Vec<Track>),
}

/// Discriminant of a [`Geometry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeometryKind {
    /// [`Geometry::Point`].
    Point,
    /// [`Geometry::LineString`].
    LineString,
    /// [`Geometry::LinearRing`].
    LinearRing,
    /// [`Geometry::Polygon`].
    Polygon,
    /// [`Geometry::MultiGeometry`].
    MultiGeometry,
    /// [`Geometry::Track`].
    Track,
    /// [`Geometry::MultiTrack`].
    MultiTrack,
}

impl Geometry {
    /// Discriminant of this geometry.
    #[must_use]
    pub const fn kind(&self) -> GeometryKind {
        match self {
            Self::Point(_) => GeometryKind::Point,
            Self::LineString(_) => GeometryKind::LineString,
            Self::LinearRing(_) => GeometryKind::LinearRing,
            Self::Polygon(_) => GeometryKind::Polygon,
            Self::MultiGeometry(_) => GeometryKind::MultiGeometry,
            Self::Track(_) => GeometryKind::Track,
            Self::MultiTrack(_) => GeometryKind::MultiTrack,
        }
    }

    /// Collect polygons into a multi-part geometry.
    #[must_use]
    pub fn multi_polygon(polygons: Vec<Polygon<f64>>) -> Self {
        Self::MultiGeometry(polygons.into_iter().map(Self::Polygon).collect())
    }

    /// Collect polylines into a multi-part geometry.
    #[must_use]
    pub fn multi_line_string(lines: Vec<LineString<f64>>) -> Self {
        Self::MultiGeometry(lines.into_iter().map(Self::LineString).collect())
    }

    /// Total number of vertices, including those of nested members.
    #[must_use]
    pub fn coordinate_count(&self) -> usize {
        match self {
            Self::Point(_) => 1,
            Self::LineString(line) | Self::LinearRing(line) => line.0.len(),
            Self::Polygon(polygon) => {
                polygon.exterior().0.len()
                    + polygon
                        .interiors()
                        .iter()
                        .map(|ring| ring.0.len())
                        .sum::<usize>()
            }
            Self::MultiGeometry(members) => members.iter().map(Self::coordinate_count).sum(),
            Self::Track(track) => track.points.len(),
            Self::MultiTrack(tracks) => tracks.iter().map(|track| track.points.len()).sum(),
        }
    }

    /// Axis-aligned envelope, or `None` for empty geometries.
    #[must_use]
    pub fn bounding_rect(&self) -> Option<Rect<f64>> {
        match self {
            Self::Point(point) => Some(point.bounding_rect()),
            Self::LineString(line) | Self::LinearRing(line) => line.bounding_rect(),
            Self::Polygon(polygon) => polygon.bounding_rect(),
            Self::MultiGeometry(members) => members
                .iter()
                .filter_map(Self::bounding_rect)
                .reduce(merge_rects),
            Self::Track(track) => track.to_line_string().bounding_rect(),
            Self::MultiTrack(tracks) => tracks
                .iter()
                .filter_map(|track| track.to_line_string().bounding_rect())
                .reduce(merge_rects),
        }
    }
}

fn merge_rects(left: Rect<f64>, right: Rect<f64>) -> Rect<f64> {
    Rect::new(
        Coord {
            x: left.min().x.min(right.min().x),
            y: left.min().y.min(right.min().y),
        },
        Coord {
            x: left.max().x.max(right.max().x),
            y: left.max().y.max(right.max().y),
        },
    )
}

#[cfg(feature = "serde")]
mod geojson {
    use geo::{Coord, LineString, Polygon};
    use serde_json::{Value, json};

    use super::{Geometry, Track};

    fn position(coord: Coord<f64>) -> Value {
        json!([coord.x, coord.y])
    }

    fn positions(line: &LineString<f64>) -> Value {
        Value::Array(line.coords().copied().map(position).collect())
    }

    fn rings(polygon: &Polygon<f64>) -> Value {
        let mut all = vec![positions(polygon.exterior())];
        all.extend(polygon.interiors().iter().map(positions));
        Value::Array(all)
    }

    fn track_positions(track: &Track) -> Value {
        positions(&track.to_line_string())
    }

    impl Geometry {
        /// Render as a GeoJSON geometry object.
        ///
        /// Homogeneous collections of polygons or lines collapse into the
        /// matching GeoJSON multi-type; anything else becomes a
        /// `GeometryCollection`.
        ///
        /// # Examples
        /// ```
        /// use geo::{LineString, Polygon};
        /// use osmweave_core::Geometry;
        ///
        /// let ring = LineString::from(vec![(0.0, 0.0), (1.0, 0.0), (1.0, 1.0), (0.0, 0.0)]);
        /// let geometry = Geometry::multi_polygon(vec![Polygon::new(ring, vec![])]);
        /// assert_eq!(geometry.to_geojson()["type"], "MultiPolygon");
        /// ```
        #[must_use]
        pub fn to_geojson(&self) -> Value {
            match self {
                Self::Point(point) => json!({
                    "type": "Point",
                    "coordinates": position(point.0),
                }),
                Self::LineString(line) | Self::LinearRing(line) => json!({
                    "type": "LineString",
                    "coordinates": positions(line),
                }),
                Self::Polygon(polygon) => json!({
                    "type": "Polygon",
                    "coordinates": rings(polygon),
                }),
                Self::MultiGeometry(members) => collection_geojson(members),
                Self::Track(track) => json!({
                    "type": "LineString",
                    "coordinates": track_positions(track),
                }),
                Self::MultiTrack(tracks) => json!({
                    "type": "MultiLineString",
                    "coordinates": Value::Array(tracks.iter().map(track_positions).collect()),
                }),
            }
        }
    }

    fn collection_geojson(members: &[Geometry]) -> Value {
        let polygons: Option<Vec<Value>> = members
            .iter()
            .map(|member| match member {
                Geometry::Polygon(polygon) => Some(rings(polygon)),
                _ => None,
            })
            .collect();
        if let Some(coordinates) = polygons.filter(|all| !all.is_empty()) {
            return json!({"type": "MultiPolygon", "coordinates": coordinates});
        }
        let lines: Option<Vec<Value>> = members
            .iter()
            .map(|member| match member {
                Geometry::LineString(line) => Some(positions(line)),
                _ => None,
            })
            .collect();
        if let Some(coordinates) = lines.filter(|all| !all.is_empty()) {
            return json!({"type": "MultiLineString", "coordinates": coordinates});
        }
        json!({
            "type": "GeometryCollection",
            "geometries": members.iter().map(Geometry::to_geojson).collect::<Vec<_>>(),
        })
    }
}
