//! Sorting closed rings into polygons with holes.

use geo::{
    Area, CoordinatePosition, LineString, Orient, Polygon, coordinate_position::CoordPos,
    orient::Direction,
};

struct Shell {
    outline: Polygon<f64>,
    holes: Vec<Polygon<f64>>,
}

/// Whether every vertex of `ring` lies in or on `outer`, with at least one
/// strictly inside.
fn lies_within(outer: &Polygon<f64>, ring: &LineString<f64>) -> bool {
    let mut inside = false;
    for coord in ring.coords() {
        match outer.coordinate_position(coord) {
            CoordPos::Outside => return false,
            CoordPos::Inside => inside = true,
            CoordPos::OnBoundary => {}
        }
    }
    inside
}

/// Arrange `rings` into polygons.
///
/// Rings are placed largest first. A ring inside an already placed
/// exterior becomes a hole of the smallest such exterior, unless it also
/// lies inside one of that exterior's holes, in which case it starts a new
/// polygon (an island). Exteriors come out counter-clockwise and holes
/// clockwise.
#[must_use]
pub fn organize_polygons(rings: Vec<LineString<f64>>) -> Vec<Polygon<f64>> {
    let mut sized: Vec<(f64, Polygon<f64>)> = rings
        .into_iter()
        .map(|ring| {
            let outline = Polygon::new(ring, Vec::new());
            (outline.unsigned_area(), outline)
        })
        .collect();
    sized.sort_by(|a, b| b.0.total_cmp(&a.0));

    let mut shells: Vec<Shell> = Vec::new();
    for (_, outline) in sized {
        let parent = shells
            .iter()
            .rposition(|shell| lies_within(&shell.outline, outline.exterior()));
        match parent.and_then(|index| shells.get_mut(index)) {
            Some(shell)
                if !shell
                    .holes
                    .iter()
                    .any(|hole| lies_within(hole, outline.exterior())) =>
            {
                shell.holes.push(outline);
            }
            _ => shells.push(Shell {
                outline,
                holes: Vec::new(),
            }),
        }
    }

    shells
        .into_iter()
        .map(|shell| {
            let (exterior, _) = shell.outline.into_inner();
            let interiors = shell
                .holes
                .into_iter()
                .map(|hole| hole.into_inner().0)
                .collect();
            Polygon::new(exterior, interiors).orient(Direction::Default)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::Winding;
    use rstest::rstest;

    fn square(min: f64, max: f64) -> LineString<f64> {
        LineString::from(vec![(min, min), (max, min), (max, max), (min, max), (min, min)])
    }

    #[rstest]
    #[expect(clippy::float_arithmetic, reason = "area tolerance check")]
    fn inner_rings_become_holes() {
        let polygons = organize_polygons(vec![square(2.0, 4.0), square(0.0, 10.0)]);
        let [polygon] = polygons.as_slice() else {
            panic!("expected one polygon, got {polygons:?}");
        };
        assert_eq!(polygon.interiors().len(), 1);
        assert!((polygon.unsigned_area() - 96.0).abs() < 1e-9);
        assert!(polygon.exterior().is_ccw());
        assert!(polygon.interiors()[0].is_cw());
    }

    #[rstest]
    fn disjoint_rings_stay_separate() {
        let polygons = organize_polygons(vec![square(0.0, 1.0), square(5.0, 6.0)]);
        assert_eq!(polygons.len(), 2);
        assert!(polygons.iter().all(|polygon| polygon.interiors().is_empty()));
    }

    #[rstest]
    fn islands_inside_holes_are_new_polygons() {
        let polygons = organize_polygons(vec![
            square(0.0, 10.0),
            square(2.0, 8.0),
            square(4.0, 6.0),
        ]);
        assert_eq!(polygons.len(), 2);
        assert_eq!(polygons[0].interiors().len(), 1);
        assert!(polygons[1].interiors().is_empty());
    }

    #[rstest]
    fn holes_go_to_the_smallest_enclosing_shell() {
        let polygons = organize_polygons(vec![
            square(0.0, 10.0),
            square(1.0, 9.0),
            square(3.0, 7.0),
            square(4.0, 5.0),
        ]);
        // 0-10 holds hole 1-9; 3-7 is an island holding hole 4-5.
        assert_eq!(polygons.len(), 2);
        assert_eq!(polygons[1].interiors().len(), 1);
    }
}
