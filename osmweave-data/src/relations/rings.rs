//! Joining open way fragments into closed rings.

use osmweave_core::CoordinatePair;

/// Fewest positions in a usable ring, counting the closing repeat.
pub const MIN_RING_POINTS: usize = 4;

/// Outcome of [`assemble_rings`].
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RingAssembly {
    /// Closed rings with at least [`MIN_RING_POINTS`] positions.
    pub rings: Vec<Vec<CoordinatePair>>,
    /// Chains that could not be closed and were discarded.
    pub unclosed: usize,
}

fn is_closed(ring: &[CoordinatePair]) -> bool {
    ring.len() >= 2 && ring.first() == ring.last()
}

/// Merge `fragments` end to end into closed rings.
///
/// Each chain starts at the first unused fragment and grows at its tail.
/// The first unused fragment, in input order, whose start or end matches
/// the tail is appended, reversed when it matches by its end. Chains that
/// close with too few positions are dropped; chains that cannot close are
/// counted in [`RingAssembly::unclosed`].
///
/// # Examples
/// ```
/// use osmweave_core::CoordinatePair as P;
/// use osmweave_data::relations::assemble_rings;
///
/// let a = vec![P::new(0, 0), P::new(10, 0), P::new(10, 10)];
/// let b = vec![P::new(0, 0), P::new(0, 10), P::new(10, 10)];
/// let assembly = assemble_rings(vec![a, b]);
/// assert_eq!(assembly.rings.len(), 1);
/// assert_eq!(assembly.rings[0].len(), 5);
/// ```
#[must_use]
pub fn assemble_rings(fragments: Vec<Vec<CoordinatePair>>) -> RingAssembly {
    let mut used = vec![false; fragments.len()];
    let mut assembly = RingAssembly::default();

    for start in 0..fragments.len() {
        match used.get_mut(start) {
            Some(seen) if !*seen => *seen = true,
            _ => continue,
        }
        let Some(mut ring) = fragments.get(start).cloned() else {
            continue;
        };
        if ring.len() < 2 {
            continue;
        }

        while !is_closed(&ring) {
            let Some(&tail) = ring.last() else {
                break;
            };
            let next = fragments.iter().enumerate().find(|(index, fragment)| {
                used.get(*index).is_some_and(|seen| !seen)
                    && fragment.len() >= 2
                    && (fragment.first() == Some(&tail) || fragment.last() == Some(&tail))
            });
            let Some((index, fragment)) = next else {
                break;
            };
            if let Some(seen) = used.get_mut(index) {
                *seen = true;
            }
            if fragment.first() == Some(&tail) {
                ring.extend(fragment.iter().skip(1).copied());
            } else {
                ring.extend(fragment.iter().rev().skip(1).copied());
            }
        }

        if !is_closed(&ring) {
            assembly.unclosed += 1;
        } else if ring.len() >= MIN_RING_POINTS {
            assembly.rings.push(ring);
        }
    }
    assembly
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn path(points: &[(i32, i32)]) -> Vec<CoordinatePair> {
        points
            .iter()
            .map(|&(lon, lat)| CoordinatePair::new(lon, lat))
            .collect()
    }

    #[rstest]
    fn joins_three_fragments_with_reversal() {
        let assembly = assemble_rings(vec![
            path(&[(1, 1), (5, 1)]),
            path(&[(5, 5), (5, 1)]),
            path(&[(5, 5), (1, 5), (1, 1)]),
        ]);
        assert_eq!(assembly.unclosed, 0);
        assert_eq!(
            assembly.rings,
            vec![path(&[(1, 1), (5, 1), (5, 5), (1, 5), (1, 1)])]
        );
    }

    #[rstest]
    fn first_matching_fragment_wins() {
        // Both the second and third fragments continue from (5, 1).
        let assembly = assemble_rings(vec![
            path(&[(1, 1), (5, 1)]),
            path(&[(5, 1), (5, 5), (1, 1)]),
            path(&[(5, 1), (9, 9), (1, 1)]),
        ]);
        assert_eq!(assembly.rings.len(), 1);
        assert_eq!(assembly.rings[0], path(&[(1, 1), (5, 1), (5, 5), (1, 1)]));
        assert_eq!(assembly.unclosed, 1);
    }

    #[rstest]
    fn dangling_chains_are_counted() {
        let assembly = assemble_rings(vec![path(&[(1, 1), (2, 2)]), path(&[(3, 3), (4, 4)])]);
        assert!(assembly.rings.is_empty());
        assert_eq!(assembly.unclosed, 2);
    }

    #[rstest]
    fn degenerate_rings_are_dropped() {
        let assembly = assemble_rings(vec![path(&[(1, 1), (2, 2)]), path(&[(2, 2), (1, 1)])]);
        assert!(assembly.rings.is_empty());
        assert_eq!(assembly.unclosed, 0);
    }
}
