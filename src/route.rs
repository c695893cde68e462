use serde::Serialize;

use crate::geo::{distance_meters, GeoPoint};

/// One delivery stop. `stop_index` is its zero-based position in the manifest.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Waypoint {
    pub point: GeoPoint,
    pub stop_index: usize,
}

impl Waypoint {
    pub fn new(point: GeoPoint, stop_index: usize) -> Self {
        Self { point, stop_index }
    }

    /// One-based number used in operator messages.
    pub fn number(&self) -> usize {
        self.stop_index + 1
    }
}

/// Orders stops by greedy nearest neighbour starting at `start`.
///
/// Equidistant candidates resolve to the one listed first in `stops`. The
/// result is not globally optimal; it is O(n²), fine for small manifests.
pub fn optimize(start: GeoPoint, stops: Vec<Waypoint>) -> Vec<Waypoint> {
    let mut remaining = stops;
    let mut route = Vec::with_capacity(remaining.len());
    let mut current = start;

    while !remaining.is_empty() {
        let mut closest = 0;
        let mut min_dist = f64::INFINITY;
        for (idx, stop) in remaining.iter().enumerate() {
            let dist = distance_meters(&current, &stop.point);
            if dist < min_dist {
                min_dist = dist;
                closest = idx;
            }
        }

        let next = remaining.remove(closest);
        current = next.point;
        route.push(next);
    }

    route
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::METERS_PER_DEGREE;

    fn start() -> GeoPoint {
        GeoPoint::new(-35.0, 149.0, 0.0)
    }

    fn offset(north_m: f64, east_m: f64) -> GeoPoint {
        GeoPoint::new(
            -35.0 + north_m / METERS_PER_DEGREE,
            149.0 + east_m / METERS_PER_DEGREE,
            20.0,
        )
    }

    #[test]
    fn empty_manifest_yields_empty_route() {
        assert!(optimize(start(), Vec::new()).is_empty());
    }

    #[test]
    fn single_stop_is_returned_unchanged() {
        let stop = Waypoint::new(offset(300.0, 0.0), 0);
        assert_eq!(optimize(start(), vec![stop]), vec![stop]);
    }

    #[test]
    fn nearer_stop_goes_first() {
        let far = Waypoint::new(offset(500.0, 0.0), 0);
        let near = Waypoint::new(offset(10.0, 0.0), 1);
        assert_eq!(optimize(start(), vec![far, near]), vec![near, far]);
    }

    #[test]
    fn chains_from_previous_stop_not_from_start() {
        // From start, a (100 m N) is closest; from a, c (100 m N of a) beats b.
        let a = Waypoint::new(offset(100.0, 0.0), 0);
        let b = Waypoint::new(offset(0.0, -150.0), 1);
        let c = Waypoint::new(offset(200.0, 0.0), 2);
        let route = optimize(start(), vec![b, c, a]);
        assert_eq!(route, vec![a, c, b]);
    }

    #[test]
    fn ties_keep_manifest_order() {
        // Two parcels for the same address.
        let first = Waypoint::new(offset(0.0, 100.0), 0);
        let second = Waypoint::new(offset(0.0, 100.0), 1);
        let route = optimize(start(), vec![first, second]);
        assert_eq!(route[0].stop_index, 0);

        let route = optimize(start(), vec![second, first]);
        assert_eq!(route[0].stop_index, 1);
    }

    #[test]
    fn output_is_a_permutation_of_input() {
        let stops: Vec<Waypoint> = (0..8)
            .map(|i| {
                let f = i as f64;
                Waypoint::new(offset(f * 37.0 - 120.0, (f * 53.0) % 170.0 - 60.0), i)
            })
            .collect();

        let route = optimize(start(), stops.clone());
        assert_eq!(route.len(), stops.len());

        let mut seen: Vec<usize> = route.iter().map(|w| w.stop_index).collect();
        seen.sort_unstable();
        assert_eq!(seen, (0..8).collect::<Vec<_>>());
        for stop in &stops {
            assert!(route.contains(stop));
        }
    }
}
