use crate::geo::{distance_meters, GeoPoint};
use crate::route::Waypoint;

use super::SafetyVerdict;

/// Fails on the first stop farther than `radius_m` from `origin`.
/// A stop exactly on the boundary is allowed.
pub fn check(origin: GeoPoint, stops: &[Waypoint], radius_m: f64) -> SafetyVerdict {
    for stop in stops {
        let dist = distance_meters(&origin, &stop.point);
        if dist > radius_m {
            return SafetyVerdict::fail(format!(
                "Mission REJECTED. Stop #{} is too far ({}m).",
                stop.number(),
                dist as u64
            ));
        }
    }
    SafetyVerdict::pass(format!("All {} stops within {}m.", stops.len(), radius_m))
}
