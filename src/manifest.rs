use crate::error::MissionError;
use crate::geo::GeoPoint;
use crate::route::Waypoint;

pub const USAGE: &str = "Drone System Online.\nSend coordinates as: 'LAT,LON'\nExample: -35.362, 149.164\nSend 'stop' to abort and return to launch.";

/// Parsed operator command.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Command {
    Help,
    Abort,
    /// Pickup location; altitude is filled in by the flight plan.
    Deliver { pickup: GeoPoint },
}

pub fn parse_command(text: &str) -> Result<Command, MissionError> {
    let normalized = text.trim().to_lowercase();
    match normalized.as_str() {
        "stop" | "/stop" | "abort" => return Ok(Command::Abort),
        "help" | "/help" | "start" | "/start" => return Ok(Command::Help),
        _ => {}
    }

    let compact: String = normalized.chars().filter(|c| !c.is_whitespace()).collect();
    let invalid = || {
        MissionError::input(format!(
            "Invalid coordinates '{}'. Expected 'LAT,LON'.",
            text.trim()
        ))
    };

    let (lat, lon) = compact.split_once(',').ok_or_else(invalid)?;
    let lat: f64 = lat.parse().map_err(|_| invalid())?;
    let lon: f64 = lon.parse().map_err(|_| invalid())?;

    if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lon) {
        return Err(MissionError::input(format!(
            "Coordinates out of range: {}, {}",
            lat, lon
        )));
    }

    Ok(Command::Deliver {
        pickup: GeoPoint::new(lat, lon, 0.0),
    })
}

/// Parses a scanned manifest: `lat,lon,alt` stops separated by `;`.
///
/// Characters outside `[0-9,;.-]` are stripped first. Stops with fewer than
/// three fields are dropped; a stop whose first three fields are not numbers
/// invalidates the whole manifest.
pub fn parse_manifest(raw: Option<&str>) -> Result<Vec<Waypoint>, MissionError> {
    let cleaned: String = raw
        .unwrap_or_default()
        .chars()
        .filter(|&c| c.is_ascii_digit() || matches!(c, ',' | ';' | '.' | '-'))
        .collect();

    if cleaned.is_empty() {
        return Err(MissionError::input("Manifest scan failed."));
    }

    let mut stops = Vec::new();
    for stop in cleaned.split(';') {
        let parts: Vec<&str> = stop.split(',').collect();
        if parts.len() < 3 {
            continue;
        }
        let mut fields = [0.0_f64; 3];
        for (field, part) in fields.iter_mut().zip(&parts) {
            *field = part
                .parse()
                .map_err(|_| MissionError::input("Invalid manifest format."))?;
        }
        let index = stops.len();
        stops.push(Waypoint::new(
            GeoPoint::new(fields[0], fields[1], fields[2]),
            index,
        ));
    }

    if stops.is_empty() {
        return Err(MissionError::input("Manifest contains no delivery stops."));
    }
    Ok(stops)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_coordinate_command_with_spaces() {
        let cmd = parse_command(" -35.363, 149.165 ").unwrap();
        assert_eq!(
            cmd,
            Command::Deliver {
                pickup: GeoPoint::new(-35.363, 149.165, 0.0)
            }
        );
    }

    #[test]
    fn recognises_keywords() {
        assert_eq!(parse_command("STOP").unwrap(), Command::Abort);
        assert_eq!(parse_command("  stop\n").unwrap(), Command::Abort);
        assert_eq!(parse_command("/start").unwrap(), Command::Help);
        assert_eq!(parse_command("help").unwrap(), Command::Help);
    }

    #[test]
    fn rejects_malformed_coordinates() {
        for text in ["", "hello", "-35.3", "-35.3,149.1,20", "a,b", "95.0,10.0", "10,181"] {
            let err = parse_command(text).unwrap_err();
            assert!(matches!(err, MissionError::Input(_)), "{text}");
        }
    }

    #[test]
    fn parses_manifest_in_order() {
        let stops = parse_manifest(Some("-35.36,149.16,20;-35.40,149.20,20")).unwrap();
        assert_eq!(stops.len(), 2);
        assert_eq!(stops[0].point, GeoPoint::new(-35.36, 149.16, 20.0));
        assert_eq!(stops[1].point, GeoPoint::new(-35.40, 149.20, 20.0));
        assert_eq!(stops[1].stop_index, 1);
    }

    #[test]
    fn strips_noise_and_drops_short_stops() {
        let raw = "STOP A: -35.36, 149.16, 20 ; -35.37,149.17 ;-35.38,149.18,15,x";
        let stops = parse_manifest(Some(raw)).unwrap();
        assert_eq!(stops.len(), 2);
        assert_eq!(stops[0].point, GeoPoint::new(-35.36, 149.16, 20.0));
        assert_eq!(stops[1].point, GeoPoint::new(-35.38, 149.18, 15.0));
        assert_eq!(stops[1].stop_index, 1);
    }

    #[test]
    fn missing_or_empty_scan_is_an_input_error() {
        assert!(matches!(parse_manifest(None), Err(MissionError::Input(_))));
        assert!(matches!(parse_manifest(Some("no digits")), Err(MissionError::Input(_))));
        assert!(matches!(parse_manifest(Some("1,2;3")), Err(MissionError::Input(_))));
    }

    #[test]
    fn unparseable_field_rejects_manifest() {
        let err = parse_manifest(Some("-35.3.6,149.16,20")).unwrap_err();
        assert!(matches!(err, MissionError::Input(_)));
    }
}
