//! Geofence Engine: a pure function from an aircraft set and a polygon set
//! to the list of matches, with DCA bearing/range annotation.

use geo::{EuclideanDistance, Intersects};
use geo_types::Geometry;

use crate::geo_registry::{contains_or_touches, PolygonFeature};
use crate::models::{Aircraft, DcaRadialRange, GeofenceMatch};
use crate::spatial::dca_radial_range;

/// Default tolerance (degrees) for line features that don't declare one.
pub const DEFAULT_LINE_TOLERANCE_DEG: f64 = 0.001;

/// Classifies `aircraft` against `features`, applying `altitude_ceiling_ft`
/// if given. First match wins per aircraft, in `features`' iteration order.
pub fn classify(
    aircraft: &[Aircraft],
    features: &[&PolygonFeature],
    altitude_ceiling_ft: Option<f64>,
) -> Vec<GeofenceMatch> {
    let mut matches = Vec::new();
    for craft in aircraft {
        if let Some(ceiling) = altitude_ceiling_ft {
            match craft.altitude_ft {
                None => continue,
                Some(alt) if alt > ceiling => continue,
                _ => {}
            }
        }

        let point = craft.point();
        for feature in features {
            if feature_matches(&feature.geometry, point, feature.properties.tolerance_or_default()) {
                let dca: DcaRadialRange = dca_radial_range(craft.latitude, craft.longitude);
                matches.push(GeofenceMatch {
                    aircraft: craft.clone(),
                    matched_props: feature.properties.clone(),
                    dca,
                });
                break;
            }
        }
    }
    matches
}

fn feature_matches(geometry: &Geometry<f64>, point: geo_types::Point<f64>, tolerance_deg: f64) -> bool {
    match geometry {
        Geometry::Polygon(_) | Geometry::MultiPolygon(_) => contains_or_touches(geometry, point),
        Geometry::LineString(line) => line.euclidean_distance(&point) <= tolerance_deg,
        Geometry::MultiLineString(lines) => lines
            .0
            .iter()
            .any(|l| l.euclidean_distance(&point) <= tolerance_deg),
        Geometry::Point(p) => p.euclidean_distance(&point) <= tolerance_deg,
        other => other.intersects(&point),
    }
}

/// Does `segment` (a straight line between two points) cross any feature in
/// `features`? Used by the P-56 tracker's segment-cross detection. Returns
/// the matched zone names, in load order, de-duplicated.
pub fn segment_crossed_zones(
    features: &[&PolygonFeature],
    from: (f64, f64),
    to: (f64, f64),
) -> Vec<String> {
    let segment = geo_types::Line::new(
        geo_types::Coord { x: from.1, y: from.0 },
        geo_types::Coord { x: to.1, y: to.0 },
    );
    let mut zones = Vec::new();
    for feature in features {
        if feature.geometry.intersects(&segment) {
            let name = feature.properties.zone_name();
            if !zones.contains(&name) {
                zones.push(name);
            }
        }
    }
    zones
}

/// Zones containing (or touching) `point`, in load order, de-duplicated.
pub fn zones_containing(features: &[&PolygonFeature], point: (f64, f64)) -> Vec<String> {
    let pt = geo_types::Point::new(point.1, point.0);
    let mut zones = Vec::new();
    for feature in features {
        if contains_or_touches(&feature.geometry, pt) {
            let name = feature.properties.zone_name();
            if !zones.contains(&name) {
                zones.push(name);
            }
        }
    }
    zones
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::FeatureProperties;
    use geo_types::{polygon, Geometry};

    fn square_feature(name: &str) -> PolygonFeature {
        let poly = polygon![
            (x: -77.1, y: 38.8),
            (x: -77.0, y: 38.8),
            (x: -77.0, y: 38.9),
            (x: -77.1, y: 38.9),
            (x: -77.1, y: 38.8),
        ];
        PolygonFeature {
            geometry: Geometry::Polygon(poly),
            properties: FeatureProperties {
                name: Some(name.to_string()),
                ..Default::default()
            },
        }
    }

    fn aircraft_at(lat: f64, lon: f64, alt: Option<f64>) -> Aircraft {
        Aircraft {
            cid: Some(1),
            callsign: "TEST1".into(),
            name: None,
            latitude: lat,
            longitude: lon,
            altitude_ft: alt,
            groundspeed: None,
            heading: None,
            transponder: None,
            flight_plan: None,
            last_updated: None,
        }
    }

    #[test]
    fn altitude_ceiling_excludes_above_and_null() {
        let feature = square_feature("P-56A");
        let refs = vec![&feature];
        let inside_ok = aircraft_at(38.85, -77.05, Some(17999.0));
        let inside_high = aircraft_at(38.85, -77.05, Some(18000.0));
        let inside_null = aircraft_at(38.85, -77.05, None);
        let m = classify(&[inside_ok, inside_high, inside_null], &refs, Some(17999.0));
        assert_eq!(m.len(), 1);
    }

    #[test]
    fn boundary_point_counts_as_inside() {
        let feature = square_feature("P-56A");
        let refs = vec![&feature];
        let on_edge = aircraft_at(38.8, -77.05, Some(1000.0));
        let m = classify(&[on_edge], &refs, None);
        assert_eq!(m.len(), 1);
    }
}
