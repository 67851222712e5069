//! Great-circle math: haversine distance, initial bearing, and the DCA
//! bullseye radial/range annotation used throughout the geofence engine.

use crate::models::DcaRadialRange;

/// Earth radius in kilometers (mean, spherical approximation).
pub const EARTH_RADIUS_KM: f64 = 6371.0;
/// Nautical miles per kilometer conversion (1 NM = 1.852 km).
pub const KM_PER_NM: f64 = 1.852;

/// DCA bullseye: Ronald Reagan Washington National Airport.
pub const DCA_BULLSEYE: (f64, f64) = (38.8514403, -77.0377214);

/// Great-circle distance between two points in kilometers.
pub fn haversine_distance_km(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let (phi1, phi2) = (lat1.to_radians(), lat2.to_radians());
    let dphi = (lat2 - lat1).to_radians();
    let dlambda = (lon2 - lon1).to_radians();
    let a = (dphi / 2.0).sin().powi(2) + phi1.cos() * phi2.cos() * (dlambda / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_KM * a.sqrt().atan2((1.0 - a).max(0.0).sqrt())
}

/// Initial bearing (degrees, 0-360) from point 1 to point 2.
pub fn initial_bearing_deg(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let (phi1, phi2) = (lat1.to_radians(), lat2.to_radians());
    let dlambda = (lon2 - lon1).to_radians();
    let x = dlambda.sin() * phi2.cos();
    let y = phi1.cos() * phi2.sin() - phi1.sin() * phi2.cos() * dlambda.cos();
    let brng = x.atan2(y).to_degrees();
    (brng + 360.0) % 360.0
}

/// Bearing/range from the DCA bullseye to `(lat, lon)`, with the compact
/// `DCAbbbRRR` string form. Stable under longitude wrap (`lon` and `lon +
/// 360` produce identical output) because both the haversine and bearing
/// formulas above depend only on `lon2 - lon1`, which `to_radians()` reduces
/// through the same periodic trig functions.
pub fn dca_radial_range(lat: f64, lon: f64) -> DcaRadialRange {
    let (dca_lat, dca_lon) = DCA_BULLSEYE;
    let bearing = initial_bearing_deg(dca_lat, dca_lon, lat, lon);
    let dist_km = haversine_distance_km(dca_lat, dca_lon, lat, lon);
    let dist_nm = dist_km / KM_PER_NM;

    let bearing_i = (bearing.round() as i64).rem_euclid(360) as u32;
    let dist_i = dist_nm.round().max(0.0) as u32;
    let radial_range = format!("DCA{bearing_i:03}{dist_i:03}");

    DcaRadialRange {
        radial_range,
        bearing: bearing_i,
        range_nm: (dist_nm * 10.0).round() / 10.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn haversine_known_distance() {
        let dist = haversine_distance_km(0.0, 0.0, 1.0, 0.0);
        assert!((dist - 111.19).abs() < 0.1);
    }

    #[test]
    fn haversine_same_point() {
        let dist = haversine_distance_km(38.85, -77.03, 38.85, -77.03);
        assert!(dist < 0.0001);
    }

    #[test]
    fn bearing_stable_under_longitude_wrap() {
        let b1 = dca_radial_range(38.9, -77.1);
        let b2 = dca_radial_range(38.9, -77.1 + 360.0);
        assert_eq!(b1.bearing, b2.bearing);
        assert!((b1.range_nm - b2.range_nm).abs() < 1e-6);
    }

    #[test]
    fn radial_range_format() {
        let r = dca_radial_range(DCA_BULLSEYE.0, DCA_BULLSEYE.1);
        assert_eq!(r.radial_range, "DCA000000");
    }
}
