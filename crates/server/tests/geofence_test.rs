//! Scenario-level coverage for the P-56 intrusion tracker, driven the same
//! way the pipeline drives it: a `(prev, latest)` snapshot pair fed through
//! `run_tick` against a synthetic P-56 polygon.

use chrono::Utc;
use geo_types::{polygon, Geometry};
use vncrcc_core::{Aircraft, FeatureProperties, P56History, PolygonFeature, Snapshot, TrackHistorySource, TrackPoint, TrackerConfig};

struct EmptyTrackSource;
impl TrackHistorySource for EmptyTrackSource {
    fn recent(&self, _id: &str) -> Vec<TrackPoint> {
        Vec::new()
    }
}

/// A box spanning lat [38.89, 38.92], lon [-77.07, -77.04] — chosen so the
/// segment-cross scenario's two endpoints both fall outside it while the
/// segment between them passes cleanly through.
fn p56_box() -> PolygonFeature {
    let poly = polygon![
        (x: -77.07, y: 38.89),
        (x: -77.04, y: 38.89),
        (x: -77.04, y: 38.92),
        (x: -77.07, y: 38.92),
        (x: -77.07, y: 38.89),
    ];
    PolygonFeature {
        geometry: Geometry::Polygon(poly),
        properties: FeatureProperties { name: Some("P-56A".into()), ..Default::default() },
    }
}

fn aircraft(cid: i64, lat: f64, lon: f64, alt: f64) -> Aircraft {
    Aircraft {
        cid: Some(cid),
        callsign: format!("TST{cid}"),
        name: None,
        latitude: lat,
        longitude: lon,
        altitude_ft: Some(alt),
        groundspeed: None,
        heading: None,
        transponder: None,
        flight_plan: None,
        last_updated: None,
    }
}

fn snapshot(ts: chrono::DateTime<Utc>, aircraft_list: Vec<Aircraft>) -> Snapshot {
    Snapshot { fetched_at: ts, upstream_ts: Some(ts), aircraft: aircraft_list }
}

#[test]
fn segment_cross_opens_event_with_empty_pre_positions_and_one_incident() {
    let feature = p56_box();
    let features = vec![&feature];
    let cfg = TrackerConfig::default();
    let now = Utc::now();

    let prev = snapshot(now - chrono::Duration::seconds(15), vec![aircraft(900001, 38.95, -77.08, 15000.0)]);
    let latest = snapshot(now, vec![aircraft(900001, 38.86, -77.03, 15000.0)]);

    let mut history = P56History::default();
    let incidents = vncrcc_core::run_tick(&mut history, &EmptyTrackSource, Some(&prev), &latest, &features, now, &cfg);

    assert_eq!(incidents.len(), 1);
    assert_eq!(history.events.len(), 1);
    assert_eq!(history.events[0].zones, vec!["P-56A".to_string()]);
    assert!(history.events[0].pre_positions.is_empty());
    assert!(history.current_inside.get("900001").unwrap().p56_buster);
}

#[test]
fn altitude_above_ceiling_produces_no_event() {
    let feature = p56_box();
    let features = vec![&feature];
    let cfg = TrackerConfig::default();
    let now = Utc::now();

    // Squarely inside the polygon, but at 18,000 ft — above the 17,999 ft
    // ceiling, so this observation is never eligible for detection.
    let latest = snapshot(now, vec![aircraft(900002, 38.905, -77.055, 18000.0)]);

    let mut history = P56History::default();
    let incidents = vncrcc_core::run_tick(&mut history, &EmptyTrackSource, None, &latest, &features, now, &cfg);

    assert!(incidents.is_empty());
    assert!(history.events.is_empty());
    assert!(history.current_inside.is_empty());
}
