//! P-56 Intrusion Tracker.
//!
//! Turns per-snapshot geometry into a deduplicated, continuous-track event
//! log: segment-cross and connect-inside detection, dedup-window merging,
//! and 10-tick exit confirmation.

use chrono::{DateTime, Duration, Utc};

use crate::geo_registry::PolygonFeature;
use crate::geofence::{segment_crossed_zones, zones_containing};
use crate::models::{
    Aircraft, CurrentInsideState, EvidenceLine, Incident, IntrusionEvent, P56History, Snapshot,
    TrackPoint,
};

/// Source of recent track points for an identity key, oldest-to-newest.
/// Implemented by the server crate's track history store; kept as a trait
/// here so the tracker has no dependency on persistence.
pub trait TrackHistorySource {
    fn recent(&self, id: &str) -> Vec<TrackPoint>;
}

#[derive(Debug, Clone)]
pub struct TrackerConfig {
    pub altitude_ceiling_ft: f64,
    pub dedup_window: Duration,
    pub exit_confirm_ticks: u32,
    pub pre_position_cap: usize,
    pub intrusion_position_cap: usize,
    pub min_position_spacing: Duration,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            altitude_ceiling_ft: 17_999.0,
            dedup_window: Duration::seconds(60),
            exit_confirm_ticks: 10,
            pre_position_cap: 7,
            intrusion_position_cap: 200,
            min_position_spacing: Duration::seconds(1),
        }
    }
}

/// One detection produced by `detect` for a single CID this tick.
pub struct Detection {
    pub id: String,
    pub aircraft: Aircraft,
    pub zones: Vec<String>,
    pub prev_position: Option<(f64, f64)>,
    pub latest_position: (f64, f64),
}

fn eligible(aircraft: &Aircraft, ceiling_ft: f64) -> bool {
    matches!(aircraft.altitude_ft, Some(alt) if alt <= ceiling_ft)
}

/// Detection step: for each CID in `latest`, test segment-cross then
/// connect-inside against the P-56 feature set. Tolerates a missing `prev`
/// snapshot (returns detections from connect-inside only).
pub fn detect(
    prev: Option<&Snapshot>,
    latest: &Snapshot,
    p56_features: &[&PolygonFeature],
    cfg: &TrackerConfig,
) -> Vec<Detection> {
    let mut out = Vec::new();

    for aircraft in &latest.aircraft {
        if !eligible(aircraft, cfg.altitude_ceiling_ft) {
            continue;
        }
        let id = aircraft.identity_key();
        let latest_point = (aircraft.latitude, aircraft.longitude);

        let prev_aircraft = prev
            .and_then(|s| s.find(&id))
            .filter(|a| eligible(a, cfg.altitude_ceiling_ft));
        let prev_point = prev_aircraft.map(|a| (a.latitude, a.longitude));

        // 1. Segment-cross test.
        let crossed = if let Some(pp) = prev_point {
            segment_crossed_zones(p56_features, pp, latest_point)
        } else {
            Vec::new()
        };

        if !crossed.is_empty() {
            out.push(Detection {
                id,
                aircraft: aircraft.clone(),
                zones: crossed,
                prev_position: prev_point,
                latest_position: latest_point,
            });
            continue;
        }

        // 2. Connect-inside test.
        let z_now = zones_containing(p56_features, latest_point);
        if z_now.is_empty() {
            continue;
        }
        let prev_was_outside = match prev_aircraft {
            None => true,
            Some(_) => zones_containing(p56_features, prev_point.unwrap()).is_empty(),
        };
        if prev_was_outside {
            out.push(Detection {
                id,
                aircraft: aircraft.clone(),
                zones: z_now,
                prev_position: prev_point,
                latest_position: latest_point,
            });
        }
        // 3. Otherwise: already inside previously, not a new detection.
    }

    out
}

fn collect_pre_positions(
    source: &dyn TrackHistorySource,
    id: &str,
    cutoff: DateTime<Utc>,
    cap: usize,
    p56_features: &[&PolygonFeature],
) -> Vec<TrackPoint> {
    let history = source.recent(id);
    let mut collected = Vec::new();
    for point in history.iter().rev() {
        if point.ts >= cutoff {
            continue;
        }
        let outside = zones_containing(p56_features, (point.lat, point.lon)).is_empty();
        if !outside {
            break;
        }
        collected.push(point.clone());
        if collected.len() >= cap {
            break;
        }
    }
    collected.reverse();
    collected
}

/// Applies one detection to the event log / `current_inside` map. Returns
/// the incident row to persist, if any (merges that make no temporal
/// progress — i.e. a byte-identical replay — do not
/// produce a second incident row).
pub fn apply_detection(
    history: &mut P56History,
    track_source: &dyn TrackHistorySource,
    detection: &Detection,
    now: DateTime<Utc>,
    p56_features: &[&PolygonFeature],
    cfg: &TrackerConfig,
) -> Option<Incident> {
    let id = &detection.id;

    if history.current_inside.get(id).map(|s| s.inside).unwrap_or(false) {
        return None;
    }

    let most_recent_idx = history
        .events
        .iter()
        .enumerate()
        .rev()
        .find(|(_, e)| &e.id == id)
        .map(|(i, _)| i);

    // Open Question #2: the dedup window only merges while the candidate
    // event is still open. A detection arriving after `p56_buster=false`
    // always opens a new event, regardless of elapsed time.
    let still_open = history.current_inside.get(id).map(|s| s.p56_buster).unwrap_or(false);
    let merge_idx = most_recent_idx.filter(|&i| {
        still_open && now.signed_duration_since(history.events[i].recorded_at) <= cfg.dedup_window
    });

    let mut advanced = true;
    if let Some(i) = merge_idx {
        let previous_latest = history.events[i].latest_ts;
        advanced = now > previous_latest;
        if advanced {
            history.events[i].latest_ts = now;
        }
        if history.events[i].pre_positions.is_empty() {
            history.events[i].pre_positions =
                collect_pre_positions(track_source, id, history.events[i].recorded_at, cfg.pre_position_cap, p56_features);
        }
    } else {
        let pre_positions = collect_pre_positions(track_source, id, now, cfg.pre_position_cap, p56_features);
        let event = IntrusionEvent {
            cid: detection.aircraft.cid,
            id: id.clone(),
            callsign: detection.aircraft.callsign.clone(),
            name: detection.aircraft.name.clone(),
            flight_plan: detection.aircraft.flight_plan.clone(),
            recorded_at: now,
            latest_ts: now,
            exit_detected_at: None,
            exit_confirmed_at: None,
            zones: detection.zones.clone(),
            prev_position: detection.prev_position,
            latest_position: detection.latest_position,
            evidence_line: detection
                .prev_position
                .map(|p| EvidenceLine { prev: p, latest: detection.latest_position }),
            pre_positions,
            intrusion_positions: Vec::new(),
        };
        history.events.push(event);
    }

    history.current_inside.insert(
        id.clone(),
        CurrentInsideState {
            inside: true,
            p56_buster: true,
            outside_count: 0,
            last_seen: now,
            last_position: detection.latest_position,
        },
    );

    if !advanced {
        return None;
    }

    Some(Incident {
        detected_at: now,
        callsign: detection.aircraft.callsign.clone(),
        cid: detection.aircraft.cid,
        name: detection.aircraft.name.clone(),
        lat: detection.latest_position.0,
        lon: detection.latest_position.1,
        altitude: detection.aircraft.altitude_ft,
        zone: detection.zones.join(","),
        evidence_json: serde_json::json!({
            "zones": detection.zones,
            "prev": detection.prev_position,
            "latest": detection.latest_position,
        })
        .to_string(),
    })
}

/// Continuous tracking step: runs every tick over every open (`p56_buster`)
/// identity, appending track points and advancing/confirming exit.
pub fn run_sync(
    history: &mut P56History,
    latest: &Snapshot,
    p56_features: &[&PolygonFeature],
    now: DateTime<Utc>,
    cfg: &TrackerConfig,
) {
    let open_ids: Vec<String> = history
        .current_inside
        .iter()
        .filter(|(_, s)| s.p56_buster)
        .map(|(id, _)| id.clone())
        .collect();

    for id in open_ids {
        let Some(event_idx) = history.events.iter().rposition(|e| e.id == id) else {
            continue;
        };

        let observation = latest.find(&id);
        let inside_now = observation
            .map(|a| !zones_containing(p56_features, (a.latitude, a.longitude)).is_empty())
            .unwrap_or(false);

        if let Some(aircraft) = observation {
            let spacing_ok = history.events[event_idx]
                .intrusion_positions
                .last()
                .map(|last| now.signed_duration_since(last.ts) >= cfg.min_position_spacing)
                .unwrap_or(true);
            if spacing_ok {
                let point = TrackPoint::from_aircraft(aircraft, now);
                let positions = &mut history.events[event_idx].intrusion_positions;
                positions.push(point);
                if positions.len() > cfg.intrusion_position_cap {
                    positions.remove(0);
                }
            }
        }

        let was_inside = history.current_inside.get(&id).map(|s| s.inside).unwrap_or(false);
        if !inside_now && was_inside {
            history.events[event_idx].exit_detected_at.get_or_insert(now);
        }

        let state = history.current_inside.get_mut(&id).expect("id drawn from current_inside");
        if inside_now {
            state.inside = true;
            state.outside_count = 0;
        } else {
            state.inside = false;
            state.outside_count += 1;
        }
        if let Some(aircraft) = observation {
            state.last_seen = now;
            state.last_position = (aircraft.latitude, aircraft.longitude);
        }

        if state.outside_count >= cfg.exit_confirm_ticks {
            history.events[event_idx].exit_confirmed_at = Some(now);
            state.p56_buster = false;
        }
    }
}

/// Orchestrates `detect` then `apply_detection` then `run_sync` for one
/// pipeline tick, in that fixed order.
pub fn run_tick(
    history: &mut P56History,
    track_source: &dyn TrackHistorySource,
    prev: Option<&Snapshot>,
    latest: &Snapshot,
    p56_features: &[&PolygonFeature],
    now: DateTime<Utc>,
    cfg: &TrackerConfig,
) -> Vec<Incident> {
    let detections = detect(prev, latest, p56_features, cfg);
    let mut incidents = Vec::with_capacity(detections.len());
    for detection in &detections {
        if let Some(incident) = apply_detection(history, track_source, detection, now, p56_features, cfg) {
            incidents.push(incident);
        }
    }
    run_sync(history, latest, p56_features, now, cfg);
    incidents
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::FeatureProperties;
    use geo_types::{polygon, Geometry};

    struct EmptyTrackSource;
    impl TrackHistorySource for EmptyTrackSource {
        fn recent(&self, _id: &str) -> Vec<TrackPoint> {
            Vec::new()
        }
    }

    fn p56a() -> PolygonFeature {
        let poly = polygon![
            (x: -77.06, y: 38.87),
            (x: -77.02, y: 38.87),
            (x: -77.02, y: 38.91),
            (x: -77.06, y: 38.91),
            (x: -77.06, y: 38.87),
        ];
        PolygonFeature {
            geometry: Geometry::Polygon(poly),
            properties: FeatureProperties {
                name: Some("P-56A".into()),
                ..Default::default()
            },
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

    fn snapshot(ts: DateTime<Utc>, aircraft_list: Vec<Aircraft>) -> Snapshot {
        Snapshot { fetched_at: ts, upstream_ts: Some(ts), aircraft: aircraft_list }
    }

    #[test]
    fn connect_inside_opens_event_and_buster_flag() {
        let feature = p56a();
        let features = vec![&feature];
        let cfg = TrackerConfig::default();
        let now = Utc::now();
        let latest = snapshot(now, vec![aircraft(910001, 38.8895, -77.035, 1500.0)]);

        let mut history = P56History::default();
        let incidents = run_tick(&mut history, &EmptyTrackSource, None, &latest, &features, now, &cfg);

        assert_eq!(incidents.len(), 1);
        assert_eq!(history.events.len(), 1);
        assert_eq!(history.events[0].zones, vec!["P-56A".to_string()]);
        assert!(history.events[0].pre_positions.is_empty());
        assert!(history.current_inside.get("910001").unwrap().p56_buster);
    }

    #[test]
    fn exit_confirmation_requires_ten_consecutive_outside_ticks() {
        let feature = p56a();
        let features = vec![&feature];
        let cfg = TrackerConfig::default();
        let t0 = Utc::now();
        let entry = snapshot(t0, vec![aircraft(900001, 38.89, -77.04, 1000.0)]);

        let mut history = P56History::default();
        run_tick(&mut history, &EmptyTrackSource, None, &entry, &features, t0, &cfg);

        let mut tick_ts = t0;
        for i in 1..=9 {
            tick_ts += Duration::seconds(15);
            let outside = snapshot(tick_ts, vec![aircraft(900001, 39.2, -76.5, 1000.0)]);
            run_tick(&mut history, &EmptyTrackSource, Some(&entry), &outside, &features, tick_ts, &cfg);
            let state = history.current_inside.get("900001").unwrap();
            assert!(state.p56_buster, "still open after {i} outside ticks");
            assert_eq!(state.outside_count, i);
        }

        tick_ts += Duration::seconds(15);
        let outside = snapshot(tick_ts, vec![aircraft(900001, 39.2, -76.5, 1000.0)]);
        run_tick(&mut history, &EmptyTrackSource, Some(&entry), &outside, &features, tick_ts, &cfg);
        let state = history.current_inside.get("900001").unwrap();
        assert!(!state.p56_buster);
        assert!(history.events[0].exit_confirmed_at.is_some());
    }

    #[test]
    fn replaying_identical_tick_is_idempotent() {
        let feature = p56a();
        let features = vec![&feature];
        let cfg = TrackerConfig::default();
        let now = Utc::now();
        let latest = snapshot(now, vec![aircraft(920001, 38.8895, -77.035, 1500.0)]);

        let mut history = P56History::default();
        run_tick(&mut history, &EmptyTrackSource, None, &latest, &features, now, &cfg);
        let before_len = history.events.len();

        // Replay: `latest` is current_inside[id].inside == true, so detect()
        // won't even fire a connect-inside (aircraft already inside), and
        // even if it did, apply_detection would suppress on `inside=true`.
        run_tick(&mut history, &EmptyTrackSource, Some(&latest), &latest, &features, now, &cfg);
        assert_eq!(history.events.len(), before_len);
    }

    #[test]
    fn reentry_after_confirmed_exit_opens_new_event() {
        let feature = p56a();
        let features = vec![&feature];
        let mut cfg = TrackerConfig::default();
        cfg.exit_confirm_ticks = 1;
        let t0 = Utc::now();
        let entry = snapshot(t0, vec![aircraft(930001, 38.89, -77.04, 1000.0)]);

        let mut history = P56History::default();
        run_tick(&mut history, &EmptyTrackSource, None, &entry, &features, t0, &cfg);

        let t1 = t0 + Duration::seconds(15);
        let outside = snapshot(t1, vec![aircraft(930001, 39.2, -76.5, 1000.0)]);
        run_tick(&mut history, &EmptyTrackSource, Some(&entry), &outside, &features, t1, &cfg);
        assert!(!history.current_inside.get("930001").unwrap().p56_buster);

        // Re-entry 10s later, well within the 60s dedup window.
        let t2 = t1 + Duration::seconds(10);
        let reentry = snapshot(t2, vec![aircraft(930001, 38.89, -77.04, 1000.0)]);
        run_tick(&mut history, &EmptyTrackSource, Some(&outside), &reentry, &features, t2, &cfg);

        assert_eq!(history.events.len(), 2);
        assert_eq!(history.events[1].recorded_at, t2);
        assert!(history.current_inside.get("930001").unwrap().p56_buster);
    }
}
