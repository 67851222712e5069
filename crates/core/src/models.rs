//! Domain model for airspace surveillance: observations, snapshots, polygon
//! features, track points, and the P-56 intrusion event record.
//!
//! Upstream payloads are dynamically typed and partially trustworthy; the
//! raw wire shapes (`Raw*`) are parsed defensively into these fully-typed
//! values at the ingest boundary (see `vncrcc_server::fetcher::parse_feed`),
//! so everything downstream of ingest works with `Aircraft`/`Snapshot`
//! directly and never touches `serde_json::Value`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One aircraft observation within a snapshot.
///
/// `cid` may be absent (some upstream clients omit it); `identity_key`
/// supplies the fallback used everywhere a stable per-aircraft key is
/// needed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Aircraft {
    pub cid: Option<i64>,
    pub callsign: String,
    pub name: Option<String>,
    pub latitude: f64,
    pub longitude: f64,
    /// Altitude in feet. `None` means the field was missing or unparseable;
    /// an observation with unknown altitude never matches a geofence test
    /// that has an altitude ceiling.
    pub altitude_ft: Option<f64>,
    pub groundspeed: Option<f64>,
    pub heading: Option<f64>,
    pub transponder: Option<String>,
    pub flight_plan: Option<FlightPlanInfo>,
    /// The upstream-provided per-pilot update time, if present and parseable.
    pub last_updated: Option<DateTime<Utc>>,
}

impl Aircraft {
    /// Stable per-aircraft key: the CID if present, else a callsign-derived
    /// fallback. A best-effort identity only when CID is absent.
    pub fn identity_key(&self) -> String {
        match self.cid {
            Some(cid) => cid.to_string(),
            None => self.callsign.clone(),
        }
    }

    pub fn point(&self) -> geo_types::Point<f64> {
        geo_types::Point::new(self.longitude, self.latitude)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct FlightPlanInfo {
    pub remarks: Option<String>,
    pub route: Option<String>,
    pub aircraft_type: Option<String>,
    pub last_updated: Option<DateTime<Utc>>,
}

/// One poll's complete aircraft payload. Append-only in the Snapshot Store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    /// Monotonic wall time at local ingest; the ordering key for retention
    /// and for "prev"/"latest" selection.
    pub fetched_at: DateTime<Utc>,
    /// The upstream feed's own `general.update_timestamp`, if parsed.
    pub upstream_ts: Option<DateTime<Utc>>,
    pub aircraft: Vec<Aircraft>,
}

impl Snapshot {
    pub fn find(&self, key: &str) -> Option<&Aircraft> {
        self.aircraft.iter().find(|a| a.identity_key() == key)
    }
}

/// Property bag attached to a loaded polygon feature.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FeatureProperties {
    pub name: Option<String>,
    /// Tolerance in degrees for line features; defaults to 0.001 if absent.
    pub tolerance_deg: Option<f64>,
    pub vicinity_nm: Option<f64>,
    /// Any properties not otherwise modeled, preserved for evidence JSON.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl FeatureProperties {
    pub fn tolerance_or_default(&self) -> f64 {
        self.tolerance_deg.unwrap_or(0.001)
    }

    pub fn zone_name(&self) -> String {
        self.name.clone().unwrap_or_else(|| "UNKNOWN".to_string())
    }
}

/// One recorded position in a track ring.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackPoint {
    pub ts: DateTime<Utc>,
    pub lat: f64,
    pub lon: f64,
    pub alt: Option<f64>,
    pub groundspeed: Option<f64>,
    pub heading: Option<f64>,
    pub callsign: String,
}

impl TrackPoint {
    pub fn from_aircraft(aircraft: &Aircraft, ts: DateTime<Utc>) -> Self {
        Self {
            ts,
            lat: aircraft.latitude,
            lon: aircraft.longitude,
            alt: aircraft.altitude_ft,
            groundspeed: aircraft.groundspeed,
            heading: aircraft.heading,
            callsign: aircraft.callsign.clone(),
        }
    }
}

/// DCA-bullseye bearing/range annotation for a point.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DcaRadialRange {
    /// Compact `DCAbbbRRR` form: 3-digit bearing, 3-digit nautical-mile range.
    pub radial_range: String,
    pub bearing: u32,
    pub range_nm: f64,
}

/// A single geofence match produced by the Geofence Engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeofenceMatch {
    pub aircraft: Aircraft,
    pub matched_props: FeatureProperties,
    pub dca: DcaRadialRange,
}

/// A two-point segment that triggered a detection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvidenceLine {
    pub prev: (f64, f64),
    pub latest: (f64, f64),
}

/// The tracker's durable record of one P-56 penetration, open or closed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntrusionEvent {
    pub cid: Option<i64>,
    /// Stable identity key (`cid` or a synthesized `NOCID-<ts>`/callsign).
    pub id: String,
    pub callsign: String,
    pub name: Option<String>,
    pub flight_plan: Option<FlightPlanInfo>,

    pub recorded_at: DateTime<Utc>,
    pub latest_ts: DateTime<Utc>,
    pub exit_detected_at: Option<DateTime<Utc>>,
    pub exit_confirmed_at: Option<DateTime<Utc>>,

    pub zones: Vec<String>,
    pub prev_position: Option<(f64, f64)>,
    pub latest_position: (f64, f64),
    pub evidence_line: Option<EvidenceLine>,

    pub pre_positions: Vec<TrackPoint>,
    pub intrusion_positions: Vec<TrackPoint>,
}

impl IntrusionEvent {
    /// Uniquely identifies the event per the `(cid, recorded_at)` invariant.
    pub fn key(&self) -> (String, DateTime<Utc>) {
        (self.id.clone(), self.recorded_at)
    }
}

/// Lifecycle flag tracked per identity key, parallel to the event log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CurrentInsideState {
    pub inside: bool,
    pub p56_buster: bool,
    pub outside_count: u32,
    pub last_seen: DateTime<Utc>,
    pub last_position: (f64, f64),
}

/// The full on-disk shape of `p56_history.json`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct P56History {
    pub events: Vec<IntrusionEvent>,
    pub current_inside: HashMap<String, CurrentInsideState>,
}

/// One row of the durable incident log (distinct from `IntrusionEvent`,
/// which is mutable; an incident row is an immutable audit record written
/// once per detection write).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Incident {
    pub detected_at: DateTime<Utc>,
    pub callsign: String,
    pub cid: Option<i64>,
    pub name: Option<String>,
    pub lat: f64,
    pub lon: f64,
    pub altitude: Option<f64>,
    pub zone: String,
    pub evidence_json: String,
}
