//! Fetcher: a single long-lived task that polls the upstream feed on an
//! adaptive cadence, parses it defensively, and synchronously dispatches
//! `(snapshot, raw_json)` to the pipeline.

use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use reqwest::Client;
use serde::Deserialize;
use tokio::sync::broadcast;

use vncrcc_core::{Aircraft, FlightPlanInfo, ObservationError, Snapshot};

use crate::error::FetchError;

/// Nominal upstream publish cadence.
const UPSTREAM_CYCLE_SECONDS: f64 = 15.0;
/// Resync cadence: every 20 fetches, step the target offset.
const RESYNC_EVERY: u32 = 20;
/// The `{0.5, 1.0, 1.5, 2.0, 2.5}` offset pattern, stepped by `resync_counter % 5`.
const OFFSET_STEP_SECONDS: f64 = 0.5;
const OFFSET_BASE_SECONDS: f64 = 0.5;
const SLEEP_MIN_SECONDS: f64 = 5.0;
const SLEEP_MAX_SECONDS: f64 = 20.0;

/// Adaptive-cadence state, carried across fetches within one `Fetcher`.
#[derive(Debug, Clone, Default)]
struct AdaptiveCadence {
    vatsim_update_ts: Option<DateTime<Utc>>,
    sync_offset_seconds: f64,
    resync_counter: u32,
}

impl AdaptiveCadence {
    fn new() -> Self {
        Self { vatsim_update_ts: None, sync_offset_seconds: 1.0, resync_counter: 0 }
    }

    fn observe(&mut self, upstream_ts: Option<DateTime<Utc>>) {
        if let Some(ts) = upstream_ts {
            self.vatsim_update_ts = Some(ts);
        }
    }

    /// Mirrors `_calculate_adaptive_sleep` verbatim in semantics: fall back
    /// to the configured interval until the first upstream timestamp is
    /// known, then target `offset` seconds past the next expected upstream
    /// update, stepping the offset through a 5-step pattern every 20
    /// fetches, clamped to `[5, 20]` seconds.
    fn next_sleep(&mut self, now: DateTime<Utc>, fallback_interval_seconds: u64) -> Duration {
        self.resync_counter += 1;

        let Some(vatsim_ts) = self.vatsim_update_ts else {
            return Duration::from_secs(fallback_interval_seconds);
        };

        let time_since_update = (now - vatsim_ts).num_milliseconds() as f64 / 1000.0;
        let seconds_into_cycle = time_since_update.rem_euclid(UPSTREAM_CYCLE_SECONDS);
        let seconds_until_next_update = UPSTREAM_CYCLE_SECONDS - seconds_into_cycle;

        if self.resync_counter >= RESYNC_EVERY {
            let variation = (self.resync_counter % 5) as f64 * OFFSET_STEP_SECONDS;
            self.sync_offset_seconds = OFFSET_BASE_SECONDS + variation;
            self.resync_counter = 0;
            tracing::info!(offset_s = self.sync_offset_seconds, "adaptive timing: adjusting sync offset");
        }

        let target = seconds_until_next_update + self.sync_offset_seconds;
        let clamped = target.clamp(SLEEP_MIN_SECONDS, SLEEP_MAX_SECONDS);
        Duration::from_millis((clamped * 1000.0) as u64)
    }
}

/// Defensive wire shapes for the upstream feed. Unknown fields are ignored
/// (`serde`'s default behavior); every field the domain model needs is
/// `Option` here so a missing/malformed field degrades only itself.
#[derive(Debug, Deserialize, Default)]
struct RawFeed {
    #[serde(default)]
    general: RawGeneral,
    #[serde(default)]
    pilots: Vec<RawPilot>,
}

#[derive(Debug, Deserialize, Default)]
struct RawGeneral {
    update_timestamp: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct RawPilot {
    cid: Option<i64>,
    callsign: Option<String>,
    name: Option<String>,
    latitude: Option<f64>,
    longitude: Option<f64>,
    altitude: Option<serde_json::Value>,
    groundspeed: Option<f64>,
    heading: Option<f64>,
    transponder: Option<String>,
    flight_plan: Option<RawFlightPlan>,
}

#[derive(Debug, Deserialize, Default)]
struct RawFlightPlan {
    remarks: Option<String>,
    route: Option<String>,
    #[serde(rename = "aircraft")]
    aircraft_type: Option<String>,
    last_updated: Option<String>,
}

fn parse_compact_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let y: i32 = raw[0..4].parse().ok()?;
    let mo: u32 = raw[4..6].parse().ok()?;
    let d: u32 = raw[6..8].parse().ok()?;
    let h: u32 = raw[8..10].parse().ok()?;
    let mi: u32 = raw[10..12].parse().ok()?;
    let s: u32 = raw[12..14].parse().ok()?;
    Utc.with_ymd_and_hms(y, mo, d, h, mi, s).single()
}

/// Parses a timestamp field in either ISO-8601 or VATSIM's compact
/// `YYYYMMDDHHMMSS` form. Returns `None` on anything else — a parse
/// failure here degrades only staleness bookkeeping — but first logs the
/// per-field `ObservationError` so a bad upstream field is visible without
/// aborting ingest of the rest of the snapshot.
fn parse_upstream_timestamp(field: &'static str, raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    if raw.len() == 14 && raw.chars().all(|c| c.is_ascii_digit()) {
        if let Some(dt) = parse_compact_timestamp(raw) {
            return Some(dt);
        }
    }
    let err = ObservationError::UnparseableField { field, raw: raw.to_string() };
    tracing::debug!(%err, "dropping malformed observation field");
    None
}

fn parse_altitude(raw: &Option<serde_json::Value>) -> Option<f64> {
    match raw {
        None => None,
        Some(serde_json::Value::Number(n)) => n.as_f64(),
        Some(serde_json::Value::String(s)) => match s.parse() {
            Ok(v) => Some(v),
            Err(_) => {
                let err = ObservationError::UnparseableField { field: "altitude", raw: s.clone() };
                tracing::debug!(%err, "dropping malformed observation field");
                None
            }
        },
        Some(other) => {
            let err = ObservationError::UnparseableField { field: "altitude", raw: other.to_string() };
            tracing::debug!(%err, "dropping malformed observation field");
            None
        }
    }
}

/// Parses one upstream JSON document into a typed `Snapshot`. A malformed
/// top-level document is a `FetchError`; a malformed individual field or
/// aircraft degrades only itself and is never surfaced as an error.
pub fn parse_feed(raw_json: &str, fetched_at: DateTime<Utc>) -> Result<Snapshot, FetchError> {
    let feed: RawFeed = serde_json::from_str(raw_json)?;

    let upstream_ts = feed
        .general
        .update_timestamp
        .as_deref()
        .and_then(|raw| parse_upstream_timestamp("general.update_timestamp", raw));

    let aircraft = feed
        .pilots
        .into_iter()
        .filter_map(|pilot| {
            let (Some(latitude), Some(longitude)) = (pilot.latitude, pilot.longitude) else {
                let err = ObservationError::MissingField("latitude/longitude");
                tracing::debug!(%err, callsign = pilot.callsign.as_deref().unwrap_or(""), "dropping pilot missing position");
                return None;
            };
            let callsign = pilot.callsign.unwrap_or_default();
            if callsign.is_empty() && pilot.cid.is_none() {
                let err = ObservationError::MissingField("callsign/cid");
                tracing::debug!(%err, "dropping pilot with no identity");
                return None;
            }
            let flight_plan = pilot.flight_plan.map(|fp| FlightPlanInfo {
                remarks: fp.remarks,
                route: fp.route,
                aircraft_type: fp.aircraft_type,
                last_updated: fp
                    .last_updated
                    .as_deref()
                    .and_then(|raw| parse_upstream_timestamp("flight_plan.last_updated", raw)),
            });
            Some(Aircraft {
                cid: pilot.cid,
                callsign,
                name: pilot.name,
                latitude,
                longitude,
                altitude_ft: parse_altitude(&pilot.altitude),
                groundspeed: pilot.groundspeed,
                heading: pilot.heading,
                transponder: pilot.transponder,
                flight_plan,
                last_updated: None,
            })
        })
        .collect();

    Ok(Snapshot { fetched_at, upstream_ts, aircraft })
}

/// Single concurrent upstream poller. Owns its own `reqwest::Client`
/// (60s total / 30s connect timeout) and adaptive-cadence state; dispatches
/// each successful parse to `on_fetch`.
pub struct Fetcher {
    client: Client,
    url: String,
    fallback_interval_seconds: u64,
    cadence: AdaptiveCadence,
}

impl Fetcher {
    pub fn new(url: impl Into<String>, fallback_interval_seconds: u64) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(60))
            .connect_timeout(Duration::from_secs(30))
            .build()
            .expect("failed to build upstream HTTP client");
        Self { client, url: url.into(), fallback_interval_seconds, cadence: AdaptiveCadence::new() }
    }

    async fn fetch_once(&self) -> Result<(Snapshot, String), FetchError> {
        let response = self.client.get(&self.url).send().await?;
        if !response.status().is_success() {
            return Err(FetchError::BadStatus(response.status()));
        }
        let raw_json = response.text().await?;
        let fetched_at = Utc::now();
        let snapshot = parse_feed(&raw_json, fetched_at)?;
        Ok((snapshot, raw_json))
    }

    /// Runs the poll loop until `shutdown` fires. `on_fetch` must be fast
    /// and fire-and-forget (the pipeline offloads its own CPU work onto a
    /// worker; see `pipeline::Pipeline::on_tick`) — this loop never awaits
    /// inside `on_fetch` beyond the call itself.
    pub async fn run(mut self, on_fetch: impl Fn(Snapshot, String) + Send + Sync + 'static, mut shutdown: broadcast::Receiver<()>) {
        loop {
            match self.fetch_once().await {
                Ok((snapshot, raw_json)) => {
                    let count = snapshot.aircraft.len();
                    tracing::info!(aircraft = count, "upstream fetch success");
                    self.cadence.observe(snapshot.upstream_ts);
                    on_fetch(snapshot, raw_json);
                }
                Err(err) => {
                    tracing::warn!(%err, "upstream fetch failed, will retry next cycle");
                }
            }

            let sleep_for = self.cadence.next_sleep(Utc::now(), self.fallback_interval_seconds);
            tokio::select! {
                _ = shutdown.recv() => {
                    tracing::info!("fetcher shutting down");
                    break;
                }
                _ = tokio::time::sleep(sleep_for) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_iso8601_update_timestamp() {
        let ts = parse_upstream_timestamp("update_timestamp", "2025-11-20T21:19:31Z").unwrap();
        assert_eq!(ts.to_rfc3339(), "2025-11-20T21:19:31+00:00");
    }

    #[test]
    fn parses_compact_update_timestamp() {
        let ts = parse_upstream_timestamp("update_timestamp", "20251120211931").unwrap();
        assert_eq!(ts.to_rfc3339(), "2025-11-20T21:19:31+00:00");
    }

    #[test]
    fn unparseable_timestamp_is_none_not_error() {
        assert!(parse_upstream_timestamp("update_timestamp", "not-a-timestamp").is_none());
    }

    #[test]
    fn feed_parse_skips_pilot_missing_position() {
        let raw = serde_json::json!({
            "general": {"update_timestamp": "20251120211931"},
            "pilots": [
                {"cid": 1, "callsign": "AAL1", "latitude": 38.9, "longitude": -77.0, "altitude": 5000},
                {"cid": 2, "callsign": "AAL2", "altitude": 6000}
            ]
        })
        .to_string();
        let snapshot = parse_feed(&raw, Utc::now()).unwrap();
        assert_eq!(snapshot.aircraft.len(), 1);
        assert_eq!(snapshot.aircraft[0].cid, Some(1));
    }

    #[test]
    fn unparseable_altitude_degrades_only_that_field() {
        let raw = serde_json::json!({
            "general": {},
            "pilots": [
                {"cid": 1, "callsign": "AAL1", "latitude": 38.9, "longitude": -77.0, "altitude": "unknown"}
            ]
        })
        .to_string();
        let snapshot = parse_feed(&raw, Utc::now()).unwrap();
        assert_eq!(snapshot.aircraft.len(), 1);
        assert!(snapshot.aircraft[0].altitude_ft.is_none());
    }

    #[test]
    fn malformed_top_level_json_is_an_error() {
        let result = parse_feed("not json at all", Utc::now());
        assert!(result.is_err());
    }

    #[test]
    fn adaptive_cadence_falls_back_without_upstream_timestamp() {
        let mut cadence = AdaptiveCadence::new();
        let sleep = cadence.next_sleep(Utc::now(), 15);
        assert_eq!(sleep, Duration::from_secs(15));
    }

    #[test]
    fn adaptive_cadence_targets_offset_after_upstream_update() {
        let mut cadence = AdaptiveCadence::new();
        let update_ts = Utc::now();
        cadence.observe(Some(update_ts));
        let now = update_ts + chrono::Duration::seconds(14);
        let sleep = cadence.next_sleep(now, 15);
        // seconds_until_next_update = 1s, + 1.0s default offset = 2s, clamped to 5s min.
        assert_eq!(sleep, Duration::from_secs(5));
    }

    #[test]
    fn adaptive_cadence_clamps_to_twenty_seconds() {
        let mut cadence = AdaptiveCadence::new();
        let update_ts = Utc::now();
        cadence.observe(Some(update_ts));
        let now = update_ts;
        let sleep = cadence.next_sleep(now, 15);
        // seconds_until_next_update = 15s, + 1.0s offset = 16s, within bounds.
        assert_eq!(sleep, Duration::from_secs(16));
    }

    #[test]
    fn adaptive_cadence_steps_offset_every_twenty_fetches() {
        let mut cadence = AdaptiveCadence::new();
        let update_ts = Utc::now();
        cadence.observe(Some(update_ts));
        for _ in 0..19 {
            cadence.next_sleep(update_ts, 15);
        }
        assert_eq!(cadence.sync_offset_seconds, 1.0);
        cadence.next_sleep(update_ts, 15);
        assert_eq!(cadence.sync_offset_seconds, 0.5 + (20 % 5) as f64 * 0.5);
    }
}
