//! Precompute pipeline: the sole subscriber that matters on every fetch
//! tick. Orchestrates snapshot store append, radius trim + surge policy,
//! track history update, geofence classification for `sfra`/`frz`, the
//! P-56 intrusion tracker, and publication to the read cache.
//!
//! Fires each tick's work onto its own task so the fetcher's poll loop is
//! never blocked, and skips a tick outright if the previous one is still
//! running rather than queuing it up.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use vncrcc_core::{classify, run_tick, spatial::dca_radial_range, Snapshot, TrackerConfig};

use crate::config::Config;
use crate::persistence::{P56HistoryStore, SnapshotStore, TrackHistoryStore};
use crate::read_cache::{
    AircraftListBundle, GeofenceBundle, P56Bundle, P56HistoryView, PublishedBundle, ReadCache,
    SystemStatusBundle,
};

/// Surge thresholds: aircraft-count cutoffs and the radius caps they
/// impose, checked in descending order of severity.
const SURGE_HIGH_COUNT: usize = 500;
const SURGE_HIGH_CAP_NM: f64 = 80.0;
const SURGE_MID_COUNT: usize = 300;
const SURGE_MID_CAP_NM: f64 = 150.0;

/// Exposed so integration tests can exercise the surge table without
/// standing up a full `Pipeline` (which needs a database and a geo
/// directory).
pub fn effective_radius_nm(configured_radius_nm: f64, aircraft_count: usize) -> f64 {
    if aircraft_count > SURGE_HIGH_COUNT {
        configured_radius_nm.min(SURGE_HIGH_CAP_NM)
    } else if aircraft_count > SURGE_MID_COUNT {
        configured_radius_nm.min(SURGE_MID_CAP_NM)
    } else {
        configured_radius_nm
    }
}

pub struct Pipeline {
    geo: Arc<vncrcc_core::GeoRegistry>,
    snapshots: Arc<SnapshotStore>,
    track_history: Arc<TrackHistoryStore>,
    p56_history: Arc<P56HistoryStore>,
    read_cache: Arc<ReadCache>,
    configured_radius_nm: f64,
    tracker_cfg: TrackerConfig,
    /// Overrun guard: a tick that fires while the previous precompute is
    /// still running is skipped, not queued.
    running: Arc<AtomicBool>,
    overrun_count: Arc<std::sync::atomic::AtomicU64>,
}

impl Pipeline {
    pub fn new(
        geo: Arc<vncrcc_core::GeoRegistry>,
        snapshots: Arc<SnapshotStore>,
        track_history: Arc<TrackHistoryStore>,
        p56_history: Arc<P56HistoryStore>,
        read_cache: Arc<ReadCache>,
        config: &Config,
    ) -> Self {
        let tracker_cfg = TrackerConfig {
            altitude_ceiling_ft: 17_999.0,
            dedup_window: chrono::Duration::seconds(config.dedup_window_seconds),
            exit_confirm_ticks: config.exit_confirm_ticks,
            ..TrackerConfig::default()
        };
        Self {
            geo,
            snapshots,
            track_history,
            p56_history,
            read_cache,
            configured_radius_nm: config.trim_radius_nm,
            tracker_cfg,
            running: Arc::new(AtomicBool::new(false)),
            overrun_count: Arc::new(std::sync::atomic::AtomicU64::new(0)),
        }
    }

    pub fn overrun_count(&self) -> u64 {
        self.overrun_count.load(Ordering::Relaxed)
    }

    /// Called synchronously from the fetcher's dispatch. Spawns the actual
    /// work onto another task so the fetcher's poll loop is never blocked;
    /// an in-flight precompute causes this tick to be skipped entirely.
    pub fn on_tick(self: &Arc<Self>, snapshot: Snapshot, raw_json: String) {
        if self.running.swap(true, Ordering::AcqRel) {
            self.overrun_count.fetch_add(1, Ordering::Relaxed);
            tracing::warn!("precompute overrun: previous tick still running, skipping");
            return;
        }

        let pipeline = Arc::clone(self);
        tokio::spawn(async move {
            pipeline.run_tick(snapshot, raw_json).await;
            pipeline.running.store(false, Ordering::Release);
        });
    }

    async fn run_tick(&self, snapshot: Snapshot, raw_json: String) {
        let computed_at = chrono::Utc::now();
        let total_aircraft = snapshot.aircraft.len();

        // 1. Append to Snapshot Store (durability failure is logged, never
        //    fatal — the in-memory ring append inside `append` always
        //    succeeds so the rest of this tick still has data to work with).
        if let Err(err) = self.snapshots.append(snapshot.clone(), &raw_json).await {
            tracing::error!(%err, "snapshot store append failed, continuing with in-memory state");
        }

        // 2-3. Effective radius + trim.
        let effective_radius = effective_radius_nm(self.configured_radius_nm, total_aircraft);
        let surge_mode = effective_radius < self.configured_radius_nm;
        let trimmed: Vec<vncrcc_core::Aircraft> = snapshot
            .aircraft
            .iter()
            .filter(|a| dca_radial_range(a.latitude, a.longitude).range_nm <= effective_radius)
            .cloned()
            .collect();
        let processed_aircraft = trimmed.len();

        // 4. Track History Store update, scoped to the trimmed set.
        self.track_history.update_from_aircraft(&trimmed, snapshot.fetched_at);
        if let Err(err) = self.track_history.flush().await {
            tracing::error!(%err, "track history flush failed");
        }

        // 5-6. Geofence classification + P-56 intrusion tracker: pure
        // CPU-bound geometry work (point-in-polygon, segment-cross,
        // self-intersection checks), offloaded to a blocking worker so it
        // never shares a cooperative-scheduler slot with the fetcher's
        // network I/O.
        let (prev, latest) = self.snapshots.latest_two();
        let latest = latest.unwrap_or(snapshot);
        let tracker_now = latest.fetched_at;
        let geo = Arc::clone(&self.geo);
        let track_history = Arc::clone(&self.track_history);
        let p56_history = Arc::clone(&self.p56_history);
        let tracker_cfg = self.tracker_cfg.clone();
        let trimmed_for_classify = trimmed.clone();
        let latest_for_tracker = latest.clone();
        let classify_result = tokio::task::spawn_blocking(move || {
            let sfra_matches = geo
                .find_by_keyword("sfra")
                .map(|features| classify(&trimmed_for_classify, &features, Some(17_999.0)))
                .unwrap_or_default();
            let frz_matches = geo
                .find_by_keyword("frz")
                .map(|features| classify(&trimmed_for_classify, &features, Some(17_999.0)))
                .unwrap_or_default();
            let p56_features = geo.find_by_keyword("p56");
            let p56_matches = p56_features
                .as_ref()
                .map(|features| classify(&trimmed_for_classify, features, Some(17_999.0)))
                .unwrap_or_default();
            let incidents = match &p56_features {
                Some(p56_features) => p56_history.with_mut(|history| {
                    run_tick(
                        history,
                        track_history.as_ref(),
                        prev.as_ref(),
                        &latest_for_tracker,
                        p56_features,
                        tracker_now,
                        &tracker_cfg,
                    )
                }),
                None => Vec::new(),
            };
            (sfra_matches, frz_matches, p56_matches, incidents)
        })
        .await;

        let (sfra_matches, frz_matches, p56_matches, incidents) = match classify_result {
            Ok(result) => result,
            Err(err) => {
                tracing::error!(%err, "classification worker panicked, skipping this tick's geofence output");
                (Vec::new(), Vec::new(), Vec::new(), Vec::new())
            }
        };

        for incident in &incidents {
            if let Err(err) = self.snapshots.append_incident(incident).await {
                tracing::error!(%err, "incident append failed");
            }
        }
        if let Err(err) = self.p56_history.flush().await {
            tracing::error!(%err, "p56 history flush failed");
        }

        // 7. Publish atomically to the Read Cache.
        let bundle = PublishedBundle {
            aircraft_list: AircraftListBundle {
                aircraft: trimmed,
                computed_at,
                vatsim_update_timestamp: latest.upstream_ts,
                trim_radius_nm: effective_radius,
            },
            sfra: GeofenceBundle { aircraft_count: sfra_matches.len(), aircraft: sfra_matches, computed_at },
            frz: GeofenceBundle { aircraft_count: frz_matches.len(), aircraft: frz_matches, computed_at },
            p56: P56Bundle {
                aircraft: p56_matches,
                history: P56HistoryView::from(self.p56_history.snapshot()),
                computed_at,
            },
            system_status: SystemStatusBundle {
                surge_mode,
                total_aircraft_vatsim: total_aircraft,
                processed_aircraft,
                configured_radius_nm: self.configured_radius_nm,
                effective_radius_nm: effective_radius,
                computed_at,
            },
        };
        self.read_cache.publish(bundle);
    }
}
