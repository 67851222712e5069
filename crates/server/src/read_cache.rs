//! Read Cache: the single shared read surface between the pipeline (single
//! writer) and HTTP handlers (many readers). No age-based eviction — only
//! replace-on-publish, since every key is always present once the first
//! precompute completes.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;

use vncrcc_core::{GeofenceMatch, IntrusionEvent, P56History};

/// `aircraft_list` payload.
#[derive(Debug, Clone, Serialize)]
pub struct AircraftListBundle {
    pub aircraft: Vec<vncrcc_core::Aircraft>,
    pub computed_at: DateTime<Utc>,
    pub vatsim_update_timestamp: Option<DateTime<Utc>>,
    pub trim_radius_nm: f64,
}

/// `sfra`/`frz` payload.
#[derive(Debug, Clone, Serialize)]
pub struct GeofenceBundle {
    pub aircraft: Vec<GeofenceMatch>,
    pub computed_at: DateTime<Utc>,
    pub aircraft_count: usize,
}

/// `p56` payload: the latest breach list plus the durable history.
#[derive(Debug, Clone, Serialize)]
pub struct P56Bundle {
    pub aircraft: Vec<GeofenceMatch>,
    pub history: P56HistoryView,
    pub computed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct P56HistoryView {
    pub events: Vec<IntrusionEvent>,
    pub current_inside: std::collections::HashMap<String, vncrcc_core::CurrentInsideState>,
}

impl From<P56History> for P56HistoryView {
    fn from(history: P56History) -> Self {
        Self { events: history.events, current_inside: history.current_inside }
    }
}

/// `system_status` payload.
#[derive(Debug, Clone, Serialize)]
pub struct SystemStatusBundle {
    pub surge_mode: bool,
    pub total_aircraft_vatsim: usize,
    pub processed_aircraft: usize,
    pub configured_radius_nm: f64,
    pub effective_radius_nm: f64,
    pub computed_at: DateTime<Utc>,
}

/// The single published bundle this tick, keyed by its five named parts.
#[derive(Clone)]
pub struct PublishedBundle {
    pub aircraft_list: AircraftListBundle,
    pub sfra: GeofenceBundle,
    pub frz: GeofenceBundle,
    pub p56: P56Bundle,
    pub system_status: SystemStatusBundle,
}

/// Distinguished read state: before the first successful precompute, reads
/// must surface an explicit "initializing" signal, never an error.
#[derive(Clone)]
pub enum ReadState<T> {
    Initializing,
    Ready(T),
}

/// `DashMap`-backed single-writer/multi-reader cache of the latest
/// classification bundle. `publish` replaces the whole bundle atomically
/// (a single `DashMap` entry write) so readers never observe a partial mix
/// of this tick's `sfra` with last tick's `p56`.
pub struct ReadCache {
    slot: DashMap<(), PublishedBundle>,
}

impl ReadCache {
    pub fn new() -> Self {
        Self { slot: DashMap::new() }
    }

    pub fn publish(&self, bundle: PublishedBundle) {
        self.slot.insert((), bundle);
    }

    pub fn aircraft_list(&self) -> ReadState<AircraftListBundle> {
        self.read(|b| b.aircraft_list.clone())
    }

    pub fn sfra(&self) -> ReadState<GeofenceBundle> {
        self.read(|b| b.sfra.clone())
    }

    pub fn frz(&self) -> ReadState<GeofenceBundle> {
        self.read(|b| b.frz.clone())
    }

    pub fn p56(&self) -> ReadState<P56Bundle> {
        self.read(|b| b.p56.clone())
    }

    pub fn system_status(&self) -> ReadState<SystemStatusBundle> {
        self.read(|b| b.system_status.clone())
    }

    fn read<T>(&self, project: impl FnOnce(&PublishedBundle) -> T) -> ReadState<T> {
        match self.slot.get(&()) {
            Some(entry) => ReadState::Ready(project(entry.value())),
            None => ReadState::Initializing,
        }
    }
}

impl Default for ReadCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn empty_bundle() -> PublishedBundle {
        let now = Utc::now();
        PublishedBundle {
            aircraft_list: AircraftListBundle { aircraft: vec![], computed_at: now, vatsim_update_timestamp: None, trim_radius_nm: 300.0 },
            sfra: GeofenceBundle { aircraft: vec![], computed_at: now, aircraft_count: 0 },
            frz: GeofenceBundle { aircraft: vec![], computed_at: now, aircraft_count: 0 },
            p56: P56Bundle { aircraft: vec![], history: P56HistoryView { events: vec![], current_inside: Default::default() }, computed_at: now },
            system_status: SystemStatusBundle {
                surge_mode: false,
                total_aircraft_vatsim: 0,
                processed_aircraft: 0,
                configured_radius_nm: 300.0,
                effective_radius_nm: 300.0,
                computed_at: now,
            },
        }
    }

    #[test]
    fn reads_before_first_publish_are_initializing() {
        let cache = ReadCache::new();
        assert!(matches!(cache.aircraft_list(), ReadState::Initializing));
    }

    #[test]
    fn reads_after_publish_are_ready() {
        let cache = ReadCache::new();
        cache.publish(empty_bundle());
        assert!(matches!(cache.aircraft_list(), ReadState::Ready(_)));
        assert!(matches!(cache.system_status(), ReadState::Ready(_)));
    }

    #[test]
    fn publish_replaces_the_whole_bundle_atomically() {
        let cache = ReadCache::new();
        let mut bundle = empty_bundle();
        bundle.system_status.surge_mode = true;
        cache.publish(bundle);
        match cache.system_status() {
            ReadState::Ready(status) => assert!(status.surge_mode),
            ReadState::Initializing => panic!("expected ready"),
        }
    }
}
