//! Domain model and detection logic for DC-area airspace surveillance.
//!
//! Pure logic, no networking or persistence: ingest, HTTP, and file I/O live
//! in `vncrcc-server`. This crate is the part of the system that is cheap to
//! unit-test exhaustively.

pub mod error;
pub mod geo_registry;
pub mod geofence;
pub mod models;
pub mod spatial;
pub mod tracker;

pub use error::{GeoError, ObservationError};
pub use geo_registry::{GeoRegistry, PolygonFeature};
pub use geofence::classify;
pub use models::{
    Aircraft, CurrentInsideState, DcaRadialRange, EvidenceLine, FeatureProperties, FlightPlanInfo,
    GeofenceMatch, Incident, IntrusionEvent, P56History, Snapshot, TrackPoint,
};
pub use tracker::{run_tick, Detection, TrackHistorySource, TrackerConfig};
