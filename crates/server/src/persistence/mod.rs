//! Persistence layer: sqlite-backed snapshot/incident store plus the two
//! write-behind JSON histories (track history, P-56 history).

pub mod db;
pub mod p56_history;
pub mod snapshot_store;
pub mod track_history;

pub use db::{init_database, Database};
pub use p56_history::P56HistoryStore;
pub use snapshot_store::SnapshotStore;
pub use track_history::TrackHistoryStore;
