//! Track History Store: a bounded `cid -> ring[K]` map of recent positions
//! for every aircraft currently in range, persisted to
//! `aircraft_history.json` with write-behind coalescing (accumulated in
//! memory, flushed once per tick rather than once per mutation) via atomic
//! tmp-file-then-rename.

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use vncrcc_core::{Aircraft, TrackPoint};

use crate::error::PersistError;

#[derive(Debug, Serialize, Deserialize, Default)]
struct HistoryFile {
    history: HashMap<String, Vec<TrackPoint>>,
}

/// `cid -> ring[K]`, holding the most recent `K` track points per identity
/// key, oldest-to-newest. Single writer (the pipeline), many readers.
pub struct TrackHistoryStore {
    rings: DashMap<String, VecDeque<TrackPoint>>,
    ring_size: usize,
    path: PathBuf,
}

impl TrackHistoryStore {
    pub fn new(ring_size: usize, path: impl Into<PathBuf>) -> Self {
        Self { rings: DashMap::new(), ring_size: ring_size.max(1), path: path.into() }
    }

    /// Loads the on-disk shape if present; a missing or corrupt file starts
    /// from an empty store rather than failing boot — a durability read
    /// failure is never fatal.
    pub async fn load(ring_size: usize, path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let store = Self::new(ring_size, path.clone());
        match tokio::fs::read_to_string(&path).await {
            Ok(raw) => match serde_json::from_str::<HistoryFile>(&raw) {
                Ok(file) => {
                    for (cid, points) in file.history {
                        let mut ring: VecDeque<TrackPoint> = points.into_iter().collect();
                        while ring.len() > store.ring_size {
                            ring.pop_front();
                        }
                        store.rings.insert(cid, ring);
                    }
                }
                Err(err) => tracing::warn!(file = %path.display(), %err, "aircraft_history.json unreadable, starting empty"),
            },
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => tracing::warn!(file = %path.display(), %err, "failed to read aircraft_history.json"),
        }
        store
    }

    /// Atomically (a) drops every CID not in `allowed_cids`, (b) appends the
    /// given point to each listed CID's ring, evicting the oldest entry once
    /// the ring exceeds `ring_size`.
    pub fn update_batch(&self, updates: &[(String, TrackPoint)], allowed_cids: &HashSet<String>) {
        self.rings.retain(|cid, _| allowed_cids.contains(cid));

        for (cid, point) in updates {
            if !allowed_cids.contains(cid) {
                continue;
            }
            let mut ring = self.rings.entry(cid.clone()).or_insert_with(VecDeque::new);
            ring.push_back(point.clone());
            while ring.len() > self.ring_size {
                ring.pop_front();
            }
        }
    }

    /// Convenience wrapper over `update_batch` that derives both the point
    /// list and the allowed-CID set from a trimmed aircraft list, per the
    /// pipeline's step 4.
    pub fn update_from_aircraft(&self, aircraft: &[Aircraft], fetched_at: chrono::DateTime<chrono::Utc>) {
        let allowed: HashSet<String> = aircraft.iter().map(|a| a.identity_key()).collect();
        let updates: Vec<(String, TrackPoint)> = aircraft
            .iter()
            .map(|a| (a.identity_key(), TrackPoint::from_aircraft(a, fetched_at)))
            .collect();
        self.update_batch(&updates, &allowed);
    }

    /// A deep-read snapshot of every ring, oldest-to-newest.
    pub fn get_all(&self) -> HashMap<String, Vec<TrackPoint>> {
        self.rings.iter().map(|entry| (entry.key().clone(), entry.value().iter().cloned().collect())).collect()
    }

    /// The most recent `limit` points for `cid`, oldest-to-newest.
    pub fn get(&self, cid: &str, limit: usize) -> Vec<TrackPoint> {
        self.rings
            .get(cid)
            .map(|ring| {
                let len = ring.len();
                let skip = len.saturating_sub(limit);
                ring.iter().skip(skip).cloned().collect()
            })
            .unwrap_or_default()
    }

    /// Persists the current state to `path` via tmp-file-and-rename, the
    /// same atomicity contract as `p56_history.py::_atomic_write`. Intended
    /// to be called once per tick (write-behind), not per mutation.
    pub async fn flush(&self) -> Result<(), PersistError> {
        let file = HistoryFile { history: self.get_all() };
        let body = serde_json::to_string_pretty(&file).map_err(|source| PersistError::Serialize {
            path: self.path.display().to_string(),
            source,
        })?;
        atomic_write(&self.path, &body).await
    }
}

impl vncrcc_core::TrackHistorySource for TrackHistoryStore {
    /// The P-56 tracker's `pre_positions` candidate source: recent points
    /// for `id`, oldest-to-newest, uncapped by this trait (the tracker
    /// applies its own `pre_position_cap` while walking backwards).
    fn recent(&self, id: &str) -> Vec<TrackPoint> {
        self.get(id, self.ring_size)
    }
}

async fn atomic_write(path: &Path, body: &str) -> Result<(), PersistError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await.map_err(|source| PersistError::FileWrite {
                path: path.display().to_string(),
                source,
            })?;
        }
    }
    let tmp = path.with_extension("tmp");
    tokio::fs::write(&tmp, body).await.map_err(|source| PersistError::FileWrite {
        path: tmp.display().to_string(),
        source,
    })?;
    tokio::fs::rename(&tmp, path).await.map_err(|source| PersistError::FileWrite {
        path: path.display().to_string(),
        source,
    })?;
    Ok(())
}
