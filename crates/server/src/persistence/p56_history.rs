//! P-56 history store: the durable home for the tracker's `P56History`
//! (event log + `current_inside` map), loaded once at boot and mutated
//! in-memory thereafter with a write-behind flush to `p56_history.json` via
//! atomic tmp-file-then-rename.

use std::path::{Path, PathBuf};
use std::sync::RwLock;

use vncrcc_core::P56History;

use crate::error::PersistError;

pub struct P56HistoryStore {
    history: RwLock<P56History>,
    path: PathBuf,
}

impl P56HistoryStore {
    /// Loads the on-disk history if present; a missing or corrupt file
    /// starts from an empty history rather than failing boot.
    pub async fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let history = match tokio::fs::read_to_string(&path).await {
            Ok(raw) => serde_json::from_str(&raw).unwrap_or_else(|err| {
                tracing::warn!(file = %path.display(), %err, "p56_history.json unreadable, starting empty");
                P56History::default()
            }),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => P56History::default(),
            Err(err) => {
                tracing::warn!(file = %path.display(), %err, "failed to read p56_history.json");
                P56History::default()
            }
        };
        Self { history: RwLock::new(history), path }
    }

    /// Runs `f` with exclusive access to the in-memory history, for the
    /// pipeline's single-writer tracker tick. Returns whatever `f` returns.
    pub fn with_mut<R>(&self, f: impl FnOnce(&mut P56History) -> R) -> R {
        let mut guard = self.history.write().expect("p56 history lock poisoned");
        f(&mut guard)
    }

    pub fn snapshot(&self) -> P56History {
        self.history.read().expect("p56 history lock poisoned").clone()
    }

    /// Write-behind flush: call once per tick after mutation, not once per
    /// write, so a busy tick still costs one fsync.
    pub async fn flush(&self) -> Result<(), PersistError> {
        let snapshot = self.snapshot();
        let body = serde_json::to_string_pretty(&snapshot).map_err(|source| PersistError::Serialize {
            path: self.path.display().to_string(),
            source,
        })?;
        atomic_write(&self.path, &body).await
    }

    /// Admin purge: replaces the event log with an empty structure.
    /// Exclusive against concurrent pipeline writes by the same `RwLock`
    /// the tick path uses.
    pub async fn purge_all(&self) -> Result<(), PersistError> {
        {
            let mut guard = self.history.write().expect("p56 history lock poisoned");
            *guard = P56History::default();
        }
        self.flush().await
    }

    /// Selective purge by `(id, recorded_at)` key list.
    pub async fn purge_keys(&self, keys: &[(String, chrono::DateTime<chrono::Utc>)]) -> Result<(), PersistError> {
        {
            let mut guard = self.history.write().expect("p56 history lock poisoned");
            guard.events.retain(|e| !keys.iter().any(|(id, ts)| &e.id == id && e.recorded_at == *ts));
            let remaining_ids: std::collections::HashSet<&str> =
                guard.events.iter().map(|e| e.id.as_str()).collect();
            guard.current_inside.retain(|id, _| remaining_ids.contains(id.as_str()));
        }
        self.flush().await
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

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use vncrcc_core::{CurrentInsideState, IntrusionEvent};

    fn sample_event(id: &str, recorded_at: chrono::DateTime<Utc>) -> IntrusionEvent {
        IntrusionEvent {
            cid: Some(1),
            id: id.to_string(),
            callsign: "TST1".into(),
            name: None,
            flight_plan: None,
            recorded_at,
            latest_ts: recorded_at,
            exit_detected_at: None,
            exit_confirmed_at: None,
            zones: vec!["P-56A".into()],
            prev_position: None,
            latest_position: (38.9, -77.03),
            evidence_line: None,
            pre_positions: Vec::new(),
            intrusion_positions: Vec::new(),
        }
    }

    #[tokio::test]
    async fn flush_then_load_round_trips() {
        let dir = std::env::temp_dir().join(format!("vncrcc-p56-history-test-{}", std::process::id()));
        tokio::fs::create_dir_all(&dir).await.unwrap();
        let path = dir.join("p56_history.json");

        let store = P56HistoryStore::load(&path).await;
        let now = Utc::now();
        store.with_mut(|h| {
            h.events.push(sample_event("1", now));
            h.current_inside.insert(
                "1".to_string(),
                CurrentInsideState { inside: true, p56_buster: true, outside_count: 0, last_seen: now, last_position: (38.9, -77.03) },
            );
        });
        store.flush().await.unwrap();

        let reloaded = P56HistoryStore::load(&path).await;
        let snapshot = reloaded.snapshot();
        assert_eq!(snapshot.events.len(), 1);
        assert!(snapshot.current_inside.get("1").unwrap().p56_buster);

        tokio::fs::remove_dir_all(&dir).await.ok();
    }

    #[tokio::test]
    async fn purge_all_clears_everything() {
        let dir = std::env::temp_dir().join(format!("vncrcc-p56-purge-test-{}", std::process::id()));
        tokio::fs::create_dir_all(&dir).await.unwrap();
        let path = dir.join("p56_history.json");

        let store = P56HistoryStore::load(&path).await;
        let now = Utc::now();
        store.with_mut(|h| h.events.push(sample_event("1", now)));
        store.purge_all().await.unwrap();

        assert!(store.snapshot().events.is_empty());
        tokio::fs::remove_dir_all(&dir).await.ok();
    }

    #[tokio::test]
    async fn purge_keys_removes_only_matching_event() {
        let dir = std::env::temp_dir().join(format!("vncrcc-p56-purge-keys-test-{}", std::process::id()));
        tokio::fs::create_dir_all(&dir).await.unwrap();
        let path = dir.join("p56_history.json");

        let store = P56HistoryStore::load(&path).await;
        let now = Utc::now();
        let later = now + chrono::Duration::seconds(120);
        store.with_mut(|h| {
            h.events.push(sample_event("1", now));
            h.events.push(sample_event("1", later));
        });
        store.purge_keys(&[("1".to_string(), now)]).await.unwrap();

        let snapshot = store.snapshot();
        assert_eq!(snapshot.events.len(), 1);
        assert_eq!(snapshot.events[0].recorded_at, later);

        tokio::fs::remove_dir_all(&dir).await.ok();
    }
}
