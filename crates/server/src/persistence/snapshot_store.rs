//! Snapshot Store: an append-only, trimmed-to-N ring of the most recent
//! upstream snapshots, kept in memory for the read latency the pipeline
//! needs, with a durable sqlite-backed shadow copy plus the
//! intrusion-incident log.

use std::collections::VecDeque;
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use vncrcc_core::{Incident, Snapshot};

use crate::error::PersistError;

pub struct SnapshotStore {
    pool: SqlitePool,
    ring: RwLock<VecDeque<Snapshot>>,
    keep_recent: usize,
}

impl SnapshotStore {
    pub fn new(pool: SqlitePool, keep_recent: usize) -> Self {
        Self { pool, ring: RwLock::new(VecDeque::with_capacity(keep_recent)), keep_recent }
    }

    /// Appends `snapshot` to the in-memory ring unconditionally (so the
    /// pipeline always has a live "latest" regardless of durability
    /// outcome), then best-effort persists the raw payload. A durability
    /// failure is returned to the caller to log; it never rolls back the
    /// in-memory append.
    pub async fn append(&self, snapshot: Snapshot, raw_json: &str) -> Result<(), PersistError> {
        {
            let mut ring = self.ring.write().expect("snapshot ring lock poisoned");
            ring.push_back(snapshot.clone());
            while ring.len() > self.keep_recent {
                ring.pop_front();
            }
        }

        sqlx::query("INSERT INTO snapshots (fetched_at, upstream_ts, raw_json) VALUES (?1, ?2, ?3)")
            .bind(snapshot.fetched_at.to_rfc3339())
            .bind(snapshot.upstream_ts.map(|ts| ts.to_rfc3339()))
            .bind(raw_json)
            .execute(&self.pool)
            .await?;

        // A durable row only matters for the newest `keep_recent`; drop the rest
        // lazily rather than racing the writer on every tick.
        sqlx::query(
            "DELETE FROM snapshots WHERE id NOT IN (SELECT id FROM snapshots ORDER BY fetched_at DESC LIMIT ?1)",
        )
        .bind(self.keep_recent as i64)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub fn latest(&self) -> Option<Snapshot> {
        self.ring.read().expect("snapshot ring lock poisoned").back().cloned()
    }

    /// The two newest snapshots, `(prev, latest)`. `prev` is `None` until a
    /// second snapshot has been appended.
    pub fn latest_two(&self) -> (Option<Snapshot>, Option<Snapshot>) {
        let ring = self.ring.read().expect("snapshot ring lock poisoned");
        let latest = ring.back().cloned();
        let prev = if ring.len() >= 2 { ring.get(ring.len() - 2).cloned() } else { None };
        (prev, latest)
    }

    pub fn latest_n(&self, n: usize) -> Vec<Snapshot> {
        let ring = self.ring.read().expect("snapshot ring lock poisoned");
        ring.iter().rev().take(n).cloned().collect()
    }

    pub fn retained_count(&self) -> usize {
        self.ring.read().expect("snapshot ring lock poisoned").len()
    }

    pub async fn append_incident(&self, incident: &Incident) -> Result<(), PersistError> {
        sqlx::query(
            r#"
            INSERT INTO incidents (detected_at, callsign, cid, name, lat, lon, altitude, zone, evidence_json)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
        )
        .bind(incident.detected_at.to_rfc3339())
        .bind(&incident.callsign)
        .bind(incident.cid)
        .bind(&incident.name)
        .bind(incident.lat)
        .bind(incident.lon)
        .bind(incident.altitude)
        .bind(&incident.zone)
        .bind(&incident.evidence_json)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn list_incidents(&self, limit: i64) -> Result<Vec<Incident>, PersistError> {
        let rows = sqlx::query_as::<_, IncidentRow>(
            "SELECT detected_at, callsign, cid, name, lat, lon, altitude, zone, evidence_json \
             FROM incidents ORDER BY detected_at DESC LIMIT ?1",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    /// Clears the durable incident log. Used only by the admin purge command.
    pub async fn purge_incidents(&self) -> Result<(), PersistError> {
        crate::persistence::db::purge_incidents(&self.pool).await
    }
}

#[derive(sqlx::FromRow)]
struct IncidentRow {
    detected_at: String,
    callsign: String,
    cid: Option<i64>,
    name: Option<String>,
    lat: f64,
    lon: f64,
    altitude: Option<f64>,
    zone: String,
    evidence_json: String,
}

impl From<IncidentRow> for Incident {
    fn from(row: IncidentRow) -> Self {
        let detected_at = DateTime::parse_from_rfc3339(&row.detected_at)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now());
        Incident {
            detected_at,
            callsign: row.callsign,
            cid: row.cid,
            name: row.name,
            lat: row.lat,
            lon: row.lon,
            altitude: row.altitude,
            zone: row.zone,
            evidence_json: row.evidence_json,
        }
    }
}
