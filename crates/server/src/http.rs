//! `/health`/`/ready` operability surface. The dashboard-facing read API
//! itself lives outside this service and simply reads the cached bundles
//! this process publishes; this module only covers liveness/readiness.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use tower_http::trace::TraceLayer;

use crate::persistence::Database;

/// Tracks the last time the fetcher successfully dispatched a tick, for the
/// `/ready` staleness check. The fetcher calls `mark` once per successful
/// fetch; `age_seconds` is `None` before the first tick.
#[derive(Default)]
pub struct FetchHeartbeat {
    last_tick_unix_secs: AtomicI64,
}

impl FetchHeartbeat {
    pub fn new() -> Self {
        Self { last_tick_unix_secs: AtomicI64::new(0) }
    }

    pub fn mark(&self) {
        let now = SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs() as i64).unwrap_or(0);
        self.last_tick_unix_secs.store(now, Ordering::Relaxed);
    }

    fn age_seconds(&self) -> Option<u64> {
        let last = self.last_tick_unix_secs.load(Ordering::Relaxed);
        if last == 0 {
            return None;
        }
        let now = SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs() as i64).unwrap_or(0);
        Some(now.saturating_sub(last).max(0) as u64)
    }
}

pub struct HealthState {
    pub db: Arc<Database>,
    pub heartbeat: Arc<FetchHeartbeat>,
    pub heartbeat_stale_after_seconds: u64,
}

#[derive(Serialize)]
struct ReadyResponse {
    ok: bool,
    db_ok: bool,
    db_latency_ms: Option<u128>,
    fetch_age_seconds: Option<u64>,
    fetch_ok: bool,
    error: Option<String>,
}

async fn ready_handler(State(state): State<Arc<HealthState>>) -> impl IntoResponse {
    let started_at = Instant::now();
    let db_result = tokio::time::timeout(
        Duration::from_millis(750),
        sqlx::query("SELECT 1").execute(state.db.pool()),
    )
    .await;

    let (db_ok, db_latency_ms, db_error) = match db_result {
        Ok(Ok(_)) => (true, Some(started_at.elapsed().as_millis()), None),
        Ok(Err(err)) => (false, Some(started_at.elapsed().as_millis()), Some(err.to_string())),
        Err(_) => (false, Some(started_at.elapsed().as_millis()), Some("database ping timed out".to_string())),
    };

    let fetch_age_seconds = state.heartbeat.age_seconds();
    let fetch_ok = match fetch_age_seconds {
        Some(age) => age <= state.heartbeat_stale_after_seconds,
        None => false,
    };

    let ok = db_ok && fetch_ok;
    let status = if ok { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    let error = db_error.or_else(|| if !fetch_ok { Some("fetcher heartbeat stale or not yet started".to_string()) } else { None });

    (status, Json(ReadyResponse { ok, db_ok, db_latency_ms, fetch_age_seconds, fetch_ok, error }))
}

pub fn router(state: Arc<HealthState>) -> Router {
    Router::new()
        .route("/health", get(|| async { "OK" }))
        .route("/ready", get(ready_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
