//! vncrcc-server: always-on ingest, classification, and read-serving
//! backend for DC-area airspace surveillance.

mod admin;
mod backoff;
mod config;
mod error;
mod fetcher;
mod http;
mod persistence;
mod pipeline;
mod read_cache;

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use tokio::sync::broadcast;
use vncrcc_core::GeoRegistry;

use crate::backoff::Backoff;
use crate::config::Config;
use crate::fetcher::Fetcher;
use crate::http::{FetchHeartbeat, HealthState};
use crate::persistence::{P56HistoryStore, SnapshotStore, TrackHistoryStore};
use crate::pipeline::Pipeline;
use crate::read_cache::ReadCache;

#[tokio::main]
async fn main() -> Result<()> {
    let env_filter = tracing_subscriber::EnvFilter::from_default_env()
        .add_directive("vncrcc_server=info".parse()?);
    let config = Config::from_env();
    if config.log_format.trim().eq_ignore_ascii_case("json") {
        tracing_subscriber::fmt().json().with_env_filter(env_filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    }

    tracing::info!("starting vncrcc-server");

    // Config/boot failures are the only ones that abort the process.
    if let Err(err) = config.validate() {
        bail!("configuration invalid: {err}");
    }

    let geo = GeoRegistry::load(Path::new(&config.geo_dir)).context("failed to load geo registry")?;
    let geo = Arc::new(geo);

    let db = persistence::init_database(&config.database_path, 4)
        .await
        .context("failed to initialize database")?;
    let snapshots = Arc::new(SnapshotStore::new(db.pool().clone(), config.snapshot_retain));
    let track_history =
        Arc::new(TrackHistoryStore::load(config.track_ring_size, &config.track_history_path).await);
    let p56_history = Arc::new(P56HistoryStore::load(&config.p56_history_path).await);
    let read_cache = Arc::new(ReadCache::new());

    let pipeline = Arc::new(Pipeline::new(
        Arc::clone(&geo),
        Arc::clone(&snapshots),
        Arc::clone(&track_history),
        Arc::clone(&p56_history),
        Arc::clone(&read_cache),
        &config,
    ));

    let heartbeat = Arc::new(FetchHeartbeat::new());
    let (shutdown_tx, _) = broadcast::channel(1);

    {
        let pipeline = Arc::clone(&pipeline);
        let heartbeat = Arc::clone(&heartbeat);
        let upstream_url = config.upstream_url.clone();
        let poll_interval_seconds = config.poll_interval_seconds;
        let shutdown_rx = shutdown_tx.subscribe();
        tokio::spawn(spawn_supervised_fetcher(
            upstream_url,
            poll_interval_seconds,
            pipeline,
            heartbeat,
            shutdown_rx,
        ));
    }

    let health_state = Arc::new(HealthState {
        db: Arc::new(db),
        heartbeat,
        heartbeat_stale_after_seconds: config.heartbeat_stale_after_seconds,
    });
    let app = http::router(health_state);

    let addr: SocketAddr = config.bind_addr.parse().context("invalid bind address")?;
    tracing::info!(%addr, "listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal(shutdown_tx.clone()))
        .await?;

    Ok(())
}

/// Supervises the Fetcher, restarting it with a fixed backoff if it exits
/// unexpectedly. `Fetcher::run` only returns on its own shutdown signal, so
/// a restart here means the task panicked; each restart rebuilds a fresh
/// `Fetcher` (fresh HTTP client, fresh adaptive-cadence state) since the old
/// one was consumed by the aborted task.
async fn spawn_supervised_fetcher(
    upstream_url: String,
    poll_interval_seconds: u64,
    pipeline: Arc<Pipeline>,
    heartbeat: Arc<FetchHeartbeat>,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    let mut backoff = Backoff::new(Duration::from_secs(1), Duration::from_secs(30));
    loop {
        let fetcher = Fetcher::new(upstream_url.clone(), poll_interval_seconds);
        let task_shutdown = shutdown_rx.resubscribe();
        let pipeline = Arc::clone(&pipeline);
        let heartbeat = Arc::clone(&heartbeat);
        let handle = tokio::spawn(async move {
            fetcher
                .run(
                    move |snapshot, raw_json| {
                        heartbeat.mark();
                        pipeline.on_tick(snapshot, raw_json);
                    },
                    task_shutdown,
                )
                .await;
        });
        tokio::pin!(handle);

        tokio::select! {
            biased;
            _ = shutdown_rx.recv() => {
                handle.as_mut().abort();
                break;
            }
            result = &mut handle => {
                match result {
                    Ok(_) => break, // clean shutdown from within Fetcher::run
                    Err(err) => tracing::error!("fetcher loop crashed: {}", err),
                }
            }
        }

        if shutdown_rx.try_recv().is_ok() {
            break;
        }

        let delay = backoff.fail();
        tracing::warn!(delay_ms = delay.as_millis() as u64, "restarting fetcher loop");
        tokio::time::sleep(delay).await;
    }
}

#[cfg(unix)]
async fn shutdown_signal(shutdown_tx: broadcast::Sender<()>) {
    match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
        Ok(mut sigterm) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {},
                _ = sigterm.recv() => {},
            }
        }
        Err(err) => {
            tracing::warn!("failed to install SIGTERM handler (CTRL-C only): {}", err);
            let _ = tokio::signal::ctrl_c().await;
        }
    }
    tracing::info!("shutdown signal received");
    let _ = shutdown_tx.send(());
    // Give the fetcher's in-flight HTTP request/precompute time to drain,
    // bounded by the upstream client's own 60s total timeout.
    tokio::time::sleep(Duration::from_millis(100)).await;
}

#[cfg(not(unix))]
async fn shutdown_signal(shutdown_tx: broadcast::Sender<()>) {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown signal received");
    let _ = shutdown_tx.send(());
}
