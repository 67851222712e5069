//! Process configuration, loaded once from the environment at startup.

use std::env;

use crate::error::BootError;

#[derive(Debug, Clone)]
pub struct Config {
    // Domain fields.
    pub upstream_url: String,
    pub poll_interval_seconds: u64,
    pub trim_radius_nm: f64,
    pub snapshot_retain: usize,
    pub track_ring_size: usize,
    pub dedup_window_seconds: i64,
    pub exit_confirm_ticks: u32,
    pub admin_password: Option<String>,

    // Ambient fields.
    pub bind_addr: String,
    pub log_format: String,
    pub database_path: String,
    pub geo_dir: String,
    pub track_history_path: String,
    pub p56_history_path: String,
    pub heartbeat_stale_after_seconds: u64,
}

impl Config {
    /// Reads every field from the environment, applying documented defaults.
    /// Does not validate — call `validate` separately so boot-time checks
    /// stay in one place and are easy to unit test without the environment.
    pub fn from_env() -> Self {
        Self {
            upstream_url: env::var("VNCRCC_UPSTREAM_URL").unwrap_or_default(),
            poll_interval_seconds: env::var("VNCRCC_POLL_INTERVAL_SECONDS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(15),
            trim_radius_nm: env::var("VNCRCC_TRIM_RADIUS_NM")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(300.0),
            snapshot_retain: env::var("VNCRCC_SNAPSHOT_RETAIN")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(100),
            track_ring_size: env::var("VNCRCC_TRACK_RING_SIZE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(10),
            dedup_window_seconds: env::var("VNCRCC_DEDUP_WINDOW_SECONDS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(60),
            exit_confirm_ticks: env::var("VNCRCC_EXIT_CONFIRM_TICKS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(10),
            admin_password: env::var("ADMIN_PASSWORD").ok().filter(|s| !s.is_empty()),

            bind_addr: env::var("VNCRCC_BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string()),
            log_format: env::var("VNCRCC_LOG_FORMAT").unwrap_or_else(|_| "text".to_string()),
            database_path: env::var("VNCRCC_DATABASE_PATH").unwrap_or_else(|_| "vncrcc.db".to_string()),
            geo_dir: env::var("VNCRCC_GEO_DIR").unwrap_or_else(|_| "./geo".to_string()),
            track_history_path: env::var("VNCRCC_TRACK_HISTORY_PATH")
                .unwrap_or_else(|_| "aircraft_history.json".to_string()),
            p56_history_path: env::var("VNCRCC_P56_HISTORY_PATH")
                .unwrap_or_else(|_| "p56_history.json".to_string()),
            heartbeat_stale_after_seconds: env::var("VNCRCC_HEARTBEAT_STALE_AFTER_SECONDS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(90),
        }
    }

    /// Fails fast on the two fields that are fatal at boot: a
    /// missing/unparseable upstream URL and an unreadable geo directory. All
    /// other fields have acceptable defaults and are never boot-fatal.
    pub fn validate(&self) -> Result<(), BootError> {
        if self.upstream_url.trim().is_empty() {
            return Err(BootError::MissingRequired { field: "VNCRCC_UPSTREAM_URL" });
        }
        if reqwest::Url::parse(&self.upstream_url).is_err() {
            return Err(BootError::Unparseable {
                field: "VNCRCC_UPSTREAM_URL",
                value: self.upstream_url.clone(),
            });
        }
        if !std::path::Path::new(&self.geo_dir).is_dir() {
            return Err(BootError::MissingRequired { field: "VNCRCC_GEO_DIR" });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_upstream_url_fails_validation() {
        let mut config = Config::from_env();
        config.upstream_url.clear();
        config.geo_dir = ".".to_string();
        assert!(matches!(config.validate(), Err(BootError::MissingRequired { .. })));
    }

    #[test]
    fn unparseable_upstream_url_fails_validation() {
        let mut config = Config::from_env();
        config.upstream_url = "not a url".to_string();
        config.geo_dir = ".".to_string();
        assert!(matches!(config.validate(), Err(BootError::Unparseable { .. })));
    }

    #[test]
    fn missing_geo_dir_fails_validation() {
        let mut config = Config::from_env();
        config.upstream_url = "https://example.com/feed.json".to_string();
        config.geo_dir = "/does/not/exist/at/all".to_string();
        assert!(matches!(config.validate(), Err(BootError::MissingRequired { .. })));
    }
}
