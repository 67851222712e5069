//! Admin purge command: an authenticated "purge P-56 history" operation,
//! plus selective purge by `(cid, recorded_at)` key list. A plain
//! authenticated function, not an HTTP middleware — the transport layer
//! around it lives outside this service. The rejection never distinguishes
//! "wrong secret" from "no secret configured", so a failed auth attempt
//! can't be used to probe whether the service has one set at all.

use chrono::{DateTime, Utc};

use crate::error::AdminError;
use crate::persistence::{P56HistoryStore, SnapshotStore};

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff: u8 = 0;
    for (&left, &right) in a.iter().zip(b.iter()) {
        diff |= left ^ right;
    }
    diff == 0
}

/// Checks `supplied` against the configured admin password. Fails closed
/// (and identically) whether the password is wrong or unset.
fn authorized(configured: &Option<String>, supplied: &str) -> bool {
    match configured {
        Some(expected) => constant_time_eq(supplied.as_bytes(), expected.as_bytes()),
        None => false,
    }
}

/// Purges the entire P-56 intrusion history: the event log, the
/// `current_inside` map, and the durable incident log. Serialized against
/// pipeline writes by `P56HistoryStore`'s internal lock around the event
/// file / table.
pub async fn purge_all(
    configured_password: &Option<String>,
    supplied_password: &str,
    p56_history: &P56HistoryStore,
    snapshots: &SnapshotStore,
) -> Result<(), AdminError> {
    if !authorized(configured_password, supplied_password) {
        return Err(AdminError::Forbidden);
    }
    p56_history.purge_all().await?;
    snapshots.purge_incidents().await?;
    Ok(())
}

/// Selective purge by `(cid, recorded_at)` key list; leaves unrelated
/// events and the incident log untouched.
pub async fn purge_keys(
    configured_password: &Option<String>,
    supplied_password: &str,
    p56_history: &P56HistoryStore,
    keys: &[(String, DateTime<Utc>)],
) -> Result<(), AdminError> {
    if !authorized(configured_password, supplied_password) {
        return Err(AdminError::Forbidden);
    }
    p56_history.purge_keys(keys).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wrong_secret_and_unset_secret_fail_identically() {
        let configured = Some("correct-horse".to_string());
        assert!(!authorized(&configured, "wrong"));
        assert!(!authorized(&None, "correct-horse"));
    }

    #[test]
    fn correct_secret_authorizes() {
        let configured = Some("correct-horse".to_string());
        assert!(authorized(&configured, "correct-horse"));
    }

    #[tokio::test]
    async fn purge_all_rejects_wrong_password() {
        let dir = std::env::temp_dir().join(format!("vncrcc-admin-test-{}", std::process::id()));
        tokio::fs::create_dir_all(&dir).await.unwrap();
        let p56_path = dir.join("p56_history.json");
        let p56 = P56HistoryStore::load(&p56_path).await;
        let db = crate::persistence::init_database(":memory:", 1).await.unwrap();
        let snapshots = SnapshotStore::new(db.pool().clone(), 10);

        let configured = Some("secret".to_string());
        let result = purge_all(&configured, "not-secret", &p56, &snapshots).await;
        assert!(matches!(result, Err(AdminError::Forbidden)));

        tokio::fs::remove_dir_all(&dir).await.ok();
    }
}
