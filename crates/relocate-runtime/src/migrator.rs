//! Bulk, verified migration of every object between two backends.
//!
//! [`Migrator::migrate`] enumerates the origin, moves each key
//! (get → put → delete) with bounded concurrency, waits for every key at a
//! single barrier, then re-lists the origin. The migration succeeds only if
//! every key moved and the origin is empty afterwards. A key whose `put`
//! failed is never deleted from the origin.

use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use tracing::{debug, info, warn};

use relocate_core::config::MigrationSettings;
use relocate_core::error::RelocateError;
use relocate_core::storage::StorageBackend;
use relocate_core::types::MigrationId;
use relocate_core::Result;

/// The step of a key move that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationStage {
    Get,
    Put,
    Delete,
}

/// Outcome of moving a single key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum KeyOutcome {
    Moved,
    Failed { stage: MigrationStage, error: String },
}

/// Per-key entry of a migration record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KeyRecord {
    pub key: String,
    pub outcome: KeyOutcome,
}

/// The transient record of one migration.
#[derive(Debug, Clone, Serialize)]
pub struct MigrationReport {
    pub migration_id: MigrationId,
    pub origin: String,
    pub destination: String,
    pub started_at: DateTime<Utc>,
    pub elapsed: Duration,
    /// One record per key enumerated from the origin at start.
    pub records: Vec<KeyRecord>,
}

impl MigrationReport {
    /// Number of keys that were moved.
    pub fn moved(&self) -> usize {
        self.records
            .iter()
            .filter(|r| r.outcome == KeyOutcome::Moved)
            .count()
    }

    /// Keys whose get, put or delete failed, sorted.
    pub fn failed_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .records
            .iter()
            .filter(|r| r.outcome != KeyOutcome::Moved)
            .map(|r| r.key.clone())
            .collect();
        keys.sort();
        keys
    }
}

/// Moves all objects from one backend to another.
#[derive(Debug, Clone)]
pub struct Migrator {
    concurrency: usize,
}

impl Migrator {
    pub fn new(settings: &MigrationSettings) -> Self {
        Self::with_concurrency(settings.concurrency)
    }

    /// A migrator moving at most `concurrency` keys at a time (minimum 1).
    pub fn with_concurrency(concurrency: usize) -> Self {
        Self {
            concurrency: concurrency.max(1),
        }
    }

    /// Move every object from `origin` to `destination`.
    ///
    /// # Errors
    ///
    /// - the initial listing of `origin` fails (storage error);
    /// - any key fails to move ([`RelocateError::MigrationFailed`]);
    /// - `origin` still holds objects after every key reported moved
    ///   ([`RelocateError::InvariantViolation`]).
    pub async fn migrate(
        &self,
        origin: &dyn StorageBackend,
        destination: &dyn StorageBackend,
    ) -> Result<MigrationReport> {
        let migration_id = MigrationId::generate();
        let started_at = Utc::now();
        let clock = Instant::now();

        let keys = origin.list().await?;
        info!(
            migration_id = %migration_id,
            origin = %origin.name(),
            destination = %destination.name(),
            keys = keys.len(),
            "Migration started"
        );

        let records: Vec<KeyRecord> = stream::iter(keys)
            .map(|key| move_key(origin, destination, key))
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        let report = MigrationReport {
            migration_id,
            origin: origin.name().to_string(),
            destination: destination.name().to_string(),
            started_at,
            elapsed: clock.elapsed(),
            records,
        };

        let failed_keys = report.failed_keys();
        if !failed_keys.is_empty() {
            warn!(
                migration_id = %report.migration_id,
                moved = report.moved(),
                failed = failed_keys.len(),
                "Migration failed"
            );
            return Err(RelocateError::MigrationFailed {
                origin: report.origin,
                destination: report.destination,
                failed_keys,
            });
        }

        let remaining = origin.list().await?;
        if !remaining.is_empty() {
            warn!(
                migration_id = %report.migration_id,
                remaining = remaining.len(),
                "Origin not empty after migration"
            );
            return Err(RelocateError::invariant(format!(
                "origin {} still holds {} object(s) after migration: {}",
                report.origin,
                remaining.len(),
                remaining.join(", ")
            )));
        }

        info!(
            migration_id = %report.migration_id,
            moved = report.moved(),
            elapsed_ms = report.elapsed.as_millis() as u64,
            "Migration complete"
        );
        Ok(report)
    }
}

async fn move_key(
    origin: &dyn StorageBackend,
    destination: &dyn StorageBackend,
    key: String,
) -> KeyRecord {
    let outcome = match try_move_key(origin, destination, &key).await {
        Ok(()) => {
            debug!(key = %key, "Moved");
            KeyOutcome::Moved
        }
        Err((stage, e)) => {
            warn!(key = %key, ?stage, error = %e, "Failed to move key");
            KeyOutcome::Failed {
                stage,
                error: e.to_string(),
            }
        }
    };
    KeyRecord { key, outcome }
}

async fn try_move_key(
    origin: &dyn StorageBackend,
    destination: &dyn StorageBackend,
    key: &str,
) -> std::result::Result<(), (MigrationStage, RelocateError)> {
    let data = origin
        .get(key)
        .await
        .map_err(|e| (MigrationStage::Get, e))?;
    destination
        .put(key, data)
        .await
        .map_err(|e| (MigrationStage::Put, e))?;
    origin
        .delete(key)
        .await
        .map_err(|e| (MigrationStage::Delete, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use relocate_storage::{FaultOp, MemoryBackend};

    fn seeded(name: &str, keys: &[&str]) -> MemoryBackend {
        MemoryBackend::with_objects(
            name,
            keys.iter().map(|k| (k.to_string(), Bytes::from(format!("data-{k}")))),
        )
    }

    #[tokio::test]
    async fn test_moves_every_key() {
        let origin = seeded("a", &["f1", "f2", "dir/f3"]);
        let destination = MemoryBackend::new("b");

        let report = Migrator::with_concurrency(2)
            .migrate(&origin, &destination)
            .await
            .unwrap();

        assert_eq!(report.moved(), 3);
        assert!(report.failed_keys().is_empty());
        assert!(origin.is_empty());
        assert_eq!(destination.keys(), vec!["dir/f3", "f1", "f2"]);
        assert_eq!(destination.snapshot()["f1"], Bytes::from("data-f1"));
    }

    #[tokio::test]
    async fn test_empty_origin_succeeds() {
        let origin = MemoryBackend::new("a");
        let destination = MemoryBackend::new("b");
        let report = Migrator::with_concurrency(4)
            .migrate(&origin, &destination)
            .await
            .unwrap();
        assert_eq!(report.moved(), 0);
        assert!(destination.is_empty());
    }

    #[tokio::test]
    async fn test_put_failure_keeps_origin_copy() {
        let origin = seeded("a", &["f1", "f2"]);
        let destination = MemoryBackend::new("b");
        destination.fail(FaultOp::Put, Some("f2"));

        let err = Migrator::with_concurrency(4)
            .migrate(&origin, &destination)
            .await
            .unwrap_err();

        match err {
            RelocateError::MigrationFailed { failed_keys, .. } => {
                assert_eq!(failed_keys, vec!["f2"]);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(origin.snapshot()["f2"], Bytes::from("data-f2"));
        assert_eq!(destination.keys(), vec!["f1"]);
    }

    #[tokio::test]
    async fn test_get_and_delete_failures_fail_migration() {
        let origin = seeded("a", &["f1", "f2", "f3"]);
        origin.fail(FaultOp::Get, Some("f1"));
        origin.fail(FaultOp::Delete, Some("f3"));
        let destination = MemoryBackend::new("b");

        let err = Migrator::with_concurrency(1)
            .migrate(&origin, &destination)
            .await
            .unwrap_err();

        match err {
            RelocateError::MigrationFailed { failed_keys, .. } => {
                assert_eq!(failed_keys, vec!["f1", "f3"]);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(origin.keys().contains(&"f1".to_string()));
    }

    #[tokio::test]
    async fn test_post_check_catches_silent_delete() {
        let origin = seeded("a", &["f1"]);
        origin.ignore(FaultOp::Delete, Some("f1"));
        let destination = MemoryBackend::new("b");

        let err = Migrator::with_concurrency(1)
            .migrate(&origin, &destination)
            .await
            .unwrap_err();
        assert!(matches!(err, RelocateError::InvariantViolation { .. }));
    }

    #[tokio::test]
    async fn test_list_failure_is_surfaced() {
        let origin = seeded("a", &["f1"]);
        origin.fail(FaultOp::List, None);
        let destination = MemoryBackend::new("b");

        let err = Migrator::with_concurrency(1)
            .migrate(&origin, &destination)
            .await
            .unwrap_err();
        assert!(err.is_transient());
        assert!(destination.is_empty());
    }

    #[test]
    fn test_zero_concurrency_is_clamped() {
        assert_eq!(Migrator::with_concurrency(0).concurrency, 1);
    }
}
