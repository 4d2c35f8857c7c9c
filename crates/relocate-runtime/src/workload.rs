//! Background workload generation against the active backend.
//!
//! A [`WorkloadGenerator`] owns one spawned task that lists its backend
//! once, then reads every listed key in repeated passes until cancelled.
//! Cancellation goes through a `watch` channel checked between passes and
//! raced against the pass itself, so in-flight reads are dropped promptly.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use relocate_core::config::WorkloadSettings;
use relocate_core::storage::StorageBackend;
use relocate_core::types::WorkloadId;
use relocate_core::Result;

/// Counters shared between a generator handle and its task.
#[derive(Debug, Default)]
struct WorkloadCounters {
    passes: AtomicU64,
    reads: AtomicU64,
    read_failures: AtomicU64,
}

/// A point-in-time copy of a generator's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WorkloadStats {
    /// Completed passes over the key set.
    pub passes: u64,
    /// Successful reads.
    pub reads: u64,
    /// Reads that failed and were skipped.
    pub read_failures: u64,
}

/// Handle to a running (or stopped) workload task.
///
/// Dropping the handle aborts the task; call [`cancel`](Self::cancel) to
/// stop it and wait for it to finish.
pub struct WorkloadGenerator {
    id: WorkloadId,
    backend: String,
    cancel_tx: watch::Sender<bool>,
    handle: Option<JoinHandle<()>>,
    counters: Arc<WorkloadCounters>,
}

impl WorkloadGenerator {
    /// Spawn a workload task reading from `backend`.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(backend: Arc<dyn StorageBackend>, settings: WorkloadSettings) -> Self {
        let id = WorkloadId::generate();
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let counters = Arc::new(WorkloadCounters::default());
        let name = backend.name().to_string();

        let handle = tokio::spawn(run_workload(
            id.clone(),
            backend,
            settings,
            Arc::clone(&counters),
            cancel_rx,
        ));

        Self {
            id,
            backend: name,
            cancel_tx,
            handle: Some(handle),
            counters,
        }
    }

    pub fn id(&self) -> &WorkloadId {
        &self.id
    }

    /// Name of the backend this generator reads from.
    pub fn backend(&self) -> &str {
        &self.backend
    }

    /// Whether the background task is still alive.
    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    pub fn stats(&self) -> WorkloadStats {
        WorkloadStats {
            passes: self.counters.passes.load(Ordering::Relaxed),
            reads: self.counters.reads.load(Ordering::Relaxed),
            read_failures: self.counters.read_failures.load(Ordering::Relaxed),
        }
    }

    /// Signal cancellation and wait until the task has stopped.
    ///
    /// Safe to call repeatedly; later calls return immediately.
    pub async fn cancel(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        // The receiver lives in the task; a send error means it already ended.
        let _ = self.cancel_tx.send(true);
        if let Err(e) = handle.await {
            warn!(workload_id = %self.id, error = %e, "Workload task ended abnormally");
        }
        debug!(workload_id = %self.id, backend = %self.backend, "Workload cancelled");
    }
}

impl Drop for WorkloadGenerator {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = self.cancel_tx.send(true);
            handle.abort();
        }
    }
}

impl std::fmt::Debug for WorkloadGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkloadGenerator")
            .field("id", &self.id)
            .field("backend", &self.backend)
            .field("running", &self.is_running())
            .finish()
    }
}

async fn run_workload(
    id: WorkloadId,
    backend: Arc<dyn StorageBackend>,
    settings: WorkloadSettings,
    counters: Arc<WorkloadCounters>,
    cancel: watch::Receiver<bool>,
) {
    info!(workload_id = %id, backend = %backend.name(), "Workload generator started");

    let mut keys: Option<Vec<String>> = None;
    loop {
        tokio::select! {
            biased;
            _ = wait_for_cancel(&cancel) => break,
            _ = next_pass(backend.as_ref(), &settings, &counters, &mut keys) => {}
        }
        tokio::task::yield_now().await;
    }

    info!(
        workload_id = %id,
        backend = %backend.name(),
        passes = counters.passes.load(Ordering::Relaxed),
        reads = counters.reads.load(Ordering::Relaxed),
        read_failures = counters.read_failures.load(Ordering::Relaxed),
        "Workload generator stopped"
    );
}

/// Run one pass, enumerating the key set first if that has not succeeded yet.
async fn next_pass(
    backend: &dyn StorageBackend,
    settings: &WorkloadSettings,
    counters: &WorkloadCounters,
    keys: &mut Option<Vec<String>>,
) {
    if keys.is_none() {
        match backend.list().await {
            Ok(listed) => {
                debug!(backend = %backend.name(), keys = listed.len(), "Workload key set enumerated");
                *keys = Some(listed);
            }
            Err(e) => {
                warn!(backend = %backend.name(), error = %e, "Workload listing failed, retrying");
            }
        }
    }

    if let Some(keys) = keys.as_deref().filter(|k| !k.is_empty()) {
        read_pass(backend, settings.concurrency, counters, keys).await;
        counters.passes.fetch_add(1, Ordering::Relaxed);
    }

    tokio::time::sleep(settings.pass_interval()).await;
}

/// List `backend` and read every key once, outside any running generator.
///
/// Read failures are counted, not returned; only a failed listing is an error.
pub async fn stress_pass(
    backend: &dyn StorageBackend,
    concurrency: usize,
) -> Result<WorkloadStats> {
    let keys = backend.list().await?;
    let counters = WorkloadCounters::default();
    read_pass(backend, concurrency, &counters, &keys).await;
    let stats = WorkloadStats {
        passes: 1,
        reads: counters.reads.load(Ordering::Relaxed),
        read_failures: counters.read_failures.load(Ordering::Relaxed),
    };
    debug!(backend = %backend.name(), keys = keys.len(), reads = stats.reads, "Stress pass done");
    Ok(stats)
}

async fn read_pass(
    backend: &dyn StorageBackend,
    concurrency: usize,
    counters: &WorkloadCounters,
    keys: &[String],
) {
    stream::iter(keys)
        .for_each_concurrent(concurrency.max(1), |key| async move {
            match backend.get(key).await {
                Ok(_) => {
                    counters.reads.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => {
                    counters.read_failures.fetch_add(1, Ordering::Relaxed);
                    warn!(backend = %backend.name(), key = %key, error = %e, "Workload read failed");
                }
            }
        })
        .await;
}

/// Wait until the watch channel signals `true` (cancellation).
async fn wait_for_cancel(rx: &watch::Receiver<bool>) {
    let mut rx = rx.clone();
    loop {
        if *rx.borrow() {
            return;
        }
        if rx.changed().await.is_err() {
            // Sender dropped, treat as cancel
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use bytes::Bytes;
    use relocate_storage::{FaultOp, MemoryBackend};

    fn fast_settings() -> WorkloadSettings {
        WorkloadSettings {
            concurrency: 4,
            pass_interval_ms: 1,
        }
    }

    fn seeded(keys: &[&str]) -> Arc<MemoryBackend> {
        Arc::new(MemoryBackend::with_objects(
            "mem",
            keys.iter().map(|k| (k.to_string(), Bytes::from_static(b"payload"))),
        ))
    }

    async fn wait_for_passes(generator: &WorkloadGenerator, passes: u64) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while generator.stats().passes < passes {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("workload should make progress");
    }

    #[tokio::test]
    async fn test_reads_every_key_repeatedly() {
        let backend = seeded(&["f1", "f2", "f3"]);
        let mut generator = WorkloadGenerator::start(backend.clone(), fast_settings());
        assert!(generator.is_running());
        assert_eq!(generator.backend(), "mem");

        wait_for_passes(&generator, 3).await;
        generator.cancel().await;

        let stats = generator.stats();
        assert!(stats.reads >= 9);
        assert_eq!(stats.read_failures, 0);
        // Listed once, then only reads
        assert_eq!(backend.stats().lists, 1);
        assert!(!generator.is_running());
    }

    #[tokio::test]
    async fn test_cancel_stops_all_activity() {
        let backend = seeded(&["f1", "f2"]);
        let mut generator = WorkloadGenerator::start(backend.clone(), fast_settings());
        wait_for_passes(&generator, 1).await;

        generator.cancel().await;
        let gets_after_cancel = backend.stats().gets;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(backend.stats().gets, gets_after_cancel);
    }

    #[tokio::test]
    async fn test_cancel_is_idempotent() {
        let backend = seeded(&["f1"]);
        let mut generator = WorkloadGenerator::start(backend, fast_settings());
        generator.cancel().await;
        generator.cancel().await;
        assert!(!generator.is_running());
    }

    #[tokio::test]
    async fn test_cancel_interrupts_slow_pass() {
        let backend = seeded(&["slow"]);
        backend.set_latency(Some(Duration::from_secs(60)));
        let mut generator = WorkloadGenerator::start(backend.clone(), fast_settings());

        // Wait until the read is in flight
        tokio::time::timeout(Duration::from_secs(5), async {
            while backend.stats().gets == 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        tokio::time::timeout(Duration::from_secs(5), generator.cancel())
            .await
            .expect("cancel must not wait for the slow read");
        assert_eq!(generator.stats().passes, 0);
    }

    #[tokio::test]
    async fn test_read_failures_are_not_fatal() {
        let backend = seeded(&["good", "bad"]);
        backend.fail(FaultOp::Get, Some("bad"));
        let mut generator = WorkloadGenerator::start(backend, fast_settings());

        wait_for_passes(&generator, 2).await;
        assert!(generator.is_running());
        generator.cancel().await;

        let stats = generator.stats();
        assert!(stats.read_failures >= 2);
        assert!(stats.reads >= 2);
    }

    #[tokio::test]
    async fn test_listing_is_retried_until_it_succeeds() {
        let backend = seeded(&["f1"]);
        backend.fail(FaultOp::List, None);
        let mut generator = WorkloadGenerator::start(backend.clone(), fast_settings());

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(generator.stats().passes, 0);

        backend.clear_faults();
        wait_for_passes(&generator, 1).await;
        generator.cancel().await;
        assert!(backend.stats().lists >= 2);
    }

    #[tokio::test]
    async fn test_stress_pass_reads_each_key_once() {
        let backend = seeded(&["f1", "f2", "bad"]);
        backend.fail(FaultOp::Get, Some("bad"));

        let stats = stress_pass(backend.as_ref(), 2).await.unwrap();
        assert_eq!(stats.passes, 1);
        assert_eq!(stats.reads, 2);
        assert_eq!(stats.read_failures, 1);
        assert_eq!(backend.stats().lists, 1);

        backend.fail(FaultOp::List, None);
        assert!(stress_pass(backend.as_ref(), 2).await.is_err());
    }

    #[tokio::test]
    async fn test_drop_aborts_task() {
        let backend = seeded(&["f1"]);
        let generator = WorkloadGenerator::start(backend.clone(), fast_settings());
        wait_for_passes(&generator, 1).await;
        drop(generator);

        tokio::time::sleep(Duration::from_millis(20)).await;
        let gets = backend.stats().gets;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(backend.stats().gets, gets);
    }
}
