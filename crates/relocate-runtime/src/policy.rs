//! Two-state placement policies.
//!
//! An [`AdaptationPolicy`] owns two disjoint backends, one per
//! [`PlacementState`], and flips between them on request. Only the parity
//! of a request's repetition count matters: an even count leaves everything
//! untouched, an odd count migrates all data from the active backend to the
//! other one and moves the background workload along with it.
//!
//! State changes are serialized by a per-policy [`tokio::sync::Mutex`]; the
//! active state only changes after a migration has fully succeeded.

use std::sync::Arc;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, warn};

use relocate_core::config::{MigrationSettings, WorkloadSettings};
use relocate_core::error::RelocateError;
use relocate_core::storage::StorageBackend;
use relocate_core::types::{PlacementState, PolicyKind, WorkloadId};
use relocate_core::Result;

use crate::migrator::{MigrationReport, Migrator};
use crate::workload::{stress_pass, WorkloadGenerator, WorkloadStats};

/// The pair of backends a policy moves data between.
#[derive(Clone)]
pub struct PolicyBackends {
    a: Arc<dyn StorageBackend>,
    b: Arc<dyn StorageBackend>,
}

impl PolicyBackends {
    /// Pair two backends. They must be distinct instances.
    pub fn new(a: Arc<dyn StorageBackend>, b: Arc<dyn StorageBackend>) -> Result<Self> {
        if Arc::ptr_eq(&a, &b) {
            return Err(RelocateError::Config {
                message: format!(
                    "placement states must use different backends, both are {}",
                    a.name()
                ),
            });
        }
        Ok(Self { a, b })
    }

    /// The backend holding the data while in `state`.
    pub fn for_state(&self, state: PlacementState) -> &Arc<dyn StorageBackend> {
        match state {
            PlacementState::A => &self.a,
            PlacementState::B => &self.b,
        }
    }
}

impl std::fmt::Debug for PolicyBackends {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PolicyBackends")
            .field("a", &self.a.name())
            .field("b", &self.b.name())
            .finish()
    }
}

/// What a successful [`AdaptationPolicy::apply`] did.
#[derive(Debug, Clone)]
pub enum AdaptationOutcome {
    /// Even repetition count: nothing was touched.
    Unchanged { state: PlacementState },
    /// Odd repetition count: data moved and the state flipped.
    Switched {
        from: PlacementState,
        to: PlacementState,
        report: MigrationReport,
    },
}

impl AdaptationOutcome {
    /// The active state after the call.
    pub fn state(&self) -> PlacementState {
        match self {
            AdaptationOutcome::Unchanged { state } => *state,
            AdaptationOutcome::Switched { to, .. } => *to,
        }
    }
}

/// The running workload as seen from outside the policy.
#[derive(Debug, Clone, Serialize)]
pub struct WorkloadStatus {
    pub id: WorkloadId,
    pub backend: String,
    pub running: bool,
    pub stats: WorkloadStats,
}

/// A point-in-time view of a policy.
#[derive(Debug, Clone, Serialize)]
pub struct PolicyStatus {
    pub policy: PolicyKind,
    pub active_state: PlacementState,
    /// Human-readable name of the active state.
    pub placement: &'static str,
    pub active_backend: String,
    /// An adaptation holds the policy lock right now.
    pub adapting: bool,
    /// `None` when no workload runs, or while `adapting`.
    pub workload: Option<WorkloadStatus>,
    pub migrations: u64,
    pub failed_migrations: u64,
    pub last_adapted_at: Option<DateTime<Utc>>,
}

/// Counters published outside the lock so status reads never wait on a
/// migration.
#[derive(Debug, Clone, Copy, Default)]
struct PolicySummary {
    active: PlacementState,
    migrations: u64,
    failed_migrations: u64,
    last_adapted_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
struct PolicyState {
    active: PlacementState,
    workload: Option<WorkloadGenerator>,
}

/// A two-state placement policy.
pub struct AdaptationPolicy {
    kind: PolicyKind,
    backends: PolicyBackends,
    migrator: Migrator,
    workload_settings: WorkloadSettings,
    state: Mutex<PolicyState>,
    summary: watch::Sender<PolicySummary>,
}

impl AdaptationPolicy {
    /// Create a policy in state `A` with no workload running.
    pub fn new(
        kind: PolicyKind,
        backends: PolicyBackends,
        migration: &MigrationSettings,
        workload: WorkloadSettings,
    ) -> Self {
        let (summary, _) = watch::channel(PolicySummary::default());
        debug!(
            policy = %kind,
            a = %backends.for_state(PlacementState::A).name(),
            b = %backends.for_state(PlacementState::B).name(),
            "Policy created"
        );
        Self {
            kind,
            backends,
            migrator: Migrator::new(migration),
            workload_settings: workload,
            state: Mutex::new(PolicyState::default()),
            summary,
        }
    }

    pub fn kind(&self) -> PolicyKind {
        self.kind
    }

    pub fn backends(&self) -> &PolicyBackends {
        &self.backends
    }

    /// The committed placement state.
    pub fn active_state(&self) -> PlacementState {
        self.summary.borrow().active
    }

    /// Apply `repetition_count` toggles, waiting for any adaptation already
    /// in progress on this policy.
    ///
    /// # Errors
    ///
    /// [`RelocateError::InvalidRequest`] for a zero count, otherwise any
    /// migration error. On error the active state is unchanged.
    pub async fn apply(&self, repetition_count: u64) -> Result<AdaptationOutcome> {
        self.check_count(repetition_count)?;
        let mut state = self.state.lock().await;
        self.apply_locked(&mut state, repetition_count).await
    }

    /// Like [`apply`](Self::apply), but fails with
    /// [`RelocateError::InvariantViolation`] instead of waiting when another
    /// adaptation holds the policy.
    pub async fn try_apply(&self, repetition_count: u64) -> Result<AdaptationOutcome> {
        self.check_count(repetition_count)?;
        let mut state = self.state.try_lock().map_err(|_| {
            RelocateError::invariant(format!(
                "{} policy is already adapting",
                self.kind
            ))
        })?;
        self.apply_locked(&mut state, repetition_count).await
    }

    pub fn status(&self) -> PolicyStatus {
        let summary = *self.summary.borrow();
        let (adapting, workload) = match self.state.try_lock() {
            Ok(state) => (false, state.workload.as_ref().map(workload_status)),
            Err(_) => (true, None),
        };
        PolicyStatus {
            policy: self.kind,
            active_state: summary.active,
            placement: self.kind.state_label(summary.active),
            active_backend: self.backends.for_state(summary.active).name().to_string(),
            adapting,
            workload,
            migrations: summary.migrations,
            failed_migrations: summary.failed_migrations,
            last_adapted_at: summary.last_adapted_at,
        }
    }

    /// Stop the running workload, waiting for any adaptation in progress.
    pub async fn shutdown(&self) {
        let mut state = self.state.lock().await;
        if let Some(mut workload) = state.workload.take() {
            workload.cancel().await;
        }
        info!(policy = %self.kind, state = %state.active, "Policy shut down");
    }

    fn check_count(&self, repetition_count: u64) -> Result<()> {
        if repetition_count == 0 {
            return Err(RelocateError::InvalidRequest {
                message: format!("repetition count for {} must be at least 1", self.kind),
            });
        }
        Ok(())
    }

    async fn apply_locked(
        &self,
        state: &mut PolicyState,
        repetition_count: u64,
    ) -> Result<AdaptationOutcome> {
        if repetition_count % 2 == 0 {
            debug!(
                policy = %self.kind,
                repetition_count,
                state = %state.active,
                "Even repetition count, nothing to do"
            );
            return Ok(AdaptationOutcome::Unchanged {
                state: state.active,
            });
        }

        let from = state.active;
        let to = from.complement();
        let origin = self.backends.for_state(from);
        let destination = self.backends.for_state(to);

        // The previous workload must be fully stopped before data moves. If
        // this future is dropped from here on, the guard restarts it.
        let previous = state.workload.take();
        let resume_on = previous
            .as_ref()
            .filter(|w| w.is_running())
            .map(|_| Arc::clone(origin));
        let mut guard = ResumeGuard {
            state,
            resume_on,
            settings: &self.workload_settings,
            kind: self.kind,
        };
        if let Some(mut workload) = previous {
            workload.cancel().await;
        }

        info!(
            policy = %self.kind,
            from = self.kind.state_label(from),
            to = self.kind.state_label(to),
            origin = %origin.name(),
            destination = %destination.name(),
            "Adapting placement"
        );

        match self.migrator.migrate(origin.as_ref(), destination.as_ref()).await {
            Ok(report) => {
                guard.resume_on = None;
                guard.state.active = to;
                self.summary.send_modify(|s| {
                    s.active = to;
                    s.migrations += 1;
                    s.last_adapted_at = Some(Utc::now());
                });
                guard.state.workload = Some(self.start_workload(destination));
                info!(
                    policy = %self.kind,
                    placement = self.kind.state_label(to),
                    moved = report.moved(),
                    "Placement adapted"
                );
                Ok(AdaptationOutcome::Switched { from, to, report })
            }
            Err(e) => {
                self.summary.send_modify(|s| s.failed_migrations += 1);
                warn!(
                    policy = %self.kind,
                    placement = self.kind.state_label(from),
                    error = %e,
                    "Adaptation failed, keeping current placement"
                );
                // Dropping the guard restarts the workload on the origin
                drop(guard);
                Err(e)
            }
        }
    }

    /// Store `data` under `key` in the backend of the active state.
    ///
    /// Holds the policy lock, so the object never lands in a backend that a
    /// migration is draining.
    pub async fn ingest(&self, key: &str, data: Bytes) -> Result<()> {
        if key.is_empty() {
            return Err(RelocateError::InvalidRequest {
                message: "object key must not be empty".to_string(),
            });
        }
        let state = self.state.lock().await;
        let backend = self.backends.for_state(state.active);
        let size = data.len();
        backend.put(key, data).await?;
        info!(
            policy = %self.kind,
            backend = %backend.name(),
            key,
            size,
            "Object ingested"
        );
        Ok(())
    }

    /// Read every object in the active backend once, on top of any running
    /// workload.
    pub async fn stress(&self) -> Result<WorkloadStats> {
        let state = self.state.lock().await;
        let backend = self.backends.for_state(state.active);
        let stats = stress_pass(backend.as_ref(), self.workload_settings.concurrency).await?;
        info!(
            policy = %self.kind,
            backend = %backend.name(),
            reads = stats.reads,
            read_failures = stats.read_failures,
            "Stress pass finished"
        );
        Ok(stats)
    }

    fn start_workload(&self, backend: &Arc<dyn StorageBackend>) -> WorkloadGenerator {
        WorkloadGenerator::start(Arc::clone(backend), self.workload_settings.clone())
    }
}

impl std::fmt::Debug for AdaptationPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdaptationPolicy")
            .field("kind", &self.kind)
            .field("backends", &self.backends)
            .field("active", &self.active_state())
            .finish()
    }
}

/// Restarts the origin workload unless disarmed by a committed migration.
struct ResumeGuard<'a> {
    state: &'a mut PolicyState,
    resume_on: Option<Arc<dyn StorageBackend>>,
    settings: &'a WorkloadSettings,
    kind: PolicyKind,
}

impl Drop for ResumeGuard<'_> {
    fn drop(&mut self) {
        let Some(backend) = self.resume_on.take() else {
            return;
        };
        if tokio::runtime::Handle::try_current().is_err() {
            warn!(policy = %self.kind, "No runtime left, workload not resumed");
            return;
        }
        debug!(policy = %self.kind, backend = %backend.name(), "Resuming workload on origin");
        self.state.workload = Some(WorkloadGenerator::start(backend, self.settings.clone()));
    }
}

fn workload_status(workload: &WorkloadGenerator) -> WorkloadStatus {
    WorkloadStatus {
        id: workload.id().clone(),
        backend: workload.backend().to_string(),
        running: workload.is_running(),
        stats: workload.stats(),
    }
}
