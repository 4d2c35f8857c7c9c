//! Routing of adaptation requests to their policies.
//!
//! The [`AdaptationController`] holds one lazily created
//! [`AdaptationPolicy`] per configured [`PolicyKind`]. Requests for
//! different policies run concurrently; requests for the same policy are
//! serialized by that policy's lock.

use std::sync::OnceLock;

use bytes::Bytes;
use futures::future::join_all;
use tracing::{info, warn};

use relocate_core::config::{MigrationSettings, WorkloadSettings};
use relocate_core::error::RelocateError;
use relocate_core::types::{AdaptationRequest, AdaptationResponse, PolicyKind};
use relocate_core::Result;

use crate::policy::{AdaptationOutcome, AdaptationPolicy, PolicyBackends, PolicyStatus};
use crate::workload::WorkloadStats;

struct PolicySlot {
    backends: PolicyBackends,
    policy: OnceLock<AdaptationPolicy>,
}

/// Dispatches adaptation requests to per-kind policies.
pub struct AdaptationController {
    region: Option<PolicySlot>,
    sensitivity: Option<PolicySlot>,
    migration: MigrationSettings,
    workload: WorkloadSettings,
}

impl AdaptationController {
    /// A controller with no policies configured.
    pub fn new(migration: MigrationSettings, workload: WorkloadSettings) -> Self {
        Self {
            region: None,
            sensitivity: None,
            migration,
            workload,
        }
    }

    /// Register the backends of `kind`. The policy itself is created on
    /// first use.
    pub fn with_policy(mut self, kind: PolicyKind, backends: PolicyBackends) -> Self {
        let slot = Some(PolicySlot {
            backends,
            policy: OnceLock::new(),
        });
        match kind {
            PolicyKind::RegionPlacement => self.region = slot,
            PolicyKind::SensitivityPlacement => self.sensitivity = slot,
        }
        self
    }

    /// Whether the policy for `kind` has been created yet.
    pub fn is_initialised(&self, kind: PolicyKind) -> bool {
        self.slot(kind)
            .is_some_and(|slot| slot.policy.get().is_some())
    }

    /// The policy for `kind`, creating it on first access.
    pub fn policy(&self, kind: PolicyKind) -> Result<&AdaptationPolicy> {
        let slot = self.slot(kind).ok_or_else(|| RelocateError::Config {
            message: format!("no backends configured for the {kind} policy"),
        })?;
        Ok(slot.policy.get_or_init(|| {
            info!(policy = %kind, "Initialising policy");
            AdaptationPolicy::new(
                kind,
                slot.backends.clone(),
                &self.migration,
                self.workload.clone(),
            )
        }))
    }

    /// Route a single request to its policy.
    pub async fn handle(&self, request: &AdaptationRequest) -> Result<AdaptationOutcome> {
        self.policy(request.policy_type)?
            .apply(request.repetition_count)
            .await
    }

    /// The external boundary: raw integers in, success flag and message out.
    pub async fn handle_raw(&self, policy_type: i64, repetition_count: i64) -> AdaptationResponse {
        match AdaptationRequest::from_raw(policy_type, repetition_count) {
            Ok(request) => {
                let result = self.handle(&request).await;
                respond(request.policy_type, result)
            }
            Err(e) => {
                warn!(policy_type, repetition_count, error = %e, "Rejected adaptation request");
                AdaptationResponse::failed(e.to_string())
            }
        }
    }

    /// Handle requests that arrived together.
    ///
    /// Counts are summed per policy so opposing toggles cancel out, then
    /// each touched policy is applied once, all policies concurrently.
    /// Results come back in order of each policy's first appearance.
    pub async fn handle_batch(
        &self,
        requests: &[AdaptationRequest],
    ) -> Vec<(PolicyKind, Result<AdaptationOutcome>)> {
        // Net parity per policy, in order of first appearance
        let mut totals: Vec<(PolicyKind, bool)> = Vec::new();
        for request in requests {
            let odd = request.is_effective();
            match totals.iter_mut().find(|(kind, _)| *kind == request.policy_type) {
                Some((_, net_odd)) => *net_odd ^= odd,
                None => totals.push((request.policy_type, odd)),
            }
        }

        let runs = totals.into_iter().map(|(kind, net_odd)| async move {
            let collapsed = if net_odd { 1 } else { 2 };
            let result = match self.policy(kind) {
                Ok(policy) => policy.apply(collapsed).await,
                Err(e) => Err(e),
            };
            (kind, result)
        });
        join_all(runs).await
    }

    /// Parse a line of text holding one or more requests and handle it.
    pub async fn handle_text(&self, input: &str) -> Vec<AdaptationResponse> {
        let requests = match AdaptationRequest::parse_batch(input) {
            Ok(requests) if !requests.is_empty() => requests,
            Ok(_) => {
                return vec![AdaptationResponse::failed("empty request")];
            }
            Err(e) => {
                warn!(input = %input.trim(), error = %e, "Unparseable adaptation request");
                return vec![AdaptationResponse::failed(e.to_string())];
            }
        };

        if let [request] = requests.as_slice() {
            let result = self.handle(request).await;
            return vec![respond(request.policy_type, result)];
        }
        self.handle_batch(&requests)
            .await
            .into_iter()
            .map(|(kind, result)| respond(kind, result))
            .collect()
    }

    /// Store a new object in whichever backend `kind` currently uses.
    pub async fn ingest(&self, kind: PolicyKind, key: &str, data: Bytes) -> Result<()> {
        self.policy(kind)?.ingest(key, data).await
    }

    /// Run one extra read pass over the active backend of `kind`.
    pub async fn stress(&self, kind: PolicyKind) -> Result<WorkloadStats> {
        self.policy(kind)?.stress().await
    }

    /// Status of every policy created so far.
    pub fn status(&self) -> Vec<PolicyStatus> {
        PolicyKind::ALL
            .iter()
            .filter_map(|kind| self.slot(*kind)?.policy.get())
            .map(AdaptationPolicy::status)
            .collect()
    }

    /// Stop every running workload.
    pub async fn shutdown(&self) {
        let policies = PolicyKind::ALL
            .iter()
            .filter_map(|kind| self.slot(*kind)?.policy.get());
        join_all(policies.map(|policy| policy.shutdown())).await;
    }

    fn slot(&self, kind: PolicyKind) -> Option<&PolicySlot> {
        match kind {
            PolicyKind::RegionPlacement => self.region.as_ref(),
            PolicyKind::SensitivityPlacement => self.sensitivity.as_ref(),
        }
    }
}

fn respond(kind: PolicyKind, result: Result<AdaptationOutcome>) -> AdaptationResponse {
    match result {
        Ok(outcome) => AdaptationResponse::ok(describe(kind, &outcome)),
        Err(e) => AdaptationResponse::failed(format!("{kind} adaptation failed: {e}")),
    }
}

/// One-line summary of an outcome, used as the response message.
pub fn describe(kind: PolicyKind, outcome: &AdaptationOutcome) -> String {
    match outcome {
        AdaptationOutcome::Unchanged { state } => format!(
            "{kind} placement unchanged ({})",
            kind.state_label(*state)
        ),
        AdaptationOutcome::Switched { from, to, report } => format!(
            "{kind} placement adapted from {} to {} ({} object(s) moved)",
            kind.state_label(*from),
            kind.state_label(*to),
            report.moved()
        ),
    }
}
