//! The adaptation engine: configuration in, running controller out.
//!
//! [`AdaptationEngine`] is the runtime entry point. It opens every backend
//! named in the [`EngineConfig`], wires the policies into an
//! [`AdaptationController`], and stops all workloads on shutdown.

use std::sync::Arc;

use tracing::info;

use relocate_core::config::EngineConfig;
use relocate_core::types::{AdaptationResponse, PolicyKind};
use relocate_core::Result;
use relocate_storage::open_backend;

use crate::controller::AdaptationController;
use crate::policy::{PolicyBackends, PolicyStatus};

/// A running adaptation engine.
pub struct AdaptationEngine {
    /// The validated configuration the engine was started with.
    pub config: EngineConfig,

    controller: Arc<AdaptationController>,
}

impl AdaptationEngine {
    /// Validate `config`, open its backends and build the controller.
    ///
    /// Every policy starts in state `A` with no workload running; the
    /// current placement of existing data is not inspected.
    pub async fn start(config: EngineConfig) -> Result<Self> {
        config.validate()?;

        let mut controller =
            AdaptationController::new(config.migration.clone(), config.workload.clone());
        for kind in PolicyKind::ALL {
            let policy = config.policy(kind);
            let backends =
                PolicyBackends::new(open_backend(&policy.a).await?, open_backend(&policy.b).await?)?;
            info!(
                policy = %kind,
                a = %policy.a.uri,
                b = %policy.b.uri,
                "Policy backends opened"
            );
            controller = controller.with_policy(kind, backends);
        }

        info!(
            migration_concurrency = config.migration.concurrency,
            workload_concurrency = config.workload.concurrency,
            pass_interval_ms = config.workload.pass_interval_ms,
            "Adaptation engine started"
        );

        Ok(Self {
            config,
            controller: Arc::new(controller),
        })
    }

    /// Shared handle to the controller, for serving requests from other tasks.
    pub fn controller(&self) -> Arc<AdaptationController> {
        Arc::clone(&self.controller)
    }

    /// Handle one line of request text.
    pub async fn handle_text(&self, input: &str) -> Vec<AdaptationResponse> {
        self.controller.handle_text(input).await
    }

    pub fn status(&self) -> Vec<PolicyStatus> {
        self.controller.status()
    }

    /// Stop every workload. Requests still in flight finish first.
    pub async fn shutdown(&self) {
        info!("Adaptation engine shutting down");
        self.controller.shutdown().await;
        info!("Adaptation engine stopped");
    }
}
