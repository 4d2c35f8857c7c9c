//! Runtime of the Relocate adaptation engine.
//!
//! Moves an application's data between pairs of storage backends in
//! response to external adaptation requests, and keeps a synthetic read
//! workload running against whichever backend currently holds the data.

pub mod controller;
pub mod engine;
pub mod migrator;
pub mod policy;
pub mod workload;

pub use controller::AdaptationController;
pub use engine::AdaptationEngine;
pub use migrator::{KeyOutcome, KeyRecord, MigrationReport, MigrationStage, Migrator};
pub use policy::{AdaptationOutcome, AdaptationPolicy, PolicyBackends, PolicyStatus, WorkloadStatus};
pub use workload::{stress_pass, WorkloadGenerator, WorkloadStats};
