//! Engine configuration.
//!
//! [`EngineConfig`] names the two backends of every policy plus the tuning
//! knobs of the migrator and the workload generator. It is plain serde data:
//! load it from a JSON file with [`EngineConfig::load`], or build one with
//! [`EngineConfig::local`] / [`EngineConfig::aws_defaults`].

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::RelocateError;
use crate::types::{PlacementState, PolicyKind};
use crate::Result;

/// Bucket holding data inside the primary (EU) region.
pub const PRIMARY_REGION_BUCKET: &str = "eu-data-bucket";

/// Region of [`PRIMARY_REGION_BUCKET`].
pub const PRIMARY_REGION: &str = "eu-central-1";

/// Bucket holding data outside the primary region.
pub const SECONDARY_REGION_BUCKET: &str = "fl-na-data-bucket";

/// Region of [`SECONDARY_REGION_BUCKET`].
pub const SECONDARY_REGION: &str = "us-east-2";

/// Default number of keys moved concurrently by one migration.
const DEFAULT_MIGRATION_CONCURRENCY: usize = 16;

/// Default number of concurrent reads within one workload pass.
const DEFAULT_WORKLOAD_CONCURRENCY: usize = 8;

/// Default pause between two workload passes: 50 ms.
const DEFAULT_PASS_INTERVAL_MS: u64 = 50;

/// A named storage backend location.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Logical name or region tag shown in logs.
    pub name: String,

    /// Storage URI: `"local://<path>"`, a raw path, `"s3://bucket/prefix"`
    /// or `"memory://<name>"`.
    pub uri: String,
}

impl BackendConfig {
    pub fn new(name: impl Into<String>, uri: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            uri: uri.into(),
        }
    }
}

/// The backend pair of one policy. `a` holds data in state A, `b` in state B.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyConfig {
    pub a: BackendConfig,
    pub b: BackendConfig,
}

impl PolicyConfig {
    /// The backend that holds data while `state` is active.
    pub fn backend_for(&self, state: PlacementState) -> &BackendConfig {
        match state {
            PlacementState::A => &self.a,
            PlacementState::B => &self.b,
        }
    }
}

/// Tuning for bulk migrations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MigrationSettings {
    /// Maximum number of keys moved at the same time.
    pub concurrency: usize,
}

impl Default for MigrationSettings {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_MIGRATION_CONCURRENCY,
        }
    }
}

/// Tuning for the background workload generator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkloadSettings {
    /// Maximum number of reads in flight within one pass.
    pub concurrency: usize,

    /// Pause between two passes, in milliseconds. Also the idle period when
    /// the backend has no objects. Must be at least 1.
    pub pass_interval_ms: u64,
}

impl WorkloadSettings {
    /// The pause between passes, never shorter than one millisecond.
    pub fn pass_interval(&self) -> Duration {
        Duration::from_millis(self.pass_interval_ms.max(1))
    }
}

impl Default for WorkloadSettings {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_WORKLOAD_CONCURRENCY,
            pass_interval_ms: DEFAULT_PASS_INTERVAL_MS,
        }
    }
}

/// Configuration of the whole adaptation engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Backends of the region placement policy.
    pub region: PolicyConfig,

    /// Backends of the sensitivity placement policy.
    pub sensitivity: PolicyConfig,

    #[serde(default)]
    pub migration: MigrationSettings,

    #[serde(default)]
    pub workload: WorkloadSettings,
}

impl EngineConfig {
    /// A configuration keeping every backend in a directory under `root`.
    ///
    /// Useful for development and tests where no object store is available.
    pub fn local(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref();
        let dir = |name: &str| BackendConfig::new(name, local_uri(&root.join(name)));
        Self {
            region: PolicyConfig {
                a: dir("secondary-region"),
                b: dir("primary-region"),
            },
            sensitivity: PolicyConfig {
                a: dir("cloud"),
                b: dir("local"),
            },
            migration: MigrationSettings::default(),
            workload: WorkloadSettings::default(),
        }
    }

    /// The production layout: the two regional S3 buckets plus a local
    /// directory for sensitive data.
    ///
    /// Credentials come from the standard `AWS_*` environment variables.
    pub fn aws_defaults(local_root: impl AsRef<Path>) -> Self {
        Self {
            region: PolicyConfig {
                a: BackendConfig::new(
                    SECONDARY_REGION,
                    format!("s3://{SECONDARY_REGION_BUCKET}/region?region={SECONDARY_REGION}"),
                ),
                b: BackendConfig::new(
                    PRIMARY_REGION,
                    format!("s3://{PRIMARY_REGION_BUCKET}/region?region={PRIMARY_REGION}"),
                ),
            },
            sensitivity: PolicyConfig {
                a: BackendConfig::new(
                    "cloud",
                    format!("s3://{PRIMARY_REGION_BUCKET}/sensitive?region={PRIMARY_REGION}"),
                ),
                b: BackendConfig::new("local", local_uri(local_root.as_ref())),
            },
            migration: MigrationSettings::default(),
            workload: WorkloadSettings::default(),
        }
    }

    /// Load and validate a configuration from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| RelocateError::Config {
            message: format!("Cannot read {}: {e}", path.display()),
        })?;
        let config: Self = serde_json::from_str(&raw).map_err(|e| RelocateError::Config {
            message: format!("Cannot parse {}: {e}", path.display()),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// The backend pair configured for a policy.
    pub fn policy(&self, kind: PolicyKind) -> &PolicyConfig {
        match kind {
            PolicyKind::RegionPlacement => &self.region,
            PolicyKind::SensitivityPlacement => &self.sensitivity,
        }
    }

    /// Reject configurations the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.migration.concurrency == 0 {
            return Err(RelocateError::Config {
                message: "migration.concurrency must be at least 1".to_string(),
            });
        }
        if self.workload.concurrency == 0 {
            return Err(RelocateError::Config {
                message: "workload.concurrency must be at least 1".to_string(),
            });
        }
        if self.workload.pass_interval_ms == 0 {
            return Err(RelocateError::Config {
                message: "workload.pass_interval_ms must be at least 1".to_string(),
            });
        }
        for kind in PolicyKind::ALL {
            let policy = self.policy(kind);
            if policy.a.uri == policy.b.uri {
                return Err(RelocateError::Config {
                    message: format!(
                        "{kind} policy uses the same backend for both states: {}",
                        policy.a.uri
                    ),
                });
            }
        }
        Ok(())
    }
}

fn local_uri(path: &Path) -> String {
    format!("local://{}", path.display())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_config_is_valid() {
        let config = EngineConfig::local("/tmp/relocate");
        config.validate().unwrap();
        assert_eq!(config.region.a.uri, "local:///tmp/relocate/secondary-region");
        assert_eq!(
            config.policy(PolicyKind::SensitivityPlacement).backend_for(PlacementState::B).name,
            "local"
        );
    }

    #[test]
    fn test_aws_defaults_keep_policies_disjoint() {
        let config = EngineConfig::aws_defaults("/var/lib/relocate");
        config.validate().unwrap();
        assert!(config.region.b.uri.starts_with("s3://eu-data-bucket/region"));
        assert!(config.sensitivity.a.uri.starts_with("s3://eu-data-bucket/sensitive"));
        assert_ne!(config.region.b.uri, config.sensitivity.a.uri);
    }

    #[test]
    fn test_validate_rejects_shared_backend() {
        let mut config = EngineConfig::local("/tmp/relocate");
        config.sensitivity.b = config.sensitivity.a.clone();
        assert!(matches!(config.validate(), Err(RelocateError::Config { .. })));
    }

    #[test]
    fn test_validate_rejects_zero_concurrency() {
        let mut config = EngineConfig::local("/tmp/relocate");
        config.migration.concurrency = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_pass_interval() {
        let mut config = EngineConfig::local("/tmp/relocate");
        config.workload.pass_interval_ms = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("pass_interval_ms"));
        // Settings built without validation still idle between passes
        assert_eq!(config.workload.pass_interval(), Duration::from_millis(1));
    }

    #[test]
    fn test_load_fills_defaults() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("relocate.json");
        let json = serde_json::json!({
            "region": {
                "a": {"name": "na", "uri": "memory://na"},
                "b": {"name": "eu", "uri": "memory://eu"}
            },
            "sensitivity": {
                "a": {"name": "cloud", "uri": "memory://cloud"},
                "b": {"name": "local", "uri": "memory://local"}
            },
            "workload": {"pass_interval_ms": 5}
        });
        std::fs::write(&path, serde_json::to_vec(&json).unwrap()).unwrap();

        let config = EngineConfig::load(&path).unwrap();
        assert_eq!(config.migration, MigrationSettings::default());
        assert_eq!(config.workload.pass_interval(), Duration::from_millis(5));
        assert_eq!(config.workload.concurrency, DEFAULT_WORKLOAD_CONCURRENCY);
    }

    #[test]
    fn test_load_missing_file() {
        assert!(matches!(
            EngineConfig::load("/definitely/not/here.json"),
            Err(RelocateError::Config { .. })
        ));
    }
}
