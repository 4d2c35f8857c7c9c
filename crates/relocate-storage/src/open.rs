//! Construct a backend from its configured URI.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::debug;

use relocate_core::config::BackendConfig;
use relocate_core::error::RelocateError;
use relocate_core::storage::StorageBackend;
use relocate_core::Result;

use crate::local::LocalBackend;
use crate::memory::MemoryBackend;
use crate::s3::S3Backend;

/// Open the backend described by `config`.
///
/// - `s3://bucket/prefix?region=..&endpoint=..` → [`S3Backend`]
/// - `memory://` → an empty [`MemoryBackend`]
/// - `local://<path>` or a raw path (with `~/` expansion) → [`LocalBackend`]
pub async fn open_backend(config: &BackendConfig) -> Result<Arc<dyn StorageBackend>> {
    let uri = config.uri.as_str();
    let backend: Arc<dyn StorageBackend> = if uri.starts_with("s3://") {
        Arc::new(S3Backend::new(&config.name, uri)?)
    } else if uri.starts_with("memory://") {
        Arc::new(MemoryBackend::new(&config.name))
    } else {
        let path = uri.strip_prefix("local://").unwrap_or(uri);
        if path.is_empty() {
            return Err(RelocateError::Config {
                message: format!("Backend {} has an empty storage path", config.name),
            });
        }
        Arc::new(LocalBackend::new(&config.name, expand_home(path)?).await?)
    };
    debug!(backend = %config.name, uri = %uri, "Backend opened");
    Ok(backend)
}

/// Expand a leading `~/` to the home directory.
fn expand_home(path: &str) -> Result<PathBuf> {
    match path.strip_prefix("~/").or_else(|| path.strip_prefix("~\\")) {
        Some(rest) => {
            let home = home_dir().ok_or_else(|| RelocateError::Config {
                message: "Cannot determine home directory".to_string(),
            })?;
            Ok(home.join(rest))
        }
        None => Ok(PathBuf::from(path)),
    }
}

/// Best-effort home directory detection.
fn home_dir() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE").ok().map(PathBuf::from)
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME").ok().map(PathBuf::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    #[tokio::test]
    async fn test_open_local_uri() {
        let tmp = tempfile::TempDir::new().unwrap();
        let config = BackendConfig::new("cloud", format!("local://{}", tmp.path().display()));
        let backend = open_backend(&config).await.unwrap();
        assert_eq!(backend.name(), "cloud");
        backend.put("f1", Bytes::from("x")).await.unwrap();
        assert!(tmp.path().join("f1").exists());
    }

    #[tokio::test]
    async fn test_open_raw_path() {
        let tmp = tempfile::TempDir::new().unwrap();
        let config = BackendConfig::new("local", tmp.path().to_string_lossy().to_string());
        let backend = open_backend(&config).await.unwrap();
        assert!(backend.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_open_memory_uri() {
        let config = BackendConfig::new("mem", "memory://mem");
        let backend = open_backend(&config).await.unwrap();
        backend.put("f1", Bytes::from("x")).await.unwrap();
        assert_eq!(backend.list().await.unwrap(), vec!["f1"]);
    }

    #[tokio::test]
    async fn test_open_empty_path_rejected() {
        let config = BackendConfig::new("broken", "local://");
        assert!(matches!(
            open_backend(&config).await,
            Err(RelocateError::Config { .. })
        ));
    }

    #[test]
    fn test_expand_home() {
        assert_eq!(expand_home("/data/x").unwrap(), PathBuf::from("/data/x"));
        if let Some(home) = home_dir() {
            assert_eq!(expand_home("~/relocate").unwrap(), home.join("relocate"));
        }
    }
}
