//! Filesystem-backed storage backend.
//!
//! [`LocalBackend`] implements the [`StorageBackend`] trait on a local
//! directory tree. It is the "local disk" side of the sensitivity placement
//! policy, and stands in for object stores in development setups.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::fs;
use tracing::{debug, instrument};

use relocate_core::error::RelocateError;
use relocate_core::storage::StorageBackend;
use relocate_core::Result;

/// A [`StorageBackend`] backed by the local filesystem.
///
/// All keys are mapped to paths under the configured `base_dir`.
/// Parent directories are created automatically on `put`.
#[derive(Debug, Clone)]
pub struct LocalBackend {
    name: String,
    base_dir: PathBuf,
}

impl LocalBackend {
    /// Create a new `LocalBackend` rooted at the given directory.
    ///
    /// The directory is created if it does not exist.
    pub async fn new(name: impl Into<String>, base_dir: impl Into<PathBuf>) -> Result<Self> {
        let name = name.into();
        let base_dir = base_dir.into();
        fs::create_dir_all(&base_dir).await.map_err(|e| {
            RelocateError::storage(
                format!("Failed to create base directory: {}", base_dir.display()),
                e,
            )
        })?;
        debug!(backend = %name, base_dir = %base_dir.display(), "LocalBackend initialised");
        Ok(Self { name, base_dir })
    }

    /// Return the full filesystem path for a storage key.
    fn key_to_path(&self, key: &str) -> Result<PathBuf> {
        let relative = Path::new(key);
        let escapes = relative.components().any(|c| {
            !matches!(c, std::path::Component::Normal(_))
        });
        if key.is_empty() || escapes {
            return Err(RelocateError::InvalidRequest {
                message: format!("Key '{key}' does not name a file under {}", self.base_dir.display()),
            });
        }
        Ok(self.base_dir.join(relative))
    }

    /// Return the base directory.
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }
}

#[async_trait]
impl StorageBackend for LocalBackend {
    fn name(&self) -> &str {
        &self.name
    }

    #[instrument(skip(self), fields(backend = %self.name))]
    async fn list(&self) -> Result<Vec<String>> {
        let base = &self.base_dir;
        let mut results = Vec::new();
        list_recursive(base, base, &mut results).await?;
        results.sort();
        debug!("Listed {} keys", results.len());
        Ok(results)
    }

    #[instrument(skip(self), fields(backend = %self.name, key = %key))]
    async fn get(&self, key: &str) -> Result<Bytes> {
        let path = self.key_to_path(key)?;
        let data = fs::read(&path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                RelocateError::NotFound {
                    key: key.to_string(),
                }
            } else {
                RelocateError::storage(format!("Failed to read {}", path.display()), e)
            }
        })?;
        debug!("Get {} bytes from {}", data.len(), key);
        Ok(Bytes::from(data))
    }

    #[instrument(skip(self, data), fields(backend = %self.name, key = %key, size = data.len()))]
    async fn put(&self, key: &str, data: Bytes) -> Result<()> {
        let path = self.key_to_path(key)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await.map_err(|e| {
                RelocateError::storage(
                    format!(
                        "Failed to create parent directories for {}",
                        path.display()
                    ),
                    e,
                )
            })?;
        }
        fs::write(&path, &data).await.map_err(|e| {
            RelocateError::storage(format!("Failed to write {}", path.display()), e)
        })?;
        debug!("Put {} bytes to {}", data.len(), key);
        Ok(())
    }

    #[instrument(skip(self), fields(backend = %self.name, key = %key))]
    async fn delete(&self, key: &str) -> Result<()> {
        let path = self.key_to_path(key)?;
        match fs::remove_file(&path).await {
            Ok(()) => {
                debug!("Deleted {}", key);
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("Delete {}: already absent", key);
                Ok(())
            }
            Err(e) => Err(RelocateError::storage(
                format!("Failed to delete {}", path.display()),
                e,
            )),
        }
    }
}

/// Recursively list all files under `dir`, producing keys relative to `base`.
async fn list_recursive(base: &Path, dir: &Path, results: &mut Vec<String>) -> Result<()> {
    let mut entries = match fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => {
            return Err(RelocateError::storage(
                format!("Failed to read directory {}", dir.display()),
                e,
            ))
        }
    };

    while let Some(entry) = entries.next_entry().await.map_err(|e| {
        RelocateError::storage(
            format!("Failed to read directory entry in {}", dir.display()),
            e,
        )
    })? {
        let path = entry.path();
        let file_type = entry.file_type().await.map_err(|e| {
            RelocateError::storage(format!("Failed to stat {}", path.display()), e)
        })?;
        if file_type.is_dir() {
            Box::pin(list_recursive(base, &path, results)).await?;
        } else {
            let relative = path
                .strip_prefix(base)
                .map_err(|e| RelocateError::Internal {
                    message: format!("Path prefix strip failed: {e}"),
                })?;
            // Forward slashes keep keys identical across backends
            let key = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy().to_string())
                .collect::<Vec<_>>()
                .join("/");
            results.push(key);
        }
    }

    Ok(())
}
