//! The StorageBackend trait, the single interface for all storage operations.
//!
//! Every object the engine migrates or reads goes through this trait.
//! Implementations include `LocalBackend` (filesystem), `S3Backend` (any
//! S3-compatible endpoint) and `MemoryBackend` (tests), all in
//! `relocate-storage`. Policy and migration code never touches a medium
//! directly.

use async_trait::async_trait;
use bytes::Bytes;

use crate::Result;

/// The four-operation storage capability shared by every placement medium.
///
/// Implementations hold no mutable state beyond their connection
/// configuration and must be `Send + Sync`: a single backend is read by a
/// workload generator and written by a migration from different tasks.
///
/// Concurrent `put`/`delete` calls on disjoint keys must be safe. Same-key
/// writes from different callers are last-writer-wins.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// The logical name (or region tag) of this backend, used in logs and errors.
    fn name(&self) -> &str;

    /// List every object key currently stored.
    ///
    /// Implementations page through the underlying medium; callers always
    /// receive the complete key set, sorted.
    async fn list(&self) -> Result<Vec<String>>;

    /// Read an object. Returns [`RelocateError::NotFound`](crate::RelocateError::NotFound)
    /// if the key does not exist.
    async fn get(&self, key: &str) -> Result<Bytes>;

    /// Write an object. Overwrites if it already exists.
    async fn put(&self, key: &str, data: Bytes) -> Result<()>;

    /// Delete an object. Does not error if the key does not exist.
    async fn delete(&self, key: &str) -> Result<()>;
}
