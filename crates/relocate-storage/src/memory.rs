//! In-memory storage backend with fault injection.
//!
//! [`MemoryBackend`] keeps objects in a sorted map. Any operation can be
//! armed to fail, for one key or for every key, which lets tests drive the
//! migrator and the policies through partial failures deterministically.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tracing::{debug, instrument};

use relocate_core::error::RelocateError;
use relocate_core::storage::StorageBackend;
use relocate_core::Result;

/// The storage operation a fault applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultOp {
    List,
    Get,
    Put,
    Delete,
}

/// What an armed fault does when it fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultMode {
    /// The operation returns a storage error.
    Fail,
    /// The operation reports success without touching the data.
    /// Only meaningful for `Put` and `Delete`.
    Ignore,
}

#[derive(Debug, Clone)]
struct Fault {
    op: FaultOp,
    key: Option<String>,
    mode: FaultMode,
}

impl Fault {
    fn matches(&self, op: FaultOp, key: Option<&str>) -> bool {
        self.op == op && (self.key.is_none() || self.key.as_deref() == key)
    }
}

/// Operation counters of a [`MemoryBackend`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoryStats {
    pub lists: u64,
    pub gets: u64,
    pub puts: u64,
    pub deletes: u64,
    pub faults_injected: u64,
}

/// A [`StorageBackend`] holding objects in process memory.
#[derive(Debug)]
pub struct MemoryBackend {
    name: String,
    objects: RwLock<BTreeMap<String, Bytes>>,
    faults: Mutex<Vec<Fault>>,
    latency: Mutex<Option<Duration>>,
    lists: AtomicU64,
    gets: AtomicU64,
    puts: AtomicU64,
    deletes: AtomicU64,
    faults_injected: AtomicU64,
}

impl MemoryBackend {
    /// Create an empty backend.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            objects: RwLock::new(BTreeMap::new()),
            faults: Mutex::new(Vec::new()),
            latency: Mutex::new(None),
            lists: AtomicU64::new(0),
            gets: AtomicU64::new(0),
            puts: AtomicU64::new(0),
            deletes: AtomicU64::new(0),
            faults_injected: AtomicU64::new(0),
        }
    }

    /// Create a backend pre-populated with the given objects.
    pub fn with_objects<K, V>(name: impl Into<String>, objects: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<Bytes>,
    {
        let backend = Self::new(name);
        for (key, data) in objects {
            backend.insert(key, data);
        }
        backend
    }

    /// Store an object directly, bypassing fault injection and counters.
    pub fn insert(&self, key: impl Into<String>, data: impl Into<Bytes>) {
        self.objects_mut().insert(key.into(), data.into());
    }

    /// A copy of every stored object.
    pub fn snapshot(&self) -> BTreeMap<String, Bytes> {
        self.objects().clone()
    }

    /// The stored keys, sorted.
    pub fn keys(&self) -> Vec<String> {
        self.objects().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.objects().len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects().is_empty()
    }

    /// Make `op` fail for `key`, or for every key when `key` is `None`.
    pub fn fail(&self, op: FaultOp, key: Option<&str>) {
        self.arm(op, key, FaultMode::Fail);
    }

    /// Make `op` report success without effect for `key` (or every key).
    pub fn ignore(&self, op: FaultOp, key: Option<&str>) {
        self.arm(op, key, FaultMode::Ignore);
    }

    /// Disarm every fault.
    pub fn clear_faults(&self) {
        self.lock_faults().clear();
    }

    /// Delay every `get` by `latency`.
    pub fn set_latency(&self, latency: Option<Duration>) {
        *self.latency.lock().unwrap_or_else(|e| e.into_inner()) = latency;
    }

    pub fn stats(&self) -> MemoryStats {
        MemoryStats {
            lists: self.lists.load(Ordering::Relaxed),
            gets: self.gets.load(Ordering::Relaxed),
            puts: self.puts.load(Ordering::Relaxed),
            deletes: self.deletes.load(Ordering::Relaxed),
            faults_injected: self.faults_injected.load(Ordering::Relaxed),
        }
    }

    fn arm(&self, op: FaultOp, key: Option<&str>, mode: FaultMode) {
        self.lock_faults().push(Fault {
            op,
            key: key.map(str::to_string),
            mode,
        });
    }

    /// Return the mode of the first armed fault matching this call.
    fn check_fault(&self, op: FaultOp, key: Option<&str>) -> Option<FaultMode> {
        let mode = self
            .lock_faults()
            .iter()
            .find(|f| f.matches(op, key))
            .map(|f| f.mode)?;
        self.faults_injected.fetch_add(1, Ordering::Relaxed);
        debug!(backend = %self.name, ?op, key = ?key, ?mode, "Injecting fault");
        Some(mode)
    }

    fn injected_error(&self, op: FaultOp, key: Option<&str>) -> RelocateError {
        RelocateError::storage_msg(format!(
            "injected {op:?} failure on {} for {}",
            self.name,
            key.unwrap_or("<all>")
        ))
    }

    fn lock_faults(&self) -> std::sync::MutexGuard<'_, Vec<Fault>> {
        self.faults.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn objects(&self) -> std::sync::RwLockReadGuard<'_, BTreeMap<String, Bytes>> {
        self.objects.read().unwrap_or_else(|e| e.into_inner())
    }

    fn objects_mut(&self) -> std::sync::RwLockWriteGuard<'_, BTreeMap<String, Bytes>> {
        self.objects.write().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    fn name(&self) -> &str {
        &self.name
    }

    #[instrument(skip(self), fields(backend = %self.name))]
    async fn list(&self) -> Result<Vec<String>> {
        self.lists.fetch_add(1, Ordering::Relaxed);
        if self.check_fault(FaultOp::List, None).is_some() {
            return Err(self.injected_error(FaultOp::List, None));
        }
        Ok(self.keys())
    }

    #[instrument(skip(self), fields(backend = %self.name, key = %key))]
    async fn get(&self, key: &str) -> Result<Bytes> {
        self.gets.fetch_add(1, Ordering::Relaxed);
        let latency = *self.latency.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        if self.check_fault(FaultOp::Get, Some(key)).is_some() {
            return Err(self.injected_error(FaultOp::Get, Some(key)));
        }
        self.objects()
            .get(key)
            .cloned()
            .ok_or_else(|| RelocateError::NotFound {
                key: key.to_string(),
            })
    }

    #[instrument(skip(self, data), fields(backend = %self.name, key = %key, size = data.len()))]
    async fn put(&self, key: &str, data: Bytes) -> Result<()> {
        self.puts.fetch_add(1, Ordering::Relaxed);
        match self.check_fault(FaultOp::Put, Some(key)) {
            Some(FaultMode::Fail) => Err(self.injected_error(FaultOp::Put, Some(key))),
            Some(FaultMode::Ignore) => Ok(()),
            None => {
                self.objects_mut().insert(key.to_string(), data);
                Ok(())
            }
        }
    }

    #[instrument(skip(self), fields(backend = %self.name, key = %key))]
    async fn delete(&self, key: &str) -> Result<()> {
        self.deletes.fetch_add(1, Ordering::Relaxed);
        match self.check_fault(FaultOp::Delete, Some(key)) {
            Some(FaultMode::Fail) => Err(self.injected_error(FaultOp::Delete, Some(key))),
            Some(FaultMode::Ignore) => Ok(()),
            None => {
                self.objects_mut().remove(key);
                Ok(())
            }
        }
    }
}
