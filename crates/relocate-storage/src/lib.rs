//! Storage backend implementations for Relocate.
//!
//! This crate provides concrete implementations of the
//! [`StorageBackend`](relocate_core::StorageBackend) trait:
//!
//! - [`LocalBackend`]: a directory tree on local disk
//! - [`S3Backend`]: S3-compatible object storage (one backend per bucket/prefix)
//! - [`MemoryBackend`]: process memory with fault injection, for tests
//!
//! [`open_backend`] picks the implementation from a configured URI.

pub mod local;
pub mod memory;
pub mod open;
pub mod s3;

pub use local::LocalBackend;
pub use memory::{FaultMode, FaultOp, MemoryBackend, MemoryStats};
pub use open::open_backend;
pub use s3::S3Backend;
