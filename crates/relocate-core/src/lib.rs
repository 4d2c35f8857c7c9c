//! Relocate core types, traits, configuration, and errors.
//!
//! This crate provides the foundational building blocks of the Relocate
//! adaptation engine: the [`StorageBackend`] trait every placement medium
//! implements, policy and request types, engine configuration, and the
//! unified error type.

pub mod config;
pub mod error;
pub mod storage;
pub mod types;

pub use config::EngineConfig;
pub use error::RelocateError;
pub use storage::StorageBackend;
pub use types::*;

/// Convenience Result type using [`RelocateError`].
pub type Result<T> = std::result::Result<T, RelocateError>;
