//! Persistence traits for the unified storage abstraction layer
//!
//! This module defines the core persistence traits that abstract over the
//! storage backends: external database (MySQL/PostgreSQL via SeaORM) and
//! standalone embedded (RocksDB).
//!
//! Backends report store-level rule violations (duplicate tag names) as
//! `RedlogError::Conflict` wrapped in `anyhow`, so callers can recover the
//! typed error with `RedlogError::from_store`.

pub mod log;
pub mod tag;

pub use log::LogPersistence;
pub use tag::TagPersistence;

use async_trait::async_trait;

use crate::model::StorageMode;

/// Unified persistence service trait
///
/// This is the main interface for all storage operations. Implementations
/// dispatch to the appropriate storage backend based on the configured mode.
#[async_trait]
pub trait PersistenceService: LogPersistence + TagPersistence + Send + Sync {
    /// Get the current storage mode
    fn storage_mode(&self) -> StorageMode;

    /// Health check for the storage backend
    async fn health_check(&self) -> anyhow::Result<()>;
}
