//! Redlog Persistence - Database entities and persistence layer
//!
//! This crate provides:
//! - SeaORM entity definitions for log records, tags and their associations
//! - Persistence trait abstractions for unified storage
//! - An external database backend and an embedded RocksDB backend
//! - Domain model types for persistence operations

pub mod embedded;
pub mod entity;
pub mod model;
pub mod sql;
pub mod traits;

// Re-export sea-orm for convenience
pub use sea_orm;

// Re-export entity prelude
pub use entity::prelude::*;

// Re-export persistence traits
pub use traits::{LogPersistence, PersistenceService, TagPersistence};

// Re-export SQL backend
pub use sql::{ExternalDbPersistService, create_schema};

// Re-export embedded backend
pub use embedded::EmbeddedPersistService;

// Re-export model types
pub use model::{
    LogRecordChanges, LogRecordData, LogRecordValues, LogTagData, NewLogRecord, NewTag, Page,
    StorageMode, TagChanges, TagData, TagKind, TagUsage, normalize_tag_name,
};
