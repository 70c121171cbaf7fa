//! Redlog Common - Shared types, errors, and identities
//!
//! This crate provides the foundational types used across all Redlog components:
//! - Error types, per-field validation maps, and error codes
//! - Actor and ingestion credential identities
//! - The record lock state machine
//! - Common constants

pub mod actor;
pub mod error;
pub mod lock;

// Re-exports for convenience
pub use actor::{Actor, Credential, Role};
pub use error::{ErrorCode, FieldErrors, RedlogError, RedlogResult};
pub use lock::{LockState, LockStatus};

/// Maximum number of records accepted in a single ingestion request
pub const MAX_BATCH_SIZE: usize = 50;

/// Tag category reserved for engagement (operation) tags
pub const OPERATION_CATEGORY: &str = "operation";

/// Maximum length (in characters) of free-text forensic fields
pub const MAX_PRESERVED_FIELD_LENGTH: usize = 254;

/// Color assigned to tags created without one
pub const DEFAULT_TAG_COLOR: &str = "#6B7280";

/// Placeholder written in place of sensitive values
pub const REDACTED: &str = "[REDACTED]";
