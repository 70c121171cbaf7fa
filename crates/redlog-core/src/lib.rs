//! Redlog Core - governance services for operational log records
//!
//! This crate provides:
//! - Field sanitization and validation (`sanitize`)
//! - The persisted per-record edit lock (`lock`)
//! - Tag lifecycle, protection rules and analytics (`tag`)
//! - Log record CRUD orchestration (`record`)
//! - Credential-scoped batch ingestion with rate limiting (`ingest`)
//! - Audit events for every mutation (`audit`)

pub mod audit;
pub mod ingest;
pub mod lock;
pub mod record;
pub mod sanitize;
pub mod tag;

pub use audit::{AuditEvent, AuditSink, MemoryAuditSink, TracingAuditSink};
pub use ingest::{BatchReport, IngestConfig, Ingestor, RateLimitConfig};
pub use lock::RecordLock;
pub use record::{LogInput, LogPatch, RecordStore};
pub use tag::{TagCoOccurrence, TagGovernor, TagInput, TagStat, TagUpdate};

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::Arc;

    use redlog_persistence::{EmbeddedPersistService, PersistenceService};
    use tempfile::TempDir;

    /// A fresh embedded store; keep the `TempDir` alive for the test's duration
    pub fn embedded_store() -> (Arc<dyn PersistenceService>, TempDir) {
        let tmp_dir = TempDir::new().unwrap();
        let store = EmbeddedPersistService::open(tmp_dir.path()).unwrap();
        (Arc::new(store), tmp_dir)
    }
}
