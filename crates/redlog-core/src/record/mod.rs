//! Log record CRUD orchestration
//!
//! Every write goes through the sanitizer and validator; field writes respect
//! the record lock.

mod input;

pub use input::{LogInput, LogPatch};

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};

use redlog_common::{Actor, LockStatus, RedlogError, RedlogResult};
use redlog_persistence::{
    LogPersistence, LogRecordData, NewLogRecord, Page, PersistenceService,
};

use crate::audit::{AuditEvent, AuditSink, action};
use crate::lock::RecordLock;
use crate::tag::TagGovernor;

pub const DEFAULT_PAGE_SIZE: u64 = 50;

pub const MAX_PAGE_SIZE: u64 = 500;

pub struct RecordStore {
    persistence: Arc<dyn PersistenceService>,
    tags: Arc<TagGovernor>,
    lock: RecordLock,
    audit: Arc<dyn AuditSink>,
}

impl RecordStore {
    pub fn new(
        persistence: Arc<dyn PersistenceService>,
        tags: Arc<TagGovernor>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            lock: RecordLock::new(persistence.clone(), audit.clone()),
            persistence,
            tags,
            audit,
        }
    }

    pub fn tags(&self) -> &Arc<TagGovernor> {
        &self.tags
    }

    pub fn lock(&self) -> &RecordLock {
        &self.lock
    }

    fn emit<T>(
        &self,
        action: &str,
        actor: &Actor,
        resource_ids: impl IntoIterator<Item = i64>,
        result: &RedlogResult<T>,
    ) {
        self.audit.record(
            AuditEvent::builder(action)
                .actor(&actor.username)
                .resource_ids(resource_ids)
                .outcome(result)
                .build(),
        );
    }

    async fn require_log(&self, id: i64) -> RedlogResult<LogRecordData> {
        self.persistence
            .log_find_by_id(id)
            .await
            .map_err(RedlogError::from_store)?
            .ok_or_else(|| RedlogError::not_found("log", id))
    }

    /// Create a record owned by `actor`.
    ///
    /// Nothing is written if any field fails validation. When the actor is
    /// scoped to an engagement, its operation tag becomes the native tag.
    pub async fn create_log(&self, input: LogInput, actor: &Actor) -> RedlogResult<LogRecordData> {
        let result = self.create_log_inner(input, actor).await;
        match &result {
            Ok(record) => info!(log_id = record.id, actor = %actor.username, "Log record created"),
            Err(e) => warn!(actor = %actor.username, error = ?e, "Log record rejected"),
        }
        self.emit(
            action::LOG_CREATE,
            actor,
            result.as_ref().ok().map(|r| r.id),
            &result,
        );

        if let (Ok(record), Some(engagement_id)) = (&result, actor.engagement_id) {
            if let Err(e) = self
                .tags
                .attach_native_tag(record.id, engagement_id, actor)
                .await
            {
                warn!(
                    log_id = record.id,
                    engagement_id,
                    error = ?e,
                    "Native operation tag not attached"
                );
            }
        }
        result
    }

    async fn create_log_inner(&self, input: LogInput, actor: &Actor) -> RedlogResult<LogRecordData> {
        let values = input.into_values(&actor.username)?;
        self.persistence
            .log_insert(NewLogRecord {
                timestamp: Utc::now().naive_utc(),
                values,
            })
            .await
            .map_err(RedlogError::from_store)
    }

    /// Apply a partial update.
    ///
    /// Returns `Ok(None)` without writing when the patch names no column. A
    /// record locked by someone else is rejected before any field is looked at.
    pub async fn update_log(
        &self,
        id: i64,
        patch: LogPatch,
        actor: &Actor,
    ) -> RedlogResult<Option<LogRecordData>> {
        if patch.is_empty() {
            debug!(log_id = id, "Empty update, nothing to write");
            return Ok(None);
        }

        let result = self.update_log_inner(id, patch, actor).await;
        if let Err(e) = &result {
            warn!(log_id = id, actor = %actor.username, error = ?e, "Log update rejected");
        }
        self.emit(action::LOG_UPDATE, actor, [id], &result);
        result
    }

    async fn update_log_inner(
        &self,
        id: i64,
        patch: LogPatch,
        actor: &Actor,
    ) -> RedlogResult<Option<LogRecordData>> {
        let record = self.require_log(id).await?;
        let lock = record.lock_state();
        if lock.blocks(actor) {
            return Err(RedlogError::permission_denied(format!(
                "record is locked by {}",
                lock.owner().unwrap_or_default()
            )));
        }

        let changes = patch.into_changes()?;
        if changes.is_empty() {
            return Ok(None);
        }

        self.persistence
            .log_update(id, changes)
            .await
            .map_err(RedlogError::from_store)?
            .map(Some)
            .ok_or_else(|| RedlogError::not_found("log", id))
    }

    /// Hard delete, admin only. Tag associations go with the record.
    pub async fn delete_log(&self, id: i64, actor: &Actor) -> RedlogResult<LogRecordData> {
        let result = if actor.is_admin() {
            self.persistence
                .log_delete(id)
                .await
                .map_err(RedlogError::from_store)
                .and_then(|deleted| deleted.ok_or_else(|| RedlogError::not_found("log", id)))
        } else {
            Err(RedlogError::permission_denied(
                "only an admin can delete log records",
            ))
        };

        match &result {
            Ok(_) => info!(log_id = id, actor = %actor.username, "Log record deleted"),
            Err(e) => warn!(log_id = id, actor = %actor.username, error = ?e, "Log delete rejected"),
        }
        self.emit(action::LOG_DELETE, actor, [id], &result);
        result
    }

    pub async fn get_log(&self, id: i64) -> RedlogResult<LogRecordData> {
        self.require_log(id).await
    }

    /// A page of records, newest first. Page numbers start at 1.
    pub async fn list_logs(&self, page_no: u64, page_size: u64) -> RedlogResult<Page<LogRecordData>> {
        let page_size = if page_size == 0 {
            DEFAULT_PAGE_SIZE
        } else {
            page_size.min(MAX_PAGE_SIZE)
        };
        self.persistence
            .log_find_page(page_no.max(1), page_size)
            .await
            .map_err(RedlogError::from_store)
    }

    /// Lock projection for edit preflight
    pub async fn get_lock_status(&self, id: i64) -> RedlogResult<LockStatus> {
        self.lock.status(id).await
    }

    pub async fn toggle_lock(&self, id: i64, actor: &Actor) -> RedlogResult<LockStatus> {
        self.lock.toggle(id, actor).await
    }

    pub async fn release_all_locks(&self, actor: &Actor) -> RedlogResult<u64> {
        self.lock.release_all(actor).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::MemoryAuditSink;
    use crate::tag::TagInput;
    use crate::test_support::embedded_store;
    use serde_json::json;
    use tempfile::TempDir;

    fn setup() -> (RecordStore, Arc<MemoryAuditSink>, TempDir) {
        let (store, tmp) = embedded_store();
        let audit = Arc::new(MemoryAuditSink::new());
        let tags = Arc::new(TagGovernor::new(store.clone(), audit.clone()));
        (RecordStore::new(store, tags, audit.clone()), audit, tmp)
    }

    fn input(value: serde_json::Value) -> LogInput {
        serde_json::from_value(value).unwrap()
    }

    fn patch(value: serde_json::Value) -> LogPatch {
        serde_json::from_value(value).unwrap()
    }

    #[tokio::test]
    async fn test_create_sets_server_fields() {
        let (records, audit, _tmp) = setup();
        let alice = Actor::standard("alice");

        let record = records
            .create_log(
                input(json!({ "hostname": "ws01", "mac_address": "AA:BB:CC:DD:EE:FF" })),
                &alice,
            )
            .await
            .unwrap();
        assert_eq!(record.values.analyst.as_deref(), Some("alice"));
        assert_eq!(record.values.mac_address.as_deref(), Some("AA-BB-CC-DD-EE-FF"));
        assert!(!record.locked);
        assert_eq!(record.locked_by, None);
        assert_eq!(audit.names(), vec!["log_create"]);
    }

    #[tokio::test]
    async fn test_create_rejects_whole_record() {
        let (records, audit, _tmp) = setup();
        let err = records
            .create_log(
                input(json!({ "hostname": "ws01", "internal_ip": "10.0.0.300" })),
                &Actor::standard("alice"),
            )
            .await
            .unwrap_err();
        assert!(err.field_errors().unwrap().contains("internal_ip"));
        assert_eq!(records.list_logs(1, 10).await.unwrap().total_count, 0);
        assert_eq!(audit.names(), vec!["log_create_error"]);
    }

    #[tokio::test]
    async fn test_create_attaches_native_tag_for_engagement() {
        let (records, _audit, _tmp) = setup();
        let op = records
            .tags()
            .provision_operation_tag(12, "op-blue", None, &Actor::admin("root"))
            .await
            .unwrap();

        let alice = Actor::standard("alice").with_engagement(12);
        let record = records
            .create_log(input(json!({ "command": "whoami" })), &alice)
            .await
            .unwrap();
        let tags = records.tags().get_tags_for_log(record.id).await.unwrap();
        assert_eq!(tags.len(), 1);
        assert_eq!(tags[0].id, op.id);

        // No operation tag for this engagement: the record is still created
        let bob = Actor::standard("bob").with_engagement(99);
        let record = records
            .create_log(input(json!({ "command": "id" })), &bob)
            .await
            .unwrap();
        assert!(records.tags().get_tags_for_log(record.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_update_applies_patch() {
        let (records, _audit, _tmp) = setup();
        let alice = Actor::standard("alice");
        let record = records
            .create_log(input(json!({ "hostname": "ws01", "notes": "initial" })), &alice)
            .await
            .unwrap();

        let updated = records
            .update_log(
                record.id,
                patch(json!({ "hostname": "ws02", "notes": "", "pid": "31337" })),
                &alice,
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.values.hostname.as_deref(), Some("ws02"));
        assert_eq!(updated.values.notes, None);
        assert_eq!(updated.values.pid, Some(31337));
        assert_eq!(updated.timestamp, record.timestamp);
    }

    #[tokio::test]
    async fn test_empty_update_is_noop() {
        let (records, audit, _tmp) = setup();
        let outcome = records
            .update_log(404, patch(json!({ "locked": false })), &Actor::standard("alice"))
            .await
            .unwrap();
        assert_eq!(outcome, None);
        assert!(audit.events().is_empty());
    }

    #[tokio::test]
    async fn test_update_blocked_by_foreign_lock() {
        let (records, _audit, _tmp) = setup();
        let alice = Actor::standard("alice");
        let bob = Actor::standard("bob");
        let record = records
            .create_log(input(json!({ "hostname": "ws01" })), &alice)
            .await
            .unwrap();
        records.toggle_lock(record.id, &alice).await.unwrap();

        // Rejected on the lock even though the value is also invalid
        let err = records
            .update_log(record.id, patch(json!({ "hostname": "bad host" })), &bob)
            .await
            .unwrap_err();
        match err {
            RedlogError::PermissionDenied(reason) => assert!(reason.contains("alice")),
            other => panic!("unexpected error: {other:?}"),
        }

        // Owner and admin may still write
        records
            .update_log(record.id, patch(json!({ "status": "done" })), &alice)
            .await
            .unwrap();
        let updated = records
            .update_log(record.id, patch(json!({ "status": "reviewed" })), &Actor::admin("root"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.values.status.as_deref(), Some("reviewed"));
        assert_eq!(updated.locked_by.as_deref(), Some("alice"));
    }

    #[tokio::test]
    async fn test_update_unknown_record() {
        let (records, _audit, _tmp) = setup();
        let err = records
            .update_log(7, patch(json!({ "status": "x" })), &Actor::standard("alice"))
            .await
            .unwrap_err();
        assert!(matches!(err, RedlogError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_delete_is_admin_only_and_cascades() {
        let (records, audit, _tmp) = setup();
        let alice = Actor::standard("alice");
        let record = records
            .create_log(input(json!({ "hostname": "ws01" })), &alice)
            .await
            .unwrap();
        let tag = records
            .tags()
            .create_tag(TagInput::named("recon"), &alice)
            .await
            .unwrap();
        records
            .tags()
            .attach_tags_by_id(record.id, &[tag.id], &alice)
            .await
            .unwrap();

        let err = records.delete_log(record.id, &alice).await.unwrap_err();
        assert!(matches!(err, RedlogError::PermissionDenied(_)));

        let deleted = records
            .delete_log(record.id, &Actor::admin("root"))
            .await
            .unwrap();
        assert_eq!(deleted.id, record.id);
        assert!(matches!(
            records.get_log(record.id).await.unwrap_err(),
            RedlogError::NotFound { .. }
        ));
        let stats = records.tags().get_tag_stats().await.unwrap();
        assert_eq!(stats[0].count, 0);
        assert!(audit.names().contains(&"log_delete".to_string()));
    }

    #[tokio::test]
    async fn test_lock_status_and_listing() {
        let (records, _audit, _tmp) = setup();
        let alice = Actor::standard("alice");
        for host in ["a1", "a2", "a3"] {
            records
                .create_log(input(json!({ "hostname": host })), &alice)
                .await
                .unwrap();
        }

        let page = records.list_logs(1, 2).await.unwrap();
        assert_eq!(page.total_count, 3);
        assert_eq!(page.page_items.len(), 2);
        assert_eq!(page.page_items[0].values.hostname.as_deref(), Some("a3"));

        let id = page.page_items[0].id;
        assert!(!records.get_lock_status(id).await.unwrap().locked);
        records.toggle_lock(id, &alice).await.unwrap();
        let status = records.get_lock_status(id).await.unwrap();
        assert_eq!(status.locked_by.as_deref(), Some("alice"));
        assert_eq!(records.release_all_locks(&Actor::admin("root")).await.unwrap(), 1);
    }
}
