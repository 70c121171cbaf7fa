//! Persisted per-record edit lock
//!
//! The lock lives in the record row, so it holds across handlers and
//! restarts. Transitions come from [`LockState`]; writing one back is a
//! compare-and-swap on the lock columns and a lost race is a `Conflict`.

use std::sync::Arc;

use tracing::{info, warn};

use redlog_common::{Actor, LockStatus, RedlogError, RedlogResult};
use redlog_persistence::{LogPersistence, PersistenceService};

use crate::audit::{AuditEvent, AuditSink, action};

pub struct RecordLock {
    persistence: Arc<dyn PersistenceService>,
    audit: Arc<dyn AuditSink>,
}

impl RecordLock {
    pub fn new(persistence: Arc<dyn PersistenceService>, audit: Arc<dyn AuditSink>) -> Self {
        Self { persistence, audit }
    }

    /// Current `{locked, locked_by}` of a record
    pub async fn status(&self, log_id: i64) -> RedlogResult<LockStatus> {
        let record = self
            .persistence
            .log_find_by_id(log_id)
            .await
            .map_err(RedlogError::from_store)?
            .ok_or_else(|| RedlogError::not_found("log", log_id))?;
        Ok(LockStatus::from(&record.lock_state()))
    }

    /// Acquire the lock when the record is unlocked, release it otherwise
    pub async fn toggle(&self, log_id: i64, actor: &Actor) -> RedlogResult<LockStatus> {
        let result = self.toggle_inner(log_id, actor).await;

        if let Err(e) = &result {
            warn!(log_id, actor = %actor.username, error = ?e, "Lock toggle rejected");
        }
        self.audit.record(
            AuditEvent::builder(action::LOCK_TOGGLE)
                .actor(&actor.username)
                .resource_id(log_id)
                .outcome(&result)
                .details_json(&result.as_ref().ok())
                .build(),
        );
        result
    }

    async fn toggle_inner(&self, log_id: i64, actor: &Actor) -> RedlogResult<LockStatus> {
        let record = self
            .persistence
            .log_find_by_id(log_id)
            .await
            .map_err(RedlogError::from_store)?
            .ok_or_else(|| RedlogError::not_found("log", log_id))?;

        let current = record.lock_state();
        let next = current.toggle(actor)?;
        if next == current {
            return Ok(LockStatus::from(&next));
        }

        let swapped = self
            .persistence
            .log_swap_lock(log_id, &current, &next)
            .await
            .map_err(RedlogError::from_store)?;
        if !swapped {
            return Err(RedlogError::conflict("lock state changed concurrently"));
        }

        Ok(LockStatus::from(&next))
    }

    /// Unlock every record. Admin only.
    pub async fn release_all(&self, actor: &Actor) -> RedlogResult<u64> {
        let result = if actor.is_admin() {
            self.persistence
                .log_release_all_locks()
                .await
                .map_err(RedlogError::from_store)
        } else {
            Err(RedlogError::permission_denied(
                "only an admin can release all locks",
            ))
        };

        match &result {
            Ok(count) => info!(actor = %actor.username, count, "Released all record locks"),
            Err(e) => warn!(actor = %actor.username, error = ?e, "Release of all locks failed"),
        }
        self.audit.record(
            AuditEvent::builder(action::LOCK_RELEASE_ALL)
                .actor(&actor.username)
                .outcome(&result)
                .details_json(&serde_json::json!({ "released": result.as_ref().ok() }))
                .build(),
        );
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::MemoryAuditSink;
    use crate::test_support::embedded_store;
    use chrono::Utc;
    use redlog_persistence::{LogRecordValues, NewLogRecord};

    type Setup = (
        RecordLock,
        Arc<dyn PersistenceService>,
        Arc<MemoryAuditSink>,
        tempfile::TempDir,
        i64,
    );

    async fn setup() -> Setup {
        let (store, tmp) = embedded_store();
        let audit = Arc::new(MemoryAuditSink::new());
        let record = store
            .log_insert(NewLogRecord {
                timestamp: Utc::now().naive_utc(),
                values: LogRecordValues::default(),
            })
            .await
            .unwrap();
        let lock = RecordLock::new(store.clone(), audit.clone());
        (lock, store, audit, tmp, record.id)
    }

    #[tokio::test]
    async fn test_toggle_acquires_then_releases() {
        let (lock, _store, audit, _tmp, id) = setup().await;
        let alice = Actor::standard("alice");

        let status = lock.toggle(id, &alice).await.unwrap();
        assert!(status.locked);
        assert_eq!(status.locked_by.as_deref(), Some("alice"));

        let status = lock.toggle(id, &alice).await.unwrap();
        assert!(!status.locked);
        assert_eq!(status.locked_by, None);
        assert_eq!(audit.names(), vec!["lock_toggle", "lock_toggle"]);
    }

    #[tokio::test]
    async fn test_release_by_other_user_leaves_lock_unchanged() {
        let (lock, _store, audit, _tmp, id) = setup().await;
        lock.toggle(id, &Actor::standard("alice")).await.unwrap();

        let err = lock.toggle(id, &Actor::standard("bob")).await.unwrap_err();
        match err {
            RedlogError::PermissionDenied(reason) => assert!(reason.contains("alice")),
            other => panic!("unexpected error: {other:?}"),
        }

        let status = lock.status(id).await.unwrap();
        assert!(status.locked);
        assert_eq!(status.locked_by.as_deref(), Some("alice"));
        assert_eq!(audit.names().last().unwrap(), "lock_toggle_error");
    }

    #[tokio::test]
    async fn test_admin_can_release_foreign_lock() {
        let (lock, _store, _audit, _tmp, id) = setup().await;
        lock.toggle(id, &Actor::standard("alice")).await.unwrap();
        let status = lock.toggle(id, &Actor::admin("root")).await.unwrap();
        assert!(!status.locked);
    }

    #[tokio::test]
    async fn test_lost_race_is_conflict() {
        let (lock, store, _audit, _tmp, id) = setup().await;
        let record = store.log_find_by_id(id).await.unwrap().unwrap();
        let observed = record.lock_state();

        lock.toggle(id, &Actor::standard("alice")).await.unwrap();

        // A writer still holding the stale observation loses the swap
        let next = observed.acquire(&Actor::standard("bob")).unwrap();
        assert!(!store.log_swap_lock(id, &observed, &next).await.unwrap());
    }

    #[tokio::test]
    async fn test_toggle_unknown_record() {
        let (lock, _store, _audit, _tmp, _id) = setup().await;
        let err = lock.toggle(404, &Actor::standard("alice")).await.unwrap_err();
        assert!(matches!(err, RedlogError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_release_all_requires_admin() {
        let (lock, _store, audit, _tmp, id) = setup().await;
        lock.toggle(id, &Actor::standard("alice")).await.unwrap();

        let err = lock.release_all(&Actor::standard("alice")).await.unwrap_err();
        assert!(matches!(err, RedlogError::PermissionDenied(_)));
        assert_eq!(lock.release_all(&Actor::admin("root")).await.unwrap(), 1);
        assert!(!lock.status(id).await.unwrap().locked);
        assert_eq!(
            audit.names()[1..],
            ["lock_release_all_error", "lock_release_all"]
        );
    }
}
