//! Log record persistence trait

use async_trait::async_trait;

use redlog_common::LockState;

use crate::model::{LogRecordChanges, LogRecordData, NewLogRecord, Page};

/// Log record storage operations
#[async_trait]
pub trait LogPersistence: Send + Sync {
    /// Insert a new, unlocked record
    async fn log_insert(&self, record: NewLogRecord) -> anyhow::Result<LogRecordData>;

    async fn log_find_by_id(&self, id: i64) -> anyhow::Result<Option<LogRecordData>>;

    /// Page through records, newest first. `page_no` starts at 1.
    async fn log_find_page(
        &self,
        page_no: u64,
        page_size: u64,
    ) -> anyhow::Result<Page<LogRecordData>>;

    /// Apply a partial update; `None` if the record does not exist
    async fn log_update(
        &self,
        id: i64,
        changes: LogRecordChanges,
    ) -> anyhow::Result<Option<LogRecordData>>;

    /// Delete a record together with its tag associations
    async fn log_delete(&self, id: i64) -> anyhow::Result<Option<LogRecordData>>;

    /// Compare-and-swap the lock columns.
    ///
    /// Writes `next` only if the stored lock still equals `expected`; returns
    /// whether the write happened.
    async fn log_swap_lock(
        &self,
        id: i64,
        expected: &LockState,
        next: &LockState,
    ) -> anyhow::Result<bool>;

    /// Unlock every locked record, returning how many were unlocked
    async fn log_release_all_locks(&self) -> anyhow::Result<u64>;
}
