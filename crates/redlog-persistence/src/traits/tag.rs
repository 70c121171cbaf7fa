//! Tag and log/tag association persistence trait

use async_trait::async_trait;

use crate::model::{LogTagData, NewTag, TagChanges, TagData, TagUsage};

/// Tag storage operations
#[async_trait]
pub trait TagPersistence: Send + Sync {
    /// Insert a tag; `RedlogError::Conflict` if the name is taken (case-insensitive)
    async fn tag_insert(&self, tag: NewTag) -> anyhow::Result<TagData>;

    async fn tag_find_by_id(&self, id: i64) -> anyhow::Result<Option<TagData>>;

    /// Case-insensitive lookup by name
    async fn tag_find_by_name(&self, name: &str) -> anyhow::Result<Option<TagData>>;

    async fn tag_find_by_ids(&self, ids: &[i64]) -> anyhow::Result<Vec<TagData>>;

    /// Operation tag provisioned for an engagement
    async fn tag_find_by_engagement(&self, engagement_id: i64) -> anyhow::Result<Option<TagData>>;

    /// All tags ordered by name
    async fn tag_find_all(&self) -> anyhow::Result<Vec<TagData>>;

    /// Case-insensitive substring search ordered by name, at most `limit` rows
    async fn tag_search(&self, fragment: &str, limit: u64) -> anyhow::Result<Vec<TagData>>;

    /// Apply a partial update; `None` if the tag does not exist
    async fn tag_update(&self, id: i64, changes: TagChanges) -> anyhow::Result<Option<TagData>>;

    /// Delete a tag together with its log associations
    async fn tag_delete(&self, id: i64) -> anyhow::Result<bool>;

    /// Associate a tag with a log; `false` if the pair already existed
    async fn log_tag_insert(&self, log_id: i64, tag_id: i64, native: bool)
    -> anyhow::Result<bool>;

    /// Make `tag_id` the native tag of a log in one atomic step, promoting a
    /// plain association if there is one. `RedlogError::Conflict` if the log
    /// already has a different native tag; `false` if nothing changed.
    async fn log_tag_set_native(&self, log_id: i64, tag_id: i64) -> anyhow::Result<bool>;

    /// Remove one association; `false` if it did not exist
    async fn log_tag_delete(&self, log_id: i64, tag_id: i64) -> anyhow::Result<bool>;

    /// Remove every association of a log, optionally keeping its native tag
    async fn log_tag_delete_all(&self, log_id: i64, keep_native: bool) -> anyhow::Result<u64>;

    /// Associations of the given logs, in a single pass
    async fn log_tag_find_by_logs(&self, log_ids: &[i64]) -> anyhow::Result<Vec<LogTagData>>;

    /// Associations of one tag
    async fn log_tag_find_by_tag(&self, tag_id: i64) -> anyhow::Result<Vec<LogTagData>>;

    /// Number of logs each tag is attached to (unused tags omitted)
    async fn tag_usage_counts(&self) -> anyhow::Result<Vec<TagUsage>>;
}
