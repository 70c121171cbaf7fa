//! Tag lifecycle, protection rules and association queries
//!
//! Tags come in two kinds. Standard tags are freely editable. Operation tags
//! represent an engagement: no public operation may modify or delete them,
//! whatever the caller's role, and the one designated native on a log cannot
//! be detached from it.

mod analytics;

pub use analytics::{TagCoOccurrence, TagStat, rank_co_occurrence, tag_stats};

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use redlog_common::{Actor, DEFAULT_TAG_COLOR, FieldErrors, RedlogError, RedlogResult};
use redlog_persistence::{
    LogPersistence, NewTag, PersistenceService, TagChanges, TagData, TagKind, TagPersistence,
    normalize_tag_name,
};

use crate::audit::{AuditEvent, AuditSink, action};
use crate::sanitize::{
    sanitize_preserve_syntax, sanitize_strict, validate_preserved_length, validate_tag_color,
    validate_tag_name,
};

/// Autocomplete results returned when no limit is given
pub const DEFAULT_SEARCH_LIMIT: u64 = 10;

/// Upper bound on autocomplete results
pub const MAX_SEARCH_LIMIT: u64 = 50;

pub const DEFAULT_CO_OCCURRENCE_LIMIT: usize = 10;

/// Fields of a tag to create
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TagInput {
    pub name: String,
    pub color: Option<String>,
    pub category: Option<String>,
    pub description: Option<String>,
}

impl TagInput {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }
}

/// Partial update of a tag. `Some(None)` clears a nullable column.
#[derive(Debug, Clone, Default)]
pub struct TagUpdate {
    pub name: Option<String>,
    pub color: Option<String>,
    pub category: Option<Option<String>>,
    pub description: Option<Option<String>>,
}

/// Outcome of attaching tags by id
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AttachReport {
    /// Newly associated tag ids
    pub attached: Vec<i64>,
    /// Ids that were already associated
    pub already_attached: Vec<i64>,
    /// Ids that match no tag
    pub unknown: Vec<i64>,
    /// The log's tags after the operation
    pub tags: Vec<TagData>,
}

fn clean_name(raw: &str, field: &str, errors: &mut FieldErrors) -> String {
    let name = sanitize_strict(raw);
    if let Err(e) = validate_tag_name(&name) {
        errors.add(field, e);
    }
    name
}

fn clean_color(raw: Option<&str>, errors: &mut FieldErrors) -> String {
    match raw.map(sanitize_strict).filter(|c| !c.is_empty()) {
        None => DEFAULT_TAG_COLOR.to_string(),
        Some(color) => {
            if let Err(e) = validate_tag_color(&color) {
                errors.add("color", e);
            }
            color.to_ascii_uppercase()
        }
    }
}

fn clean_category(raw: Option<&str>, errors: &mut FieldErrors) -> Option<String> {
    let category = sanitize_strict(raw?);
    if category.is_empty() {
        return None;
    }
    if let Err(e) = validate_tag_name(&category) {
        errors.add("category", e);
    }
    Some(category)
}

fn clean_description(raw: Option<&str>, errors: &mut FieldErrors) -> Option<String> {
    let raw = raw?;
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    if let Err(e) = validate_preserved_length(trimmed) {
        errors.add("description", e);
    }
    let description = sanitize_preserve_syntax(raw);
    (!description.is_empty()).then_some(description)
}

pub struct TagGovernor {
    persistence: Arc<dyn PersistenceService>,
    audit: Arc<dyn AuditSink>,
}

impl TagGovernor {
    pub fn new(persistence: Arc<dyn PersistenceService>, audit: Arc<dyn AuditSink>) -> Self {
        Self { persistence, audit }
    }

    fn emit<T>(
        &self,
        action: &str,
        actor: &Actor,
        resource_ids: impl IntoIterator<Item = i64>,
        result: &RedlogResult<T>,
    ) {
        if let Err(e) = result {
            warn!(action, actor = %actor.username, error = ?e, "Tag operation failed");
        }
        self.audit.record(
            AuditEvent::builder(action)
                .actor(&actor.username)
                .resource_ids(resource_ids)
                .outcome(result)
                .build(),
        );
    }

    async fn require_tag(&self, tag_id: i64) -> RedlogResult<TagData> {
        self.persistence
            .tag_find_by_id(tag_id)
            .await
            .map_err(RedlogError::from_store)?
            .ok_or_else(|| RedlogError::not_found("tag", tag_id))
    }

    async fn require_log(&self, log_id: i64) -> RedlogResult<()> {
        self.persistence
            .log_find_by_id(log_id)
            .await
            .map_err(RedlogError::from_store)?
            .map(|_| ())
            .ok_or_else(|| RedlogError::not_found("log", log_id))
    }

    // ========================================================================
    // Tag lifecycle
    // ========================================================================

    pub async fn create_tag(&self, input: TagInput, actor: &Actor) -> RedlogResult<TagData> {
        let result = self.create_tag_inner(input, actor).await;
        self.emit(
            action::TAG_CREATE,
            actor,
            result.as_ref().ok().map(|t| t.id),
            &result,
        );
        result
    }

    async fn create_tag_inner(&self, input: TagInput, actor: &Actor) -> RedlogResult<TagData> {
        let mut errors = FieldErrors::new();
        let name = clean_name(&input.name, "name", &mut errors);
        let color = clean_color(input.color.as_deref(), &mut errors);
        let category = clean_category(input.category.as_deref(), &mut errors);
        let description = clean_description(input.description.as_deref(), &mut errors);
        errors.into_result()?;

        let tag = self
            .persistence
            .tag_insert(NewTag {
                name,
                color,
                kind: TagKind::from_category(category),
                description,
                created_by: actor.username.clone(),
            })
            .await
            .map_err(RedlogError::from_store)?;

        info!(tag_id = tag.id, name = %tag.name, actor = %actor.username, "Tag created");
        Ok(tag)
    }

    /// Update a standard tag. Operation tags are immutable for every caller.
    pub async fn update_tag(
        &self,
        tag_id: i64,
        update: TagUpdate,
        actor: &Actor,
    ) -> RedlogResult<TagData> {
        let result = self.update_tag_inner(tag_id, update).await;
        self.emit(action::TAG_UPDATE, actor, [tag_id], &result);
        result
    }

    async fn update_tag_inner(&self, tag_id: i64, update: TagUpdate) -> RedlogResult<TagData> {
        let existing = self.require_tag(tag_id).await?;
        if existing.kind.is_protected() {
            return Err(RedlogError::permission_denied(
                "operation tags cannot be modified",
            ));
        }

        let mut errors = FieldErrors::new();
        let mut changes = TagChanges::default();
        if let Some(name) = update.name.as_deref() {
            changes.name = Some(clean_name(name, "name", &mut errors));
        }
        if let Some(color) = update.color.as_deref() {
            changes.color = Some(clean_color(Some(color), &mut errors));
        }
        if let Some(category) = update.category {
            let kind = TagKind::from_category(clean_category(category.as_deref(), &mut errors));
            if kind.is_protected() {
                return Err(RedlogError::permission_denied(
                    "tags cannot be moved into the operation category",
                ));
            }
            changes.kind = Some(kind);
        }
        if let Some(description) = update.description {
            changes.description = Some(clean_description(description.as_deref(), &mut errors));
        }
        errors.into_result()?;

        if changes.is_empty() {
            return Ok(existing);
        }

        self.persistence
            .tag_update(tag_id, changes)
            .await
            .map_err(RedlogError::from_store)?
            .ok_or_else(|| RedlogError::not_found("tag", tag_id))
    }

    /// Delete a standard tag and all its associations
    pub async fn delete_tag(&self, tag_id: i64, actor: &Actor) -> RedlogResult<TagData> {
        let result = self.delete_tag_inner(tag_id).await;
        if let Ok(tag) = &result {
            info!(tag_id, name = %tag.name, actor = %actor.username, "Tag deleted");
        }
        self.emit(action::TAG_DELETE, actor, [tag_id], &result);
        result
    }

    async fn delete_tag_inner(&self, tag_id: i64) -> RedlogResult<TagData> {
        let existing = self.require_tag(tag_id).await?;
        if existing.kind.is_protected() {
            return Err(RedlogError::permission_denied(
                "operation tags cannot be deleted",
            ));
        }

        let deleted = self
            .persistence
            .tag_delete(tag_id)
            .await
            .map_err(RedlogError::from_store)?;
        if !deleted {
            return Err(RedlogError::not_found("tag", tag_id));
        }
        Ok(existing)
    }

    /// Create the operation tag of an engagement, or return the existing one.
    ///
    /// This is the only path that creates operation tags bound to an
    /// engagement; it is restricted to admins.
    pub async fn provision_operation_tag(
        &self,
        engagement_id: i64,
        name: &str,
        color: Option<&str>,
        actor: &Actor,
    ) -> RedlogResult<TagData> {
        let result = self
            .provision_operation_tag_inner(engagement_id, name, color, actor)
            .await;
        match &result {
            Ok((_, false)) => {}
            Ok((tag, true)) => self.emit(action::TAG_CREATE, actor, [tag.id], &result),
            Err(_) => self.emit(action::TAG_CREATE, actor, None::<i64>, &result),
        }
        result.map(|(tag, _)| tag)
    }

    async fn provision_operation_tag_inner(
        &self,
        engagement_id: i64,
        name: &str,
        color: Option<&str>,
        actor: &Actor,
    ) -> RedlogResult<(TagData, bool)> {
        if !actor.is_admin() {
            return Err(RedlogError::permission_denied(
                "only an admin can provision operation tags",
            ));
        }

        if let Some(existing) = self
            .persistence
            .tag_find_by_engagement(engagement_id)
            .await
            .map_err(RedlogError::from_store)?
        {
            debug!(engagement_id, tag_id = existing.id, "Operation tag already provisioned");
            return Ok((existing, false));
        }

        let mut errors = FieldErrors::new();
        let name = clean_name(name, "name", &mut errors);
        let color = clean_color(color, &mut errors);
        errors.into_result()?;

        let tag = self
            .persistence
            .tag_insert(NewTag {
                name,
                color,
                kind: TagKind::Operation {
                    engagement_id: Some(engagement_id),
                },
                description: None,
                created_by: actor.username.clone(),
            })
            .await
            .map_err(RedlogError::from_store)?;

        info!(engagement_id, tag_id = tag.id, name = %tag.name, "Operation tag provisioned");
        Ok((tag, true))
    }

    pub async fn get_tag(&self, tag_id: i64) -> RedlogResult<TagData> {
        self.require_tag(tag_id).await
    }

    /// All tags ordered by name
    pub async fn list_tags(&self) -> RedlogResult<Vec<TagData>> {
        self.persistence
            .tag_find_all()
            .await
            .map_err(RedlogError::from_store)
    }

    /// Case-insensitive substring search for autocomplete
    pub async fn search_tags(
        &self,
        fragment: &str,
        limit: Option<u64>,
    ) -> RedlogResult<Vec<TagData>> {
        let limit = limit
            .unwrap_or(DEFAULT_SEARCH_LIMIT)
            .clamp(1, MAX_SEARCH_LIMIT);
        self.persistence
            .tag_search(&sanitize_strict(fragment), limit)
            .await
            .map_err(RedlogError::from_store)
    }

    // ========================================================================
    // Associations
    // ========================================================================

    /// Attach existing tags by id. Re-attaching is a no-op and unknown ids
    /// are reported, not fatal.
    pub async fn attach_tags_by_id(
        &self,
        log_id: i64,
        tag_ids: &[i64],
        actor: &Actor,
    ) -> RedlogResult<AttachReport> {
        let result = self.attach_tags_by_id_inner(log_id, tag_ids).await;
        let attached = result
            .as_ref()
            .map(|r| r.attached.clone())
            .unwrap_or_default();
        self.emit(
            action::TAG_ATTACH,
            actor,
            std::iter::once(log_id).chain(attached),
            &result,
        );
        result
    }

    async fn attach_tags_by_id_inner(
        &self,
        log_id: i64,
        tag_ids: &[i64],
    ) -> RedlogResult<AttachReport> {
        self.require_log(log_id).await?;

        let mut wanted = tag_ids.to_vec();
        wanted.sort_unstable();
        wanted.dedup();

        let found = self
            .persistence
            .tag_find_by_ids(&wanted)
            .await
            .map_err(RedlogError::from_store)?;
        let known: HashSet<i64> = found.iter().map(|t| t.id).collect();

        let mut report = AttachReport {
            unknown: wanted.into_iter().filter(|id| !known.contains(id)).collect(),
            ..Default::default()
        };
        if !report.unknown.is_empty() {
            debug!(log_id, unknown = ?report.unknown, "Ignoring unknown tag ids");
        }

        for tag in &found {
            let inserted = self
                .persistence
                .log_tag_insert(log_id, tag.id, false)
                .await
                .map_err(RedlogError::from_store)?;
            if inserted {
                report.attached.push(tag.id);
            } else {
                report.already_attached.push(tag.id);
            }
        }

        report.tags = self.tags_for_log(log_id).await?;
        Ok(report)
    }

    /// Find or create each named tag, attach it, and return the log's full
    /// tag set.
    pub async fn attach_tags_by_name(
        &self,
        log_id: i64,
        names: &[String],
        actor: &Actor,
    ) -> RedlogResult<Vec<TagData>> {
        let result = self.attach_tags_by_name_inner(log_id, names, actor).await;
        self.emit(action::TAG_ATTACH, actor, [log_id], &result);
        result
    }

    async fn attach_tags_by_name_inner(
        &self,
        log_id: i64,
        names: &[String],
        actor: &Actor,
    ) -> RedlogResult<Vec<TagData>> {
        self.require_log(log_id).await?;

        let mut errors = FieldErrors::new();
        let mut seen = HashSet::new();
        let cleaned: Vec<String> = names
            .iter()
            .map(|n| clean_name(n, "names", &mut errors))
            .filter(|n| seen.insert(normalize_tag_name(n)))
            .collect();
        errors.into_result()?;

        for name in cleaned {
            let tag = self.find_or_create(&name, actor).await?;
            self.persistence
                .log_tag_insert(log_id, tag.id, false)
                .await
                .map_err(RedlogError::from_store)?;
        }

        self.tags_for_log(log_id).await
    }

    async fn find_or_create(&self, name: &str, actor: &Actor) -> RedlogResult<TagData> {
        if let Some(tag) = self
            .persistence
            .tag_find_by_name(name)
            .await
            .map_err(RedlogError::from_store)?
        {
            return Ok(tag);
        }

        let created = self
            .persistence
            .tag_insert(NewTag {
                name: name.to_string(),
                color: DEFAULT_TAG_COLOR.to_string(),
                kind: TagKind::default(),
                description: None,
                created_by: actor.username.clone(),
            })
            .await
            .map_err(RedlogError::from_store);

        match created {
            Ok(tag) => {
                info!(
                    tag_id = tag.id,
                    name = %tag.name,
                    actor = %actor.username,
                    "Tag created on attach"
                );
                self.emit(action::TAG_CREATE, actor, [tag.id], &Ok::<_, RedlogError>(()));
                Ok(tag)
            }
            // Created concurrently under the same name
            Err(RedlogError::Conflict(reason)) => self
                .persistence
                .tag_find_by_name(name)
                .await
                .map_err(RedlogError::from_store)?
                .ok_or(RedlogError::Conflict(reason)),
            Err(e) => Err(e),
        }
    }

    /// Attach an engagement's operation tag as the log's native tag
    pub async fn attach_native_tag(
        &self,
        log_id: i64,
        engagement_id: i64,
        actor: &Actor,
    ) -> RedlogResult<TagData> {
        let result = self.attach_native_tag_inner(log_id, engagement_id).await;
        let tag_id = result.as_ref().ok().map(|t| t.id);
        self.emit(
            action::TAG_ATTACH,
            actor,
            std::iter::once(log_id).chain(tag_id),
            &result,
        );
        result
    }

    async fn attach_native_tag_inner(
        &self,
        log_id: i64,
        engagement_id: i64,
    ) -> RedlogResult<TagData> {
        self.require_log(log_id).await?;
        let tag = self
            .persistence
            .tag_find_by_engagement(engagement_id)
            .await
            .map_err(RedlogError::from_store)?
            .ok_or_else(|| RedlogError::not_found("operation tag for engagement", engagement_id))?;

        self.persistence
            .log_tag_set_native(log_id, tag.id)
            .await
            .map_err(RedlogError::from_store)?;

        Ok(tag)
    }

    /// Remove one association. The log's native tag cannot be detached.
    pub async fn detach_tag(&self, log_id: i64, tag_id: i64, actor: &Actor) -> RedlogResult<()> {
        let result = self.detach_tag_inner(log_id, tag_id).await;
        self.emit(action::TAG_DETACH, actor, [log_id, tag_id], &result);
        result
    }

    async fn detach_tag_inner(&self, log_id: i64, tag_id: i64) -> RedlogResult<()> {
        self.require_log(log_id).await?;

        let associations = self
            .persistence
            .log_tag_find_by_logs(&[log_id])
            .await
            .map_err(RedlogError::from_store)?;
        let Some(association) = associations.iter().find(|a| a.tag_id == tag_id) else {
            return Err(RedlogError::not_found(
                "log tag",
                format!("{}/{}", log_id, tag_id),
            ));
        };
        if association.native {
            return Err(RedlogError::permission_denied(
                "cannot remove the native operation tag from this log",
            ));
        }

        let removed = self
            .persistence
            .log_tag_delete(log_id, tag_id)
            .await
            .map_err(RedlogError::from_store)?;
        if !removed {
            return Err(RedlogError::not_found(
                "log tag",
                format!("{}/{}", log_id, tag_id),
            ));
        }
        Ok(())
    }

    /// Remove every association of a log except its native tag. Returns the
    /// number removed.
    pub async fn detach_all_tags(&self, log_id: i64, actor: &Actor) -> RedlogResult<u64> {
        let result = async {
            self.require_log(log_id).await?;
            self.persistence
                .log_tag_delete_all(log_id, true)
                .await
                .map_err(RedlogError::from_store)
        }
        .await;
        self.emit(action::TAG_DETACH, actor, [log_id], &result);
        result
    }

    // ========================================================================
    // Queries
    // ========================================================================

    async fn tags_for_log(&self, log_id: i64) -> RedlogResult<Vec<TagData>> {
        Ok(self
            .get_tags_for_logs(&[log_id])
            .await?
            .remove(&log_id)
            .unwrap_or_default())
    }

    /// Tags of one log, ordered by name
    pub async fn get_tags_for_log(&self, log_id: i64) -> RedlogResult<Vec<TagData>> {
        self.require_log(log_id).await?;
        self.tags_for_log(log_id).await
    }

    /// Tags of many logs in one pass. Every requested id is present in the
    /// result, with an empty list when the log has no tags.
    pub async fn get_tags_for_logs(
        &self,
        log_ids: &[i64],
    ) -> RedlogResult<BTreeMap<i64, Vec<TagData>>> {
        let mut by_log: BTreeMap<i64, Vec<TagData>> =
            log_ids.iter().map(|id| (*id, Vec::new())).collect();
        if log_ids.is_empty() {
            return Ok(by_log);
        }

        let associations = self
            .persistence
            .log_tag_find_by_logs(log_ids)
            .await
            .map_err(RedlogError::from_store)?;

        let mut tag_ids: Vec<i64> = associations.iter().map(|a| a.tag_id).collect();
        tag_ids.sort_unstable();
        tag_ids.dedup();
        let tags: HashMap<i64, TagData> = self
            .persistence
            .tag_find_by_ids(&tag_ids)
            .await
            .map_err(RedlogError::from_store)?
            .into_iter()
            .map(|t| (t.id, t))
            .collect();

        for association in associations {
            if let Some(tag) = tags.get(&association.tag_id) {
                by_log.entry(association.log_id).or_default().push(tag.clone());
            }
        }
        for tags in by_log.values_mut() {
            tags.sort_by_key(|t| normalize_tag_name(&t.name));
        }
        Ok(by_log)
    }

    /// Tags most often attached to the same logs as `tag_id`
    pub async fn get_tag_co_occurrence(
        &self,
        tag_id: i64,
        limit: Option<usize>,
    ) -> RedlogResult<Vec<TagCoOccurrence>> {
        self.require_tag(tag_id).await?;

        let log_ids: Vec<i64> = self
            .persistence
            .log_tag_find_by_tag(tag_id)
            .await
            .map_err(RedlogError::from_store)?
            .into_iter()
            .map(|a| a.log_id)
            .collect();
        if log_ids.is_empty() {
            return Ok(Vec::new());
        }

        let associations = self
            .persistence
            .log_tag_find_by_logs(&log_ids)
            .await
            .map_err(RedlogError::from_store)?;
        let mut related: Vec<i64> = associations
            .iter()
            .map(|a| a.tag_id)
            .filter(|id| *id != tag_id)
            .collect();
        related.sort_unstable();
        related.dedup();

        let tags: HashMap<i64, TagData> = self
            .persistence
            .tag_find_by_ids(&related)
            .await
            .map_err(RedlogError::from_store)?
            .into_iter()
            .map(|t| (t.id, t))
            .collect();

        Ok(rank_co_occurrence(
            tag_id,
            &associations,
            &tags,
            limit.unwrap_or(DEFAULT_CO_OCCURRENCE_LIMIT),
        ))
    }

    /// Usage count of every tag
    pub async fn get_tag_stats(&self) -> RedlogResult<Vec<TagStat>> {
        let tags = self.list_tags().await?;
        let usage = self
            .persistence
            .tag_usage_counts()
            .await
            .map_err(RedlogError::from_store)?;
        Ok(tag_stats(tags, &usage))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::MemoryAuditSink;
    use crate::test_support::embedded_store;
    use chrono::Utc;
    use redlog_persistence::{LogRecordValues, NewLogRecord};
    use tempfile::TempDir;

    struct Fixture {
        governor: TagGovernor,
        store: Arc<dyn PersistenceService>,
        audit: Arc<MemoryAuditSink>,
        _tmp: TempDir,
    }

    impl Fixture {
        fn new() -> Self {
            let (store, tmp) = embedded_store();
            let audit = Arc::new(MemoryAuditSink::new());
            Self {
                governor: TagGovernor::new(store.clone(), audit.clone()),
                store,
                audit,
                _tmp: tmp,
            }
        }

        async fn log(&self) -> i64 {
            self.store
                .log_insert(NewLogRecord {
                    timestamp: Utc::now().naive_utc(),
                    values: LogRecordValues::default(),
                })
                .await
                .unwrap()
                .id
        }

        async fn operation_tag(&self, engagement_id: i64) -> TagData {
            self.governor
                .provision_operation_tag(
                    engagement_id,
                    &format!("op-{}", engagement_id),
                    None,
                    &Actor::admin("root"),
                )
                .await
                .unwrap()
        }
    }

    #[tokio::test]
    async fn test_create_tag_validates_and_defaults() {
        let f = Fixture::new();
        let alice = Actor::standard("alice");

        let tag = f
            .governor
            .create_tag(
                TagInput {
                    name: "  Lateral Movement ".to_string(),
                    description: Some("<b>pivot</b>".to_string()),
                    ..Default::default()
                },
                &alice,
            )
            .await
            .unwrap();
        assert_eq!(tag.name, "Lateral Movement");
        assert_eq!(tag.color, DEFAULT_TAG_COLOR);
        assert_eq!(tag.description.as_deref(), Some("&lt;b&gt;pivot&lt;/b&gt;"));
        assert_eq!(tag.created_by, "alice");

        let err = f
            .governor
            .create_tag(
                TagInput {
                    name: "<img>".to_string(),
                    color: Some("red".to_string()),
                    ..Default::default()
                },
                &alice,
            )
            .await
            .unwrap_err();
        let errors = err.field_errors().unwrap();
        assert!(errors.contains("name"));
        assert!(errors.contains("color"));
    }

    #[tokio::test]
    async fn test_create_tag_duplicate_is_conflict() {
        let f = Fixture::new();
        let alice = Actor::standard("alice");
        f.governor
            .create_tag(TagInput::named("Recon"), &alice)
            .await
            .unwrap();

        let err = f
            .governor
            .create_tag(TagInput::named("RECON"), &alice)
            .await
            .unwrap_err();
        assert!(matches!(err, RedlogError::Conflict(_)));
        assert_eq!(f.audit.names(), vec!["tag_create", "tag_create_error"]);
    }

    #[tokio::test]
    async fn test_operation_tag_immutable_even_for_admin() {
        let f = Fixture::new();
        let op = f.operation_tag(5).await;
        let root = Actor::admin("root");

        let err = f
            .governor
            .update_tag(
                op.id,
                TagUpdate {
                    color: Some("#000000".to_string()),
                    ..Default::default()
                },
                &root,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, RedlogError::PermissionDenied(_)));

        let err = f.governor.delete_tag(op.id, &root).await.unwrap_err();
        assert!(matches!(err, RedlogError::PermissionDenied(_)));
        assert!(f.governor.get_tag(op.id).await.is_ok());
    }

    #[tokio::test]
    async fn test_created_operation_category_tag_is_protected() {
        let f = Fixture::new();
        let tag = f
            .governor
            .create_tag(
                TagInput {
                    name: "op-legacy".to_string(),
                    category: Some("Operation".to_string()),
                    ..Default::default()
                },
                &Actor::admin("root"),
            )
            .await
            .unwrap();
        assert!(tag.kind.is_protected());
        assert!(
            f.governor
                .delete_tag(tag.id, &Actor::admin("root"))
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn test_update_cannot_promote_to_operation() {
        let f = Fixture::new();
        let alice = Actor::standard("alice");
        let tag = f
            .governor
            .create_tag(TagInput::named("recon"), &alice)
            .await
            .unwrap();

        let err = f
            .governor
            .update_tag(
                tag.id,
                TagUpdate {
                    category: Some(Some("operation".to_string())),
                    ..Default::default()
                },
                &alice,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, RedlogError::PermissionDenied(_)));

        let updated = f
            .governor
            .update_tag(
                tag.id,
                TagUpdate {
                    name: Some("Reconnaissance".to_string()),
                    color: Some("#ff8800".to_string()),
                    category: Some(Some("technique".to_string())),
                    description: Some(None),
                },
                &alice,
            )
            .await
            .unwrap();
        assert_eq!(updated.name, "Reconnaissance");
        assert_eq!(updated.color, "#FF8800");
        assert_eq!(updated.kind.category(), Some("technique"));
    }

    #[tokio::test]
    async fn test_provision_is_idempotent_and_admin_only() {
        let f = Fixture::new();
        let first = f.operation_tag(3).await;
        let second = f
            .governor
            .provision_operation_tag(3, "other-name", None, &Actor::admin("root"))
            .await
            .unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(
            first.kind,
            TagKind::Operation {
                engagement_id: Some(3)
            }
        );

        let err = f
            .governor
            .provision_operation_tag(4, "op-4", None, &Actor::standard("alice"))
            .await
            .unwrap_err();
        assert!(matches!(err, RedlogError::PermissionDenied(_)));
    }

    #[tokio::test]
    async fn test_attach_by_id_is_idempotent() {
        let f = Fixture::new();
        let alice = Actor::standard("alice");
        let log = f.log().await;
        let tag = f
            .governor
            .create_tag(TagInput::named("recon"), &alice)
            .await
            .unwrap();

        let first = f
            .governor
            .attach_tags_by_id(log, &[tag.id, 999], &alice)
            .await
            .unwrap();
        assert_eq!(first.attached, vec![tag.id]);
        assert_eq!(first.unknown, vec![999]);

        let second = f
            .governor
            .attach_tags_by_id(log, &[tag.id], &alice)
            .await
            .unwrap();
        assert!(second.attached.is_empty());
        assert_eq!(second.already_attached, vec![tag.id]);

        let rows = f.store.log_tag_find_by_logs(&[log]).await.unwrap();
        assert_eq!(rows.len(), 1);
    }

    #[tokio::test]
    async fn test_attach_by_name_creates_missing_tags() {
        let f = Fixture::new();
        let alice = Actor::standard("alice");
        let log = f.log().await;
        f.governor
            .create_tag(TagInput::named("Recon"), &alice)
            .await
            .unwrap();

        let tags = f
            .governor
            .attach_tags_by_name(
                log,
                &["recon".to_string(), "privilege-escalation".to_string(), "RECON".to_string()],
                &alice,
            )
            .await
            .unwrap();
        let names: Vec<_> = tags.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["privilege-escalation", "Recon"]);
        assert_eq!(f.governor.list_tags().await.unwrap().len(), 2);

        let err = f
            .governor
            .attach_tags_by_name(log, &["bad<name>".to_string()], &alice)
            .await
            .unwrap_err();
        assert!(err.field_errors().unwrap().contains("names"));
    }

    #[tokio::test]
    async fn test_native_tag_cannot_be_detached() {
        let f = Fixture::new();
        let alice = Actor::standard("alice").with_engagement(8);
        let log = f.log().await;
        let op = f.operation_tag(8).await;
        f.governor.attach_native_tag(log, 8, &alice).await.unwrap();
        let tags = f
            .governor
            .attach_tags_by_name(log, &["recon".to_string(), "c2".to_string()], &alice)
            .await
            .unwrap();
        let recon = tags.iter().find(|t| t.name == "recon").unwrap().clone();

        let err = f.governor.detach_tag(log, op.id, &alice).await.unwrap_err();
        match err {
            RedlogError::PermissionDenied(reason) => {
                assert_eq!(reason, "cannot remove the native operation tag from this log")
            }
            other => panic!("unexpected error: {other:?}"),
        }

        f.governor.detach_tag(log, recon.id, &alice).await.unwrap();
        let remaining: Vec<_> = f
            .governor
            .get_tags_for_log(log)
            .await
            .unwrap()
            .into_iter()
            .map(|t| t.name)
            .collect();
        assert_eq!(remaining, vec!["c2", "op-8"]);

        let err = f.governor.detach_tag(log, recon.id, &alice).await.unwrap_err();
        assert!(matches!(err, RedlogError::NotFound { .. }));

        // Bulk removal keeps the native tag
        assert_eq!(f.governor.detach_all_tags(log, &alice).await.unwrap(), 1);
        let remaining = f.governor.get_tags_for_log(log).await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id, op.id);
    }

    #[tokio::test]
    async fn test_attach_native_tag_conflicts_with_other_engagement() {
        let f = Fixture::new();
        let root = Actor::admin("root");
        let log = f.log().await;
        f.operation_tag(1).await;
        f.operation_tag(2).await;

        f.governor.attach_native_tag(log, 1, &root).await.unwrap();
        // Same engagement again is a no-op
        f.governor.attach_native_tag(log, 1, &root).await.unwrap();
        let err = f.governor.attach_native_tag(log, 2, &root).await.unwrap_err();
        assert!(matches!(err, RedlogError::Conflict(_)));

        let err = f.governor.attach_native_tag(log, 77, &root).await.unwrap_err();
        assert!(matches!(err, RedlogError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_attach_native_promotes_plain_association() {
        let f = Fixture::new();
        let root = Actor::admin("root");
        let log = f.log().await;
        let op = f.operation_tag(3).await;

        f.governor.attach_tags_by_id(log, &[op.id], &root).await.unwrap();
        f.governor.attach_native_tag(log, 3, &root).await.unwrap();

        let rows = f.store.log_tag_find_by_logs(&[log]).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert!(rows[0].native);
        let err = f.governor.detach_tag(log, op.id, &root).await.unwrap_err();
        assert!(matches!(err, RedlogError::PermissionDenied(_)));
    }

    #[tokio::test]
    async fn test_co_occurrence_ranking() {
        let f = Fixture::new();
        let alice = Actor::standard("alice");
        let names = |list: &[&str]| list.iter().map(|s| s.to_string()).collect::<Vec<_>>();

        for _ in 0..3 {
            let log = f.log().await;
            f.governor
                .attach_tags_by_name(log, &names(&["a", "b"]), &alice)
                .await
                .unwrap();
        }
        let log = f.log().await;
        f.governor
            .attach_tags_by_name(log, &names(&["a", "c"]), &alice)
            .await
            .unwrap();

        let a = f.store.tag_find_by_name("a").await.unwrap().unwrap();
        let ranked = f.governor.get_tag_co_occurrence(a.id, None).await.unwrap();
        let summary: Vec<_> = ranked
            .iter()
            .map(|r| (r.tag.name.as_str(), r.count))
            .collect();
        assert_eq!(summary, vec![("b", 3), ("c", 1)]);

        let stats = f.governor.get_tag_stats().await.unwrap();
        assert_eq!(stats[0].tag.name, "a");
        assert_eq!(stats[0].count, 4);
    }

    #[tokio::test]
    async fn test_search_and_batched_lookup() {
        let f = Fixture::new();
        let alice = Actor::standard("alice");
        for name in ["exfil-dns", "exfil-http", "recon"] {
            f.governor
                .create_tag(TagInput::named(name), &alice)
                .await
                .unwrap();
        }
        assert_eq!(f.governor.search_tags("EXFIL", None).await.unwrap().len(), 2);
        assert_eq!(
            f.governor.search_tags("exfil", Some(1)).await.unwrap().len(),
            1
        );

        let first = f.log().await;
        let second = f.log().await;
        f.governor
            .attach_tags_by_name(first, &["recon".to_string()], &alice)
            .await
            .unwrap();
        let by_log = f
            .governor
            .get_tags_for_logs(&[first, second])
            .await
            .unwrap();
        assert_eq!(by_log[&first].len(), 1);
        assert!(by_log[&second].is_empty());
    }

    #[tokio::test]
    async fn test_unknown_ids_are_not_found() {
        let f = Fixture::new();
        let alice = Actor::standard("alice");
        assert!(matches!(
            f.governor.get_tag(42).await.unwrap_err(),
            RedlogError::NotFound { .. }
        ));
        assert!(matches!(
            f.governor.attach_tags_by_id(42, &[1], &alice).await.unwrap_err(),
            RedlogError::NotFound { .. }
        ));
        assert!(matches!(
            f.governor.delete_tag(42, &alice).await.unwrap_err(),
            RedlogError::NotFound { .. }
        ));
    }
}
