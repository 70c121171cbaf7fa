//! SQL-based persistence backend (MySQL/PostgreSQL via SeaORM)
//!
//! This module implements the persistence traits with direct SeaORM queries.
//! Multi-row changes (record deletion with its associations, tag deletion)
//! run inside a transaction. Lock writes are conditional updates so that two
//! concurrent toggles cannot both succeed.

use async_trait::async_trait;
use chrono::Utc;
use sea_orm::{
    prelude::Expr,
    sea_query::{Asterisk, LikeExpr},
    *,
};

use redlog_common::{LockState, RedlogError};

use crate::entity::{log_record, log_tag, tag};
use crate::model::*;
use crate::traits::*;

/// External database persistence service
///
/// Wraps a SeaORM `DatabaseConnection` and implements all persistence traits
/// by delegating to direct database queries.
pub struct ExternalDbPersistService {
    db: DatabaseConnection,
}

impl ExternalDbPersistService {
    /// Create a new ExternalDbPersistService with the given database connection
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    /// Get a reference to the underlying database connection
    pub fn db(&self) -> &DatabaseConnection {
        &self.db
    }
}

/// Create the `log_records`, `tags` and `log_tags` tables if they are missing
pub async fn create_schema(db: &DatabaseConnection) -> anyhow::Result<()> {
    let backend = db.get_database_backend();
    let schema = Schema::new(backend);

    let mut logs = schema.create_table_from_entity(log_record::Entity);
    db.execute(backend.build(logs.if_not_exists())).await.map_err(db_err)?;

    let mut tags = schema.create_table_from_entity(tag::Entity);
    db.execute(backend.build(tags.if_not_exists())).await.map_err(db_err)?;

    let mut log_tags = schema.create_table_from_entity(log_tag::Entity);
    db.execute(backend.build(log_tags.if_not_exists())).await.map_err(db_err)?;

    tracing::debug!(backend = ?backend, "Redlog schema ensured");
    Ok(())
}

// ============================================================================
// PersistenceService implementation
// ============================================================================

#[async_trait]
impl PersistenceService for ExternalDbPersistService {
    fn storage_mode(&self) -> StorageMode {
        StorageMode::ExternalDb
    }

    async fn health_check(&self) -> anyhow::Result<()> {
        // Execute a simple query to verify connectivity
        log_record::Entity::find()
            .select_only()
            .column_as(Expr::cust("1"), "health")
            .into_tuple::<i32>()
            .one(&self.db)
            .await.map_err(db_err)?;
        Ok(())
    }
}

/// Escape SQL wildcard characters so user input matches literally.
#[inline]
fn escape_sql_like_pattern(input: &str) -> String {
    input
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}

/// Translate a unique-index violation into a typed conflict
fn map_unique_violation(err: DbErr, message: impl FnOnce() -> String) -> anyhow::Error {
    match err.sql_err() {
        Some(SqlErr::UniqueConstraintViolation(_)) => RedlogError::conflict(message()).into(),
        _ => db_err(err),
    }
}

/// Classify a SeaORM error for the service layer.
///
/// Rows or values the backend cannot decode are not going to succeed on a
/// retry, so they surface as `Internal`. Connection and execution failures
/// stay untyped and become transient storage errors.
fn db_err(err: DbErr) -> anyhow::Error {
    match err {
        DbErr::Type(_)
        | DbErr::Json(_)
        | DbErr::RecordNotFound(_)
        | DbErr::AttrNotSet(_)
        | DbErr::TryIntoErr { .. } => RedlogError::internal(err.to_string()).into(),
        err => err.into(),
    }
}

fn log_entity_to_data(model: log_record::Model) -> LogRecordData {
    LogRecordData {
        id: model.id,
        timestamp: model.timestamp,
        values: LogRecordValues {
            internal_ip: model.internal_ip,
            external_ip: model.external_ip,
            mac_address: model.mac_address,
            hostname: model.hostname,
            domain: model.domain,
            username: model.username,
            command: model.command,
            notes: model.notes,
            filename: model.filename,
            hash_algorithm: model.hash_algorithm,
            hash_value: model.hash_value,
            pid: model.pid,
            status: model.status,
            analyst: model.analyst,
            secrets: model.secrets,
        },
        locked: model.locked,
        locked_by: model.locked_by,
    }
}

fn tag_entity_to_data(model: tag::Model) -> TagData {
    TagData {
        id: model.id,
        kind: TagKind::from_columns(model.category, model.engagement_id),
        name: model.name,
        color: model.color,
        description: model.description,
        created_by: model.created_by,
        created_at: model.created_at,
    }
}

fn log_tag_entity_to_data(model: log_tag::Model) -> LogTagData {
    LogTagData {
        log_id: model.log_id,
        tag_id: model.tag_id,
        native: model.is_native,
    }
}

// ============================================================================
// LogPersistence implementation
// ============================================================================

#[async_trait]
impl LogPersistence for ExternalDbPersistService {
    async fn log_insert(&self, record: NewLogRecord) -> anyhow::Result<LogRecordData> {
        let values = record.values;
        let entity = log_record::ActiveModel {
            timestamp: Set(record.timestamp),
            internal_ip: Set(values.internal_ip),
            external_ip: Set(values.external_ip),
            mac_address: Set(values.mac_address),
            hostname: Set(values.hostname),
            domain: Set(values.domain),
            username: Set(values.username),
            command: Set(values.command),
            notes: Set(values.notes),
            filename: Set(values.filename),
            hash_algorithm: Set(values.hash_algorithm),
            hash_value: Set(values.hash_value),
            pid: Set(values.pid),
            status: Set(values.status),
            analyst: Set(values.analyst),
            secrets: Set(values.secrets),
            locked: Set(false),
            locked_by: Set(None),
            ..Default::default()
        };

        let model = entity.insert(&self.db).await.map_err(db_err)?;
        Ok(log_entity_to_data(model))
    }

    async fn log_find_by_id(&self, id: i64) -> anyhow::Result<Option<LogRecordData>> {
        Ok(log_record::Entity::find_by_id(id)
            .one(&self.db)
            .await.map_err(db_err)?
            .map(log_entity_to_data))
    }

    async fn log_find_page(
        &self,
        page_no: u64,
        page_size: u64,
    ) -> anyhow::Result<Page<LogRecordData>> {
        let page_no = page_no.max(1);

        let count = log_record::Entity::find()
            .select_only()
            .column_as(Expr::col(Asterisk).count(), "count")
            .into_tuple::<i64>()
            .one(&self.db)
            .await.map_err(db_err)?
            .unwrap_or_default() as u64;

        if count == 0 {
            return Ok(Page::empty());
        }

        let offset = (page_no - 1).saturating_mul(page_size);
        if offset >= count {
            return Ok(Page::new(count, page_no, page_size, Vec::new()));
        }
        let items = log_record::Entity::find()
            .order_by_desc(log_record::Column::Timestamp)
            .order_by_desc(log_record::Column::Id)
            .offset(offset)
            .limit(page_size)
            .all(&self.db)
            .await.map_err(db_err)?
            .into_iter()
            .map(log_entity_to_data)
            .collect();

        Ok(Page::new(count, page_no, page_size, items))
    }

    async fn log_update(
        &self,
        id: i64,
        changes: LogRecordChanges,
    ) -> anyhow::Result<Option<LogRecordData>> {
        let Some(model) = log_record::Entity::find_by_id(id)
            .one(&self.db)
            .await
            .map_err(db_err)?
        else {
            return Ok(None);
        };
        if changes.is_empty() {
            return Ok(Some(log_entity_to_data(model)));
        }

        let mut entity: log_record::ActiveModel = model.into();
        if let Some(v) = changes.internal_ip {
            entity.internal_ip = Set(v);
        }
        if let Some(v) = changes.external_ip {
            entity.external_ip = Set(v);
        }
        if let Some(v) = changes.mac_address {
            entity.mac_address = Set(v);
        }
        if let Some(v) = changes.hostname {
            entity.hostname = Set(v);
        }
        if let Some(v) = changes.domain {
            entity.domain = Set(v);
        }
        if let Some(v) = changes.username {
            entity.username = Set(v);
        }
        if let Some(v) = changes.command {
            entity.command = Set(v);
        }
        if let Some(v) = changes.notes {
            entity.notes = Set(v);
        }
        if let Some(v) = changes.filename {
            entity.filename = Set(v);
        }
        if let Some(v) = changes.hash_algorithm {
            entity.hash_algorithm = Set(v);
        }
        if let Some(v) = changes.hash_value {
            entity.hash_value = Set(v);
        }
        if let Some(v) = changes.pid {
            entity.pid = Set(v);
        }
        if let Some(v) = changes.status {
            entity.status = Set(v);
        }
        if let Some(v) = changes.analyst {
            entity.analyst = Set(v);
        }
        if let Some(v) = changes.secrets {
            entity.secrets = Set(v);
        }

        let updated = entity.update(&self.db).await.map_err(db_err)?;
        Ok(Some(log_entity_to_data(updated)))
    }

    async fn log_delete(&self, id: i64) -> anyhow::Result<Option<LogRecordData>> {
        let tx = self.db.begin().await.map_err(db_err)?;

        let Some(model) = log_record::Entity::find_by_id(id).one(&tx).await.map_err(db_err)? else {
            return Ok(None);
        };

        log_tag::Entity::delete_many()
            .filter(log_tag::Column::LogId.eq(id))
            .exec(&tx)
            .await.map_err(db_err)?;
        log_record::Entity::delete_by_id(id).exec(&tx).await.map_err(db_err)?;

        tx.commit().await.map_err(db_err)?;
        Ok(Some(log_entity_to_data(model)))
    }

    async fn log_swap_lock(
        &self,
        id: i64,
        expected: &LockState,
        next: &LockState,
    ) -> anyhow::Result<bool> {
        let (expected_locked, expected_owner) = expected.to_columns();
        let (next_locked, next_owner) = next.to_columns();

        let owner_condition = match expected_owner.as_deref() {
            None => Condition::all().add(log_record::Column::LockedBy.is_null()),
            // An ownerless lock may be stored as NULL or as an empty string
            Some("") => Condition::any()
                .add(log_record::Column::LockedBy.is_null())
                .add(log_record::Column::LockedBy.eq("")),
            Some(owner) => Condition::all().add(log_record::Column::LockedBy.eq(owner)),
        };

        let result = log_record::Entity::update_many()
            .col_expr(log_record::Column::Locked, Expr::value(next_locked))
            .col_expr(log_record::Column::LockedBy, Expr::value(next_owner))
            .filter(log_record::Column::Id.eq(id))
            .filter(log_record::Column::Locked.eq(expected_locked))
            .filter(owner_condition)
            .exec(&self.db)
            .await.map_err(db_err)?;

        Ok(result.rows_affected > 0)
    }

    async fn log_release_all_locks(&self) -> anyhow::Result<u64> {
        let result = log_record::Entity::update_many()
            .col_expr(log_record::Column::Locked, Expr::value(false))
            .col_expr(log_record::Column::LockedBy, Expr::value(Option::<String>::None))
            .filter(log_record::Column::Locked.eq(true))
            .exec(&self.db)
            .await.map_err(db_err)?;

        Ok(result.rows_affected)
    }
}

// ============================================================================
// TagPersistence implementation
// ============================================================================

#[async_trait]
impl TagPersistence for ExternalDbPersistService {
    async fn tag_insert(&self, new_tag: NewTag) -> anyhow::Result<TagData> {
        let normalized = normalize_tag_name(&new_tag.name);

        let existing = tag::Entity::find()
            .filter(tag::Column::NormalizedName.eq(normalized.as_str()))
            .one(&self.db)
            .await.map_err(db_err)?;
        if existing.is_some() {
            return Err(
                RedlogError::conflict(format!("tag '{}' already exists", new_tag.name)).into(),
            );
        }

        let name = new_tag.name.clone();
        let entity = tag::ActiveModel {
            name: Set(new_tag.name),
            normalized_name: Set(normalized),
            color: Set(new_tag.color),
            category: Set(new_tag.kind.category().map(str::to_string)),
            engagement_id: Set(new_tag.kind.engagement_id()),
            description: Set(new_tag.description),
            created_by: Set(new_tag.created_by),
            created_at: Set(Utc::now().naive_utc()),
            ..Default::default()
        };

        let model = entity
            .insert(&self.db)
            .await
            .map_err(|e| map_unique_violation(e, || format!("tag '{}' already exists", name)))?;
        Ok(tag_entity_to_data(model))
    }

    async fn tag_find_by_id(&self, id: i64) -> anyhow::Result<Option<TagData>> {
        Ok(tag::Entity::find_by_id(id)
            .one(&self.db)
            .await.map_err(db_err)?
            .map(tag_entity_to_data))
    }

    async fn tag_find_by_name(&self, name: &str) -> anyhow::Result<Option<TagData>> {
        Ok(tag::Entity::find()
            .filter(tag::Column::NormalizedName.eq(normalize_tag_name(name)))
            .one(&self.db)
            .await.map_err(db_err)?
            .map(tag_entity_to_data))
    }

    async fn tag_find_by_ids(&self, ids: &[i64]) -> anyhow::Result<Vec<TagData>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        Ok(tag::Entity::find()
            .filter(tag::Column::Id.is_in(ids.iter().copied()))
            .order_by_asc(tag::Column::NormalizedName)
            .all(&self.db)
            .await.map_err(db_err)?
            .into_iter()
            .map(tag_entity_to_data)
            .collect())
    }

    async fn tag_find_by_engagement(&self, engagement_id: i64) -> anyhow::Result<Option<TagData>> {
        Ok(tag::Entity::find()
            .filter(tag::Column::Category.eq(redlog_common::OPERATION_CATEGORY))
            .filter(tag::Column::EngagementId.eq(engagement_id))
            .order_by_asc(tag::Column::Id)
            .one(&self.db)
            .await.map_err(db_err)?
            .map(tag_entity_to_data))
    }

    async fn tag_find_all(&self) -> anyhow::Result<Vec<TagData>> {
        Ok(tag::Entity::find()
            .order_by_asc(tag::Column::NormalizedName)
            .all(&self.db)
            .await.map_err(db_err)?
            .into_iter()
            .map(tag_entity_to_data)
            .collect())
    }

    async fn tag_search(&self, fragment: &str, limit: u64) -> anyhow::Result<Vec<TagData>> {
        let pattern = format!(
            "%{}%",
            escape_sql_like_pattern(&normalize_tag_name(fragment))
        );

        Ok(tag::Entity::find()
            .filter(tag::Column::NormalizedName.like(LikeExpr::new(pattern).escape('\\')))
            .order_by_asc(tag::Column::NormalizedName)
            .limit(limit)
            .all(&self.db)
            .await.map_err(db_err)?
            .into_iter()
            .map(tag_entity_to_data)
            .collect())
    }

    async fn tag_update(&self, id: i64, changes: TagChanges) -> anyhow::Result<Option<TagData>> {
        let Some(model) = tag::Entity::find_by_id(id).one(&self.db).await.map_err(db_err)? else {
            return Ok(None);
        };
        if changes.is_empty() {
            return Ok(Some(tag_entity_to_data(model)));
        }

        let mut entity: tag::ActiveModel = model.into();
        let renamed = changes.name.clone();
        if let Some(name) = changes.name {
            let normalized = normalize_tag_name(&name);
            let clash = tag::Entity::find()
                .filter(tag::Column::NormalizedName.eq(normalized.as_str()))
                .filter(tag::Column::Id.ne(id))
                .one(&self.db)
                .await.map_err(db_err)?;
            if clash.is_some() {
                return Err(RedlogError::conflict(format!("tag '{}' already exists", name)).into());
            }
            entity.name = Set(name);
            entity.normalized_name = Set(normalized);
        }
        if let Some(color) = changes.color {
            entity.color = Set(color);
        }
        if let Some(kind) = changes.kind {
            entity.category = Set(kind.category().map(str::to_string));
            entity.engagement_id = Set(kind.engagement_id());
        }
        if let Some(description) = changes.description {
            entity.description = Set(description);
        }

        let updated = entity.update(&self.db).await.map_err(|e| {
            map_unique_violation(e, || {
                format!("tag '{}' already exists", renamed.unwrap_or_default())
            })
        })?;
        Ok(Some(tag_entity_to_data(updated)))
    }

    async fn tag_delete(&self, id: i64) -> anyhow::Result<bool> {
        let tx = self.db.begin().await.map_err(db_err)?;

        log_tag::Entity::delete_many()
            .filter(log_tag::Column::TagId.eq(id))
            .exec(&tx)
            .await.map_err(db_err)?;
        let result = tag::Entity::delete_by_id(id).exec(&tx).await.map_err(db_err)?;

        tx.commit().await.map_err(db_err)?;
        Ok(result.rows_affected > 0)
    }

    async fn log_tag_insert(
        &self,
        log_id: i64,
        tag_id: i64,
        native: bool,
    ) -> anyhow::Result<bool> {
        let existing = log_tag::Entity::find_by_id((log_id, tag_id))
            .one(&self.db)
            .await.map_err(db_err)?;
        if existing.is_some() {
            return Ok(false);
        }

        let entity = log_tag::ActiveModel {
            log_id: Set(log_id),
            tag_id: Set(tag_id),
            is_native: Set(native),
            created_at: Set(Utc::now().naive_utc()),
        };

        match log_tag::Entity::insert(entity)
            .exec_without_returning(&self.db)
            .await
        {
            Ok(_) => Ok(true),
            // Lost a race with a concurrent attach of the same pair
            Err(e) if matches!(e.sql_err(), Some(SqlErr::UniqueConstraintViolation(_))) => {
                Ok(false)
            }
            Err(e) => Err(db_err(e)),
        }
    }

    async fn log_tag_set_native(&self, log_id: i64, tag_id: i64) -> anyhow::Result<bool> {
        let tx = self.db.begin().await.map_err(db_err)?;

        let native = log_tag::Entity::find()
            .filter(log_tag::Column::LogId.eq(log_id))
            .filter(log_tag::Column::IsNative.eq(true))
            .one(&tx)
            .await
            .map_err(db_err)?;
        if let Some(native) = native {
            if native.tag_id == tag_id {
                return Ok(false);
            }
            return Err(RedlogError::conflict(format!(
                "log {} already has a native operation tag",
                log_id
            ))
            .into());
        }

        let existing = log_tag::Entity::find_by_id((log_id, tag_id))
            .one(&tx)
            .await
            .map_err(db_err)?;
        match existing {
            Some(model) => {
                let mut entity: log_tag::ActiveModel = model.into();
                entity.is_native = Set(true);
                entity.update(&tx).await.map_err(db_err)?;
            }
            None => {
                let entity = log_tag::ActiveModel {
                    log_id: Set(log_id),
                    tag_id: Set(tag_id),
                    is_native: Set(true),
                    created_at: Set(Utc::now().naive_utc()),
                };
                log_tag::Entity::insert(entity)
                    .exec_without_returning(&tx)
                    .await
                    .map_err(db_err)?;
            }
        }

        tx.commit().await.map_err(db_err)?;
        Ok(true)
    }

    async fn log_tag_delete(&self, log_id: i64, tag_id: i64) -> anyhow::Result<bool> {
        let result = log_tag::Entity::delete_many()
            .filter(log_tag::Column::LogId.eq(log_id))
            .filter(log_tag::Column::TagId.eq(tag_id))
            .exec(&self.db)
            .await.map_err(db_err)?;
        Ok(result.rows_affected > 0)
    }

    async fn log_tag_delete_all(&self, log_id: i64, keep_native: bool) -> anyhow::Result<u64> {
        let mut query = log_tag::Entity::delete_many().filter(log_tag::Column::LogId.eq(log_id));
        if keep_native {
            query = query.filter(log_tag::Column::IsNative.eq(false));
        }
        let result = query.exec(&self.db).await.map_err(db_err)?;
        Ok(result.rows_affected)
    }

    async fn log_tag_find_by_logs(&self, log_ids: &[i64]) -> anyhow::Result<Vec<LogTagData>> {
        if log_ids.is_empty() {
            return Ok(Vec::new());
        }

        Ok(log_tag::Entity::find()
            .filter(log_tag::Column::LogId.is_in(log_ids.iter().copied()))
            .order_by_asc(log_tag::Column::LogId)
            .order_by_asc(log_tag::Column::TagId)
            .all(&self.db)
            .await.map_err(db_err)?
            .into_iter()
            .map(log_tag_entity_to_data)
            .collect())
    }

    async fn log_tag_find_by_tag(&self, tag_id: i64) -> anyhow::Result<Vec<LogTagData>> {
        Ok(log_tag::Entity::find()
            .filter(log_tag::Column::TagId.eq(tag_id))
            .order_by_asc(log_tag::Column::LogId)
            .all(&self.db)
            .await.map_err(db_err)?
            .into_iter()
            .map(log_tag_entity_to_data)
            .collect())
    }

    async fn tag_usage_counts(&self) -> anyhow::Result<Vec<TagUsage>> {
        let rows: Vec<(i64, i64)> = log_tag::Entity::find()
            .select_only()
            .column(log_tag::Column::TagId)
            .column_as(log_tag::Column::LogId.count(), "count")
            .group_by(log_tag::Column::TagId)
            .into_tuple::<(i64, i64)>()
            .all(&self.db)
            .await.map_err(db_err)?;

        Ok(rows
            .into_iter()
            .map(|(tag_id, count)| TagUsage {
                tag_id,
                count: count.max(0) as u64,
            })
            .collect())
    }
}
