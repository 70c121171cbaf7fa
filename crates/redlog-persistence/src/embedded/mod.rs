// Embedded persistence backend using RocksDB
// Provides standalone (single-node) storage without an external database

use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use rocksdb::{ColumnFamily, ColumnFamilyDescriptor, DB, IteratorMode, Options, WriteBatch};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use tracing::info;

use redlog_common::{LockState, RedlogError};

use crate::model::*;
use crate::traits::*;

/// Log records keyed by big-endian id
pub const CF_LOGS: &str = "logs";
/// Tags keyed by big-endian id
pub const CF_TAGS: &str = "tags";
/// Normalized tag name -> tag id
pub const CF_TAG_NAMES: &str = "tag_names";
/// (log id, tag id) -> association metadata
pub const CF_LOG_TAGS: &str = "log_tags";
/// (tag id, log id) -> empty, reverse index of `log_tags`
pub const CF_TAG_LOGS: &str = "tag_logs";
/// Id sequences
pub const CF_META: &str = "meta";

const SEQ_LOGS: &[u8] = b"seq:logs";
const SEQ_TAGS: &[u8] = b"seq:tags";

const ALL_CFS: [&str; 6] = [
    CF_LOGS,
    CF_TAGS,
    CF_TAG_NAMES,
    CF_LOG_TAGS,
    CF_TAG_LOGS,
    CF_META,
];

#[derive(Serialize, Deserialize)]
struct LogTagValue {
    native: bool,
    created_at: chrono::NaiveDateTime,
}

fn id_key(id: i64) -> [u8; 8] {
    id.to_be_bytes()
}

fn pair_key(first: i64, second: i64) -> [u8; 16] {
    let mut key = [0u8; 16];
    key[..8].copy_from_slice(&first.to_be_bytes());
    key[8..].copy_from_slice(&second.to_be_bytes());
    key
}

fn decode_id(bytes: &[u8]) -> Option<i64> {
    bytes.get(..8)?.try_into().ok().map(i64::from_be_bytes)
}

fn decode_pair(bytes: &[u8]) -> Option<(i64, i64)> {
    Some((decode_id(bytes)?, decode_id(bytes.get(8..)?)?))
}

fn rocks_err(action: &str, e: rocksdb::Error) -> anyhow::Error {
    anyhow::anyhow!("RocksDB {} error: {}", action, e)
}

/// Decode a stored JSON value. A row that no longer parses is corruption,
/// not a transient fault.
fn decode<T: DeserializeOwned>(cf_name: &str, bytes: &[u8]) -> anyhow::Result<T> {
    serde_json::from_slice(bytes).map_err(|e| {
        RedlogError::internal(format!("undecodable value in '{}': {}", cf_name, e)).into()
    })
}

/// Standalone embedded persistence using RocksDB
///
/// Suitable for single-node deployments without an external database.
/// Read-modify-write operations are serialized by a process-local mutex;
/// multi-key changes are applied with a single `WriteBatch`.
pub struct EmbeddedPersistService {
    db: Arc<DB>,
    write_lock: Mutex<()>,
}

impl EmbeddedPersistService {
    /// Open (or create) a database under `path` with all column families
    pub fn open(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);

        let mut cf_opts = Options::default();
        cf_opts.set_compression_type(rocksdb::DBCompressionType::Lz4);

        let cfs = ALL_CFS
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(*name, cf_opts.clone()));

        let db = DB::open_cf_descriptors(&db_opts, path.as_ref(), cfs)
            .map_err(|e| rocks_err("open", e))?;
        info!(path = %path.as_ref().display(), "Opened embedded RocksDB storage");

        Ok(Self::new(Arc::new(db)))
    }

    /// Create from a raw RocksDB instance
    pub fn new(db: Arc<DB>) -> Self {
        Self {
            db,
            write_lock: Mutex::new(()),
        }
    }

    /// Get a column family handle
    fn cf(&self, name: &str) -> anyhow::Result<&ColumnFamily> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| anyhow::anyhow!("Column family '{}' not found", name))
    }

    fn get_json<T: DeserializeOwned>(
        &self,
        cf_name: &str,
        key: &[u8],
    ) -> anyhow::Result<Option<T>> {
        let cf = self.cf(cf_name)?;
        match self.db.get_cf(cf, key).map_err(|e| rocks_err("get", e))? {
            Some(bytes) => Ok(Some(decode(cf_name, &bytes)?)),
            None => Ok(None),
        }
    }

    fn put_json<T: Serialize>(&self, cf_name: &str, key: &[u8], value: &T) -> anyhow::Result<()> {
        let cf = self.cf(cf_name)?;
        self.db
            .put_cf(cf, key, serde_json::to_vec(value)?)
            .map_err(|e| rocks_err("put", e))
    }

    /// Decode every value of a column family, in key order
    fn scan_json<T: DeserializeOwned>(&self, cf_name: &str) -> anyhow::Result<Vec<T>> {
        let cf = self.cf(cf_name)?;
        let mut items = Vec::new();
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (_, value) = item.map_err(|e| rocks_err("iterator", e))?;
            items.push(decode(cf_name, &value)?);
        }
        Ok(items)
    }

    /// Keys under an 8-byte id prefix
    fn prefix_keys(&self, cf_name: &str, id: i64) -> anyhow::Result<Vec<Vec<u8>>> {
        let cf = self.cf(cf_name)?;
        let prefix = id_key(id);
        let mut keys = Vec::new();
        let iter = self
            .db
            .iterator_cf(cf, IteratorMode::From(&prefix, rocksdb::Direction::Forward));
        for item in iter {
            let (key, _) = item.map_err(|e| rocks_err("iterator", e))?;
            if !key.starts_with(&prefix) {
                break;
            }
            keys.push(key.to_vec());
        }
        Ok(keys)
    }

    /// Next id of a sequence. Callers must hold `write_lock`.
    fn next_id(&self, seq_key: &[u8]) -> anyhow::Result<i64> {
        let cf = self.cf(CF_META)?;
        let current = self
            .db
            .get_cf(cf, seq_key)
            .map_err(|e| rocks_err("get", e))?
            .and_then(|bytes| decode_id(&bytes))
            .unwrap_or(0);
        let next = current + 1;
        self.db
            .put_cf(cf, seq_key, id_key(next))
            .map_err(|e| rocks_err("put", e))?;
        Ok(next)
    }

    fn tag_id_by_normalized(&self, normalized: &str) -> anyhow::Result<Option<i64>> {
        let cf = self.cf(CF_TAG_NAMES)?;
        Ok(self
            .db
            .get_cf(cf, normalized.as_bytes())
            .map_err(|e| rocks_err("get", e))?
            .and_then(|bytes| decode_id(&bytes)))
    }

    fn log_tag_entries(&self, log_id: i64) -> anyhow::Result<Vec<LogTagData>> {
        let cf = self.cf(CF_LOG_TAGS)?;
        let prefix = id_key(log_id);
        let mut entries = Vec::new();
        let iter = self
            .db
            .iterator_cf(cf, IteratorMode::From(&prefix, rocksdb::Direction::Forward));
        for item in iter {
            let (key, value) = item.map_err(|e| rocks_err("iterator", e))?;
            if !key.starts_with(&prefix) {
                break;
            }
            let Some((log_id, tag_id)) = decode_pair(&key) else {
                continue;
            };
            let value: LogTagValue = decode(CF_LOG_TAGS, &value)?;
            entries.push(LogTagData {
                log_id,
                tag_id,
                native: value.native,
            });
        }
        Ok(entries)
    }

    /// Stage removal of the given associations in both directions
    fn stage_log_tag_removal(
        &self,
        batch: &mut WriteBatch,
        entries: &[LogTagData],
    ) -> anyhow::Result<()> {
        let log_tags = self.cf(CF_LOG_TAGS)?;
        let tag_logs = self.cf(CF_TAG_LOGS)?;
        for entry in entries {
            batch.delete_cf(log_tags, pair_key(entry.log_id, entry.tag_id));
            batch.delete_cf(tag_logs, pair_key(entry.tag_id, entry.log_id));
        }
        Ok(())
    }

    fn write(&self, batch: WriteBatch) -> anyhow::Result<()> {
        self.db.write(batch).map_err(|e| rocks_err("batch write", e))
    }
}

// ============================================================================
// PersistenceService implementation
// ============================================================================

#[async_trait]
impl PersistenceService for EmbeddedPersistService {
    fn storage_mode(&self) -> StorageMode {
        StorageMode::StandaloneEmbedded
    }

    async fn health_check(&self) -> anyhow::Result<()> {
        // Verify we can access column families
        for name in ALL_CFS {
            self.cf(name)?;
        }
        Ok(())
    }
}

// ============================================================================
// LogPersistence implementation
// ============================================================================

#[async_trait]
impl LogPersistence for EmbeddedPersistService {
    async fn log_insert(&self, record: NewLogRecord) -> anyhow::Result<LogRecordData> {
        let _guard = self.write_lock.lock();
        let id = self.next_id(SEQ_LOGS)?;
        let data = LogRecordData {
            id,
            timestamp: record.timestamp,
            values: record.values,
            locked: false,
            locked_by: None,
        };
        self.put_json(CF_LOGS, &id_key(id), &data)?;
        Ok(data)
    }

    async fn log_find_by_id(&self, id: i64) -> anyhow::Result<Option<LogRecordData>> {
        self.get_json(CF_LOGS, &id_key(id))
    }

    async fn log_find_page(
        &self,
        page_no: u64,
        page_size: u64,
    ) -> anyhow::Result<Page<LogRecordData>> {
        let page_no = page_no.max(1);
        let mut records: Vec<LogRecordData> = self.scan_json(CF_LOGS)?;
        if records.is_empty() {
            return Ok(Page::empty());
        }

        records.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then(b.id.cmp(&a.id)));
        let total = records.len() as u64;
        let offset = (page_no - 1).saturating_mul(page_size);
        let offset = usize::try_from(offset).unwrap_or(usize::MAX);
        let items = records
            .into_iter()
            .skip(offset)
            .take(usize::try_from(page_size).unwrap_or(usize::MAX))
            .collect();

        Ok(Page::new(total, page_no, page_size, items))
    }

    async fn log_update(
        &self,
        id: i64,
        changes: LogRecordChanges,
    ) -> anyhow::Result<Option<LogRecordData>> {
        let _guard = self.write_lock.lock();
        let Some(mut data) = self.get_json::<LogRecordData>(CF_LOGS, &id_key(id))? else {
            return Ok(None);
        };
        if changes.is_empty() {
            return Ok(Some(data));
        }

        changes.apply_to(&mut data.values);
        self.put_json(CF_LOGS, &id_key(id), &data)?;
        Ok(Some(data))
    }

    async fn log_delete(&self, id: i64) -> anyhow::Result<Option<LogRecordData>> {
        let _guard = self.write_lock.lock();
        let Some(data) = self.get_json::<LogRecordData>(CF_LOGS, &id_key(id))? else {
            return Ok(None);
        };

        let entries = self.log_tag_entries(id)?;
        let mut batch = WriteBatch::default();
        self.stage_log_tag_removal(&mut batch, &entries)?;
        batch.delete_cf(self.cf(CF_LOGS)?, id_key(id));
        self.write(batch)?;

        Ok(Some(data))
    }

    async fn log_swap_lock(
        &self,
        id: i64,
        expected: &LockState,
        next: &LockState,
    ) -> anyhow::Result<bool> {
        let _guard = self.write_lock.lock();
        let Some(mut data) = self.get_json::<LogRecordData>(CF_LOGS, &id_key(id))? else {
            return Ok(false);
        };
        if &data.lock_state() != expected {
            return Ok(false);
        }

        let (locked, locked_by) = next.to_columns();
        data.locked = locked;
        data.locked_by = locked_by;
        self.put_json(CF_LOGS, &id_key(id), &data)?;
        Ok(true)
    }

    async fn log_release_all_locks(&self) -> anyhow::Result<u64> {
        let _guard = self.write_lock.lock();
        let cf = self.cf(CF_LOGS)?;
        let mut batch = WriteBatch::default();
        let mut released = 0u64;

        for mut data in self.scan_json::<LogRecordData>(CF_LOGS)? {
            if !data.locked {
                continue;
            }
            data.locked = false;
            data.locked_by = None;
            batch.put_cf(cf, id_key(data.id), serde_json::to_vec(&data)?);
            released += 1;
        }

        if released > 0 {
            self.write(batch)?;
        }
        Ok(released)
    }
}

// ============================================================================
// TagPersistence implementation
// ============================================================================

#[async_trait]
impl TagPersistence for EmbeddedPersistService {
    async fn tag_insert(&self, tag: NewTag) -> anyhow::Result<TagData> {
        let _guard = self.write_lock.lock();
        let normalized = normalize_tag_name(&tag.name);
        if self.tag_id_by_normalized(&normalized)?.is_some() {
            return Err(RedlogError::conflict(format!("tag '{}' already exists", tag.name)).into());
        }

        let id = self.next_id(SEQ_TAGS)?;
        let data = TagData {
            id,
            name: tag.name,
            color: tag.color,
            kind: tag.kind,
            description: tag.description,
            created_by: tag.created_by,
            created_at: Utc::now().naive_utc(),
        };

        let mut batch = WriteBatch::default();
        batch.put_cf(self.cf(CF_TAGS)?, id_key(id), serde_json::to_vec(&data)?);
        batch.put_cf(self.cf(CF_TAG_NAMES)?, normalized.as_bytes(), id_key(id));
        self.write(batch)?;

        Ok(data)
    }

    async fn tag_find_by_id(&self, id: i64) -> anyhow::Result<Option<TagData>> {
        self.get_json(CF_TAGS, &id_key(id))
    }

    async fn tag_find_by_name(&self, name: &str) -> anyhow::Result<Option<TagData>> {
        match self.tag_id_by_normalized(&normalize_tag_name(name))? {
            Some(id) => self.get_json(CF_TAGS, &id_key(id)),
            None => Ok(None),
        }
    }

    async fn tag_find_by_ids(&self, ids: &[i64]) -> anyhow::Result<Vec<TagData>> {
        let mut tags = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(tag) = self.get_json::<TagData>(CF_TAGS, &id_key(*id))? {
                tags.push(tag);
            }
        }
        tags.sort_by_key(|t| normalize_tag_name(&t.name));
        tags.dedup_by_key(|t| t.id);
        Ok(tags)
    }

    async fn tag_find_by_engagement(&self, engagement_id: i64) -> anyhow::Result<Option<TagData>> {
        Ok(self
            .scan_json::<TagData>(CF_TAGS)?
            .into_iter()
            .find(|t| t.kind.is_protected() && t.kind.engagement_id() == Some(engagement_id)))
    }

    async fn tag_find_all(&self) -> anyhow::Result<Vec<TagData>> {
        let mut tags: Vec<TagData> = self.scan_json(CF_TAGS)?;
        tags.sort_by_key(|t| normalize_tag_name(&t.name));
        Ok(tags)
    }

    async fn tag_search(&self, fragment: &str, limit: u64) -> anyhow::Result<Vec<TagData>> {
        let needle = normalize_tag_name(fragment);
        let cf = self.cf(CF_TAG_NAMES)?;
        let mut tags = Vec::new();

        // The name index iterates in normalized-name order
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            if tags.len() as u64 >= limit {
                break;
            }
            let (name, id) = item.map_err(|e| rocks_err("iterator", e))?;
            if !String::from_utf8_lossy(&name).contains(&needle) {
                continue;
            }
            let Some(id) = decode_id(&id) else {
                continue;
            };
            if let Some(tag) = self.get_json::<TagData>(CF_TAGS, &id_key(id))? {
                tags.push(tag);
            }
        }
        Ok(tags)
    }

    async fn tag_update(&self, id: i64, changes: TagChanges) -> anyhow::Result<Option<TagData>> {
        let _guard = self.write_lock.lock();
        let Some(mut data) = self.get_json::<TagData>(CF_TAGS, &id_key(id))? else {
            return Ok(None);
        };
        if changes.is_empty() {
            return Ok(Some(data));
        }

        let mut batch = WriteBatch::default();
        if let Some(name) = changes.name {
            let old = normalize_tag_name(&data.name);
            let new = normalize_tag_name(&name);
            if old != new {
                if self.tag_id_by_normalized(&new)?.is_some() {
                    return Err(
                        RedlogError::conflict(format!("tag '{}' already exists", name)).into(),
                    );
                }
                let names = self.cf(CF_TAG_NAMES)?;
                batch.delete_cf(names, old.as_bytes());
                batch.put_cf(names, new.as_bytes(), id_key(id));
            }
            data.name = name;
        }
        if let Some(color) = changes.color {
            data.color = color;
        }
        if let Some(kind) = changes.kind {
            data.kind = kind;
        }
        if let Some(description) = changes.description {
            data.description = description;
        }

        batch.put_cf(self.cf(CF_TAGS)?, id_key(id), serde_json::to_vec(&data)?);
        self.write(batch)?;
        Ok(Some(data))
    }

    async fn tag_delete(&self, id: i64) -> anyhow::Result<bool> {
        let _guard = self.write_lock.lock();
        let Some(data) = self.get_json::<TagData>(CF_TAGS, &id_key(id))? else {
            return Ok(false);
        };

        let entries: Vec<LogTagData> = self
            .prefix_keys(CF_TAG_LOGS, id)?
            .iter()
            .filter_map(|key| decode_pair(key))
            .map(|(tag_id, log_id)| LogTagData {
                log_id,
                tag_id,
                native: false,
            })
            .collect();

        let mut batch = WriteBatch::default();
        self.stage_log_tag_removal(&mut batch, &entries)?;
        batch.delete_cf(
            self.cf(CF_TAG_NAMES)?,
            normalize_tag_name(&data.name).as_bytes(),
        );
        batch.delete_cf(self.cf(CF_TAGS)?, id_key(id));
        self.write(batch)?;

        Ok(true)
    }

    async fn log_tag_insert(
        &self,
        log_id: i64,
        tag_id: i64,
        native: bool,
    ) -> anyhow::Result<bool> {
        let _guard = self.write_lock.lock();
        let log_tags = self.cf(CF_LOG_TAGS)?;
        let key = pair_key(log_id, tag_id);
        if self
            .db
            .get_cf(log_tags, key)
            .map_err(|e| rocks_err("get", e))?
            .is_some()
        {
            return Ok(false);
        }

        let value = LogTagValue {
            native,
            created_at: Utc::now().naive_utc(),
        };
        let mut batch = WriteBatch::default();
        batch.put_cf(log_tags, key, serde_json::to_vec(&value)?);
        batch.put_cf(self.cf(CF_TAG_LOGS)?, pair_key(tag_id, log_id), b"");
        self.write(batch)?;
        Ok(true)
    }

    async fn log_tag_set_native(&self, log_id: i64, tag_id: i64) -> anyhow::Result<bool> {
        let _guard = self.write_lock.lock();
        let entries = self.log_tag_entries(log_id)?;
        if let Some(native) = entries.iter().find(|e| e.native) {
            if native.tag_id == tag_id {
                return Ok(false);
            }
            return Err(RedlogError::conflict(format!(
                "log {} already has a native operation tag",
                log_id
            ))
            .into());
        }

        let log_tags = self.cf(CF_LOG_TAGS)?;
        let key = pair_key(log_id, tag_id);
        let created_at = match self.db.get_cf(log_tags, key).map_err(|e| rocks_err("get", e))? {
            Some(bytes) => decode::<LogTagValue>(CF_LOG_TAGS, &bytes)?.created_at,
            None => Utc::now().naive_utc(),
        };
        let value = LogTagValue {
            native: true,
            created_at,
        };

        let mut batch = WriteBatch::default();
        batch.put_cf(log_tags, key, serde_json::to_vec(&value)?);
        batch.put_cf(self.cf(CF_TAG_LOGS)?, pair_key(tag_id, log_id), b"");
        self.write(batch)?;
        Ok(true)
    }

    async fn log_tag_delete(&self, log_id: i64, tag_id: i64) -> anyhow::Result<bool> {
        let _guard = self.write_lock.lock();
        let log_tags = self.cf(CF_LOG_TAGS)?;
        if self
            .db
            .get_cf(log_tags, pair_key(log_id, tag_id))
            .map_err(|e| rocks_err("get", e))?
            .is_none()
        {
            return Ok(false);
        }

        let mut batch = WriteBatch::default();
        self.stage_log_tag_removal(
            &mut batch,
            &[LogTagData {
                log_id,
                tag_id,
                native: false,
            }],
        )?;
        self.write(batch)?;
        Ok(true)
    }

    async fn log_tag_delete_all(&self, log_id: i64, keep_native: bool) -> anyhow::Result<u64> {
        let _guard = self.write_lock.lock();
        let entries: Vec<LogTagData> = self
            .log_tag_entries(log_id)?
            .into_iter()
            .filter(|e| !(keep_native && e.native))
            .collect();
        if entries.is_empty() {
            return Ok(0);
        }

        let mut batch = WriteBatch::default();
        self.stage_log_tag_removal(&mut batch, &entries)?;
        self.write(batch)?;
        Ok(entries.len() as u64)
    }

    async fn log_tag_find_by_logs(&self, log_ids: &[i64]) -> anyhow::Result<Vec<LogTagData>> {
        let mut entries = Vec::new();
        let mut seen = HashSet::new();
        for log_id in log_ids {
            if seen.insert(*log_id) {
                entries.extend(self.log_tag_entries(*log_id)?);
            }
        }
        Ok(entries)
    }

    async fn log_tag_find_by_tag(&self, tag_id: i64) -> anyhow::Result<Vec<LogTagData>> {
        let log_tags = self.cf(CF_LOG_TAGS)?;
        let mut entries = Vec::new();
        for key in self.prefix_keys(CF_TAG_LOGS, tag_id)? {
            let Some((tag_id, log_id)) = decode_pair(&key) else {
                continue;
            };
            if let Some(bytes) = self
                .db
                .get_cf(log_tags, pair_key(log_id, tag_id))
                .map_err(|e| rocks_err("get", e))?
            {
                let value: LogTagValue = decode(CF_LOG_TAGS, &bytes)?;
                entries.push(LogTagData {
                    log_id,
                    tag_id,
                    native: value.native,
                });
            }
        }
        Ok(entries)
    }

    async fn tag_usage_counts(&self) -> anyhow::Result<Vec<TagUsage>> {
        let cf = self.cf(CF_TAG_LOGS)?;
        let mut counts: BTreeMap<i64, u64> = BTreeMap::new();
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (key, _) = item.map_err(|e| rocks_err("iterator", e))?;
            if let Some(tag_id) = decode_id(&key) {
                *counts.entry(tag_id).or_default() += 1;
            }
        }

        Ok(counts
            .into_iter()
            .map(|(tag_id, count)| TagUsage { tag_id, count })
            .collect())
    }
}
