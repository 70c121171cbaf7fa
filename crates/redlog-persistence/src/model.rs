//! Domain model types for the persistence abstraction layer
//!
//! These types are used as arguments to and return values from the persistence
//! traits, decoupled from specific storage backends.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use redlog_common::{LockState, OPERATION_CATEGORY};

/// A stored log record
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogRecordData {
    pub id: i64,
    pub timestamp: NaiveDateTime,
    #[serde(flatten)]
    pub values: LogRecordValues,
    pub locked: bool,
    pub locked_by: Option<String>,
}

impl LogRecordData {
    pub fn lock_state(&self) -> LockState {
        LockState::from_columns(self.locked, self.locked_by.as_deref())
    }
}

/// The mutable, non-lock columns of a log record
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogRecordValues {
    pub internal_ip: Option<String>,
    pub external_ip: Option<String>,
    pub mac_address: Option<String>,
    pub hostname: Option<String>,
    pub domain: Option<String>,
    pub username: Option<String>,
    pub command: Option<String>,
    pub notes: Option<String>,
    pub filename: Option<String>,
    pub hash_algorithm: Option<String>,
    pub hash_value: Option<String>,
    pub pid: Option<i64>,
    pub status: Option<String>,
    pub analyst: Option<String>,
    pub secrets: Option<String>,
}

/// A log record to insert. New records are always unlocked.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewLogRecord {
    pub timestamp: NaiveDateTime,
    pub values: LogRecordValues,
}

/// Typed partial update of a log record
///
/// Outer `None` leaves the column untouched, `Some(None)` sets it to NULL.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LogRecordChanges {
    pub internal_ip: Option<Option<String>>,
    pub external_ip: Option<Option<String>>,
    pub mac_address: Option<Option<String>>,
    pub hostname: Option<Option<String>>,
    pub domain: Option<Option<String>>,
    pub username: Option<Option<String>>,
    pub command: Option<Option<String>>,
    pub notes: Option<Option<String>>,
    pub filename: Option<Option<String>>,
    pub hash_algorithm: Option<Option<String>>,
    pub hash_value: Option<Option<String>>,
    pub pid: Option<Option<i64>>,
    pub status: Option<Option<String>>,
    pub analyst: Option<Option<String>>,
    pub secrets: Option<Option<String>>,
}

impl LogRecordChanges {
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }

    /// Apply the changes to an in-memory copy of the values
    pub fn apply_to(&self, values: &mut LogRecordValues) {
        fn set<T: Clone>(target: &mut Option<T>, change: &Option<Option<T>>) {
            if let Some(value) = change {
                *target = value.clone();
            }
        }
        set(&mut values.internal_ip, &self.internal_ip);
        set(&mut values.external_ip, &self.external_ip);
        set(&mut values.mac_address, &self.mac_address);
        set(&mut values.hostname, &self.hostname);
        set(&mut values.domain, &self.domain);
        set(&mut values.username, &self.username);
        set(&mut values.command, &self.command);
        set(&mut values.notes, &self.notes);
        set(&mut values.filename, &self.filename);
        set(&mut values.hash_algorithm, &self.hash_algorithm);
        set(&mut values.hash_value, &self.hash_value);
        set(&mut values.pid, &self.pid);
        set(&mut values.status, &self.status);
        set(&mut values.analyst, &self.analyst);
        set(&mut values.secrets, &self.secrets);
    }
}

/// Classification of a tag
///
/// Operation tags represent an engagement and are protected from public
/// mutation; every protection rule matches on this enum.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TagKind {
    Standard { category: Option<String> },
    Operation { engagement_id: Option<i64> },
}

impl Default for TagKind {
    fn default() -> Self {
        TagKind::Standard { category: None }
    }
}

impl TagKind {
    /// Derive the kind from the persisted `category`/`engagement_id` columns
    pub fn from_columns(category: Option<String>, engagement_id: Option<i64>) -> Self {
        match category {
            Some(c) if c.eq_ignore_ascii_case(OPERATION_CATEGORY) => {
                TagKind::Operation { engagement_id }
            }
            category => TagKind::Standard { category },
        }
    }

    /// Interpret a caller-supplied category
    pub fn from_category(category: Option<String>) -> Self {
        Self::from_columns(category, None)
    }

    pub fn category(&self) -> Option<&str> {
        match self {
            TagKind::Standard { category } => category.as_deref(),
            TagKind::Operation { .. } => Some(OPERATION_CATEGORY),
        }
    }

    pub fn engagement_id(&self) -> Option<i64> {
        match self {
            TagKind::Standard { .. } => None,
            TagKind::Operation { engagement_id } => *engagement_id,
        }
    }

    pub fn is_protected(&self) -> bool {
        matches!(self, TagKind::Operation { .. })
    }
}

/// A stored tag
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagData {
    pub id: i64,
    pub name: String,
    pub color: String,
    pub kind: TagKind,
    pub description: Option<String>,
    pub created_by: String,
    pub created_at: NaiveDateTime,
}

/// A tag to insert
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewTag {
    pub name: String,
    pub color: String,
    pub kind: TagKind,
    pub description: Option<String>,
    pub created_by: String,
}

/// Partial update of a tag
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TagChanges {
    pub name: Option<String>,
    pub color: Option<String>,
    pub kind: Option<TagKind>,
    pub description: Option<Option<String>>,
}

impl TagChanges {
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }
}

/// A (log, tag) association
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogTagData {
    pub log_id: i64,
    pub tag_id: i64,
    /// Whether this is the log's defining operation tag
    pub native: bool,
}

/// Number of logs a tag is attached to
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagUsage {
    pub tag_id: i64,
    pub count: u64,
}

/// Case-folded form used for tag name uniqueness and lookup
pub fn normalize_tag_name(name: &str) -> String {
    name.trim().to_lowercase()
}

/// Generic paginated result
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    pub total_count: u64,
    pub page_number: u64,
    pub pages_available: u64,
    pub page_items: Vec<T>,
}

impl<T> Page<T> {
    pub fn new(total_count: u64, page_number: u64, page_size: u64, page_items: Vec<T>) -> Self {
        Self {
            total_count,
            page_number,
            pages_available: if page_size > 0 {
                total_count.div_ceil(page_size)
            } else {
                0
            },
            page_items,
        }
    }

    pub fn empty() -> Self {
        Self {
            total_count: 0,
            page_number: 0,
            pages_available: 0,
            page_items: Vec::new(),
        }
    }

    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            total_count: self.total_count,
            page_number: self.page_number,
            pages_available: self.pages_available,
            page_items: self.page_items.into_iter().map(f).collect(),
        }
    }
}

/// Storage mode for the persistence layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StorageMode {
    /// External database (MySQL/PostgreSQL via SeaORM)
    ExternalDb,
    /// Standalone embedded RocksDB (single node, no external DB)
    StandaloneEmbedded,
}

impl std::fmt::Display for StorageMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StorageMode::ExternalDb => write!(f, "external_db"),
            StorageMode::StandaloneEmbedded => write!(f, "standalone_embedded"),
        }
    }
}

impl std::str::FromStr for StorageMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "external_db" => Ok(StorageMode::ExternalDb),
            "standalone_embedded" => Ok(StorageMode::StandaloneEmbedded),
            _ => Err(format!("Invalid storage mode: {}", s)),
        }
    }
}
