//! Caller-supplied log record payloads
//!
//! `LogInput` is the create/ingest payload, `LogPatch` the partial update.
//! Both accept strings, numbers and booleans for every field and ignore
//! unknown keys. Server managed columns cannot be expressed.

use serde::{Deserialize, Deserializer};

use redlog_common::FieldErrors;
use redlog_persistence::{LogRecordChanges, LogRecordValues};

use crate::sanitize::{
    field_rule, sanitize_field, sanitize_strict, validate_field, validate_pid,
    validate_preserved_length,
};

/// A JSON scalar accepted where a field expects text
#[derive(Deserialize)]
#[serde(untagged)]
enum Scalar {
    Text(String),
    Integer(i64),
    Float(f64),
    Bool(bool),
}

impl Scalar {
    fn into_text(self) -> String {
        match self {
            Scalar::Text(s) => s,
            Scalar::Integer(i) => i.to_string(),
            Scalar::Float(f) => f.to_string(),
            Scalar::Bool(b) => b.to_string(),
        }
    }
}

fn scalar_text<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Scalar>::deserialize(deserializer)?.map(Scalar::into_text))
}

/// Present keys become `Some`, with `null` meaning "clear"
fn patch_text<'de, D>(deserializer: D) -> Result<Option<Option<String>>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Some(
        Option::<Scalar>::deserialize(deserializer)?.map(Scalar::into_text),
    ))
}

/// Fields of a new log record
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct LogInput {
    #[serde(default, deserialize_with = "scalar_text")]
    pub internal_ip: Option<String>,
    #[serde(default, deserialize_with = "scalar_text")]
    pub external_ip: Option<String>,
    #[serde(default, deserialize_with = "scalar_text")]
    pub mac_address: Option<String>,
    #[serde(default, deserialize_with = "scalar_text")]
    pub hostname: Option<String>,
    #[serde(default, deserialize_with = "scalar_text")]
    pub domain: Option<String>,
    #[serde(default, deserialize_with = "scalar_text")]
    pub username: Option<String>,
    #[serde(default, deserialize_with = "scalar_text")]
    pub command: Option<String>,
    #[serde(default, deserialize_with = "scalar_text")]
    pub notes: Option<String>,
    #[serde(default, deserialize_with = "scalar_text")]
    pub filename: Option<String>,
    #[serde(default, deserialize_with = "scalar_text")]
    pub hash_algorithm: Option<String>,
    #[serde(default, deserialize_with = "scalar_text")]
    pub hash_value: Option<String>,
    #[serde(default, deserialize_with = "scalar_text")]
    pub pid: Option<String>,
    #[serde(default, deserialize_with = "scalar_text")]
    pub status: Option<String>,
    #[serde(default, deserialize_with = "scalar_text")]
    pub secrets: Option<String>,
}

/// Allow-listed partial update of a log record
///
/// Outer `None` leaves the column untouched; `Some(None)`, an empty string or
/// a whitespace-only string sets it to NULL.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct LogPatch {
    #[serde(default, deserialize_with = "patch_text")]
    pub internal_ip: Option<Option<String>>,
    #[serde(default, deserialize_with = "patch_text")]
    pub external_ip: Option<Option<String>>,
    #[serde(default, deserialize_with = "patch_text")]
    pub mac_address: Option<Option<String>>,
    #[serde(default, deserialize_with = "patch_text")]
    pub hostname: Option<Option<String>>,
    #[serde(default, deserialize_with = "patch_text")]
    pub domain: Option<Option<String>>,
    #[serde(default, deserialize_with = "patch_text")]
    pub username: Option<Option<String>>,
    #[serde(default, deserialize_with = "patch_text")]
    pub command: Option<Option<String>>,
    #[serde(default, deserialize_with = "patch_text")]
    pub notes: Option<Option<String>>,
    #[serde(default, deserialize_with = "patch_text")]
    pub filename: Option<Option<String>>,
    #[serde(default, deserialize_with = "patch_text")]
    pub hash_algorithm: Option<Option<String>>,
    #[serde(default, deserialize_with = "patch_text")]
    pub hash_value: Option<Option<String>>,
    #[serde(default, deserialize_with = "patch_text")]
    pub pid: Option<Option<String>>,
    #[serde(default, deserialize_with = "patch_text")]
    pub status: Option<Option<String>>,
    #[serde(default, deserialize_with = "patch_text")]
    pub analyst: Option<Option<String>>,
    #[serde(default, deserialize_with = "patch_text")]
    pub secrets: Option<Option<String>>,
}

/// Sanitizes and validates fields one by one, collecting every failure
#[derive(Default)]
struct FieldCleaner {
    errors: FieldErrors,
}

impl FieldCleaner {
    fn text(&mut self, field: &'static str, value: Option<String>) -> Option<String> {
        let raw = value?;
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return None;
        }

        match field_rule(field) {
            Some(rule) if rule.is_strict() => {
                let cleaned = sanitize_field(field, trimmed);
                if cleaned.is_empty() {
                    return None;
                }
                if let Err(e) = validate_field(field, &cleaned) {
                    self.errors.add(field, e);
                    return None;
                }
                Some(cleaned)
            }
            _ => {
                // Length is judged on what the caller sent, not on the escaped form
                if let Err(e) = validate_preserved_length(trimmed) {
                    self.errors.add(field, e);
                    return None;
                }
                let cleaned = sanitize_field(field, &raw);
                (!cleaned.is_empty()).then_some(cleaned)
            }
        }
    }

    fn pid(&mut self, value: Option<String>) -> Option<i64> {
        let cleaned = sanitize_strict(&value?);
        if cleaned.is_empty() {
            return None;
        }
        match validate_pid(&cleaned) {
            Ok(pid) => Some(pid),
            Err(e) => {
                self.errors.add("pid", e);
                None
            }
        }
    }

    fn finish<T>(self, value: T) -> Result<T, FieldErrors> {
        self.errors.into_result().map(|_| value)
    }
}

impl LogInput {
    /// Clean every field. The whole record is rejected if any field fails.
    pub fn into_values(self, analyst: &str) -> Result<LogRecordValues, FieldErrors> {
        let mut c = FieldCleaner::default();
        let values = LogRecordValues {
            internal_ip: c.text("internal_ip", self.internal_ip),
            external_ip: c.text("external_ip", self.external_ip),
            mac_address: c.text("mac_address", self.mac_address),
            hostname: c.text("hostname", self.hostname),
            domain: c.text("domain", self.domain),
            username: c.text("username", self.username),
            command: c.text("command", self.command),
            notes: c.text("notes", self.notes),
            filename: c.text("filename", self.filename),
            hash_algorithm: c.text("hash_algorithm", self.hash_algorithm),
            hash_value: c.text("hash_value", self.hash_value),
            pid: c.pid(self.pid),
            status: c.text("status", self.status),
            analyst: Some(analyst.to_string()),
            secrets: c.text("secrets", self.secrets),
        };
        c.finish(values)
    }
}

impl LogPatch {
    /// Whether the patch names no column at all
    pub fn is_empty(&self) -> bool {
        *self == LogPatch::default()
    }

    /// Clean every present field into storage changes
    pub fn into_changes(self) -> Result<LogRecordChanges, FieldErrors> {
        let mut c = FieldCleaner::default();
        let mut text = |field: &'static str, value: Option<Option<String>>| {
            value.map(|v| c.text(field, v))
        };
        let mut changes = LogRecordChanges {
            internal_ip: text("internal_ip", self.internal_ip),
            external_ip: text("external_ip", self.external_ip),
            mac_address: text("mac_address", self.mac_address),
            hostname: text("hostname", self.hostname),
            domain: text("domain", self.domain),
            username: text("username", self.username),
            command: text("command", self.command),
            notes: text("notes", self.notes),
            filename: text("filename", self.filename),
            hash_algorithm: text("hash_algorithm", self.hash_algorithm),
            hash_value: text("hash_value", self.hash_value),
            pid: None,
            status: text("status", self.status),
            analyst: text("analyst", self.analyst),
            secrets: text("secrets", self.secrets),
        };
        changes.pid = self.pid.map(|v| c.pid(v));
        c.finish(changes)
    }
}
